//! Bounded reader worker pool.
//!
//! A fixed number of worker threads, each with its own inbox, serve `get`
//! requests. A dispatcher thread pops the shared request queue and hands
//! each request to a free worker; the free list is a condvar-guarded stack,
//! so the dispatcher blocks instead of spinning when every worker is busy.
//! The pool bounds the number of simultaneously open read file descriptors
//! to its size.

use std::sync::mpsc::{self, Receiver, Sender, SyncSender};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

use crate::error::StoreError;
use crate::telemetry::{StoreEvent, StoreEventListener};

/// Worker callback: resolves a key to its current value.
pub(crate) type ReadFn = Arc<dyn Fn(&str) -> Result<String, StoreError> + Send + Sync>;

struct ReadRequest {
    key: String,
    ack: Sender<Result<String, StoreError>>,
}

enum WorkerMsg {
    Job(ReadRequest),
    Stop,
}

type FreeList = Arc<(Mutex<Vec<Sender<WorkerMsg>>>, Condvar)>;

#[derive(Debug)]
pub(crate) struct WorkerPool {
    /// Shared request queue; dropped on close to stop the dispatcher.
    queue_tx: Mutex<Option<SyncSender<ReadRequest>>>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    events: Arc<dyn StoreEventListener>,
}

impl WorkerPool {
    pub(crate) fn new(
        read_fn: ReadFn,
        size: usize,
        events: Arc<dyn StoreEventListener>,
    ) -> Result<Self, StoreError> {
        let free: FreeList = Arc::new((Mutex::new(Vec::with_capacity(size)), Condvar::new()));
        let mut workers = Vec::with_capacity(size);

        for i in 0..size {
            let (inbox_tx, inbox_rx) = mpsc::channel::<WorkerMsg>();
            {
                let (list, _) = &*free;
                list.lock()?.push(inbox_tx.clone());
            }
            let handle = spawn_worker(i, read_fn.clone(), inbox_tx, inbox_rx, free.clone())?;
            workers.push(handle);
        }

        // The queue is bounded so callers block at admission instead of
        // growing an unbounded backlog.
        let (queue_tx, queue_rx) = mpsc::sync_channel::<ReadRequest>(size);
        let dispatcher = spawn_dispatcher(queue_rx, free, size)?;

        events.on_event(StoreEvent::WorkerPoolStarted { size });
        Ok(Self {
            queue_tx: Mutex::new(Some(queue_tx)),
            dispatcher: Mutex::new(Some(dispatcher)),
            workers: Mutex::new(workers),
            events,
        })
    }

    /// Dispatches one `get`; blocks until a worker replies.
    pub(crate) fn dispatch(&self, key: &str) -> Result<String, StoreError> {
        let queue_tx = {
            let guard = self.queue_tx.lock()?;
            guard.as_ref().cloned().ok_or(StoreError::Closed)?
        };
        let (ack_tx, ack_rx) = mpsc::channel();
        queue_tx
            .send(ReadRequest {
                key: key.to_string(),
                ack: ack_tx,
            })
            .map_err(|_| StoreError::Closed)?;
        ack_rx.recv().map_err(|e| {
            StoreError::BackgroundTaskError(format!("reader worker dropped reply channel: {}", e))
        })?
    }

    /// Stops the dispatcher and all workers. In-flight and already-queued
    /// requests are served before the threads exit. Idempotent.
    pub(crate) fn close(&self) -> Result<(), StoreError> {
        let queue_tx = self.queue_tx.lock()?.take();
        if queue_tx.is_none() {
            return Ok(());
        }
        drop(queue_tx);
        self.events.on_event(StoreEvent::WorkerPoolStopping);

        if let Some(handle) = self.dispatcher.lock()?.take() {
            handle.join().map_err(|_| {
                StoreError::BackgroundTaskError("reader dispatcher panicked".to_string())
            })?;
        }
        let mut workers = self.workers.lock()?;
        for handle in workers.drain(..) {
            handle.join().map_err(|_| {
                StoreError::BackgroundTaskError("reader worker panicked".to_string())
            })?;
        }
        Ok(())
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

fn spawn_worker(
    id: usize,
    read_fn: ReadFn,
    own_tx: Sender<WorkerMsg>,
    inbox: Receiver<WorkerMsg>,
    free: FreeList,
) -> Result<JoinHandle<()>, StoreError> {
    thread::Builder::new()
        .name(format!("seglog-reader-{}", id))
        .spawn(move || {
            while let Ok(msg) = inbox.recv() {
                let request = match msg {
                    WorkerMsg::Job(request) => request,
                    WorkerMsg::Stop => break,
                };
                let result = read_fn(&request.key);
                let _ = request.ack.send(result);

                // Back onto the free list for the next request.
                let (list, available) = &*free;
                let Ok(mut guard) = list.lock() else { break };
                guard.push(own_tx.clone());
                available.notify_one();
            }
        })
        .map_err(|e| StoreError::BackgroundTaskError(format!("failed to spawn reader: {}", e)))
}

fn spawn_dispatcher(
    queue_rx: Receiver<ReadRequest>,
    free: FreeList,
    size: usize,
) -> Result<JoinHandle<()>, StoreError> {
    thread::Builder::new()
        .name("seglog-read-dispatcher".to_string())
        .spawn(move || {
            for request in queue_rx.iter() {
                let Some(worker) = pop_free_worker(&free) else {
                    let _ = request.ack.send(Err(StoreError::BackgroundTaskError(
                        "reader free list poisoned".to_string(),
                    )));
                    continue;
                };
                if let Err(undelivered) = worker.send(WorkerMsg::Job(request)) {
                    if let WorkerMsg::Job(request) = undelivered.0 {
                        let _ = request.ack.send(Err(StoreError::BackgroundTaskError(
                            "reader worker terminated".to_string(),
                        )));
                    }
                }
            }

            // Queue closed: collect every worker as it frees up and stop it.
            for _ in 0..size {
                let Some(worker) = pop_free_worker(&free) else { break };
                let _ = worker.send(WorkerMsg::Stop);
            }
        })
        .map_err(|e| StoreError::BackgroundTaskError(format!("failed to spawn dispatcher: {}", e)))
}

/// Blocks until a worker is free, then claims it.
fn pop_free_worker(free: &FreeList) -> Option<Sender<WorkerMsg>> {
    let (list, available) = &**free;
    let mut guard = list.lock().ok()?;
    loop {
        if let Some(worker) = guard.pop() {
            return Some(worker);
        }
        guard = available.wait(guard).ok()?;
    }
}
