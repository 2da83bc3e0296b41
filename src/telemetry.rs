use std::sync::Arc;
use std::time::Duration;

/// Structured, in-process event hook for observability.
///
/// This crate is a library; emitting logs directly (e.g. `println!`) is not
/// acceptable for production. Instead, callers can provide an implementation
/// that forwards these events to `tracing`, `log`, metrics, or custom sinks.
pub trait StoreEventListener: std::fmt::Debug + Send + Sync + 'static {
    fn on_event(&self, event: StoreEvent);
}

/// Structured events emitted by the core.
#[derive(Debug, Clone)]
pub enum StoreEvent {
    WriterThreadStarted,
    WriterThreadStopping,

    WorkerPoolStarted { size: usize },
    WorkerPoolStopping,

    RecoveryCompleted { segments: usize, live_keys: usize },
    TornTailTruncated { segment_id: u64, dropped_bytes: u64 },

    SegmentRolledOver { segment_id: u64 },
    RolloverFailed { error: String },

    MergeStarted,
    MergeCompleted { input_segments: usize, live_keys: usize },
    MergeFailed { error: String },
    StaleSegmentRemovalFailed { segment_id: u64, error: String },
}

#[derive(Debug)]
pub struct NoopEventListener;

impl StoreEventListener for NoopEventListener {
    #[inline]
    fn on_event(&self, _event: StoreEvent) {}
}

pub fn noop_event_listener() -> Arc<dyn StoreEventListener> {
    Arc::new(NoopEventListener)
}

/// Production-grade metrics instrumentation and in-process scraping.
///
/// ## Key properties
/// - Library-safe: emitting metrics is effectively a no-op until a recorder is installed.
/// - Serverless scraping: callers can render Prometheus exposition text in-process.
/// - Low operational overhead: a lightweight upkeep thread is spawned to keep histograms bounded.
pub mod store_metrics {
    use super::*;

    use ::metrics::{describe_counter, describe_gauge, describe_histogram, Unit};

    #[cfg(feature = "prometheus")]
    use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
    #[cfg(feature = "prometheus")]
    use std::sync::atomic::{AtomicBool, Ordering};
    #[cfg(feature = "prometheus")]
    use std::sync::Mutex;
    #[cfg(feature = "prometheus")]
    use std::thread::JoinHandle;

    // --- metric names ---
    //
    // Notes:
    // - Counters are exposed as `<name>_total` by the Prometheus exporter.
    // - Histograms are exposed as `<name>_bucket`, `<name>_sum`, `<name>_count`.

    pub const PUT_RECORDS: &str = "seglog_put_records";
    pub const PUT_BYTES_WRITTEN: &str = "seglog_put_bytes_written";
    pub const PUT_DURATION_SECONDS: &str = "seglog_put_duration_seconds";

    pub const GET_REQUESTS: &str = "seglog_get_requests";
    pub const GET_DURATION_SECONDS: &str = "seglog_get_duration_seconds";

    pub const MERGE_DURATION_SECONDS: &str = "seglog_merge_duration_seconds";
    pub const MERGE_BYTES_WRITTEN: &str = "seglog_merge_bytes_written";

    pub const ACTIVE_SEGMENT_ID: &str = "seglog_active_segment_id";
    pub const LIVE_KEYS: &str = "seglog_live_keys";

    /// Handle to the in-process Prometheus recorder/scrape renderer.
    ///
    /// This does **not** start an HTTP server. Call [`InProcessPrometheus::render`] to scrape.
    #[cfg(feature = "prometheus")]
    pub struct InProcessPrometheus {
        handle: PrometheusHandle,
        stop: Arc<AtomicBool>,
        upkeep_thread: Mutex<Option<JoinHandle<()>>>,
    }

    #[cfg(feature = "prometheus")]
    impl InProcessPrometheus {
        /// Installs a global Prometheus recorder (once per process) and starts a small upkeep thread.
        ///
        /// The upkeep thread periodically calls `run_upkeep()` to keep exporter internals healthy
        /// (e.g. histogram maintenance). This is required when using `install_recorder`.
        pub fn install(upkeep_interval: Duration) -> Result<Self, MetricsInitError> {
            describe_all();

            let builder = PrometheusBuilder::new();
            let handle = builder
                .install_recorder()
                .map_err(MetricsInitError::from_build_error)?;

            let stop = Arc::new(AtomicBool::new(false));
            let stop_clone = stop.clone();
            let handle_clone = handle.clone();
            let upkeep_thread = std::thread::Builder::new()
                .name("seglog-metrics-upkeep".to_string())
                .spawn(move || {
                    while !stop_clone.load(Ordering::Relaxed) {
                        std::thread::sleep(upkeep_interval);
                        handle_clone.run_upkeep();
                    }
                })
                .map_err(|e| MetricsInitError::ThreadSpawn(e.to_string()))?;

            Ok(Self {
                handle,
                stop,
                upkeep_thread: Mutex::new(Some(upkeep_thread)),
            })
        }

        /// Renders the current metrics in the Prometheus text exposition format.
        pub fn render(&self) -> String {
            self.handle.render()
        }
    }

    #[cfg(feature = "prometheus")]
    impl Drop for InProcessPrometheus {
        fn drop(&mut self) {
            self.stop.store(true, Ordering::Relaxed);
            if let Ok(mut guard) = self.upkeep_thread.lock() {
                if let Some(t) = guard.take() {
                    let _ = t.join();
                }
            }
        }
    }

    #[cfg(feature = "prometheus")]
    #[derive(Debug, thiserror::Error)]
    pub enum MetricsInitError {
        #[error("metrics recorder already installed")]
        AlreadyInstalled,
        #[error("failed to install prometheus recorder: {0}")]
        Install(String),
        #[error("failed to spawn upkeep thread: {0}")]
        ThreadSpawn(String),
    }

    #[cfg(feature = "prometheus")]
    impl MetricsInitError {
        fn from_build_error(e: BuildError) -> Self {
            match e {
                BuildError::FailedToSetGlobalRecorder(_) => MetricsInitError::AlreadyInstalled,
                other => MetricsInitError::Install(other.to_string()),
            }
        }
    }

    #[inline]
    pub fn record_put(duration: Duration, bytes: u64) {
        ::metrics::counter!(PUT_RECORDS).increment(1);
        if bytes > 0 {
            ::metrics::counter!(PUT_BYTES_WRITTEN).increment(bytes);
        }
        ::metrics::histogram!(PUT_DURATION_SECONDS).record(duration.as_secs_f64());
    }

    #[inline]
    pub fn record_get(duration: Duration) {
        ::metrics::counter!(GET_REQUESTS).increment(1);
        ::metrics::histogram!(GET_DURATION_SECONDS).record(duration.as_secs_f64());
    }

    #[inline]
    pub fn record_merge(duration: Duration, bytes: u64) {
        ::metrics::histogram!(MERGE_DURATION_SECONDS).record(duration.as_secs_f64());
        if bytes > 0 {
            ::metrics::counter!(MERGE_BYTES_WRITTEN).increment(bytes);
        }
    }

    #[inline]
    pub fn record_active_segment(segment_id: u64) {
        ::metrics::gauge!(ACTIVE_SEGMENT_ID).set(segment_id as f64);
    }

    #[inline]
    pub fn record_live_keys(count: u64) {
        ::metrics::gauge!(LIVE_KEYS).set(count as f64);
    }

    fn describe_all() {
        // Counters
        describe_counter!(
            PUT_RECORDS,
            Unit::Count,
            "Total number of records appended via Store::put."
        );
        describe_counter!(
            PUT_BYTES_WRITTEN,
            Unit::Bytes,
            "Total number of record bytes appended to segment files."
        );
        describe_counter!(
            GET_REQUESTS,
            Unit::Count,
            "Total number of Store::get requests dispatched to the worker pool."
        );
        describe_counter!(
            MERGE_BYTES_WRITTEN,
            Unit::Bytes,
            "Total number of record bytes written by merge into fresh segments."
        );

        // Histograms
        describe_histogram!(
            PUT_DURATION_SECONDS,
            Unit::Seconds,
            "End-to-end latency observed by Store::put (enqueue->ack)."
        );
        describe_histogram!(
            GET_DURATION_SECONDS,
            Unit::Seconds,
            "End-to-end latency observed by Store::get (enqueue->reply)."
        );
        describe_histogram!(
            MERGE_DURATION_SECONDS,
            Unit::Seconds,
            "Time to copy the live key set and install the merged segment."
        );

        // Gauges
        describe_gauge!(
            ACTIVE_SEGMENT_ID,
            Unit::Count,
            "Numeric id of the segment currently receiving writes."
        );
        describe_gauge!(
            LIVE_KEYS,
            Unit::Count,
            "Number of keys currently present in the in-memory index."
        );
    }
}
