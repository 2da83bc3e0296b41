use thiserror::Error;

/// Custom error type for store operations.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("record does not exist")]
    NotFound,

    #[error("store is closed")]
    Closed,

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("invalid options: {0}")]
    InvalidOptions(String),

    #[error("record too large: {0}")]
    RecordTooLarge(String),

    #[error("corrupt record: {details}")]
    CorruptRecord { details: String },

    #[error("bad segment name: {name}")]
    BadSegmentName { name: String },

    #[error("I/O Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Lock acquisition failed: {0}")]
    LockError(String),

    #[error("Background task error: {0}")]
    BackgroundTaskError(String),
}

// Implement conversion from lock poison errors for convenience
impl<T> From<std::sync::PoisonError<T>> for StoreError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        StoreError::LockError(format!("Mutex/RwLock poisoned: {}", err))
    }
}
