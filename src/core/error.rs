use thiserror::Error;

/// Main error type for store operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Store is closed: {0}")]
    Closed(String),

    #[error("Store is not initialized: {0}")]
    Uninitialized(String),

    #[error("Changelog emission failed for topic {topic}: {reason}")]
    ChangelogEmit { topic: String, reason: String },

    #[error("Invalid session window: start {start} > end {end}")]
    InvalidWindow { start: i64, end: i64 },
}

impl From<bincode::Error> for StoreError {
    fn from(e: bincode::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

/// Result type alias for store operations
pub type Result<T> = std::result::Result<T, StoreError>;
