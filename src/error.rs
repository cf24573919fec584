// src/error.rs
use thiserror::Error;

/// Errors raised by a backing store implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("queue \"{0}\" is closed")]
    Closed(String),

    #[error("invalid repeat schedule: {0}")]
    InvalidSchedule(String),
}

/// Errors surfaced by the registry, the producer and the runners.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Job name or handler type is unknown to the registry.
    #[error("job \"{0}\" is not registered")]
    NotFound(String),

    /// Two different handler types claim the same job name.
    #[error("job name \"{name}\" is already registered by {existing}")]
    Conflict { name: String, existing: &'static str },

    /// A runner cannot start (or a handler cannot be constructed) as configured.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The handler's `run` returned an error or panicked.
    #[error("job \"{name}\" ({id}) failed: {message}")]
    HandlerExecution {
        name: String,
        id: String,
        message: String,
        trace: Vec<String>,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type Result<T, E = QueueError> = std::result::Result<T, E>;
