//! Error types for the runtime.

use std::any::Any;

/// A submission was refused by the worker pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SubmitError {
    /// The pool has begun (or finished) shutting down
    #[error("worker pool is shutting down")]
    ShuttingDown,
}

/// Errors raised while bringing up a worker pool.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// A pool needs at least one worker thread
    #[error("worker pool requires at least one worker")]
    NoWorkers,

    /// The OS refused to spawn a worker thread
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Failure of a single task or callback body.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskError {
    /// The body panicked; carries the panic message when it was a string
    #[error("task panicked: {0}")]
    Panicked(String),

    /// The body returned an error value
    #[error("task failed: {0}")]
    Failed(String),
}

impl TaskError {
    /// Build a `Panicked` error from a `catch_unwind` payload.
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        TaskError::Panicked(panic_message(payload.as_ref()))
    }
}

/// Errors that end an event loop run.
#[derive(Debug, thiserror::Error)]
pub enum LoopError {
    /// A failure reached the loop with nobody registered to handle it
    #[error("unhandled failure: {0}")]
    Unhandled(TaskError),

    /// `run` was called while the loop was already running
    #[error("event loop is already running")]
    AlreadyRunning,

    /// The loop's worker pool could not be created
    #[error(transparent)]
    Pool(#[from] PoolError),
}

/// Errors from loading a [`LoopConfig`](crate::LoopConfig).
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Reading the config file failed
    #[error("{0}")]
    Io(#[from] std::io::Error),

    /// The file was not valid TOML for this schema
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value was out of range
    #[error("invalid config value `{field}`: {reason}")]
    Invalid {
        /// Offending key
        field: &'static str,
        /// Why it was rejected
        reason: String,
    },
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
