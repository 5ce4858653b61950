//! Error types for queue handlers.

use std::time::Duration;
use thiserror::Error;
use txq_runtime::{ConfigurationError, QueueError};

/// Errors raised when starting or running a queue handler
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("Handler not stopped")]
    NotStopped,

    #[error("Invalid heart rate: {heart_rate:?}")]
    InvalidHeartRate { heart_rate: Duration },

    #[error("No message handler supplied for queue '{queue_name}'")]
    MissingMessageHandler { queue_name: String },

    #[error("Handler task failed on queue '{queue_name}': {message}")]
    TaskCreation { queue_name: String, message: String },

    #[error("Error processing queue handler '{queue_name}'")]
    QueueHandlerProcess {
        queue_name: String,
        #[source]
        source: QueueError,
    },

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
