//! Error types for queue operations.

use crate::message::{AccessMode, MessageId};
use crate::transport::TransportError;
use std::time::Duration;
use thiserror::Error;

/// Comprehensive error type for all queue operations
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Queue name too long: '{name}' ({length} characters, max: {max_length})")]
    NameTooLong {
        name: String,
        length: usize,
        max_length: usize,
    },

    #[error("Queue missing: {queue_name}")]
    QueueMissing { queue_name: String },

    #[error("Unable to create queue '{queue_name}' (private: {private})")]
    QueueCreate {
        queue_name: String,
        private: bool,
        #[source]
        source: TransportError,
    },

    #[error("Operation '{operation}' not allowed on queue with access mode {access_mode:?}")]
    AccessMode {
        operation: String,
        access_mode: AccessMode,
    },

    #[error(
        "Message too large: {size} bytes (max: {max_size}) on non-transactional queue (transactional: {transactional})"
    )]
    MessageSize {
        size: usize,
        max_size: usize,
        transactional: bool,
    },

    #[error("Missing chunk {chunk}/{chunks} on queue '{queue_name}' after message '{correlation_id}'")]
    MissingChunk {
        queue_name: String,
        correlation_id: MessageId,
        chunk: u32,
        chunks: u32,
    },

    #[error("Invalid message type received on '{queue_name}' (private: {private}): expected {expected}, received {received}")]
    InvalidMessageType {
        queue_name: String,
        private: bool,
        expected: String,
        received: String,
    },

    #[error("Unable to send to queue '{queue_name}'")]
    Send {
        queue_name: String,
        #[source]
        source: TransportError,
    },

    #[error("Unable to receive from queue '{queue_name}' (timeout: {timeout:?}, correlation id: {correlation_id:?})")]
    Receive {
        queue_name: String,
        timeout: Duration,
        correlation_id: Option<MessageId>,
        #[source]
        source: TransportError,
    },

    #[error("Unable to peek queue '{queue_name}' (timeout: {timeout:?})")]
    Peek {
        queue_name: String,
        timeout: Duration,
        #[source]
        source: TransportError,
    },

    #[error("Transaction {operation} failed")]
    Transaction {
        operation: &'static str,
        #[source]
        source: TransportError,
    },

    #[error("Operation '{operation}' not supported on queue '{queue_name}'")]
    UnsupportedOperation {
        operation: String,
        queue_name: String,
    },

    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),
}

impl QueueError {
    pub(crate) fn access_mode(operation: &str, access_mode: AccessMode) -> Self {
        Self::AccessMode {
            operation: operation.to_string(),
            access_mode,
        }
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Configuration parsing failed: {message}")]
    Parsing { message: String },
}

impl From<config::ConfigError> for ConfigurationError {
    fn from(error: config::ConfigError) -> Self {
        Self::Parsing {
            message: error.to_string(),
        }
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
