//! Contract of the underlying message queue transport.
//!
//! The transport is an opaque collaborator: it owns persistence, access control
//! and networking. This crate only relies on the operations below. A receive or
//! peek that waits out its timeout reports [`TransportError::Timeout`], which is
//! kept distinct from every other failure so callers can treat it as "no
//! message" instead of an error.

use crate::message::{AccessMode, Chunk, MessageId, QueuePath, RawMessage};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[cfg(test)]
use mockall::automock;

#[cfg(test)]
#[path = "transport_tests.rs"]
mod tests;

/// Identifier of a transport-level transaction
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionId(String);

impl TransactionId {
    /// Generate new random transaction ID
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Get transaction ID as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Errors raised by the transport
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("Operation timed out")]
    Timeout,

    #[error("Queue not found: {path}")]
    QueueNotFound { path: String },

    #[error("Queue already exists: {path}")]
    QueueExists { path: String },

    #[error("Queue handle closed: {path}")]
    HandleClosed { path: String },

    #[error("Transaction not found: {transaction}")]
    TransactionNotFound { transaction: String },

    #[error("Transport failure ({code}): {message}")]
    Failure { code: String, message: String },
}

impl TransportError {
    /// Check if the error only signals an expired wait
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout)
    }
}

/// Queue-level operations of the transport
#[cfg_attr(test, automock)]
#[async_trait]
pub trait TransportProvider: Send + Sync {
    /// Create a queue
    async fn create(&self, path: &QueuePath, transactional: bool) -> Result<(), TransportError>;

    /// Delete a queue
    async fn delete(&self, path: &QueuePath) -> Result<(), TransportError>;

    /// Check whether a queue exists
    async fn exists(&self, path: &QueuePath) -> Result<bool, TransportError>;

    /// Open a handle on an existing queue; `None` if the queue does not exist
    async fn open(
        &self,
        path: &QueuePath,
        mode: AccessMode,
    ) -> Result<Option<Arc<dyn TransportHandle>>, TransportError>;

    /// List queue names on a server
    async fn list(&self, server: &str, private: bool) -> Result<Vec<String>, TransportError>;

    /// Begin a transaction spanning sends and receives
    fn begin_transaction(&self) -> Result<TransactionId, TransportError>;

    /// Commit a pending transaction
    fn commit(&self, transaction: &TransactionId) -> Result<(), TransportError>;

    /// Abort a pending transaction, returning received messages to their queue
    fn abort(&self, transaction: &TransactionId) -> Result<(), TransportError>;
}

/// Operations on an open queue handle
#[async_trait]
pub trait TransportHandle: Send + Sync {
    /// Path of the queue this handle is bound to
    fn path(&self) -> &QueuePath;

    /// Send a chunk; returns the id the transport assigned to it
    async fn send(
        &self,
        chunk: Chunk,
        transaction: Option<&TransactionId>,
    ) -> Result<MessageId, TransportError>;

    /// Receive the head message, waiting up to `timeout`
    async fn receive(
        &self,
        timeout: Duration,
        transaction: Option<&TransactionId>,
    ) -> Result<RawMessage, TransportError>;

    /// Receive the message whose correlation id matches, waiting up to `timeout`
    async fn receive_by_correlation_id(
        &self,
        correlation_id: &MessageId,
        timeout: Duration,
        transaction: Option<&TransactionId>,
    ) -> Result<RawMessage, TransportError>;

    /// Wait up to `timeout` for a message to become available without consuming it
    async fn peek(&self, timeout: Duration) -> Result<(), TransportError>;

    /// Walk the queue and count its messages without consuming them
    async fn count(&self) -> Result<usize, TransportError>;

    /// Release the handle
    fn close(&self);
}
