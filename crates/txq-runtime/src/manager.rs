//! Thin wrapper over the transport that maps its failures into [`QueueError`]s.
//!
//! Timeouts reported by receive and peek operations become `None`/`false`;
//! every other transport failure is logged and wrapped in an
//! operation-specific error that carries the queue identity.

use crate::error::QueueError;
use crate::message::{AccessMode, Chunk, MessageId, QueuePath, RawMessage};
use crate::transport::{TransactionId, TransportHandle, TransportProvider};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

#[cfg(test)]
#[path = "manager_tests.rs"]
mod tests;

/// Error-mapping facade over a [`TransportProvider`]
#[derive(Clone)]
pub struct QueueManager {
    provider: Arc<dyn TransportProvider>,
}

impl QueueManager {
    /// Create new manager over a transport
    pub fn new(provider: Arc<dyn TransportProvider>) -> Self {
        Self { provider }
    }

    /// Get the underlying transport
    pub fn provider(&self) -> &Arc<dyn TransportProvider> {
        &self.provider
    }

    // ========================================================================
    // Queue management
    // ========================================================================

    /// Create a queue
    pub async fn create(&self, path: &QueuePath, transactional: bool) -> Result<(), QueueError> {
        path.validate()?;

        self.provider
            .create(path, transactional)
            .await
            .map_err(|source| {
                info!(queue = %path, error = %source, "Error creating message queue");
                QueueError::QueueCreate {
                    queue_name: path.name().to_string(),
                    private: path.is_private(),
                    source,
                }
            })?;

        debug!(queue = %path, transactional, "Queue created");
        Ok(())
    }

    /// Delete a queue; failures are logged, not raised
    pub async fn delete(&self, path: &QueuePath) {
        match self.provider.delete(path).await {
            Ok(()) => debug!(queue = %path, "Queue deleted"),
            Err(error) => info!(queue = %path, error = %error, "Error deleting message queue"),
        }
    }

    /// Check whether a queue exists; failures count as "does not exist"
    pub async fn exists(&self, path: &QueuePath) -> bool {
        match self.provider.exists(path).await {
            Ok(exists) => exists,
            Err(error) => {
                debug!(queue = %path, error = %error, "Error checking if queue exists");
                false
            }
        }
    }

    /// Open a handle; failures are logged and reported as "no handle"
    pub async fn open(
        &self,
        path: &QueuePath,
        mode: AccessMode,
    ) -> Result<Option<Arc<dyn TransportHandle>>, QueueError> {
        path.validate()?;

        match self.provider.open(path, mode).await {
            Ok(handle) => Ok(handle),
            Err(error) => {
                warn!(queue = %path, error = %error, "Error getting message queue");
                Ok(None)
            }
        }
    }

    /// List queue names on a server; failures yield an empty list
    pub async fn list(&self, server: &str, private: bool) -> Vec<String> {
        match self.provider.list(server, private).await {
            Ok(names) => names,
            Err(error) => {
                warn!(server, private, error = %error, "Error listing message queues");
                Vec::new()
            }
        }
    }

    // ========================================================================
    // Message operations
    // ========================================================================

    /// Send one chunk
    pub async fn send(
        &self,
        handle: &dyn TransportHandle,
        chunk: Chunk,
        transaction: Option<&TransactionId>,
    ) -> Result<MessageId, QueueError> {
        handle.send(chunk, transaction).await.map_err(|source| {
            debug!(queue = %handle.path(), error = %source, "Error sending message to queue");
            QueueError::Send {
                queue_name: handle.path().name().to_string(),
                source,
            }
        })
    }

    /// Receive the head chunk; `None` on timeout
    pub async fn receive(
        &self,
        handle: &dyn TransportHandle,
        timeout: Duration,
        transaction: Option<&TransactionId>,
    ) -> Result<Option<RawMessage>, QueueError> {
        match handle.receive(timeout, transaction).await {
            Ok(message) => Ok(Some(message)),
            Err(error) if error.is_timeout() => Ok(None),
            Err(source) => {
                debug!(queue = %handle.path(), error = %source, "Error receiving message from queue");
                Err(QueueError::Receive {
                    queue_name: handle.path().name().to_string(),
                    timeout,
                    correlation_id: None,
                    source,
                })
            }
        }
    }

    /// Receive the chunk threaded after `correlation_id`; `None` on timeout
    pub async fn receive_by_correlation_id(
        &self,
        handle: &dyn TransportHandle,
        correlation_id: &MessageId,
        timeout: Duration,
        transaction: Option<&TransactionId>,
    ) -> Result<Option<RawMessage>, QueueError> {
        match handle
            .receive_by_correlation_id(correlation_id, timeout, transaction)
            .await
        {
            Ok(message) => Ok(Some(message)),
            Err(error) if error.is_timeout() => Ok(None),
            Err(source) => {
                debug!(
                    queue = %handle.path(),
                    correlation_id = %correlation_id,
                    error = %source,
                    "Error receiving message by correlation id"
                );
                Err(QueueError::Receive {
                    queue_name: handle.path().name().to_string(),
                    timeout,
                    correlation_id: Some(correlation_id.clone()),
                    source,
                })
            }
        }
    }

    /// Wait for a message to be available; `false` on timeout
    pub async fn peek(
        &self,
        handle: &dyn TransportHandle,
        timeout: Duration,
    ) -> Result<bool, QueueError> {
        match handle.peek(timeout).await {
            Ok(()) => Ok(true),
            Err(error) if error.is_timeout() => Ok(false),
            Err(source) => {
                debug!(queue = %handle.path(), error = %source, "Error peeking head of queue");
                Err(QueueError::Peek {
                    queue_name: handle.path().name().to_string(),
                    timeout,
                    source,
                })
            }
        }
    }

    /// Count the messages behind a handle
    pub async fn count(&self, handle: &dyn TransportHandle) -> Result<usize, QueueError> {
        handle.count().await.map_err(|source| QueueError::Receive {
            queue_name: handle.path().name().to_string(),
            timeout: Duration::ZERO,
            correlation_id: None,
            source,
        })
    }
}
