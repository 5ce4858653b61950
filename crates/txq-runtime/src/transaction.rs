//! Transport transactions with begin/commit/abort bookkeeping.

use crate::error::QueueError;
use crate::transport::{TransactionId, TransportProvider};
use std::sync::Arc;
use tracing::warn;

#[cfg(test)]
#[path = "transaction_tests.rs"]
mod tests;

/// Lifecycle state of a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    Pending,
    Committed,
    Aborted,
}

/// A pending unit of transport work
///
/// Commit and abort only act while the transaction is pending. A transaction
/// dropped while still pending is aborted.
pub struct Transaction {
    id: TransactionId,
    provider: Arc<dyn TransportProvider>,
    status: TransactionStatus,
}

impl Transaction {
    /// Begin a new transaction on the transport
    pub fn begin(provider: Arc<dyn TransportProvider>) -> Result<Self, QueueError> {
        let id = provider
            .begin_transaction()
            .map_err(|source| QueueError::Transaction {
                operation: "begin",
                source,
            })?;

        Ok(Self {
            id,
            provider,
            status: TransactionStatus::Pending,
        })
    }

    /// Get transaction id as seen by the transport
    pub fn id(&self) -> &TransactionId {
        &self.id
    }

    /// Get current status
    pub fn status(&self) -> TransactionStatus {
        self.status
    }

    /// Check if the transaction is still pending
    pub fn is_pending(&self) -> bool {
        self.status == TransactionStatus::Pending
    }

    /// Commit the transaction if pending
    pub fn commit(&mut self) -> Result<(), QueueError> {
        if !self.is_pending() {
            return Ok(());
        }

        self.provider
            .commit(&self.id)
            .map_err(|source| QueueError::Transaction {
                operation: "commit",
                source,
            })?;
        self.status = TransactionStatus::Committed;
        Ok(())
    }

    /// Abort the transaction if pending
    pub fn abort(&mut self) -> Result<(), QueueError> {
        if !self.is_pending() {
            return Ok(());
        }

        // Whatever the transport says, the transaction can no longer be used.
        self.status = TransactionStatus::Aborted;
        self.provider
            .abort(&self.id)
            .map_err(|source| QueueError::Transaction {
                operation: "abort",
                source,
            })
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("status", &self.status)
            .finish()
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.is_pending() {
            if let Err(error) = self.abort() {
                warn!(transaction = %self.id, error = %error, "Error aborting abandoned transaction");
            }
        }
    }
}
