//! Received messages awaiting acknowledgement.

use crate::error::QueueError;
use crate::message::{QueueEnvelope, QueueMessage};
use crate::transaction::Transaction;
use serde::de::DeserializeOwned;

#[cfg(test)]
#[path = "transactional_tests.rs"]
mod tests;

/// A dequeued message whose removal is not yet committed
///
/// [`ack`](Self::ack) commits the receive transaction, [`nack`](Self::nack)
/// aborts it so the message becomes visible again. Both act once; the empty
/// message (no payload, no transaction) treats them as no-ops. Dropping a
/// message that was never acknowledged behaves like `nack`.
#[derive(Debug, Default)]
pub struct TransactionalMessage {
    payload: Option<QueueMessage>,
    transaction: Option<Transaction>,
}

impl TransactionalMessage {
    /// The "no message" instance
    pub fn empty() -> Self {
        Self::default()
    }

    pub(crate) fn new(envelope: Option<QueueEnvelope>, transaction: Option<Transaction>) -> Self {
        let payload = envelope.and_then(|envelope| {
            envelope.message_type.map(|message_type| {
                QueueMessage::new(message_type, envelope.message_body.unwrap_or_default())
            })
        });

        Self {
            payload,
            transaction,
        }
    }

    /// Check if this is the "no message" instance
    pub fn is_empty(&self) -> bool {
        self.payload.is_none()
    }

    /// Recorded type tag, if any
    pub fn message_type(&self) -> Option<&str> {
        self.payload.as_ref().map(|p| p.message_type())
    }

    /// Raw JSON body, if any
    pub fn body(&self) -> Option<&str> {
        self.payload.as_ref().map(|p| p.body())
    }

    /// Received payload, if any
    pub fn payload(&self) -> Option<&QueueMessage> {
        self.payload.as_ref()
    }

    /// Deserialize the payload as `T`; `None` for the empty message
    pub fn message<T: DeserializeOwned>(&self) -> Result<Option<T>, QueueError> {
        self.payload.as_ref().map(|p| p.decode::<T>()).transpose()
    }

    /// Check if a receive transaction is still awaiting acknowledgement
    pub fn is_pending(&self) -> bool {
        self.transaction.as_ref().is_some_and(|t| t.is_pending())
    }

    /// Acknowledge: the message is consumed
    pub fn ack(&mut self) -> Result<(), QueueError> {
        match self.transaction.as_mut() {
            Some(transaction) => transaction.commit(),
            None => Ok(()),
        }
    }

    /// Reject: the message returns to the queue
    pub fn nack(&mut self) -> Result<(), QueueError> {
        match self.transaction.as_mut() {
            Some(transaction) => transaction.abort(),
            None => Ok(()),
        }
    }
}
