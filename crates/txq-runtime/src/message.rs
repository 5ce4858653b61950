//! Message types for queue operations including core domain identifiers.

use crate::error::QueueError;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Longest queue name (and formatted queue path) accepted by the transport
pub const MAX_QUEUE_NAME_LENGTH: usize = 124;

/// Server name that denotes the local machine
pub const LOCAL_SERVER: &str = ".";

const PRIVATE_PREFIX: &str = "private$\\";

// ============================================================================
// Queue Modes
// ============================================================================

/// Which operations a queue handle permits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccessMode {
    Send,
    Receive,
    SendAndReceive,
}

impl AccessMode {
    /// Check if the mode permits sending
    pub fn can_send(&self) -> bool {
        matches!(self, Self::Send | Self::SendAndReceive)
    }

    /// Check if the mode permits receiving (and counting)
    pub fn can_receive(&self) -> bool {
        matches!(self, Self::Receive | Self::SendAndReceive)
    }
}

/// Creation and lifecycle policy for queues on the local machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LocaleQueueMode {
    /// Durable queue that must already exist
    Durable,
    /// Durable queue created on first use if absent
    DurableCreate,
    /// Temporary queue created on construction and deleted on disposal
    TemporaryMaster,
    /// Temporary queue whose lifecycle is owned by a master elsewhere
    TemporarySlave,
}

impl LocaleQueueMode {
    /// Check if queues in this mode survive their owner
    pub fn is_durable(&self) -> bool {
        matches!(self, Self::Durable | Self::DurableCreate)
    }

    /// Check if this mode may create a missing queue
    pub fn may_create(&self) -> bool {
        matches!(self, Self::DurableCreate | Self::TemporaryMaster)
    }
}

/// Durability of a queue hosted on another server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemoteQueueMode {
    Durable,
    Temporary,
}

// ============================================================================
// Core Domain Identifiers
// ============================================================================

/// Normalized address of a queue on a (possibly remote) server
///
/// Server and queue names are case-insensitive; both are stored lower-cased.
/// An empty server name is treated as the local machine.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueuePath {
    server: String,
    name: String,
    private: bool,
}

impl QueuePath {
    /// Create path for a queue on the local machine
    pub fn local(name: &str, private: bool) -> Self {
        Self::new(LOCAL_SERVER, name, private)
    }

    /// Create path for a queue on the given server
    pub fn new(server: &str, name: &str, private: bool) -> Self {
        let server = server.trim();
        let server = if server.is_empty() {
            LOCAL_SERVER.to_string()
        } else {
            server.to_lowercase()
        };

        Self {
            server,
            name: name.to_lowercase(),
            private,
        }
    }

    /// Get server name (`.` for local)
    pub fn server(&self) -> &str {
        &self.server
    }

    /// Get queue name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Check if the queue is private
    pub fn is_private(&self) -> bool {
        self.private
    }

    /// Check if the path refers to the local machine
    pub fn is_local(&self) -> bool {
        self.server == LOCAL_SERVER
    }

    /// Full transport name, e.g. `.\private$\orders`
    pub fn format_name(&self) -> String {
        let prefix = if self.private { PRIVATE_PREFIX } else { "" };
        format!("{}\\{}{}", self.server, prefix, self.name)
    }

    /// Validate the formatted name against the transport limit
    pub fn validate(&self) -> Result<(), QueueError> {
        let formatted = self.format_name();
        if formatted.len() > MAX_QUEUE_NAME_LENGTH {
            return Err(QueueError::NameTooLong {
                length: formatted.len(),
                name: formatted,
                max_length: MAX_QUEUE_NAME_LENGTH,
            });
        }
        Ok(())
    }
}

impl std::fmt::Display for QueuePath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.format_name())
    }
}

/// Transport-assigned identifier of a single chunk
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(String);

impl MessageId {
    /// Generate new random message ID
    pub fn new() -> Self {
        let id = uuid::Uuid::new_v4();
        Self(id.to_string())
    }

    /// Get message ID as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for MessageId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Timestamp wrapper for consistent time handling
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Create timestamp for current time
    pub fn now() -> Self {
        Self(Utc::now())
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d %H:%M:%S UTC"))
    }
}

// ============================================================================
// Wire Types
// ============================================================================

/// One transport-sized fragment of a logical message, ready to send
///
/// The first chunk of a logical message has no correlation id; each
/// continuation carries the id the transport assigned to its predecessor.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub sequence_total: u32,
    pub correlation_id: Option<MessageId>,
    pub body: Bytes,
}

impl Chunk {
    pub fn new(body: Bytes, sequence_total: u32, correlation_id: Option<MessageId>) -> Self {
        Self {
            sequence_total,
            correlation_id,
            body,
        }
    }
}

/// A chunk as delivered by the transport
#[derive(Debug, Clone)]
pub struct RawMessage {
    pub id: MessageId,
    pub sequence_total: u32,
    pub correlation_id: Option<MessageId>,
    pub body: Bytes,
    pub sent_at: Timestamp,
}

impl RawMessage {
    /// Materialize a sent chunk with its assigned id
    pub fn from_chunk(chunk: Chunk, id: MessageId) -> Self {
        Self {
            id,
            sequence_total: chunk.sequence_total,
            correlation_id: chunk.correlation_id,
            body: chunk.body,
            sent_at: Timestamp::now(),
        }
    }
}

/// Serialized logical message: a type tag plus the JSON of the payload
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEnvelope {
    #[serde(rename = "MessageType", default)]
    pub message_type: Option<String>,
    #[serde(rename = "MessageBody", default)]
    pub message_body: Option<String>,
}

impl QueueEnvelope {
    /// Build the envelope for a typed payload
    pub fn wrap<T: Serialize>(message: &T) -> Result<Self, QueueError> {
        Ok(Self {
            message_type: Some(type_tag::<T>().to_string()),
            message_body: Some(serde_json::to_string(message)?),
        })
    }

    /// Serialize the envelope into the bytes that get chunked
    pub fn to_bytes(&self) -> Result<Vec<u8>, QueueError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parse reassembled bytes; an empty or `null` body yields `None`
    pub fn from_bytes(bytes: &[u8]) -> Result<Option<Self>, QueueError> {
        if bytes.iter().all(|b| b.is_ascii_whitespace()) {
            return Ok(None);
        }

        let envelope: Option<Self> = serde_json::from_slice(bytes)?;
        Ok(envelope.filter(|e| e.message_type.is_some()))
    }
}

/// Type tag recorded for payloads of type `T`
pub fn type_tag<T: ?Sized>() -> &'static str {
    std::any::type_name::<T>()
}

/// Received payload handed to message handlers
///
/// Cheap to clone; deserialization happens on demand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMessage {
    message_type: String,
    body: String,
}

impl QueueMessage {
    pub fn new(message_type: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            message_type: message_type.into(),
            body: body.into(),
        }
    }

    /// Build a payload from a typed value, as if it had been received
    pub fn from_value<T: Serialize>(message: &T) -> Result<Self, QueueError> {
        Ok(Self {
            message_type: type_tag::<T>().to_string(),
            body: serde_json::to_string(message)?,
        })
    }

    /// Recorded type tag
    pub fn message_type(&self) -> &str {
        &self.message_type
    }

    /// Raw JSON body
    pub fn body(&self) -> &str {
        &self.body
    }

    /// Check if the recorded type tag is the tag of `T`
    pub fn is<T>(&self) -> bool {
        self.message_type == type_tag::<T>()
    }

    /// Deserialize the body as `T`
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, QueueError> {
        Ok(serde_json::from_str(&self.body)?)
    }
}

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;
