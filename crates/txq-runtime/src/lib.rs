//! # Transactional Queue Runtime
//!
//! Client-side runtime for a transactional message queue transport.
//!
//! This library provides:
//! - Chunked send and reassembling receive of arbitrarily large messages
//! - Transactional receive with explicit acknowledgement
//! - Connection management with idle reconnect and one-shot retry
//! - Locale and remote queues with creation and disposal policies
//! - An in-memory transport for tests and development
//!
//! ## Module Organization
//!
//! - [`error`] - Error types for all queue operations
//! - [`message`] - Queue paths, modes, wire types and payloads
//! - [`transport`] - Contract of the underlying transport
//! - [`manager`] - Error-mapping facade over the transport
//! - [`transaction`] - Transport transactions
//! - [`transactional`] - Received messages awaiting acknowledgement
//! - [`queue`] - The queue itself
//! - [`factory`] - Construction of locale and remote queues
//! - [`locks`] - Keyed locks guarding queue creation
//! - [`settings`] - Configuration loading
//! - [`providers`] - Transport implementations

pub mod error;
pub mod factory;
pub mod locks;
pub mod manager;
pub mod message;
pub mod providers;
pub mod queue;
pub mod settings;
pub mod transaction;
pub mod transactional;
pub mod transport;

// Re-export commonly used types at crate root for convenience
pub use error::{ConfigurationError, QueueError};
pub use factory::QueueFactory;
pub use locks::{KeyedLockGuard, KeyedLockProvider, LocalLockProvider};
pub use manager::QueueManager;
pub use message::{
    AccessMode, LocaleQueueMode, MessageId, QueueEnvelope, QueueMessage, QueuePath,
    RemoteQueueMode, Timestamp,
};
pub use providers::{FaultPoint, InMemoryTransport, TransportStats};
pub use queue::{Queue, QueueKind, ReceiveOutcome};
pub use settings::{load_queue_settings, QueueSettings};
pub use transaction::{Transaction, TransactionStatus};
pub use transactional::TransactionalMessage;
pub use transport::{TransactionId, TransportError, TransportHandle, TransportProvider};
