//! # Transactional Queue Handler
//!
//! Supervisory loop that drains a queue into application callbacks.
//!
//! A handler receives messages, runs them through a message handler and
//! acknowledges or returns them according to the outcome and an optional
//! error handler. It emits a heartbeat, trips after repeated receive failures
//! and cleans up its queue when stopped.
//!
//! ## Module Organization
//!
//! - [`error`] - Errors raised by handlers
//! - [`options`] - Callbacks and start options
//! - [`settings`] - Handler configuration
//! - [`handler`] - The processing loop
//! - [`factory`] - Handler construction
//! - [`testing`] - Replaying handler for tests of dependent code

pub mod error;
pub mod factory;
pub mod handler;
pub mod options;
pub mod settings;
pub mod testing;

pub use error::HandlerError;
pub use factory::{HandlerFactory, QueueHandlerFactory};
pub use handler::{QueueHandler, QueueHandling, WorkerOutcome, WorkerReport};
pub use options::{
    ErrorHandler, HandlerOptions, HeartbeatHandler, MessageHandler, DEFAULT_HEART_RATE,
};
pub use settings::{load_handler_settings, HandlerSettings};
pub use testing::{TestQueueHandler, TestQueueHandlerFactory};
