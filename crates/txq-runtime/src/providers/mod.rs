//! Transport implementations.
//!
//! This module contains concrete implementations of the `TransportProvider`
//! and `TransportHandle` traits. Production deployments supply their own
//! binding to the message queue server.

pub mod memory;

pub use memory::{FaultPoint, InMemoryTransport, TransportStats};
