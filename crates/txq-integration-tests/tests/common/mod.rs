//! Common test utilities for txq integration tests
//!
//! This module provides:
//! - A test environment wiring an in-memory transport into the factories
//! - A recording message handler with configurable delay and failures
//! - Shared test message types and polling helpers

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use txq_handler::{HandlerOptions, MessageHandler, QueueHandlerFactory};
use txq_runtime::{
    AccessMode, InMemoryTransport, LocaleQueueMode, Queue, QueueFactory, QueueMessage, QueuePath,
    QueueSettings,
};

// ============================================================================
// Test Messages
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderPlaced {
    pub id: u32,
    pub customer: String,
}

#[allow(dead_code)]
pub fn order(id: u32) -> OrderPlaced {
    OrderPlaced {
        id,
        customer: format!("customer-{}", id),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[allow(dead_code)]
pub struct Document {
    pub content: String,
}

#[allow(dead_code)]
pub fn document(size: usize) -> Document {
    Document {
        content: "x".repeat(size),
    }
}

// ============================================================================
// Test Environment
// ============================================================================

/// In-memory transport plus the factories built over it
#[derive(Clone)]
pub struct TestEnvironment {
    pub transport: InMemoryTransport,
    pub queues: QueueFactory,
}

#[allow(dead_code)]
impl TestEnvironment {
    pub fn new() -> Self {
        init_tracing();

        let transport = InMemoryTransport::new();
        let queues = QueueFactory::new(Arc::new(transport.clone()));
        Self { transport, queues }
    }

    pub fn with_queue_settings(settings: QueueSettings) -> Self {
        let mut environment = Self::new();
        environment.queues = environment
            .queues
            .with_settings(settings)
            .expect("Invalid queue settings");
        environment
    }

    pub fn handlers(&self) -> QueueHandlerFactory {
        QueueHandlerFactory::new(self.queues.clone())
    }

    /// Durable private queue that may be created on first use
    pub async fn queue(&self, name: &str, transactional: bool, access_mode: AccessMode) -> Queue {
        self.queues
            .create_locale(
                name,
                true,
                LocaleQueueMode::DurableCreate,
                transactional,
                access_mode,
            )
            .await
            .expect("Failed to create queue")
    }

    pub async fn send_orders(&self, name: &str, ids: &[u32]) {
        let sender = self.queue(name, true, AccessMode::Send).await;
        for id in ids {
            sender.send(&order(*id)).await.expect("Failed to send order");
        }
    }

    pub fn queue_len(&self, name: &str) -> Option<usize> {
        self.transport.queue_len(&QueuePath::local(name, true))
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "txq_runtime=debug,txq_handler=debug".into()),
        )
        .with_test_writer()
        .try_init();
}

// ============================================================================
// Recording Message Handler
// ============================================================================

/// Message handler that records handled orders
#[derive(Clone, Default)]
pub struct RecordingHandler {
    handled: Arc<Mutex<Vec<u32>>>,
    attempts: Arc<Mutex<Vec<u32>>>,
    failing: Arc<Mutex<HashSet<u32>>>,
    delay: Arc<Mutex<Option<Duration>>>,
}

#[allow(dead_code)]
impl RecordingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    /// Make every attempt at the given order fail
    pub fn fail_on(&self, id: u32) {
        self.failing.lock().unwrap().insert(id);
    }

    pub fn recover(&self, id: u32) {
        self.failing.lock().unwrap().remove(&id);
    }

    pub fn handled(&self) -> Vec<u32> {
        self.handled.lock().unwrap().clone()
    }

    pub fn attempts(&self) -> Vec<u32> {
        self.attempts.lock().unwrap().clone()
    }

    pub fn options(&self, queue_name: &str) -> HandlerOptions {
        HandlerOptions::new(queue_name)
            .with_handler(self.clone())
            .with_heart_rate(Duration::from_millis(50))
    }
}

#[async_trait::async_trait]
impl MessageHandler for RecordingHandler {
    async fn handle(
        &self,
        message: QueueMessage,
        _cancellation: CancellationToken,
    ) -> anyhow::Result<()> {
        let order = message.decode::<OrderPlaced>()?;
        self.attempts.lock().unwrap().push(order.id);

        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.failing.lock().unwrap().contains(&order.id) {
            anyhow::bail!("order {} rejected", order.id);
        }

        self.handled.lock().unwrap().push(order.id);
        Ok(())
    }
}

// ============================================================================
// Polling
// ============================================================================

/// Poll `condition` until it holds, failing the test after five seconds
#[allow(dead_code)]
pub async fn wait_until(description: &str, condition: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(
            Instant::now() < deadline,
            "Timed out waiting for: {}",
            description
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
