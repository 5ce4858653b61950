//! Callbacks and start options of a queue handler.

use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use txq_runtime::{LocaleQueueMode, QueueMessage};

#[cfg(test)]
#[path = "options_tests.rs"]
mod tests;

/// Default interval between heartbeats, also the longest single receive wait
pub const DEFAULT_HEART_RATE: Duration = Duration::from_secs(1);

// ============================================================================
// Callbacks
// ============================================================================

/// Processes one received message
///
/// Returning `Ok` acknowledges the message. An error is passed to the
/// [`ErrorHandler`], which decides between acknowledging and returning the
/// message to the queue.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(
        &self,
        message: QueueMessage,
        cancellation: CancellationToken,
    ) -> anyhow::Result<()>;
}

#[async_trait]
impl<F, Fut> MessageHandler for F
where
    F: Fn(QueueMessage, CancellationToken) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn handle(
        &self,
        message: QueueMessage,
        cancellation: CancellationToken,
    ) -> anyhow::Result<()> {
        (self)(message, cancellation).await
    }
}

type ErrorAction = dyn Fn(&QueueMessage, &anyhow::Error) -> anyhow::Result<()> + Send + Sync;
type ErrorFunc = dyn Fn(&QueueMessage, &anyhow::Error) -> anyhow::Result<bool> + Send + Sync;

/// Reacts to a message handler failure
#[derive(Clone)]
pub enum ErrorHandler {
    /// Returning normally marks the failure as handled
    Action(Arc<ErrorAction>),
    /// Returning `true` marks the failure as handled
    Func(Arc<ErrorFunc>),
}

impl ErrorHandler {
    pub fn action<F>(f: F) -> Self
    where
        F: Fn(&QueueMessage, &anyhow::Error) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self::Action(Arc::new(f))
    }

    pub fn func<F>(f: F) -> Self
    where
        F: Fn(&QueueMessage, &anyhow::Error) -> anyhow::Result<bool> + Send + Sync + 'static,
    {
        Self::Func(Arc::new(f))
    }

    /// Invoke the callback; `Ok(true)` means the message should be acknowledged
    pub fn call(&self, message: &QueueMessage, error: &anyhow::Error) -> anyhow::Result<bool> {
        match self {
            Self::Action(action) => action(message, error).map(|()| true),
            Self::Func(func) => func(message, error),
        }
    }
}

impl std::fmt::Debug for ErrorHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Action(_) => f.write_str("ErrorHandler::Action"),
            Self::Func(_) => f.write_str("ErrorHandler::Func"),
        }
    }
}

/// Liveness callback invoked once per heart rate
pub type HeartbeatHandler = Arc<dyn Fn() -> anyhow::Result<()> + Send + Sync>;

// ============================================================================
// Start options
// ============================================================================

/// Everything a handler needs to start draining a queue
///
/// Defaults: private, `DurableCreate`, transactional, one second heart rate,
/// single-threaded, asynchronous, never cancelled from outside.
#[derive(Clone)]
pub struct HandlerOptions {
    pub queue_name: String,
    pub private: bool,
    pub mode: LocaleQueueMode,
    pub transactional: bool,
    pub message_handler: Option<Arc<dyn MessageHandler>>,
    pub error_handler: Option<ErrorHandler>,
    pub heartbeat_handler: Option<HeartbeatHandler>,
    pub heart_rate: Duration,
    /// Keep receiving while earlier messages are still being handled
    pub multi_threaded: bool,
    /// Run the loop on the caller until the queue is drained
    pub sync_mode: bool,
    /// External token; cancelling it stops the handler
    pub cancellation: CancellationToken,
}

impl HandlerOptions {
    pub fn new(queue_name: impl Into<String>) -> Self {
        Self {
            queue_name: queue_name.into(),
            private: true,
            mode: LocaleQueueMode::DurableCreate,
            transactional: true,
            message_handler: None,
            error_handler: None,
            heartbeat_handler: None,
            heart_rate: DEFAULT_HEART_RATE,
            multi_threaded: false,
            sync_mode: false,
            cancellation: CancellationToken::new(),
        }
    }

    pub fn with_private(mut self, private: bool) -> Self {
        self.private = private;
        self
    }

    pub fn with_mode(mut self, mode: LocaleQueueMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_transactional(mut self, transactional: bool) -> Self {
        self.transactional = transactional;
        self
    }

    /// Use a closure returning a future as the message handler
    pub fn with_message_handler<F, Fut>(self, handler: F) -> Self
    where
        F: Fn(QueueMessage, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.with_handler(handler)
    }

    /// Use any [`MessageHandler`] implementation
    pub fn with_handler(mut self, handler: impl MessageHandler + 'static) -> Self {
        self.message_handler = Some(Arc::new(handler));
        self
    }

    pub fn with_error_handler(mut self, handler: ErrorHandler) -> Self {
        self.error_handler = Some(handler);
        self
    }

    pub fn with_heartbeat<F>(mut self, heartbeat: F) -> Self
    where
        F: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.heartbeat_handler = Some(Arc::new(heartbeat));
        self
    }

    pub fn with_heart_rate(mut self, heart_rate: Duration) -> Self {
        self.heart_rate = heart_rate;
        self
    }

    pub fn with_multi_threaded(mut self, multi_threaded: bool) -> Self {
        self.multi_threaded = multi_threaded;
        self
    }

    pub fn with_sync_mode(mut self, sync_mode: bool) -> Self {
        self.sync_mode = sync_mode;
        self
    }

    pub fn with_cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = cancellation;
        self
    }
}

impl std::fmt::Debug for HandlerOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerOptions")
            .field("queue_name", &self.queue_name)
            .field("private", &self.private)
            .field("mode", &self.mode)
            .field("transactional", &self.transactional)
            .field("message_handler", &self.message_handler.is_some())
            .field("error_handler", &self.error_handler)
            .field("heartbeat_handler", &self.heartbeat_handler.is_some())
            .field("heart_rate", &self.heart_rate)
            .field("multi_threaded", &self.multi_threaded)
            .field("sync_mode", &self.sync_mode)
            .finish()
    }
}
