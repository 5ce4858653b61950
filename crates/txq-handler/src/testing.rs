//! In-memory handler that replays a fixed list of messages.
//!
//! Code that depends on [`HandlerFactory`] can be exercised without any
//! transport: the factory collects messages, every handler it builds replays
//! them once into the message handler when started.

use crate::error::HandlerError;
use crate::factory::HandlerFactory;
use crate::handler::QueueHandling;
use crate::options::HandlerOptions;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::debug;
use txq_runtime::{QueueError, QueueMessage};

#[cfg(test)]
#[path = "testing_tests.rs"]
mod tests;

type Messages = Arc<Mutex<Vec<QueueMessage>>>;

fn snapshot(messages: &Messages) -> Vec<QueueMessage> {
    match messages.lock() {
        Ok(messages) => messages.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    }
}

/// Replays the messages of its factory on start
#[derive(Debug)]
pub struct TestQueueHandler {
    messages: Messages,
    replaying: AtomicBool,
    heartbeat: Mutex<Option<JoinHandle<()>>>,
}

impl TestQueueHandler {
    fn new(messages: Messages) -> Self {
        Self {
            messages,
            replaying: AtomicBool::new(false),
            heartbeat: Mutex::new(None),
        }
    }

    fn replace_heartbeat(&self, task: Option<JoinHandle<()>>) {
        let previous = match self.heartbeat.lock() {
            Ok(mut current) => std::mem::replace(&mut *current, task),
            Err(poisoned) => std::mem::replace(&mut *poisoned.into_inner(), task),
        };

        if let Some(previous) = previous {
            previous.abort();
        }
    }
}

#[async_trait]
impl QueueHandling for TestQueueHandler {
    async fn start(&self, options: HandlerOptions) -> Result<(), HandlerError> {
        let handler =
            options
                .message_handler
                .clone()
                .ok_or_else(|| HandlerError::MissingMessageHandler {
                    queue_name: options.queue_name.clone(),
                })?;

        if let Some(heartbeat) = options.heartbeat_handler.clone() {
            if options.heart_rate.is_zero() {
                return Err(HandlerError::InvalidHeartRate {
                    heart_rate: options.heart_rate,
                });
            }

            let cancellation = options.cancellation.clone();
            let heart_rate = options.heart_rate;
            self.replace_heartbeat(Some(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = cancellation.cancelled() => break,
                        _ = tokio::time::sleep(heart_rate) => {
                            if let Err(error) = heartbeat() {
                                debug!(error = %error, "Error in heartbeat handler");
                            }
                        }
                    }
                }
            })));
        }

        self.replaying.store(true, Ordering::SeqCst);

        for message in snapshot(&self.messages) {
            let Err(error) = handler
                .handle(message.clone(), options.cancellation.clone())
                .await
            else {
                continue;
            };

            if let Some(error_handler) = &options.error_handler {
                if let Err(handler_error) = error_handler.call(&message, &error) {
                    debug!(error = %handler_error, "Exception in error handler");
                }
            }
        }

        self.replaying.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) {
        self.replace_heartbeat(None);
    }

    fn is_idle(&self) -> bool {
        !self.replaying.load(Ordering::SeqCst)
    }
}

/// Collects messages for the handlers it builds
#[derive(Debug, Clone, Default)]
pub struct TestQueueHandlerFactory {
    messages: Messages,
}

impl TestQueueHandlerFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a typed message for replay
    pub fn add<T: Serialize>(&self, message: &T) -> Result<(), QueueError> {
        self.push(QueueMessage::from_value(message)?);
        Ok(())
    }

    /// Queue a raw payload for replay
    pub fn push(&self, message: QueueMessage) {
        match self.messages.lock() {
            Ok(mut messages) => messages.push(message),
            Err(poisoned) => poisoned.into_inner().push(message),
        }
    }

    pub fn messages(&self) -> Vec<QueueMessage> {
        snapshot(&self.messages)
    }

    pub fn create_handler(&self) -> TestQueueHandler {
        TestQueueHandler::new(self.messages.clone())
    }
}

impl HandlerFactory for TestQueueHandlerFactory {
    fn create(&self) -> Box<dyn QueueHandling> {
        Box::new(self.create_handler())
    }
}
