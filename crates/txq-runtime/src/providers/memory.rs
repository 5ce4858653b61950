//! In-memory transport implementation for testing and development.
//!
//! This module provides a fully functional in-memory transport that:
//! - Keeps queues per server, keyed by normalized path
//! - Stages transactional sends and receives until commit or abort
//! - Wakes waiting receivers when messages arrive
//! - Invalidates handles of queues that were deleted
//! - Fails selected operations on demand for fault testing
//!
//! This transport is intended for:
//! - Unit and integration testing of queue consumers
//! - Development without a message queue server

use crate::message::{AccessMode, Chunk, MessageId, QueuePath, RawMessage};
use crate::transport::{TransactionId, TransportError, TransportHandle, TransportProvider};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;

/// Operation that [`InMemoryTransport::inject_failures`] can make fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultPoint {
    Create,
    Open,
    Send,
    Receive,
    Peek,
    Count,
    Commit,
}

/// Running totals of transport activity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransportStats {
    /// Chunks accepted by `send`, staged or not
    pub chunks_sent: usize,
    /// Chunks handed out by `receive`
    pub chunks_received: usize,
    /// Waits started by `peek`
    pub peeks: usize,
    pub commits: usize,
    pub aborts: usize,
}

// ============================================================================
// Internal Storage Structures
// ============================================================================

struct MemoryQueue {
    generation: u64,
    transactional: bool,
    messages: VecDeque<RawMessage>,
}

enum StagedOperation {
    Send { path: QueuePath, message: RawMessage },
    Receive { path: QueuePath, message: RawMessage },
}

#[derive(Default)]
struct State {
    queues: HashMap<QueuePath, MemoryQueue>,
    transactions: HashMap<TransactionId, Vec<StagedOperation>>,
    faults: HashMap<FaultPoint, u32>,
    stats: TransportStats,
    next_generation: u64,
}

impl State {
    fn take_fault(&mut self, point: FaultPoint) -> Result<(), TransportError> {
        match self.faults.get_mut(&point) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                Err(TransportError::Failure {
                    code: "INJECTED".to_string(),
                    message: format!("Injected {:?} failure", point),
                })
            }
            _ => Ok(()),
        }
    }

    fn queue_mut(
        &mut self,
        path: &QueuePath,
        generation: u64,
    ) -> Result<&mut MemoryQueue, TransportError> {
        self.queues
            .get_mut(path)
            .filter(|queue| queue.generation == generation)
            .ok_or_else(|| TransportError::QueueNotFound {
                path: path.format_name(),
            })
    }

    fn stage(
        &mut self,
        transaction: &TransactionId,
        operation: StagedOperation,
    ) -> Result<(), TransportError> {
        self.transactions
            .get_mut(transaction)
            .map(|staged| staged.push(operation))
            .ok_or_else(|| TransportError::TransactionNotFound {
                transaction: transaction.to_string(),
            })
    }
}

struct Shared {
    state: Mutex<State>,
    notify: Notify,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Retry `attempt` whenever the transport changes until it yields or `timeout` expires
    async fn wait_for<T>(
        &self,
        timeout: Duration,
        mut attempt: impl FnMut(&mut State) -> Result<Option<T>, TransportError>,
    ) -> Result<T, TransportError> {
        // A timeout past the end of the clock waits until notified forever.
        let deadline = Instant::now().checked_add(timeout);

        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let result = {
                let mut state = self.lock();
                attempt(&mut state)?
            };

            if let Some(value) = result {
                return Ok(value);
            }

            match deadline {
                Some(deadline) => {
                    if tokio::time::timeout_at(deadline, notified).await.is_err() {
                        return Err(TransportError::Timeout);
                    }
                }
                None => notified.await,
            }
        }
    }
}

// ============================================================================
// InMemoryTransport
// ============================================================================

/// In-memory transport shared by every clone
#[derive(Clone)]
pub struct InMemoryTransport {
    shared: Arc<Shared>,
}

impl InMemoryTransport {
    /// Create a transport with no queues
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State::default()),
                notify: Notify::new(),
            }),
        }
    }

    /// Make the next `count` calls of `point` fail with a transport failure
    pub fn inject_failures(&self, point: FaultPoint, count: u32) {
        self.shared.lock().faults.insert(point, count);
    }

    /// Snapshot of transport activity so far
    pub fn stats(&self) -> TransportStats {
        self.shared.lock().stats
    }

    /// Number of committed chunks in a queue, `None` if the queue does not exist
    pub fn queue_len(&self, path: &QueuePath) -> Option<usize> {
        self.shared
            .lock()
            .queues
            .get(path)
            .map(|queue| queue.messages.len())
    }

    /// Check if a queue was created as transactional
    pub fn is_transactional(&self, path: &QueuePath) -> Option<bool> {
        self.shared
            .lock()
            .queues
            .get(path)
            .map(|queue| queue.transactional)
    }

    /// Number of transactions neither committed nor aborted
    pub fn pending_transactions(&self) -> usize {
        self.shared.lock().transactions.len()
    }
}

impl Default for InMemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TransportProvider for InMemoryTransport {
    async fn create(&self, path: &QueuePath, transactional: bool) -> Result<(), TransportError> {
        let mut state = self.shared.lock();
        state.take_fault(FaultPoint::Create)?;

        if state.queues.contains_key(path) {
            return Err(TransportError::QueueExists {
                path: path.format_name(),
            });
        }

        state.next_generation += 1;
        let generation = state.next_generation;
        state.queues.insert(
            path.clone(),
            MemoryQueue {
                generation,
                transactional,
                messages: VecDeque::new(),
            },
        );
        Ok(())
    }

    async fn delete(&self, path: &QueuePath) -> Result<(), TransportError> {
        let removed = self.shared.lock().queues.remove(path);
        self.shared.notify.notify_waiters();

        removed
            .map(|_| ())
            .ok_or_else(|| TransportError::QueueNotFound {
                path: path.format_name(),
            })
    }

    async fn exists(&self, path: &QueuePath) -> Result<bool, TransportError> {
        Ok(self.shared.lock().queues.contains_key(path))
    }

    async fn open(
        &self,
        path: &QueuePath,
        mode: AccessMode,
    ) -> Result<Option<Arc<dyn TransportHandle>>, TransportError> {
        let mut state = self.shared.lock();
        state.take_fault(FaultPoint::Open)?;

        let Some(queue) = state.queues.get(path) else {
            return Ok(None);
        };

        Ok(Some(Arc::new(InMemoryHandle {
            shared: self.shared.clone(),
            path: path.clone(),
            generation: queue.generation,
            mode,
            closed: AtomicBool::new(false),
        })))
    }

    async fn list(&self, server: &str, private: bool) -> Result<Vec<String>, TransportError> {
        let server = QueuePath::new(server, "", private).server().to_string();
        let state = self.shared.lock();

        let mut names: Vec<String> = state
            .queues
            .keys()
            .filter(|path| path.server() == server && path.is_private() == private)
            .map(|path| path.name().to_string())
            .collect();
        names.sort();
        Ok(names)
    }

    fn begin_transaction(&self) -> Result<TransactionId, TransportError> {
        let id = TransactionId::new();
        self.shared.lock().transactions.insert(id.clone(), Vec::new());
        Ok(id)
    }

    fn commit(&self, transaction: &TransactionId) -> Result<(), TransportError> {
        {
            let mut state = self.shared.lock();
            state.take_fault(FaultPoint::Commit)?;

            let staged = state.transactions.remove(transaction).ok_or_else(|| {
                TransportError::TransactionNotFound {
                    transaction: transaction.to_string(),
                }
            })?;

            for operation in staged {
                if let StagedOperation::Send { path, message } = operation {
                    if let Some(queue) = state.queues.get_mut(&path) {
                        queue.messages.push_back(message);
                    }
                }
            }
            state.stats.commits += 1;
        }

        self.shared.notify.notify_waiters();
        Ok(())
    }

    fn abort(&self, transaction: &TransactionId) -> Result<(), TransportError> {
        {
            let mut state = self.shared.lock();

            let staged = state.transactions.remove(transaction).ok_or_else(|| {
                TransportError::TransactionNotFound {
                    transaction: transaction.to_string(),
                }
            })?;

            // Returned in reverse so the original order is restored at the head
            for operation in staged.into_iter().rev() {
                if let StagedOperation::Receive { path, message } = operation {
                    if let Some(queue) = state.queues.get_mut(&path) {
                        queue.messages.push_front(message);
                    }
                }
            }
            state.stats.aborts += 1;
        }

        self.shared.notify.notify_waiters();
        Ok(())
    }
}

// ============================================================================
// InMemoryHandle
// ============================================================================

struct InMemoryHandle {
    shared: Arc<Shared>,
    path: QueuePath,
    generation: u64,
    mode: AccessMode,
    closed: AtomicBool,
}

impl InMemoryHandle {
    fn check_open(&self) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::HandleClosed {
                path: self.path.format_name(),
            });
        }
        Ok(())
    }

    fn check_access(&self, allowed: bool) -> Result<(), TransportError> {
        if !allowed {
            return Err(TransportError::Failure {
                code: "ACCESS_DENIED".to_string(),
                message: format!("Handle opened with {:?}", self.mode),
            });
        }
        Ok(())
    }

    async fn take_matching(
        &self,
        timeout: Duration,
        transaction: Option<&TransactionId>,
        matches: impl Fn(&RawMessage) -> bool,
    ) -> Result<RawMessage, TransportError> {
        self.check_open()?;
        self.check_access(self.mode.can_receive())?;

        self.shared
            .wait_for(timeout, |state| {
                state.take_fault(FaultPoint::Receive)?;

                let queue = state.queue_mut(&self.path, self.generation)?;
                let Some(position) = queue.messages.iter().position(&matches) else {
                    return Ok(None);
                };
                let Some(message) = queue.messages.remove(position) else {
                    return Ok(None);
                };

                if let Some(transaction) = transaction {
                    state.stage(
                        transaction,
                        StagedOperation::Receive {
                            path: self.path.clone(),
                            message: message.clone(),
                        },
                    )?;
                }

                state.stats.chunks_received += 1;
                Ok(Some(message))
            })
            .await
    }
}

#[async_trait]
impl TransportHandle for InMemoryHandle {
    fn path(&self) -> &QueuePath {
        &self.path
    }

    async fn send(
        &self,
        chunk: Chunk,
        transaction: Option<&TransactionId>,
    ) -> Result<MessageId, TransportError> {
        self.check_open()?;
        self.check_access(self.mode.can_send())?;

        let id = MessageId::new();
        let message = RawMessage::from_chunk(chunk, id.clone());

        {
            let mut state = self.shared.lock();
            state.take_fault(FaultPoint::Send)?;
            state.queue_mut(&self.path, self.generation)?;

            match transaction {
                Some(transaction) => state.stage(
                    transaction,
                    StagedOperation::Send {
                        path: self.path.clone(),
                        message,
                    },
                )?,
                None => state
                    .queue_mut(&self.path, self.generation)?
                    .messages
                    .push_back(message),
            }
            state.stats.chunks_sent += 1;
        }

        self.shared.notify.notify_waiters();
        Ok(id)
    }

    async fn receive(
        &self,
        timeout: Duration,
        transaction: Option<&TransactionId>,
    ) -> Result<RawMessage, TransportError> {
        self.take_matching(timeout, transaction, |_| true).await
    }

    async fn receive_by_correlation_id(
        &self,
        correlation_id: &MessageId,
        timeout: Duration,
        transaction: Option<&TransactionId>,
    ) -> Result<RawMessage, TransportError> {
        self.take_matching(timeout, transaction, |message| {
            message.correlation_id.as_ref() == Some(correlation_id)
        })
        .await
    }

    async fn peek(&self, timeout: Duration) -> Result<(), TransportError> {
        self.check_open()?;
        self.shared.lock().stats.peeks += 1;

        self.shared
            .wait_for(timeout, |state| {
                state.take_fault(FaultPoint::Peek)?;
                let queue = state.queue_mut(&self.path, self.generation)?;
                Ok((!queue.messages.is_empty()).then_some(()))
            })
            .await
    }

    async fn count(&self) -> Result<usize, TransportError> {
        self.check_open()?;

        let mut state = self.shared.lock();
        state.take_fault(FaultPoint::Count)?;
        Ok(state.queue_mut(&self.path, self.generation)?.messages.len())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
