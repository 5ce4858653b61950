//! Supervisory receive-dispatch-acknowledge loop.
//!
//! A started [`QueueHandler`] owns one queue and one processing loop. Each
//! iteration runs the heartbeat when it is due, waits for a message for the
//! rest of the heartbeat interval and hands the message to a worker. Workers
//! acknowledge on success and consult the error handler on failure. When a
//! wait comes back empty, finished workers are reaped and, in synchronous
//! mode, the loop ends.
//!
//! Consecutive receive failures are counted. Reaching the configured limit
//! ends a synchronous run with [`HandlerError::QueueHandlerProcess`]; an
//! asynchronous loop backs off, clears the counter and carries on.
//!
//! The loop owns its queue and its workers. On exit it waits for every
//! outstanding worker and disposes the queue, so cancelling the token passed
//! in [`HandlerOptions`] is enough to shut a handler down.

use crate::error::HandlerError;
use crate::options::{ErrorHandler, HandlerOptions, HeartbeatHandler, MessageHandler};
use crate::settings::HandlerSettings;
use async_trait::async_trait;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use txq_runtime::{
    Queue, QueueError, QueueFactory, QueueMessage, ReceiveOutcome, TransactionalMessage,
};

#[cfg(test)]
#[path = "handler_tests.rs"]
mod tests;

/// Shortest wait for a message in asynchronous mode, so an exhausted heart
/// rate never turns the loop into a busy poll
const MIN_RECEIVE_WAIT: Duration = Duration::from_millis(10);

/// Lifecycle of something that drains a queue into a message handler
#[async_trait]
pub trait QueueHandling: Send + Sync {
    /// Start processing
    ///
    /// Fails with [`HandlerError::NotStopped`] while a previous start is still
    /// active. In synchronous mode this returns once the queue is drained.
    async fn start(&self, options: HandlerOptions) -> Result<(), HandlerError>;

    /// Cancel processing and wait for outstanding work; idempotent
    async fn stop(&self);

    /// Check if nothing is in flight
    fn is_idle(&self) -> bool;
}

// ============================================================================
// Worker reports
// ============================================================================

/// How a worker finished
#[derive(Debug)]
pub enum WorkerOutcome {
    /// The message was acknowledged or returned as the handlers decided
    Completed,
    /// Acknowledgement failed or the handler panicked
    Faulted(anyhow::Error),
}

/// What a worker hands back to the loop
#[derive(Debug)]
pub struct WorkerReport {
    pub message: QueueMessage,
    pub outcome: WorkerOutcome,
}

struct WorkerContext {
    queue_name: String,
    message_handler: Arc<dyn MessageHandler>,
    error_handler: Option<ErrorHandler>,
}

impl WorkerContext {
    fn call_error_handler(&self, message: &QueueMessage, error: &anyhow::Error) -> anyhow::Result<bool> {
        match &self.error_handler {
            Some(handler) => handler.call(message, error),
            None => Ok(false),
        }
    }

    async fn handle(
        &self,
        message: &mut TransactionalMessage,
        payload: QueueMessage,
        cancellation: CancellationToken,
    ) -> Result<(), QueueError> {
        debug!(queue = %self.queue_name, message_type = payload.message_type(), "Handler called");

        let error = match self.message_handler.handle(payload.clone(), cancellation).await {
            Ok(()) => return message.ack(),
            Err(error) => error,
        };

        debug!(queue = %self.queue_name, error = %error, "Error handler called");

        match self.call_error_handler(&payload, &error) {
            Ok(true) => message.ack(),
            Ok(false) => message.nack(),
            Err(handler_error) => {
                info!(
                    queue = %self.queue_name,
                    error = %handler_error,
                    original_error = %error,
                    "Exception in error handler"
                );
                message.nack()
            }
        }
    }

    fn report(&self, report: WorkerReport) {
        if let WorkerOutcome::Faulted(error) = report.outcome {
            warn!(queue = %self.queue_name, error = %error, "Handler task faulted");

            if let Err(handler_error) = self.call_error_handler(&report.message, &error) {
                warn!(queue = %self.queue_name, error = %handler_error, "Exception in error handler");
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "handler panicked".to_string()
    }
}

async fn run_worker(
    context: Arc<WorkerContext>,
    mut message: TransactionalMessage,
    payload: QueueMessage,
    cancellation: CancellationToken,
) -> WorkerReport {
    let result = AssertUnwindSafe(context.handle(&mut message, payload.clone(), cancellation))
        .catch_unwind()
        .await;

    let outcome = match result {
        Ok(Ok(())) => WorkerOutcome::Completed,
        Ok(Err(error)) => WorkerOutcome::Faulted(error.into()),
        Err(panic) => WorkerOutcome::Faulted(
            HandlerError::TaskCreation {
                queue_name: context.queue_name.clone(),
                message: panic_message(panic.as_ref()),
            }
            .into(),
        ),
    };

    // A panicking handler leaves the transaction pending; dropping returns the message.
    drop(message);

    WorkerReport {
        message: payload,
        outcome,
    }
}

// ============================================================================
// Shared state
// ============================================================================

#[derive(Default)]
struct HandlerState {
    cancellation: std::sync::Mutex<Option<CancellationToken>>,
    workers: AtomicUsize,
    message_received: AtomicBool,
    failures: AtomicU32,
}

impl HandlerState {
    fn set_cancellation(&self, cancellation: Option<CancellationToken>) {
        match self.cancellation.lock() {
            Ok(mut current) => *current = cancellation,
            Err(poisoned) => *poisoned.into_inner() = cancellation,
        }
    }

    fn cancellation(&self) -> Option<CancellationToken> {
        match self.cancellation.lock() {
            Ok(current) => current.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn reset(&self, cancellation: CancellationToken) {
        self.workers.store(0, Ordering::SeqCst);
        self.message_received.store(true, Ordering::SeqCst);
        self.failures.store(0, Ordering::SeqCst);
        self.set_cancellation(Some(cancellation));
    }

    fn is_idle(&self) -> bool {
        match self.cancellation() {
            None => true,
            Some(cancellation) if cancellation.is_cancelled() => true,
            Some(_) => {
                self.workers.load(Ordering::SeqCst) == 0
                    && !self.message_received.load(Ordering::SeqCst)
                    && self.failures.load(Ordering::SeqCst) == 0
            }
        }
    }
}

// ============================================================================
// Processing loop
// ============================================================================

struct Processor {
    queue: Queue,
    context: Arc<WorkerContext>,
    heartbeat: Option<HeartbeatHandler>,
    heart_rate: Duration,
    multi_threaded: bool,
    sync_mode: bool,
    failure_limit: u32,
    failure_backoff: Duration,
    state: Arc<HandlerState>,
    cancellation: CancellationToken,
}

impl Processor {
    fn queue_name(&self) -> &str {
        &self.context.queue_name
    }

    async fn run(self) -> Result<(), HandlerError> {
        let mut workers = JoinSet::new();
        let mut last_heartbeat = Instant::now();
        let mut failures = 0u32;

        let result = loop {
            if self.cancellation.is_cancelled() {
                break Ok(());
            }

            if failures == 0 && last_heartbeat.elapsed() > self.heart_rate {
                self.heartbeat();
                last_heartbeat = Instant::now();
            }

            let mut timeout = self.heart_rate.saturating_sub(last_heartbeat.elapsed());
            if !self.sync_mode {
                timeout = timeout.max(MIN_RECEIVE_WAIT);
            }

            match self.queue.receive_async(timeout, &self.cancellation).await {
                Ok(ReceiveOutcome::Message(message)) => {
                    failures = 0;
                    self.record_receive(failures, true);
                    self.dispatch(message, &mut workers).await;
                }
                Ok(ReceiveOutcome::Empty) | Ok(ReceiveOutcome::Cancelled) => {
                    failures = 0;
                    self.record_receive(failures, false);
                    self.reap(&mut workers);

                    if self.sync_mode {
                        break Ok(());
                    }
                }
                Err(receive_error) => {
                    failures += 1;
                    self.record_receive(failures, false);

                    if failures < self.failure_limit {
                        debug!(
                            queue = %self.queue_name(),
                            failures,
                            error = %receive_error,
                            "Receive failed, continuing"
                        );
                        continue;
                    }

                    if self.sync_mode {
                        error!(queue = %self.queue_name(), error = %receive_error, "Error processing queue handler");
                        break Err(HandlerError::QueueHandlerProcess {
                            queue_name: self.queue_name().to_string(),
                            source: receive_error,
                        });
                    }

                    warn!(
                        queue = %self.queue_name(),
                        error = %receive_error,
                        backoff = ?self.failure_backoff,
                        "Error processing queue handler, backing off"
                    );

                    tokio::select! {
                        _ = self.cancellation.cancelled() => {}
                        _ = tokio::time::sleep(self.failure_backoff) => {}
                    }

                    failures = 0;
                    self.record_receive(failures, false);
                }
            }
        };

        self.shutdown(workers).await;
        result
    }

    fn record_receive(&self, failures: u32, message_received: bool) {
        self.state.failures.store(failures, Ordering::SeqCst);
        self.state
            .message_received
            .store(message_received, Ordering::SeqCst);
    }

    fn heartbeat(&self) {
        debug!(queue = %self.queue_name(), "Heartbeat handler called");

        let Some(heartbeat) = &self.heartbeat else {
            return;
        };

        match std::panic::catch_unwind(AssertUnwindSafe(|| heartbeat())) {
            Ok(Ok(())) => {}
            Ok(Err(error)) => {
                warn!(queue = %self.queue_name(), error = %error, "Error in heartbeat handler")
            }
            Err(panic) => warn!(
                queue = %self.queue_name(),
                error = %panic_message(panic.as_ref()),
                "Heartbeat handler panicked"
            ),
        }
    }

    async fn dispatch(&self, message: TransactionalMessage, workers: &mut JoinSet<WorkerReport>) {
        let Some(payload) = message.payload().cloned() else {
            return;
        };

        let worker = run_worker(
            self.context.clone(),
            message,
            payload,
            self.cancellation.clone(),
        );

        if self.sync_mode {
            self.context.report(worker.await);
            return;
        }

        workers.spawn(worker);
        self.state.workers.store(workers.len(), Ordering::SeqCst);

        if !self.multi_threaded {
            if let Some(joined) = workers.join_next().await {
                self.complete(joined);
            }
            self.state.workers.store(workers.len(), Ordering::SeqCst);
        }
    }

    fn reap(&self, workers: &mut JoinSet<WorkerReport>) {
        if !workers.is_empty() {
            debug!(queue = %self.queue_name(), "Cleaning up finished tasks");
        }

        while let Some(Some(joined)) = workers.join_next().now_or_never() {
            self.complete(joined);
        }
        self.state.workers.store(workers.len(), Ordering::SeqCst);
    }

    fn complete(&self, joined: Result<WorkerReport, JoinError>) {
        match joined {
            Ok(report) => self.context.report(report),
            Err(join_error) => {
                warn!(queue = %self.queue_name(), error = %join_error, "Handler task did not complete")
            }
        }
    }

    async fn shutdown(self, mut workers: JoinSet<WorkerReport>) {
        while let Some(joined) = workers.join_next().await {
            self.complete(joined);
        }
        self.state.workers.store(0, Ordering::SeqCst);

        self.queue.dispose().await;
        info!(queue = %self.queue_name(), "Queue handler stopped");
    }
}

// ============================================================================
// QueueHandler
// ============================================================================

struct Session {
    cancellation: CancellationToken,
    run: SessionRun,
}

/// Where the processing loop of a session runs
enum SessionRun {
    Spawned(JoinHandle<Result<(), HandlerError>>),
    /// Runs inside the `start` call; the token is cancelled once it has returned
    Inline(CancellationToken),
}

/// Drains one queue at a time into a message handler
pub struct QueueHandler {
    factory: QueueFactory,
    settings: HandlerSettings,
    state: Arc<HandlerState>,
    session: Mutex<Option<Session>>,
}

impl QueueHandler {
    pub fn new(factory: QueueFactory, settings: HandlerSettings) -> Self {
        Self {
            factory,
            settings,
            state: Arc::new(HandlerState::default()),
            session: Mutex::new(None),
        }
    }

    async fn finish_session(session: Session) {
        match session.run {
            SessionRun::Spawned(task) => match task.await {
                Ok(Ok(())) => {}
                Ok(Err(error)) => warn!(error = %error, "Queue handler ended with error"),
                Err(error) => warn!(error = %error, "Queue handler task did not complete"),
            },
            SessionRun::Inline(finished) => finished.cancelled().await,
        }
    }
}

#[async_trait]
impl QueueHandling for QueueHandler {
    async fn start(&self, options: HandlerOptions) -> Result<(), HandlerError> {
        let mut session = self.session.lock().await;

        if let Some(active) = session.as_ref() {
            if !active.cancellation.is_cancelled() {
                return Err(HandlerError::NotStopped);
            }
        }
        if let Some(previous) = session.take() {
            Self::finish_session(previous).await;
        }

        let message_handler =
            options
                .message_handler
                .clone()
                .ok_or_else(|| HandlerError::MissingMessageHandler {
                    queue_name: options.queue_name.clone(),
                })?;

        if options.heartbeat_handler.is_some() && options.heart_rate.is_zero() {
            return Err(HandlerError::InvalidHeartRate {
                heart_rate: options.heart_rate,
            });
        }

        let queue = self
            .factory
            .create_locale(
                &options.queue_name,
                options.private,
                options.mode,
                options.transactional,
                self.settings.access_mode,
            )
            .await?;

        let cancellation = options.cancellation.child_token();
        self.state.reset(cancellation.clone());

        let processor = Processor {
            queue,
            context: Arc::new(WorkerContext {
                queue_name: options.queue_name.clone(),
                message_handler,
                error_handler: options.error_handler.clone(),
            }),
            heartbeat: options.heartbeat_handler.clone(),
            heart_rate: options.heart_rate,
            multi_threaded: options.multi_threaded,
            sync_mode: options.sync_mode,
            failure_limit: self.settings.receive_failure_limit,
            failure_backoff: self.settings.failure_backoff(),
            state: self.state.clone(),
            cancellation: cancellation.clone(),
        };

        info!(
            queue = %options.queue_name,
            multi_threaded = options.multi_threaded,
            sync_mode = options.sync_mode,
            "Queue handler started"
        );

        if !options.sync_mode {
            *session = Some(Session {
                cancellation,
                run: SessionRun::Spawned(tokio::spawn(processor.run())),
            });
            return Ok(());
        }

        // Released once the run has shut down, or when this call is dropped mid-run.
        let finished = CancellationToken::new();
        let finished_guard = finished.clone().drop_guard();
        *session = Some(Session {
            cancellation: cancellation.clone(),
            run: SessionRun::Inline(finished),
        });
        drop(session);

        let result = processor.run().await;
        cancellation.cancel();
        // A concurrent start may hold the session lock while it waits for this.
        drop(finished_guard);

        let mut session = self.session.lock().await;
        if session
            .as_ref()
            .is_some_and(|s| {
                matches!(s.run, SessionRun::Inline(_)) && s.cancellation.is_cancelled()
            })
        {
            session.take();
        }
        self.state.set_cancellation(None);

        result
    }

    async fn stop(&self) {
        let Some(session) = self.session.lock().await.take() else {
            return;
        };

        session.cancellation.cancel();
        Self::finish_session(session).await;
        self.state.set_cancellation(None);
    }

    fn is_idle(&self) -> bool {
        self.state.is_idle()
    }
}

impl Drop for QueueHandler {
    fn drop(&mut self) {
        if let Some(session) = self.session.get_mut() {
            session.cancellation.cancel();
        }
    }
}

impl std::fmt::Debug for QueueHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueHandler")
            .field("settings", &self.settings)
            .field("idle", &self.is_idle())
            .finish()
    }
}
