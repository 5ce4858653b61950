//! Queue with transactional, chunked send and receive.
//!
//! A logical message is serialized into a [`QueueEnvelope`] and split into
//! chunks no larger than the configured maximum. Chunks travel inside one
//! transport transaction and are threaded through correlation ids: the first
//! chunk carries the total and no correlation id, every following chunk
//! carries the id the transport assigned to its predecessor. Reassembly walks
//! the same thread under a receive transaction that is committed or aborted by
//! [`TransactionalMessage::ack`] / [`TransactionalMessage::nack`].
//!
//! All connect, disconnect, send and receive paths serialize through one lock
//! per queue instance. The wait for a message (the transport peek racing the
//! cancellation token) happens outside that lock, so senders are not blocked
//! while a receiver waits.

use crate::error::QueueError;
use crate::locks::KeyedLockProvider;
use crate::manager::QueueManager;
use crate::message::{
    type_tag, AccessMode, Chunk, LocaleQueueMode, MessageId, QueueEnvelope, QueuePath,
    RemoteQueueMode, MAX_QUEUE_NAME_LENGTH,
};
use crate::settings::QueueSettings;
use crate::transaction::Transaction;
use crate::transactional::TransactionalMessage;
use crate::transport::{TransportError, TransportHandle};
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[cfg(test)]
#[path = "queue_tests.rs"]
mod tests;

/// How the queue's transport handle is resolved and who owns its lifecycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueKind {
    /// Queue on the local machine
    Locale { mode: LocaleQueueMode },
    /// Queue hosted on a named server; never created or deleted by this side
    Remote {
        server: String,
        mode: RemoteQueueMode,
    },
}

impl QueueKind {
    fn is_durable(&self) -> bool {
        match self {
            Self::Locale { mode } => mode.is_durable(),
            Self::Remote { mode, .. } => *mode == RemoteQueueMode::Durable,
        }
    }

    fn server(&self) -> &str {
        match self {
            Self::Locale { .. } => crate::message::LOCAL_SERVER,
            Self::Remote { server, .. } => server,
        }
    }
}

/// Result of waiting for a message
#[derive(Debug)]
pub enum ReceiveOutcome {
    /// A reassembled message awaiting acknowledgement
    Message(TransactionalMessage),
    /// The wait timed out or the queue held nothing to deliver
    Empty,
    /// The cancellation token fired before a message arrived
    Cancelled,
}

impl ReceiveOutcome {
    /// Collapse into a message, using the empty message for `Empty`/`Cancelled`
    pub fn into_message(self) -> TransactionalMessage {
        match self {
            Self::Message(message) => message,
            Self::Empty | Self::Cancelled => TransactionalMessage::empty(),
        }
    }
}

struct Connection {
    handle: Option<Arc<dyn TransportHandle>>,
    connected_at: Instant,
}

/// A queue bound to one transport handle at a time
pub struct Queue {
    name: String,
    private: bool,
    durable: bool,
    transactional: bool,
    access_mode: AccessMode,
    kind: QueueKind,
    path: QueuePath,
    manager: QueueManager,
    locks: Arc<dyn KeyedLockProvider>,
    settings: QueueSettings,
    connection: Mutex<Connection>,
    disposed: AtomicBool,
}

impl Queue {
    /// Create a queue object; no transport work happens until first use
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        manager: QueueManager,
        locks: Arc<dyn KeyedLockProvider>,
        settings: QueueSettings,
        kind: QueueKind,
        name: &str,
        private: bool,
        transactional: bool,
        access_mode: AccessMode,
    ) -> Result<Self, QueueError> {
        if name.len() > MAX_QUEUE_NAME_LENGTH {
            return Err(QueueError::NameTooLong {
                name: name.to_string(),
                length: name.len(),
                max_length: MAX_QUEUE_NAME_LENGTH,
            });
        }

        let path = QueuePath::new(kind.server(), name, private);
        path.validate()?;

        Ok(Self {
            name: name.to_string(),
            private,
            durable: kind.is_durable(),
            transactional,
            access_mode,
            kind,
            path,
            manager,
            locks,
            settings,
            connection: Mutex::new(Connection {
                handle: None,
                connected_at: Instant::now(),
            }),
            disposed: AtomicBool::new(false),
        })
    }

    /// Run the construction-time lifecycle policy of the queue's kind
    pub(crate) async fn initialize(&self) -> Result<(), QueueError> {
        match self.kind {
            QueueKind::Locale {
                mode: LocaleQueueMode::TemporaryMaster,
            } => {
                self.create_if_not_exist().await?;
                self.connect().await
            }
            QueueKind::Locale {
                mode: LocaleQueueMode::DurableCreate,
            } => self.create_if_not_exist().await,
            _ => Ok(()),
        }
    }

    // ========================================================================
    // Identity
    // ========================================================================

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_private(&self) -> bool {
        self.private
    }

    pub fn is_durable(&self) -> bool {
        self.durable
    }

    pub fn is_transactional(&self) -> bool {
        self.transactional
    }

    pub fn access_mode(&self) -> AccessMode {
        self.access_mode
    }

    pub fn kind(&self) -> &QueueKind {
        &self.kind
    }

    pub fn path(&self) -> &QueuePath {
        &self.path
    }

    /// Server name for remote queues
    pub fn server_name(&self) -> Option<&str> {
        match &self.kind {
            QueueKind::Remote { server, .. } => Some(server),
            QueueKind::Locale { .. } => None,
        }
    }

    /// Check if a transport handle is currently held
    pub async fn is_connected(&self) -> bool {
        self.connection.lock().await.handle.is_some()
    }

    // ========================================================================
    // Connection lifecycle
    // ========================================================================

    /// Obtain a transport handle if none is held
    pub async fn connect(&self) -> Result<(), QueueError> {
        let mut connection = self.connection.lock().await;
        self.connect_locked(&mut connection).await
    }

    /// Close and release the transport handle; idempotent
    pub async fn disconnect(&self) {
        let mut connection = self.connection.lock().await;
        self.disconnect_locked(&mut connection);
    }

    /// Drop the current handle and obtain a fresh one
    pub async fn reconnect(&self) -> Result<(), QueueError> {
        let mut connection = self.connection.lock().await;
        self.disconnect_locked(&mut connection);
        self.connect_locked(&mut connection).await
    }

    async fn connect_locked(&self, connection: &mut Connection) -> Result<(), QueueError> {
        if connection.handle.is_some() {
            return Ok(());
        }

        if matches!(self.kind, QueueKind::Locale { .. }) {
            self.create_if_not_exist().await?;
        }

        let handle = self
            .manager
            .open(&self.path, self.access_mode)
            .await?
            .ok_or_else(|| QueueError::QueueMissing {
                queue_name: self.name.clone(),
            })?;

        connection.handle = Some(handle);
        connection.connected_at = Instant::now();

        info!(
            queue = %self.path,
            access_mode = ?self.access_mode,
            durable = self.durable,
            transactional = self.transactional,
            "Connected to message queue"
        );
        Ok(())
    }

    fn disconnect_locked(&self, connection: &mut Connection) {
        if let Some(handle) = connection.handle.take() {
            handle.close();
            info!(queue = %self.path, "Disconnected from message queue");
        }
    }

    /// Reconnect when the held handle has outlived the configured idle window
    async fn auto_reconnect_locked(
        &self,
        connection: &mut Connection,
    ) -> Result<Arc<dyn TransportHandle>, QueueError> {
        if connection.handle.is_some()
            && connection.connected_at.elapsed() > self.settings.idle_reconnect()
        {
            debug!(queue = %self.path, "Handle expired, reconnecting");
            self.disconnect_locked(connection);
        }

        self.connect_locked(connection).await?;

        connection
            .handle
            .clone()
            .ok_or_else(|| QueueError::QueueMissing {
                queue_name: self.name.clone(),
            })
    }

    // ========================================================================
    // Locale lifecycle
    // ========================================================================

    /// Create the queue on the local machine
    pub async fn create(&self) -> Result<(), QueueError> {
        self.ensure_locale("create")?;
        self.manager.create(&self.path, self.transactional).await
    }

    /// Delete the queue from the local machine
    pub async fn delete(&self) -> Result<(), QueueError> {
        self.ensure_locale("delete")?;
        self.manager.delete(&self.path).await;
        Ok(())
    }

    /// Check whether the queue exists on the local machine
    pub async fn exists(&self) -> Result<bool, QueueError> {
        self.ensure_locale("exists")?;
        Ok(self.manager.exists(&self.path).await)
    }

    fn ensure_locale(&self, operation: &str) -> Result<LocaleQueueMode, QueueError> {
        match self.kind {
            QueueKind::Locale { mode } => Ok(mode),
            QueueKind::Remote { .. } => Err(QueueError::UnsupportedOperation {
                operation: operation.to_string(),
                queue_name: self.name.clone(),
            }),
        }
    }

    async fn create_if_not_exist(&self) -> Result<(), QueueError> {
        let mode = self.ensure_locale("create")?;

        if self.manager.exists(&self.path).await {
            return Ok(());
        }

        if !mode.may_create() {
            return Err(QueueError::QueueMissing {
                queue_name: self.name.clone(),
            });
        }

        let key = format!("txq.{}", self.path.format_name());
        let guard = self
            .locks
            .acquire(&key, self.settings.create_lock_timeout())
            .await;
        if guard.is_none() {
            warn!(queue = %self.path, "Creation lock not obtained in time, creating anyway");
        }

        if !self.manager.exists(&self.path).await {
            match self.manager.create(&self.path, self.transactional).await {
                Ok(()) => {}
                // Another owner outside this lock created it first.
                Err(QueueError::QueueCreate {
                    source: TransportError::QueueExists { .. },
                    ..
                }) => {
                    debug!(queue = %self.path, "Queue created concurrently by another owner");
                }
                Err(e) => return Err(e),
            }
        }

        drop(guard);
        Ok(())
    }

    /// Release the handle and, for a temporary master, delete the queue
    ///
    /// Safe to call more than once; only the first call has an effect.
    pub async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }

        self.disconnect().await;

        if self.kind
            == (QueueKind::Locale {
                mode: LocaleQueueMode::TemporaryMaster,
            })
        {
            self.manager.delete(&self.path).await;
        }
    }

    // ========================================================================
    // Count
    // ========================================================================

    /// Number of chunks in the queue, `None` if it cannot be determined
    ///
    /// Best-effort and not transactional; failures are logged, not raised.
    pub async fn count(&self) -> Result<Option<usize>, QueueError> {
        if !self.access_mode.can_receive() {
            return Err(QueueError::access_mode("count", self.access_mode));
        }

        let mut connection = self.connection.lock().await;

        let handle = match self.auto_reconnect_locked(&mut connection).await {
            Ok(handle) => handle,
            Err(error) => {
                warn!(queue = %self.path, error = %error, "Unable to count messages");
                return Ok(None);
            }
        };

        match self.manager.count(handle.as_ref()).await {
            Ok(count) => Ok(Some(count)),
            Err(error) => {
                warn!(queue = %self.path, error = %error, "Unable to count messages");
                Ok(None)
            }
        }
    }

    // ========================================================================
    // Send
    // ========================================================================

    /// Send a message, chunking it if it exceeds the transport size
    ///
    /// A failed send is retried once after dropping the handle.
    pub async fn send<T: Serialize>(&self, message: &T) -> Result<(), QueueError> {
        if !self.access_mode.can_send() {
            return Err(QueueError::access_mode("send", self.access_mode));
        }

        let body = QueueEnvelope::wrap(message)?.to_bytes()?;
        let max_chunk_size = self.settings.max_chunk_size;
        let chunks = body.len().div_ceil(max_chunk_size).max(1);

        if !self.transactional && chunks > 1 {
            return Err(QueueError::MessageSize {
                size: body.len(),
                max_size: max_chunk_size,
                transactional: self.transactional,
            });
        }

        let body = Bytes::from(body);
        let mut connection = self.connection.lock().await;

        match self.send_locked(&mut connection, &body).await {
            Ok(()) => Ok(()),
            Err(error) => {
                warn!(queue = %self.path, error = %error, "Error sending, retrying once");
                self.disconnect_locked(&mut connection);
                self.send_locked(&mut connection, &body).await
            }
        }
    }

    async fn send_locked(
        &self,
        connection: &mut Connection,
        body: &Bytes,
    ) -> Result<(), QueueError> {
        let handle = self.auto_reconnect_locked(connection).await?;
        let mut transaction = self.begin_transaction()?;

        match self
            .send_chunks(handle.as_ref(), body, transaction.as_ref())
            .await
        {
            Ok(()) => match transaction.as_mut() {
                Some(transaction) => transaction.commit(),
                None => Ok(()),
            },
            Err(error) => {
                if let Some(transaction) = transaction.as_mut() {
                    if let Err(abort_error) = transaction.abort() {
                        debug!(queue = %self.path, error = %abort_error, "Error aborting send");
                    }
                }
                Err(error)
            }
        }
    }

    async fn send_chunks(
        &self,
        handle: &dyn TransportHandle,
        body: &Bytes,
        transaction: Option<&Transaction>,
    ) -> Result<(), QueueError> {
        let max_chunk_size = self.settings.max_chunk_size;
        let chunks = body.len().div_ceil(max_chunk_size).max(1) as u32;
        let transaction_id = transaction.map(|t| t.id());

        debug!(
            queue = %self.path,
            chunks,
            size = body.len(),
            transactional = self.transactional,
            "Sending message"
        );

        let mut correlation_id: Option<MessageId> = None;
        for (index, start) in (0..body.len().max(1)).step_by(max_chunk_size).enumerate() {
            let end = (start + max_chunk_size).min(body.len());
            let chunk = Chunk::new(body.slice(start..end), chunks, correlation_id.take());

            debug!(
                queue = %self.path,
                chunk = index + 1,
                chunks,
                correlation_id = ?chunk.correlation_id,
                "Sending message chunk"
            );

            let id = self.manager.send(handle, chunk, transaction_id).await?;
            correlation_id = Some(id);
        }

        Ok(())
    }

    fn begin_transaction(&self) -> Result<Option<Transaction>, QueueError> {
        if self.transactional {
            Transaction::begin(self.manager.provider().clone()).map(Some)
        } else {
            Ok(None)
        }
    }

    // ========================================================================
    // Receive
    // ========================================================================

    /// Wait up to `timeout` for a message
    ///
    /// Cancellation is reported as [`ReceiveOutcome::Cancelled`], a timeout as
    /// [`ReceiveOutcome::Empty`]. Any failure drops the handle and the whole
    /// wait is retried once.
    pub async fn receive_async(
        &self,
        timeout: Duration,
        cancellation: &CancellationToken,
    ) -> Result<ReceiveOutcome, QueueError> {
        if !self.access_mode.can_receive() {
            return Err(QueueError::access_mode("receive", self.access_mode));
        }

        match self.receive_once(timeout, cancellation).await {
            Ok(outcome) => Ok(outcome),
            Err(error) => {
                warn!(queue = %self.path, error = %error, "Error receiving message, retrying once");
                self.disconnect().await;
                self.receive_once(timeout, cancellation).await
            }
        }
    }

    /// Wait up to `timeout` for a message; timeout and cancellation give the empty message
    pub async fn receive(
        &self,
        timeout: Duration,
        cancellation: &CancellationToken,
    ) -> Result<TransactionalMessage, QueueError> {
        let outcome = self.receive_async(timeout, cancellation).await?;

        if matches!(outcome, ReceiveOutcome::Cancelled) {
            debug!(queue = %self.path, "Receive cancelled");
        }

        Ok(outcome.into_message())
    }

    /// Receive a message of type `T` and acknowledge it
    ///
    /// A message recorded with a different type is returned to the queue and
    /// reported as [`QueueError::InvalidMessageType`]. `None` when no message
    /// arrived in time.
    pub async fn receive_typed<T: DeserializeOwned>(
        &self,
        timeout: Duration,
        cancellation: &CancellationToken,
    ) -> Result<Option<T>, QueueError> {
        let mut message = self.receive(timeout, cancellation).await?;

        let Some(payload) = message.payload().cloned() else {
            return Ok(None);
        };

        if !payload.is::<T>() {
            message.nack()?;
            return Err(QueueError::InvalidMessageType {
                queue_name: self.name.clone(),
                private: self.private,
                expected: type_tag::<T>().to_string(),
                received: payload.message_type().to_string(),
            });
        }

        match payload.decode::<T>() {
            Ok(value) => {
                message.ack()?;
                Ok(Some(value))
            }
            Err(error) => {
                message.nack()?;
                Err(error)
            }
        }
    }

    async fn receive_once(
        &self,
        timeout: Duration,
        cancellation: &CancellationToken,
    ) -> Result<ReceiveOutcome, QueueError> {
        let handle = {
            let mut connection = self.connection.lock().await;
            self.auto_reconnect_locked(&mut connection).await?
        };

        let available = tokio::select! {
            biased;
            _ = cancellation.cancelled() => return Ok(ReceiveOutcome::Cancelled),
            peeked = self.manager.peek(handle.as_ref(), timeout) => peeked?,
        };

        if !available {
            return Ok(ReceiveOutcome::Empty);
        }

        let _connection = self.connection.lock().await;
        self.receive_message(handle.as_ref()).await
    }

    async fn receive_message(
        &self,
        handle: &dyn TransportHandle,
    ) -> Result<ReceiveOutcome, QueueError> {
        let mut transaction = self.begin_transaction()?;

        match self.reassemble(handle, transaction.as_ref()).await {
            Ok(Some(envelope)) => Ok(ReceiveOutcome::Message(TransactionalMessage::new(
                Some(envelope),
                transaction,
            ))),
            Ok(None) => {
                if let Some(transaction) = transaction.as_mut() {
                    transaction.commit()?;
                }
                Ok(ReceiveOutcome::Empty)
            }
            Err(error) => {
                if let Some(transaction) = transaction.as_mut() {
                    if let Err(abort_error) = transaction.abort() {
                        debug!(queue = %self.path, error = %abort_error, "Error aborting receive");
                    }
                }
                Err(error)
            }
        }
    }

    async fn reassemble(
        &self,
        handle: &dyn TransportHandle,
        transaction: Option<&Transaction>,
    ) -> Result<Option<QueueEnvelope>, QueueError> {
        let transaction_id = transaction.map(|t| t.id());

        let Some(first) = self
            .manager
            .receive(handle, Duration::ZERO, transaction_id)
            .await?
        else {
            return Ok(None);
        };

        let chunks = first.sequence_total.max(1);
        debug!(
            queue = %self.path,
            chunk = 1,
            chunks,
            sent_at = %first.sent_at,
            "Received message chunk"
        );

        let mut body = Vec::with_capacity(first.body.len() * chunks as usize);
        body.extend_from_slice(&first.body);
        let mut previous = first.id;

        for chunk in 2..=chunks {
            let next = self
                .manager
                .receive_by_correlation_id(handle, &previous, Duration::ZERO, transaction_id)
                .await?
                .ok_or_else(|| QueueError::MissingChunk {
                    queue_name: self.name.clone(),
                    correlation_id: previous.clone(),
                    chunk,
                    chunks,
                })?;

            debug!(queue = %self.path, chunk, chunks, "Received message chunk");
            body.extend_from_slice(&next.body);
            previous = next.id;
        }

        QueueEnvelope::from_bytes(&body)
    }
}

impl std::fmt::Debug for Queue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Queue")
            .field("name", &self.name)
            .field("private", &self.private)
            .field("durable", &self.durable)
            .field("transactional", &self.transactional)
            .field("access_mode", &self.access_mode)
            .field("kind", &self.kind)
            .finish()
    }
}

impl Drop for Queue {
    fn drop(&mut self) {
        if self.disposed.load(Ordering::SeqCst) {
            return;
        }

        if let Some(handle) = self.connection.get_mut().handle.take() {
            handle.close();
        }

        if self.kind
            == (QueueKind::Locale {
                mode: LocaleQueueMode::TemporaryMaster,
            })
        {
            match tokio::runtime::Handle::try_current() {
                Ok(runtime) => {
                    let manager = self.manager.clone();
                    let path = self.path.clone();
                    runtime.spawn(async move { manager.delete(&path).await });
                }
                Err(_) => warn!(queue = %self.path, "Temporary queue dropped outside a runtime, not deleted"),
            }
        }
    }
}
