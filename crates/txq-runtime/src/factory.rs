//! Construction of queues sharing one transport, lock provider and settings.

use crate::error::QueueError;
use crate::locks::{KeyedLockProvider, LocalLockProvider};
use crate::manager::QueueManager;
use crate::message::{AccessMode, LocaleQueueMode, RemoteQueueMode};
use crate::queue::{Queue, QueueKind};
use crate::settings::QueueSettings;
use crate::transport::TransportProvider;
use std::sync::Arc;
use tracing::debug;

#[cfg(test)]
#[path = "factory_tests.rs"]
mod tests;

/// Builds [`Queue`]s and runs their construction-time lifecycle policy
#[derive(Clone)]
pub struct QueueFactory {
    manager: QueueManager,
    locks: Arc<dyn KeyedLockProvider>,
    settings: QueueSettings,
}

impl QueueFactory {
    /// Create a factory with default settings and the process-wide creation locks
    pub fn new(provider: Arc<dyn TransportProvider>) -> Self {
        Self {
            manager: QueueManager::new(provider),
            locks: Arc::new(LocalLockProvider::shared()),
            settings: QueueSettings::default(),
        }
    }

    /// Use the given settings for every queue built from now on
    pub fn with_settings(mut self, settings: QueueSettings) -> Result<Self, QueueError> {
        settings.validate()?;
        self.settings = settings;
        Ok(self)
    }

    /// Use the given provider for queue creation locks
    pub fn with_lock_provider(mut self, locks: Arc<dyn KeyedLockProvider>) -> Self {
        self.locks = locks;
        self
    }

    pub fn manager(&self) -> &QueueManager {
        &self.manager
    }

    pub fn settings(&self) -> &QueueSettings {
        &self.settings
    }

    /// Build a queue on the local machine
    ///
    /// A `TemporaryMaster` queue is created and connected before this returns;
    /// a `DurableCreate` queue is created if absent.
    pub async fn create_locale(
        &self,
        name: &str,
        private: bool,
        mode: LocaleQueueMode,
        transactional: bool,
        access_mode: AccessMode,
    ) -> Result<Queue, QueueError> {
        debug!(queue = name, private, mode = ?mode, "Creating locale queue");

        let queue = Queue::new(
            self.manager.clone(),
            self.locks.clone(),
            self.settings.clone(),
            QueueKind::Locale { mode },
            name,
            private,
            transactional,
            access_mode,
        )?;

        queue.initialize().await?;
        Ok(queue)
    }

    /// Build a queue hosted on `server`; no transport work happens until first use
    pub async fn create_remote(
        &self,
        server: &str,
        name: &str,
        private: bool,
        mode: RemoteQueueMode,
        transactional: bool,
        access_mode: AccessMode,
    ) -> Result<Queue, QueueError> {
        debug!(server, queue = name, private, mode = ?mode, "Creating remote queue");

        let queue = Queue::new(
            self.manager.clone(),
            self.locks.clone(),
            self.settings.clone(),
            QueueKind::Remote {
                server: server.to_string(),
                mode,
            },
            name,
            private,
            transactional,
            access_mode,
        )?;

        queue.initialize().await?;
        Ok(queue)
    }

    /// List queue names on a server; failures yield an empty list
    pub async fn list(&self, server: &str, private: bool) -> Vec<String> {
        self.manager.list(server, private).await
    }
}

impl std::fmt::Debug for QueueFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueFactory")
            .field("settings", &self.settings)
            .finish()
    }
}
