//! Advisory locks keyed by resource name.
//!
//! Creating a durable queue on first use races when several owners start at
//! the same time. Creation therefore runs under a lock keyed by the queue name,
//! obtained from an injected [`KeyedLockProvider`]. The in-process
//! [`LocalLockProvider`] covers every owner sharing one provider instance, and
//! [`LocalLockProvider::shared`] hands out the process-wide one. A deployment
//! spanning processes injects a provider backed by a shared resource.
//!
//! # Example
//!
//! ```rust
//! use txq_runtime::locks::{KeyedLockProvider, LocalLockProvider};
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let locks = LocalLockProvider::new();
//!
//! let guard = locks.acquire("orders", Duration::from_secs(1)).await;
//! assert!(guard.is_some());
//!
//! // Same key while held - times out
//! let second = locks.acquire("orders", Duration::from_millis(10)).await;
//! assert!(second.is_none());
//! # });
//! ```

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;
use tokio::sync::OwnedMutexGuard;

#[cfg(test)]
#[path = "locks_tests.rs"]
mod tests;

/// Proof of holding a keyed lock; released on drop
pub struct KeyedLockGuard {
    key: String,
    _guard: Box<dyn Send + Sync>,
}

impl KeyedLockGuard {
    /// Wrap whatever keeps the lock held
    pub fn new(key: impl Into<String>, guard: impl Send + Sync + 'static) -> Self {
        Self {
            key: key.into(),
            _guard: Box::new(guard),
        }
    }

    /// Key this guard holds
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl std::fmt::Debug for KeyedLockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyedLockGuard")
            .field("key", &self.key)
            .finish()
    }
}

/// Source of mutual-exclusion locks keyed by resource name
#[async_trait]
pub trait KeyedLockProvider: Send + Sync {
    /// Acquire the lock for `key`, waiting up to `timeout`
    ///
    /// Returns `None` if the lock could not be obtained in time.
    async fn acquire(&self, key: &str, timeout: Duration) -> Option<KeyedLockGuard>;
}

/// Keyed locks shared by everything holding the same provider instance
#[derive(Clone, Default)]
pub struct LocalLockProvider {
    locks: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
}

impl LocalLockProvider {
    /// Create a new provider with no locks held
    pub fn new() -> Self {
        Self::default()
    }

    /// Provider shared by every caller in this process
    ///
    /// Factories built without an explicit provider use this one, so owners
    /// created through different factories still serialize queue creation.
    pub fn shared() -> Self {
        static SHARED: OnceLock<LocalLockProvider> = OnceLock::new();
        SHARED.get_or_init(LocalLockProvider::new).clone()
    }

    fn lock_for(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = match self.locks.lock() {
            Ok(locks) => locks,
            Err(poisoned) => poisoned.into_inner(),
        };

        locks
            .entry(key.to_lowercase())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Number of keys that have ever been locked
    pub fn key_count(&self) -> usize {
        match self.locks.lock() {
            Ok(locks) => locks.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }
}

#[async_trait]
impl KeyedLockProvider for LocalLockProvider {
    async fn acquire(&self, key: &str, timeout: Duration) -> Option<KeyedLockGuard> {
        let lock = self.lock_for(key);

        let guard: OwnedMutexGuard<()> = tokio::time::timeout(timeout, lock.lock_owned())
            .await
            .ok()?;

        Some(KeyedLockGuard::new(key, guard))
    }
}
