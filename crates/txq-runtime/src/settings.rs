//! Queue configuration and loading from files and environment.

use crate::error::ConfigurationError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default largest chunk body the transport accepts
pub const DEFAULT_MAX_CHUNK_SIZE: usize = 4_096_000;

/// Environment prefix for configuration overrides, e.g. `TXQ__QUEUE__MAX_CHUNK_SIZE`
pub const ENVIRONMENT_PREFIX: &str = "TXQ";

/// Settings shared by every queue built from one factory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSettings {
    /// Largest body of a single chunk in bytes
    pub max_chunk_size: usize,
    /// A handle idle for longer than this is dropped and reopened
    pub idle_reconnect_ms: u64,
    /// How long to wait for the keyed creation lock
    pub create_lock_timeout_ms: u64,
}

impl QueueSettings {
    pub fn idle_reconnect(&self) -> Duration {
        Duration::from_millis(self.idle_reconnect_ms)
    }

    pub fn create_lock_timeout(&self) -> Duration {
        Duration::from_millis(self.create_lock_timeout_ms)
    }

    /// Reject settings the queue cannot operate with
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.max_chunk_size == 0 {
            return Err(ConfigurationError::Invalid {
                message: "max_chunk_size must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            max_chunk_size: DEFAULT_MAX_CHUNK_SIZE,
            idle_reconnect_ms: 60 * 60 * 1000,
            create_lock_timeout_ms: 10_000,
        }
    }
}

/// Load a settings section from an optional file and `TXQ__` environment variables
///
/// Later sources override earlier ones: built-in defaults, then the file, then
/// the environment. `section` selects the table inside the file, e.g. `queue`
/// or `handler`; the matching environment variables are
/// `TXQ__<SECTION>__<FIELD>`.
pub fn load_section<T>(section: &str, path: Option<&Path>) -> Result<T, ConfigurationError>
where
    T: Default + for<'de> Deserialize<'de>,
{
    let mut builder = config::Config::builder();

    if let Some(path) = path {
        builder = builder.add_source(config::File::from(path).required(true));
    }

    let config = builder
        .add_source(
            config::Environment::with_prefix(ENVIRONMENT_PREFIX)
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    match config.get::<T>(section) {
        Ok(settings) => Ok(settings),
        Err(config::ConfigError::NotFound(_)) => Ok(T::default()),
        Err(error) => Err(error.into()),
    }
}

/// Load [`QueueSettings`] from the `queue` section
pub fn load_queue_settings(path: Option<&Path>) -> Result<QueueSettings, ConfigurationError> {
    let settings: QueueSettings = load_section("queue", path)?;
    settings.validate()?;
    Ok(settings)
}

#[cfg(test)]
#[path = "settings_tests.rs"]
mod tests;
