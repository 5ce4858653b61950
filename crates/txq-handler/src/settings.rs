//! Handler configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use txq_runtime::settings::load_section;
use txq_runtime::{AccessMode, ConfigurationError};

/// Settings shared by every handler built from one factory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HandlerSettings {
    /// Consecutive receive failures that trip the loop
    pub receive_failure_limit: u32,
    /// Pause after the limit is reached in asynchronous mode
    pub failure_backoff_ms: u64,
    /// Access mode of the queue a handler drains
    pub access_mode: AccessMode,
}

impl HandlerSettings {
    pub fn failure_backoff(&self) -> Duration {
        Duration::from_millis(self.failure_backoff_ms)
    }

    /// Reject settings the handler cannot operate with
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.receive_failure_limit == 0 {
            return Err(ConfigurationError::Invalid {
                message: "receive_failure_limit must be greater than zero".to_string(),
            });
        }

        if !self.access_mode.can_receive() {
            return Err(ConfigurationError::Invalid {
                message: format!("access_mode {:?} cannot receive", self.access_mode),
            });
        }

        Ok(())
    }
}

impl Default for HandlerSettings {
    fn default() -> Self {
        Self {
            receive_failure_limit: 3,
            failure_backoff_ms: 60_000,
            access_mode: AccessMode::Receive,
        }
    }
}

/// Load [`HandlerSettings`] from the `handler` section
pub fn load_handler_settings(path: Option<&Path>) -> Result<HandlerSettings, ConfigurationError> {
    let settings: HandlerSettings = load_section("handler", path)?;
    settings.validate()?;
    Ok(settings)
}

#[cfg(test)]
#[path = "settings_tests.rs"]
mod tests;
