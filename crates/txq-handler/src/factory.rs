//! Construction of queue handlers.

use crate::error::HandlerError;
use crate::handler::{QueueHandler, QueueHandling};
use crate::settings::HandlerSettings;
use txq_runtime::QueueFactory;

#[cfg(test)]
#[path = "factory_tests.rs"]
mod tests;

/// Produces handlers behind the [`QueueHandling`] seam
///
/// Services depend on this trait so tests can swap in
/// [`TestQueueHandlerFactory`](crate::testing::TestQueueHandlerFactory).
pub trait HandlerFactory: Send + Sync {
    fn create(&self) -> Box<dyn QueueHandling>;
}

/// Builds [`QueueHandler`]s over one [`QueueFactory`]
#[derive(Debug, Clone)]
pub struct QueueHandlerFactory {
    factory: QueueFactory,
    settings: HandlerSettings,
}

impl QueueHandlerFactory {
    pub fn new(factory: QueueFactory) -> Self {
        Self {
            factory,
            settings: HandlerSettings::default(),
        }
    }

    /// Use the given settings for every handler built from now on
    pub fn with_settings(mut self, settings: HandlerSettings) -> Result<Self, HandlerError> {
        settings.validate()?;
        self.settings = settings;
        Ok(self)
    }

    pub fn settings(&self) -> &HandlerSettings {
        &self.settings
    }

    /// Build a concrete handler
    pub fn create_handler(&self) -> QueueHandler {
        QueueHandler::new(self.factory.clone(), self.settings.clone())
    }
}

impl HandlerFactory for QueueHandlerFactory {
    fn create(&self) -> Box<dyn QueueHandling> {
        Box::new(self.create_handler())
    }
}
