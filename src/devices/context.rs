//! Shared collaborators every device is built against.

use std::fmt;
use std::sync::Arc;

use log::info;

use crate::config::DeviceConfig;
use crate::error::Result;
use crate::ports::DeviceFactory;
use crate::registry::{self, DeviceRegistry};
use crate::scheduler::Scheduler;

/// Backend, registry, scheduler and configuration, passed explicitly to
/// every device constructor.  Cloning is cheap; clones share everything.
#[derive(Clone)]
pub struct DeviceContext {
    pub factory: Arc<dyn DeviceFactory>,
    pub registry: Arc<DeviceRegistry>,
    pub scheduler: Arc<Scheduler>,
    pub config: Arc<DeviceConfig>,
}

impl DeviceContext {
    /// Validate `config`, then start a scheduler and an empty registry for
    /// `factory`.
    pub fn new(factory: Arc<dyn DeviceFactory>, config: DeviceConfig) -> Result<Self> {
        config.validate()?;
        let scheduler = Arc::new(Scheduler::from_config(&config)?);
        info!(
            "DeviceContext: backend '{}' with {} pins",
            factory.name(),
            factory.board_pins().len()
        );
        Ok(Self {
            factory,
            registry: Arc::new(DeviceRegistry::new()),
            scheduler,
            config: Arc::new(config),
        })
    }

    /// Assemble from existing parts, e.g. to share one scheduler between
    /// two backends.
    pub fn from_parts(
        factory: Arc<dyn DeviceFactory>,
        registry: Arc<DeviceRegistry>,
        scheduler: Arc<Scheduler>,
        config: DeviceConfig,
    ) -> Self {
        Self {
            factory,
            registry,
            scheduler,
            config: Arc::new(config),
        }
    }

    /// Registry key for a GPIO-numbered resource on this backend.
    pub fn gpio_key(&self, gpio: u32) -> String {
        registry::gpio_key(self.factory.key_prefix(), gpio)
    }

    /// Stop the scheduler.  Devices still open stop delivering events.
    pub fn shutdown(&self) {
        self.scheduler.shutdown();
    }
}

impl fmt::Debug for DeviceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceContext")
            .field("factory", &self.factory.name())
            .field("open_devices", &self.registry.len())
            .field("config", &self.config)
            .finish()
    }
}
