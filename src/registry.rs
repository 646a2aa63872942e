//! Device registry — at most one live device per key.
//!
//! Keys are built by the helpers below from the factory's key prefix and
//! the hardware coordinates of the resource.  The registry itself only
//! tracks which keys are live; the provisioned handle is owned by the
//! device facade that opened the key.

use std::collections::HashMap;
use std::time::Instant;

use log::{debug, info};
use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::pins::Capability;

// ───────────────────────────────────────────────────────────────
// Key construction
// ───────────────────────────────────────────────────────────────

const SPI_PREFIX: &str = "-SPI-";
const I2C_PREFIX: &str = "-I2C-";
const SERIAL_PREFIX: &str = "-Serial-";

/// Key for a GPIO-numbered resource (digital, analog or PWM pin).
pub fn gpio_key(prefix: &str, gpio: u32) -> String {
    format!("{prefix}-{gpio}")
}

/// Key for an SPI device: `<prefix>-SPI-<controller>-<chip_select>`.
pub fn spi_key(prefix: &str, controller: u32, chip_select: u32) -> String {
    format!("{prefix}{SPI_PREFIX}{controller}-{chip_select}")
}

/// Key for an I2C device: `<prefix>-I2C-<controller>-<address>`.
pub fn i2c_key(prefix: &str, controller: u32, address: u16) -> String {
    format!("{prefix}{I2C_PREFIX}{controller}-{address}")
}

/// Key for a serial device: `<prefix>-Serial-<device_file>`.
pub fn serial_key(prefix: &str, device_file: &str) -> String {
    format!("{prefix}{SERIAL_PREFIX}{device_file}")
}

// ───────────────────────────────────────────────────────────────
// Registry
// ───────────────────────────────────────────────────────────────

/// What the registry remembers about a live key.
#[derive(Debug, Clone, Copy)]
pub struct RegistryEntry {
    pub capability: Capability,
    pub opened_at: Instant,
}

/// Thread-safe set of provisioned device keys.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    entries: Mutex<HashMap<String, RegistryEntry>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `key`.  Fails fast if another device already holds it.
    pub fn open(&self, key: &str, capability: Capability) -> Result<()> {
        let mut entries = self.entries.lock();
        if entries.contains_key(key) {
            return Err(Error::AlreadyProvisioned {
                key: key.to_string(),
            });
        }
        entries.insert(
            key.to_string(),
            RegistryEntry {
                capability,
                opened_at: Instant::now(),
            },
        );
        debug!("registry: opened {key} ({})", capability.tag());
        Ok(())
    }

    /// Release `key`.  Returns `false` if it was not open.
    pub fn close(&self, key: &str) -> bool {
        let removed = self.entries.lock().remove(key).is_some();
        if removed {
            debug!("registry: closed {key}");
        }
        removed
    }

    pub fn is_open(&self, key: &str) -> bool {
        self.entries.lock().contains_key(key)
    }

    pub fn entry(&self, key: &str) -> Option<RegistryEntry> {
        self.entries.lock().get(key).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Claim `key`, then build the handle with `create`.
    ///
    /// The key is held while `create` runs so a concurrent provisioner of
    /// the same key fails instead of racing.  If `create` fails the key is
    /// released again.
    pub fn provision<T>(
        &self,
        key: &str,
        capability: Capability,
        create: impl FnOnce() -> Result<T>,
    ) -> Result<T> {
        self.open(key, capability)?;
        match create() {
            Ok(handle) => {
                info!("Provisioned {key} as {capability}");
                Ok(handle)
            }
            Err(e) => {
                self.close(key);
                Err(e)
            }
        }
    }

    /// Keys currently open, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.lock().keys().cloned().collect();
        keys.sort();
        keys
    }
}
