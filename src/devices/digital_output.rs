//! Minimal digital output.

use std::fmt;

use log::{debug, error, info};
use parking_lot::Mutex;

use crate::devices::context::DeviceContext;
use crate::error::{Error, Result};
use crate::pins::Capability;
use crate::ports::OutputPort;

/// A provisioned digital output.  `on` drives the active level.
pub struct DigitalOutputDevice {
    key: String,
    gpio: u32,
    active_high: bool,
    ctx: DeviceContext,
    /// `None` once closed.
    port: Mutex<Option<Box<dyn OutputPort>>>,
}

impl DigitalOutputDevice {
    /// Active-high output, initially off.
    pub fn new(ctx: &DeviceContext, gpio: u32) -> Result<Self> {
        Self::with_options(ctx, gpio, true, false)
    }

    pub fn with_options(ctx: &DeviceContext, gpio: u32, active_high: bool, initially_on: bool) -> Result<Self> {
        let pin = ctx.factory.board_pins().by_gpio_or_err(gpio)?;
        pin.require(Capability::DigitalOutput)?;

        let key = ctx.gpio_key(pin.device_number);
        let initial_level = initially_on == active_high;
        let port = ctx.registry.provision(&key, Capability::DigitalOutput, || {
            ctx.factory.create_digital_output(&key, &pin, initial_level)
        })?;

        Ok(Self {
            key,
            gpio: pin.device_number,
            active_high,
            ctx: ctx.clone(),
            port: Mutex::new(Some(port)),
        })
    }

    pub fn gpio(&self) -> u32 {
        self.gpio
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn is_active_high(&self) -> bool {
        self.active_high
    }

    fn with_port<R>(&self, f: impl FnOnce(&mut dyn OutputPort) -> std::io::Result<R>) -> Result<R> {
        let mut guard = self.port.lock();
        let port = guard.as_mut().ok_or_else(|| Error::DeviceClosed {
            key: self.key.clone(),
        })?;
        f(port.as_mut()).map_err(|e| Error::io(&self.key, e))
    }

    pub fn set_on(&self, on: bool) -> Result<()> {
        let level = on == self.active_high;
        self.with_port(|p| p.set_value(level))?;
        debug!("{}: {}", self.key, if on { "on" } else { "off" });
        Ok(())
    }

    pub fn on(&self) -> Result<()> {
        self.set_on(true)
    }

    pub fn off(&self) -> Result<()> {
        self.set_on(false)
    }

    /// Flip the output; returns the new logical state.
    pub fn toggle(&self) -> Result<bool> {
        let active_high = self.active_high;
        let now_on = self.with_port(|p| {
            let on = p.value()? == active_high;
            p.set_value(on != active_high)?;
            Ok(!on)
        })?;
        debug!("{}: toggled {}", self.key, if now_on { "on" } else { "off" });
        Ok(now_on)
    }

    pub fn is_on(&self) -> Result<bool> {
        let active_high = self.active_high;
        self.with_port(|p| Ok(p.value()? == active_high))
    }

    pub fn is_closed(&self) -> bool {
        self.port.lock().is_none()
    }

    /// Release the pin.  Idempotent.
    pub fn close(&self) -> Result<()> {
        let Some(mut port) = self.port.lock().take() else {
            return Ok(());
        };
        let result = port.close();
        self.ctx.registry.close(&self.key);
        info!("{}: closed", self.key);
        result.map_err(|e| Error::io(&self.key, e))
    }
}

impl Drop for DigitalOutputDevice {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            error!("{}: close on drop failed: {e}", self.key);
        }
    }
}

impl fmt::Debug for DigitalOutputDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DigitalOutputDevice")
            .field("key", &self.key)
            .field("active_high", &self.active_high)
            .field("closed", &self.is_closed())
            .finish()
    }
}
