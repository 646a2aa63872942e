//! Port traits — the boundary between the device core and a backend.
//!
//! ```text
//!   Backend (sim / embedded-hal / sysfs) ──▶ Port trait ──▶ device facade
//! ```
//!
//! A [`DeviceFactory`] is handed to the devices at construction (there is
//! no process-wide provider) and creates one port per provisioned pin.
//! Ports report raw values and plain [`io::Error`]s; the facade attaches
//! the device key, runs the filters and owns the listeners.
//!
//! ## Threading
//!
//! - A port is only ever driven by one thread at a time (the facade
//!   holds it behind a mutex), so methods take `&mut self`.
//! - A push callback may be invoked from any thread, including an
//!   interrupt-service thread owned by the backend, and must not block.

use std::io;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::events::RawSample;
use crate::pins::{BoardPinInfo, EventTrigger, PinInfo, PullUpDown};

/// Callback a push-capable port invokes on every native value event.
pub type PushCallback<V> = Arc<dyn Fn(RawSample<V>) + Send + Sync>;

// ───────────────────────────────────────────────────────────────
// Input port (hardware → device)
// ───────────────────────────────────────────────────────────────

/// One provisioned input.  `V` is `bool` for digital inputs and the
/// normalised reading in `[-1, 1]` for analog inputs.
pub trait InputPort<V>: Send {
    /// Registry key this port was provisioned under.
    fn key(&self) -> &str;

    /// Sample the current value.
    fn read_raw(&mut self) -> io::Result<V>;

    /// Whether the backend can deliver value events natively.
    fn generates_events(&self) -> bool {
        false
    }

    /// Start delivering native events to `callback`.
    fn register_push_callback(&mut self, _callback: PushCallback<V>) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "port does not generate events",
        ))
    }

    /// Stop native event delivery.  No-op if none is registered.
    fn remove_push_callback(&mut self) {}

    /// Release the underlying resource.
    fn close(&mut self) -> io::Result<()>;
}

// ───────────────────────────────────────────────────────────────
// Output port (device → hardware)
// ───────────────────────────────────────────────────────────────

pub trait OutputPort: Send {
    fn key(&self) -> &str;

    fn set_value(&mut self, value: bool) -> io::Result<()>;

    /// Last level written (or read back, if the backend can).
    fn value(&mut self) -> io::Result<bool>;

    fn close(&mut self) -> io::Result<()>;
}

// ───────────────────────────────────────────────────────────────
// Device factory (backend entry point)
// ───────────────────────────────────────────────────────────────

/// A backend.  Creation methods the backend cannot serve keep the default
/// body and fail with [`Error::Unsupported`].
pub trait DeviceFactory: Send + Sync {
    /// Human-readable backend name for logs and errors.
    fn name(&self) -> &str;

    /// Prefix for every device key this backend produces.
    fn key_prefix(&self) -> &str;

    fn board_pins(&self) -> &BoardPinInfo;

    /// Default analog full-scale range (ADC reference voltage).
    fn vref(&self) -> f32 {
        3.3
    }

    fn create_digital_input(
        &self,
        _key: &str,
        _pin: &PinInfo,
        _pud: PullUpDown,
        _trigger: EventTrigger,
    ) -> Result<Box<dyn InputPort<bool>>> {
        Err(self.unsupported("digital input"))
    }

    fn create_analog_input(&self, _key: &str, _pin: &PinInfo) -> Result<Box<dyn InputPort<f32>>> {
        Err(self.unsupported("analog input"))
    }

    fn create_digital_output(
        &self,
        _key: &str,
        _pin: &PinInfo,
        _initial: bool,
    ) -> Result<Box<dyn OutputPort>> {
        Err(self.unsupported("digital output"))
    }

    #[doc(hidden)]
    fn unsupported(&self, what: &'static str) -> Error {
        Error::Unsupported {
            factory: self.name().to_string(),
            what,
        }
    }
}
