//! pinio — pin-level device I/O core.
//!
//! Provisions pins exclusively, delivers value changes by native push or
//! software polling, and filters noisy transitions into clean events.
//!
//! ```text
//!  DeviceFactory (sim / embedded-hal / sysfs)
//!        │ ports
//!        ▼
//!  Device facades ──▶ filters ──▶ listeners / waits
//!        │
//!        ├── DeviceRegistry (one live device per key)
//!        └── Scheduler (daemon + non-daemon pools)
//! ```
//!
//! Everything a device needs is passed in through a [`DeviceContext`];
//! the crate keeps no process-wide state.  Logging goes through the `log`
//! facade and no logger is installed by the library.

#![deny(unused_must_use)]

pub mod adapters;
pub mod config;
pub mod devices;
pub mod error;
pub mod events;
pub mod filters;
pub mod pins;
pub mod ports;
pub mod registry;
pub mod scheduler;
pub mod waitable;

pub use config::DeviceConfig;
pub use devices::{
    AnalogInputDevice, DeviceContext, DeviceState, DigitalInputDevice, DigitalOutputDevice,
    ListenerId, button, motion_sensor,
};
pub use error::{Error, Result};
pub use events::{AnalogInputEvent, DigitalInputEvent, Timestamp};
pub use filters::DigitalFilter;
pub use pins::{BoardPinInfo, Capability, CapabilitySet, EventTrigger, PinInfo, PullUpDown};
pub use registry::DeviceRegistry;
pub use scheduler::{Scheduler, TaskGroup, TaskHandle, TaskOutcome};
pub use waitable::WaitableEvent;
