//! Adapters — concrete backends behind the [`DeviceFactory`] port, plus a
//! log sink for device events.
//!
//! | Adapter    | Implements     | Connects to                         |
//! |------------|----------------|-------------------------------------|
//! | `sim`      | DeviceFactory  | In-memory pins (tests, demo)        |
//! | `hal`      | DeviceFactory  | Any `embedded-hal` 1.0 digital pin  |
//! | `sysfs`    | DeviceFactory  | Linux `/sys/class/gpio`             |
//! | `log_sink` | listeners      | `log` facade                        |
//!
//! [`DeviceFactory`]: crate::ports::DeviceFactory

pub mod hal;
pub mod log_sink;
pub mod sim;
pub mod sysfs;

pub use hal::HalDeviceFactory;
pub use log_sink::LogEventSink;
pub use sim::SimDeviceFactory;
pub use sysfs::SysfsDeviceFactory;
