//! Device facades.
//!
//! | Device                   | Delivery            | Filter                 |
//! |--------------------------|---------------------|------------------------|
//! | [`DigitalInputDevice`]   | push or poll        | none/debounce/smoothed |
//! | [`AnalogInputDevice`]    | poll                | percent change         |
//! | [`DigitalOutputDevice`]  | —                   | —                      |
//!
//! Every device is provisioned through the [`DeviceContext`] it is built
//! with, holds its registry key until closed, and closes itself on drop.

pub mod analog_input;
pub mod context;
pub mod digital_input;
pub mod digital_output;
pub(crate) mod input;

pub use analog_input::AnalogInputDevice;
pub use context::DeviceContext;
pub use digital_input::{DigitalInputBuilder, DigitalInputDevice, button, motion_sensor};
pub use digital_output::DigitalOutputDevice;
pub use input::{DeviceState, Listener, ListenerId};
