//! Pin descriptors shared by every device on a board.
//!
//! A [`BoardPinInfo`] is built once by the device factory and owns one
//! immutable [`PinInfo`] per physical pin.  Devices hold `Arc<PinInfo>`
//! clones; nothing mutates a pin descriptor after the board is loaded.
//!
//! Board-specific numbering tables live with the backend that knows the
//! board; this module only stores and looks them up.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// Capabilities
// ---------------------------------------------------------------------------

/// A single thing a pin can be provisioned as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Capability {
    DigitalInput = 0b0000_0001,
    DigitalOutput = 0b0000_0010,
    AnalogInput = 0b0000_0100,
    AnalogOutput = 0b0000_1000,
    PwmOutput = 0b0001_0000,
}

impl Capability {
    /// Return the bitmask for this capability.
    pub const fn mask(self) -> u8 {
        self as u8
    }

    /// Short tag used in device keys and log lines.
    pub const fn tag(self) -> &'static str {
        match self {
            Self::DigitalInput => "DIN",
            Self::DigitalOutput => "DOUT",
            Self::AnalogInput => "AIN",
            Self::AnalogOutput => "AOUT",
            Self::PwmOutput => "PWM",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DigitalInput => write!(f, "digital input"),
            Self::DigitalOutput => write!(f, "digital output"),
            Self::AnalogInput => write!(f, "analog input"),
            Self::AnalogOutput => write!(f, "analog output"),
            Self::PwmOutput => write!(f, "PWM output"),
        }
    }
}

/// Set of [`Capability`] values packed into a bitmask.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CapabilitySet(u8);

impl CapabilitySet {
    pub const EMPTY: Self = Self(0);

    /// Digital in + out, the common case for a plain GPIO header pin.
    pub const DIGITAL: Self =
        Self(Capability::DigitalInput.mask() | Capability::DigitalOutput.mask());

    pub const fn of(caps: &[Capability]) -> Self {
        let mut bits = 0;
        let mut i = 0;
        while i < caps.len() {
            bits |= caps[i].mask();
            i += 1;
        }
        Self(bits)
    }

    #[must_use]
    pub const fn with(self, cap: Capability) -> Self {
        Self(self.0 | cap.mask())
    }

    pub const fn contains(self, cap: Capability) -> bool {
        self.0 & cap.mask() != 0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

// ---------------------------------------------------------------------------
// Pin descriptor
// ---------------------------------------------------------------------------

/// Sentinel for pins that are not wired to an ADC channel.
pub const NOT_DEFINED: i32 = -1;

/// Immutable description of one pin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinInfo {
    /// GPIO / device number used by the backend.
    pub device_number: u32,
    /// ADC channel, or [`NOT_DEFINED`].
    pub adc_number: i32,
    /// Header label, e.g. `"GPIO17"` or `"A0"`.
    pub name: String,
    pub capabilities: CapabilitySet,
}

impl PinInfo {
    pub fn new(device_number: u32, name: impl Into<String>, capabilities: CapabilitySet) -> Self {
        Self {
            device_number,
            adc_number: NOT_DEFINED,
            name: name.into(),
            capabilities,
        }
    }

    /// An analog-input pin on ADC channel `adc_number`.  `device_number`
    /// must not clash with a GPIO number on the same board: both share the
    /// registry key space.
    pub fn analog(device_number: u32, adc_number: u32, name: impl Into<String>) -> Self {
        Self {
            device_number,
            adc_number: adc_number as i32,
            name: name.into(),
            capabilities: CapabilitySet::of(&[Capability::AnalogInput]),
        }
    }

    pub fn supports(&self, cap: Capability) -> bool {
        self.capabilities.contains(cap)
    }

    /// Fail with [`Error::UnsupportedCapability`] unless `cap` is present.
    pub fn require(&self, cap: Capability) -> Result<()> {
        if self.supports(cap) {
            Ok(())
        } else {
            Err(Error::UnsupportedCapability {
                pin: self.name.clone(),
                capability: cap,
            })
        }
    }
}

impl fmt::Display for PinInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (#{})", self.name, self.device_number)
    }
}

// ---------------------------------------------------------------------------
// Board container
// ---------------------------------------------------------------------------

/// All pins of one board, looked up by GPIO or ADC number.
#[derive(Debug, Default, Clone)]
pub struct BoardPinInfo {
    by_gpio: BTreeMap<u32, Arc<PinInfo>>,
    by_adc: BTreeMap<u32, Arc<PinInfo>>,
}

impl BoardPinInfo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pin.  A later pin with the same number replaces the earlier one.
    pub fn add(&mut self, pin: PinInfo) -> Arc<PinInfo> {
        let pin = Arc::new(pin);
        if pin.adc_number >= 0 {
            self.by_adc.insert(pin.adc_number as u32, Arc::clone(&pin));
        } else {
            self.by_gpio.insert(pin.device_number, Arc::clone(&pin));
        }
        pin
    }

    /// Builder-style [`add`](Self::add).
    #[must_use]
    pub fn with(mut self, pin: PinInfo) -> Self {
        self.add(pin);
        self
    }

    pub fn by_gpio(&self, gpio: u32) -> Option<Arc<PinInfo>> {
        self.by_gpio.get(&gpio).cloned()
    }

    pub fn by_gpio_or_err(&self, gpio: u32) -> Result<Arc<PinInfo>> {
        self.by_gpio(gpio).ok_or(Error::UnknownPin(gpio))
    }

    pub fn by_adc(&self, adc: u32) -> Option<Arc<PinInfo>> {
        self.by_adc.get(&adc).cloned()
    }

    pub fn by_adc_or_err(&self, adc: u32) -> Result<Arc<PinInfo>> {
        self.by_adc(adc).ok_or(Error::UnknownPin(adc))
    }

    pub fn len(&self) -> usize {
        self.by_gpio.len() + self.by_adc.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ---------------------------------------------------------------------------
// Input electrical configuration
// ---------------------------------------------------------------------------

/// Internal pull resistor configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PullUpDown {
    #[default]
    None,
    PullUp,
    PullDown,
}

/// Which edges a push-capable backend should report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventTrigger {
    None,
    Rising,
    Falling,
    #[default]
    Both,
}
