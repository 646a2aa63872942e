//! `embedded-hal` 1.0 pin bank backend.
//!
//! Wraps any HAL's digital pins so they can be provisioned as devices.
//! Pins are moved into the bank at start-up, lent to a port while a device
//! holds them, and handed back when that device closes.
//!
//! `embedded-hal` has no interrupt abstraction, so every input is polled.

use std::collections::HashMap;
use std::fmt::Debug;
use std::io;
use std::sync::Arc;

use embedded_hal::digital::{Error as HalError, InputPin, StatefulOutputPin};
use log::debug;
use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::pins::{BoardPinInfo, Capability, CapabilitySet, EventTrigger, PinInfo, PullUpDown};
use crate::ports::{DeviceFactory, InputPort, OutputPort};

fn hal_err<E: HalError + Debug>(e: E) -> io::Error {
    io::Error::other(format!("embedded-hal pin error: {:?} ({e:?})", e.kind()))
}

// ── Type erasure over the HAL's associated error types ────────

trait DynInput: Send {
    fn read(&mut self) -> io::Result<bool>;
}

impl<P: InputPin + Send> DynInput for P {
    fn read(&mut self) -> io::Result<bool> {
        self.is_high().map_err(hal_err)
    }
}

trait DynOutput: Send {
    fn write(&mut self, high: bool) -> io::Result<()>;
    fn read_back(&mut self) -> io::Result<bool>;
}

impl<P: StatefulOutputPin + Send> DynOutput for P {
    fn write(&mut self, high: bool) -> io::Result<()> {
        if high {
            self.set_high().map_err(hal_err)
        } else {
            self.set_low().map_err(hal_err)
        }
    }

    fn read_back(&mut self) -> io::Result<bool> {
        self.is_set_high().map_err(hal_err)
    }
}

enum Slot {
    Input(Box<dyn DynInput>),
    Output(Box<dyn DynOutput>),
}

type Bank = Arc<Mutex<HashMap<u32, Slot>>>;

fn lent(key: &str, gpio: u32) -> Error {
    Error::io(
        key,
        io::Error::new(io::ErrorKind::NotFound, format!("gpio {gpio} is not in the bank")),
    )
}

// ── Ports ─────────────────────────────────────────────────────

struct HalInput {
    key: String,
    gpio: u32,
    pin: Option<Box<dyn DynInput>>,
    bank: Bank,
}

impl InputPort<bool> for HalInput {
    fn key(&self) -> &str {
        &self.key
    }

    fn read_raw(&mut self) -> io::Result<bool> {
        match self.pin.as_mut() {
            Some(pin) => pin.read(),
            None => Err(io::Error::new(io::ErrorKind::NotConnected, "port closed")),
        }
    }

    fn close(&mut self) -> io::Result<()> {
        if let Some(pin) = self.pin.take() {
            self.bank.lock().insert(self.gpio, Slot::Input(pin));
        }
        Ok(())
    }
}

struct HalOutput {
    key: String,
    gpio: u32,
    pin: Option<Box<dyn DynOutput>>,
    bank: Bank,
}

impl HalOutput {
    fn pin(&mut self) -> io::Result<&mut Box<dyn DynOutput>> {
        self.pin
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "port closed"))
    }
}

impl OutputPort for HalOutput {
    fn key(&self) -> &str {
        &self.key
    }

    fn set_value(&mut self, value: bool) -> io::Result<()> {
        self.pin()?.write(value)
    }

    fn value(&mut self) -> io::Result<bool> {
        self.pin()?.read_back()
    }

    fn close(&mut self) -> io::Result<()> {
        if let Some(pin) = self.pin.take() {
            self.bank.lock().insert(self.gpio, Slot::Output(pin));
        }
        Ok(())
    }
}

// ── Factory ───────────────────────────────────────────────────

/// Backend over pins from any `embedded-hal` 1.0 implementation.
pub struct HalDeviceFactory {
    key_prefix: String,
    board: BoardPinInfo,
    bank: Bank,
}

impl HalDeviceFactory {
    pub fn new(key_prefix: impl Into<String>) -> Self {
        Self {
            key_prefix: key_prefix.into(),
            board: BoardPinInfo::new(),
            bank: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Add an input pin under GPIO number `gpio`.
    #[must_use]
    pub fn with_input<P>(mut self, gpio: u32, name: &str, pin: P) -> Self
    where
        P: InputPin + Send + 'static,
    {
        self.board.add(PinInfo::new(
            gpio,
            name,
            CapabilitySet::of(&[Capability::DigitalInput]),
        ));
        self.bank.lock().insert(gpio, Slot::Input(Box::new(pin)));
        self
    }

    /// Add an output pin under GPIO number `gpio`.
    #[must_use]
    pub fn with_output<P>(mut self, gpio: u32, name: &str, pin: P) -> Self
    where
        P: StatefulOutputPin + Send + 'static,
    {
        self.board.add(PinInfo::new(
            gpio,
            name,
            CapabilitySet::of(&[Capability::DigitalOutput]),
        ));
        self.bank.lock().insert(gpio, Slot::Output(Box::new(pin)));
        self
    }

    /// Pins currently in the bank (not lent to a device).
    pub fn available(&self) -> usize {
        self.bank.lock().len()
    }
}

impl DeviceFactory for HalDeviceFactory {
    fn name(&self) -> &str {
        "embedded-hal"
    }

    fn key_prefix(&self) -> &str {
        &self.key_prefix
    }

    fn board_pins(&self) -> &BoardPinInfo {
        &self.board
    }

    fn create_digital_input(
        &self,
        key: &str,
        pin: &PinInfo,
        pud: PullUpDown,
        _trigger: EventTrigger,
    ) -> Result<Box<dyn InputPort<bool>>> {
        let gpio = pin.device_number;
        let mut bank = self.bank.lock();
        let hal_pin = match bank.remove(&gpio) {
            Some(Slot::Input(p)) => p,
            Some(other) => {
                bank.insert(gpio, other);
                return Err(self.unsupported("digital input on an output pin"));
            }
            None => return Err(lent(key, gpio)),
        };
        if pud != PullUpDown::None {
            debug!("hal: {key} pull {pud:?} is fixed by the HAL pin type");
        }
        Ok(Box::new(HalInput {
            key: key.to_string(),
            gpio,
            pin: Some(hal_pin),
            bank: Arc::clone(&self.bank),
        }))
    }

    fn create_digital_output(
        &self,
        key: &str,
        pin: &PinInfo,
        initial: bool,
    ) -> Result<Box<dyn OutputPort>> {
        let gpio = pin.device_number;
        let mut bank = self.bank.lock();
        let mut hal_pin = match bank.remove(&gpio) {
            Some(Slot::Output(p)) => p,
            Some(other) => {
                bank.insert(gpio, other);
                return Err(self.unsupported("digital output on an input pin"));
            }
            None => return Err(lent(key, gpio)),
        };
        drop(bank);
        if let Err(e) = hal_pin.write(initial) {
            self.bank.lock().insert(gpio, Slot::Output(hal_pin));
            return Err(Error::io(key, e));
        }
        Ok(Box::new(HalOutput {
            key: key.to_string(),
            gpio,
            pin: Some(hal_pin),
            bank: Arc::clone(&self.bank),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;
    use std::sync::atomic::{AtomicBool, Ordering};

    use embedded_hal::digital::{ErrorType, OutputPin};

    #[derive(Clone, Default)]
    struct MockPin(Arc<AtomicBool>);

    impl ErrorType for MockPin {
        type Error = Infallible;
    }

    impl InputPin for MockPin {
        fn is_high(&mut self) -> core::result::Result<bool, Infallible> {
            Ok(self.0.load(Ordering::SeqCst))
        }

        fn is_low(&mut self) -> core::result::Result<bool, Infallible> {
            Ok(!self.0.load(Ordering::SeqCst))
        }
    }

    impl OutputPin for MockPin {
        fn set_low(&mut self) -> core::result::Result<(), Infallible> {
            self.0.store(false, Ordering::SeqCst);
            Ok(())
        }

        fn set_high(&mut self) -> core::result::Result<(), Infallible> {
            self.0.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    impl StatefulOutputPin for MockPin {
        fn is_set_high(&mut self) -> core::result::Result<bool, Infallible> {
            Ok(self.0.load(Ordering::SeqCst))
        }

        fn is_set_low(&mut self) -> core::result::Result<bool, Infallible> {
            Ok(!self.0.load(Ordering::SeqCst))
        }
    }

    #[test]
    fn input_is_lent_and_returned() {
        let line = MockPin::default();
        let factory = HalDeviceFactory::new("hal").with_input(3, "BTN", line.clone());
        let info = factory.board_pins().by_gpio(3).unwrap();

        let mut port = factory
            .create_digital_input("hal-3", &info, PullUpDown::None, EventTrigger::Both)
            .unwrap();
        assert_eq!(factory.available(), 0);
        assert!(!port.generates_events());

        line.0.store(true, Ordering::SeqCst);
        assert!(port.read_raw().unwrap());

        port.close().unwrap();
        assert_eq!(factory.available(), 1);
    }

    #[test]
    fn output_drives_initial_level() {
        let line = MockPin::default();
        let factory = HalDeviceFactory::new("hal").with_output(9, "LED", line.clone());
        let info = factory.board_pins().by_gpio(9).unwrap();

        let mut port = factory.create_digital_output("hal-9", &info, true).unwrap();
        assert!(line.0.load(Ordering::SeqCst));
        port.set_value(false).unwrap();
        assert!(!port.value().unwrap());
    }

    #[test]
    fn missing_pin_error_names_the_device_key() {
        let factory = HalDeviceFactory::new("hal").with_input(3, "BTN", MockPin::default());
        let info = factory.board_pins().by_gpio(3).unwrap();
        let _held = factory
            .create_digital_input("hal-3", &info, PullUpDown::None, EventTrigger::Both)
            .unwrap();

        let err = factory
            .create_digital_input("bench-03", &info, PullUpDown::None, EventTrigger::Both)
            .err()
            .unwrap();
        match err {
            Error::Io { key, source } => {
                assert_eq!(key, "bench-03");
                assert_eq!(source.kind(), io::ErrorKind::NotFound);
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn wrong_direction_is_unsupported() {
        let factory = HalDeviceFactory::new("hal").with_output(9, "LED", MockPin::default());
        let info = factory.board_pins().by_gpio(9).unwrap();
        let err = factory
            .create_digital_input("hal-9", &info, PullUpDown::None, EventTrigger::Both)
            .err()
            .unwrap();
        assert!(matches!(err, Error::Unsupported { .. }));
        assert_eq!(factory.available(), 1);
    }
}
