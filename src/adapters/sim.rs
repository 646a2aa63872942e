//! In-memory simulation backend.
//!
//! Used by the demo binary and throughout the tests.  Every pin has a
//! shared [`SimPin`] cell; the factory hands a port to the device and
//! keeps its own handle so a test (or the demo) can drive levels, inject
//! read failures and observe closes.
//!
//! ```text
//!   test / demo ──set_level()──▶ SimPin ◀──read_raw()── SimInputPort ◀── device
//!                                  │
//!                                  └── push callback (push-enabled pins only)
//! ```

use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use log::{debug, info};
use parking_lot::Mutex;

use crate::error::Result;
use crate::events::RawSample;
use crate::pins::{BoardPinInfo, CapabilitySet, EventTrigger, PinInfo, PullUpDown};
use crate::ports::{DeviceFactory, InputPort, OutputPort, PushCallback};

/// GPIO numbers on the default simulated board.
pub const SIM_GPIO_COUNT: u32 = 28;
/// Analog channels on the default simulated board.
pub const SIM_ADC_COUNT: u32 = 4;
/// Device number of ADC channel 0 on the default board.
pub const SIM_ADC_BASE: u32 = 100;

// ───────────────────────────────────────────────────────────────
// Pin cell
// ───────────────────────────────────────────────────────────────

/// Shared simulated state of one pin.
#[derive(Default)]
pub struct SimPin {
    level: Mutex<bool>,
    analog: Mutex<f32>,
    trigger: Mutex<EventTrigger>,
    pud: Mutex<PullUpDown>,
    callback: Mutex<Option<PushCallback<bool>>>,
    fail_reads: AtomicBool,
    fail_close: AtomicBool,
    reads: AtomicUsize,
    closes: AtomicUsize,
}

impl SimPin {
    pub fn level(&self) -> bool {
        *self.level.lock()
    }

    /// Change the level, pushing an event if a callback is registered and
    /// the edge matches the configured trigger.
    pub fn set_level(&self, level: bool) {
        let previous = std::mem::replace(&mut *self.level.lock(), level);
        let fires = match *self.trigger.lock() {
            EventTrigger::None => false,
            EventTrigger::Rising => level && !previous,
            EventTrigger::Falling => !level && previous,
            EventTrigger::Both => true,
        };
        if !fires {
            return;
        }
        // Clone out so the callback runs without the cell locked.
        let callback = self.callback.lock().clone();
        if let Some(callback) = callback {
            callback(RawSample::now(level));
        }
    }

    pub fn set_analog(&self, value: f32) {
        *self.analog.lock() = value.clamp(-1.0, 1.0);
    }

    pub fn pull(&self) -> PullUpDown {
        *self.pud.lock()
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_close(&self, fail: bool) {
        self.fail_close.store(fail, Ordering::SeqCst);
    }

    pub fn has_push_callback(&self) -> bool {
        self.callback.lock().is_some()
    }

    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    fn check_read(&self) -> io::Result<()> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(io::Error::other("simulated read failure"));
        }
        Ok(())
    }

    fn close(&self) -> io::Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        *self.callback.lock() = None;
        if self.fail_close.load(Ordering::SeqCst) {
            return Err(io::Error::other("simulated close failure"));
        }
        Ok(())
    }
}

// ───────────────────────────────────────────────────────────────
// Ports
// ───────────────────────────────────────────────────────────────

struct SimDigitalInput {
    key: String,
    pin: Arc<SimPin>,
    push: bool,
}

impl InputPort<bool> for SimDigitalInput {
    fn key(&self) -> &str {
        &self.key
    }

    fn read_raw(&mut self) -> io::Result<bool> {
        self.pin.check_read()?;
        Ok(self.pin.level())
    }

    fn generates_events(&self) -> bool {
        self.push
    }

    fn register_push_callback(&mut self, callback: PushCallback<bool>) -> io::Result<()> {
        if !self.push {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "pin is poll-only",
            ));
        }
        *self.pin.callback.lock() = Some(callback);
        Ok(())
    }

    fn remove_push_callback(&mut self) {
        *self.pin.callback.lock() = None;
    }

    fn close(&mut self) -> io::Result<()> {
        self.pin.close()
    }
}

struct SimAnalogInput {
    key: String,
    pin: Arc<SimPin>,
}

impl InputPort<f32> for SimAnalogInput {
    fn key(&self) -> &str {
        &self.key
    }

    fn read_raw(&mut self) -> io::Result<f32> {
        self.pin.check_read()?;
        Ok(*self.pin.analog.lock())
    }

    fn close(&mut self) -> io::Result<()> {
        self.pin.close()
    }
}

struct SimDigitalOutput {
    key: String,
    pin: Arc<SimPin>,
}

impl OutputPort for SimDigitalOutput {
    fn key(&self) -> &str {
        &self.key
    }

    fn set_value(&mut self, value: bool) -> io::Result<()> {
        self.pin.set_level(value);
        Ok(())
    }

    fn value(&mut self) -> io::Result<bool> {
        self.pin.check_read()?;
        Ok(self.pin.level())
    }

    fn close(&mut self) -> io::Result<()> {
        self.pin.close()
    }
}

// ───────────────────────────────────────────────────────────────
// Factory
// ───────────────────────────────────────────────────────────────

/// Simulation backend.
pub struct SimDeviceFactory {
    key_prefix: String,
    board: BoardPinInfo,
    vref: f32,
    push_pins: HashSet<u32>,
    pins: Mutex<HashMap<u32, Arc<SimPin>>>,
}

impl SimDeviceFactory {
    pub fn new(key_prefix: impl Into<String>, board: BoardPinInfo) -> Self {
        Self {
            key_prefix: key_prefix.into(),
            board,
            vref: 3.3,
            push_pins: HashSet::new(),
            pins: Mutex::new(HashMap::new()),
        }
    }

    /// GPIO 0..28 (digital in/out) plus A0..A3 on device numbers 100..104.
    pub fn default_board() -> BoardPinInfo {
        let mut board = BoardPinInfo::new();
        for gpio in 0..SIM_GPIO_COUNT {
            board.add(PinInfo::new(gpio, format!("GPIO{gpio}"), CapabilitySet::DIGITAL));
        }
        for adc in 0..SIM_ADC_COUNT {
            board.add(PinInfo::analog(SIM_ADC_BASE + adc, adc, format!("A{adc}")));
        }
        board
    }

    pub fn with_default_board(key_prefix: impl Into<String>) -> Self {
        Self::new(key_prefix, Self::default_board())
    }

    /// Make `gpio` deliver native events instead of being polled.
    #[must_use]
    pub fn with_push(mut self, gpio: u32) -> Self {
        self.push_pins.insert(gpio);
        self
    }

    #[must_use]
    pub fn with_vref(mut self, vref: f32) -> Self {
        self.vref = vref;
        self
    }

    /// Shared cell for `device_number`, created on first use.
    pub fn pin(&self, device_number: u32) -> Arc<SimPin> {
        Arc::clone(self.pins.lock().entry(device_number).or_default())
    }

    pub fn set_level(&self, gpio: u32, level: bool) {
        self.pin(gpio).set_level(level);
    }

    /// Set the normalised value of ADC channel `adc`.
    pub fn set_analog(&self, adc: u32, value: f32) {
        if let Some(info) = self.board.by_adc(adc) {
            self.pin(info.device_number).set_analog(value);
        }
    }
}

impl DeviceFactory for SimDeviceFactory {
    fn name(&self) -> &str {
        "sim"
    }

    fn key_prefix(&self) -> &str {
        &self.key_prefix
    }

    fn board_pins(&self) -> &BoardPinInfo {
        &self.board
    }

    fn vref(&self) -> f32 {
        self.vref
    }

    fn create_digital_input(
        &self,
        key: &str,
        pin: &PinInfo,
        pud: PullUpDown,
        trigger: EventTrigger,
    ) -> Result<Box<dyn InputPort<bool>>> {
        let cell = self.pin(pin.device_number);
        *cell.pud.lock() = pud;
        *cell.trigger.lock() = trigger;
        // An unconnected pin floats to its pull level.
        if pud == PullUpDown::PullUp {
            *cell.level.lock() = true;
        }
        let push = self.push_pins.contains(&pin.device_number);
        info!("sim: {key} digital input ({pud:?}, {trigger:?}, push={push})");
        Ok(Box::new(SimDigitalInput {
            key: key.to_string(),
            pin: cell,
            push,
        }))
    }

    fn create_analog_input(&self, key: &str, pin: &PinInfo) -> Result<Box<dyn InputPort<f32>>> {
        debug!("sim: {key} analog input on {pin}");
        Ok(Box::new(SimAnalogInput {
            key: key.to_string(),
            pin: self.pin(pin.device_number),
        }))
    }

    fn create_digital_output(
        &self,
        key: &str,
        pin: &PinInfo,
        initial: bool,
    ) -> Result<Box<dyn OutputPort>> {
        let cell = self.pin(pin.device_number);
        *cell.level.lock() = initial;
        debug!("sim: {key} digital output on {pin}, initial level {initial}");
        Ok(Box::new(SimDigitalOutput {
            key: key.to_string(),
            pin: cell,
        }))
    }
}
