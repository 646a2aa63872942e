//! Linux sysfs GPIO backend (`/sys/class/gpio`).
//!
//! Poll-only: edge interrupts would need `poll(2)` on the value file,
//! which the device core does not depend on.  Pins already exported by
//! someone else are used as-is and left exported on close.
//!
//! ```text
//!   <root>/export            ← "17"
//!   <root>/gpio17/direction  ← "in" | "high" | "low"
//!   <root>/gpio17/value      ↔ "0" | "1"
//!   <root>/unexport          ← "17"
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};

use crate::error::{Error, Result};
use crate::pins::{BoardPinInfo, CapabilitySet, EventTrigger, PinInfo, PullUpDown};
use crate::ports::{DeviceFactory, InputPort, OutputPort};

pub const DEFAULT_SYSFS_ROOT: &str = "/sys/class/gpio";

// ── Pin handle ────────────────────────────────────────────────

struct SysfsPin {
    key: String,
    gpio: u32,
    root: PathBuf,
    /// We exported it, so we unexport it.
    exported: bool,
    closed: bool,
}

impl SysfsPin {
    fn open(root: &Path, key: &str, gpio: u32, direction: &str) -> io::Result<Self> {
        let dir = root.join(format!("gpio{gpio}"));
        let exported = if dir.exists() {
            false
        } else {
            fs::write(root.join("export"), gpio.to_string())?;
            true
        };

        let pin = Self {
            key: key.to_string(),
            gpio,
            root: root.to_path_buf(),
            exported,
            closed: false,
        };
        // On failure `pin` is dropped without unexporting; do it here.
        if let Err(e) = fs::write(dir.join("direction"), direction) {
            pin.unexport();
            return Err(e);
        }
        debug!("sysfs: {key} gpio{gpio} direction {direction}");
        Ok(pin)
    }

    fn value_path(&self) -> PathBuf {
        self.root.join(format!("gpio{}", self.gpio)).join("value")
    }

    fn check_open(&self) -> io::Result<()> {
        if self.closed {
            Err(io::Error::new(io::ErrorKind::NotConnected, "port closed"))
        } else {
            Ok(())
        }
    }

    fn read(&self) -> io::Result<bool> {
        self.check_open()?;
        let raw = fs::read_to_string(self.value_path())?;
        match raw.trim() {
            "0" => Ok(false),
            "1" => Ok(true),
            other => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unexpected gpio value {other:?}"),
            )),
        }
    }

    fn write(&self, high: bool) -> io::Result<()> {
        self.check_open()?;
        fs::write(self.value_path(), if high { "1" } else { "0" })
    }

    fn unexport(&self) {
        if self.exported {
            if let Err(e) = fs::write(self.root.join("unexport"), self.gpio.to_string()) {
                warn!("sysfs: unexport gpio{} failed: {e}", self.gpio);
            }
        }
    }

    fn close(&mut self) -> io::Result<()> {
        if !std::mem::replace(&mut self.closed, true) {
            self.unexport();
        }
        Ok(())
    }
}

struct SysfsInput(SysfsPin);

impl InputPort<bool> for SysfsInput {
    fn key(&self) -> &str {
        &self.0.key
    }

    fn read_raw(&mut self) -> io::Result<bool> {
        self.0.read()
    }

    fn close(&mut self) -> io::Result<()> {
        self.0.close()
    }
}

struct SysfsOutput(SysfsPin);

impl OutputPort for SysfsOutput {
    fn key(&self) -> &str {
        &self.0.key
    }

    fn set_value(&mut self, value: bool) -> io::Result<()> {
        self.0.write(value)
    }

    fn value(&mut self) -> io::Result<bool> {
        self.0.read()
    }

    fn close(&mut self) -> io::Result<()> {
        self.0.close()
    }
}

// ── Factory ───────────────────────────────────────────────────

pub struct SysfsDeviceFactory {
    key_prefix: String,
    root: PathBuf,
    board: BoardPinInfo,
}

impl SysfsDeviceFactory {
    pub fn new(key_prefix: impl Into<String>, board: BoardPinInfo) -> Self {
        Self::with_root(key_prefix, board, DEFAULT_SYSFS_ROOT)
    }

    pub fn with_root(key_prefix: impl Into<String>, board: BoardPinInfo, root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        info!("sysfs: GPIO root {}", root.display());
        Self {
            key_prefix: key_prefix.into(),
            root,
            board,
        }
    }

    /// Digital in/out pins named `GPIO<n>` for each number in `gpios`.
    pub fn generic_board(gpios: impl IntoIterator<Item = u32>) -> BoardPinInfo {
        let mut board = BoardPinInfo::new();
        for gpio in gpios {
            board.add(PinInfo::new(gpio, format!("GPIO{gpio}"), CapabilitySet::DIGITAL));
        }
        board
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl DeviceFactory for SysfsDeviceFactory {
    fn name(&self) -> &str {
        "sysfs"
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
        if pud != PullUpDown::None {
            debug!("sysfs: {key} cannot configure pull {pud:?}; relying on board wiring");
        }
        let pin = SysfsPin::open(&self.root, key, pin.device_number, "in")
            .map_err(|e| Error::io(key, e))?;
        Ok(Box::new(SysfsInput(pin)))
    }

    fn create_digital_output(
        &self,
        key: &str,
        pin: &PinInfo,
        initial: bool,
    ) -> Result<Box<dyn OutputPort>> {
        // "high"/"low" set direction and initial level without a glitch.
        let direction = if initial { "high" } else { "low" };
        let pin = SysfsPin::open(&self.root, key, pin.device_number, direction)
            .map_err(|e| Error::io(key, e))?;
        Ok(Box::new(SysfsOutput(pin)))
    }
}
