//! Mock hardware backend for integration tests.
//!
//! Records every port call so tests can assert on the full teardown
//! sequence, and exposes a level per pin that tests drive directly.

use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use pinio::events::RawSample;
use pinio::pins::{BoardPinInfo, CapabilitySet, EventTrigger, PinInfo, PullUpDown};
use pinio::ports::{DeviceFactory, InputPort, PushCallback};
use pinio::{DeviceConfig, DeviceContext, DeviceRegistry, Scheduler};

// ── Port call record ──────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum HwCall {
    Create { key: String },
    Read { key: String },
    RegisterPush { key: String },
    RemovePush { key: String },
    /// `registered` is whether the registry still held the key at close.
    Close { key: String, registered: bool },
}

// ── MockHardware ──────────────────────────────────────────────

#[derive(Default)]
struct PinState {
    level: bool,
    callback: Option<PushCallback<bool>>,
}

pub struct MockHardware {
    board: BoardPinInfo,
    registry: Arc<DeviceRegistry>,
    push: bool,
    pub calls: Arc<Mutex<Vec<HwCall>>>,
    pins: Arc<Mutex<HashMap<u32, PinState>>>,
}

#[allow(dead_code)]
impl MockHardware {
    pub fn new(registry: Arc<DeviceRegistry>, push: bool) -> Self {
        let mut board = BoardPinInfo::new();
        for gpio in 0..8 {
            board.add(PinInfo::new(gpio, format!("P{gpio}"), CapabilitySet::DIGITAL));
        }
        Self {
            board,
            registry,
            push,
            calls: Arc::new(Mutex::new(Vec::new())),
            pins: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn calls(&self) -> Vec<HwCall> {
        self.calls.lock().clone()
    }

    /// Calls other than reads, which depend on poll timing.
    pub fn control_calls(&self) -> Vec<HwCall> {
        self.calls()
            .into_iter()
            .filter(|c| !matches!(c, HwCall::Read { .. }))
            .collect()
    }

    pub fn set_level(&self, gpio: u32, level: bool) {
        let callback = {
            let mut pins = self.pins.lock();
            let pin = pins.entry(gpio).or_default();
            pin.level = level;
            pin.callback.clone()
        };
        if let Some(callback) = callback {
            callback(RawSample::now(level));
        }
    }
}

struct MockPort {
    key: String,
    gpio: u32,
    push: bool,
    registry: Arc<DeviceRegistry>,
    calls: Arc<Mutex<Vec<HwCall>>>,
    pins: Arc<Mutex<HashMap<u32, PinState>>>,
}

impl MockPort {
    fn record(&self, call: HwCall) {
        self.calls.lock().push(call);
    }
}

impl InputPort<bool> for MockPort {
    fn key(&self) -> &str {
        &self.key
    }

    fn read_raw(&mut self) -> io::Result<bool> {
        self.record(HwCall::Read { key: self.key.clone() });
        Ok(self.pins.lock().entry(self.gpio).or_default().level)
    }

    fn generates_events(&self) -> bool {
        self.push
    }

    fn register_push_callback(&mut self, callback: PushCallback<bool>) -> io::Result<()> {
        self.record(HwCall::RegisterPush { key: self.key.clone() });
        self.pins.lock().entry(self.gpio).or_default().callback = Some(callback);
        Ok(())
    }

    fn remove_push_callback(&mut self) {
        self.record(HwCall::RemovePush { key: self.key.clone() });
        self.pins.lock().entry(self.gpio).or_default().callback = None;
    }

    fn close(&mut self) -> io::Result<()> {
        let registered = self.registry.is_open(&self.key);
        self.record(HwCall::Close {
            key: self.key.clone(),
            registered,
        });
        Ok(())
    }
}

impl DeviceFactory for MockHardware {
    fn name(&self) -> &str {
        "mock"
    }

    fn key_prefix(&self) -> &str {
        "mock"
    }

    fn board_pins(&self) -> &BoardPinInfo {
        &self.board
    }

    fn create_digital_input(
        &self,
        key: &str,
        pin: &PinInfo,
        _pud: PullUpDown,
        _trigger: EventTrigger,
    ) -> pinio::Result<Box<dyn InputPort<bool>>> {
        self.calls.lock().push(HwCall::Create { key: key.to_string() });
        Ok(Box::new(MockPort {
            key: key.to_string(),
            gpio: pin.device_number,
            push: self.push,
            registry: Arc::clone(&self.registry),
            calls: Arc::clone(&self.calls),
            pins: Arc::clone(&self.pins),
        }))
    }
}

/// Context over a mock backend that shares the context's registry.
pub fn mock_context(push: bool) -> (Arc<MockHardware>, DeviceContext) {
    let registry = Arc::new(DeviceRegistry::new());
    let hw = Arc::new(MockHardware::new(Arc::clone(&registry), push));
    let config = DeviceConfig {
        digital_poll_interval_ms: 5,
        ..DeviceConfig::default()
    };
    let scheduler = Arc::new(Scheduler::from_config(&config).unwrap());
    let ctx = DeviceContext::from_parts(hw.clone(), registry, scheduler, config);
    (hw, ctx)
}

// ── Helpers ───────────────────────────────────────────────────

/// Poll `cond` until it holds or `timeout` passes.
#[allow(dead_code)]
pub fn wait_for(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    cond()
}

/// Shared event recorder usable as a listener.
pub struct Recorder<E>(pub Arc<Mutex<Vec<E>>>);

#[allow(dead_code)]
impl<E: Clone + Send + 'static> Recorder<E> {
    pub fn new() -> Self {
        Self(Arc::new(Mutex::new(Vec::new())))
    }

    pub fn listener(&self) -> impl Fn(&E) + Send + Sync + 'static {
        let events = Arc::clone(&self.0);
        move |e: &E| events.lock().push(e.clone())
    }

    pub fn events(&self) -> Vec<E> {
        self.0.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.0.lock().len()
    }
}
