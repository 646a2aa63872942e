//! Digital input device with optional debounce or smoothing.
//!
//! One facade covers plain inputs, buttons and motion sensors; the
//! difference is the [`DigitalFilter`] chosen at construction.
//!
//! | Filter   | Transition candidate                 | Reported when             |
//! |----------|--------------------------------------|---------------------------|
//! | None     | logical level != last reported level | always                    |
//! | Debounce | logical level != last reported level | outside the window        |
//! | Smoothed | every active sample                  | window count crosses edge |
//!
//! Waits (`wait_for_active` and friends) are served by two broadcast
//! events updated on every report.  The first wait keeps the device
//! listening until it is closed, even with no listeners registered.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::config::DeviceConfig;
use crate::devices::context::DeviceContext;
use crate::devices::input::{Classifier, DeviceState, InputCore, ListenerId};
use crate::error::Result;
use crate::events::{DigitalInputEvent, RawSample, Timestamp};
use crate::filters::{DebounceFilter, DigitalFilter, SmoothedFilter};
use crate::pins::{Capability, EventTrigger, PullUpDown};
use crate::waitable::WaitableEvent;

// ───────────────────────────────────────────────────────────────
// Classification
// ───────────────────────────────────────────────────────────────

enum FilterState {
    None,
    Debounce(DebounceFilter),
    Smoothed(SmoothedFilter),
}

impl FilterState {
    fn from_config(filter: DigitalFilter) -> Self {
        match filter {
            DigitalFilter::None => Self::None,
            DigitalFilter::Debounce { window_ms } => Self::Debounce(DebounceFilter::new(window_ms)),
            DigitalFilter::Smoothed {
                threshold,
                event_age_ms,
                check_period_ms,
            } => Self::Smoothed(SmoothedFilter::new(threshold, event_age_ms, check_period_ms)),
        }
    }
}

pub(crate) struct DigitalClassifier {
    gpio: u32,
    active_high: bool,
    filter: DigitalFilter,
    state: FilterState,
    last_reported: Option<bool>,
    active: Arc<WaitableEvent>,
    inactive: Arc<WaitableEvent>,
}

impl DigitalClassifier {
    fn new(gpio: u32, active_high: bool, filter: DigitalFilter) -> Self {
        Self {
            gpio,
            active_high,
            filter,
            state: FilterState::from_config(filter),
            last_reported: None,
            active: Arc::new(WaitableEvent::new()),
            inactive: Arc::new(WaitableEvent::new()),
        }
    }

    fn set_logical(&mut self, active: bool) {
        self.last_reported = Some(active);
        if active {
            self.inactive.reset();
            self.active.set();
        } else {
            self.active.reset();
            self.inactive.set();
        }
    }

    fn report(&mut self, active: bool, timestamp: Timestamp, out: &mut Vec<DigitalInputEvent>) {
        self.set_logical(active);
        let level = if active { self.active_high } else { !self.active_high };
        out.push(DigitalInputEvent::new(self.gpio, timestamp, level, self.active_high));
    }
}

impl Classifier for DigitalClassifier {
    type Value = bool;
    type Event = DigitalInputEvent;

    fn seed(&mut self, sample: RawSample<bool>) {
        let active = sample.value == self.active_high;
        // Filter history from an earlier listening period is stale.
        match &mut self.state {
            FilterState::Smoothed(filter) => {
                let (threshold, max_age, period) =
                    (filter.threshold(), filter.max_age_ms(), filter.check_period_ms());
                filter.configure(threshold, max_age, period);
                if active {
                    filter.on_raw_active(sample.timestamp.mono_ms());
                }
                let logical = filter.is_active();
                self.set_logical(logical);
            }
            FilterState::Debounce(filter) => {
                let window = filter.window_ms();
                filter.configure(window);
                self.set_logical(active);
            }
            FilterState::None => self.set_logical(active),
        }
    }

    fn on_sample(&mut self, sample: RawSample<bool>, out: &mut Vec<DigitalInputEvent>) {
        let active = sample.value == self.active_high;
        let ts_ms = sample.timestamp.mono_ms();
        match &mut self.state {
            FilterState::Smoothed(filter) => {
                if active {
                    filter.on_raw_active(ts_ms);
                }
            }
            FilterState::Debounce(filter) => {
                if self.last_reported != Some(active) && filter.accept(ts_ms) {
                    self.report(active, sample.timestamp, out);
                }
            }
            FilterState::None => {
                if self.last_reported != Some(active) {
                    self.report(active, sample.timestamp, out);
                }
            }
        }
    }

    fn on_check(&mut self, now_ms: u64, out: &mut Vec<DigitalInputEvent>) {
        let FilterState::Smoothed(filter) = &mut self.state else {
            return;
        };
        if let Some(active) = filter.check(now_ms) {
            self.report(active, Timestamp::now(), out);
        }
    }

    fn check_period(&self) -> Option<Duration> {
        match self.filter {
            DigitalFilter::Smoothed { check_period_ms, .. } => {
                Some(Duration::from_millis(check_period_ms.max(1)))
            }
            _ => None,
        }
    }

    fn poll_interval(&self, config: &DeviceConfig) -> Duration {
        self.filter.poll_interval(config.digital_poll_interval())
    }
}

impl fmt::Debug for DigitalClassifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DigitalClassifier")
            .field("gpio", &self.gpio)
            .field("filter", &self.filter)
            .field("last_reported", &self.last_reported)
            .finish()
    }
}

// ───────────────────────────────────────────────────────────────
// Builder
// ───────────────────────────────────────────────────────────────

/// Configures a [`DigitalInputDevice`] before provisioning.
#[derive(Debug, Clone)]
pub struct DigitalInputBuilder {
    ctx: DeviceContext,
    gpio: u32,
    pud: PullUpDown,
    trigger: EventTrigger,
    active_high: Option<bool>,
    filter: DigitalFilter,
}

impl DigitalInputBuilder {
    pub fn pull(mut self, pud: PullUpDown) -> Self {
        self.pud = pud;
        self
    }

    pub fn trigger(mut self, trigger: EventTrigger) -> Self {
        self.trigger = trigger;
        self
    }

    /// Defaults to active-low with a pull-up, active-high otherwise.
    pub fn active_high(mut self, active_high: bool) -> Self {
        self.active_high = Some(active_high);
        self
    }

    pub fn filter(mut self, filter: DigitalFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn debounce(self, window_ms: u64) -> Self {
        self.filter(DigitalFilter::Debounce { window_ms })
    }

    pub fn smoothed(self, threshold: usize, event_age_ms: u64, check_period_ms: u64) -> Self {
        self.filter(DigitalFilter::Smoothed {
            threshold,
            event_age_ms,
            check_period_ms,
        })
    }

    /// Look up the pin, check its capability and provision it.
    pub fn build(self) -> Result<DigitalInputDevice> {
        let ctx = self.ctx;
        let pin = ctx.factory.board_pins().by_gpio_or_err(self.gpio)?;
        pin.require(Capability::DigitalInput)?;

        let key = ctx.gpio_key(pin.device_number);
        let port = ctx.registry.provision(&key, Capability::DigitalInput, || {
            ctx.factory
                .create_digital_input(&key, &pin, self.pud, self.trigger)
        })?;

        let active_high = self.active_high.unwrap_or(self.pud != PullUpDown::PullUp);
        let classifier = DigitalClassifier::new(pin.device_number, active_high, self.filter);
        let active = Arc::clone(&classifier.active);
        let inactive = Arc::clone(&classifier.inactive);

        Ok(DigitalInputDevice {
            core: InputCore::new(key, ctx, port, classifier),
            gpio: pin.device_number,
            pud: self.pud,
            active_high,
            filter: self.filter,
            active,
            inactive,
        })
    }
}

// ───────────────────────────────────────────────────────────────
// Device
// ───────────────────────────────────────────────────────────────

/// A provisioned digital input.  Closed on drop.
#[derive(Debug)]
pub struct DigitalInputDevice {
    core: InputCore<DigitalClassifier>,
    gpio: u32,
    pud: PullUpDown,
    active_high: bool,
    filter: DigitalFilter,
    active: Arc<WaitableEvent>,
    inactive: Arc<WaitableEvent>,
}

impl DigitalInputDevice {
    pub fn builder(ctx: &DeviceContext, gpio: u32) -> DigitalInputBuilder {
        DigitalInputBuilder {
            ctx: ctx.clone(),
            gpio,
            pud: PullUpDown::None,
            trigger: EventTrigger::Both,
            active_high: None,
            filter: DigitalFilter::None,
        }
    }

    /// Plain input: no pull resistor, active-high, no filter.
    pub fn new(ctx: &DeviceContext, gpio: u32) -> Result<Self> {
        Self::builder(ctx, gpio).build()
    }

    pub fn gpio(&self) -> u32 {
        self.gpio
    }

    pub fn key(&self) -> &str {
        self.core.key()
    }

    pub fn state(&self) -> DeviceState {
        self.core.state()
    }

    pub fn pull(&self) -> PullUpDown {
        self.pud
    }

    pub fn is_active_high(&self) -> bool {
        self.active_high
    }

    pub fn filter(&self) -> DigitalFilter {
        self.filter
    }

    pub fn listener_count(&self) -> usize {
        self.core.listener_count()
    }

    /// Raw electrical level, read now.
    pub fn value(&self) -> Result<bool> {
        self.core.read_raw()
    }

    /// Logical level, read now (unfiltered).
    pub fn is_active(&self) -> Result<bool> {
        Ok(self.core.read_raw()? == self.active_high)
    }

    /// Last logical level delivered to listeners, if listening has started.
    pub fn last_reported(&self) -> Option<bool> {
        self.core.with_classifier(|c| c.last_reported)
    }

    pub fn add_listener<F>(&self, listener: F) -> Result<ListenerId>
    where
        F: Fn(&DigitalInputEvent) + Send + Sync + 'static,
    {
        self.core.add_listener(Arc::new(listener))
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.core.remove_listener(id)
    }

    /// Run `action` on every transition to active.
    pub fn when_activated<F>(&self, action: F) -> Result<ListenerId>
    where
        F: Fn(&DigitalInputEvent) + Send + Sync + 'static,
    {
        self.add_listener(move |event| {
            if event.active {
                action(event);
            }
        })
    }

    /// Run `action` on every transition to inactive.
    pub fn when_deactivated<F>(&self, action: F) -> Result<ListenerId>
    where
        F: Fn(&DigitalInputEvent) + Send + Sync + 'static,
    {
        self.add_listener(move |event| {
            if !event.active {
                action(event);
            }
        })
    }

    /// Block until the logical level is active.  `None` waits forever.
    ///
    /// Returns `Ok(false)` on timeout and `Ok(true)` at once if the device
    /// is already active.
    pub fn wait_for_active(&self, timeout: Option<Duration>) -> Result<bool> {
        self.core.pin_listening()?;
        Ok(self.active.wait(timeout))
    }

    pub fn wait_for_inactive(&self, timeout: Option<Duration>) -> Result<bool> {
        self.core.pin_listening()?;
        Ok(self.inactive.wait(timeout))
    }

    /// Block until the raw electrical level equals `level`.
    pub fn wait_for_value(&self, level: bool, timeout: Option<Duration>) -> Result<bool> {
        if level == self.active_high {
            self.wait_for_active(timeout)
        } else {
            self.wait_for_inactive(timeout)
        }
    }

    /// Release the pin.  Idempotent.
    pub fn close(&self) -> Result<()> {
        self.core.close()
    }
}

// ───────────────────────────────────────────────────────────────
// Presets
// ───────────────────────────────────────────────────────────────

/// Momentary push button: pull-up, active-low, debounced by
/// `button_debounce_ms`.
pub fn button(ctx: &DeviceContext, gpio: u32) -> Result<DigitalInputDevice> {
    let window_ms = ctx.config.button_debounce_ms;
    DigitalInputDevice::builder(ctx, gpio)
        .pull(PullUpDown::PullUp)
        .debounce(window_ms)
        .build()
}

/// PIR-style motion sensor: active-high, smoothed with the configured
/// motion threshold, event age and check period.
pub fn motion_sensor(ctx: &DeviceContext, gpio: u32) -> Result<DigitalInputDevice> {
    let cfg = &ctx.config;
    DigitalInputDevice::builder(ctx, gpio)
        .smoothed(cfg.motion_threshold, cfg.motion_event_age_ms, cfg.motion_check_period_ms)
        .build()
}
