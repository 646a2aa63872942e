//! Analog input device.
//!
//! Readings are normalised to `[-1, 1]` by the backend ("unscaled") and
//! multiplied by `range` for the scaled value.  Analog ports never push;
//! listeners are fed by a poll task gated by a [`ChangeDetector`].

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::config::DeviceConfig;
use crate::devices::context::DeviceContext;
use crate::devices::input::{Classifier, DeviceState, InputCore, ListenerId};
use crate::error::Result;
use crate::events::{AnalogInputEvent, RawSample};
use crate::filters::ChangeDetector;
use crate::pins::Capability;

pub(crate) struct AnalogClassifier {
    adc: u32,
    range: f32,
    detector: ChangeDetector,
    poll_interval: Option<Duration>,
}

impl Classifier for AnalogClassifier {
    type Value = f32;
    type Event = AnalogInputEvent;

    // The first sample after (re)enabling is always reported.
    fn seed(&mut self, _sample: RawSample<f32>) {
        self.detector.reset();
    }

    fn on_sample(&mut self, sample: RawSample<f32>, out: &mut Vec<AnalogInputEvent>) {
        if self.detector.should_report(sample.value) {
            out.push(AnalogInputEvent::new(
                self.adc,
                sample.timestamp,
                sample.value,
                self.range,
            ));
        }
    }

    fn poll_interval(&self, config: &DeviceConfig) -> Duration {
        self.poll_interval
            .unwrap_or_else(|| config.analog_poll_interval())
            .max(Duration::from_millis(1))
    }
}

impl fmt::Debug for AnalogClassifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnalogClassifier")
            .field("adc", &self.adc)
            .field("percent_change", &self.detector.percent_change())
            .field("poll_interval", &self.poll_interval)
            .finish()
    }
}

/// A provisioned analog input.  Closed on drop.
#[derive(Debug)]
pub struct AnalogInputDevice {
    core: InputCore<AnalogClassifier>,
    adc: u32,
    range: f32,
}

impl AnalogInputDevice {
    /// Provision ADC channel `adc` with the backend's reference voltage as
    /// range.
    pub fn new(ctx: &DeviceContext, adc: u32) -> Result<Self> {
        Self::with_range(ctx, adc, ctx.factory.vref())
    }

    pub fn with_range(ctx: &DeviceContext, adc: u32, range: f32) -> Result<Self> {
        let pin = ctx.factory.board_pins().by_adc_or_err(adc)?;
        pin.require(Capability::AnalogInput)?;

        let key = ctx.gpio_key(pin.device_number);
        let port = ctx.registry.provision(&key, Capability::AnalogInput, || {
            ctx.factory.create_analog_input(&key, &pin)
        })?;

        let classifier = AnalogClassifier {
            adc,
            range,
            detector: ChangeDetector::new(0.0),
            poll_interval: None,
        };
        Ok(Self {
            core: InputCore::new(key, ctx.clone(), port, classifier),
            adc,
            range,
        })
    }

    pub fn adc(&self) -> u32 {
        self.adc
    }

    pub fn key(&self) -> &str {
        self.core.key()
    }

    pub fn state(&self) -> DeviceState {
        self.core.state()
    }

    pub fn range(&self) -> f32 {
        self.range
    }

    pub fn listener_count(&self) -> usize {
        self.core.listener_count()
    }

    /// Normalised reading in `[-1, 1]`.
    pub fn unscaled_value(&self) -> Result<f32> {
        self.core.read_raw()
    }

    /// Reading multiplied by `range`.
    pub fn scaled_value(&self) -> Result<f32> {
        Ok(self.convert_to_scaled(self.unscaled_value()?))
    }

    pub fn convert_to_scaled(&self, unscaled: f32) -> f32 {
        unscaled * self.range
    }

    /// Listen with the current change threshold and poll interval
    /// (initially: report any change, `analog_poll_interval_ms`).
    pub fn add_listener<F>(&self, listener: F) -> Result<ListenerId>
    where
        F: Fn(&AnalogInputEvent) + Send + Sync + 'static,
    {
        self.core.add_listener(Arc::new(listener))
    }

    /// Listen, reporting only changes larger than `percent_change` (a
    /// fraction, `0.0` reports every change), sampling every
    /// `poll_interval`.
    ///
    /// The threshold and interval are per device: the latest call wins for
    /// every listener, and a running poll task is restarted to apply them.
    pub fn add_listener_with<F>(
        &self,
        listener: F,
        percent_change: f32,
        poll_interval: Duration,
    ) -> Result<ListenerId>
    where
        F: Fn(&AnalogInputEvent) + Send + Sync + 'static,
    {
        let changed = self.core.with_classifier(|c| {
            let changed = c.poll_interval != Some(poll_interval);
            c.detector = ChangeDetector::new(percent_change);
            c.poll_interval = Some(poll_interval);
            changed
        });
        if changed {
            self.core.restart_delivery()?;
        }
        self.add_listener(listener)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.core.remove_listener(id)
    }

    /// Release the channel.  Idempotent.
    pub fn close(&self) -> Result<()> {
        self.core.close()
    }
}
