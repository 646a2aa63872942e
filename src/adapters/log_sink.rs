//! Log-based event sink.
//!
//! Produces listeners that write device events to the `log` facade, so a
//! device can be observed without writing a callback.  Where the records
//! end up is up to the logger the application installs.

use log::{Level, log};

use crate::events::{AnalogInputEvent, DigitalInputEvent};

/// Builds logging listeners tagged with a label.
#[derive(Debug, Clone)]
pub struct LogEventSink {
    label: String,
    level: Level,
}

impl LogEventSink {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            level: Level::Info,
        }
    }

    #[must_use]
    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn format_digital(&self, event: &DigitalInputEvent) -> String {
        format!(
            "DIN   | {} | gpio={} {} level={} t={}ms",
            self.label,
            event.gpio,
            if event.active { "ACTIVE" } else { "INACTIVE" },
            u8::from(event.value),
            event.timestamp.epoch_ms,
        )
    }

    pub fn format_analog(&self, event: &AnalogInputEvent) -> String {
        format!(
            "AIN   | {} | adc={} value={:.4} unscaled={:.4} t={}ms",
            self.label,
            event.adc,
            event.scaled(),
            event.unscaled,
            event.timestamp.epoch_ms,
        )
    }

    /// Listener for a digital input.
    pub fn digital(&self) -> impl Fn(&DigitalInputEvent) + Send + Sync + 'static {
        let sink = self.clone();
        move |event| log!(sink.level, "{}", sink.format_digital(event))
    }

    /// Listener for an analog input.
    pub fn analog(&self) -> impl Fn(&AnalogInputEvent) + Send + Sync + 'static {
        let sink = self.clone();
        move |event| log!(sink.level, "{}", sink.format_analog(event))
    }
}
