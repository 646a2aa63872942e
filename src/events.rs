//! Timestamped device events.
//!
//! Every value a device republishes carries two clocks captured at the
//! moment the change was detected (ISR callback or poll sample):
//!
//! ```text
//! ┌──────────────┐  RawSample<V>  ┌──────────────┐  DigitalInputEvent  ┌───────────┐
//! │ push / poll  │───────────────▶│ device core  │────────────────────▶│ listeners │
//! │ (detection)  │                │ (+ filters)  │  AnalogInputEvent   │           │
//! └──────────────┘                └──────────────┘                     └───────────┘
//! ```
//!
//! `epoch_ms` is wall-clock time for humans and logs; `nano_time` is a
//! monotonic counter that filters use for ordering and ageing.

use std::fmt;
use std::sync::OnceLock;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

// ── Clocks ────────────────────────────────────────────────────

static MONOTONIC_ANCHOR: OnceLock<Instant> = OnceLock::new();

fn monotonic_nanos() -> u64 {
    let anchor = MONOTONIC_ANCHOR.get_or_init(Instant::now);
    u64::try_from(anchor.elapsed().as_nanos()).unwrap_or(u64::MAX)
}

fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

/// Wall-clock + monotonic capture of one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timestamp {
    /// Milliseconds since the Unix epoch.
    pub epoch_ms: u64,
    /// Monotonic nanoseconds since the first capture in this process.
    pub nano_time: u64,
}

impl Timestamp {
    pub fn now() -> Self {
        Self {
            epoch_ms: epoch_millis(),
            nano_time: monotonic_nanos(),
        }
    }

    /// Monotonic time in milliseconds, the unit the filters work in.
    pub fn mono_ms(&self) -> u64 {
        self.nano_time / 1_000_000
    }
}

/// Current monotonic time in milliseconds on the same clock as [`Timestamp`].
pub fn mono_now_ms() -> u64 {
    monotonic_nanos() / 1_000_000
}

// ── Raw samples ───────────────────────────────────────────────

/// A value as read from (or pushed by) a port, before classification.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawSample<V> {
    pub timestamp: Timestamp,
    pub value: V,
}

impl<V> RawSample<V> {
    pub fn new(timestamp: Timestamp, value: V) -> Self {
        Self { timestamp, value }
    }

    /// Sample stamped now.
    pub fn now(value: V) -> Self {
        Self::new(Timestamp::now(), value)
    }
}

// ── Digital ───────────────────────────────────────────────────

/// A logical transition on a digital input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DigitalInputEvent {
    pub gpio: u32,
    pub timestamp: Timestamp,
    /// Raw electrical level.
    pub value: bool,
    /// Logical level after active-high/low mapping.
    pub active: bool,
}

impl DigitalInputEvent {
    pub fn new(gpio: u32, timestamp: Timestamp, value: bool, active_high: bool) -> Self {
        Self {
            gpio,
            timestamp,
            value,
            active: value == active_high,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }
}

impl fmt::Display for DigitalInputEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "gpio {} {} (level {}) @ {} ms",
            self.gpio,
            if self.active { "active" } else { "inactive" },
            u8::from(self.value),
            self.timestamp.epoch_ms
        )
    }
}

// ── Analog ────────────────────────────────────────────────────

/// A reportable change on an analog input.
///
/// `unscaled` is the normalised reading in `[-1, 1]`; `range` is the
/// full-scale value it maps to (usually the ADC reference voltage).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AnalogInputEvent {
    pub adc: u32,
    pub timestamp: Timestamp,
    pub unscaled: f32,
    pub range: f32,
}

impl AnalogInputEvent {
    pub fn new(adc: u32, timestamp: Timestamp, unscaled: f32, range: f32) -> Self {
        Self {
            adc,
            timestamp,
            unscaled,
            range,
        }
    }

    pub fn scaled(&self) -> f32 {
        self.unscaled * self.range
    }
}

impl fmt::Display for AnalogInputEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "adc {} = {:.4} ({:.3} of {:.2}) @ {} ms",
            self.adc,
            self.scaled(),
            self.unscaled,
            self.range,
            self.timestamp.epoch_ms
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn monotonic_clock_advances() {
        let a = Timestamp::now();
        thread::sleep(Duration::from_millis(5));
        let b = Timestamp::now();
        assert!(b.nano_time > a.nano_time);
        assert!(b.mono_ms() >= a.mono_ms() + 4);
        assert!(b.epoch_ms >= a.epoch_ms);
    }

    #[test]
    fn active_low_mapping() {
        let ts = Timestamp::now();
        let pressed = DigitalInputEvent::new(4, ts, false, false);
        assert!(pressed.is_active());
        let released = DigitalInputEvent::new(4, ts, true, false);
        assert!(!released.is_active());
        assert!(DigitalInputEvent::new(4, ts, true, true).is_active());
    }

    #[test]
    fn analog_scaling() {
        let ev = AnalogInputEvent::new(0, Timestamp::now(), 0.5, 3.3);
        assert!((ev.scaled() - 1.65).abs() < 1e-6);
    }
}
