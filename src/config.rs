//! Device-layer configuration parameters
//!
//! All tunable parameters for provisioning, polling and filtering.
//! Values can be loaded from JSON; any field left out keeps its default.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Core device configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    // --- Provisioning ---
    /// Prefix applied to every device key built by the factory
    pub key_prefix: String,

    // --- Scheduler ---
    /// Workers in the daemon pool (filter ageing, push-event draining)
    pub daemon_workers: usize,
    /// Workers in the non-daemon pool (input polling)
    pub non_daemon_workers: usize,

    // --- Polling ---
    /// Default poll interval for digital inputs without native events (ms)
    pub digital_poll_interval_ms: u64,
    /// Default poll interval for analog inputs (ms)
    pub analog_poll_interval_ms: u64,

    // --- Motion sensor smoothing ---
    /// Raw activations needed inside the window to report motion
    pub motion_threshold: usize,
    /// How long a raw activation stays in the window (ms)
    pub motion_event_age_ms: u64,
    /// How often the window is re-evaluated (ms)
    pub motion_check_period_ms: u64,

    // --- Button ---
    /// Debounce window applied by the button preset (ms)
    pub button_debounce_ms: u64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            key_prefix: "pinio".to_string(),

            daemon_workers: 2,
            non_daemon_workers: 2,

            digital_poll_interval_ms: 50, // 20 Hz
            analog_poll_interval_ms: 50,  // 20 Hz

            // Trigger on 1 or more events in a 20ms window, check every 10ms
            motion_threshold: 1,
            motion_event_age_ms: 20,
            motion_check_period_ms: 10,

            button_debounce_ms: 50,
        }
    }
}

impl DeviceConfig {
    /// Parse from JSON, filling missing fields with defaults, then validate.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| Error::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would stall the scheduler or spin a poll loop.
    pub fn validate(&self) -> Result<()> {
        if self.daemon_workers == 0 || self.non_daemon_workers == 0 {
            return Err(Error::InvalidConfig(
                "scheduler pools need at least one worker".into(),
            ));
        }
        if self.digital_poll_interval_ms == 0 || self.analog_poll_interval_ms == 0 {
            return Err(Error::InvalidConfig("poll intervals must be non-zero".into()));
        }
        if self.motion_threshold == 0 {
            return Err(Error::InvalidConfig("motion_threshold must be at least 1".into()));
        }
        if self.motion_check_period_ms == 0 {
            return Err(Error::InvalidConfig(
                "motion_check_period_ms must be non-zero".into(),
            ));
        }
        Ok(())
    }

    pub fn digital_poll_interval(&self) -> Duration {
        Duration::from_millis(self.digital_poll_interval_ms)
    }

    pub fn analog_poll_interval(&self) -> Duration {
        Duration::from_millis(self.analog_poll_interval_ms)
    }
}
