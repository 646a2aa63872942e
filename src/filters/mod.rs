//! Noise filters applied between raw samples and listeners.
//!
//! All three are plain state machines driven by millisecond timestamps
//! from the monotonic clock; none of them touch threads or hardware.
//! The device core owns one instance per device and serialises access.
//!
//! | Filter              | Input                 | Emits                         |
//! |---------------------|-----------------------|-------------------------------|
//! | [`DebounceFilter`]  | transition timestamps | accept / drop                 |
//! | [`SmoothedFilter`]  | raw activations       | ACTIVE / INACTIVE edges       |
//! | [`ChangeDetector`]  | analog samples        | reportable / not reportable   |

pub mod change;
pub mod debounce;
pub mod smoothed;

pub use change::ChangeDetector;
pub use debounce::DebounceFilter;
pub use smoothed::SmoothedFilter;

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Filter strategy selected when a digital input is built.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DigitalFilter {
    /// Report every change of logical level.
    #[default]
    None,
    /// Drop transitions within `window_ms` of the last accepted one.
    Debounce { window_ms: u64 },
    /// Count raw activations over a trailing window.
    Smoothed {
        threshold: usize,
        event_age_ms: u64,
        check_period_ms: u64,
    },
}

impl DigitalFilter {
    /// Poll interval for pull-mode delivery with this filter.
    ///
    /// Sampling at half the filter's time constant keeps it fed, never
    /// slower than `default` and never faster than 1 ms.
    pub fn poll_interval(&self, default: Duration) -> Duration {
        let half = match *self {
            Self::None => return default,
            Self::Debounce { window_ms } => window_ms / 2,
            Self::Smoothed { check_period_ms, .. } => check_period_ms / 2,
        };
        Duration::from_millis(half).clamp(Duration::from_millis(1), default.max(Duration::from_millis(1)))
    }
}
