//! Sliding-window smoothing.
//!
//! Bursty sensors (PIR motion detectors in particular) chatter while
//! triggered.  Raw activations are appended to a trailing window; a
//! periodic check purges stale entries and reports an edge only when the
//! count crosses `threshold`:
//!
//! ```text
//!  raw:     |  |||   |                              
//!  window:  [------- max_age -------]               
//!  count >= threshold ──▶ ACTIVE   (once)
//!  count <  threshold ──▶ INACTIVE (once)
//! ```

use std::collections::VecDeque;

#[derive(Debug, Clone)]
pub struct SmoothedFilter {
    threshold: usize,
    max_age_ms: u64,
    check_period_ms: u64,
    events: VecDeque<u64>,
    active: bool,
}

impl SmoothedFilter {
    pub fn new(threshold: usize, max_age_ms: u64, check_period_ms: u64) -> Self {
        Self {
            threshold: threshold.max(1),
            max_age_ms,
            check_period_ms,
            events: VecDeque::new(),
            active: false,
        }
    }

    /// Replace the parameters and start over in the INACTIVE state.
    pub fn configure(&mut self, threshold: usize, max_age_ms: u64, check_period_ms: u64) {
        *self = Self::new(threshold, max_age_ms, check_period_ms);
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn max_age_ms(&self) -> u64 {
        self.max_age_ms
    }

    pub fn check_period_ms(&self) -> u64 {
        self.check_period_ms
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Raw activations currently in the window (before the next purge).
    pub fn pending(&self) -> usize {
        self.events.len()
    }

    pub fn on_raw_active(&mut self, ts_ms: u64) {
        self.events.push_back(ts_ms);
    }

    /// Purge entries older than `now_ms - max_age` and evaluate.
    ///
    /// Returns `Some(true)` on the INACTIVE→ACTIVE edge, `Some(false)` on
    /// ACTIVE→INACTIVE, `None` otherwise.
    pub fn check(&mut self, now_ms: u64) -> Option<bool> {
        let cutoff = now_ms.saturating_sub(self.max_age_ms);
        // Appends can arrive slightly out of order from different threads.
        self.events.retain(|&ts| ts >= cutoff);

        let count = self.events.len();
        match (self.active, count >= self.threshold) {
            (false, true) => {
                self.active = true;
                Some(true)
            }
            (true, false) => {
                self.active = false;
                Some(false)
            }
            _ => None,
        }
    }
}
