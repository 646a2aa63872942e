//! Drop-within-window debounce.

/// Accepts a transition only if at least `window_ms` has passed since the
/// last **accepted** transition.  Dropped transitions do not restart the
/// window.  A zero window passes everything through.
#[derive(Debug, Clone, Default)]
pub struct DebounceFilter {
    window_ms: u64,
    last_accepted_ms: Option<u64>,
}

impl DebounceFilter {
    pub fn new(window_ms: u64) -> Self {
        Self {
            window_ms,
            last_accepted_ms: None,
        }
    }

    /// Change the window.  Clears the last accepted transition.
    pub fn configure(&mut self, window_ms: u64) {
        self.window_ms = window_ms;
        self.last_accepted_ms = None;
    }

    pub fn window_ms(&self) -> u64 {
        self.window_ms
    }

    pub fn last_accepted_ms(&self) -> Option<u64> {
        self.last_accepted_ms
    }

    /// Decide whether a transition detected at `ts_ms` is reported.
    pub fn accept(&mut self, ts_ms: u64) -> bool {
        let accepted = match self.last_accepted_ms {
            None => true,
            Some(_) if self.window_ms == 0 => true,
            // An out-of-order timestamp counts as inside the window.
            Some(last) => ts_ms.saturating_sub(last) >= self.window_ms,
        };
        if accepted {
            self.last_accepted_ms = Some(ts_ms);
        }
        accepted
    }
}
