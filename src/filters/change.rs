//! Percent-change gate for analog samples.

/// Reports a sample when it differs enough from the last **reported** one.
///
/// A value is reportable when it lies outside the closed band between
/// `(1-p)·last` and `(1+p)·last`.  Values exactly on an edge stay inside.
/// With `p == 0` the band collapses to `last`, so any different value is
/// reportable.  For a negative `last` the edges swap, which keeps the band
/// around the reference.
#[derive(Debug, Clone, Default)]
pub struct ChangeDetector {
    percent_change: f32,
    last: Option<f32>,
}

impl ChangeDetector {
    /// `percent_change` is a fraction: `0.05` is five percent.  Negative or
    /// NaN values are treated as zero.
    pub fn new(percent_change: f32) -> Self {
        let percent_change = if percent_change.is_nan() {
            0.0
        } else {
            percent_change.max(0.0)
        };
        Self {
            percent_change,
            last: None,
        }
    }

    pub fn percent_change(&self) -> f32 {
        self.percent_change
    }

    pub fn last_value(&self) -> Option<f32> {
        self.last
    }

    /// Decide whether `value` is reported, updating the last reported value
    /// if so.
    pub fn should_report(&mut self, value: f32) -> bool {
        let report = match self.last {
            None => true,
            Some(last) => {
                let lo = (1.0 - self.percent_change) * last;
                let hi = (1.0 + self.percent_change) * last;
                value < lo.min(hi) || value > lo.max(hi)
            }
        };
        if report {
            self.last = Some(value);
        }
        report
    }

    /// Forget the last reported value.
    pub fn reset(&mut self) {
        self.last = None;
    }
}
