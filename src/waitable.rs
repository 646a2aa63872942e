//! Single-slot broadcast event.
//!
//! `set()` wakes every thread blocked in [`WaitableEvent::wait`] and keeps
//! satisfying new waiters until the next `reset()`.  Waiting blocks only
//! the calling thread; scheduler workers never wait on these.

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

#[derive(Debug, Default)]
pub struct WaitableEvent {
    signalled: Mutex<bool>,
    cond: Condvar,
}

impl WaitableEvent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        let mut signalled = self.signalled.lock();
        *signalled = true;
        self.cond.notify_all();
    }

    pub fn reset(&self) {
        *self.signalled.lock() = false;
    }

    pub fn is_set(&self) -> bool {
        *self.signalled.lock()
    }

    /// Block until set.  `None` (or a zero timeout) waits indefinitely.
    ///
    /// Returns `false` only if the timeout elapsed first.
    pub fn wait(&self, timeout: Option<Duration>) -> bool {
        let mut signalled = self.signalled.lock();
        match timeout.filter(|t| !t.is_zero()) {
            None => {
                while !*signalled {
                    self.cond.wait(&mut signalled);
                }
                true
            }
            Some(timeout) => {
                let deadline = Instant::now() + timeout;
                while !*signalled {
                    if self.cond.wait_until(&mut signalled, deadline).timed_out() {
                        return *signalled;
                    }
                }
                true
            }
        }
    }

    /// Millisecond form: `timeout_ms <= 0` waits indefinitely.
    pub fn wait_ms(&self, timeout_ms: i64) -> bool {
        let timeout = u64::try_from(timeout_ms).ok().map(Duration::from_millis);
        self.wait(timeout)
    }
}
