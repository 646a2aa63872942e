//! Shared input-device core: listener bookkeeping, push/pull delivery and
//! the per-device exclusion domain.
//!
//! ```text
//!                     ┌──────────── exclusion domain ─────────────┐
//!  push callback ──▶ push queue ──▶ drain (daemon) ──┐            │
//!  (any thread)      │                              ▼            │
//!                    │  poll task (non-daemon) ──▶ Classifier ──▶ outbox ──▶ listeners
//!                    │  check task (daemon)   ───▶ (filters)     │   (one dispatcher
//!                    └───────────────────────────────────────────┘    at a time)
//! ```
//!
//! The classifier lock serialises every path that touches filter state.
//! Events leave through an outbox drained by whichever thread finds it
//! idle, so listeners of one device never run concurrently and no thread
//! ever blocks on another thread's listener.
//!
//! Lock order: lifecycle → port → classifier → outbox.  Listeners run with
//! no lock held and may call back into the device (including `close`).

use std::collections::VecDeque;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, trace, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::config::DeviceConfig;
use crate::devices::context::DeviceContext;
use crate::error::{Error, Result};
use crate::events::{RawSample, mono_now_ms};
use crate::ports::{InputPort, PushCallback};
use crate::scheduler::{TaskGroup, TaskHandle, TaskOutcome};

// ───────────────────────────────────────────────────────────────
// Public types
// ───────────────────────────────────────────────────────────────

/// Device lifecycle.
///
/// ```text
///  Provisioned ──add listener──▶ Listening ◀──add listener── Idle
///       │                          │  └──last listener removed──▶ │
///       └──────────── close ───────┴──────────────────────────────┴──▶ Closed
/// ```
///
/// A device value only exists once provisioning succeeded, so there is no
/// unprovisioned state to observe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceState {
    Provisioned,
    Listening,
    Idle,
    Closed,
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Provisioned => "PROVISIONED",
            Self::Listening => "LISTENING",
            Self::Idle => "IDLE",
            Self::Closed => "CLOSED",
        };
        f.write_str(s)
    }
}

/// Identifies one listener registration on one device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ListenerId(u64);

impl ListenerId {
    pub fn get(self) -> u64 {
        self.0
    }
}

/// Listener callback.
pub type Listener<E> = Arc<dyn Fn(&E) + Send + Sync>;

// ───────────────────────────────────────────────────────────────
// Classifier (per device kind)
// ───────────────────────────────────────────────────────────────

/// Turns raw samples into events.  Everything here runs under the device's
/// classifier lock.
pub(crate) trait Classifier: Send + 'static {
    type Value: Copy + Send + fmt::Debug + 'static;
    type Event: Send + Sync + 'static;

    /// Reset logical state from a fresh read when delivery is enabled.
    fn seed(&mut self, sample: RawSample<Self::Value>);

    /// One sample from the poll task or a native event.
    fn on_sample(&mut self, sample: RawSample<Self::Value>, out: &mut Vec<Self::Event>);

    /// Periodic re-evaluation; only called if `check_period` is set.
    fn on_check(&mut self, _now_ms: u64, _out: &mut Vec<Self::Event>) {}

    fn check_period(&self) -> Option<Duration> {
        None
    }

    fn poll_interval(&self, config: &DeviceConfig) -> Duration;
}

// ───────────────────────────────────────────────────────────────
// Core
// ───────────────────────────────────────────────────────────────

struct Lifecycle {
    state: DeviceState,
    poll: Option<TaskHandle>,
    check: Option<TaskHandle>,
    push_registered: bool,
    /// Keep listening with no listeners (a wait was requested).
    pinned: bool,
}

struct Outbox<E> {
    queue: VecDeque<E>,
    dispatching: bool,
}

struct Inner<C: Classifier> {
    key: String,
    ctx: DeviceContext,
    port: Mutex<Box<dyn InputPort<C::Value>>>,
    classifier: Mutex<C>,
    listeners: Mutex<Vec<(ListenerId, Listener<C::Event>)>>,
    next_listener: AtomicU64,
    outbox: Mutex<Outbox<C::Event>>,
    lifecycle: Mutex<Lifecycle>,
    closed: AtomicBool,
    push_queue: Mutex<VecDeque<RawSample<C::Value>>>,
    drain_scheduled: AtomicBool,
}

/// Owned by exactly one device facade; closes the device on drop.
pub(crate) struct InputCore<C: Classifier> {
    inner: Arc<Inner<C>>,
}

impl<C: Classifier> InputCore<C> {
    pub(crate) fn new(
        key: String,
        ctx: DeviceContext,
        port: Box<dyn InputPort<C::Value>>,
        classifier: C,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                key,
                ctx,
                port: Mutex::new(port),
                classifier: Mutex::new(classifier),
                listeners: Mutex::new(Vec::new()),
                next_listener: AtomicU64::new(1),
                outbox: Mutex::new(Outbox {
                    queue: VecDeque::new(),
                    dispatching: false,
                }),
                lifecycle: Mutex::new(Lifecycle {
                    state: DeviceState::Provisioned,
                    poll: None,
                    check: None,
                    push_registered: false,
                    pinned: false,
                }),
                closed: AtomicBool::new(false),
                push_queue: Mutex::new(VecDeque::new()),
                drain_scheduled: AtomicBool::new(false),
            }),
        }
    }

    pub(crate) fn key(&self) -> &str {
        &self.inner.key
    }

    pub(crate) fn state(&self) -> DeviceState {
        self.inner.lifecycle.lock().state
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    pub(crate) fn listener_count(&self) -> usize {
        self.inner.listeners.lock().len()
    }

    /// Run `f` against the classifier under the device lock.
    pub(crate) fn with_classifier<R>(&self, f: impl FnOnce(&mut C) -> R) -> R {
        f(&mut self.inner.classifier.lock())
    }

    /// Direct read, bypassing filters.
    pub(crate) fn read_raw(&self) -> Result<C::Value> {
        if self.is_closed() {
            return Err(Error::DeviceClosed {
                key: self.inner.key.clone(),
            });
        }
        self.inner
            .port
            .lock()
            .read_raw()
            .map_err(|e| Error::io(&self.inner.key, e))
    }

    /// Register a listener.  The first one enables delivery.
    pub(crate) fn add_listener(&self, listener: Listener<C::Event>) -> Result<ListenerId> {
        let inner = &self.inner;
        let id = ListenerId(inner.next_listener.fetch_add(1, Ordering::Relaxed));
        inner.listeners.lock().push((id, listener));

        if let Err(e) = Inner::enable_delivery(inner) {
            inner.listeners.lock().retain(|(lid, _)| *lid != id);
            return Err(e);
        }
        debug!("{}: listener {} added", inner.key, id.0);
        Ok(id)
    }

    /// Remove a listener.  Removing the last one stops delivery unless a
    /// wait has pinned the device.  Returns `false` for an unknown id.
    pub(crate) fn remove_listener(&self, id: ListenerId) -> bool {
        let inner = &self.inner;
        let now_empty = {
            let mut listeners = inner.listeners.lock();
            let before = listeners.len();
            listeners.retain(|(lid, _)| *lid != id);
            if listeners.len() == before {
                return false;
            }
            listeners.is_empty()
        };
        debug!("{}: listener {} removed", inner.key, id.0);
        if now_empty {
            inner.disable_delivery(false);
        }
        true
    }

    /// Start delivery and keep it running until close.
    pub(crate) fn pin_listening(&self) -> Result<()> {
        self.inner.lifecycle.lock().pinned = true;
        Inner::enable_delivery(&self.inner)
    }

    /// Re-arm delivery so new poll/check settings take effect.
    pub(crate) fn restart_delivery(&self) -> Result<()> {
        let inner = &self.inner;
        let listening = inner.lifecycle.lock().state == DeviceState::Listening;
        if listening {
            inner.disable_delivery(true);
            Inner::enable_delivery(inner)?;
        }
        Ok(())
    }

    /// Tear down delivery, release the port and the registry key.
    /// Idempotent.
    pub(crate) fn close(&self) -> Result<()> {
        self.inner.close()
    }
}

impl<C: Classifier> Drop for InputCore<C> {
    fn drop(&mut self) {
        if let Err(e) = self.inner.close() {
            log::error!("{}: close on drop failed: {e}", self.inner.key);
        }
    }
}

impl<C: Classifier> Inner<C> {
    fn enable_delivery(this: &Arc<Self>) -> Result<()> {
        let mut lc = this.lifecycle.lock();
        match lc.state {
            DeviceState::Closed => {
                return Err(Error::DeviceClosed {
                    key: this.key.clone(),
                });
            }
            DeviceState::Listening => return Ok(()),
            DeviceState::Provisioned | DeviceState::Idle => {}
        }

        let mut port = this.port.lock();
        let seed = port.read_raw().map_err(|e| Error::io(&this.key, e))?;
        let (poll_interval, check_period) = {
            let mut classifier = this.classifier.lock();
            classifier.seed(RawSample::now(seed));
            (
                classifier.poll_interval(&this.ctx.config),
                classifier.check_period(),
            )
        };
        this.push_queue.lock().clear();

        let scheduler = &this.ctx.scheduler;
        if port.generates_events() {
            let weak = Arc::downgrade(this);
            let callback: PushCallback<C::Value> = Arc::new(move |sample| {
                if let Some(inner) = weak.upgrade() {
                    inner.on_push(sample);
                }
            });
            port.register_push_callback(callback)
                .map_err(|e| Error::io(&this.key, e))?;
            lc.push_registered = true;
            info!("{}: listening (push)", this.key);
        } else {
            let weak = Arc::downgrade(this);
            lc.poll = scheduler.schedule_periodic(
                move || match weak.upgrade() {
                    Some(inner) if !inner.closed.load(Ordering::Acquire) => {
                        inner.poll_once();
                        TaskOutcome::Continue
                    }
                    _ => TaskOutcome::Stop,
                },
                poll_interval,
                poll_interval,
                TaskGroup::NonDaemon,
            );
            if lc.poll.is_none() {
                return Err(Error::SchedulerShutdown {
                    key: this.key.clone(),
                });
            }
            info!("{}: listening (poll every {:?})", this.key, poll_interval);
        }
        drop(port);

        if let Some(period) = check_period {
            let weak = Arc::downgrade(this);
            lc.check = scheduler.schedule_periodic(
                move || match weak.upgrade() {
                    Some(inner) if !inner.closed.load(Ordering::Acquire) => {
                        inner.check_once();
                        TaskOutcome::Continue
                    }
                    _ => TaskOutcome::Stop,
                },
                period,
                period,
                TaskGroup::Daemon,
            );
        }

        lc.state = DeviceState::Listening;
        Ok(())
    }

    /// Stop delivery.  A pinned device keeps listening unless `force`.
    fn disable_delivery(&self, force: bool) {
        let (poll, check, push) = {
            let mut lc = self.lifecycle.lock();
            if lc.state != DeviceState::Listening || (lc.pinned && !force) {
                return;
            }
            lc.state = DeviceState::Idle;
            (
                lc.poll.take(),
                lc.check.take(),
                std::mem::take(&mut lc.push_registered),
            )
        };
        // Cancelling outside the lifecycle lock: an in-flight invocation
        // may be running a listener that calls back into this device.
        for handle in [poll, check].into_iter().flatten() {
            handle.cancel();
        }
        if push {
            self.port.lock().remove_push_callback();
        }
        info!("{}: idle", self.key);
    }

    fn close(&self) -> Result<()> {
        let (poll, check, push) = {
            let mut lc = self.lifecycle.lock();
            if lc.state == DeviceState::Closed {
                return Ok(());
            }
            lc.state = DeviceState::Closed;
            self.closed.store(true, Ordering::Release);
            (
                lc.poll.take(),
                lc.check.take(),
                std::mem::take(&mut lc.push_registered),
            )
        };

        for handle in [poll, check].into_iter().flatten() {
            handle.cancel();
        }
        let result = {
            let mut port = self.port.lock();
            if push {
                port.remove_push_callback();
            }
            port.close()
        };
        self.ctx.registry.close(&self.key);
        self.listeners.lock().clear();
        self.push_queue.lock().clear();

        match result {
            Ok(()) => {
                info!("{}: closed", self.key);
                Ok(())
            }
            Err(e) => Err(Error::io(&self.key, e)),
        }
    }

    // ── Delivery paths ────────────────────────────────────────

    fn poll_once(&self) {
        let read = self.port.lock().read_raw();
        match read {
            Ok(value) => {
                let sample = RawSample::now(value);
                trace!("{}: poll {:?}", self.key, sample.value);
                self.classify(|c, out| c.on_sample(sample, out));
            }
            Err(e) => warn!("{}: poll read failed, skipping cycle: {e}", self.key),
        }
    }

    fn check_once(&self) {
        let now = mono_now_ms();
        self.classify(|c, out| c.on_check(now, out));
    }

    /// Push boundary: enqueue and hand off to the daemon pool.
    fn on_push(self: Arc<Self>, sample: RawSample<C::Value>) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        self.push_queue.lock().push_back(sample);
        if self.drain_scheduled.swap(true, Ordering::AcqRel) {
            return;
        }
        let weak = Arc::downgrade(&self);
        let scheduled = self.ctx.scheduler.schedule_once(
            move || {
                if let Some(inner) = weak.upgrade() {
                    inner.drain_push_queue();
                }
            },
            Duration::ZERO,
            TaskGroup::Daemon,
        );
        if scheduled.is_none() {
            self.drain_scheduled.store(false, Ordering::Release);
        }
    }

    fn drain_push_queue(&self) {
        self.drain_scheduled.store(false, Ordering::Release);
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        self.classify(|c, out| {
            // Popping under the classifier lock keeps arrival order even
            // if two drains overlap.
            while let Some(sample) = self.push_queue.lock().pop_front() {
                c.on_sample(sample, out);
            }
        });
    }

    fn classify(&self, f: impl FnOnce(&mut C, &mut Vec<C::Event>)) {
        {
            let mut classifier = self.classifier.lock();
            let mut out = Vec::new();
            f(&mut classifier, &mut out);
            if out.is_empty() {
                return;
            }
            self.outbox.lock().queue.extend(out);
        }
        self.dispatch();
    }

    fn dispatch(&self) {
        {
            let mut outbox = self.outbox.lock();
            if outbox.dispatching || outbox.queue.is_empty() {
                return;
            }
            outbox.dispatching = true;
        }
        loop {
            let event = {
                let mut outbox = self.outbox.lock();
                match outbox.queue.pop_front() {
                    Some(event) => event,
                    None => {
                        outbox.dispatching = false;
                        return;
                    }
                }
            };
            let listeners: Vec<Listener<C::Event>> = self
                .listeners
                .lock()
                .iter()
                .map(|(_, l)| Arc::clone(l))
                .collect();
            for listener in listeners {
                if panic::catch_unwind(AssertUnwindSafe(|| listener(&event))).is_err() {
                    warn!("{}: listener panicked; event dropped for it", self.key);
                }
            }
        }
    }
}

impl<C: Classifier> fmt::Debug for InputCore<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InputCore")
            .field("key", &self.inner.key)
            .field("state", &self.state())
            .field("listeners", &self.listener_count())
            .finish()
    }
}
