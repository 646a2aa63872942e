//! Device lifecycle: provisioning exclusivity, delivery start/stop,
//! waits, teardown order and error surfacing.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use pinio::adapters::SimDeviceFactory;
use pinio::adapters::sim::SIM_ADC_BASE;
use pinio::{
    AnalogInputDevice, DeviceConfig, DeviceContext, DeviceState, DigitalInputDevice,
    DigitalInputEvent, DigitalOutputDevice, Error, TaskGroup,
};

use crate::mock_hw::{HwCall, Recorder, mock_context, wait_for};

const TIMEOUT: Duration = Duration::from_secs(2);

fn sim_context(sim: SimDeviceFactory) -> (Arc<SimDeviceFactory>, DeviceContext) {
    let sim = Arc::new(sim);
    let config = DeviceConfig {
        digital_poll_interval_ms: 5,
        analog_poll_interval_ms: 5,
        ..DeviceConfig::default()
    };
    let ctx = DeviceContext::new(sim.clone(), config).unwrap();
    (sim, ctx)
}

// ── Provisioning ──────────────────────────────────────────────

#[test]
fn second_provision_of_same_pin_fails_until_close() {
    let (_sim, ctx) = sim_context(SimDeviceFactory::with_default_board("sim"));

    let first = DigitalInputDevice::new(&ctx, 5).unwrap();
    let err = DigitalInputDevice::new(&ctx, 5).unwrap_err();
    assert!(err.is_already_provisioned(), "got {err}");
    // An output on the same pin shares the key.
    assert!(DigitalOutputDevice::new(&ctx, 5).unwrap_err().is_already_provisioned());

    first.close().unwrap();
    let again = DigitalInputDevice::new(&ctx, 5).unwrap();
    assert_eq!(again.key(), "sim-5");
}

#[test]
fn drop_releases_the_key() {
    let (_sim, ctx) = sim_context(SimDeviceFactory::with_default_board("sim"));
    {
        let _dev = DigitalInputDevice::new(&ctx, 3).unwrap();
        assert!(ctx.registry.is_open("sim-3"));
    }
    assert!(!ctx.registry.is_open("sim-3"));
}

#[test]
fn unknown_pin_and_missing_capability_are_rejected() {
    let (_sim, ctx) = sim_context(SimDeviceFactory::with_default_board("sim"));

    assert!(matches!(DigitalInputDevice::new(&ctx, 99), Err(Error::UnknownPin(99))));
    assert!(matches!(AnalogInputDevice::new(&ctx, 42), Err(Error::UnknownPin(42))));
    // ADC pins are not digital inputs.
    assert!(matches!(
        DigitalInputDevice::builder(&ctx, SIM_ADC_BASE).build(),
        Err(Error::UnknownPin(_))
    ));
    assert!(ctx.registry.is_empty());
}

// ── State machine ─────────────────────────────────────────────

#[test]
fn listener_add_remove_drives_state() {
    let (sim, ctx) = sim_context(SimDeviceFactory::with_default_board("sim"));
    let dev = DigitalInputDevice::new(&ctx, 6).unwrap();
    assert_eq!(dev.state(), DeviceState::Provisioned);

    let id = dev.add_listener(|_| {}).unwrap();
    assert_eq!(dev.state(), DeviceState::Listening);
    assert_eq!(ctx.scheduler.live_tasks(TaskGroup::NonDaemon), 1);

    assert!(dev.remove_listener(id));
    assert!(!dev.remove_listener(id), "second removal is a no-op");
    assert_eq!(dev.state(), DeviceState::Idle);
    assert_eq!(ctx.scheduler.live_tasks(TaskGroup::NonDaemon), 0);

    // Polling really stopped.
    let reads = sim.pin(6).read_count();
    thread::sleep(Duration::from_millis(30));
    assert_eq!(sim.pin(6).read_count(), reads);

    dev.add_listener(|_| {}).unwrap();
    assert_eq!(dev.state(), DeviceState::Listening);

    dev.close().unwrap();
    assert_eq!(dev.state(), DeviceState::Closed);
    assert_eq!(dev.listener_count(), 0);
    assert!(matches!(dev.add_listener(|_| {}), Err(Error::DeviceClosed { .. })));
    assert!(matches!(dev.value(), Err(Error::DeviceClosed { .. })));
    assert!(ctx.scheduler.await_non_daemon(Some(TIMEOUT)));
}

#[test]
fn poll_mode_reports_transitions() {
    let (sim, ctx) = sim_context(SimDeviceFactory::with_default_board("sim"));
    let dev = DigitalInputDevice::new(&ctx, 2).unwrap();
    let rec = Recorder::<DigitalInputEvent>::new();
    dev.add_listener(rec.listener()).unwrap();

    sim.set_level(2, true);
    assert!(wait_for(TIMEOUT, || rec.len() == 1));
    sim.set_level(2, false);
    assert!(wait_for(TIMEOUT, || rec.len() == 2));

    let active: Vec<bool> = rec.events().iter().map(|e| e.active).collect();
    assert_eq!(active, vec![true, false]);
    assert!(rec.events().iter().all(|e| e.gpio == 2));
}

#[test]
fn push_mode_registers_and_removes_callback() {
    let (hw, ctx) = mock_context(true);
    let dev = DigitalInputDevice::new(&ctx, 1).unwrap();
    let rec = Recorder::<DigitalInputEvent>::new();

    let id = dev.add_listener(rec.listener()).unwrap();
    assert_eq!(ctx.scheduler.live_tasks(TaskGroup::NonDaemon), 0, "push mode does not poll");

    hw.set_level(1, true);
    assert!(wait_for(TIMEOUT, || rec.len() == 1));
    assert!(rec.events()[0].active);

    dev.remove_listener(id);
    hw.set_level(1, false);
    thread::sleep(Duration::from_millis(30));
    assert_eq!(rec.len(), 1);

    assert_eq!(
        hw.control_calls(),
        vec![
            HwCall::Create { key: "mock-1".into() },
            HwCall::RegisterPush { key: "mock-1".into() },
            HwCall::RemovePush { key: "mock-1".into() },
        ]
    );
}

// ── Teardown ──────────────────────────────────────────────────

#[test]
fn close_tears_down_before_releasing_key() {
    let (hw, ctx) = mock_context(true);
    let dev = DigitalInputDevice::new(&ctx, 4).unwrap();
    dev.add_listener(|_| {}).unwrap();

    dev.close().unwrap();
    dev.close().unwrap();
    drop(dev);

    let calls = hw.control_calls();
    assert_eq!(
        &calls[calls.len() - 2..],
        &[
            HwCall::RemovePush { key: "mock-4".into() },
            HwCall::Close {
                key: "mock-4".into(),
                registered: true
            },
        ]
    );
    let closes = calls.iter().filter(|c| matches!(c, HwCall::Close { .. })).count();
    assert_eq!(closes, 1, "double close must not close the port twice");
    assert!(!ctx.registry.is_open("mock-4"));
}

#[test]
fn close_failure_propagates_but_releases_key() {
    let (sim, ctx) = sim_context(SimDeviceFactory::with_default_board("sim"));
    let dev = DigitalInputDevice::new(&ctx, 7).unwrap();
    sim.pin(7).set_fail_close(true);

    assert!(matches!(dev.close(), Err(Error::Io { .. })));
    assert!(!ctx.registry.is_open("sim-7"));
    assert!(dev.close().is_ok(), "second close is a no-op");
}

#[test]
fn listener_may_close_its_own_device() {
    let (sim, ctx) = sim_context(SimDeviceFactory::with_default_board("sim"));
    let dev = Arc::new(DigitalInputDevice::new(&ctx, 8).unwrap());
    let weak = Arc::downgrade(&dev);
    let fired = Arc::new(AtomicUsize::new(0));
    let f = Arc::clone(&fired);
    dev.add_listener(move |_| {
        f.fetch_add(1, Ordering::SeqCst);
        if let Some(dev) = weak.upgrade() {
            dev.close().unwrap();
        }
    })
    .unwrap();

    sim.set_level(8, true);
    assert!(wait_for(TIMEOUT, || dev.state() == DeviceState::Closed));
    assert_eq!(fired.load(Ordering::SeqCst), 1);
    assert!(ctx.scheduler.await_non_daemon(Some(TIMEOUT)));
}

// ── Error isolation ───────────────────────────────────────────

#[test]
fn panicking_listener_does_not_starve_others() {
    let (sim, ctx) = sim_context(SimDeviceFactory::with_default_board("sim"));
    let dev = DigitalInputDevice::new(&ctx, 9).unwrap();
    dev.add_listener(|_| panic!("listener bug")).unwrap();
    let rec = Recorder::<DigitalInputEvent>::new();
    dev.add_listener(rec.listener()).unwrap();

    sim.set_level(9, true);
    assert!(wait_for(TIMEOUT, || rec.len() == 1));
    sim.set_level(9, false);
    assert!(wait_for(TIMEOUT, || rec.len() == 2));
}

#[test]
fn poll_read_failures_skip_cycles() {
    let (sim, ctx) = sim_context(SimDeviceFactory::with_default_board("sim"));
    let dev = DigitalInputDevice::new(&ctx, 10).unwrap();
    let rec = Recorder::<DigitalInputEvent>::new();
    dev.add_listener(rec.listener()).unwrap();

    sim.pin(10).set_fail_reads(true);
    sim.set_level(10, true);
    thread::sleep(Duration::from_millis(40));
    assert_eq!(rec.len(), 0);
    assert_eq!(dev.state(), DeviceState::Listening);

    sim.pin(10).set_fail_reads(false);
    assert!(wait_for(TIMEOUT, || rec.len() == 1));
}

#[test]
fn seed_read_failure_fails_add_listener() {
    let (sim, ctx) = sim_context(SimDeviceFactory::with_default_board("sim"));
    let dev = DigitalInputDevice::new(&ctx, 11).unwrap();
    sim.pin(11).set_fail_reads(true);

    assert!(matches!(dev.add_listener(|_| {}), Err(Error::Io { .. })));
    assert_eq!(dev.listener_count(), 0);
    assert_eq!(dev.state(), DeviceState::Provisioned);
}

#[test]
fn add_listener_after_scheduler_shutdown_is_rejected() {
    let (_sim, ctx) = sim_context(SimDeviceFactory::with_default_board("sim"));
    let dev = DigitalInputDevice::new(&ctx, 13).unwrap();
    ctx.shutdown();

    match dev.add_listener(|_| {}) {
        Err(Error::SchedulerShutdown { key }) => assert_eq!(key, "sim-13"),
        other => panic!("unexpected result {other:?}"),
    }
    assert_eq!(dev.listener_count(), 0);
    assert_eq!(dev.state(), DeviceState::Provisioned);
}

// ── Waits ─────────────────────────────────────────────────────

#[test]
fn wait_for_active_times_out_then_succeeds() {
    let (sim, ctx) = sim_context(SimDeviceFactory::with_default_board("sim"));
    let dev = DigitalInputDevice::new(&ctx, 12).unwrap();

    assert!(!dev.wait_for_active(Some(Duration::from_millis(30))).unwrap());
    assert!(dev.wait_for_inactive(Some(Duration::from_millis(30))).unwrap());

    let setter = {
        let sim = Arc::clone(&sim);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            sim.set_level(12, true);
        })
    };
    assert!(dev.wait_for_active(Some(TIMEOUT)).unwrap());
    setter.join().unwrap();

    // Already active: immediate.
    assert!(dev.wait_for_value(true, Some(Duration::from_millis(1))).unwrap());
    // Waiting pinned the device into listening with no listeners.
    assert_eq!(dev.listener_count(), 0);
    assert_eq!(dev.state(), DeviceState::Listening);
}

#[test]
fn wait_on_active_low_button_level() {
    let (sim, ctx) = sim_context(SimDeviceFactory::with_default_board("sim"));
    let btn = pinio::button(&ctx, 13).unwrap();
    assert!(!btn.is_active_high());
    // Pull-up idles high: released.
    assert!(!btn.is_active().unwrap());
    assert!(btn.wait_for_inactive(Some(Duration::from_millis(10))).unwrap());

    sim.set_level(13, false);
    assert!(btn.wait_for_value(false, Some(TIMEOUT)).unwrap());
    assert!(btn.is_active().unwrap());
}

// ── Other device kinds ────────────────────────────────────────

#[test]
fn digital_output_on_off_toggle() {
    let (sim, ctx) = sim_context(SimDeviceFactory::with_default_board("sim"));
    let led = DigitalOutputDevice::new(&ctx, 20).unwrap();
    assert!(!led.is_on().unwrap());

    led.on().unwrap();
    assert!(sim.pin(20).level());
    assert!(!led.toggle().unwrap());
    assert!(!sim.pin(20).level());

    let inverted = DigitalOutputDevice::with_options(&ctx, 21, false, true).unwrap();
    assert!(inverted.is_on().unwrap());
    assert!(!sim.pin(21).level(), "active-low on drives the pin low");

    led.close().unwrap();
    assert!(matches!(led.on(), Err(Error::DeviceClosed { .. })));
    assert!(!ctx.registry.is_open("sim-20"));
}

#[test]
fn analog_values_and_scaling() {
    let (sim, ctx) = sim_context(SimDeviceFactory::with_default_board("sim").with_vref(5.0));
    let pot = AnalogInputDevice::new(&ctx, 1).unwrap();
    assert_eq!(pot.key(), format!("sim-{}", SIM_ADC_BASE + 1));
    assert!((pot.range() - 5.0).abs() < f32::EPSILON);

    sim.set_analog(1, 0.5);
    assert!((pot.unscaled_value().unwrap() - 0.5).abs() < 1e-6);
    assert!((pot.scaled_value().unwrap() - 2.5).abs() < 1e-6);
    assert!((pot.convert_to_scaled(-0.2) + 1.0).abs() < 1e-6);

    let custom = AnalogInputDevice::with_range(&ctx, 2, 10.0).unwrap();
    sim.set_analog(2, 0.25);
    assert!((custom.scaled_value().unwrap() - 2.5).abs() < 1e-6);
}
