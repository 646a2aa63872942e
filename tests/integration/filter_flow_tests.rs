//! End-to-end filter behaviour through real devices and the scheduler.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use pinio::adapters::SimDeviceFactory;
use pinio::{
    AnalogInputDevice, AnalogInputEvent, DeviceConfig, DeviceContext, DigitalInputDevice,
    DigitalInputEvent,
};

use crate::mock_hw::{Recorder, wait_for};

const TIMEOUT: Duration = Duration::from_secs(2);

fn context(sim: &Arc<SimDeviceFactory>, config: DeviceConfig) -> DeviceContext {
    DeviceContext::new(sim.clone(), config).unwrap()
}

#[test]
fn bouncing_push_button_reports_one_press() {
    let sim = Arc::new(SimDeviceFactory::with_default_board("sim").with_push(17));
    let ctx = context(&sim, DeviceConfig::default());
    let btn = pinio::button(&ctx, 17).unwrap();
    let presses = Recorder::<DigitalInputEvent>::new();
    btn.when_activated(presses.listener()).unwrap();
    let releases = Recorder::<DigitalInputEvent>::new();
    btn.when_deactivated(releases.listener()).unwrap();

    // Contact bounce well inside the 50 ms window.
    for level in [false, true, false, true, false] {
        sim.set_level(17, level);
    }
    assert!(wait_for(TIMEOUT, || presses.len() == 1));
    thread::sleep(Duration::from_millis(80));
    assert_eq!(presses.len(), 1);
    assert_eq!(releases.len(), 0);

    sim.set_level(17, true);
    assert!(wait_for(TIMEOUT, || releases.len() == 1));
    assert_eq!(presses.len(), 1);
    assert!(!presses.events()[0].value, "active-low press reads low");
}

#[test]
fn debounced_poll_input_drops_fast_release() {
    let sim = Arc::new(SimDeviceFactory::with_default_board("sim"));
    let ctx = context(&sim, DeviceConfig::default());
    let dev = DigitalInputDevice::builder(&ctx, 3).debounce(200).build().unwrap();
    let rec = Recorder::<DigitalInputEvent>::new();
    dev.add_listener(rec.listener()).unwrap();

    sim.set_level(3, true);
    assert!(wait_for(TIMEOUT, || rec.len() == 1));
    // Released well within the window: dropped, and the level is not
    // re-reported once the window expires because nothing changed since.
    sim.set_level(3, false);
    thread::sleep(Duration::from_millis(60));
    sim.set_level(3, true);
    thread::sleep(Duration::from_millis(250));
    assert_eq!(rec.len(), 1);

    sim.set_level(3, false);
    assert!(wait_for(TIMEOUT, || rec.len() == 2));
    assert!(!rec.events()[1].active);
}

#[test]
fn motion_sensor_smooths_chatter_into_one_activation() {
    let sim = Arc::new(SimDeviceFactory::with_default_board("sim"));
    let config = DeviceConfig {
        motion_event_age_ms: 100,
        motion_check_period_ms: 10,
        ..DeviceConfig::default()
    };
    let ctx = context(&sim, config);
    let pir = pinio::motion_sensor(&ctx, 4).unwrap();
    let rec = Recorder::<DigitalInputEvent>::new();
    pir.add_listener(rec.listener()).unwrap();

    // Mostly high with short dropouts for ~150 ms.
    for i in 0..30 {
        sim.set_level(4, i % 5 != 4);
        thread::sleep(Duration::from_millis(5));
    }
    sim.set_level(4, false);

    assert!(wait_for(TIMEOUT, || rec.len() == 2));
    thread::sleep(Duration::from_millis(150));
    let edges: Vec<bool> = rec.events().iter().map(|e| e.active).collect();
    assert_eq!(edges, vec![true, false]);
    assert!(pir.wait_for_inactive(Some(Duration::from_millis(10))).unwrap());
}

#[test]
fn analog_listener_honours_percent_change() {
    let sim = Arc::new(SimDeviceFactory::with_default_board("sim"));
    let ctx = context(&sim, DeviceConfig::default());
    let pot = AnalogInputDevice::new(&ctx, 0).unwrap();
    let rec = Recorder::<AnalogInputEvent>::new();

    sim.set_analog(0, 0.5);
    pot.add_listener_with(rec.listener(), 0.1, Duration::from_millis(5))
        .unwrap();
    assert!(wait_for(TIMEOUT, || rec.len() == 1));

    sim.set_analog(0, 0.52);
    thread::sleep(Duration::from_millis(40));
    assert_eq!(rec.len(), 1, "2% move is inside the 10% band");

    sim.set_analog(0, 0.7);
    assert!(wait_for(TIMEOUT, || rec.len() == 2));
    let values: Vec<f32> = rec.events().iter().map(|e| e.unscaled).collect();
    assert!((values[0] - 0.5).abs() < 1e-6);
    assert!((values[1] - 0.7).abs() < 1e-6);
    assert!((rec.events()[1].scaled() - 0.7 * 3.3).abs() < 1e-4);
}

#[test]
fn analog_zero_threshold_reports_every_change() {
    let sim = Arc::new(SimDeviceFactory::with_default_board("sim"));
    let ctx = context(&sim, DeviceConfig::default());
    let pot = AnalogInputDevice::new(&ctx, 3).unwrap();
    let rec = Recorder::<AnalogInputEvent>::new();

    pot.add_listener_with(rec.listener(), 0.0, Duration::from_millis(5))
        .unwrap();
    assert!(wait_for(TIMEOUT, || rec.len() == 1));
    thread::sleep(Duration::from_millis(30));
    assert_eq!(rec.len(), 1, "steady value is not re-reported");

    sim.set_analog(3, 0.001);
    assert!(wait_for(TIMEOUT, || rec.len() == 2));
}
