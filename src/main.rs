//! pinio demo — a simulated board driven end to end.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  stimulus thread ──▶ SimDeviceFactory (in-memory pins)       │
//! │                                                              │
//! │  GPIO17 button (push, debounced) ──▶ toggles LED on GPIO27   │
//! │  GPIO4  motion sensor (polled, smoothed) ──▶ log             │
//! │  A0     potentiometer (polled, 5% change) ──▶ log            │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Usage: `pinio-demo [config.json] [seconds]`.  Log level via `RUST_LOG`.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use log::{info, warn};

use pinio::adapters::{LogEventSink, SimDeviceFactory};
use pinio::{AnalogInputDevice, DeviceConfig, DeviceContext, DigitalOutputDevice, button, motion_sensor};

const BUTTON_GPIO: u32 = 17;
const MOTION_GPIO: u32 = 4;
const LED_GPIO: u32 = 27;
const POT_ADC: u32 = 0;

fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_target(true)
        .with_level(true)
        .with_env_filter(filter)
        .init();
}

fn load_config(path: Option<&str>) -> Result<DeviceConfig> {
    let Some(path) = path else {
        return Ok(DeviceConfig::default());
    };
    let json = std::fs::read_to_string(path).with_context(|| format!("reading config {path}"))?;
    let config = DeviceConfig::from_json(&json).with_context(|| format!("parsing config {path}"))?;
    info!("Loaded config from {path}");
    Ok(config)
}

/// Press the button a few times (with contact bounce), wave at the
/// motion sensor and turn the potentiometer.
fn run_stimulus(sim: &SimDeviceFactory, seconds: u64) {
    let steps = seconds * 10;
    for step in 0..steps {
        if step % 20 == 5 {
            // Pressed: active-low, with bounce.
            for level in [false, true, false, true, false] {
                sim.set_level(BUTTON_GPIO, level);
                thread::sleep(Duration::from_millis(2));
            }
        }
        if step % 20 == 8 {
            sim.set_level(BUTTON_GPIO, true);
        }
        sim.set_level(MOTION_GPIO, (step / 15) % 2 == 1 && step % 3 == 0);
        let angle = step as f32 / 10.0;
        sim.set_analog(POT_ADC, 0.5 + 0.4 * angle.sin());
        thread::sleep(Duration::from_millis(100));
    }
}

fn main() -> Result<()> {
    init_logging();

    let args: Vec<String> = std::env::args().collect();
    let config = load_config(args.get(1).map(String::as_str))?;
    let seconds: u64 = match args.get(2) {
        Some(s) => s.parse().with_context(|| format!("invalid duration {s:?}"))?,
        None => 5,
    };

    let sim = Arc::new(SimDeviceFactory::with_default_board(config.key_prefix.clone()).with_push(BUTTON_GPIO));
    let ctx = DeviceContext::new(sim.clone(), config)?;

    let led = Arc::new(DigitalOutputDevice::new(&ctx, LED_GPIO)?);
    let btn = button(&ctx, BUTTON_GPIO)?;
    {
        let led = Arc::clone(&led);
        btn.when_activated(move |_| match led.toggle() {
            Ok(on) => info!("LED {}", if on { "on" } else { "off" }),
            Err(e) => warn!("LED toggle failed: {e}"),
        })?;
    }
    btn.add_listener(LogEventSink::new("button").digital())?;

    let pir = motion_sensor(&ctx, MOTION_GPIO)?;
    pir.add_listener(LogEventSink::new("motion").digital())?;

    let pot = AnalogInputDevice::new(&ctx, POT_ADC)?;
    pot.add_listener_with(LogEventSink::new("pot").analog(), 0.05, Duration::from_millis(50))?;

    info!("Open devices: {:?}", ctx.registry.keys());
    run_stimulus(&sim, seconds);

    for result in [btn.close(), pir.close(), pot.close(), led.close()] {
        if let Err(e) = result {
            warn!("close failed: {e}");
        }
    }
    if !ctx.scheduler.await_non_daemon(Some(Duration::from_secs(1))) {
        warn!("poll tasks still live after close");
    }
    ctx.shutdown();
    info!("Done");
    Ok(())
}
