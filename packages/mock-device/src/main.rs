//! mock-device — scripted BLE launch monitor device
//!
//! Reads a TOML scenario describing a sequence of notification frames
//! (sensor, ball metrics, club metrics, battery, firmware version,
//! heartbeat, alignment) and emits their exact wire bytes, one per line as
//! hex, at the scenario's configured cadence. This lets the bridge (or any
//! harness built against `BleTransport`) be exercised deterministically
//! without real hardware: a test harness subscribes to stdout instead of a
//! GATT characteristic and feeds each line to the same decoder the bridge
//! uses.
//!
//! Grounded on the teacher's simulator entry point: CLI via `clap`,
//! scenario config via `toml`, a `tokio::time::interval`-driven loop,
//! `tracing` for progress logging — generalized from boat physics ticks to
//! scripted protocol frame playback.

mod frames;
mod scenario;

use std::time::Duration;

use clap::Parser;
use tracing::info;

use scenario::Scenario;

#[derive(Parser, Debug)]
#[command(name = "mock-device", about = "Scripted BLE launch monitor device")]
struct Args {
    /// Scenario TOML file path
    #[arg(short, long, default_value = "scenario.toml")]
    scenario: String,

    /// Playback speed multiplier (1.0 = real-time delays as scripted)
    #[arg(long, default_value = "1.0")]
    speed: f64,

    /// Repeat the scenario forever instead of running once
    #[arg(long)]
    loop_forever: bool,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mock_device=info".into()),
        )
        .init();

    let args = Args::parse();

    let scenario_str = std::fs::read_to_string(&args.scenario)
        .unwrap_or_else(|_| include_str!("../scenario.toml").to_string());
    let scenario: Scenario = toml::from_str(&scenario_str).expect("invalid scenario TOML");

    info!(
        steps = scenario.steps.len(),
        speed = args.speed,
        "mock-device starting playback"
    );

    loop {
        for (index, step) in scenario.steps.iter().enumerate() {
            if step.delay_ms > 0 {
                let scaled = (step.delay_ms as f64 / args.speed).max(0.0) as u64;
                tokio::time::sleep(Duration::from_millis(scaled)).await;
            }
            let bytes = frames::encode(&step.frame);
            info!(index, frame = ?step.frame, hex = %hex::encode(&bytes), "emit");
            println!("{}", hex::encode(&bytes));
        }
        if !args.loop_forever {
            break;
        }
    }

    info!("mock-device playback complete");
}
