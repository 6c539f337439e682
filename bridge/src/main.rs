mod ble;
mod camera;
mod club;
mod codec;
mod config;
mod connection;
mod controller;
mod error;
mod simulator;
mod state;

use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tracing::info;

use ble::{BleTransport, RealBle};
use camera::CameraIntegration;
use config::BridgeConfig;
use connection::ConnectionManager;
use controller::Controller;
use simulator::SimulatorIntegration;
use state::AppState;

const SIMULATOR_JOIN_DEADLINE: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "launch_monitor_bridge=info".into()),
        )
        .init();

    info!(
        "launch-monitor-bridge v{} starting",
        env!("CARGO_PKG_VERSION")
    );

    let config = Arc::new(BridgeConfig::default());
    let state = Arc::new(AppState::new(&config));

    // Single owned transport slot, shared between the Connection Manager
    // (which creates/replaces it) and the Controller (which only ever reads
    // it through the one-way `GetTransport` capability below).
    let transport_slot: Arc<StdMutex<Option<Arc<dyn BleTransport>>>> =
        Arc::new(StdMutex::new(None));

    let slot_for_factory = transport_slot.clone();
    let make_transport: connection::TransportFactory = Arc::new(move || {
        let transport: Arc<dyn BleTransport> = Arc::new(RealBle::new());
        *slot_for_factory.lock().expect("lock poisoned") = Some(transport.clone());
        transport
    });
    let connection_manager = ConnectionManager::new(state.clone(), make_transport);

    let slot_for_getter = transport_slot.clone();
    let get_transport: controller::GetTransport =
        Arc::new(move || slot_for_getter.lock().expect("lock poisoned").clone());
    let controller = Controller::new(state.clone(), get_transport, config.clone());

    connection_manager.set_notification_handler(controller.notification_handler());
    connection_manager.set_pre_disconnect_hook(controller.pre_disconnect_hook());

    let simulator = SimulatorIntegration::new(state.clone(), controller.clone(), config.clone());
    simulator.start();

    // Held only to keep it alive for the process lifetime; its state
    // observers are independently referenced by `AppState`'s observer lists.
    let _camera = CameraIntegration::new(state.clone(), config.clone());

    let device_name =
        std::env::var("BRIDGE_DEVICE_NAME").unwrap_or_else(|_| "LaunchMonitor".to_string());
    let device_address = std::env::var("BRIDGE_DEVICE_ADDRESS").unwrap_or_default();
    connection_manager.start(device_name, device_address);

    wait_for_shutdown_signal().await;

    info!("shutting down");
    connection_manager.disconnect().await;

    let sim_for_teardown = simulator.clone();
    let stopped = tokio::time::timeout(SIMULATOR_JOIN_DEADLINE, async move {
        sim_for_teardown.stop().await;
    })
    .await;
    if stopped.is_err() {
        tracing::warn!("simulator teardown exceeded join deadline; exiting anyway");
    }
}

async fn wait_for_shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("received shutdown signal"),
        Err(e) => tracing::warn!(error = %e, "failed to listen for shutdown signal"),
    }
}
