//! Connection Manager: owns the BLE transport's lifecycle, cancellation, and
//! the best-effort battery read / subscribe sequence that follows a
//! successful connect. Grounded on the supervisor's "never crash a
//! background task" discipline and its single-flight cancellation-token
//! pattern.
//!
//! The Controller is reached only through one-way capability handles
//! (`set_notification_handler`, `set_pre_disconnect_hook`) passed in by the
//! composition root — this manager holds no strong reference back to the
//! Controller, matching the no-cyclic-strong-reference design note.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use launch_types::ConnectionStatus;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::ble::{BleTransport, NotificationHandler};
use crate::state::AppState;

pub type AsyncHook = Arc<dyn Fn() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;
pub type TransportFactory = Arc<dyn Fn() -> Arc<dyn BleTransport> + Send + Sync>;

const SETTLE_DELAY: Duration = Duration::from_millis(500);

pub struct ConnectionManager {
    state: Arc<AppState>,
    make_transport: TransportFactory,
    transport: StdMutex<Option<Arc<dyn BleTransport>>>,
    notification_handler: StdMutex<Option<NotificationHandler>>,
    pre_disconnect_hook: StdMutex<Option<AsyncHook>>,
    cancel: StdMutex<Option<CancellationToken>>,
}

impl ConnectionManager {
    pub fn new(state: Arc<AppState>, make_transport: TransportFactory) -> Arc<Self> {
        Arc::new(Self {
            state,
            make_transport,
            transport: StdMutex::new(None),
            notification_handler: StdMutex::new(None),
            pre_disconnect_hook: StdMutex::new(None),
            cancel: StdMutex::new(None),
        })
    }

    pub fn set_notification_handler(&self, handler: NotificationHandler) {
        *self.notification_handler.lock().expect("lock poisoned") = Some(handler);
    }

    pub fn set_pre_disconnect_hook(&self, hook: AsyncHook) {
        *self.pre_disconnect_hook.lock().expect("lock poisoned") = Some(hook);
    }

    fn current_transport(&self) -> Option<Arc<dyn BleTransport>> {
        self.transport.lock().expect("lock poisoned").clone()
    }

    /// Begin connecting to `name`/`address`. Cancels any in-flight attempt
    /// first. Runs in a detached worker task; failures land in
    /// `last_error`/`connection_status`, never as a panic.
    pub fn start(self: &Arc<Self>, name: String, address: String) {
        let token = CancellationToken::new();
        {
            let mut cancel = self.cancel.lock().expect("lock poisoned");
            if let Some(old) = cancel.take() {
                old.cancel();
            }
            *cancel = Some(token.clone());
        }

        let needs_instantiation = self.transport.lock().expect("lock poisoned").is_none();
        if needs_instantiation {
            let transport = (self.make_transport)();
            *self.transport.lock().expect("lock poisoned") = Some(transport);
        }

        self.state.connection_status.set(ConnectionStatus::Connecting);

        let this = self.clone();
        tokio::spawn(async move {
            if needs_instantiation {
                tokio::time::sleep(SETTLE_DELAY).await;
            }
            let outcome = tokio::select! {
                _ = token.cancelled() => return,
                result = this.connect_worker(&name, &address) => result,
            };
            if let Err(message) = outcome {
                error!(error = %message, "BLE connect failed");
                this.state.last_error.set(Some(message.clone()));
                this.state
                    .connection_status
                    .set(ConnectionStatus::Error(message));
            }
        });
    }

    async fn connect_worker(self: &Arc<Self>, name: &str, address: &str) -> Result<(), String> {
        let transport = self.current_transport().ok_or("transport not instantiated")?;

        // Run the actual connect call on its own task so a panicking
        // transport implementation converts to a join error here rather
        // than taking down this worker.
        let connect_name = name.to_string();
        let connect_address = address.to_string();
        let connect_transport = transport.clone();
        let joined = tokio::spawn(async move {
            connect_transport.connect(&connect_name, &connect_address).await
        })
        .await;
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e.to_string()),
            Err(join_err) => return Err(format!("BLE connect worker panicked: {join_err}")),
        }

        let display_name = transport
            .connected_device_name()
            .unwrap_or_else(|| name.to_string());
        self.state.device_display_name.set(Some(display_name));
        self.state.connection_status.set(ConnectionStatus::Connected);

        if let Ok(battery) = transport.read(launch_types::CHAR_BATTERY).await {
            if let Some(level) = crate::codec::decode_battery(&battery) {
                self.state.battery_level.set(Some(level));
            }
        }

        let handler = self.notification_handler.lock().expect("lock poisoned").clone();
        if let Some(handler) = handler.clone() {
            let notify_handler = handler.clone();
            if let Err(e) = transport
                .subscribe(launch_types::CHAR_NOTIFY, notify_handler)
                .await
            {
                warn!(error = %e, "failed to subscribe to NOTIFY");
            }
            if let Err(e) = transport.subscribe(launch_types::CHAR_BATTERY, handler).await {
                warn!(error = %e, "failed to subscribe to BATTERY (non-fatal)");
            }
        }

        Ok(())
    }

    pub fn cancel(&self) {
        if let Some(token) = self.cancel.lock().expect("lock poisoned").take() {
            token.cancel();
        }
    }

    pub async fn disconnect(self: &Arc<Self>) {
        self.cancel();

        let hook = self.pre_disconnect_hook.lock().expect("lock poisoned").clone();
        if let Some(hook) = hook {
            hook().await;
        }

        if let Some(transport) = self.current_transport() {
            let _ = transport.unsubscribe(launch_types::CHAR_NOTIFY).await;
            let _ = transport.unsubscribe(launch_types::CHAR_BATTERY).await;
            let _ = transport.disconnect().await;
        }

        *self.transport.lock().expect("lock poisoned") = None;
        self.state.battery_level.set(None);
        self.state.device_display_name.set(None);
        self.state.connection_status.set(ConnectionStatus::Disconnected);
        info!("BLE disconnected");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::mock::MockBle;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration as StdDuration;

    fn config() -> crate::config::BridgeConfig {
        crate::config::BridgeConfig::default()
    }

    #[tokio::test]
    async fn connect_sets_connected_status() {
        let state = Arc::new(AppState::new(&config()));
        let ble = Arc::new(MockBle::new());
        let ble_for_factory = ble.clone();
        let manager = ConnectionManager::new(
            state.clone(),
            Arc::new(move || ble_for_factory.clone() as Arc<dyn BleTransport>),
        );
        manager.start("device".to_string(), "AA:BB".to_string());
        tokio::time::sleep(StdDuration::from_millis(600)).await;
        assert_eq!(state.connection_status.get(), ConnectionStatus::Connected);
        assert_eq!(
            state.device_display_name.get(),
            Some("device".to_string())
        );
    }

    #[tokio::test]
    async fn disconnect_runs_pre_disconnect_hook() {
        let state = Arc::new(AppState::new(&config()));
        let ble = Arc::new(MockBle::new());
        let ble_for_factory = ble.clone();
        let manager = ConnectionManager::new(
            state.clone(),
            Arc::new(move || ble_for_factory.clone() as Arc<dyn BleTransport>),
        );
        let hook_calls = Arc::new(AtomicUsize::new(0));
        let hook_calls2 = hook_calls.clone();
        manager.set_pre_disconnect_hook(Arc::new(move || {
            let hook_calls = hook_calls2.clone();
            Box::pin(async move {
                hook_calls.fetch_add(1, Ordering::SeqCst);
            })
        }));
        manager.start("device".to_string(), "AA:BB".to_string());
        tokio::time::sleep(StdDuration::from_millis(600)).await;
        manager.disconnect().await;
        assert_eq!(hook_calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            state.connection_status.get(),
            ConnectionStatus::Disconnected
        );
    }
}
