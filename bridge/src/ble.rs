//! BLE transport abstraction and its real (`btleplug`) implementation.
//!
//! `BleTransport` is the capability set the Connection Manager and
//! Controller depend on; the real adapter, a test mock, and (eventually) a
//! scripted simulator device all implement it polymorphically. Grounded on
//! the `btleplug` usage pattern in a BLE battery-monitor client: `Manager`,
//! `Central::start_scan`, `Peripheral::connect`/`discover_services`,
//! characteristic lookup by UUID, and a notification stream fanned out to a
//! caller-supplied handler.

use async_trait::async_trait;
use btleplug::api::{
    Central, CharPropFlags, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures_util::StreamExt;
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, OnceLock};
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use uuid::Uuid;

use crate::error::{BridgeError, Result};

pub type NotificationHandler = std::sync::Arc<dyn Fn(&str, &[u8]) + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredDevice {
    pub address: String,
    pub name: Option<String>,
}

/// Capability set consumed by the Connection Manager and Controller. All
/// methods must be safe to call from any task; the handler passed to
/// `subscribe` may be invoked from an adapter-owned task.
#[async_trait]
pub trait BleTransport: Send + Sync {
    async fn connect(&self, name: &str, address: &str) -> Result<()>;
    async fn disconnect(&self) -> Result<()>;
    async fn write(&self, uuid: &str, bytes: &[u8]) -> Result<()>;
    async fn read(&self, uuid: &str) -> Result<Vec<u8>>;
    async fn subscribe(&self, uuid: &str, handler: NotificationHandler) -> Result<()>;
    async fn unsubscribe(&self, uuid: &str) -> Result<()>;
    fn is_connected(&self) -> bool;
    async fn start_scan(&self, prefix: &str) -> Result<()>;
    async fn stop_scan(&self) -> Result<()>;
    async fn discovered_devices(&self) -> Vec<DiscoveredDevice>;
    fn connected_device_name(&self) -> Option<String>;
}

// ── Process-global adapter ownership gate ───────────────────────────────────

/// Only one transport may hold the adapter at a time. Releasing signals
/// waiters; acquiring waits up to ~3s; release is delayed ~1s after
/// disconnect to let the platform's BLE stack settle.
struct AdapterGate {
    held: Mutex<bool>,
    notify: Notify,
}

impl AdapterGate {
    fn global() -> &'static AdapterGate {
        static GATE: OnceLock<AdapterGate> = OnceLock::new();
        GATE.get_or_init(|| AdapterGate {
            held: Mutex::new(false),
            notify: Notify::new(),
        })
    }

    async fn acquire(&'static self) -> Result<AdapterPermit> {
        let wait = async {
            loop {
                {
                    let mut held = self.held.lock().await;
                    if !*held {
                        *held = true;
                        return;
                    }
                }
                self.notify.notified().await;
            }
        };
        tokio::time::timeout(Duration::from_secs(3), wait)
            .await
            .map_err(|_| BridgeError::TransportError("timed out waiting for BLE adapter".into()))?;
        Ok(AdapterPermit { gate: self })
    }
}

struct AdapterPermit {
    gate: &'static AdapterGate,
}

impl Drop for AdapterPermit {
    fn drop(&mut self) {
        let gate = self.gate;
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            *gate.held.lock().await = false;
            gate.notify.notify_waiters();
        });
    }
}

// ── Real adapter ─────────────────────────────────────────────────────────────

struct Inner {
    peripheral: Option<Peripheral>,
    device_name: Option<String>,
    permit: Option<AdapterPermit>,
    discovered: Vec<DiscoveredDevice>,
}

pub struct RealBle {
    inner: Mutex<Inner>,
    connected: std::sync::atomic::AtomicBool,
    subscriptions: Arc<StdMutex<HashMap<String, NotificationHandler>>>,
}

impl RealBle {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                peripheral: None,
                device_name: None,
                permit: None,
                discovered: Vec::new(),
            }),
            connected: std::sync::atomic::AtomicBool::new(false),
            subscriptions: Arc::new(StdMutex::new(HashMap::new())),
        }
    }

    async fn adapter() -> Result<Adapter> {
        let manager = Manager::new()
            .await
            .map_err(|e| BridgeError::TransportError(format!("BLE manager init failed: {e}")))?;
        let adapters = manager
            .adapters()
            .await
            .map_err(|e| BridgeError::TransportError(format!("no BLE adapters: {e}")))?;
        adapters
            .into_iter()
            .next()
            .ok_or_else(|| BridgeError::TransportError("no BLE adapter found".into()))
    }

    fn find_characteristic(peripheral: &Peripheral, uuid: &str) -> Result<Characteristic> {
        let target = Uuid::parse_str(uuid)
            .map_err(|e| BridgeError::TransportError(format!("invalid characteristic uuid: {e}")))?;
        peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == target)
            .ok_or_else(|| BridgeError::TransportError(format!("characteristic {uuid} not found")))
    }
}

impl Default for RealBle {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BleTransport for RealBle {
    async fn connect(&self, name: &str, address: &str) -> Result<()> {
        let permit = AdapterGate::global().acquire().await?;
        let adapter = Self::adapter().await?;
        adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(|e| BridgeError::TransportError(format!("scan failed: {e}")))?;
        tokio::time::sleep(Duration::from_secs(2)).await;

        let peripherals = adapter
            .peripherals()
            .await
            .map_err(|e| BridgeError::TransportError(format!("peripheral listing failed: {e}")))?;

        let mut found = None;
        for p in peripherals {
            if let Ok(Some(props)) = p.properties().await {
                let matches_addr = props.address.to_string() == address;
                let matches_name = props
                    .local_name
                    .as_deref()
                    .map(|n| n == name)
                    .unwrap_or(false);
                if matches_addr || matches_name {
                    found = Some(p);
                    break;
                }
            }
        }
        let peripheral = found
            .ok_or_else(|| BridgeError::TransportError(format!("device {name} ({address}) not found")))?;

        peripheral
            .connect()
            .await
            .map_err(|e| BridgeError::TransportError(format!("connect failed: {e}")))?;
        peripheral
            .discover_services()
            .await
            .map_err(|e| BridgeError::TransportError(format!("service discovery failed: {e}")))?;

        let device_name = peripheral
            .properties()
            .await
            .ok()
            .flatten()
            .and_then(|p| p.local_name)
            .or_else(|| Some(name.to_string()));

        self.connected.store(true, std::sync::atomic::Ordering::SeqCst);
        let mut inner = self.inner.lock().await;
        inner.peripheral = Some(peripheral);
        inner.device_name = device_name;
        inner.permit = Some(permit);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if let Some(peripheral) = inner.peripheral.take() {
            let _ = peripheral.disconnect().await;
        }
        inner.device_name = None;
        inner.permit = None;
        self.connected.store(false, std::sync::atomic::Ordering::SeqCst);
        self.subscriptions.lock().expect("subscriptions lock poisoned").clear();
        Ok(())
    }

    async fn write(&self, uuid: &str, bytes: &[u8]) -> Result<()> {
        let inner = self.inner.lock().await;
        let peripheral = inner.peripheral.as_ref().ok_or(BridgeError::NotConnected)?;
        let characteristic = Self::find_characteristic(peripheral, uuid)?;
        peripheral
            .write(&characteristic, bytes, WriteType::WithResponse)
            .await
            .map_err(|e| BridgeError::TransportError(format!("write to {uuid} failed: {e}")))
    }

    async fn read(&self, uuid: &str) -> Result<Vec<u8>> {
        let inner = self.inner.lock().await;
        let peripheral = inner.peripheral.as_ref().ok_or(BridgeError::NotConnected)?;
        let characteristic = Self::find_characteristic(peripheral, uuid)?;
        peripheral
            .read(&characteristic)
            .await
            .map_err(|e| BridgeError::TransportError(format!("read from {uuid} failed: {e}")))
    }

    async fn subscribe(&self, uuid: &str, handler: NotificationHandler) -> Result<()> {
        let peripheral = {
            let inner = self.inner.lock().await;
            inner.peripheral.clone().ok_or(BridgeError::NotConnected)?
        };
        let characteristic = Self::find_characteristic(&peripheral, uuid)?;
        if !characteristic.properties.contains(CharPropFlags::NOTIFY) {
            return Err(BridgeError::TransportError(format!(
                "{uuid} does not support notifications"
            )));
        }
        peripheral
            .subscribe(&characteristic)
            .await
            .map_err(|e| BridgeError::TransportError(format!("subscribe to {uuid} failed: {e}")))?;

        self.subscriptions
            .lock()
            .expect("subscriptions lock poisoned")
            .insert(uuid.to_string(), handler);

        let target = characteristic.uuid;
        let subscriptions_key = uuid.to_string();
        let gate = self.subscriptions.clone();
        let peripheral_for_task = peripheral.clone();
        // One stream per peripheral in practice would double-dispatch; a real
        // adapter singleton funnels all subscriptions through one
        // `notifications()` stream per peripheral, filtered by uuid here.
        tokio::spawn(async move {
            let Ok(mut stream) = peripheral_for_task.notifications().await else {
                return;
            };
            while let Some(event) = stream.next().await {
                if event.uuid != target {
                    continue;
                }
                let handler = gate
                    .lock()
                    .expect("subscriptions lock poisoned")
                    .get(&subscriptions_key)
                    .cloned();
                if let Some(handler) = handler {
                    handler(&subscriptions_key, &event.value);
                } else {
                    break;
                }
            }
        });
        Ok(())
    }

    async fn unsubscribe(&self, uuid: &str) -> Result<()> {
        let peripheral = {
            let inner = self.inner.lock().await;
            inner.peripheral.clone()
        };
        self.subscriptions
            .lock()
            .expect("subscriptions lock poisoned")
            .remove(uuid);
        if let Some(peripheral) = peripheral {
            if let Ok(characteristic) = Self::find_characteristic(&peripheral, uuid) {
                let _ = peripheral.unsubscribe(&characteristic).await;
            }
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(std::sync::atomic::Ordering::SeqCst)
    }

    async fn start_scan(&self, prefix: &str) -> Result<()> {
        let adapter = Self::adapter().await?;
        adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(|e| BridgeError::TransportError(format!("scan failed: {e}")))?;
        tokio::time::sleep(Duration::from_secs(2)).await;
        let peripherals = adapter
            .peripherals()
            .await
            .map_err(|e| BridgeError::TransportError(format!("peripheral listing failed: {e}")))?;
        let mut discovered = Vec::new();
        for p in peripherals {
            if let Ok(Some(props)) = p.properties().await {
                let name = props.local_name;
                if name.as_deref().map(|n| n.starts_with(prefix)).unwrap_or(false) {
                    discovered.push(DiscoveredDevice {
                        address: props.address.to_string(),
                        name,
                    });
                }
            }
        }
        self.inner.lock().await.discovered = discovered;
        Ok(())
    }

    async fn stop_scan(&self) -> Result<()> {
        let adapter = Self::adapter().await?;
        adapter
            .stop_scan()
            .await
            .map_err(|e| BridgeError::TransportError(format!("stop scan failed: {e}")))
    }

    async fn discovered_devices(&self) -> Vec<DiscoveredDevice> {
        self.inner.lock().await.discovered.clone()
    }

    fn connected_device_name(&self) -> Option<String> {
        self.inner.try_lock().ok().and_then(|i| i.device_name.clone())
    }
}
