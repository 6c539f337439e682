//! Launch-Monitor Controller: the heart of the system. Classifies inbound
//! notifications into state transitions and issues outbound commands driven
//! by state and external requests. Reaches the BLE transport only through a
//! capability closure supplied by the Connection Manager — it never holds a
//! strong reference to the manager itself, keeping the two halves of the
//! cyclic hookup (notification handler, pre-disconnect hook) one-way.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use launch_types::{
    ClubId, ConnectionStatus, Handedness, Position3, SpinMode,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::ble::{BleTransport, NotificationHandler};
use crate::codec::{self, Command, DecodedFrame, DetectMode};
use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};
use crate::state::{AppState, BallPresence};

pub type GetTransport = Arc<dyn Fn() -> Option<Arc<dyn BleTransport>> + Send + Sync>;

const POST_CONNECT_VERSION_QUERY_DELAY: Duration = Duration::from_millis(100);

pub struct Controller {
    state: Arc<AppState>,
    get_transport: GetTransport,
    sequence: AtomicU8,
    heartbeat_period: Duration,
    heartbeat_cancel: StdMutex<Option<CancellationToken>>,
}

impl Controller {
    pub fn new(state: Arc<AppState>, get_transport: GetTransport, config: Arc<BridgeConfig>) -> Arc<Self> {
        let controller = Arc::new(Self {
            state,
            get_transport,
            sequence: AtomicU8::new(0),
            heartbeat_period: config.heartbeat_period,
            heartbeat_cancel: StdMutex::new(None),
        });

        let observer_controller = controller.clone();
        controller.state.connection_status.observe(move |old, new| {
            let was_connected = matches!(old, ConnectionStatus::Connected);
            let is_connected = matches!(new, ConnectionStatus::Connected);
            if is_connected && !was_connected {
                observer_controller.start_heartbeat();
                observer_controller.schedule_post_connect_version_query();
            } else if was_connected && !is_connected {
                observer_controller.stop_heartbeat();
                observer_controller.handle_bluetooth_disconnect();
            }
        });

        controller
    }

    fn next_seq(&self) -> u8 {
        self.sequence.fetch_add(1, Ordering::SeqCst)
    }

    fn transport(&self) -> Result<Arc<dyn BleTransport>> {
        (self.get_transport)().ok_or(BridgeError::NotConnected)
    }

    async fn send(&self, command: Command) -> Result<()> {
        let transport = self.transport()?;
        let bytes = command.encode();
        transport.write(launch_types::CHAR_CMD, &bytes).await
    }

    // ── Notification handling ───────────────────────────────────────────

    /// A [`NotificationHandler`] closure bound to this controller, suitable
    /// for `ConnectionManager::set_notification_handler`.
    pub fn notification_handler(self: &Arc<Self>) -> NotificationHandler {
        let controller = self.clone();
        Arc::new(move |uuid: &str, bytes: &[u8]| {
            controller.handle_notification(uuid, bytes);
        })
    }

    fn handle_notification(self: &Arc<Self>, uuid: &str, bytes: &[u8]) {
        if uuid == launch_types::CHAR_BATTERY {
            if bytes.is_empty() {
                return;
            }
            if let Some(level) = codec::decode_battery(bytes) {
                self.state.battery_level.set(Some(level));
            }
            return;
        }

        let frame = match codec::decode_notification(bytes) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "dropping malformed notification");
                return;
            }
        };

        match frame {
            DecodedFrame::Sensor(sensor) => {
                self.state.ball_presence.set(BallPresence {
                    detected: sensor.ball_detected,
                    ready: sensor.ball_ready,
                });
                self.state.ball_position.set(Some(sensor.position));
            }
            DecodedFrame::BallMetrics(metrics) => {
                let changed = self
                    .state
                    .last_ball_metrics
                    .get()
                    .map(|prev| prev.raw_hex != metrics.raw_hex)
                    .unwrap_or(true);
                if changed {
                    self.state.last_ball_metrics.set(Some(metrics));
                    if self.transport().is_ok() {
                        let controller = self.clone();
                        tokio::spawn(async move {
                            let seq = controller.next_seq();
                            if let Err(e) =
                                controller.send(Command::RequestClubMetrics { seq }).await
                            {
                                warn!(error = %e, "failed to request club metrics");
                            }
                        });
                    }
                }
            }
            DecodedFrame::ClubMetrics(metrics) => {
                self.state.last_club_metrics.set(Some(metrics));
            }
            DecodedFrame::NoClubData => {
                self.state.last_club_metrics.set(None);
            }
            DecodedFrame::OsVersion { major, minor } => {
                self.state
                    .firmware_version
                    .set(Some(codec::format_os_version(major, minor)));
            }
            DecodedFrame::Alignment(alignment) => {
                self.state.alignment_angle.set(alignment.aim_angle_deg);
                self.state.is_aligned.set(alignment.is_aligned);
            }
            DecodedFrame::DeviceHeartbeat | DecodedFrame::Unknown => {}
        }
    }

    // ── Outbound operations ─────────────────────────────────────────────

    pub async fn activate_ball_detection(&self) -> Result<()> {
        self.transport()?;
        if self.state.club.get().is_none() {
            self.state.club.set(Some(ClubId::Driver));
        }
        if self.state.handedness.get().is_none() {
            self.state.handedness.set(Some(Handedness::Right));
        }
        if self.state.spin_mode.get().is_none() {
            self.state.spin_mode.set(Some(SpinMode::Advanced));
        }
        let club = self.state.club.get().unwrap();
        let handed = self.state.handedness.get().unwrap();
        let spin = self.state.spin_mode.get().unwrap();

        self.send(Command::Club {
            seq: self.next_seq(),
            club,
            handed,
        })
        .await?;
        self.send(Command::DetectBall {
            seq: self.next_seq(),
            mode: DetectMode::Activate,
            spin,
        })
        .await
    }

    pub async fn deactivate_ball_detection(&self) -> Result<()> {
        let spin = self.state.spin_mode.get().unwrap_or(SpinMode::Advanced);
        self.send(Command::DetectBall {
            seq: self.next_seq(),
            mode: DetectMode::Deactivate,
            spin,
        })
        .await
    }

    pub async fn start_alignment(&self) -> Result<()> {
        self.state.is_aligning.set(true);
        self.send(Command::start_alignment(self.next_seq())).await
    }

    pub async fn stop_alignment(&self) -> Result<()> {
        let angle = self.state.alignment_angle.get();
        self.send(Command::stop_alignment(self.next_seq(), angle))
            .await?;
        self.state.is_aligning.set(false);
        self.state.alignment_angle.set(0.0);
        self.state.is_aligned.set(false);
        Ok(())
    }

    pub async fn cancel_alignment(&self) -> Result<()> {
        let angle = self.state.alignment_angle.get();
        self.send(Command::cancel_alignment(self.next_seq(), angle))
            .await?;
        self.state.is_aligning.set(false);
        self.state.alignment_angle.set(0.0);
        self.state.is_aligned.set(false);
        Ok(())
    }

    pub async fn request_firmware_version(&self) -> Result<()> {
        self.send(Command::GetOsVersion {
            seq: self.next_seq(),
        })
        .await
    }

    fn schedule_post_connect_version_query(self: &Arc<Self>) {
        let controller = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(POST_CONNECT_VERSION_QUERY_DELAY).await;
            if let Err(e) = controller.request_firmware_version().await {
                debug!(error = %e, "post-connect firmware version query failed");
            }
        });
    }

    fn start_heartbeat(self: &Arc<Self>) {
        let token = CancellationToken::new();
        {
            let mut guard = self.heartbeat_cancel.lock().expect("lock poisoned");
            if let Some(old) = guard.take() {
                old.cancel();
            }
            *guard = Some(token.clone());
        }
        let controller = self.clone();
        let period = self.heartbeat_period;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {
                        if controller.transport().is_ok() {
                            let seq = controller.next_seq();
                            if let Err(e) = controller.send(Command::Heartbeat { seq }).await {
                                warn!(error = %e, "heartbeat send failed");
                            }
                        }
                    }
                }
            }
        });
    }

    fn stop_heartbeat(&self) {
        if let Some(token) = self.heartbeat_cancel.lock().expect("lock poisoned").take() {
            token.cancel();
        }
    }

    fn handle_bluetooth_disconnect(&self) {
        self.state.ball_presence.set(BallPresence::default());
        self.state.ball_position.set(None);
        info!("BLE disconnected; cleared ball presence state");
    }

    /// Best-effort pre-disconnect hook, wired into the Connection Manager
    /// as a one-way capability handle.
    pub fn pre_disconnect_hook(self: &Arc<Self>) -> crate::connection::AsyncHook {
        let controller = self.clone();
        Arc::new(move || {
            let controller = controller.clone();
            Box::pin(async move {
                if let Err(e) = controller.deactivate_ball_detection().await {
                    debug!(error = %e, "pre-disconnect deactivate_ball_detection failed (ignored)");
                }
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::mock::MockBle;

    fn config() -> Arc<BridgeConfig> {
        Arc::new(BridgeConfig::default())
    }

    fn make_controller() -> (Arc<Controller>, Arc<MockBle>, Arc<AppState>) {
        let state = Arc::new(AppState::new(&config()));
        let ble: Arc<MockBle> = Arc::new(MockBle::new());
        let ble_for_getter = ble.clone();
        let get_transport: GetTransport = Arc::new(move || {
            Some(ble_for_getter.clone() as Arc<dyn BleTransport>)
        });
        let controller = Controller::new(state.clone(), get_transport, config());
        (controller, ble, state)
    }

    #[tokio::test]
    async fn sequence_wraps_modulo_256() {
        let (controller, _ble, _state) = make_controller();
        for _ in 0..255 {
            controller.next_seq();
        }
        assert_eq!(controller.next_seq(), 255);
        assert_eq!(controller.next_seq(), 0);
    }

    #[tokio::test]
    async fn activate_ball_detection_sends_club_then_detect_ball() {
        let (controller, ble, _state) = make_controller();
        ble.connect("device", "AA").await.unwrap();
        controller.activate_ball_detection().await.unwrap();
        let writes = ble.writes.lock().unwrap().clone();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[0].1, vec![0x11, 0x82, 0x00, 0x02, 0x04, 0x00, 0x00, 0x00, 0x00]);
        assert_eq!(writes[1].1, vec![0x11, 0x81, 0x01, 0x01, 0x11, 0x00, 0x00, 0x00, 0x00]);
    }

    #[tokio::test]
    async fn heartbeat_uses_configured_period() {
        let mut cfg = BridgeConfig::default();
        cfg.heartbeat_period = Duration::from_millis(20);
        let config = Arc::new(cfg);
        let state = Arc::new(AppState::new(&config));
        let ble = Arc::new(MockBle::new());
        let ble_for_getter = ble.clone();
        let get_transport: GetTransport =
            Arc::new(move || Some(ble_for_getter.clone() as Arc<dyn BleTransport>));
        let controller = Controller::new(state.clone(), get_transport, config);
        ble.connect("device", "AA").await.unwrap();
        state.connection_status.set(ConnectionStatus::Connected);
        tokio::time::sleep(Duration::from_millis(70)).await;
        let heartbeats = ble
            .writes
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, bytes)| bytes[1] == 0x83)
            .count();
        assert!(heartbeats >= 2, "expected multiple heartbeats at a 20ms period, got {heartbeats}");
    }

    #[tokio::test]
    async fn sensor_notification_updates_ball_presence_and_position() {
        let (controller, _ble, state) = make_controller();
        let raw = [
            0x11, 0x01, 0x00, 0x02, 0x01, 0x0A, 0x00, 0x00, 0x00, 0x14, 0x00, 0x00, 0x00, 0x1E,
            0x00, 0x00, 0x00,
        ];
        controller.handle_notification(launch_types::CHAR_NOTIFY, &raw);
        assert_eq!(
            state.ball_presence.get(),
            BallPresence {
                detected: true,
                ready: true
            }
        );
        assert_eq!(
            state.ball_position.get(),
            Some(Position3 { x: 10, y: 20, z: 30 })
        );
    }

    #[tokio::test]
    async fn ball_metrics_duplicate_is_suppressed() {
        let (controller, ble, state) = make_controller();
        ble.connect("device", "AA").await.unwrap();
        let raw = [
            0x11, 0x02, 0x37, 0x64, 0x00, 0xC8, 0x00, 0x2C, 0x01, 0xE8, 0x03, 0xF4, 0x01, 0xD0,
            0x07, 0xB8, 0x0B,
        ];
        controller.handle_notification(launch_types::CHAR_NOTIFY, &raw);
        controller.handle_notification(launch_types::CHAR_NOTIFY, &raw);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(state.last_ball_metrics.get().is_some());
        // exactly one RequestClubMetrics despite two identical notifications
        let metrics_requests = ble
            .writes
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, bytes)| bytes[1] == 0x87)
            .count();
        assert_eq!(metrics_requests, 1);
    }

    #[tokio::test]
    async fn no_club_data_clears_last_club_metrics() {
        let (controller, _ble, state) = make_controller();
        state.last_club_metrics.set(Some(launch_types::ClubMetrics {
            path_angle_deg: 1.0,
            face_angle_deg: 1.0,
            attack_angle_deg: 1.0,
            dynamic_loft_deg: 1.0,
        }));
        controller.handle_notification(launch_types::CHAR_NOTIFY, &[0x11, 0x07, 0x00]);
        assert!(state.last_club_metrics.get().is_none());
    }
}
