//! Simulator Integration: a long-lived TCP/JSON client to the golf
//! simulator. Reacts to state changes by sending GSPro-style shot messages;
//! reacts to simulator replies by driving the Controller. Grounded on the
//! reconnect/backoff actor loop pattern used for device sessions elsewhere
//! in the retrieval pack (exponential backoff, cancellable supervisor task,
//! single owned socket).

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use launch_types::ConnectionStatus;
use serde::Serialize;
use serde_json::Value;
use socket2::SockRef;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::club;
use crate::config::BridgeConfig;
use crate::controller::Controller;
use crate::state::AppState;

const KEEPALIVE_PERIOD: Duration = Duration::from_secs(30);
const POST_CONNECT_GRACE: Duration = Duration::from_millis(500);

// ── Outbound wire schema ─────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct OutMessage {
    #[serde(rename = "DeviceID")]
    device_id: &'static str,
    #[serde(rename = "Units")]
    units: &'static str,
    #[serde(rename = "APIversion")]
    api_version: &'static str,
    #[serde(rename = "ShotNumber")]
    shot_number: u32,
    #[serde(rename = "ShotDataOptions")]
    shot_data_options: ShotDataOptions,
    #[serde(rename = "BallData", skip_serializing_if = "Option::is_none")]
    ball_data: Option<BallDataOut>,
    #[serde(rename = "ClubData", skip_serializing_if = "Option::is_none")]
    club_data: Option<ClubDataOut>,
}

#[derive(Debug, Serialize)]
struct ShotDataOptions {
    #[serde(rename = "ContainsBallData")]
    contains_ball_data: bool,
    #[serde(rename = "ContainsClubData")]
    contains_club_data: bool,
    #[serde(rename = "LaunchMonitorIsReady", skip_serializing_if = "Option::is_none")]
    launch_monitor_is_ready: Option<bool>,
    #[serde(
        rename = "LaunchMonitorBallDetected",
        skip_serializing_if = "Option::is_none"
    )]
    launch_monitor_ball_detected: Option<bool>,
}

#[derive(Debug, Serialize)]
struct BallDataOut {
    #[serde(rename = "Speed")]
    speed: f64,
    #[serde(rename = "SpinAxis")]
    spin_axis: f64,
    #[serde(rename = "TotalSpin")]
    total_spin: f64,
    #[serde(rename = "BackSpin")]
    back_spin: f64,
    #[serde(rename = "SideSpin")]
    side_spin: f64,
    #[serde(rename = "HLA")]
    hla: f64,
    #[serde(rename = "VLA")]
    vla: f64,
}

impl BallDataOut {
    fn from_metrics(m: &launch_types::BallMetrics) -> Self {
        Self {
            speed: m.ball_speed_mps * 2.23694,
            spin_axis: m.spin_axis_deg * -1.0,
            total_spin: m.total_spin_rpm as f64,
            back_spin: m.backspin_rpm as f64,
            side_spin: m.sidespin_rpm as f64 * -1.0,
            hla: m.horizontal_angle_deg,
            vla: m.vertical_angle_deg,
        }
    }
}

#[derive(Debug, Serialize, Default)]
struct ClubDataOut {
    #[serde(rename = "AngleOfAttack")]
    angle_of_attack: f64,
    #[serde(rename = "FaceToTarget")]
    face_to_target: f64,
    #[serde(rename = "Loft")]
    loft: f64,
    #[serde(rename = "Path")]
    path: f64,
}

impl ClubDataOut {
    fn from_metrics(m: &launch_types::ClubMetrics) -> Self {
        Self {
            angle_of_attack: m.attack_angle_deg,
            face_to_target: m.face_angle_deg,
            loft: m.dynamic_loft_deg,
            path: m.path_angle_deg,
        }
    }
}

/// Scan `buf` for complete JSON objects with no delimiter between them.
/// Tries progressively longer balanced-brace prefixes (a brace inside a
/// string can make the shortest naive balance point not parse) and accepts
/// the first one that parses; consumes accepted bytes from `buf` in place.
pub fn extract_objects(buf: &mut Vec<u8>) -> Vec<Value> {
    let mut out = Vec::new();
    loop {
        let start = match buf.iter().position(|&b| b == b'{') {
            Some(i) => i,
            None => {
                buf.clear();
                return out;
            }
        };
        if start > 0 {
            buf.drain(0..start);
        }

        let mut depth = 0i32;
        let mut accepted_end = None;
        for (i, &b) in buf.iter().enumerate() {
            match b {
                b'{' => depth += 1,
                b'}' => {
                    depth -= 1;
                    if depth == 0 {
                        if serde_json::from_slice::<Value>(&buf[0..=i]).is_ok() {
                            accepted_end = Some(i);
                            break;
                        }
                        // Balanced by raw brace count but not valid JSON
                        // (braces inside a string threw off the naive
                        // count) — keep scanning for a longer balance point.
                    }
                }
                _ => {}
            }
        }
        match accepted_end {
            Some(end) => {
                let value: Value =
                    serde_json::from_slice(&buf[0..=end]).expect("validated above");
                out.push(value);
                buf.drain(0..=end);
            }
            None => return out,
        }
    }
}

pub struct SimulatorIntegration {
    state: Arc<AppState>,
    controller: Arc<Controller>,
    config: Arc<BridgeConfig>,
    write_half: AsyncMutex<Option<OwnedWriteHalf>>,
    shot_number: AtomicU32,
    running: AtomicBool,
    auto_reconnect: AtomicBool,
    supervisor_cancel: std::sync::Mutex<Option<CancellationToken>>,
}

impl SimulatorIntegration {
    pub fn new(state: Arc<AppState>, controller: Arc<Controller>, config: Arc<BridgeConfig>) -> Arc<Self> {
        let sim = Arc::new(Self {
            state: state.clone(),
            controller,
            config,
            write_half: AsyncMutex::new(None),
            shot_number: AtomicU32::new(0),
            running: AtomicBool::new(false),
            auto_reconnect: AtomicBool::new(true),
            supervisor_cancel: std::sync::Mutex::new(None),
        });

        let ready_sim = sim.clone();
        state.ball_presence.observe(move |old, new| {
            if old.ready != new.ready {
                let sim = ready_sim.clone();
                let ready = new.ready;
                let detected = new.detected;
                tokio::spawn(async move { sim.send_ready_frame(ready, detected).await });
            }
        });

        let ball_sim = sim.clone();
        state.last_ball_metrics.observe(move |_old, new| {
            if let Some(metrics) = new.clone() {
                let sim = ball_sim.clone();
                tokio::spawn(async move { sim.send_ball_metrics(&metrics).await });
            }
        });

        let club_sim = sim.clone();
        state.last_club_metrics.observe(move |_old, new| {
            let sim = club_sim.clone();
            let metrics = new.clone();
            tokio::spawn(async move { sim.send_club_metrics(metrics).await });
        });

        sim
    }

    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        self.auto_reconnect.store(true, Ordering::SeqCst);
        let token = CancellationToken::new();
        *self.supervisor_cancel.lock().expect("lock poisoned") = Some(token.clone());
        let sim = self.clone();
        tokio::spawn(async move { sim.supervisor_loop(token).await });
    }

    pub async fn stop(self: &Arc<Self>) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(token) = self.supervisor_cancel.lock().expect("lock poisoned").take() {
            token.cancel();
        }
        *self.write_half.lock().await = None;
        self.state.simulator_status.set(ConnectionStatus::Disconnected);
    }

    async fn supervisor_loop(self: Arc<Self>, token: CancellationToken) {
        let mut backoff = self.config.reconnect_initial_backoff;
        let mut attempts: u32 = 0;
        let window_start = Instant::now();

        loop {
            if token.is_cancelled() || !self.running.load(Ordering::SeqCst) {
                return;
            }
            if !self.auto_reconnect.load(Ordering::SeqCst) {
                return;
            }

            self.state.simulator_status.set(ConnectionStatus::Connecting);
            let address = (self.config.simulator_host.as_str(), self.config.simulator_port);
            match TcpStream::connect(address).await {
                Ok(stream) => {
                    if let Err(e) = configure_keepalive(&stream) {
                        warn!(error = %e, "failed to configure TCP keepalive (non-fatal)");
                    }
                    backoff = self.config.reconnect_initial_backoff;
                    attempts = 0;

                    tokio::select! {
                        _ = token.cancelled() => return,
                        _ = tokio::time::sleep(POST_CONNECT_GRACE) => {}
                    }
                    self.state.simulator_status.set(ConnectionStatus::Connected);
                    self.state.simulator_error.set(None);

                    let (read_half, write_half) = stream.into_split();
                    *self.write_half.lock().await = Some(write_half);
                    self.read_loop(read_half, &token).await;
                    *self.write_half.lock().await = None;
                }
                Err(e) => {
                    attempts += 1;
                    let message = e.to_string();
                    warn!(error = %message, attempts, "simulator connect failed");
                    self.state.simulator_error.set(Some(message));

                    let exceeded_attempts = self
                        .config
                        .reconnect_max_attempts
                        .map(|max| attempts >= max)
                        .unwrap_or(false);
                    let exceeded_window = self
                        .config
                        .reconnect_max_window
                        .map(|max| window_start.elapsed() >= max)
                        .unwrap_or(false);
                    if exceeded_attempts || exceeded_window {
                        self.auto_reconnect.store(false, Ordering::SeqCst);
                        self.state.simulator_status.set(ConnectionStatus::Disconnected);
                        warn!("simulator auto-reconnect disabled; manual reconnect required");
                        return;
                    }

                    tokio::select! {
                        _ = token.cancelled() => return,
                        _ = tokio::time::sleep(backoff) => {}
                    }
                    backoff = (backoff * 2).min(self.config.reconnect_max_backoff);
                }
            }
        }
    }

    async fn read_loop(self: &Arc<Self>, mut read_half: OwnedReadHalf, token: &CancellationToken) {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            if token.is_cancelled() {
                return;
            }
            let read = tokio::time::timeout(
                self.config.simulator_read_deadline,
                read_half.read(&mut chunk),
            )
            .await;
            match read {
                Err(_elapsed) => continue, // read deadline hit; loop and retry
                Ok(Ok(0)) => {
                    info!("simulator closed the connection");
                    self.state.simulator_status.set(ConnectionStatus::Error(
                        "simulator closed connection".to_string(),
                    ));
                    return;
                }
                Ok(Ok(n)) => {
                    buf.extend_from_slice(&chunk[..n]);
                    for object in extract_objects(&mut buf) {
                        self.handle_message(object).await;
                    }
                }
                Ok(Err(e)) => {
                    warn!(error = %e, "simulator read error");
                    self.state
                        .simulator_status
                        .set(ConnectionStatus::Error(e.to_string()));
                    return;
                }
            }
        }
    }

    async fn handle_message(&self, value: Value) {
        let message = value.get("Message").and_then(Value::as_str);
        match message {
            Some("GSPro ready") => {
                if let Err(e) = self.controller.activate_ball_detection().await {
                    warn!(error = %e, "activate_ball_detection failed after GSPro ready");
                }
            }
            Some("GSPro Player Information") => {
                self.apply_player_information(&value);
                if let Err(e) = self.controller.activate_ball_detection().await {
                    warn!(error = %e, "activate_ball_detection failed after player information");
                }
            }
            Some("Ball Data received") | Some("Club & Ball Data received") => {
                debug!(message, "simulator acknowledged shot data");
            }
            Some(other) => warn!(message = other, "unrecognized simulator message"),
            None => warn!(?value, "simulator message missing Message field"),
        }
    }

    fn apply_player_information(&self, value: &Value) {
        let player = match value.get("Player") {
            Some(p) => p,
            None => return,
        };
        if let Some(code) = player.get("Club").and_then(Value::as_str) {
            match club::from_simulator_code(code) {
                Some(club_id) => {
                    self.state.club.set(Some(club_id));
                    self.state.club_name.set(Some(club_id.short_name().to_string()));
                }
                None => warn!(code, "unmapped simulator club code"),
            }
        }
        if let Some(handed) = player.get("Handed").and_then(Value::as_str) {
            let handedness = if handed.eq_ignore_ascii_case("LH") {
                launch_types::Handedness::Left
            } else {
                launch_types::Handedness::Right
            };
            self.state.handedness.set(Some(handedness));
        }
    }

    async fn send_ready_frame(&self, ready: bool, detected: bool) {
        let message = OutMessage {
            device_id: "CustomLaunchMonitor",
            units: "Yards",
            api_version: "1",
            shot_number: self.shot_number.load(Ordering::SeqCst),
            shot_data_options: ShotDataOptions {
                contains_ball_data: false,
                contains_club_data: false,
                launch_monitor_is_ready: Some(ready),
                launch_monitor_ball_detected: Some(detected),
            },
            ball_data: None,
            club_data: None,
        };
        self.send(&message).await;
    }

    async fn send_ball_metrics(&self, metrics: &launch_types::BallMetrics) {
        let shot_number = self.shot_number.fetch_add(1, Ordering::SeqCst) + 1;
        let message = OutMessage {
            device_id: "CustomLaunchMonitor",
            units: "Yards",
            api_version: "1",
            shot_number,
            shot_data_options: ShotDataOptions {
                contains_ball_data: true,
                contains_club_data: false,
                launch_monitor_is_ready: None,
                launch_monitor_ball_detected: None,
            },
            ball_data: Some(BallDataOut::from_metrics(metrics)),
            club_data: None,
        };
        self.send(&message).await;
    }

    async fn send_club_metrics(&self, metrics: Option<launch_types::ClubMetrics>) {
        let club_data = metrics.as_ref().map(ClubDataOut::from_metrics).unwrap_or_default();
        let message = OutMessage {
            device_id: "CustomLaunchMonitor",
            units: "Yards",
            api_version: "1",
            shot_number: self.shot_number.load(Ordering::SeqCst),
            shot_data_options: ShotDataOptions {
                contains_ball_data: false,
                contains_club_data: true,
                launch_monitor_is_ready: None,
                launch_monitor_ball_detected: None,
            },
            ball_data: None,
            club_data: Some(club_data),
        };
        self.send(&message).await;
    }

    async fn send(&self, message: &OutMessage) {
        let mut line = match serde_json::to_vec(message) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "failed to serialize simulator message");
                return;
            }
        };
        line.push(b'\n');
        let mut guard = self.write_half.lock().await;
        if let Some(write_half) = guard.as_mut() {
            if let Err(e) = write_half.write_all(&line).await {
                warn!(error = %e, "simulator write failed");
            }
        }
    }
}

fn configure_keepalive(stream: &TcpStream) -> std::io::Result<()> {
    let sock_ref = SockRef::from(stream);
    let keepalive = socket2::TcpKeepalive::new().with_time(KEEPALIVE_PERIOD);
    sock_ref.set_tcp_keepalive(&keepalive)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_back_to_back_objects_with_no_delimiter() {
        let mut buf = br#"{"a":1}{"b":2}"#.to_vec();
        let objects = extract_objects(&mut buf);
        assert_eq!(objects.len(), 2);
        assert_eq!(objects[0]["a"], 1);
        assert_eq!(objects[1]["b"], 2);
        assert!(buf.is_empty());
    }

    #[test]
    fn brace_inside_string_does_not_split_early() {
        let mut buf = br#"{"msg":"a { b } c"}{"next":true}"#.to_vec();
        let objects = extract_objects(&mut buf);
        assert_eq!(objects.len(), 2);
        assert_eq!(objects[0]["msg"], "a { b } c");
        assert_eq!(objects[1]["next"], true);
    }

    #[test]
    fn incomplete_object_is_left_in_buffer() {
        let mut buf = br#"{"partial":"#.to_vec();
        let objects = extract_objects(&mut buf);
        assert!(objects.is_empty());
        assert_eq!(buf, br#"{"partial":"#.to_vec());
    }

    #[test]
    fn leading_garbage_before_brace_is_skipped() {
        let mut buf = b"garbage{\"ok\":true}".to_vec();
        let objects = extract_objects(&mut buf);
        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0]["ok"], true);
    }

    use crate::ble::mock::MockBle;
    use crate::ble::BleTransport;
    use crate::controller::{Controller, GetTransport};

    fn config() -> Arc<BridgeConfig> {
        Arc::new(BridgeConfig::default())
    }

    fn make_controller() -> Arc<Controller> {
        let state = Arc::new(AppState::new(&config()));
        let ble: Arc<MockBle> = Arc::new(MockBle::new());
        let get_transport: GetTransport = Arc::new(move || Some(ble.clone() as Arc<dyn BleTransport>));
        Controller::new(state, get_transport, config())
    }

    async fn connected_pair() -> (Arc<AppState>, Arc<SimulatorIntegration>, TcpStream) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(AppState::new(&config()));
        let controller = make_controller();
        let sim = SimulatorIntegration::new(state.clone(), controller, config());

        let client = TcpStream::connect(addr).await.unwrap();
        let (server_stream, _) = listener.accept().await.unwrap();
        let (_read_half, write_half) = client.into_split();
        *sim.write_half.lock().await = Some(write_half);

        (state, sim, server_stream)
    }

    async fn read_one_json_line(stream: &mut TcpStream) -> Value {
        let mut buf = vec![0u8; 4096];
        let n = stream.read(&mut buf).await.unwrap();
        let line = &buf[..n];
        let text = std::str::from_utf8(line).unwrap().trim_end();
        serde_json::from_str(text).unwrap()
    }

    // Scenario E: a ball_ready transition emits an options-only frame
    // (no ball/club data, ShotNumber unchanged).
    #[tokio::test]
    async fn ball_ready_transition_sends_options_only_frame() {
        let (state, _sim, mut server) = connected_pair().await;
        state.ball_presence.set(crate::state::BallPresence {
            detected: true,
            ready: true,
        });
        let message = read_one_json_line(&mut server).await;
        assert_eq!(message["ShotDataOptions"]["ContainsBallData"], false);
        assert_eq!(message["ShotDataOptions"]["ContainsClubData"], false);
        assert_eq!(message["ShotDataOptions"]["LaunchMonitorIsReady"], true);
        assert_eq!(message["ShotDataOptions"]["LaunchMonitorBallDetected"], true);
        assert!(message.get("BallData").is_none());
        assert_eq!(message["ShotNumber"], 0);
    }

    #[tokio::test]
    async fn ball_metrics_arrival_increments_shot_number_and_sends_ball_data() {
        let (state, _sim, mut server) = connected_pair().await;
        let metrics = launch_types::BallMetrics {
            ball_speed_mps: 50.0,
            vertical_angle_deg: 12.0,
            horizontal_angle_deg: -3.0,
            total_spin_rpm: 3000,
            spin_axis_deg: 5.0,
            backspin_rpm: 2800,
            sidespin_rpm: 200,
            shot_type: launch_types::ShotType::Full,
            raw_hex: "00".to_string(),
        };
        state.last_ball_metrics.set(Some(metrics));
        let message = read_one_json_line(&mut server).await;
        assert_eq!(message["ShotNumber"], 1);
        assert_eq!(message["ShotDataOptions"]["ContainsBallData"], true);
        assert_eq!(message["BallData"]["Speed"], 50.0 * 2.23694);
        assert_eq!(message["BallData"]["SideSpin"], -200.0);
    }
}
