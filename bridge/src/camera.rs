//! Camera Integration: fire-and-forget HTTP calls to the swing-camera
//! service. Errors are logged and never propagate into shared state; the
//! state only records what the launch monitor itself reports. Grounded on
//! the teacher's `reqwest::Client`-with-timeout HTTP client usage pattern,
//! generalized from its single external-webhook call site into a small set
//! of named endpoints.

use std::sync::Arc;
use std::sync::Mutex as StdMutex;

use launch_types::ClubMetrics;
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::BridgeConfig;
use crate::state::AppState;

#[derive(Debug, Serialize)]
struct ShotDetectedBody {
    #[serde(rename = "ballSpeed")]
    ball_speed: f64,
    #[serde(rename = "launchAngle")]
    launch_angle: f64,
    #[serde(rename = "launchDirection")]
    launch_direction: f64,
    #[serde(rename = "spinRate")]
    spin_rate: i32,
    #[serde(rename = "spinAxis")]
    spin_axis: f64,
    #[serde(rename = "backSpin")]
    back_spin: i32,
    #[serde(rename = "sideSpin")]
    side_spin: i32,
}

impl ShotDetectedBody {
    fn from_metrics(m: &launch_types::BallMetrics) -> Self {
        Self {
            ball_speed: m.ball_speed_mps * 2.23694,
            launch_angle: m.vertical_angle_deg,
            launch_direction: m.horizontal_angle_deg,
            spin_rate: m.total_spin_rpm as i32,
            spin_axis: m.spin_axis_deg,
            back_spin: m.backspin_rpm as i32,
            side_spin: m.sidespin_rpm as i32,
        }
    }
}

#[derive(Debug, serde::Deserialize)]
struct ShotDetectedResponse {
    #[allow(dead_code)]
    status: Option<String>,
    filename: Option<String>,
}

#[derive(Debug, Serialize)]
struct ClubMetadataBody {
    #[serde(rename = "clubPath")]
    club_path: f64,
    #[serde(rename = "faceAngle")]
    face_angle: f64,
    #[serde(rename = "attackAngle")]
    attack_angle: f64,
    #[serde(rename = "dynamicLoft")]
    dynamic_loft: f64,
    #[serde(rename = "clubType")]
    club_type: String,
}

impl ClubMetadataBody {
    fn from_metrics(m: &ClubMetrics, club_type: String) -> Self {
        Self {
            club_path: m.path_angle_deg,
            face_angle: m.face_angle_deg,
            attack_angle: m.attack_angle_deg,
            dynamic_loft: m.dynamic_loft_deg,
            club_type,
        }
    }
}

/// Buffers whichever half of a shot (ball metrics / filename, club metrics)
/// arrives first so the PATCH can be sent once both are known.
#[derive(Default)]
struct ShotBuffer {
    filename: Option<String>,
    club_metrics: Option<ClubMetrics>,
}

impl ShotBuffer {
    /// Record the filename half; returns club metrics if they already
    /// arrived, so the caller sends exactly one PATCH regardless of which
    /// half showed up first.
    fn merge_filename(&mut self, filename: String) -> Option<ClubMetrics> {
        self.filename = Some(filename);
        self.club_metrics
    }

    /// Record the club-metrics half; returns the filename if it already
    /// arrived.
    fn merge_club_metrics(&mut self, metrics: ClubMetrics) -> Option<String> {
        self.club_metrics = Some(metrics);
        self.filename.clone()
    }
}

pub struct CameraIntegration {
    state: Arc<AppState>,
    client: reqwest::Client,
    buffer: StdMutex<ShotBuffer>,
}

impl CameraIntegration {
    pub fn new(state: Arc<AppState>, config: Arc<BridgeConfig>) -> Arc<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "failed to build camera HTTP client with timeout; using default");
                reqwest::Client::new()
            });

        let camera = Arc::new(Self {
            state: state.clone(),
            client,
            buffer: StdMutex::new(ShotBuffer::default()),
        });

        let arm_camera = camera.clone();
        state.ball_presence.observe(move |old, new| {
            if new.ready && !old.ready {
                let camera = arm_camera.clone();
                tokio::spawn(async move { camera.arm().await });
            } else if !new.ready && old.ready {
                let camera = arm_camera.clone();
                tokio::spawn(async move { camera.cancel().await });
            }
        });

        let shot_camera = camera.clone();
        state.last_ball_metrics.observe(move |_old, new| {
            if let Some(metrics) = new.clone() {
                let camera = shot_camera.clone();
                tokio::spawn(async move { camera.shot_detected(metrics).await });
            }
        });

        let club_camera = camera.clone();
        state.last_club_metrics.observe(move |_old, new| {
            if let Some(metrics) = *new {
                let camera = club_camera.clone();
                tokio::spawn(async move { camera.club_metrics(metrics).await });
            }
        });

        camera
    }

    fn enabled(&self) -> bool {
        self.state.camera_enabled.get()
    }

    fn base_url(&self) -> String {
        self.state.camera_url.get()
    }

    async fn arm(&self) {
        if !self.enabled() {
            return;
        }
        *self.buffer.lock().expect("lock poisoned") = ShotBuffer::default();
        let url = format!("{}/api/lm/arm", self.base_url());
        if let Err(e) = self.client.post(&url).send().await {
            warn!(error = %e, "camera arm request failed (ignored)");
        }
    }

    async fn cancel(&self) {
        if !self.enabled() {
            return;
        }
        let url = format!("{}/api/lm/cancel", self.base_url());
        if let Err(e) = self.client.post(&url).send().await {
            warn!(error = %e, "camera cancel request failed (ignored)");
        }
    }

    async fn shot_detected(&self, metrics: launch_types::BallMetrics) {
        if !self.enabled() {
            return;
        }
        let url = format!("{}/api/lm/shot-detected", self.base_url());
        let body = ShotDetectedBody::from_metrics(&metrics);
        let response = match self.client.post(&url).json(&body).send().await {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "camera shot-detected request failed (ignored)");
                return;
            }
        };
        if !response.status().is_success() {
            warn!(status = %response.status(), "camera shot-detected returned non-200 (ignored)");
            return;
        }
        let parsed: ShotDetectedResponse = match response.json().await {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "camera shot-detected response was not valid JSON (ignored)");
                return;
            }
        };
        let Some(filename) = parsed.filename else {
            return;
        };

        let buffered_club = self
            .buffer
            .lock()
            .expect("lock poisoned")
            .merge_filename(filename.clone());
        if let Some(club_metrics) = buffered_club {
            self.patch_club_metadata(&filename, &club_metrics).await;
        }
    }

    async fn club_metrics(&self, metrics: ClubMetrics) {
        if !self.enabled() {
            return;
        }
        let buffered_filename = self
            .buffer
            .lock()
            .expect("lock poisoned")
            .merge_club_metrics(metrics);
        match buffered_filename {
            Some(filename) => self.patch_club_metadata(&filename, &metrics).await,
            None => debug!("club metrics arrived before a shot filename; buffered"),
        }
    }

    async fn patch_club_metadata(&self, filename: &str, metrics: &ClubMetrics) {
        let club_type = self
            .state
            .club_name
            .get()
            .unwrap_or_else(|| "UNKNOWN".to_string());
        let url = format!("{}/api/recordings/{}/metadata", self.base_url(), filename);
        let body = ClubMetadataBody::from_metrics(metrics, club_type);
        if let Err(e) = self.client.patch(&url).json(&body).send().await {
            warn!(error = %e, "camera metadata patch failed (ignored)");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use launch_types::ShotType;

    fn config() -> Arc<BridgeConfig> {
        Arc::new(BridgeConfig::default())
    }

    #[test]
    fn shot_detected_body_maps_fields_flat_and_camel_case() {
        let metrics = launch_types::BallMetrics {
            ball_speed_mps: 50.0,
            vertical_angle_deg: 12.0,
            horizontal_angle_deg: -3.0,
            total_spin_rpm: 3000,
            spin_axis_deg: 5.0,
            backspin_rpm: 2800,
            sidespin_rpm: 200,
            shot_type: ShotType::Full,
            raw_hex: "00".to_string(),
        };
        let body = ShotDetectedBody::from_metrics(&metrics);
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["ballSpeed"], 50.0 * 2.23694);
        assert_eq!(json["launchDirection"], -3.0);
        assert_eq!(json["sideSpin"], 200);
    }

    #[tokio::test]
    async fn disabled_camera_is_a_no_op() {
        let state = Arc::new(AppState::new(&config()));
        let camera = CameraIntegration::new(state.clone(), config());
        state.camera_enabled.set(false);
        camera.arm().await;
        camera.shot_detected(launch_types::BallMetrics {
            ball_speed_mps: 1.0,
            vertical_angle_deg: 1.0,
            horizontal_angle_deg: 1.0,
            total_spin_rpm: 1,
            spin_axis_deg: 1.0,
            backspin_rpm: 1,
            sidespin_rpm: 1,
            shot_type: ShotType::Full,
            raw_hex: "ff".to_string(),
        }).await;
        // No network calls are made; absence of a panic/hang is the assertion.
    }

    fn club_metrics() -> ClubMetrics {
        ClubMetrics {
            path_angle_deg: 1.0,
            face_angle_deg: 2.0,
            attack_angle_deg: -1.0,
            dynamic_loft_deg: 11.0,
        }
    }

    // Scenario F: ball data (and its filename) can arrive before or after
    // club data; exactly one side observes both halves present regardless
    // of arrival order.
    #[test]
    fn buffer_merge_resolves_when_filename_arrives_second() {
        let mut buffer = ShotBuffer::default();
        assert_eq!(buffer.merge_club_metrics(club_metrics()), None);
        assert_eq!(buffer.merge_filename("shot-1.mp4".to_string()), Some(club_metrics()));
    }

    #[test]
    fn buffer_merge_resolves_when_club_metrics_arrive_second() {
        let mut buffer = ShotBuffer::default();
        assert_eq!(buffer.merge_filename("shot-1.mp4".to_string()), None);
        assert_eq!(
            buffer.merge_club_metrics(club_metrics()),
            Some("shot-1.mp4".to_string())
        );
    }
}
