//! Runtime configuration, assembled from environment variables with
//! documented defaults. Mirrors the `UwbHubConfig::default()` pattern: every
//! field reads `std::env::var(..).ok().and_then(|v| v.parse().ok())` and
//! falls back to a literal default rather than failing startup.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub simulator_host: String,
    pub simulator_port: u16,
    pub camera_base_url: String,
    pub heartbeat_period: Duration,
    pub reconnect_initial_backoff: Duration,
    pub reconnect_max_backoff: Duration,
    pub reconnect_max_attempts: Option<u32>,
    pub reconnect_max_window: Option<Duration>,
    pub simulator_read_deadline: Duration,
    pub http_timeout: Duration,
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            simulator_host: std::env::var("BRIDGE_SIMULATOR_HOST")
                .unwrap_or_else(|_| "127.0.0.1".to_string()),
            simulator_port: env_parse("BRIDGE_SIMULATOR_PORT", 921),
            camera_base_url: std::env::var("BRIDGE_CAMERA_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:5000".to_string()),
            heartbeat_period: Duration::from_secs(env_parse("BRIDGE_HEARTBEAT_SECS", 5)),
            reconnect_initial_backoff: Duration::from_millis(env_parse(
                "BRIDGE_RECONNECT_INITIAL_BACKOFF_MS",
                1000,
            )),
            reconnect_max_backoff: Duration::from_secs(env_parse(
                "BRIDGE_RECONNECT_MAX_BACKOFF_SECS",
                60,
            )),
            reconnect_max_attempts: std::env::var("BRIDGE_RECONNECT_MAX_ATTEMPTS")
                .ok()
                .and_then(|v| v.parse().ok()),
            reconnect_max_window: std::env::var("BRIDGE_RECONNECT_MAX_WINDOW_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs),
            simulator_read_deadline: Duration::from_secs(env_parse(
                "BRIDGE_SIMULATOR_READ_DEADLINE_SECS",
                10,
            )),
            http_timeout: Duration::from_secs(env_parse("BRIDGE_HTTP_TIMEOUT_SECS", 10)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        // SAFETY: test runs serially within this module; no concurrent env mutation.
        for key in [
            "BRIDGE_SIMULATOR_HOST",
            "BRIDGE_SIMULATOR_PORT",
            "BRIDGE_CAMERA_BASE_URL",
            "BRIDGE_HEARTBEAT_SECS",
        ] {
            std::env::remove_var(key);
        }
        let cfg = BridgeConfig::default();
        assert_eq!(cfg.simulator_host, "127.0.0.1");
        assert_eq!(cfg.simulator_port, 921);
        assert_eq!(cfg.camera_base_url, "http://localhost:5000");
        assert_eq!(cfg.heartbeat_period, Duration::from_secs(5));
    }
}
