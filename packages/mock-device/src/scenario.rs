use serde::Deserialize;

use crate::frames::NotificationFrame;

#[derive(Debug, Clone, Deserialize)]
pub struct Step {
    /// Milliseconds to wait before emitting this frame.
    #[serde(default)]
    pub delay_ms: u64,
    #[serde(flatten)]
    pub frame: NotificationFrame,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Scenario {
    pub steps: Vec<Step>,
}
