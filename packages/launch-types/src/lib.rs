//! # launch-types
//!
//! Shared wire-level types for the launch monitor BLE protocol.
//!
//! These are used by:
//! - `launch-monitor-bridge`: decoding device notifications and encoding
//!   outbound commands over the `CMD`/`NOTIFY`/`BATTERY` characteristics.
//! - `mock-device`: producing scripted notification bytes that exercise the
//!   bridge without real hardware.
//!
//! ## Wire conventions
//!
//! - All multi-byte numeric fields are little-endian.
//! - Angles and speeds are transmitted as hundredths of a unit (signed
//!   16-bit), divided by 100.0 on decode.
//! - The sequence byte is a rotating mod-256 counter assigned by the sender.

use serde::{Deserialize, Serialize};

// ── Characteristic identifiers ────────────────────────────────────────────────

/// Write target for outbound commands.
pub const CHAR_CMD: &str = "86602101-6b7e-439a-bdd1-489a3213e9bb";
/// Primary notification source.
pub const CHAR_NOTIFY: &str = "86602102-6b7e-439a-bdd1-489a3213e9bb";
/// Standard GATT battery level characteristic (single unsigned byte).
pub const CHAR_BATTERY: &str = "00002a19-0000-1000-8000-00805f9b34fb";

// ── Connection state ──────────────────────────────────────────────────────────

/// Lifecycle of a BLE (or simulator TCP) connection. Transitions are
/// monotonic under the owning manager's serialized lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Error(String),
}

impl Default for ConnectionStatus {
    fn default() -> Self {
        Self::Disconnected
    }
}

impl ConnectionStatus {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

// ── 3D integer position ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position3 {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

// ── Sensor frame ───────────────────────────────────────────────────────────────

/// Decoded `11 01 ..` notification: ball presence/readiness and tray position.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SensorFrame {
    pub ball_detected: bool,
    pub ball_ready: bool,
    pub position: Position3,
}

// ── Shot type ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShotType {
    Full,
    Putt,
}

// ── Ball metrics ───────────────────────────────────────────────────────────────

/// Decoded `11 02 37 ..` (Full) / `11 02 13 ..` (Putt) notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BallMetrics {
    pub ball_speed_mps: f64,
    pub vertical_angle_deg: f64,
    pub horizontal_angle_deg: f64,
    pub total_spin_rpm: i16,
    pub spin_axis_deg: f64,
    pub backspin_rpm: i16,
    pub sidespin_rpm: i16,
    pub shot_type: ShotType,
    /// Raw hex payload of the decoded notification, used for duplicate
    /// suppression (the controller re-emits only when this differs from the
    /// previously stored value).
    pub raw_hex: String,
}

// ── Club metrics ───────────────────────────────────────────────────────────────

/// Decoded `11 07 0f ..` notification.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClubMetrics {
    pub path_angle_deg: f64,
    pub face_angle_deg: f64,
    pub attack_angle_deg: f64,
    pub dynamic_loft_deg: f64,
}

// ── Alignment ──────────────────────────────────────────────────────────────────

/// Decoded `11 82 ..` notification, received only on the NOTIFY channel.
/// Aligned iff `aim_angle_deg` lies in `[-2.0, 2.0]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AlignmentData {
    pub aim_angle_deg: f64,
    pub is_aligned: bool,
}

pub const ALIGNMENT_TOLERANCE_DEG: f64 = 2.0;

impl AlignmentData {
    pub fn from_angle(aim_angle_deg: f64) -> Self {
        Self {
            aim_angle_deg,
            is_aligned: (-ALIGNMENT_TOLERANCE_DEG..=ALIGNMENT_TOLERANCE_DEG)
                .contains(&aim_angle_deg),
        }
    }
}

// ── Handedness / spin mode ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Handedness {
    Right,
    Left,
}

impl Handedness {
    pub fn wire_bit(self) -> u8 {
        match self {
            Handedness::Right => 0,
            Handedness::Left => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpinMode {
    Standard,
    Advanced,
}

impl Default for SpinMode {
    fn default() -> Self {
        SpinMode::Advanced
    }
}

impl SpinMode {
    pub fn wire_bit(self) -> u8 {
        match self {
            SpinMode::Standard => 0,
            SpinMode::Advanced => 1,
        }
    }
}

// ── Club catalog ───────────────────────────────────────────────────────────────

/// Physical club identifiers. Each variant carries two 2-byte hex codes used
/// by outbound commands: `regular` (normal club selection) and
/// `swing_stick` (the swing-stick attachment for that club).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClubId {
    Putter,
    Driver,
    Wood3,
    Wood5,
    Wood7,
    Iron4,
    Iron5,
    Iron6,
    Iron7,
    Iron8,
    Iron9,
    PitchingWedge,
    ApproachWedge,
    SandWedge,
}

impl ClubId {
    /// `(regular, swing_stick)` 2-byte hex codes. The only value pinned by a
    /// behavioral contract is `Driver`'s regular code (`02 04`, fixed by the
    /// scenario-B wire trace); the remaining codes follow the same
    /// `[club_index, category_marker]` shape, with `04` for regular
    /// selection and `05` for the swing-stick attachment of the same club.
    pub fn codes(self) -> (&'static str, &'static str) {
        match self {
            ClubId::Putter => ("0104", "0105"),
            ClubId::Driver => ("0204", "0205"),
            ClubId::Wood3 => ("0304", "0305"),
            ClubId::Wood5 => ("0404", "0405"),
            ClubId::Wood7 => ("0504", "0505"),
            ClubId::Iron4 => ("0604", "0605"),
            ClubId::Iron5 => ("0704", "0705"),
            ClubId::Iron6 => ("0804", "0805"),
            ClubId::Iron7 => ("0904", "0905"),
            ClubId::Iron8 => ("0a04", "0a05"),
            ClubId::Iron9 => ("0b04", "0b05"),
            ClubId::PitchingWedge => ("0c04", "0c05"),
            ClubId::ApproachWedge => ("0d04", "0d05"),
            ClubId::SandWedge => ("0e04", "0e05"),
        }
    }

    pub fn regular_code(self) -> &'static str {
        self.codes().0
    }

    pub fn swing_stick_code(self) -> &'static str {
        self.codes().1
    }

    /// Short display form used by the simulator integration (`2W`, `PUTT`, ...).
    pub fn short_name(self) -> &'static str {
        match self {
            ClubId::Putter => "PUTT",
            ClubId::Driver => "DR",
            ClubId::Wood3 => "3W",
            ClubId::Wood5 => "5W",
            ClubId::Wood7 => "7W",
            ClubId::Iron4 => "4I",
            ClubId::Iron5 => "5I",
            ClubId::Iron6 => "6I",
            ClubId::Iron7 => "7I",
            ClubId::Iron8 => "8I",
            ClubId::Iron9 => "9I",
            ClubId::PitchingWedge => "PW",
            ClubId::ApproachWedge => "AW",
            ClubId::SandWedge => "SW",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alignment_tolerance_boundaries() {
        assert!(AlignmentData::from_angle(2.0).is_aligned);
        assert!(AlignmentData::from_angle(-2.0).is_aligned);
        assert!(!AlignmentData::from_angle(2.01).is_aligned);
        assert!(!AlignmentData::from_angle(-2.01).is_aligned);
    }

    #[test]
    fn club_codes_are_distinct() {
        let all = [
            ClubId::Putter,
            ClubId::Driver,
            ClubId::Wood3,
            ClubId::Wood5,
            ClubId::Wood7,
            ClubId::Iron4,
            ClubId::Iron5,
            ClubId::Iron6,
            ClubId::Iron7,
            ClubId::Iron8,
            ClubId::Iron9,
            ClubId::PitchingWedge,
            ClubId::ApproachWedge,
            ClubId::SandWedge,
        ];
        let mut regular_codes: Vec<_> = all.iter().map(|c| c.regular_code()).collect();
        regular_codes.sort();
        regular_codes.dedup();
        assert_eq!(regular_codes.len(), all.len());
    }
}
