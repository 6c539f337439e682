//! Binary framing codec for the launch monitor's proprietary BLE protocol.
//!
//! Outbound commands are built as raw byte vectors ready for
//! `BleTransport::write`; inbound notifications are classified by their
//! leading bytes and decoded into [`DecodedFrame`] per the wire contract in
//! `SPEC_FULL.md` §4.1. Byte offsets and multi-byte encodings below are
//! behavioral contracts verified against literal scenario vectors in the
//! unit tests at the bottom of this file — do not "clean up" an offset
//! without checking a test first.

use launch_types::{
    AlignmentData, BallMetrics, ClubId, ClubMetrics, Handedness, Position3, SensorFrame, ShotType,
    SpinMode,
};
use thiserror::Error;

// ── Errors ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Error, PartialEq)]
pub enum ParseError {
    #[error("frame too short: expected at least {expected} bytes, got {actual}")]
    TooShort { expected: usize, actual: usize },
}

// ── Outbound commands ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectMode {
    Deactivate,
    Activate,
}

impl DetectMode {
    fn wire_bit(self) -> u8 {
        match self {
            DetectMode::Deactivate => 0,
            DetectMode::Activate => 1,
        }
    }
}

/// A command destined for the `CMD` characteristic. `seq` is assigned by the
/// caller (the controller's rotating mod-256 counter).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    Heartbeat {
        seq: u8,
    },
    DetectBall {
        seq: u8,
        mode: DetectMode,
        spin: SpinMode,
    },
    Club {
        seq: u8,
        club: ClubId,
        handed: Handedness,
    },
    SwingStick {
        seq: u8,
        club: ClubId,
        handed: Handedness,
    },
    AlignmentStick {
        seq: u8,
        handed: Handedness,
    },
    Alignment {
        seq: u8,
        confirm: bool,
        angle_deg: f64,
    },
    RequestClubMetrics {
        seq: u8,
    },
    GetOsVersion {
        seq: u8,
    },
}

impl Command {
    pub fn start_alignment(seq: u8) -> Self {
        Command::Alignment {
            seq,
            confirm: false,
            angle_deg: 0.0,
        }
    }

    pub fn stop_alignment(seq: u8, angle_deg: f64) -> Self {
        Command::Alignment {
            seq,
            confirm: true,
            angle_deg,
        }
    }

    pub fn cancel_alignment(seq: u8, angle_deg: f64) -> Self {
        Command::Alignment {
            seq,
            confirm: false,
            angle_deg,
        }
    }

    /// Encode into the exact byte sequence written to the `CMD` characteristic.
    pub fn encode(&self) -> Vec<u8> {
        match *self {
            Command::Heartbeat { seq } => vec![0x11, 0x83, seq, 0x00, 0x00, 0x00, 0x00, 0x00],
            Command::DetectBall { seq, mode, spin } => vec![
                0x11,
                0x81,
                seq,
                mode.wire_bit(),
                0x10 | spin.wire_bit(),
                0x00,
                0x00,
                0x00,
                0x00,
            ],
            Command::Club { seq, club, handed } => {
                let (hi, lo) = split_hex2(club.regular_code());
                vec![0x11, 0x82, seq, hi, lo, handed.wire_bit(), 0x00, 0x00, 0x00]
            }
            Command::SwingStick { seq, club, handed } => {
                let (hi, lo) = split_hex2(club.swing_stick_code());
                vec![0x11, 0x82, seq, hi, lo, handed.wire_bit(), 0x00, 0x00]
            }
            Command::AlignmentStick { seq, handed } => {
                vec![0x11, 0x82, seq, 0x08, 0x08, handed.wire_bit(), 0x00, 0x00, 0x00]
            }
            Command::Alignment {
                seq,
                confirm,
                angle_deg,
            } => {
                let hundredths = (angle_deg * 100.0).round() as i32;
                let mut bytes = vec![0x11, 0x85, seq, confirm as u8];
                bytes.extend_from_slice(&hundredths.to_le_bytes());
                bytes
            }
            Command::RequestClubMetrics { seq } => {
                vec![0x11, 0x87, seq, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]
            }
            Command::GetOsVersion { seq } => vec![0x11, 0x92, seq, 0x00, 0x00, 0x00, 0x00, 0x00],
        }
    }
}

/// Split a 2-byte hex code like `"0204"` into its two raw bytes.
fn split_hex2(code: &str) -> (u8, u8) {
    let bytes = hex::decode(code).unwrap_or_else(|_| vec![0, 0]);
    (bytes[0], bytes[1])
}

// ── Inbound notifications ───────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum DecodedFrame {
    Sensor(SensorFrame),
    BallMetrics(BallMetrics),
    ClubMetrics(ClubMetrics),
    NoClubData,
    OsVersion { major: u8, minor: u8 },
    Alignment(AlignmentData),
    DeviceHeartbeat,
    /// Header not recognized. Callers must ignore, not error.
    Unknown,
}

fn byte_at(buf: &[u8], idx: usize) -> u8 {
    buf.get(idx).copied().unwrap_or(0)
}

fn i16_le_at(buf: &[u8], idx: usize) -> i16 {
    i16::from_le_bytes([byte_at(buf, idx), byte_at(buf, idx + 1)])
}

fn i32_le_at(buf: &[u8], idx: usize) -> i32 {
    i32::from_le_bytes([
        byte_at(buf, idx),
        byte_at(buf, idx + 1),
        byte_at(buf, idx + 2),
        byte_at(buf, idx + 3),
    ])
}

fn hundredths_at(buf: &[u8], idx: usize) -> f64 {
    i16_le_at(buf, idx) as f64 / 100.0
}

/// Decode a notification received on the `NOTIFY` characteristic.
///
/// Frames shorter than the minimum length for their matched kind return
/// `Err`; an unrecognized header is not an error — it decodes to
/// [`DecodedFrame::Unknown`] and callers simply ignore it.
pub fn decode_notification(raw: &[u8]) -> Result<DecodedFrame, ParseError> {
    if raw.len() < 2 {
        return Ok(DecodedFrame::Unknown);
    }
    if raw[0] != 0x11 {
        return Ok(DecodedFrame::Unknown);
    }

    match raw[1] {
        0x01 => {
            require_len(raw, 17)?;
            let ready_byte = raw[3];
            let detected_byte = raw[4];
            Ok(DecodedFrame::Sensor(SensorFrame {
                ball_detected: detected_byte == 1,
                ball_ready: ready_byte == 1 || ready_byte == 2,
                position: Position3 {
                    x: i32_le_at(raw, 5),
                    y: i32_le_at(raw, 9),
                    z: i32_le_at(raw, 13),
                },
            }))
        }
        0x02 if raw.len() >= 3 && (raw[2] == 0x37 || raw[2] == 0x13) => {
            require_len(raw, 17)?;
            let shot_type = if raw[2] == 0x37 {
                ShotType::Full
            } else {
                ShotType::Putt
            };
            Ok(DecodedFrame::BallMetrics(BallMetrics {
                ball_speed_mps: hundredths_at(raw, 3),
                vertical_angle_deg: hundredths_at(raw, 5),
                horizontal_angle_deg: hundredths_at(raw, 7),
                total_spin_rpm: i16_le_at(raw, 9),
                spin_axis_deg: hundredths_at(raw, 11),
                backspin_rpm: i16_le_at(raw, 13),
                sidespin_rpm: i16_le_at(raw, 15),
                shot_type,
                raw_hex: hex::encode(raw),
            }))
        }
        0x03 => {
            require_len(raw, 2)?;
            Ok(DecodedFrame::DeviceHeartbeat)
        }
        0x07 if raw.len() >= 3 && raw[2] == 0x0f => {
            require_len(raw, 11)?;
            Ok(DecodedFrame::ClubMetrics(ClubMetrics {
                path_angle_deg: hundredths_at(raw, 3),
                face_angle_deg: hundredths_at(raw, 5),
                attack_angle_deg: hundredths_at(raw, 7),
                dynamic_loft_deg: hundredths_at(raw, 9),
            }))
        }
        0x07 if raw.len() >= 3 && raw[2] == 0x00 => {
            require_len(raw, 3)?;
            Ok(DecodedFrame::NoClubData)
        }
        0x10 => {
            require_len(raw, 4)?;
            Ok(DecodedFrame::OsVersion {
                major: raw[2],
                minor: raw[3],
            })
        }
        0x82 => {
            require_len(raw, 5)?;
            let angle = hundredths_at(raw, 3);
            Ok(DecodedFrame::Alignment(AlignmentData::from_angle(angle)))
        }
        _ => Ok(DecodedFrame::Unknown),
    }
}

fn require_len(raw: &[u8], min: usize) -> Result<(), ParseError> {
    if raw.len() < min {
        Err(ParseError::TooShort {
            expected: min,
            actual: raw.len(),
        })
    } else {
        Ok(())
    }
}

/// Decode a single-byte battery-level notification. Empty payloads are
/// ignored per the controller's notification-handling table.
pub fn decode_battery(raw: &[u8]) -> Option<u8> {
    raw.first().copied()
}

/// Format an OS version notification's raw bytes as `"{major}.{minor}"`,
/// rendering each byte as its own hex digits ("using hex bytes verbatim").
pub fn format_os_version(major: u8, minor: u8) -> String {
    format!("{}.{}", hex::encode([major]), hex::encode([minor]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use launch_types::{ClubId, Handedness};

    // Scenario A: heartbeat seq 15.
    #[test]
    fn heartbeat_encoding() {
        let bytes = Command::Heartbeat { seq: 15 }.encode();
        assert_eq!(bytes, vec![0x11, 0x83, 0x0f, 0x00, 0x00, 0x00, 0x00, 0x00]);
    }

    // Scenario B: activate detection, Driver, Right, Advanced, seq 0.
    #[test]
    fn activate_detection_sequence() {
        let club = Command::Club {
            seq: 0,
            club: ClubId::Driver,
            handed: Handedness::Right,
        }
        .encode();
        assert_eq!(
            club,
            vec![0x11, 0x82, 0x00, 0x02, 0x04, 0x00, 0x00, 0x00, 0x00]
        );

        let detect = Command::DetectBall {
            seq: 1,
            mode: DetectMode::Activate,
            spin: SpinMode::Advanced,
        }
        .encode();
        assert_eq!(
            detect,
            vec![0x11, 0x81, 0x01, 0x01, 0x11, 0x00, 0x00, 0x00, 0x00]
        );
    }

    // Scenario C: sensor frame decode.
    #[test]
    fn sensor_frame_decode() {
        let raw = [
            0x11, 0x01, 0x00, 0x02, 0x01, 0x0A, 0x00, 0x00, 0x00, 0x14, 0x00, 0x00, 0x00, 0x1E,
            0x00, 0x00, 0x00,
        ];
        let frame = decode_notification(&raw).unwrap();
        assert_eq!(
            frame,
            DecodedFrame::Sensor(SensorFrame {
                ball_detected: true,
                ball_ready: true,
                position: Position3 { x: 10, y: 20, z: 30 },
            })
        );
    }

    // Scenario D: ball metrics decode, followed (at controller level) by
    // exactly one RequestClubMetrics — codec-level assertion covers only
    // the decode half of the scenario.
    #[test]
    fn ball_metrics_decode() {
        let raw = [
            0x11, 0x02, 0x37, 0x64, 0x00, 0xC8, 0x00, 0x2C, 0x01, 0xE8, 0x03, 0xF4, 0x01, 0xD0,
            0x07, 0xB8, 0x0B,
        ];
        let frame = decode_notification(&raw).unwrap();
        match frame {
            DecodedFrame::BallMetrics(m) => {
                assert_eq!(m.ball_speed_mps, 1.00);
                assert_eq!(m.vertical_angle_deg, 2.00);
                assert_eq!(m.horizontal_angle_deg, 3.00);
                assert_eq!(m.total_spin_rpm, 1000);
                assert_eq!(m.spin_axis_deg, 5.00);
                assert_eq!(m.backspin_rpm, 2000);
                assert_eq!(m.sidespin_rpm, 3000);
                assert_eq!(m.shot_type, ShotType::Full);
            }
            other => panic!("expected BallMetrics, got {other:?}"),
        }
    }

    #[test]
    fn putt_ball_metrics_header() {
        let mut raw = vec![0x11, 0x02, 0x13];
        raw.extend_from_slice(&[0u8; 14]);
        let frame = decode_notification(&raw).unwrap();
        assert!(matches!(
            frame,
            DecodedFrame::BallMetrics(BallMetrics {
                shot_type: ShotType::Putt,
                ..
            })
        ));
    }

    #[test]
    fn too_short_frame_is_rejected() {
        let raw = [0x11, 0x01, 0x00];
        assert_eq!(
            decode_notification(&raw),
            Err(ParseError::TooShort {
                expected: 17,
                actual: 3
            })
        );
    }

    #[test]
    fn unknown_header_is_ignored_not_errored() {
        let raw = [0x11, 0xFF, 0x00, 0x00];
        assert_eq!(decode_notification(&raw), Ok(DecodedFrame::Unknown));
    }

    #[test]
    fn no_club_data_signal() {
        let raw = [0x11, 0x07, 0x00];
        assert_eq!(decode_notification(&raw), Ok(DecodedFrame::NoClubData));
    }

    #[test]
    fn os_version_hex_verbatim() {
        assert_eq!(format_os_version(0x01, 0x0a), "01.0a");
    }

    #[test]
    fn request_club_metrics_opcode() {
        let bytes = Command::RequestClubMetrics { seq: 7 }.encode();
        assert_eq!(bytes[0], 0x11);
        assert_eq!(bytes[1], 0x87);
    }

    #[test]
    fn sequence_wraps_modulo_256() {
        // Property 1: encoded seq byte equals the input seq byte verbatim;
        // wrap-around discipline itself is the controller's responsibility
        // (see controller::tests::sequence_wraps_modulo_256).
        let bytes = Command::Heartbeat { seq: 255 }.encode();
        assert_eq!(bytes[2], 255);
    }
}
