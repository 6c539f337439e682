//! Mapping from the simulator's club-code strings to [`ClubId`].
//!
//! The simulator's vocabulary is coarser than the device's club catalog (it
//! has no dedicated hybrid or low-iron codes), so several simulator codes
//! collapse onto the nearest device club. Unmapped codes are logged and
//! ignored by the caller rather than treated as an error.

use launch_types::ClubId;

pub fn from_simulator_code(code: &str) -> Option<ClubId> {
    match code.to_ascii_uppercase().as_str() {
        "PT" => Some(ClubId::Putter),
        "DR" => Some(ClubId::Driver),
        "W2" | "W3" => Some(ClubId::Wood3),
        "W4" | "W5" => Some(ClubId::Wood5),
        "W6" | "W7" => Some(ClubId::Wood7),
        "H2" | "H3" | "H4" | "H5" => Some(ClubId::Wood3),
        "H6" => Some(ClubId::Wood5),
        "H7" => Some(ClubId::Iron4),
        "I1" | "I2" => Some(ClubId::Wood3),
        "I3" => Some(ClubId::Wood5),
        "I4" => Some(ClubId::Iron4),
        "I5" => Some(ClubId::Iron5),
        "I6" => Some(ClubId::Iron6),
        "I7" => Some(ClubId::Iron7),
        "I8" => Some(ClubId::Iron8),
        "I9" => Some(ClubId::Iron9),
        "PW" => Some(ClubId::PitchingWedge),
        "AW" | "GW" => Some(ClubId::ApproachWedge),
        "SW" | "LW" => Some(ClubId::SandWedge),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_codes_map() {
        assert_eq!(from_simulator_code("DR"), Some(ClubId::Driver));
        assert_eq!(from_simulator_code("pw"), Some(ClubId::PitchingWedge));
        assert_eq!(from_simulator_code("GW"), Some(ClubId::ApproachWedge));
        assert_eq!(from_simulator_code("LW"), Some(ClubId::SandWedge));
    }

    #[test]
    fn unmapped_code_is_none() {
        assert_eq!(from_simulator_code("ZZ"), None);
    }
}
