//! Flight-mode name tables per vehicle family.
//!
//! Custom mode numbers follow the ArduPilot firmware assignments and must not
//! be renumbered.

use crate::state::{AutopilotIdentity, AutopilotType, FlightMode, VehicleFamily};

/// Name reported when a code or family has no table entry.
pub const UNKNOWN_MODE: &str = "UNKNOWN";

const COPTER_MODES: &[(u32, &str)] = &[
    (0, "STABILIZE"),
    (1, "ACRO"),
    (2, "ALT_HOLD"),
    (3, "AUTO"),
    (4, "GUIDED"),
    (5, "LOITER"),
    (6, "RTL"),
    (7, "CIRCLE"),
    (9, "LAND"),
    (11, "DRIFT"),
    (13, "SPORT"),
    (14, "FLIP"),
    (15, "AUTOTUNE"),
    (16, "POSHOLD"),
    (17, "BRAKE"),
    (18, "THROW"),
    (19, "AVOID_ADSB"),
    (20, "GUIDED_NOGPS"),
    (21, "SMART_RTL"),
];

const PLANE_MODES: &[(u32, &str)] = &[
    (0, "MANUAL"),
    (1, "CIRCLE"),
    (2, "STABILIZE"),
    (3, "TRAINING"),
    (4, "ACRO"),
    (5, "FBWA"),
    (6, "FBWB"),
    (7, "CRUISE"),
    (8, "AUTOTUNE"),
    (9, "LAND"),
    (10, "AUTO"),
    (11, "RTL"),
    (12, "LOITER"),
    (13, "TAKEOFF"),
    (15, "GUIDED"),
    (17, "QSTABILIZE"),
    (18, "QHOVER"),
    (19, "QLOITER"),
    (20, "QLAND"),
    (21, "QRTL"),
];

const ROVER_MODES: &[(u32, &str)] = &[
    (0, "MANUAL"),
    (1, "ACRO"),
    (3, "STEERING"),
    (4, "HOLD"),
    (5, "LOITER"),
    (6, "FOLLOW"),
    (7, "SIMPLE"),
    (10, "AUTO"),
    (11, "RTL"),
    (12, "SMART_RTL"),
    (15, "GUIDED"),
];

const SUB_MODES: &[(u32, &str)] = &[
    (0, "STABILIZE"),
    (1, "ACRO"),
    (2, "ALT_HOLD"),
    (3, "AUTO"),
    (4, "GUIDED"),
    (7, "CIRCLE"),
    (9, "SURFACE"),
    (16, "POSHOLD"),
    (19, "MANUAL"),
];

// Order matters: the union fallback lists copter codes first.
const KNOWN_FAMILIES: [VehicleFamily; 4] = [
    VehicleFamily::Multirotor,
    VehicleFamily::FixedWing,
    VehicleFamily::Rover,
    VehicleFamily::Submarine,
];

const ALIASES: &[(&str, &str)] = &[
    ("ALTHOLD", "ALT_HOLD"),
    ("DEPTH_HOLD", "ALT_HOLD"),
    ("FLY_BY_WIRE_A", "FBWA"),
    ("FLY_BY_WIRE_B", "FBWB"),
    ("POS_HOLD", "POSHOLD"),
    ("RETURN_TO_LAUNCH", "RTL"),
    ("SMARTRTL", "SMART_RTL"),
];

fn mode_table(family: VehicleFamily) -> &'static [(u32, &'static str)] {
    match family {
        VehicleFamily::Multirotor => COPTER_MODES,
        VehicleFamily::FixedWing => PLANE_MODES,
        VehicleFamily::Rover => ROVER_MODES,
        VehicleFamily::Submarine => SUB_MODES,
        VehicleFamily::Unknown => &[],
    }
}

fn lookup_code(table: &[(u32, &str)], name: &str) -> Option<u32> {
    table
        .iter()
        .find(|(_, mode_name)| *mode_name == name)
        .map(|&(num, _)| num)
}

/// Uppercases, trims and folds separators so "pos hold" and "Pos-Hold" meet
/// the table spelling.
pub fn normalize_mode_name(name: &str) -> String {
    let folded: String = name
        .trim()
        .chars()
        .map(|c| match c {
            ' ' | '-' => '_',
            other => other.to_ascii_uppercase(),
        })
        .collect();
    ALIASES
        .iter()
        .find(|(alias, _)| *alias == folded)
        .map(|(_, canonical)| canonical.to_string())
        .unwrap_or(folded)
}

/// Names that only make sense on a fixed-wing airframe. They resolve to the
/// plane table whatever family is cached.
const FIXED_WING_ONLY: &[&str] = &[
    "FBWA",
    "FBWB",
    "TRAINING",
    "QSTABILIZE",
    "QHOVER",
    "QLOITER",
    "QLAND",
    "QRTL",
];

fn owning_family(name: &str) -> Option<VehicleFamily> {
    FIXED_WING_ONLY
        .contains(&name)
        .then_some(VehicleFamily::FixedWing)
}

pub fn mode_name_for(family: VehicleFamily, custom_mode: u32) -> &'static str {
    mode_table(family)
        .iter()
        .find(|&&(num, _)| num == custom_mode)
        .map(|&(_, name)| name)
        .unwrap_or(UNKNOWN_MODE)
}

/// Ordered candidate custom-mode codes for `requested`.
///
/// Fixed-wing-only names ("FBWA") resolve to the plane table even when the
/// cached family disagrees, since the heartbeat-derived family can be stale.
/// Any other name must exist in the cached family's table; a mode the
/// vehicle does not have yields no candidates. With an unknown family the
/// codes of every table are unioned, copter first.
pub fn candidate_codes_for(family: VehicleFamily, requested: &str) -> Vec<u32> {
    let name = normalize_mode_name(requested);
    if name.is_empty() {
        return Vec::new();
    }

    if let Some(owner) = owning_family(&name) {
        return lookup_code(mode_table(owner), &name).into_iter().collect();
    }

    if family != VehicleFamily::Unknown {
        return lookup_code(mode_table(family), &name).into_iter().collect();
    }

    let mut codes = Vec::new();
    for known in KNOWN_FAMILIES {
        if let Some(code) = lookup_code(mode_table(known), &name) {
            if !codes.contains(&code) {
                codes.push(code);
            }
        }
    }
    codes
}

pub fn available_modes(family: VehicleFamily) -> Vec<FlightMode> {
    mode_table(family)
        .iter()
        .map(|&(num, name)| FlightMode {
            custom_mode: num,
            name: name.to_string(),
        })
        .collect()
}

/// Protocol-level name derived from MAV_MODE_FLAG bits alone.
pub fn generic_mode_name(base_mode: u8) -> &'static str {
    use crate::dialect::MavModeFlag;

    let has = |flag: MavModeFlag| base_mode & flag.bits() != 0;
    if has(MavModeFlag::MAV_MODE_FLAG_AUTO_ENABLED) {
        "AUTO"
    } else if has(MavModeFlag::MAV_MODE_FLAG_GUIDED_ENABLED) {
        "GUIDED"
    } else if has(MavModeFlag::MAV_MODE_FLAG_STABILIZE_ENABLED) {
        "STABILIZE"
    } else if has(MavModeFlag::MAV_MODE_FLAG_MANUAL_INPUT_ENABLED) {
        "MANUAL"
    } else {
        UNKNOWN_MODE
    }
}

/// Display name for a cached identity; falls back to the base-mode flags for
/// non-ArduPilot autopilots or families without a table.
pub fn describe_mode(identity: Option<&AutopilotIdentity>) -> String {
    let Some(identity) = identity else {
        return UNKNOWN_MODE.to_string();
    };
    let family = identity.family();
    if identity.autopilot == AutopilotType::ArduPilot && family != VehicleFamily::Unknown {
        return mode_name_for(family, identity.custom_mode).to_string();
    }
    generic_mode_name(identity.base_mode).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{SystemStatus, VehicleType};

    #[test]
    fn every_table_name_round_trips_in_its_family() {
        for family in KNOWN_FAMILIES {
            for &(_, name) in mode_table(family) {
                let codes = candidate_codes_for(family, name);
                assert!(!codes.is_empty(), "{family:?} {name}");
                assert_eq!(mode_name_for(family, codes[0]), name, "{family:?}");
            }
        }
    }

    #[test]
    fn unknown_family_unions_rtl() {
        let codes = candidate_codes_for(VehicleFamily::Unknown, "RTL");
        assert!(codes.contains(&6));
        assert!(codes.contains(&11));
        assert_eq!(codes[0], 6);
    }

    #[test]
    fn unknown_family_union_is_deduplicated() {
        // STABILIZE is 0 on copter and sub, 2 on plane.
        assert_eq!(candidate_codes_for(VehicleFamily::Unknown, "stabilize"), vec![0, 2]);
    }

    #[test]
    fn fixed_wing_name_overrides_cached_family() {
        assert_eq!(candidate_codes_for(VehicleFamily::Multirotor, "FBWA"), vec![5]);
        assert_eq!(candidate_codes_for(VehicleFamily::Rover, "qhover"), vec![18]);
    }

    #[test]
    fn mode_of_another_family_is_not_borrowed() {
        // 13 is SPORT on copter, 18 is QHOVER on plane.
        assert!(candidate_codes_for(VehicleFamily::Multirotor, "TAKEOFF").is_empty());
        assert!(candidate_codes_for(VehicleFamily::FixedWing, "THROW").is_empty());
        assert!(candidate_codes_for(VehicleFamily::FixedWing, "BRAKE").is_empty());
        assert!(candidate_codes_for(VehicleFamily::Multirotor, "CRUISE").is_empty());
        assert!(candidate_codes_for(VehicleFamily::Multirotor, "HOLD").is_empty());
    }

    #[test]
    fn shared_name_uses_cached_family() {
        assert_eq!(candidate_codes_for(VehicleFamily::Multirotor, "STABILIZE"), vec![0]);
        assert_eq!(candidate_codes_for(VehicleFamily::FixedWing, "STABILIZE"), vec![2]);
        assert_eq!(candidate_codes_for(VehicleFamily::Submarine, "POSHOLD"), vec![16]);
    }

    #[test]
    fn name_missing_from_cached_family_is_empty() {
        assert!(candidate_codes_for(VehicleFamily::Rover, "ALT_HOLD").is_empty());
        assert!(candidate_codes_for(VehicleFamily::Unknown, "WARP").is_empty());
        assert!(candidate_codes_for(VehicleFamily::Multirotor, "  ").is_empty());
    }

    #[test]
    fn aliases_and_separators_normalize() {
        assert_eq!(normalize_mode_name(" pos-hold "), "POSHOLD");
        assert_eq!(normalize_mode_name("alt hold"), "ALT_HOLD");
        assert_eq!(candidate_codes_for(VehicleFamily::Submarine, "depth_hold"), vec![2]);
        assert_eq!(candidate_codes_for(VehicleFamily::Unknown, "fly_by_wire_a"), vec![5]);
    }

    #[test]
    fn unknown_code_and_family_names() {
        assert_eq!(mode_name_for(VehicleFamily::Multirotor, 999), UNKNOWN_MODE);
        assert_eq!(mode_name_for(VehicleFamily::Unknown, 0), UNKNOWN_MODE);
    }

    #[test]
    fn available_modes_follow_tables() {
        assert_eq!(available_modes(VehicleFamily::Rover).len(), ROVER_MODES.len());
        assert!(available_modes(VehicleFamily::Unknown).is_empty());
    }

    fn identity(
        autopilot: AutopilotType,
        vehicle_type: VehicleType,
        base_mode: u8,
    ) -> AutopilotIdentity {
        AutopilotIdentity {
            system_id: 1,
            component_id: 1,
            vehicle_type,
            autopilot,
            base_mode,
            custom_mode: 4,
            system_status: SystemStatus::Standby,
        }
    }

    #[test]
    fn describe_mode_prefers_family_table() {
        let copter = identity(AutopilotType::ArduPilot, VehicleType::Quadrotor, 0);
        assert_eq!(describe_mode(Some(&copter)), "GUIDED");
        let px4 = identity(AutopilotType::Px4, VehicleType::Quadrotor, 0x04);
        assert_eq!(describe_mode(Some(&px4)), "AUTO");
        assert_eq!(describe_mode(None), UNKNOWN_MODE);
    }
}
