use crate::dialect;
use serde::{Deserialize, Serialize};

/// Last heartbeat-derived identity of a vehicle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutopilotIdentity {
    pub system_id: u8,
    pub component_id: u8,
    pub vehicle_type: VehicleType,
    pub autopilot: AutopilotType,
    /// Raw MAV_MODE_FLAG bits.
    pub base_mode: u8,
    pub custom_mode: u32,
    pub system_status: SystemStatus,
}

impl AutopilotIdentity {
    pub fn family(&self) -> VehicleFamily {
        self.vehicle_type.family()
    }

    pub fn armed(&self) -> bool {
        self.base_mode & dialect::MavModeFlag::MAV_MODE_FLAG_SAFETY_ARMED.bits() != 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkState {
    Connected,
    Error(String),
}

impl Default for LinkState {
    fn default() -> Self {
        LinkState::Connected
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlightMode {
    pub custom_mode: u32,
    pub name: String,
}

/// Mode-table family. Custom mode numbers only mean something within one family.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VehicleFamily {
    Multirotor,
    FixedWing,
    Rover,
    Submarine,
    #[default]
    Unknown,
}

// --- Conversions from MAVLink enums ---

/// MAV_STATE as reported in the vehicle's heartbeat.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemStatus {
    #[default]
    Uninitialized,
    Booting,
    Calibrating,
    Standby,
    Active,
    Critical,
    Emergency,
    PoweringOff,
    FlightTermination,
}

impl From<dialect::MavState> for SystemStatus {
    fn from(state: dialect::MavState) -> Self {
        use dialect::MavState as S;
        match state {
            S::MAV_STATE_BOOT => Self::Booting,
            S::MAV_STATE_CALIBRATING => Self::Calibrating,
            S::MAV_STATE_STANDBY => Self::Standby,
            S::MAV_STATE_ACTIVE => Self::Active,
            S::MAV_STATE_CRITICAL => Self::Critical,
            S::MAV_STATE_EMERGENCY => Self::Emergency,
            S::MAV_STATE_POWEROFF => Self::PoweringOff,
            S::MAV_STATE_FLIGHT_TERMINATION => Self::FlightTermination,
            _ => Self::Uninitialized,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VehicleType {
    #[default]
    Unknown,
    FixedWing,
    Quadrotor,
    Hexarotor,
    Octorotor,
    Tricopter,
    Helicopter,
    Coaxial,
    Dodecarotor,
    GroundRover,
    SurfaceBoat,
    Submarine,
    Generic,
}

impl VehicleType {
    pub(crate) fn from_mav(mav_type: dialect::MavType) -> Self {
        use dialect::MavType;
        match mav_type {
            MavType::MAV_TYPE_FIXED_WING => VehicleType::FixedWing,
            MavType::MAV_TYPE_QUADROTOR => VehicleType::Quadrotor,
            MavType::MAV_TYPE_HEXAROTOR => VehicleType::Hexarotor,
            MavType::MAV_TYPE_OCTOROTOR => VehicleType::Octorotor,
            MavType::MAV_TYPE_TRICOPTER => VehicleType::Tricopter,
            MavType::MAV_TYPE_HELICOPTER => VehicleType::Helicopter,
            MavType::MAV_TYPE_COAXIAL => VehicleType::Coaxial,
            MavType::MAV_TYPE_DODECAROTOR => VehicleType::Dodecarotor,
            MavType::MAV_TYPE_GROUND_ROVER => VehicleType::GroundRover,
            MavType::MAV_TYPE_SURFACE_BOAT => VehicleType::SurfaceBoat,
            MavType::MAV_TYPE_SUBMARINE => VehicleType::Submarine,
            MavType::MAV_TYPE_GENERIC => VehicleType::Generic,
            _ => VehicleType::Unknown,
        }
    }

    pub fn family(self) -> VehicleFamily {
        match self {
            VehicleType::Quadrotor
            | VehicleType::Hexarotor
            | VehicleType::Octorotor
            | VehicleType::Tricopter
            | VehicleType::Coaxial
            | VehicleType::Dodecarotor
            | VehicleType::Helicopter => VehicleFamily::Multirotor,
            VehicleType::FixedWing => VehicleFamily::FixedWing,
            VehicleType::GroundRover | VehicleType::SurfaceBoat => VehicleFamily::Rover,
            VehicleType::Submarine => VehicleFamily::Submarine,
            VehicleType::Generic | VehicleType::Unknown => VehicleFamily::Unknown,
        }
    }
}

/// Flight stack behind a heartbeat. Only ArduPilot custom modes are decoded
/// by name; everything else falls back to the base-mode flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutopilotType {
    #[default]
    Unknown,
    ArduPilot,
    Px4,
    /// Any other MAV_AUTOPILOT value, kept by number.
    Other(u8),
}

impl From<dialect::MavAutopilot> for AutopilotType {
    fn from(autopilot: dialect::MavAutopilot) -> Self {
        use dialect::MavAutopilot as A;
        match autopilot {
            A::MAV_AUTOPILOT_ARDUPILOTMEGA => Self::ArduPilot,
            A::MAV_AUTOPILOT_PX4 => Self::Px4,
            A::MAV_AUTOPILOT_INVALID => Self::Unknown,
            other => Self::Other(other as u8),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GpsFixType {
    #[default]
    NoFix,
    Fix2d,
    Fix3d,
    Dgps,
    RtkFloat,
    RtkFixed,
}

impl GpsFixType {
    pub(crate) fn from_raw(fix_type: u8) -> Self {
        match fix_type {
            2 => GpsFixType::Fix2d,
            3 => GpsFixType::Fix3d,
            4 => GpsFixType::Dgps,
            5 => GpsFixType::RtkFloat,
            6 => GpsFixType::RtkFixed,
            _ => GpsFixType::NoFix,
        }
    }
}

// --- Telemetry snapshot ---

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub latitude_deg: f64,
    pub longitude_deg: f64,
    pub absolute_altitude_m: f32,
    pub relative_altitude_m: f32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Attitude {
    pub roll_deg: f32,
    pub pitch_deg: f32,
    pub yaw_deg: f32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Battery {
    pub voltage_v: Option<f32>,
    pub current_a: Option<f32>,
    pub remaining_pct: Option<f32>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Velocity {
    pub north_mps: f32,
    pub east_mps: f32,
    pub down_mps: f32,
    pub groundspeed_mps: f32,
    pub airspeed_mps: f32,
    pub heading_deg: Option<f32>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct GpsInfo {
    pub fix_type: GpsFixType,
    pub satellites_visible: u8,
}

/// Snapshot of the last RADIO_STATUS report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RadioStatus {
    pub rssi: u8,
    pub remote_rssi: u8,
    pub noise: u8,
    pub remote_noise: u8,
    pub tx_buffer_pct: u8,
    pub rx_errors: u16,
    pub fixed: u16,
}

/// Telemetry accumulated by the ingestion pipeline between snapshots.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct Telemetry {
    pub position: Option<Position>,
    pub attitude: Option<Attitude>,
    pub battery: Battery,
    pub velocity: Option<Velocity>,
    pub gps: Option<GpsInfo>,
    pub radio: Option<RadioStatus>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Connected,
    LinkError,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    pub vehicle_id: String,
    pub position: Option<Position>,
    pub attitude: Option<Attitude>,
    pub battery: Battery,
    pub mode_name: String,
    pub armed: bool,
    pub velocity: Option<Velocity>,
    pub gps: Option<GpsInfo>,
    pub radio: Option<RadioStatus>,
    pub connection_status: ConnectionStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleSummary {
    pub vehicle_id: String,
    pub connection_url: String,
    pub vehicle_type: VehicleType,
    pub autopilot: AutopilotType,
    pub link_state: LinkState,
    pub streaming: bool,
}
