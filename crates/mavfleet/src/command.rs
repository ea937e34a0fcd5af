use crate::dialect::{self, MavCmd, MavMessage, MavModeFlag};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// High-level commands that are sent without waiting for an acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    Arm,
    Disarm,
    Takeoff,
    Land,
    #[serde(alias = "return_to_launch")]
    Rtl,
    Pause,
}

impl CommandKind {
    pub fn mav_cmd(self) -> MavCmd {
        match self {
            CommandKind::Arm | CommandKind::Disarm => MavCmd::MAV_CMD_COMPONENT_ARM_DISARM,
            CommandKind::Takeoff => MavCmd::MAV_CMD_NAV_TAKEOFF,
            CommandKind::Land => MavCmd::MAV_CMD_NAV_LAND,
            CommandKind::Rtl => MavCmd::MAV_CMD_NAV_RETURN_TO_LAUNCH,
            CommandKind::Pause => MavCmd::MAV_CMD_DO_PAUSE_CONTINUE,
        }
    }

    pub(crate) fn params(self, takeoff_altitude_m: f32) -> [f32; 7] {
        match self {
            CommandKind::Arm => [1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
            CommandKind::Disarm => [0.0; 7],
            CommandKind::Takeoff => [0.0, 0.0, 0.0, 0.0, 0.0, 0.0, takeoff_altitude_m],
            CommandKind::Land | CommandKind::Rtl => [0.0; 7],
            // param1 = 0 holds position, 1 would continue.
            CommandKind::Pause => [0.0; 7],
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CommandKind::Arm => "arm",
            CommandKind::Disarm => "disarm",
            CommandKind::Takeoff => "takeoff",
            CommandKind::Land => "land",
            CommandKind::Rtl => "rtl",
            CommandKind::Pause => "pause",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown command '{0}'")]
pub struct UnknownCommand(pub String);

impl FromStr for CommandKind {
    type Err = UnknownCommand;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "arm" => Ok(CommandKind::Arm),
            "disarm" => Ok(CommandKind::Disarm),
            "takeoff" => Ok(CommandKind::Takeoff),
            "land" => Ok(CommandKind::Land),
            "rtl" | "return_to_launch" => Ok(CommandKind::Rtl),
            "pause" | "hold" => Ok(CommandKind::Pause),
            _ => Err(UnknownCommand(s.to_string())),
        }
    }
}

/// System/component a frame is addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Target {
    pub system_id: u8,
    pub component_id: u8,
}

pub(crate) fn command_long(
    target: Target,
    command: MavCmd,
    confirmation: u8,
    params: [f32; 7],
) -> MavMessage {
    MavMessage::COMMAND_LONG(dialect::COMMAND_LONG_DATA {
        target_system: target.system_id,
        target_component: target.component_id,
        command,
        confirmation,
        param1: params[0],
        param2: params[1],
        param3: params[2],
        param4: params[3],
        param5: params[4],
        param6: params[5],
        param7: params[6],
    })
}

/// DO_SET_MODE with the custom-mode flag set: the acknowledged path.
pub(crate) fn set_mode_frame(target: Target, custom_mode: u32) -> MavMessage {
    let base = MavModeFlag::MAV_MODE_FLAG_CUSTOM_MODE_ENABLED.bits() as f32;
    command_long(
        target,
        MavCmd::MAV_CMD_DO_SET_MODE,
        0,
        [base, custom_mode as f32, 0.0, 0.0, 0.0, 0.0, 0.0],
    )
}

/// Second attempt after an unacknowledged set-mode. Keeps the base-mode bits
/// last seen in a heartbeat and forces the custom-mode flag.
///
/// SET_MODE's `base_mode` is typed as `MavMode` by the codec, which cannot
/// carry the custom-mode flag, so this goes out as a retransmitted
/// DO_SET_MODE with `confirmation = 1` instead.
pub(crate) fn legacy_set_mode_frame(
    target: Target,
    base_mode: u8,
    custom_mode: u32,
) -> MavMessage {
    let base = base_mode | MavModeFlag::MAV_MODE_FLAG_CUSTOM_MODE_ENABLED.bits();
    command_long(
        target,
        MavCmd::MAV_CMD_DO_SET_MODE,
        1,
        [base as f32, custom_mode as f32, 0.0, 0.0, 0.0, 0.0, 0.0],
    )
}

/// The periodic GCS heartbeat.
pub(crate) fn gcs_heartbeat() -> MavMessage {
    MavMessage::HEARTBEAT(dialect::HEARTBEAT_DATA {
        custom_mode: 0,
        mavtype: dialect::MavType::MAV_TYPE_GCS,
        autopilot: dialect::MavAutopilot::MAV_AUTOPILOT_INVALID,
        base_mode: MavModeFlag::empty(),
        system_status: dialect::MavState::MAV_STATE_ACTIVE,
        mavlink_version: 3,
    })
}
