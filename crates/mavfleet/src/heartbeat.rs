use crate::dialect;
use crate::state::{AutopilotIdentity, AutopilotType, SystemStatus, VehicleType};
use mavlink::MavHeader;
use std::collections::HashMap;

/// Whether a heartbeat comes from something that flies, drives or dives,
/// as opposed to a GCS, gimbal or companion computer.
pub(crate) fn is_autopilot(hb: &dialect::HEARTBEAT_DATA) -> bool {
    hb.autopilot != dialect::MavAutopilot::MAV_AUTOPILOT_INVALID
        && hb.mavtype != dialect::MavType::MAV_TYPE_GCS
}

pub(crate) fn identity_from_heartbeat(
    header: &MavHeader,
    hb: &dialect::HEARTBEAT_DATA,
) -> AutopilotIdentity {
    AutopilotIdentity {
        system_id: header.system_id,
        component_id: header.component_id,
        vehicle_type: VehicleType::from_mav(hb.mavtype),
        autopilot: AutopilotType::from(hb.autopilot),
        base_mode: hb.base_mode.bits(),
        custom_mode: hb.custom_mode,
        system_status: SystemStatus::from(hb.system_status),
    }
}

/// Last autopilot identity per vehicle. A missing entry means "identity
/// unknown", which is distinct from every known family.
#[derive(Debug, Default)]
pub struct HeartbeatTracker {
    identities: HashMap<String, AutopilotIdentity>,
}

impl HeartbeatTracker {
    /// Records an autopilot heartbeat. Non-autopilot heartbeats are ignored
    /// and `None` is returned.
    pub(crate) fn observe(
        &mut self,
        vehicle_id: &str,
        header: &MavHeader,
        hb: &dialect::HEARTBEAT_DATA,
    ) -> Option<AutopilotIdentity> {
        if !is_autopilot(hb) {
            return None;
        }
        let identity = identity_from_heartbeat(header, hb);
        self.record(vehicle_id, identity);
        Some(identity)
    }

    pub fn record(&mut self, vehicle_id: &str, identity: AutopilotIdentity) {
        self.identities.insert(vehicle_id.to_string(), identity);
    }

    pub fn get(&self, vehicle_id: &str) -> Option<AutopilotIdentity> {
        self.identities.get(vehicle_id).copied()
    }

    pub fn forget(&mut self, vehicle_id: &str) {
        self.identities.remove(vehicle_id);
    }
}
