//! Single entry point for every decoded inbound frame.
//!
//! Runs under the registry lock and never waits on anything: it updates
//! cached state, wakes acknowledgement waiters and appends to the streaming
//! buffer. Failures are logged per message and never stop the stream.

use crate::buffer::BufferedMessage;
use crate::dialect::{self, MavMessage};
use crate::heartbeat::HeartbeatTracker;
use crate::registry::{Fleet, VehicleSession};
use crate::state::{
    Attitude, AutopilotIdentity, GpsFixType, GpsInfo, Position, RadioStatus, Telemetry, Velocity,
};
use mavlink::{MavHeader, Message};
use tracing::{debug, trace, warn};

#[derive(Debug, thiserror::Error)]
pub(crate) enum IngestError {
    #[error("could not record {name} for streaming: {source}")]
    Record {
        name: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

pub(crate) fn ingest(
    fleet: &mut Fleet,
    vehicle_id: &str,
    generation: u64,
    header: &MavHeader,
    message: &MavMessage,
) {
    let Fleet {
        sessions,
        heartbeats,
        ..
    } = fleet;
    let Some(session) = sessions.get_mut(vehicle_id) else {
        trace!(vehicle = %vehicle_id, "frame for unregistered vehicle dropped");
        return;
    };
    if session.generation != generation {
        trace!(vehicle = %vehicle_id, generation, "frame from stale reader dropped");
        return;
    }
    if let Err(err) = route(session, heartbeats, vehicle_id, header, message) {
        warn!(vehicle = %vehicle_id, "{err}");
    }
}

fn route(
    session: &mut VehicleSession,
    heartbeats: &mut HeartbeatTracker,
    vehicle_id: &str,
    header: &MavHeader,
    message: &MavMessage,
) -> Result<(), IngestError> {
    let identity = heartbeats.get(vehicle_id);
    if from_vehicle(identity.as_ref(), header) {
        apply(session, heartbeats, vehicle_id, header, message);
    } else {
        trace!(
            vehicle = %vehicle_id,
            system_id = header.system_id,
            "frame from another system, state untouched"
        );
    }

    if session.streaming {
        let record = BufferedMessage::decode(header, message).map_err(|source| {
            IngestError::Record {
                name: message.message_name(),
                source,
            }
        })?;
        session.buffer.push(record);
    }
    Ok(())
}

/// Until the first heartbeat, anything on the link counts as the vehicle.
fn from_vehicle(identity: Option<&AutopilotIdentity>, header: &MavHeader) -> bool {
    identity.map_or(true, |id| id.system_id == header.system_id)
}

fn apply(
    session: &mut VehicleSession,
    heartbeats: &mut HeartbeatTracker,
    vehicle_id: &str,
    header: &MavHeader,
    message: &MavMessage,
) {
    match message {
        MavMessage::HEARTBEAT(hb) => {
            if let Some(identity) = heartbeats.observe(vehicle_id, header, hb) {
                trace!(
                    vehicle = %vehicle_id,
                    custom_mode = identity.custom_mode,
                    base_mode = identity.base_mode,
                    "heartbeat"
                );
            }
        }
        MavMessage::COMMAND_ACK(ack) => {
            debug!(
                vehicle = %vehicle_id,
                command = ?ack.command,
                result = ?ack.result,
                "command ack"
            );
            session.acks.record(ack.command, ack.result);
        }
        MavMessage::MAG_CAL_PROGRESS(progress) => {
            session.calibration.on_progress(
                progress.compass_id,
                progress.cal_mask,
                progress.completion_pct,
            );
        }
        MavMessage::MAG_CAL_REPORT(report) => {
            session
                .calibration
                .on_report(report.compass_id, report.cal_mask, report.cal_status);
            if !session.calibration.active {
                debug!(
                    vehicle = %vehicle_id,
                    success = session.calibration.success,
                    "compass calibration finished"
                );
            }
        }
        MavMessage::STATUSTEXT(status) => {
            let text = status_text(status);
            trace!(vehicle = %vehicle_id, severity = ?status.severity, "{text}");
            session.calibration.on_status_text(&text);
        }
        other => update_telemetry(&mut session.telemetry, other),
    }
}

fn status_text(status: &dialect::STATUSTEXT_DATA) -> String {
    let bytes: Vec<u8> = status.text.iter().take_while(|b| **b != 0).copied().collect();
    String::from_utf8_lossy(&bytes).trim().to_string()
}

fn update_telemetry(telemetry: &mut Telemetry, message: &MavMessage) {
    match message {
        MavMessage::GLOBAL_POSITION_INT(data) => {
            telemetry.position = Some(Position {
                latitude_deg: data.lat as f64 / 1e7,
                longitude_deg: data.lon as f64 / 1e7,
                absolute_altitude_m: data.alt as f32 / 1000.0,
                relative_altitude_m: data.relative_alt as f32 / 1000.0,
            });
            let velocity = telemetry.velocity.get_or_insert_with(Velocity::default);
            velocity.north_mps = data.vx as f32 / 100.0;
            velocity.east_mps = data.vy as f32 / 100.0;
            velocity.down_mps = data.vz as f32 / 100.0;
            if data.hdg != u16::MAX {
                velocity.heading_deg = Some(data.hdg as f32 / 100.0);
            }
        }
        MavMessage::ATTITUDE(data) => {
            telemetry.attitude = Some(Attitude {
                roll_deg: data.roll.to_degrees(),
                pitch_deg: data.pitch.to_degrees(),
                yaw_deg: data.yaw.to_degrees(),
            });
        }
        MavMessage::SYS_STATUS(data) => {
            let battery = &mut telemetry.battery;
            battery.voltage_v = (data.voltage_battery != u16::MAX)
                .then(|| data.voltage_battery as f32 / 1000.0);
            battery.current_a =
                (data.current_battery >= 0).then(|| data.current_battery as f32 / 100.0);
            battery.remaining_pct =
                (data.battery_remaining >= 0).then(|| data.battery_remaining as f32);
        }
        MavMessage::VFR_HUD(data) => {
            let velocity = telemetry.velocity.get_or_insert_with(Velocity::default);
            velocity.groundspeed_mps = data.groundspeed;
            velocity.airspeed_mps = data.airspeed;
            velocity.heading_deg = Some(data.heading as f32);
        }
        MavMessage::GPS_RAW_INT(data) => {
            telemetry.gps = Some(GpsInfo {
                fix_type: GpsFixType::from_raw(data.fix_type as u8),
                satellites_visible: data.satellites_visible,
            });
        }
        MavMessage::RADIO_STATUS(data) => {
            telemetry.radio = Some(RadioStatus {
                rssi: data.rssi,
                remote_rssi: data.remrssi,
                noise: data.noise,
                remote_noise: data.remnoise,
                tx_buffer_pct: data.txbuf,
                rx_errors: data.rxerrors,
                fixed: data.fixed,
            });
        }
        _ => {}
    }
}
