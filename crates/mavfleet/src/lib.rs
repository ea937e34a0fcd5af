//! Multi-vehicle MAVLink session layer for a ground-control-station backend.
//!
//! [`Registry`] owns one session per vehicle: the link, the heartbeat-derived
//! identity, acknowledgement tracking, calibration progress and the bounded
//! buffer of decoded messages handed to streaming clients.

pub mod ack;
pub mod buffer;
pub mod calibration;
pub mod command;
pub mod config;
mod dispatch;
pub mod error;
pub mod heartbeat;
mod ingest;
pub mod modes;
pub mod registry;
pub mod state;
pub mod transport;

/// The MAVLink dialect spoken on every link. `ardupilotmega` includes `common`.
pub use mavlink::ardupilotmega as dialect;

pub use ack::{AckOutcome, AckTracker};
pub use buffer::{BufferedMessage, MessageBuffer};
pub use calibration::{
    classify_status_text, CalibrationKind, CalibrationOutcome, CalibrationState, SensorCalibration,
};
pub use command::CommandKind;
pub use config::{AckPolicy, SessionConfig};
pub use error::VehicleError;
pub use heartbeat::HeartbeatTracker;
pub use modes::{available_modes, candidate_codes_for, mode_name_for};
pub use registry::Registry;
pub use state::{
    Attitude, AutopilotIdentity, AutopilotType, Battery, ConnectionStatus, FlightMode, GpsFixType,
    GpsInfo, LinkState, Position, RadioStatus, SystemStatus, TelemetrySnapshot, VehicleFamily,
    VehicleSummary, VehicleType, Velocity,
};
pub use transport::{normalize_address, Link, LinkError, MavlinkTransport, Transport};

use std::sync::{Mutex, MutexGuard};

/// Locks `mutex`, carrying on with the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
