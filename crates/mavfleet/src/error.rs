#[derive(Debug, thiserror::Error)]
pub enum VehicleError {
    #[error("vehicle '{0}' is already registered")]
    DuplicateVehicle(String),
    #[error("vehicle '{0}' is not registered")]
    UnknownVehicle(String),
    #[error("no autopilot heartbeat within {0:?}")]
    ConnectTimeout(std::time::Duration),
    #[error("transport error: {0}")]
    Transport(#[from] crate::transport::LinkError),
    #[error("vehicle disconnected")]
    Disconnected,
    #[error("no heartbeat received yet")]
    IdentityUnknown,
    #[error("mode '{0}' not available for this vehicle")]
    UnknownMode(String),
    #[error("MAV_CMD {0} is not known to the dialect")]
    UnsupportedCommand(u16),
    #[error("command {command} not acknowledged")]
    CommandNotAcknowledged { command: String },
}
