//! Session Registry: owner of every per-vehicle session.
//!
//! One `std::sync::Mutex` guards all sessions and the heartbeat cache. It is
//! taken for short synchronous sections only and is never held across an
//! `.await`, so ingestion and command dispatch never deadlock on it. All
//! vehicles share it; a vehicle with heavy traffic slows down lookups for
//! the others.

use crate::ack::AckTracker;
use crate::buffer::{BufferedMessage, MessageBuffer};
use crate::calibration::{CalibrationKind, CalibrationState};
use crate::command::{self, CommandKind};
use crate::config::SessionConfig;
use crate::dialect::{self, MavCmd, MavMessage};
use crate::dispatch::Dispatcher;
use crate::error::VehicleError;
use crate::heartbeat::{self, HeartbeatTracker};
use crate::ingest;
use crate::lock;
use crate::modes;
use crate::state::{
    AutopilotIdentity, ConnectionStatus, FlightMode, LinkState, Telemetry, TelemetrySnapshot,
    VehicleFamily, VehicleSummary,
};
use crate::transport::{Link, LinkError, MavlinkTransport, Transport};
use mavlink::MavHeader;
use num_traits::FromPrimitive;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

pub(crate) struct VehicleSession {
    pub(crate) connection_url: String,
    pub(crate) link: Arc<dyn Link>,
    pub(crate) generation: u64,
    pub(crate) reader: CancellationToken,
    pub(crate) acks: Arc<AckTracker>,
    pub(crate) streaming: bool,
    pub(crate) buffer: MessageBuffer,
    pub(crate) calibration: CalibrationState,
    pub(crate) telemetry: Telemetry,
    pub(crate) link_state: LinkState,
}

/// Everything behind the registry lock.
#[derive(Default)]
pub(crate) struct Fleet {
    pub(crate) sessions: HashMap<String, VehicleSession>,
    pub(crate) heartbeats: HeartbeatTracker,
    /// Ids reserved by an `add_vehicle` that is still discovering.
    connecting: HashSet<String>,
    next_generation: u64,
}

impl Fleet {
    fn session(&self, vehicle_id: &str) -> Result<&VehicleSession, VehicleError> {
        self.sessions
            .get(vehicle_id)
            .ok_or_else(|| VehicleError::UnknownVehicle(vehicle_id.to_string()))
    }

    fn session_mut(&mut self, vehicle_id: &str) -> Result<&mut VehicleSession, VehicleError> {
        self.sessions
            .get_mut(vehicle_id)
            .ok_or_else(|| VehicleError::UnknownVehicle(vehicle_id.to_string()))
    }
}

pub(crate) struct RegistryInner {
    config: SessionConfig,
    transport: Arc<dyn Transport>,
    fleet: Mutex<Fleet>,
}

impl RegistryInner {
    fn fleet(&self) -> MutexGuard<'_, Fleet> {
        lock(&self.fleet)
    }
}

/// Last handle gone: stop every reader and heartbeat task and release the
/// links, as `shutdown` would.
impl Drop for RegistryInner {
    fn drop(&mut self) {
        let fleet = self
            .fleet
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for (vehicle_id, session) in fleet.sessions.drain() {
            session.acks.close();
            session.reader.cancel();
            session.link.close();
            debug!(vehicle = %vehicle_id, "session dropped with registry");
        }
    }
}

/// Shared handle to the registry. Clones refer to the same sessions.
#[derive(Clone)]
pub struct Registry {
    inner: Arc<RegistryInner>,
}

/// Releases an id reserved by `add_vehicle`, including when the connecting
/// future is dropped half-way.
struct Reservation<'a> {
    inner: &'a RegistryInner,
    vehicle_id: &'a str,
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        self.inner.fleet().connecting.remove(self.vehicle_id);
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(SessionConfig::default())
    }
}

impl Registry {
    /// Registry opening real MAVLink connections.
    pub fn new(config: SessionConfig) -> Self {
        Self::with_transport(config, Arc::new(MavlinkTransport))
    }

    pub fn with_transport(config: SessionConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                config,
                transport,
                fleet: Mutex::new(Fleet::default()),
            }),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    // --- Lifecycle ---

    /// Opens `connection_url` and waits up to the discovery timeout for the
    /// first autopilot heartbeat. The session only becomes visible once
    /// discovery succeeded; on failure the link is closed again.
    pub async fn add_vehicle(
        &self,
        vehicle_id: &str,
        connection_url: &str,
    ) -> Result<(), VehicleError> {
        {
            let mut fleet = self.inner.fleet();
            if fleet.sessions.contains_key(vehicle_id)
                || !fleet.connecting.insert(vehicle_id.to_string())
            {
                return Err(VehicleError::DuplicateVehicle(vehicle_id.to_string()));
            }
        }
        let _reservation = Reservation {
            inner: &self.inner,
            vehicle_id,
        };

        let link = self.inner.transport.open(connection_url).await.map_err(|err| {
            warn!(vehicle = %vehicle_id, url = %connection_url, "open failed: {err}");
            VehicleError::Transport(err)
        })?;

        let timeout = self.inner.config.discovery_timeout();
        let (header, hb) = match tokio::time::timeout(timeout, discover(link.as_ref())).await {
            Ok(Ok(found)) => found,
            Ok(Err(err)) => {
                link.close();
                warn!(vehicle = %vehicle_id, "link failed during discovery: {err}");
                return Err(VehicleError::Transport(err));
            }
            Err(_) => {
                link.close();
                warn!(vehicle = %vehicle_id, ?timeout, "no autopilot heartbeat");
                return Err(VehicleError::ConnectTimeout(timeout));
            }
        };

        let reader = CancellationToken::new();
        let generation = {
            let mut fleet = self.inner.fleet();
            let generation = fleet.next_generation;
            fleet.next_generation += 1;
            fleet.heartbeats.observe(vehicle_id, &header, &hb);
            fleet.sessions.insert(
                vehicle_id.to_string(),
                VehicleSession {
                    connection_url: connection_url.to_string(),
                    link: Arc::clone(&link),
                    generation,
                    reader: reader.clone(),
                    acks: AckTracker::new(self.inner.config.ack_policy),
                    streaming: false,
                    buffer: MessageBuffer::with_capacity(self.inner.config.message_buffer_capacity),
                    calibration: CalibrationState::default(),
                    telemetry: Telemetry::default(),
                    link_state: LinkState::Connected,
                },
            );
            generation
        };

        tokio::spawn(run_reader(
            Arc::downgrade(&self.inner),
            vehicle_id.to_string(),
            generation,
            Arc::clone(&link),
            reader.clone(),
        ));
        if let Some(interval) = self.inner.config.gcs_heartbeat_interval() {
            tokio::spawn(run_gcs_heartbeat(link, self.gcs_header(), interval, reader));
        }

        info!(
            vehicle = %vehicle_id,
            url = %connection_url,
            system_id = header.system_id,
            vehicle_type = ?hb.mavtype,
            "vehicle connected"
        );
        Ok(())
    }

    /// Idempotent. Outstanding command waits for the vehicle end with
    /// `Disconnected`.
    pub fn remove_vehicle(&self, vehicle_id: &str) {
        let removed = {
            let mut fleet = self.inner.fleet();
            fleet.heartbeats.forget(vehicle_id);
            fleet.sessions.remove(vehicle_id)
        };
        let Some(session) = removed else {
            trace!(vehicle = %vehicle_id, "remove of unknown vehicle ignored");
            return;
        };
        session.acks.close();
        session.reader.cancel();
        session.link.close();
        info!(vehicle = %vehicle_id, "vehicle removed");
    }

    /// Removes every vehicle.
    pub fn shutdown(&self) {
        for vehicle_id in self.list_connected_vehicles() {
            self.remove_vehicle(&vehicle_id);
        }
    }

    // --- Queries ---

    pub fn is_vehicle_connected(&self, vehicle_id: &str) -> bool {
        self.inner.fleet().sessions.contains_key(vehicle_id)
    }

    pub fn list_connected_vehicles(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inner.fleet().sessions.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn list_vehicles(&self) -> Vec<VehicleSummary> {
        let fleet = self.inner.fleet();
        let mut summaries: Vec<VehicleSummary> = fleet
            .sessions
            .iter()
            .map(|(id, session)| {
                let identity = fleet.heartbeats.get(id);
                VehicleSummary {
                    vehicle_id: id.clone(),
                    connection_url: session.connection_url.clone(),
                    vehicle_type: identity.map(|i| i.vehicle_type).unwrap_or_default(),
                    autopilot: identity.map(|i| i.autopilot).unwrap_or_default(),
                    link_state: session.link_state.clone(),
                    streaming: session.streaming,
                }
            })
            .collect();
        summaries.sort_by(|a, b| a.vehicle_id.cmp(&b.vehicle_id));
        summaries
    }

    pub fn identity(&self, vehicle_id: &str) -> Option<AutopilotIdentity> {
        let fleet = self.inner.fleet();
        fleet.sessions.get(vehicle_id)?;
        fleet.heartbeats.get(vehicle_id)
    }

    pub fn get_telemetry_snapshot(
        &self,
        vehicle_id: &str,
    ) -> Result<TelemetrySnapshot, VehicleError> {
        let fleet = self.inner.fleet();
        let session = fleet.session(vehicle_id)?;
        let identity = fleet.heartbeats.get(vehicle_id);
        let telemetry = &session.telemetry;
        Ok(TelemetrySnapshot {
            vehicle_id: vehicle_id.to_string(),
            position: telemetry.position,
            attitude: telemetry.attitude,
            battery: telemetry.battery,
            mode_name: modes::describe_mode(identity.as_ref()),
            armed: identity.map(|i| i.armed()).unwrap_or(false),
            velocity: telemetry.velocity,
            gps: telemetry.gps,
            radio: telemetry.radio,
            connection_status: match session.link_state {
                LinkState::Connected => ConnectionStatus::Connected,
                LinkState::Error(_) => ConnectionStatus::LinkError,
            },
        })
    }

    pub fn available_modes(&self, vehicle_id: &str) -> Result<Vec<FlightMode>, VehicleError> {
        let fleet = self.inner.fleet();
        fleet.session(vehicle_id)?;
        let family = fleet
            .heartbeats
            .get(vehicle_id)
            .map(|i| i.family())
            .unwrap_or(VehicleFamily::Unknown);
        Ok(modes::available_modes(family))
    }

    // --- Commands ---

    /// Fire-and-forget: `Ok` once the link accepted the frame.
    pub async fn send_command(
        &self,
        vehicle_id: &str,
        kind: CommandKind,
    ) -> Result<(), VehicleError> {
        self.dispatcher(vehicle_id)?.send_command(kind).await
    }

    /// `Ok` only when the vehicle acknowledged DO_SET_MODE as accepted.
    /// Blocks for at most the primary plus the final ack timeout.
    pub async fn send_set_mode(
        &self,
        vehicle_id: &str,
        mode_name: &str,
    ) -> Result<(), VehicleError> {
        self.dispatcher(vehicle_id)?
            .send_set_mode(mode_name)
            .await
            .map(|_| ())
    }

    /// Raw COMMAND_LONG by numeric MAV_CMD id, not acknowledged.
    pub async fn send_command_long(
        &self,
        vehicle_id: &str,
        command_id: u16,
        params: [f32; 7],
    ) -> Result<(), VehicleError> {
        let command =
            MavCmd::from_u16(command_id).ok_or(VehicleError::UnsupportedCommand(command_id))?;
        self.dispatcher(vehicle_id)?
            .send_command_long(command, params)
            .await
    }

    fn dispatcher<'a>(&'a self, vehicle_id: &'a str) -> Result<Dispatcher<'a>, VehicleError> {
        let fleet = self.inner.fleet();
        let session = fleet.session(vehicle_id)?;
        Ok(Dispatcher {
            vehicle_id,
            link: Arc::clone(&session.link),
            acks: Arc::clone(&session.acks),
            identity: fleet.heartbeats.get(vehicle_id),
            config: &self.inner.config,
        })
    }

    fn gcs_header(&self) -> MavHeader {
        MavHeader {
            system_id: self.inner.config.gcs_system_id,
            component_id: self.inner.config.gcs_component_id,
            sequence: 0,
        }
    }

    // --- Streaming ---

    pub fn start_streaming(&self, vehicle_id: &str) -> Result<(), VehicleError> {
        self.inner.fleet().session_mut(vehicle_id)?.streaming = true;
        debug!(vehicle = %vehicle_id, "streaming started");
        Ok(())
    }

    /// Also discards anything still buffered.
    pub fn stop_streaming(&self, vehicle_id: &str) -> Result<(), VehicleError> {
        let mut fleet = self.inner.fleet();
        let session = fleet.session_mut(vehicle_id)?;
        session.streaming = false;
        session.buffer.clear();
        debug!(vehicle = %vehicle_id, "streaming stopped");
        Ok(())
    }

    pub fn is_streaming(&self, vehicle_id: &str) -> bool {
        self.inner
            .fleet()
            .sessions
            .get(vehicle_id)
            .map(|s| s.streaming)
            .unwrap_or(false)
    }

    /// Takes everything buffered for the vehicle, oldest first. Empty for an
    /// unknown vehicle.
    pub fn drain_buffered_messages(&self, vehicle_id: &str) -> Vec<BufferedMessage> {
        self.inner
            .fleet()
            .sessions
            .get_mut(vehicle_id)
            .map(|s| s.buffer.drain())
            .unwrap_or_default()
    }

    // --- Calibration ---

    pub async fn start_compass_calibration(&self, vehicle_id: &str) -> Result<(), VehicleError> {
        // mag mask 0 = all compasses, no retry, autosave, no delay, no reboot
        let params = [0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0];
        self.start_calibration(
            vehicle_id,
            CalibrationKind::Compass,
            MavCmd::MAV_CMD_DO_START_MAG_CAL,
            params,
        )
        .await
    }

    pub async fn cancel_compass_calibration(&self, vehicle_id: &str) -> Result<(), VehicleError> {
        self.cancel_calibration(vehicle_id, MavCmd::MAV_CMD_DO_CANCEL_MAG_CAL).await
    }

    /// Simple accelerometer calibration. Its outcome is only ever reported
    /// through STATUSTEXT.
    pub async fn start_accel_calibration(&self, vehicle_id: &str) -> Result<(), VehicleError> {
        let params = [0.0, 0.0, 0.0, 0.0, 4.0, 0.0, 0.0];
        self.start_calibration(
            vehicle_id,
            CalibrationKind::Accelerometer,
            MavCmd::MAV_CMD_PREFLIGHT_CALIBRATION,
            params,
        )
        .await
    }

    pub async fn cancel_accel_calibration(&self, vehicle_id: &str) -> Result<(), VehicleError> {
        self.cancel_calibration(vehicle_id, MavCmd::MAV_CMD_PREFLIGHT_CALIBRATION).await
    }

    pub fn get_calibration_status(
        &self,
        vehicle_id: &str,
    ) -> Result<CalibrationState, VehicleError> {
        Ok(self.inner.fleet().session(vehicle_id)?.calibration.clone())
    }

    async fn start_calibration(
        &self,
        vehicle_id: &str,
        kind: CalibrationKind,
        command: MavCmd,
        params: [f32; 7],
    ) -> Result<(), VehicleError> {
        let dispatcher = self.dispatcher(vehicle_id)?;
        // Reset first so reports racing the send are not lost.
        self.inner.fleet().session_mut(vehicle_id)?.calibration = CalibrationState::started(kind);
        if let Err(err) = dispatcher.send_command_long(command, params).await {
            if let Ok(session) = self.inner.fleet().session_mut(vehicle_id) {
                session.calibration.cancel();
                session.calibration.status_text = format!("calibration request not sent: {err}");
            }
            return Err(err);
        }
        info!(vehicle = %vehicle_id, ?kind, "calibration started");
        Ok(())
    }

    async fn cancel_calibration(
        &self,
        vehicle_id: &str,
        command: MavCmd,
    ) -> Result<(), VehicleError> {
        let dispatcher = self.dispatcher(vehicle_id)?;
        // All-zero params make PREFLIGHT_CALIBRATION a no-op request.
        dispatcher.send_command_long(command, [0.0; 7]).await?;
        if let Ok(session) = self.inner.fleet().session_mut(vehicle_id) {
            session.calibration.cancel();
        }
        info!(vehicle = %vehicle_id, "calibration cancelled");
        Ok(())
    }
}

/// Reads until the first heartbeat from an autopilot. Undecodable frames are
/// skipped.
async fn discover(link: &dyn Link) -> Result<(MavHeader, dialect::HEARTBEAT_DATA), LinkError> {
    loop {
        match link.recv().await {
            Ok((header, MavMessage::HEARTBEAT(hb))) if heartbeat::is_autopilot(&hb) => {
                return Ok((header, hb));
            }
            Ok(_) => {}
            Err(err) if !err.is_fatal() => trace!("skipping frame during discovery: {err}"),
            Err(err) => return Err(err),
        }
    }
}

async fn run_reader(
    registry: Weak<RegistryInner>,
    vehicle_id: String,
    generation: u64,
    link: Arc<dyn Link>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            result = link.recv() => {
                let Some(inner) = registry.upgrade() else { break };
                match result {
                    Ok((header, message)) => {
                        ingest::ingest(
                            &mut inner.fleet(),
                            &vehicle_id,
                            generation,
                            &header,
                            &message,
                        );
                    }
                    Err(err) if !err.is_fatal() => {
                        trace!(vehicle = %vehicle_id, "dropped frame: {err}");
                    }
                    Err(err) => {
                        warn!(vehicle = %vehicle_id, "MAVLink recv error: {err}");
                        let mut fleet = inner.fleet();
                        if let Some(session) = fleet.sessions.get_mut(&vehicle_id) {
                            if session.generation == generation {
                                session.link_state = LinkState::Error(err.to_string());
                            }
                        }
                        break;
                    }
                }
            }
        }
    }
    debug!(vehicle = %vehicle_id, generation, "reader stopped");
}

async fn run_gcs_heartbeat(
    link: Arc<dyn Link>,
    header: MavHeader,
    period: Duration,
    cancel: CancellationToken,
) {
    let heartbeat = command::gcs_heartbeat();
    let mut ticker = tokio::time::interval(period);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                if let Err(err) = link.send(&header, &heartbeat).await {
                    if err.is_fatal() {
                        debug!("gcs heartbeat stopped: {err}");
                        break;
                    }
                }
            }
        }
    }
}
