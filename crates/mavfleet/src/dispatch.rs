//! Command Dispatcher.
//!
//! Works on a snapshot taken under the registry lock, so nothing here holds
//! the lock while sending or waiting.

use crate::ack::{AckOutcome, AckTracker};
use crate::command::{self, CommandKind, Target};
use crate::config::SessionConfig;
use crate::dialect::{MavCmd, MavMessage};
use crate::error::VehicleError;
use crate::modes;
use crate::state::{AutopilotIdentity, VehicleFamily};
use crate::transport::{Link, LinkError};
use mavlink::MavHeader;
use std::sync::Arc;
use tracing::{debug, warn};

pub(crate) struct Dispatcher<'a> {
    pub vehicle_id: &'a str,
    pub link: Arc<dyn Link>,
    pub acks: Arc<AckTracker>,
    pub identity: Option<AutopilotIdentity>,
    pub config: &'a SessionConfig,
}

impl Dispatcher<'_> {
    fn header(&self) -> MavHeader {
        MavHeader {
            system_id: self.config.gcs_system_id,
            component_id: self.config.gcs_component_id,
            sequence: 0,
        }
    }

    fn target(&self) -> Result<Target, VehicleError> {
        let identity = self.identity.ok_or(VehicleError::IdentityUnknown)?;
        Ok(Target {
            system_id: identity.system_id,
            component_id: identity.component_id,
        })
    }

    async fn send(&self, message: &MavMessage) -> Result<(), LinkError> {
        self.link.send(&self.header(), message).await
    }

    /// Success means the link accepted the frame. The vehicle may still
    /// refuse it.
    pub async fn send_command(&self, kind: CommandKind) -> Result<(), VehicleError> {
        let target = self.target()?;
        let params = kind.params(self.config.takeoff_altitude_m);
        let frame = command::command_long(target, kind.mav_cmd(), 0, params);
        self.send(&frame).await.map_err(|err| {
            warn!(vehicle = %self.vehicle_id, command = %kind, "send failed: {err}");
            VehicleError::from(err)
        })?;
        debug!(vehicle = %self.vehicle_id, command = %kind, "command sent");
        Ok(())
    }

    pub async fn send_command_long(
        &self,
        command: MavCmd,
        params: [f32; 7],
    ) -> Result<(), VehicleError> {
        let target = self.target()?;
        self.send(&command::command_long(target, command, 0, params))
            .await?;
        debug!(vehicle = %self.vehicle_id, ?command, "command_long sent");
        Ok(())
    }

    /// Resolves `mode_name` for the cached family, sends DO_SET_MODE and
    /// waits for acceptance; an unacknowledged first attempt is followed by
    /// the legacy frame and one short final wait. Returns the custom mode
    /// that was accepted.
    pub async fn send_set_mode(&self, mode_name: &str) -> Result<u32, VehicleError> {
        let family = self
            .identity
            .map(|id| id.family())
            .unwrap_or(VehicleFamily::Unknown);
        let candidates = modes::candidate_codes_for(family, mode_name);
        // Only the first candidate is tried, even when the name is ambiguous.
        let Some(&custom_mode) = candidates.first() else {
            return Err(VehicleError::UnknownMode(mode_name.to_string()));
        };
        if candidates.len() > 1 {
            debug!(
                vehicle = %self.vehicle_id,
                mode = mode_name,
                ?candidates,
                "ambiguous mode name, trying the first code only"
            );
        }
        let target = self.target()?;
        let base_mode = self.identity.map(|id| id.base_mode).unwrap_or(0);

        let mut ticket = self.acks.begin(MavCmd::MAV_CMD_DO_SET_MODE);

        let primary = self
            .send(&command::set_mode_frame(target, custom_mode))
            .await;
        let mut outcome = match &primary {
            Ok(()) => ticket.wait(self.config.ack_timeout()).await?,
            Err(err) => {
                warn!(vehicle = %self.vehicle_id, "set-mode send failed: {err}");
                AckOutcome::Pending
            }
        };

        let mut fallback = None;
        if outcome != AckOutcome::Accepted {
            if let AckOutcome::Rejected(result) = outcome {
                debug!(
                    vehicle = %self.vehicle_id,
                    ?result,
                    "set-mode rejected, trying legacy frame"
                );
                ticket.rearm();
            }
            let sent = self
                .send(&command::legacy_set_mode_frame(target, base_mode, custom_mode))
                .await;
            if let Err(err) = &sent {
                warn!(vehicle = %self.vehicle_id, "legacy set-mode send failed: {err}");
            }
            outcome = ticket.wait(self.config.final_ack_timeout()).await?;
            fallback = Some(sent);
        }

        let sent_locally = primary.is_ok() || matches!(fallback, Some(Ok(())));
        match (sent_locally, outcome) {
            (true, AckOutcome::Accepted) => {
                debug!(vehicle = %self.vehicle_id, mode = mode_name, custom_mode, "mode accepted");
                Ok(custom_mode)
            }
            (false, _) => {
                let err = match fallback {
                    Some(Err(err)) => err,
                    _ => primary.err().unwrap_or(LinkError::Closed),
                };
                Err(VehicleError::Transport(err))
            }
            (true, _) => {
                warn!(
                    vehicle = %self.vehicle_id,
                    mode = mode_name,
                    custom_mode,
                    ?outcome,
                    "set-mode not acknowledged"
                );
                Err(VehicleError::CommandNotAcknowledged {
                    command: format!("DO_SET_MODE {}", modes::normalize_mode_name(mode_name)),
                })
            }
        }
    }
}
