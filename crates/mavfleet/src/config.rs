use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How an acknowledgement wait decides that an incoming COMMAND_ACK is its own.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckPolicy {
    /// Any waiter for the same command id is satisfied by the newest ack seen
    /// after it started waiting. Two concurrent commands of the same kind can
    /// both be satisfied by a single acknowledgement.
    #[default]
    LastWriteWins,
    /// Each outstanding command holds a ticket; an ack resolves the oldest
    /// unresolved ticket with the same command id.
    Correlated,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub gcs_system_id: u8,
    pub gcs_component_id: u8,
    pub discovery_timeout_ms: u64,
    pub ack_timeout_ms: u64,
    pub final_ack_timeout_ms: u64,
    pub message_buffer_capacity: usize,
    pub takeoff_altitude_m: f32,
    /// `None` disables the outbound GCS heartbeat.
    pub gcs_heartbeat_interval_ms: Option<u64>,
    pub ack_policy: AckPolicy,
}

impl SessionConfig {
    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_millis(self.discovery_timeout_ms)
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    pub fn final_ack_timeout(&self) -> Duration {
        Duration::from_millis(self.final_ack_timeout_ms)
    }

    pub fn gcs_heartbeat_interval(&self) -> Option<Duration> {
        self.gcs_heartbeat_interval_ms.map(Duration::from_millis)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            gcs_system_id: 255,
            gcs_component_id: 190,
            discovery_timeout_ms: 10_000,
            ack_timeout_ms: 1_500,
            final_ack_timeout_ms: 500,
            message_buffer_capacity: 100,
            takeoff_altitude_m: 10.0,
            gcs_heartbeat_interval_ms: Some(1_000),
            ack_policy: AckPolicy::LastWriteWins,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_observed_timings() {
        let config = SessionConfig::default();
        assert_eq!(config.discovery_timeout(), Duration::from_secs(10));
        assert_eq!(config.ack_timeout(), Duration::from_millis(1500));
        assert_eq!(config.final_ack_timeout(), Duration::from_millis(500));
        assert_eq!(config.message_buffer_capacity, 100);
    }

    #[test]
    fn partial_table_keeps_defaults() {
        let raw = r#"{"ack_policy": "correlated", "gcs_heartbeat_interval_ms": null}"#;
        let config: SessionConfig = serde_json::from_str(raw).expect("valid config");
        assert_eq!(config.ack_policy, AckPolicy::Correlated);
        assert_eq!(config.gcs_heartbeat_interval(), None);
        assert_eq!(config.gcs_system_id, 255);
    }
}
