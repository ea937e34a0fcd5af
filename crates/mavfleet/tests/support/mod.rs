#![allow(dead_code)]

use async_trait::async_trait;
use mavfleet::dialect::{self, MavCmd, MavMessage, MavResult};
use mavfleet::{AckPolicy, Link, LinkError, Registry, SessionConfig, Transport};
use mavlink::MavHeader;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub const VEHICLE_SYSTEM_ID: u8 = 1;

type Frame = Result<(MavHeader, MavMessage), LinkError>;
type Responder = Box<dyn Fn(&MavMessage) -> Vec<MavMessage> + Send + Sync>;

/// In-memory link. Frames pushed by the test come out of `recv`; everything
/// sent is captured, and an optional responder can answer sent frames.
pub struct MockLink {
    incoming_tx: mpsc::UnboundedSender<Frame>,
    incoming_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Frame>>,
    sent: Mutex<Vec<(MavHeader, MavMessage)>>,
    responder: Mutex<Option<Responder>>,
    fail_sends: AtomicBool,
    closed: CancellationToken,
    sequence: AtomicU8,
}

impl MockLink {
    pub fn new() -> Arc<Self> {
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            incoming_tx,
            incoming_rx: tokio::sync::Mutex::new(incoming_rx),
            sent: Mutex::new(Vec::new()),
            responder: Mutex::new(None),
            fail_sends: AtomicBool::new(false),
            closed: CancellationToken::new(),
            sequence: AtomicU8::new(0),
        })
    }

    /// Queues a frame as if the vehicle had sent it.
    pub fn push(&self, message: MavMessage) {
        let header = MavHeader {
            system_id: VEHICLE_SYSTEM_ID,
            component_id: 1,
            sequence: self.sequence.fetch_add(1, Ordering::Relaxed),
        };
        self.push_with_header(header, message);
    }

    pub fn push_with_header(&self, header: MavHeader, message: MavMessage) {
        let _ = self.incoming_tx.send(Ok((header, message)));
    }

    pub fn push_error(&self, error: LinkError) {
        let _ = self.incoming_tx.send(Err(error));
    }

    pub fn respond_with(
        &self,
        responder: impl Fn(&MavMessage) -> Vec<MavMessage> + Send + Sync + 'static,
    ) {
        *self.responder.lock().expect("responder lock") = Some(Box::new(responder));
    }

    pub fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::Relaxed);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    pub fn sent_messages(&self) -> Vec<MavMessage> {
        self.sent
            .lock()
            .expect("sent lock")
            .iter()
            .map(|(_, message)| message.clone())
            .collect()
    }

    pub fn sent_commands(&self) -> Vec<dialect::COMMAND_LONG_DATA> {
        self.sent_messages()
            .into_iter()
            .filter_map(|message| match message {
                MavMessage::COMMAND_LONG(data) => Some(data),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl Link for MockLink {
    async fn send(&self, header: &MavHeader, message: &MavMessage) -> Result<(), LinkError> {
        if self.is_closed() {
            return Err(LinkError::Closed);
        }
        if self.fail_sends.load(Ordering::Relaxed) {
            return Err(LinkError::Send("mock send failure".into()));
        }
        self.sent.lock().expect("sent lock").push((*header, message.clone()));
        let replies = match self.responder.lock().expect("responder lock").as_ref() {
            Some(responder) => responder(message),
            None => Vec::new(),
        };
        for reply in replies {
            self.push(reply);
        }
        Ok(())
    }

    async fn recv(&self) -> Result<(MavHeader, MavMessage), LinkError> {
        let mut incoming = self.incoming_rx.lock().await;
        tokio::select! {
            _ = self.closed.cancelled() => Err(LinkError::Closed),
            frame = incoming.recv() => frame.unwrap_or(Err(LinkError::Closed)),
        }
    }

    fn close(&self) {
        self.closed.cancel();
    }
}

/// Hands out pre-registered [`MockLink`]s by address.
#[derive(Default)]
pub struct MockTransport {
    links: Mutex<HashMap<String, Arc<MockLink>>>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Registers (or replaces) the link returned for `address`.
    pub fn link(&self, address: &str) -> Arc<MockLink> {
        let link = MockLink::new();
        self.links
            .lock()
            .expect("links lock")
            .insert(address.to_string(), Arc::clone(&link));
        link
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn open(&self, address: &str) -> Result<Arc<dyn Link>, LinkError> {
        let link = self.links.lock().expect("links lock").get(address).cloned();
        match link {
            Some(link) => Ok(link),
            None => Err(LinkError::Open {
                address: address.to_string(),
                reason: "no such mock endpoint".into(),
            }),
        }
    }
}

pub fn test_config(ack_policy: AckPolicy) -> SessionConfig {
    SessionConfig {
        gcs_heartbeat_interval_ms: None,
        ack_policy,
        ..SessionConfig::default()
    }
}

pub fn registry(ack_policy: AckPolicy) -> (Registry, Arc<MockTransport>) {
    let transport = MockTransport::new();
    let registry = Registry::with_transport(test_config(ack_policy), transport.clone());
    (registry, transport)
}

pub fn heartbeat(mavtype: dialect::MavType, custom_mode: u32) -> MavMessage {
    MavMessage::HEARTBEAT(dialect::HEARTBEAT_DATA {
        custom_mode,
        mavtype,
        autopilot: dialect::MavAutopilot::MAV_AUTOPILOT_ARDUPILOTMEGA,
        base_mode: dialect::MavModeFlag::MAV_MODE_FLAG_CUSTOM_MODE_ENABLED,
        system_status: dialect::MavState::MAV_STATE_STANDBY,
        mavlink_version: 3,
    })
}

pub fn copter_heartbeat() -> MavMessage {
    heartbeat(dialect::MavType::MAV_TYPE_QUADROTOR, 0)
}

pub fn plane_heartbeat() -> MavMessage {
    heartbeat(dialect::MavType::MAV_TYPE_FIXED_WING, 0)
}

pub fn ack(command: MavCmd, result: MavResult) -> MavMessage {
    MavMessage::COMMAND_ACK(dialect::COMMAND_ACK_DATA {
        command,
        result,
        ..Default::default()
    })
}

/// Connects `vehicle_id` over a fresh mock link that has already sent
/// `first_heartbeat`.
pub async fn connect(
    registry: &Registry,
    transport: &MockTransport,
    vehicle_id: &str,
    first_heartbeat: MavMessage,
) -> Arc<MockLink> {
    let address = format!("mock://{vehicle_id}");
    let link = transport.link(&address);
    link.push(first_heartbeat);
    registry
        .add_vehicle(vehicle_id, &address)
        .await
        .expect("vehicle should connect");
    link
}

/// Lets spawned reader tasks drain whatever is queued. With paused time the
/// clock only advances once every task is idle.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}
