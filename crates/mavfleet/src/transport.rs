//! Transport seam between the session layer and the MAVLink codec.
//!
//! Sessions only see [`Link`]; the production [`MavlinkTransport`] wraps
//! `mavlink::connect_async`, tests substitute an in-memory implementation.

use crate::dialect::MavMessage;
use async_trait::async_trait;
use mavlink::error::{MessageReadError, MessageWriteError};
use mavlink::{AsyncMavConnection, MavHeader};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, thiserror::Error)]
pub enum LinkError {
    #[error("failed to open '{address}': {reason}")]
    Open { address: String, reason: String },
    #[error("send failed: {0}")]
    Send(String),
    #[error("receive failed: {0}")]
    Recv(String),
    #[error("undecodable frame: {0}")]
    Decode(String),
    #[error("receive timed out")]
    TimedOut,
    #[error("link closed")]
    Closed,
}

impl LinkError {
    /// Decode errors and read timeouts only cost one frame; everything else
    /// ends the link.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, LinkError::Decode(_) | LinkError::TimedOut)
    }
}

impl From<MessageReadError> for LinkError {
    fn from(err: MessageReadError) -> Self {
        match err {
            MessageReadError::Io(io)
                if matches!(
                    io.kind(),
                    std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                ) =>
            {
                LinkError::TimedOut
            }
            MessageReadError::Io(io) => LinkError::Recv(io.to_string()),
            other => LinkError::Decode(other.to_string()),
        }
    }
}

impl From<MessageWriteError> for LinkError {
    fn from(err: MessageWriteError) -> Self {
        LinkError::Send(err.to_string())
    }
}

#[async_trait]
pub trait Link: Send + Sync {
    async fn send(&self, header: &MavHeader, message: &MavMessage) -> Result<(), LinkError>;

    async fn recv(&self) -> Result<(MavHeader, MavMessage), LinkError>;

    /// Marks the link unusable. Further sends and receives fail with
    /// [`LinkError::Closed`].
    fn close(&self) {}
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn open(&self, address: &str) -> Result<Arc<dyn Link>, LinkError>;
}

/// Accepts MAVSDK-style URLs as sent by web clients and rewrites them into
/// mavlink-crate addresses. Native addresses pass through untouched.
///
/// | input                      | output                     |
/// |----------------------------|----------------------------|
/// | `udp://:14550`             | `udpin:0.0.0.0:14550`      |
/// | `udp://10.0.0.2:14550`     | `udpin:10.0.0.2:14550`     |
/// | `udpout://10.0.0.2:14550`  | `udpout:10.0.0.2:14550`    |
/// | `tcp://127.0.0.1:5760`     | `tcpout:127.0.0.1:5760`    |
/// | `serial:///dev/ttyS0:57600`| `serial:/dev/ttyS0:57600`  |
pub fn normalize_address(url: &str) -> String {
    let url = url.trim();
    if let Some(rest) = url.strip_prefix("udp://") {
        return format!("udpin:{}", with_default_host(rest));
    }
    if let Some(rest) = url.strip_prefix("udpout://") {
        return format!("udpout:{}", with_default_host(rest));
    }
    if let Some(rest) = url.strip_prefix("tcp://") {
        return format!("tcpout:{}", with_default_host(rest));
    }
    if let Some(rest) = url.strip_prefix("serial://") {
        return format!("serial:{rest}");
    }
    url.to_string()
}

fn with_default_host(host_port: &str) -> String {
    if host_port.starts_with(':') {
        format!("0.0.0.0{host_port}")
    } else {
        host_port.to_string()
    }
}

/// Opens links through the `mavlink` crate (UDP, TCP, serial).
#[derive(Debug, Default, Clone, Copy)]
pub struct MavlinkTransport;

#[async_trait]
impl Transport for MavlinkTransport {
    async fn open(&self, address: &str) -> Result<Arc<dyn Link>, LinkError> {
        let native = normalize_address(address);
        let connection = mavlink::connect_async::<MavMessage>(&native)
            .await
            .map_err(|err| LinkError::Open {
                address: native.clone(),
                reason: err.to_string(),
            })?;
        tracing::debug!(address = %native, "mavlink connection opened");
        Ok(Arc::new(MavlinkLink {
            connection,
            closed: AtomicBool::new(false),
        }))
    }
}

/// The socket is released when the last `Arc` to the link drops; `close`
/// stops the link from being used before that happens.
pub struct MavlinkLink {
    connection: Box<dyn AsyncMavConnection<MavMessage> + Sync + Send>,
    closed: AtomicBool,
}

#[async_trait]
impl Link for MavlinkLink {
    async fn send(&self, header: &MavHeader, message: &MavMessage) -> Result<(), LinkError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(LinkError::Closed);
        }
        self.connection.send(header, message).await?;
        Ok(())
    }

    async fn recv(&self) -> Result<(MavHeader, MavMessage), LinkError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(LinkError::Closed);
        }
        Ok(self.connection.recv().await?)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}
