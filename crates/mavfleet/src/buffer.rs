use crate::dialect::MavMessage;
use mavlink::{MavHeader, MavlinkVersion, Message};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::{SystemTime, UNIX_EPOCH};

/// Default number of records kept per streaming vehicle.
pub const DEFAULT_CAPACITY: usize = 100;

/// A decoded inbound message as handed to streaming clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BufferedMessage {
    pub name: String,
    pub message_id: u32,
    /// Arrival time, milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
    pub system_id: u8,
    pub component_id: u8,
    pub sequence: u8,
    pub payload_len: usize,
    pub fields: serde_json::Map<String, serde_json::Value>,
}

impl BufferedMessage {
    pub(crate) fn decode(
        header: &MavHeader,
        message: &MavMessage,
    ) -> Result<Self, serde_json::Error> {
        let fields = match serde_json::to_value(message)? {
            serde_json::Value::Object(mut map) => {
                map.remove("type");
                map
            }
            other => {
                let mut map = serde_json::Map::new();
                map.insert("value".to_string(), other);
                map
            }
        };
        let mut scratch = [0u8; 255];
        Ok(Self {
            name: message.message_name().to_string(),
            message_id: message.message_id(),
            timestamp_ms: now_ms(),
            system_id: header.system_id,
            component_id: header.component_id,
            sequence: header.sequence,
            payload_len: message.ser(MavlinkVersion::V2, &mut scratch),
            fields,
        })
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Bounded FIFO that evicts the oldest entry on overflow.
#[derive(Debug)]
pub struct MessageBuffer {
    entries: VecDeque<BufferedMessage>,
    capacity: usize,
    evicted: u64,
}

impl Default for MessageBuffer {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl MessageBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
            evicted: 0,
        }
    }

    pub fn push(&mut self, message: BufferedMessage) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
            self.evicted += 1;
        }
        self.entries.push_back(message);
    }

    /// Removes and returns everything in arrival order.
    pub fn drain(&mut self) -> Vec<BufferedMessage> {
        self.entries.drain(..).collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Records dropped to stay within capacity since creation.
    pub fn evicted(&self) -> u64 {
        self.evicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect;

    fn record(seq: u8) -> BufferedMessage {
        BufferedMessage {
            name: "HEARTBEAT".into(),
            message_id: 0,
            timestamp_ms: seq as u64,
            system_id: 1,
            component_id: 1,
            sequence: seq,
            payload_len: 9,
            fields: serde_json::Map::new(),
        }
    }

    #[test]
    fn overflow_drops_oldest() {
        let mut buffer = MessageBuffer::default();
        for seq in 0..=100u8 {
            buffer.push(record(seq));
        }
        assert_eq!(buffer.len(), 100);
        assert_eq!(buffer.evicted(), 1);

        let drained = buffer.drain();
        assert_eq!(drained.len(), 100);
        assert_eq!(drained.first().unwrap().sequence, 1);
        assert_eq!(drained.last().unwrap().sequence, 100);
        assert!(buffer.is_empty());
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let mut buffer = MessageBuffer::with_capacity(0);
        buffer.push(record(1));
        buffer.push(record(2));
        assert_eq!(buffer.len(), 1);
        assert_eq!(buffer.drain()[0].sequence, 2);
    }

    #[test]
    fn decode_fills_identity_and_fields() {
        let header = MavHeader {
            system_id: 3,
            component_id: 1,
            sequence: 42,
        };
        let msg = MavMessage::ATTITUDE(dialect::ATTITUDE_DATA {
            time_boot_ms: 1000,
            roll: 0.1,
            ..Default::default()
        });
        let decoded = BufferedMessage::decode(&header, &msg).unwrap();
        assert_eq!(decoded.name, "ATTITUDE");
        assert_eq!(decoded.message_id, 30);
        assert_eq!(decoded.system_id, 3);
        assert_eq!(decoded.sequence, 42);
        assert!(decoded.payload_len > 0);
        assert_eq!(decoded.fields["time_boot_ms"], 1000);
        assert!(!decoded.fields.contains_key("type"));
    }
}
