//! Stored record types and the record codec.
//!
//! Every value written by the persistence layer is one of these records,
//! serialized with bincode (standard config). The one exception is the
//! per-client subscription aggregate, whose fields hold the QoS as a
//! decimal string so that other tooling can read it.

use bincode::{Decode, Encode};
use bytes::Bytes;

use super::error::{PersistenceError, Result};

/// Quality of Service level
///
/// Variants are declared in level order, so `qos as u8` is the level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Encode, Decode)]
pub enum QoS {
    /// At most once delivery
    #[default]
    AtMostOnce,
    /// At least once delivery
    AtLeastOnce,
    /// Exactly once delivery
    ExactlyOnce,
}

impl QoS {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(QoS::AtMostOnce),
            1 => Some(QoS::AtLeastOnce),
            2 => Some(QoS::ExactlyOnce),
            _ => None,
        }
    }

    /// QoS 1 and 2 need per-client delivery tracking
    pub fn is_tracked(self) -> bool {
        self != QoS::AtMostOnce
    }

    /// Parse the decimal form kept in the client aggregate
    pub(crate) fn parse_stored(raw: &[u8]) -> Result<Self> {
        std::str::from_utf8(raw)
            .ok()
            .and_then(|s| s.trim().parse::<u8>().ok())
            .and_then(Self::from_u8)
            .ok_or_else(|| {
                PersistenceError::Deserialize(format!(
                    "invalid stored qos: {:?}",
                    String::from_utf8_lossy(raw)
                ))
            })
    }

    pub(crate) fn to_stored(self) -> Bytes {
        Bytes::from((self as u8).to_string())
    }
}

/// A packet as stored in the key-value store.
///
/// Used for retained messages, outgoing and incoming inflight packets and
/// last-will messages. `broker_id` and `broker_counter` identify the packet
/// on the broker that enqueued it; `message_id` is the protocol packet id
/// once one has been allocated.
#[derive(Debug, Clone, PartialEq, Eq, Default, Encode, Decode)]
pub struct Packet {
    pub cmd: String,
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
    pub retain: bool,
    pub dup: bool,
    pub message_id: Option<u16>,
    pub broker_id: Option<String>,
    pub broker_counter: u64,
    pub client_id: Option<String>,
}

impl Packet {
    /// A publish packet with the given topic and payload
    pub fn publish(topic: impl Into<String>, payload: impl Into<Vec<u8>>, qos: QoS) -> Self {
        Self {
            cmd: "publish".to_string(),
            topic: topic.into(),
            payload: payload.into(),
            qos,
            ..Default::default()
        }
    }

    /// Attach broker coordinates
    pub fn with_broker(mut self, broker_id: impl Into<String>, broker_counter: u64) -> Self {
        self.broker_id = Some(broker_id.into());
        self.broker_counter = broker_counter;
        self
    }

    /// Attach a protocol message id
    pub fn with_message_id(mut self, message_id: u16) -> Self {
        self.message_id = Some(message_id);
        self
    }

    /// Copy for queueing: broker coordinates are kept, the message id is not
    pub(crate) fn for_queue(&self) -> Self {
        Self {
            message_id: None,
            ..self.clone()
        }
    }

    /// Broker coordinates, if the packet carries a non-empty broker id
    pub(crate) fn broker_coordinates(&self) -> Option<(&str, u64)> {
        self.broker_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .map(|id| (id, self.broker_counter))
    }
}

/// A subscription as requested by a client
#[derive(Debug, Clone, PartialEq, Eq, Hash, Encode, Decode)]
pub struct Subscription {
    pub topic: String,
    pub qos: QoS,
}

impl Subscription {
    pub fn new(topic: impl Into<String>, qos: QoS) -> Self {
        Self {
            topic: topic.into(),
            qos,
        }
    }
}

/// A subscription found through the per-topic index, with its owner
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopicSubscriber {
    pub client_id: String,
    pub topic: String,
    pub qos: QoS,
}

/// Global offline counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OfflineCount {
    /// Stored QoS > 0 subscription entries
    pub subscriptions: u64,
    /// Clients with at least one stored subscription
    pub clients: u64,
}

/// Serialize a record using bincode
pub(crate) fn encode<T: Encode>(value: &T) -> Result<Bytes> {
    bincode::encode_to_vec(value, bincode::config::standard())
        .map(Bytes::from)
        .map_err(PersistenceError::from)
}

/// Deserialize a record using bincode
pub(crate) fn decode<T: Decode<()>>(bytes: &[u8]) -> Result<T> {
    bincode::decode_from_slice(bytes, bincode::config::standard())
        .map(|(value, _)| value)
        .map_err(PersistenceError::from)
}
