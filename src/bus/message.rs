use crate::bus::TopicHandle;
use crate::controller::ClassifiedEvent;
use serde::{Deserialize, Serialize};
use std::fmt;

// Wire layout, field order is the key order on the wire
#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct WireMessage {
    number: u8,
    value: i16,
    time: u64,
    #[serde(rename = "isAxis")]
    is_axis: bool,
}

impl From<&ClassifiedEvent> for WireMessage {
    fn from(event: &ClassifiedEvent) -> Self {
        Self {
            number: event.index,
            value: event.value,
            time: event.timestamp_ms,
            is_axis: event.is_axis,
        }
    }
}

impl From<WireMessage> for ClassifiedEvent {
    fn from(wire: WireMessage) -> Self {
        Self {
            index: wire.number,
            value: wire.value,
            timestamp_ms: wire.time,
            is_axis: wire.is_axis,
        }
    }
}

/// `{"number":..,"value":..,"time":..,"isAxis":..}`, all four keys always present.
pub fn encode(event: &ClassifiedEvent) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(&WireMessage::from(event))
}

/// Inverse of [`encode`]; rejects payloads with missing or extra keys.
pub fn decode(payload: &[u8]) -> Result<ClassifiedEvent, serde_json::Error> {
    serde_json::from_slice::<WireMessage>(payload).map(ClassifiedEvent::from)
}

/// Encoded payload bound to its destination topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    topic: TopicHandle,
    payload: Vec<u8>,
}

impl OutboundMessage {
    pub fn new(topic: TopicHandle, payload: Vec<u8>) -> Self {
        Self { topic, payload }
    }

    pub fn from_event(
        topic: TopicHandle,
        event: &ClassifiedEvent,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self::new(topic, encode(event)?))
    }

    pub fn topic(&self) -> &TopicHandle {
        &self.topic
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn into_parts(self) -> (TopicHandle, Vec<u8>) {
        (self.topic, self.payload)
    }
}

impl fmt::Display for OutboundMessage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}: {}",
            self.topic,
            String::from_utf8_lossy(&self.payload)
        )
    }
}
