//! # Bus publishing
//!
//! Everything between a classified event and the broker:
//!
//! ```text
//! bus/
//! ├── message.rs  - wire JSON encoding and OutboundMessage
//! ├── session.rs  - Kafka producer session (rdkafka)
//! ├── retry.rs    - producer retry backoff settings
//! └── memory.rs   - in-memory broker for tests
//! ```
//!
//! The pipeline only sees the [`Publisher`] trait: `publish` enqueues and
//! returns at once, `shutdown` drains with a bounded wait. Whatever the
//! implementation does in the background (acknowledgments, reconnects,
//! retries) stays behind that boundary.

pub mod memory;
pub mod message;
pub mod retry;
pub mod session;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

pub use memory::{MemoryBroker, MemoryPublisher};
pub use message::{decode, encode, OutboundMessage};
pub use retry::RetryPolicy;
pub use session::{ProducerSession, SessionError, SessionOptions};

const MAX_TOPIC_LEN: usize = 249;

/// Durability requested from the broker for every send (`acks`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AckPolicy {
    /// No acknowledgment (`acks=0`).
    None,
    /// Partition leader only (`acks=1`).
    Leader,
    /// Every in-sync replica (`acks=all`).
    #[default]
    All,
}

impl AckPolicy {
    pub fn as_config_value(self) -> &'static str {
        match self {
            AckPolicy::None => "0",
            AckPolicy::Leader => "1",
            AckPolicy::All => "all",
        }
    }
}

/// Validated topic name, shared by every message of a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopicHandle(Arc<str>);

impl TopicHandle {
    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TopicHandle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Kafka topic rules: 1..=249 chars of `[a-zA-Z0-9._-]`, not `.` or `..`.
pub fn validate_topic(name: &str) -> Result<(), SessionError> {
    let reason = if name.is_empty() {
        "topic is empty"
    } else if name.len() > MAX_TOPIC_LEN {
        "topic is longer than 249 characters"
    } else if name == "." || name == ".." {
        "topic cannot be '.' or '..'"
    } else if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
    {
        "only ASCII letters, digits, '.', '_' and '-' are allowed"
    } else {
        return Ok(());
    };
    Err(SessionError::InvalidTopic {
        topic: name.to_string(),
        reason,
    })
}

// One topic per session, opened once and reused
#[derive(Debug, Default)]
pub(crate) struct TopicSlot {
    handle: Option<TopicHandle>,
}

impl TopicSlot {
    pub(crate) fn open(&mut self, name: &str) -> Result<TopicHandle, SessionError> {
        if let Some(handle) = &self.handle {
            if handle.name() == name {
                return Ok(handle.clone());
            }
            return Err(SessionError::TopicAlreadyOpen {
                open: handle.name().to_string(),
                requested: name.to_string(),
            });
        }
        validate_topic(name)?;
        let handle = TopicHandle(Arc::from(name));
        self.handle = Some(handle.clone());
        Ok(handle)
    }

    pub(crate) fn check(&self, topic: &TopicHandle) -> Result<(), PublishError> {
        match &self.handle {
            Some(handle) if handle == topic => Ok(()),
            _ => Err(PublishError::UnknownTopic(topic.name().to_string())),
        }
    }
}

// Per-message publish errors, never fatal to the pipeline
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PublishError {
    #[error("Send queue is full")]
    QueueFull,

    #[error("Topic {0} was not opened on this session")]
    UnknownTopic(String),

    #[error("Publish rejected by client: {0}")]
    Rejected(String),
}

/// Outcome of the bounded drain performed at shutdown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub enqueued: u64,
    pub delivered: u64,
    /// Reported as failed by the broker client after its own retries.
    pub failed: u64,
    pub timed_out: bool,
}

impl FlushReport {
    /// Neither delivered nor failed when the flush ended.
    pub fn undelivered(&self) -> u64 {
        self.enqueued
            .saturating_sub(self.delivered)
            .saturating_sub(self.failed)
    }
}

/// Producer side of the bus as seen by the pipeline.
pub trait Publisher {
    /// Idempotent: the same name always yields the same handle.
    fn open_topic(&mut self, name: &str) -> Result<TopicHandle, SessionError>;

    /// Enqueue without waiting for the broker.
    fn publish(&mut self, message: OutboundMessage) -> Result<(), PublishError>;

    /// Drain buffered messages for at most `flush_timeout`, then close.
    fn shutdown(self, flush_timeout: Duration) -> impl Future<Output = FlushReport> + Send
    where
        Self: Sized;
}
