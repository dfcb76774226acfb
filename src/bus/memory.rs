//! In-memory stand-in for the broker.
//!
//! [`MemoryBroker`] is the inspection side, [`MemoryPublisher`] the producer
//! side handed to the pipeline. Both share one state behind a mutex. Messages
//! sit in a bounded queue until [`MemoryBroker::deliver_pending`] or a flush
//! moves them to the delivered log, which mirrors a client library's send
//! buffer closely enough to exercise backpressure and shutdown paths.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::{debug, warn};

use super::{FlushReport, OutboundMessage, PublishError, Publisher, SessionError, TopicHandle, TopicSlot};

#[derive(Debug, Default)]
struct BrokerState {
    queued: VecDeque<OutboundMessage>,
    delivered: Vec<OutboundMessage>,
    reject_next: usize,
    offline: bool,
    enqueued: u64,
    shutdowns: usize,
}

#[derive(Debug, Clone)]
pub struct MemoryBroker {
    state: Arc<Mutex<BrokerState>>,
    capacity: usize,
}

impl MemoryBroker {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(BrokerState::default())),
            capacity,
        }
    }

    pub fn publisher(&self) -> MemoryPublisher {
        MemoryPublisher {
            broker: self.clone(),
            topics: TopicSlot::default(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The next `count` publishes report a full queue.
    pub fn reject_next(&self, count: usize) {
        self.lock().reject_next = count;
    }

    /// While offline, flushes deliver nothing.
    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    /// Moves queued messages to the delivered log, unless offline.
    pub fn deliver_pending(&self) -> usize {
        let mut state = self.lock();
        if state.offline {
            return 0;
        }
        let count = state.queued.len();
        let drained: Vec<_> = state.queued.drain(..).collect();
        state.delivered.extend(drained);
        count
    }

    pub fn queued_len(&self) -> usize {
        self.lock().queued.len()
    }

    pub fn delivered(&self) -> Vec<OutboundMessage> {
        self.lock().delivered.clone()
    }

    /// Payloads of delivered messages as UTF-8 strings, in delivery order.
    pub fn delivered_payloads(&self) -> Vec<String> {
        self.lock()
            .delivered
            .iter()
            .map(|m| String::from_utf8_lossy(m.payload()).into_owned())
            .collect()
    }

    pub fn shutdown_count(&self) -> usize {
        self.lock().shutdowns
    }
}

#[derive(Debug)]
pub struct MemoryPublisher {
    broker: MemoryBroker,
    topics: TopicSlot,
}

impl Publisher for MemoryPublisher {
    fn open_topic(&mut self, name: &str) -> Result<TopicHandle, SessionError> {
        self.topics.open(name)
    }

    fn publish(&mut self, message: OutboundMessage) -> Result<(), PublishError> {
        self.topics.check(message.topic())?;

        let mut state = self.broker.lock();
        if state.reject_next > 0 {
            state.reject_next -= 1;
            return Err(PublishError::QueueFull);
        }
        if state.queued.len() >= self.broker.capacity {
            return Err(PublishError::QueueFull);
        }
        state.queued.push_back(message);
        state.enqueued += 1;
        Ok(())
    }

    async fn shutdown(self, _flush_timeout: Duration) -> FlushReport {
        let delivered_now = self.broker.deliver_pending();
        let mut state = self.broker.lock();
        state.shutdowns += 1;
        let report = FlushReport {
            enqueued: state.enqueued,
            delivered: state.delivered.len() as u64,
            failed: 0,
            timed_out: !state.queued.is_empty(),
        };
        if report.timed_out {
            warn!("{} messages left undelivered", state.queued.len());
        }
        debug!("Memory broker flushed {} messages", delivered_now);
        report
    }
}
