use std::net::Ipv6Addr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use rdkafka::client::ClientContext;
use rdkafka::config::{ClientConfig, RDKafkaLogLevel};
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::producer::{BaseRecord, DeliveryResult, Producer, ProducerContext, ThreadedProducer};
use sysinfo::System;
use tracing::{debug, error, info, trace, warn};

use super::{AckPolicy, FlushReport, OutboundMessage, PublishError, Publisher, RetryPolicy, TopicHandle, TopicSlot};

const MAX_CLIENT_ID_LEN: usize = 256;
// librdkafka stores both as a C int
const MAX_CLIENT_INT: u64 = i32::MAX as u64;

// Broker client options, validated by `ProducerSession::configure`
#[derive(Clone, Debug)]
pub struct SessionOptions {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub acks: AckPolicy,
    pub queue_capacity: usize,
    pub message_timeout: Duration,
    pub retry: RetryPolicy,
}

// Session setup errors, all fatal at startup
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Invalid broker host {0:?}")]
    InvalidHost(String),

    #[error("Invalid broker port {0}")]
    InvalidPort(u16),

    #[error("Invalid client id {0:?}")]
    InvalidClientId(String),

    #[error("Message timeout must be between 1ms and 2147483647ms, got {0:?}")]
    InvalidMessageTimeout(Duration),

    #[error("Send queue capacity must be between 1 and 2147483647, got {0}")]
    InvalidQueueCapacity(usize),

    #[error("Invalid retry policy: {0}")]
    InvalidRetryPolicy(String),

    #[error("Invalid topic {topic:?}: {reason}")]
    InvalidTopic { topic: String, reason: &'static str },

    #[error("Session already publishes to {open:?}, cannot open {requested:?}")]
    TopicAlreadyOpen { open: String, requested: String },

    #[error("Broker client refused configuration: {0}")]
    Client(#[source] KafkaError),

    #[error("Failed to lookup hostname")]
    Hostname,
}

/// Local hostname, used as the default client id.
pub fn local_hostname() -> Result<String, SessionError> {
    System::host_name()
        .filter(|name| !name.is_empty())
        .ok_or(SessionError::Hostname)
}

impl SessionOptions {
    /// Checks every option librdkafka would otherwise reject or misread.
    pub fn validate(&self) -> Result<(), SessionError> {
        let host_ok = !self.host.is_empty()
            && !self.host.chars().any(|c| c.is_whitespace() || c == '/' || c == ',')
            && (!self.host.contains(':') || self.host.parse::<Ipv6Addr>().is_ok());
        if !host_ok {
            return Err(SessionError::InvalidHost(self.host.clone()));
        }
        if self.port == 0 {
            return Err(SessionError::InvalidPort(self.port));
        }
        if self.client_id.is_empty()
            || self.client_id.starts_with(char::is_whitespace)
            || self.client_id.len() > MAX_CLIENT_ID_LEN
            || self.client_id.chars().any(char::is_control)
        {
            return Err(SessionError::InvalidClientId(self.client_id.clone()));
        }
        let timeout_ms = self.message_timeout.as_millis();
        if timeout_ms == 0 || timeout_ms > u128::from(MAX_CLIENT_INT) {
            return Err(SessionError::InvalidMessageTimeout(self.message_timeout));
        }
        if self.queue_capacity == 0 || self.queue_capacity as u64 > MAX_CLIENT_INT {
            return Err(SessionError::InvalidQueueCapacity(self.queue_capacity));
        }
        self.retry.validate().map_err(SessionError::InvalidRetryPolicy)?;
        Ok(())
    }

    /// `host:port`, with IPv6 literals bracketed.
    pub fn bootstrap_servers(&self) -> String {
        if self.host.parse::<Ipv6Addr>().is_ok() {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    pub fn client_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", self.bootstrap_servers())
            .set("client.id", &self.client_id)
            .set("acks", self.acks.as_config_value())
            .set("queue.buffering.max.messages", self.queue_capacity.to_string())
            .set("message.timeout.ms", self.message_timeout.as_millis().to_string());
        for (key, value) in self.retry.client_settings() {
            config.set(key, value);
        }
        config
    }
}

/// Producer context: counts delivery reports and forwards librdkafka's own
/// logging into tracing.
#[derive(Debug, Default)]
pub struct DeliveryCounter {
    delivered: AtomicU64,
    failed: AtomicU64,
}

impl DeliveryCounter {
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Acquire)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Acquire)
    }

    fn record_success(&self) {
        self.delivered.fetch_add(1, Ordering::AcqRel);
    }

    fn record_failure(&self, error: &KafkaError) {
        warn!("Message not delivered: {}", error);
        self.failed.fetch_add(1, Ordering::AcqRel);
    }
}

impl ClientContext for DeliveryCounter {
    fn log(&self, level: RDKafkaLogLevel, fac: &str, log_message: &str) {
        match level {
            RDKafkaLogLevel::Emerg
            | RDKafkaLogLevel::Alert
            | RDKafkaLogLevel::Critical
            | RDKafkaLogLevel::Error => error!("librdkafka {}: {}", fac, log_message),
            RDKafkaLogLevel::Warning => warn!("librdkafka {}: {}", fac, log_message),
            RDKafkaLogLevel::Notice | RDKafkaLogLevel::Info => info!("librdkafka {}: {}", fac, log_message),
            RDKafkaLogLevel::Debug => debug!("librdkafka {}: {}", fac, log_message),
        }
    }

    // Connection problems land here; the client keeps retrying on its own
    fn error(&self, error: KafkaError, reason: &str) {
        warn!("Broker client error: {} ({})", error, reason);
    }
}

impl ProducerContext for DeliveryCounter {
    type DeliveryOpaque = ();

    fn delivery(&self, delivery_result: &DeliveryResult<'_>, _: Self::DeliveryOpaque) {
        match delivery_result {
            Ok(_) => {
                trace!("Delivery confirmed");
                self.record_success();
            }
            Err((e, _)) => self.record_failure(e),
        }
    }
}

/// Broker session backed by an rdkafka threaded producer.
///
/// `publish` only appends to librdkafka's bounded local queue. The client's
/// background threads connect, batch, resend with backoff and report each
/// outcome to the [`DeliveryCounter`].
pub struct ProducerSession {
    producer: ThreadedProducer<DeliveryCounter>,
    topics: TopicSlot,
    enqueued: u64,
}

impl ProducerSession {
    pub fn configure(options: SessionOptions) -> Result<Self, SessionError> {
        options.validate()?;
        info!(
            "Configuring producer {} for broker {} (acks: {})",
            options.client_id,
            options.bootstrap_servers(),
            options.acks.as_config_value()
        );

        let producer = options
            .client_config()
            .create_with_context(DeliveryCounter::default())
            .map_err(SessionError::Client)?;
        debug!("Created producer with send queue capacity {}", options.queue_capacity);

        Ok(Self {
            producer,
            topics: TopicSlot::default(),
            enqueued: 0,
        })
    }

    pub fn enqueued(&self) -> u64 {
        self.enqueued
    }
}

impl Publisher for ProducerSession {
    fn open_topic(&mut self, name: &str) -> Result<TopicHandle, SessionError> {
        let handle = self.topics.open(name)?;
        debug!("Topic {} ready", handle);
        Ok(handle)
    }

    fn publish(&mut self, message: OutboundMessage) -> Result<(), PublishError> {
        self.topics.check(message.topic())?;

        let (topic, payload) = message.into_parts();
        let record = BaseRecord::<(), [u8]>::to(topic.name()).payload(&payload[..]);
        match self.producer.send(record) {
            Ok(()) => {
                self.enqueued += 1;
                Ok(())
            }
            Err((KafkaError::MessageProduction(RDKafkaErrorCode::QueueFull), _)) => Err(PublishError::QueueFull),
            Err((e, _)) => Err(PublishError::Rejected(e.to_string())),
        }
    }

    async fn shutdown(self, flush_timeout: Duration) -> FlushReport {
        let enqueued = self.enqueued;
        info!("Flushing {} enqueued messages (timeout {:?})", enqueued, flush_timeout);

        let producer = self.producer;
        let flushed = tokio::task::spawn_blocking(move || {
            let result = producer.flush(flush_timeout);
            (producer, result)
        })
        .await;

        let report = match flushed {
            Ok((producer, result)) => {
                if let Err(e) = &result {
                    warn!(
                        "Flush did not complete ({}), {} messages still in flight",
                        e,
                        producer.in_flight_count()
                    );
                }
                flush_report(enqueued, producer.context(), result.is_ok())
            }
            Err(e) => {
                error!("Flush task failed: {}", e);
                FlushReport {
                    enqueued,
                    timed_out: true,
                    ..FlushReport::default()
                }
            }
        };

        info!(
            "Producer closed: {} delivered, {} failed, {} undelivered",
            report.delivered,
            report.failed,
            report.undelivered()
        );
        report
    }
}

fn flush_report(enqueued: u64, counter: &DeliveryCounter, flushed: bool) -> FlushReport {
    FlushReport {
        enqueued,
        delivered: counter.delivered(),
        failed: counter.failed(),
        timed_out: !flushed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> SessionOptions {
        SessionOptions {
            host: "127.0.0.1".to_string(),
            // Nothing listens here, messages stay queued
            port: 1,
            client_id: "bridge-test".to_string(),
            acks: AckPolicy::All,
            queue_capacity: 2,
            message_timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
        }
    }

    #[test]
    fn rejects_bad_options() {
        let invalid = |opts: SessionOptions| opts.validate().unwrap_err();

        assert!(matches!(invalid(SessionOptions { host: String::new(), ..options() }), SessionError::InvalidHost(_)));
        assert!(matches!(invalid(SessionOptions { host: "tcp://broker".into(), ..options() }), SessionError::InvalidHost(_)));
        assert!(matches!(invalid(SessionOptions { host: "broker:9092".into(), ..options() }), SessionError::InvalidHost(_)));
        assert!(matches!(invalid(SessionOptions { host: "a,b".into(), ..options() }), SessionError::InvalidHost(_)));
        assert!(matches!(invalid(SessionOptions { port: 0, ..options() }), SessionError::InvalidPort(0)));
        assert!(matches!(invalid(SessionOptions { client_id: " padded".into(), ..options() }), SessionError::InvalidClientId(_)));
        assert!(matches!(invalid(SessionOptions { client_id: String::new(), ..options() }), SessionError::InvalidClientId(_)));
        assert!(matches!(
            invalid(SessionOptions { message_timeout: Duration::ZERO, ..options() }),
            SessionError::InvalidMessageTimeout(_)
        ));
        assert!(matches!(invalid(SessionOptions { queue_capacity: 0, ..options() }), SessionError::InvalidQueueCapacity(0)));
        assert!(matches!(
            invalid(SessionOptions { retry: RetryPolicy { initial_backoff_ms: 900, max_backoff_ms: 100 }, ..options() }),
            SessionError::InvalidRetryPolicy(_)
        ));
    }

    #[test]
    fn ipv6_literal_is_bracketed() {
        let opts = SessionOptions { host: "::1".into(), ..options() };
        assert!(opts.validate().is_ok());
        assert_eq!(opts.bootstrap_servers(), "[::1]:1");
    }

    #[test]
    fn client_config_carries_options() {
        let config = options().client_config();
        assert_eq!(config.get("bootstrap.servers"), Some("127.0.0.1:1"));
        assert_eq!(config.get("client.id"), Some("bridge-test"));
        assert_eq!(config.get("acks"), Some("all"));
        assert_eq!(config.get("queue.buffering.max.messages"), Some("2"));
        assert_eq!(config.get("message.timeout.ms"), Some("30000"));
        assert_eq!(config.get("retry.backoff.ms"), Some("100"));
        assert_eq!(config.get("retry.backoff.max.ms"), Some("1000"));
    }

    #[test]
    fn hostname_is_available() {
        let host = local_hostname().unwrap();
        assert!(!host.is_empty());
    }

    #[test]
    fn completed_flush_reports_every_delivery() {
        let counter = DeliveryCounter::default();
        for _ in 0..3 {
            counter.record_success();
        }
        let report = flush_report(3, &counter, true);
        assert!(!report.timed_out);
        assert_eq!(report.delivered, 3);
        assert_eq!(report.undelivered(), 0);
    }

    #[test]
    fn failed_deliveries_are_not_undelivered() {
        let counter = DeliveryCounter::default();
        counter.record_success();
        counter.record_failure(&KafkaError::MessageProduction(RDKafkaErrorCode::MessageTimedOut));
        let report = flush_report(3, &counter, false);
        assert!(report.timed_out);
        assert_eq!(report.failed, 1);
        assert_eq!(report.undelivered(), 1);
    }

    #[tokio::test]
    async fn full_queue_fails_immediately() {
        let mut session = ProducerSession::configure(options()).unwrap();
        let topic = session.open_topic("joystick").unwrap();

        let message = || OutboundMessage::new(topic.clone(), b"{}".to_vec());
        assert_eq!(session.publish(message()), Ok(()));
        assert_eq!(session.publish(message()), Ok(()));
        assert_eq!(session.publish(message()), Err(PublishError::QueueFull));
        assert_eq!(session.enqueued(), 2);

        let report = session.shutdown(Duration::from_millis(100)).await;
        assert!(report.timed_out);
        assert_eq!(report.undelivered(), 2);
    }

    #[tokio::test]
    async fn shutdown_without_traffic_completes_flush() {
        let session = ProducerSession::configure(options()).unwrap();
        let started = std::time::Instant::now();
        let report = session.shutdown(Duration::from_millis(200)).await;
        assert!(!report.timed_out);
        assert_eq!(report.enqueued, 0);
        assert_eq!(report.undelivered(), 0);
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}
