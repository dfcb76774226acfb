//! Sampling loop that drives the whole bridge.
//!
//! ```text
//! ┌─────────── RUNNING ───────────┐
//! │ cancelled? ── yes ──► STOPPING ──► publisher.shutdown()
//! │   │ no                        │
//! │ sleep(poll_interval)          │
//! │ try_read_event ─ none ─► top  │
//! │ classify ─ error ─► log, top  │
//! │ encode, publish ─ error ─► log│
//! └───────────────────────────────┘
//! ```
//!
//! Everything runs on the caller's task. The only suspension points are the
//! rate-limit sleep and the final bounded flush.

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::bus::{FlushReport, OutboundMessage, Publisher, TopicHandle};
use crate::controller::{classify, describe, EventSource, ReadOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Running,
    Stopping,
}

#[derive(Clone, Debug)]
pub struct PipelineSettings {
    pub poll_interval: Duration,
    pub flush_timeout: Duration,
    pub stats_interval: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(1),
            flush_timeout: Duration::from_secs(5),
            stats_interval: Duration::from_secs(10),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub sample_attempts: u64,
    pub events_read: u64,
    pub published: u64,
    pub dropped_unknown: u64,
    pub dropped_encode: u64,
    pub dropped_publish: u64,
    pub read_errors: u64,
}

#[derive(Clone, Debug)]
pub struct PipelineReport {
    pub stats: PipelineStats,
    pub flush: FlushReport,
}

pub struct Pipeline<S, P> {
    source: S,
    publisher: P,
    topic: TopicHandle,
    settings: PipelineSettings,
    stats: PipelineStats,
    state: LoopState,
    consecutive_read_errors: u64,
}

impl<S: EventSource, P: Publisher> Pipeline<S, P> {
    pub fn new(source: S, publisher: P, topic: TopicHandle, settings: PipelineSettings) -> Self {
        debug!("Creating pipeline with settings: {:?}", settings);
        Self {
            source,
            publisher,
            topic,
            settings,
            stats: PipelineStats::default(),
            state: LoopState::Running,
            consecutive_read_errors: 0,
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }

    /// Runs until `shutdown` is cancelled, then flushes the publisher.
    pub async fn run(mut self, shutdown: CancellationToken) -> PipelineReport {
        info!(
            "Pipeline running: publishing to {} every {:?}",
            self.topic, self.settings.poll_interval
        );

        let mut window = self.stats.clone();
        let mut last_log_time = Instant::now();

        while self.state == LoopState::Running {
            if shutdown.is_cancelled() {
                info!("Shutdown requested, leaving sampling loop");
                self.state = LoopState::Stopping;
                continue;
            }

            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Shutdown requested during rate-limit sleep");
                    self.state = LoopState::Stopping;
                    continue;
                }
                _ = tokio::time::sleep(self.settings.poll_interval) => {}
            }

            self.step();

            let now = Instant::now();
            if now - last_log_time >= self.settings.stats_interval {
                let elapsed = (now - last_log_time).as_secs_f64();
                info!(
                    "Pipeline stats: {} events read, {} published, {} dropped in last {:.0} seconds (avg {:.2}/sec)",
                    self.stats.events_read - window.events_read,
                    self.stats.published - window.published,
                    self.dropped() - (window.dropped_unknown + window.dropped_encode + window.dropped_publish),
                    elapsed,
                    (self.stats.published - window.published) as f64 / elapsed
                );
                window = self.stats.clone();
                last_log_time = now;
            }
        }

        let Self {
            source,
            publisher,
            settings,
            stats,
            ..
        } = self;
        drop(source);

        let flush = publisher.shutdown(settings.flush_timeout).await;
        info!(
            "Pipeline stopped: {} sample attempts, {} events, {} published, {} dropped",
            stats.sample_attempts,
            stats.events_read,
            stats.published,
            stats.dropped_unknown + stats.dropped_encode + stats.dropped_publish
        );
        PipelineReport { stats, flush }
    }

    fn dropped(&self) -> u64 {
        self.stats.dropped_unknown + self.stats.dropped_encode + self.stats.dropped_publish
    }

    /// One sample attempt: read, classify, encode, publish.
    ///
    /// Every failure is logged and counted here; nothing escapes to the loop.
    pub fn step(&mut self) {
        self.stats.sample_attempts += 1;

        let raw = match self.source.try_read_event() {
            Ok(ReadOutcome::Event(raw)) => {
                self.consecutive_read_errors = 0;
                raw
            }
            Ok(ReadOutcome::NoEventAvailable) => {
                self.consecutive_read_errors = 0;
                return;
            }
            Err(e) => {
                self.stats.read_errors += 1;
                self.consecutive_read_errors += 1;
                // Only the first of a run, a vanished device fails every poll
                if self.consecutive_read_errors == 1 {
                    warn!("Failed to sample input device: {}", e);
                } else {
                    debug!("Failed to sample input device: {}", e);
                }
                return;
            }
        };
        self.stats.events_read += 1;

        if raw.is_initial() {
            debug!("Initial state report for control {}", raw.number);
        }

        let event = match classify(&raw) {
            Ok(event) => event,
            Err(e) => {
                self.stats.dropped_unknown += 1;
                warn!("Dropping event: {}", e);
                return;
            }
        };
        debug!("{}", describe(&event));

        let message = match OutboundMessage::from_event(self.topic.clone(), &event) {
            Ok(message) => message,
            Err(e) => {
                self.stats.dropped_encode += 1;
                error!("Failed to encode event {:?}: {}", event, e);
                return;
            }
        };
        debug!("Sending packet: {}", message);

        match self.publisher.publish(message) {
            Ok(()) => self.stats.published += 1,
            Err(e) => {
                self.stats.dropped_publish += 1;
                error!("Failed to produce to topic {}: {}", self.topic, e);
            }
        }
    }
}
