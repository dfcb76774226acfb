use serde::{Deserialize, Serialize};

/// Upper bound librdkafka accepts for either backoff setting.
pub const MAX_BACKOFF_MS: u64 = 300_000;

/// Backoff between the producer's own resend attempts.
///
/// Maps to `retry.backoff.ms` and `retry.backoff.max.ms`; the client grows the
/// delay exponentially between the two.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_backoff_ms: 100,
            max_backoff_ms: 1000,
        }
    }
}

impl RetryPolicy {
    pub fn validate(&self) -> Result<(), String> {
        if self.initial_backoff_ms == 0 || self.initial_backoff_ms > self.max_backoff_ms {
            return Err(format!(
                "initial backoff {}ms must be non-zero and not above max {}ms",
                self.initial_backoff_ms, self.max_backoff_ms
            ));
        }
        if self.max_backoff_ms > MAX_BACKOFF_MS {
            return Err(format!(
                "max backoff {}ms exceeds {}ms",
                self.max_backoff_ms, MAX_BACKOFF_MS
            ));
        }
        Ok(())
    }

    /// `(key, value)` pairs for the producer configuration.
    pub fn client_settings(&self) -> [(&'static str, String); 2] {
        [
            ("retry.backoff.ms", self.initial_backoff_ms.to_string()),
            ("retry.backoff.max.ms", self.max_backoff_ms.to_string()),
        ]
    }
}
