//! Polling configuration and the adaptive backoff state shared by the decision- and
//! activity-task pollers.
//!
//! Grounded on the teacher's `PollerConfig`/backoff bookkeeping: reset to the minimum interval
//! the moment a poll returns a task, back off multiplicatively (capped) on an empty poll.

use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PollerConfig {
    /// Interval used immediately after a poll returns a task.
    #[serde(with = "duration_millis")]
    pub min_interval: Duration,

    /// Ceiling the backoff interval is clamped to while idle.
    #[serde(with = "duration_millis")]
    pub max_interval: Duration,

    /// Multiplier applied to the interval after each empty poll.
    pub backoff_multiplier: f64,

    /// How many times the poller transparently retries a poll that the server reports as a
    /// duplicate of one already dispatched, per SPEC_FULL.md §4.4, before giving up.
    pub max_duplicate_attempts: u32,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_millis(100),
            max_interval: Duration::from_secs(5),
            backoff_multiplier: 1.5,
            max_duplicate_attempts: 5,
        }
    }
}

impl PollerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_min_interval(mut self, interval: Duration) -> Self {
        self.min_interval = interval;
        self
    }

    pub fn with_max_interval(mut self, interval: Duration) -> Self {
        self.max_interval = interval;
        self
    }

    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier.max(1.0);
        self
    }

    pub fn with_max_duplicate_attempts(mut self, attempts: u32) -> Self {
        self.max_duplicate_attempts = attempts.max(1);
        self
    }
}

/// Tracks the current poll interval for one poller instance.
pub struct Backoff {
    config: PollerConfig,
    current_interval: Duration,
}

impl Backoff {
    pub fn new(config: PollerConfig) -> Self {
        let current_interval = config.min_interval;
        Self { config, current_interval }
    }

    pub fn current_interval(&self) -> Duration {
        self.current_interval
    }

    pub fn config(&self) -> &PollerConfig {
        &self.config
    }

    /// Call after a poll that returned a task.
    pub fn reset(&mut self) {
        self.current_interval = self.config.min_interval;
    }

    /// Call after a poll that returned nothing.
    pub fn increase(&mut self) {
        let next = Duration::from_secs_f64(
            self.current_interval.as_secs_f64() * self.config.backoff_multiplier,
        );
        self.current_interval = next.min(self.config.max_interval);
    }

    /// Sleep for the current interval, waking early if `shutdown` fires. Returns `true` if
    /// shutdown was observed.
    pub async fn wait(&self, shutdown: &mut tokio::sync::watch::Receiver<bool>) -> bool {
        if *shutdown.borrow() {
            return true;
        }
        tokio::select! {
            _ = tokio::time::sleep(self.current_interval) => false,
            _ = shutdown.changed() => true,
        }
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_millis().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
