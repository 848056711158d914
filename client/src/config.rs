//! Configuration for the sync client.

use std::time::Duration;
use tether_engine::retry;

/// Tunables for the sync engine.
///
/// The defaults reproduce the protocol's schedule: batches of 50, three
/// attempts per push/pull, push backoff of `attempt x 2s`, queue backoff
/// of `(retry + 1) x 3s`, a one-minute delay before a fresh queue entry
/// becomes due, and a five-minute auto-sync interval.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Rows per push/pull batch; clamped to `[1, 500]` on use.
    pub batch_size: usize,
    /// Attempts per push and per pull; also the queue retry bound.
    pub max_retries: u32,
    /// Period of the auto-sync timer.
    pub auto_sync_interval: Duration,
    /// Timeout applied to every HTTP request.
    pub http_timeout: Duration,
    /// Base for the in-push backoff (`attempt x base`).
    pub push_retry_delay: Duration,
    /// Base for the between-drain queue backoff (`(retry + 1) x base`).
    pub queue_retry_delay: Duration,
    /// Delay before a freshly enqueued entry becomes due.
    pub queue_enqueue_delay: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_size: retry::DEFAULT_BATCH_SIZE,
            max_retries: retry::DEFAULT_MAX_RETRIES,
            auto_sync_interval: Duration::from_secs(300),
            http_timeout: Duration::from_secs(30),
            push_retry_delay: retry::DEFAULT_PUSH_RETRY_DELAY,
            queue_retry_delay: retry::DEFAULT_QUEUE_RETRY_DELAY,
            queue_enqueue_delay: retry::DEFAULT_QUEUE_ENQUEUE_DELAY,
        }
    }
}

impl SyncConfig {
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_auto_sync_interval(mut self, interval: Duration) -> Self {
        self.auto_sync_interval = interval;
        self
    }

    pub fn with_http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = timeout;
        self
    }

    pub fn with_push_retry_delay(mut self, delay: Duration) -> Self {
        self.push_retry_delay = delay;
        self
    }

    pub fn with_queue_retry_delay(mut self, delay: Duration) -> Self {
        self.queue_retry_delay = delay;
        self
    }

    pub fn with_queue_enqueue_delay(mut self, delay: Duration) -> Self {
        self.queue_enqueue_delay = delay;
        self
    }

    /// Batch size clamped into the allowed range.
    pub fn effective_batch_size(&self) -> usize {
        retry::clamp_batch_size(self.batch_size)
    }

    /// Attempt bound, never below one.
    pub fn effective_max_retries(&self) -> u32 {
        self.max_retries.max(1)
    }
}
