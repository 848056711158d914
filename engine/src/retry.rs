//! Retry pacing and batching policy.
//!
//! The schedule is fixed by the protocol: a failing push backs off by
//! `attempt x base` between attempts; a queue entry waits
//! `(retry_count + 1) x base` between drains; a freshly enqueued entry
//! waits a full minute before its first retry.

use std::time::Duration;

/// Default delay base between push attempts (`attempt x 2s`).
pub const DEFAULT_PUSH_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Default delay base between queue drains (`(retry + 1) x 3s`).
pub const DEFAULT_QUEUE_RETRY_DELAY: Duration = Duration::from_secs(3);

/// Default delay before a freshly enqueued entry becomes due.
pub const DEFAULT_QUEUE_ENQUEUE_DELAY: Duration = Duration::from_secs(60);

/// Default bound on push/pull attempts and queue retries.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default number of rows per push/pull batch.
pub const DEFAULT_BATCH_SIZE: usize = 50;

/// Batch size bounds; configured values are clamped into this range.
pub const MIN_BATCH_SIZE: usize = 1;
pub const MAX_BATCH_SIZE: usize = 500;

/// Backoff before the next push attempt (1-indexed).
pub fn push_backoff(attempt: u32, base: Duration) -> Duration {
    base * attempt
}

/// Backoff before the next drain of a queue entry.
pub fn queue_backoff(retry_count: u32, base: Duration) -> Duration {
    base * (retry_count + 1)
}

/// Clamps a configured batch size into the allowed range.
pub fn clamp_batch_size(size: usize) -> usize {
    size.clamp(MIN_BATCH_SIZE, MAX_BATCH_SIZE)
}

/// Splits items into batches of at most `size`, preserving order.
///
/// Batches are processed sequentially by the sync loop, for both local
/// unsynced rows and decoded remote arrays.
pub fn batches<T>(items: Vec<T>, size: usize) -> Vec<Vec<T>> {
    let size = clamp_batch_size(size);
    let mut out = Vec::with_capacity(items.len().div_ceil(size));
    let mut batch = Vec::with_capacity(size.min(items.len()));
    for item in items {
        batch.push(item);
        if batch.len() == size {
            out.push(std::mem::take(&mut batch));
        }
    }
    if !batch.is_empty() {
        out.push(batch);
    }
    out
}
