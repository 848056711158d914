//! The engine status snapshot.
//!
//! [`SyncStatus`] is an immutable value describing the engine at a moment
//! in time. The client broadcasts a fresh snapshot on every change; the
//! `with_*` helpers build the next snapshot from the current one, so "not
//! touched" (method not called) and "set to absent" (`with_x(None)`) stay
//! distinct for the nullable fields.

use crate::Timestamp;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// One hour, in milliseconds. Window for [`SyncStatus::is_recently_synced`].
const RECENT_SYNC_WINDOW_MS: i64 = 3_600_000;

/// How sync cycles are triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    Manual,
    Automatic,
    Scheduled,
}

impl SyncMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncMode::Manual => "manual",
            SyncMode::Automatic => "automatic",
            SyncMode::Scheduled => "scheduled",
        }
    }
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "manual" => Ok(SyncMode::Manual),
            "automatic" => Ok(SyncMode::Automatic),
            "scheduled" => Ok(SyncMode::Scheduled),
            _ => Err(Error::UnknownVariant {
                what: "sync mode",
                value: s.to_string(),
            }),
        }
    }
}

/// Immutable snapshot of engine state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncStatus {
    pub is_online: bool,
    pub is_syncing: bool,
    /// Completion time of the last successful `sync_all`.
    pub last_sync_at: Option<Timestamp>,
    /// Rows not yet in the `synced` state, across all registered tables.
    pub pending_count: u64,
    /// Tables that failed during the last cycle.
    pub failed_count: u64,
    pub last_error: Option<String>,
    /// Progress of the running cycle, in `[0, 1]`.
    pub sync_progress: f64,
    pub auto_sync_enabled: bool,
    pub sync_mode: SyncMode,
    /// Next scheduled auto-sync tick, when auto-sync is enabled.
    pub next_sync_at: Option<Timestamp>,
}

impl Default for SyncStatus {
    fn default() -> Self {
        Self {
            is_online: false,
            is_syncing: false,
            last_sync_at: None,
            pending_count: 0,
            failed_count: 0,
            last_error: None,
            sync_progress: 0.0,
            auto_sync_enabled: false,
            sync_mode: SyncMode::Manual,
            next_sync_at: None,
        }
    }
}

impl SyncStatus {
    pub fn with_is_online(mut self, is_online: bool) -> Self {
        self.is_online = is_online;
        self
    }

    pub fn with_is_syncing(mut self, is_syncing: bool) -> Self {
        self.is_syncing = is_syncing;
        self
    }

    pub fn with_last_sync_at(mut self, last_sync_at: Option<Timestamp>) -> Self {
        self.last_sync_at = last_sync_at;
        self
    }

    pub fn with_pending_count(mut self, pending_count: u64) -> Self {
        self.pending_count = pending_count;
        self
    }

    pub fn with_failed_count(mut self, failed_count: u64) -> Self {
        self.failed_count = failed_count;
        self
    }

    pub fn with_last_error(mut self, last_error: Option<String>) -> Self {
        self.last_error = last_error;
        self
    }

    /// Clamped to `[0, 1]`.
    pub fn with_sync_progress(mut self, sync_progress: f64) -> Self {
        self.sync_progress = sync_progress.clamp(0.0, 1.0);
        self
    }

    pub fn with_auto_sync_enabled(mut self, auto_sync_enabled: bool) -> Self {
        self.auto_sync_enabled = auto_sync_enabled;
        self
    }

    pub fn with_sync_mode(mut self, sync_mode: SyncMode) -> Self {
        self.sync_mode = sync_mode;
        self
    }

    pub fn with_next_sync_at(mut self, next_sync_at: Option<Timestamp>) -> Self {
        self.next_sync_at = next_sync_at;
        self
    }

    /// Rows are still waiting to be pushed.
    pub fn has_pending_items(&self) -> bool {
        self.pending_count > 0
    }

    /// At least one table failed during the last cycle.
    pub fn has_failed_syncs(&self) -> bool {
        self.failed_count > 0
    }

    /// No failures and no standing error.
    pub fn is_healthy(&self) -> bool {
        self.failed_count == 0 && self.last_error.is_none()
    }

    /// Milliseconds since the last successful sync, if any.
    pub fn time_since_last_sync(&self, now: Timestamp) -> Option<i64> {
        self.last_sync_at.map(|at| now - at)
    }

    /// Whether a sync completed within the last hour.
    pub fn is_recently_synced(&self, now: Timestamp) -> bool {
        self.time_since_last_sync(now)
            .map(|elapsed| elapsed <= RECENT_SYNC_WINDOW_MS)
            .unwrap_or(false)
    }
}
