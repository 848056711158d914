//! The entity contract and the per-row sync state.
//!
//! Application records participate in sync by implementing [`SyncEntity`].
//! The engine never inspects domain fields: entities travel as JSON maps,
//! and a per-table factory rebuilds them (see [`EntityFactory`]).

use crate::error::{Error, Result};
use crate::{JsonMap, Timestamp, Version};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Per-row synchronization state, stored in the `sync_status` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    /// Modified locally, not yet pushed
    Pending,
    /// Push failed, parked in the retry queue
    Queued,
    /// In agreement with the remote
    Synced,
    /// Divergent, awaiting resolution
    Conflict,
    /// Push retries exhausted
    Error,
}

impl SyncState {
    /// The canonical wire string stored in the status column.
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncState::Pending => "pending",
            SyncState::Queued => "queued",
            SyncState::Synced => "synced",
            SyncState::Conflict => "conflict",
            SyncState::Error => "error",
        }
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncState {
    type Err = Error;

    /// Case-insensitive; unknown strings fail.
    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(SyncState::Pending),
            "queued" => Ok(SyncState::Queued),
            "synced" => Ok(SyncState::Synced),
            "conflict" => Ok(SyncState::Conflict),
            "error" => Ok(SyncState::Error),
            _ => Err(Error::UnknownVariant {
                what: "sync state",
                value: s.to_string(),
            }),
        }
    }
}

/// A record that can be synchronized.
///
/// Implementations must keep `updated_at >= created_at` and bump `version`
/// on every mutation. [`touch`](SyncEntity::touch) is how the client stamps
/// a local edit: it sets `updated_at` and clears `synced_at`.
pub trait SyncEntity: fmt::Debug + Send + Sync {
    /// Stable string primary key, unique within the table.
    fn id(&self) -> &str;

    /// Table this entity is stored in; also selects the remote endpoint.
    fn table_name(&self) -> &str;

    /// Creation time, milliseconds since epoch.
    fn created_at(&self) -> Timestamp;

    /// Last modification time, milliseconds since epoch.
    fn updated_at(&self) -> Timestamp;

    /// Time of the last successful push/pull, if ever synced.
    fn synced_at(&self) -> Option<Timestamp>;

    /// Monotonically increasing version used for conflict detection.
    fn version(&self) -> Version;

    /// Tombstone flag for soft delete.
    fn is_deleted(&self) -> bool;

    /// Opaque application metadata, passed through verbatim.
    fn metadata(&self) -> JsonMap {
        JsonMap::new()
    }

    /// Full JSON rendering of the entity, domain fields included.
    fn to_json(&self) -> JsonMap;

    /// Records a local mutation: bumps `updated_at`, clears `synced_at`.
    fn touch(&mut self, now: Timestamp);

    /// Object-safe clone.
    fn boxed_clone(&self) -> Box<dyn SyncEntity>;
}

impl Clone for Box<dyn SyncEntity> {
    fn clone(&self) -> Self {
        self.boxed_clone()
    }
}

/// Builds an entity from its JSON map form.
///
/// Registered per table; invoked by the codec when materializing rows and
/// by the pull path when decoding remote objects.
pub type EntityFactory = Arc<dyn Fn(JsonMap) -> Result<Box<dyn SyncEntity>> + Send + Sync>;

/// A minimal entity carrying only raw JSON.
///
/// Used when a row must be moved (typically into the retry queue) but its
/// registered factory is missing or failed: the raw payload satisfies the
/// same contract as a domain entity for the push path.
#[derive(Debug, Clone)]
pub struct RawEntity {
    pub id: String,
    pub table: String,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub synced_at: Option<Timestamp>,
    pub version: Version,
    pub is_deleted: bool,
    /// The JSON form this entity was rebuilt from.
    pub payload: JsonMap,
}

impl RawEntity {
    /// Rebuilds a raw entity from an entity JSON map.
    ///
    /// Core fields are read from the map where present; everything is kept
    /// in `payload` so nothing is lost on the next serialization.
    pub fn from_json(table: impl Into<String>, payload: JsonMap) -> Self {
        Self {
            id: get_str(&payload, "id").unwrap_or_default(),
            table: table.into(),
            created_at: get_i64(&payload, "created_at").unwrap_or(0),
            updated_at: get_i64(&payload, "updated_at").unwrap_or(0),
            synced_at: get_i64(&payload, "synced_at"),
            version: get_i64(&payload, "version").unwrap_or(1),
            is_deleted: get_bool(&payload, "is_deleted").unwrap_or(false),
            payload,
        }
    }

    /// Overrides the id (used when the map itself had none).
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self.payload
            .insert("id".to_string(), Value::String(self.id.clone()));
        self
    }
}

impl SyncEntity for RawEntity {
    fn id(&self) -> &str {
        &self.id
    }

    fn table_name(&self) -> &str {
        &self.table
    }

    fn created_at(&self) -> Timestamp {
        self.created_at
    }

    fn updated_at(&self) -> Timestamp {
        self.updated_at
    }

    fn synced_at(&self) -> Option<Timestamp> {
        self.synced_at
    }

    fn version(&self) -> Version {
        self.version
    }

    fn is_deleted(&self) -> bool {
        self.is_deleted
    }

    fn metadata(&self) -> JsonMap {
        self.payload
            .get("metadata")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default()
    }

    fn to_json(&self) -> JsonMap {
        self.payload.clone()
    }

    fn touch(&mut self, now: Timestamp) {
        self.updated_at = now;
        self.synced_at = None;
        self.payload
            .insert("updated_at".to_string(), Value::from(now));
        self.payload.insert("synced_at".to_string(), Value::Null);
    }

    fn boxed_clone(&self) -> Box<dyn SyncEntity> {
        Box::new(self.clone())
    }
}

/// Reads a string field from a JSON map.
pub fn get_str(map: &JsonMap, key: &str) -> Option<String> {
    map.get(key).and_then(Value::as_str).map(str::to_string)
}

/// Reads an integer field from a JSON map.
pub fn get_i64(map: &JsonMap, key: &str) -> Option<i64> {
    map.get(key).and_then(Value::as_i64)
}

/// Reads a boolean field from a JSON map; accepts `true`/`false` or 0/1.
pub fn get_bool(map: &JsonMap, key: &str) -> Option<bool> {
    match map.get(key) {
        Some(Value::Bool(b)) => Some(*b),
        Some(Value::Number(n)) => n.as_i64().map(|i| i != 0),
        _ => None,
    }
}
