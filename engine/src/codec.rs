//! Codec between entities and storage rows.
//!
//! A storage row is a flat JSON map of primitive scalars: the `payload`
//! column holds the entity's full JSON form as a string, and the control
//! columns (`sync_status`, `version`, `is_deleted`, timestamps,
//! `metadata`, `last_error`) mirror the fields the store indexes on.
//!
//! Round trip: `materialize(serialize_for_storage(e, ..)) == e` on all
//! core fields, up to the sync bookkeeping keys the overlay adds.

use crate::entity::{get_bool, get_i64, get_str, EntityFactory, SyncEntity, SyncState};
use crate::error::Result;
use crate::JsonMap;
use serde_json::Value;

/// The entity's JSON form as sent over the wire and stored in `payload`.
///
/// Core fields are overlaid from the accessors so the guarantee that
/// `id`, timestamps, `version`, `is_deleted` and `metadata` are populated
/// holds for any [`SyncEntity`] implementation.
pub fn entity_wire_json(entity: &dyn SyncEntity) -> JsonMap {
    let mut map = entity.to_json();
    map.insert("id".to_string(), Value::String(entity.id().to_string()));
    map.insert("created_at".to_string(), Value::from(entity.created_at()));
    map.insert("updated_at".to_string(), Value::from(entity.updated_at()));
    map.insert(
        "synced_at".to_string(),
        entity.synced_at().map(Value::from).unwrap_or(Value::Null),
    );
    map.insert("version".to_string(), Value::from(entity.version()));
    map.insert("is_deleted".to_string(), Value::Bool(entity.is_deleted()));
    map.insert("metadata".to_string(), Value::Object(entity.metadata()));
    map
}

/// Produces the storage row for an entity.
///
/// `include_id` controls whether the `id` column is part of the map
/// (inserts want it, updates key on it separately). `last_error` is
/// written as given; `None` clears the column.
pub fn serialize_for_storage(
    entity: &dyn SyncEntity,
    state: SyncState,
    include_id: bool,
    last_error: Option<&str>,
) -> JsonMap {
    let payload = entity_wire_json(entity);

    let mut row = JsonMap::new();
    if include_id {
        row.insert("id".to_string(), Value::String(entity.id().to_string()));
    }
    row.insert(
        "payload".to_string(),
        Value::String(Value::Object(payload).to_string()),
    );
    row.insert(
        "sync_status".to_string(),
        Value::String(state.as_str().to_string()),
    );
    row.insert("version".to_string(), Value::from(entity.version()));
    row.insert(
        "is_deleted".to_string(),
        Value::from(i64::from(entity.is_deleted())),
    );
    row.insert("created_at".to_string(), Value::from(entity.created_at()));
    row.insert("updated_at".to_string(), Value::from(entity.updated_at()));
    row.insert(
        "synced_at".to_string(),
        entity.synced_at().map(Value::from).unwrap_or(Value::Null),
    );
    row.insert(
        "metadata".to_string(),
        Value::String(Value::Object(entity.metadata()).to_string()),
    );
    row.insert(
        "last_error".to_string(),
        last_error
            .map(|e| Value::String(e.to_string()))
            .unwrap_or(Value::Null),
    );
    row
}

/// Rebuilds an entity from a storage row via the table's factory.
///
/// The `payload` column is decoded first (an empty map when missing or
/// malformed), then the authoritative control columns are overlaid so the
/// factory always sees the store's view of `updated_at`, `synced_at`,
/// `version`, `is_deleted`, `sync_status`, `deleted_at` and `last_error`.
pub fn materialize(row: &JsonMap, factory: &EntityFactory) -> Result<Box<dyn SyncEntity>> {
    let mut map = row
        .get("payload")
        .and_then(Value::as_str)
        .and_then(|s| serde_json::from_str::<Value>(s).ok())
        .and_then(|v| v.as_object().cloned())
        .unwrap_or_default();

    if let Some(id) = get_str(row, "id") {
        map.insert("id".to_string(), Value::String(id));
    }
    if let Some(updated_at) = get_i64(row, "updated_at") {
        map.insert("updated_at".to_string(), Value::from(updated_at));
    }
    match row.get("synced_at") {
        // A NULL column means "not synced", even when the stored payload
        // still carries an older value.
        Some(Value::Null) => {
            map.insert("synced_at".to_string(), Value::Null);
        }
        Some(value) if value.as_i64().is_some() => {
            map.insert("synced_at".to_string(), value.clone());
        }
        _ => {}
    }
    if let Some(version) = get_i64(row, "version") {
        map.insert("version".to_string(), Value::from(version));
    }
    if let Some(is_deleted) = get_bool(row, "is_deleted") {
        map.insert("is_deleted".to_string(), Value::Bool(is_deleted));
    }
    if let Some(status) = get_str(row, "sync_status") {
        map.insert("sync_status".to_string(), Value::String(status));
    }
    if let Some(deleted_at) = get_i64(row, "deleted_at") {
        map.insert("deleted_at".to_string(), Value::from(deleted_at));
    }
    if let Some(last_error) = get_str(row, "last_error") {
        map.insert("last_error".to_string(), Value::String(last_error));
    }

    factory(map)
}
