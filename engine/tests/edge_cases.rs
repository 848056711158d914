//! Edge-case tests across the engine core.

use serde_json::{json, Value};
use std::sync::Arc;
use tether_engine::codec::{entity_wire_json, materialize, serialize_for_storage};
use tether_engine::conflict::apply_strategy;
use tether_engine::{
    classify, has_conflict, ConflictKind, ConflictResolver, DefaultResolver, EntityFactory,
    JsonMap, RawEntity, ResolutionStrategy, SyncConflict, SyncEntity, SyncState,
};

fn raw_factory() -> EntityFactory {
    Arc::new(|map| Ok(Box::new(RawEntity::from_json("todos", map)) as Box<dyn SyncEntity>))
}

fn entity(id: &str, updated_at: i64, synced_at: Option<i64>, version: i64) -> RawEntity {
    let mut raw = RawEntity::from_json(
        "todos",
        json!({"id": id, "created_at": 0}).as_object().cloned().unwrap(),
    );
    raw.updated_at = updated_at;
    raw.synced_at = synced_at;
    raw.version = version;
    raw
}

#[test]
fn wire_json_always_carries_core_fields() {
    // Even an entity whose to_json forgets the core fields gets them
    // overlaid by the codec.
    let raw = RawEntity::from_json("todos", JsonMap::new()).with_id("t-1");
    let wire = entity_wire_json(&raw);

    for key in [
        "id",
        "created_at",
        "updated_at",
        "synced_at",
        "version",
        "is_deleted",
        "metadata",
    ] {
        assert!(wire.contains_key(key), "missing {key}");
    }
    assert_eq!(wire["id"], json!("t-1"));
    assert_eq!(wire["version"], json!(1));
}

#[test]
fn nested_domain_fields_survive_the_row_trip() {
    let raw = RawEntity::from_json(
        "todos",
        json!({
            "id": "t-2",
            "created_at": 10,
            "updated_at": 20,
            "checklist": [{"done": false, "text": "milk"}],
            "position": {"x": 1.5, "y": -2.0}
        })
        .as_object()
        .cloned()
        .unwrap(),
    );

    let row = serialize_for_storage(&raw, SyncState::Pending, true, None);
    let rebuilt = materialize(&row, &raw_factory()).unwrap();

    let payload = rebuilt.to_json();
    assert_eq!(payload["checklist"][0]["text"], json!("milk"));
    assert_eq!(payload["position"]["x"], json!(1.5));
}

#[test]
fn tombstone_round_trip_keeps_the_flag() {
    let mut raw = entity("t-3", 50, Some(40), 2);
    raw.is_deleted = true;

    let row = serialize_for_storage(&raw, SyncState::Pending, true, None);
    assert_eq!(row["is_deleted"], json!(1));

    let rebuilt = materialize(&row, &raw_factory()).unwrap();
    assert!(rebuilt.is_deleted());
}

#[test]
fn payload_of_wrong_json_type_falls_back_to_columns() {
    let mut row = JsonMap::new();
    row.insert("id".to_string(), json!("t-4"));
    // A JSON array is valid JSON but not an object.
    row.insert("payload".to_string(), json!("[1, 2, 3]"));
    row.insert("updated_at".to_string(), json!(77));

    let rebuilt = materialize(&row, &raw_factory()).unwrap();
    assert_eq!(rebuilt.id(), "t-4");
    assert_eq!(rebuilt.updated_at(), 77);
}

#[test]
fn conflict_detection_ignores_remote_only_movement() {
    // Local never changed since its last sync; the remote moving on is not
    // a conflict, just new data to take.
    let local = entity("t", 1000, Some(1000), 1);
    let remote = entity("t", 9000, None, 1);
    assert!(!has_conflict(&local, &remote));
}

#[test]
fn classification_prefers_tombstones_over_versions() {
    let mut local = entity("t", 1000, Some(500), 1);
    local.is_deleted = true;
    let remote = entity("t", 2000, Some(500), 5);

    assert_eq!(
        classify(&local, &remote),
        ConflictKind::LocalDeletedRemoteModified
    );
}

#[test]
fn resolver_chain_respects_priority() {
    struct PickLocal;
    impl ConflictResolver for PickLocal {
        fn name(&self) -> &str {
            "pick-local"
        }
        fn priority(&self) -> i32 {
            10
        }
        fn can_resolve(&self, _kind: ConflictKind) -> bool {
            true
        }
        fn resolve(
            &self,
            conflict: &SyncConflict,
        ) -> tether_engine::Result<Option<Box<dyn SyncEntity>>> {
            Ok(apply_strategy(ResolutionStrategy::UseLocal, conflict))
        }
        fn strategy_for(&self, _kind: ConflictKind) -> ResolutionStrategy {
            ResolutionStrategy::UseLocal
        }
    }

    let local = entity("t", 1000, Some(500), 1);
    let remote = entity("t", 2000, Some(500), 1);
    let conflict = SyncConflict::new(
        local.boxed_clone(),
        remote.boxed_clone(),
        ConflictKind::BothModified,
        3000,
    );

    // Default alone picks the remote (later timestamp)...
    let winner = DefaultResolver.resolve(&conflict).unwrap().unwrap();
    assert_eq!(winner.updated_at(), 2000);

    // ...but a higher-priority resolver would win the chain. The chain
    // itself lives in the client; here we only assert the ordering key.
    assert!(PickLocal.priority() > DefaultResolver.priority());
    let winner = PickLocal.resolve(&conflict).unwrap().unwrap();
    assert_eq!(winner.updated_at(), 1000);
}

#[test]
fn use_highest_version_tie_goes_to_remote() {
    let local = entity("t", 1000, None, 4);
    let mut remote = entity("t", 2000, None, 4);
    remote.payload.insert("marker".to_string(), json!("remote"));

    let conflict = SyncConflict::new(
        local.boxed_clone(),
        remote.boxed_clone(),
        ConflictKind::VersionMismatch,
        3000,
    );
    let winner = apply_strategy(ResolutionStrategy::UseHighestVersion, &conflict).unwrap();
    assert_eq!(winner.to_json().get("marker"), Some(&json!("remote")));
}

#[test]
fn queue_fallback_entity_pushes_the_raw_payload() {
    // A row whose factory is gone still has to reach the wire. The raw
    // entity's JSON form must be exactly what was stored.
    let stored = json!({
        "id": "orphan-1",
        "created_at": 5,
        "updated_at": 6,
        "version": 2,
        "custom": {"deep": true}
    })
    .as_object()
    .cloned()
    .unwrap();

    let raw = RawEntity::from_json("retired_table", stored.clone());
    assert_eq!(raw.table_name(), "retired_table");

    let wire = entity_wire_json(&raw);
    assert_eq!(wire["custom"], stored["custom"]);
    assert_eq!(wire["id"], json!("orphan-1"));
    assert_eq!(wire["version"], json!(2));
}

#[test]
fn strategy_strings_reject_lookalikes() {
    assert!("uselatest".parse::<ResolutionStrategy>().is_err());
    assert!("use latest".parse::<ResolutionStrategy>().is_err());
    assert!("bothmodified".parse::<ConflictKind>().is_err());
    // Exact snake_case forms pass regardless of case.
    assert!("USE_HIGHEST_VERSION".parse::<ResolutionStrategy>().is_ok());
    assert!("DATA_CORRUPTION".parse::<ConflictKind>().is_ok());
}

#[test]
fn last_error_column_is_null_when_cleared() {
    let raw = entity("t-5", 100, None, 1);
    let row = serialize_for_storage(&raw, SyncState::Synced, true, None);
    assert_eq!(row["last_error"], Value::Null);

    let row = serialize_for_storage(&raw, SyncState::Error, true, Some("HTTP 503"));
    assert_eq!(row["last_error"], json!("HTTP 503"));
}
