//! Shared fixtures for the integration tests: a `TodoItem` entity, its
//! factory, and a harness wiring the engine to an in-memory SQLite
//! database and a scripted mock adapter.

use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tether_client::{
    EntityFactory, JsonMap, MockAdapter, SqliteDriver, SyncConfig, SyncEntity, SyncStatus, Tether,
};
use tether_engine::entity::{get_bool, get_i64, get_str};
use tether_engine::Timestamp;
use tokio::sync::watch;

/// The test entity: a minimal todo record.
#[derive(Debug, Clone, PartialEq)]
pub struct TodoItem {
    pub id: String,
    pub title: String,
    pub completed: bool,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub synced_at: Option<Timestamp>,
    pub version: i64,
    pub is_deleted: bool,
    pub metadata: JsonMap,
}

impl TodoItem {
    pub fn new(id: &str, title: &str) -> Self {
        Self {
            id: id.to_string(),
            title: title.to_string(),
            completed: false,
            created_at: 1_000,
            updated_at: 1_000,
            synced_at: None,
            version: 1,
            is_deleted: false,
            metadata: JsonMap::new(),
        }
    }

    pub fn from_map(map: &JsonMap) -> Option<Self> {
        Some(Self {
            id: get_str(map, "id")?,
            title: get_str(map, "title").unwrap_or_default(),
            completed: get_bool(map, "completed").unwrap_or(false),
            created_at: get_i64(map, "created_at").unwrap_or(0),
            updated_at: get_i64(map, "updated_at").unwrap_or(0),
            synced_at: get_i64(map, "synced_at"),
            version: get_i64(map, "version").unwrap_or(1),
            is_deleted: get_bool(map, "is_deleted").unwrap_or(false),
            metadata: map
                .get("metadata")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default(),
        })
    }
}

impl SyncEntity for TodoItem {
    fn id(&self) -> &str {
        &self.id
    }

    fn table_name(&self) -> &str {
        "todos"
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

    fn version(&self) -> i64 {
        self.version
    }

    fn is_deleted(&self) -> bool {
        self.is_deleted
    }

    fn metadata(&self) -> JsonMap {
        self.metadata.clone()
    }

    fn to_json(&self) -> JsonMap {
        json!({
            "title": self.title,
            "completed": self.completed,
        })
        .as_object()
        .cloned()
        .unwrap()
    }

    fn touch(&mut self, now: Timestamp) {
        self.updated_at = now;
        self.synced_at = None;
    }

    fn boxed_clone(&self) -> Box<dyn SyncEntity> {
        Box::new(self.clone())
    }
}

pub fn todo_factory() -> EntityFactory {
    Arc::new(|map: JsonMap| {
        TodoItem::from_map(&map)
            .map(|todo| Box::new(todo) as Box<dyn SyncEntity>)
            .ok_or_else(|| tether_engine::Error::MissingField("id".into()))
    })
}

/// A config whose push backoff will not slow the suite down. The queue
/// schedule keeps its protocol defaults (nothing sleeps on it).
pub fn fast_config() -> SyncConfig {
    SyncConfig::default()
        .with_max_retries(2)
        .with_push_retry_delay(Duration::from_millis(5))
}

/// Opt-in test logging: `RUST_LOG=debug cargo test -- --nocapture`.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// Builds a `Tether` over in-memory SQLite and the given adapter, with
/// `todos -> /todos` registered.
pub async fn setup(adapter: Arc<MockAdapter>, config: SyncConfig) -> Tether {
    init_tracing();
    let driver = Arc::new(SqliteDriver::in_memory().await.expect("open sqlite"));
    let tether = Tether::builder()
        .driver(driver)
        .adapter(adapter)
        .config(config)
        .build()
        .await
        .expect("build tether");
    tether
        .register_entity("todos", "/todos", None, todo_factory())
        .await
        .expect("register todos");
    tether
}

/// Waits (bounded) until the status stream satisfies `predicate`.
pub async fn wait_for_status<F>(rx: &mut watch::Receiver<SyncStatus>, predicate: F)
where
    F: Fn(&SyncStatus) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if predicate(&rx.borrow_and_update()) {
                return;
            }
            rx.changed().await.expect("status channel closed");
        }
    })
    .await
    .expect("status condition not reached in time");
}

/// Asserts the core row invariant: a synced row has
/// `synced_at >= updated_at` and no standing error.
pub async fn assert_synced_rows_consistent(tether: &Tether, table: &str) {
    let rows = tether
        .store()
        .raw_query(
            &format!("SELECT * FROM {table} WHERE sync_status = 'synced'"),
            &[],
        )
        .await
        .unwrap();
    for row in &rows {
        let synced_at = get_i64(row, "synced_at").expect("synced row without synced_at");
        let updated_at = get_i64(row, "updated_at").unwrap_or(0);
        assert!(
            synced_at >= updated_at,
            "synced_at {synced_at} < updated_at {updated_at}"
        );
        assert_eq!(get_str(row, "last_error"), None);
    }
}
