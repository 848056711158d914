//! The local store: schema bootstrap, typed row CRUD, and the system
//! tables (`sync_metadata`, `sync_conflicts`, `sync_queue`).
//!
//! Entity tables are registered with a `CREATE TABLE` statement (the
//! canonical one by default) and a factory; the store owns the factory
//! registry the codec materializes through. The sync engine is the only
//! writer of `sync_status`, `sync_queue` and `sync_conflicts`; the
//! helpers for those live here but are driven by the engine.

use crate::driver::{Statement, StorageDriver};
use crate::error::{Result, SyncError};
use crate::now_ms;
use dashmap::DashMap;
use serde_json::{json, Value};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tether_engine::entity::{get_bool, get_i64, get_str};
use tether_engine::{codec, EntityFactory, JsonMap, SyncEntity, SyncState, Timestamp};

const SYNC_METADATA_SQL: &str = "CREATE TABLE IF NOT EXISTS sync_metadata (
    table_name TEXT PRIMARY KEY,
    last_sync_at INTEGER,
    pending_count INTEGER NOT NULL DEFAULT 0,
    synced_count INTEGER NOT NULL DEFAULT 0,
    failed_count INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL DEFAULT 0,
    updated_at INTEGER NOT NULL DEFAULT 0
)";

const SYNC_CONFLICTS_SQL: &str = "CREATE TABLE IF NOT EXISTS sync_conflicts (
    id TEXT PRIMARY KEY,
    entity_id TEXT NOT NULL,
    entity_type TEXT NOT NULL,
    local_data TEXT NOT NULL,
    remote_data TEXT NOT NULL,
    conflict_type TEXT NOT NULL,
    detected_at INTEGER NOT NULL,
    is_resolved INTEGER NOT NULL DEFAULT 0,
    resolved_at INTEGER,
    resolution_strategy TEXT,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
)";

const SYNC_QUEUE_SQL: &str = "CREATE TABLE IF NOT EXISTS sync_queue (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    entity_id TEXT NOT NULL,
    table_name TEXT NOT NULL,
    endpoint TEXT NOT NULL,
    operation TEXT NOT NULL DEFAULT 'push',
    payload TEXT NOT NULL,
    retry_count INTEGER NOT NULL DEFAULT 0,
    max_retries INTEGER NOT NULL DEFAULT 3,
    next_retry_at INTEGER,
    last_error TEXT,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
)";

/// The canonical entity table schema: `payload` plus the indexed control
/// columns. Used when registration does not supply its own statement.
pub fn default_entity_table_sql(table: &str) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {table} (
    id TEXT PRIMARY KEY,
    payload TEXT,
    sync_status TEXT NOT NULL DEFAULT 'pending',
    version INTEGER NOT NULL DEFAULT 1,
    is_deleted INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER,
    updated_at INTEGER,
    synced_at INTEGER,
    deleted_at INTEGER,
    metadata TEXT,
    last_error TEXT
)"
    )
}

fn entity_index_sql(table: &str) -> [String; 4] {
    [
        format!("CREATE INDEX IF NOT EXISTS idx_{table}_created_at ON {table} (created_at)"),
        format!("CREATE INDEX IF NOT EXISTS idx_{table}_updated_at ON {table} (updated_at)"),
        format!("CREATE INDEX IF NOT EXISTS idx_{table}_synced_at ON {table} (synced_at)"),
        format!("CREATE INDEX IF NOT EXISTS idx_{table}_sync_status ON {table} (sync_status)"),
    ]
}

/// A registered entity table.
#[derive(Clone)]
pub struct EntityRegistration {
    pub create_sql: String,
    pub factory: EntityFactory,
}

/// A durable retry-queue entry.
#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub id: i64,
    pub entity_id: String,
    pub table_name: String,
    pub endpoint: String,
    pub operation: String,
    /// The entity's wire JSON at enqueue time, as a string.
    pub payload: String,
    pub retry_count: u32,
    pub max_retries: u32,
    pub next_retry_at: Option<Timestamp>,
    pub last_error: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl QueueEntry {
    fn from_row(row: &JsonMap) -> Result<Self> {
        Ok(Self {
            id: get_i64(row, "id")
                .ok_or_else(|| SyncError::Validation("queue row missing id".into()))?,
            entity_id: get_str(row, "entity_id").unwrap_or_default(),
            table_name: get_str(row, "table_name").unwrap_or_default(),
            endpoint: get_str(row, "endpoint").unwrap_or_default(),
            operation: get_str(row, "operation").unwrap_or_else(|| "push".to_string()),
            payload: get_str(row, "payload").unwrap_or_default(),
            retry_count: get_i64(row, "retry_count").unwrap_or(0) as u32,
            max_retries: get_i64(row, "max_retries").unwrap_or(0) as u32,
            next_retry_at: get_i64(row, "next_retry_at"),
            last_error: get_str(row, "last_error"),
            created_at: get_i64(row, "created_at").unwrap_or(0),
            updated_at: get_i64(row, "updated_at").unwrap_or(0),
        })
    }
}

/// A persisted conflict awaiting (or past) resolution.
#[derive(Debug, Clone)]
pub struct ConflictRecord {
    pub id: String,
    pub entity_id: String,
    pub entity_type: String,
    pub local_data: String,
    pub remote_data: String,
    pub conflict_type: String,
    pub detected_at: Timestamp,
    pub is_resolved: bool,
    pub resolved_at: Option<Timestamp>,
    pub resolution_strategy: Option<String>,
}

impl ConflictRecord {
    /// A fresh unresolved record with a generated id.
    pub fn new(
        entity_id: impl Into<String>,
        entity_type: impl Into<String>,
        local_data: String,
        remote_data: String,
        conflict_type: &str,
        detected_at: Timestamp,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            entity_id: entity_id.into(),
            entity_type: entity_type.into(),
            local_data,
            remote_data,
            conflict_type: conflict_type.to_string(),
            detected_at,
            is_resolved: false,
            resolved_at: None,
            resolution_strategy: None,
        }
    }

    fn from_row(row: &JsonMap) -> Result<Self> {
        Ok(Self {
            id: get_str(row, "id")
                .ok_or_else(|| SyncError::Validation("conflict row missing id".into()))?,
            entity_id: get_str(row, "entity_id").unwrap_or_default(),
            entity_type: get_str(row, "entity_type").unwrap_or_default(),
            local_data: get_str(row, "local_data").unwrap_or_default(),
            remote_data: get_str(row, "remote_data").unwrap_or_default(),
            conflict_type: get_str(row, "conflict_type").unwrap_or_default(),
            detected_at: get_i64(row, "detected_at").unwrap_or(0),
            is_resolved: get_bool(row, "is_resolved").unwrap_or(false),
            resolved_at: get_i64(row, "resolved_at"),
            resolution_strategy: get_str(row, "resolution_strategy"),
        })
    }
}

/// Durable local replica of every registered entity table.
pub struct LocalStore {
    driver: Arc<dyn StorageDriver>,
    registry: DashMap<String, EntityRegistration>,
    table_order: RwLock<Vec<String>>,
    initialized: AtomicBool,
}

impl LocalStore {
    pub fn new(driver: Arc<dyn StorageDriver>) -> Self {
        Self {
            driver,
            registry: DashMap::new(),
            table_order: RwLock::new(Vec::new()),
            initialized: AtomicBool::new(false),
        }
    }

    /// Opens the storage handle and creates the system tables plus every
    /// entity table registered so far. Safe to call again.
    pub async fn initialize(&self) -> Result<()> {
        self.driver.initialize().await?;
        self.driver.create_table(SYNC_METADATA_SQL).await?;
        self.driver.create_table(SYNC_CONFLICTS_SQL).await?;
        self.driver.create_table(SYNC_QUEUE_SQL).await?;

        let tables = self.registered_tables();
        for table in tables {
            self.create_entity_table(&table).await?;
        }

        self.initialized.store(true, Ordering::SeqCst);
        tracing::info!("local store initialized");
        Ok(())
    }

    /// Closes the storage handle.
    pub async fn close(&self) -> Result<()> {
        self.initialized.store(false, Ordering::SeqCst);
        self.driver.close().await
    }

    /// Records the factory (and schema) for a table. When the store is
    /// already initialized the table is created immediately.
    pub async fn register_entity(
        &self,
        table: &str,
        create_sql: Option<String>,
        factory: EntityFactory,
    ) -> Result<()> {
        let registration = EntityRegistration {
            create_sql: create_sql.unwrap_or_else(|| default_entity_table_sql(table)),
            factory,
        };
        let replaced = self.registry.insert(table.to_string(), registration).is_some();
        if !replaced {
            self.table_order.write().unwrap().push(table.to_string());
        }

        if self.initialized.load(Ordering::SeqCst) {
            self.create_entity_table(table).await?;
        }
        Ok(())
    }

    async fn create_entity_table(&self, table: &str) -> Result<()> {
        let create_sql = self
            .registry
            .get(table)
            .map(|r| r.create_sql.clone())
            .ok_or_else(|| SyncError::Validation(format!("table '{table}' is not registered")))?;
        self.driver.create_table(&create_sql).await?;
        for index_sql in entity_index_sql(table) {
            self.driver.create_table(&index_sql).await?;
        }
        Ok(())
    }

    /// Tables in registration order.
    pub fn registered_tables(&self) -> Vec<String> {
        self.table_order.read().unwrap().clone()
    }

    /// The factory registered for a table.
    pub fn factory(&self, table: &str) -> Option<EntityFactory> {
        self.registry.get(table).map(|r| r.factory.clone())
    }

    /// Rebuilds the domain entity for a row of `table`.
    pub fn materialize(&self, table: &str, row: &JsonMap) -> Result<Box<dyn SyncEntity>> {
        let factory = self
            .factory(table)
            .ok_or_else(|| SyncError::Validation(format!("no factory registered for '{table}'")))?;
        Ok(codec::materialize(row, &factory)?)
    }

    fn ensure_initialized(&self) -> Result<()> {
        if self.initialized.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(SyncError::NotInitialized)
        }
    }

    /// Inserts a row, stamping `created_at`/`updated_at` when absent.
    pub async fn insert(&self, table: &str, mut row: JsonMap) -> Result<()> {
        self.ensure_initialized()?;
        let now = now_ms();
        row.entry("created_at".to_string()).or_insert(json!(now));
        row.entry("updated_at".to_string()).or_insert(json!(now));
        self.driver.insert(table, &row).await?;
        Ok(())
    }

    /// Updates the row with the given id, stamping `updated_at` when the
    /// caller did not. Returns the affected count.
    pub async fn update(&self, table: &str, id: &str, mut values: JsonMap) -> Result<u64> {
        self.ensure_initialized()?;
        values
            .entry("updated_at".to_string())
            .or_insert(json!(now_ms()));
        self.driver
            .update(table, &values, "id = ?", &[json!(id)])
            .await
    }

    /// Hard-deletes the row.
    pub async fn delete(&self, table: &str, id: &str) -> Result<u64> {
        self.ensure_initialized()?;
        self.driver.delete(table, "id = ?", &[json!(id)]).await
    }

    /// Tombstones the row and marks it `pending` for the next push.
    pub async fn soft_delete(&self, table: &str, id: &str) -> Result<u64> {
        self.ensure_initialized()?;
        let now = now_ms();
        let values = json!({
            "is_deleted": 1,
            "deleted_at": now,
            "updated_at": now,
            "sync_status": SyncState::Pending.as_str(),
            "synced_at": Value::Null,
        });
        self.driver
            .update(
                table,
                values.as_object().unwrap(),
                "id = ?",
                &[json!(id)],
            )
            .await
    }

    pub async fn find_by_id(&self, table: &str, id: &str) -> Result<Option<JsonMap>> {
        self.ensure_initialized()?;
        let rows = self
            .driver
            .query(table, Some("id = ?"), &[json!(id)], None, Some(1))
            .await?;
        Ok(rows.into_iter().next())
    }

    pub async fn find_all(&self, table: &str) -> Result<Vec<JsonMap>> {
        self.ensure_initialized()?;
        self.driver
            .query(table, None, &[], Some("created_at ASC"), None)
            .await
    }

    /// Rows not yet in agreement with the remote: everything whose
    /// `sync_status` is not `synced` (including NULL).
    pub async fn find_unsynced(&self, table: &str) -> Result<Vec<JsonMap>> {
        self.ensure_initialized()?;
        self.driver
            .query(
                table,
                Some("sync_status != ? OR sync_status IS NULL"),
                &[json!(SyncState::Synced.as_str())],
                Some("created_at ASC"),
                None,
            )
            .await
    }

    pub async fn count(&self, table: &str) -> Result<u64> {
        self.ensure_initialized()?;
        let rows = self
            .driver
            .raw_query(&format!("SELECT COUNT(*) AS n FROM {table}"), &[])
            .await?;
        Ok(rows
            .first()
            .and_then(|r| get_i64(r, "n"))
            .unwrap_or(0) as u64)
    }

    pub async fn count_unsynced(&self, table: &str) -> Result<u64> {
        self.ensure_initialized()?;
        let rows = self
            .driver
            .raw_query(
                &format!(
                    "SELECT COUNT(*) AS n FROM {table} \
                     WHERE sync_status != ? OR sync_status IS NULL"
                ),
                &[json!(SyncState::Synced.as_str())],
            )
            .await?;
        Ok(rows
            .first()
            .and_then(|r| get_i64(r, "n"))
            .unwrap_or(0) as u64)
    }

    pub async fn raw_query(&self, sql: &str, args: &[Value]) -> Result<Vec<JsonMap>> {
        self.ensure_initialized()?;
        self.driver.raw_query(sql, args).await
    }

    pub async fn raw_execute(&self, sql: &str, args: &[Value]) -> Result<u64> {
        self.ensure_initialized()?;
        self.driver.raw_execute(sql, args).await
    }

    /// Executes a batch of statements atomically.
    pub async fn transaction(&self, statements: &[Statement]) -> Result<()> {
        self.ensure_initialized()?;
        self.driver.transaction(statements).await
    }

    // ---- row state markers (engine-driven) ----

    /// Marks a row synced: stamps `synced_at` and clears `last_error`.
    /// Does not touch `updated_at`; syncing is not a mutation.
    pub async fn mark_synced(&self, table: &str, id: &str, synced_at: Timestamp) -> Result<u64> {
        self.ensure_initialized()?;
        let values = json!({
            "sync_status": SyncState::Synced.as_str(),
            "synced_at": synced_at,
            "last_error": Value::Null,
        });
        self.driver
            .update(table, values.as_object().unwrap(), "id = ?", &[json!(id)])
            .await
    }

    /// Moves a row into `queued`/`conflict`/`error` (or back to
    /// `pending`), recording `last_error`. Does not touch `updated_at`.
    pub async fn mark_state(
        &self,
        table: &str,
        id: &str,
        state: SyncState,
        last_error: Option<&str>,
    ) -> Result<u64> {
        self.ensure_initialized()?;
        let values = json!({
            "sync_status": state.as_str(),
            "last_error": last_error.map(|e| json!(e)).unwrap_or(Value::Null),
        });
        self.driver
            .update(table, values.as_object().unwrap(), "id = ?", &[json!(id)])
            .await
    }

    // ---- retry queue ----

    /// Appends a push entry to the durable queue.
    #[allow(clippy::too_many_arguments)]
    pub async fn enqueue_push(
        &self,
        entity_id: &str,
        table: &str,
        endpoint: &str,
        payload: &str,
        max_retries: u32,
        next_retry_at: Timestamp,
        last_error: Option<&str>,
    ) -> Result<()> {
        self.ensure_initialized()?;
        let now = now_ms();
        let row = json!({
            "entity_id": entity_id,
            "table_name": table,
            "endpoint": endpoint,
            "operation": "push",
            "payload": payload,
            "retry_count": 0,
            "max_retries": max_retries,
            "next_retry_at": next_retry_at,
            "last_error": last_error.map(|e| json!(e)).unwrap_or(Value::Null),
            "created_at": now,
            "updated_at": now,
        });
        self.driver
            .insert("sync_queue", row.as_object().unwrap())
            .await?;
        Ok(())
    }

    /// Entries whose retry time has arrived (or was never set).
    pub async fn due_queue_entries(&self, now: Timestamp) -> Result<Vec<QueueEntry>> {
        self.ensure_initialized()?;
        let rows = self
            .driver
            .raw_query(
                "SELECT * FROM sync_queue \
                 WHERE next_retry_at IS NULL OR next_retry_at <= ? \
                 ORDER BY id ASC",
                &[json!(now)],
            )
            .await?;
        rows.iter().map(QueueEntry::from_row).collect()
    }

    /// Updates an entry after a failed drain.
    pub async fn reschedule_queue_entry(
        &self,
        id: i64,
        retry_count: u32,
        next_retry_at: Timestamp,
        last_error: &str,
    ) -> Result<()> {
        self.ensure_initialized()?;
        self.driver
            .raw_execute(
                "UPDATE sync_queue \
                 SET retry_count = ?, next_retry_at = ?, last_error = ?, updated_at = ? \
                 WHERE id = ?",
                &[
                    json!(retry_count),
                    json!(next_retry_at),
                    json!(last_error),
                    json!(now_ms()),
                    json!(id),
                ],
            )
            .await?;
        Ok(())
    }

    pub async fn remove_queue_entry(&self, id: i64) -> Result<()> {
        self.ensure_initialized()?;
        self.driver
            .delete("sync_queue", "id = ?", &[json!(id)])
            .await?;
        Ok(())
    }

    /// Drops every queue entry for an entity (after a successful push).
    pub async fn remove_queue_entries_for(&self, table: &str, entity_id: &str) -> Result<u64> {
        self.ensure_initialized()?;
        self.driver
            .delete(
                "sync_queue",
                "table_name = ? AND entity_id = ?",
                &[json!(table), json!(entity_id)],
            )
            .await
    }

    /// Queue entries for one entity, oldest first.
    pub async fn queue_entries_for(&self, entity_id: &str) -> Result<Vec<QueueEntry>> {
        self.ensure_initialized()?;
        let rows = self
            .driver
            .raw_query(
                "SELECT * FROM sync_queue WHERE entity_id = ? ORDER BY id ASC",
                &[json!(entity_id)],
            )
            .await?;
        rows.iter().map(QueueEntry::from_row).collect()
    }

    // ---- conflict store ----

    /// Persists an unresolved conflict.
    pub async fn insert_conflict(&self, record: &ConflictRecord) -> Result<()> {
        self.ensure_initialized()?;
        let now = now_ms();
        let row = json!({
            "id": record.id,
            "entity_id": record.entity_id,
            "entity_type": record.entity_type,
            "local_data": record.local_data,
            "remote_data": record.remote_data,
            "conflict_type": record.conflict_type,
            "detected_at": record.detected_at,
            "is_resolved": 0,
            "created_at": now,
            "updated_at": now,
        });
        self.driver
            .insert("sync_conflicts", row.as_object().unwrap())
            .await?;
        Ok(())
    }

    /// Unresolved conflicts for a table, oldest detection first.
    pub async fn unresolved_conflicts(&self, table: &str) -> Result<Vec<ConflictRecord>> {
        self.ensure_initialized()?;
        let rows = self
            .driver
            .raw_query(
                "SELECT * FROM sync_conflicts \
                 WHERE entity_type = ? AND is_resolved = 0 \
                 ORDER BY detected_at ASC",
                &[json!(table)],
            )
            .await?;
        rows.iter().map(ConflictRecord::from_row).collect()
    }

    /// Flips a conflict record to resolved.
    pub async fn mark_conflict_resolved(
        &self,
        id: &str,
        resolved_at: Timestamp,
        strategy: &str,
    ) -> Result<()> {
        self.ensure_initialized()?;
        self.driver
            .raw_execute(
                "UPDATE sync_conflicts \
                 SET is_resolved = 1, resolved_at = ?, resolution_strategy = ?, updated_at = ? \
                 WHERE id = ?",
                &[
                    json!(resolved_at),
                    json!(strategy),
                    json!(now_ms()),
                    json!(id),
                ],
            )
            .await?;
        Ok(())
    }

    // ---- per-table summary ----

    /// Upserts the per-table summary row after a successful table sync.
    pub async fn record_table_sync(
        &self,
        table: &str,
        last_sync_at: Timestamp,
        pending_count: u64,
    ) -> Result<()> {
        self.ensure_initialized()?;
        self.driver
            .raw_execute(
                "INSERT INTO sync_metadata \
                     (table_name, last_sync_at, pending_count, created_at, updated_at) \
                 VALUES (?, ?, ?, ?, ?) \
                 ON CONFLICT(table_name) DO UPDATE SET \
                     last_sync_at = excluded.last_sync_at, \
                     pending_count = excluded.pending_count, \
                     updated_at = excluded.updated_at",
                &[
                    json!(table),
                    json!(last_sync_at),
                    json!(pending_count),
                    json!(now_ms()),
                    json!(now_ms()),
                ],
            )
            .await?;
        Ok(())
    }

    /// Parses the `sync_status` column of a row.
    pub fn row_state(row: &JsonMap) -> Option<SyncState> {
        get_str(row, "sync_status").and_then(|s| SyncState::from_str(&s).ok())
    }
}
