//! The sync engine: push, pull, conflict arbitration, retry queue
//! processing, auto-sync, and status broadcasting.
//!
//! A cycle ([`SyncEngine::sync_all`]) drains the retry queue, then runs
//! each registered table in registration order: push unsynced rows, pull
//! the remote collection, retry stored conflicts. Per-row failures are
//! recorded in row state and never abort the cycle; per-table failures
//! increment `failed_count` and continue. `sync_all` is serialized with
//! itself and is a no-op while offline.

use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::net::NetworkAdapter;
use crate::now_ms;
use crate::store::{ConflictRecord, LocalStore};
use serde_json::{json, Value};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time;
use tether_engine::codec::{entity_wire_json, serialize_for_storage};
use tether_engine::conflict::{classify, has_conflict};
use tether_engine::retry::{batches, push_backoff, queue_backoff};
use tether_engine::{
    ConflictKind, ConflictResolver, DefaultResolver, JsonMap, RawEntity, ResolutionStrategy,
    SyncConflict, SyncEntity, SyncMode, SyncState, SyncStatus,
};

const MANUAL_RESOLUTION_MESSAGE: &str = "Conflict requires manual resolution";

/// A registered `(table, endpoint)` pair, synced in registration order.
#[derive(Debug, Clone)]
pub struct TableBinding {
    pub table: String,
    pub endpoint: String,
}

enum PushOutcome {
    Synced,
    Failed(String),
}

/// The sync engine. Single writer of `sync_status`, `sync_queue` and
/// `sync_conflicts`; single writer of the status channel.
pub struct SyncEngine {
    me: Weak<SyncEngine>,
    store: Arc<LocalStore>,
    network: Arc<dyn NetworkAdapter>,
    config: RwLock<SyncConfig>,
    bindings: RwLock<Vec<TableBinding>>,
    resolvers: RwLock<Vec<Arc<dyn ConflictResolver>>>,
    status_tx: watch::Sender<SyncStatus>,
    is_syncing: AtomicBool,
    auto_sync_task: Mutex<Option<JoinHandle<()>>>,
    connectivity_task: Mutex<Option<JoinHandle<()>>>,
    disposed: AtomicBool,
}

impl SyncEngine {
    /// Builds the engine, registers the default resolver, and starts the
    /// connectivity listener. Must be called from within a runtime.
    pub fn new(
        store: Arc<LocalStore>,
        network: Arc<dyn NetworkAdapter>,
        config: SyncConfig,
    ) -> Arc<Self> {
        let initial = SyncStatus::default().with_is_online(network.is_online());
        let (status_tx, _) = watch::channel(initial);

        let engine = Arc::new_cyclic(|me| Self {
            me: me.clone(),
            store,
            network,
            config: RwLock::new(config),
            bindings: RwLock::new(Vec::new()),
            resolvers: RwLock::new(vec![
                Arc::new(DefaultResolver) as Arc<dyn ConflictResolver>
            ]),
            status_tx,
            is_syncing: AtomicBool::new(false),
            auto_sync_task: Mutex::new(None),
            connectivity_task: Mutex::new(None),
            disposed: AtomicBool::new(false),
        });
        engine.spawn_connectivity_listener();
        engine
    }

    /// Registers a table for syncing against `endpoint`.
    pub fn register_table(&self, table: impl Into<String>, endpoint: impl Into<String>) {
        self.bindings.write().unwrap().push(TableBinding {
            table: table.into(),
            endpoint: endpoint.into(),
        });
    }

    /// Adds a resolver to the chain, keeping descending priority order.
    pub fn register_resolver(&self, resolver: Arc<dyn ConflictResolver>) {
        let mut resolvers = self.resolvers.write().unwrap();
        resolvers.retain(|r| r.name() != resolver.name());
        resolvers.push(resolver);
        resolvers.sort_by_key(|r| std::cmp::Reverse(r.priority()));
    }

    /// Removes a resolver by name; returns whether one was removed.
    pub fn remove_resolver(&self, name: &str) -> bool {
        let mut resolvers = self.resolvers.write().unwrap();
        let before = resolvers.len();
        resolvers.retain(|r| r.name() != name);
        resolvers.len() != before
    }

    /// The current status snapshot.
    pub fn status(&self) -> SyncStatus {
        self.status_tx.borrow().clone()
    }

    /// Subscribes to status snapshots. The receiver observes the current
    /// snapshot immediately and every change afterwards, in order.
    pub fn subscribe(&self) -> Result<watch::Receiver<SyncStatus>> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(SyncError::ChannelClosed);
        }
        Ok(self.status_tx.subscribe())
    }

    /// Replaces the engine configuration.
    pub fn set_config(&self, config: SyncConfig) {
        *self.config.write().unwrap() = config;
    }

    /// The current engine configuration.
    pub fn config(&self) -> SyncConfig {
        self.config.read().unwrap().clone()
    }

    fn patch_status<F>(&self, patch: F)
    where
        F: FnOnce(SyncStatus) -> SyncStatus,
    {
        if self.disposed.load(Ordering::SeqCst) {
            return;
        }
        self.status_tx.send_modify(|status| *status = patch(status.clone()));
    }

    /// Runs a full sync cycle. Returns immediately (without error) while
    /// offline, mid-sync, or after [`dispose`](SyncEngine::dispose).
    pub async fn sync_all(&self) -> Result<()> {
        if self.disposed.load(Ordering::SeqCst) {
            tracing::debug!("sync skipped: engine disposed");
            return Ok(());
        }
        if !self.status().is_online {
            tracing::debug!("sync skipped: offline");
            return Ok(());
        }
        if self.is_syncing.swap(true, Ordering::SeqCst) {
            tracing::debug!("sync skipped: already syncing");
            return Ok(());
        }

        let result = self.run_cycle().await;
        self.is_syncing.store(false, Ordering::SeqCst);
        if let Err(err) = &result {
            // Engine-level failure: re-enter a consistent state.
            tracing::error!(error = %err, "sync cycle aborted");
            self.patch_status(|s| s.with_is_syncing(false));
        }
        result
    }

    async fn run_cycle(&self) -> Result<()> {
        tracing::info!("sync started");
        self.patch_status(|s| {
            s.with_is_syncing(true)
                .with_sync_progress(0.0)
                .with_failed_count(0)
        });

        self.process_sync_queue().await?;

        let bindings = { self.bindings.read().unwrap().clone() };
        let total = bindings.len().max(1);
        let mut failed: u64 = 0;

        for (index, binding) in bindings.iter().enumerate() {
            if let Err(err) = self.sync_table(&binding.table, &binding.endpoint).await {
                failed += 1;
                let message = err.to_string();
                tracing::warn!(table = %binding.table, error = %message, "table sync failed");
                self.patch_status(|s| {
                    s.with_failed_count(failed).with_last_error(Some(message))
                });
            }
            let progress = (index + 1) as f64 / total as f64;
            self.patch_status(|s| s.with_sync_progress(progress));
        }

        let pending = self.pending_count().await?;
        let now = now_ms();
        self.patch_status(|s| {
            s.with_is_syncing(false)
                .with_last_sync_at(Some(now))
                .with_sync_progress(1.0)
                .with_last_error(None)
                .with_pending_count(pending)
        });
        tracing::info!(pending, failed, "sync finished");
        Ok(())
    }

    async fn pending_count(&self) -> Result<u64> {
        let tables: Vec<String> = {
            self.bindings
                .read()
                .unwrap()
                .iter()
                .map(|b| b.table.clone())
                .collect()
        };
        let mut pending = 0;
        for table in tables {
            pending += self.store.count_unsynced(&table).await?;
        }
        Ok(pending)
    }

    /// Drains every due retry-queue entry.
    async fn process_sync_queue(&self) -> Result<()> {
        let config = self.config();
        let now = now_ms();
        let entries = self.store.due_queue_entries(now).await?;
        if entries.is_empty() {
            return Ok(());
        }
        tracing::debug!(count = entries.len(), "draining retry queue");

        for entry in entries {
            let entity = self.entity_from_queue_payload(&entry.table_name, &entry.entity_id, &entry.payload);
            match self
                .push_entity(entity.as_ref(), &entry.endpoint, false)
                .await?
            {
                PushOutcome::Synced => {
                    // The push already swept this entity's queue entries.
                    self.store.remove_queue_entry(entry.id).await.ok();
                }
                PushOutcome::Failed(message) => {
                    let retry_count = entry.retry_count + 1;
                    if retry_count >= entry.max_retries.max(1) {
                        tracing::warn!(
                            entity = %entry.entity_id,
                            table = %entry.table_name,
                            "queue retries exhausted"
                        );
                        self.store
                            .mark_state(
                                &entry.table_name,
                                &entry.entity_id,
                                SyncState::Error,
                                Some(&message),
                            )
                            .await?;
                        self.store.remove_queue_entry(entry.id).await?;
                    } else {
                        let delay = queue_backoff(retry_count, config.queue_retry_delay);
                        self.store
                            .mark_state(
                                &entry.table_name,
                                &entry.entity_id,
                                SyncState::Queued,
                                Some(&message),
                            )
                            .await?;
                        self.store
                            .reschedule_queue_entry(
                                entry.id,
                                retry_count,
                                now_ms() + delay.as_millis() as i64,
                                &message,
                            )
                            .await?;
                    }
                }
            }
        }
        Ok(())
    }

    fn entity_from_queue_payload(
        &self,
        table: &str,
        entity_id: &str,
        payload: &str,
    ) -> Box<dyn SyncEntity> {
        let mut map = serde_json::from_str::<Value>(payload)
            .ok()
            .and_then(|v| v.as_object().cloned())
            .unwrap_or_default();
        map.entry("id".to_string())
            .or_insert_with(|| Value::String(entity_id.to_string()));

        match self.store.factory(table) {
            Some(factory) => factory(map.clone())
                .unwrap_or_else(|_| Box::new(RawEntity::from_json(table, map))),
            None => Box::new(RawEntity::from_json(table, map)),
        }
    }

    /// Push, then pull, then stored-conflict retry, for one table.
    async fn sync_table(&self, table: &str, endpoint: &str) -> Result<()> {
        tracing::debug!(table, endpoint, "syncing table");
        self.push_table(table, endpoint).await?;
        self.pull_table(table, endpoint).await?;
        self.retry_stored_conflicts(table).await?;

        let pending = self.store.count_unsynced(table).await?;
        self.store.record_table_sync(table, now_ms(), pending).await?;
        Ok(())
    }

    async fn push_table(&self, table: &str, endpoint: &str) -> Result<()> {
        let config = self.config();
        let rows = self.store.find_unsynced(table).await?;
        if rows.is_empty() {
            return Ok(());
        }
        tracing::debug!(table, count = rows.len(), "pushing unsynced rows");

        for batch in batches(rows, config.effective_batch_size()) {
            for row in batch {
                match self.store.materialize(table, &row) {
                    Ok(entity) => {
                        self.push_entity(entity.as_ref(), endpoint, true).await?;
                    }
                    Err(err) => {
                        // No domain entity can be built; park the raw row
                        // in the queue so it still reaches the remote.
                        let raw = RawEntity::from_json(
                            table,
                            row_payload_map(&row),
                        );
                        let raw = if raw.id().is_empty() {
                            match tether_engine::entity::get_str(&row, "id") {
                                Some(id) => raw.with_id(id),
                                None => {
                                    tracing::warn!(table, "skipping row with no id");
                                    continue;
                                }
                            }
                        } else {
                            raw
                        };
                        let message = err.to_string();
                        tracing::warn!(
                            table,
                            entity = %raw.id(),
                            error = %message,
                            "materialization failed, queueing raw row"
                        );
                        let payload = Value::Object(entity_wire_json(&raw)).to_string();
                        self.store
                            .mark_state(table, raw.id(), SyncState::Queued, Some(&message))
                            .await?;
                        self.store
                            .enqueue_push(
                                raw.id(),
                                table,
                                endpoint,
                                &payload,
                                config.effective_max_retries(),
                                now_ms() + config.queue_enqueue_delay.as_millis() as i64,
                                Some(&message),
                            )
                            .await?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Posts one entity, retrying with backoff. On success the row is
    /// marked synced; after exhausting retries it is marked `error`, or
    /// `queued` with a retry-queue entry when `queue_on_failure` is set.
    async fn push_entity(
        &self,
        entity: &dyn SyncEntity,
        endpoint: &str,
        queue_on_failure: bool,
    ) -> Result<PushOutcome> {
        let config = self.config();
        let table = entity.table_name().to_string();
        let id = entity.id().to_string();
        let body = Value::Object(entity_wire_json(entity));
        let max_retries = config.effective_max_retries();
        let mut last_error = String::from("push failed");

        for attempt in 1..=max_retries {
            match self.network.post(endpoint, &body).await {
                Ok(response) if response.status_code == 200 || response.status_code == 201 => {
                    self.store.mark_synced(&table, &id, now_ms()).await?;
                    self.store.remove_queue_entries_for(&table, &id).await?;
                    tracing::debug!(table = %table, entity = %id, "pushed");
                    return Ok(PushOutcome::Synced);
                }
                Ok(response) => {
                    last_error = SyncError::from_status(
                        response.status_code,
                        format!("push to {endpoint} rejected with HTTP {}", response.status_code),
                    )
                    .to_string();
                }
                Err(err) => {
                    last_error = err.to_string();
                }
            }
            if attempt < max_retries {
                time::sleep(push_backoff(attempt, config.push_retry_delay)).await;
            }
        }

        if queue_on_failure {
            self.store
                .mark_state(&table, &id, SyncState::Queued, Some(&last_error))
                .await?;
            self.store
                .enqueue_push(
                    &id,
                    &table,
                    endpoint,
                    &body.to_string(),
                    max_retries,
                    now_ms() + config.queue_enqueue_delay.as_millis() as i64,
                    Some(&last_error),
                )
                .await?;
            tracing::warn!(table = %table, entity = %id, error = %last_error, "push failed, queued");
        } else {
            self.store
                .mark_state(&table, &id, SyncState::Error, Some(&last_error))
                .await?;
            tracing::warn!(table = %table, entity = %id, error = %last_error, "push failed");
        }
        Ok(PushOutcome::Failed(last_error))
    }

    async fn pull_table(&self, table: &str, endpoint: &str) -> Result<()> {
        let config = self.config();
        let max_retries = config.effective_max_retries();
        let mut response = None;
        let mut last_error = String::from("pull failed");

        for attempt in 1..=max_retries {
            match self.network.get(endpoint).await {
                Ok(r) if r.status_code == 200 => {
                    response = Some(r);
                    break;
                }
                Ok(r) => {
                    last_error = SyncError::from_status(
                        r.status_code,
                        format!("pull from {endpoint} rejected with HTTP {}", r.status_code),
                    )
                    .to_string();
                }
                Err(err) => {
                    last_error = err.to_string();
                }
            }
            if attempt < max_retries {
                time::sleep(push_backoff(attempt, config.push_retry_delay)).await;
            }
        }

        let Some(response) = response else {
            tracing::warn!(table, endpoint, error = %last_error, "pull failed after retries");
            return Ok(());
        };
        let Some(items) = response.data.as_array().cloned() else {
            tracing::warn!(table, endpoint, "pull response is not an array");
            return Ok(());
        };
        tracing::debug!(table, count = items.len(), "pulled remote entities");

        for batch in batches(items, config.effective_batch_size()) {
            for item in batch {
                let Some(object) = item.as_object() else {
                    tracing::warn!(table, "skipping non-object pull element");
                    continue;
                };
                if let Err(err) = self.apply_remote(table, object).await {
                    tracing::warn!(table, error = %err, "failed to apply remote entity");
                }
            }
        }
        Ok(())
    }

    /// Reconciles one remote object against the local replica.
    async fn apply_remote(&self, table: &str, object: &JsonMap) -> Result<()> {
        let now = now_ms();
        let factory = self.store.factory(table).ok_or_else(|| {
            SyncError::Validation(format!("no factory registered for '{table}'"))
        })?;

        let mut map = object.clone();
        map.insert("synced_at".to_string(), json!(now));
        let remote = factory(map)?;
        let id = remote.id().to_string();
        if id.is_empty() {
            return Err(SyncError::Validation("remote entity has no id".into()));
        }

        match self.store.find_by_id(table, &id).await? {
            None => {
                let row = serialize_for_storage(remote.as_ref(), SyncState::Synced, true, None);
                self.store.insert(table, row).await?;
                tracing::debug!(table, entity = %id, "inserted remote entity");
            }
            Some(local_row) => {
                let local = self.store.materialize(table, &local_row)?;
                if !has_conflict(local.as_ref(), remote.as_ref()) {
                    let row =
                        serialize_for_storage(remote.as_ref(), SyncState::Synced, false, None);
                    self.store.update(table, &id, row).await?;
                } else {
                    self.handle_conflict(table, local, remote, now).await?;
                }
            }
        }
        Ok(())
    }

    async fn handle_conflict(
        &self,
        table: &str,
        local: Box<dyn SyncEntity>,
        remote: Box<dyn SyncEntity>,
        now: i64,
    ) -> Result<()> {
        let kind = classify(local.as_ref(), remote.as_ref());
        let conflict = SyncConflict::new(local, remote, kind, now);
        tracing::debug!(
            table,
            entity = %conflict.entity_id,
            kind = %kind,
            "conflict detected"
        );

        match self.resolve_conflict(&conflict) {
            Some((winner, strategy)) => {
                self.write_resolution(table, &conflict.entity_id, winner.as_ref())
                    .await?;
                tracing::debug!(
                    table,
                    entity = %conflict.entity_id,
                    strategy = %strategy,
                    "conflict resolved"
                );
            }
            None => {
                let record = ConflictRecord::new(
                    conflict.entity_id.clone(),
                    table,
                    Value::Object(entity_wire_json(conflict.local.as_ref())).to_string(),
                    Value::Object(entity_wire_json(conflict.remote.as_ref())).to_string(),
                    kind.as_str(),
                    now,
                );
                self.store.insert_conflict(&record).await?;
                self.store
                    .mark_state(
                        table,
                        &conflict.entity_id,
                        SyncState::Conflict,
                        Some(MANUAL_RESOLUTION_MESSAGE),
                    )
                    .await?;
                tracing::warn!(
                    table,
                    entity = %conflict.entity_id,
                    "conflict stored for manual resolution"
                );
            }
        }
        Ok(())
    }

    /// Writes a resolved entity back as the synced local copy.
    async fn write_resolution(
        &self,
        table: &str,
        entity_id: &str,
        winner: &dyn SyncEntity,
    ) -> Result<()> {
        let mut row = serialize_for_storage(winner, SyncState::Synced, false, None);
        row.insert("synced_at".to_string(), json!(now_ms()));
        self.store.update(table, entity_id, row).await?;
        Ok(())
    }

    /// Runs the resolver chain: descending priority, first entity wins.
    fn resolve_conflict(
        &self,
        conflict: &SyncConflict,
    ) -> Option<(Box<dyn SyncEntity>, ResolutionStrategy)> {
        let resolvers = { self.resolvers.read().unwrap().clone() };
        for resolver in resolvers {
            if !resolver.can_resolve(conflict.kind) {
                continue;
            }
            match resolver.resolve(conflict) {
                Ok(Some(winner)) => {
                    return Some((winner, resolver.strategy_for(conflict.kind)));
                }
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!(
                        resolver = resolver.name(),
                        error = %err,
                        "resolver failed, trying next"
                    );
                }
            }
        }
        None
    }

    /// Feeds stored unresolved conflicts back through the resolver chain.
    async fn retry_stored_conflicts(&self, table: &str) -> Result<()> {
        let records = self.store.unresolved_conflicts(table).await?;
        for record in records {
            let Ok(kind) = ConflictKind::from_str(&record.conflict_type) else {
                tracing::warn!(
                    table,
                    conflict = %record.id,
                    kind = %record.conflict_type,
                    "skipping conflict with unknown kind"
                );
                continue;
            };
            let local = self.rebuild_entity(table, &record.local_data);
            let remote = self.rebuild_entity(table, &record.remote_data);
            let conflict = SyncConflict {
                entity_id: record.entity_id.clone(),
                entity_type: table.to_string(),
                local,
                remote,
                kind,
                detected_at: record.detected_at,
                is_resolved: false,
            };

            if let Some((winner, strategy)) = self.resolve_conflict(&conflict) {
                let now = now_ms();
                self.write_resolution(table, &record.entity_id, winner.as_ref())
                    .await?;
                self.store
                    .mark_conflict_resolved(&record.id, now, strategy.as_str())
                    .await?;
                tracing::info!(
                    table,
                    entity = %record.entity_id,
                    strategy = %strategy,
                    "stored conflict resolved"
                );
            }
        }
        Ok(())
    }

    fn rebuild_entity(&self, table: &str, data: &str) -> Box<dyn SyncEntity> {
        let map = serde_json::from_str::<Value>(data)
            .ok()
            .and_then(|v| v.as_object().cloned())
            .unwrap_or_default();
        match self.store.factory(table) {
            Some(factory) => factory(map.clone())
                .unwrap_or_else(|_| Box::new(RawEntity::from_json(table, map))),
            None => Box::new(RawEntity::from_json(table, map)),
        }
    }

    // ---- auto-sync ----

    /// Starts the periodic auto-sync timer. Enabling twice is a no-op.
    pub fn enable_auto_sync(&self) {
        let mut guard = self.auto_sync_task.lock().unwrap();
        if guard.is_some() {
            tracing::debug!("auto-sync already enabled");
            return;
        }
        let interval = { self.config.read().unwrap().auto_sync_interval };
        self.patch_status(|s| {
            s.with_auto_sync_enabled(true)
                .with_sync_mode(SyncMode::Automatic)
                .with_next_sync_at(Some(now_ms() + interval.as_millis() as i64))
        });

        let me = self.me.clone();
        *guard = Some(tokio::spawn(async move {
            let mut ticker = time::interval_at(time::Instant::now() + interval, interval);
            loop {
                ticker.tick().await;
                let Some(engine) = me.upgrade() else { break };
                engine.patch_status(|s| {
                    s.with_next_sync_at(Some(now_ms() + interval.as_millis() as i64))
                });
                if engine.status().is_online && !engine.is_syncing.load(Ordering::SeqCst) {
                    if let Err(err) = engine.sync_all().await {
                        tracing::warn!(error = %err, "auto-sync cycle failed");
                    }
                }
            }
        }));
        tracing::info!(interval = ?interval, "auto-sync enabled");
    }

    /// Cancels the auto-sync timer.
    pub fn disable_auto_sync(&self) {
        if let Some(task) = self.auto_sync_task.lock().unwrap().take() {
            task.abort();
        }
        self.patch_status(|s| {
            s.with_auto_sync_enabled(false)
                .with_sync_mode(SyncMode::Manual)
                .with_next_sync_at(None)
        });
        tracing::info!("auto-sync disabled");
    }

    fn spawn_connectivity_listener(&self) {
        let mut stream = self.network.connectivity_stream();
        let me = self.me.clone();
        let task = tokio::spawn(async move {
            let mut was_online = *stream.borrow();
            while stream.changed().await.is_ok() {
                let online = *stream.borrow();
                let Some(engine) = me.upgrade() else { break };
                engine.patch_status(|s| s.with_is_online(online));
                if online && !was_online {
                    tracing::info!("connectivity restored");
                    if engine.status().auto_sync_enabled {
                        if let Err(err) = engine.sync_all().await {
                            tracing::warn!(error = %err, "reconnect sync failed");
                        }
                    }
                } else if !online && was_online {
                    tracing::info!("connectivity lost");
                }
                was_online = online;
            }
        });
        *self.connectivity_task.lock().unwrap() = Some(task);
    }

    /// Cancels the timers and stops broadcasting. An in-flight cycle is
    /// allowed to complete; the status channel closes when the engine is
    /// dropped.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(task) = self.auto_sync_task.lock().unwrap().take() {
            task.abort();
        }
        if let Some(task) = self.connectivity_task.lock().unwrap().take() {
            task.abort();
        }
        tracing::info!("sync engine disposed");
    }
}

/// Decodes a row's `payload` column into a map, falling back to the raw
/// control columns when the payload is unusable.
fn row_payload_map(row: &JsonMap) -> JsonMap {
    row.get("payload")
        .and_then(Value::as_str)
        .and_then(|s| serde_json::from_str::<Value>(s).ok())
        .and_then(|v| v.as_object().cloned())
        .unwrap_or_else(|| {
            let mut map = JsonMap::new();
            for key in ["id", "created_at", "updated_at", "version", "is_deleted"] {
                if let Some(value) = row.get(key) {
                    map.insert(key.to_string(), value.clone());
                }
            }
            map
        })
}
