//! The `Tether` facade: composition root and application-level API.
//!
//! Initialization order is fixed: local store first, then the network
//! adapter, then the sync engine (which opens the status channel).
//! Application CRUD goes through here so every local write lands with
//! `sync_status = 'pending'` and a cleared `synced_at`.

use crate::config::SyncConfig;
use crate::driver::{SqliteDriver, Statement, StorageDriver};
use crate::engine::SyncEngine;
use crate::error::{Result, SyncError};
use crate::net::{HttpAdapter, NetworkAdapter};
use crate::now_ms;
use crate::store::LocalStore;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;
use tether_engine::codec::serialize_for_storage;
use tether_engine::{EntityFactory, JsonMap, SyncEntity, SyncState, SyncStatus};

/// Builder for [`Tether`].
///
/// Either give URLs (`database_url`, `base_url`) and let the builder
/// construct the SQLite driver and HTTP adapter, or inject your own
/// implementations of the two contracts.
#[derive(Default)]
pub struct TetherBuilder {
    database_url: Option<String>,
    base_url: Option<String>,
    headers: HashMap<String, String>,
    config: SyncConfig,
    driver: Option<Arc<dyn StorageDriver>>,
    adapter: Option<Arc<dyn NetworkAdapter>>,
}

impl TetherBuilder {
    /// SQLite database location, e.g. `sqlite://tether.db`.
    pub fn database_url(mut self, url: impl Into<String>) -> Self {
        self.database_url = Some(url.into());
        self
    }

    /// Remote API base URL, e.g. `https://api.example.com`.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// A default header sent with every request.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    /// Injects a storage driver instead of the SQLite default.
    pub fn driver(mut self, driver: Arc<dyn StorageDriver>) -> Self {
        self.driver = Some(driver);
        self
    }

    /// Injects a network adapter instead of the HTTP default.
    pub fn adapter(mut self, adapter: Arc<dyn NetworkAdapter>) -> Self {
        self.adapter = Some(adapter);
        self
    }

    /// Initializes the store, the adapter, and the engine, in that order.
    pub async fn build(self) -> Result<Tether> {
        let driver = match self.driver {
            Some(driver) => driver,
            None => {
                let url = self.database_url.ok_or_else(|| {
                    SyncError::Validation("database_url or driver is required".into())
                })?;
                Arc::new(SqliteDriver::open(&url).await?) as Arc<dyn StorageDriver>
            }
        };
        let store = Arc::new(LocalStore::new(driver));
        store.initialize().await?;

        let adapter = match self.adapter {
            Some(adapter) => adapter,
            None => {
                let base_url = self.base_url.ok_or_else(|| {
                    SyncError::Validation("base_url or adapter is required".into())
                })?;
                Arc::new(HttpAdapter::new(
                    base_url,
                    &self.headers,
                    self.config.http_timeout,
                )?) as Arc<dyn NetworkAdapter>
            }
        };

        let engine = SyncEngine::new(store.clone(), adapter.clone(), self.config);
        tracing::info!("tether initialized");
        Ok(Tether {
            store,
            adapter,
            engine,
        })
    }
}

/// Single entry point for applications.
pub struct Tether {
    store: Arc<LocalStore>,
    adapter: Arc<dyn NetworkAdapter>,
    engine: Arc<SyncEngine>,
}

impl Tether {
    pub fn builder() -> TetherBuilder {
        TetherBuilder::default()
    }

    /// The local store handle (the engine remains the sole writer of the
    /// sync bookkeeping tables).
    pub fn store(&self) -> &Arc<LocalStore> {
        &self.store
    }

    /// The network adapter handle.
    pub fn adapter(&self) -> &Arc<dyn NetworkAdapter> {
        &self.adapter
    }

    /// Registers an entity table: storage registration plus the sync
    /// binding to its remote endpoint.
    pub async fn register_entity(
        &self,
        table: &str,
        endpoint: &str,
        create_sql: Option<String>,
        factory: EntityFactory,
    ) -> Result<()> {
        self.store.register_entity(table, create_sql, factory).await?;
        self.engine.register_table(table, endpoint);
        Ok(())
    }

    /// Adds a conflict resolver to the chain.
    pub fn register_conflict_resolver(
        &self,
        resolver: Arc<dyn tether_engine::ConflictResolver>,
    ) {
        self.engine.register_resolver(resolver);
    }

    /// Removes a conflict resolver by name.
    pub fn remove_conflict_resolver(&self, name: &str) -> bool {
        self.engine.remove_resolver(name)
    }

    /// Persists a new entity, marked `pending` for the next sync.
    pub async fn save(&self, entity: &mut dyn SyncEntity) -> Result<()> {
        entity.touch(now_ms());
        let table = entity.table_name().to_string();
        let row = serialize_for_storage(entity, SyncState::Pending, true, None);
        self.store.insert(&table, row).await
    }

    /// Persists changes to an existing entity, marked `pending`.
    pub async fn update(&self, entity: &mut dyn SyncEntity) -> Result<()> {
        entity.touch(now_ms());
        let table = entity.table_name().to_string();
        let id = entity.id().to_string();
        let row = serialize_for_storage(entity, SyncState::Pending, false, None);
        let affected = self.store.update(&table, &id, row).await?;
        if affected == 0 {
            return Err(SyncError::EntityNotFound { table, id });
        }
        Ok(())
    }

    /// Soft-deletes: the tombstone stays queryable and will be pushed.
    pub async fn delete(&self, table: &str, id: &str) -> Result<()> {
        let affected = self.store.soft_delete(table, id).await?;
        if affected == 0 {
            return Err(SyncError::EntityNotFound {
                table: table.to_string(),
                id: id.to_string(),
            });
        }
        Ok(())
    }

    /// Destroys the row outright.
    pub async fn hard_delete(&self, table: &str, id: &str) -> Result<()> {
        let affected = self.store.delete(table, id).await?;
        if affected == 0 {
            return Err(SyncError::EntityNotFound {
                table: table.to_string(),
                id: id.to_string(),
            });
        }
        Ok(())
    }

    /// Loads one entity.
    pub async fn find_by_id(&self, table: &str, id: &str) -> Result<Option<Box<dyn SyncEntity>>> {
        match self.store.find_by_id(table, id).await? {
            Some(row) => Ok(Some(self.store.materialize(table, &row)?)),
            None => Ok(None),
        }
    }

    /// Loads every entity in a table, tombstones included.
    pub async fn find_all(&self, table: &str) -> Result<Vec<Box<dyn SyncEntity>>> {
        let rows = self.store.find_all(table).await?;
        rows.iter()
            .map(|row| self.store.materialize(table, row))
            .collect()
    }

    pub async fn count(&self, table: &str) -> Result<u64> {
        self.store.count(table).await
    }

    pub async fn raw_query(&self, sql: &str, args: &[Value]) -> Result<Vec<JsonMap>> {
        self.store.raw_query(sql, args).await
    }

    pub async fn raw_execute(&self, sql: &str, args: &[Value]) -> Result<u64> {
        self.store.raw_execute(sql, args).await
    }

    pub async fn transaction(&self, statements: &[Statement]) -> Result<()> {
        self.store.transaction(statements).await
    }

    /// Runs a full sync cycle now.
    pub async fn sync(&self) -> Result<()> {
        self.engine.sync_all().await
    }

    /// The current status snapshot.
    pub fn status(&self) -> SyncStatus {
        self.engine.status()
    }

    /// Subscribes to status snapshots.
    pub fn subscribe(&self) -> Result<watch::Receiver<SyncStatus>> {
        self.engine.subscribe()
    }

    /// Enables or disables the periodic auto-sync timer.
    pub fn set_auto_sync(&self, enabled: bool) {
        if enabled {
            self.engine.enable_auto_sync();
        } else {
            self.engine.disable_auto_sync();
        }
    }

    /// Replaces the engine configuration.
    pub fn configure(&self, config: SyncConfig) {
        self.engine.set_config(config);
    }

    /// Cancels timers and stops status broadcasting. In-flight work is
    /// allowed to finish.
    pub fn dispose(&self) {
        self.engine.dispose();
    }
}
