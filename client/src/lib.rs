//! # Tether Client
//!
//! The asynchronous half of Tether: a durable local replica in SQLite,
//! an HTTP remote, and the sync loop that reconciles the two.
//!
//! Applications talk to the [`Tether`] facade: register entity tables
//! (a `CREATE TABLE` statement plus a factory that rebuilds the domain
//! type from JSON), write through `save`/`update`/`delete` so rows land
//! marked `pending`, and call [`Tether::sync`] or enable auto-sync.
//! The engine pushes unsynced rows, pulls the remote collection,
//! arbitrates conflicts through the resolver chain, and parks failed
//! pushes in a durable retry queue with bounded backoff. Every state
//! change is broadcast as an immutable [`SyncStatus`] snapshot.
//!
//! The deterministic pieces (entity contract, codec, conflict model,
//! status snapshot, retry policy) live in [`tether_engine`].
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tether_client::{SyncConfig, Tether};
//!
//! let tether = Tether::builder()
//!     .database_url("sqlite://app.db")
//!     .base_url("https://api.example.com")
//!     .config(SyncConfig::default())
//!     .build()
//!     .await?;
//!
//! tether
//!     .register_entity("todos", "/todos", None, todo_factory())
//!     .await?;
//!
//! tether.save(&mut todo).await?;   // row is now `pending`
//! tether.sync().await?;            // push, pull, reconcile
//! ```

pub mod config;
pub mod driver;
pub mod engine;
pub mod error;
pub mod facade;
pub mod net;
pub mod store;

pub use config::SyncConfig;
pub use driver::{SqliteDriver, Statement, StorageDriver};
pub use engine::SyncEngine;
pub use error::{Result, SyncError};
pub use facade::{Tether, TetherBuilder};
pub use net::{AdapterResponse, HttpAdapter, MockAdapter, NetworkAdapter};
pub use store::LocalStore;

// Re-export the deterministic core alongside the client.
pub use tether_engine::{
    ConflictKind, ConflictResolver, DefaultResolver, EntityFactory, JsonMap, RawEntity,
    ResolutionStrategy, SyncConflict, SyncEntity, SyncMode, SyncState, SyncStatus, Timestamp,
};

/// Current wall-clock time in milliseconds since epoch.
pub(crate) fn now_ms() -> Timestamp {
    chrono::Utc::now().timestamp_millis()
}
