//! # Tether Engine
//!
//! The deterministic core of Tether, an offline-first sync client.
//!
//! This crate holds everything about synchronization that can be expressed
//! without IO: the entity contract, the storage-row codec, conflict
//! detection and resolution, the engine status snapshot, and the retry and
//! batching policy. The asynchronous machinery (SQLite store, HTTP
//! adapter, the sync loop itself) lives in `tether-client`.
//!
//! ## Design Principles
//!
//! - **No IO**: this crate has no knowledge of files, network, or runtime
//! - **Deterministic**: the same inputs always produce the same outputs
//! - **Testable**: pure logic, no mocks needed
//!
//! ## Core Concepts
//!
//! ### Entities
//!
//! Application records implement [`SyncEntity`]: a stable string id, a
//! table name, millisecond timestamps, a monotonically increasing version,
//! a tombstone flag, and an opaque metadata map. The engine never reasons
//! about domain fields; it moves entities around as JSON maps and leaves
//! construction to a per-table factory.
//!
//! ### Storage rows
//!
//! [`codec`] converts between an entity and its storage row: a `payload`
//! column carrying the full JSON form plus indexed control columns
//! (`sync_status`, `version`, `is_deleted`, timestamps, `last_error`).
//! Control columns are authoritative on the way back in.
//!
//! ### Conflicts
//!
//! [`conflict`] classifies divergent replicas into a
//! [`ConflictKind`](conflict::ConflictKind) and resolves them through a
//! priority-ordered chain of [`ConflictResolver`](conflict::ConflictResolver)s.
//! The built-in [`DefaultResolver`](conflict::DefaultResolver) applies
//! last-write-wins, or highest-version for pure version divergence.
//!
//! ### Status
//!
//! [`SyncStatus`](status::SyncStatus) is the immutable snapshot broadcast
//! to observers: online/syncing flags, progress, pending and failed
//! counts, and the auto-sync schedule.

pub mod codec;
pub mod conflict;
pub mod entity;
pub mod error;
pub mod retry;
pub mod status;

// Re-export main types at crate root
pub use conflict::{
    classify, has_conflict, ConflictKind, ConflictResolver, DefaultResolver, ResolutionStrategy,
    SyncConflict,
};
pub use entity::{EntityFactory, RawEntity, SyncEntity, SyncState};
pub use error::{Error, Result};
pub use status::{SyncMode, SyncStatus};

/// Type aliases for clarity
pub type EntityId = String;
pub type TableName = String;
pub type Timestamp = i64;
pub type Version = i64;
pub type JsonMap = serde_json::Map<String, serde_json::Value>;
