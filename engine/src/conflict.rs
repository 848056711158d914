//! Conflict detection and resolution.
//!
//! A conflict is the divergent evolution of one entity on the local and
//! remote replicas. Detection is pure: timestamps against the last sync
//! point, plus version comparison. Resolution runs through a chain of
//! [`ConflictResolver`]s ordered by descending priority; a resolver that
//! yields an entity wins, and a conflict nobody resolves is persisted for
//! manual handling.

use crate::entity::SyncEntity;
use crate::error::{Error, Result};
use crate::Timestamp;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How the two replicas diverged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    /// Both local and remote advanced past the last sync.
    BothModified,
    /// Local tombstone vs live remote.
    LocalDeletedRemoteModified,
    /// Local live vs remote tombstone.
    LocalModifiedRemoteDeleted,
    /// Both sides tombstoned.
    BothDeleted,
    /// Version numbers diverged without timestamp divergence.
    VersionMismatch,
    /// Payload failed validation; not resolvable automatically.
    DataCorruption,
}

impl ConflictKind {
    /// The canonical wire string stored in `sync_conflicts.conflict_type`.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictKind::BothModified => "both_modified",
            ConflictKind::LocalDeletedRemoteModified => "local_deleted_remote_modified",
            ConflictKind::LocalModifiedRemoteDeleted => "local_modified_remote_deleted",
            ConflictKind::BothDeleted => "both_deleted",
            ConflictKind::VersionMismatch => "version_mismatch",
            ConflictKind::DataCorruption => "data_corruption",
        }
    }
}

impl fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConflictKind {
    type Err = Error;

    /// Case-insensitive; unknown strings fail.
    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "both_modified" => Ok(ConflictKind::BothModified),
            "local_deleted_remote_modified" => Ok(ConflictKind::LocalDeletedRemoteModified),
            "local_modified_remote_deleted" => Ok(ConflictKind::LocalModifiedRemoteDeleted),
            "both_deleted" => Ok(ConflictKind::BothDeleted),
            "version_mismatch" => Ok(ConflictKind::VersionMismatch),
            "data_corruption" => Ok(ConflictKind::DataCorruption),
            _ => Err(Error::UnknownVariant {
                what: "conflict kind",
                value: s.to_string(),
            }),
        }
    }
}

/// How a resolver picks the winning entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStrategy {
    UseLocal,
    UseRemote,
    /// Highest `updated_at` wins.
    UseLatest,
    /// Highest `version` wins.
    UseHighestVersion,
    /// Falls back to `UseLatest` unless a resolver overrides it.
    Merge,
    /// Left to application code; yields nothing by default.
    Custom,
    Skip,
}

impl ResolutionStrategy {
    /// The canonical wire string stored in `resolution_strategy`.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionStrategy::UseLocal => "use_local",
            ResolutionStrategy::UseRemote => "use_remote",
            ResolutionStrategy::UseLatest => "use_latest",
            ResolutionStrategy::UseHighestVersion => "use_highest_version",
            ResolutionStrategy::Merge => "merge",
            ResolutionStrategy::Custom => "custom",
            ResolutionStrategy::Skip => "skip",
        }
    }
}

impl fmt::Display for ResolutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResolutionStrategy {
    type Err = Error;

    /// Case-insensitive; unknown strings fail.
    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "use_local" => Ok(ResolutionStrategy::UseLocal),
            "use_remote" => Ok(ResolutionStrategy::UseRemote),
            "use_latest" => Ok(ResolutionStrategy::UseLatest),
            "use_highest_version" => Ok(ResolutionStrategy::UseHighestVersion),
            "merge" => Ok(ResolutionStrategy::Merge),
            "custom" => Ok(ResolutionStrategy::Custom),
            "skip" => Ok(ResolutionStrategy::Skip),
            _ => Err(Error::UnknownVariant {
                what: "resolution strategy",
                value: s.to_string(),
            }),
        }
    }
}

/// A detected conflict between the local and remote copy of one entity.
#[derive(Debug, Clone)]
pub struct SyncConflict {
    pub entity_id: String,
    /// The entity's table.
    pub entity_type: String,
    pub local: Box<dyn SyncEntity>,
    pub remote: Box<dyn SyncEntity>,
    pub kind: ConflictKind,
    pub detected_at: Timestamp,
    pub is_resolved: bool,
}

impl SyncConflict {
    /// Builds a conflict record from the two replicas.
    pub fn new(
        local: Box<dyn SyncEntity>,
        remote: Box<dyn SyncEntity>,
        kind: ConflictKind,
        detected_at: Timestamp,
    ) -> Self {
        Self {
            entity_id: local.id().to_string(),
            entity_type: local.table_name().to_string(),
            local,
            remote,
            kind,
            detected_at,
            is_resolved: false,
        }
    }
}

/// Pluggable strategy producing the winning entity for a conflict.
///
/// Resolvers are consulted in descending [`priority`](ConflictResolver::priority)
/// order; the first one whose [`resolve`](ConflictResolver::resolve) yields
/// an entity wins.
pub trait ConflictResolver: Send + Sync {
    /// Registration name; used to replace or remove a resolver.
    fn name(&self) -> &str;

    /// Higher priority resolvers are consulted first.
    fn priority(&self) -> i32 {
        0
    }

    /// Whether this resolver handles the given kind at all.
    fn can_resolve(&self, kind: ConflictKind) -> bool;

    /// Produces the winning entity, or `None` to pass.
    fn resolve(&self, conflict: &SyncConflict) -> Result<Option<Box<dyn SyncEntity>>>;

    /// The strategy this resolver applies for a kind, recorded in the
    /// conflict store when it wins.
    fn strategy_for(&self, kind: ConflictKind) -> ResolutionStrategy {
        let _ = kind;
        ResolutionStrategy::Custom
    }
}

/// Returns true when the two replicas are in conflict.
///
/// Either both sides moved past the last sync point (symmetric in the
/// timestamp clause), or the versions diverged (a conflict regardless of
/// which side is larger).
pub fn has_conflict(local: &dyn SyncEntity, remote: &dyn SyncEntity) -> bool {
    both_modified_since_sync(local, remote) || local.version() != remote.version()
}

fn both_modified_since_sync(local: &dyn SyncEntity, remote: &dyn SyncEntity) -> bool {
    match local.synced_at() {
        Some(synced_at) => local.updated_at() > synced_at && remote.updated_at() > synced_at,
        None => false,
    }
}

/// Classifies a detected conflict into its [`ConflictKind`].
pub fn classify(local: &dyn SyncEntity, remote: &dyn SyncEntity) -> ConflictKind {
    match (local.is_deleted(), remote.is_deleted()) {
        (true, true) => ConflictKind::BothDeleted,
        (true, false) => ConflictKind::LocalDeletedRemoteModified,
        (false, true) => ConflictKind::LocalModifiedRemoteDeleted,
        (false, false) => {
            if local.version() != remote.version() && !both_modified_since_sync(local, remote) {
                ConflictKind::VersionMismatch
            } else {
                ConflictKind::BothModified
            }
        }
    }
}

/// Applies a strategy to a conflict, returning the winner if the strategy
/// picks one. Ties go to the remote side.
pub fn apply_strategy(
    strategy: ResolutionStrategy,
    conflict: &SyncConflict,
) -> Option<Box<dyn SyncEntity>> {
    match strategy {
        ResolutionStrategy::UseLocal => Some(conflict.local.clone()),
        ResolutionStrategy::UseRemote => Some(conflict.remote.clone()),
        ResolutionStrategy::UseLatest | ResolutionStrategy::Merge => {
            if conflict.local.updated_at() > conflict.remote.updated_at() {
                Some(conflict.local.clone())
            } else {
                Some(conflict.remote.clone())
            }
        }
        ResolutionStrategy::UseHighestVersion => {
            if conflict.local.version() > conflict.remote.version() {
                Some(conflict.local.clone())
            } else {
                Some(conflict.remote.clone())
            }
        }
        ResolutionStrategy::Custom | ResolutionStrategy::Skip => None,
    }
}

/// The built-in resolver, registered under the name `"default"` with
/// priority 0. Handles every kind except [`ConflictKind::DataCorruption`]:
/// last-write-wins, or highest-version when only the versions diverged.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultResolver;

impl ConflictResolver for DefaultResolver {
    fn name(&self) -> &str {
        "default"
    }

    fn can_resolve(&self, kind: ConflictKind) -> bool {
        !matches!(kind, ConflictKind::DataCorruption)
    }

    fn resolve(&self, conflict: &SyncConflict) -> Result<Option<Box<dyn SyncEntity>>> {
        Ok(apply_strategy(self.strategy_for(conflict.kind), conflict))
    }

    fn strategy_for(&self, kind: ConflictKind) -> ResolutionStrategy {
        match kind {
            ConflictKind::VersionMismatch => ResolutionStrategy::UseHighestVersion,
            ConflictKind::DataCorruption => ResolutionStrategy::Skip,
            _ => ResolutionStrategy::UseLatest,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::RawEntity;
    use serde_json::json;

    fn replica(
        id: &str,
        updated_at: i64,
        synced_at: Option<i64>,
        version: i64,
        deleted: bool,
    ) -> RawEntity {
        let mut raw = RawEntity::from_json(
            "notes",
            json!({"id": id, "created_at": 0})
                .as_object()
                .cloned()
                .unwrap(),
        );
        raw.updated_at = updated_at;
        raw.synced_at = synced_at;
        raw.version = version;
        raw.is_deleted = deleted;
        raw
    }

    #[test]
    fn no_conflict_when_only_local_moved() {
        let local = replica("n", 2000, Some(1000), 1, false);
        let remote = replica("n", 900, None, 1, false);
        assert!(!has_conflict(&local, &remote));
    }

    #[test]
    fn conflict_when_both_moved_past_sync_point() {
        let local = replica("n", 1500, Some(500), 1, false);
        let remote = replica("n", 2000, None, 1, false);
        assert!(has_conflict(&local, &remote));
    }

    #[test]
    fn never_synced_rows_only_conflict_on_version() {
        let local = replica("n", 1500, None, 1, false);
        let remote = replica("n", 2000, None, 1, false);
        assert!(!has_conflict(&local, &remote));

        let remote = replica("n", 2000, None, 2, false);
        assert!(has_conflict(&local, &remote));
    }

    #[test]
    fn version_mismatch_is_a_conflict_in_both_directions() {
        let low = replica("n", 1000, Some(1000), 1, false);
        let high = replica("n", 1000, Some(1000), 2, false);
        assert!(has_conflict(&low, &high));
        assert!(has_conflict(&high, &low));
    }

    #[test]
    fn classify_tombstone_combinations() {
        let live = replica("n", 1000, Some(500), 1, false);
        let dead = replica("n", 1000, Some(500), 1, true);

        assert_eq!(
            classify(&dead, &live),
            ConflictKind::LocalDeletedRemoteModified
        );
        assert_eq!(
            classify(&live, &dead),
            ConflictKind::LocalModifiedRemoteDeleted
        );
        assert_eq!(classify(&dead, &dead), ConflictKind::BothDeleted);
    }

    #[test]
    fn classify_version_only_divergence() {
        let local = replica("n", 1000, Some(1000), 1, false);
        let remote = replica("n", 1000, Some(1000), 2, false);
        assert_eq!(classify(&local, &remote), ConflictKind::VersionMismatch);
    }

    #[test]
    fn classify_both_modified() {
        let local = replica("n", 1500, Some(500), 1, false);
        let remote = replica("n", 2000, Some(500), 2, false);
        assert_eq!(classify(&local, &remote), ConflictKind::BothModified);
    }

    #[test]
    fn default_resolver_picks_latest() {
        let local = replica("n", 1500, Some(500), 1, false);
        let remote = replica("n", 2000, Some(500), 2, false);
        let conflict = SyncConflict::new(
            local.boxed_clone(),
            remote.boxed_clone(),
            ConflictKind::BothModified,
            3000,
        );

        let winner = DefaultResolver.resolve(&conflict).unwrap().unwrap();
        assert_eq!(winner.updated_at(), 2000);
    }

    #[test]
    fn default_resolver_picks_highest_version_on_mismatch() {
        let local = replica("n", 1000, Some(1000), 3, false);
        let remote = replica("n", 1000, Some(1000), 2, false);
        let conflict = SyncConflict::new(
            local.boxed_clone(),
            remote.boxed_clone(),
            ConflictKind::VersionMismatch,
            3000,
        );

        let winner = DefaultResolver.resolve(&conflict).unwrap().unwrap();
        assert_eq!(winner.version(), 3);
    }

    #[test]
    fn default_resolver_refuses_data_corruption() {
        assert!(!DefaultResolver.can_resolve(ConflictKind::DataCorruption));
        assert!(DefaultResolver.can_resolve(ConflictKind::BothModified));
        assert!(DefaultResolver.can_resolve(ConflictKind::BothDeleted));
    }

    #[test]
    fn latest_ties_go_to_remote() {
        let local = replica("n", 2000, Some(500), 1, false);
        let mut remote = replica("n", 2000, Some(500), 1, false);
        remote.payload = json!({"id": "n", "marker": "remote"})
            .as_object()
            .cloned()
            .unwrap();
        let conflict = SyncConflict::new(
            local.boxed_clone(),
            remote.boxed_clone(),
            ConflictKind::BothModified,
            3000,
        );

        let winner = apply_strategy(ResolutionStrategy::UseLatest, &conflict).unwrap();
        assert_eq!(winner.to_json().get("marker"), Some(&json!("remote")));
    }

    #[test]
    fn strategies_use_local_and_remote() {
        let local = replica("n", 1000, None, 1, false);
        let remote = replica("n", 2000, None, 2, false);
        let conflict = SyncConflict::new(
            local.boxed_clone(),
            remote.boxed_clone(),
            ConflictKind::BothModified,
            3000,
        );

        let winner = apply_strategy(ResolutionStrategy::UseLocal, &conflict).unwrap();
        assert_eq!(winner.updated_at(), 1000);

        let winner = apply_strategy(ResolutionStrategy::UseRemote, &conflict).unwrap();
        assert_eq!(winner.updated_at(), 2000);

        assert!(apply_strategy(ResolutionStrategy::Skip, &conflict).is_none());
        assert!(apply_strategy(ResolutionStrategy::Custom, &conflict).is_none());
    }

    #[test]
    fn merge_falls_back_to_latest() {
        let local = replica("n", 5000, None, 1, false);
        let remote = replica("n", 2000, None, 1, false);
        let conflict = SyncConflict::new(
            local.boxed_clone(),
            remote.boxed_clone(),
            ConflictKind::BothModified,
            6000,
        );

        let winner = apply_strategy(ResolutionStrategy::Merge, &conflict).unwrap();
        assert_eq!(winner.updated_at(), 5000);
    }

    #[test]
    fn wire_strings_round_trip() {
        for kind in [
            ConflictKind::BothModified,
            ConflictKind::LocalDeletedRemoteModified,
            ConflictKind::LocalModifiedRemoteDeleted,
            ConflictKind::BothDeleted,
            ConflictKind::VersionMismatch,
            ConflictKind::DataCorruption,
        ] {
            assert_eq!(kind.as_str().parse::<ConflictKind>().unwrap(), kind);
        }

        for strategy in [
            ResolutionStrategy::UseLocal,
            ResolutionStrategy::UseRemote,
            ResolutionStrategy::UseLatest,
            ResolutionStrategy::UseHighestVersion,
            ResolutionStrategy::Merge,
            ResolutionStrategy::Custom,
            ResolutionStrategy::Skip,
        ] {
            assert_eq!(
                strategy.as_str().parse::<ResolutionStrategy>().unwrap(),
                strategy
            );
        }
    }

    #[test]
    fn parsing_is_case_insensitive_and_strict() {
        assert_eq!(
            "USE_LATEST".parse::<ResolutionStrategy>().unwrap(),
            ResolutionStrategy::UseLatest
        );
        assert_eq!(
            "Both_Modified".parse::<ConflictKind>().unwrap(),
            ConflictKind::BothModified
        );
        assert!("use-latest".parse::<ResolutionStrategy>().is_err());
        assert!("".parse::<ConflictKind>().is_err());
    }

    #[test]
    fn conflict_carries_identity_from_local() {
        let local = replica("n-42", 1500, Some(500), 1, false);
        let remote = replica("n-42", 2000, Some(500), 1, false);
        let conflict = SyncConflict::new(
            local.boxed_clone(),
            remote.boxed_clone(),
            ConflictKind::BothModified,
            2500,
        );

        assert_eq!(conflict.entity_id, "n-42");
        assert_eq!(conflict.entity_type, "notes");
        assert!(!conflict.is_resolved);
        assert_eq!(conflict.detected_at, 2500);
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn prop_timestamp_clause_is_symmetric(
                local_updated in 0i64..10_000,
                remote_updated in 0i64..10_000,
                synced in 0i64..10_000,
                version in 1i64..100,
            ) {
                // With equal versions, swapping which side is "local" while
                // giving both the same sync point never changes detection.
                let a = replica("n", local_updated, Some(synced), version, false);
                let b = replica("n", remote_updated, Some(synced), version, false);

                prop_assert_eq!(has_conflict(&a, &b), has_conflict(&b, &a));
            }

            #[test]
            fn prop_version_mismatch_always_conflicts(
                v1 in 1i64..100,
                v2 in 1i64..100,
                updated in 0i64..10_000,
            ) {
                prop_assume!(v1 != v2);
                let local = replica("n", updated, None, v1, false);
                let remote = replica("n", updated, None, v2, false);
                prop_assert!(has_conflict(&local, &remote));
                prop_assert!(has_conflict(&remote, &local));
            }
        }
    }
}
