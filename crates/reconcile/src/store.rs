//! The store contract the engine writes through.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use renec_core::{AccreditationEdge, Entity, EntityKind, EntityRef};

use crate::error::StoreError;

/// Durable keyed storage for entities and accreditation edges.
///
/// Implementations enforce uniqueness of `(kind, key)` and of the
/// `(standard_key, certifier_key)` edge pair. They never delete.
#[async_trait]
pub trait EntityStore: Send + Sync {
    async fn get(&self, entity: &EntityRef) -> Result<Option<Entity>, StoreError>;

    /// Insert or replace, returning the previous state.
    ///
    /// `first_seen` of an existing row is preserved and `last_seen` never
    /// moves backwards, whatever the caller passes.
    async fn upsert(&self, entity: Entity) -> Result<Option<Entity>, StoreError>;

    /// Assert (`current = true`) or retract one edge at `at`.
    async fn upsert_edge(
        &self,
        standard_key: &str,
        certifier_key: &str,
        current: bool,
        at: DateTime<Utc>,
    ) -> Result<AccreditationEdge, StoreError>;

    /// Edges touching an entity, current or not.
    async fn edges_for(&self, entity: &EntityRef) -> Result<Vec<AccreditationEdge>, StoreError>;

    /// Mark current edges last asserted before `since` as not current,
    /// skipping edges that touch any `exempt` entity. Returns the count.
    async fn retire_edges_not_asserted_since(
        &self,
        since: DateTime<Utc>,
        exempt: &BTreeSet<EntityRef>,
    ) -> Result<u64, StoreError>;

    /// Flag entities of `kinds` whose `last_seen` is before `before` as
    /// stale, skipping `exempt` ones. Returns the number newly flagged.
    async fn mark_unseen_stale(
        &self,
        kinds: &[EntityKind],
        before: DateTime<Utc>,
        exempt: &BTreeSet<EntityRef>,
    ) -> Result<u64, StoreError>;

    async fn counts(&self) -> Result<BTreeMap<EntityKind, u64>, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}
