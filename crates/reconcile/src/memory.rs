//! In-memory entity store.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use renec_core::{AccreditationEdge, Entity, EntityKind, EntityRef};

use crate::error::StoreError;
use crate::store::EntityStore;

#[derive(Default)]
struct Tables {
    entities: HashMap<EntityRef, Entity>,
    /// Keyed by (standard_key, certifier_key).
    edges: BTreeMap<(String, String), AccreditationEdge>,
}

/// Store backed by process memory. `set_available(false)` makes every call
/// fail with [`StoreError::Unavailable`], for outage drills.
pub struct MemoryStore {
    tables: RwLock<Tables>,
    available: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            available: AtomicBool::new(true),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("memory store marked unavailable".into()))
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>, StoreError> {
        self.check()?;
        self.tables
            .read()
            .map_err(|e| StoreError::Unavailable(format!("store lock poisoned: {e}")))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>, StoreError> {
        self.check()?;
        self.tables
            .write()
            .map_err(|e| StoreError::Unavailable(format!("store lock poisoned: {e}")))
    }

    pub fn entity_count(&self) -> usize {
        self.tables.read().map(|t| t.entities.len()).unwrap_or(0)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EntityStore for MemoryStore {
    async fn get(&self, entity: &EntityRef) -> Result<Option<Entity>, StoreError> {
        Ok(self.read()?.entities.get(entity).cloned())
    }

    async fn upsert(&self, mut entity: Entity) -> Result<Option<Entity>, StoreError> {
        let mut tables = self.write()?;
        let key = entity.entity_ref();
        if let Some(prev) = tables.entities.get(&key) {
            entity.first_seen = prev.first_seen;
            entity.last_seen = entity.last_seen.max(prev.last_seen);
        }
        Ok(tables.entities.insert(key, entity))
    }

    async fn upsert_edge(
        &self,
        standard_key: &str,
        certifier_key: &str,
        current: bool,
        at: DateTime<Utc>,
    ) -> Result<AccreditationEdge, StoreError> {
        let mut tables = self.write()?;
        let edge = tables
            .edges
            .entry((standard_key.to_string(), certifier_key.to_string()))
            .or_insert_with(|| AccreditationEdge {
                standard_key: standard_key.to_string(),
                certifier_key: certifier_key.to_string(),
                current,
                first_asserted: at,
                last_asserted: at,
            });
        edge.current = current;
        if current {
            edge.last_asserted = edge.last_asserted.max(at);
        }
        Ok(edge.clone())
    }

    async fn edges_for(&self, entity: &EntityRef) -> Result<Vec<AccreditationEdge>, StoreError> {
        Ok(self
            .read()?
            .edges
            .values()
            .filter(|e| e.touches(entity))
            .cloned()
            .collect())
    }

    async fn retire_edges_not_asserted_since(
        &self,
        since: DateTime<Utc>,
        exempt: &BTreeSet<EntityRef>,
    ) -> Result<u64, StoreError> {
        let mut tables = self.write()?;
        let mut retired = 0;
        for edge in tables.edges.values_mut() {
            if edge.current && edge.last_asserted < since && !exempt.iter().any(|x| edge.touches(x)) {
                edge.current = false;
                retired += 1;
            }
        }
        Ok(retired)
    }

    async fn mark_unseen_stale(
        &self,
        kinds: &[EntityKind],
        before: DateTime<Utc>,
        exempt: &BTreeSet<EntityRef>,
    ) -> Result<u64, StoreError> {
        let mut tables = self.write()?;
        let mut marked = 0;
        for entity in tables.entities.values_mut() {
            if !kinds.contains(&entity.kind) || entity.last_seen >= before || entity.stale {
                continue;
            }
            if !exempt.contains(&entity.entity_ref()) {
                entity.stale = true;
                marked += 1;
            }
        }
        Ok(marked)
    }

    async fn counts(&self) -> Result<BTreeMap<EntityKind, u64>, StoreError> {
        let tables = self.read()?;
        let mut counts = BTreeMap::new();
        for entity in tables.entities.values() {
            *counts.entry(entity.kind).or_insert(0) += 1;
        }
        Ok(counts)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.check()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use renec_core::Attributes;

    fn entity(key: &str, seen: DateTime<Utc>) -> Entity {
        Entity {
            kind: EntityKind::Standard,
            key: key.into(),
            attributes: Attributes::new(),
            vigente: true,
            stale: false,
            first_seen: seen,
            last_seen: seen,
        }
    }

    #[tokio::test]
    async fn upsert_preserves_first_seen_and_monotonic_last_seen() {
        let store = MemoryStore::new();
        let t0 = Utc::now();
        let t1 = t0 + chrono::Duration::seconds(10);
        store.upsert(entity("EC0217", t1)).await.unwrap();

        let prev = store.upsert(entity("EC0217", t0)).await.unwrap().unwrap();
        assert_eq!(prev.first_seen, t1);
        let current = store
            .get(&EntityRef::new(EntityKind::Standard, "EC0217"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(current.first_seen, t1);
        assert_eq!(current.last_seen, t1);
    }

    #[tokio::test]
    async fn retire_respects_exemptions() {
        let store = MemoryStore::new();
        let old = Utc::now() - chrono::Duration::days(1);
        store.upsert_edge("EC0217", "CERT-001", true, old).await.unwrap();
        store.upsert_edge("EC0217", "CERT-002", true, old).await.unwrap();

        let mut exempt = BTreeSet::new();
        exempt.insert(EntityRef::new(EntityKind::Certifier, "CERT-002"));
        let retired = store.retire_edges_not_asserted_since(Utc::now(), &exempt).await.unwrap();
        assert_eq!(retired, 1);

        let edges = store
            .edges_for(&EntityRef::new(EntityKind::Standard, "EC0217"))
            .await
            .unwrap();
        assert_eq!(edges.len(), 2);
        assert!(edges.iter().any(|e| e.certifier_key == "CERT-002" && e.current));
        assert!(edges.iter().any(|e| e.certifier_key == "CERT-001" && !e.current));
    }

    #[tokio::test]
    async fn unavailable_store_fails_every_call() {
        let store = MemoryStore::new();
        store.set_available(false);
        assert!(matches!(store.ping().await, Err(StoreError::Unavailable(_))));
        assert!(store
            .get(&EntityRef::new(EntityKind::Center, "C1"))
            .await
            .is_err());
    }
}
