//! PostgreSQL entity store over the `entities` and `accreditations` tables.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::debug;

use renec_core::{AccreditationEdge, Attributes, Entity, EntityKind, EntityRef};

use crate::error::StoreError;
use crate::store::EntityStore;

const ENTITY_COLUMNS: &str = "kind, key, attributes, vigente, stale, first_seen, last_seen";
const EDGE_COLUMNS: &str = "standard_key, certifier_key, current, first_asserted, last_asserted";

// ── Row mapping ──────────────────────────────────────────────────────

#[derive(Debug, sqlx::FromRow)]
struct EntityRow {
    kind: String,
    key: String,
    attributes: serde_json::Value,
    vigente: bool,
    stale: bool,
    first_seen: DateTime<Utc>,
    last_seen: DateTime<Utc>,
}

impl TryFrom<EntityRow> for Entity {
    type Error = StoreError;

    fn try_from(row: EntityRow) -> Result<Self, Self::Error> {
        let corrupt = |message: String| StoreError::Corrupt {
            entity: format!("{}/{}", row.kind, row.key),
            message,
        };
        let kind: EntityKind = row.kind.parse().map_err(|e| corrupt(format!("{e}")))?;
        let attributes: Attributes =
            serde_json::from_value(row.attributes.clone()).map_err(|e| corrupt(format!("attributes: {e}")))?;
        Ok(Entity {
            kind,
            key: row.key,
            attributes,
            vigente: row.vigente,
            stale: row.stale,
            first_seen: row.first_seen,
            last_seen: row.last_seen,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct EdgeRow {
    standard_key: String,
    certifier_key: String,
    current: bool,
    first_asserted: DateTime<Utc>,
    last_asserted: DateTime<Utc>,
}

impl From<EdgeRow> for AccreditationEdge {
    fn from(row: EdgeRow) -> Self {
        AccreditationEdge {
            standard_key: row.standard_key,
            certifier_key: row.certifier_key,
            current: row.current,
            first_asserted: row.first_asserted,
            last_asserted: row.last_asserted,
        }
    }
}

// ── Store ────────────────────────────────────────────────────────────

/// Stateless store; all state lives in PostgreSQL.
///
/// Upserts keep `first_seen` and take the greater `last_seen` in SQL, so
/// several processes writing the same key still honor the store contract.
#[derive(Clone)]
pub struct PgEntityStore {
    pool: PgPool,
}

impl PgEntityStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EntityStore for PgEntityStore {
    async fn get(&self, entity: &EntityRef) -> Result<Option<Entity>, StoreError> {
        let row = sqlx::query_as::<_, EntityRow>(&format!(
            "SELECT {ENTITY_COLUMNS} FROM entities WHERE kind = $1 AND key = $2"
        ))
        .bind(entity.kind.as_str())
        .bind(&entity.key)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Entity::try_from).transpose()
    }

    async fn upsert(&self, entity: Entity) -> Result<Option<Entity>, StoreError> {
        let attributes = serde_json::to_value(&entity.attributes).map_err(|e| StoreError::Corrupt {
            entity: entity.entity_ref().to_string(),
            message: e.to_string(),
        })?;

        let mut tx = self.pool.begin().await?;
        let previous = sqlx::query_as::<_, EntityRow>(&format!(
            "SELECT {ENTITY_COLUMNS} FROM entities WHERE kind = $1 AND key = $2 FOR UPDATE"
        ))
        .bind(entity.kind.as_str())
        .bind(&entity.key)
        .fetch_optional(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO entities (kind, key, attributes, vigente, stale, first_seen, last_seen)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             ON CONFLICT (kind, key) DO UPDATE SET
                attributes = EXCLUDED.attributes,
                vigente = EXCLUDED.vigente,
                stale = EXCLUDED.stale,
                last_seen = GREATEST(entities.last_seen, EXCLUDED.last_seen)",
        )
        .bind(entity.kind.as_str())
        .bind(&entity.key)
        .bind(attributes)
        .bind(entity.vigente)
        .bind(entity.stale)
        .bind(entity.first_seen)
        .bind(entity.last_seen)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        previous.map(Entity::try_from).transpose()
    }

    async fn upsert_edge(
        &self,
        standard_key: &str,
        certifier_key: &str,
        current: bool,
        at: DateTime<Utc>,
    ) -> Result<AccreditationEdge, StoreError> {
        let row = sqlx::query_as::<_, EdgeRow>(&format!(
            "INSERT INTO accreditations (standard_key, certifier_key, current, first_asserted, last_asserted)
             VALUES ($1, $2, $3, $4, $4)
             ON CONFLICT (standard_key, certifier_key) DO UPDATE SET
                current = EXCLUDED.current,
                last_asserted = CASE WHEN EXCLUDED.current
                    THEN GREATEST(accreditations.last_asserted, EXCLUDED.last_asserted)
                    ELSE accreditations.last_asserted END
             RETURNING {EDGE_COLUMNS}"
        ))
        .bind(standard_key)
        .bind(certifier_key)
        .bind(current)
        .bind(at)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into())
    }

    async fn edges_for(&self, entity: &EntityRef) -> Result<Vec<AccreditationEdge>, StoreError> {
        let column = match entity.kind {
            EntityKind::Standard => "standard_key",
            EntityKind::Certifier => "certifier_key",
            EntityKind::Center => return Ok(Vec::new()),
        };
        let rows = sqlx::query_as::<_, EdgeRow>(&format!(
            "SELECT {EDGE_COLUMNS} FROM accreditations WHERE {column} = $1
             ORDER BY standard_key, certifier_key"
        ))
        .bind(&entity.key)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn retire_edges_not_asserted_since(
        &self,
        since: DateTime<Utc>,
        exempt: &BTreeSet<EntityRef>,
    ) -> Result<u64, StoreError> {
        let mut exempt_standards = Vec::new();
        let mut exempt_certifiers = Vec::new();
        for entity in exempt {
            match entity.kind {
                EntityKind::Standard => exempt_standards.push(entity.key.clone()),
                EntityKind::Certifier => exempt_certifiers.push(entity.key.clone()),
                EntityKind::Center => {}
            }
        }

        let result = sqlx::query(
            "UPDATE accreditations SET current = FALSE
             WHERE current
               AND last_asserted < $1
               AND standard_key <> ALL($2)
               AND certifier_key <> ALL($3)",
        )
        .bind(since)
        .bind(&exempt_standards)
        .bind(&exempt_certifiers)
        .execute(&self.pool)
        .await?;
        debug!(retired = result.rows_affected(), exempt = exempt.len(), "edges retired");
        Ok(result.rows_affected())
    }

    async fn mark_unseen_stale(
        &self,
        kinds: &[EntityKind],
        before: DateTime<Utc>,
        exempt: &BTreeSet<EntityRef>,
    ) -> Result<u64, StoreError> {
        let kinds: Vec<String> = kinds.iter().map(|k| k.as_str().to_string()).collect();
        let exempt: Vec<String> = exempt.iter().map(|e| format!("{}:{}", e.kind.as_str(), e.key)).collect();
        let result = sqlx::query(
            "UPDATE entities SET stale = TRUE
             WHERE kind = ANY($1) AND last_seen < $2 AND NOT stale
               AND (kind || ':' || key) <> ALL($3)",
        )
        .bind(&kinds)
        .bind(before)
        .bind(&exempt)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn counts(&self) -> Result<BTreeMap<EntityKind, u64>, StoreError> {
        let rows: Vec<(String, i64)> = sqlx::query_as("SELECT kind, COUNT(*) FROM entities GROUP BY kind")
            .fetch_all(&self.pool)
            .await?;
        let mut counts = BTreeMap::new();
        for (kind, n) in rows {
            let kind: EntityKind = kind.parse().map_err(|e| StoreError::Corrupt {
                entity: kind.clone(),
                message: format!("{e}"),
            })?;
            counts.insert(kind, n.max(0) as u64);
        }
        Ok(counts)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
