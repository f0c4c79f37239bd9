//! Durable record of each resource's identity, location, and stage
//!
//! The record store is the only shared mutable state in the pipeline. All
//! mutations are single-record and keyed by id; per-id serialization comes
//! from the event bus's partitioning, not from locks here. The `stage` field
//! must always name the store that physically holds the object at
//! `object_location`, with disagreement tolerated only for the duration of
//! one promotion.

use async_trait::async_trait;
use sqlx::PgPool;
use std::collections::BTreeMap;
use std::sync::Mutex;

use trackflow_common::{FlowError, Result};

/// Lifecycle stage of a resource's backing object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Staging,
    Permanent,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Staging => "STAGING",
            Stage::Permanent => "PERMANENT",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<String> for Stage {
    type Error = FlowError;

    fn try_from(value: String) -> Result<Self> {
        match value.as_str() {
            "STAGING" => Ok(Stage::Staging),
            "PERMANENT" => Ok(Stage::Permanent),
            other => Err(FlowError::Validation(format!("unknown stage: {other}"))),
        }
    }
}

/// One resource's durable record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRecord {
    pub id: i64,
    pub object_location: String,
    pub stage: Stage,
}

/// Store of resource records.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert a record for a freshly staged object.
    async fn create(&self, object_location: &str, stage: Stage) -> Result<ResourceRecord>;

    async fn find_by_id(&self, id: i64) -> Result<Option<ResourceRecord>>;

    async fn find_all_by_ids(&self, ids: &[i64]) -> Result<Vec<ResourceRecord>>;

    /// Delete a record. Deleting a missing id is a no-op.
    async fn delete(&self, id: i64) -> Result<()>;

    /// Point the record at a new object location and stage. Returns false
    /// when the record no longer exists (e.g. deleted while a promotion was
    /// in flight).
    async fn update_location_and_stage(
        &self,
        id: i64,
        object_location: &str,
        stage: Stage,
    ) -> Result<bool>;
}

#[derive(sqlx::FromRow)]
struct RecordRow {
    id: i64,
    object_location: String,
    stage: String,
}

impl TryFrom<RecordRow> for ResourceRecord {
    type Error = FlowError;

    fn try_from(row: RecordRow) -> Result<Self> {
        Ok(ResourceRecord {
            id: row.id,
            object_location: row.object_location,
            stage: Stage::try_from(row.stage)?,
        })
    }
}

/// Postgres-backed record store.
#[derive(Clone)]
pub struct PgRecordStore {
    pool: PgPool,
}

impl PgRecordStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RecordStore for PgRecordStore {
    async fn create(&self, object_location: &str, stage: Stage) -> Result<ResourceRecord> {
        let row = sqlx::query_as::<_, RecordRow>(
            r#"
            INSERT INTO resources (object_location, stage)
            VALUES ($1, $2)
            RETURNING id, object_location, stage
            "#,
        )
        .bind(object_location)
        .bind(stage.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| FlowError::Database(e.to_string()))?;
        row.try_into()
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<ResourceRecord>> {
        let row = sqlx::query_as::<_, RecordRow>(
            "SELECT id, object_location, stage FROM resources WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| FlowError::Database(e.to_string()))?;
        row.map(ResourceRecord::try_from).transpose()
    }

    async fn find_all_by_ids(&self, ids: &[i64]) -> Result<Vec<ResourceRecord>> {
        let rows = sqlx::query_as::<_, RecordRow>(
            "SELECT id, object_location, stage FROM resources WHERE id = ANY($1) ORDER BY id",
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| FlowError::Database(e.to_string()))?;
        rows.into_iter().map(ResourceRecord::try_from).collect()
    }

    async fn delete(&self, id: i64) -> Result<()> {
        sqlx::query("DELETE FROM resources WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| FlowError::Database(e.to_string()))?;
        Ok(())
    }

    async fn update_location_and_stage(
        &self,
        id: i64,
        object_location: &str,
        stage: Stage,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE resources SET object_location = $2, stage = $3 WHERE id = $1",
        )
        .bind(id)
        .bind(object_location)
        .bind(stage.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| FlowError::Database(e.to_string()))?;
        Ok(result.rows_affected() > 0)
    }
}

/// In-memory record store for tests and local wiring.
#[derive(Default)]
pub struct MemoryRecordStore {
    state: Mutex<MemoryState>,
}

#[derive(Default)]
struct MemoryState {
    next_id: i64,
    records: BTreeMap<i64, ResourceRecord>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn create(&self, object_location: &str, stage: Stage) -> Result<ResourceRecord> {
        let mut state = self.lock();
        state.next_id += 1;
        let record = ResourceRecord {
            id: state.next_id,
            object_location: object_location.to_string(),
            stage,
        };
        state.records.insert(record.id, record.clone());
        Ok(record)
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<ResourceRecord>> {
        Ok(self.lock().records.get(&id).cloned())
    }

    async fn find_all_by_ids(&self, ids: &[i64]) -> Result<Vec<ResourceRecord>> {
        let state = self.lock();
        Ok(ids
            .iter()
            .filter_map(|id| state.records.get(id).cloned())
            .collect())
    }

    async fn delete(&self, id: i64) -> Result<()> {
        self.lock().records.remove(&id);
        Ok(())
    }

    async fn update_location_and_stage(
        &self,
        id: i64,
        object_location: &str,
        stage: Stage,
    ) -> Result<bool> {
        let mut state = self.lock();
        match state.records.get_mut(&id) {
            Some(record) => {
                record.object_location = object_location.to_string();
                record.stage = stage;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_assigns_sequential_ids() {
        let store = MemoryRecordStore::new();
        let a = store.create("s3://staging-bucket/a.mp3", Stage::Staging).await.unwrap();
        let b = store.create("s3://staging-bucket/b.mp3", Stage::Staging).await.unwrap();
        assert_eq!(a.id + 1, b.id);
        assert_eq!(a.stage, Stage::Staging);
    }

    #[tokio::test]
    async fn update_missing_record_reports_false() {
        let store = MemoryRecordStore::new();
        let updated = store
            .update_location_and_stage(42, "s3://permanent-bucket/x.mp3", Stage::Permanent)
            .await
            .unwrap();
        assert!(!updated);
    }

    #[tokio::test]
    async fn find_all_skips_missing_ids() {
        let store = MemoryRecordStore::new();
        let a = store.create("s3://staging-bucket/a.mp3", Stage::Staging).await.unwrap();
        let found = store.find_all_by_ids(&[a.id, 999]).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, a.id);
    }

    #[test]
    fn stage_round_trips_through_text() {
        assert_eq!(Stage::try_from("STAGING".to_string()).unwrap(), Stage::Staging);
        assert_eq!(
            Stage::try_from("PERMANENT".to_string()).unwrap(),
            Stage::Permanent
        );
        assert!(Stage::try_from("ARCHIVE".to_string()).is_err());
    }
}
