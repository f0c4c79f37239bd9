//! Durable store of storage locations
//!
//! A storage location maps a logical storage type ("STAGING", "PERMANENT")
//! to the bucket and path prefix backing it. Locations are immutable once
//! created and unique per type.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::collections::BTreeMap;
use std::sync::Mutex;
use tracing::info;

use trackflow_common::{FlowError, Result};

/// A registered storage location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct StorageLocation {
    pub id: i64,
    pub storage_type: String,
    pub bucket: String,
    pub path: String,
}

/// Request payload for registering a location.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewStorageLocation {
    pub storage_type: String,
    pub bucket: String,
    pub path: String,
}

impl NewStorageLocation {
    pub fn validate(&self) -> Result<()> {
        if self.storage_type.trim().is_empty() {
            return Err(FlowError::Validation(
                "storageType is required".to_string(),
            ));
        }
        if self.bucket.trim().is_empty() {
            return Err(FlowError::Validation("bucket is required".to_string()));
        }
        if self.path.trim().is_empty() {
            return Err(FlowError::Validation("path is required".to_string()));
        }
        Ok(())
    }
}

/// Store of storage locations.
#[async_trait]
pub trait LocationStore: Send + Sync {
    /// Register a location. Fails with `Validation` when the storage type is
    /// already registered.
    async fn create(&self, location: NewStorageLocation) -> Result<StorageLocation>;

    /// Resolve a location by storage type.
    async fn get_by_type(&self, storage_type: &str) -> Result<StorageLocation>;

    async fn list(&self) -> Result<Vec<StorageLocation>>;

    /// Delete locations by id, returning the ids that existed and were
    /// deleted.
    async fn delete_many(&self, ids: &[i64]) -> Result<Vec<i64>>;
}

/// Postgres-backed location store.
#[derive(Clone)]
pub struct PgLocationStore {
    pool: PgPool,
}

impl PgLocationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LocationStore for PgLocationStore {
    async fn create(&self, location: NewStorageLocation) -> Result<StorageLocation> {
        location.validate()?;
        let created = sqlx::query_as::<_, StorageLocation>(
            r#"
            INSERT INTO storage_locations (storage_type, bucket, path)
            VALUES ($1, $2, $3)
            RETURNING id, storage_type, bucket, path
            "#,
        )
        .bind(&location.storage_type)
        .bind(&location.bucket)
        .bind(&location.path)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => FlowError::Validation(
                format!("storage type already exists: {}", location.storage_type),
            ),
            _ => FlowError::Database(e.to_string()),
        })?;

        info!(
            storage_type = %created.storage_type,
            bucket = %created.bucket,
            "storage location registered"
        );
        Ok(created)
    }

    async fn get_by_type(&self, storage_type: &str) -> Result<StorageLocation> {
        sqlx::query_as::<_, StorageLocation>(
            "SELECT id, storage_type, bucket, path FROM storage_locations WHERE storage_type = $1",
        )
        .bind(storage_type)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| FlowError::Database(e.to_string()))?
        .ok_or_else(|| FlowError::NotFound(format!("storage type not found: {storage_type}")))
    }

    async fn list(&self) -> Result<Vec<StorageLocation>> {
        sqlx::query_as::<_, StorageLocation>(
            "SELECT id, storage_type, bucket, path FROM storage_locations ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| FlowError::Database(e.to_string()))
    }

    async fn delete_many(&self, ids: &[i64]) -> Result<Vec<i64>> {
        let mut deleted = Vec::new();
        for id in ids {
            let result = sqlx::query("DELETE FROM storage_locations WHERE id = $1")
                .bind(id)
                .execute(&self.pool)
                .await
                .map_err(|e| FlowError::Database(e.to_string()))?;
            if result.rows_affected() > 0 {
                deleted.push(*id);
            }
        }
        Ok(deleted)
    }
}

/// In-memory location store for tests and local wiring.
#[derive(Default)]
pub struct MemoryLocationStore {
    state: Mutex<MemoryState>,
}

#[derive(Default)]
struct MemoryState {
    next_id: i64,
    locations: BTreeMap<i64, StorageLocation>,
}

impl MemoryLocationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LocationStore for MemoryLocationStore {
    async fn create(&self, location: NewStorageLocation) -> Result<StorageLocation> {
        location.validate()?;
        let mut state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if state
            .locations
            .values()
            .any(|l| l.storage_type == location.storage_type)
        {
            return Err(FlowError::Validation(format!(
                "storage type already exists: {}",
                location.storage_type
            )));
        }
        state.next_id += 1;
        let created = StorageLocation {
            id: state.next_id,
            storage_type: location.storage_type,
            bucket: location.bucket,
            path: location.path,
        };
        state.locations.insert(created.id, created.clone());
        Ok(created)
    }

    async fn get_by_type(&self, storage_type: &str) -> Result<StorageLocation> {
        let state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        state
            .locations
            .values()
            .find(|l| l.storage_type == storage_type)
            .cloned()
            .ok_or_else(|| FlowError::NotFound(format!("storage type not found: {storage_type}")))
    }

    async fn list(&self) -> Result<Vec<StorageLocation>> {
        let state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        Ok(state.locations.values().cloned().collect())
    }

    async fn delete_many(&self, ids: &[i64]) -> Result<Vec<i64>> {
        let mut state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut deleted = Vec::new();
        for id in ids {
            if state.locations.remove(id).is_some() {
                deleted.push(*id);
            }
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn staging() -> NewStorageLocation {
        NewStorageLocation {
            storage_type: "STAGING".to_string(),
            bucket: "staging-bucket".to_string(),
            path: "/files".to_string(),
        }
    }

    #[tokio::test]
    async fn create_and_resolve_by_type() {
        let store = MemoryLocationStore::new();
        let created = store.create(staging()).await.unwrap();
        assert_eq!(created.storage_type, "STAGING");

        let resolved = store.get_by_type("STAGING").await.unwrap();
        assert_eq!(resolved, created);
    }

    #[tokio::test]
    async fn duplicate_type_is_rejected() {
        let store = MemoryLocationStore::new();
        store.create(staging()).await.unwrap();
        let err = store.create(staging()).await.unwrap_err();
        assert!(matches!(err, FlowError::Validation(_)));
    }

    #[tokio::test]
    async fn unknown_type_is_not_found() {
        let store = MemoryLocationStore::new();
        let err = store.get_by_type("PERMANENT").await.unwrap_err();
        assert!(matches!(err, FlowError::NotFound(_)));
    }

    #[tokio::test]
    async fn delete_returns_only_existing_ids() {
        let store = MemoryLocationStore::new();
        let created = store.create(staging()).await.unwrap();
        let deleted = store.delete_many(&[created.id, 999]).await.unwrap();
        assert_eq!(deleted, vec![created.id]);
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn blank_fields_are_rejected() {
        let store = MemoryLocationStore::new();
        let mut bad = staging();
        bad.bucket = "  ".to_string();
        assert!(store.create(bad).await.is_err());
    }
}
