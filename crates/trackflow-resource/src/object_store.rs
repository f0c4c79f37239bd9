//! Object store access and the retrying mover
//!
//! [`ObjectStore`] is the raw byte-level contract (one put/get/delete per
//! call, no retry). [`ObjectMover`] layers the pipeline semantics on top:
//! fixed-delay retry on transient store errors, object refs that encode
//! bucket and key, and the deliberately non-atomic `move` operation.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use tracing::{debug, info, warn};
use uuid::Uuid;

use trackflow_common::checksum::sha256_hex;
use trackflow_common::{retry, FlowError, Result};

use crate::config::ObjectStoreConfig;
use crate::storage_client::StorageLocation;

/// Retry attempts for each store operation.
pub const STORE_RETRY_ATTEMPTS: usize = 3;

/// Fixed delay between store retries, in milliseconds.
pub const STORE_RETRY_DELAY_MS: u64 = 2000;

/// A parsed `s3://bucket/key` object reference.
///
/// Refs travel in resource records so that downstream consumers never need
/// the location object, only the record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectRef {
    pub bucket: String,
    pub key: String,
}

impl ObjectRef {
    pub fn parse(location: &str) -> Result<Self> {
        let rest = location.strip_prefix("s3://").ok_or_else(|| {
            FlowError::Validation(format!("not an object reference: {location}"))
        })?;
        let (bucket, key) = rest.split_once('/').ok_or_else(|| {
            FlowError::Validation(format!("object reference has no key: {location}"))
        })?;
        if bucket.is_empty() || key.is_empty() {
            return Err(FlowError::Validation(format!(
                "object reference has empty bucket or key: {location}"
            )));
        }
        Ok(Self {
            bucket: bucket.to_string(),
            key: key.to_string(),
        })
    }

    /// Final path segment of the key.
    pub fn filename(&self) -> &str {
        self.key.rsplit('/').next().unwrap_or(&self.key)
    }
}

impl std::fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "s3://{}/{}", self.bucket, self.key)
    }
}

/// Result of storing an object.
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub object_ref: ObjectRef,
    pub checksum: String,
    pub size: i64,
}

/// Raw object store contract: single-attempt byte operations.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, bucket: &str, key: &str, data: Vec<u8>) -> Result<()>;
    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>>;
    async fn delete(&self, bucket: &str, key: &str) -> Result<()>;
}

/// S3/MinIO-backed object store.
#[derive(Clone)]
pub struct S3ObjectStore {
    client: Client,
}

impl S3ObjectStore {
    pub fn new(config: &ObjectStoreConfig) -> Self {
        let credentials = Credentials::new(
            &config.access_key,
            &config.secret_key,
            None,
            None,
            "trackflow-object-store",
        );

        let mut builder = aws_sdk_s3::Config::builder()
            .credentials_provider(credentials)
            .region(Region::new(config.region.clone()))
            .force_path_style(config.path_style);

        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        let client = Client::from_conf(builder.build());
        info!(region = %config.region, "object store client initialized");
        Self { client }
    }
}

fn classify_s3_error(op: &str, bucket: &str, key: &str, err: impl std::fmt::Display) -> FlowError {
    let message = format!("{op} s3://{bucket}/{key}: {err}");
    if message.contains("NoSuchKey") || message.contains("NotFound") {
        FlowError::NotFound(message)
    } else {
        FlowError::Transient(message)
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put(&self, bucket: &str, key: &str, data: Vec<u8>) -> Result<()> {
        debug!("Uploading {} bytes to s3://{}/{}", data.len(), bucket, key);
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .content_type("audio/mpeg")
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| classify_s3_error("failed to upload to", bucket, key, e))?;
        Ok(())
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        debug!("Downloading from s3://{}/{}", bucket, key);
        let response = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| classify_s3_error("failed to download from", bucket, key, e))?;

        let data = response
            .body
            .collect()
            .await
            .map_err(|e| classify_s3_error("failed to read body from", bucket, key, e))?
            .into_bytes()
            .to_vec();
        Ok(data)
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<()> {
        debug!("Deleting s3://{}/{}", bucket, key);
        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| classify_s3_error("failed to delete from", bucket, key, e))?;
        Ok(())
    }
}

/// In-memory object store for tests and local wiring, with failure
/// injection for exercising retry and partial-failure paths.
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: Mutex<HashMap<(String, String), Vec<u8>>>,
    // Keys whose delete always fails with a transient error.
    poisoned_deletes: Mutex<HashSet<String>>,
    // Remaining get calls that fail with a transient error.
    failing_gets: Mutex<u32>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every delete of `key` fail with a transient error.
    pub fn poison_delete(&self, key: &str) {
        lock(&self.poisoned_deletes).insert(key.to_string());
    }

    /// Make the next `n` get calls fail with a transient error.
    pub fn fail_next_gets(&self, n: u32) {
        *lock(&self.failing_gets) = n;
    }

    pub fn contains(&self, bucket: &str, key: &str) -> bool {
        lock(&self.objects).contains_key(&(bucket.to_string(), key.to_string()))
    }

    pub fn object_count(&self) -> usize {
        lock(&self.objects).len()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(&self, bucket: &str, key: &str, data: Vec<u8>) -> Result<()> {
        lock(&self.objects).insert((bucket.to_string(), key.to_string()), data);
        Ok(())
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        {
            let mut failing = lock(&self.failing_gets);
            if *failing > 0 {
                *failing -= 1;
                return Err(FlowError::Transient(format!(
                    "injected get failure for s3://{bucket}/{key}"
                )));
            }
        }
        lock(&self.objects)
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
            .ok_or_else(|| FlowError::NotFound(format!("no such object: s3://{bucket}/{key}")))
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<()> {
        if lock(&self.poisoned_deletes).contains(key) {
            return Err(FlowError::Transient(format!(
                "injected delete failure for s3://{bucket}/{key}"
            )));
        }
        lock(&self.objects).remove(&(bucket.to_string(), key.to_string()));
        Ok(())
    }
}

/// Retrying mover over an [`ObjectStore`].
///
/// All four operations retry transient store errors with a fixed delay
/// (3 attempts, 2000 ms); once exhausted they fail with a terminal error and
/// are never retried again by this component.
pub struct ObjectMover {
    store: std::sync::Arc<dyn ObjectStore>,
    attempts: usize,
    delay_ms: u64,
}

impl ObjectMover {
    pub fn new(store: std::sync::Arc<dyn ObjectStore>) -> Self {
        Self {
            store,
            attempts: STORE_RETRY_ATTEMPTS,
            delay_ms: STORE_RETRY_DELAY_MS,
        }
    }

    /// Override the retry spacing. Used by tests to keep delays short.
    pub fn with_retry(mut self, attempts: usize, delay_ms: u64) -> Self {
        self.attempts = attempts;
        self.delay_ms = delay_ms;
        self
    }

    fn key_for(location: &StorageLocation, filename: &str) -> String {
        let prefix = location.path.trim_matches('/');
        if prefix.is_empty() {
            filename.to_string()
        } else {
            format!("{prefix}/{filename}")
        }
    }

    /// Store a payload under a fresh key in `location`.
    pub async fn put(&self, data: Vec<u8>, location: &StorageLocation) -> Result<StoredObject> {
        let key = Self::key_for(location, &format!("{}.mp3", Uuid::new_v4()));
        let checksum = sha256_hex(&data);
        let size = data.len() as i64;

        retry::run(retry::fixed_delay(self.attempts, self.delay_ms), || {
            self.store.put(&location.bucket, &key, data.clone())
        })
        .await?;

        let object_ref = ObjectRef {
            bucket: location.bucket.clone(),
            key,
        };
        info!(object_ref = %object_ref, size, "object stored");
        Ok(StoredObject {
            object_ref,
            checksum,
            size,
        })
    }

    /// Fetch the bytes a record's object ref points at.
    pub async fn get(&self, object_ref: &ObjectRef) -> Result<Vec<u8>> {
        retry::run(retry::fixed_delay(self.attempts, self.delay_ms), || {
            self.store.get(&object_ref.bucket, &object_ref.key)
        })
        .await
    }

    /// Delete the object a ref points at.
    pub async fn delete(&self, object_ref: &ObjectRef) -> Result<()> {
        retry::run(retry::fixed_delay(self.attempts, self.delay_ms), || {
            self.store.delete(&object_ref.bucket, &object_ref.key)
        })
        .await
    }

    /// Move an object to another location: get from source, put to
    /// destination, delete the source.
    ///
    /// Not atomic. A failure after the destination put leaves the object
    /// duplicated, with the old copy orphaned in the source; a failure before
    /// the put leaves the object only in the source. Duplication is cheaper
    /// to reconcile than loss, so the orphan is accepted and logged.
    pub async fn r#move(
        &self,
        object_ref: &ObjectRef,
        to: &StorageLocation,
    ) -> Result<ObjectRef> {
        let data = self.get(object_ref).await?;

        let new_ref = ObjectRef {
            bucket: to.bucket.clone(),
            key: Self::key_for(to, object_ref.filename()),
        };
        retry::run(retry::fixed_delay(self.attempts, self.delay_ms), || {
            self.store.put(&new_ref.bucket, &new_ref.key, data.clone())
        })
        .await?;

        if let Err(err) = self.delete(object_ref).await {
            warn!(
                source = %object_ref,
                destination = %new_ref,
                error = %err,
                "source delete failed after copy; orphaned duplicate left behind"
            );
            return Err(err);
        }

        info!(source = %object_ref, destination = %new_ref, "object moved");
        Ok(new_ref)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn location(bucket: &str) -> StorageLocation {
        StorageLocation {
            storage_type: "STAGING".to_string(),
            bucket: bucket.to_string(),
            path: "/files".to_string(),
        }
    }

    fn mover(store: Arc<MemoryObjectStore>) -> ObjectMover {
        ObjectMover::new(store).with_retry(3, 1)
    }

    #[test]
    fn object_ref_round_trip() {
        let parsed = ObjectRef::parse("s3://staging-bucket/files/a.mp3").unwrap();
        assert_eq!(parsed.bucket, "staging-bucket");
        assert_eq!(parsed.key, "files/a.mp3");
        assert_eq!(parsed.filename(), "a.mp3");
        assert_eq!(parsed.to_string(), "s3://staging-bucket/files/a.mp3");
    }

    #[test]
    fn object_ref_rejects_malformed_input() {
        assert!(ObjectRef::parse("http://bucket/key").is_err());
        assert!(ObjectRef::parse("s3://bucket").is_err());
        assert!(ObjectRef::parse("s3:///key").is_err());
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let store = Arc::new(MemoryObjectStore::new());
        let mover = mover(store.clone());

        let stored = mover.put(b"ID3payload".to_vec(), &location("staging-bucket")).await.unwrap();
        assert!(stored.object_ref.key.starts_with("files/"));
        assert_eq!(stored.size, 10);

        let bytes = mover.get(&stored.object_ref).await.unwrap();
        assert_eq!(bytes, b"ID3payload");
    }

    #[tokio::test]
    async fn get_retries_transient_errors() {
        let store = Arc::new(MemoryObjectStore::new());
        let mover = mover(store.clone());
        let stored = mover.put(b"ID3x".to_vec(), &location("staging-bucket")).await.unwrap();

        store.fail_next_gets(2);
        let bytes = mover.get(&stored.object_ref).await.unwrap();
        assert_eq!(bytes, b"ID3x");
    }

    #[tokio::test]
    async fn get_exhaustion_is_terminal() {
        let store = Arc::new(MemoryObjectStore::new());
        let mover = mover(store.clone());
        let stored = mover.put(b"ID3x".to_vec(), &location("staging-bucket")).await.unwrap();

        store.fail_next_gets(3);
        let err = mover.get(&stored.object_ref).await.unwrap_err();
        assert!(matches!(err, FlowError::Terminal(_)));
    }

    #[tokio::test]
    async fn move_relocates_and_deletes_source() {
        let store = Arc::new(MemoryObjectStore::new());
        let mover = mover(store.clone());
        let stored = mover.put(b"ID3x".to_vec(), &location("staging-bucket")).await.unwrap();

        let new_ref = mover
            .r#move(&stored.object_ref, &location("permanent-bucket"))
            .await
            .unwrap();

        assert_eq!(new_ref.bucket, "permanent-bucket");
        assert_eq!(new_ref.filename(), stored.object_ref.filename());
        assert!(store.contains("permanent-bucket", &new_ref.key));
        assert!(!store.contains("staging-bucket", &stored.object_ref.key));
    }

    #[tokio::test]
    async fn failed_source_delete_leaves_duplicate_and_errors() {
        let store = Arc::new(MemoryObjectStore::new());
        let mover = mover(store.clone());
        let stored = mover.put(b"ID3x".to_vec(), &location("staging-bucket")).await.unwrap();

        store.poison_delete(&stored.object_ref.key);
        let err = mover
            .r#move(&stored.object_ref, &location("permanent-bucket"))
            .await
            .unwrap_err();
        assert!(matches!(err, FlowError::Terminal(_)));

        // Copied but not deleted: both copies exist.
        assert!(store.contains("staging-bucket", &stored.object_ref.key));
        assert_eq!(store.object_count(), 2);
    }

    #[tokio::test]
    async fn get_of_missing_object_is_not_retried() {
        let store = Arc::new(MemoryObjectStore::new());
        let mover = mover(store);
        let missing = ObjectRef::parse("s3://staging-bucket/files/gone.mp3").unwrap();
        let err = mover.get(&missing).await.unwrap_err();
        assert!(matches!(err, FlowError::NotFound(_)));
    }
}
