//! Client for the storage catalog service
//!
//! Resolves a storage type ("STAGING", "PERMANENT") to the bucket and base
//! path objects of that stage live under. The HTTP resolver fails open: when
//! the catalog is unreachable or the breaker is open, a conventional stub
//! location is synthesized so ingestion keeps flowing, at the cost of the
//! stub possibly disagreeing with the catalog once it comes back.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use trackflow_common::breaker::{CircuitBreaker, DEFAULT_COOL_DOWN, DEFAULT_FAILURE_THRESHOLD};
use trackflow_common::trace::{TraceContext, TRACE_HEADER};
use trackflow_common::{FlowError, Result};

/// Client-side view of a catalog entry.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StorageLocation {
    pub storage_type: String,
    pub bucket: String,
    pub path: String,
}

impl StorageLocation {
    /// Stub location used when the catalog cannot be reached.
    pub fn fallback(storage_type: &str) -> Self {
        Self {
            storage_type: storage_type.to_string(),
            bucket: format!("{}-bucket", storage_type.to_lowercase()),
            path: "/files".to_string(),
        }
    }
}

#[async_trait]
pub trait StorageResolver: Send + Sync {
    async fn resolve(&self, storage_type: &str, trace: &TraceContext) -> Result<StorageLocation>;
}

/// HTTP resolver guarded by a circuit breaker.
pub struct HttpStorageResolver {
    client: reqwest::Client,
    base_url: String,
    breaker: CircuitBreaker,
}

impl HttpStorageResolver {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            breaker: CircuitBreaker::new(DEFAULT_FAILURE_THRESHOLD, DEFAULT_COOL_DOWN),
        }
    }

    #[cfg(test)]
    fn with_breaker(mut self, breaker: CircuitBreaker) -> Self {
        self.breaker = breaker;
        self
    }

    async fn fetch(&self, storage_type: &str, trace: &TraceContext) -> Result<StorageLocation> {
        let url = format!("{}/storages/type/{}", self.base_url, storage_type);
        let response = self
            .client
            .get(&url)
            .header(TRACE_HEADER, trace.id())
            .send()
            .await
            .map_err(|e| FlowError::Transient(format!("storage catalog request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(FlowError::Transient(format!(
                "storage catalog returned {} for {storage_type}",
                response.status()
            )));
        }

        response
            .json::<StorageLocation>()
            .await
            .map_err(|e| FlowError::Transient(format!("bad storage catalog payload: {e}")))
    }
}

#[async_trait]
impl StorageResolver for HttpStorageResolver {
    async fn resolve(&self, storage_type: &str, trace: &TraceContext) -> Result<StorageLocation> {
        if !self.breaker.allow() {
            warn!(storage_type, "storage catalog breaker open, using fallback location");
            return Ok(StorageLocation::fallback(storage_type));
        }

        match self.fetch(storage_type, trace).await {
            Ok(location) => {
                self.breaker.record_success();
                debug!(storage_type, bucket = %location.bucket, "resolved storage location");
                Ok(location)
            }
            Err(err) => {
                self.breaker.record_failure();
                warn!(
                    storage_type,
                    error = %err,
                    "storage catalog lookup failed, using fallback location"
                );
                Ok(StorageLocation::fallback(storage_type))
            }
        }
    }
}

/// Fixed in-memory resolver for tests and local wiring.
#[derive(Default)]
pub struct FixedResolver {
    locations: HashMap<String, StorageLocation>,
}

impl FixedResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, location: StorageLocation) -> Self {
        self.locations.insert(location.storage_type.clone(), location);
        self
    }
}

#[async_trait]
impl StorageResolver for FixedResolver {
    async fn resolve(&self, storage_type: &str, _trace: &TraceContext) -> Result<StorageLocation> {
        self.locations
            .get(storage_type)
            .cloned()
            .ok_or_else(|| FlowError::NotFound(format!("no location for type {storage_type}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::matchers::{header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn resolves_location_from_catalog() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/storages/type/STAGING"))
            .and(header_exists("X-Trace-Id"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": 1,
                "storageType": "STAGING",
                "bucket": "audio-staging",
                "path": "/incoming"
            })))
            .mount(&server)
            .await;

        let resolver = HttpStorageResolver::new(server.uri());
        let location = resolver
            .resolve("STAGING", &TraceContext::new())
            .await
            .unwrap();
        assert_eq!(location.bucket, "audio-staging");
        assert_eq!(location.path, "/incoming");
    }

    #[tokio::test]
    async fn falls_back_when_catalog_is_down() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let resolver = HttpStorageResolver::new(server.uri());
        let location = resolver
            .resolve("PERMANENT", &TraceContext::new())
            .await
            .unwrap();
        assert_eq!(location.bucket, "permanent-bucket");
        assert_eq!(location.path, "/files");
    }

    #[tokio::test]
    async fn open_breaker_short_circuits_to_fallback() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .expect(2)
            .mount(&server)
            .await;

        let resolver = HttpStorageResolver::new(server.uri())
            .with_breaker(CircuitBreaker::new(2, Duration::from_secs(60)));
        let trace = TraceContext::new();

        // Two failures trip the breaker; the third resolve never hits the wire.
        for _ in 0..3 {
            let location = resolver.resolve("STAGING", &trace).await.unwrap();
            assert_eq!(location.bucket, "staging-bucket");
        }
    }

    #[tokio::test]
    async fn fixed_resolver_misses_are_not_found() {
        let resolver = FixedResolver::new().with(StorageLocation::fallback("STAGING"));
        let err = resolver
            .resolve("PERMANENT", &TraceContext::new())
            .await
            .unwrap_err();
        assert!(matches!(err, FlowError::NotFound(_)));
    }
}
