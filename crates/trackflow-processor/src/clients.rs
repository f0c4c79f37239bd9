//! HTTP collaborators of the processing worker
//!
//! Both clients retry with exponential backoff (3 attempts, 2000 ms
//! doubling). Exhaustion surfaces a terminal error to the worker, which
//! lets the bus redelivery policy take over.

use async_trait::async_trait;
use tracing::debug;

use trackflow_common::retry;
use trackflow_common::trace::{TraceContext, TRACE_HEADER};
use trackflow_common::{FlowError, Result};

use crate::metadata::TrackMetadata;

/// Retry attempts for collaborator calls.
pub const CLIENT_RETRY_ATTEMPTS: usize = 3;

/// Initial backoff for collaborator calls, in milliseconds.
pub const CLIENT_RETRY_INITIAL_MS: u64 = 2000;

/// Fetches staged resource bytes from the resource service.
#[async_trait]
pub trait ResourceFetcher: Send + Sync {
    async fn fetch_resource(&self, resource_id: &str, trace: &TraceContext) -> Result<Vec<u8>>;
}

/// Pushes extracted metadata to the song catalog service.
#[async_trait]
pub trait MetadataSink: Send + Sync {
    async fn save_metadata(&self, metadata: &TrackMetadata, trace: &TraceContext) -> Result<()>;
    async fn delete_metadata(&self, resource_id: &str, trace: &TraceContext) -> Result<()>;
}

fn transient(context: &str, err: impl std::fmt::Display) -> FlowError {
    FlowError::Transient(format!("{context}: {err}"))
}

fn check_status(context: &str, response: &reqwest::Response) -> Result<()> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    if status == reqwest::StatusCode::NOT_FOUND {
        return Err(FlowError::NotFound(format!("{context}: {status}")));
    }
    if status.is_client_error() {
        return Err(FlowError::Validation(format!("{context}: {status}")));
    }
    Err(FlowError::Transient(format!("{context}: {status}")))
}

/// Resource service client.
pub struct HttpResourceFetcher {
    client: reqwest::Client,
    base_url: String,
}

impl HttpResourceFetcher {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl ResourceFetcher for HttpResourceFetcher {
    async fn fetch_resource(&self, resource_id: &str, trace: &TraceContext) -> Result<Vec<u8>> {
        let url = format!("{}/resources/{}", self.base_url, resource_id);
        retry::run(
            retry::exponential(CLIENT_RETRY_ATTEMPTS, CLIENT_RETRY_INITIAL_MS),
            || async {
                debug!(resource_id, "fetching resource bytes");
                let response = self
                    .client
                    .get(&url)
                    .header(TRACE_HEADER, trace.id())
                    .send()
                    .await
                    .map_err(|e| transient("resource fetch failed", e))?;
                check_status("resource fetch", &response)?;
                let bytes = response
                    .bytes()
                    .await
                    .map_err(|e| transient("resource body read failed", e))?;
                Ok(bytes.to_vec())
            },
        )
        .await
    }
}

/// Song catalog client.
pub struct HttpMetadataSink {
    client: reqwest::Client,
    base_url: String,
}

impl HttpMetadataSink {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl MetadataSink for HttpMetadataSink {
    async fn save_metadata(&self, metadata: &TrackMetadata, trace: &TraceContext) -> Result<()> {
        let url = format!("{}/songs", self.base_url);
        retry::run(
            retry::exponential(CLIENT_RETRY_ATTEMPTS, CLIENT_RETRY_INITIAL_MS),
            || async {
                debug!(resource_id = metadata.id, "saving metadata");
                let response = self
                    .client
                    .post(&url)
                    .header(TRACE_HEADER, trace.id())
                    .json(metadata)
                    .send()
                    .await
                    .map_err(|e| transient("metadata save failed", e))?;
                check_status("metadata save", &response)
            },
        )
        .await
    }

    async fn delete_metadata(&self, resource_id: &str, trace: &TraceContext) -> Result<()> {
        let url = format!("{}/songs?id={}", self.base_url, resource_id);
        retry::run(
            retry::exponential(CLIENT_RETRY_ATTEMPTS, CLIENT_RETRY_INITIAL_MS),
            || async {
                debug!(resource_id, "deleting metadata");
                let response = self
                    .client
                    .delete(&url)
                    .header(TRACE_HEADER, trace.id())
                    .send()
                    .await
                    .map_err(|e| transient("metadata delete failed", e))?;
                check_status("metadata delete", &response)
            },
        )
        .await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json_string, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn trace() -> TraceContext {
        TraceContext::from_header(Some("trace-123"))
    }

    #[tokio::test]
    async fn fetch_propagates_trace_header() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/resources/7"))
            .and(header("X-Trace-Id", "trace-123"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"ID3abc".to_vec()))
            .mount(&server)
            .await;

        let fetcher = HttpResourceFetcher::new(server.uri());
        let bytes = fetcher.fetch_resource("7", &trace()).await.unwrap();
        assert_eq!(bytes, b"ID3abc");
    }

    #[tokio::test]
    async fn fetch_of_missing_resource_fails_without_retry() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let fetcher = HttpResourceFetcher::new(server.uri());
        let err = fetcher.fetch_resource("7", &trace()).await.unwrap_err();
        assert!(matches!(err, FlowError::NotFound(_)));
    }

    #[tokio::test]
    async fn save_posts_camel_case_payload() {
        let server = MockServer::start().await;
        let expected = r#"{"id":7,"name":"Song","artist":"Band","album":"LP","duration":"3:25","year":"1999"}"#;
        Mock::given(method("POST"))
            .and(path("/songs"))
            .and(body_json_string(expected))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let sink = HttpMetadataSink::new(server.uri());
        let metadata = TrackMetadata {
            id: 7,
            name: "Song".to_string(),
            artist: "Band".to_string(),
            album: "LP".to_string(),
            duration: "3:25".to_string(),
            year: "1999".to_string(),
        };
        sink.save_metadata(&metadata, &trace()).await.unwrap();
    }

    #[tokio::test]
    async fn delete_targets_the_id_param() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/songs"))
            .and(query_param("id", "7"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let sink = HttpMetadataSink::new(server.uri());
        sink.delete_metadata("7", &trace()).await.unwrap();
    }
}
