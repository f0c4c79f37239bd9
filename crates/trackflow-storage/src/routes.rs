//! HTTP surface of the storage location directory

use std::sync::Arc;

use axum::{
    extract::{Path, Query, Request, State},
    middleware::{self, Next},
    response::Response,
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;
use tracing::info;

use trackflow_common::trace::{TraceContext, TRACE_HEADER};

use crate::error::AppError;
use crate::store::{LocationStore, NewStorageLocation, StorageLocation};

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn LocationStore>,
}

/// Build the service router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/storages", get(list_locations).post(create_location).delete(delete_locations))
        .route("/storages/type/:storage_type", get(get_by_type))
        .route("/health", get(health))
        .layer(middleware::from_fn(trace_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Adopt or generate the request's trace id and echo it on the response.
async fn trace_middleware(request: Request, next: Next) -> Response {
    let inbound = request
        .headers()
        .get(TRACE_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let trace = TraceContext::from_header(inbound.as_deref());
    let trace_id = trace.id().to_string();

    let mut request = request;
    request.extensions_mut().insert(trace);

    let mut response = next.run(request).await;
    if let Ok(value) = trace_id.parse() {
        response.headers_mut().insert(TRACE_HEADER, value);
    }
    response
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "healthy" }))
}

async fn create_location(
    State(state): State<AppState>,
    Json(request): Json<NewStorageLocation>,
) -> Result<Json<Value>, AppError> {
    let created = state.store.create(request).await?;
    Ok(Json(json!({ "id": created.id })))
}

async fn list_locations(
    State(state): State<AppState>,
) -> Result<Json<Vec<StorageLocation>>, AppError> {
    Ok(Json(state.store.list().await?))
}

async fn get_by_type(
    State(state): State<AppState>,
    Path(storage_type): Path<String>,
) -> Result<Json<StorageLocation>, AppError> {
    let location = state.store.get_by_type(&storage_type).await?;
    Ok(Json(location))
}

#[derive(Debug, Deserialize)]
struct DeleteParams {
    id: String,
}

async fn delete_locations(
    State(state): State<AppState>,
    Query(params): Query<DeleteParams>,
) -> Result<Json<Vec<i64>>, AppError> {
    if params.id.len() > 200 {
        return Err(AppError::Validation(
            "id list must not exceed 200 characters".to_string(),
        ));
    }
    let ids = params
        .id
        .split(',')
        .map(|part| {
            part.trim()
                .parse::<i64>()
                .map_err(|_| AppError::Validation(format!("invalid id: {part}")))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let deleted = state.store.delete_many(&ids).await?;
    info!(requested = ids.len(), deleted = deleted.len(), "locations deleted");
    Ok(Json(deleted))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryLocationStore;
    use axum::body::Body;
    use axum::http::{Request as HttpRequest, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn app() -> Router {
        router(AppState {
            store: Arc::new(MemoryLocationStore::new()),
        })
    }

    async fn body_json(response: Response) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn create_then_resolve_round_trip() {
        let app = app();

        let create = HttpRequest::post("/storages")
            .header("content-type", "application/json")
            .body(Body::from(
                r#"{"storageType":"STAGING","bucket":"staging-bucket","path":"/files"}"#,
            ))
            .unwrap();
        let response = app.clone().oneshot(create).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let resolve = HttpRequest::get("/storages/type/STAGING")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(resolve).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["storageType"], "STAGING");
        assert_eq!(body["bucket"], "staging-bucket");
    }

    #[tokio::test]
    async fn duplicate_type_is_rejected_with_400() {
        let app = app();
        let body = r#"{"storageType":"PERMANENT","bucket":"permanent-bucket","path":"/files"}"#;

        let first = HttpRequest::post("/storages")
            .header("content-type", "application/json")
            .body(Body::from(body))
            .unwrap();
        let response = app.clone().oneshot(first).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let second = HttpRequest::post("/storages")
            .header("content-type", "application/json")
            .body(Body::from(body))
            .unwrap();
        let response = app.oneshot(second).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unknown_type_is_404() {
        let response = app()
            .oneshot(
                HttpRequest::get("/storages/type/NOPE")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn trace_header_is_echoed() {
        let response = app()
            .oneshot(
                HttpRequest::get("/health")
                    .header(TRACE_HEADER, "trace-xyz")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(
            response.headers().get(TRACE_HEADER).unwrap(),
            "trace-xyz"
        );
    }

    #[tokio::test]
    async fn trace_header_is_generated_when_missing() {
        let response = app()
            .oneshot(HttpRequest::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert!(response.headers().contains_key(TRACE_HEADER));
    }

    #[tokio::test]
    async fn oversized_delete_list_is_rejected() {
        let ids = "1,".repeat(150);
        let response = app()
            .oneshot(
                HttpRequest::delete(format!("/storages?id={ids}1"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
