//! HTTP surface of the resource service
//!
//! Thin ingress only: handlers validate nothing beyond extraction and hand
//! straight to the coordinator, which owns the lifecycle rules.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Extension, Path, Query, Request, State},
    http::header,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    routing::post,
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;

use trackflow_common::trace::{TraceContext, TRACE_HEADER};

use crate::coordinator::IngestionCoordinator;
use crate::error::AppError;

#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<IngestionCoordinator>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/resources", post(upload_resource).delete(delete_resources))
        .route("/resources/:id", get(get_resource))
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

async fn upload_resource(
    State(state): State<AppState>,
    Extension(trace): Extension<TraceContext>,
    body: Bytes,
) -> Result<Json<Value>, AppError> {
    let record = state.coordinator.ingest(body.to_vec(), &trace).await?;
    Ok(Json(json!({ "id": record.id, "location": record.object_location })))
}

async fn get_resource(
    State(state): State<AppState>,
    Extension(trace): Extension<TraceContext>,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let bytes = state.coordinator.retrieve(&id, &trace).await?;
    Ok(([(header::CONTENT_TYPE, "audio/mpeg")], bytes).into_response())
}

#[derive(Debug, Deserialize)]
struct DeleteParams {
    id: String,
}

async fn delete_resources(
    State(state): State<AppState>,
    Extension(trace): Extension<TraceContext>,
    Query(params): Query<DeleteParams>,
) -> Result<Json<Value>, AppError> {
    let deleted = state.coordinator.delete_many(&params.id, &trace).await?;
    Ok(Json(json!({ "deletedIds": deleted })))
}
