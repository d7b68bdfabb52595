use axum::{
    Json,
    body::Body,
    extract::{Path, State},
    http::{HeaderValue, Method, StatusCode, header},
    response::{IntoResponse, Response},
};
use depot_core::time::format_http_date;
use depot_core::{CachedContent, ContentKey};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::config::loader::load_config;
use crate::error::ApiError;
use crate::server::AppState;

#[derive(Serialize)]
pub struct HealthResponse<'a> {
    status: &'a str,
}

pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, Json(HealthResponse { status: "ok" }))
}

/// Serves `GET`/`HEAD /repository/{name}/{*path}` through the repository's proxy.
pub async fn proxy_request(
    State(state): State<AppState>,
    method: Method,
    Path((name, path)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    if method != Method::GET && method != Method::HEAD {
        return Err(ApiError::MethodNotAllowed(method));
    }
    let repository = state
        .registry
        .get(&name)
        .ok_or_else(|| ApiError::RepositoryNotFound(name.clone()))?;
    let key = ContentKey::new(&name, &path)?;

    match repository.orchestrator().get(&key).await? {
        Some(content) => Ok(content_response(&content)),
        None => Err(ApiError::ContentNotFound(key.to_string())),
    }
}

/// The router strips the body from `HEAD` responses and keeps the headers.
fn content_response(content: &CachedContent) -> Response {
    let mut response = Response::new(Body::from(content.payload().clone()));
    let headers = response.headers_mut();

    let content_type = content
        .content_type()
        .and_then(|ct| HeaderValue::from_str(ct).ok())
        .unwrap_or_else(|| HeaderValue::from_static("application/octet-stream"));
    headers.insert(header::CONTENT_TYPE, content_type);
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(content.size()));

    if let Some(validator) = content.cache_info().and_then(|info| info.validator()) {
        if let Some(etag) = validator
            .etag
            .as_ref()
            .and_then(|etag| HeaderValue::from_str(&format!("\"{etag}\"")).ok())
        {
            headers.insert(header::ETAG, etag);
        }
        if let Some(last_modified) = validator
            .last_modified
            .and_then(|lm| HeaderValue::from_str(&format_http_date(lm)).ok())
        {
            headers.insert(header::LAST_MODIFIED, last_modified);
        }
    }
    response
}

/// `POST /admin/repositories/{name}/invalidate-cache`
pub async fn invalidate_cache(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let repository = state
        .registry
        .get(&name)
        .ok_or(ApiError::RepositoryNotFound(name))?;
    repository.orchestrator().invalidate_caches();
    Ok((
        StatusCode::OK,
        Json(json!({ "repository": repository.name(), "status": "invalidated" })),
    ))
}

/// `GET /admin/repositories/{name}/cooperation`: callers per in-flight key.
pub async fn cooperation_status(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let repository = state
        .registry
        .get(&name)
        .ok_or(ApiError::RepositoryNotFound(name))?;
    let threads: serde_json::Map<String, serde_json::Value> = repository
        .orchestrator()
        .thread_count_per_key()
        .into_iter()
        .map(|(key, count)| (key.path().to_string(), json!(count)))
        .collect();
    Ok(Json(json!({
        "repository": repository.name(),
        "remote_url": repository.remote_url(),
        "blocked": repository.is_blocked(),
        "threads_per_key": threads,
    })))
}

#[derive(Debug, Deserialize)]
pub struct BlockRequest {
    pub blocked: bool,
}

/// `PUT /admin/repositories/{name}/blocked`
pub async fn set_blocked(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(request): Json<BlockRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let repository = state
        .registry
        .get(&name)
        .ok_or(ApiError::RepositoryNotFound(name))?;
    repository.set_blocked(request.blocked);
    Ok(Json(json!({
        "repository": repository.name(),
        "blocked": repository.is_blocked(),
    })))
}

/// `POST /admin/reload-config`: re-read the config file and apply runtime
/// settings to the running repositories.
pub async fn reload_config(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let path = state.config_path.as_deref().ok_or(ApiError::ReloadUnavailable)?;
    let path = path.to_string_lossy();
    let cfg = load_config(Some(&path)).map_err(ApiError::Config)?;
    let reconfigured = state.registry.reconfigure(&cfg);
    tracing::info!(path = %path, repositories = ?reconfigured, "Configuration reloaded");
    Ok(Json(json!({ "reconfigured": reconfigured })))
}

/// `GET /metrics` in Prometheus text format.
pub async fn metrics() -> Response {
    match crate::metrics::render_metrics() {
        Some(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        None => (StatusCode::SERVICE_UNAVAILABLE, "metrics not initialized").into_response(),
    }
}

