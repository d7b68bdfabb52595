//! Mapping of proxy outcomes onto HTTP responses.

use axum::{
    Json,
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
};
use depot_core::{ErrorCategory, ProxyError};
use serde_json::json;
use thiserror::Error;

/// Errors surfaced by the HTTP layer.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Proxy(#[from] ProxyError),

    #[error("Repository '{0}' not found")]
    RepositoryNotFound(String),

    #[error("{0} not found")]
    ContentNotFound(String),

    #[error("Method {0} not allowed")]
    MethodNotAllowed(Method),

    #[error("Configuration reload is not available: server was started without a config file")]
    ReloadUnavailable,

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Proxy(err) => proxy_status(err),
            Self::RepositoryNotFound(_) | Self::ContentNotFound(_) => StatusCode::NOT_FOUND,
            Self::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            Self::ReloadUnavailable => StatusCode::CONFLICT,
            Self::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> String {
        match self {
            Self::Proxy(err) => err.category().to_string(),
            Self::RepositoryNotFound(_) | Self::ContentNotFound(_) => "not_found".into(),
            Self::MethodNotAllowed(_) => "method_not_allowed".into(),
            Self::ReloadUnavailable => "reload_unavailable".into(),
            Self::Config(_) => "config".into(),
        }
    }
}

fn proxy_status(err: &ProxyError) -> StatusCode {
    match err.category() {
        ErrorCategory::ServiceUnavailable | ErrorCategory::Cooperation => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        ErrorCategory::Io | ErrorCategory::Blocked => StatusCode::BAD_GATEWAY,
        ErrorCategory::Validation => StatusCode::BAD_REQUEST,
        ErrorCategory::Storage | ErrorCategory::System => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!(status = status.as_u16(), error = %self, "Request failed");
        }
        let body = json!({
            "error": self.code(),
            "message": self.to_string(),
        });
        let mut response = (status, Json(body)).into_response();
        if let Self::MethodNotAllowed(_) = self {
            response.headers_mut().insert(
                axum::http::header::ALLOW,
                axum::http::HeaderValue::from_static("GET, HEAD"),
            );
        }
        response
    }
}
