use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Router,
    extract::MatchedPath,
    routing::{any, get, post, put},
};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::{config::AppConfig, handlers, repository::RepositoryRegistry};

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<RepositoryRegistry>,
    /// File re-read by `POST /admin/reload-config`, if any.
    pub config_path: Option<Arc<PathBuf>>,
}

impl AppState {
    pub fn new(registry: RepositoryRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
            config_path: None,
        }
    }

    pub fn with_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(Arc::new(path.into()));
        self
    }
}

pub struct DepotServer {
    addr: SocketAddr,
    app: Router,
}

/// Build the application router, wiring one proxy repository per config entry.
pub fn build_app(cfg: &AppConfig) -> anyhow::Result<Router> {
    Ok(build_router(app_state(cfg)?, cfg.server.body_limit_bytes))
}

/// Like [`build_app`], with `POST /admin/reload-config` re-reading `path`.
pub fn build_reloadable_app(cfg: &AppConfig, path: impl Into<PathBuf>) -> anyhow::Result<Router> {
    let state = app_state(cfg)?.with_config_path(path);
    Ok(build_router(state, cfg.server.body_limit_bytes))
}

fn app_state(cfg: &AppConfig) -> anyhow::Result<AppState> {
    let registry = RepositoryRegistry::from_config(cfg)?;
    tracing::info!(repositories = ?registry.names(), "Repositories registered");
    Ok(AppState::new(registry))
}

pub fn build_router(state: AppState, body_limit: usize) -> Router {
    Router::new()
        .route("/healthz", get(handlers::healthz))
        .route("/metrics", get(handlers::metrics))
        .route("/repository/{name}/{*path}", any(handlers::proxy_request))
        .route(
            "/admin/repositories/{name}/invalidate-cache",
            post(handlers::invalidate_cache),
        )
        .route(
            "/admin/repositories/{name}/cooperation",
            get(handlers::cooperation_status),
        )
        .route(
            "/admin/repositories/{name}/blocked",
            put(handlers::set_blocked),
        )
        .route("/admin/reload-config", post(handlers::reload_config))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(|req: &axum::http::Request<_>| {
                            use tracing::field::Empty;
                            let route = req
                                .extensions()
                                .get::<MatchedPath>()
                                .map(|p| p.as_str().to_string())
                                .unwrap_or_default();
                            tracing::info_span!(
                                "http.request",
                                http.method = %req.method(),
                                http.target = %req.uri(),
                                http.route = %route,
                                http.status_code = Empty,
                            )
                        })
                        .on_response(
                            |res: &axum::http::Response<_>,
                             latency: std::time::Duration,
                             span: &tracing::Span| {
                                span.record(
                                    "http.status_code",
                                    tracing::field::display(res.status().as_u16()),
                                );
                                tracing::info!(
                                    http.status = %res.status().as_u16(),
                                    elapsed_ms = %latency.as_millis(),
                                    "request handled"
                                );
                            },
                        ),
                )
                .layer(axum::extract::DefaultBodyLimit::max(body_limit)),
        )
}

pub struct ServerBuilder {
    addr: SocketAddr,
    config: AppConfig,
    config_path: Option<PathBuf>,
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerBuilder {
    pub fn new() -> Self {
        let cfg = AppConfig::default();
        Self {
            addr: cfg.addr(),
            config: cfg,
            config_path: None,
        }
    }

    pub fn with_addr(mut self, addr: SocketAddr) -> Self {
        self.addr = addr;
        self
    }

    pub fn with_config(mut self, cfg: AppConfig) -> Self {
        self.addr = cfg.addr();
        self.config = cfg;
        self
    }

    /// Enable runtime reloads from the file the config was loaded from.
    pub fn with_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    pub fn build(self) -> anyhow::Result<DepotServer> {
        let app = match self.config_path {
            Some(path) => build_reloadable_app(&self.config, path)?,
            None => build_app(&self.config)?,
        };
        Ok(DepotServer {
            addr: self.addr,
            app,
        })
    }
}

impl DepotServer {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        tracing::info!("listening on {}", self.addr);
        axum::serve(listener, self.app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;
        Ok(())
    }
}

async fn shutdown_signal() {
    // Wait for Ctrl+C
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
