pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod observability;
pub mod repository;
pub mod server;

pub use config::AppConfig;
pub use error::ApiError;
pub use observability::{init_tracing, shutdown_tracing};
pub use repository::{ProxyRepository, RepositoryRegistry};
pub use server::{AppState, DepotServer, ServerBuilder, build_app, build_reloadable_app, build_router};
