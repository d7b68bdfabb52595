//! # depot-proxy
//!
//! Proxy/cache orchestration for Depot repositories.
//!
//! [`ProxyOrchestrator::get`] serves content from the local
//! [`ContentStore`](depot_storage::ContentStore) while it is fresh, revalidates
//! it with an [`Origin`] when it goes stale, and falls back to stale content
//! when the origin fails. Concurrent requests for the same key are coalesced
//! by [`Cooperation`] into a single upstream fetch.

pub mod classifier;
pub mod cooperation;
pub mod http;
pub mod metrics;
pub mod orchestrator;
pub mod origin;

pub use classifier::{ContentClassifier, DefaultClassifier, SuffixClassifier};
pub use cooperation::{CooperatingFuture, Cooperation, CooperationConfig};
pub use http::HttpOrigin;
pub use orchestrator::{ProxyOrchestrator, ProxyOrchestratorBuilder};
pub use origin::{DynOrigin, FetchOutcome, FreshContent, Origin};
