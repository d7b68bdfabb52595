//! Proxy counters, labelled by repository.
//!
//! Recorded through the `metrics` facade; the server installs the exporter.

use metrics::counter;

/// Metric names as constants for consistency.
pub mod names {
    pub const PROXY_REQUESTS_TOTAL: &str = "depot_proxy_requests_total";
    pub const PROXY_CACHE_HITS_TOTAL: &str = "depot_proxy_cache_hits_total";
    pub const PROXY_ORIGIN_FETCHES_TOTAL: &str = "depot_proxy_origin_fetches_total";
    pub const PROXY_FALLBACKS_TOTAL: &str = "depot_proxy_fallbacks_total";
}

/// Record a `get` on a proxy repository.
pub fn record_request(repository: &str) {
    counter!(names::PROXY_REQUESTS_TOTAL, "repository" => repository.to_string()).increment(1);
}

/// Record a request served from cache without contacting the origin.
pub fn record_cache_hit(repository: &str) {
    counter!(names::PROXY_CACHE_HITS_TOTAL, "repository" => repository.to_string()).increment(1);
}

/// Record one upstream fetch and how it ended: `fresh`, `unchanged`, `absent` or `error`.
pub fn record_origin_fetch(repository: &str, outcome: &'static str) {
    counter!(
        names::PROXY_ORIGIN_FETCHES_TOTAL,
        "repository" => repository.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

/// Record stale content served because a refresh failed.
pub fn record_fallback(repository: &str, category: &str) {
    counter!(
        names::PROXY_FALLBACKS_TOTAL,
        "repository" => repository.to_string(),
        "category" => category.to_string()
    )
    .increment(1);
}
