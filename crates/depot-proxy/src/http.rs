//! HTTP origin backed by `reqwest`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use depot_core::time::{format_http_date, parse_http_date};
use depot_core::{CachedContent, ContentKey, ProxyError, Validator};
use reqwest::header::{CONTENT_TYPE, ETAG, HeaderMap, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED};
use reqwest::{Client, StatusCode};
use tracing::{debug, info, warn};
use url::Url;

use crate::origin::{FetchOutcome, FreshContent, Origin};

/// Fetches content from a remote repository over HTTP(S).
///
/// Cached copies are revalidated with conditional requests
/// (`If-Modified-Since` / `If-None-Match`) built from their validator.
#[derive(Debug)]
pub struct HttpOrigin {
    client: Client,
    remote_url: Url,
    blocked: AtomicBool,
}

impl HttpOrigin {
    /// Create an origin for `remote_url` with its own client.
    pub fn new(
        remote_url: &str,
        connect_timeout: Duration,
        request_timeout: Duration,
    ) -> Result<Self, ProxyError> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(request_timeout)
            .build()
            .map_err(|e| ProxyError::internal(format!("Failed to create HTTP client: {e}")))?;
        Self::with_client(client, remote_url)
    }

    /// Create with a custom client.
    pub fn with_client(client: Client, remote_url: &str) -> Result<Self, ProxyError> {
        Ok(Self {
            client,
            remote_url: normalize_remote_url(remote_url)?,
            blocked: AtomicBool::new(false),
        })
    }

    /// Remote base URL, always ending in `/`.
    pub fn remote_url(&self) -> &Url {
        &self.remote_url
    }

    /// Administratively block or unblock the origin. A blocked origin fails
    /// every fetch without touching the network.
    pub fn set_blocked(&self, blocked: bool) {
        if self.blocked.swap(blocked, Ordering::SeqCst) != blocked {
            info!(remote = %self.remote_url, blocked, "Remote block status changed");
        }
    }

    pub fn is_blocked(&self) -> bool {
        self.blocked.load(Ordering::SeqCst)
    }

    /// Resolve a key's path against the remote URL.
    pub fn resolve(&self, key: &ContentKey) -> Result<Url, ProxyError> {
        // "./" keeps a first segment containing ':' from parsing as a scheme.
        self.remote_url
            .join(&format!("./{}", key.path()))
            .map_err(|e| {
                warn!(key = %key, error = %e, "Unable to resolve url");
                ProxyError::invalid_path(key.path())
            })
    }
}

#[async_trait]
impl Origin for HttpOrigin {
    async fn fetch(
        &self,
        key: &ContentKey,
        hint: Option<&CachedContent>,
    ) -> Result<Option<FetchOutcome>, ProxyError> {
        if self.is_blocked() {
            return Err(ProxyError::blocked(self.remote_url.as_str()));
        }
        let url = self.resolve(key)?;

        let mut request = self.client.get(url.clone());
        if let Some(validator) = hint.and_then(CachedContent::cache_info).and_then(|i| i.validator()) {
            if let Some(last_modified) = validator.last_modified {
                request = request.header(IF_MODIFIED_SINCE, format_http_date(last_modified));
            }
            if let Some(etag) = &validator.etag {
                request = request.header(IF_NONE_MATCH, format!("\"{etag}\""));
            }
        }
        debug!(key = %key, url = %url, "Fetching");

        let response = request
            .send()
            .await
            .map_err(|e| ProxyError::io(format!("Failed to fetch {url}: {e}")))?;
        let status = response.status();
        debug!(key = %key, status = status.as_u16(), "Status");

        match status {
            StatusCode::OK => {
                let headers = response.headers().clone();
                let payload = response
                    .bytes()
                    .await
                    .map_err(|e| ProxyError::io(format!("Failed to read body of {url}: {e}")))?;
                let mut fresh = FreshContent::new(payload).with_validator(extract_validator(&url, &headers));
                if let Some(content_type) = header_str(&headers, CONTENT_TYPE.as_str()) {
                    fresh = fresh.with_content_type(content_type);
                }
                Ok(Some(FetchOutcome::Fresh(fresh)))
            }
            StatusCode::NOT_MODIFIED if hint.is_some() => Ok(Some(FetchOutcome::Unchanged)),
            StatusCode::NOT_MODIFIED => Err(ProxyError::io(format!(
                "Received 304 without conditional GET (bad server?) from {url}"
            ))),
            s if is_service_failure(s) => Err(ProxyError::service_unavailable(
                s.as_u16(),
                format!("{url} responded with {s}"),
            )),
            _ => Ok(None),
        }
    }
}

fn normalize_remote_url(raw: &str) -> Result<Url, ProxyError> {
    let mut url = Url::parse(raw.trim())
        .map_err(|e| ProxyError::internal(format!("Invalid remote URL '{raw}': {e}")))?;
    if url.cannot_be_a_base() {
        return Err(ProxyError::internal(format!("Invalid remote URL '{raw}'")));
    }
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

fn is_service_failure(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::UNAUTHORIZED | StatusCode::PAYMENT_REQUIRED | StatusCode::PROXY_AUTHENTICATION_REQUIRED
    ) || status.is_server_error()
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn extract_validator(url: &Url, headers: &HeaderMap) -> Validator {
    let etag = header_str(headers, ETAG.as_str()).map(strip_etag);
    let last_modified = header_str(headers, LAST_MODIFIED.as_str()).and_then(|value| {
        let parsed = parse_http_date(value);
        if parsed.is_none() {
            warn!(url = %url, value, "Could not parse Last-Modified date");
        }
        parsed
    });
    Validator::new(etag, last_modified)
}

fn strip_etag(raw: &str) -> String {
    let raw = raw.trim();
    let raw = raw.strip_prefix("W/").unwrap_or(raw);
    raw.trim_matches('"').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(path: &str) -> ContentKey {
        ContentKey::new("maven-central", path).unwrap()
    }

    #[test]
    fn test_remote_url_gets_trailing_slash() {
        let origin = HttpOrigin::with_client(Client::new(), "https://repo.example.com/maven2").unwrap();
        assert_eq!(origin.remote_url().as_str(), "https://repo.example.com/maven2/");
    }

    #[test]
    fn test_resolve_key() {
        let origin = HttpOrigin::with_client(Client::new(), "https://repo.example.com/maven2/").unwrap();
        let url = origin.resolve(&key("org/acme/1.0/acme-1.0.pom")).unwrap();
        assert_eq!(url.as_str(), "https://repo.example.com/maven2/org/acme/1.0/acme-1.0.pom");

        let url = origin.resolve(&key("c:odd/name.jar")).unwrap();
        assert_eq!(url.as_str(), "https://repo.example.com/maven2/c:odd/name.jar");

        let url = origin.resolve(&key("simple/requests/")).unwrap();
        assert_eq!(url.as_str(), "https://repo.example.com/maven2/simple/requests/");
    }

    #[test]
    fn test_invalid_remote_url() {
        let err = HttpOrigin::with_client(Client::new(), "not a url").unwrap_err();
        assert!(matches!(err, ProxyError::Internal { .. }));
        assert!(HttpOrigin::with_client(Client::new(), "mailto:ops@example.com").is_err());
    }

    #[test]
    fn test_strip_etag() {
        assert_eq!(strip_etag("\"abc\""), "abc");
        assert_eq!(strip_etag("W/\"abc\""), "abc");
        assert_eq!(strip_etag("abc"), "abc");
    }

    #[test]
    fn test_service_failure_statuses() {
        assert!(is_service_failure(StatusCode::UNAUTHORIZED));
        assert!(is_service_failure(StatusCode::PAYMENT_REQUIRED));
        assert!(is_service_failure(StatusCode::PROXY_AUTHENTICATION_REQUIRED));
        assert!(is_service_failure(StatusCode::BAD_GATEWAY));
        assert!(!is_service_failure(StatusCode::NOT_FOUND));
        assert!(!is_service_failure(StatusCode::FORBIDDEN));
    }

    #[tokio::test]
    async fn test_blocked_origin_fails_without_network() {
        let origin = HttpOrigin::with_client(Client::new(), "http://127.0.0.1:9/").unwrap();
        origin.set_blocked(true);
        let err = origin.fetch(&key("a.jar"), None).await.unwrap_err();
        assert!(err.is_blocked());

        origin.set_blocked(false);
        assert!(!origin.is_blocked());
    }
}
