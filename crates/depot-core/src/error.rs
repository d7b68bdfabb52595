use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Underlying reason a content store refused to retry a load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreFailure {
    /// Metadata exists but the blob backing it is gone.
    MissingBlob { blob_ref: String },
    /// Anything else the store could not recover from.
    Other { message: String },
}

impl fmt::Display for StoreFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingBlob { blob_ref } => write!(f, "Missing blob {blob_ref}"),
            Self::Other { message } => write!(f, "{message}"),
        }
    }
}

/// Error taxonomy for the proxy/cache orchestration layer.
///
/// Errors are `Clone` so a single fetch outcome can be handed to every caller
/// cooperating on the same content key.
#[derive(Debug, Clone, Error)]
pub enum ProxyError {
    #[error("Store retry denied: {cause}")]
    StoreRetryDenied { cause: StoreFailure },

    #[error("Store error: {message}")]
    Store { message: String },

    #[error("Origin service unavailable (status {status}): {message}")]
    OriginServiceUnavailable { status: u16, message: String },

    #[error("Remote blocked: {message}")]
    OriginBlocked { message: String },

    #[error("{message}")]
    OriginIo { message: String },

    #[error("Cooperation timed out on {key} after {waited:?}")]
    CooperationTimeout { key: String, waited: Duration },

    #[error("Thread cooperation maxed for {key} (limit {limit})")]
    CooperationLimit { key: String, limit: usize },

    #[error("Invalid repository path: {path}")]
    InvalidPath { path: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl ProxyError {
    /// Create a StoreRetryDenied error caused by a missing blob
    pub fn missing_blob(blob_ref: impl Into<String>) -> Self {
        Self::StoreRetryDenied {
            cause: StoreFailure::MissingBlob {
                blob_ref: blob_ref.into(),
            },
        }
    }

    /// Create a StoreRetryDenied error with any other cause
    pub fn retry_denied(message: impl Into<String>) -> Self {
        Self::StoreRetryDenied {
            cause: StoreFailure::Other {
                message: message.into(),
            },
        }
    }

    pub fn store(message: impl Into<String>) -> Self {
        Self::Store {
            message: message.into(),
        }
    }

    pub fn service_unavailable(status: u16, message: impl Into<String>) -> Self {
        Self::OriginServiceUnavailable {
            status,
            message: message.into(),
        }
    }

    pub fn blocked(message: impl Into<String>) -> Self {
        Self::OriginBlocked {
            message: message.into(),
        }
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::OriginIo {
            message: message.into(),
        }
    }

    pub fn cooperation_timeout(key: impl fmt::Display, waited: Duration) -> Self {
        Self::CooperationTimeout {
            key: key.to_string(),
            waited,
        }
    }

    pub fn cooperation_limit(key: impl fmt::Display, limit: usize) -> Self {
        Self::CooperationLimit {
            key: key.to_string(),
            limit,
        }
    }

    pub fn invalid_path(path: impl Into<String>) -> Self {
        Self::InvalidPath { path: path.into() }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// True when a store load failed only because the blob is missing.
    pub fn is_missing_blob(&self) -> bool {
        matches!(
            self,
            Self::StoreRetryDenied {
                cause: StoreFailure::MissingBlob { .. }
            }
        )
    }

    pub fn is_blocked(&self) -> bool {
        matches!(self, Self::OriginBlocked { .. })
    }

    pub fn is_cooperation_error(&self) -> bool {
        matches!(
            self,
            Self::CooperationTimeout { .. } | Self::CooperationLimit { .. }
        )
    }

    /// Whether stale cached content may be served instead of this error.
    ///
    /// Covers every I/O-class failure hit while refreshing content. Request
    /// and integrity errors always propagate.
    pub fn is_fallback_eligible(&self) -> bool {
        matches!(
            self,
            Self::OriginServiceUnavailable { .. }
                | Self::OriginBlocked { .. }
                | Self::OriginIo { .. }
                | Self::CooperationTimeout { .. }
                | Self::CooperationLimit { .. }
                | Self::Store { .. }
        )
    }

    /// Get error category for logging and transport mapping
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::StoreRetryDenied { .. } | Self::Store { .. } => ErrorCategory::Storage,
            Self::OriginServiceUnavailable { .. } => ErrorCategory::ServiceUnavailable,
            Self::OriginBlocked { .. } => ErrorCategory::Blocked,
            Self::OriginIo { .. } => ErrorCategory::Io,
            Self::CooperationTimeout { .. } | Self::CooperationLimit { .. } => {
                ErrorCategory::Cooperation
            }
            Self::InvalidPath { .. } => ErrorCategory::Validation,
            Self::Internal { .. } => ErrorCategory::System,
        }
    }
}

/// Error categories for monitoring and classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Storage,
    ServiceUnavailable,
    Blocked,
    Io,
    Cooperation,
    Validation,
    System,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Storage => write!(f, "storage"),
            Self::ServiceUnavailable => write!(f, "service_unavailable"),
            Self::Blocked => write!(f, "blocked"),
            Self::Io => write!(f, "io"),
            Self::Cooperation => write!(f, "cooperation"),
            Self::Validation => write!(f, "validation"),
            Self::System => write!(f, "system"),
        }
    }
}

/// Convenience result type for proxy operations
pub type Result<T> = std::result::Result<T, ProxyError>;
