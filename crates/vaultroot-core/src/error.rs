//! Error types for vaultroot

use std::time::Duration;
use thiserror::Error;

/// Result type alias using VaultRootError
pub type Result<T> = std::result::Result<T, VaultRootError>;

/// Error type alias for convenience
pub type Error = VaultRootError;

/// Main error type for vaultroot
#[derive(Debug, Error)]
pub enum VaultRootError {
    /// Transient transport failure (timeout, refused connection, 5xx). Retried.
    #[error("Network error: {0}")]
    Network(String),

    /// Credentials rejected by the remote store. Never retried.
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Path does not exist on the remote store. Skipped per path.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Remote store asked us to slow down. Retried honoring the hint.
    #[error("Rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    /// Breaker is open, the call was not attempted.
    #[error("Circuit open, retry in {retry_in:?}")]
    CircuitOpen { retry_in: Duration },

    /// Persisted index could not be trusted. Triggers a full rebuild.
    #[error("Index corruption: {0}")]
    IndexCorruption(String),

    /// Remote response did not match the expected endpoint schema
    #[error("Unexpected response schema: {0}")]
    Schema(String),

    /// Non-retryable HTTP status that is not covered above
    #[error("HTTP status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Stream exceeded {limit} bytes")]
    StreamOverflow { limit: usize },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Glob pattern error: {0}")]
    GlobPattern(#[from] glob::PatternError),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl VaultRootError {
    /// Whether the retry policy may try this call again
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network(_) | Self::RateLimited { .. } => true,
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            Self::Status { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Whether this failure says the remote is unhealthy.
    ///
    /// A 404 or 401 is a perfectly healthy server answering, so those reset the
    /// breaker streak instead of feeding it.
    pub fn counts_toward_breaker(&self) -> bool {
        self.is_transient()
    }

    /// Server-provided backoff hint, if any
    pub fn retry_after_hint(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }

    /// Short stable label used in logs and stats
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Network(_) | Self::Http(_) => "network",
            Self::Auth(_) => "auth",
            Self::NotFound(_) => "not_found",
            Self::RateLimited { .. } => "rate_limited",
            Self::CircuitOpen { .. } => "circuit_open",
            Self::IndexCorruption(_) => "index_corruption",
            Self::Schema(_) => "schema",
            Self::Status { .. } => "status",
            Self::StreamOverflow { .. } => "stream_overflow",
            Self::Config(_) => "config",
            Self::InvalidInput(_) => "invalid_input",
            Self::Io(_) => "io",
            Self::Serialization(_) => "serialization",
            Self::GlobPattern(_) => "glob",
            Self::Other(_) => "other",
        }
    }

    /// Copy of an error observed by several waiters (e.g. a shared index rebuild).
    ///
    /// Variants wrapping foreign error types keep their message but not their source.
    pub fn replicate(&self) -> Self {
        match self {
            Self::Network(m) => Self::Network(m.clone()),
            Self::Auth(m) => Self::Auth(m.clone()),
            Self::NotFound(m) => Self::NotFound(m.clone()),
            Self::RateLimited { retry_after } => Self::RateLimited {
                retry_after: *retry_after,
            },
            Self::CircuitOpen { retry_in } => Self::CircuitOpen {
                retry_in: *retry_in,
            },
            Self::IndexCorruption(m) => Self::IndexCorruption(m.clone()),
            Self::Schema(m) => Self::Schema(m.clone()),
            Self::Status { status, message } => Self::Status {
                status: *status,
                message: message.clone(),
            },
            Self::StreamOverflow { limit } => Self::StreamOverflow { limit: *limit },
            Self::Config(m) => Self::Config(m.clone()),
            Self::InvalidInput(m) => Self::InvalidInput(m.clone()),
            Self::Http(e) if e.is_timeout() || e.is_connect() => Self::Network(e.to_string()),
            other => Self::Other(anyhow::anyhow!(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(VaultRootError::Network("timeout".into()).is_transient());
        assert!(VaultRootError::RateLimited { retry_after: None }.is_transient());
        assert!(VaultRootError::Status {
            status: 503,
            message: "unavailable".into()
        }
        .is_transient());

        assert!(!VaultRootError::Auth("bad key".into()).is_transient());
        assert!(!VaultRootError::NotFound("a.md".into()).is_transient());
        assert!(!VaultRootError::Status {
            status: 400,
            message: "bad request".into()
        }
        .is_transient());
        assert!(!VaultRootError::CircuitOpen {
            retry_in: Duration::from_secs(1)
        }
        .is_transient());
    }

    #[test]
    fn test_not_found_does_not_trip_breaker() {
        assert!(!VaultRootError::NotFound("x".into()).counts_toward_breaker());
        assert!(VaultRootError::Network("x".into()).counts_toward_breaker());
    }

    #[test]
    fn test_retry_after_hint() {
        let err = VaultRootError::RateLimited {
            retry_after: Some(Duration::from_secs(7)),
        };
        assert_eq!(err.retry_after_hint(), Some(Duration::from_secs(7)));
        assert_eq!(VaultRootError::Network("x".into()).retry_after_hint(), None);
    }

    #[test]
    fn test_replicate_keeps_classification() {
        let err = VaultRootError::Status {
            status: 502,
            message: "bad gateway".into(),
        };
        let copy = err.replicate();
        assert!(copy.is_transient());
        assert_eq!(copy.kind(), "status");

        let io = VaultRootError::Io(std::io::Error::new(std::io::ErrorKind::Other, "disk"));
        assert_eq!(io.replicate().kind(), "other");
    }
}
