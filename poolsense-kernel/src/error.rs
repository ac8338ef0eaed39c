//! Error taxonomy for the pool API client and the refresh coordinator.

use std::error::Error as StdError;

/// Boxed transport error, so both reqwest and test doubles can report failures.
pub type TransportError = Box<dyn StdError + Send + Sync + 'static>;

/// Failures of a single API call.
///
/// `Auth` is the credential-specific case of the client error: it is the one a
/// user can act on (bad or expired token) and should be surfaced prominently.
#[derive(Debug, thiserror::Error)]
pub enum PoolApiError {
    #[error("authentication failed on {endpoint} (HTTP {status}): invalid API key")]
    Auth { endpoint: String, status: u16 },
    #[error("API error on {endpoint}: HTTP {status}: {body}")]
    Api {
        endpoint: String,
        status: u16,
        body: String,
    },
    #[error("network error on {endpoint}: {source}")]
    Network {
        endpoint: String,
        #[source]
        source: TransportError,
    },
    #[error("invalid JSON payload from {endpoint}: {message}")]
    Decode { endpoint: String, message: String },
}

impl PoolApiError {
    pub fn endpoint(&self) -> &str {
        match self {
            Self::Auth { endpoint, .. }
            | Self::Api { endpoint, .. }
            | Self::Network { endpoint, .. }
            | Self::Decode { endpoint, .. } => endpoint,
        }
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Auth { .. })
    }

    /// Transport failures: the server was never reached.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Network { .. })
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Auth { status, .. } | Self::Api { status, .. } => Some(*status),
            Self::Network { .. } | Self::Decode { .. } => None,
        }
    }
}

pub type ApiResult<T> = Result<T, PoolApiError>;

/// Cycle-level failure handed to the scheduler. The previous snapshot stays published.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct UpdateFailed {
    pub message: String,
    pub auth_failed: bool,
}

impl UpdateFailed {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            auth_failed: false,
        }
    }
}

impl From<PoolApiError> for UpdateFailed {
    fn from(err: PoolApiError) -> Self {
        Self {
            message: format!("Error communicating with API: {err}"),
            auth_failed: err.is_auth(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_failed_embeds_cause() {
        let err = PoolApiError::Network {
            endpoint: "user_profile".into(),
            source: "connection refused".into(),
        };
        assert!(err.is_transient());
        let failed = UpdateFailed::from(err);
        assert!(failed.message.contains("connection refused"));
        assert!(failed.message.starts_with("Error communicating with API"));
        assert!(!failed.auth_failed);
    }

    #[test]
    fn test_auth_error_is_flagged() {
        let err = PoolApiError::Auth {
            endpoint: "user_profile".into(),
            status: 401,
        };
        assert_eq!(err.status(), Some(401));
        assert_eq!(err.endpoint(), "user_profile");
        assert!(UpdateFailed::from(err).auth_failed);
    }
}
