//! Error types for the omem client.
//!
//! Two result kinds are kept apart:
//! - [`ValidationError`]: malformed local input, raised before any network call.
//! - [`ClientError`]: outcome of one remote operation, classified as retryable or fatal.

use std::time::Duration;

use thiserror::Error;

/// Local pre-flight validation failures. Never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// Conversation id is empty after trimming.
    #[error("conversation_id is required")]
    EmptyConversationId,

    /// Role is not one of `user`, `assistant`, `tool`, `system`.
    #[error("role must be one of: user, assistant, tool, system (got {0:?})")]
    InvalidRole(String),

    /// None of `content`, `text`, `message` carried non-blank text.
    #[error("message content/text is empty")]
    EmptyText,

    /// Client configuration is incomplete.
    #[error("invalid client config: {0}")]
    InvalidConfig(String),
}

/// Whether a remote failure may succeed when attempted again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Transient: network, 5xx, rate limit.
    Retryable,
    /// Permanent for this request: credentials, payload, quota, validation.
    Fatal,
}

/// Typed failure of a remote operation, produced by the transport layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    /// Credential rejected (401).
    #[error("authentication failed: {message}")]
    Auth {
        /// Server-provided detail.
        message: String,
    },

    /// Credential valid but not allowed (403).
    #[error("forbidden: {message}")]
    Forbidden {
        /// Server-provided detail.
        message: String,
    },

    /// Resource does not exist (404).
    #[error("not found: {message}")]
    NotFound {
        /// Server-provided detail.
        message: String,
    },

    /// Too many requests (429).
    #[error("rate limited (retry_after={retry_after:?}): {message}")]
    RateLimited {
        /// Backoff hint from `Retry-After`, if the server sent one.
        retry_after: Option<Duration>,
        /// Server-provided detail.
        message: String,
    },

    /// Tenant quota exhausted.
    #[error("quota exceeded: {message}")]
    QuotaExceeded {
        /// Server-provided detail.
        message: String,
    },

    /// Request body rejected as too large (413). The caller must shrink the delta.
    #[error("payload too large: {message}")]
    PayloadTooLarge {
        /// Server-provided detail.
        message: String,
    },

    /// Server rejected the request body (400/422).
    #[error("request rejected by server: {message}")]
    Validation {
        /// Server-provided detail.
        message: String,
    },

    /// 5xx-class failure.
    #[error("server error {status}: {message}")]
    Server {
        /// HTTP status code.
        status: u16,
        /// Server-provided detail.
        message: String,
    },

    /// Any other non-success status.
    #[error("http error {status}: {message}")]
    Http {
        /// HTTP status code.
        status: u16,
        /// Server-provided detail.
        message: String,
    },

    /// Connection, timeout or body transfer failure.
    #[error("network error: {0}")]
    Network(String),

    /// Response body could not be decoded.
    #[error("malformed response: {0}")]
    Decode(String),
}

impl ClientError {
    /// Classify this failure for the retry policy.
    #[must_use]
    pub fn class(&self) -> FailureClass {
        match self {
            Self::Network(_) | Self::Server { .. } | Self::RateLimited { .. } => {
                FailureClass::Retryable
            }
            _ => FailureClass::Fatal,
        }
    }

    /// Shorthand for `class() == FailureClass::Retryable`.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.class() == FailureClass::Retryable
    }

    /// Backoff hint carried by a rate-limit response.
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    pub(crate) fn from_reqwest(err: &reqwest::Error) -> Self {
        if err.is_decode() {
            return Self::Decode(err.to_string());
        }
        if err.is_timeout() {
            return Self::Network(format!("timed out: {err}"));
        }
        Self::Network(err.to_string())
    }
}

/// Crate-level error joining both result kinds so `?` composes across them.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// Local input was rejected before any I/O.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// A remote operation failed after the retry policy gave up.
    #[error(transparent)]
    Remote(#[from] ClientError),
}

/// Result alias for the crate-level [`Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_failures_are_retryable() {
        assert!(ClientError::Network("reset".into()).is_retryable());
        assert!(
            ClientError::Server {
                status: 503,
                message: String::new()
            }
            .is_retryable()
        );
        assert!(
            ClientError::RateLimited {
                retry_after: None,
                message: String::new()
            }
            .is_retryable()
        );
    }

    #[test]
    fn terminal_failures_are_fatal() {
        for err in [
            ClientError::Auth {
                message: String::new(),
            },
            ClientError::Forbidden {
                message: String::new(),
            },
            ClientError::PayloadTooLarge {
                message: String::new(),
            },
            ClientError::QuotaExceeded {
                message: String::new(),
            },
            ClientError::Validation {
                message: String::new(),
            },
        ] {
            assert_eq!(err.class(), FailureClass::Fatal, "{err}");
        }
    }
}
