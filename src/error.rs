//! Error taxonomy for everything that crosses the remote API boundary.
//!
//! Transport and HTTP failures are never handed to callers as-is. They are
//! first described as a [`TransportFailure`] and then run through
//! [`classify`], which decides the [`ErrorKind`] in a fixed priority order.

use chrono::{DateTime, Utc};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Classification tag attached to every [`ApiError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Unauthorized,
    Forbidden,
    RateLimited,
    NotFound,
    Api,
    /// Local only: the caller's cancel token fired. Never produced by [`classify`].
    Cancelled,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::RateLimited => "rate-limited",
            ErrorKind::NotFound => "not-found",
            ErrorKind::Api => "api-error",
            ErrorKind::Cancelled => "cancelled",
        };
        f.write_str(label)
    }
}

/// Errors returned by every [`RemoteApi`](crate::remote::RemoteApi) operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    #[error("unauthorized: {message}")]
    Unauthorized { message: String },

    #[error("forbidden: {message}")]
    Forbidden { message: String },

    #[error("rate limited: {message}{}", fmt_reset(reset_at))]
    RateLimited {
        message: String,
        reset_at: Option<DateTime<Utc>>,
        retry_after: Option<Duration>,
    },

    #[error("not found: {message}")]
    NotFound { message: String },

    #[error("GitHub API error{}: {message}", fmt_status(status))]
    Api { status: Option<u16>, message: String },

    #[error("operation cancelled")]
    Cancelled,
}

fn fmt_status(status: &Option<u16>) -> String {
    status.map(|s| format!(" ({})", s)).unwrap_or_default()
}

fn fmt_reset(reset_at: &Option<DateTime<Utc>>) -> String {
    reset_at
        .map(|at| format!(" (resets at {})", at.format("%Y-%m-%d %H:%M:%S UTC")))
        .unwrap_or_default()
}

impl ApiError {
    /// Create a generic API error.
    pub fn api(status: Option<u16>, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    /// Create a not found error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    /// Create a rate limit error without reset metadata.
    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::RateLimited {
            message: message.into(),
            reset_at: None,
            retry_after: None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ApiError::Unauthorized { .. } => ErrorKind::Unauthorized,
            ApiError::Forbidden { .. } => ErrorKind::Forbidden,
            ApiError::RateLimited { .. } => ErrorKind::RateLimited,
            ApiError::NotFound { .. } => ErrorKind::NotFound,
            ApiError::Api { .. } => ErrorKind::Api,
            ApiError::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Whether the retry decorator may re-run the failed operation.
    #[inline]
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }

    /// Unauthorized and Forbidden both mean the credential is no longer usable.
    #[inline]
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, Self::Unauthorized { .. } | Self::Forbidden { .. })
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// The remote-supplied message, if the error carries one.
    pub fn message(&self) -> Option<&str> {
        match self {
            ApiError::Unauthorized { message }
            | ApiError::Forbidden { message }
            | ApiError::RateLimited { message, .. }
            | ApiError::NotFound { message }
            | ApiError::Api { message, .. } => Some(message),
            ApiError::Cancelled => None,
        }
    }
}

/// Typed rate-limit metadata reported by the transport.
///
/// Its presence is what separates an abuse/quota 403 from a permission 403.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RateLimitSignal {
    pub reset_at: Option<DateTime<Utc>>,
    pub retry_after: Option<Duration>,
}

/// A failure as seen by the transport, before classification.
#[derive(Debug, Clone, Default)]
pub struct TransportFailure {
    /// HTTP status, absent for connection-level failures.
    pub status: Option<u16>,
    pub message: String,
    pub rate_limit: Option<RateLimitSignal>,
}

impl TransportFailure {
    pub fn new(status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            rate_limit: None,
        }
    }

    pub fn with_rate_limit(mut self, signal: RateLimitSignal) -> Self {
        self.rate_limit = Some(signal);
        self
    }
}

/// Map a transport failure onto the taxonomy.
///
/// Priority: typed rate-limit signal, 401, 403, 429, 404, everything else.
/// A bare 403 is a permission denial and must not become retryable.
pub fn classify(failure: TransportFailure) -> ApiError {
    let TransportFailure {
        status,
        message,
        rate_limit,
    } = failure;

    if let Some(signal) = rate_limit {
        return ApiError::RateLimited {
            message,
            reset_at: signal.reset_at,
            retry_after: signal.retry_after,
        };
    }

    match status {
        Some(401) => ApiError::Unauthorized { message },
        Some(403) => ApiError::Forbidden { message },
        Some(429) => ApiError::RateLimited {
            message,
            reset_at: None,
            retry_after: None,
        },
        Some(404) => ApiError::NotFound { message },
        other => ApiError::Api {
            status: other,
            message,
        },
    }
}
