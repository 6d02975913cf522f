use std::{fmt, time::Duration};

use error_stack::Report;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderError {
    /// Connection could not be established or was dropped.
    Network,
    /// No response within the configured timeout.
    Timeout,
    /// The endpoint failed to serve the request.
    Server,
    /// The endpoint is rate limiting us.
    RateLimit,
    /// The endpoint doesn't implement the method.
    Unimplemented,
    /// The request was cancelled before completion.
    Cancelled,
    /// The request is malformed. Should not retry.
    BadRequest,
    /// Block, transaction or contract not found.
    NotFound,
    /// The response could not be decoded.
    Response,
    /// Method disabled on this view.
    Unsupported,
    /// A retryable error persisted after all attempts.
    RetriesExhausted,
    /// Misconfigured endpoint or endpoint pool.
    Configuration,
}

impl ProviderError {
    pub fn is_retryable(&self) -> bool {
        use ProviderError::*;
        matches!(
            self,
            Network | Timeout | Server | RateLimit | Unimplemented | Cancelled | Response
        )
    }
}

impl error_stack::Context for ProviderError {}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderError::Network => f.write_str("provider error: network"),
            ProviderError::Timeout => f.write_str("provider error: timeout"),
            ProviderError::Server => f.write_str("provider error: server"),
            ProviderError::RateLimit => f.write_str("provider error: rate limit"),
            ProviderError::Unimplemented => f.write_str("provider error: unimplemented"),
            ProviderError::Cancelled => f.write_str("provider error: cancelled"),
            ProviderError::BadRequest => f.write_str("provider error: bad request"),
            ProviderError::NotFound => f.write_str("provider error: not found"),
            ProviderError::Response => f.write_str("provider error: invalid response"),
            ProviderError::Unsupported => f.write_str("provider error: not supported in safe view"),
            ProviderError::RetriesExhausted => f.write_str("provider error: retries exhausted"),
            ProviderError::Configuration => f.write_str("provider error: configuration"),
        }
    }
}

pub trait ProviderErrorExt {
    fn is_not_found(&self) -> bool;
    fn is_retryable(&self) -> bool;
}

impl ProviderErrorExt for Report<ProviderError> {
    fn is_not_found(&self) -> bool {
        matches!(self.current_context(), ProviderError::NotFound)
    }

    fn is_retryable(&self) -> bool {
        self.current_context().is_retryable()
    }
}

/// Connectivity class of an error, used by the pool to decide on failover.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorKind {
    Timeout,
    Disconnection,
    RateLimit,
    OversizedResponse,
    Generic,
}

impl ApiErrorKind {
    /// Classifies any provider error. Never fails.
    pub fn classify(report: &Report<ProviderError>) -> Self {
        match report.current_context() {
            ProviderError::Timeout => ApiErrorKind::Timeout,
            ProviderError::RateLimit => ApiErrorKind::RateLimit,
            ProviderError::Network => ApiErrorKind::Disconnection,
            _ => Self::from_message(&format!("{report:?}")),
        }
    }

    /// Classifies an error from its message alone.
    pub fn from_message(message: &str) -> Self {
        if message.contains("No response received from RPC endpoint in") {
            ApiErrorKind::Timeout
        } else if message.contains("disconnected from ") {
            ApiErrorKind::Disconnection
        } else if message.contains("Rate Limited at endpoint")
            || message.contains("Rate limit reached")
        {
            ApiErrorKind::RateLimit
        } else if message.contains("Exceeded max limit of") {
            ApiErrorKind::OversizedResponse
        } else {
            ApiErrorKind::Generic
        }
    }

    /// How long an endpoint is skipped after failing with this error.
    pub fn cooldown(&self) -> Option<Duration> {
        match self {
            ApiErrorKind::Timeout => Some(Duration::from_secs(5)),
            ApiErrorKind::Disconnection => Some(Duration::from_secs(10)),
            ApiErrorKind::RateLimit => Some(Duration::from_secs(10)),
            ApiErrorKind::OversizedResponse | ApiErrorKind::Generic => None,
        }
    }
}
