use courier_auth::AuthError;
use thiserror::Error;

/// Errors raised by the HTTP dispatcher.
///
/// Only request-shape problems (bad method, URL, headers, auth config) are
/// returned as `Err` from the public API. Network failures and timeouts are
/// folded into an [`HttpExecutionResult`](crate::HttpExecutionResult).
#[derive(Debug, Error)]
pub enum HttpError {
    #[error("unsupported HTTP method: {0}")]
    InvalidMethod(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("invalid header: {0}")]
    InvalidHeader(String),

    #[error("failed to serialize request: {0}")]
    Serialization(String),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("failed to build HTTP client: {0}")]
    Client(String),

    /// Connection refused, DNS failure, reset, or a body read failure.
    #[error("network error: {0}")]
    Network(String),

    /// The per-call timeout elapsed.
    #[error("Timeout after {0}ms")]
    Timeout(u64),

    /// The caller's cancellation token fired.
    #[error("request cancelled")]
    Cancelled,
}

impl HttpError {
    /// Whether another attempt might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Timeout(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transport_failures_are_retryable() {
        assert!(HttpError::Network("refused".into()).is_retryable());
        assert!(HttpError::Timeout(50).is_retryable());
        assert!(!HttpError::Cancelled.is_retryable());
        assert!(!HttpError::InvalidMethod("TRACE".into()).is_retryable());
        assert_eq!(HttpError::Timeout(50).to_string(), "Timeout after 50ms");
    }
}
