use thiserror::Error;

/// Errors produced while building authorization headers.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The auth config failed validation; nothing was sent.
    #[error("invalid auth config: {}", .0.join("; "))]
    Invalid(Vec<String>),

    /// The token endpoint could not be reached or rejected the request.
    #[error("failed to obtain OAuth2 token: {0}")]
    TokenFetch(String),

    /// The token endpoint answered with a body we could not use.
    #[error("invalid OAuth2 token response: {0}")]
    TokenResponse(String),
}

impl AuthError {
    /// Auth failures are configuration or credential problems and are never
    /// retried by the dispatcher.
    pub fn is_retryable(&self) -> bool {
        false
    }
}
