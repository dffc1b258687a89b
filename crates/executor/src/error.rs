use courier_broker::BrokerError;
use courier_core::ValidationError;
use courier_crypto::CryptoError;
use courier_template::TemplateError;
use thiserror::Error;

/// Reasons a dispatch fails before or while talking to its transport.
///
/// [`ActionExecutor::execute_action`](crate::ActionExecutor::execute_action)
/// never returns these; they are folded into the failure message of the
/// returned result.
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("{0} action requires a service credential")]
    MissingCredential(&'static str),

    #[error("failed to decrypt service credential: {0}")]
    Credential(#[from] CryptoError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("template error: {0}")]
    Template(#[from] TemplateError),

    #[error("request failed: {0}")]
    Request(String),

    #[error("{0} publishing is not configured")]
    BrokerUnavailable(&'static str),

    #[error(transparent)]
    Broker(#[from] BrokerError),
}

impl ExecutorError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Request(_) => true,
            Self::Broker(e) => e.is_retryable(),
            _ => false,
        }
    }
}

impl From<reqwest::Error> for ExecutorError {
    fn from(err: reqwest::Error) -> Self {
        Self::Request(err.to_string())
    }
}
