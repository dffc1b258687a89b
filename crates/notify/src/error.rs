use courier_template::TemplateError;
use thiserror::Error;

/// Errors raised while loading notification state or talking to a channel.
#[derive(Debug, Error)]
pub enum NotifyError {
    /// The settings/subscription store failed.
    #[error("notification store error: {0}")]
    Store(String),

    #[error("template error: {0}")]
    Template(#[from] TemplateError),

    /// A sender could not be built from its settings.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A sender or recipient address did not parse.
    #[error("invalid address: {0}")]
    Address(String),

    #[error("transient SMTP error: {0}")]
    SmtpTransient(String),

    #[error("SMTP error: {0}")]
    Smtp(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The push service reports the subscription no longer exists.
    #[error("push subscription is gone (HTTP {0})")]
    SubscriptionGone(u16),

    /// The push service refused the message.
    #[error("push service returned HTTP {0}")]
    PushRejected(u16),
}

impl NotifyError {
    /// Whether sending again may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::SmtpTransient(_) | Self::Http(_) | Self::Store(_) => true,
            Self::PushRejected(status) => *status == 429 || *status >= 500,
            Self::Template(_)
            | Self::Configuration(_)
            | Self::Address(_)
            | Self::Smtp(_)
            | Self::SubscriptionGone(_) => false,
        }
    }

    /// Whether the error means the push subscription should be deleted.
    pub fn is_gone(&self) -> bool {
        matches!(self, Self::SubscriptionGone(_))
    }
}
