use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A message rendered for one channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderedMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    pub body: String,
}

impl RenderedMessage {
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            subject: None,
            body: body.into(),
        }
    }

    #[must_use]
    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    /// Whether the body looks like markup rather than plain text.
    pub fn is_html(&self) -> bool {
        self.body.trim_start().starts_with('<')
    }
}

/// Delivery capability for one secondary channel.
///
/// Provider wire formats (SMS gateways, chat APIs) live behind this trait;
/// the orchestrator only learns whether the send went through.
#[async_trait]
pub trait ChannelSender: Send + Sync + std::fmt::Debug {
    async fn send(&self, recipients: &[String], message: &RenderedMessage) -> bool;

    /// Short name used in logs.
    fn name(&self) -> &'static str;
}
