use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, instrument, warn};

use crate::channel::RenderedMessage;
use crate::error::NotifyError;

/// A browser/device push registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushSubscription {
    pub endpoint: String,
    /// Client key material (`p256dh`, `auth`), passed through to the relay.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub keys: BTreeMap<String, String>,
}

impl PushSubscription {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            keys: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_key(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.keys.insert(name.into(), value.into());
        self
    }
}

/// Delivers one message to one push subscription.
///
/// Returning [`NotifyError::SubscriptionGone`] tells the caller to delete the
/// subscription instead of retrying.
#[async_trait]
pub trait PushSender: Send + Sync + std::fmt::Debug {
    async fn push(
        &self,
        subscription: &PushSubscription,
        message: &RenderedMessage,
    ) -> Result<(), NotifyError>;
}

/// Default `TTL` header, in seconds.
pub const DEFAULT_PUSH_TTL_SECS: u32 = 86_400;

/// [`PushSender`] that posts a JSON notification to the subscription
/// endpoint (a push relay that handles payload encryption).
#[derive(Debug, Clone)]
pub struct HttpPushSender {
    client: reqwest::Client,
    ttl_secs: u32,
}

impl HttpPushSender {
    pub fn new(timeout: Duration) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NotifyError::Configuration(format!("failed to build HTTP client: {e}")))?;
        Ok(Self::with_client(client))
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            client,
            ttl_secs: DEFAULT_PUSH_TTL_SECS,
        }
    }

    #[must_use]
    pub fn with_ttl_secs(mut self, ttl_secs: u32) -> Self {
        self.ttl_secs = ttl_secs;
        self
    }
}

#[async_trait]
impl PushSender for HttpPushSender {
    #[instrument(skip_all, fields(endpoint = %subscription.endpoint))]
    async fn push(
        &self,
        subscription: &PushSubscription,
        message: &RenderedMessage,
    ) -> Result<(), NotifyError> {
        let body = json!({
            "title": message.subject,
            "body": message.body,
            "keys": subscription.keys,
        });
        let response = self
            .client
            .post(&subscription.endpoint)
            .header("TTL", self.ttl_secs.to_string())
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            debug!(status = status.as_u16(), "push accepted");
            return Ok(());
        }
        if status == StatusCode::GONE || status == StatusCode::NOT_FOUND {
            return Err(NotifyError::SubscriptionGone(status.as_u16()));
        }
        warn!(status = status.as_u16(), "push service rejected message");
        Err(NotifyError::PushRejected(status.as_u16()))
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use super::*;

    async fn serve_once(status: u16) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/push/abc", listener.local_addr().unwrap());
        let handle = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 8192];
            let mut request = Vec::new();
            loop {
                let n = stream.read(&mut buf).await.unwrap();
                request.extend_from_slice(&buf[..n]);
                if n == 0 || complete(&request) {
                    break;
                }
            }
            let response =
                format!("HTTP/1.1 {status} X\r\nContent-Length: 0\r\nConnection: close\r\n\r\n");
            stream.write_all(response.as_bytes()).await.unwrap();
            String::from_utf8_lossy(&request).into_owned()
        });
        (url, handle)
    }

    fn complete(request: &[u8]) -> bool {
        let text = String::from_utf8_lossy(request);
        let Some(header_end) = text.find("\r\n\r\n") else {
            return false;
        };
        let length = text[..header_end]
            .lines()
            .filter_map(|line| line.split_once(':'))
            .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
            .and_then(|(_, value)| value.trim().parse::<usize>().ok())
            .unwrap_or(0);
        request.len() >= header_end + 4 + length
    }

    fn message() -> RenderedMessage {
        RenderedMessage::new("orders failed").with_subject("[courier] orders failed")
    }

    #[tokio::test]
    async fn accepted_push_posts_json() {
        let (url, handle) = serve_once(201).await;
        let sender = HttpPushSender::new(Duration::from_secs(5)).unwrap();
        let subscription = PushSubscription::new(url).with_key("auth", "k");

        sender.push(&subscription, &message()).await.unwrap();
        let request = handle.await.unwrap();
        assert!(request.starts_with("POST /push/abc "));
        assert!(request.to_ascii_lowercase().contains("ttl: 86400"));
        assert!(request.contains(r#""body":"orders failed""#));
    }

    #[tokio::test]
    async fn gone_and_not_found_mark_the_subscription_dead() {
        for status in [410, 404] {
            let (url, handle) = serve_once(status).await;
            let sender = HttpPushSender::new(Duration::from_secs(5)).unwrap();
            let err = sender
                .push(&PushSubscription::new(url), &message())
                .await
                .unwrap_err();
            handle.await.unwrap();
            assert!(err.is_gone(), "{status}: {err}");
        }
    }

    #[tokio::test]
    async fn server_errors_are_retryable_rejections() {
        let (url, handle) = serve_once(503).await;
        let sender = HttpPushSender::new(Duration::from_secs(5)).unwrap();
        let err = sender
            .push(&PushSubscription::new(url), &message())
            .await
            .unwrap_err();
        handle.await.unwrap();
        assert!(matches!(err, NotifyError::PushRejected(503)));
        assert!(err.is_retryable());
    }
}
