use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use courier_core::RetryStrategy;
use courier_template::{TemplateContext, TemplateResolver};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::channel::{ChannelSender, RenderedMessage};
use crate::error::NotifyError;
use crate::outcome::{DeliveryOutcome, OutcomeKind};
use crate::push::{PushSender, PushSubscription};
use crate::settings::{Channel, ChannelPreference};
use crate::store::NotificationStore;
use crate::templates::default_template;

/// Push retry policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorSettings {
    /// Total push attempts per subscription.
    pub push_max_retries: u32,
    /// Delay before the first push retry; doubles on every attempt.
    pub push_base_delay: Duration,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            push_max_retries: 3,
            push_base_delay: Duration::from_secs(1),
        }
    }
}

impl OrchestratorSettings {
    #[must_use]
    pub fn with_push_max_retries(mut self, retries: u32) -> Self {
        self.push_max_retries = retries;
        self
    }

    #[must_use]
    pub fn with_push_base_delay(mut self, delay: Duration) -> Self {
        self.push_base_delay = delay;
        self
    }

    fn push_strategy(&self) -> RetryStrategy {
        RetryStrategy::exponential(self.push_base_delay, 2.0)
    }
}

/// What happened on one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelStatus {
    Sent,
    Failed,
    /// The channel needs a paid plan.
    TierRestricted,
    /// No sender is registered for the channel.
    NoSender,
    NoRecipients,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelReport {
    pub channel: Channel,
    pub status: ChannelStatus,
    pub recipients: usize,
}

/// Per-channel account of one [`NotificationOrchestrator::send_notifications`] call.
#[derive(Debug, Clone, Default, Serialize)]
pub struct NotificationReport {
    pub channels: Vec<ChannelReport>,
    /// Push subscriptions deleted because the service reported them gone.
    pub pruned_subscriptions: usize,
}

impl NotificationReport {
    pub fn status(&self, channel: Channel) -> Option<ChannelStatus> {
        self.channels
            .iter()
            .find(|r| r.channel == channel)
            .map(|r| r.status)
    }

    pub fn sent(&self) -> usize {
        self.channels
            .iter()
            .filter(|r| r.status == ChannelStatus::Sent)
            .count()
    }

    fn record(&mut self, channel: Channel, status: ChannelStatus, recipients: usize) {
        self.channels.push(ChannelReport {
            channel,
            status,
            recipients,
        });
    }
}

enum PushOutcome {
    Delivered,
    Gone,
    Failed,
}

/// Fans a delivery outcome out to a user's secondary alert channels.
pub struct NotificationOrchestrator {
    store: Arc<dyn NotificationStore>,
    senders: HashMap<Channel, Arc<dyn ChannelSender>>,
    push: Option<Arc<dyn PushSender>>,
    resolver: TemplateResolver,
    settings: OrchestratorSettings,
}

impl std::fmt::Debug for NotificationOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationOrchestrator")
            .field("senders", &self.senders.keys().collect::<Vec<_>>())
            .field("push", &self.push)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl NotificationOrchestrator {
    pub fn new(store: Arc<dyn NotificationStore>) -> Self {
        Self {
            store,
            senders: HashMap::new(),
            push: None,
            resolver: TemplateResolver::new(),
            settings: OrchestratorSettings::default(),
        }
    }

    /// Register the sender for `channel`. Push uses
    /// [`with_push_sender`](Self::with_push_sender) instead.
    #[must_use]
    pub fn with_sender(mut self, channel: Channel, sender: Arc<dyn ChannelSender>) -> Self {
        self.senders.insert(channel, sender);
        self
    }

    #[must_use]
    pub fn with_push_sender(mut self, sender: Arc<dyn PushSender>) -> Self {
        self.push = Some(sender);
        self
    }

    #[must_use]
    pub fn with_resolver(mut self, resolver: TemplateResolver) -> Self {
        self.resolver = resolver;
        self
    }

    #[must_use]
    pub fn with_settings(mut self, settings: OrchestratorSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Notify `user_id` about `outcome` on every channel their settings
    /// enable for it.
    ///
    /// Paid-only channels are checked against the subscription tier before
    /// anything is sent. Only store failures are returned as errors; a
    /// channel that fails to send is recorded in the report.
    #[instrument(skip(self, outcome), fields(outcome = outcome.kind().as_str()))]
    pub async fn send_notifications(
        &self,
        user_id: &str,
        outcome: &DeliveryOutcome,
    ) -> Result<NotificationReport, NotifyError> {
        let mut report = NotificationReport::default();
        let kind = outcome.kind();
        let Some(settings) = self.store.settings(user_id).await? else {
            debug!("no notification settings");
            return Ok(report);
        };

        let wanted: Vec<(Channel, &ChannelPreference)> = settings.channels_for(kind).collect();
        if wanted.is_empty() {
            return Ok(report);
        }
        let paid = if wanted.iter().any(|(c, _)| c.requires_paid_tier()) {
            self.store.tier(user_id).await?.is_paid()
        } else {
            false
        };

        let context = outcome.context();
        for (channel, preference) in wanted {
            if channel.requires_paid_tier() && !paid {
                debug!(%channel, "channel requires a paid plan");
                report.record(channel, ChannelStatus::TierRestricted, 0);
                continue;
            }
            let message = match self.render(channel, preference, kind, &context).await {
                Ok(message) => message,
                Err(e) => {
                    warn!(%channel, error = %e, "failed to render notification");
                    report.record(channel, ChannelStatus::Failed, 0);
                    continue;
                }
            };
            if channel == Channel::Push {
                self.notify_push(user_id, &message, &mut report).await?;
            } else {
                self.notify_channel(channel, preference, &message, &mut report)
                    .await;
            }
        }

        info!(sent = report.sent(), channels = report.channels.len(), "notifications processed");
        Ok(report)
    }

    async fn render(
        &self,
        channel: Channel,
        preference: &ChannelPreference,
        kind: OutcomeKind,
        context: &TemplateContext,
    ) -> Result<RenderedMessage, NotifyError> {
        let defaults = default_template(kind, channel);
        let body_template = preference.template.as_deref().unwrap_or(defaults.body);
        let body = self.resolver.resolve_template(body_template, context).await?;
        let subject_template = preference.subject.as_deref().unwrap_or(defaults.subject);
        let subject = self
            .resolver
            .resolve_template(subject_template, context)
            .await?;
        Ok(RenderedMessage::new(body).with_subject(subject))
    }

    async fn notify_channel(
        &self,
        channel: Channel,
        preference: &ChannelPreference,
        message: &RenderedMessage,
        report: &mut NotificationReport,
    ) {
        let recipients = &preference.recipients;
        if recipients.is_empty() {
            report.record(channel, ChannelStatus::NoRecipients, 0);
            return;
        }
        let Some(sender) = self.senders.get(&channel) else {
            warn!(%channel, "no sender registered");
            report.record(channel, ChannelStatus::NoSender, recipients.len());
            return;
        };

        let status = if sender.send(recipients, message).await {
            debug!(%channel, sender = sender.name(), "notification sent");
            ChannelStatus::Sent
        } else {
            warn!(%channel, sender = sender.name(), "notification failed");
            ChannelStatus::Failed
        };
        report.record(channel, status, recipients.len());
    }

    async fn notify_push(
        &self,
        user_id: &str,
        message: &RenderedMessage,
        report: &mut NotificationReport,
    ) -> Result<(), NotifyError> {
        let subscriptions = self.store.push_subscriptions(user_id).await?;
        if subscriptions.is_empty() {
            report.record(Channel::Push, ChannelStatus::NoRecipients, 0);
            return Ok(());
        }
        if self.push.is_none() {
            report.record(Channel::Push, ChannelStatus::NoSender, subscriptions.len());
            return Ok(());
        }

        let mut delivered = 0;
        for subscription in &subscriptions {
            match self.push_with_retry(user_id, subscription, message).await {
                PushOutcome::Delivered => delivered += 1,
                PushOutcome::Gone => report.pruned_subscriptions += 1,
                PushOutcome::Failed => {}
            }
        }
        let status = if delivered > 0 {
            ChannelStatus::Sent
        } else {
            ChannelStatus::Failed
        };
        report.record(Channel::Push, status, subscriptions.len());
        Ok(())
    }

    /// Push `message` to one subscription, retrying with exponential
    /// backoff. A gone subscription is deleted and not retried.
    pub async fn send_push(
        &self,
        user_id: &str,
        subscription: &PushSubscription,
        message: &RenderedMessage,
    ) -> bool {
        matches!(
            self.push_with_retry(user_id, subscription, message).await,
            PushOutcome::Delivered
        )
    }

    #[instrument(skip(self, subscription, message), fields(endpoint = %subscription.endpoint))]
    async fn push_with_retry(
        &self,
        user_id: &str,
        subscription: &PushSubscription,
        message: &RenderedMessage,
    ) -> PushOutcome {
        let Some(sender) = &self.push else {
            return PushOutcome::Failed;
        };
        let attempts = self.settings.push_max_retries.max(1);
        let strategy = self.settings.push_strategy();

        for attempt in 0..attempts {
            match sender.push(subscription, message).await {
                Ok(()) => return PushOutcome::Delivered,
                Err(e) if e.is_gone() => {
                    info!(error = %e, "push subscription is gone, deleting");
                    if let Err(e) = self
                        .store
                        .delete_push_subscription(user_id, &subscription.endpoint)
                        .await
                    {
                        warn!(error = %e, "failed to delete push subscription");
                    }
                    return PushOutcome::Gone;
                }
                Err(e) if !e.is_retryable() => {
                    warn!(error = %e, "push failed permanently");
                    return PushOutcome::Failed;
                }
                Err(e) => {
                    warn!(attempt, error = %e, "push attempt failed");
                    if attempt + 1 < attempts {
                        tokio::time::sleep(strategy.delay_for(attempt)).await;
                    }
                }
            }
        }
        PushOutcome::Failed
    }
}
