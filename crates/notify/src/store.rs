use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::NotifyError;
use crate::push::PushSubscription;
use crate::settings::{NotificationSettings, SubscriptionTier};

/// Read/write access to the per-user records the orchestrator needs.
///
/// Implementations must be `Send + Sync` and safe for concurrent access.
#[async_trait]
pub trait NotificationStore: Send + Sync {
    /// `None` when the user never configured notifications.
    async fn settings(&self, user_id: &str) -> Result<Option<NotificationSettings>, NotifyError>;

    async fn tier(&self, user_id: &str) -> Result<SubscriptionTier, NotifyError>;

    async fn push_subscriptions(&self, user_id: &str)
    -> Result<Vec<PushSubscription>, NotifyError>;

    /// Delete a push subscription. Returns `true` if it existed.
    async fn delete_push_subscription(
        &self,
        user_id: &str,
        endpoint: &str,
    ) -> Result<bool, NotifyError>;
}

/// Process-local [`NotificationStore`].
#[derive(Debug, Default)]
pub struct InMemoryStore {
    settings: DashMap<String, NotificationSettings>,
    tiers: DashMap<String, SubscriptionTier>,
    push: DashMap<String, Vec<PushSubscription>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_settings(&self, user_id: impl Into<String>, settings: NotificationSettings) {
        self.settings.insert(user_id.into(), settings);
    }

    pub fn set_tier(&self, user_id: impl Into<String>, tier: SubscriptionTier) {
        self.tiers.insert(user_id.into(), tier);
    }

    /// Register a subscription, replacing one with the same endpoint.
    pub fn add_push_subscription(&self, user_id: impl Into<String>, subscription: PushSubscription) {
        let mut entry = self.push.entry(user_id.into()).or_default();
        entry.retain(|s| s.endpoint != subscription.endpoint);
        entry.push(subscription);
    }
}

#[async_trait]
impl NotificationStore for InMemoryStore {
    async fn settings(&self, user_id: &str) -> Result<Option<NotificationSettings>, NotifyError> {
        Ok(self.settings.get(user_id).map(|s| s.clone()))
    }

    async fn tier(&self, user_id: &str) -> Result<SubscriptionTier, NotifyError> {
        Ok(self.tiers.get(user_id).map(|t| *t).unwrap_or_default())
    }

    async fn push_subscriptions(
        &self,
        user_id: &str,
    ) -> Result<Vec<PushSubscription>, NotifyError> {
        Ok(self.push.get(user_id).map(|s| s.clone()).unwrap_or_default())
    }

    async fn delete_push_subscription(
        &self,
        user_id: &str,
        endpoint: &str,
    ) -> Result<bool, NotifyError> {
        let Some(mut subscriptions) = self.push.get_mut(user_id) else {
            return Ok(false);
        };
        let before = subscriptions.len();
        subscriptions.retain(|s| s.endpoint != endpoint);
        Ok(subscriptions.len() < before)
    }
}
