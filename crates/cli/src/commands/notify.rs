use std::sync::Arc;

use clap::Args;
use courier_notify::{
    Channel, DeliveryOutcome, HttpPushSender, InMemoryStore, NotificationOrchestrator,
    NotificationSettings, PushSubscription, SmtpEmailSender, SubscriptionTier,
};
use serde::Deserialize;
use tracing::info;

use super::read_json;
use crate::config::CourierConfig;

#[derive(Args, Debug)]
pub struct NotifyArgs {
    /// User whose settings apply.
    #[arg(long)]
    pub user: String,
    /// User record JSON (`tier`, `settings`, `push_subscriptions`), inline
    /// or @file path.
    #[arg(long)]
    pub profile: String,
    /// Delivery outcome JSON, inline or @file path.
    #[arg(long)]
    pub outcome: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct UserProfile {
    tier: SubscriptionTier,
    settings: NotificationSettings,
    push_subscriptions: Vec<PushSubscription>,
}

pub async fn run(config: &CourierConfig, args: &NotifyArgs) -> anyhow::Result<()> {
    let profile: UserProfile = read_json(&args.profile)?;
    let outcome: DeliveryOutcome = read_json(&args.outcome)?;

    let store = Arc::new(InMemoryStore::new());
    store.put_settings(args.user.as_str(), profile.settings);
    store.set_tier(args.user.as_str(), profile.tier);
    for subscription in profile.push_subscriptions {
        store.add_push_subscription(args.user.as_str(), subscription);
    }

    let push = HttpPushSender::new(config.notifications.push_timeout())?;
    let mut orchestrator = NotificationOrchestrator::new(store)
        .with_settings(config.notifications.orchestrator_settings())
        .with_push_sender(Arc::new(push));
    match &config.smtp {
        Some(smtp) => {
            let sender = SmtpEmailSender::new(smtp.clone())?;
            orchestrator = orchestrator.with_sender(Channel::Email, Arc::new(sender));
        }
        None => info!("SMTP is not configured, email alerts are disabled"),
    }

    let report = orchestrator.send_notifications(&args.user, &outcome).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
