use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::outcome::OutcomeKind;

/// A secondary alert medium.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Email,
    #[serde(alias = "whatsApp")]
    Whatsapp,
    Telegram,
    Sms,
    Push,
}

impl Channel {
    pub const ALL: [Self; 5] = [
        Self::Email,
        Self::Whatsapp,
        Self::Telegram,
        Self::Sms,
        Self::Push,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Whatsapp => "whatsapp",
            Self::Telegram => "telegram",
            Self::Sms => "sms",
            Self::Push => "push",
        }
    }

    /// `WhatsApp` and SMS are only available on paid plans.
    pub fn requires_paid_tier(self) -> bool {
        matches!(self, Self::Whatsapp | Self::Sms)
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The account's subscription plan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionTier {
    #[default]
    Free,
    Starter,
    Pro,
    Enterprise,
}

impl SubscriptionTier {
    pub fn is_paid(self) -> bool {
        !matches!(self, Self::Free)
    }
}

/// Per-channel delivery preferences.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelPreference {
    pub enabled: bool,
    pub on_success: bool,
    pub on_failure: bool,
    /// Addresses, phone numbers, or chat ids. Unused for push, which
    /// targets the stored subscriptions.
    pub recipients: Vec<String>,
    /// Body template; the built-in default for the outcome is used when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
    /// Subject template for channels that have one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
}

impl ChannelPreference {
    /// An enabled channel that alerts on failures only.
    pub fn to<I, S>(recipients: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            enabled: true,
            on_success: false,
            on_failure: true,
            recipients: recipients.into_iter().map(Into::into).collect(),
            template: None,
            subject: None,
        }
    }

    #[must_use]
    pub fn with_on_success(mut self, on_success: bool) -> Self {
        self.on_success = on_success;
        self
    }

    #[must_use]
    pub fn with_on_failure(mut self, on_failure: bool) -> Self {
        self.on_failure = on_failure;
        self
    }

    #[must_use]
    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.template = Some(template.into());
        self
    }

    #[must_use]
    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    /// Whether this channel should fire for `kind`.
    pub fn wants(&self, kind: OutcomeKind) -> bool {
        self.enabled
            && match kind {
                OutcomeKind::Success => self.on_success,
                OutcomeKind::Failure => self.on_failure,
            }
    }
}

/// A user's notification settings, one preference per channel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationSettings {
    pub channels: BTreeMap<Channel, ChannelPreference>,
}

impl NotificationSettings {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_channel(mut self, channel: Channel, preference: ChannelPreference) -> Self {
        self.channels.insert(channel, preference);
        self
    }

    pub fn preference(&self, channel: Channel) -> Option<&ChannelPreference> {
        self.channels.get(&channel)
    }

    /// Channels that fire for `kind`, in [`Channel`] order.
    pub fn channels_for(
        &self,
        kind: OutcomeKind,
    ) -> impl Iterator<Item = (Channel, &ChannelPreference)> {
        self.channels
            .iter()
            .filter(move |(_, pref)| pref.wants(kind))
            .map(|(channel, pref)| (*channel, pref))
    }

    pub fn should_notify(&self, kind: OutcomeKind) -> bool {
        self.channels_for(kind).next().is_some()
    }
}
