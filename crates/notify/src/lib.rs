//! Secondary alerting for courier.
//!
//! After a dispatch finishes, the [`NotificationOrchestrator`] looks up the
//! owning user's [`NotificationSettings`] and tells them about the outcome on
//! every channel enabled for it. `WhatsApp` and SMS require a paid
//! [`SubscriptionTier`]. Push delivery retries with exponential backoff and
//! deletes subscriptions the push service reports as gone.
//!
//! Provider wire formats stay behind [`ChannelSender`] and [`PushSender`].
//! This crate ships an SMTP email sender, an HTTP push sender, and an
//! in-memory [`NotificationStore`].

pub mod channel;
pub mod error;
pub mod orchestrator;
pub mod outcome;
pub mod push;
pub mod settings;
pub mod smtp;
pub mod store;
pub mod templates;

pub use channel::{ChannelSender, RenderedMessage};
pub use error::NotifyError;
pub use orchestrator::{
    ChannelReport, ChannelStatus, NotificationOrchestrator, NotificationReport,
    OrchestratorSettings,
};
pub use outcome::{DeliveryOutcome, OutcomeKind};
pub use push::{DEFAULT_PUSH_TTL_SECS, HttpPushSender, PushSender, PushSubscription};
pub use settings::{Channel, ChannelPreference, NotificationSettings, SubscriptionTier};
pub use smtp::{SmtpEmailSender, SmtpSettings};
pub use store::{InMemoryStore, NotificationStore};
pub use templates::{DefaultTemplate, default_template};
