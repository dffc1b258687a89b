//! Core types for the courier outbound action-dispatch engine.
//!
//! An [`Action`] describes one outbound delivery (transport + typed config +
//! timeout). It is validated once at construction; the executor never probes
//! optional map keys at dispatch time. The [`ActionPayload`] is the immutable
//! triggering event shared read-only by every transport for one dispatch,
//! and every transport reports back through the uniform [`ExecutionResult`].

pub mod action;
pub mod credential;
pub mod error;
pub mod outcome;
pub mod payload;
pub mod retry;

pub use action::{
    Action, ActionKind, ActionType, AmqpPublishConfig, DEFAULT_TIMEOUT_MS, EmailConfig,
    HttpPostConfig, MqttPublishConfig, PayloadFormat, Recipients, SlackConfig,
};
pub use credential::ServiceCredential;
pub use error::ValidationError;
pub use outcome::{ActionResult, ExecutionResult, millis, timeout_message};
pub use payload::ActionPayload;
pub use retry::{MAX_BACKOFF, RetryStrategy};
