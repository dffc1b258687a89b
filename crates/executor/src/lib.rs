//! Action executor for courier.
//!
//! [`ActionExecutor::execute_action`] dispatches one [`Action`] to its
//! transport (`HTTP_POST`, `SLACK`, `EMAIL`, `STORE`, `AMQP_PUBLISH`,
//! `MQTT_PUBLISH`) under the action's deadline and always answers with a
//! structured [`ActionResult`]. A deadline hit drops the in-flight request
//! and is reported as `"Timeout after <ms>ms"`.
//!
//! [`Action`]: courier_core::Action
//! [`ActionResult`]: courier_core::ActionResult

pub mod config;
pub mod error;
pub mod executor;
pub mod signing;

pub use config::{DEFAULT_EMAIL_API_URL, ExecutorConfig};
pub use error::ExecutorError;
pub use executor::ActionExecutor;
pub use signing::{DEFAULT_SIGNATURE_HEADER, sign_body};
