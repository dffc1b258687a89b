use crate::outcome::OutcomeKind;
use crate::settings::Channel;

/// Built-in subject and body used when a channel has no template of its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DefaultTemplate {
    pub subject: &'static str,
    pub body: &'static str,
}

const SUCCESS_SUBJECT: &str = "[courier] {callback_name} delivered";
const FAILURE_SUBJECT: &str = "[courier] {callback_name} failed";

const SUCCESS_EMAIL: &str = "Your {action_type} callback \"{callback_name}\" was delivered.\n\n\
Status: {status_code}\nDuration: {duration_ms}ms\nTime: {timestamp}\n";

const FAILURE_EMAIL: &str = "Your {action_type} callback \"{callback_name}\" could not be delivered.\n\n\
Error: {error}\nStatus: {status_code}\nRetries: {retries}\nDuration: {duration_ms}ms\nTime: {timestamp}\n";

const SUCCESS_SHORT: &str = "{callback_name} ({action_type}) delivered in {duration_ms}ms";
const FAILURE_SHORT: &str = "{callback_name} ({action_type}) failed: {error}";

/// Default template for `kind` on `channel`. Email gets a full body, every
/// other channel a one-liner.
pub fn default_template(kind: OutcomeKind, channel: Channel) -> DefaultTemplate {
    let long = channel == Channel::Email;
    match kind {
        OutcomeKind::Success => DefaultTemplate {
            subject: SUCCESS_SUBJECT,
            body: if long { SUCCESS_EMAIL } else { SUCCESS_SHORT },
        },
        OutcomeKind::Failure => DefaultTemplate {
            subject: FAILURE_SUBJECT,
            body: if long { FAILURE_EMAIL } else { FAILURE_SHORT },
        },
    }
}
