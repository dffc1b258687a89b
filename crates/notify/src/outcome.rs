use chrono::{DateTime, Utc};
use courier_core::ExecutionResult;
use courier_template::TemplateContext;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Which branch of the notification settings an outcome triggers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeKind {
    Success,
    Failure,
}

impl OutcomeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
        }
    }
}

/// The result of one dispatch, as reported to secondary channels.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryOutcome {
    /// Human name of the callback that fired.
    pub callback_name: String,
    pub action_type: String,
    pub result: ExecutionResult,
    #[serde(default = "Utc::now")]
    pub occurred_at: DateTime<Utc>,
    /// The triggering payload, exposed to templates as `{payload}`.
    #[serde(default)]
    pub payload: Value,
}

impl DeliveryOutcome {
    pub fn new(
        callback_name: impl Into<String>,
        action_type: impl Into<String>,
        result: ExecutionResult,
    ) -> Self {
        Self {
            callback_name: callback_name.into(),
            action_type: action_type.into(),
            result,
            occurred_at: Utc::now(),
            payload: Value::Null,
        }
    }

    #[must_use]
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    #[must_use]
    pub fn with_occurred_at(mut self, at: DateTime<Utc>) -> Self {
        self.occurred_at = at;
        self
    }

    pub fn kind(&self) -> OutcomeKind {
        if self.result.success {
            OutcomeKind::Success
        } else {
            OutcomeKind::Failure
        }
    }

    /// Variables available to notification templates.
    pub fn context(&self) -> TemplateContext {
        let status_code = self
            .result
            .status
            .map_or_else(|| "n/a".to_owned(), |s| s.to_string());
        TemplateContext::new()
            .with("callback_name", self.callback_name.as_str())
            .with("action_type", self.action_type.as_str())
            .with("outcome", self.kind().as_str())
            .with("status_code", status_code)
            .with("error", self.result.error.clone().unwrap_or_default())
            .with("duration_ms", self.result.duration_ms)
            .with("retries", self.result.retries.unwrap_or(0))
            .with("timestamp", self.occurred_at.to_rfc3339())
            .with("payload", self.payload.clone())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn context_describes_a_failure() {
        let result = ExecutionResult::failed("HTTP 502 Bad Gateway", Duration::from_millis(40))
            .with_status(502);
        let outcome = DeliveryOutcome::new("orders", "HTTP_POST", result);
        let ctx = outcome.context();

        assert_eq!(outcome.kind(), OutcomeKind::Failure);
        assert_eq!(ctx.get("outcome").unwrap(), "failure");
        assert_eq!(ctx.get("status_code").unwrap(), "502");
        assert_eq!(ctx.get("error").unwrap(), "HTTP 502 Bad Gateway");
        assert_eq!(ctx.get("duration_ms").unwrap(), 40);
    }

    #[test]
    fn success_without_status_reads_na() {
        let outcome = DeliveryOutcome::new(
            "audit",
            "STORE",
            ExecutionResult::succeeded(Duration::ZERO),
        );
        let ctx = outcome.context();
        assert_eq!(outcome.kind(), OutcomeKind::Success);
        assert_eq!(ctx.get("status_code").unwrap(), "n/a");
        assert_eq!(ctx.get("error").unwrap(), "");
    }
}
