use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Uniform outcome record returned by every transport.
///
/// `duration_ms` is always populated, on both the success and the failure
/// path, so callers can persist a log entry without special-casing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Whether the delivery succeeded.
    pub success: bool,
    /// Transport status code (HTTP status), when one exists.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    /// Response body returned by the remote side, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_body: Option<String>,
    /// Human-readable failure description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Wall-clock time spent on the delivery.
    pub duration_ms: u64,
    /// Retries consumed (attempts minus one), for transports that retry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retries: Option<u32>,
}

/// Outcome of [`ActionExecutor::execute_action`](../courier_executor/index.html).
pub type ActionResult = ExecutionResult;

/// Error message used for every deadline-triggered failure.
///
/// Timeouts are reported as structured failures and are told apart from
/// other failures by this exact wording.
#[must_use]
pub fn timeout_message(timeout_ms: u64) -> String {
    format!("Timeout after {timeout_ms}ms")
}

impl ExecutionResult {
    /// A successful outcome.
    #[must_use]
    pub fn succeeded(duration: Duration) -> Self {
        Self {
            success: true,
            status: None,
            response_body: None,
            error: None,
            duration_ms: millis(duration),
            retries: None,
        }
    }

    /// A failed outcome carrying the given error message.
    #[must_use]
    pub fn failed(error: impl Into<String>, duration: Duration) -> Self {
        Self {
            success: false,
            status: None,
            response_body: None,
            error: Some(error.into()),
            duration_ms: millis(duration),
            retries: None,
        }
    }

    /// A failed outcome produced by an elapsed deadline.
    #[must_use]
    pub fn timed_out(timeout_ms: u64, duration: Duration) -> Self {
        Self::failed(timeout_message(timeout_ms), duration)
    }

    /// Attach a transport status code.
    #[must_use]
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    /// Attach a response body.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.response_body = Some(body.into());
        self
    }

    /// Attach the number of retries consumed.
    #[must_use]
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }

    /// Returns `true` if this failure was caused by an elapsed deadline.
    pub fn is_timeout(&self) -> bool {
        self.error
            .as_deref()
            .is_some_and(|e| e.starts_with("Timeout after "))
    }
}

/// Saturating conversion used for every `duration_ms` field.
#[must_use]
pub fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_has_no_error() {
        let result = ExecutionResult::succeeded(Duration::from_millis(12)).with_status(200);
        assert!(result.success);
        assert_eq!(result.status, Some(200));
        assert_eq!(result.duration_ms, 12);
        assert!(result.error.is_none());
    }

    #[test]
    fn timeout_is_distinguishable() {
        let result = ExecutionResult::timed_out(50, Duration::from_millis(51));
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("Timeout after 50ms"));
        assert!(result.is_timeout());

        let other = ExecutionResult::failed("HTTP 500 Internal Server Error", Duration::ZERO);
        assert!(!other.is_timeout());
    }

    #[test]
    fn optional_fields_are_omitted_from_json() {
        let result = ExecutionResult::succeeded(Duration::from_millis(3));
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json, serde_json::json!({"success": true, "duration_ms": 3}));
    }
}
