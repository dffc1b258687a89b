//! Generic outbound HTTP dispatcher.
//!
//! [`HttpDispatcher`] sends a declarative [`HttpRequestConfig`], merging
//! authorization headers from `courier-auth`, and reports every outcome
//! (including non-2xx statuses, network failures and timeouts) as an
//! [`HttpExecutionResult`] with sanitized request/response captures.
//! [`HttpDispatcher::execute_with_retry`] adds bounded exponential backoff
//! for network failures and 5xx responses.

pub mod capture;
pub mod config;
pub mod dispatcher;
pub mod error;

pub use capture::{
    CapturedRequest, CapturedResponse, MAX_CAPTURED_BODY_BYTES, SENSITIVE_HEADERS,
    sanitize_headers, truncate_body,
};
pub use config::{DispatcherSettings, HttpMethod, HttpRequestConfig};
pub use dispatcher::{HttpDispatcher, HttpExecutionResult};
pub use error::HttpError;
