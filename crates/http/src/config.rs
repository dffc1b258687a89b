use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;
use std::time::Duration;

use courier_auth::AuthConfig;
use serde::{Deserialize, Serialize};

use crate::error::HttpError;

/// HTTP methods the dispatcher accepts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "&'static str")]
pub enum HttpMethod {
    Get,
    #[default]
    Post,
    Put,
    Delete,
    Head,
    Options,
    Patch,
}

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
            Self::Head => "HEAD",
            Self::Options => "OPTIONS",
            Self::Patch => "PATCH",
        }
    }

    pub(crate) fn to_reqwest(self) -> reqwest::Method {
        match self {
            Self::Get => reqwest::Method::GET,
            Self::Post => reqwest::Method::POST,
            Self::Put => reqwest::Method::PUT,
            Self::Delete => reqwest::Method::DELETE,
            Self::Head => reqwest::Method::HEAD,
            Self::Options => reqwest::Method::OPTIONS,
            Self::Patch => reqwest::Method::PATCH,
        }
    }
}

impl FromStr for HttpMethod {
    type Err = HttpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Self::Get),
            "POST" => Ok(Self::Post),
            "PUT" => Ok(Self::Put),
            "DELETE" => Ok(Self::Delete),
            "HEAD" => Ok(Self::Head),
            "OPTIONS" => Ok(Self::Options),
            "PATCH" => Ok(Self::Patch),
            _ => Err(HttpError::InvalidMethod(s.to_owned())),
        }
    }
}

impl TryFrom<String> for HttpMethod {
    type Error = HttpError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<HttpMethod> for &'static str {
    fn from(method: HttpMethod) -> Self {
        method.as_str()
    }
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One outbound HTTP request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpRequestConfig {
    #[serde(default)]
    pub method: HttpMethod,
    pub url: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub query: BTreeMap<String, String>,
    /// Sent as-is when a JSON string, otherwise serialized to JSON.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthConfig>,
    /// Per-call timeout in milliseconds; the dispatcher default applies
    /// when absent.
    #[serde(default, rename = "timeout", skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_redirects: Option<usize>,
    /// When `false`, a non-2xx status is still reported as a failure but no
    /// `HTTP <status>` error message is attached.
    #[serde(default = "default_true")]
    pub validate_status: bool,
}

fn default_true() -> bool {
    true
}

impl HttpRequestConfig {
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HashMap::new(),
            query: BTreeMap::new(),
            body: None,
            auth: None,
            timeout_ms: None,
            max_redirects: None,
            validate_status: true,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Post, url)
    }

    #[must_use]
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    #[must_use]
    pub fn with_auth(mut self, auth: AuthConfig) -> Self {
        self.auth = Some(auth);
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(courier_core::millis(timeout));
        self
    }

    #[must_use]
    pub fn with_max_redirects(mut self, max: usize) -> Self {
        self.max_redirects = Some(max);
        self
    }

    #[must_use]
    pub fn without_status_validation(mut self) -> Self {
        self.validate_status = false;
        self
    }

    /// The target URL with the query string appended.
    pub fn final_url(&self) -> Result<String, HttpError> {
        let parsed =
            url::Url::parse(&self.url).map_err(|e| HttpError::InvalidUrl(format!("{}: {e}", self.url)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(HttpError::InvalidUrl(format!(
                "unsupported scheme `{}`",
                parsed.scheme()
            )));
        }
        if self.query.is_empty() {
            return Ok(self.url.clone());
        }
        let query = serde_urlencoded::to_string(&self.query)
            .map_err(|e| HttpError::Serialization(e.to_string()))?;
        let separator = if self.url.contains('?') { '&' } else { '?' };
        Ok(format!("{}{separator}{query}", self.url))
    }

    /// The request body as text, if any.
    pub fn body_text(&self) -> Result<Option<String>, HttpError> {
        match &self.body {
            None => Ok(None),
            Some(serde_json::Value::String(s)) => Ok(Some(s.clone())),
            Some(other) => serde_json::to_string(other)
                .map(Some)
                .map_err(|e| HttpError::Serialization(e.to_string())),
        }
    }
}

/// Dispatcher-wide defaults.
#[derive(Debug, Clone)]
pub struct DispatcherSettings {
    pub user_agent: String,
    pub timeout: Duration,
    pub max_redirects: usize,
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self {
            user_agent: concat!("courier/", env!("CARGO_PKG_VERSION")).to_owned(),
            timeout: Duration::from_secs(30),
            max_redirects: 5,
        }
    }
}

impl DispatcherSettings {
    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_max_redirects(mut self, max: usize) -> Self {
        self.max_redirects = max;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn method_parsing_is_case_insensitive() {
        assert_eq!("patch".parse::<HttpMethod>().unwrap(), HttpMethod::Patch);
        assert_eq!("OPTIONS".parse::<HttpMethod>().unwrap(), HttpMethod::Options);
        assert!(matches!(
            "TRACE".parse::<HttpMethod>(),
            Err(HttpError::InvalidMethod(_))
        ));
    }

    #[test]
    fn deserialize_rejects_unknown_method() {
        let err = serde_json::from_value::<HttpRequestConfig>(
            json!({"method": "CONNECT", "url": "https://example.com"}),
        );
        assert!(err.is_err());

        let ok: HttpRequestConfig = serde_json::from_value(
            json!({"method": "head", "url": "https://example.com", "timeout": 500}),
        )
        .unwrap();
        assert_eq!(ok.method, HttpMethod::Head);
        assert_eq!(ok.timeout_ms, Some(500));
        assert!(ok.validate_status);
    }

    #[test]
    fn final_url_appends_query() {
        let config = HttpRequestConfig::get("https://example.com/items")
            .with_query("page", "2")
            .with_query("q", "a b");
        assert_eq!(
            config.final_url().unwrap(),
            "https://example.com/items?page=2&q=a+b"
        );

        let config = HttpRequestConfig::get("https://example.com/items?x=1").with_query("y", "2");
        assert_eq!(config.final_url().unwrap(), "https://example.com/items?x=1&y=2");

        assert!(HttpRequestConfig::get("ftp://example.com").final_url().is_err());
        assert!(HttpRequestConfig::get("not a url").final_url().is_err());
    }

    #[test]
    fn string_bodies_are_not_reserialized() {
        let config = HttpRequestConfig::post("https://example.com").with_body(json!("raw=1"));
        assert_eq!(config.body_text().unwrap().as_deref(), Some("raw=1"));

        let config = HttpRequestConfig::post("https://example.com").with_body(json!({"a": 1}));
        assert_eq!(config.body_text().unwrap().as_deref(), Some(r#"{"a":1}"#));
    }
}
