use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The triggering event handed to the executor.
///
/// Immutable once constructed: fields are only reachable through accessors,
/// so one payload can be shared by reference across every transport of a
/// dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionPayload {
    raw_body: String,
    #[serde(default)]
    parsed_json: Option<serde_json::Value>,
    #[serde(default)]
    headers: HashMap<String, String>,
    #[serde(default)]
    client_ip: String,
    #[serde(default)]
    user_agent: String,
    received_at: DateTime<Utc>,
}

impl ActionPayload {
    /// Build a payload from a raw request body. The body is parsed as JSON
    /// when possible.
    #[must_use]
    pub fn new(raw_body: impl Into<String>) -> Self {
        let raw_body = raw_body.into();
        let parsed_json = serde_json::from_str(&raw_body).ok();
        Self {
            raw_body,
            parsed_json,
            headers: HashMap::new(),
            client_ip: String::new(),
            user_agent: String::new(),
            received_at: Utc::now(),
        }
    }

    /// Build a payload from an already-parsed JSON value.
    #[must_use]
    pub fn from_json(value: serde_json::Value) -> Self {
        let raw_body = value.to_string();
        Self {
            raw_body,
            parsed_json: Some(value),
            headers: HashMap::new(),
            client_ip: String::new(),
            user_agent: String::new(),
            received_at: Utc::now(),
        }
    }

    /// Attach the inbound request headers.
    #[must_use]
    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers = headers;
        self
    }

    /// Attach the caller's address.
    #[must_use]
    pub fn with_client_ip(mut self, ip: impl Into<String>) -> Self {
        self.client_ip = ip.into();
        self
    }

    /// Attach the caller's user agent.
    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Override the receive timestamp.
    #[must_use]
    pub fn with_received_at(mut self, received_at: DateTime<Utc>) -> Self {
        self.received_at = received_at;
        self
    }

    pub fn raw_body(&self) -> &str {
        &self.raw_body
    }

    pub fn parsed_json(&self) -> Option<&serde_json::Value> {
        self.parsed_json.as_ref()
    }

    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    pub fn client_ip(&self) -> &str {
        &self.client_ip
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    pub fn received_at(&self) -> DateTime<Utc> {
        self.received_at
    }

    /// The parsed JSON body, or the raw body as a JSON string when it did
    /// not parse.
    pub fn body_value(&self) -> serde_json::Value {
        self.parsed_json
            .clone()
            .unwrap_or_else(|| serde_json::Value::String(self.raw_body.clone()))
    }

    /// Flat variable map used as a template context: top-level fields of a
    /// JSON object body plus request metadata under `client_ip`,
    /// `user_agent` and `received_at`.
    pub fn template_variables(&self) -> serde_json::Map<String, serde_json::Value> {
        let mut vars = match &self.parsed_json {
            Some(serde_json::Value::Object(map)) => map.clone(),
            _ => serde_json::Map::new(),
        };
        vars.insert("payload".into(), self.body_value());
        vars.entry("client_ip")
            .or_insert_with(|| self.client_ip.clone().into());
        vars.entry("user_agent")
            .or_insert_with(|| self.user_agent.clone().into());
        vars.entry("received_at")
            .or_insert_with(|| self.received_at.to_rfc3339().into());
        vars
    }
}
