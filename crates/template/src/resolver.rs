use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tracing::{debug, warn};

use crate::context::{TemplateContext, value_to_text};
use crate::env::EnvSource;
use crate::error::TemplateError;
use crate::extract::{PLACEHOLDER_RE, Placeholder, placeholders};

/// Maximum rendered output size (1 MB).
pub const MAX_RENDERED_BYTES: usize = 1_024 * 1_024;

/// Capability that looks up `{secret:NAME}` values.
#[async_trait]
pub trait SecretResolver: Send + Sync {
    /// `Ok(None)` means the secret does not exist; the placeholder is then
    /// left in place.
    async fn resolve_secret(&self, name: &str) -> Result<Option<String>, TemplateError>;
}

#[async_trait]
impl SecretResolver for HashMap<String, String> {
    async fn resolve_secret(&self, name: &str) -> Result<Option<String>, TemplateError> {
        Ok(self.get(name).cloned())
    }
}

/// Substitutes `{placeholder}` references in strings and JSON documents.
///
/// Placeholders are resolved in a single left-to-right pass: a substituted
/// value is never scanned again, even if it contains `{...}` text.
/// Resolution by provenance:
///
/// 1. built-ins `{timestamp}`, `{uuid}`, `{callback_id}`, `{date}` take the
///    context value of the same name, else a generated value
///    (`callback_id` has no generated form and stays intact);
/// 2. other `{key}` references take the context value;
/// 3. `{env:NAME}` reads the [`EnvSource`], empty when unset;
/// 4. `{secret:NAME}` asks the [`SecretResolver`]; with no resolver
///    configured the placeholder stays intact.
#[derive(Clone)]
pub struct TemplateResolver {
    env: EnvSource,
    secrets: Option<Arc<dyn SecretResolver>>,
    context_paths: bool,
    fresh_uuid: bool,
    max_output_bytes: usize,
}

impl Default for TemplateResolver {
    fn default() -> Self {
        Self {
            env: EnvSource::Process,
            secrets: None,
            context_paths: false,
            fresh_uuid: false,
            max_output_bytes: MAX_RENDERED_BYTES,
        }
    }
}

impl std::fmt::Debug for TemplateResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemplateResolver")
            .field("env", &self.env)
            .field("secrets", &self.secrets.is_some())
            .field("context_paths", &self.context_paths)
            .field("fresh_uuid", &self.fresh_uuid)
            .finish_non_exhaustive()
    }
}

impl TemplateResolver {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_env(mut self, env: EnvSource) -> Self {
        self.env = env;
        self
    }

    #[must_use]
    pub fn with_secret_resolver(mut self, secrets: Arc<dyn SecretResolver>) -> Self {
        self.secrets = Some(secrets);
        self
    }

    /// Also resolve `{context:dotted.path}` against nested context values.
    #[must_use]
    pub fn with_context_paths(mut self) -> Self {
        self.context_paths = true;
        self
    }

    /// Generate `{uuid}` on every call instead of reading it from context.
    #[must_use]
    pub fn with_fresh_uuid(mut self) -> Self {
        self.fresh_uuid = true;
        self
    }

    #[must_use]
    pub fn with_max_output_bytes(mut self, limit: usize) -> Self {
        self.max_output_bytes = limit;
        self
    }

    /// Resolve every placeholder in `template`, including secrets.
    pub async fn resolve_template(
        &self,
        template: &str,
        context: &TemplateContext,
    ) -> Result<String, TemplateError> {
        let secrets = self.fetch_secrets([template]).await;
        self.render(template, context, &secrets)
    }

    /// Resolve without consulting the secret resolver; `{secret:...}`
    /// placeholders are left intact.
    pub fn resolve_static(
        &self,
        template: &str,
        context: &TemplateContext,
    ) -> Result<String, TemplateError> {
        self.render(template, context, &HashMap::new())
    }

    /// Resolve every string value inside `value`. Object keys and
    /// non-string values are left untouched.
    pub async fn resolve_json_template(
        &self,
        value: &Value,
        context: &TemplateContext,
    ) -> Result<Value, TemplateError> {
        let mut strings = Vec::new();
        collect_strings(value, &mut strings);
        let secrets = self.fetch_secrets(strings).await;
        self.render_json(value, context, &secrets)
    }

    fn render_json(
        &self,
        value: &Value,
        context: &TemplateContext,
        secrets: &HashMap<String, String>,
    ) -> Result<Value, TemplateError> {
        Ok(match value {
            Value::String(s) => Value::String(self.render(s, context, secrets)?),
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|item| self.render_json(item, context, secrets))
                    .collect::<Result<_, _>>()?,
            ),
            Value::Object(map) => {
                let mut out = serde_json::Map::with_capacity(map.len());
                for (key, item) in map {
                    out.insert(key.clone(), self.render_json(item, context, secrets)?);
                }
                Value::Object(out)
            }
            other => other.clone(),
        })
    }

    async fn fetch_secrets<'a, I>(&self, templates: I) -> HashMap<String, String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut resolved = HashMap::new();
        let Some(resolver) = &self.secrets else {
            return resolved;
        };

        let mut wanted: Vec<&str> = Vec::new();
        for template in templates {
            for placeholder in placeholders(template) {
                if let Placeholder::Secret(name) = placeholder
                    && !wanted.contains(&name)
                {
                    wanted.push(name);
                }
            }
        }

        for name in wanted {
            match resolver.resolve_secret(name).await {
                Ok(Some(value)) => {
                    resolved.insert(name.to_owned(), value);
                }
                Ok(None) => debug!(secret = name, "secret not found, leaving placeholder"),
                Err(e) => warn!(secret = name, error = %e, "secret lookup failed, leaving placeholder"),
            }
        }
        resolved
    }

    fn render(
        &self,
        template: &str,
        context: &TemplateContext,
        secrets: &HashMap<String, String>,
    ) -> Result<String, TemplateError> {
        let mut out = String::with_capacity(template.len());
        let mut last = 0;

        for caps in PLACEHOLDER_RE.captures_iter(template) {
            let (Some(whole), Some(name)) = (caps.get(0), caps.get(2)) else {
                continue;
            };
            out.push_str(&template[last..whole.start()]);
            let placeholder = Placeholder::classify(caps.get(1).map(|m| m.as_str()), name.as_str());
            match self.substitute(placeholder, context, secrets) {
                Some(value) => out.push_str(&value),
                None => out.push_str(whole.as_str()),
            }
            last = whole.end();
        }
        out.push_str(&template[last..]);

        if out.len() > self.max_output_bytes {
            return Err(TemplateError::OutputTooLarge {
                limit: self.max_output_bytes,
            });
        }
        Ok(out)
    }

    fn substitute(
        &self,
        placeholder: Placeholder<'_>,
        context: &TemplateContext,
        secrets: &HashMap<String, String>,
    ) -> Option<String> {
        match placeholder {
            Placeholder::Builtin("uuid") if self.fresh_uuid => Some(uuid::Uuid::new_v4().to_string()),
            Placeholder::Builtin(name) => context
                .get(name)
                .map(value_to_text)
                .or_else(|| generate_builtin(name)),
            Placeholder::Custom(name) => context.get(name).map(value_to_text),
            Placeholder::Env(name) => Some(self.env.get(name).unwrap_or_default()),
            Placeholder::Secret(name) => secrets.get(name).cloned(),
            Placeholder::ContextPath(path) if self.context_paths => {
                context.lookup_path(path).map(value_to_text)
            }
            Placeholder::ContextPath(_) => None,
        }
    }
}

fn generate_builtin(name: &str) -> Option<String> {
    match name {
        "timestamp" => Some(Utc::now().to_rfc3339()),
        "uuid" => Some(uuid::Uuid::new_v4().to_string()),
        "date" => Some(Utc::now().format("%Y-%m-%d").to_string()),
        _ => None,
    }
}

fn collect_strings<'a>(value: &'a Value, out: &mut Vec<&'a str>) {
    match value {
        Value::String(s) => out.push(s),
        Value::Array(items) => items.iter().for_each(|item| collect_strings(item, out)),
        Value::Object(map) => map.values().for_each(|item| collect_strings(item, out)),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn resolver() -> TemplateResolver {
        TemplateResolver::new().with_env(EnvSource::fixed([("REGION", "eu-west-1")]))
    }

    #[tokio::test]
    async fn resolves_custom_and_builtin_from_context() {
        let ctx = TemplateContext::new()
            .with("order_id", "42")
            .with("timestamp", "T0");
        let out = resolver()
            .resolve_template("Order {order_id} at {timestamp}", &ctx)
            .await
            .unwrap();
        assert_eq!(out, "Order 42 at T0");
    }

    #[tokio::test]
    async fn unset_env_resolves_to_empty() {
        let out = resolver()
            .resolve_template("[{env:MISSING_VAR}] {env:REGION}", &TemplateContext::new())
            .await
            .unwrap();
        assert_eq!(out, "[] eu-west-1");
    }

    #[tokio::test]
    async fn generated_builtins_and_intact_callback_id() {
        let out = resolver()
            .resolve_template("{uuid}|{date}|{callback_id}", &TemplateContext::new())
            .await
            .unwrap();
        let parts: Vec<&str> = out.split('|').collect();
        assert!(uuid::Uuid::parse_str(parts[0]).is_ok());
        assert_eq!(parts[1].len(), 10);
        assert_eq!(parts[2], "{callback_id}");
    }

    #[tokio::test]
    async fn secrets_without_resolver_stay_intact() {
        let out = resolver()
            .resolve_template("key={secret:API_KEY}", &TemplateContext::new())
            .await
            .unwrap();
        assert_eq!(out, "key={secret:API_KEY}");
    }

    #[tokio::test]
    async fn secrets_resolved_through_capability() {
        let secrets: HashMap<String, String> = [("API_KEY".to_owned(), "s3cr3t".to_owned())].into();
        let resolver = resolver().with_secret_resolver(Arc::new(secrets));
        let out = resolver
            .resolve_template("{secret:API_KEY}/{secret:OTHER}", &TemplateContext::new())
            .await
            .unwrap();
        assert_eq!(out, "s3cr3t/{secret:OTHER}");

        let static_out = resolver
            .resolve_static("{secret:API_KEY}", &TemplateContext::new())
            .unwrap();
        assert_eq!(static_out, "{secret:API_KEY}");
    }

    #[tokio::test]
    async fn substituted_values_are_not_rescanned() {
        let ctx = TemplateContext::new()
            .with("a", "{b}")
            .with("b", "should-not-appear");
        let out = resolver().resolve_template("{a}", &ctx).await.unwrap();
        assert_eq!(out, "{b}");
    }

    #[tokio::test]
    async fn unknown_custom_placeholders_stay_intact() {
        let out = resolver()
            .resolve_template("{missing} and {context:user.id}", &TemplateContext::new())
            .await
            .unwrap();
        assert_eq!(out, "{missing} and {context:user.id}");
    }

    #[test]
    fn context_paths_when_enabled() {
        let ctx = TemplateContext::new().with("user", json!({"id": 9}));
        let out = resolver()
            .with_context_paths()
            .resolve_static("users.{context:user.id}", &ctx)
            .unwrap();
        assert_eq!(out, "users.9");
    }

    #[test]
    fn fresh_uuid_ignores_context_value() {
        let ctx = TemplateContext::new().with("uuid", "fixed");
        let plain = resolver().resolve_static("{uuid}", &ctx).unwrap();
        assert_eq!(plain, "fixed");
        let fresh = resolver().with_fresh_uuid().resolve_static("{uuid}", &ctx).unwrap();
        assert_ne!(fresh, "fixed");
    }

    #[tokio::test]
    async fn json_template_resolves_string_values_only() {
        let ctx = TemplateContext::new().with("name", "Ada");
        let input = json!({
            "greeting": "Hello {name}",
            "{name}": "key untouched",
            "count": 3,
            "tags": ["{name}", true, null],
        });
        let out = resolver().resolve_json_template(&input, &ctx).await.unwrap();
        assert_eq!(out["greeting"], "Hello Ada");
        assert_eq!(out["{name}"], "key untouched");
        assert_eq!(out["count"], 3);
        assert_eq!(out["tags"], json!(["Ada", true, null]));
    }

    #[test]
    fn output_limit_enforced() {
        let ctx = TemplateContext::new().with("big", "x".repeat(64));
        let err = resolver()
            .with_max_output_bytes(16)
            .resolve_static("{big}", &ctx)
            .unwrap_err();
        assert!(matches!(err, TemplateError::OutputTooLarge { limit: 16 }));
    }
}
