use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Named variables available to a template.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TemplateContext {
    vars: Map<String, Value>,
}

impl TemplateContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a variable.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.vars.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.vars.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.vars.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.vars.contains_key(key)
    }

    /// Walk a dotted path (`order.items.0.sku`) through nested objects and
    /// arrays.
    pub fn lookup_path(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.');
        let mut current = self.vars.get(segments.next()?)?;
        for segment in segments {
            current = match current {
                Value::Object(map) => map.get(segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.vars.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

impl From<Map<String, Value>> for TemplateContext {
    fn from(vars: Map<String, Value>) -> Self {
        Self { vars }
    }
}

/// Render a context value as substitution text. Strings are inserted bare,
/// `null` as the empty string, anything else as compact JSON.
pub(crate) fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn lookup_path_walks_objects_and_arrays() {
        let ctx = TemplateContext::new().with(
            "order",
            json!({"id": 7, "items": [{"sku": "A-1"}, {"sku": "B-2"}]}),
        );
        assert_eq!(ctx.lookup_path("order.id"), Some(&json!(7)));
        assert_eq!(ctx.lookup_path("order.items.1.sku"), Some(&json!("B-2")));
        assert_eq!(ctx.lookup_path("order.items.9.sku"), None);
        assert_eq!(ctx.lookup_path("order.id.deeper"), None);
        assert_eq!(ctx.lookup_path("missing"), None);
    }

    #[test]
    fn value_text_forms() {
        assert_eq!(value_to_text(&json!("plain")), "plain");
        assert_eq!(value_to_text(&json!(42)), "42");
        assert_eq!(value_to_text(&Value::Null), "");
        assert_eq!(value_to_text(&json!({"a": 1})), r#"{"a":1}"#);
    }
}
