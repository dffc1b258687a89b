use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::context::TemplateContext;

/// Placeholder names filled in by the resolver itself.
pub const BUILTIN_VARIABLES: [&str; 4] = ["timestamp", "uuid", "callback_id", "date"];

/// `{name}`, `{env:NAME}`, `{secret:NAME}` or `{context:dotted.path}`.
pub(crate) static PLACEHOLDER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{(?:(env|secret|context):)?([A-Za-z_][A-Za-z0-9_.\-]*)\}")
        .expect("placeholder regex is valid")
});

/// A single classified placeholder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placeholder<'a> {
    Builtin(&'a str),
    Custom(&'a str),
    Env(&'a str),
    Secret(&'a str),
    ContextPath(&'a str),
}

impl<'a> Placeholder<'a> {
    pub(crate) fn classify(namespace: Option<&str>, name: &'a str) -> Self {
        match namespace {
            Some("env") => Self::Env(name),
            Some("secret") => Self::Secret(name),
            Some(_) => Self::ContextPath(name),
            None if BUILTIN_VARIABLES.contains(&name) => Self::Builtin(name),
            None => Self::Custom(name),
        }
    }
}

/// Every placeholder in `template`, in order of appearance.
pub fn placeholders(template: &str) -> impl Iterator<Item = Placeholder<'_>> {
    PLACEHOLDER_RE.captures_iter(template).filter_map(|caps| {
        let name = caps.get(2)?.as_str();
        Some(Placeholder::classify(
            caps.get(1).map(|m| m.as_str()),
            name,
        ))
    })
}

/// Placeholders of a template grouped by provenance, deduplicated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TemplateVariables {
    pub builtin: Vec<String>,
    pub custom: Vec<String>,
    pub env: Vec<String>,
    pub secret: Vec<String>,
    pub context: Vec<String>,
}

impl TemplateVariables {
    pub fn is_empty(&self) -> bool {
        self.builtin.is_empty()
            && self.custom.is_empty()
            && self.env.is_empty()
            && self.secret.is_empty()
            && self.context.is_empty()
    }
}

fn push_unique(list: &mut Vec<String>, name: &str) {
    if !list.iter().any(|existing| existing == name) {
        list.push(name.to_owned());
    }
}

/// Classify every placeholder without resolving anything.
pub fn extract_variables(template: &str) -> TemplateVariables {
    let mut vars = TemplateVariables::default();
    for placeholder in placeholders(template) {
        match placeholder {
            Placeholder::Builtin(name) => push_unique(&mut vars.builtin, name),
            Placeholder::Custom(name) => push_unique(&mut vars.custom, name),
            Placeholder::Env(name) => push_unique(&mut vars.env, name),
            Placeholder::Secret(name) => push_unique(&mut vars.secret, name),
            Placeholder::ContextPath(path) => push_unique(&mut vars.context, path),
        }
    }
    vars
}

/// Custom variables referenced by `template` that `context` does not define.
///
/// Environment and secret references are not checked.
pub fn validate_template(template: &str, context: &TemplateContext) -> Vec<String> {
    extract_variables(template)
        .custom
        .into_iter()
        .filter(|name| !context.contains(name))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_every_provenance() {
        let vars = extract_variables(
            "{order_id}/{timestamp}/{env:REGION}/{secret:API_KEY}/{context:user.id}/{order_id}",
        );
        assert_eq!(vars.custom, vec!["order_id"]);
        assert_eq!(vars.builtin, vec!["timestamp"]);
        assert_eq!(vars.env, vec!["REGION"]);
        assert_eq!(vars.secret, vec!["API_KEY"]);
        assert_eq!(vars.context, vec!["user.id"]);
    }

    #[test]
    fn ignores_non_placeholder_braces() {
        let vars = extract_variables(r#"{"json": true} { spaced } {1abc} {}"#);
        assert!(vars.is_empty());
    }

    #[test]
    fn validate_reports_missing_custom_only() {
        let ctx = TemplateContext::new().with("present", "x");
        let missing = validate_template("{present} {absent} {env:NOPE} {uuid}", &ctx);
        assert_eq!(missing, vec!["absent"]);
    }
}
