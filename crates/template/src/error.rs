use thiserror::Error;

/// Errors raised while resolving templates.
///
/// Missing variables are not errors: unresolved placeholders are left in
/// place so the caller can see what was not substituted.
#[derive(Debug, Error)]
pub enum TemplateError {
    /// A secret resolver failed for a reason other than "not found".
    #[error("failed to resolve secret `{name}`: {reason}")]
    Secret { name: String, reason: String },

    /// The rendered output exceeded the size limit.
    #[error("rendered template exceeds {limit} bytes")]
    OutputTooLarge { limit: usize },
}
