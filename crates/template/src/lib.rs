//! Placeholder templating for destination addresses and message bodies.
//!
//! ```rust
//! use courier_template::{TemplateContext, TemplateResolver};
//!
//! let ctx = TemplateContext::new().with("order_id", "42");
//! let out = TemplateResolver::new()
//!     .resolve_static("orders.{order_id}", &ctx)
//!     .unwrap();
//! assert_eq!(out, "orders.42");
//! ```

pub mod context;
pub mod env;
pub mod error;
pub mod extract;
pub mod resolver;

pub use context::TemplateContext;
pub use env::EnvSource;
pub use error::TemplateError;
pub use extract::{
    BUILTIN_VARIABLES, Placeholder, TemplateVariables, extract_variables, placeholders,
    validate_template,
};
pub use resolver::{MAX_RENDERED_BYTES, SecretResolver, TemplateResolver};
