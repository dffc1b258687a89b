//! Authorization headers for outbound requests.
//!
//! [`AuthHeaderBuilder`] turns a declarative [`AuthConfig`] into request
//! headers. OAuth2 tokens are kept in a separately owned [`TokenCache`]
//! keyed by client identity, so a caller's config is never mutated.
//!
//! ```rust,no_run
//! use courier_auth::{AuthConfig, AuthHeaderBuilder};
//!
//! # async fn demo() -> Result<(), courier_auth::AuthError> {
//! let builder = AuthHeaderBuilder::new();
//! let headers = builder
//!     .generate_headers(&AuthConfig::Bearer { token: "t".into() })
//!     .await?;
//! assert_eq!(headers["Authorization"], "Bearer t");
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod cache;
pub mod config;
pub mod error;
pub mod mask;

pub use builder::{AuthHeaderBuilder, GeneratedAuth};
pub use cache::{OAuthToken, REFRESH_MARGIN_SECS, TokenCache, TokenKey};
pub use config::{AuthConfig, DEFAULT_API_KEY_HEADER, GrantType, OAuth2Config, ValidationReport};
pub use error::AuthError;
pub use mask::{mask_config, mask_secret};
