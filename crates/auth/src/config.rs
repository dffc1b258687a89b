use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default header used by [`AuthConfig::ApiKey`] when none is given.
pub const DEFAULT_API_KEY_HEADER: &str = "X-API-Key";

fn default_api_key_header() -> String {
    DEFAULT_API_KEY_HEADER.to_owned()
}

/// OAuth2 grant used to obtain an access token.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantType {
    #[default]
    ClientCredentials,
    Password,
}

impl GrantType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ClientCredentials => "client_credentials",
            Self::Password => "password",
        }
    }
}

/// OAuth2 client settings.
///
/// `access_token`/`token_expires` may carry a token the caller already holds.
/// Refreshed tokens are kept in the builder's
/// [`TokenCache`](crate::TokenCache), never written back here.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OAuth2Config {
    pub client_id: String,
    pub client_secret: String,
    pub token_url: String,
    #[serde(default)]
    pub grant_type: GrantType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_expires: Option<DateTime<Utc>>,
}

impl OAuth2Config {
    /// Client-credentials configuration with no seeded token.
    pub fn client_credentials(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        token_url: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            token_url: token_url.into(),
            grant_type: GrantType::ClientCredentials,
            scope: None,
            username: None,
            password: None,
            access_token: None,
            token_expires: None,
        }
    }

    /// Switch to the resource-owner password grant.
    #[must_use]
    pub fn with_password_grant(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.grant_type = GrantType::Password;
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Set the requested scope.
    #[must_use]
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    /// Seed a token the caller already holds.
    #[must_use]
    pub fn with_cached_token(mut self, token: impl Into<String>, expires: DateTime<Utc>) -> Self {
        self.access_token = Some(token.into());
        self.token_expires = Some(expires);
        self
    }
}

impl std::fmt::Debug for OAuth2Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuth2Config")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("token_url", &self.token_url)
            .field("grant_type", &self.grant_type)
            .field("scope", &self.scope)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("access_token", &self.access_token.as_ref().map(|_| "[REDACTED]"))
            .field("token_expires", &self.token_expires)
            .finish()
    }
}

/// Declarative description of how to authorize an outbound request.
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE", rename_all_fields = "camelCase")]
pub enum AuthConfig {
    /// No authorization.
    #[default]
    None,

    /// HTTP Basic authentication.
    Basic { username: String, password: String },

    /// `Authorization: Bearer <token>`.
    Bearer { token: String },

    /// API key in a caller-chosen header, optionally prefixed.
    ApiKey {
        key: String,
        #[serde(default = "default_api_key_header")]
        header_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        prefix: Option<String>,
    },

    /// OAuth2 client-credentials or password grant.
    #[serde(rename = "OAUTH2")]
    OAuth2(OAuth2Config),

    /// Digest authentication.
    ///
    /// Only a marker header is emitted: the challenge-response exchange is
    /// not performed.
    Digest { username: String, password: String },
}

impl AuthConfig {
    /// Variant name as it appears in the `type` tag.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::None => "NONE",
            Self::Basic { .. } => "BASIC",
            Self::Bearer { .. } => "BEARER",
            Self::ApiKey { .. } => "API_KEY",
            Self::OAuth2(_) => "OAUTH2",
            Self::Digest { .. } => "DIGEST",
        }
    }
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .field("password", &"[REDACTED]")
                .finish(),
            Self::Bearer { .. } => f.debug_struct("Bearer").field("token", &"[REDACTED]").finish(),
            Self::ApiKey {
                header_name,
                prefix,
                ..
            } => f
                .debug_struct("ApiKey")
                .field("key", &"[REDACTED]")
                .field("header_name", header_name)
                .field("prefix", prefix)
                .finish(),
            Self::OAuth2(config) => f.debug_tuple("OAuth2").field(config).finish(),
            Self::Digest { username, .. } => f
                .debug_struct("Digest")
                .field("username", username)
                .field("password", &"[REDACTED]")
                .finish(),
        }
    }
}

/// Outcome of [`AuthHeaderBuilder::validate`](crate::AuthHeaderBuilder::validate).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<String>,
}

impl ValidationReport {
    pub(crate) fn from_errors(errors: Vec<String>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
        }
    }
}

fn require(errors: &mut Vec<String>, variant: &str, field: &str, value: &str) {
    if value.trim().is_empty() {
        errors.push(format!("{variant} auth requires `{field}`"));
    }
}

pub(crate) fn validate(config: &AuthConfig) -> ValidationReport {
    let mut errors = Vec::new();
    match config {
        AuthConfig::None => {}
        AuthConfig::Basic { username, password } | AuthConfig::Digest { username, password } => {
            let variant = config.type_name();
            require(&mut errors, variant, "username", username);
            require(&mut errors, variant, "password", password);
        }
        AuthConfig::Bearer { token } => require(&mut errors, "BEARER", "token", token),
        AuthConfig::ApiKey {
            key, header_name, ..
        } => {
            require(&mut errors, "API_KEY", "key", key);
            require(&mut errors, "API_KEY", "headerName", header_name);
        }
        AuthConfig::OAuth2(oauth) => {
            require(&mut errors, "OAUTH2", "clientId", &oauth.client_id);
            require(&mut errors, "OAUTH2", "clientSecret", &oauth.client_secret);
            require(&mut errors, "OAUTH2", "tokenUrl", &oauth.token_url);
            if !oauth.token_url.trim().is_empty() {
                match url::Url::parse(&oauth.token_url) {
                    Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => {}
                    Ok(parsed) => errors.push(format!(
                        "OAUTH2 tokenUrl must use http or https, got `{}`",
                        parsed.scheme()
                    )),
                    Err(e) => errors.push(format!("OAUTH2 tokenUrl is not a valid URL: {e}")),
                }
            }
            if oauth.grant_type == GrantType::Password {
                require(
                    &mut errors,
                    "OAUTH2",
                    "username",
                    oauth.username.as_deref().unwrap_or_default(),
                );
                require(
                    &mut errors,
                    "OAUTH2",
                    "password",
                    oauth.password.as_deref().unwrap_or_default(),
                );
            }
        }
    }
    ValidationReport::from_errors(errors)
}
