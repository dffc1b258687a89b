use std::collections::HashMap;
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64;
use chrono::{Duration, Utc};
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};

use crate::cache::{OAuthToken, TokenCache, TokenKey};
use crate::config::{self, AuthConfig, GrantType, OAuth2Config, ValidationReport};
use crate::error::AuthError;
use crate::mask;

/// Lifetime assumed when the token endpoint omits `expires_in`.
const DEFAULT_TOKEN_LIFETIME_SECS: u64 = 3600;
/// Upper bound on `expires_in` to keep expiry arithmetic in range.
const MAX_TOKEN_LIFETIME_SECS: u64 = 10 * 365 * 24 * 3600;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

/// Headers produced for one request, plus the OAuth2 token when one was
/// freshly fetched so the caller may persist it.
#[derive(Debug, Clone, Default)]
pub struct GeneratedAuth {
    pub headers: HashMap<String, String>,
    pub refreshed_token: Option<OAuthToken>,
}

/// Produces authorization headers from an [`AuthConfig`].
///
/// Cheap to clone; clones share the HTTP client and the OAuth2 token cache.
#[derive(Debug, Clone, Default)]
pub struct AuthHeaderBuilder {
    client: Client,
    cache: Arc<TokenCache>,
}

impl AuthHeaderBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a specific HTTP client for token requests.
    #[must_use]
    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    /// Share an existing token cache.
    #[must_use]
    pub fn with_cache(mut self, cache: Arc<TokenCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn cache(&self) -> &Arc<TokenCache> {
        &self.cache
    }

    /// Check that every field the variant needs is present.
    pub fn validate(&self, config: &AuthConfig) -> ValidationReport {
        config::validate(config)
    }

    /// Copy of `config` safe to display.
    pub fn mask_config(&self, config: &AuthConfig) -> AuthConfig {
        mask::mask_config(config)
    }

    /// Build the header map for `config`.
    pub async fn generate_headers(
        &self,
        config: &AuthConfig,
    ) -> Result<HashMap<String, String>, AuthError> {
        Ok(self.generate_with_token(config).await?.headers)
    }

    /// Build the header map and report any newly fetched OAuth2 token.
    #[instrument(skip(self, config), fields(auth_type = config.type_name()))]
    pub async fn generate_with_token(&self, config: &AuthConfig) -> Result<GeneratedAuth, AuthError> {
        let report = self.validate(config);
        if !report.valid {
            return Err(AuthError::Invalid(report.errors));
        }

        let mut generated = GeneratedAuth::default();
        let headers = &mut generated.headers;
        match config {
            AuthConfig::None => {}
            AuthConfig::Basic { username, password } => {
                let encoded = B64.encode(format!("{username}:{password}"));
                headers.insert("Authorization".into(), format!("Basic {encoded}"));
            }
            AuthConfig::Bearer { token } => {
                headers.insert("Authorization".into(), format!("Bearer {token}"));
            }
            AuthConfig::ApiKey {
                key,
                header_name,
                prefix,
            } => {
                let value = match prefix.as_deref().filter(|p| !p.is_empty()) {
                    Some(prefix) => format!("{prefix} {key}"),
                    None => key.clone(),
                };
                headers.insert(header_name.clone(), value);
            }
            AuthConfig::OAuth2(oauth) => {
                let (token, refreshed) = self.oauth2_token(oauth).await?;
                headers.insert(
                    "Authorization".into(),
                    format!("Bearer {}", token.access_token),
                );
                if refreshed {
                    generated.refreshed_token = Some(token);
                }
            }
            AuthConfig::Digest { username, .. } => {
                warn!("digest auth emits a marker header only; no challenge-response is performed");
                headers.insert(
                    "Authorization".into(),
                    format!("Digest username=\"{username}\""),
                );
            }
        }
        Ok(generated)
    }

    /// Drop any cached token for an OAuth2 config, forcing the next call to
    /// fetch a new one. No-op for other variants.
    pub fn invalidate(&self, config: &AuthConfig) {
        if let AuthConfig::OAuth2(oauth) = config
            && self.cache.remove(&TokenKey::from(oauth)).is_some()
        {
            debug!(client_id = %oauth.client_id, "invalidated cached OAuth2 token");
        }
    }

    async fn oauth2_token(&self, oauth: &OAuth2Config) -> Result<(OAuthToken, bool), AuthError> {
        let now = Utc::now();
        let key = TokenKey::from(oauth);

        if let Some(token) = self.cache.get_fresh(&key, now) {
            debug!(client_id = %oauth.client_id, "reusing cached OAuth2 token");
            return Ok((token, false));
        }

        if let (Some(access_token), Some(expires)) = (&oauth.access_token, oauth.token_expires) {
            let seeded = OAuthToken::new(access_token.clone(), expires);
            if seeded.is_fresh_at(now) {
                debug!(client_id = %oauth.client_id, "reusing caller-supplied OAuth2 token");
                return Ok((seeded, false));
            }
        }

        let token = self.fetch_token(oauth).await?;
        self.cache.insert(key, token.clone());
        Ok((token, true))
    }

    async fn fetch_token(&self, oauth: &OAuth2Config) -> Result<OAuthToken, AuthError> {
        let mut form: Vec<(&str, &str)> = vec![
            ("grant_type", oauth.grant_type.as_str()),
            ("client_id", &oauth.client_id),
            ("client_secret", &oauth.client_secret),
        ];
        if let Some(scope) = &oauth.scope {
            form.push(("scope", scope));
        }
        if oauth.grant_type == GrantType::Password {
            if let Some(username) = &oauth.username {
                form.push(("username", username));
            }
            if let Some(password) = &oauth.password {
                form.push(("password", password));
            }
        }

        debug!(token_url = %oauth.token_url, grant_type = oauth.grant_type.as_str(), "requesting OAuth2 token");

        let response = self
            .client
            .post(&oauth.token_url)
            .header(reqwest::header::ACCEPT, "application/json")
            .form(&form)
            .send()
            .await
            .map_err(|e| AuthError::TokenFetch(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AuthError::TokenFetch(e.to_string()))?;

        if !status.is_success() {
            return Err(AuthError::TokenFetch(format!(
                "token endpoint returned HTTP {}: {body}",
                status.as_u16()
            )));
        }

        let parsed: TokenResponse =
            serde_json::from_str(&body).map_err(|e| AuthError::TokenResponse(e.to_string()))?;

        let lifetime = parsed
            .expires_in
            .unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS)
            .min(MAX_TOKEN_LIFETIME_SECS);
        let lifetime = i64::try_from(lifetime).unwrap_or(i64::MAX);
        let expires_at = Utc::now() + Duration::seconds(lifetime);

        info!(client_id = %oauth.client_id, %expires_at, "obtained OAuth2 token");
        Ok(OAuthToken::new(parsed.access_token, expires_at))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A minimal mock HTTP server built on tokio that returns canned responses.
    struct MockTokenServer {
        listener: tokio::net::TcpListener,
        token_url: String,
    }

    impl MockTokenServer {
        async fn start() -> Self {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
                .await
                .expect("failed to bind mock server");
            let port = listener.local_addr().unwrap().port();
            let token_url = format!("http://127.0.0.1:{port}/oauth/token");
            Self {
                listener,
                token_url,
            }
        }

        /// Accept one connection, answer it, and return the raw request.
        async fn respond_once(self, status_code: u16, body: &str) -> String {
            use tokio::io::{AsyncReadExt, AsyncWriteExt};

            let body = body.to_owned();
            let (mut stream, _) = self.listener.accept().await.unwrap();

            let mut request = Vec::new();
            let mut buf = vec![0u8; 16384];
            loop {
                let n = stream.read(&mut buf).await.unwrap();
                request.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&request);
                if n == 0 || text.contains("grant_type=") {
                    break;
                }
            }

            let response = format!(
                "HTTP/1.1 {status_code} OK\r\n\
                 Content-Type: application/json\r\n\
                 Content-Length: {}\r\n\
                 Connection: close\r\n\
                 \r\n\
                 {body}",
                body.len()
            );
            stream.write_all(response.as_bytes()).await.unwrap();
            stream.shutdown().await.unwrap();

            String::from_utf8_lossy(&request).into_owned()
        }
    }

    #[tokio::test]
    async fn basic_header_is_deterministic() {
        let builder = AuthHeaderBuilder::new();
        let headers = builder
            .generate_headers(&AuthConfig::Basic {
                username: "a".into(),
                password: "b".into(),
            })
            .await
            .unwrap();
        assert_eq!(headers.len(), 1);
        assert_eq!(headers["Authorization"], "Basic YTpi");
    }

    #[tokio::test]
    async fn bearer_and_none() {
        let builder = AuthHeaderBuilder::new();
        let headers = builder
            .generate_headers(&AuthConfig::Bearer {
                token: "tok".into(),
            })
            .await
            .unwrap();
        assert_eq!(headers["Authorization"], "Bearer tok");

        let headers = builder.generate_headers(&AuthConfig::None).await.unwrap();
        assert!(headers.is_empty());
    }

    #[tokio::test]
    async fn api_key_with_and_without_prefix() {
        let builder = AuthHeaderBuilder::new();
        let headers = builder
            .generate_headers(&AuthConfig::ApiKey {
                key: "k-1".into(),
                header_name: "X-Token".into(),
                prefix: Some("Token".into()),
            })
            .await
            .unwrap();
        assert_eq!(headers["X-Token"], "Token k-1");

        let headers = builder
            .generate_headers(&AuthConfig::ApiKey {
                key: "k-1".into(),
                header_name: "X-Token".into(),
                prefix: None,
            })
            .await
            .unwrap();
        assert_eq!(headers["X-Token"], "k-1");
    }

    #[tokio::test]
    async fn digest_emits_marker_header() {
        let headers = AuthHeaderBuilder::new()
            .generate_headers(&AuthConfig::Digest {
                username: "alice".into(),
                password: "pw".into(),
            })
            .await
            .unwrap();
        assert_eq!(headers["Authorization"], "Digest username=\"alice\"");
    }

    #[tokio::test]
    async fn invalid_config_fails_before_io() {
        let err = AuthHeaderBuilder::new()
            .generate_headers(&AuthConfig::Bearer {
                token: String::new(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Invalid(_)));
    }

    #[tokio::test]
    async fn oauth2_reuses_token_expiring_after_margin() {
        // Nothing listens on port 1: any HTTP call would fail.
        let config = AuthConfig::OAuth2(
            OAuth2Config::client_credentials("id", "secret", "http://127.0.0.1:1/token")
                .with_cached_token("cached-token", Utc::now() + Duration::minutes(6)),
        );
        let generated = AuthHeaderBuilder::new()
            .generate_with_token(&config)
            .await
            .unwrap();
        assert_eq!(generated.headers["Authorization"], "Bearer cached-token");
        assert!(generated.refreshed_token.is_none());
    }

    #[tokio::test]
    async fn oauth2_refreshes_token_inside_margin() {
        let server = MockTokenServer::start().await;
        let config = AuthConfig::OAuth2(
            OAuth2Config::client_credentials("id", "secret", &server.token_url)
                .with_scope("read")
                .with_cached_token("old-token", Utc::now() + Duration::minutes(1)),
        );

        let handle = tokio::spawn(async move {
            server
                .respond_once(200, r#"{"access_token":"new-token","expires_in":3600}"#)
                .await
        });

        let builder = AuthHeaderBuilder::new();
        let generated = builder.generate_with_token(&config).await.unwrap();
        let request = handle.await.unwrap();

        assert!(request.starts_with("POST /oauth/token"));
        assert!(request.contains("grant_type=client_credentials"));
        assert!(request.contains("client_id=id"));
        assert!(request.contains("scope=read"));
        assert_eq!(generated.headers["Authorization"], "Bearer new-token");
        assert_eq!(
            generated.refreshed_token.as_ref().unwrap().access_token,
            "new-token"
        );

        // The server is gone; a second call must be served from the cache.
        let headers = builder.generate_headers(&config).await.unwrap();
        assert_eq!(headers["Authorization"], "Bearer new-token");

        builder.invalidate(&config);
        assert!(builder.cache().is_empty());
    }

    #[tokio::test]
    async fn oauth2_fetch_failure_is_wrapped() {
        let server = MockTokenServer::start().await;
        let config = AuthConfig::OAuth2(OAuth2Config::client_credentials(
            "id",
            "secret",
            &server.token_url,
        ));
        let handle = tokio::spawn(async move {
            server
                .respond_once(401, r#"{"error":"invalid_client"}"#)
                .await
        });

        let err = AuthHeaderBuilder::new()
            .generate_headers(&config)
            .await
            .unwrap_err();
        handle.await.unwrap();

        assert!(matches!(err, AuthError::TokenFetch(ref msg) if msg.contains("401")));
        assert!(!err.is_retryable());
    }
}
