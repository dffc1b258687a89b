use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;

use crate::config::OAuth2Config;

/// Tokens expiring within this many seconds are refreshed instead of reused.
pub const REFRESH_MARGIN_SECS: i64 = 300;

/// An OAuth2 access token and its absolute expiry.
#[derive(Clone, PartialEq, Eq)]
pub struct OAuthToken {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
}

impl OAuthToken {
    pub fn new(access_token: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            access_token: access_token.into(),
            expires_at,
        }
    }

    /// Whether the token is still good for more than
    /// [`REFRESH_MARGIN_SECS`].
    pub fn is_fresh_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at - now > Duration::seconds(REFRESH_MARGIN_SECS)
    }
}

impl std::fmt::Debug for OAuthToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthToken")
            .field("access_token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Stable identity of an OAuth2 client.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TokenKey {
    pub token_url: String,
    pub client_id: String,
    pub scope: Option<String>,
}

impl From<&OAuth2Config> for TokenKey {
    fn from(config: &OAuth2Config) -> Self {
        Self {
            token_url: config.token_url.clone(),
            client_id: config.client_id.clone(),
            scope: config.scope.clone(),
        }
    }
}

/// Process-wide OAuth2 token cache shared by every dispatch.
///
/// Concurrent refreshes for the same client may race; the last writer wins
/// and both tokens are valid.
#[derive(Debug, Default)]
pub struct TokenCache {
    tokens: DashMap<TokenKey, OAuthToken>,
}

impl TokenCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// A cached token for `key` that is still fresh at `now`.
    pub fn get_fresh(&self, key: &TokenKey, now: DateTime<Utc>) -> Option<OAuthToken> {
        self.tokens
            .get(key)
            .filter(|entry| entry.is_fresh_at(now))
            .map(|entry| entry.value().clone())
    }

    pub fn insert(&self, key: TokenKey, token: OAuthToken) {
        self.tokens.insert(key, token);
    }

    pub fn remove(&self, key: &TokenKey) -> Option<OAuthToken> {
        self.tokens.remove(key).map(|(_, token)| token)
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}
