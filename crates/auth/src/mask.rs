use crate::config::AuthConfig;

/// Redact a secret, keeping a short tail for diagnostics.
///
/// Between 2 and 8 trailing characters survive (a quarter of the length).
/// Values of 2 characters or fewer have no hidden part left and are fully
/// masked.
pub fn mask_secret(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    let len = chars.len();
    if len <= 2 {
        return "****".to_owned();
    }
    let keep = (len / 4).clamp(2, 8);
    let tail: String = chars[len - keep..].iter().collect();
    format!("{}{tail}", "*".repeat(len - keep))
}

/// Copy of `config` with every secret passed through [`mask_secret`].
pub fn mask_config(config: &AuthConfig) -> AuthConfig {
    match config {
        AuthConfig::None => AuthConfig::None,
        AuthConfig::Basic { username, password } => AuthConfig::Basic {
            username: username.clone(),
            password: mask_secret(password),
        },
        AuthConfig::Digest { username, password } => AuthConfig::Digest {
            username: username.clone(),
            password: mask_secret(password),
        },
        AuthConfig::Bearer { token } => AuthConfig::Bearer {
            token: mask_secret(token),
        },
        AuthConfig::ApiKey {
            key,
            header_name,
            prefix,
        } => AuthConfig::ApiKey {
            key: mask_secret(key),
            header_name: header_name.clone(),
            prefix: prefix.clone(),
        },
        AuthConfig::OAuth2(oauth) => {
            let mut masked = oauth.clone();
            masked.client_secret = mask_secret(&oauth.client_secret);
            masked.password = oauth.password.as_deref().map(mask_secret);
            masked.access_token = oauth.access_token.as_deref().map(mask_secret);
            AuthConfig::OAuth2(masked)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OAuth2Config;

    #[test]
    fn mask_secret_keeps_short_tail() {
        assert_eq!(mask_secret("abcdef"), "****ef");
        assert_eq!(mask_secret("0123456789abcdef"), "************cdef");
        let long = "x".repeat(60) + "12345678";
        let masked = mask_secret(&long);
        assert!(masked.ends_with("12345678"));
        assert_eq!(masked.matches('*').count(), 60);
    }

    #[test]
    fn short_secrets_keep_two_characters() {
        assert_eq!(mask_secret("abc"), "*bc");
        assert_eq!(mask_secret("abcd"), "**cd");
        assert_eq!(mask_secret("ab"), "****");
        assert_eq!(mask_secret(""), "****");
    }

    #[test]
    fn mask_config_only_touches_secrets() {
        let masked = mask_config(&AuthConfig::OAuth2(OAuth2Config::client_credentials(
            "client-id",
            "client-secret-value",
            "https://idp/token",
        )));
        let AuthConfig::OAuth2(oauth) = masked else {
            panic!("expected OAuth2");
        };
        assert_eq!(oauth.client_id, "client-id");
        assert_eq!(oauth.token_url, "https://idp/token");
        assert!(oauth.client_secret.ends_with("alue"));
        assert!(oauth.client_secret.starts_with("***"));
    }
}
