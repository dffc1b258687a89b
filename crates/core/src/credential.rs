use serde::{Deserialize, Serialize};

/// An encrypted secret attached to a delivery channel.
///
/// `secret` is always the vault envelope; plaintext only exists transiently
/// while the executor builds a request.
#[derive(Clone, Serialize, Deserialize)]
pub struct ServiceCredential {
    /// Encrypted envelope produced by the secret vault.
    pub secret: String,
    /// Non-secret metadata (header name, prefix, sender address, ...).
    #[serde(default)]
    pub meta: serde_json::Map<String, serde_json::Value>,
}

impl ServiceCredential {
    #[must_use]
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            meta: serde_json::Map::new(),
        }
    }

    /// Add a metadata entry.
    #[must_use]
    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.meta.insert(key.into(), value.into());
        self
    }

    /// Read a string metadata entry.
    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.meta.get(key).and_then(serde_json::Value::as_str)
    }
}

impl std::fmt::Debug for ServiceCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceCredential")
            .field("secret", &"[REDACTED]")
            .field("meta", &self.meta)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_redacts_secret() {
        let credential = ServiceCredential::new("ciphertext-placeholder").with_meta("header", "X-Key");
        let debug = format!("{credential:?}");
        assert!(debug.contains("[REDACTED]"));
        assert!(debug.contains("X-Key"));
        assert!(!debug.contains("ciphertext-placeholder"));
    }

    #[test]
    fn meta_str_reads_strings_only() {
        let credential = ServiceCredential::new("x")
            .with_meta("prefix", "Token")
            .with_meta("port", 25);
        assert_eq!(credential.meta_str("prefix"), Some("Token"));
        assert_eq!(credential.meta_str("port"), None);
        assert_eq!(credential.meta_str("missing"), None);
    }
}
