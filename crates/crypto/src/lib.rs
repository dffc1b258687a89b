//! Symmetric encryption of credential material at rest.
//!
//! Secrets are stored as `base64(iv(12) || tag(16) || ciphertext)` and
//! encrypted with AES-256-GCM under a single 32-byte master key supplied as
//! 64 hex characters out-of-band (usually an environment variable). A fresh
//! random IV is drawn for every call.
//!
//! Decrypted values are returned as [`SecretString`] to prevent accidental
//! logging. The [`MasterKey`] wrapper zeroizes key material on drop.

use std::fmt;

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64;
use thiserror::Error;
use tracing::warn;
use zeroize::{Zeroize, ZeroizeOnDrop};

// Re-export for consumers so they don't need a direct `secrecy` dependency.
pub use secrecy::{ExposeSecret, SecretString};

const IV_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// Environment variable read by [`SecretVault::from_default_env`].
pub const DEFAULT_KEY_ENV: &str = "ENCRYPTION_KEY";

/// A 32-byte AES-256 master key that is zeroized when dropped.
///
/// The [`Debug`] implementation is redacted to avoid accidental logging.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct MasterKey([u8; 32]);

impl MasterKey {
    pub(crate) fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MasterKey([REDACTED])")
    }
}

/// Errors that can occur during encryption/decryption operations.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// No usable master key was supplied to the vault.
    #[error("secret vault is not configured: {0}")]
    NotConfigured(String),

    /// The provided master key is not valid (wrong length or encoding).
    #[error("invalid master key: {0}")]
    InvalidKey(String),

    /// The encrypted value is not a well-formed envelope.
    #[error("invalid encrypted value: {0}")]
    InvalidFormat(String),

    /// The authentication tag did not verify: wrong key or tampered data.
    #[error("decryption failed (wrong key or corrupted data)")]
    IntegrityCheckFailed,

    /// Encryption failed.
    #[error("encryption failed: {0}")]
    EncryptionFailed(String),
}

/// Parse a 32-byte master key from 64 hex characters.
pub fn parse_master_key(raw: &str) -> Result<MasterKey, CryptoError> {
    let trimmed = raw.trim();
    let mut bytes = hex::decode(trimmed)
        .map_err(|e| CryptoError::InvalidKey(format!("not valid hex: {e}")))?;
    if bytes.len() != 32 {
        let len = bytes.len();
        bytes.zeroize();
        return Err(CryptoError::InvalidKey(format!(
            "must decode to exactly 32 bytes, got {len}"
        )));
    }
    let mut key = [0u8; 32];
    key.copy_from_slice(&bytes);
    bytes.zeroize();
    Ok(MasterKey(key))
}

/// Encrypts and decrypts service credentials with a single static key.
///
/// A vault built from a missing or malformed key still constructs; it
/// reports `false` from [`is_configured`](Self::is_configured) and fails at
/// the point of use with [`CryptoError::NotConfigured`].
#[derive(Clone)]
pub struct SecretVault {
    key: Result<MasterKey, String>,
}

impl SecretVault {
    /// Build a vault from an already-parsed key.
    pub fn new(key: MasterKey) -> Self {
        Self { key: Ok(key) }
    }

    /// Build a vault from a hex-encoded key. Invalid keys yield an
    /// unconfigured vault.
    pub fn from_hex(raw: &str) -> Self {
        Self {
            key: parse_master_key(raw).map_err(|e| e.to_string()),
        }
    }

    /// Build a vault from the named environment variable.
    pub fn from_env(var: &str) -> Self {
        match std::env::var(var) {
            Ok(raw) => {
                let vault = Self::from_hex(&raw);
                if let Err(reason) = &vault.key {
                    warn!(env = var, %reason, "master key is present but unusable");
                }
                vault
            }
            Err(_) => Self {
                key: Err(format!("environment variable {var} is not set")),
            },
        }
    }

    /// Build a vault from [`DEFAULT_KEY_ENV`].
    pub fn from_default_env() -> Self {
        Self::from_env(DEFAULT_KEY_ENV)
    }

    /// Whether the master key decoded to exactly 32 bytes.
    pub fn is_configured(&self) -> bool {
        self.key.is_ok()
    }

    /// Why the vault is unusable, if it is.
    pub fn configuration_error(&self) -> Option<&str> {
        self.key.as_ref().err().map(String::as_str)
    }

    fn cipher(&self) -> Result<Aes256Gcm, CryptoError> {
        let key = self
            .key
            .as_ref()
            .map_err(|reason| CryptoError::NotConfigured(reason.clone()))?;
        Aes256Gcm::new_from_slice(key.as_bytes())
            .map_err(|e| CryptoError::InvalidKey(format!("invalid AES key: {e}")))
    }

    /// Encrypt `plaintext` into a `base64(iv || tag || ciphertext)` envelope.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, CryptoError> {
        let cipher = self.cipher()?;
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

        let sealed = cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

        // AES-GCM output = ciphertext || 16-byte tag
        let (data, tag) = sealed.split_at(sealed.len() - TAG_LEN);

        let mut envelope = Vec::with_capacity(IV_LEN + TAG_LEN + data.len());
        envelope.extend_from_slice(nonce.as_slice());
        envelope.extend_from_slice(tag);
        envelope.extend_from_slice(data);
        Ok(B64.encode(envelope))
    }

    /// Decrypt an envelope produced by [`encrypt`](Self::encrypt).
    ///
    /// Fails with [`CryptoError::IntegrityCheckFailed`] when the tag does not
    /// verify.
    pub fn decrypt(&self, envelope: &str) -> Result<SecretString, CryptoError> {
        let cipher = self.cipher()?;
        let raw = B64
            .decode(envelope.trim())
            .map_err(|e| CryptoError::InvalidFormat(format!("invalid base64: {e}")))?;

        if raw.len() < IV_LEN + TAG_LEN {
            return Err(CryptoError::InvalidFormat(format!(
                "envelope must be at least {} bytes, got {}",
                IV_LEN + TAG_LEN,
                raw.len()
            )));
        }

        let (iv, rest) = raw.split_at(IV_LEN);
        let (tag, data) = rest.split_at(TAG_LEN);

        let mut sealed = Vec::with_capacity(data.len() + TAG_LEN);
        sealed.extend_from_slice(data);
        sealed.extend_from_slice(tag);

        let plaintext = cipher
            .decrypt(Nonce::from_slice(iv), sealed.as_ref())
            .map_err(|_| CryptoError::IntegrityCheckFailed)?;

        let s = String::from_utf8(plaintext)
            .map_err(|e| CryptoError::InvalidFormat(format!("decrypted value is not UTF-8: {e}")))?;

        Ok(SecretString::new(s))
    }
}

impl fmt::Debug for SecretVault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretVault")
            .field("configured", &self.is_configured())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_vault() -> SecretVault {
        SecretVault::from_hex(&"42".repeat(32))
    }

    #[test]
    fn roundtrip_encrypt_decrypt() {
        let vault = test_vault();
        for plaintext in ["my-secret-value", "", "ünïcødé ✓", &"x".repeat(4096)] {
            let encrypted = vault.encrypt(plaintext).unwrap();
            let decrypted = vault.decrypt(&encrypted).unwrap();
            assert_eq!(decrypted.expose_secret(), plaintext);
        }
    }

    #[test]
    fn envelope_layout_is_iv_tag_ciphertext() {
        let vault = test_vault();
        let encrypted = vault.encrypt("abc").unwrap();
        let raw = B64.decode(&encrypted).unwrap();
        assert_eq!(raw.len(), IV_LEN + TAG_LEN + 3);
    }

    #[test]
    fn fresh_iv_per_call() {
        let vault = test_vault();
        let a = vault.encrypt("same").unwrap();
        let b = vault.encrypt("same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn tampered_tag_fails_integrity_check() {
        let vault = test_vault();
        let encrypted = vault.encrypt("payload").unwrap();
        let mut raw = B64.decode(&encrypted).unwrap();
        raw[IV_LEN] ^= 0x01;
        let tampered = B64.encode(raw);
        let err = vault.decrypt(&tampered).unwrap_err();
        assert!(matches!(err, CryptoError::IntegrityCheckFailed));
    }

    #[test]
    fn wrong_key_fails_integrity_check() {
        let encrypted = test_vault().encrypt("payload").unwrap();
        let other = SecretVault::from_hex(&"ab".repeat(32));
        let err = other.decrypt(&encrypted).unwrap_err();
        assert!(matches!(err, CryptoError::IntegrityCheckFailed));
    }

    #[test]
    fn short_envelope_is_invalid_format() {
        let err = test_vault().decrypt(&B64.encode([0u8; 10])).unwrap_err();
        assert!(matches!(err, CryptoError::InvalidFormat(_)));
    }

    #[test]
    fn is_configured_requires_32_byte_hex_key() {
        assert!(test_vault().is_configured());
        assert!(!SecretVault::from_hex("too-short").is_configured());
        assert!(!SecretVault::from_hex(&"aa".repeat(16)).is_configured());
        assert!(!SecretVault::from_env("COURIER_TEST_UNSET_KEY_VAR").is_configured());
    }

    #[test]
    fn unconfigured_vault_fails_at_point_of_use() {
        let vault = SecretVault::from_hex("zz");
        let err = vault.encrypt("x").unwrap_err();
        assert!(matches!(err, CryptoError::NotConfigured(_)));
        assert!(vault.configuration_error().is_some());
    }

    #[test]
    fn parse_hex_key() {
        let key = parse_master_key(&"aa".repeat(32)).unwrap();
        assert_eq!(key.as_bytes(), &[0xaa; 32]);
    }

    #[test]
    fn master_key_debug_is_redacted() {
        let key = parse_master_key(&"42".repeat(32)).unwrap();
        let debug = format!("{key:?}");
        assert_eq!(debug, "MasterKey([REDACTED])");
        assert!(!format!("{:?}", test_vault()).contains("42"));
    }
}
