//! Credential resolution for provider adapters.
//!
//! Adapters never hold credentials; they resolve one through a
//! [`CredentialResolver`] at call time. The default resolver tries, in order:
//!
//! 1. the encrypted credential stored in the provider configuration,
//!    decrypted with the process-wide AES-256-GCM key, and
//! 2. the `{PROVIDER}_API_KEY` environment variable.
//!
//! A provider with neither fails with an authentication error before any
//! upstream is contacted. Stored blobs are hex-encoded `nonce || ciphertext`,
//! so rotating a credential is a configuration change, not a code change.

use crate::error::AdapterError;
use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use std::collections::HashMap;

const NONCE_LEN: usize = 12;

/// Resolves the API credential for a provider at call time.
pub trait CredentialResolver: Send + Sync {
    fn resolve(&self, provider: &str) -> Result<String, AdapterError>;
}

/// Resolver backed by encrypted configuration with environment fallback.
pub struct ConfigCredentialResolver {
    /// Hex-encoded `nonce || ciphertext` blobs by provider name
    encrypted: HashMap<String, String>,
    /// Process-wide decryption key; `None` disables encrypted reads
    secret_key: Option<[u8; 32]>,
}

impl ConfigCredentialResolver {
    pub fn new(encrypted: HashMap<String, String>, secret_key: Option<[u8; 32]>) -> Self {
        if secret_key.is_none() && !encrypted.is_empty() {
            tracing::warn!(
                "no provider secret key configured, {} encrypted credential(s) unusable",
                encrypted.len()
            );
        }
        Self {
            encrypted,
            secret_key,
        }
    }

    /// Resolver with no stored credentials; environment variables only.
    pub fn env_only() -> Self {
        Self {
            encrypted: HashMap::new(),
            secret_key: None,
        }
    }

    fn env_var_name(provider: &str) -> String {
        format!("{}_API_KEY", provider.to_uppercase().replace('-', "_"))
    }
}

impl CredentialResolver for ConfigCredentialResolver {
    fn resolve(&self, provider: &str) -> Result<String, AdapterError> {
        if let (Some(blob), Some(key)) = (self.encrypted.get(provider), &self.secret_key) {
            return decrypt_credential(blob, key);
        }

        let env_key = Self::env_var_name(provider);
        match std::env::var(&env_key) {
            Ok(value) if !value.is_empty() => Ok(value),
            _ => Err(AdapterError::Auth {
                message: format!("no credential for provider '{provider}' (set {env_key})"),
            }),
        }
    }
}

/// Fixed-credential resolver for tests and single-tenant embedding.
pub struct StaticCredentialResolver {
    credentials: HashMap<String, String>,
}

impl StaticCredentialResolver {
    pub fn new(credentials: HashMap<String, String>) -> Self {
        Self { credentials }
    }

    pub fn single(provider: impl Into<String>, credential: impl Into<String>) -> Self {
        Self {
            credentials: HashMap::from([(provider.into(), credential.into())]),
        }
    }
}

impl CredentialResolver for StaticCredentialResolver {
    fn resolve(&self, provider: &str) -> Result<String, AdapterError> {
        self.credentials
            .get(provider)
            .cloned()
            .ok_or_else(|| AdapterError::Auth {
                message: format!("no credential for provider '{provider}'"),
            })
    }
}

/// Parse a 64-hex-character process secret into an AES-256 key.
pub fn parse_secret_key(hex_key: &str) -> Result<[u8; 32], String> {
    let bytes = hex::decode(hex_key.trim()).map_err(|e| format!("secret key is not hex: {e}"))?;
    let key: [u8; 32] = bytes
        .try_into()
        .map_err(|_| "secret key must be exactly 32 bytes".to_string())?;
    Ok(key)
}

/// Decrypt a hex-encoded `nonce || ciphertext` credential blob.
pub fn decrypt_credential(blob_hex: &str, key: &[u8; 32]) -> Result<String, AdapterError> {
    let blob = hex::decode(blob_hex.trim()).map_err(|e| AdapterError::Auth {
        message: format!("credential blob is not hex: {e}"),
    })?;
    if blob.len() <= NONCE_LEN {
        return Err(AdapterError::Auth {
            message: "credential blob too short".to_string(),
        });
    }

    let (nonce_bytes, ciphertext) = blob.split_at(NONCE_LEN);
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| AdapterError::Auth {
        message: "invalid decryption key length".to_string(),
    })?;
    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
        .map_err(|_| AdapterError::Auth {
            message: "credential decryption failed, wrong key or corrupted blob".to_string(),
        })?;

    String::from_utf8(plaintext).map_err(|_| AdapterError::Auth {
        message: "decrypted credential is not valid UTF-8".to_string(),
    })
}

/// Encrypt a credential for storage. Returns hex `nonce || ciphertext`.
///
/// Used by operational tooling when seeding the provider table; the request
/// path only ever decrypts.
pub fn encrypt_credential(plaintext: &str, key: &[u8; 32]) -> Result<String, String> {
    use rand::RngCore;

    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);

    let cipher =
        Aes256Gcm::new_from_slice(key).map_err(|_| "invalid encryption key length".to_string())?;
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce_bytes), plaintext.as_bytes())
        .map_err(|_| "credential encryption failed".to_string())?;

    let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    blob.extend_from_slice(&nonce_bytes);
    blob.extend_from_slice(&ciphertext);
    Ok(hex::encode(blob))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> [u8; 32] {
        [7u8; 32]
    }

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let key = test_key();
        let blob = encrypt_credential("sk-test-credential", &key).unwrap();
        let plaintext = decrypt_credential(&blob, &key).unwrap();
        assert_eq!(plaintext, "sk-test-credential");
    }

    #[test]
    fn wrong_key_fails() {
        let blob = encrypt_credential("sk-secret", &test_key()).unwrap();
        let other_key = [9u8; 32];
        assert!(decrypt_credential(&blob, &other_key).is_err());
    }

    #[test]
    fn different_encryptions_differ() {
        let key = test_key();
        let a = encrypt_credential("same-credential", &key).unwrap();
        let b = encrypt_credential("same-credential", &key).unwrap();
        // Fresh nonce per encryption
        assert_ne!(a, b);
        assert_eq!(decrypt_credential(&a, &key).unwrap(), "same-credential");
        assert_eq!(decrypt_credential(&b, &key).unwrap(), "same-credential");
    }

    #[test]
    fn secret_key_must_be_32_hex_bytes() {
        assert!(parse_secret_key(&"ab".repeat(32)).is_ok());
        assert!(parse_secret_key("deadbeef").is_err());
        assert!(parse_secret_key("not hex at all").is_err());
    }

    #[test]
    fn encrypted_credential_wins_over_environment() {
        let key = test_key();
        let blob = encrypt_credential("from-config", &key).unwrap();
        let resolver = ConfigCredentialResolver::new(
            HashMap::from([("acme".to_string(), blob)]),
            Some(key),
        );
        assert_eq!(resolver.resolve("acme").unwrap(), "from-config");
    }

    #[test]
    fn env_fallback_applies_when_no_blob() {
        std::env::set_var("RESOLVER_TEST_UPSTREAM_API_KEY", "from-env");
        let resolver = ConfigCredentialResolver::env_only();
        assert_eq!(
            resolver.resolve("resolver-test-upstream").unwrap(),
            "from-env"
        );
        std::env::remove_var("RESOLVER_TEST_UPSTREAM_API_KEY");
    }

    #[test]
    fn missing_credential_is_auth_error() {
        let resolver = ConfigCredentialResolver::env_only();
        let err = resolver.resolve("nonexistent-upstream").unwrap_err();
        assert!(matches!(err, AdapterError::Auth { .. }));
    }
}
