//! Token generation

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Bytes of entropy in a freshly generated token
const TOKEN_ENTROPY_BYTES: usize = 24;

/// Editor tunnel access token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn new(value: String) -> Self {
        Self(value)
    }

    /// Generate a random token with a device-scoped prefix
    /// (e.g. `ffde_dev1_<random>`)
    pub fn generate(device_id: &str) -> Self {
        let mut entropy = [0u8; TOKEN_ENTROPY_BYTES];
        OsRng.fill_bytes(&mut entropy);
        let encoded = URL_SAFE_NO_PAD.encode(entropy);
        Self(format!("ffde_{}_{}", device_id, encoded))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    /// SHA-256 fingerprint of the token value
    ///
    /// Verification compares fingerprints rather than the raw strings
    /// so the comparison cost does not depend on how long a prefix of
    /// the presented token happens to match.
    pub fn fingerprint(&self) -> [u8; 32] {
        Sha256::digest(self.0.as_bytes()).into()
    }
}

impl From<String> for AccessToken {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<AccessToken> for String {
    fn from(token: AccessToken) -> Self {
        token.0
    }
}

/// Token errors
#[derive(Debug, Error)]
pub enum TokenError {
    #[error("Invalid token format")]
    InvalidFormat,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokens_are_unique() {
        let a = AccessToken::generate("dev1");
        let b = AccessToken::generate("dev1");
        assert_ne!(a, b);
    }

    #[test]
    fn test_token_prefix() {
        let token = AccessToken::generate("dev1");
        assert!(token.as_str().starts_with("ffde_dev1_"));
    }

    #[test]
    fn test_fingerprint_matches_value() {
        let token = AccessToken::generate("dev1");
        let copy = AccessToken::new(token.as_str().to_string());
        assert_eq!(token.fingerprint(), copy.fingerprint());

        let other = AccessToken::generate("dev1");
        assert_ne!(token.fingerprint(), other.fingerprint());
    }

    #[test]
    fn test_token_conversion() {
        let raw = "ffde_dev1_abc".to_string();
        let token: AccessToken = raw.clone().into();
        assert_eq!(token.as_str(), raw);
        assert_eq!(token.into_string(), raw);
    }
}
