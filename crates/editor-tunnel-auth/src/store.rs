//! In-memory token store
//!
//! Holds the currently valid token per device. The store only
//! authorizes the subsequent connection handshake; it grants no
//! network access by itself.

use dashmap::DashMap;
use tracing::debug;

use crate::token::AccessToken;

/// Maps device id to the currently issued access token
#[derive(Default)]
pub struct TokenStore {
    tokens: DashMap<String, AccessToken>,
}

impl TokenStore {
    pub fn new() -> Self {
        Self {
            tokens: DashMap::new(),
        }
    }

    /// Issue a fresh token for a device, replacing any previous one
    pub fn issue(&self, device_id: &str) -> AccessToken {
        let token = AccessToken::generate(device_id);
        let replaced = self
            .tokens
            .insert(device_id.to_string(), token.clone())
            .is_some();
        debug!(device_id = %device_id, replaced, "Issued editor access token");
        token
    }

    /// Check a presented token against the currently issued one
    ///
    /// Returns false for unknown devices and for any token other than
    /// the most recently issued, including tokens from closed tunnels.
    pub fn verify(&self, device_id: &str, presented: &str) -> bool {
        let Some(current) = self.tokens.get(device_id) else {
            return false;
        };
        let presented = AccessToken::new(presented.to_string());
        current.fingerprint() == presented.fingerprint()
    }

    /// Invalidate the token for a device, if any
    pub fn revoke(&self, device_id: &str) {
        if self.tokens.remove(device_id).is_some() {
            debug!(device_id = %device_id, "Revoked editor access token");
        }
    }

    pub fn count(&self) -> usize {
        self.tokens.len()
    }
}
