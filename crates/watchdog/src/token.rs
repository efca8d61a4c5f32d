// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared access signature tokens derived from connection-string credentials.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::Engine;
use ring::hmac;

use crate::relay_config::Credential;

/// Default lifetime of locally signed tokens.
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(3600);

/// Issues tokens for one credential. Built fresh for every connection, so a
/// rotated key is only picked up through a rebuild.
#[derive(Clone)]
pub struct TokenProvider {
    credential: Credential,
    ttl: Duration,
}

impl TokenProvider {
    pub fn new(credential: Credential) -> Self {
        Self { credential, ttl: DEFAULT_TOKEN_TTL }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Token for `audience`, valid for the provider's TTL from now.
    pub fn token(&self, audience: &str) -> String {
        let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
        self.token_expiring_at(audience, (now + self.ttl).as_secs())
    }

    /// Token for `audience` expiring at `expiry` (epoch seconds).
    pub fn token_expiring_at(&self, audience: &str, expiry: u64) -> String {
        match &self.credential {
            Credential::Signature(token) => token.clone(),
            Credential::SharedKey { key_name, key } => {
                sign(key_name, key, audience, expiry)
            }
        }
    }
}

fn sign(key_name: &str, key: &str, audience: &str, expiry: u64) -> String {
    let resource = urlencoding::encode(&audience.to_lowercase()).into_owned();
    let to_sign = format!("{resource}\n{expiry}");
    let hmac_key = hmac::Key::new(hmac::HMAC_SHA256, key.as_bytes());
    let tag = hmac::sign(&hmac_key, to_sign.as_bytes());
    let signature = base64::engine::general_purpose::STANDARD.encode(tag.as_ref());
    format!(
        "SharedAccessSignature sr={resource}&sig={}&se={expiry}&skn={key_name}",
        urlencoding::encode(&signature)
    )
}

#[cfg(test)]
#[path = "token_tests.rs"]
mod tests;
