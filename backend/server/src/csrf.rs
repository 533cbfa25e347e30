//! # Anti-forgery Tokens
//!
//! Every form this server renders carries an HMAC signed timestamp in a hidden field.
//! POST handlers only act on a body whose token:
//! - has a valid signature under the server key
//! - is not older than the configured lifetime
//! - is not dated in the future beyond a small clock skew
//!
//! Tokens are stateless, so any replica sharing the key accepts them.
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use uuid::Uuid;

pub const TOKEN_FIELD: &str = "__RequestVerificationToken";

const CLOCK_SKEW_SECS: u64 = 60;

type HmacSha256 = Hmac<Sha256>;

#[derive(Clone)]
pub struct Csrf {
    key: Vec<u8>,
    ttl: Duration,
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

impl Csrf {
    pub fn new(key: impl AsRef<[u8]>, ttl: Duration) -> Self {
        Self {
            key: key.as_ref().to_vec(),
            ttl,
        }
    }

    /// Per-process key. Tokens do not survive a restart.
    pub fn random(ttl: Duration) -> Self {
        let mut key = Uuid::new_v4().as_bytes().to_vec();
        key.extend_from_slice(Uuid::new_v4().as_bytes());

        Self { key, ttl }
    }

    fn mac(&self, timestamp: u64) -> Option<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(&self.key).ok()?;
        mac.update(timestamp.to_string().as_bytes());
        Some(mac)
    }

    pub fn issue(&self) -> String {
        self.issue_at(now_secs())
    }

    fn issue_at(&self, timestamp: u64) -> String {
        let Some(mac) = self.mac(timestamp) else {
            return String::new();
        };

        let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
        format!("{timestamp}.{signature}")
    }

    pub fn verify(&self, token: &str) -> bool {
        self.verify_at(token, now_secs())
    }

    fn verify_at(&self, token: &str, now: u64) -> bool {
        let Some((timestamp, signature)) = token.trim().split_once('.') else {
            return false;
        };
        let Ok(timestamp) = timestamp.parse::<u64>() else {
            return false;
        };
        let Ok(signature) = URL_SAFE_NO_PAD.decode(signature) else {
            return false;
        };

        let Some(mac) = self.mac(timestamp) else {
            return false;
        };
        if mac.verify_slice(&signature).is_err() {
            return false;
        }

        timestamp <= now + CLOCK_SKEW_SECS && now.saturating_sub(timestamp) <= self.ttl.as_secs()
    }
}
