//! One-time password reset tokens
//!
//! The plaintext token is only ever emailed; the store keeps its SHA-256
//! digest together with the expiry.

use chrono::{DateTime, Utc};
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use std::time::Duration;
use vidtube_core::ResetTicket;

const TOKEN_BYTES: usize = 32;

/// A freshly issued token and the ticket to persist for it
pub struct IssuedResetToken {
    /// Hex plaintext to embed in the reset link
    pub plaintext: String,
    pub ticket: ResetTicket,
}

#[derive(Debug, Clone)]
pub struct ResetTokenManager {
    ttl: chrono::Duration,
}

impl ResetTokenManager {
    pub fn new(ttl: Duration) -> Self {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::minutes(10));
        Self { ttl }
    }

    /// Generate a random token expiring `ttl` after `now`
    pub fn issue(&self, now: DateTime<Utc>) -> IssuedResetToken {
        let mut bytes = [0u8; TOKEN_BYTES];
        OsRng.fill_bytes(&mut bytes);
        let plaintext = to_hex(&bytes);

        IssuedResetToken {
            ticket: ResetTicket {
                token_hash: Self::digest(&plaintext),
                expires_at: now + self.ttl,
            },
            plaintext,
        }
    }

    /// SHA-256 hex digest of a plaintext token
    pub fn digest(token: &str) -> String {
        format!("{:x}", Sha256::digest(token.as_bytes()))
    }

    /// Check a presented plaintext against a stored ticket
    pub fn verify(token: &str, ticket: &ResetTicket, now: DateTime<Utc>) -> bool {
        let presented = Self::digest(token);
        constant_time_eq(presented.as_bytes(), ticket.token_hash.as_bytes()) && ticket.is_live(now)
    }
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Compare two byte strings without short-circuiting on the first difference
pub(crate) fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
