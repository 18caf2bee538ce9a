//! JWT token generation and validation
//!
//! Access and refresh tokens are HMAC-SHA256 signed with independent
//! secrets. Access tokens carry the principal's profile claims; refresh
//! tokens carry only the principal id plus a random `jti`.

use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;
use vidtube_core::{AuthConfig, Principal};

/// Claims embedded in an access token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessClaims {
    /// Principal id
    pub id: Uuid,
    pub username: String,
    pub email: String,
    #[serde(rename = "fullName")]
    pub full_name: String,
    /// Issued at timestamp (Unix epoch)
    pub iat: u64,
    /// Expiration timestamp (Unix epoch)
    pub exp: u64,
}

/// Claims embedded in a refresh token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshClaims {
    /// Principal id
    pub id: Uuid,
    /// Unique token identifier; keeps tokens minted in the same second distinct
    pub jti: String,
    pub iat: u64,
    pub exp: u64,
}

/// JWT token generation and validation errors
#[derive(Debug, Error)]
pub enum JwtError {
    #[error("Failed to encode JWT: {0}")]
    Encoding(String),

    #[error("Token is malformed")]
    Malformed,

    #[error("Token has expired")]
    Expired,

    #[error("Invalid token signature")]
    BadSignature,
}

#[derive(Clone)]
struct KeyPair {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

impl KeyPair {
    fn new(secret: &str, ttl: Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl,
        }
    }
}

/// Signs and verifies both token kinds
#[derive(Clone)]
pub struct TokenIssuer {
    access: KeyPair,
    refresh: KeyPair,
}

impl TokenIssuer {
    pub fn new(config: &AuthConfig) -> Self {
        Self {
            access: KeyPair::new(&config.access_token_secret, config.access_token_ttl()),
            refresh: KeyPair::new(&config.refresh_token_secret, config.refresh_token_ttl()),
        }
    }

    pub fn access_ttl(&self) -> Duration {
        self.access.ttl
    }

    pub fn refresh_ttl(&self) -> Duration {
        self.refresh.ttl
    }

    /// Generate an access token for a principal
    pub fn issue_access(&self, principal: &Principal) -> Result<String, JwtError> {
        let (iat, exp) = window(self.access.ttl);
        let claims = AccessClaims {
            id: principal.id,
            username: principal.username.clone(),
            email: principal.email.clone(),
            full_name: principal.full_name.clone(),
            iat,
            exp,
        };

        tracing::debug!(principal_id = %principal.id, "Signing access token");
        sign(&claims, &self.access.encoding)
    }

    /// Generate a refresh token for a principal id
    pub fn issue_refresh(&self, id: Uuid) -> Result<String, JwtError> {
        let (iat, exp) = window(self.refresh.ttl);
        let claims = RefreshClaims {
            id,
            jti: Uuid::new_v4().to_string(),
            iat,
            exp,
        };

        tracing::debug!(principal_id = %id, "Signing refresh token");
        sign(&claims, &self.refresh.encoding)
    }

    pub fn verify_access(&self, token: &str) -> Result<AccessClaims, JwtError> {
        verify(token, &self.access.decoding)
    }

    pub fn verify_refresh(&self, token: &str) -> Result<RefreshClaims, JwtError> {
        verify(token, &self.refresh.decoding)
    }
}

fn window(ttl: Duration) -> (u64, u64) {
    let now = u64::try_from(Utc::now().timestamp()).unwrap_or_default();
    (now, now.saturating_add(ttl.as_secs()))
}

fn sign<C: Serialize>(claims: &C, key: &EncodingKey) -> Result<String, JwtError> {
    encode(&Header::new(Algorithm::HS256), claims, key)
        .map_err(|e| JwtError::Encoding(e.to_string()))
}

fn verify<C: DeserializeOwned>(token: &str, key: &DecodingKey) -> Result<C, JwtError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.leeway = 0;

    decode::<C>(token, key, &validation)
        .map(|data| data.claims)
        .map_err(|e| match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => JwtError::Expired,
            jsonwebtoken::errors::ErrorKind::InvalidSignature => JwtError::BadSignature,
            _ => JwtError::Malformed,
        })
}
