//! VidTube Core - Domain model, configuration and credential storage
//!
//! This crate defines the pieces shared by every VidTube service:
//! - The principal (user account) model and its public projection
//! - Common error types
//! - The `CredentialStore` contract with in-memory and PostgreSQL backends
//! - Configuration management

pub mod config;
pub mod postgres;
pub mod store;

pub use config::{
    AppConfig, AuthConfig, ConfigError, DatabaseConfig, HashingConfig, LoggingConfig, MailConfig,
    ServerConfig,
};
pub use postgres::PgCredentialStore;
pub use store::{CredentialStore, InMemoryCredentialStore};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;

// ============================================================================
// Error Types
// ============================================================================

/// Core error types for credential storage
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;

/// Canonical form of a username or email used for storage and lookup
pub fn normalize_identifier(identifier: &str) -> String {
    identifier.trim().to_lowercase()
}

// ============================================================================
// Principal
// ============================================================================

/// Outstanding password reset: digest of the emailed token and its deadline
///
/// The digest and the deadline only ever exist together, which is why they
/// travel as one value.
#[derive(Clone, PartialEq, Eq)]
pub struct ResetTicket {
    /// SHA-256 hex digest of the plaintext token
    pub token_hash: String,
    /// Instant after which the token is no longer accepted
    pub expires_at: DateTime<Utc>,
}

impl ResetTicket {
    /// Whether the ticket is still usable at `now`
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

impl fmt::Debug for ResetTicket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResetTicket")
            .field("token_hash", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Stored account record, secrets included
///
/// Never serialized. Use [`Principal::to_public`] for anything that leaves
/// the service.
#[derive(Clone)]
pub struct Principal {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub full_name: String,
    pub avatar: String,
    pub cover_image: Option<String>,
    pub password_hash: String,
    /// The single live refresh token, if any
    pub refresh_token: Option<String>,
    pub reset_ticket: Option<ResetTicket>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Principal {
    /// Strip every secret field
    pub fn to_public(&self) -> PublicPrincipal {
        PublicPrincipal {
            id: self.id,
            username: self.username.clone(),
            email: self.email.clone(),
            full_name: self.full_name.clone(),
            avatar: self.avatar.clone(),
            cover_image: self.cover_image.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

impl fmt::Debug for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Principal")
            .field("id", &self.id)
            .field("username", &self.username)
            .field("email", &self.email)
            .field("full_name", &self.full_name)
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("has_reset_ticket", &self.reset_ticket.is_some())
            .finish_non_exhaustive()
    }
}

/// Principal as returned to clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PublicPrincipal {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub full_name: String,
    pub avatar: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cover_image: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Data required to create a principal
///
/// `password_hash` must already be a PHC string; plaintext never reaches the store.
#[derive(Clone)]
pub struct NewPrincipal {
    pub username: String,
    pub email: String,
    pub full_name: String,
    pub avatar: String,
    pub cover_image: Option<String>,
    pub password_hash: String,
}

impl NewPrincipal {
    /// Build the stored record with normalized identifiers and fresh timestamps
    pub fn into_principal(self) -> Principal {
        let now = Utc::now();
        Principal {
            id: Uuid::new_v4(),
            username: normalize_identifier(&self.username),
            email: normalize_identifier(&self.email),
            full_name: self.full_name.trim().to_string(),
            avatar: self.avatar,
            cover_image: self.cover_image,
            password_hash: self.password_hash,
            refresh_token: None,
            reset_ticket: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> NewPrincipal {
        NewPrincipal {
            username: "  Alice ".to_string(),
            email: "Alice@Example.COM".to_string(),
            full_name: " Alice Liddell ".to_string(),
            avatar: "https://cdn.example.com/a.png".to_string(),
            cover_image: None,
            password_hash: "$argon2id$v=19$m=8,t=1,p=1$c2FsdA$aGFzaA".to_string(),
        }
    }

    #[test]
    fn test_identifiers_are_normalized() {
        let principal = sample().into_principal();
        assert_eq!(principal.username, "alice");
        assert_eq!(principal.email, "alice@example.com");
        assert_eq!(principal.full_name, "Alice Liddell");
        assert!(principal.refresh_token.is_none());
        assert!(principal.reset_ticket.is_none());
    }

    #[test]
    fn test_public_projection_has_no_secrets() {
        let mut principal = sample().into_principal();
        principal.refresh_token = Some("refresh-secret".to_string());
        principal.reset_ticket = Some(ResetTicket {
            token_hash: "digest-secret".to_string(),
            expires_at: Utc::now(),
        });

        let json = serde_json::to_string(&principal.to_public()).unwrap();
        assert!(json.contains("\"fullName\":\"Alice Liddell\""));
        assert!(!json.contains("argon2"));
        assert!(!json.contains("refresh-secret"));
        assert!(!json.contains("digest-secret"));
        assert!(!json.contains("coverImage"));
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let mut principal = sample().into_principal();
        principal.refresh_token = Some("refresh-secret".to_string());
        let rendered = format!("{principal:?}");
        assert!(!rendered.contains("refresh-secret"));
        assert!(!rendered.contains("argon2"));
        assert!(rendered.contains("has_refresh_token: true"));
    }

    #[test]
    fn test_reset_ticket_expiry_boundary() {
        let now = Utc::now();
        let ticket = ResetTicket {
            token_hash: "h".to_string(),
            expires_at: now,
        };
        assert!(!ticket.is_live(now));
        assert!(ticket.is_live(now - chrono::Duration::milliseconds(1)));
    }
}
