//! Credential storage contract and the in-memory backend
//!
//! Every conditional write (`compare_and_swap_refresh`,
//! `complete_password_reset`) is atomic with respect to concurrent writers
//! on the same principal.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{normalize_identifier, CoreError, NewPrincipal, Principal, ResetTicket, Result};

/// Persistence operations needed by the session service
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Look up a principal whose username or email equals the normalized identifier
    async fn find_by_username_or_email(&self, identifier: &str) -> Result<Option<Principal>>;

    async fn find_by_email(&self, email: &str) -> Result<Option<Principal>>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Principal>>;

    /// Insert a principal; `Conflict` if the username or email is taken
    async fn create(&self, principal: NewPrincipal) -> Result<Principal>;

    async fn update_password_hash(&self, id: Uuid, password_hash: &str) -> Result<()>;

    /// Unconditionally overwrite the refresh slot
    async fn update_refresh_slot(&self, id: Uuid, token: Option<&str>) -> Result<()>;

    /// Replace the refresh slot only if it currently holds `expected`
    ///
    /// Returns `false` when the slot held something else, in which case
    /// nothing was written.
    async fn compare_and_swap_refresh(
        &self,
        id: Uuid,
        expected: Option<&str>,
        new: Option<&str>,
    ) -> Result<bool>;

    /// Set or clear the outstanding reset ticket
    async fn update_reset_token(&self, id: Uuid, ticket: Option<&ResetTicket>) -> Result<()>;

    /// Find the principal holding a live ticket with this digest
    async fn find_by_reset_token(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Principal>>;

    /// Store the new password hash and clear the ticket, if the ticket still matches
    async fn complete_password_reset(
        &self,
        id: Uuid,
        token_hash: &str,
        password_hash: &str,
    ) -> Result<bool>;

    /// Clear every ticket that expired at or before `now`; returns how many were cleared
    async fn purge_expired_reset_tokens(&self, now: DateTime<Utc>) -> Result<u64>;
}

/// Process-local store backed by a hash map
///
/// Used by tests and when no database URL is configured.
#[derive(Default)]
pub struct InMemoryCredentialStore {
    principals: RwLock<HashMap<Uuid, Principal>>,
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored principals
    pub async fn len(&self) -> usize {
        self.principals.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.principals.read().await.is_empty()
    }
}

fn not_found(id: Uuid) -> CoreError {
    CoreError::NotFound(format!("principal {id}"))
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn find_by_username_or_email(&self, identifier: &str) -> Result<Option<Principal>> {
        let identifier = normalize_identifier(identifier);
        let principals = self.principals.read().await;
        Ok(principals
            .values()
            .find(|p| p.username == identifier || p.email == identifier)
            .cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Principal>> {
        let email = normalize_identifier(email);
        let principals = self.principals.read().await;
        Ok(principals.values().find(|p| p.email == email).cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Principal>> {
        Ok(self.principals.read().await.get(&id).cloned())
    }

    async fn create(&self, principal: NewPrincipal) -> Result<Principal> {
        let principal = principal.into_principal();
        let mut principals = self.principals.write().await;

        if principals
            .values()
            .any(|p| p.username == principal.username || p.email == principal.email)
        {
            return Err(CoreError::Conflict(
                "username or email already exists".to_string(),
            ));
        }

        principals.insert(principal.id, principal.clone());
        Ok(principal)
    }

    async fn update_password_hash(&self, id: Uuid, password_hash: &str) -> Result<()> {
        let mut principals = self.principals.write().await;
        let principal = principals.get_mut(&id).ok_or_else(|| not_found(id))?;
        principal.password_hash = password_hash.to_string();
        principal.updated_at = Utc::now();
        Ok(())
    }

    async fn update_refresh_slot(&self, id: Uuid, token: Option<&str>) -> Result<()> {
        let mut principals = self.principals.write().await;
        let principal = principals.get_mut(&id).ok_or_else(|| not_found(id))?;
        principal.refresh_token = token.map(str::to_string);
        principal.updated_at = Utc::now();
        Ok(())
    }

    async fn compare_and_swap_refresh(
        &self,
        id: Uuid,
        expected: Option<&str>,
        new: Option<&str>,
    ) -> Result<bool> {
        let mut principals = self.principals.write().await;
        let principal = principals.get_mut(&id).ok_or_else(|| not_found(id))?;

        if principal.refresh_token.as_deref() != expected {
            return Ok(false);
        }

        principal.refresh_token = new.map(str::to_string);
        principal.updated_at = Utc::now();
        Ok(true)
    }

    async fn update_reset_token(&self, id: Uuid, ticket: Option<&ResetTicket>) -> Result<()> {
        let mut principals = self.principals.write().await;
        let principal = principals.get_mut(&id).ok_or_else(|| not_found(id))?;
        principal.reset_ticket = ticket.cloned();
        principal.updated_at = Utc::now();
        Ok(())
    }

    async fn find_by_reset_token(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Principal>> {
        let principals = self.principals.read().await;
        Ok(principals
            .values()
            .find(|p| {
                p.reset_ticket
                    .as_ref()
                    .is_some_and(|t| t.token_hash == token_hash && t.is_live(now))
            })
            .cloned())
    }

    async fn complete_password_reset(
        &self,
        id: Uuid,
        token_hash: &str,
        password_hash: &str,
    ) -> Result<bool> {
        let mut principals = self.principals.write().await;
        let principal = principals.get_mut(&id).ok_or_else(|| not_found(id))?;

        let matches = principal
            .reset_ticket
            .as_ref()
            .is_some_and(|t| t.token_hash == token_hash);
        if !matches {
            return Ok(false);
        }

        principal.password_hash = password_hash.to_string();
        principal.reset_ticket = None;
        principal.updated_at = Utc::now();
        Ok(true)
    }

    async fn purge_expired_reset_tokens(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut principals = self.principals.write().await;
        let mut purged = 0;
        for principal in principals.values_mut() {
            if principal
                .reset_ticket
                .as_ref()
                .is_some_and(|t| !t.is_live(now))
            {
                principal.reset_ticket = None;
                purged += 1;
            }
        }
        Ok(purged)
    }
}
