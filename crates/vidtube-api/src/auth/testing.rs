//! Store wrapper for exercising deadlines and interleavings in unit tests

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Barrier;
use uuid::Uuid;
use vidtube_core::{
    CredentialStore, InMemoryCredentialStore, NewPrincipal, Principal, ResetTicket, Result,
};

/// Delegates to an in-memory store, optionally delaying lookups or holding
/// `find_by_id` callers at a barrier after they have read the record
#[derive(Clone, Default)]
pub(crate) struct ScriptedStore {
    pub(crate) inner: Arc<InMemoryCredentialStore>,
    lookup_delay: Option<Duration>,
    id_lookup_barrier: Option<Arc<Barrier>>,
}

impl ScriptedStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Every principal lookup sleeps for `delay` first
    pub(crate) fn stalled(delay: Duration) -> Self {
        Self {
            lookup_delay: Some(delay),
            ..Self::default()
        }
    }

    /// `find_by_id` returns only once `parties` callers have read the record
    pub(crate) fn with_id_lookup_barrier(mut self, parties: usize) -> Self {
        self.id_lookup_barrier = Some(Arc::new(Barrier::new(parties)));
        self
    }

    async fn delay(&self) {
        if let Some(delay) = self.lookup_delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl CredentialStore for ScriptedStore {
    async fn find_by_username_or_email(&self, identifier: &str) -> Result<Option<Principal>> {
        self.delay().await;
        self.inner.find_by_username_or_email(identifier).await
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Principal>> {
        self.delay().await;
        self.inner.find_by_email(email).await
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Principal>> {
        self.delay().await;
        let found = self.inner.find_by_id(id).await;
        if let Some(barrier) = &self.id_lookup_barrier {
            barrier.wait().await;
        }
        found
    }

    async fn create(&self, principal: NewPrincipal) -> Result<Principal> {
        self.inner.create(principal).await
    }

    async fn update_password_hash(&self, id: Uuid, password_hash: &str) -> Result<()> {
        self.inner.update_password_hash(id, password_hash).await
    }

    async fn update_refresh_slot(&self, id: Uuid, token: Option<&str>) -> Result<()> {
        self.inner.update_refresh_slot(id, token).await
    }

    async fn compare_and_swap_refresh(
        &self,
        id: Uuid,
        expected: Option<&str>,
        new: Option<&str>,
    ) -> Result<bool> {
        self.inner.compare_and_swap_refresh(id, expected, new).await
    }

    async fn update_reset_token(&self, id: Uuid, ticket: Option<&ResetTicket>) -> Result<()> {
        self.inner.update_reset_token(id, ticket).await
    }

    async fn find_by_reset_token(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Principal>> {
        self.inner.find_by_reset_token(token_hash, now).await
    }

    async fn complete_password_reset(
        &self,
        id: Uuid,
        token_hash: &str,
        password_hash: &str,
    ) -> Result<bool> {
        self.inner
            .complete_password_reset(id, token_hash, password_hash)
            .await
    }

    async fn purge_expired_reset_tokens(&self, now: DateTime<Utc>) -> Result<u64> {
        self.inner.purge_expired_reset_tokens(now).await
    }
}
