//! Application state management
//!
//! Author: hephaex@gmail.com

use crate::auth::{CredentialHasher, HttpMailRelay, LogNotifier, Notifier, SessionService};
use anyhow::Context;
use std::sync::Arc;
use std::time::Instant;
use vidtube_core::{AppConfig, CredentialStore, InMemoryCredentialStore, PgCredentialStore};

/// Application state shared across handlers
pub struct AppState {
    /// Application configuration
    pub config: AppConfig,
    /// Server start time
    pub start_time: Instant,
    /// Credential and session operations
    pub sessions: SessionService,
}

impl AppState {
    /// Create application state from already constructed dependencies
    pub fn new(
        config: AppConfig,
        store: Arc<dyn CredentialStore>,
        notifier: Arc<dyn Notifier>,
    ) -> anyhow::Result<Self> {
        config.validate().context("invalid configuration")?;
        let hasher =
            Arc::new(CredentialHasher::new(&config.hashing).context("invalid hashing parameters")?);
        let sessions = SessionService::new(&config, store, hasher, notifier);

        Ok(Self {
            config,
            start_time: Instant::now(),
            sessions,
        })
    }

    /// Connect the configured store and notifier, then build the state
    ///
    /// Without `database.postgres_url` principals live in memory and are
    /// lost on restart; without `mail.relay_url` reset links are only logged.
    pub async fn from_config(config: AppConfig) -> anyhow::Result<Self> {
        let store: Arc<dyn CredentialStore> = match &config.database.postgres_url {
            Some(url) => {
                let store = PgCredentialStore::new(url, config.database.pool_size)
                    .await
                    .context("failed to connect to PostgreSQL")?;
                store.migrate().await.context("failed to run migrations")?;
                tracing::info!("Using PostgreSQL credential store");
                Arc::new(store)
            }
            None => {
                tracing::warn!("DATABASE_URL not set; using in-memory credential store");
                Arc::new(InMemoryCredentialStore::new())
            }
        };

        let notifier: Arc<dyn Notifier> = match &config.mail.relay_url {
            Some(url) => Arc::new(
                HttpMailRelay::new(&config.mail, url.clone(), config.auth.reset_token_ttl())
                    .context("failed to build mail relay client")?,
            ),
            None => {
                tracing::warn!("MAIL_RELAY_URL not set; password reset links will not be delivered");
                Arc::new(LogNotifier)
            }
        };

        Self::new(config, store, notifier)
    }

    /// Get uptime in seconds
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Whether session cookies carry the `Secure` attribute
    pub fn secure_cookies(&self) -> bool {
        self.config.auth.secure_cookies
    }
}
