//! Password reset delivery
//!
//! `HttpMailRelay` posts the message to an HTTP mail relay; `LogNotifier`
//! is used when no relay is configured and records only the recipient.

use async_trait::async_trait;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};
use vidtube_core::MailConfig;

pub const RESET_EMAIL_SUBJECT: &str = "Password Reset Request";

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Mail relay request failed: {0}")]
    Transport(String),

    #[error("Mail relay rejected message with status {0}")]
    Rejected(u16),

    #[error("Mail delivery disabled")]
    Disabled,
}

/// Out-of-band channel for reset links
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_password_reset(&self, to: &str, reset_url: &str) -> Result<(), NotifyError>;
}

/// Human wording for a link lifetime, in whole minutes where possible
fn describe_lifetime(lifetime: Duration) -> String {
    let secs = lifetime.as_secs();
    match (secs / 60, secs % 60) {
        (1, 0) => "1 minute".to_string(),
        (minutes, 0) if minutes > 0 => format!("{minutes} minutes"),
        _ if secs == 1 => "1 second".to_string(),
        _ => format!("{secs} seconds"),
    }
}

/// HTML body of the reset email
pub fn reset_email_html(reset_url: &str, link_lifetime: Duration) -> String {
    let lifetime = describe_lifetime(link_lifetime);
    format!(
        "<p>You requested a password reset for your VidTube account.</p>\
         <p>Click <a href=\"{reset_url}\">here</a> to choose a new password.</p>\
         <p>This link will expire in {lifetime}. If you did not request a reset, \
         you can ignore this email.</p>"
    )
}

#[derive(Debug, Serialize)]
struct RelayMessage<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    html: String,
}

/// Sends reset mail through an HTTP relay
pub struct HttpMailRelay {
    client: reqwest::Client,
    endpoint: String,
    sender: String,
    link_lifetime: Duration,
}

impl HttpMailRelay {
    /// `link_lifetime` is the reset token lifetime quoted in the email
    pub fn new(
        config: &MailConfig,
        endpoint: impl Into<String>,
        link_lifetime: Duration,
    ) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| NotifyError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
            sender: config.sender(),
            link_lifetime,
        })
    }
}

#[async_trait]
impl Notifier for HttpMailRelay {
    async fn send_password_reset(&self, to: &str, reset_url: &str) -> Result<(), NotifyError> {
        let message = RelayMessage {
            from: &self.sender,
            to,
            subject: RESET_EMAIL_SUBJECT,
            html: reset_email_html(reset_url, self.link_lifetime),
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&message)
            .send()
            .await
            .map_err(|e| NotifyError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            warn!(recipient = %to, status = status.as_u16(), "Mail relay rejected reset email");
            return Err(NotifyError::Rejected(status.as_u16()));
        }

        info!(recipient = %to, "Password reset email sent");
        Ok(())
    }
}

/// Development notifier: logs that a reset was requested, never the link
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send_password_reset(&self, to: &str, _reset_url: &str) -> Result<(), NotifyError> {
        info!(recipient = %to, "Password reset requested (no mail relay configured)");
        Ok(())
    }
}

/// A reset link captured by [`RecordingNotifier`]
#[derive(Debug, Clone)]
pub struct SentResetLink {
    pub to: String,
    pub reset_url: String,
}

impl SentResetLink {
    /// The `token` query parameter of the link
    pub fn token(&self) -> Option<&str> {
        self.reset_url
            .split_once("token=")
            .map(|(_, rest)| rest.split('&').next().unwrap_or(rest))
    }
}

/// In-memory outbox used by tests and local tooling
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<SentResetLink>>,
    failing: AtomicBool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent deliveries fail
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<SentResetLink> {
        self.sent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Most recent link sent to `to`
    pub fn last_for(&self, to: &str) -> Option<SentResetLink> {
        self.sent().into_iter().rev().find(|link| link.to == to)
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send_password_reset(&self, to: &str, reset_url: &str) -> Result<(), NotifyError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(NotifyError::Disabled);
        }

        self.sent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(SentResetLink {
                to: to.to_string(),
                reset_url: reset_url.to_string(),
            });
        Ok(())
    }
}
