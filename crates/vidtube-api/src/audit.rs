//! Security audit logging for authentication events
//!
//! Provides structured audit logging for registrations, logins, token
//! refreshes, logouts, password changes and password resets.
//!
//! All audit events are logged at INFO level with the "audit" target,
//! making them easy to filter and route to security monitoring systems.
//! Events never carry passwords, hashes or token values.
//!
//! # Example
//!
//! ```ignore
//! use vidtube_api::audit::{AuditEvent, audit_log};
//!
//! audit_log(&AuditEvent::LoginSuccess {
//!     user_id: principal.id,
//!     ip_address: Some("192.168.1.1".to_string()),
//!     user_agent: Some("Mozilla/5.0...".to_string()),
//! });
//! ```
//!
//! Author: hephaex@gmail.com

use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

/// Security audit events for authentication and authorization
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum AuditEvent {
    RegistrationSuccess {
        user_id: Uuid,
        email: String,
        ip_address: Option<String>,
        user_agent: Option<String>,
    },

    RegistrationFailure {
        email: String,
        reason: String,
        ip_address: Option<String>,
        user_agent: Option<String>,
    },

    LoginSuccess {
        user_id: Uuid,
        ip_address: Option<String>,
        user_agent: Option<String>,
    },

    /// `identifier` is the username or email as submitted
    LoginFailure {
        identifier: String,
        reason: String,
        ip_address: Option<String>,
        user_agent: Option<String>,
    },

    TokenRefresh {
        user_id: Uuid,
        ip_address: Option<String>,
    },

    /// Refresh attempt with an invalid, stale or replayed token
    RefreshRejected {
        reason: String,
        ip_address: Option<String>,
    },

    Logout {
        user_id: Uuid,
        ip_address: Option<String>,
    },

    PasswordChange {
        user_id: Uuid,
        success: bool,
        ip_address: Option<String>,
    },

    PasswordResetRequested {
        email: String,
        delivered: bool,
        ip_address: Option<String>,
    },

    PasswordResetCompleted {
        user_id: Option<Uuid>,
        success: bool,
        ip_address: Option<String>,
    },

    /// Access token rejected by the authorization gate
    InvalidToken {
        reason: String,
        path: String,
        ip_address: Option<String>,
    },
}

impl AuditEvent {
    fn summary(&self) -> &'static str {
        match self {
            AuditEvent::RegistrationSuccess { .. } => "Registration successful",
            AuditEvent::RegistrationFailure { .. } => "Registration failed",
            AuditEvent::LoginSuccess { .. } => "Login successful",
            AuditEvent::LoginFailure { .. } => "Login failed",
            AuditEvent::TokenRefresh { .. } => "Token refresh",
            AuditEvent::RefreshRejected { .. } => "Token refresh rejected",
            AuditEvent::Logout { .. } => "User logout",
            AuditEvent::PasswordChange { .. } => "Password change",
            AuditEvent::PasswordResetRequested { .. } => "Password reset requested",
            AuditEvent::PasswordResetCompleted { .. } => "Password reset completed",
            AuditEvent::InvalidToken { .. } => "Invalid access token",
        }
    }
}

/// Log a security audit event with structured fields
///
/// The event is serialized to JSON for compatibility with log aggregators.
/// Example output:
///
/// ```json
/// {
///   "event_type": "login_success",
///   "user_id": "550e8400-e29b-41d4-a716-446655440000",
///   "ip_address": "192.168.1.1",
///   "user_agent": "Mozilla/5.0..."
/// }
/// ```
pub fn audit_log(event: &AuditEvent) {
    let event_json = serde_json::to_string(event)
        .unwrap_or_else(|e| format!("{{\"error\":\"Failed to serialize audit event: {e}\"}}"));

    info!(
        target: "audit",
        event = %event_json,
        "{}",
        event.summary()
    );
}

/// Extract client IP address from request headers
///
/// # Arguments
///
/// * `headers` - HTTP headers from the request
///
/// # Returns
///
/// Optional IP address string
pub fn extract_ip_address(headers: &axum::http::HeaderMap) -> Option<String> {
    // Take the first hop of X-Forwarded-For (client IP)
    if let Some(first_ip) = headers
        .get("x-forwarded-for")
        .and_then(|xff| xff.to_str().ok())
        .and_then(|xff| xff.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
    {
        return Some(first_ip.to_string());
    }

    headers
        .get("x-real-ip")
        .and_then(|ip| ip.to_str().ok())
        .map(|ip| ip.trim().to_string())
}

/// Extract user agent from request headers
pub fn extract_user_agent(headers: &axum::http::HeaderMap) -> Option<String> {
    headers
        .get(axum::http::header::USER_AGENT)
        .and_then(|ua| ua.to_str().ok())
        .map(|s| s.to_string())
}
