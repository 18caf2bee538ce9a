//! Session service layer
//!
//! Registration, login, refresh-token rotation, logout, password change and
//! the forgot/reset password flow. Every store, hashing and delivery call
//! runs under the configured operation deadline.

use super::jwt::TokenIssuer;
use super::notifier::Notifier;
use super::password::CredentialHasher;
use super::reset::{constant_time_eq, ResetTokenManager};
use crate::error::AuthError;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::{Validate, ValidationErrors};
use vidtube_core::{
    normalize_identifier, AppConfig, CredentialStore, NewPrincipal, Principal, PublicPrincipal,
};

const STALE_REFRESH: &str = "Refresh token is expired or used";
const INVALID_RESET: &str = "Invalid or expired token";

/// User registration request
///
/// `avatar` is a reference to an already uploaded image.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    #[validate(length(min = 1, message = "Full name is required"))]
    pub full_name: String,

    #[validate(length(min = 1, message = "Username is required"))]
    pub username: String,

    #[validate(email(message = "A valid email is required"))]
    pub email: String,

    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,

    #[serde(default)]
    #[validate(length(min = 1, message = "Avatar file is required"))]
    pub avatar: String,

    #[serde(default)]
    pub cover_image: Option<String>,
}

impl RegisterRequest {
    /// Trim every field except the password
    fn normalized(self) -> Self {
        Self {
            full_name: self.full_name.trim().to_string(),
            username: self.username.trim().to_string(),
            email: self.email.trim().to_string(),
            password: self.password,
            avatar: self.avatar.trim().to_string(),
            cover_image: self
                .cover_image
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty()),
        }
    }
}

/// User login request; either identifier may be supplied
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LoginRequest {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    pub password: String,
}

impl LoginRequest {
    fn identifier(&self) -> Option<&str> {
        [self.username.as_deref(), self.email.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .find(|s| !s.is_empty())
    }
}

/// Token refresh request body (the cookie takes precedence)
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    #[serde(default)]
    pub refresh_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    pub old_password: String,
    #[validate(length(min = 1, message = "New password is required"))]
    pub new_password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct ForgotPasswordRequest {
    #[validate(length(min = 1, message = "Email is required"))]
    pub email: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct ResetPasswordRequest {
    #[validate(length(min = 1, message = "Reset token is required"))]
    pub token: String,
    #[validate(length(min = 1, message = "New password is required"))]
    pub password: String,
}

/// Access and refresh token pair
#[derive(Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

impl std::fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("TokenPair { .. }")
    }
}

/// Login response body
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub user: PublicPrincipal,
    pub access_token: String,
    pub refresh_token: String,
}

/// Principal and the tokens just issued to it
#[derive(Debug, Clone)]
pub struct Session {
    pub principal: PublicPrincipal,
    pub tokens: TokenPair,
}

/// Session service
#[derive(Clone)]
pub struct SessionService {
    store: Arc<dyn CredentialStore>,
    hasher: Arc<CredentialHasher>,
    tokens: TokenIssuer,
    resets: ResetTokenManager,
    notifier: Arc<dyn Notifier>,
    frontend_url: String,
    operation_timeout: Duration,
    revoke_sessions_on_password_change: bool,
    conceal_unknown_principal: bool,
}

fn first_message(errors: &ValidationErrors) -> String {
    errors
        .field_errors()
        .values()
        .flat_map(|errs| errs.iter())
        .find_map(|e| e.message.as_ref().map(|m| m.to_string()))
        .unwrap_or_else(|| "Invalid request".to_string())
}

impl SessionService {
    /// Create a new session service
    pub fn new(
        config: &AppConfig,
        store: Arc<dyn CredentialStore>,
        hasher: Arc<CredentialHasher>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            store,
            hasher,
            tokens: TokenIssuer::new(&config.auth),
            resets: ResetTokenManager::new(config.auth.reset_token_ttl()),
            notifier,
            frontend_url: config.mail.frontend_url.trim_end_matches('/').to_string(),
            operation_timeout: config.auth.operation_timeout(),
            revoke_sessions_on_password_change: config.auth.revoke_sessions_on_password_change,
            conceal_unknown_principal: config.auth.conceal_unknown_principal,
        }
    }

    pub fn tokens(&self) -> &TokenIssuer {
        &self.tokens
    }

    /// Run a dependency call under the operation deadline
    async fn within<T, E, F>(&self, operation: &'static str, call: F) -> Result<T, AuthError>
    where
        F: Future<Output = Result<T, E>>,
        E: Into<AuthError>,
    {
        match tokio::time::timeout(self.operation_timeout, call).await {
            Ok(result) => result.map_err(Into::into),
            Err(_) => {
                warn!(
                    operation,
                    timeout_ms = self.operation_timeout.as_millis() as u64,
                    "Credential operation timed out"
                );
                Err(AuthError::Unavailable(
                    "Service temporarily unavailable, please retry".to_string(),
                ))
            }
        }
    }

    fn issue_pair(&self, principal: &Principal) -> Result<TokenPair, AuthError> {
        Ok(TokenPair {
            access_token: self.tokens.issue_access(principal)?,
            refresh_token: self.tokens.issue_refresh(principal.id)?,
        })
    }

    /// Register a new principal
    ///
    /// # Arguments
    ///
    /// * `request` - Registration details
    ///
    /// # Returns
    ///
    /// * `Ok(PublicPrincipal)` - Newly created principal, secrets stripped
    /// * `Err(AuthError)` - `Validation` for missing fields, `Conflict` if the
    ///   username or email is taken
    pub async fn register(&self, request: RegisterRequest) -> Result<PublicPrincipal, AuthError> {
        let request = request.normalized();
        request
            .validate()
            .map_err(|e| AuthError::Validation(first_message(&e)))?;
        if request.password.trim().is_empty() {
            return Err(AuthError::validation("Password is required"));
        }

        for identifier in [&request.username, &request.email] {
            let existing = self
                .within(
                    "find principal",
                    self.store.find_by_username_or_email(identifier),
                )
                .await?;
            if existing.is_some() {
                return Err(AuthError::Conflict(
                    "User with email or username already exists".to_string(),
                ));
            }
        }

        let password_hash = self
            .within("hash password", self.hasher.hash(&request.password))
            .await?;

        let principal = self
            .within(
                "create principal",
                self.store.create(NewPrincipal {
                    username: request.username,
                    email: request.email,
                    full_name: request.full_name,
                    avatar: request.avatar,
                    cover_image: request.cover_image,
                    password_hash,
                }),
            )
            .await
            .map_err(|e| match e {
                AuthError::Conflict(_) => AuthError::Conflict(
                    "User with email or username already exists".to_string(),
                ),
                other => other,
            })?;

        info!(principal_id = %principal.id, "Principal registered");
        Ok(principal.to_public())
    }

    /// Authenticate with username or email and start a session
    ///
    /// Overwrites the refresh slot, so any previous session's refresh token
    /// stops working.
    pub async fn login(&self, request: LoginRequest) -> Result<Session, AuthError> {
        let identifier = request
            .identifier()
            .ok_or_else(|| AuthError::validation("Username or email is required"))?
            .to_string();

        let principal = self
            .within(
                "find principal",
                self.store.find_by_username_or_email(&identifier),
            )
            .await?;

        let principal = match principal {
            Some(principal) => principal,
            None => {
                // Same hashing cost as a wrong password
                let _ = tokio::time::timeout(
                    self.operation_timeout,
                    self.hasher.verify_dummy(&request.password),
                )
                .await;
                warn!("Login rejected: unknown identifier");
                return Err(if self.conceal_unknown_principal {
                    AuthError::unauthenticated("Invalid user credentials")
                } else {
                    AuthError::NotFound("User does not exist".to_string())
                });
            }
        };

        let valid = self
            .within(
                "verify password",
                self.hasher.verify(&request.password, &principal.password_hash),
            )
            .await?;
        if !valid {
            warn!(principal_id = %principal.id, "Login rejected: bad password");
            return Err(AuthError::unauthenticated("Invalid user credentials"));
        }

        let tokens = self.issue_pair(&principal)?;
        self.within(
            "store refresh token",
            self.store
                .update_refresh_slot(principal.id, Some(&tokens.refresh_token)),
        )
        .await?;

        info!(principal_id = %principal.id, "Session started");
        Ok(Session {
            principal: principal.to_public(),
            tokens,
        })
    }

    /// Rotate a refresh token
    ///
    /// Succeeds at most once per token: the slot is swapped atomically from
    /// the presented token to the new one, and a caller that loses the race
    /// is rejected.
    pub async fn refresh(&self, presented: &str) -> Result<Session, AuthError> {
        let presented = presented.trim();
        if presented.is_empty() {
            return Err(AuthError::unauthenticated("Unauthorized request"));
        }

        let claims = self.tokens.verify_refresh(presented).map_err(|e| {
            debug!(error = %e, "Refresh token rejected");
            AuthError::unauthenticated("Invalid refresh token")
        })?;

        let principal = self
            .within("find principal", self.store.find_by_id(claims.id))
            .await?
            .ok_or_else(|| AuthError::unauthenticated("Invalid refresh token"))?;

        let matches_slot = principal
            .refresh_token
            .as_deref()
            .is_some_and(|stored| constant_time_eq(stored.as_bytes(), presented.as_bytes()));
        if !matches_slot {
            warn!(principal_id = %principal.id, "Stale refresh token presented");
            return Err(AuthError::unauthenticated(STALE_REFRESH));
        }

        let tokens = self.issue_pair(&principal)?;
        let swapped = self
            .within(
                "rotate refresh token",
                self.store.compare_and_swap_refresh(
                    principal.id,
                    Some(presented),
                    Some(&tokens.refresh_token),
                ),
            )
            .await?;
        if !swapped {
            warn!(principal_id = %principal.id, "Refresh token lost rotation race");
            return Err(AuthError::unauthenticated(STALE_REFRESH));
        }

        info!(principal_id = %principal.id, "Session refreshed");
        Ok(Session {
            principal: principal.to_public(),
            tokens,
        })
    }

    /// End the principal's session by emptying the refresh slot
    pub async fn logout(&self, id: Uuid) -> Result<(), AuthError> {
        self.within("clear refresh token", self.store.update_refresh_slot(id, None))
            .await?;
        info!(principal_id = %id, "Session ended");
        Ok(())
    }

    /// Change the password after checking the current one
    pub async fn change_password(
        &self,
        id: Uuid,
        request: ChangePasswordRequest,
    ) -> Result<(), AuthError> {
        request
            .validate()
            .map_err(|e| AuthError::Validation(first_message(&e)))?;

        let principal = self
            .within("find principal", self.store.find_by_id(id))
            .await?
            .ok_or_else(|| AuthError::NotFound("User not found".to_string()))?;

        let valid = self
            .within(
                "verify password",
                self.hasher
                    .verify(&request.old_password, &principal.password_hash),
            )
            .await?;
        if !valid {
            warn!(principal_id = %id, "Password change rejected: bad old password");
            return Err(AuthError::unauthenticated("Invalid old password"));
        }

        let password_hash = self
            .within("hash password", self.hasher.hash(&request.new_password))
            .await?;
        self.within(
            "store password",
            self.store.update_password_hash(id, &password_hash),
        )
        .await?;

        if self.revoke_sessions_on_password_change {
            self.within("clear refresh token", self.store.update_refresh_slot(id, None))
                .await?;
        }

        info!(principal_id = %id, "Password changed");
        Ok(())
    }

    /// Email a one-time reset link
    ///
    /// On delivery failure the ticket is withdrawn so no unusable token
    /// remains outstanding.
    pub async fn forgot_password(&self, request: ForgotPasswordRequest) -> Result<Uuid, AuthError> {
        request
            .validate()
            .map_err(|e| AuthError::Validation(first_message(&e)))?;
        let email = normalize_identifier(&request.email);
        if email.is_empty() {
            return Err(AuthError::validation("Email is required"));
        }

        let principal = self
            .within("find principal", self.store.find_by_email(&email))
            .await?
            .ok_or_else(|| AuthError::NotFound("User not found with this email".to_string()))?;

        let issued = self.resets.issue(Utc::now());
        self.within(
            "store reset token",
            self.store
                .update_reset_token(principal.id, Some(&issued.ticket)),
        )
        .await?;

        let reset_url = format!(
            "{}/reset-password?token={}",
            self.frontend_url, issued.plaintext
        );

        let delivery = tokio::time::timeout(
            self.operation_timeout,
            self.notifier
                .send_password_reset(&principal.email, &reset_url),
        )
        .await;

        let failure = match delivery {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(_) => Some("delivery timed out".to_string()),
        };

        if let Some(reason) = failure {
            error!(principal_id = %principal.id, error = %reason, "Reset email not delivered");
            if let Err(e) = self
                .within(
                    "withdraw reset token",
                    self.store.update_reset_token(principal.id, None),
                )
                .await
            {
                error!(principal_id = %principal.id, error = %e, "Failed to withdraw reset token");
            }
            return Err(AuthError::Internal(
                "Error sending email. Please try again later.".to_string(),
            ));
        }

        info!(principal_id = %principal.id, "Password reset link issued");
        Ok(principal.id)
    }

    /// Set a new password using an emailed reset token
    pub async fn reset_password(&self, request: ResetPasswordRequest) -> Result<Uuid, AuthError> {
        request
            .validate()
            .map_err(|e| AuthError::Validation(first_message(&e)))?;

        let now = Utc::now();
        let token_hash = ResetTokenManager::digest(request.token.trim());

        let principal = self
            .within(
                "find reset token",
                self.store.find_by_reset_token(&token_hash, now),
            )
            .await?
            .ok_or_else(|| AuthError::validation(INVALID_RESET))?;

        let ticket_ok = principal
            .reset_ticket
            .as_ref()
            .is_some_and(|ticket| ResetTokenManager::verify(request.token.trim(), ticket, now));
        if !ticket_ok {
            return Err(AuthError::validation(INVALID_RESET));
        }

        let password_hash = self
            .within("hash password", self.hasher.hash(&request.password))
            .await?;

        let completed = self
            .within(
                "complete password reset",
                self.store
                    .complete_password_reset(principal.id, &token_hash, &password_hash),
            )
            .await?;
        if !completed {
            return Err(AuthError::validation(INVALID_RESET));
        }

        info!(principal_id = %principal.id, "Password reset completed");
        Ok(principal.id)
    }

    /// The principal's public record, looked up under the operation deadline
    pub async fn current_principal(&self, id: Uuid) -> Result<PublicPrincipal, AuthError> {
        self.within("find principal", self.store.find_by_id(id))
            .await?
            .map(|p| p.to_public())
            .ok_or_else(|| AuthError::NotFound("User not found".to_string()))
    }

    /// Clear expired reset tickets; returns how many were removed
    pub async fn purge_expired_reset_tokens(&self) -> Result<u64, AuthError> {
        let purged = self
            .within(
                "purge reset tokens",
                self.store.purge_expired_reset_tokens(Utc::now()),
            )
            .await?;
        if purged > 0 {
            debug!(purged, "Expired reset tokens cleared");
        }
        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::notifier::RecordingNotifier;
    use crate::auth::password::test_hashing_config;
    use crate::auth::testing::ScriptedStore;
    use vidtube_core::{InMemoryCredentialStore, ResetTicket};

    struct Harness {
        service: SessionService,
        store: Arc<InMemoryCredentialStore>,
        outbox: Arc<RecordingNotifier>,
    }

    fn harness_with(config: AppConfig) -> Harness {
        let store = Arc::new(InMemoryCredentialStore::new());
        let outbox = Arc::new(RecordingNotifier::new());
        let hasher = Arc::new(CredentialHasher::new(&test_hashing_config()).unwrap());
        let service = SessionService::new(&config, store.clone(), hasher, outbox.clone());
        Harness {
            service,
            store,
            outbox,
        }
    }

    fn harness() -> Harness {
        harness_with(AppConfig::default())
    }

    fn register_request(username: &str) -> RegisterRequest {
        RegisterRequest {
            full_name: "Alice Liddell".to_string(),
            username: username.to_string(),
            email: format!("{username}@example.com"),
            password: "wonderland".to_string(),
            avatar: "https://cdn.example.com/alice.png".to_string(),
            cover_image: None,
        }
    }

    fn login_request(username: &str, password: &str) -> LoginRequest {
        LoginRequest {
            username: Some(username.to_string()),
            email: None,
            password: password.to_string(),
        }
    }

    async fn registered_session(h: &Harness) -> Session {
        h.service.register(register_request("alice")).await.unwrap();
        h.service
            .login(login_request("alice", "wonderland"))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_register_and_login() {
        let h = harness();
        let principal = h.service.register(register_request("Alice")).await.unwrap();
        assert_eq!(principal.username, "alice");

        let session = h
            .service
            .login(LoginRequest {
                username: None,
                email: Some("ALICE@example.com".to_string()),
                password: "wonderland".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(session.principal.id, principal.id);

        let claims = h
            .service
            .tokens()
            .verify_access(&session.tokens.access_token)
            .unwrap();
        assert_eq!(claims.id, principal.id);

        let stored = h.store.find_by_id(principal.id).await.unwrap().unwrap();
        assert_eq!(
            stored.refresh_token.as_deref(),
            Some(session.tokens.refresh_token.as_str())
        );
    }

    #[tokio::test]
    async fn test_register_validation_and_conflict() {
        let h = harness();

        let mut missing_avatar = register_request("bob");
        missing_avatar.avatar = "   ".to_string();
        assert!(matches!(
            h.service.register(missing_avatar).await,
            Err(AuthError::Validation(_))
        ));

        let mut blank_password = register_request("bob");
        blank_password.password = "   ".to_string();
        assert!(matches!(
            h.service.register(blank_password).await,
            Err(AuthError::Validation(_))
        ));

        h.service.register(register_request("bob")).await.unwrap();
        let mut same_email = register_request("robert");
        same_email.email = "Bob@Example.com".to_string();
        assert!(matches!(
            h.service.register(same_email).await,
            Err(AuthError::Conflict(_))
        ));
        assert_eq!(h.store.len().await, 1);
    }

    #[tokio::test]
    async fn test_login_failures() {
        let h = harness();
        h.service.register(register_request("alice")).await.unwrap();

        assert!(matches!(
            h.service.login(login_request("alice", "nope")).await,
            Err(AuthError::Unauthenticated(_))
        ));
        assert!(matches!(
            h.service.login(login_request("nobody", "nope")).await,
            Err(AuthError::NotFound(_))
        ));
        assert!(matches!(
            h.service
                .login(LoginRequest {
                    username: Some("  ".to_string()),
                    email: None,
                    password: "x".to_string(),
                })
                .await,
            Err(AuthError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_concealed_unknown_principal() {
        let mut config = AppConfig::default();
        config.auth.conceal_unknown_principal = true;
        let h = harness_with(config);

        let unknown = h.service.login(login_request("nobody", "nope")).await;
        assert_eq!(
            unknown.unwrap_err(),
            AuthError::unauthenticated("Invalid user credentials")
        );
    }

    #[tokio::test]
    async fn test_refresh_rotates_once() {
        let h = harness();
        let session = registered_session(&h).await;

        let rotated = h
            .service
            .refresh(&session.tokens.refresh_token)
            .await
            .unwrap();
        assert_ne!(rotated.tokens.refresh_token, session.tokens.refresh_token);

        // Replaying the consumed token fails
        let replay = h.service.refresh(&session.tokens.refresh_token).await;
        assert_eq!(replay.unwrap_err(), AuthError::unauthenticated(STALE_REFRESH));

        // The new one still works
        assert!(h
            .service
            .refresh(&rotated.tokens.refresh_token)
            .await
            .is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_refresh_single_winner() {
        let store = ScriptedStore::new();
        let hasher = Arc::new(CredentialHasher::new(&test_hashing_config()).unwrap());
        let setup = SessionService::new(
            &AppConfig::default(),
            Arc::new(store.clone()),
            hasher.clone(),
            Arc::new(RecordingNotifier::new()),
        );
        setup.register(register_request("alice")).await.unwrap();
        let session = setup
            .login(login_request("alice", "wonderland"))
            .await
            .unwrap();
        let id = session.principal.id;
        let token = session.tokens.refresh_token.clone();

        // Both refreshes read the same slot before either writes
        let racing = SessionService::new(
            &AppConfig::default(),
            Arc::new(store.clone().with_id_lookup_barrier(2)),
            hasher,
            Arc::new(RecordingNotifier::new()),
        );
        let first = tokio::spawn({
            let service = racing.clone();
            let token = token.clone();
            async move { service.refresh(&token).await }
        });
        let second = tokio::spawn({
            let service = racing.clone();
            let token = token.clone();
            async move { service.refresh(&token).await }
        });
        let outcomes = [first.await.unwrap(), second.await.unwrap()];

        let winners: Vec<&Session> = outcomes.iter().filter_map(|r| r.as_ref().ok()).collect();
        assert_eq!(winners.len(), 1);
        let loser = outcomes.iter().find_map(|r| r.as_ref().err()).unwrap();
        assert_eq!(loser, &AuthError::unauthenticated(STALE_REFRESH));

        let stored = store.inner.find_by_id(id).await.unwrap().unwrap();
        assert_eq!(
            stored.refresh_token.as_deref(),
            Some(winners[0].tokens.refresh_token.as_str())
        );
    }

    #[tokio::test]
    async fn test_login_invalidates_previous_refresh_token() {
        let h = harness();
        let first = registered_session(&h).await;
        let second = h
            .service
            .login(login_request("alice", "wonderland"))
            .await
            .unwrap();

        assert!(h.service.refresh(&first.tokens.refresh_token).await.is_err());
        assert!(h.service.refresh(&second.tokens.refresh_token).await.is_ok());
    }

    #[tokio::test]
    async fn test_logout_then_refresh_fails() {
        let h = harness();
        let session = registered_session(&h).await;

        h.service.logout(session.principal.id).await.unwrap();
        let result = h.service.refresh(&session.tokens.refresh_token).await;
        assert!(matches!(result, Err(AuthError::Unauthenticated(_))));
    }

    #[tokio::test]
    async fn test_refresh_rejects_garbage_and_access_tokens() {
        let h = harness();
        let session = registered_session(&h).await;

        assert!(matches!(
            h.service.refresh("").await,
            Err(AuthError::Unauthenticated(_))
        ));
        assert!(matches!(
            h.service.refresh("garbage").await,
            Err(AuthError::Unauthenticated(_))
        ));
        assert!(matches!(
            h.service.refresh(&session.tokens.access_token).await,
            Err(AuthError::Unauthenticated(_))
        ));
    }

    #[tokio::test]
    async fn test_change_password() {
        let h = harness();
        let session = registered_session(&h).await;
        let id = session.principal.id;

        let wrong = h
            .service
            .change_password(
                id,
                ChangePasswordRequest {
                    old_password: "nope".to_string(),
                    new_password: "looking-glass".to_string(),
                },
            )
            .await;
        assert!(matches!(wrong, Err(AuthError::Unauthenticated(_))));

        h.service
            .change_password(
                id,
                ChangePasswordRequest {
                    old_password: "wonderland".to_string(),
                    new_password: "looking-glass".to_string(),
                },
            )
            .await
            .unwrap();

        assert!(h
            .service
            .login(login_request("alice", "wonderland"))
            .await
            .is_err());
        assert!(h
            .service
            .login(login_request("alice", "looking-glass"))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_change_password_keeps_session_by_default() {
        let h = harness();
        let session = registered_session(&h).await;
        h.service
            .change_password(
                session.principal.id,
                ChangePasswordRequest {
                    old_password: "wonderland".to_string(),
                    new_password: "looking-glass".to_string(),
                },
            )
            .await
            .unwrap();

        assert!(h.service.refresh(&session.tokens.refresh_token).await.is_ok());
    }

    #[tokio::test]
    async fn test_change_password_can_revoke_session() {
        let mut config = AppConfig::default();
        config.auth.revoke_sessions_on_password_change = true;
        let h = harness_with(config);
        let session = registered_session(&h).await;

        h.service
            .change_password(
                session.principal.id,
                ChangePasswordRequest {
                    old_password: "wonderland".to_string(),
                    new_password: "looking-glass".to_string(),
                },
            )
            .await
            .unwrap();

        assert!(h.service.refresh(&session.tokens.refresh_token).await.is_err());
    }

    async fn request_reset(h: &Harness) -> String {
        h.service
            .forgot_password(ForgotPasswordRequest {
                email: "Alice@Example.com".to_string(),
            })
            .await
            .unwrap();
        let link = h.outbox.last_for("alice@example.com").unwrap();
        assert!(link
            .reset_url
            .starts_with("http://localhost:5173/reset-password?token="));
        link.token().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_forgot_and_reset_password() {
        let h = harness();
        let session = registered_session(&h).await;
        let token = request_reset(&h).await;

        let stored = h
            .store
            .find_by_id(session.principal.id)
            .await
            .unwrap()
            .unwrap();
        let ticket = stored.reset_ticket.unwrap();
        assert_ne!(ticket.token_hash, token);

        h.service
            .reset_password(ResetPasswordRequest {
                token: token.clone(),
                password: "rabbit-hole".to_string(),
            })
            .await
            .unwrap();

        // One-time use
        let again = h
            .service
            .reset_password(ResetPasswordRequest {
                token,
                password: "another".to_string(),
            })
            .await;
        assert_eq!(again.unwrap_err(), AuthError::validation(INVALID_RESET));

        assert!(h
            .service
            .login(login_request("alice", "wonderland"))
            .await
            .is_err());
        assert!(h
            .service
            .login(login_request("alice", "rabbit-hole"))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_reset_rejected_at_expiry() {
        let h = harness();
        let session = registered_session(&h).await;
        let token = request_reset(&h).await;

        // Pull the deadline back to the present
        h.store
            .update_reset_token(
                session.principal.id,
                Some(&ResetTicket {
                    token_hash: ResetTokenManager::digest(&token),
                    expires_at: Utc::now(),
                }),
            )
            .await
            .unwrap();

        let result = h
            .service
            .reset_password(ResetPasswordRequest {
                token,
                password: "rabbit-hole".to_string(),
            })
            .await;
        assert!(matches!(result, Err(AuthError::Validation(_))));
    }

    #[tokio::test]
    async fn test_forgot_password_unknown_email() {
        let h = harness();
        let result = h
            .service
            .forgot_password(ForgotPasswordRequest {
                email: "ghost@example.com".to_string(),
            })
            .await;
        assert!(matches!(result, Err(AuthError::NotFound(_))));
        assert!(h.outbox.sent().is_empty());
    }

    #[tokio::test]
    async fn test_failed_delivery_withdraws_ticket() {
        let h = harness();
        let session = registered_session(&h).await;
        h.outbox.set_failing(true);

        let result = h
            .service
            .forgot_password(ForgotPasswordRequest {
                email: "alice@example.com".to_string(),
            })
            .await;
        assert!(matches!(result, Err(AuthError::Internal(_))));

        let stored = h
            .store
            .find_by_id(session.principal.id)
            .await
            .unwrap()
            .unwrap();
        assert!(stored.reset_ticket.is_none());
    }

    #[tokio::test]
    async fn test_current_principal() {
        let h = harness();
        let session = registered_session(&h).await;

        let me = h
            .service
            .current_principal(session.principal.id)
            .await
            .unwrap();
        assert_eq!(me.email, "alice@example.com");
        assert!(matches!(
            h.service.current_principal(Uuid::new_v4()).await,
            Err(AuthError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_purge_expired_reset_tokens() {
        let h = harness();
        let session = registered_session(&h).await;
        h.store
            .update_reset_token(
                session.principal.id,
                Some(&ResetTicket {
                    token_hash: "stale".to_string(),
                    expires_at: Utc::now() - chrono::Duration::minutes(1),
                }),
            )
            .await
            .unwrap();

        assert_eq!(h.service.purge_expired_reset_tokens().await.unwrap(), 1);
        assert_eq!(h.service.purge_expired_reset_tokens().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_deadline_maps_to_unavailable() {
        let mut config = AppConfig::default();
        config.auth.operation_timeout_ms = 50;
        let hasher = Arc::new(CredentialHasher::new(&test_hashing_config()).unwrap());
        let service = SessionService::new(
            &config,
            Arc::new(ScriptedStore::stalled(Duration::from_secs(5))),
            hasher,
            Arc::new(RecordingNotifier::new()),
        );

        let result = service.login(login_request("alice", "wonderland")).await;
        assert!(matches!(result, Err(AuthError::Unavailable(_))));

        let result = service.current_principal(Uuid::new_v4()).await;
        assert!(matches!(result, Err(AuthError::Unavailable(_))));
    }
}

