/// Authorization gate for protected and identity-aware routes
///
/// The access token is read from the `accessToken` cookie, falling back to
/// an `Authorization: Bearer` header. A token is only accepted if it
/// verifies against the access secret and its principal still exists.
use super::cookies::{cookie_value, ACCESS_TOKEN_COOKIE};
use crate::audit::{audit_log, extract_ip_address, AuditEvent};
use crate::error::{AppError, AuthError};
use crate::state::AppState;
use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use uuid::Uuid;
use vidtube_core::PublicPrincipal;

const INVALID_ACCESS_TOKEN: &str = "Invalid Access Token";

/// Principal attached to requests that passed the mandatory gate
///
/// Extract in handlers with `Extension<AuthenticatedPrincipal>`.
#[derive(Debug, Clone)]
pub struct AuthenticatedPrincipal(pub PublicPrincipal);

impl AuthenticatedPrincipal {
    pub fn id(&self) -> Uuid {
        self.0.id
    }

    /// Fail with `Forbidden` unless the caller owns the resource
    pub fn ensure_owner(&self, owner_id: Uuid) -> Result<(), AuthError> {
        if self.0.id == owner_id {
            Ok(())
        } else {
            Err(AuthError::Forbidden(
                "You do not have permission to modify this resource".to_string(),
            ))
        }
    }
}

/// Caller identity on routes behind the optional gate; `None` for anonymous
#[derive(Debug, Clone, Default)]
pub struct Viewer(pub Option<PublicPrincipal>);

/// Access token from the cookie, else the bearer header
pub fn extract_access_token(headers: &HeaderMap) -> Option<String> {
    if let Some(token) = cookie_value(headers, ACCESS_TOKEN_COOKIE) {
        return Some(token);
    }

    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(str::to_string)
}

/// Resolve the calling principal from request headers
pub async fn resolve_principal(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<PublicPrincipal, AuthError> {
    let token = extract_access_token(headers)
        .ok_or_else(|| AuthError::unauthenticated("Unauthorized request"))?;

    let claims = state.sessions.tokens().verify_access(&token).map_err(|e| {
        tracing::debug!(error = %e, "Access token rejected");
        AuthError::unauthenticated(INVALID_ACCESS_TOKEN)
    })?;

    // Store failures and missed deadlines keep their own kind
    state
        .sessions
        .current_principal(claims.id)
        .await
        .map_err(|e| match e {
            AuthError::NotFound(_) => AuthError::unauthenticated(INVALID_ACCESS_TOKEN),
            other => other,
        })
}

/// Mandatory gate: rejects with 401 unless a valid principal is resolved
///
/// # Usage
///
/// ```ignore
/// let protected = Router::new()
///     .route("/current-user", get(current_user_handler))
///     .layer(middleware::from_fn_with_state(state.clone(), require_auth));
/// ```
pub async fn require_auth(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    match resolve_principal(&state, request.headers()).await {
        Ok(principal) => {
            request
                .extensions_mut()
                .insert(AuthenticatedPrincipal(principal));
            Ok(next.run(request).await)
        }
        Err(e) => {
            audit_log(&AuditEvent::InvalidToken {
                reason: e.to_string(),
                path: request.uri().path().to_string(),
                ip_address: extract_ip_address(request.headers()),
            });
            Err(e.into())
        }
    }
}

/// Optional gate: attaches a [`Viewer`] and always proceeds
pub async fn optional_auth(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Response {
    let viewer = resolve_principal(&state, request.headers()).await.ok();
    request.extensions_mut().insert(Viewer(viewer));
    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::notifier::RecordingNotifier;
    use crate::auth::password::test_hashing_config;
    use crate::auth::service::{LoginRequest, RegisterRequest};
    use crate::auth::testing::ScriptedStore;
    use crate::testing_state;
    use std::time::Duration;
    use vidtube_core::{AppConfig, NewPrincipal};

    fn bearer(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            format!("Bearer {token}").parse().unwrap(),
        );
        headers
    }

    async fn logged_in(state: &AppState) -> (PublicPrincipal, String) {
        state
            .sessions
            .register(RegisterRequest {
                full_name: "Alice".to_string(),
                username: "alice".to_string(),
                email: "alice@example.com".to_string(),
                password: "wonderland".to_string(),
                avatar: "a.png".to_string(),
                cover_image: None,
            })
            .await
            .unwrap();
        let session = state
            .sessions
            .login(LoginRequest {
                username: Some("alice".to_string()),
                email: None,
                password: "wonderland".to_string(),
            })
            .await
            .unwrap();
        (session.principal, session.tokens.access_token)
    }

    #[test]
    fn test_cookie_takes_precedence_over_bearer() {
        let mut headers = bearer("from-header");
        headers.insert(header::COOKIE, "accessToken=from-cookie".parse().unwrap());
        assert_eq!(
            extract_access_token(&headers).as_deref(),
            Some("from-cookie")
        );

        assert_eq!(
            extract_access_token(&bearer("from-header")).as_deref(),
            Some("from-header")
        );

        let mut basic = HeaderMap::new();
        basic.insert(header::AUTHORIZATION, "Basic abc".parse().unwrap());
        assert_eq!(extract_access_token(&basic), None);
    }

    #[tokio::test]
    async fn test_resolve_principal() {
        let (state, _) = testing_state();
        let (principal, access) = logged_in(&state).await;

        let resolved = resolve_principal(&state, &bearer(&access)).await.unwrap();
        assert_eq!(resolved, principal);

        let missing = resolve_principal(&state, &HeaderMap::new()).await;
        assert!(matches!(missing, Err(AuthError::Unauthenticated(_))));

        let forged = resolve_principal(&state, &bearer("x.y.z")).await;
        assert!(matches!(forged, Err(AuthError::Unauthenticated(_))));
    }

    #[tokio::test]
    async fn test_token_for_missing_principal_rejected() {
        let (state, _) = testing_state();
        let (_, access) = logged_in(&state).await;

        // Same secrets, empty store
        let (other_state, _) = testing_state();
        let result = resolve_principal(&other_state, &bearer(&access)).await;
        assert!(matches!(result, Err(AuthError::Unauthenticated(_))));
    }

    #[tokio::test]
    async fn test_stalled_store_fails_unavailable() {
        let mut config = AppConfig::default();
        config.hashing = test_hashing_config();
        config.auth.operation_timeout_ms = 50;
        let state = AppState::new(
            config,
            Arc::new(ScriptedStore::stalled(Duration::from_secs(5))),
            Arc::new(RecordingNotifier::new()),
        )
        .unwrap();

        let principal = NewPrincipal {
            username: "alice".to_string(),
            email: "alice@example.com".to_string(),
            full_name: "Alice".to_string(),
            avatar: "a.png".to_string(),
            cover_image: None,
            password_hash: "unused".to_string(),
        }
        .into_principal();
        let access = state.sessions.tokens().issue_access(&principal).unwrap();

        let result = resolve_principal(&state, &bearer(&access)).await;
        assert!(matches!(result, Err(AuthError::Unavailable(_))));
    }

    #[test]
    fn test_ensure_owner() {
        let now = chrono::Utc::now();
        let principal = AuthenticatedPrincipal(PublicPrincipal {
            id: Uuid::new_v4(),
            username: "alice".to_string(),
            email: "alice@example.com".to_string(),
            full_name: "Alice".to_string(),
            avatar: "a.png".to_string(),
            cover_image: None,
            created_at: now,
            updated_at: now,
        });

        assert!(principal.ensure_owner(principal.id()).is_ok());
        assert!(matches!(
            principal.ensure_owner(Uuid::new_v4()),
            Err(AuthError::Forbidden(_))
        ));
    }
}
