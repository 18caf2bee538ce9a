//! User account and session API handlers
//!
//! Registration, login, token refresh, logout, password change and the
//! forgot/reset password flow. Session tokens travel as HttpOnly cookies and
//! are also returned in the login and refresh bodies for non-browser clients.
//!
//! Author: hephaex@gmail.com

use super::ApiResponse;
use crate::audit::{audit_log, extract_ip_address, extract_user_agent, AuditEvent};
use crate::auth::cookies::{
    clear_token_cookie, cookie_value, token_cookie, ACCESS_TOKEN_COOKIE, REFRESH_TOKEN_COOKIE,
};
use crate::auth::{
    AuthenticatedPrincipal, ChangePasswordRequest, ForgotPasswordRequest, LoginRequest,
    LoginResponse, RefreshRequest, RegisterRequest, ResetPasswordRequest, TokenPair, Viewer,
};
use crate::error::{AppError, AuthError};
use crate::state::AppState;
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Extension, Json,
};
use axum_extra::extract::{cookie::CookieJar, WithRejection};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use utoipa::ToSchema;
use vidtube_core::PublicPrincipal;

/// Identity as seen through the optional gate
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct WhoAmIResponse {
    pub authenticated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<PublicPrincipal>,
}

fn with_session_cookies(jar: CookieJar, state: &AppState, tokens: &TokenPair) -> CookieJar {
    let secure = state.secure_cookies();
    let issuer = state.sessions.tokens();
    jar.add(token_cookie(
        ACCESS_TOKEN_COOKIE,
        &tokens.access_token,
        issuer.access_ttl(),
        secure,
    ))
    .add(token_cookie(
        REFRESH_TOKEN_COOKIE,
        &tokens.refresh_token,
        issuer.refresh_ttl(),
        secure,
    ))
}

fn without_session_cookies(jar: CookieJar, state: &AppState) -> CookieJar {
    let secure = state.secure_cookies();
    jar.add(clear_token_cookie(ACCESS_TOKEN_COOKIE, secure))
        .add(clear_token_cookie(REFRESH_TOKEN_COOKIE, secure))
}

/// Register a new user account
///
/// # Responses
///
/// * `201 Created` - Principal registered
/// * `400 Bad Request` - Missing field or avatar
/// * `409 Conflict` - Username or email already taken
#[utoipa::path(
    post,
    path = "/api/v1/users/register",
    tag = "users",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "User registered successfully", body = PublicPrincipal),
        (status = 400, description = "Invalid input", body = crate::error::ApiError),
        (status = 409, description = "User already exists", body = crate::error::ApiError),
    )
)]
pub async fn register_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    WithRejection(Json(request), _): WithRejection<Json<RegisterRequest>, AppError>,
) -> Result<impl IntoResponse, AppError> {
    let ip_address = extract_ip_address(&headers);
    let user_agent = extract_user_agent(&headers);
    let email = request.email.clone();

    match state.sessions.register(request).await {
        Ok(principal) => {
            audit_log(&AuditEvent::RegistrationSuccess {
                user_id: principal.id,
                email: principal.email.clone(),
                ip_address,
                user_agent,
            });
            Ok((
                StatusCode::CREATED,
                Json(ApiResponse::new(
                    StatusCode::CREATED,
                    principal,
                    "User registered successfully",
                )),
            ))
        }
        Err(e) => {
            audit_log(&AuditEvent::RegistrationFailure {
                email,
                reason: e.to_string(),
                ip_address,
                user_agent,
            });
            Err(e.into())
        }
    }
}

/// Login with username or email and password
///
/// Sets the `accessToken` and `refreshToken` cookies.
#[utoipa::path(
    post,
    path = "/api/v1/users/login",
    tag = "users",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful", body = LoginResponse),
        (status = 401, description = "Invalid credentials", body = crate::error::ApiError),
        (status = 404, description = "User does not exist", body = crate::error::ApiError),
    )
)]
pub async fn login_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    jar: CookieJar,
    WithRejection(Json(request), _): WithRejection<Json<LoginRequest>, AppError>,
) -> Result<impl IntoResponse, AppError> {
    let ip_address = extract_ip_address(&headers);
    let user_agent = extract_user_agent(&headers);
    let identifier = request
        .username
        .clone()
        .or_else(|| request.email.clone())
        .unwrap_or_default();

    let session = match state.sessions.login(request).await {
        Ok(session) => session,
        Err(e) => {
            audit_log(&AuditEvent::LoginFailure {
                identifier,
                reason: e.to_string(),
                ip_address,
                user_agent,
            });
            return Err(e.into());
        }
    };

    audit_log(&AuditEvent::LoginSuccess {
        user_id: session.principal.id,
        ip_address,
        user_agent,
    });

    let jar = with_session_cookies(jar, &state, &session.tokens);
    let body = LoginResponse {
        user: session.principal,
        access_token: session.tokens.access_token,
        refresh_token: session.tokens.refresh_token,
    };

    Ok((jar, Json(ApiResponse::ok(body, "User logged in successfully"))))
}

/// Exchange a refresh token for a new token pair
///
/// The token is read from the `refreshToken` cookie, else from the body.
/// Each refresh token can be exchanged once.
#[utoipa::path(
    post,
    path = "/api/v1/users/refresh-token",
    tag = "users",
    request_body = RefreshRequest,
    responses(
        (status = 200, description = "Access token refreshed", body = TokenPair),
        (status = 401, description = "Refresh token invalid, expired or used", body = crate::error::ApiError),
    )
)]
pub async fn refresh_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    jar: CookieJar,
    body: Option<Json<RefreshRequest>>,
) -> Result<impl IntoResponse, AppError> {
    let ip_address = extract_ip_address(&headers);

    let presented = cookie_value(&headers, REFRESH_TOKEN_COOKIE)
        .or_else(|| body.and_then(|Json(request)| request.refresh_token))
        .filter(|token| !token.trim().is_empty())
        .ok_or_else(|| AuthError::unauthenticated("Unauthorized request"))?;

    let session = match state.sessions.refresh(&presented).await {
        Ok(session) => session,
        Err(e) => {
            audit_log(&AuditEvent::RefreshRejected {
                reason: e.to_string(),
                ip_address,
            });
            return Err(e.into());
        }
    };

    audit_log(&AuditEvent::TokenRefresh {
        user_id: session.principal.id,
        ip_address,
    });

    let jar = with_session_cookies(jar, &state, &session.tokens);
    Ok((
        jar,
        Json(ApiResponse::ok(session.tokens, "Access token refreshed")),
    ))
}

/// Logout: revoke the refresh token and clear both cookies
#[utoipa::path(
    post,
    path = "/api/v1/users/logout",
    tag = "users",
    responses(
        (status = 200, description = "User logged out"),
        (status = 401, description = "Not authenticated", body = crate::error::ApiError),
    ),
    security(("bearer_auth" = []))
)]
pub async fn logout_handler(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<AuthenticatedPrincipal>,
    headers: HeaderMap,
    jar: CookieJar,
) -> Result<impl IntoResponse, AppError> {
    state.sessions.logout(principal.id()).await?;

    audit_log(&AuditEvent::Logout {
        user_id: principal.id(),
        ip_address: extract_ip_address(&headers),
    });

    let jar = without_session_cookies(jar, &state);
    Ok((jar, Json(ApiResponse::ok(json!({}), "User logged out"))))
}

/// Change the current user's password
#[utoipa::path(
    post,
    path = "/api/v1/users/change-password",
    tag = "users",
    request_body = ChangePasswordRequest,
    responses(
        (status = 200, description = "Password changed successfully"),
        (status = 401, description = "Not authenticated or invalid old password", body = crate::error::ApiError),
    ),
    security(("bearer_auth" = []))
)]
pub async fn change_password_handler(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<AuthenticatedPrincipal>,
    headers: HeaderMap,
    WithRejection(Json(request), _): WithRejection<Json<ChangePasswordRequest>, AppError>,
) -> Result<impl IntoResponse, AppError> {
    let result = state
        .sessions
        .change_password(principal.id(), request)
        .await;

    audit_log(&AuditEvent::PasswordChange {
        user_id: principal.id(),
        success: result.is_ok(),
        ip_address: extract_ip_address(&headers),
    });
    result?;

    Ok(Json(ApiResponse::ok(
        json!({}),
        "Password changed successfully",
    )))
}

/// Get the current user's profile
#[utoipa::path(
    get,
    path = "/api/v1/users/current-user",
    tag = "users",
    responses(
        (status = 200, description = "Current user", body = PublicPrincipal),
        (status = 401, description = "Not authenticated", body = crate::error::ApiError),
    ),
    security(("bearer_auth" = []))
)]
pub async fn current_user_handler(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<AuthenticatedPrincipal>,
) -> Result<impl IntoResponse, AppError> {
    let principal = state.sessions.current_principal(principal.id()).await?;
    Ok(Json(ApiResponse::ok(
        principal,
        "Current user fetched successfully",
    )))
}

/// Email a password reset link
#[utoipa::path(
    post,
    path = "/api/v1/users/forgot-password",
    tag = "users",
    request_body = ForgotPasswordRequest,
    responses(
        (status = 200, description = "Reset link sent"),
        (status = 404, description = "No user with this email", body = crate::error::ApiError),
        (status = 500, description = "Email could not be sent", body = crate::error::ApiError),
    )
)]
pub async fn forgot_password_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    WithRejection(Json(request), _): WithRejection<Json<ForgotPasswordRequest>, AppError>,
) -> Result<impl IntoResponse, AppError> {
    let email = request.email.clone();
    let result = state.sessions.forgot_password(request).await;

    audit_log(&AuditEvent::PasswordResetRequested {
        email,
        delivered: result.is_ok(),
        ip_address: extract_ip_address(&headers),
    });
    result?;

    Ok(Json(ApiResponse::ok(
        json!({}),
        "Password reset link sent to your email",
    )))
}

/// Set a new password with an emailed reset token
#[utoipa::path(
    post,
    path = "/api/v1/users/reset-password",
    tag = "users",
    request_body = ResetPasswordRequest,
    responses(
        (status = 200, description = "Password reset"),
        (status = 400, description = "Invalid or expired token", body = crate::error::ApiError),
    )
)]
pub async fn reset_password_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    WithRejection(Json(request), _): WithRejection<Json<ResetPasswordRequest>, AppError>,
) -> Result<impl IntoResponse, AppError> {
    let result = state.sessions.reset_password(request).await;

    audit_log(&AuditEvent::PasswordResetCompleted {
        user_id: result.as_ref().ok().copied(),
        success: result.is_ok(),
        ip_address: extract_ip_address(&headers),
    });
    result?;

    Ok(Json(ApiResponse::ok(
        json!({}),
        "Password has been reset successfully",
    )))
}

/// Report who the caller is, if anyone
#[utoipa::path(
    get,
    path = "/api/v1/users/whoami",
    tag = "users",
    responses(
        (status = 200, description = "Caller identity", body = WhoAmIResponse),
    )
)]
pub async fn whoami_handler(Extension(viewer): Extension<Viewer>) -> impl IntoResponse {
    let response = WhoAmIResponse {
        authenticated: viewer.0.is_some(),
        user: viewer.0,
    };
    Json(ApiResponse::ok(response, "Caller identity"))
}
