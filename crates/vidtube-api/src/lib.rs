//! VidTube API - credential and session HTTP service
//!
//! Registration, login, refresh-token rotation, logout, password change and
//! the forgot/reset password flow, served over axum.
//!
//! Author: hephaex@gmail.com

pub mod audit;
pub mod auth;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;

use axum::{
    http::{header, HeaderValue, Method},
    routing::get,
    Json, Router,
};
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};
use vidtube_core::{AppConfig, HashingConfig, InMemoryCredentialStore};

use crate::auth::{Notifier, RecordingNotifier};
use crate::state::AppState;

/// OpenAPI document for the service
#[derive(OpenApi)]
#[openapi(
    info(
        title = "VidTube API",
        description = "Credential and session endpoints"
    ),
    paths(
        handlers::health::health_check,
        handlers::users::register_handler,
        handlers::users::login_handler,
        handlers::users::refresh_handler,
        handlers::users::logout_handler,
        handlers::users::change_password_handler,
        handlers::users::current_user_handler,
        handlers::users::forgot_password_handler,
        handlers::users::reset_password_handler,
        handlers::users::whoami_handler,
    ),
    components(schemas(
        error::ApiError,
        handlers::health::HealthResponse,
        handlers::users::WhoAmIResponse,
        vidtube_core::PublicPrincipal,
        auth::RegisterRequest,
        auth::LoginRequest,
        auth::LoginResponse,
        auth::RefreshRequest,
        auth::TokenPair,
        auth::ChangePasswordRequest,
        auth::ForgotPasswordRequest,
        auth::ResetPasswordRequest,
    )),
    modifiers(&SecurityAddon),
    tags(
        (name = "health", description = "Liveness"),
        (name = "users", description = "Accounts and sessions")
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// Credentialed CORS for the configured origins, anonymous CORS otherwise
fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() {
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
    }

    let origins: Vec<HeaderValue> = origins.iter().filter_map(|s| s.parse().ok()).collect();
    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_credentials(true)
}

/// Build the application router
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = cors_layer(&state.config.server.cors_origins);

    Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/api-docs/openapi.json", get(openapi_json))
        .nest("/api/v1", routes::api_routes(state.clone()))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// In-memory state with cheap hashing and a recording notifier
///
/// Intended for tests; cookies are issued without the `Secure` attribute.
pub fn testing_state() -> (Arc<AppState>, Arc<RecordingNotifier>) {
    let mut config = AppConfig::default();
    config.hashing = HashingConfig {
        memory_cost: 1024,
        time_cost: 1,
        parallelism: 1,
        max_concurrent: 2,
    };
    config.auth.secure_cookies = false;

    let recorder = Arc::new(RecordingNotifier::new());
    let notifier: Arc<dyn Notifier> = recorder.clone();
    let state = AppState::new(config, Arc::new(InMemoryCredentialStore::new()), notifier)
        .expect("default configuration with test hashing parameters is valid");

    (Arc::new(state), recorder)
}

/// Router over [`testing_state`]
pub fn create_router_for_testing() -> Router {
    let (state, _) = testing_state();
    create_router(state)
}
