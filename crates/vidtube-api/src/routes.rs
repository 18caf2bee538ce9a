//! API route definitions
//!
//! Author: hephaex@gmail.com

use crate::auth::{optional_auth, require_auth};
use crate::handlers::users;
use crate::state::AppState;
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;

/// Create API v1 routes
pub fn api_routes(state: Arc<AppState>) -> Router<Arc<AppState>> {
    // Public routes (no authentication required)
    let public_routes = Router::new()
        .route("/users/register", post(users::register_handler))
        .route("/users/login", post(users::login_handler))
        .route("/users/refresh-token", post(users::refresh_handler))
        .route("/users/forgot-password", post(users::forgot_password_handler))
        .route("/users/reset-password", post(users::reset_password_handler));

    // Protected routes (authentication required)
    let protected_routes = Router::new()
        .route("/users/logout", post(users::logout_handler))
        .route("/users/change-password", post(users::change_password_handler))
        .route("/users/current-user", get(users::current_user_handler))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth));

    // Identity-aware routes (anonymous callers allowed)
    let optional_routes = Router::new()
        .route("/users/whoami", get(users::whoami_handler))
        .layer(middleware::from_fn_with_state(state, optional_auth));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(optional_routes)
}
