//! Authentication and authorization module
//!
//! This module provides the credential and session machinery:
//! - Password hashing with Argon2id on a bounded worker pool
//! - Access/refresh token generation and validation
//! - One-time password reset tokens and their delivery
//! - Session cookies
//! - The session service composing the above
//! - Middleware gating routes on a resolved principal

pub mod cookies;
pub mod jwt;
pub mod middleware;
pub mod notifier;
pub mod password;
pub mod reset;
pub mod service;

#[cfg(test)]
pub(crate) mod testing;

pub use jwt::{AccessClaims, JwtError, RefreshClaims, TokenIssuer};
pub use middleware::{optional_auth, require_auth, AuthenticatedPrincipal, Viewer};
pub use notifier::{HttpMailRelay, LogNotifier, Notifier, NotifyError, RecordingNotifier};
pub use password::{CredentialHasher, PasswordError};
pub use reset::{IssuedResetToken, ResetTokenManager};
pub use service::{
    ChangePasswordRequest, ForgotPasswordRequest, LoginRequest, LoginResponse, RefreshRequest,
    RegisterRequest, ResetPasswordRequest, Session, SessionService, TokenPair,
};
