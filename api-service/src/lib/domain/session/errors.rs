use auth::IdentityError;
use auth::JwtError;
use thiserror::Error;

use crate::user::errors::EmailError;
use crate::user::errors::UserError;
use crate::user::errors::UserNameError;

/// Input rejected before any state is touched.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error(transparent)]
    Name(#[from] UserNameError),

    #[error(transparent)]
    Email(#[from] EmailError),

    #[error("password is required")]
    PasswordRequired,

    #[error("password must be at least {min} characters")]
    PasswordTooShort { min: usize },

    #[error("identity token is required")]
    IdentityTokenRequired,

    #[error("refresh token is required")]
    RefreshTokenRequired,
}

/// Refresh token persistence errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("refresh token not found")]
    NotFound,

    #[error("Database error: {0}")]
    DatabaseError(String),
}

/// Authentication service error taxonomy.
///
/// Each variant maps to exactly one HTTP status and carries a stable
/// [`kind`](AuthError::kind) tag for clients.
#[derive(Debug, Clone, Error)]
pub enum AuthError {
    #[error("{0}")]
    Validation(#[from] ValidationError),

    #[error("email already registered")]
    EmailAlreadyRegistered(String),

    #[error("invalid email or password")]
    InvalidCredentials,

    #[error("{}", access_token_message(.0))]
    AccessToken(#[from] JwtError),

    #[error("invalid refresh token")]
    InvalidRefreshToken,

    #[error("refresh token has expired")]
    RefreshTokenExpired,

    #[error("refresh token has been revoked")]
    RefreshTokenRevoked,

    #[error("identity verification failed: {0}")]
    ExternalVerification(#[from] IdentityError),

    #[error("unsupported identity provider: {0}")]
    UnsupportedProvider(String),

    #[error("user not found")]
    UserNotFound,

    #[error("storage error: {0}")]
    Storage(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AuthError {
    /// Stable machine-readable tag for this error.
    pub fn kind(&self) -> &'static str {
        match self {
            AuthError::Validation(_) => "validation_error",
            AuthError::EmailAlreadyRegistered(_) => "conflict",
            AuthError::InvalidCredentials => "invalid_credentials",
            AuthError::AccessToken(JwtError::Expired) => "token_expired",
            AuthError::AccessToken(_) => "invalid_token",
            AuthError::InvalidRefreshToken => "invalid_refresh_token",
            AuthError::RefreshTokenExpired => "refresh_token_expired",
            AuthError::RefreshTokenRevoked => "refresh_token_revoked",
            AuthError::ExternalVerification(IdentityError::EmailNotVerified) => {
                "email_not_verified"
            }
            AuthError::ExternalVerification(_) => "invalid_identity_token",
            AuthError::UnsupportedProvider(_) => "unsupported_provider",
            AuthError::UserNotFound => "not_found",
            AuthError::Storage(_) => "storage_error",
            AuthError::Internal(_) => "internal_error",
        }
    }
}

fn access_token_message(error: &JwtError) -> &'static str {
    match error {
        JwtError::Expired => "Token has expired",
        _ => "Invalid token",
    }
}

impl From<UserError> for AuthError {
    fn from(err: UserError) -> Self {
        match err {
            UserError::NotFound(_) => AuthError::UserNotFound,
            UserError::EmailAlreadyExists(email) => AuthError::EmailAlreadyRegistered(email),
            UserError::InvalidName(e) => AuthError::Validation(e.into()),
            UserError::InvalidEmail(e) => AuthError::Validation(e.into()),
            UserError::InvalidUserId(e) => AuthError::Internal(e.to_string()),
            UserError::DatabaseError(msg) => AuthError::Storage(msg),
        }
    }
}

impl From<SessionError> for AuthError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::NotFound => AuthError::InvalidRefreshToken,
            SessionError::DatabaseError(msg) => AuthError::Storage(msg),
        }
    }
}

impl From<SessionError> for UserError {
    fn from(err: SessionError) -> Self {
        UserError::DatabaseError(err.to_string())
    }
}
