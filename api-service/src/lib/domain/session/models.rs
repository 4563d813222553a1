use auth::IdentityProvider;
use chrono::DateTime;
use chrono::Utc;
use uuid::Uuid;

use crate::domain::session::errors::ValidationError;
use crate::domain::user::models::EmailAddress;
use crate::domain::user::models::User;
use crate::domain::user::models::UserId;
use crate::domain::user::models::UserName;

/// Minimum password length accepted at registration.
pub const MIN_PASSWORD_LENGTH: usize = 8;

/// Persisted refresh token record.
///
/// Valid iff not revoked and the current instant is before `expires_at`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshToken {
    pub id: Uuid,
    pub user_id: UserId,
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
}

impl RefreshToken {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn is_revoked(&self) -> bool {
        self.revoked_at.is_some()
    }

    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        !self.is_revoked() && !self.is_expired(now)
    }
}

/// Result of a revocation attempt on an existing token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevokeOutcome {
    /// This call set the revocation timestamp
    Revoked,
    /// Another call had already revoked the token
    AlreadyRevoked,
}

/// Freshly minted access/refresh token pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

/// Outcome of every successful sign-in, registration or refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSession {
    pub tokens: TokenPair,
    pub user: User,
}

/// Command to register a password account.
#[derive(Debug)]
pub struct RegisterCommand {
    pub name: UserName,
    pub email: EmailAddress,
    pub password: String,
}

impl RegisterCommand {
    /// Validate raw registration input.
    ///
    /// # Errors
    /// * `Name` - Name is blank or too long
    /// * `Email` - Email is missing, too long or malformed
    /// * `PasswordTooShort` - Password shorter than 8 characters
    pub fn new(name: String, email: String, password: String) -> Result<Self, ValidationError> {
        let name = UserName::new(name)?;
        let email = EmailAddress::new(email)?;
        if password.chars().count() < MIN_PASSWORD_LENGTH {
            return Err(ValidationError::PasswordTooShort {
                min: MIN_PASSWORD_LENGTH,
            });
        }

        Ok(Self {
            name,
            email,
            password,
        })
    }
}

/// Command to sign in with email and password.
#[derive(Debug)]
pub struct LoginCommand {
    pub email: EmailAddress,
    pub password: String,
}

impl LoginCommand {
    /// # Errors
    /// * `Email` - Email is missing, too long or malformed
    /// * `PasswordRequired` - Password is empty
    pub fn new(email: String, password: String) -> Result<Self, ValidationError> {
        let email = EmailAddress::new(email)?;
        if password.is_empty() {
            return Err(ValidationError::PasswordRequired);
        }

        Ok(Self { email, password })
    }
}

/// Command to sign in with an external identity token.
///
/// `fallback_email` is only consulted when the provider does not assert an
/// email, and is validated at that point.
#[derive(Debug)]
pub struct OAuthSignInCommand {
    pub provider: IdentityProvider,
    pub identity_token: String,
    pub fallback_email: Option<String>,
    pub full_name: Option<String>,
}

impl OAuthSignInCommand {
    /// # Errors
    /// * `IdentityTokenRequired` - Token is empty
    pub fn new(
        provider: IdentityProvider,
        identity_token: String,
        fallback_email: Option<String>,
        full_name: Option<String>,
    ) -> Result<Self, ValidationError> {
        if identity_token.is_empty() {
            return Err(ValidationError::IdentityTokenRequired);
        }

        Ok(Self {
            provider,
            identity_token,
            fallback_email: fallback_email.filter(|e| !e.is_empty()),
            full_name: full_name.filter(|n| !n.trim().is_empty()),
        })
    }
}
