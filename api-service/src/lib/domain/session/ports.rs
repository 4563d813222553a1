use async_trait::async_trait;
use auth::AccessClaims;
use chrono::DateTime;
use chrono::Utc;

use crate::domain::session::errors::AuthError;
use crate::domain::session::errors::SessionError;
use crate::domain::session::models::AuthSession;
use crate::domain::session::models::LoginCommand;
use crate::domain::session::models::OAuthSignInCommand;
use crate::domain::session::models::RefreshToken;
use crate::domain::session::models::RegisterCommand;
use crate::domain::session::models::RevokeOutcome;
use crate::domain::user::models::User;
use crate::domain::user::models::UserId;

/// Port for authentication and session lifecycle operations.
#[async_trait]
pub trait AuthServicePort: Send + Sync + 'static {
    /// Create a password account and start a session.
    ///
    /// # Errors
    /// * `EmailAlreadyRegistered` - Email is taken
    /// * `Storage` - Persistence failed
    async fn register(&self, command: RegisterCommand) -> Result<AuthSession, AuthError>;

    /// Sign in with email and password.
    ///
    /// # Errors
    /// * `InvalidCredentials` - Unknown email, account without a password or
    ///   wrong password, all reported identically
    async fn login(&self, command: LoginCommand) -> Result<AuthSession, AuthError>;

    /// Sign in with an external identity token, creating the account on
    /// first use.
    ///
    /// # Errors
    /// * `UnsupportedProvider` - Provider is not configured
    /// * `ExternalVerification` - Token rejected by the provider verifier
    /// * `Validation` - No usable email from the token or the request
    async fn oauth_sign_in(&self, command: OAuthSignInCommand) -> Result<AuthSession, AuthError>;

    /// Rotate a refresh token into a new session.
    ///
    /// # Errors
    /// * `InvalidRefreshToken` - Token was never issued
    /// * `RefreshTokenExpired` - Token is past its expiry
    /// * `RefreshTokenRevoked` - Token was revoked, including by a concurrent
    ///   rotation of the same token
    /// * `UserNotFound` - Token owner no longer exists
    async fn refresh(&self, refresh_token: &str) -> Result<AuthSession, AuthError>;

    /// Resolve the user named by validated access token claims.
    ///
    /// # Errors
    /// * `UserNotFound` - Subject does not exist
    async fn current_user(&self, claims: &AccessClaims) -> Result<User, AuthError>;

    /// Revoke a single refresh token. Revoking an already revoked token
    /// succeeds.
    ///
    /// # Errors
    /// * `InvalidRefreshToken` - Token was never issued
    async fn logout(&self, refresh_token: &str) -> Result<(), AuthError>;

    /// Revoke every outstanding refresh token of a user.
    ///
    /// # Returns
    /// Number of tokens revoked by this call
    async fn logout_everywhere(&self, user_id: &UserId) -> Result<u64, AuthError>;

    /// Delete expired refresh tokens, revoked or not.
    ///
    /// # Returns
    /// Number of records deleted
    async fn sweep_expired_sessions(&self) -> Result<u64, AuthError>;

    /// Validate an access token.
    ///
    /// # Errors
    /// * `AccessToken` - Token is malformed, forged, expired or premature
    fn authenticate(&self, access_token: &str) -> Result<AccessClaims, AuthError>;
}

/// Persistence operations for refresh tokens.
#[async_trait]
pub trait RefreshTokenRepository: Send + Sync + 'static {
    /// Persist a new refresh token.
    ///
    /// # Errors
    /// * `DatabaseError` - Database operation failed
    async fn create(&self, token: RefreshToken) -> Result<RefreshToken, SessionError>;

    /// Retrieve a record by its token string.
    async fn find_by_token(&self, token: &str) -> Result<Option<RefreshToken>, SessionError>;

    /// Retrieve every record owned by a user, newest first.
    async fn find_by_user_id(&self, user_id: &UserId) -> Result<Vec<RefreshToken>, SessionError>;

    /// Set `revoked_at` if and only if it is not already set.
    ///
    /// # Errors
    /// * `NotFound` - No record with this token
    /// * `DatabaseError` - Database operation failed
    async fn revoke(&self, token: &str, at: DateTime<Utc>) -> Result<RevokeOutcome, SessionError>;

    /// Revoke every unrevoked record of a user.
    ///
    /// # Returns
    /// Number of records revoked
    async fn revoke_all_for_user(
        &self,
        user_id: &UserId,
        at: DateTime<Utc>,
    ) -> Result<u64, SessionError>;

    /// Delete every record with `expires_at <= now`.
    ///
    /// # Returns
    /// Number of records deleted
    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, SessionError>;
}
