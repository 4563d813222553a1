use std::sync::Arc;

use auth::generate_refresh_token;
use auth::Clock;
use chrono::DateTime;
use chrono::Duration;
use chrono::Utc;
use uuid::Uuid;

use crate::domain::session::errors::SessionError;
use crate::domain::session::models::RefreshToken;
use crate::domain::session::models::RevokeOutcome;
use crate::domain::session::ports::RefreshTokenRepository;
use crate::domain::user::models::UserId;

/// Refresh token lifecycle over a repository: issue, look up, revoke, sweep.
///
/// All validity decisions use the store's clock.
pub struct RefreshTokenStore<TR>
where
    TR: RefreshTokenRepository,
{
    repository: Arc<TR>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl<TR> Clone for RefreshTokenStore<TR>
where
    TR: RefreshTokenRepository,
{
    fn clone(&self) -> Self {
        Self {
            repository: Arc::clone(&self.repository),
            ttl: self.ttl,
            clock: Arc::clone(&self.clock),
        }
    }
}

impl<TR> RefreshTokenStore<TR>
where
    TR: RefreshTokenRepository,
{
    /// # Arguments
    /// * `repository` - Refresh token persistence
    /// * `ttl` - Lifetime of issued tokens
    /// * `clock` - Time source for expiry and revocation timestamps
    pub fn new(repository: Arc<TR>, ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            repository,
            ttl,
            clock,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Mint and persist a new refresh token for a user.
    pub async fn issue(&self, user_id: &UserId) -> Result<RefreshToken, SessionError> {
        let now = self.clock.now();
        let record = RefreshToken {
            id: Uuid::new_v4(),
            user_id: *user_id,
            token: generate_refresh_token(),
            expires_at: now + self.ttl,
            created_at: now,
            revoked_at: None,
        };

        self.repository.create(record).await
    }

    /// # Errors
    /// * `NotFound` - Token was never issued, or has been swept
    pub async fn lookup(&self, token: &str) -> Result<RefreshToken, SessionError> {
        self.repository
            .find_by_token(token)
            .await?
            .ok_or(SessionError::NotFound)
    }

    pub fn is_valid(&self, record: &RefreshToken) -> bool {
        record.is_valid(self.clock.now())
    }

    /// Revoke a token, reporting whether this call did the revocation.
    pub async fn revoke(&self, token: &str) -> Result<RevokeOutcome, SessionError> {
        self.repository.revoke(token, self.clock.now()).await
    }

    pub async fn revoke_all(&self, user_id: &UserId) -> Result<u64, SessionError> {
        self.repository
            .revoke_all_for_user(user_id, self.clock.now())
            .await
    }

    pub async fn sweep_expired(&self) -> Result<u64, SessionError> {
        self.repository.delete_expired(self.clock.now()).await
    }

    pub async fn list_for_user(&self, user_id: &UserId) -> Result<Vec<RefreshToken>, SessionError> {
        self.repository.find_by_user_id(user_id).await
    }
}
