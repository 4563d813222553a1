use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::session::ports::RefreshTokenRepository;
use crate::domain::session::refresh_tokens::RefreshTokenStore;
use crate::domain::user::models::UpdateUserCommand;
use crate::domain::user::models::User;
use crate::domain::user::models::UserId;
use crate::user::errors::UserError;
use crate::user::ports::UserRepository;
use crate::user::ports::UserServicePort;

/// Domain service implementation for user profile operations.
///
/// Concrete implementation of UserServicePort with dependency injection.
pub struct UserService<UR, TR>
where
    UR: UserRepository,
    TR: RefreshTokenRepository,
{
    repository: Arc<UR>,
    refresh_tokens: RefreshTokenStore<TR>,
}

impl<UR, TR> UserService<UR, TR>
where
    UR: UserRepository,
    TR: RefreshTokenRepository,
{
    /// Create a new user service with injected dependencies.
    ///
    /// # Arguments
    /// * `repository` - User persistence implementation
    /// * `refresh_tokens` - Refresh token lifecycle, for revocation on delete
    ///
    /// # Returns
    /// Configured user service instance
    pub fn new(repository: Arc<UR>, refresh_tokens: RefreshTokenStore<TR>) -> Self {
        Self {
            repository,
            refresh_tokens,
        }
    }
}

#[async_trait]
impl<UR, TR> UserServicePort for UserService<UR, TR>
where
    UR: UserRepository,
    TR: RefreshTokenRepository,
{
    async fn get_user(&self, id: &UserId) -> Result<User, UserError> {
        self.repository
            .find_by_id(id)
            .await?
            .ok_or(UserError::NotFound(id.to_string()))
    }

    async fn update_user(
        &self,
        id: &UserId,
        command: UpdateUserCommand,
    ) -> Result<User, UserError> {
        let mut user = self
            .repository
            .find_by_id(id)
            .await?
            .ok_or(UserError::NotFound(id.to_string()))?;

        if let Some(new_name) = command.name {
            user.name = new_name;
        }

        if let Some(new_email) = command.email {
            user.email = new_email;
        }

        if let Some(avatar_url) = command.avatar_url {
            user.avatar_url = Some(avatar_url);
        }

        user.updated_at = self.refresh_tokens.now();

        let updated_user = self.repository.update(user).await?;
        tracing::info!(user_id = %updated_user.id, "User updated");

        Ok(updated_user)
    }

    async fn delete_user(&self, id: &UserId) -> Result<(), UserError> {
        let revoked = self.refresh_tokens.revoke_all(id).await?;
        self.repository.delete(id).await?;

        tracing::info!(user_id = %id, revoked, "User deleted");
        Ok(())
    }

    async fn count_users(&self) -> Result<u64, UserError> {
        self.repository.count().await
    }
}
