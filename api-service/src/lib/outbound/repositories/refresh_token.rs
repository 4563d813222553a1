use std::time::Duration;

use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::session::errors::SessionError;
use crate::domain::session::models::RefreshToken;
use crate::domain::session::models::RevokeOutcome;
use crate::domain::session::ports::RefreshTokenRepository;
use crate::domain::user::models::UserId;
use crate::outbound::repositories::timeouts::with_timeout;

#[derive(sqlx::FromRow)]
struct RefreshTokenRow {
    id: Uuid,
    user_id: Uuid,
    token: String,
    expires_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
    revoked_at: Option<DateTime<Utc>>,
}

impl From<RefreshTokenRow> for RefreshToken {
    fn from(r: RefreshTokenRow) -> Self {
        RefreshToken {
            id: r.id,
            user_id: UserId(r.user_id),
            token: r.token,
            expires_at: r.expires_at,
            created_at: r.created_at,
            revoked_at: r.revoked_at,
        }
    }
}

fn database_error(e: impl ToString) -> SessionError {
    SessionError::DatabaseError(e.to_string())
}

pub struct PostgresRefreshTokenRepository {
    pool: PgPool,
    query_timeout: Duration,
}

impl PostgresRefreshTokenRepository {
    pub fn new(pool: PgPool, query_timeout: Duration) -> Self {
        Self {
            pool,
            query_timeout,
        }
    }
}

#[async_trait]
impl RefreshTokenRepository for PostgresRefreshTokenRepository {
    async fn create(&self, token: RefreshToken) -> Result<RefreshToken, SessionError> {
        with_timeout(
            self.query_timeout,
            sqlx::query(
                r#"
                INSERT INTO refresh_tokens (id, user_id, token, expires_at, created_at, revoked_at)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(token.id)
            .bind(token.user_id.0)
            .bind(&token.token)
            .bind(token.expires_at)
            .bind(token.created_at)
            .bind(token.revoked_at)
            .execute(&self.pool),
        )
        .await
        .map_err(database_error)?;

        Ok(token)
    }

    async fn find_by_token(&self, token: &str) -> Result<Option<RefreshToken>, SessionError> {
        let row = with_timeout(
            self.query_timeout,
            sqlx::query_as::<_, RefreshTokenRow>(
                r#"
                SELECT id, user_id, token, expires_at, created_at, revoked_at
                FROM refresh_tokens
                WHERE token = $1
                "#,
            )
            .bind(token)
            .fetch_optional(&self.pool),
        )
        .await
        .map_err(database_error)?;

        Ok(row.map(RefreshToken::from))
    }

    async fn find_by_user_id(&self, user_id: &UserId) -> Result<Vec<RefreshToken>, SessionError> {
        let rows = with_timeout(
            self.query_timeout,
            sqlx::query_as::<_, RefreshTokenRow>(
                r#"
                SELECT id, user_id, token, expires_at, created_at, revoked_at
                FROM refresh_tokens
                WHERE user_id = $1
                ORDER BY created_at DESC
                "#,
            )
            .bind(user_id.0)
            .fetch_all(&self.pool),
        )
        .await
        .map_err(database_error)?;

        Ok(rows.into_iter().map(RefreshToken::from).collect())
    }

    async fn revoke(&self, token: &str, at: DateTime<Utc>) -> Result<RevokeOutcome, SessionError> {
        let result = with_timeout(
            self.query_timeout,
            sqlx::query(
                r#"
                UPDATE refresh_tokens
                SET revoked_at = $2
                WHERE token = $1 AND revoked_at IS NULL
                "#,
            )
            .bind(token)
            .bind(at)
            .execute(&self.pool),
        )
        .await
        .map_err(database_error)?;

        if result.rows_affected() > 0 {
            return Ok(RevokeOutcome::Revoked);
        }

        // Nothing updated: either already revoked or never issued.
        match self.find_by_token(token).await? {
            Some(_) => Ok(RevokeOutcome::AlreadyRevoked),
            None => Err(SessionError::NotFound),
        }
    }

    async fn revoke_all_for_user(
        &self,
        user_id: &UserId,
        at: DateTime<Utc>,
    ) -> Result<u64, SessionError> {
        let result = with_timeout(
            self.query_timeout,
            sqlx::query(
                r#"
                UPDATE refresh_tokens
                SET revoked_at = $2
                WHERE user_id = $1 AND revoked_at IS NULL
                "#,
            )
            .bind(user_id.0)
            .bind(at)
            .execute(&self.pool),
        )
        .await
        .map_err(database_error)?;

        Ok(result.rows_affected())
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, SessionError> {
        let result = with_timeout(
            self.query_timeout,
            sqlx::query(
                r#"
                DELETE FROM refresh_tokens
                WHERE expires_at <= $1
                "#,
            )
            .bind(now)
            .execute(&self.pool),
        )
        .await
        .map_err(database_error)?;

        Ok(result.rows_affected())
    }
}
