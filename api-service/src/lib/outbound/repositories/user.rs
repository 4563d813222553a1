use std::time::Duration;

use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::user::models::EmailAddress;
use crate::domain::user::models::User;
use crate::domain::user::models::UserId;
use crate::domain::user::models::UserName;
use crate::domain::user::ports::UserRepository;
use crate::outbound::repositories::timeouts::with_timeout;
use crate::outbound::repositories::timeouts::QueryError;
use crate::user::errors::UserError;

const EMAIL_UNIQUE_CONSTRAINT: &str = "users_email_key";

#[derive(sqlx::FromRow)]
struct UserRow {
    id: Uuid,
    name: String,
    email: String,
    password_hash: Option<String>,
    avatar_url: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<UserRow> for User {
    type Error = UserError;

    fn try_from(r: UserRow) -> Result<Self, Self::Error> {
        Ok(User {
            id: UserId(r.id),
            name: UserName::new(r.name)?,
            email: EmailAddress::new(r.email)?,
            password_hash: r.password_hash,
            avatar_url: r.avatar_url,
            created_at: r.created_at,
            updated_at: r.updated_at,
        })
    }
}

pub struct PostgresUserRepository {
    pool: PgPool,
    query_timeout: Duration,
}

impl PostgresUserRepository {
    pub fn new(pool: PgPool, query_timeout: Duration) -> Self {
        Self {
            pool,
            query_timeout,
        }
    }

    fn map_write_error(e: QueryError, user: &User) -> UserError {
        if e.unique_violation() == Some(EMAIL_UNIQUE_CONSTRAINT) {
            return UserError::EmailAlreadyExists(user.email.as_str().to_string());
        }
        UserError::DatabaseError(e.to_string())
    }
}

#[async_trait]
impl UserRepository for PostgresUserRepository {
    async fn create(&self, user: User) -> Result<User, UserError> {
        with_timeout(
            self.query_timeout,
            sqlx::query(
                r#"
                INSERT INTO users (id, name, email, password_hash, avatar_url, created_at, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(user.id.0)
            .bind(user.name.as_str())
            .bind(user.email.as_str())
            .bind(user.password_hash.as_deref())
            .bind(user.avatar_url.as_deref())
            .bind(user.created_at)
            .bind(user.updated_at)
            .execute(&self.pool),
        )
        .await
        .map_err(|e| Self::map_write_error(e, &user))?;

        Ok(user)
    }

    async fn find_by_id(&self, id: &UserId) -> Result<Option<User>, UserError> {
        let row = with_timeout(
            self.query_timeout,
            sqlx::query_as::<_, UserRow>(
                r#"
                SELECT id, name, email, password_hash, avatar_url, created_at, updated_at
                FROM users
                WHERE id = $1
                "#,
            )
            .bind(id.0)
            .fetch_optional(&self.pool),
        )
        .await
        .map_err(|e| UserError::DatabaseError(e.to_string()))?;

        row.map(User::try_from).transpose()
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, UserError> {
        let row = with_timeout(
            self.query_timeout,
            sqlx::query_as::<_, UserRow>(
                r#"
                SELECT id, name, email, password_hash, avatar_url, created_at, updated_at
                FROM users
                WHERE email = $1
                "#,
            )
            .bind(email)
            .fetch_optional(&self.pool),
        )
        .await
        .map_err(|e| UserError::DatabaseError(e.to_string()))?;

        row.map(User::try_from).transpose()
    }

    async fn update(&self, user: User) -> Result<User, UserError> {
        let result = with_timeout(
            self.query_timeout,
            sqlx::query(
                r#"
                UPDATE users
                SET name = $2, email = $3, avatar_url = $4, updated_at = $5
                WHERE id = $1
                "#,
            )
            .bind(user.id.0)
            .bind(user.name.as_str())
            .bind(user.email.as_str())
            .bind(user.avatar_url.as_deref())
            .bind(user.updated_at)
            .execute(&self.pool),
        )
        .await
        .map_err(|e| Self::map_write_error(e, &user))?;

        if result.rows_affected() == 0 {
            return Err(UserError::NotFound(user.id.to_string()));
        }

        Ok(user)
    }

    async fn delete(&self, id: &UserId) -> Result<(), UserError> {
        let result = with_timeout(
            self.query_timeout,
            sqlx::query(
                r#"
                DELETE FROM users
                WHERE id = $1
                "#,
            )
            .bind(id.0)
            .execute(&self.pool),
        )
        .await
        .map_err(|e| UserError::DatabaseError(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(UserError::NotFound(id.to_string()));
        }

        Ok(())
    }

    async fn count(&self) -> Result<u64, UserError> {
        let count: i64 = with_timeout(
            self.query_timeout,
            sqlx::query_scalar("SELECT COUNT(*) FROM users").fetch_one(&self.pool),
        )
        .await
        .map_err(|e| UserError::DatabaseError(e.to_string()))?;

        Ok(count.max(0) as u64)
    }
}
