//! Query timeout wrapper for repository calls.

use std::future::Future;
use std::time::Duration;

use tokio::time::timeout;

/// Default bound on a single database statement.
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("Database operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("{0}")]
    Database(#[from] sqlx::Error),
}

impl QueryError {
    /// Name of the violated unique constraint, if that is what failed.
    pub fn unique_violation(&self) -> Option<&str> {
        match self {
            QueryError::Database(e) => e
                .as_database_error()
                .filter(|db_err| db_err.is_unique_violation())
                .and_then(|db_err| db_err.constraint()),
            QueryError::Timeout(_) => None,
        }
    }
}

/// Run a sqlx future, failing with `Timeout` once `duration` elapses.
pub async fn with_timeout<F, T>(duration: Duration, future: F) -> Result<T, QueryError>
where
    F: Future<Output = Result<T, sqlx::Error>>,
{
    match timeout(duration, future).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(QueryError::Timeout(duration)),
    }
}
