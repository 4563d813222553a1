use crate::domain::user::models::UserId;
use crate::inbound::http::handlers::ApiError;
use crate::inbound::http::middleware::AuthenticatedUser;

pub mod delete_user;
pub mod get_user;
pub mod update_user;

/// Parse a path user id; malformed ids name no user.
fn parse_user_id(raw: &str) -> Result<UserId, ApiError> {
    UserId::from_string(raw).map_err(|_| ApiError::NotFound("user not found".to_string()))
}

/// Only the account owner may modify an account.
fn ensure_owner(caller: &AuthenticatedUser, target: &UserId) -> Result<(), ApiError> {
    if caller.user_id != *target {
        tracing::warn!(caller = %caller.user_id, target = %target, "Cross-account modification refused");
        return Err(ApiError::Forbidden("forbidden".to_string()));
    }
    Ok(())
}
