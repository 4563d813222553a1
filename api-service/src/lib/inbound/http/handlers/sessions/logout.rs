use axum::extract::State;
use axum::http::StatusCode;

use crate::inbound::http::handlers::sessions::refresh::RefreshRequest;
use crate::inbound::http::handlers::ApiError;
use crate::inbound::http::handlers::JsonBody;
use crate::inbound::http::router::AppState;

/// Revoke the presented refresh token. Access tokens already issued stay
/// valid until they expire.
pub async fn logout(
    State(state): State<AppState>,
    JsonBody(req): JsonBody<RefreshRequest>,
) -> Result<StatusCode, ApiError> {
    state
        .auth_service
        .logout(&req.refresh_token)
        .await
        .map_err(ApiError::from)?;

    Ok(StatusCode::NO_CONTENT)
}
