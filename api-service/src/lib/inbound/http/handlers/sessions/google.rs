use auth::IdentityProvider;
use axum::extract::State;
use axum::http::StatusCode;
use serde::Deserialize;

use crate::domain::session::errors::AuthError;
use crate::domain::session::models::OAuthSignInCommand;
use crate::inbound::http::handlers::ApiError;
use crate::inbound::http::handlers::ApiSuccess;
use crate::inbound::http::handlers::AuthResponseData;
use crate::inbound::http::handlers::JsonBody;
use crate::inbound::http::router::AppState;

/// `userId` and `accessToken` are accepted for client compatibility but play
/// no part in verification.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoogleSignInRequest {
    pub user_id: Option<String>,
    #[serde(default)]
    pub id_token: String,
    pub access_token: Option<String>,
    pub email: Option<String>,
    pub full_name: Option<String>,
}

pub async fn google_sign_in(
    State(state): State<AppState>,
    JsonBody(req): JsonBody<GoogleSignInRequest>,
) -> Result<ApiSuccess<AuthResponseData>, ApiError> {
    let command = OAuthSignInCommand::new(
        IdentityProvider::Google,
        req.id_token,
        req.email,
        req.full_name,
    )
    .map_err(AuthError::from)?;

    state
        .auth_service
        .oauth_sign_in(command)
        .await
        .map_err(ApiError::from)
        .map(|session| ApiSuccess::new(StatusCode::OK, session.into()))
}
