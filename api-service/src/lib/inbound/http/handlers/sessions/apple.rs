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

/// Name parts as delivered by the client on first Apple sign-in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppleFullName {
    pub given_name: Option<String>,
    pub family_name: Option<String>,
}

impl AppleFullName {
    fn joined(&self) -> Option<String> {
        let parts: Vec<&str> = [&self.given_name, &self.family_name]
            .into_iter()
            .flatten()
            .map(|part| part.trim())
            .filter(|part| !part.is_empty())
            .collect();

        (!parts.is_empty()).then(|| parts.join(" "))
    }
}

/// `userId` and `authorizationCode` are accepted for client compatibility
/// but play no part in verification.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppleSignInRequest {
    pub user_id: Option<String>,
    #[serde(default)]
    pub identity_token: String,
    pub authorization_code: Option<String>,
    pub email: Option<String>,
    pub full_name: Option<AppleFullName>,
}

pub async fn apple_sign_in(
    State(state): State<AppState>,
    JsonBody(req): JsonBody<AppleSignInRequest>,
) -> Result<ApiSuccess<AuthResponseData>, ApiError> {
    let full_name = req.full_name.as_ref().and_then(AppleFullName::joined);
    let command = OAuthSignInCommand::new(
        IdentityProvider::Apple,
        req.identity_token,
        req.email,
        full_name,
    )
    .map_err(AuthError::from)?;

    state
        .auth_service
        .oauth_sign_in(command)
        .await
        .map_err(ApiError::from)
        .map(|session| ApiSuccess::new(StatusCode::OK, session.into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_name_joined() {
        let name = AppleFullName {
            given_name: Some("Ann".to_string()),
            family_name: Some("Lee".to_string()),
        };
        assert_eq!(name.joined().as_deref(), Some("Ann Lee"));

        let given_only = AppleFullName {
            given_name: Some("Ann".to_string()),
            family_name: Some(" ".to_string()),
        };
        assert_eq!(given_only.joined().as_deref(), Some("Ann"));

        assert_eq!(AppleFullName::default().joined(), None);
    }

    #[test]
    fn test_request_shape() {
        let req: AppleSignInRequest = serde_json::from_str(
            r#"{
                "userId": "001234.abcd",
                "identityToken": "eyJ...",
                "authorizationCode": "c0de",
                "email": "ann@privaterelay.appleid.com",
                "fullName": {"givenName": "Ann", "familyName": null}
            }"#,
        )
        .unwrap();

        assert_eq!(req.identity_token, "eyJ...");
        assert_eq!(req.full_name.and_then(|n| n.joined()).as_deref(), Some("Ann"));
    }
}
