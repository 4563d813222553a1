use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use super::errors::IdentityError;
use super::ClaimFlag;
use super::IdentityProvider;
use super::IdentityVerifier;
use super::VerifiedIdentity;

pub const GOOGLE_TOKENINFO_URL: &str = "https://oauth2.googleapis.com/tokeninfo";

const TOKENINFO_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct TokenInfo {
    sub: String,
    #[serde(default)]
    aud: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    email_verified: Option<ClaimFlag>,
    #[serde(default)]
    name: Option<String>,
}

/// Verifies Google identity tokens through the tokeninfo endpoint.
pub struct GoogleIdentityVerifier {
    endpoint: String,
    client: reqwest::Client,
}

impl GoogleIdentityVerifier {
    /// Create a verifier against Google's public endpoint.
    pub fn new() -> Result<Self, IdentityError> {
        Self::with_endpoint(GOOGLE_TOKENINFO_URL)
    }

    /// Create a verifier against an arbitrary tokeninfo-compatible endpoint.
    ///
    /// # Errors
    /// * `Verification` - HTTP client could not be constructed
    pub fn with_endpoint(endpoint: impl Into<String>) -> Result<Self, IdentityError> {
        let client = reqwest::Client::builder()
            .timeout(TOKENINFO_TIMEOUT)
            .build()
            .map_err(|e| IdentityError::Verification(e.to_string()))?;

        Ok(Self {
            endpoint: endpoint.into(),
            client,
        })
    }
}

#[async_trait]
impl IdentityVerifier for GoogleIdentityVerifier {
    fn provider(&self) -> IdentityProvider {
        IdentityProvider::Google
    }

    /// An empty `expected_audience` skips the audience check.
    async fn verify(
        &self,
        identity_token: &str,
        expected_audience: &str,
    ) -> Result<VerifiedIdentity, IdentityError> {
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[("id_token", identity_token)])
            .send()
            .await
            .map_err(|e| IdentityError::Verification(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            tracing::debug!(status = %status, "Tokeninfo rejected identity token");
            return Err(IdentityError::Verification(format!(
                "tokeninfo returned HTTP {}",
                status.as_u16()
            )));
        }

        let info: TokenInfo = response
            .json()
            .await
            .map_err(|e| IdentityError::Verification(e.to_string()))?;

        if !expected_audience.is_empty() && info.aud.as_deref() != Some(expected_audience) {
            return Err(IdentityError::InvalidAudience(
                info.aud.unwrap_or_default(),
            ));
        }

        if !info.email_verified.as_ref().is_some_and(ClaimFlag::is_true) {
            return Err(IdentityError::EmailNotVerified);
        }

        Ok(VerifiedIdentity {
            provider: IdentityProvider::Google,
            subject: info.sub,
            email: info.email.filter(|e| !e.is_empty()),
            name: info.name.filter(|n| !n.trim().is_empty()),
        })
    }
}
