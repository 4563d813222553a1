use std::sync::Arc;

use async_trait::async_trait;

use super::errors::IdentityError;
use super::IdentityProvider;
use super::IdentityVerifier;
use super::VerifiedIdentity;

/// Tokens accepted without contacting the provider.
pub const MOCK_IDENTITY_TOKENS: [&str; 2] = ["mock-token", "mock-id-token"];

/// Accepts fixed mock tokens and delegates everything else.
///
/// Mock identities carry no email, so the caller's supplied email decides
/// which account is signed in. Never enable outside local development.
pub struct DevelopmentIdentityVerifier {
    inner: Arc<dyn IdentityVerifier>,
}

impl DevelopmentIdentityVerifier {
    pub fn new(inner: Arc<dyn IdentityVerifier>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl IdentityVerifier for DevelopmentIdentityVerifier {
    fn provider(&self) -> IdentityProvider {
        self.inner.provider()
    }

    async fn verify(
        &self,
        identity_token: &str,
        expected_audience: &str,
    ) -> Result<VerifiedIdentity, IdentityError> {
        if MOCK_IDENTITY_TOKENS.contains(&identity_token) {
            let provider = self.inner.provider();
            tracing::warn!(provider = %provider, "Accepting mock identity token");
            return Ok(VerifiedIdentity {
                provider,
                subject: format!("mock-{}-subject", provider),
                email: None,
                name: None,
            });
        }

        self.inner.verify(identity_token, expected_audience).await
    }
}
