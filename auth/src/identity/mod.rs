//! Verification of identity tokens issued by external sign-in providers.
//!
//! Two strategies are provided:
//! - [`AppleIdentityVerifier`] checks RS256 signatures offline against the
//!   provider's published key set, cached in a [`KeySetCache`].
//! - [`GoogleIdentityVerifier`] asks the provider's tokeninfo endpoint.
//!
//! [`DevelopmentIdentityVerifier`] wraps either one and additionally accepts
//! fixed mock tokens. It must only be wired in non-production configuration.

pub mod apple;
pub mod development;
pub mod errors;
pub mod google;
pub mod keys;

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::Deserialize;
use serde::Serialize;

pub use apple::AppleIdentityVerifier;
pub use development::DevelopmentIdentityVerifier;
pub use errors::IdentityError;
pub use google::GoogleIdentityVerifier;
pub use keys::HttpKeySetFetcher;
pub use keys::KeySetCache;
pub use keys::KeySetFetcher;

/// External sign-in providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentityProvider {
    Apple,
    Google,
}

impl IdentityProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdentityProvider::Apple => "apple",
            IdentityProvider::Google => "google",
        }
    }
}

impl fmt::Display for IdentityProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IdentityProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "apple" => Ok(IdentityProvider::Apple),
            "google" => Ok(IdentityProvider::Google),
            other => Err(format!("Unknown identity provider: {}", other)),
        }
    }
}

/// Boolean claim that providers send either as a JSON boolean or as the
/// string `"true"`/`"false"`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum ClaimFlag {
    Bool(bool),
    Text(String),
}

impl ClaimFlag {
    pub(crate) fn is_true(&self) -> bool {
        match self {
            ClaimFlag::Bool(value) => *value,
            ClaimFlag::Text(value) => value == "true",
        }
    }
}

/// Identity asserted by a provider after successful verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedIdentity {
    pub provider: IdentityProvider,
    /// Provider-scoped subject identifier
    pub subject: String,
    pub email: Option<String>,
    pub name: Option<String>,
}

/// Proves that an identity token was issued by a provider for an audience.
#[async_trait]
pub trait IdentityVerifier: Send + Sync + 'static {
    /// Provider this verifier speaks for.
    fn provider(&self) -> IdentityProvider;

    /// Verify an identity token.
    ///
    /// # Arguments
    /// * `identity_token` - Raw token presented by the client
    /// * `expected_audience` - Client identifier the token must be issued to
    ///
    /// # Errors
    /// Any [`IdentityError`]; all are fatal to the current sign-in attempt.
    async fn verify(
        &self,
        identity_token: &str,
        expected_audience: &str,
    ) -> Result<VerifiedIdentity, IdentityError>;
}
