use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::Duration;
use jsonwebtoken::decode;
use jsonwebtoken::decode_header;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::Algorithm;
use jsonwebtoken::Validation;
use serde::Deserialize;

use super::errors::IdentityError;
use super::keys::HttpKeySetFetcher;
use super::keys::KeySetCache;
use super::keys::KeySetFetcher;
use super::ClaimFlag;
use super::IdentityProvider;
use super::IdentityVerifier;
use super::VerifiedIdentity;
use crate::clock::Clock;
use crate::clock::SystemClock;

pub const APPLE_ISSUER: &str = "https://appleid.apple.com";
pub const APPLE_KEYS_URL: &str = "https://appleid.apple.com/auth/keys";

const KEY_REFRESH_INTERVAL_HOURS: i64 = 24;
const FORCED_REFRESH_INTERVAL_MINUTES: i64 = 5;
const KEY_FETCH_TIMEOUT: StdDuration = StdDuration::from_secs(10);

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Audience {
    Single(String),
    Multiple(Vec<String>),
}

impl Audience {
    fn contains(&self, expected: &str) -> bool {
        match self {
            Audience::Single(aud) => aud == expected,
            Audience::Multiple(auds) => auds.iter().any(|aud| aud == expected),
        }
    }
}

#[derive(Debug, Deserialize)]
struct AppleClaims {
    iss: String,
    aud: Audience,
    exp: i64,
    sub: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    email_verified: Option<ClaimFlag>,
}

/// Verifies Sign in with Apple identity tokens offline.
///
/// Signatures are checked against Apple's published RSA keys. Issuer,
/// audience and expiry are checked in that order after the signature, so a
/// token failing several checks reports the first. An email the token marks
/// as unverified is refused; Apple omits the flag for tokens without email.
pub struct AppleIdentityVerifier {
    keys: KeySetCache,
    clock: Arc<dyn Clock>,
}

impl AppleIdentityVerifier {
    /// Create a verifier reading keys from Apple's public endpoint.
    ///
    /// # Errors
    /// * `KeyFetch` - HTTP client could not be constructed
    pub fn new() -> Result<Self, IdentityError> {
        let fetcher = HttpKeySetFetcher::new(APPLE_KEYS_URL, KEY_FETCH_TIMEOUT)?;
        Ok(Self::with_fetcher(Arc::new(fetcher), Arc::new(SystemClock)))
    }

    /// Create a verifier over an arbitrary key source and clock.
    pub fn with_fetcher(fetcher: Arc<dyn KeySetFetcher>, clock: Arc<dyn Clock>) -> Self {
        let keys = KeySetCache::new(
            fetcher,
            clock.clone(),
            Duration::hours(KEY_REFRESH_INTERVAL_HOURS),
            Duration::minutes(FORCED_REFRESH_INTERVAL_MINUTES),
        );
        Self { keys, clock }
    }
}

#[async_trait]
impl IdentityVerifier for AppleIdentityVerifier {
    fn provider(&self) -> IdentityProvider {
        IdentityProvider::Apple
    }

    async fn verify(
        &self,
        identity_token: &str,
        expected_audience: &str,
    ) -> Result<VerifiedIdentity, IdentityError> {
        let refreshed = self.keys.ensure_fresh().await?;

        let header =
            decode_header(identity_token).map_err(|e| IdentityError::MalformedToken(e.to_string()))?;
        let kid = header
            .kid
            .ok_or_else(|| IdentityError::MalformedToken("missing kid header".to_string()))?;

        if !matches!(header.alg, Algorithm::RS256 | Algorithm::RS384 | Algorithm::RS512) {
            return Err(IdentityError::UnexpectedAlgorithm(format!("{:?}", header.alg)));
        }

        // A snapshot fetched during this call is current; refetching it again
        // for an unknown kid would gain nothing.
        let key = self.keys.key(&kid, !refreshed).await?;

        let mut validation = Validation::new(header.alg);
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.set_required_spec_claims(&["iss", "aud", "exp", "sub"]);

        let claims = decode::<AppleClaims>(identity_token, &key, &validation)
            .map_err(|e| match e.kind() {
                ErrorKind::InvalidSignature => IdentityError::InvalidSignature,
                _ => IdentityError::MalformedToken(e.to_string()),
            })?
            .claims;

        if claims.iss != APPLE_ISSUER {
            return Err(IdentityError::InvalidIssuer(claims.iss));
        }
        if !claims.aud.contains(expected_audience) {
            return Err(IdentityError::InvalidAudience(expected_audience.to_string()));
        }
        if self.clock.now().timestamp() >= claims.exp {
            return Err(IdentityError::Expired);
        }
        if claims
            .email_verified
            .as_ref()
            .is_some_and(|flag| !flag.is_true())
        {
            return Err(IdentityError::EmailNotVerified);
        }

        Ok(VerifiedIdentity {
            provider: IdentityProvider::Apple,
            subject: claims.sub,
            email: claims.email.filter(|e| !e.is_empty()),
            name: None,
        })
    }
}
