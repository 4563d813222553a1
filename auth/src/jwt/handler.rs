use std::sync::Arc;

use chrono::Duration;
use jsonwebtoken::decode;
use jsonwebtoken::encode;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::Algorithm;
use jsonwebtoken::DecodingKey;
use jsonwebtoken::EncodingKey;
use jsonwebtoken::Header;
use jsonwebtoken::Validation;

use super::claims::AccessClaims;
use super::errors::JwtError;
use crate::clock::Clock;
use crate::clock::SystemClock;

/// Algorithms accepted when validating access tokens.
const HMAC_FAMILY: [Algorithm; 3] = [Algorithm::HS256, Algorithm::HS384, Algorithm::HS512];

/// Issues and validates access tokens.
///
/// Tokens are signed with HS256 using a shared secret. Validation accepts only
/// the HMAC family, so a token whose header declares an asymmetric algorithm
/// is rejected before its signature is even considered.
pub struct JwtHandler {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    algorithm: Algorithm,
    lifetime: Duration,
    clock: Arc<dyn Clock>,
}

impl JwtHandler {
    /// Create a new JWT handler with a secret key.
    ///
    /// # Arguments
    /// * `secret` - Secret key for signing tokens (should be stored securely)
    /// * `lifetime` - Validity window of issued tokens
    ///
    /// # Security Notes
    /// - The secret should be at least 256 bits (32 bytes) for HS256
    /// - Store secrets in environment variables or secure vaults, never in code
    pub fn new(secret: &[u8], lifetime: Duration) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            algorithm: Algorithm::HS256,
            lifetime,
            clock: Arc::new(SystemClock),
        }
    }

    /// Replace the clock used for `iat`/`exp` and expiry checks.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn lifetime(&self) -> Duration {
        self.lifetime
    }

    /// Issue an access token for a subject.
    ///
    /// # Arguments
    /// * `subject` - User identifier placed in `sub`
    /// * `email` - User email placed in `email`
    ///
    /// # Returns
    /// Signed JWT string
    ///
    /// # Errors
    /// * `EncodingFailed` - Token encoding failed
    pub fn issue(&self, subject: &str, email: &str) -> Result<String, JwtError> {
        let claims = AccessClaims::new(subject, email, self.clock.now(), self.lifetime);
        self.encode(&claims)
    }

    /// Sign an explicit claim set.
    pub fn encode(&self, claims: &AccessClaims) -> Result<String, JwtError> {
        let header = Header::new(self.algorithm);

        encode(&header, claims, &self.encoding_key)
            .map_err(|e| JwtError::EncodingFailed(e.to_string()))
    }

    /// Decode and validate an access token.
    ///
    /// # Returns
    /// Verified claims
    ///
    /// # Errors
    /// * `Malformed` - Token cannot be parsed or lacks required claims
    /// * `SignatureInvalid` - Signature mismatch or non-HMAC algorithm
    /// * `Expired` - Current time is at or after `exp`
    /// * `NotYetValid` - Current time is before `nbf`
    pub fn validate(&self, token: &str) -> Result<AccessClaims, JwtError> {
        let mut validation = Validation::new(self.algorithm);
        validation.algorithms = HMAC_FAMILY.to_vec();
        // Time-based checks run against the injected clock below.
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "nbf", "sub"]);

        let token_data =
            decode::<AccessClaims>(token, &self.decoding_key, &validation).map_err(map_decode_error)?;
        let claims = token_data.claims;

        let now = self.clock.now().timestamp();
        if claims.is_expired(now) {
            return Err(JwtError::Expired);
        }
        if claims.is_premature(now) {
            return Err(JwtError::NotYetValid);
        }

        Ok(claims)
    }
}

fn map_decode_error(error: jsonwebtoken::errors::Error) -> JwtError {
    match error.kind() {
        ErrorKind::InvalidSignature
        | ErrorKind::InvalidAlgorithm
        | ErrorKind::InvalidAlgorithmName
        | ErrorKind::InvalidKeyFormat => JwtError::SignatureInvalid,
        ErrorKind::ExpiredSignature => JwtError::Expired,
        ErrorKind::ImmatureSignature => JwtError::NotYetValid,
        _ => JwtError::Malformed(error.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use chrono::Utc;

    use super::*;
    use crate::clock::ManualClock;

    const SECRET: &[u8] = b"my_secret_key_at_least_32_bytes_long!";

    fn handler_at(clock: Arc<ManualClock>) -> JwtHandler {
        JwtHandler::new(SECRET, Duration::hours(24)).with_clock(clock)
    }

    fn start() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap()
    }

    #[test]
    fn test_issue_and_validate() {
        let clock = Arc::new(ManualClock::new(start()));
        let handler = handler_at(clock);

        let token = handler
            .issue("user123", "ann@x.com")
            .expect("Failed to issue token");
        assert!(!token.is_empty());

        let claims = handler.validate(&token).expect("Failed to validate token");
        assert_eq!(claims.sub, "user123");
        assert_eq!(claims.email, "ann@x.com");
        assert_eq!(claims.iat, start().timestamp());
        assert_eq!(claims.nbf, start().timestamp());
        assert_eq!(claims.exp, (start() + Duration::hours(24)).timestamp());
    }

    #[test]
    fn test_expiry_boundary() {
        let clock = Arc::new(ManualClock::new(start()));
        let handler = handler_at(clock.clone());
        let token = handler.issue("user123", "ann@x.com").unwrap();

        clock.set(start() + Duration::hours(24) - Duration::seconds(1));
        assert!(handler.validate(&token).is_ok());

        clock.set(start() + Duration::hours(24));
        assert_eq!(handler.validate(&token), Err(JwtError::Expired));

        clock.set(start() + Duration::days(3));
        assert_eq!(handler.validate(&token), Err(JwtError::Expired));
    }

    #[test]
    fn test_not_yet_valid() {
        let clock = Arc::new(ManualClock::new(start()));
        let handler = handler_at(clock.clone());
        let token = handler.issue("user123", "ann@x.com").unwrap();

        clock.set(start() - Duration::seconds(5));
        assert_eq!(handler.validate(&token), Err(JwtError::NotYetValid));
    }

    #[test]
    fn test_validate_with_wrong_secret() {
        let issuer = JwtHandler::new(b"secret1_at_least_32_bytes_long_key!", Duration::hours(1));
        let verifier = JwtHandler::new(b"secret2_at_least_32_bytes_long_key!", Duration::hours(1));

        let token = issuer.issue("user123", "ann@x.com").unwrap();

        assert_eq!(verifier.validate(&token), Err(JwtError::SignatureInvalid));
    }

    #[test]
    fn test_expired_token_with_wrong_secret_reports_signature() {
        let clock = Arc::new(ManualClock::new(start()));
        let issuer = JwtHandler::new(b"secret1_at_least_32_bytes_long_key!", Duration::hours(1))
            .with_clock(clock.clone());
        let verifier = JwtHandler::new(b"secret2_at_least_32_bytes_long_key!", Duration::hours(1))
            .with_clock(clock.clone());

        let token = issuer.issue("user123", "ann@x.com").unwrap();
        clock.advance(Duration::hours(2));

        assert_eq!(verifier.validate(&token), Err(JwtError::SignatureInvalid));
    }

    #[test]
    fn test_rejects_asymmetric_algorithm() {
        let handler = JwtHandler::new(SECRET, Duration::hours(1));
        let claims = AccessClaims::new("user123", "ann@x.com", Utc::now(), Duration::hours(1));

        let rsa_key = EncodingKey::from_rsa_pem(include_bytes!(
            "../../tests/fixtures/identity_signing_key.pem"
        ))
        .expect("Failed to load RSA fixture");
        let token = encode(&Header::new(Algorithm::RS256), &claims, &rsa_key).unwrap();

        assert_eq!(handler.validate(&token), Err(JwtError::SignatureInvalid));
    }

    #[test]
    fn test_accepts_other_hmac_variants() {
        let handler = JwtHandler::new(SECRET, Duration::hours(1));
        let claims = AccessClaims::new("user123", "ann@x.com", Utc::now(), Duration::hours(1));
        let token = encode(
            &Header::new(Algorithm::HS512),
            &claims,
            &EncodingKey::from_secret(SECRET),
        )
        .unwrap();

        assert_eq!(handler.validate(&token).unwrap().sub, "user123");
    }

    #[test]
    fn test_validate_malformed_token() {
        let handler = JwtHandler::new(SECRET, Duration::hours(1));

        assert!(matches!(
            handler.validate("invalid.token.here"),
            Err(JwtError::Malformed(_))
        ));
        assert!(matches!(handler.validate(""), Err(JwtError::Malformed(_))));
    }

    #[test]
    fn test_missing_required_claim() {
        #[derive(serde::Serialize)]
        struct Partial {
            sub: String,
        }

        let handler = JwtHandler::new(SECRET, Duration::hours(1));
        let token = encode(
            &Header::new(Algorithm::HS256),
            &Partial {
                sub: "user123".to_string(),
            },
            &EncodingKey::from_secret(SECRET),
        )
        .unwrap();

        assert!(matches!(handler.validate(&token), Err(JwtError::Malformed(_))));
    }
}
