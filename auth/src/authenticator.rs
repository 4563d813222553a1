use std::sync::OnceLock;

use chrono::Duration;

use crate::jwt::AccessClaims;
use crate::jwt::JwtError;
use crate::jwt::JwtHandler;
use crate::password::PasswordError;
use crate::password::PasswordHasher;

/// Authentication coordinator combining password verification and access
/// token issuance.
///
/// Password operations are CPU-bound and block; async callers should run them
/// on a blocking thread.
///
/// Rejections for accounts without a stored hash still run one bcrypt
/// verification, against a hash of a fixed password at the configured cost,
/// so they take as long as a wrong password.
pub struct Authenticator {
    password_hasher: PasswordHasher,
    jwt_handler: JwtHandler,
    dummy_hash: OnceLock<String>,
}

const DUMMY_PASSWORD: &str = "no-account-dummy-password";

/// Result of successful credential authentication.
#[derive(Debug, Clone)]
pub struct AuthenticationResult {
    /// Signed access token
    pub access_token: String,
    /// Validity window of `access_token` in seconds
    pub expires_in: i64,
}

/// Authentication operation errors.
#[derive(Debug, thiserror::Error)]
pub enum AuthenticationError {
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Password error: {0}")]
    PasswordError(#[from] PasswordError),

    #[error("JWT error: {0}")]
    JwtError(#[from] JwtError),
}

impl Authenticator {
    /// Create a new authenticator.
    ///
    /// # Arguments
    /// * `password_hasher` - Hasher used for stored credentials
    /// * `jwt_handler` - Issuer and validator of access tokens
    pub fn new(password_hasher: PasswordHasher, jwt_handler: JwtHandler) -> Self {
        Self {
            password_hasher,
            jwt_handler,
            dummy_hash: OnceLock::new(),
        }
    }

    /// Hash a password for storage.
    ///
    /// # Errors
    /// * `PasswordError` - Hashing operation failed
    pub fn hash_password(&self, password: &str) -> Result<String, PasswordError> {
        self.password_hasher.hash(password)
    }

    /// Check a password against a stored hash.
    pub fn verify_password(&self, password: &str, hash: &str) -> Result<bool, PasswordError> {
        self.password_hasher.verify(password, hash)
    }

    /// Spend one password verification on a login that has nothing to verify
    /// against, such as an unknown email. The outcome is discarded.
    pub fn verify_against_dummy(&self, password: &str) {
        let _ = self.password_hasher.verify(password, self.dummy_hash());
    }

    fn dummy_hash(&self) -> &str {
        self.dummy_hash.get_or_init(|| {
            self.password_hasher
                .hash(DUMMY_PASSWORD)
                .unwrap_or_else(|e| {
                    tracing::error!(error = %e, "Failed to prepare dummy password hash");
                    String::new()
                })
        })
    }

    /// Verify credentials and issue an access token.
    ///
    /// # Arguments
    /// * `password` - Plaintext password to verify
    /// * `stored_hash` - Stored password hash; `None` for accounts without one
    /// * `subject` - User identifier for the token
    /// * `email` - User email for the token
    ///
    /// # Errors
    /// * `InvalidCredentials` - No stored hash, or the password does not match
    /// * `PasswordError` - Stored hash is unusable
    /// * `JwtError` - Token generation failed
    pub fn authenticate(
        &self,
        password: &str,
        stored_hash: Option<&str>,
        subject: &str,
        email: &str,
    ) -> Result<AuthenticationResult, AuthenticationError> {
        let Some(stored_hash) = stored_hash else {
            self.verify_against_dummy(password);
            return Err(AuthenticationError::InvalidCredentials);
        };

        if !self.password_hasher.verify(password, stored_hash)? {
            return Err(AuthenticationError::InvalidCredentials);
        }

        let access_token = self.jwt_handler.issue(subject, email)?;

        Ok(AuthenticationResult {
            access_token,
            expires_in: self.access_token_lifetime().num_seconds(),
        })
    }

    /// Issue an access token without password verification.
    ///
    /// Used once identity has been established by other means, such as a
    /// refresh token or an external identity provider.
    pub fn issue_access_token(&self, subject: &str, email: &str) -> Result<String, JwtError> {
        self.jwt_handler.issue(subject, email)
    }

    /// Validate and decode an access token.
    ///
    /// # Errors
    /// * `JwtError` - Token validation or decoding failed
    pub fn validate_token(&self, token: &str) -> Result<AccessClaims, JwtError> {
        self.jwt_handler.validate(token)
    }

    pub fn access_token_lifetime(&self) -> Duration {
        self.jwt_handler.lifetime()
    }
}
