use chrono::DateTime;
use chrono::Duration;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;

/// Claim set carried by an access token.
///
/// Binds a subject identifier and email to a validity window. All timestamps
/// are Unix seconds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccessClaims {
    /// Subject (user identifier)
    pub sub: String,

    /// Email address of the subject at issuance
    pub email: String,

    /// Issued at
    pub iat: i64,

    /// Not before
    pub nbf: i64,

    /// Expiration time
    pub exp: i64,
}

impl AccessClaims {
    /// Create claims valid from `issued_at` for `lifetime`.
    ///
    /// # Arguments
    /// * `subject` - Unique user identifier
    /// * `email` - User email address
    /// * `issued_at` - Issuance instant (also used as `nbf`)
    /// * `lifetime` - Duration until the token expires
    pub fn new(
        subject: impl ToString,
        email: impl ToString,
        issued_at: DateTime<Utc>,
        lifetime: Duration,
    ) -> Self {
        let iat = issued_at.timestamp();
        Self {
            sub: subject.to_string(),
            email: email.to_string(),
            iat,
            nbf: iat,
            exp: (issued_at + lifetime).timestamp(),
        }
    }

    /// A token is expired at and after its `exp` instant.
    pub fn is_expired(&self, current_timestamp: i64) -> bool {
        current_timestamp >= self.exp
    }

    /// A token is not usable before its `nbf` instant.
    pub fn is_premature(&self, current_timestamp: i64) -> bool {
        current_timestamp < self.nbf
    }

    /// Expiration as a UTC instant.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.exp, 0)
    }
}
