use thiserror::Error;

/// Error type for third-party identity token verification.
///
/// Every variant is fatal to the sign-in attempt; none is retried here.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    #[error("Failed to fetch provider signing keys: {0}")]
    KeyFetch(String),

    #[error("No signing key found for key id: {0}")]
    UnknownKey(String),

    #[error("Identity token is malformed: {0}")]
    MalformedToken(String),

    #[error("Unexpected signing algorithm: {0}")]
    UnexpectedAlgorithm(String),

    #[error("Identity token signature is invalid")]
    InvalidSignature,

    #[error("Invalid issuer: {0}")]
    InvalidIssuer(String),

    #[error("Invalid audience: {0}")]
    InvalidAudience(String),

    #[error("Identity token has expired")]
    Expired,

    #[error("Identity token verification failed: {0}")]
    Verification(String),

    #[error("Email not verified")]
    EmailNotVerified,
}
