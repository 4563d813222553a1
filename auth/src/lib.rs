//! Authentication primitives library
//!
//! Provides the credential and token machinery behind the API service:
//! - Password hashing (bcrypt)
//! - Access token issuance and validation (HS256 JWT)
//! - Opaque refresh token generation
//! - Identity token verification for Apple and Google sign-in
//! - Authentication coordination
//!
//! Storage of users and refresh tokens lives in the service; this crate holds
//! no state beyond the identity provider key cache.
//!
//! # Examples
//!
//! ## Password Hashing
//! ```
//! use auth::PasswordHasher;
//!
//! let hasher = PasswordHasher::with_cost(4);
//! let hash = hasher.hash("my_password").unwrap();
//! let is_valid = hasher.verify("my_password", &hash).unwrap();
//! assert!(is_valid);
//! ```
//!
//! ## Access Tokens
//! ```
//! use auth::JwtHandler;
//! use chrono::Duration;
//!
//! let handler = JwtHandler::new(b"secret_key_at_least_32_bytes_long!", Duration::hours(24));
//! let token = handler.issue("user123", "ann@x.com").unwrap();
//! let claims = handler.validate(&token).unwrap();
//! assert_eq!(claims.sub, "user123");
//! ```
//!
//! ## Complete Authentication Flow
//! ```
//! use auth::{Authenticator, JwtHandler, PasswordHasher};
//! use chrono::Duration;
//!
//! let auth = Authenticator::new(
//!     PasswordHasher::with_cost(4),
//!     JwtHandler::new(b"secret_key_at_least_32_bytes_long!", Duration::hours(24)),
//! );
//!
//! // Register: hash password
//! let hash = auth.hash_password("password123").unwrap();
//!
//! // Login: verify and issue token
//! let result = auth
//!     .authenticate("password123", Some(&hash), "user123", "ann@x.com")
//!     .unwrap();
//!
//! // Validate token
//! let claims = auth.validate_token(&result.access_token).unwrap();
//! assert_eq!(claims.email, "ann@x.com");
//! ```

pub mod authenticator;
pub mod clock;
pub mod identity;
pub mod jwt;
pub mod password;
pub mod refresh;

// Re-export commonly used items
pub use authenticator::AuthenticationError;
pub use authenticator::AuthenticationResult;
pub use authenticator::Authenticator;
pub use clock::Clock;
pub use clock::SystemClock;
pub use identity::IdentityError;
pub use identity::IdentityProvider;
pub use identity::IdentityVerifier;
pub use identity::VerifiedIdentity;
pub use jwt::AccessClaims;
pub use jwt::JwtError;
pub use jwt::JwtHandler;
pub use password::PasswordError;
pub use password::PasswordHasher;
pub use refresh::generate_refresh_token;
