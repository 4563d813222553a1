//! Opaque refresh token strings.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;

/// Bytes of entropy per refresh token (256 bits).
pub const REFRESH_TOKEN_BYTES: usize = 32;

/// Generate a refresh token from the operating system CSPRNG.
///
/// The result is URL-safe base64 without padding (43 characters).
pub fn generate_refresh_token() -> String {
    let mut bytes = [0u8; REFRESH_TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}
