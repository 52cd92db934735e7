//! Session token generation.
//!
//! Tokens are 32 bytes from the OS CSPRNG, encoded as URL-safe base64
//! without padding (43 characters). They are opaque bearer secrets, so logs
//! only ever carry a [`fingerprint`].

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand_core::{OsRng, RngCore};

/// Entropy per token in bytes (256 bits).
pub const TOKEN_BYTES: usize = 32;

/// Generate a fresh session token.
pub fn generate() -> String {
    random_string(TOKEN_BYTES)
}

/// Short random identifier for filesystem names (control sockets).
pub fn short_id() -> String {
    random_string(9)
}

/// First 8 characters of a token, safe to log.
pub fn fingerprint(token: &str) -> &str {
    let end = token
        .char_indices()
        .nth(8)
        .map(|(idx, _)| idx)
        .unwrap_or(token.len());
    &token[..end]
}

fn random_string(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}
