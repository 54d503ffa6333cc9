//! Caller identity for the identity rate-limit scope.

use std::fmt::Write;

use http::header::AUTHORIZATION;
use http::HeaderMap;
use sha2::{Digest, Sha256};

/// Derive the identity key from an `Authorization: Bearer <token>` header.
///
/// The key is the hex SHA-256 of the token, so raw credentials never reach
/// the counter store or logs. Other schemes and empty tokens yield `None`.
pub fn identity_key(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    if token.is_empty() {
        return None;
    }

    let digest = Sha256::digest(token.as_bytes());
    let mut key = String::with_capacity(64);
    for byte in digest {
        let _ = write!(key, "{byte:02x}");
    }
    Some(key)
}
