//! Per-session CSRF tokens.
//!
//! Every wizard POST carries the token in a hidden `_token` field (or the
//! `X-CSRF-TOKEN` header for JSON calls).

use super::crypto;
use anyhow::Result;

pub const FORM_FIELD: &str = "_token";
pub const HEADER: &str = "x-csrf-token";
const TOKEN_BYTES: usize = 32;

pub fn issue() -> Result<String> {
    crypto::random_token(TOKEN_BYTES)
}

/// `expected` is the session token; a missing session token never verifies.
pub fn verify(expected: Option<&str>, submitted: Option<&str>) -> bool {
    match (expected, submitted) {
        (Some(expected), Some(submitted)) if !expected.is_empty() => {
            crypto::constant_time_eq(expected, submitted.trim())
        }
        _ => false,
    }
}
