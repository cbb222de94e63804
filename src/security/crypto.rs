// Cryptographic utilities

use anyhow::Result;
use base64::Engine;
use ring::rand::{SecureRandom, SystemRandom};
use ring::constant_time;
use sha2::{Digest, Sha256};

/// bcrypt cost used by the application (`hashing.bcrypt.rounds`).
pub const BCRYPT_COST: u32 = 12;

/// SHA-256 hex digest (lowercase).
pub fn sha256_hex(input: &[u8]) -> String {
    let digest = Sha256::digest(input);
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Constant-time equality for tokens.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    constant_time::verify_slices_are_equal(a.as_bytes(), b.as_bytes()).is_ok()
}

/// `len` random bytes, base64url encoded without padding.
pub fn random_token(len: usize) -> Result<String> {
    let mut bytes = vec![0u8; len];
    SystemRandom::new()
        .fill(&mut bytes)
        .map_err(|_| anyhow::anyhow!("Failed to generate random token"))?;
    Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes))
}

/// Hash a password the way the Laravel application expects it: bcrypt in `$2y$` form.
pub fn hash_password(password: &str, cost: u32) -> Result<String> {
    let parts = bcrypt::hash_with_result(password, cost)
        .map_err(|e| anyhow::anyhow!("Failed to hash password: {}", e))?;
    Ok(parts.format_for_version(bcrypt::Version::TwoY))
}
