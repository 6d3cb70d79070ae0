use rand::Rng;
use sha2::{Digest, Sha256};

const API_KEY_PREFIX: &str = "haven_sk_";

/// Generate a tenant API key. Returns `(full_key, sha256_hash)`.
/// Key format: `haven_sk_` + 32 random bytes hex-encoded.
/// Only the hash is ever stored.
pub fn generate_api_key() -> (String, String) {
    let raw = random_hex(32);
    let full_key = format!("{API_KEY_PREFIX}{raw}");
    let hash = hash_token(&full_key);
    (full_key, hash)
}

/// SHA-256 hex digest of a token string.
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// Extract the first 8 chars after `haven_sk_` for display/identification.
pub fn key_prefix(full_key: &str) -> String {
    full_key
        .strip_prefix(API_KEY_PREFIX)
        .map(|rest| rest.chars().take(8).collect())
        .unwrap_or_default()
}

/// True when `token` has the shape of a Haven API key.
pub fn looks_like_api_key(token: &str) -> bool {
    token
        .strip_prefix(API_KEY_PREFIX)
        .is_some_and(|rest| rest.len() == 64 && rest.chars().all(|c| c.is_ascii_hexdigit()))
}

/// Scope matching: exact, `*`, or `prefix:*` wildcard. Case-insensitive.
pub fn scope_matches(granted: &str, required: &str) -> bool {
    let granted = granted.trim().to_lowercase();
    let required = required.trim().to_lowercase();
    if granted.is_empty() || required.is_empty() {
        return false;
    }
    if granted == "*" || granted == required {
        return true;
    }
    if let Some(prefix) = granted.strip_suffix(":*") {
        return required == prefix || required.starts_with(&format!("{prefix}:"));
    }
    false
}

pub fn has_any_required_scope(granted_scopes: &[String], required_scopes: &[&str]) -> bool {
    if required_scopes.is_empty() {
        return true;
    }
    if granted_scopes.is_empty() {
        return false;
    }
    required_scopes.iter().any(|required| {
        granted_scopes
            .iter()
            .any(|granted| scope_matches(granted, required))
    })
}

/// Generate `n` random bytes and return as hex string.
fn random_hex(n: usize) -> String {
    let bytes: Vec<u8> = (0..n).map(|_| rand::thread_rng().r#gen::<u8>()).collect();
    hex::encode(&bytes)
}
