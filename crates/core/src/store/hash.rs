//! Cache key generation for tier entries.

use sha2::{Digest, Sha256};

/// Compute the cache key for a request URL.
///
/// The URL is expected without a fragment; the query string is part of the key.
pub fn compute_cache_key(url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(b"GET\n");
    hasher.update(url.as_bytes());
    hex::encode(hasher.finalize())
}
