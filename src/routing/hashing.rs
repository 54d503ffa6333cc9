//! Stable traffic bucketing.
//!
//! `std::hash` is randomly seeded per process, so buckets are derived from
//! SHA-256 instead: the same key lands in the same bucket on every instance
//! and across releases.

use sha2::{Digest, Sha256};

/// Number of traffic buckets; one per rollout percentage point.
pub const BUCKETS: u64 = 100;

/// 64-bit stable hash of `key`: the first eight digest bytes, big endian.
pub fn stable_hash(key: &str) -> u64 {
    let digest = Sha256::digest(key.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(prefix)
}

/// Bucket in `0..100` for `key`.
pub fn bucket(key: &str) -> u8 {
    // Always < 100, so the narrowing cannot truncate.
    (stable_hash(key) % BUCKETS) as u8
}
