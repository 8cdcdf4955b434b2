//! Stable user bucketing.
//!
//! The bucket is SHA-256 over the canonical string `"{test_id}:{user_id}"`
//! (hyphenated lowercase UUID), taking the first 8 digest bytes as a
//! big-endian u64 scaled into [0, 1). The function is pure: the same
//! (test, user) pair lands in the same bucket across processes and restarts,
//! and independent implementations of this recipe agree bit-for-bit.

use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Map (test, user) to a deterministic bucket in [0, 1).
pub fn bucket_for(test_id: &Uuid, user_id: &str) -> f64 {
    let mut hasher = Sha256::new();
    hasher.update(test_id.to_string().as_bytes());
    hasher.update(b":");
    hasher.update(user_id.as_bytes());
    let digest = hasher.finalize();

    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(prefix) as f64 / (u64::MAX as f64 + 1.0)
}

/// Walk cumulative weight boundaries in variant definition order; the first
/// boundary past the bucket wins. The final index absorbs any residual
/// floating-point gap below 1.0.
pub fn pick_index(weights: &[f64], bucket: f64) -> Option<usize> {
    if weights.is_empty() {
        return None;
    }
    let mut cumulative = 0.0;
    for (idx, weight) in weights.iter().enumerate() {
        cumulative += weight;
        if bucket < cumulative {
            return Some(idx);
        }
    }
    Some(weights.len() - 1)
}
