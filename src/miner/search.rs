//! Proof-of-work nonce search
//!
//! CPU-bound and synchronous; callers run it on a blocking worker. The
//! cancellation token is checked after every batch of nonces.

use crate::core::{hash_encoded_with_nonce, Header, Target};
use crate::types::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Nonces tried between cancellation checks
pub const DEFAULT_CHECK_INTERVAL: u64 = 100_000;

/// A nonce whose header hash meets the target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Solution {
    /// Winning nonce
    pub nonce: u64,
    /// Resulting header hash
    pub hash: Hash,
}

/// Search nonces from `start_nonce` until the header hash meets `target`
///
/// Returns `None` once `cancellation` fires, or if the whole nonce space is
/// exhausted. Every hash computed is added to `hash_counter`.
pub fn search_nonce(
    header: &Header,
    target: &Target,
    start_nonce: u64,
    check_interval: u64,
    cancellation: &CancellationToken,
    hash_counter: &AtomicU64,
) -> Option<Solution> {
    let check_interval = check_interval.max(1);
    let mut encoded = header.encode();
    let mut nonce = start_nonce;
    let mut tried: u64 = 0;

    loop {
        if cancellation.is_cancelled() {
            trace!(tried, "Nonce search cancelled");
            return None;
        }

        let batch = check_interval.min(u64::MAX - tried);
        for i in 0..batch {
            let hash = hash_encoded_with_nonce(&mut encoded, nonce);
            if target.is_met_by(&hash) {
                hash_counter.fetch_add(i + 1, Ordering::Relaxed);
                return Some(Solution { nonce, hash });
            }
            nonce = nonce.wrapping_add(1);
        }

        hash_counter.fetch_add(batch, Ordering::Relaxed);
        tried += batch;
        if tried == u64::MAX {
            return None;
        }
    }
}
