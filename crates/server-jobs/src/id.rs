// crates/server-jobs/src/id.rs
//! Job id generation.
//!
//! Ids come from the OS entropy source. If that is unavailable a seeded
//! PRNG fills in so that callers still receive a well-formed v4 UUID.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use rand::rngs::{OsRng, SmallRng};
use rand::{RngCore, SeedableRng};
use uuid::Builder;

use crate::types::JobId;

static FALLBACK_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generate a fresh job id.
pub fn generate() -> JobId {
    let mut bytes = [0u8; 16];
    if let Err(e) = OsRng.try_fill_bytes(&mut bytes) {
        tracing::warn!("OS entropy unavailable, using fallback generator: {e}");
        fill_fallback(&mut bytes);
    }
    JobId::from_uuid(Builder::from_random_bytes(bytes).into_uuid())
}

fn fill_fallback(bytes: &mut [u8; 16]) {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or_default();
    let count = FALLBACK_COUNTER.fetch_add(1, Ordering::Relaxed);
    let mut rng = SmallRng::seed_from_u64(nanos ^ count.rotate_left(32));
    rng.fill_bytes(bytes);
}
