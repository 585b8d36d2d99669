//! Per-principal token-bucket admission.
//!
//! Keys a `governor` `RateLimiter` by the principal's `user_id` via `DashMapStateStore`, with a
//! per-principal quota (`quota_qpm`) rather than a single fixed quota for everyone.

use std::num::NonZeroU32;
use std::sync::Arc;

use dashmap::DashMap;
use governor::{clock::DefaultClock, state::InMemoryState, state::NotKeyed, Quota, RateLimiter as Governor};

use crate::gateway::auth::Principal;

type Bucket = Governor<NotKeyed, InMemoryState, DefaultClock>;

/// Token-bucket admission gate, one bucket per distinct `(user_id, quota_qpm)` pair.
///
/// Buckets are created lazily on first admission check and reused afterward; `quota_qpm` is
/// part of the key so that a principal whose quota changes (e.g. an upgrade from basic to
/// premium) gets a fresh bucket at the new rate rather than inheriting stale capacity.
pub struct RateLimiter {
    buckets: DashMap<String, Arc<Bucket>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            buckets: DashMap::new(),
        }
    }

    /// `admit(principal) → bool`. Refills then attempts to consume one token.
    pub fn admit(&self, principal: &Principal) -> bool {
        let key = format!("{}:{}", principal.user_id, principal.quota_qpm);
        let bucket = self
            .buckets
            .entry(key)
            .or_insert_with(|| Arc::new(Self::new_bucket(principal.quota_qpm)))
            .clone();
        bucket.check().is_ok()
    }

    fn new_bucket(quota_qpm: u32) -> Bucket {
        let per_minute = NonZeroU32::new(quota_qpm.max(1)).expect("quota_qpm.max(1) is never zero");
        Governor::direct(Quota::per_minute(per_minute))
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}
