//! Per-client token bucket admission control.
//!
//! Each identity owns a bucket that starts full and refills continuously at
//! `refill_per_second`, capped at `capacity`. One admitted request costs one
//! token. Refill is applied on every call, including rejected ones, so a
//! throttled client keeps recovering. There are no fixed windows and hence no
//! window edge to exploit.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateBucket {
    tokens: f64,
    last_refill_at: Instant,
}

impl RateBucket {
    pub fn tokens(&self) -> f64 {
        self.tokens
    }
}

/// Outcome of one [`TokenBucketLimiter::take`] call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Decision {
    pub admitted: bool,
    /// Tokens left after this decision.
    pub remaining_tokens: f64,
    pub capacity: u32,
    /// Estimated time until the bucket is full again. Informational only.
    pub reset_after: Duration,
}

impl Decision {
    /// Remaining tokens, floored for display.
    pub fn remaining(&self) -> u64 {
        self.remaining_tokens.floor() as u64
    }

    /// `reset_after` rounded up to whole seconds.
    pub fn reset_after_secs(&self) -> u64 {
        self.reset_after.as_secs_f64().ceil() as u64
    }
}

#[derive(Debug)]
pub struct TokenBucketLimiter {
    capacity: u32,
    refill_per_second: f64,
    buckets: Mutex<HashMap<String, RateBucket>>,
}

impl TokenBucketLimiter {
    /// `capacity` must be at least 1 and `refill_per_second` positive; the
    /// config loader rejects anything else.
    pub fn new(capacity: u32, refill_per_second: f64) -> Self {
        Self {
            capacity,
            refill_per_second,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn refill_per_second(&self) -> f64 {
        self.refill_per_second
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, RateBucket>> {
        self.buckets.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn take(&self, identity: &str) -> Decision {
        self.take_at(identity, Instant::now())
    }

    /// Refill the caller's bucket up to `now`, then spend one token if one is available.
    pub fn take_at(&self, identity: &str, now: Instant) -> Decision {
        let capacity = f64::from(self.capacity);
        let mut buckets = self.lock();
        let bucket = buckets
            .entry(identity.to_string())
            .or_insert_with(|| RateBucket {
                tokens: capacity,
                last_refill_at: now,
            });

        let elapsed = now.saturating_duration_since(bucket.last_refill_at);
        let refill = elapsed.as_secs_f64() * self.refill_per_second;
        bucket.tokens = (bucket.tokens + refill).min(capacity);
        bucket.last_refill_at = bucket.last_refill_at.max(now);

        let admitted = bucket.tokens >= 1.0;
        if admitted {
            bucket.tokens -= 1.0;
        }

        let missing = capacity - bucket.tokens;
        Decision {
            admitted,
            remaining_tokens: bucket.tokens,
            capacity: self.capacity,
            reset_after: Duration::try_from_secs_f64(missing / self.refill_per_second)
                .unwrap_or(Duration::MAX),
        }
    }

    pub fn sweep_idle(&self, max_idle: Duration) -> usize {
        self.sweep_idle_at(Instant::now(), max_idle)
    }

    /// Forget buckets untouched for longer than `max_idle`. Pick `max_idle` of at
    /// least `capacity / refill_per_second` and a dropped bucket would have been
    /// full anyway, so clients cannot observe the sweep.
    pub fn sweep_idle_at(&self, now: Instant, max_idle: Duration) -> usize {
        let mut buckets = self.lock();
        let before = buckets.len();
        buckets.retain(|_, bucket| {
            now.saturating_duration_since(bucket.last_refill_at) <= max_idle
        });
        let removed = before - buckets.len();
        debug!(removed, remaining = buckets.len(), "Swept idle rate buckets");
        removed
    }

    /// Snapshot of an identity's bucket, if it has one.
    pub fn bucket(&self, identity: &str) -> Option<RateBucket> {
        self.lock().get(identity).copied()
    }

    pub fn tracked_identities(&self) -> usize {
        self.lock().len()
    }
}
