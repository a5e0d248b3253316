//! Expiring key/value store with one fixed TTL for every entry.
//!
//! Expired entries are removed lazily, by the first lookup that observes them,
//! or in bulk by [`TtlCache::purge_expired`]. The map sits behind a single
//! mutex; every critical section is O(1) and never spans an `.await`.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Cache key built from repository coordinates.
///
/// Components are joined with [`CacheKey::DELIMITER`], which cannot occur in an
/// owner, a repository name or a git ref name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub const DELIMITER: char = ':';

    /// Key for a rendered tree: `owner:repo:branch`.
    pub fn tree(owner: &str, repo: &str, branch: &str) -> Self {
        Self(format!(
            "{owner}{d}{repo}{d}{branch}",
            d = Self::DELIMITER
        ))
    }

    /// Key for a resolved default branch: `owner:repo`.
    pub fn default_branch(owner: &str, repo: &str) -> Self {
        Self(format!("{owner}{d}{repo}", d = Self::DELIMITER))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug)]
struct CacheRecord<V> {
    value: V,
    /// `None` when `now + ttl` is past what `Instant` can represent.
    expires_at: Option<Instant>,
}

impl<V> CacheRecord<V> {
    fn is_fresh_at(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |expires_at| now < expires_at)
    }
}

#[derive(Debug)]
pub struct TtlCache<K, V> {
    ttl: Duration,
    entries: Mutex<HashMap<K, CacheRecord<V>>>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    // Every critical section leaves the map consistent, so a poisoned lock is safe to reuse.
    fn lock(&self) -> MutexGuard<'_, HashMap<K, CacheRecord<V>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.get_at(key, Instant::now())
    }

    /// Value for `key` if `now` is before its expiry. An expired entry is
    /// removed and reported as absent.
    pub fn get_at(&self, key: &K, now: Instant) -> Option<V> {
        let mut entries = self.lock();
        match entries.get(key) {
            Some(record) if record.is_fresh_at(now) => Some(record.value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn set(&self, key: K, value: V) {
        self.set_at(key, value, Instant::now());
    }

    /// Store `value`, replacing any existing entry and resetting its expiry to `now + ttl`.
    pub fn set_at(&self, key: K, value: V, now: Instant) {
        let record = CacheRecord {
            value,
            expires_at: now.checked_add(self.ttl),
        };
        self.lock().insert(key, record);
    }

    pub fn purge_expired(&self) -> usize {
        self.purge_expired_at(Instant::now())
    }

    /// Drop every entry expired at `now`; returns how many were removed.
    pub fn purge_expired_at(&self, now: Instant) -> usize {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, record| record.is_fresh_at(now));
        before - entries.len()
    }

    /// Number of stored entries, expired or not.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
