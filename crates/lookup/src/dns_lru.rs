// Copyright 2015-2017 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The bounded cache store and its entry model.
//!
//! The store itself is TTL-agnostic: it is a keyed LRU of [`CacheSlot`]s and
//! nothing more. Freshness bookkeeping lives on the entries and is evaluated
//! by the engine. A slot holds the most recent success *and* the most recent
//! failure for its key, so recording a failure never destroys stale success
//! data that the failover policy may still want to serve.

use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::time::Duration;

use lru_cache::LruCache;
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::error::LookupError;

/// Smallest entry TTL the engine will honor, in seconds.
pub const MIN_TTL: u32 = 1;
/// Largest entry TTL the engine will honor, in seconds (one day).
pub const MAX_TTL: u32 = 86_400;

/// Default bound on the number of cached keys.
pub const DEFAULT_CACHE_SIZE: usize = 1000;

/// The record family a cache key covers.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum RecordFamily {
    /// A records.
    V4,
    /// AAAA records.
    V6,
}

impl RecordFamily {
    /// The numeric family, `4` or `6`.
    pub fn number(&self) -> u8 {
        match self {
            Self::V4 => 4,
            Self::V6 => 6,
        }
    }

    /// The record-type name, `"A"` or `"AAAA"`.
    pub fn record_name(&self) -> &'static str {
        match self {
            Self::V4 => "A",
            Self::V6 => "AAAA",
        }
    }
}

/// Cache key: a hostname (compared case-insensitively) plus the record
/// family it was resolved for.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct CacheKey {
    host: String,
    family: RecordFamily,
}

impl CacheKey {
    pub fn new(host: &str, family: RecordFamily) -> Self {
        Self {
            host: host.to_ascii_lowercase(),
            family,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn family(&self) -> RecordFamily {
        self.family
    }
}

/// A single address as returned by the resolver, with its record TTL in
/// seconds.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ResolvedAddress {
    pub ip: IpAddr,
    pub ttl: u32,
}

impl ResolvedAddress {
    pub fn new(ip: IpAddr, ttl: u32) -> Self {
        Self { ip, ttl }
    }
}

/// A cached successful resolution for one `(host, family)` key.
#[derive(Debug)]
pub struct SuccessEntry {
    addresses: Vec<ResolvedAddress>,
    fetched_at: Instant,
    expires_at: Instant,
    /// Round-robin position for single-address answers drawn from this
    /// entry. Advancing it is the only mutation a cached entry sees.
    rotation: AtomicU64,
}

impl SuccessEntry {
    /// Builds an entry fetched at `now`. The entry TTL is the minimum record
    /// TTL, clamped to `[MIN_TTL, MAX_TTL]`.
    pub fn new(addresses: Vec<ResolvedAddress>, now: Instant) -> Self {
        let ttl = addresses
            .iter()
            .map(|addr| addr.ttl)
            .min()
            .unwrap_or(MIN_TTL)
            .clamp(MIN_TTL, MAX_TTL);
        Self {
            addresses,
            fetched_at: now,
            expires_at: now + Duration::from_secs(u64::from(ttl)),
            rotation: AtomicU64::new(0),
        }
    }

    /// Rebuilds an entry with explicit timestamps, e.g. when hydrating from
    /// persistence. `expires_at` is clamped to be no earlier than
    /// `fetched_at`.
    pub(crate) fn with_expiry(
        addresses: Vec<ResolvedAddress>,
        fetched_at: Instant,
        expires_at: Instant,
    ) -> Self {
        Self {
            addresses,
            fetched_at,
            expires_at: expires_at.max(fetched_at),
            rotation: AtomicU64::new(0),
        }
    }

    pub fn addresses(&self) -> &[ResolvedAddress] {
        &self.addresses
    }

    pub fn fetched_at(&self) -> Instant {
        self.fetched_at
    }

    pub fn expires_at(&self) -> Instant {
        self.expires_at
    }

    /// An entry is fresh strictly before its expiry.
    pub fn is_fresh(&self, now: Instant) -> bool {
        now < self.expires_at
    }

    /// How far past its expiry this entry is; zero while fresh.
    pub fn staleness(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.expires_at)
    }

    pub(crate) fn rotation(&self) -> &AtomicU64 {
        &self.rotation
    }
}

/// A cached failed resolution for one `(host, family)` key.
#[derive(Clone, Debug)]
pub struct FailureEntry {
    pub error: LookupError,
    pub fetched_at: Instant,
    pub expires_at: Instant,
}

impl FailureEntry {
    pub fn new(error: LookupError, now: Instant, ttl: Duration) -> Self {
        Self {
            error,
            fetched_at: now,
            expires_at: now + ttl,
        }
    }

    pub fn is_fresh(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// The value stored per cache key.
#[derive(Clone, Debug, Default)]
pub struct CacheSlot {
    /// Most recent successful resolution, fresh or stale.
    pub success: Option<Arc<SuccessEntry>>,
    /// Most recent cached failure, fresh or stale.
    pub failure: Option<Arc<FailureEntry>>,
}

impl CacheSlot {
    pub fn from_success(entry: Arc<SuccessEntry>) -> Self {
        Self {
            success: Some(entry),
            failure: None,
        }
    }
}

/// The bounded keyed store the engine caches into.
///
/// Implementations decide the eviction policy; the engine only requires
/// `get`/`set` to be individually safe and `entries` to observe a consistent
/// snapshot. No TTL logic lives here.
pub trait CacheStore: Send + Sync {
    fn get(&self, key: &CacheKey) -> Option<CacheSlot>;
    fn set(&self, key: CacheKey, slot: CacheSlot);
    fn entries(&self) -> Vec<(CacheKey, CacheSlot)>;
}

/// The default store: an LRU bounded by entry count.
pub struct DnsLru {
    inner: Mutex<LruCache<CacheKey, CacheSlot>>,
}

impl DnsLru {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
        }
    }
}

impl Default for DnsLru {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_SIZE)
    }
}

impl CacheStore for DnsLru {
    fn get(&self, key: &CacheKey) -> Option<CacheSlot> {
        // get_mut, because retrieval reorders the LRU chain
        self.inner.lock().get_mut(key).cloned()
    }

    fn set(&self, key: CacheKey, slot: CacheSlot) {
        self.inner.lock().insert(key, slot);
    }

    fn entries(&self) -> Vec<(CacheKey, CacheSlot)> {
        self.inner
            .lock()
            .iter()
            .map(|(key, slot)| (key.clone(), slot.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str, ttl: u32) -> ResolvedAddress {
        ResolvedAddress::new(s.parse().unwrap(), ttl)
    }

    #[test]
    fn test_entry_ttl_is_min_of_records_clamped() {
        let now = Instant::now();
        let entry = SuccessEntry::new(vec![addr("1.1.1.1", 300), addr("2.2.2.2", 60)], now);
        assert_eq!(entry.expires_at() - now, Duration::from_secs(60));

        // zero TTLs clamp up to the minimum
        let entry = SuccessEntry::new(vec![addr("1.1.1.1", 0)], now);
        assert_eq!(entry.expires_at() - now, Duration::from_secs(u64::from(MIN_TTL)));

        // absurd TTLs clamp down to a day
        let entry = SuccessEntry::new(vec![addr("1.1.1.1", 10_000_000)], now);
        assert_eq!(entry.expires_at() - now, Duration::from_secs(u64::from(MAX_TTL)));
    }

    #[test]
    fn test_freshness_boundary() {
        let now = Instant::now();
        let entry = SuccessEntry::new(vec![addr("1.1.1.1", 60)], now);
        assert!(entry.is_fresh(now));
        assert!(entry.is_fresh(now + Duration::from_secs(59)));
        // fresh for [fetched_at, fetched_at + ttl), stale at the boundary
        assert!(!entry.is_fresh(now + Duration::from_secs(60)));
        assert_eq!(
            entry.staleness(now + Duration::from_secs(61)),
            Duration::from_secs(1)
        );
    }

    #[test]
    fn test_keys_are_case_insensitive() {
        assert_eq!(
            CacheKey::new("Example.COM", RecordFamily::V4),
            CacheKey::new("example.com", RecordFamily::V4)
        );
        assert_ne!(
            CacheKey::new("example.com", RecordFamily::V4),
            CacheKey::new("example.com", RecordFamily::V6)
        );
    }

    #[test]
    fn test_lru_bound_evicts_oldest() {
        let lru = DnsLru::new(2);
        let now = Instant::now();
        for host in ["a.test", "b.test", "c.test"] {
            let entry = Arc::new(SuccessEntry::new(vec![addr("1.1.1.1", 60)], now));
            lru.set(
                CacheKey::new(host, RecordFamily::V4),
                CacheSlot::from_success(entry),
            );
        }
        assert!(lru.get(&CacheKey::new("a.test", RecordFamily::V4)).is_none());
        assert!(lru.get(&CacheKey::new("b.test", RecordFamily::V4)).is_some());
        assert!(lru.get(&CacheKey::new("c.test", RecordFamily::V4)).is_some());
        assert_eq!(lru.entries().len(), 2);
    }

    #[test]
    fn test_slot_retains_success_next_to_failure() {
        let lru = DnsLru::default();
        let key = CacheKey::new("flaky.test", RecordFamily::V4);
        let now = Instant::now();
        let success = Arc::new(SuccessEntry::new(vec![addr("1.1.1.1", 60)], now));
        lru.set(key.clone(), CacheSlot::from_success(success));

        let mut slot = lru.get(&key).unwrap();
        slot.failure = Some(Arc::new(FailureEntry::new(
            crate::error::LookupError::new(crate::error::ErrorKind::Timeout),
            now,
            Duration::from_secs(1),
        )));
        lru.set(key.clone(), slot);

        let slot = lru.get(&key).unwrap();
        assert!(slot.success.is_some());
        assert!(slot.failure.is_some());
    }
}
