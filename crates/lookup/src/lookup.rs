// Copyright 2015-2017 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The lookup engine.
//!
//! [`LookupEngine`] composes the collaborator services into the host-lookup
//! contract: IP-literal short-circuiting, the hosts-file overlay, the
//! TTL-aware cache with stale fallback, single-flight coalescing of
//! concurrent resolutions, per-call family/hint/order shaping, and
//! round-robin reduction to a single address.
//!
//! A lookup for a hostname walks the pipeline in order: literal check, hosts
//! snapshot, then the cache, and only on a miss (or a stale entry) the
//! network resolver, paced by the throttle. What happens on resolver failure
//! is the failover policy's decision twice over: whether the failure is
//! cached, and whether expired success data is served in its place.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::net::IpAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;

use arc_swap::ArcSwap;
use futures_util::future;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::{Family, Hints, IpOrder, LookupOptions, ResolvedOptions};
use crate::dns_lru::{
    CacheKey, CacheSlot, CacheStore, DnsLru, FailureEntry, RecordFamily, SuccessEntry,
};
use crate::error::{ErrorKind, LookupError};
use crate::failover::{FailoverPolicy, UniversalFailover};
use crate::hosts::{HostAddrs, HostsSnapshot, HostsSource, SystemHosts};
use crate::iface::{NetInterfaces, SystemInterfaces};
use crate::ip::{IpCheckCache, IsIp, SystemIpCheck};
use crate::persist::{self, PersistentStore};
use crate::resolve::Resolve;
use crate::selection::{ChoiceStrategy, RoundRobin};
use crate::throttle::{Throttled, ThrottleConfig};

/// One address in a lookup answer, with its numeric family.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct LookupAddr {
    pub ip: IpAddr,
    pub family: RecordFamily,
}

impl LookupAddr {
    pub fn new(ip: IpAddr, family: RecordFamily) -> Self {
        Self { ip, family }
    }
}

impl fmt::Display for LookupAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.ip.fmt(f)
    }
}

/// The result of a lookup: a single address or, with `all`, every candidate.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum LookupAnswer {
    One(LookupAddr),
    Many(Vec<LookupAddr>),
}

impl LookupAnswer {
    /// The answer's addresses as a slice, regardless of shape.
    pub fn addrs(&self) -> &[LookupAddr] {
        match self {
            Self::One(addr) => std::slice::from_ref(addr),
            Self::Many(list) => list,
        }
    }

    pub fn first(&self) -> Option<&LookupAddr> {
        self.addrs().first()
    }

    pub fn into_vec(self) -> Vec<LookupAddr> {
        match self {
            Self::One(addr) => vec![addr],
            Self::Many(list) => list,
        }
    }
}

/// Future type returned by [`LookupEngine::lookup_fn`] closures.
pub type BoxLookupFuture = Pin<Box<dyn Future<Output = Result<LookupAnswer, LookupError>> + Send>>;

/// A self-contained lookup callable, suitable for installing onto a
/// connection agent in place of the system resolver.
pub type LookupFn = Arc<dyn Fn(String, LookupOptions) -> BoxLookupFuture + Send + Sync>;

type FlightResult = Option<Result<Arc<SuccessEntry>, LookupError>>;

/// Builder wiring the engine's collaborator services.
///
/// Every slot has a default; `LookupEngine::builder().build()` produces a
/// working engine on any platform with a default hosts-file location.
#[derive(Default)]
pub struct EngineBuilder {
    resolver: Option<Arc<dyn Resolve>>,
    cache: Option<Arc<dyn CacheStore>>,
    choice: Option<Arc<dyn ChoiceStrategy>>,
    failover: Option<Arc<dyn FailoverPolicy>>,
    hosts: Option<Arc<dyn HostsSource>>,
    persistence: Option<Arc<dyn PersistentStore>>,
    throttle: Option<ThrottleConfig>,
    interfaces: Option<Arc<dyn NetInterfaces>>,
    ip_check: Option<Arc<dyn IsIp>>,
}

impl EngineBuilder {
    /// The network resolver service.
    pub fn resolver(mut self, resolver: Arc<dyn Resolve>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// The cache store; defaults to an LRU bounded at
    /// [`crate::dns_lru::DEFAULT_CACHE_SIZE`] keys.
    pub fn cache(mut self, cache: Arc<dyn CacheStore>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// The single-address selection strategy; defaults to round-robin.
    pub fn choice(mut self, choice: Arc<dyn ChoiceStrategy>) -> Self {
        self.choice = Some(choice);
        self
    }

    /// The failover policy; defaults to [`UniversalFailover`].
    pub fn failover(mut self, failover: Arc<dyn FailoverPolicy>) -> Self {
        self.failover = Some(failover);
        self
    }

    /// The hosts-file service; defaults to the platform hosts file.
    pub fn hosts(mut self, hosts: Arc<dyn HostsSource>) -> Self {
        self.hosts = Some(hosts);
        self
    }

    /// Optional persistence for the cache across restarts.
    pub fn persistence(mut self, persistence: Arc<dyn PersistentStore>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    /// Optional rate limit on outbound resolver calls.
    pub fn throttle(mut self, throttle: ThrottleConfig) -> Self {
        self.throttle = Some(throttle);
        self
    }

    /// The local-interface probe backing the `ADDRCONFIG` hint.
    pub fn interfaces(mut self, interfaces: Arc<dyn NetInterfaces>) -> Self {
        self.interfaces = Some(interfaces);
        self
    }

    /// The IP-literal classifier; defaults to the standard library parsers.
    pub fn ip_check(mut self, ip_check: Arc<dyn IsIp>) -> Self {
        self.ip_check = Some(ip_check);
        self
    }

    pub fn build(self) -> Result<LookupEngine, LookupError> {
        #[cfg(feature = "hickory")]
        let resolver = match self.resolver {
            Some(resolver) => resolver,
            None => Arc::new(crate::resolve::HickoryResolver::default()) as Arc<dyn Resolve>,
        };
        #[cfg(not(feature = "hickory"))]
        let resolver = self.resolver.ok_or_else(|| {
            LookupError::with_detail(
                ErrorKind::NotInitialized,
                "no resolver service configured and the `hickory` feature is disabled",
            )
        })?;

        let resolver = match self.throttle {
            Some(config) => Arc::new(Throttled::new(resolver, config)) as Arc<dyn Resolve>,
            None => resolver,
        };
        let hosts = match self.hosts {
            Some(hosts) => hosts,
            None => Arc::new(SystemHosts::new()?) as Arc<dyn HostsSource>,
        };

        Ok(LookupEngine {
            inner: Arc::new(EngineInner {
                resolver,
                cache: self.cache.unwrap_or_else(|| Arc::new(DnsLru::default())),
                choice: self.choice.unwrap_or_else(|| Arc::new(RoundRobin)),
                failover: self
                    .failover
                    .unwrap_or_else(|| Arc::new(UniversalFailover::default())),
                hosts,
                persistence: self.persistence,
                interfaces: self
                    .interfaces
                    .unwrap_or_else(|| Arc::new(SystemInterfaces::new())),
                ip_memo: IpCheckCache::new(
                    self.ip_check.unwrap_or_else(|| Arc::new(SystemIpCheck)),
                    256,
                ),
                snapshot: ArcSwap::from_pointee(HostsSnapshot::default()),
                in_flight: Mutex::new(HashMap::new()),
                bootstrapped: tokio::sync::Mutex::new(false),
            }),
        })
    }
}

/// The caching lookup engine. Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct LookupEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    resolver: Arc<dyn Resolve>,
    cache: Arc<dyn CacheStore>,
    choice: Arc<dyn ChoiceStrategy>,
    failover: Arc<dyn FailoverPolicy>,
    hosts: Arc<dyn HostsSource>,
    persistence: Option<Arc<dyn PersistentStore>>,
    interfaces: Arc<dyn NetInterfaces>,
    ip_memo: IpCheckCache,
    snapshot: ArcSwap<HostsSnapshot>,
    in_flight: Mutex<HashMap<CacheKey, watch::Receiver<FlightResult>>>,
    bootstrapped: tokio::sync::Mutex<bool>,
}

impl LookupEngine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }

    /// Prepares the engine: hydrates the cache from persistence (failures
    /// are logged and ignored) and starts the hosts watcher followed by the
    /// initial hosts read (failures surface). Idempotent.
    pub async fn bootstrap(&self) -> Result<(), LookupError> {
        let inner = &self.inner;
        let mut bootstrapped = inner.bootstrapped.lock().await;
        if *bootstrapped {
            return Ok(());
        }

        if let Some(store) = &inner.persistence {
            match store.read().await {
                Ok(Some(blob)) => match persist::decode_entries(&blob) {
                    Ok(entries) => {
                        let count = entries.len();
                        for (key, slot) in entries {
                            inner.cache.set(key, slot);
                        }
                        debug!("hydrated {count} cache keys from persistent storage");
                    }
                    Err(err) => warn!("ignoring unusable persisted cache: {err}"),
                },
                Ok(None) => {}
                Err(err) => warn!("failed to read persisted cache: {err}"),
            }
        }

        let weak = Arc::downgrade(inner);
        inner.hosts.watch(Arc::new(move || {
            if let Some(inner) = weak.upgrade() {
                tokio::spawn(async move { inner.reload_hosts().await });
            }
        }))?;
        let records = inner.hosts.read().await?;
        inner
            .snapshot
            .store(Arc::new(HostsSnapshot::from_records(&records)));

        *bootstrapped = true;
        Ok(())
    }

    /// Stops the hosts watcher (if bootstrapped) and flushes the cache to
    /// persistence (if configured). Write failures propagate. Safe to call
    /// without a prior [`Self::bootstrap`].
    pub async fn teardown(&self) -> Result<(), LookupError> {
        let inner = &self.inner;
        {
            let mut bootstrapped = inner.bootstrapped.lock().await;
            if *bootstrapped {
                inner.hosts.stop_watching();
                *bootstrapped = false;
            }
        }
        if let Some(store) = &inner.persistence {
            let blob = persist::encode_entries(&inner.cache.entries())?;
            store.write(&blob).await?;
        }
        Ok(())
    }

    /// Resolves `host` according to `options`.
    ///
    /// Returns one address ([`LookupAnswer::One`]) or, with
    /// `options.all(true)`, every shaped candidate
    /// ([`LookupAnswer::Many`]). Fails with the resolver's error, possibly
    /// served from the failure cache.
    pub async fn lookup(
        &self,
        host: &str,
        options: LookupOptions,
    ) -> Result<LookupAnswer, LookupError> {
        self.inner.lookup_inner(host, options.normalize()).await
    }

    /// Callback-style variant of [`Self::lookup`]; behavior is identical
    /// apart from delivery.
    pub fn lookup_callback<F>(&self, host: &str, options: LookupOptions, callback: F)
    where
        F: FnOnce(Result<LookupAnswer, LookupError>) + Send + 'static,
    {
        let engine = self.clone();
        let host = host.to_owned();
        tokio::spawn(async move {
            callback(engine.lookup(&host, options).await);
        });
    }

    /// A boxed lookup callable for installation onto a connection agent.
    pub fn lookup_fn(&self) -> LookupFn {
        let engine = self.clone();
        Arc::new(move |host, options| {
            let engine = engine.clone();
            Box::pin(async move { engine.lookup(&host, options).await })
        })
    }
}

impl EngineInner {
    async fn lookup_inner(
        self: &Arc<Self>,
        host: &str,
        opts: ResolvedOptions,
    ) -> Result<LookupAnswer, LookupError> {
        // IP literals never touch the hosts file, the cache, or the network.
        if let Some(ip) = self.ip_memo.classify(host) {
            return self.literal_answer(host, ip, &opts);
        }

        let host = host.to_ascii_lowercase();

        // Hosts-file entries are locally authoritative: no caching, no
        // resolution, and no ADDRCONFIG filtering.
        {
            let snapshot = self.snapshot.load();
            if let Some(addrs) = snapshot.get(&host) {
                debug!(host = %host, "answering from hosts file");
                return self.hosts_answer(addrs, &opts);
            }
        }

        let families = self.required_families(&opts)?;
        let (candidates, rotation_entry) =
            self.resolved_candidates(&host, &families, &opts).await?;
        self.finish(candidates, rotation_entry.rotation(), &opts)
    }

    fn literal_answer(
        &self,
        host: &str,
        ip: IpAddr,
        opts: &ResolvedOptions,
    ) -> Result<LookupAnswer, LookupError> {
        let candidate = match (ip, opts.family) {
            (IpAddr::V4(_), Family::Unspec | Family::V4) => {
                LookupAddr::new(ip, RecordFamily::V4)
            }
            (IpAddr::V4(v4), Family::V6) if opts.hints.contains(Hints::V4MAPPED) => {
                LookupAddr::new(IpAddr::V6(v4.to_ipv6_mapped()), RecordFamily::V6)
            }
            (IpAddr::V6(_), Family::Unspec | Family::V6) => {
                LookupAddr::new(ip, RecordFamily::V6)
            }
            _ => {
                return Err(LookupError::with_detail(
                    ErrorKind::NotFound,
                    format!("address family of literal {host} does not match the requested family"),
                ));
            }
        };
        let rotation = AtomicU64::new(0);
        self.finish(vec![candidate], &rotation, opts)
    }

    fn hosts_answer(
        &self,
        addrs: &HostAddrs,
        opts: &ResolvedOptions,
    ) -> Result<LookupAnswer, LookupError> {
        let v4 = || {
            addrs
                .v4
                .iter()
                .map(|&ip| LookupAddr::new(IpAddr::V4(ip), RecordFamily::V4))
                .collect::<Vec<_>>()
        };
        let v6 = || {
            addrs
                .v6
                .iter()
                .map(|&ip| LookupAddr::new(IpAddr::V6(ip), RecordFamily::V6))
                .collect::<Vec<_>>()
        };
        let mapped = || {
            addrs
                .v4
                .iter()
                .map(|&ip| LookupAddr::new(IpAddr::V6(ip.to_ipv6_mapped()), RecordFamily::V6))
                .collect::<Vec<_>>()
        };

        let candidates = match opts.family {
            Family::V4 => v4(),
            Family::V6 => {
                let mut list = v6();
                if opts.hints.contains(Hints::V4MAPPED) {
                    if opts.hints.contains(Hints::ALL) {
                        list.extend(mapped());
                    } else if list.is_empty() {
                        list = mapped();
                    }
                }
                list
            }
            Family::Unspec => {
                let (mut first, second) = match opts.order {
                    IpOrder::Ipv6First => (v6(), v4()),
                    _ => (v4(), v6()),
                };
                first.extend(second);
                first
            }
        };
        self.finish(candidates, addrs.rotation(), opts)
    }

    fn required_families(&self, opts: &ResolvedOptions) -> Result<Vec<RecordFamily>, LookupError> {
        let mut families = match opts.family {
            Family::V4 => vec![RecordFamily::V4],
            Family::V6 => vec![RecordFamily::V6],
            Family::Unspec => vec![RecordFamily::V4, RecordFamily::V6],
        };
        if opts.hints.contains(Hints::ADDRCONFIG) {
            families.retain(|family| match family {
                RecordFamily::V4 => self.interfaces.has_ipv4(),
                RecordFamily::V6 => self.interfaces.has_ipv6(),
            });
            if families.is_empty() {
                return Err(LookupError::with_detail(
                    ErrorKind::NotFound,
                    "no requested address family is configured on a local interface",
                ));
            }
        }
        Ok(families)
    }

    /// Fetches candidates for the required families and pairs them with the
    /// cache entry whose rotation counter single-address answers advance.
    async fn resolved_candidates(
        self: &Arc<Self>,
        host: &str,
        families: &[RecordFamily],
        opts: &ResolvedOptions,
    ) -> Result<(Vec<LookupAddr>, Arc<SuccessEntry>), LookupError> {
        // family=6 + V4MAPPED falls back to (or, with ALL, adds) mapped A
        // records.
        if opts.family == Family::V6 && opts.hints.contains(Hints::V4MAPPED) {
            return self.v4mapped_candidates(host, opts).await;
        }

        match families {
            [family] => {
                let entry = self.fetch_family(host, *family).await?;
                let candidates = family_candidates(&entry, *family);
                Ok((candidates, entry))
            }
            _ => {
                let (r4, r6) = future::join(
                    self.fetch_family(host, RecordFamily::V4),
                    self.fetch_family(host, RecordFamily::V6),
                )
                .await;
                match (r4, r6) {
                    (Ok(e4), Ok(e6)) => {
                        let v4 = family_candidates(&e4, RecordFamily::V4);
                        let v6 = family_candidates(&e6, RecordFamily::V6);
                        let (mut first, second) = match opts.order {
                            IpOrder::Ipv6First => (v6, v4),
                            _ => (v4, v6),
                        };
                        first.extend(second);
                        Ok((first, e4))
                    }
                    (Ok(e4), Err(err)) => {
                        debug!("one of A or AAAA lookup failed for {host}: {err}");
                        Ok((family_candidates(&e4, RecordFamily::V4), e4))
                    }
                    (Err(err), Ok(e6)) => {
                        debug!("one of A or AAAA lookup failed for {host}: {err}");
                        Ok((family_candidates(&e6, RecordFamily::V6), e6))
                    }
                    (Err(err4), Err(err6)) => {
                        debug!("both A and AAAA lookups failed for {host}: {err4}, {err6}");
                        Err(err4)
                    }
                }
            }
        }
    }

    async fn v4mapped_candidates(
        self: &Arc<Self>,
        host: &str,
        opts: &ResolvedOptions,
    ) -> Result<(Vec<LookupAddr>, Arc<SuccessEntry>), LookupError> {
        if opts.hints.contains(Hints::ALL) {
            let (r6, r4) = future::join(
                self.fetch_family(host, RecordFamily::V6),
                self.fetch_family(host, RecordFamily::V4),
            )
            .await;
            return match (r6, r4) {
                (Ok(e6), Ok(e4)) => {
                    let mut candidates = family_candidates(&e6, RecordFamily::V6);
                    candidates.extend(mapped_candidates(&e4));
                    Ok((candidates, e6))
                }
                (Ok(e6), Err(err)) => {
                    debug!("A lookup for v4-mapping failed for {host}: {err}");
                    Ok((family_candidates(&e6, RecordFamily::V6), e6))
                }
                (Err(err), Ok(e4)) => {
                    debug!("AAAA lookup failed for {host}, using mapped A records: {err}");
                    Ok((mapped_candidates(&e4), e4))
                }
                (Err(err6), Err(_)) => Err(err6),
            };
        }

        match self.fetch_family(host, RecordFamily::V6).await {
            Ok(e6) => Ok((family_candidates(&e6, RecordFamily::V6), e6)),
            Err(err6) => match self.fetch_family(host, RecordFamily::V4).await {
                Ok(e4) => {
                    debug!("AAAA lookup failed for {host}, using mapped A records: {err6}");
                    Ok((mapped_candidates(&e4), e4))
                }
                Err(_) => Err(err6),
            },
        }
    }

    /// The per-family decision tree over the cache entry for
    /// `(host, family)`.
    async fn fetch_family(
        self: &Arc<Self>,
        host: &str,
        family: RecordFamily,
    ) -> Result<Arc<SuccessEntry>, LookupError> {
        let key = CacheKey::new(host, family);
        let now = Instant::now();
        let slot = self.cache.get(&key).unwrap_or_default();

        if let Some(success) = &slot.success {
            if success.is_fresh(now) {
                debug!(host, family = family.record_name(), "cache hit");
                return Ok(Arc::clone(success));
            }
        }

        if let Some(failure) = &slot.failure {
            if failure.is_fresh(now) {
                // servable stale success data takes precedence over a
                // cached failure
                if let Some(stale) = self.servable_stale(&slot, &failure.error, host, now) {
                    return Ok(stale);
                }
                debug!(host, code = failure.error.code(), "cached failure hit");
                return Err(failure.error.clone());
            }
        }

        // missing or stale: resolve, coalescing with any in-flight query
        match self.resolve_shared(&key).await {
            Ok(entry) => Ok(entry),
            Err(err) => {
                let now = Instant::now();
                if let Some(stale) = self.servable_stale(&slot, &err, host, now) {
                    return Ok(stale);
                }
                Err(err)
            }
        }
    }

    fn servable_stale(
        &self,
        slot: &CacheSlot,
        error: &LookupError,
        host: &str,
        now: Instant,
    ) -> Option<Arc<SuccessEntry>> {
        let stale = slot.success.as_ref()?;
        let max_expiration = self.failover.use_expired_cache(error, host)?;
        if stale.staleness(now) <= max_expiration {
            debug!(host, code = error.code(), "serving expired cache entry");
            Some(Arc::clone(stale))
        } else {
            None
        }
    }

    /// Resolves `(host, family)` through the in-flight table: at most one
    /// resolver call per key is outstanding, and every concurrent caller
    /// observes its outcome. The underlying query runs on its own task, so
    /// a caller abandoning its lookup does not cancel it for the rest.
    async fn resolve_shared(
        self: &Arc<Self>,
        key: &CacheKey,
    ) -> Result<Arc<SuccessEntry>, LookupError> {
        enum Flight {
            Join(watch::Receiver<FlightResult>),
            Lead(watch::Sender<FlightResult>, watch::Receiver<FlightResult>),
        }

        let flight = {
            let mut in_flight = self.in_flight.lock();
            match in_flight.get(key) {
                Some(rx) => Flight::Join(rx.clone()),
                None => {
                    let (tx, rx) = watch::channel(None);
                    in_flight.insert(key.clone(), rx.clone());
                    Flight::Lead(tx, rx)
                }
            }
        };

        let mut rx = match flight {
            Flight::Join(rx) => {
                debug!(
                    host = key.host(),
                    family = key.family().record_name(),
                    "joining in-flight resolution"
                );
                rx
            }
            Flight::Lead(tx, rx) => {
                let inner = Arc::clone(self);
                let key = key.clone();
                tokio::spawn(async move {
                    let outcome = inner.resolve_and_record(&key).await;
                    // successors must see the updated cache before the
                    // in-flight slot disappears
                    inner.in_flight.lock().remove(&key);
                    let _ = tx.send(Some(outcome));
                });
                rx
            }
        };

        loop {
            {
                let outcome = rx.borrow_and_update();
                if let Some(outcome) = outcome.as_ref() {
                    return outcome.clone();
                }
            }
            if rx.changed().await.is_err() {
                return Err(LookupError::with_detail(
                    ErrorKind::Cancelled,
                    "resolution task terminated before settling",
                ));
            }
        }
    }

    /// The resolve subroutine: one network query, its TTL bookkeeping, and
    /// the cache writes for both outcomes.
    async fn resolve_and_record(&self, key: &CacheKey) -> Result<Arc<SuccessEntry>, LookupError> {
        // another flight may have settled between the caller's cache consult
        // and this one becoming leader
        if let Some(slot) = self.cache.get(key) {
            if let Some(success) = &slot.success {
                if success.is_fresh(Instant::now()) {
                    return Ok(Arc::clone(success));
                }
            }
        }

        let result = match key.family() {
            RecordFamily::V4 => self.resolver.resolve4(key.host()).await,
            RecordFamily::V6 => self.resolver.resolve6(key.host()).await,
        };
        let now = Instant::now();
        match result {
            Ok(addresses) if addresses.is_empty() => {
                let err = LookupError::with_detail(
                    ErrorKind::NoData,
                    format!("no {} records for {}", key.family().record_name(), key.host()),
                );
                self.record_failure(key, &err, now);
                Err(err)
            }
            Ok(addresses) => {
                let entry = Arc::new(SuccessEntry::new(addresses, now));
                debug!(
                    host = key.host(),
                    family = key.family().record_name(),
                    records = entry.addresses().len(),
                    "resolved"
                );
                self.cache
                    .set(key.clone(), CacheSlot::from_success(Arc::clone(&entry)));
                Ok(entry)
            }
            Err(err) => {
                self.record_failure(key, &err, now);
                Err(err)
            }
        }
    }

    /// Caches a failure when the failover policy says so, keeping any stale
    /// success data in the slot.
    fn record_failure(&self, key: &CacheKey, err: &LookupError, now: Instant) {
        let Some(ttl) = self.failover.cache_resolver_failure(err, key.host()) else {
            return;
        };
        let mut slot = self.cache.get(key).unwrap_or_default();
        slot.failure = Some(Arc::new(FailureEntry::new(err.clone(), now, ttl)));
        self.cache.set(key.clone(), slot);
    }

    async fn reload_hosts(&self) {
        match self.hosts.read().await {
            Ok(records) => {
                let snapshot = HostsSnapshot::from_records(&records);
                debug!(entries = snapshot.len(), "hosts file changed, snapshot rebuilt");
                self.snapshot.store(Arc::new(snapshot));
            }
            // keep the previous snapshot on failed re-reads
            Err(err) => warn!("failed to re-read hosts file: {err}"),
        }
    }

    /// Shapes the final answer: `all` passthrough or selection of one
    /// address, with the non-empty guarantee selection relies on.
    fn finish(
        &self,
        candidates: Vec<LookupAddr>,
        rotation: &AtomicU64,
        opts: &ResolvedOptions,
    ) -> Result<LookupAnswer, LookupError> {
        if candidates.is_empty() {
            return Err(LookupError::with_detail(
                ErrorKind::NotFound,
                "no candidate addresses",
            ));
        }
        if opts.all {
            return Ok(LookupAnswer::Many(candidates));
        }
        match self.choice.choose_one(&candidates, rotation) {
            Ok(addr) => Ok(LookupAnswer::One(*addr)),
            // the internal invariant code must never escape to callers
            Err(err) if err.kind() == ErrorKind::EmptyArray => Err(LookupError::with_detail(
                ErrorKind::NotFound,
                "selection strategy returned no candidate",
            )),
            Err(err) => Err(err),
        }
    }
}

fn family_candidates(entry: &SuccessEntry, family: RecordFamily) -> Vec<LookupAddr> {
    entry
        .addresses()
        .iter()
        .map(|addr| LookupAddr::new(addr.ip, family))
        .collect()
}

fn mapped_candidates(entry: &SuccessEntry) -> Vec<LookupAddr> {
    entry
        .addresses()
        .iter()
        .filter_map(|addr| match addr.ip {
            IpAddr::V4(v4) => Some(LookupAddr::new(
                IpAddr::V6(v4.to_ipv6_mapped()),
                RecordFamily::V6,
            )),
            IpAddr::V6(_) => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::net::IpAddr;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::Semaphore;

    use super::*;
    use crate::dns_lru::ResolvedAddress;
    use crate::hosts::{ChangeSignal, HostsRecord, parse_hosts};
    use crate::persist::FileStore;

    fn subscribe() {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(tracing::Level::DEBUG)
            .try_init();
    }

    fn addr(s: &str, ttl: u32) -> ResolvedAddress {
        ResolvedAddress::new(s.parse().unwrap(), ttl)
    }

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    type Script = Mutex<VecDeque<Result<Vec<ResolvedAddress>, LookupError>>>;

    #[derive(Default)]
    struct MockResolver {
        v4: Script,
        v6: Script,
        v4_calls: AtomicUsize,
        v6_calls: AtomicUsize,
        gate: Option<Arc<Semaphore>>,
    }

    impl MockResolver {
        fn new() -> Self {
            Self::default()
        }

        fn with_gate(mut self, gate: Arc<Semaphore>) -> Self {
            self.gate = Some(gate);
            self
        }

        fn push_v4(&self, response: Result<Vec<ResolvedAddress>, LookupError>) {
            self.v4.lock().push_back(response);
        }

        fn push_v6(&self, response: Result<Vec<ResolvedAddress>, LookupError>) {
            self.v6.lock().push_back(response);
        }
    }

    #[async_trait]
    impl Resolve for MockResolver {
        async fn resolve4(&self, _host: &str) -> Result<Vec<ResolvedAddress>, LookupError> {
            self.v4_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                gate.acquire().await.expect("gate closed").forget();
            }
            self.v4
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err(LookupError::new(ErrorKind::NoData)))
        }

        async fn resolve6(&self, _host: &str) -> Result<Vec<ResolvedAddress>, LookupError> {
            self.v6_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                gate.acquire().await.expect("gate closed").forget();
            }
            self.v6
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err(LookupError::new(ErrorKind::NoData)))
        }
    }

    #[derive(Default)]
    struct MockHosts {
        data: &'static str,
        reads: AtomicUsize,
        watching: AtomicBool,
    }

    impl MockHosts {
        fn with_data(data: &'static str) -> Self {
            Self {
                data,
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl HostsSource for MockHosts {
        async fn read(&self) -> Result<Vec<HostsRecord>, LookupError> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            parse_hosts(self.data)
        }

        fn watch(&self, _on_change: ChangeSignal) -> Result<(), LookupError> {
            self.watching.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn stop_watching(&self) {
            self.watching.store(false, Ordering::SeqCst);
        }
    }

    struct MockInterfaces {
        v4: bool,
        v6: bool,
    }

    impl NetInterfaces for MockInterfaces {
        fn has_ipv4(&self) -> bool {
            self.v4
        }

        fn has_ipv6(&self) -> bool {
            self.v6
        }
    }

    fn engine(resolver: Arc<MockResolver>) -> LookupEngine {
        LookupEngine::builder()
            .resolver(resolver)
            .hosts(Arc::new(MockHosts::default()))
            .build()
            .unwrap()
    }

    fn seed_success(engine: &LookupEngine, host: &str, family: RecordFamily, addrs: Vec<ResolvedAddress>) -> Arc<SuccessEntry> {
        let entry = Arc::new(SuccessEntry::new(addrs, Instant::now()));
        engine.inner.cache.set(
            CacheKey::new(host, family),
            CacheSlot::from_success(Arc::clone(&entry)),
        );
        entry
    }

    #[tokio::test(start_paused = true)]
    async fn test_fresh_cache_hit_skips_resolver() {
        subscribe();
        let resolver = Arc::new(MockResolver::new());
        let engine = engine(resolver.clone());
        seed_success(
            &engine,
            "example.com",
            RecordFamily::V4,
            vec![addr("1.2.3.4", 60)],
        );

        tokio::time::advance(Duration::from_secs(10)).await;
        let answer = engine
            .lookup("example.com", LookupOptions::default().family(Family::V4))
            .await
            .unwrap();
        assert_eq!(answer, LookupAnswer::One(LookupAddr::new(ip("1.2.3.4"), RecordFamily::V4)));
        assert_eq!(resolver.v4_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_miss_resolves_then_hits() {
        let resolver = Arc::new(MockResolver::new());
        resolver.push_v4(Ok(vec![addr("5.6.7.8", 300)]));
        let engine = engine(resolver.clone());

        let opts = LookupOptions::default().family(Family::V4);
        let first = engine.lookup("api.test", opts.clone()).await.unwrap();
        assert_eq!(first.first().unwrap().ip, ip("5.6.7.8"));
        assert_eq!(resolver.v4_calls.load(Ordering::SeqCst), 1);

        // within the TTL, no further resolver calls
        tokio::time::advance(Duration::from_secs(299)).await;
        let second = engine.lookup("api.test", opts).await.unwrap();
        assert_eq!(second.first().unwrap().ip, ip("5.6.7.8"));
        assert_eq!(resolver.v4_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_single_flight_coalesces_concurrent_lookups() {
        subscribe();
        let gate = Arc::new(Semaphore::new(0));
        let resolver = Arc::new(MockResolver::new().with_gate(gate.clone()));
        resolver.push_v4(Ok(vec![addr("1.2.3.4", 60)]));
        let engine = engine(resolver.clone());

        let handles: Vec<_> = (0..100)
            .map(|_| {
                let engine = engine.clone();
                tokio::spawn(async move {
                    engine
                        .lookup("ex.com", LookupOptions::default().family(Family::V4))
                        .await
                })
            })
            .collect();

        // let the callers pile up behind the gated leader
        tokio::time::sleep(Duration::from_millis(50)).await;
        gate.add_permits(1);

        for handle in handles {
            let answer = handle.await.unwrap().unwrap();
            assert_eq!(answer.first().unwrap().ip, ip("1.2.3.4"));
        }
        assert_eq!(resolver.v4_calls.load(Ordering::SeqCst), 1);
        assert!(engine.inner.in_flight.lock().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_single_flight_broadcasts_errors() {
        let gate = Arc::new(Semaphore::new(0));
        let resolver = Arc::new(MockResolver::new().with_gate(gate.clone()));
        resolver.push_v4(Err(LookupError::new(ErrorKind::ServFail)));
        let engine = engine(resolver.clone());

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let engine = engine.clone();
                tokio::spawn(async move {
                    engine
                        .lookup("down.test", LookupOptions::default().family(Family::V4))
                        .await
                })
            })
            .collect();

        tokio::time::sleep(Duration::from_millis(50)).await;
        gate.add_permits(1);

        for handle in handles {
            let err = handle.await.unwrap().unwrap_err();
            assert_eq!(err.kind(), ErrorKind::ServFail);
        }
        assert_eq!(resolver.v4_calls.load(Ordering::SeqCst), 1);
        assert!(engine.inner.in_flight.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_entry_served_on_resolver_error() {
        subscribe();
        let resolver = Arc::new(MockResolver::new());
        let engine = engine(resolver.clone());
        seed_success(
            &engine,
            "ex.com",
            RecordFamily::V4,
            vec![addr("1.1.1.1", 10)],
        );

        // entry is stale, the refresh fails, default policy serves stale
        tokio::time::advance(Duration::from_secs(11)).await;
        resolver.push_v4(Err(LookupError::new(ErrorKind::Timeout)));
        let answer = engine
            .lookup("ex.com", LookupOptions::default().family(Family::V4))
            .await
            .unwrap();
        assert_eq!(answer.first().unwrap().ip, ip("1.1.1.1"));
        assert_eq!(resolver.v4_calls.load(Ordering::SeqCst), 1);

        // an hour past expiry the policy refuses, and the error surfaces
        tokio::time::advance(Duration::from_millis(3_600_001)).await;
        resolver.push_v4(Err(LookupError::new(ErrorKind::Timeout)));
        let err = engine
            .lookup("ex.com", LookupOptions::default().family(Family::V4))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_caching_window() {
        let resolver = Arc::new(MockResolver::new());
        resolver.push_v4(Err(LookupError::new(ErrorKind::NotFound)));
        let engine = engine(resolver.clone());
        let opts = LookupOptions::default().family(Family::V4);

        let err = engine.lookup("nope.test", opts.clone()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(resolver.v4_calls.load(Ordering::SeqCst), 1);

        // within the 1000ms failure TTL: rejected from cache, resolver idle
        tokio::time::advance(Duration::from_millis(999)).await;
        let err = engine.lookup("nope.test", opts.clone()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(resolver.v4_calls.load(Ordering::SeqCst), 1);

        // once the failure expires the resolver is consulted again
        tokio::time::advance(Duration::from_millis(2)).await;
        resolver.push_v4(Err(LookupError::new(ErrorKind::NotFound)));
        let err = engine.lookup("nope.test", opts).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(resolver.v4_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_success_beats_fresh_failure() {
        subscribe();
        let resolver = Arc::new(MockResolver::new());
        let engine = engine(resolver.clone());

        // a stale success entry and a fresh failure entry for the same key
        let now = Instant::now();
        let stale = Arc::new(SuccessEntry::new(vec![addr("9.9.9.9", 1)], now));
        tokio::time::advance(Duration::from_secs(5)).await;
        let slot = CacheSlot {
            success: Some(stale),
            failure: Some(Arc::new(FailureEntry::new(
                LookupError::new(ErrorKind::ServFail),
                Instant::now(),
                Duration::from_secs(60),
            ))),
        };
        engine
            .inner
            .cache
            .set(CacheKey::new("flaky.test", RecordFamily::V4), slot);

        // policy permits stale: success wins over the cached failure, and
        // no resolver call is made while the failure is fresh
        let answer = engine
            .lookup("flaky.test", LookupOptions::default().family(Family::V4))
            .await
            .unwrap();
        assert_eq!(answer.first().unwrap().ip, ip("9.9.9.9"));
        assert_eq!(resolver.v4_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_round_robin_over_cached_list() {
        let resolver = Arc::new(MockResolver::new());
        let engine = engine(resolver.clone());
        seed_success(
            &engine,
            "lb.test",
            RecordFamily::V4,
            vec![addr("10.0.0.1", 60), addr("10.0.0.2", 60), addr("10.0.0.3", 60)],
        );

        let opts = LookupOptions::default().family(Family::V4);
        let mut picks = Vec::new();
        for _ in 0..4 {
            picks.push(engine.lookup("lb.test", opts.clone()).await.unwrap().first().unwrap().ip);
        }
        assert_eq!(
            picks,
            vec![ip("10.0.0.1"), ip("10.0.0.2"), ip("10.0.0.3"), ip("10.0.0.1")]
        );
        assert_eq!(resolver.v4_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_rotation_increments_are_not_lost() {
        let resolver = Arc::new(MockResolver::new());
        let engine = engine(resolver.clone());
        let entry = seed_success(
            &engine,
            "lb.test",
            RecordFamily::V4,
            vec![addr("10.0.0.1", 60), addr("10.0.0.2", 60)],
        );

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let engine = engine.clone();
                tokio::spawn(async move {
                    engine
                        .lookup("lb.test", LookupOptions::default().family(Family::V4))
                        .await
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(entry.rotation().load(Ordering::SeqCst), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_literal_short_circuit() {
        let resolver = Arc::new(MockResolver::new());
        let hosts = Arc::new(MockHosts::default());
        let engine = LookupEngine::builder()
            .resolver(resolver.clone())
            .hosts(hosts.clone())
            .build()
            .unwrap();

        let answer = engine.lookup("1.2.3.4", LookupOptions::default()).await.unwrap();
        assert_eq!(answer, LookupAnswer::One(LookupAddr::new(ip("1.2.3.4"), RecordFamily::V4)));

        let answer = engine.lookup("::1", LookupOptions::default()).await.unwrap();
        assert_eq!(answer.first().unwrap().family.number(), 6);

        // neither the resolver nor the hosts file was consulted
        assert_eq!(resolver.v4_calls.load(Ordering::SeqCst), 0);
        assert_eq!(resolver.v6_calls.load(Ordering::SeqCst), 0);
        assert_eq!(hosts.reads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_literal_family_mismatch() {
        let resolver = Arc::new(MockResolver::new());
        let engine = engine(resolver.clone());

        let err = engine
            .lookup("1.2.3.4", LookupOptions::default().family(Family::V6))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let answer = engine
            .lookup(
                "1.2.3.4",
                LookupOptions::default().family(Family::V6).hints(Hints::V4MAPPED),
            )
            .await
            .unwrap();
        assert_eq!(answer.first().unwrap().ip, ip("::ffff:1.2.3.4"));
        assert_eq!(answer.first().unwrap().family.number(), 6);

        // no v6-to-v4 mapping exists
        let err = engine
            .lookup("::1", LookupOptions::default().family(Family::V4))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hosts_overlay() {
        subscribe();
        let resolver = Arc::new(MockResolver::new());
        let hosts = Arc::new(MockHosts::with_data("10.0.0.7 DB.test db-alias.test\n"));
        let engine = LookupEngine::builder()
            .resolver(resolver.clone())
            .hosts(hosts.clone())
            .build()
            .unwrap();
        engine.bootstrap().await.unwrap();

        let answer = engine.lookup("db.test", LookupOptions::default()).await.unwrap();
        assert_eq!(answer.first().unwrap().ip, ip("10.0.0.7"));

        // case-insensitive, and aliases resolve too
        let answer = engine.lookup("DB.TEST", LookupOptions::default()).await.unwrap();
        assert_eq!(answer.first().unwrap().ip, ip("10.0.0.7"));
        let answer = engine.lookup("db-alias.test", LookupOptions::default()).await.unwrap();
        assert_eq!(answer.first().unwrap().ip, ip("10.0.0.7"));

        assert_eq!(resolver.v4_calls.load(Ordering::SeqCst), 0);
        assert_eq!(resolver.v6_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hosts_overlay_ignores_addrconfig() {
        let resolver = Arc::new(MockResolver::new());
        let hosts = Arc::new(MockHosts::with_data("10.0.0.7 db.test\n"));
        let engine = LookupEngine::builder()
            .resolver(resolver.clone())
            .hosts(hosts)
            .interfaces(Arc::new(MockInterfaces { v4: false, v6: false }))
            .build()
            .unwrap();
        engine.bootstrap().await.unwrap();

        // ADDRCONFIG would rule out every family, but hosts entries are
        // locally authoritative
        let answer = engine
            .lookup("db.test", LookupOptions::default().hints(Hints::ADDRCONFIG))
            .await
            .unwrap();
        assert_eq!(answer.first().unwrap().ip, ip("10.0.0.7"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hosts_miss_falls_through_to_resolver() {
        let resolver = Arc::new(MockResolver::new());
        resolver.push_v4(Ok(vec![addr("8.8.8.8", 60)]));
        let hosts = Arc::new(MockHosts::with_data("10.0.0.7 db.test\n"));
        let engine = LookupEngine::builder()
            .resolver(resolver.clone())
            .hosts(hosts)
            .build()
            .unwrap();
        engine.bootstrap().await.unwrap();

        let answer = engine
            .lookup("other.test", LookupOptions::default().family(Family::V4))
            .await
            .unwrap();
        assert_eq!(answer.first().unwrap().ip, ip("8.8.8.8"));
        assert_eq!(resolver.v4_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_addrconfig_restricts_queried_families() {
        let resolver = Arc::new(MockResolver::new());
        resolver.push_v4(Ok(vec![addr("1.2.3.4", 60)]));
        let engine = LookupEngine::builder()
            .resolver(resolver.clone())
            .hosts(Arc::new(MockHosts::default()))
            .interfaces(Arc::new(MockInterfaces { v4: true, v6: false }))
            .build()
            .unwrap();

        let answer = engine
            .lookup("ex.com", LookupOptions::default().hints(Hints::ADDRCONFIG))
            .await
            .unwrap();
        assert_eq!(answer.first().unwrap().ip, ip("1.2.3.4"));
        // no AAAA query was ever issued
        assert_eq!(resolver.v6_calls.load(Ordering::SeqCst), 0);

        // with no usable family at all, the lookup fails without resolving
        let engine = LookupEngine::builder()
            .resolver(resolver.clone())
            .hosts(Arc::new(MockHosts::default()))
            .interfaces(Arc::new(MockInterfaces { v4: false, v6: false }))
            .build()
            .unwrap();
        let err = engine
            .lookup("ex.com", LookupOptions::default().hints(Hints::ADDRCONFIG))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test(start_paused = true)]
    async fn test_order_shaping() {
        let resolver = Arc::new(MockResolver::new());
        let engine = engine(resolver.clone());
        seed_success(&engine, "dual.test", RecordFamily::V4, vec![addr("1.1.1.1", 60)]);
        seed_success(&engine, "dual.test", RecordFamily::V6, vec![addr("::2", 60)]);

        // verbatim keeps the A-family block first
        let answer = engine
            .lookup("dual.test", LookupOptions::default().all(true))
            .await
            .unwrap();
        assert_eq!(
            answer.addrs().iter().map(|a| a.ip).collect::<Vec<_>>(),
            vec![ip("1.1.1.1"), ip("::2")]
        );

        let answer = engine
            .lookup(
                "dual.test",
                LookupOptions::default().all(true).order(IpOrder::Ipv6First),
            )
            .await
            .unwrap();
        assert_eq!(
            answer.addrs().iter().map(|a| a.ip).collect::<Vec<_>>(),
            vec![ip("::2"), ip("1.1.1.1")]
        );

        let answer = engine
            .lookup(
                "dual.test",
                LookupOptions::default().all(true).order(IpOrder::Ipv4First),
            )
            .await
            .unwrap();
        assert_eq!(
            answer.addrs().iter().map(|a| a.ip).collect::<Vec<_>>(),
            vec![ip("1.1.1.1"), ip("::2")]
        );
        assert_eq!(resolver.v4_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dual_family_partial_failure_uses_the_other() {
        let resolver = Arc::new(MockResolver::new());
        resolver.push_v4(Ok(vec![addr("1.1.1.1", 60)]));
        resolver.push_v6(Err(LookupError::new(ErrorKind::ServFail)));
        let engine = engine(resolver.clone());

        let answer = engine
            .lookup("partial.test", LookupOptions::default().all(true))
            .await
            .unwrap();
        assert_eq!(
            answer.addrs().iter().map(|a| a.ip).collect::<Vec<_>>(),
            vec![ip("1.1.1.1")]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_v4mapped_fallback_and_all() {
        let resolver = Arc::new(MockResolver::new());
        resolver.push_v6(Err(LookupError::new(ErrorKind::NoData)));
        resolver.push_v4(Ok(vec![addr("1.2.3.4", 60)]));
        let engine1 = engine(resolver.clone());

        // no AAAA data: A records are mapped into IPv6 space
        let answer = engine1
            .lookup(
                "v4only.test",
                LookupOptions::default().family(Family::V6).hints(Hints::V4MAPPED),
            )
            .await
            .unwrap();
        assert_eq!(answer.first().unwrap().ip, ip("::ffff:1.2.3.4"));
        assert_eq!(answer.first().unwrap().family.number(), 6);

        // ALL returns the AAAA answers followed by the mapped A answers
        let resolver = Arc::new(MockResolver::new());
        resolver.push_v6(Ok(vec![addr("::2", 60)]));
        resolver.push_v4(Ok(vec![addr("1.2.3.4", 60)]));
        let engine = engine(resolver.clone());
        let answer = engine
            .lookup(
                "dual.test",
                LookupOptions::default()
                    .all(true)
                    .family(Family::V6)
                    .hints(Hints::V4MAPPED | Hints::ALL),
            )
            .await
            .unwrap();
        assert_eq!(
            answer.addrs().iter().map(|a| a.ip).collect::<Vec<_>>(),
            vec![ip("::2"), ip("::ffff:1.2.3.4")]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_response_is_nodata() {
        let resolver = Arc::new(MockResolver::new());
        resolver.push_v4(Ok(vec![]));
        let engine = engine(resolver.clone());

        let err = engine
            .lookup("empty.test", LookupOptions::default().family(Family::V4))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoData);
        // NODATA is not negatively cached by the default policy
        resolver.push_v4(Ok(vec![addr("1.1.1.1", 60)]));
        let answer = engine
            .lookup("empty.test", LookupOptions::default().family(Family::V4))
            .await
            .unwrap();
        assert_eq!(answer.first().unwrap().ip, ip("1.1.1.1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_bootstrap_is_idempotent() {
        let resolver = Arc::new(MockResolver::new());
        let hosts = Arc::new(MockHosts::with_data("10.0.0.1 a.test\n"));
        let engine = LookupEngine::builder()
            .resolver(resolver)
            .hosts(hosts.clone())
            .build()
            .unwrap();

        engine.bootstrap().await.unwrap();
        engine.bootstrap().await.unwrap();
        assert_eq!(hosts.reads.load(Ordering::SeqCst), 1);
        assert!(hosts.watching.load(Ordering::SeqCst));

        engine.teardown().await.unwrap();
        assert!(!hosts.watching.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_persistence_round_trip_across_engines() {
        subscribe();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");

        let resolver = Arc::new(MockResolver::new());
        resolver.push_v4(Ok(vec![addr("5.5.5.5", 600)]));
        let engine = LookupEngine::builder()
            .resolver(resolver)
            .hosts(Arc::new(MockHosts::default()))
            .persistence(Arc::new(FileStore::new(&path)))
            .build()
            .unwrap();
        engine.bootstrap().await.unwrap();
        engine
            .lookup("persist.test", LookupOptions::default().family(Family::V4))
            .await
            .unwrap();
        engine.teardown().await.unwrap();

        // a fresh engine over the same store answers without resolving
        let resolver = Arc::new(MockResolver::new());
        let engine = LookupEngine::builder()
            .resolver(resolver.clone())
            .hosts(Arc::new(MockHosts::default()))
            .persistence(Arc::new(FileStore::new(&path)))
            .build()
            .unwrap();
        engine.bootstrap().await.unwrap();
        let answer = engine
            .lookup("persist.test", LookupOptions::default().family(Family::V4))
            .await
            .unwrap();
        assert_eq!(answer.first().unwrap().ip, ip("5.5.5.5"));
        assert_eq!(resolver.v4_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_callback_delivery() {
        let resolver = Arc::new(MockResolver::new());
        resolver.push_v4(Ok(vec![addr("4.4.4.4", 60)]));
        let engine = engine(resolver);

        let (tx, rx) = tokio::sync::oneshot::channel();
        engine.lookup_callback(
            "cb.test",
            LookupOptions::default().family(Family::V4),
            move |result| {
                let _ = tx.send(result);
            },
        );
        let answer = rx.await.unwrap().unwrap();
        assert_eq!(answer.first().unwrap().ip, ip("4.4.4.4"));
    }

    #[tokio::test]
    async fn test_installable_lookup_fn() {
        let resolver = Arc::new(MockResolver::new());
        resolver.push_v4(Ok(vec![addr("4.4.4.4", 60)]));
        let engine = engine(resolver);

        let lookup = engine.lookup_fn();
        let answer = lookup(
            "agent.test".to_owned(),
            LookupOptions::default().family(Family::V4),
        )
        .await
        .unwrap();
        assert_eq!(answer.first().unwrap().ip, ip("4.4.4.4"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_answers_carry_families() {
        let resolver = Arc::new(MockResolver::new());
        let engine = engine(resolver);
        seed_success(&engine, "fam.test", RecordFamily::V4, vec![addr("1.1.1.1", 60)]);
        seed_success(&engine, "fam.test", RecordFamily::V6, vec![addr("::2", 60)]);

        let answer = engine
            .lookup("fam.test", LookupOptions::default().all(true))
            .await
            .unwrap();
        let families: Vec<u8> = answer.addrs().iter().map(|a| a.family.number()).collect();
        assert_eq!(families, vec![4, 6]);
    }
}
