// Copyright 2015-2017 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! IP-literal classification.
//!
//! Classification matches the conventional system semantics: strict numeric
//! dotted-quads for IPv4, hexadecimal groups with zero-compression and
//! v4-in-v6 forms for IPv6. The checks are pure; the engine memoizes results
//! in a bounded cache so repeated lookups of the same literal never
//! re-classify.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::Arc;

use lru_cache::LruCache;
use parking_lot::Mutex;

/// Returns true if `s` is an IPv4 literal (numeric dotted-quad).
pub fn is_v4(s: &str) -> bool {
    s.parse::<Ipv4Addr>().is_ok()
}

/// Returns true if `s` is an IPv6 literal, including zero-compressed and
/// v4-in-v6 forms.
pub fn is_v6(s: &str) -> bool {
    s.parse::<Ipv6Addr>().is_ok()
}

/// Classifies strings as IP literals. Pure; no I/O and no internal caching
/// (the engine memoizes).
pub trait IsIp: Send + Sync {
    /// Parses `host` as an IP literal of either family.
    fn classify(&self, host: &str) -> Option<IpAddr>;

    /// Returns true if `host` is an IPv4 literal.
    fn is_v4(&self, host: &str) -> bool {
        matches!(self.classify(host), Some(IpAddr::V4(_)))
    }

    /// Returns true if `host` is an IPv6 literal.
    fn is_v6(&self, host: &str) -> bool {
        matches!(self.classify(host), Some(IpAddr::V6(_)))
    }
}

/// The default classifier, backed by the standard library's address
/// parsers.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemIpCheck;

impl IsIp for SystemIpCheck {
    fn classify(&self, host: &str) -> Option<IpAddr> {
        host.parse().ok()
    }
}

/// Bounded memo over an [`IsIp`] service, keyed by the exact input string.
/// Negative results (not a literal) are memoized too, since most lookups are
/// for hostnames.
pub(crate) struct IpCheckCache {
    checker: Arc<dyn IsIp>,
    memo: Mutex<LruCache<String, Option<IpAddr>>>,
}

impl IpCheckCache {
    pub(crate) fn new(checker: Arc<dyn IsIp>, capacity: usize) -> Self {
        Self {
            checker,
            memo: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Classifies `host`, consulting the memo first.
    pub(crate) fn classify(&self, host: &str) -> Option<IpAddr> {
        let mut memo = self.memo.lock();
        if let Some(known) = memo.get_mut(host) {
            return *known;
        }
        let parsed = self.checker.classify(host);
        memo.insert(host.to_owned(), parsed);
        parsed
    }
}
