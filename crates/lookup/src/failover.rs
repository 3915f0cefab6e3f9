// Copyright 2015-2017 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Failover policy: what to do when the resolver fails.
//!
//! Two independent decisions, both keyed on the error's code: whether the
//! failure itself is worth caching (so repeated lookups of a dead name don't
//! hammer the resolver), and whether expired success data may be served in
//! place of the error.

use std::collections::HashSet;
use std::time::Duration;

use crate::error::{ErrorKind, LookupError};

/// Decides how resolver failures are handled for a given host.
pub trait FailoverPolicy: Send + Sync {
    /// If the failure should be negatively cached, the TTL to cache it for.
    fn cache_resolver_failure(&self, error: &LookupError, host: &str) -> Option<Duration>;

    /// If expired success data may be served in place of this failure, the
    /// maximum time past expiry an entry may be and still qualify.
    fn use_expired_cache(&self, error: &LookupError, host: &str) -> Option<Duration>;
}

/// The default policy, applied uniformly to every host.
///
/// Transient and authoritative failures alike
/// (`CONNREFUSED`/`NOTFOUND`/`REFUSED`/`SERVFAIL`/`TIMEOUT`) are cached
/// briefly and allow serving stale data for up to an hour past expiry.
/// Errors outside the tables, including unknown codes, get neither
/// treatment.
#[derive(Clone, Debug)]
pub struct UniversalFailover {
    cache_on: HashSet<ErrorKind>,
    failure_ttl: Duration,
    serve_stale_on: HashSet<ErrorKind>,
    max_expiration: Duration,
}

const DEFAULT_FAILOVER_KINDS: [ErrorKind; 5] = [
    ErrorKind::ConnRefused,
    ErrorKind::NotFound,
    ErrorKind::Refused,
    ErrorKind::ServFail,
    ErrorKind::Timeout,
];

impl Default for UniversalFailover {
    fn default() -> Self {
        Self {
            cache_on: DEFAULT_FAILOVER_KINDS.into_iter().collect(),
            failure_ttl: Duration::from_millis(1000),
            serve_stale_on: DEFAULT_FAILOVER_KINDS.into_iter().collect(),
            max_expiration: Duration::from_millis(3_600_000),
        }
    }
}

impl UniversalFailover {
    /// Overrides the set of error kinds that are negatively cached.
    pub fn cache_on(mut self, kinds: impl IntoIterator<Item = ErrorKind>) -> Self {
        self.cache_on = kinds.into_iter().collect();
        self
    }

    /// Overrides the negative-cache TTL.
    pub fn failure_ttl(mut self, ttl: Duration) -> Self {
        self.failure_ttl = ttl;
        self
    }

    /// Overrides the set of error kinds that allow serving expired data.
    pub fn serve_stale_on(mut self, kinds: impl IntoIterator<Item = ErrorKind>) -> Self {
        self.serve_stale_on = kinds.into_iter().collect();
        self
    }

    /// Overrides how far past expiry an entry may be served.
    pub fn max_expiration(mut self, max: Duration) -> Self {
        self.max_expiration = max;
        self
    }
}

impl FailoverPolicy for UniversalFailover {
    fn cache_resolver_failure(&self, error: &LookupError, _host: &str) -> Option<Duration> {
        self.cache_on
            .contains(&error.kind())
            .then_some(self.failure_ttl)
    }

    fn use_expired_cache(&self, error: &LookupError, _host: &str) -> Option<Duration> {
        self.serve_stale_on
            .contains(&error.kind())
            .then_some(self.max_expiration)
    }
}
