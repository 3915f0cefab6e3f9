// Copyright 2015-2017 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! A caching host-resolution engine.
//!
//! `hostlookup` answers hostname lookups the way a system resolver does —
//! one address or all of them, family filtering, `ADDRCONFIG`/`V4MAPPED`
//! hints, result ordering — while never calling the operating system's
//! blocking address-info routines. All name resolution happens through
//! network-level A/AAAA queries, and the engine layers on top of them:
//!
//! * a TTL-aware positive and negative cache with stale-entry fallback,
//! * single-flight coalescing of concurrent resolutions per `(host, family)`,
//! * a pluggable failover policy deciding when failures are cached and when
//!   expired data may be served,
//! * hosts-file integration with atomic snapshot swaps on file changes,
//! * IP-literal short-circuiting,
//! * round-robin selection across the addresses of a cached entry,
//! * optional throttling of outbound queries and optional cache persistence
//!   across restarts.
//!
//! Every collaborator sits behind a trait ([`Resolve`], [`CacheStore`],
//! [`HostsSource`], [`ChoiceStrategy`], [`FailoverPolicy`],
//! [`PersistentStore`], [`IsIp`], [`NetInterfaces`]) and has a production
//! default, so the minimal setup is just:
//!
//! ```no_run
//! use hostlookup::{LookupEngine, LookupOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = LookupEngine::builder().build()?;
//!     engine.bootstrap().await?;
//!
//!     let answer = engine.lookup("example.com", LookupOptions::default()).await?;
//!     println!("example.com resolved to {}", answer.first().unwrap());
//!
//!     engine.teardown().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod dns_lru;
pub mod error;
pub mod failover;
pub mod hosts;
pub mod iface;
pub mod ip;
pub mod lookup;
pub mod persist;
pub mod resolve;
pub mod selection;
pub mod throttle;

pub use config::{Family, Hints, IpOrder, LookupOptions};
pub use dns_lru::{
    CacheKey, CacheSlot, CacheStore, DnsLru, FailureEntry, RecordFamily, ResolvedAddress,
    SuccessEntry,
};
pub use error::{ErrorKind, LookupError};
pub use failover::{FailoverPolicy, UniversalFailover};
pub use hosts::{HostsRecord, HostsSnapshot, HostsSource, SystemHosts};
pub use iface::{NetInterfaces, SystemInterfaces};
pub use ip::{IsIp, SystemIpCheck, is_v4, is_v6};
pub use lookup::{
    BoxLookupFuture, EngineBuilder, LookupAddr, LookupAnswer, LookupEngine, LookupFn,
};
pub use persist::{FileStore, PersistentStore};
#[cfg(feature = "hickory")]
pub use resolve::HickoryResolver;
pub use resolve::Resolve;
pub use selection::{ChoiceStrategy, RoundRobin};
pub use throttle::{Throttled, ThrottleConfig};
