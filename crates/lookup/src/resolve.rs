// Copyright 2015-2017 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The network resolver seam.
//!
//! The engine consumes A/AAAA queries through the [`Resolve`] trait and
//! nothing else; wire parsing, retries and timeouts are the transport's
//! concern. The default transport adapts the `hickory-resolver` crate and
//! maps its failures onto the engine's error codes.

use async_trait::async_trait;

use crate::dns_lru::ResolvedAddress;
use crate::error::LookupError;

/// Network-level A/AAAA resolution.
///
/// An empty `Ok` list is a successful "no records" response; the engine
/// treats it as `NODATA` for that family.
#[async_trait]
pub trait Resolve: Send + Sync {
    /// Queries A records for `host`, returning each address with its TTL.
    async fn resolve4(&self, host: &str) -> Result<Vec<ResolvedAddress>, LookupError>;

    /// Queries AAAA records for `host`, returning each address with its TTL.
    async fn resolve6(&self, host: &str) -> Result<Vec<ResolvedAddress>, LookupError>;
}

#[cfg(feature = "hickory")]
pub use self::hickory::HickoryResolver;

#[cfg(feature = "hickory")]
mod hickory {
    use std::net::IpAddr;

    use async_trait::async_trait;
    use hickory_resolver::TokioAsyncResolver;
    use hickory_resolver::config::{ResolverConfig, ResolverOpts};
    use hickory_resolver::error::{ResolveError, ResolveErrorKind};
    use hickory_resolver::proto::op::ResponseCode;
    use hickory_resolver::proto::rr::RData;

    use super::Resolve;
    use crate::dns_lru::ResolvedAddress;
    use crate::error::{ErrorKind, LookupError};

    /// A/AAAA resolution over `hickory-resolver`.
    pub struct HickoryResolver {
        inner: TokioAsyncResolver,
    }

    impl HickoryResolver {
        /// A resolver over the default upstream configuration.
        pub fn new() -> Self {
            Self {
                inner: TokioAsyncResolver::tokio(
                    ResolverConfig::default(),
                    ResolverOpts::default(),
                ),
            }
        }

        /// A resolver over the system configuration (`/etc/resolv.conf` on
        /// Unix).
        pub fn from_system_conf() -> Result<Self, LookupError> {
            let inner = TokioAsyncResolver::tokio_from_system_conf().map_err(|err| {
                LookupError::with_detail(
                    ErrorKind::NotInitialized,
                    format!("failed to read system resolver configuration: {err}"),
                )
            })?;
            Ok(Self { inner })
        }

        /// Wraps an already-configured resolver.
        pub fn from_resolver(inner: TokioAsyncResolver) -> Self {
            Self { inner }
        }
    }

    impl Default for HickoryResolver {
        fn default() -> Self {
            Self::from_system_conf().unwrap_or_else(|_| Self::new())
        }
    }

    #[async_trait]
    impl Resolve for HickoryResolver {
        async fn resolve4(&self, host: &str) -> Result<Vec<ResolvedAddress>, LookupError> {
            let lookup = self
                .inner
                .ipv4_lookup(host)
                .await
                .map_err(map_resolve_error)?;
            Ok(lookup
                .as_lookup()
                .record_iter()
                .filter_map(|record| match record.data() {
                    Some(RData::A(a)) => {
                        Some(ResolvedAddress::new(IpAddr::V4(a.0), record.ttl()))
                    }
                    _ => None,
                })
                .collect())
        }

        async fn resolve6(&self, host: &str) -> Result<Vec<ResolvedAddress>, LookupError> {
            let lookup = self
                .inner
                .ipv6_lookup(host)
                .await
                .map_err(map_resolve_error)?;
            Ok(lookup
                .as_lookup()
                .record_iter()
                .filter_map(|record| match record.data() {
                    Some(RData::AAAA(aaaa)) => {
                        Some(ResolvedAddress::new(IpAddr::V6(aaaa.0), record.ttl()))
                    }
                    _ => None,
                })
                .collect())
        }
    }

    fn map_resolve_error(err: ResolveError) -> LookupError {
        let kind = match err.kind() {
            ResolveErrorKind::NoRecordsFound { response_code, .. } => match *response_code {
                ResponseCode::NXDomain => ErrorKind::NotFound,
                ResponseCode::ServFail => ErrorKind::ServFail,
                ResponseCode::Refused => ErrorKind::Refused,
                ResponseCode::FormErr => ErrorKind::FormErr,
                ResponseCode::NotImp => ErrorKind::NotImp,
                // NoError with no answers: the name exists but has no
                // records of this type
                ResponseCode::NoError => ErrorKind::NoData,
                _ => ErrorKind::NoData,
            },
            ResolveErrorKind::Timeout => ErrorKind::Timeout,
            ResolveErrorKind::Io(io_err) => match io_err.kind() {
                std::io::ErrorKind::ConnectionRefused => ErrorKind::ConnRefused,
                std::io::ErrorKind::TimedOut => ErrorKind::Timeout,
                _ => ErrorKind::Unknown,
            },
            _ => ErrorKind::Unknown,
        };
        LookupError::with_detail(kind, err.to_string())
    }
}
