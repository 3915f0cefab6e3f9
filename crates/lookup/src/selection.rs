// Copyright 2015-2017 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Selection of a single address from a candidate list.
//!
//! Rotation state is keyed by the cache entry the candidates were drawn
//! from: every entry carries an atomic counter, and the strategy advances it
//! once per call. Two simultaneous callers may observe the same position
//! before either increment lands, but increments are never lost.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{ErrorKind, LookupError};
use crate::lookup::LookupAddr;

/// Reduces a non-empty candidate list to one address.
pub trait ChoiceStrategy: Send + Sync {
    /// Chooses one element of `candidates`, advancing `rotation`.
    ///
    /// Fails with [`ErrorKind::EmptyArray`] on an empty list; the engine
    /// guarantees non-empty input, so that error never reaches callers.
    fn choose_one<'a>(
        &self,
        candidates: &'a [LookupAddr],
        rotation: &AtomicU64,
    ) -> Result<&'a LookupAddr, LookupError>;
}

/// The default strategy: element 0, 1, 2, …, wrapping back to 0.
#[derive(Clone, Copy, Debug, Default)]
pub struct RoundRobin;

impl ChoiceStrategy for RoundRobin {
    fn choose_one<'a>(
        &self,
        candidates: &'a [LookupAddr],
        rotation: &AtomicU64,
    ) -> Result<&'a LookupAddr, LookupError> {
        if candidates.is_empty() {
            return Err(LookupError::new(ErrorKind::EmptyArray));
        }
        let slot = rotation.fetch_add(1, Ordering::AcqRel);
        Ok(&candidates[(slot % candidates.len() as u64) as usize])
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;
    use crate::dns_lru::RecordFamily;

    fn candidates(n: u8) -> Vec<LookupAddr> {
        (1..=n)
            .map(|i| LookupAddr::new(Ipv4Addr::new(10, 0, 0, i).into(), RecordFamily::V4))
            .collect()
    }

    #[test]
    fn test_rotation_wraps() {
        let strategy = RoundRobin;
        let list = candidates(3);
        let rotation = AtomicU64::new(0);
        let picks: Vec<_> = (0..4)
            .map(|_| strategy.choose_one(&list, &rotation).unwrap().ip)
            .collect();
        assert_eq!(
            picks,
            vec![
                "10.0.0.1".parse::<std::net::IpAddr>().unwrap(),
                "10.0.0.2".parse().unwrap(),
                "10.0.0.3".parse().unwrap(),
                "10.0.0.1".parse().unwrap(),
            ]
        );
    }

    #[test]
    fn test_empty_list_is_an_error() {
        let strategy = RoundRobin;
        let rotation = AtomicU64::new(0);
        let err = strategy.choose_one(&[], &rotation).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EmptyArray);
    }

    #[test]
    fn test_single_element_is_stable() {
        let strategy = RoundRobin;
        let list = candidates(1);
        let rotation = AtomicU64::new(7);
        for _ in 0..3 {
            assert_eq!(
                strategy.choose_one(&list, &rotation).unwrap().ip,
                "10.0.0.1".parse::<std::net::IpAddr>().unwrap()
            );
        }
    }
}
