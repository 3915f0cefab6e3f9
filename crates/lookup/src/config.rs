// Copyright 2015-2017 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Per-call lookup options and their normalization.
//!
//! The option surface is compatible with a conventional host-resolution call:
//! single vs all addresses, an address-family filter with numeric and textual
//! aliases, resolution hints, and result ordering including the deprecated
//! `verbatim` flag.

use bitflags::bitflags;

use crate::error::{ErrorKind, LookupError};

/// The address family filter for a lookup.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum Family {
    /// No filter; both A and AAAA records are considered.
    #[default]
    Unspec,
    /// IPv4 only.
    V4,
    /// IPv6 only.
    V6,
}

impl Family {
    /// Translates the conventional numeric encoding: `0`, `4` or `6`.
    pub fn from_number(family: u8) -> Result<Self, LookupError> {
        match family {
            0 => Ok(Self::Unspec),
            4 => Ok(Self::V4),
            6 => Ok(Self::V6),
            other => Err(LookupError::with_detail(
                ErrorKind::BadFamily,
                format!("unrecognized address family {other}"),
            )),
        }
    }

    /// Accepts the textual aliases `"IPv4"` and `"IPv6"` along with the
    /// numeric encodings.
    pub fn parse(family: &str) -> Result<Self, LookupError> {
        match family {
            "0" => Ok(Self::Unspec),
            "4" | "IPv4" | "ipv4" => Ok(Self::V4),
            "6" | "IPv6" | "ipv6" => Ok(Self::V6),
            other => Err(LookupError::with_detail(
                ErrorKind::BadFamily,
                format!("unrecognized address family {other:?}"),
            )),
        }
    }

    /// The numeric encoding, `0`, `4` or `6`.
    pub fn number(&self) -> u8 {
        match self {
            Self::Unspec => 0,
            Self::V4 => 4,
            Self::V6 => 6,
        }
    }
}

bitflags! {
    /// Resolution hints, a bit-OR compatible with the system lookup call.
    #[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
    pub struct Hints: u8 {
        /// Only query families for which a local interface is configured.
        /// Hosts-file and IP-literal answers are never filtered by this
        /// hint.
        const ADDRCONFIG = 0b0001;
        /// With [`Family::V6`], map IPv4 answers into IPv6 space
        /// (`::ffff:a.b.c.d`) when no IPv6 answers exist.
        const V4MAPPED = 0b0010;
        /// With [`Family::V6`] and [`Hints::V4MAPPED`], return both the
        /// IPv6 answers and the mapped IPv4 answers.
        const ALL = 0b0100;
    }
}

/// Ordering of the combined candidate list when both families are fetched.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum IpOrder {
    /// Keep per-family response order, IPv4-family block first.
    #[default]
    Verbatim,
    /// All IPv4 candidates before all IPv6 candidates.
    Ipv4First,
    /// All IPv6 candidates before all IPv4 candidates.
    Ipv6First,
}

/// Options for a single lookup call.
///
/// ```
/// use hostlookup::{Family, Hints, LookupOptions};
///
/// let opts = LookupOptions::default()
///     .all(true)
///     .family(Family::V6)
///     .hints(Hints::V4MAPPED);
/// ```
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct LookupOptions {
    all: bool,
    family: Family,
    hints: Hints,
    order: Option<IpOrder>,
    verbatim: Option<bool>,
}

impl LookupOptions {
    /// Return every candidate address instead of a single one.
    pub fn all(mut self, all: bool) -> Self {
        self.all = all;
        self
    }

    /// Restrict results to one address family.
    pub fn family(mut self, family: Family) -> Self {
        self.family = family;
        self
    }

    /// Set the resolution hints.
    pub fn hints(mut self, hints: Hints) -> Self {
        self.hints = hints;
        self
    }

    /// Set the candidate ordering.
    pub fn order(mut self, order: IpOrder) -> Self {
        self.order = Some(order);
        self
    }

    /// Legacy ordering flag. `verbatim = false` selects
    /// [`IpOrder::Ipv4First`] when no explicit [`Self::order`] is given.
    #[deprecated(note = "use `order` instead")]
    pub fn verbatim(mut self, verbatim: bool) -> Self {
        self.verbatim = Some(verbatim);
        self
    }

    /// Applies defaults and the legacy `verbatim` translation.
    pub(crate) fn normalize(&self) -> ResolvedOptions {
        let order = match (self.order, self.verbatim) {
            (Some(order), _) => order,
            (None, Some(false)) => IpOrder::Ipv4First,
            (None, _) => IpOrder::Verbatim,
        };
        ResolvedOptions {
            all: self.all,
            family: self.family,
            hints: self.hints,
            order,
        }
    }
}

/// Fully defaulted options, as consumed by the request pipeline.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct ResolvedOptions {
    pub(crate) all: bool,
    pub(crate) family: Family,
    pub(crate) hints: Hints,
    pub(crate) order: IpOrder,
}
