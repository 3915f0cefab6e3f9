// Copyright 2015-2017 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Error types for the lookup engine.
//!
//! Errors are classified by a textual code (the `kind`) rather than by type.
//! The failover policy matches on kinds to decide whether a failure is
//! cacheable and whether expired cache data may be served in its place, and
//! the persistence layer round-trips kinds through their codes.

use std::fmt;

use thiserror::Error;

/// The classification of a lookup failure.
///
/// The first group mirrors the codes a DNS transport reports; the second
/// group is owned by the engine itself (hosts-file access, selection
/// invariants, storage, platform support).
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum ErrorKind {
    /// The hostname does not exist, or no candidate address survived
    /// filtering.
    NotFound,
    /// The query succeeded but returned no records for the family.
    NoData,
    /// The server failed to complete the request.
    ServFail,
    /// The server refused to answer.
    Refused,
    /// The connection to the server was refused.
    ConnRefused,
    /// The query timed out.
    Timeout,
    /// An unrecognized address family was requested.
    BadFamily,
    /// The hostname is not a well-formed name.
    BadName,
    /// The query was malformed.
    BadQuery,
    /// The response was malformed.
    BadResp,
    /// Unsupported flags were passed.
    BadFlags,
    /// Unsupported hints were passed.
    BadHints,
    /// The request was cancelled before it settled.
    Cancelled,
    /// The server rejected the query format.
    FormErr,
    /// Out of memory.
    NoMem,
    /// The name is not known.
    NoName,
    /// The operation is not implemented by the server.
    NotImp,
    /// The resolver has not been initialized.
    NotInitialized,
    /// A selection strategy was handed an empty candidate list. Never
    /// surfaced to callers.
    EmptyArray,
    /// The hosts file does not exist.
    HostsNotFound,
    /// The hosts file exists but could not be read.
    HostsNotReadable,
    /// The hosts file could not be parsed.
    HostsParseError,
    /// No default hosts-file location exists for this operating system.
    UnsupportedPlatform,
    /// The persistence sink failed to read or write.
    Storage,
    /// A failure that does not map onto any known code. The default failover
    /// policy neither caches it nor serves stale data for it.
    Unknown,
}

impl ErrorKind {
    /// The textual code for this kind.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound => "NOTFOUND",
            Self::NoData => "NODATA",
            Self::ServFail => "SERVFAIL",
            Self::Refused => "REFUSED",
            Self::ConnRefused => "CONNREFUSED",
            Self::Timeout => "TIMEOUT",
            Self::BadFamily => "BADFAMILY",
            Self::BadName => "BADNAME",
            Self::BadQuery => "BADQUERY",
            Self::BadResp => "BADRESP",
            Self::BadFlags => "BADFLAGS",
            Self::BadHints => "BADHINTS",
            Self::Cancelled => "CANCELLED",
            Self::FormErr => "FORMERR",
            Self::NoMem => "NOMEM",
            Self::NoName => "NONAME",
            Self::NotImp => "NOTIMP",
            Self::NotInitialized => "NOTINITIALIZED",
            Self::EmptyArray => "EMPTY_ARRAY",
            Self::HostsNotFound => "HOSTS_NOT_FOUND",
            Self::HostsNotReadable => "HOSTS_NOT_READABLE",
            Self::HostsParseError => "HOSTS_PARSE_ERROR",
            Self::UnsupportedPlatform => "UNSUPPORTED_PLATFORM",
            Self::Storage => "STORAGE",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// Parses a textual code back into a kind. Unrecognized codes become
    /// [`ErrorKind::Unknown`].
    pub fn from_code(code: &str) -> Self {
        match code {
            "NOTFOUND" => Self::NotFound,
            "NODATA" => Self::NoData,
            "SERVFAIL" => Self::ServFail,
            "REFUSED" => Self::Refused,
            "CONNREFUSED" => Self::ConnRefused,
            "TIMEOUT" => Self::Timeout,
            "BADFAMILY" => Self::BadFamily,
            "BADNAME" => Self::BadName,
            "BADQUERY" => Self::BadQuery,
            "BADRESP" => Self::BadResp,
            "BADFLAGS" => Self::BadFlags,
            "BADHINTS" => Self::BadHints,
            "CANCELLED" => Self::Cancelled,
            "FORMERR" => Self::FormErr,
            "NOMEM" => Self::NoMem,
            "NONAME" => Self::NoName,
            "NOTIMP" => Self::NotImp,
            "NOTINITIALIZED" => Self::NotInitialized,
            "EMPTY_ARRAY" => Self::EmptyArray,
            "HOSTS_NOT_FOUND" => Self::HostsNotFound,
            "HOSTS_NOT_READABLE" => Self::HostsNotReadable,
            "HOSTS_PARSE_ERROR" => Self::HostsParseError,
            "UNSUPPORTED_PLATFORM" => Self::UnsupportedPlatform,
            "STORAGE" => Self::Storage,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// An error produced by a lookup, a collaborator service, or the engine
/// itself.
///
/// Cloneable so that a single resolution outcome can be handed to every
/// caller coalesced onto the same in-flight query.
#[derive(Clone, Debug, Error)]
#[error("{kind}: {}", .detail.as_deref().unwrap_or("lookup failed"))]
pub struct LookupError {
    kind: ErrorKind,
    detail: Option<String>,
}

impl LookupError {
    /// A bare error of the given kind.
    pub fn new(kind: ErrorKind) -> Self {
        Self { kind, detail: None }
    }

    /// An error of the given kind with additional human-readable context.
    pub fn with_detail(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: Some(detail.into()),
        }
    }

    /// The classification of this error.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// The textual code, e.g. `"NOTFOUND"`.
    pub fn code(&self) -> &'static str {
        self.kind.code()
    }

    /// Additional context, if any was recorded.
    pub fn detail(&self) -> Option<&str> {
        self.detail.as_deref()
    }
}

impl From<ErrorKind> for LookupError {
    fn from(kind: ErrorKind) -> Self {
        Self::new(kind)
    }
}
