// Copyright 2015-2017 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Optional cache persistence.
//!
//! The engine serializes its cache into an opaque blob on teardown and
//! rehydrates from it on bootstrap. Timestamps are persisted as wall-clock
//! milliseconds; on reload they are translated back into monotonic time, so
//! entries whose TTL elapsed while the process was down come back *stale*
//! and remain reachable through the expired-cache policy.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::debug;

use crate::dns_lru::{CacheKey, CacheSlot, FailureEntry, RecordFamily, ResolvedAddress, SuccessEntry};
use crate::error::{ErrorKind, LookupError};

/// Reads and writes a single opaque blob.
#[async_trait]
pub trait PersistentStore: Send + Sync {
    /// Returns the stored blob, or `None` if nothing has been written yet.
    async fn read(&self) -> Result<Option<Vec<u8>>, LookupError>;

    /// Replaces the stored blob.
    async fn write(&self, blob: &[u8]) -> Result<(), LookupError>;
}

/// Blob storage in a single file.
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl PersistentStore for FileStore {
    async fn read(&self) -> Result<Option<Vec<u8>>, LookupError> {
        match tokio::fs::read(&self.path).await {
            Ok(blob) => Ok(Some(blob)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(LookupError::with_detail(
                ErrorKind::Storage,
                format!("{}: {err}", self.path.display()),
            )),
        }
    }

    async fn write(&self, blob: &[u8]) -> Result<(), LookupError> {
        tokio::fs::write(&self.path, blob).await.map_err(|err| {
            LookupError::with_detail(
                ErrorKind::Storage,
                format!("{}: {err}", self.path.display()),
            )
        })
    }
}

const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Deserialize, Serialize)]
struct PersistedCache {
    version: u32,
    entries: Vec<PersistedEntry>,
}

#[derive(Debug, Deserialize, Serialize)]
struct PersistedEntry {
    host: String,
    family: u8,
    fetched_at_ms: u64,
    expires_at_ms: u64,
    outcome: PersistedOutcome,
}

#[derive(Debug, Deserialize, Serialize)]
enum PersistedOutcome {
    Success { addresses: Vec<PersistedAddress> },
    Failure { code: String },
}

#[derive(Debug, Deserialize, Serialize)]
struct PersistedAddress {
    address: std::net::IpAddr,
    ttl: u32,
}

/// Anchors monotonic instants to the wall clock for (de)serialization.
struct ClockAnchor {
    wall: SystemTime,
    mono: Instant,
}

impl ClockAnchor {
    fn now() -> Self {
        Self {
            wall: SystemTime::now(),
            mono: Instant::now(),
        }
    }

    fn to_unix_ms(&self, instant: Instant) -> u64 {
        let wall = if instant >= self.mono {
            self.wall.checked_add(instant - self.mono)
        } else {
            self.wall.checked_sub(self.mono - instant)
        };
        wall.and_then(|w| w.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }

    /// Translates a unix timestamp back to monotonic time. Returns `None`
    /// when the timestamp is too far in the past to represent.
    fn from_unix_ms(&self, unix_ms: u64) -> Option<Instant> {
        let wall = UNIX_EPOCH.checked_add(Duration::from_millis(unix_ms))?;
        match wall.duration_since(self.wall) {
            Ok(ahead) => Some(self.mono + ahead),
            Err(err) => self.mono.checked_sub(err.duration()),
        }
    }
}

/// Serializes cache entries into a blob. Inverse of [`decode_entries`].
pub(crate) fn encode_entries(entries: &[(CacheKey, CacheSlot)]) -> Result<Vec<u8>, LookupError> {
    let anchor = ClockAnchor::now();
    let mut persisted = Vec::new();
    for (key, slot) in entries {
        if let Some(success) = &slot.success {
            persisted.push(PersistedEntry {
                host: key.host().to_owned(),
                family: key.family().number(),
                fetched_at_ms: anchor.to_unix_ms(success.fetched_at()),
                expires_at_ms: anchor.to_unix_ms(success.expires_at()),
                outcome: PersistedOutcome::Success {
                    addresses: success
                        .addresses()
                        .iter()
                        .map(|addr| PersistedAddress {
                            address: addr.ip,
                            ttl: addr.ttl,
                        })
                        .collect(),
                },
            });
        }
        if let Some(failure) = &slot.failure {
            persisted.push(PersistedEntry {
                host: key.host().to_owned(),
                family: key.family().number(),
                fetched_at_ms: anchor.to_unix_ms(failure.fetched_at),
                expires_at_ms: anchor.to_unix_ms(failure.expires_at),
                outcome: PersistedOutcome::Failure {
                    code: failure.error.code().to_owned(),
                },
            });
        }
    }
    serde_json::to_vec(&PersistedCache {
        version: FORMAT_VERSION,
        entries: persisted,
    })
    .map_err(|err| LookupError::with_detail(ErrorKind::Storage, format!("serialize: {err}")))
}

/// Deserializes a blob back into cache entries. Entries whose timestamps
/// cannot be represented any more are dropped.
pub(crate) fn decode_entries(blob: &[u8]) -> Result<Vec<(CacheKey, CacheSlot)>, LookupError> {
    let cache: PersistedCache = serde_json::from_slice(blob)
        .map_err(|err| LookupError::with_detail(ErrorKind::Storage, format!("deserialize: {err}")))?;
    if cache.version != FORMAT_VERSION {
        return Err(LookupError::with_detail(
            ErrorKind::Storage,
            format!("unsupported cache format version {}", cache.version),
        ));
    }

    let anchor = ClockAnchor::now();
    let mut slots: std::collections::HashMap<CacheKey, CacheSlot> = std::collections::HashMap::new();
    let mut dropped = 0usize;
    for entry in cache.entries {
        let family = match entry.family {
            4 => RecordFamily::V4,
            6 => RecordFamily::V6,
            _ => {
                dropped += 1;
                continue;
            }
        };
        let (Some(fetched_at), Some(expires_at)) = (
            anchor.from_unix_ms(entry.fetched_at_ms),
            anchor.from_unix_ms(entry.expires_at_ms),
        ) else {
            dropped += 1;
            continue;
        };
        let key = CacheKey::new(&entry.host, family);
        let slot = slots.entry(key).or_default();
        match entry.outcome {
            PersistedOutcome::Success { addresses } => {
                slot.success = Some(Arc::new(SuccessEntry::with_expiry(
                    addresses
                        .into_iter()
                        .map(|addr| ResolvedAddress::new(addr.address, addr.ttl))
                        .collect(),
                    fetched_at,
                    expires_at,
                )));
            }
            PersistedOutcome::Failure { code } => {
                slot.failure = Some(Arc::new(FailureEntry {
                    error: LookupError::new(ErrorKind::from_code(&code)),
                    fetched_at,
                    expires_at,
                }));
            }
        }
    }
    if dropped > 0 {
        debug!("dropped {dropped} unrepresentable persisted cache entries");
    }
    Ok(slots.into_iter().collect())
}
