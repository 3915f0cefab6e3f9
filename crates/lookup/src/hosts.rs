// Copyright 2015-2017 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Hosts-file integration.
//!
//! This module is responsible for reading and watching the system hosts
//! file. It reads from the default location on each operating system, e.g.
//! most Unixes have this written to `/etc/hosts`. Parsed entries are
//! installed into a [`HostsSnapshot`] that the engine swaps atomically, so
//! lookups never observe a partially rebuilt table.

use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use cfg_if::cfg_if;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::error::{ErrorKind, LookupError};

/// Invoked by a hosts source after every observed modification.
pub type ChangeSignal = Arc<dyn Fn() + Send + Sync>;

/// One `hostname → address` pair from a hosts file. A line with aliases
/// yields one record per name.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct HostsRecord {
    pub host: String,
    pub ip: IpAddr,
}

/// A source of hosts-file entries, watchable for changes.
#[async_trait]
pub trait HostsSource: Send + Sync {
    /// Reads and parses the current contents.
    async fn read(&self) -> Result<Vec<HostsRecord>, LookupError>;

    /// Starts invoking `on_change` after every modification. Calling this
    /// twice is a no-op.
    fn watch(&self, on_change: ChangeSignal) -> Result<(), LookupError>;

    /// Stops the watcher, if one is running.
    fn stop_watching(&self);
}

cfg_if! {
    if #[cfg(unix)] {
        /// The platform's default hosts-file location.
        ///
        /// Fails with [`ErrorKind::UnsupportedPlatform`] where no default
        /// exists.
        pub fn default_hosts_path() -> Result<PathBuf, LookupError> {
            Ok(PathBuf::from("/etc/hosts"))
        }
    } else if #[cfg(windows)] {
        /// The platform's default hosts-file location.
        ///
        /// Fails with [`ErrorKind::UnsupportedPlatform`] where no default
        /// exists.
        pub fn default_hosts_path() -> Result<PathBuf, LookupError> {
            let root = std::env::var_os("SystemRoot")
                .unwrap_or_else(|| std::ffi::OsString::from(r"C:\Windows"));
            let mut path = PathBuf::from(root);
            path.push(r"System32\drivers\etc\hosts");
            Ok(path)
        }
    } else {
        /// The platform's default hosts-file location.
        ///
        /// Fails with [`ErrorKind::UnsupportedPlatform`] where no default
        /// exists.
        pub fn default_hosts_path() -> Result<PathBuf, LookupError> {
            Err(LookupError::with_detail(
                ErrorKind::UnsupportedPlatform,
                "no default hosts-file location for this platform",
            ))
        }
    }
}

pub fn parse_hosts(data: &str) -> Result<Vec<HostsRecord>, LookupError> {
    let mut records = Vec::new();
    for (index, raw) in data.lines().enumerate() {
        let line = raw.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }
        let mut fields = line.split_whitespace();
        let addr = fields.next().expect("line is non-empty");
        let ip: IpAddr = addr.parse().map_err(|_| {
            LookupError::with_detail(
                ErrorKind::HostsParseError,
                format!("invalid address {addr:?} on line {}", index + 1),
            )
        })?;
        for name in fields {
            records.push(HostsRecord {
                host: name.to_ascii_lowercase(),
                ip,
            });
        }
    }
    Ok(records)
}

/// The system hosts file, watched by polling its metadata.
pub struct SystemHosts {
    path: PathBuf,
    poll_interval: Duration,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl SystemHosts {
    /// The hosts file at the platform default path.
    pub fn new() -> Result<Self, LookupError> {
        Ok(Self::with_path(default_hosts_path()?))
    }

    /// A hosts file at an explicit path.
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            poll_interval: Duration::from_secs(5),
            watcher: Mutex::new(None),
        }
    }

    /// Overrides how often the file's metadata is polled for changes.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

impl Drop for SystemHosts {
    fn drop(&mut self) {
        self.stop_watching();
    }
}

type FileStamp = Option<(SystemTime, u64)>;

async fn stat(path: &std::path::Path) -> FileStamp {
    let meta = tokio::fs::metadata(path).await.ok()?;
    Some((
        meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
        meta.len(),
    ))
}

#[async_trait]
impl HostsSource for SystemHosts {
    async fn read(&self) -> Result<Vec<HostsRecord>, LookupError> {
        let data = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|err| match err.kind() {
                io::ErrorKind::NotFound => LookupError::with_detail(
                    ErrorKind::HostsNotFound,
                    format!("{}: {err}", self.path.display()),
                ),
                _ => LookupError::with_detail(
                    ErrorKind::HostsNotReadable,
                    format!("{}: {err}", self.path.display()),
                ),
            })?;
        parse_hosts(&data)
    }

    fn watch(&self, on_change: ChangeSignal) -> Result<(), LookupError> {
        let mut watcher = self.watcher.lock();
        if watcher.is_some() {
            return Ok(());
        }
        let path = self.path.clone();
        let poll_interval = self.poll_interval;
        *watcher = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // prime the stamp so the first tick doesn't fire a change
            ticker.tick().await;
            let mut last = stat(&path).await;
            loop {
                ticker.tick().await;
                let current = stat(&path).await;
                if current != last {
                    last = current;
                    on_change();
                }
            }
        }));
        Ok(())
    }

    fn stop_watching(&self) {
        if let Some(handle) = self.watcher.lock().take() {
            handle.abort();
        }
    }
}

/// Addresses for one hostname, split by family.
#[derive(Debug, Default)]
pub struct HostAddrs {
    pub v4: Vec<Ipv4Addr>,
    pub v6: Vec<Ipv6Addr>,
    rotation: AtomicU64,
}

impl HostAddrs {
    pub(crate) fn rotation(&self) -> &AtomicU64 {
        &self.rotation
    }
}

/// An immutable view of the hosts file, rebuilt whole on every change.
#[derive(Debug, Default)]
pub struct HostsSnapshot {
    map: HashMap<String, HostAddrs>,
}

impl HostsSnapshot {
    pub fn from_records(records: &[HostsRecord]) -> Self {
        let mut map: HashMap<String, HostAddrs> = HashMap::new();
        for record in records {
            let addrs = map.entry(record.host.clone()).or_default();
            match record.ip {
                IpAddr::V4(v4) => addrs.v4.push(v4),
                IpAddr::V6(v6) => addrs.v6.push(v6),
            }
        }
        Self { map }
    }

    /// Looks up a hostname. The caller is expected to pass a lowercased
    /// name; records are stored lowercased.
    pub fn get(&self, host: &str) -> Option<&HostAddrs> {
        self.map.get(host)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}
