// Copyright 2015-2017 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Outbound-query throttling.
//!
//! [`Throttled`] wraps any [`Resolve`] implementation with a sliding-window
//! rate limit. Calls over the cap are delayed, never rejected: the wrapper
//! changes pacing only, so ordering and error semantics of the inner
//! resolver are preserved. An engine configured without a throttle calls the
//! resolver directly.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{Instant, sleep};

use crate::dns_lru::ResolvedAddress;
use crate::error::LookupError;
use crate::resolve::Resolve;

/// Rate-limit configuration: at most `max_calls` resolver calls per
/// `interval`, across both families.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ThrottleConfig {
    pub max_calls: u32,
    pub interval: Duration,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            max_calls: 100,
            interval: Duration::from_secs(1),
        }
    }
}

/// A [`Resolve`] wrapper that paces calls through a sliding window.
pub struct Throttled {
    inner: Arc<dyn Resolve>,
    config: ThrottleConfig,
    window: tokio::sync::Mutex<VecDeque<Instant>>,
}

impl Throttled {
    /// A cap of zero would never admit a call; it is clamped to one.
    pub fn new(inner: Arc<dyn Resolve>, config: ThrottleConfig) -> Self {
        let config = ThrottleConfig {
            max_calls: config.max_calls.max(1),
            ..config
        };
        Self {
            inner,
            config,
            window: tokio::sync::Mutex::new(VecDeque::with_capacity(config.max_calls as usize)),
        }
    }

    /// Waits until a slot in the window is free, then claims it.
    async fn acquire(&self) {
        loop {
            let wait = {
                let mut window = self.window.lock().await;
                let now = Instant::now();
                while window
                    .front()
                    .is_some_and(|&stamp| now.duration_since(stamp) >= self.config.interval)
                {
                    window.pop_front();
                }
                if (window.len() as u32) < self.config.max_calls {
                    window.push_back(now);
                    return;
                }
                // oldest call in the window determines when a slot opens
                *window.front().expect("window is non-empty") + self.config.interval - now
            };
            sleep(wait).await;
        }
    }
}

#[async_trait]
impl Resolve for Throttled {
    async fn resolve4(&self, host: &str) -> Result<Vec<ResolvedAddress>, LookupError> {
        self.acquire().await;
        self.inner.resolve4(host).await
    }

    async fn resolve6(&self, host: &str) -> Result<Vec<ResolvedAddress>, LookupError> {
        self.acquire().await;
        self.inner.resolve6(host).await
    }
}
