// Copyright 2015-2017 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Local address-family availability, for the `ADDRCONFIG` hint.

use std::net::UdpSocket;

use once_cell::sync::OnceCell;

/// Which address families the local host can actually use.
pub trait NetInterfaces: Send + Sync {
    fn has_ipv4(&self) -> bool;
    fn has_ipv6(&self) -> bool;
}

/// Probes the routing table once per engine by connecting (not sending on)
/// an unbound UDP socket per family.
#[derive(Debug, Default)]
pub struct SystemInterfaces {
    probed: OnceCell<(bool, bool)>,
}

impl SystemInterfaces {
    pub fn new() -> Self {
        Self::default()
    }

    fn families(&self) -> (bool, bool) {
        *self.probed.get_or_init(probe_families)
    }
}

fn probe_families() -> (bool, bool) {
    // connect() on a UDP socket only consults the routing table; no packet
    // leaves the host
    let v4 = UdpSocket::bind(("0.0.0.0", 0))
        .and_then(|socket| socket.connect(("8.8.8.8", 53)))
        .is_ok();
    let v6 = UdpSocket::bind(("::", 0))
        .and_then(|socket| socket.connect(("2001:4860:4860::8888", 53)))
        .is_ok();
    (v4, v6)
}

impl NetInterfaces for SystemInterfaces {
    fn has_ipv4(&self) -> bool {
        self.families().0
    }

    fn has_ipv6(&self) -> bool {
        self.families().1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_is_stable() {
        let interfaces = SystemInterfaces::new();
        let first = (interfaces.has_ipv4(), interfaces.has_ipv6());
        let second = (interfaces.has_ipv4(), interfaces.has_ipv6());
        assert_eq!(first, second);
    }
}
