// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Host network discovery for the passive-mode address

use async_trait::async_trait;
use std::net::{IpAddr, Ipv4Addr, UdpSocket};
use tracing::debug;

/// Well-known public address used only to select the default route.
/// Connecting a UDP socket sends no packets.
const ROUTE_PROBE_TARGET: (Ipv4Addr, u16) = (Ipv4Addr::new(192, 0, 2, 1), 9);

#[async_trait]
pub trait AddressProbe: Send + Sync {
    /// The host's name, when it is fully qualified
    fn fqdn(&self) -> Option<String>;

    /// Whether `host` resolves to at least one address
    async fn resolves(&self, host: &str) -> bool;

    /// Source address of the default route
    fn primary_ipv4(&self) -> Option<Ipv4Addr>;
}

pub struct SystemAddressProbe;

#[async_trait]
impl AddressProbe for SystemAddressProbe {
    fn fqdn(&self) -> Option<String> {
        let name = hostname::get().ok()?.into_string().ok()?;
        let name = name.trim().trim_end_matches('.').to_string();
        if name.contains('.') {
            Some(name)
        } else {
            debug!(hostname = %name, "host name is not fully qualified");
            None
        }
    }

    async fn resolves(&self, host: &str) -> bool {
        match tokio::net::lookup_host((host, 0)).await {
            Ok(mut addrs) => addrs.next().is_some(),
            Err(e) => {
                debug!(host, error = %e, "host name does not resolve");
                false
            }
        }
    }

    fn primary_ipv4(&self) -> Option<Ipv4Addr> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).ok()?;
        socket.connect(ROUTE_PROBE_TARGET).ok()?;
        match socket.local_addr().ok()?.ip() {
            IpAddr::V4(ip) if !ip.is_unspecified() => Some(ip),
            _ => None,
        }
    }
}
