// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! IPv4 interface discovery.
//!
//! - Linux: parses `ip -4 addr show` (address and `brd` broadcast)
//! - other platforms, or when `ip` is missing: `local_ip_address`, with the
//!   limited broadcast address

use arc_swap::ArcSwap;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// How long a discovered interface list is reused.
pub const INTERFACE_CACHE_TTL: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetInterface {
    pub addr: Ipv4Addr,
    pub broadcast: Option<Ipv4Addr>,
}

impl NetInterface {
    pub fn is_loopback(&self) -> bool {
        self.addr.is_loopback()
    }
}

/// Source of the local interface list.
pub trait InterfaceProvider: Send + Sync {
    fn interfaces(&self) -> Vec<NetInterface>;

    /// Addresses to advertise: non-loopback ones, or loopback if that is
    /// all there is.
    fn announce_addresses(&self) -> Vec<Ipv4Addr> {
        let all = self.interfaces();
        let external: Vec<Ipv4Addr> = all
            .iter()
            .filter(|i| !i.is_loopback())
            .map(|i| i.addr)
            .collect();
        if external.is_empty() {
            all.iter().map(|i| i.addr).collect()
        } else {
            external
        }
    }

    fn broadcast_addresses(&self) -> Vec<Ipv4Addr> {
        let mut out: Vec<Ipv4Addr> = self
            .interfaces()
            .iter()
            .filter(|i| !i.is_loopback())
            .filter_map(|i| i.broadcast)
            .collect();
        out.dedup();
        out
    }

    fn is_local_address(&self, ip: IpAddr) -> bool {
        match ip {
            IpAddr::V4(v4) => v4.is_loopback() || self.interfaces().iter().any(|i| i.addr == v4),
            IpAddr::V6(v6) => v6.is_loopback(),
        }
    }
}

/// Fixed interface list (tests, pinned deployments).
#[derive(Debug, Clone, Default)]
pub struct StaticInterfaces(pub Vec<NetInterface>);

impl InterfaceProvider for StaticInterfaces {
    fn interfaces(&self) -> Vec<NetInterface> {
        self.0.clone()
    }
}

struct Cached {
    at: Instant,
    list: Vec<NetInterface>,
}

/// Host interfaces, rediscovered at most every [`INTERFACE_CACHE_TTL`].
pub struct SystemInterfaces {
    cache: ArcSwap<Cached>,
}

impl Default for SystemInterfaces {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemInterfaces {
    pub fn new() -> Self {
        Self {
            cache: ArcSwap::from_pointee(Cached {
                at: Instant::now(),
                list: discover(),
            }),
        }
    }
}

impl InterfaceProvider for SystemInterfaces {
    fn interfaces(&self) -> Vec<NetInterface> {
        let current = self.cache.load();
        if current.at.elapsed() < INTERFACE_CACHE_TTL {
            return current.list.clone();
        }
        let list = discover();
        self.cache.store(Arc::new(Cached {
            at: Instant::now(),
            list: list.clone(),
        }));
        list
    }
}

/// Discover IPv4 interfaces, loopback included.
pub fn discover() -> Vec<NetInterface> {
    let mut list = discover_platform();
    if !list.iter().any(NetInterface::is_loopback) {
        list.push(NetInterface {
            addr: Ipv4Addr::LOCALHOST,
            broadcast: None,
        });
    }
    list
}

#[cfg(target_os = "linux")]
fn discover_platform() -> Vec<NetInterface> {
    use std::process::Command;

    match Command::new("ip").args(["-4", "addr", "show"]).output() {
        Ok(out) if out.status.success() => {
            let list = parse_ip_addr_output(&String::from_utf8_lossy(&out.stdout));
            if list.is_empty() {
                discover_portable()
            } else {
                list
            }
        }
        _ => {
            log::debug!("[NetIf] 'ip' command not available, using local_ip_address");
            discover_portable()
        }
    }
}

#[cfg(not(target_os = "linux"))]
fn discover_platform() -> Vec<NetInterface> {
    discover_portable()
}

fn discover_portable() -> Vec<NetInterface> {
    let netifs = match local_ip_address::list_afinet_netifas() {
        Ok(n) => n,
        Err(e) => {
            log::debug!("[NetIf] failed to list interfaces: {}", e);
            return Vec::new();
        }
    };
    let mut out = Vec::new();
    for (_name, ip) in netifs {
        if let IpAddr::V4(addr) = ip {
            let broadcast = (!addr.is_loopback()).then_some(Ipv4Addr::BROADCAST);
            if !out.iter().any(|i: &NetInterface| i.addr == addr) {
                out.push(NetInterface { addr, broadcast });
            }
        }
    }
    out
}

/// Parse the `inet` lines of `ip -4 addr show`:
///
/// ```text
///     inet 192.168.1.20/24 brd 192.168.1.255 scope global dynamic wlan0
/// ```
pub fn parse_ip_addr_output(text: &str) -> Vec<NetInterface> {
    let mut out = Vec::new();
    for line in text.lines() {
        let Some(rest) = line.trim().strip_prefix("inet ") else {
            continue;
        };
        let mut fields = rest.split_whitespace();
        let Some(addr) = fields
            .next()
            .and_then(|cidr| cidr.split('/').next())
            .and_then(|a| a.parse::<Ipv4Addr>().ok())
        else {
            continue;
        };
        let mut broadcast = None;
        while let Some(field) = fields.next() {
            if field == "brd" {
                broadcast = fields.next().and_then(|b| b.parse().ok());
                break;
            }
        }
        out.push(NetInterface { addr, broadcast });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
1: lo: <LOOPBACK,UP,LOWER_UP> mtu 65536 qdisc noqueue state UNKNOWN group default qlen 1000
    inet 127.0.0.1/8 scope host lo
       valid_lft forever preferred_lft forever
2: eth0: <BROADCAST,MULTICAST,UP,LOWER_UP> mtu 1500 qdisc fq_codel state UP group default qlen 1000
    inet 10.0.0.2/24 brd 10.0.0.255 scope global eth0
       valid_lft forever preferred_lft forever
3: tun0: <POINTOPOINT,MULTICAST,NOARP,UP,LOWER_UP> mtu 1500 qdisc fq_codel state UNKNOWN
    inet 172.16.0.9/32 scope global tun0
";

    fn make_iface(addr: &str, brd: Option<&str>) -> NetInterface {
        NetInterface {
            addr: addr.parse().unwrap(),
            broadcast: brd.map(|b| b.parse().unwrap()),
        }
    }

    #[test]
    fn test_parse_ip_output() {
        let list = parse_ip_addr_output(SAMPLE);
        assert_eq!(
            list,
            vec![
                make_iface("127.0.0.1", None),
                make_iface("10.0.0.2", Some("10.0.0.255")),
                make_iface("172.16.0.9", None),
            ]
        );
    }

    #[test]
    fn test_announce_addresses_skip_loopback() {
        let provider = StaticInterfaces(parse_ip_addr_output(SAMPLE));
        let addrs = provider.announce_addresses();
        assert_eq!(addrs.len(), 2);
        assert!(!addrs.contains(&Ipv4Addr::LOCALHOST));
        assert_eq!(
            provider.broadcast_addresses(),
            vec!["10.0.0.255".parse::<Ipv4Addr>().unwrap()]
        );
    }

    #[test]
    fn test_loopback_only_host() {
        let provider = StaticInterfaces(vec![make_iface("127.0.0.1", None)]);
        assert_eq!(provider.announce_addresses(), vec![Ipv4Addr::LOCALHOST]);
        assert!(provider.broadcast_addresses().is_empty());
    }

    #[test]
    fn test_is_local_address() {
        let provider = StaticInterfaces(parse_ip_addr_output(SAMPLE));
        assert!(provider.is_local_address("10.0.0.2".parse().unwrap()));
        assert!(provider.is_local_address("127.0.0.1".parse().unwrap()));
        assert!(!provider.is_local_address("10.0.0.3".parse().unwrap()));
    }

    #[test]
    fn test_system_discovery_has_loopback() {
        let list = discover();
        assert!(list.iter().any(NetInterface::is_loopback));
    }
}
