// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Service URI lists carried by announces.
//!
//! The `services` field is a `;`-joined list of URIs:
//!
//! ```text
//! neptus://0.0.0.0/uid/1294925553839/;imc+udp://10.0.0.5:6002/;imc+tcp://10.0.0.5:6001/;
//! ```

use std::net::{IpAddr, SocketAddr, ToSocketAddrs};

pub const SCHEME_UDP: &str = "imc+udp";
pub const SCHEME_TCP: &str = "imc+tcp";
pub const SCHEME_NEPTUS: &str = "neptus";
pub const SCHEME_DUNE: &str = "dune";
pub const SCHEME_INFO: &str = "imc+info";
pub const SCHEME_HEADING: &str = "heading";

/// One parsed `scheme://host[:port]/path` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceUri {
    pub scheme: String,
    pub host: String,
    pub port: Option<u16>,
    pub path: String,
}

impl ServiceUri {
    pub fn parse(text: &str) -> Option<Self> {
        let (scheme, rest) = text.trim().split_once("://")?;
        if scheme.is_empty() {
            return None;
        }
        let (authority, path) = match rest.find('/') {
            Some(idx) => (&rest[..idx], &rest[idx..]),
            None => (rest, "/"),
        };
        let (host, port) = match authority.rsplit_once(':') {
            Some((h, p)) if !h.contains(']') || h.ends_with(']') => (h, Some(p.parse().ok()?)),
            _ => (authority, None),
        };
        Some(Self {
            scheme: scheme.to_ascii_lowercase(),
            host: host.trim_start_matches('[').trim_end_matches(']').to_string(),
            port,
            path: path.to_string(),
        })
    }

    /// Resolve to a socket address. Literal IPs never touch DNS.
    pub fn socket_addr(&self) -> Option<SocketAddr> {
        let port = self.port?;
        if let Ok(ip) = self.host.parse::<IpAddr>() {
            return Some(SocketAddr::new(ip, port));
        }
        (self.host.as_str(), port)
            .to_socket_addrs()
            .ok()?
            .find(SocketAddr::is_ipv4)
    }
}

/// Iterate the entries of a services string.
pub fn parse_services(services: &str) -> impl Iterator<Item = ServiceUri> + '_ {
    services
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(ServiceUri::parse)
}

/// Socket addresses advertised for `scheme`, in announce order.
/// Entries without a usable port are skipped.
pub fn endpoints_for_scheme(services: &str, scheme: &str) -> Vec<SocketAddr> {
    parse_services(services)
        .filter(|uri| uri.scheme.eq_ignore_ascii_case(scheme))
        .filter(|uri| matches!(uri.port, Some(p) if p != 0))
        .filter_map(|uri| uri.socket_addr())
        .collect()
}

/// True if a service `name` is offered under `scheme`. `"*"` matches any
/// scheme or any name.
pub fn service_provided(services: &str, scheme: &str, name: &str) -> bool {
    parse_services(services).any(|uri| {
        (scheme == "*" || uri.scheme.eq_ignore_ascii_case(scheme))
            && (name == "*" || uri.path.starts_with(&format!("/{}", name)))
    })
}

/// Instance token: first `<scheme>://host/uid/<token>/` entry, else the first
/// `dune://` entry path.
pub fn uid_from_services(services: &str) -> Option<String> {
    let entries: Vec<ServiceUri> = parse_services(services).collect();
    let from_uid = entries.iter().find_map(|uri| {
        let rest = uri.path.strip_prefix("/uid/")?;
        let token = rest.trim_end_matches('/');
        (!token.is_empty()).then(|| token.to_string())
    });
    from_uid.or_else(|| {
        entries
            .iter()
            .find(|uri| uri.scheme == SCHEME_DUNE)
            .map(|uri| format!("{}{}", uri.host, uri.path))
    })
}

/// Heading in degrees from a `heading://0.0.0.0/<deg>/` entry.
pub fn heading_from_services(services: &str) -> Option<f64> {
    parse_services(services)
        .filter(|uri| uri.scheme == SCHEME_HEADING)
        .find_map(|uri| uri.path.trim_matches('/').parse::<f64>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SERVICES: &str = "neptus://0.0.0.0/uid/1294925553839/;neptus://0.0.0.0/version/5.0/;\
        imc+udp://10.0.0.5:6002/;imc+udp://192.168.1.5:6002/;imc+tcp://10.0.0.5:6001/;\
        http://10.0.0.5:8080/dune/acoustic/;heading://0.0.0.0/93.5/";

    #[test]
    fn test_parse_uri() {
        let uri = ServiceUri::parse("imc+udp://10.0.0.5:6002/").unwrap();
        assert_eq!(uri.scheme, "imc+udp");
        assert_eq!(uri.host, "10.0.0.5");
        assert_eq!(uri.port, Some(6002));
        assert_eq!(uri.path, "/");
        assert!(ServiceUri::parse("not a uri").is_none());
    }

    #[test]
    fn test_endpoints_for_scheme() {
        let udp = endpoints_for_scheme(SERVICES, SCHEME_UDP);
        assert_eq!(udp.len(), 2);
        assert_eq!(udp[0], "10.0.0.5:6002".parse().unwrap());
        let tcp = endpoints_for_scheme(SERVICES, SCHEME_TCP);
        assert_eq!(tcp, vec!["10.0.0.5:6001".parse().unwrap()]);
    }

    #[test]
    fn test_endpoints_skip_port_zero() {
        let list = endpoints_for_scheme("imc+udp://10.0.0.5:0/;imc+udp://10.0.0.6/", SCHEME_UDP);
        assert!(list.is_empty());
    }

    #[test]
    fn test_service_provided() {
        assert!(service_provided(SERVICES, "*", "dune/acoustic"));
        assert!(service_provided(SERVICES, "http", "*"));
        assert!(!service_provided(SERVICES, "ftp", "*"));
        assert!(!service_provided(SERVICES, "http", "camera"));
    }

    #[test]
    fn test_uid_from_services() {
        assert_eq!(uid_from_services(SERVICES).as_deref(), Some("1294925553839"));
        assert_eq!(
            uid_from_services("dune://10.0.0.5/lauv/;").as_deref(),
            Some("10.0.0.5/lauv/")
        );
        assert_eq!(uid_from_services("imc+udp://10.0.0.5:6002/"), None);
    }

    #[test]
    fn test_heading_from_services() {
        assert_eq!(heading_from_services(SERVICES), Some(93.5));
        assert_eq!(heading_from_services("imc+udp://10.0.0.5:6002/"), None);
    }
}
