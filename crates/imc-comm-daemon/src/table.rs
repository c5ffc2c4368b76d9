// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Peer table rendering for the periodic dump.

use imc_comm::{PeerSnapshot, RouterStats};

pub const HEADER: &str = "ID     NAME                     KIND             STATE     ENDPOINT               AUTHORITY";

/// One line per peer, sorted by id.
pub fn rows(peers: &[PeerSnapshot]) -> Vec<String> {
    let mut sorted: Vec<&PeerSnapshot> = peers.iter().collect();
    sorted.sort_by_key(|p| p.id);
    sorted.into_iter().map(row).collect()
}

fn row(peer: &PeerSnapshot) -> String {
    format!(
        "{:<6} {:<24} {:<16} {:<9} {:<22} {:?}",
        peer.id.to_string(),
        truncate(&peer.name, 24),
        peer.kind.to_string(),
        if peer.active { "active" } else { "inactive" },
        endpoint(peer),
        peer.authority,
    )
}

fn endpoint(peer: &PeerSnapshot) -> String {
    let ep = &peer.endpoints;
    if ep.host.is_empty() {
        return "-".to_string();
    }
    let mut text = ep.host.clone();
    if ep.udp_enabled && ep.udp_port != 0 {
        text.push_str(&format!(" u{}", ep.udp_port));
    }
    if ep.tcp_enabled && ep.tcp_port != 0 {
        text.push_str(&format!(" t{}", ep.tcp_port));
    }
    if ep.host_guessed {
        text.push('?');
    }
    text
}

fn truncate(name: &str, width: usize) -> String {
    if name.chars().count() <= width {
        name.to_string()
    } else {
        let head: String = name.chars().take(width - 1).collect();
        format!("{}~", head)
    }
}

pub fn summary(peers: &[PeerSnapshot], stats: &RouterStats) -> String {
    let active = peers.iter().filter(|p| p.active).count();
    format!(
        "{} peers ({} active) | in {} dropped {} redirected {} | out {} failed {}",
        peers.len(),
        active,
        stats.inbound,
        stats.dropped,
        stats.redirected,
        stats.sent,
        stats.send_failures,
    )
}
