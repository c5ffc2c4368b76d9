// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! IMC communication daemon
//!
//! Runs a standalone IMC node: announces itself on the multicast ports,
//! discovers peers, tracks their reachability and routes their traffic.
//!
//! # Usage
//!
//! ```bash
//! # Defaults (id 40:00, udp/tcp 6001, multicast 30100-30104)
//! imc-commd
//!
//! # Custom identity and ports
//! imc-commd --id 0x4001 --name ccu-lab --udp-port 6002 --tcp-port 6002
//!
//! # From a file, dumping the peer table every 10s
//! imc-commd --config node.json --table-interval 10
//! ```

use clap::Parser;
use imc_comm::{MessageRouter, PeerEvent, PeerId};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

mod config;
mod table;

pub use config::NodeConfig;

/// IMC communication daemon - peer discovery and message routing
#[derive(Parser, Debug)]
#[command(name = "imc-commd")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file (JSON format)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Local IMC id ("40:01", "0x4001" or decimal)
    #[arg(long)]
    id: Option<String>,

    /// System name announced to peers
    #[arg(short, long)]
    name: Option<String>,

    /// UDP unicast port
    #[arg(long)]
    udp_port: Option<u16>,

    /// TCP port
    #[arg(long)]
    tcp_port: Option<u16>,

    /// Multicast ports ("30100-30104" or "30100,30102")
    #[arg(long)]
    multicast_ports: Option<String>,

    /// Disable the multicast transport
    #[arg(long, default_value = "false")]
    no_multicast: bool,

    /// Seconds between peer table dumps (0 disables)
    #[arg(long)]
    table_interval: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    /// Flags given on the command line win over the file.
    fn apply(&self, node: &mut NodeConfig) -> imc_comm::Result<()> {
        if let Some(id) = &self.id {
            node.comm.local_id = PeerId::parse(id)?;
        }
        if let Some(name) = &self.name {
            node.comm.system_name = name.clone();
        }
        if let Some(port) = self.udp_port {
            node.comm.udp_port = port;
        }
        if let Some(port) = self.tcp_port {
            node.comm.tcp_port = port;
        }
        if let Some(ports) = &self.multicast_ports {
            node.comm.multicast_ports = ports.clone();
        }
        if self.no_multicast {
            node.comm.multicast_enabled = false;
        }
        if let Some(secs) = self.table_interval {
            node.table_interval_secs = secs;
        }
        Ok(())
    }
}

fn level_of(name: &str) -> Level {
    match name {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

fn log_event(event: &PeerEvent) {
    match event {
        PeerEvent::Added(id) => info!("Peer {} added", id),
        PeerEvent::Removed(id) => info!("Peer {} removed", id),
        PeerEvent::StatusChanged { id, active: true } => info!("Peer {} is active", id),
        PeerEvent::StatusChanged { id, active: false } => warn!("Peer {} went inactive", id),
        PeerEvent::RouterStarted => info!("Router started"),
        PeerEvent::RouterStopped => info!("Router stopped"),
    }
}

fn log_peer_table(router: &MessageRouter) {
    let peers = router.peers();
    info!("{}", table::summary(&peers, &router.stats()));
    if peers.is_empty() {
        return;
    }
    info!("{}", table::HEADER);
    for row in table::rows(&peers) {
        info!("{}", row);
    }
}

fn print_banner(node: &NodeConfig) {
    let comm = &node.comm;
    let onoff = |on: bool, port: u16| {
        if on {
            port.to_string()
        } else {
            "disabled".to_string()
        }
    };

    info!("+----------------------------------------------------+");
    info!(
        "|       IMC Communication Daemon v{}              |",
        env!("CARGO_PKG_VERSION")
    );
    info!("+----------------------------------------------------+");
    info!(
        "|  System: {:40} |",
        format!("{} ({})", comm.system_name, comm.local_id)
    );
    info!("|  UDP:    {:40} |", onoff(comm.udp_enabled, comm.udp_port));
    info!("|  TCP:    {:40} |", onoff(comm.tcp_enabled, comm.tcp_port));
    info!(
        "|  Mcast:  {:40} |",
        if comm.multicast_enabled {
            format!("{} [{}]", comm.multicast_address, comm.multicast_ports)
        } else {
            "disabled".to_string()
        }
    );
    info!(
        "|  Table:  {:40} |",
        match node.table_interval() {
            Some(period) => format!("every {}s", period.as_secs()),
            None => "off".to_string(),
        }
    );
    info!("+----------------------------------------------------+");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // RUST_LOG wins over --log-level; `log` records from the core are bridged
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level_of(&args.log_level).to_string()));

    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .finish()
        .try_init()?;

    let mut node = if let Some(config_path) = &args.config {
        info!("Loading config from {:?}", config_path);
        NodeConfig::from_file(config_path)?
    } else {
        NodeConfig::default()
    };
    args.apply(&mut node)?;
    node.validate()?;

    print_banner(&node);

    let router = Arc::new(
        MessageRouter::builder(node.comm.clone())
            .with_default_transports()?
            .build()?,
    );
    router.register_status_listener(None, Arc::new(log_event));
    router.start()?;

    let table_task = node.table_interval().map(|period| {
        let router = Arc::clone(&router);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                log_peer_table(&router);
            }
        })
    });

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, stopping router...");

    if let Some(task) = table_task {
        task.abort();
    }
    router.stop();
    log_peer_table(&router);

    info!("imc-commd stopped");
    Ok(())
}
