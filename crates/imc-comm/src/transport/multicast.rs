// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Multicast and broadcast transport for the announce ports.
//!
//! One socket per configured port, each joined to the group on every IPv4
//! interface and bound with address/port reuse so several nodes can share a
//! host. Each socket has its own receive thread; outbound datagrams (to the
//! group or to a broadcast address) leave through a single sender thread.

use super::net_if::NetInterface;
use super::udp::{self, Outgoing, SendQueue, DEFAULT_SEND_QUEUE};
use super::{InboundHandler, Transport, TransportKind};
use crate::delivery::DeliveryCallback;
use crate::error::{CommError, Result};
use crate::message::{ImcMessage, WireCodec};
use parking_lot::Mutex;
use std::io;
use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

/// Join `group` on every interface in `interfaces` (or on the unspecified
/// interface if the list is empty). Per-interface failures are not fatal.
pub fn join_multicast_group(
    socket: &UdpSocket,
    group: Ipv4Addr,
    interfaces: &[NetInterface],
) -> io::Result<usize> {
    let mut joined = 0;
    if interfaces.is_empty() {
        socket.join_multicast_v4(&group, &Ipv4Addr::UNSPECIFIED)?;
        joined += 1;
    }
    for iface in interfaces {
        match socket.join_multicast_v4(&group, &iface.addr) {
            Ok(()) => {
                joined += 1;
                log::debug!("[Multicast] joined {} on {}", group, iface.addr);
            }
            // EADDRINUSE: already joined through the same NIC
            Err(e) if e.raw_os_error() == Some(98) => {}
            Err(e) => log::debug!("[Multicast] join {} on {} failed: {}", group, iface.addr, e),
        }
    }
    if joined == 0 {
        socket.join_multicast_v4(&group, &Ipv4Addr::UNSPECIFIED)?;
        joined = 1;
    }
    socket.set_multicast_loop_v4(true)?;
    let _ = socket.set_multicast_ttl_v4(1);
    Ok(joined)
}

pub struct MulticastTransport {
    group: Ipv4Addr,
    ports: Vec<u16>,
    sockets: Vec<Arc<UdpSocket>>,
    codec: Arc<dyn WireCodec>,
    running: Arc<AtomicBool>,
    queue: SendQueue,
    receivers: Mutex<Vec<JoinHandle<()>>>,
}

impl MulticastTransport {
    /// Bind every port and join `group` on `interfaces`. Ports that cannot be
    /// bound are skipped; at least one must succeed.
    pub fn bind(
        group: Ipv4Addr,
        ports: &[u16],
        interfaces: &[NetInterface],
        codec: Arc<dyn WireCodec>,
    ) -> Result<Self> {
        let mut sockets = Vec::new();
        let mut bound_ports = Vec::new();
        for &port in ports {
            let socket = match udp::bind_socket(port, true) {
                Ok(s) => s,
                Err(e) => {
                    log::warn!("[Multicast] cannot bind port {}: {}", port, e);
                    continue;
                }
            };
            if let Err(e) = join_multicast_group(&socket, group, interfaces) {
                log::warn!("[Multicast] cannot join {} on port {}: {}", group, port, e);
            }
            sockets.push(Arc::new(socket));
            bound_ports.push(port);
        }
        let Some(first) = sockets.first() else {
            return Err(CommError::Io(io::Error::new(
                io::ErrorKind::AddrNotAvailable,
                "no multicast port could be bound",
            )));
        };
        let queue = SendQueue::start(
            "imc-mcast-send".to_string(),
            Arc::clone(first),
            TransportKind::Multicast,
            DEFAULT_SEND_QUEUE,
        )?;
        log::debug!("[Multicast] group {} on ports {:?}", group, bound_ports);
        Ok(Self {
            group,
            ports: bound_ports,
            sockets,
            codec,
            running: Arc::new(AtomicBool::new(true)),
            queue,
            receivers: Mutex::new(Vec::new()),
        })
    }

    pub fn group(&self) -> Ipv4Addr {
        self.group
    }

    /// Ports actually bound.
    pub fn ports(&self) -> &[u16] {
        &self.ports
    }
}

impl Transport for MulticastTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Multicast
    }

    fn start(&self, handler: InboundHandler) -> Result<()> {
        let mut receivers = self.receivers.lock();
        if !receivers.is_empty() {
            return Ok(());
        }
        for (socket, port) in self.sockets.iter().zip(&self.ports) {
            receivers.push(udp::spawn_receiver(
                format!("imc-mcast-{}", port),
                Arc::clone(socket),
                Arc::clone(&self.codec),
                TransportKind::Multicast,
                Arc::clone(&handler),
                Arc::clone(&self.running),
            )?);
        }
        Ok(())
    }

    fn send(&self, dest: SocketAddr, msg: &ImcMessage, callback: DeliveryCallback) -> Result<()> {
        if !self.running.load(Ordering::Acquire) {
            return Err(CommError::ManagerStopped);
        }
        let data = udp::encode_datagram(self.codec.as_ref(), msg)?;
        self.queue.push(Outgoing {
            dest,
            data,
            msg: msg.clone(),
            callback,
        })
    }

    fn local_port(&self) -> Option<u16> {
        self.ports.first().copied()
    }

    fn shutdown(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        self.queue.close();
        for handle in self.receivers.lock().drain(..) {
            let _ = handle.join();
        }
        log::debug!("[Multicast] shut down");
    }
}

impl Drop for MulticastTransport {
    fn drop(&mut self) {
        self.shutdown();
    }
}
