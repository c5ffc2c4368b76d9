// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! UDP unicast transport.
//!
//! One socket is shared by a receive thread and a sender thread. Sends are
//! queued on a bounded channel; the sender thread reports one outcome per
//! datagram. The socket has `SO_BROADCAST` set so the same machinery serves
//! the multicast transport.

use super::{InboundHandler, InboundInfo, Transport, TransportKind};
use crate::delivery::{DeliveryCallback, DeliveryResult};
use crate::error::{CommError, Result};
use crate::message::{ImcMessage, WireCodec};
use crossbeam::channel::{self, Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Largest UDP payload over IPv4.
pub const MAX_DATAGRAM: usize = 65_507;

/// Default bound on queued datagrams.
pub const DEFAULT_SEND_QUEUE: usize = 1024;

/// Receive timeout so threads notice shutdown.
const RECV_TIMEOUT: Duration = Duration::from_millis(200);

pub(crate) struct Outgoing {
    pub dest: SocketAddr,
    pub data: Vec<u8>,
    pub msg: ImcMessage,
    pub callback: DeliveryCallback,
}

/// Bind `0.0.0.0:port` with address reuse and broadcast enabled.
pub(crate) fn bind_socket(port: u16, reuse_port: bool) -> io::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    #[cfg(all(unix, not(any(target_os = "solaris", target_os = "illumos"))))]
    if reuse_port {
        socket.set_reuse_port(true)?;
    }
    #[cfg(not(all(unix, not(any(target_os = "solaris", target_os = "illumos")))))]
    let _ = reuse_port;
    socket.set_broadcast(true)?;
    let bind_addr = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port));
    socket.bind(&bind_addr.into())?;
    let socket: UdpSocket = socket.into();
    socket.set_read_timeout(Some(RECV_TIMEOUT))?;
    Ok(socket)
}

/// Decode datagrams from `socket` until `running` clears.
pub(crate) fn spawn_receiver(
    name: String,
    socket: Arc<UdpSocket>,
    codec: Arc<dyn WireCodec>,
    kind: TransportKind,
    handler: InboundHandler,
    running: Arc<AtomicBool>,
) -> io::Result<JoinHandle<()>> {
    thread::Builder::new().name(name).spawn(move || {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        while running.load(Ordering::Acquire) {
            match socket.recv_from(&mut buf) {
                Ok((len, addr)) => match codec.decode(&buf[..len]) {
                    Ok(msg) => handler(InboundInfo { addr, kind }, msg),
                    Err(e) => log::debug!("[{}] undecodable datagram from {}: {}", kind, addr, e),
                },
                Err(e)
                    if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {}
                Err(e) => {
                    log::warn!("[{}] receive failed: {}", kind, e);
                    thread::sleep(RECV_TIMEOUT);
                }
            }
        }
        log::debug!("[{}] receiver stopped", kind);
    })
}

/// Drain `rx`, one `send_to` and one callback per datagram.
pub(crate) fn spawn_sender(
    name: String,
    socket: Arc<UdpSocket>,
    kind: TransportKind,
    rx: Receiver<Outgoing>,
) -> io::Result<JoinHandle<()>> {
    thread::Builder::new().name(name).spawn(move || {
        for out in rx.iter() {
            let result = match socket.send_to(&out.data, out.dest) {
                Ok(_) => DeliveryResult::Success,
                Err(e) => {
                    log::debug!("[{}] send to {} failed: {}", kind, out.dest, e);
                    DeliveryResult::Error(e.to_string())
                }
            };
            (out.callback)(&out.msg, &result);
        }
        log::debug!("[{}] sender stopped", kind);
    })
}

/// Bounded queue feeding a sender thread.
pub(crate) struct SendQueue {
    tx: Mutex<Option<Sender<Outgoing>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl SendQueue {
    pub fn start(
        name: String,
        socket: Arc<UdpSocket>,
        kind: TransportKind,
        capacity: usize,
    ) -> io::Result<Self> {
        let (tx, rx) = channel::bounded(capacity);
        let handle = spawn_sender(name, socket, kind, rx)?;
        Ok(Self {
            tx: Mutex::new(Some(tx)),
            handle: Mutex::new(Some(handle)),
        })
    }

    pub fn push(&self, out: Outgoing) -> Result<()> {
        let guard = self.tx.lock();
        let Some(tx) = guard.as_ref() else {
            return Err(CommError::ManagerStopped);
        };
        match tx.try_send(out) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(CommError::QueueFull),
            Err(TrySendError::Disconnected(_)) => Err(CommError::ManagerStopped),
        }
    }

    /// Stop accepting, flush what is queued and join.
    pub fn close(&self) {
        self.tx.lock().take();
        if let Some(handle) = self.handle.lock().take() {
            let _ = handle.join();
        }
    }
}

/// Encode and size-check a datagram.
pub(crate) fn encode_datagram(codec: &dyn WireCodec, msg: &ImcMessage) -> Result<Vec<u8>> {
    let data = codec.encode(msg)?;
    if data.len() > MAX_DATAGRAM {
        return Err(CommError::TransportRejected(format!(
            "{} is {} bytes, over the datagram limit",
            msg.abbrev(),
            data.len()
        )));
    }
    Ok(data)
}

/// Unicast UDP transport.
pub struct UdpTransport {
    socket: Arc<UdpSocket>,
    codec: Arc<dyn WireCodec>,
    running: Arc<AtomicBool>,
    queue: SendQueue,
    receiver: Mutex<Option<JoinHandle<()>>>,
}

impl UdpTransport {
    /// Bind `port` (0 picks an ephemeral port).
    pub fn bind(port: u16, codec: Arc<dyn WireCodec>) -> Result<Self> {
        Self::with_queue(port, codec, DEFAULT_SEND_QUEUE)
    }

    pub fn with_queue(port: u16, codec: Arc<dyn WireCodec>, capacity: usize) -> Result<Self> {
        let socket = Arc::new(bind_socket(port, false)?);
        let queue = SendQueue::start(
            "imc-udp-send".to_string(),
            Arc::clone(&socket),
            TransportKind::Udp,
            capacity,
        )?;
        log::debug!("[UDP] bound {}", socket.local_addr()?);
        Ok(Self {
            socket,
            codec,
            running: Arc::new(AtomicBool::new(true)),
            queue,
            receiver: Mutex::new(None),
        })
    }
}

impl Transport for UdpTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Udp
    }

    fn start(&self, handler: InboundHandler) -> Result<()> {
        let mut receiver = self.receiver.lock();
        if receiver.is_some() {
            return Ok(());
        }
        *receiver = Some(spawn_receiver(
            "imc-udp-recv".to_string(),
            Arc::clone(&self.socket),
            Arc::clone(&self.codec),
            TransportKind::Udp,
            handler,
            Arc::clone(&self.running),
        )?);
        Ok(())
    }

    fn send(&self, dest: SocketAddr, msg: &ImcMessage, callback: DeliveryCallback) -> Result<()> {
        if !self.running.load(Ordering::Acquire) {
            return Err(CommError::ManagerStopped);
        }
        let data = encode_datagram(self.codec.as_ref(), msg)?;
        self.queue.push(Outgoing {
            dest,
            data,
            msg: msg.clone(),
            callback,
        })
    }

    fn local_port(&self) -> Option<u16> {
        self.socket.local_addr().ok().map(|a| a.port())
    }

    fn shutdown(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        self.queue.close();
        if let Some(handle) = self.receiver.lock().take() {
            let _ = handle.join();
        }
        log::debug!("[UDP] shut down");
    }
}

impl Drop for UdpTransport {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::PeerId;
    use crate::message::{JsonCodec, Payload};

    fn make_transport() -> UdpTransport {
        UdpTransport::bind(0, Arc::new(JsonCodec)).unwrap()
    }

    fn loopback(port: u16) -> SocketAddr {
        SocketAddr::from((Ipv4Addr::LOCALHOST, port))
    }

    #[test]
    fn test_loopback_roundtrip() {
        let a = make_transport();
        let b = make_transport();
        let (tx, rx) = channel::unbounded();
        b.start(Arc::new(move |info, msg| {
            let _ = tx.send((info, msg));
        }))
        .unwrap();

        let (done_tx, done_rx) = channel::unbounded();
        let mut msg = ImcMessage::new(Payload::Heartbeat);
        msg.header.src = PeerId::new(0x4001);
        a.send(
            loopback(b.local_port().unwrap()),
            &msg,
            Arc::new(move |_, r| {
                let _ = done_tx.send(r.clone());
            }),
        )
        .unwrap();

        assert_eq!(
            done_rx.recv_timeout(Duration::from_secs(2)).unwrap(),
            DeliveryResult::Success
        );
        let (info, got) = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(info.kind, TransportKind::Udp);
        assert_eq!(info.addr.port(), a.local_port().unwrap());
        assert_eq!(got.src(), PeerId::new(0x4001));
    }

    #[test]
    fn test_send_after_shutdown_refused() {
        let t = make_transport();
        t.shutdown();
        let r = t.send(
            loopback(9),
            &ImcMessage::new(Payload::Heartbeat),
            Arc::new(|_, _| {}),
        );
        assert!(matches!(r, Err(CommError::ManagerStopped)));
    }

    #[test]
    fn test_oversized_refused_without_callback() {
        let t = make_transport();
        let (tx, rx) = channel::unbounded::<()>();
        let msg = ImcMessage::new(Payload::Other {
            mgid: 9000,
            abbrev: "Blob".into(),
            data: vec![7u8; MAX_DATAGRAM],
        });
        let r = t.send(
            loopback(9),
            &msg,
            Arc::new(move |_, _| {
                let _ = tx.send(());
            }),
        );
        assert!(matches!(r, Err(CommError::TransportRejected(_))));
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    }
}
