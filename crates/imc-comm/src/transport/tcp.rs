// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! TCP transport with length-prefix framing.
//!
//! ```text
//! +----------------+------------------+
//! | Length (4B BE) | encoded message  |
//! +----------------+------------------+
//! ```
//!
//! An accept thread serves inbound connections, one reader thread each.
//! Outbound connections are opened on demand by the sender thread, pooled
//! per destination and also read from. Outcomes:
//!
//! - connect timeout -> `Timeout`
//! - connection refused -> `Unreachable`
//! - any other connect or write failure -> `Error` (connection evicted)

use super::{InboundHandler, InboundInfo, Transport, TransportKind};
use crate::delivery::{DeliveryCallback, DeliveryResult};
use crate::error::{CommError, Result};
use crate::message::{ImcMessage, WireCodec};
use crossbeam::channel::{self, Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::net::{Ipv4Addr, Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

pub const FRAME_HEADER_SIZE: usize = 4;

/// Anti-OOM bound on a single frame.
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

const SEND_QUEUE: usize = 1024;
const POLL_INTERVAL: Duration = Duration::from_millis(50);
const READ_TIMEOUT: Duration = Duration::from_millis(200);

/// Prefix `payload` with its big-endian length.
pub fn encode_frame(payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(FRAME_HEADER_SIZE + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(payload);
    frame
}

/// Incremental deframer for a byte stream.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    buf: Vec<u8>,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Next complete frame, if buffered. An oversized length is an error.
    pub fn next_frame(&mut self) -> io::Result<Option<Vec<u8>>> {
        if self.buf.len() < FRAME_HEADER_SIZE {
            return Ok(None);
        }
        let mut header = [0u8; FRAME_HEADER_SIZE];
        header.copy_from_slice(&self.buf[..FRAME_HEADER_SIZE]);
        let len = u32::from_be_bytes(header) as usize;
        if len > MAX_FRAME_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("frame of {} bytes exceeds {}", len, MAX_FRAME_SIZE),
            ));
        }
        if self.buf.len() < FRAME_HEADER_SIZE + len {
            return Ok(None);
        }
        let frame = self.buf[FRAME_HEADER_SIZE..FRAME_HEADER_SIZE + len].to_vec();
        self.buf.drain(..FRAME_HEADER_SIZE + len);
        Ok(Some(frame))
    }

    pub fn buffered(&self) -> usize {
        self.buf.len()
    }
}

struct Outgoing {
    dest: SocketAddr,
    frame: Vec<u8>,
    msg: ImcMessage,
    callback: DeliveryCallback,
}

struct Shared {
    codec: Arc<dyn WireCodec>,
    running: AtomicBool,
    handler: Mutex<Option<InboundHandler>>,
    pool: Mutex<HashMap<SocketAddr, TcpStream>>,
    readers: Mutex<Vec<JoinHandle<()>>>,
    connect_timeout: Duration,
}

impl Shared {
    fn spawn_reader(self: &Arc<Self>, stream: TcpStream, peer: SocketAddr, pooled: bool) {
        let shared = Arc::clone(self);
        let spawned = thread::Builder::new()
            .name(format!("imc-tcp-{}", peer))
            .spawn(move || shared.read_loop(stream, peer, pooled));
        match spawned {
            Ok(handle) => {
                let mut readers = self.readers.lock();
                readers.retain(|h| !h.is_finished());
                readers.push(handle);
            }
            Err(e) => log::warn!("[TCP] cannot spawn reader for {}: {}", peer, e),
        }
    }

    fn read_loop(&self, mut stream: TcpStream, peer: SocketAddr, pooled: bool) {
        if let Err(e) = stream.set_read_timeout(Some(READ_TIMEOUT)) {
            log::warn!("[TCP] {}: {}", peer, e);
            return;
        }
        let mut frames = FrameBuffer::new();
        let mut chunk = vec![0u8; 64 * 1024];
        while self.running.load(Ordering::Acquire) {
            match stream.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => frames.push(&chunk[..n]),
                Err(e)
                    if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) =>
                {
                    continue
                }
                Err(e) => {
                    log::debug!("[TCP] read from {} failed: {}", peer, e);
                    break;
                }
            }
            loop {
                match frames.next_frame() {
                    Ok(Some(frame)) => self.dispatch(peer, &frame),
                    Ok(None) => break,
                    Err(e) => {
                        log::warn!("[TCP] dropping connection {}: {}", peer, e);
                        let _ = stream.shutdown(Shutdown::Both);
                        self.forget(peer, pooled);
                        return;
                    }
                }
            }
        }
        self.forget(peer, pooled);
        log::debug!("[TCP] connection {} closed", peer);
    }

    fn dispatch(&self, peer: SocketAddr, frame: &[u8]) {
        let handler = self.handler.lock().clone();
        let Some(handler) = handler else {
            return;
        };
        match self.codec.decode(frame) {
            Ok(msg) => handler(
                InboundInfo {
                    addr: peer,
                    kind: TransportKind::Tcp,
                },
                msg,
            ),
            Err(e) => log::debug!("[TCP] undecodable frame from {}: {}", peer, e),
        }
    }

    fn forget(&self, peer: SocketAddr, pooled: bool) {
        if pooled {
            self.pool.lock().remove(&peer);
        }
    }

    fn connection(self: &Arc<Self>, dest: SocketAddr) -> std::result::Result<TcpStream, DeliveryResult> {
        if let Some(stream) = self.pool.lock().get(&dest) {
            if let Ok(clone) = stream.try_clone() {
                return Ok(clone);
            }
        }
        let stream = TcpStream::connect_timeout(&dest, self.connect_timeout).map_err(|e| {
            log::debug!("[TCP] connect {} failed: {}", dest, e);
            match e.kind() {
                io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => DeliveryResult::Timeout,
                io::ErrorKind::ConnectionRefused => DeliveryResult::Unreachable,
                _ => DeliveryResult::Error(e.to_string()),
            }
        })?;
        let _ = stream.set_nodelay(true);
        let reader = stream
            .try_clone()
            .map_err(|e| DeliveryResult::Error(e.to_string()))?;
        let writer = stream
            .try_clone()
            .map_err(|e| DeliveryResult::Error(e.to_string()))?;
        self.pool.lock().insert(dest, stream);
        self.spawn_reader(reader, dest, true);
        log::debug!("[TCP] connected to {}", dest);
        Ok(writer)
    }

    fn send_loop(self: Arc<Self>, rx: Receiver<Outgoing>) {
        for out in rx.iter() {
            let result = match self.connection(out.dest) {
                Ok(mut stream) => match stream.write_all(&out.frame) {
                    Ok(()) => DeliveryResult::Success,
                    Err(e) => {
                        log::debug!("[TCP] write to {} failed: {}", out.dest, e);
                        if let Some(old) = self.pool.lock().remove(&out.dest) {
                            let _ = old.shutdown(Shutdown::Both);
                        }
                        DeliveryResult::Error(e.to_string())
                    }
                },
                Err(result) => result,
            };
            (out.callback)(&out.msg, &result);
        }
    }

    fn accept_loop(self: Arc<Self>, listener: TcpListener) {
        while self.running.load(Ordering::Acquire) {
            match listener.accept() {
                Ok((stream, peer)) => {
                    if let Err(e) = stream.set_nonblocking(false) {
                        log::warn!("[TCP] {}: {}", peer, e);
                        continue;
                    }
                    log::debug!("[TCP] accepted {}", peer);
                    self.spawn_reader(stream, peer, false);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => thread::sleep(POLL_INTERVAL),
                Err(e) => {
                    log::warn!("[TCP] accept failed: {}", e);
                    thread::sleep(POLL_INTERVAL);
                }
            }
        }
    }
}

pub struct TcpTransport {
    shared: Arc<Shared>,
    local_port: u16,
    listener: Mutex<Option<TcpListener>>,
    queue: Mutex<Option<Sender<Outgoing>>>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl TcpTransport {
    /// Bind the listening port (0 picks an ephemeral port).
    pub fn bind(port: u16, codec: Arc<dyn WireCodec>) -> Result<Self> {
        Self::with_connect_timeout(port, codec, DEFAULT_CONNECT_TIMEOUT)
    }

    pub fn with_connect_timeout(
        port: u16,
        codec: Arc<dyn WireCodec>,
        connect_timeout: Duration,
    ) -> Result<Self> {
        let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, port))?;
        listener.set_nonblocking(true)?;
        let local_port = listener.local_addr()?.port();

        let shared = Arc::new(Shared {
            codec,
            running: AtomicBool::new(true),
            handler: Mutex::new(None),
            pool: Mutex::new(HashMap::new()),
            readers: Mutex::new(Vec::new()),
            connect_timeout,
        });

        let (tx, rx) = channel::bounded(SEND_QUEUE);
        let sender = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name("imc-tcp-send".to_string())
                .spawn(move || shared.send_loop(rx))?
        };
        log::debug!("[TCP] listening on port {}", local_port);
        Ok(Self {
            shared,
            local_port,
            listener: Mutex::new(Some(listener)),
            queue: Mutex::new(Some(tx)),
            threads: Mutex::new(vec![sender]),
        })
    }

    /// Destinations with an open pooled connection.
    pub fn connected_peers(&self) -> Vec<SocketAddr> {
        self.shared.pool.lock().keys().copied().collect()
    }
}

impl Transport for TcpTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Tcp
    }

    fn start(&self, handler: InboundHandler) -> Result<()> {
        *self.shared.handler.lock() = Some(handler);
        let Some(listener) = self.listener.lock().take() else {
            return Ok(());
        };
        let shared = Arc::clone(&self.shared);
        let acceptor = thread::Builder::new()
            .name("imc-tcp-accept".to_string())
            .spawn(move || shared.accept_loop(listener))?;
        self.threads.lock().push(acceptor);
        Ok(())
    }

    fn send(&self, dest: SocketAddr, msg: &ImcMessage, callback: DeliveryCallback) -> Result<()> {
        if !self.shared.running.load(Ordering::Acquire) {
            return Err(CommError::ManagerStopped);
        }
        let payload = self.shared.codec.encode(msg)?;
        if payload.len() > MAX_FRAME_SIZE {
            return Err(CommError::TransportRejected(format!(
                "{} is {} bytes, over the frame limit",
                msg.abbrev(),
                payload.len()
            )));
        }
        let guard = self.queue.lock();
        let Some(tx) = guard.as_ref() else {
            return Err(CommError::ManagerStopped);
        };
        match tx.try_send(Outgoing {
            dest,
            frame: encode_frame(&payload),
            msg: msg.clone(),
            callback,
        }) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(CommError::QueueFull),
            Err(TrySendError::Disconnected(_)) => Err(CommError::ManagerStopped),
        }
    }

    fn local_port(&self) -> Option<u16> {
        Some(self.local_port)
    }

    fn shutdown(&self) {
        if !self.shared.running.swap(false, Ordering::AcqRel) {
            return;
        }
        self.queue.lock().take();
        for handle in self.threads.lock().drain(..) {
            let _ = handle.join();
        }
        for (_, stream) in self.shared.pool.lock().drain() {
            let _ = stream.shutdown(Shutdown::Both);
        }
        let readers: Vec<_> = self.shared.readers.lock().drain(..).collect();
        for handle in readers {
            let _ = handle.join();
        }
        self.listener.lock().take();
        log::debug!("[TCP] shut down");
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::PeerId;
    use crate::message::{JsonCodec, Payload};

    fn make_transport() -> TcpTransport {
        TcpTransport::with_connect_timeout(0, Arc::new(JsonCodec), Duration::from_millis(500))
            .unwrap()
    }

    #[test]
    fn test_frame_buffer_split_reads() {
        let mut fb = FrameBuffer::new();
        let mut stream = encode_frame(b"first");
        stream.extend(encode_frame(b""));
        stream.extend(encode_frame(b"third frame"));

        for chunk in stream.chunks(3) {
            fb.push(chunk);
        }
        assert_eq!(fb.next_frame().unwrap().unwrap(), b"first");
        assert_eq!(fb.next_frame().unwrap().unwrap(), b"");
        assert_eq!(fb.next_frame().unwrap().unwrap(), b"third frame");
        assert!(fb.next_frame().unwrap().is_none());
        assert_eq!(fb.buffered(), 0);
    }

    #[test]
    fn test_frame_buffer_rejects_oversized() {
        let mut fb = FrameBuffer::new();
        fb.push(&((MAX_FRAME_SIZE as u32) + 1).to_be_bytes());
        assert!(fb.next_frame().is_err());
    }

    #[test]
    fn test_roundtrip_and_pooling() {
        let a = make_transport();
        let b = make_transport();
        let (tx, rx) = channel::unbounded();
        b.start(Arc::new(move |info, msg| {
            let _ = tx.send((info, msg));
        }))
        .unwrap();
        a.start(Arc::new(|_, _| {})).unwrap();

        let dest = SocketAddr::from((Ipv4Addr::LOCALHOST, b.local_port().unwrap()));
        let (done_tx, done_rx) = channel::unbounded();
        for _ in 0..2 {
            let mut msg = ImcMessage::new(Payload::Heartbeat);
            msg.header.src = PeerId::new(0x4001);
            let d = done_tx.clone();
            a.send(
                dest,
                &msg,
                Arc::new(move |_, r| {
                    let _ = d.send(r.clone());
                }),
            )
            .unwrap();
        }
        for _ in 0..2 {
            assert_eq!(
                done_rx.recv_timeout(Duration::from_secs(2)).unwrap(),
                DeliveryResult::Success
            );
            let (info, msg) = rx.recv_timeout(Duration::from_secs(2)).unwrap();
            assert_eq!(info.kind, TransportKind::Tcp);
            assert_eq!(msg.src(), PeerId::new(0x4001));
        }
        assert_eq!(a.connected_peers(), vec![dest]);
        a.shutdown();
        b.shutdown();
    }

    #[test]
    fn test_refused_is_unreachable() {
        // grab a free port, then close it
        let port = {
            let l = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
            l.local_addr().unwrap().port()
        };
        let a = make_transport();
        let (done_tx, done_rx) = channel::unbounded();
        a.send(
            SocketAddr::from((Ipv4Addr::LOCALHOST, port)),
            &ImcMessage::new(Payload::Heartbeat),
            Arc::new(move |_, r| {
                let _ = done_tx.send(r.clone());
            }),
        )
        .unwrap();
        assert_eq!(
            done_rx.recv_timeout(Duration::from_secs(3)).unwrap(),
            DeliveryResult::Unreachable
        );
    }
}
