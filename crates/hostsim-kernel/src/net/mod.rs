//! Per-host network stack.
//!
//! [`NetStack`] owns a host's sockets and port bindings.  Its operations are
//! pure state transitions: instead of touching other hosts or threads they
//! collect [`NetEffects`] (packets to transmit, wait reasons to notify),
//! which the host applies afterwards.
//!
//! A socket operation that cannot make progress fails with `EAGAIN`; the
//! syscall handler decides whether that becomes a guest-visible error or a
//! blocked thread.

pub mod interface;
pub mod packet;
pub mod socket;
pub mod topology;

pub use interface::NetworkInterface;
pub use packet::{Packet, Payload, Segment};
pub use socket::{Socket, SocketKind, TcpState};
pub use topology::Topology;

use crate::id::SocketId;
use crate::syscall::condition::BlockReason;
use hostsim_abi::{socket as so, Errno, SockaddrIn};
use log::debug;
use socket::{MAX_BACKLOG, MAX_DATAGRAM, MAX_QUEUED_DATAGRAMS, MAX_SEGMENT, STREAM_WINDOW};
use std::collections::BTreeMap;

const EPHEMERAL_FIRST: u16 = 49152;
const EPHEMERAL_LAST: u16 = 65535;
const LOOPBACK: [u8; 4] = [127, 0, 0, 1];

/// Side effects of a network operation, applied by the host.
#[derive(Debug, Default)]
pub struct NetEffects {
    pub wake: Vec<BlockReason>,
    pub outgoing: Vec<Packet>,
}

impl NetEffects {
    pub fn is_empty(&self) -> bool {
        self.wake.is_empty() && self.outgoing.is_empty()
    }
}

/// Data returned by a receive.
#[derive(Debug, PartialEq, Eq)]
pub struct Received {
    pub data: Vec<u8>,
    pub from: Option<SockaddrIn>,
}

#[derive(Debug)]
pub struct NetStack {
    addr: [u8; 4],
    sockets: BTreeMap<SocketId, Socket>,
    next_socket: u32,
    ports: BTreeMap<(SocketKind, u16), SocketId>,
    /// Stream sockets by (local, remote) address.
    connections: BTreeMap<(SockaddrIn, SockaddrIn), SocketId>,
    next_ephemeral: u16,
    pub interface: NetworkInterface,
    dropped: u64,
}

impl NetStack {
    pub fn new(addr: [u8; 4], bandwidth_bps: u64) -> Self {
        Self {
            addr,
            sockets: BTreeMap::new(),
            next_socket: 0,
            ports: BTreeMap::new(),
            connections: BTreeMap::new(),
            next_ephemeral: EPHEMERAL_FIRST,
            interface: NetworkInterface::new(bandwidth_bps),
            dropped: 0,
        }
    }

    pub fn addr(&self) -> [u8; 4] {
        self.addr
    }

    /// Whether `addr` names this host.
    pub fn is_local(&self, addr: [u8; 4]) -> bool {
        addr == self.addr || addr[0] == 127
    }

    /// Packets that arrived with no socket to take them.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn socket_count(&self) -> usize {
        self.sockets.len()
    }

    pub fn get(&self, id: SocketId) -> Result<&Socket, Errno> {
        self.sockets.get(&id).ok_or(Errno::EBADF)
    }

    pub fn get_mut(&mut self, id: SocketId) -> Result<&mut Socket, Errno> {
        self.sockets.get_mut(&id).ok_or(Errno::EBADF)
    }

    fn source_addr(&self, dst: [u8; 4]) -> [u8; 4] {
        if dst[0] == 127 {
            LOOPBACK
        } else {
            self.addr
        }
    }

    // ═══════════════════════════════════════════════════════════════════
    //  Lifecycle
    // ═══════════════════════════════════════════════════════════════════

    pub fn create(&mut self, kind: SocketKind, nonblocking: bool) -> SocketId {
        let id = SocketId(self.next_socket);
        self.next_socket += 1;
        self.sockets.insert(id, Socket::new(id, kind, nonblocking));
        id
    }

    /// A new descriptor refers to `id`.
    pub fn retain(&mut self, id: SocketId) {
        if let Some(sock) = self.sockets.get_mut(&id) {
            sock.refs += 1;
        }
    }

    /// A descriptor referring to `id` was closed.
    pub fn release(&mut self, id: SocketId, fx: &mut NetEffects) {
        let Some(sock) = self.sockets.get_mut(&id) else {
            return;
        };
        sock.refs = sock.refs.saturating_sub(1);
        if sock.refs == 0 {
            self.destroy(id, fx);
        }
    }

    /// Tear down a socket regardless of references.
    pub fn destroy(&mut self, id: SocketId, fx: &mut NetEffects) {
        let Some(sock) = self.sockets.remove(&id) else {
            return;
        };
        if let Some(local) = sock.local {
            if self.ports.get(&(sock.kind, local.port)) == Some(&id) {
                self.ports.remove(&(sock.kind, local.port));
            }
            if let Some(peer) = sock.peer {
                if self.connections.get(&(local, peer)) == Some(&id) {
                    self.connections.remove(&(local, peer));
                }
            }
        }
        match sock.tcp {
            TcpState::Listening { .. } => {
                for child in sock.accept_queue {
                    if let Some(child) = self.sockets.remove(&child) {
                        if let (Some(local), Some(peer)) = (child.local, child.peer) {
                            self.connections.remove(&(local, peer));
                            fx.outgoing.push(Packet::tcp(local, peer, Segment::Rst));
                        }
                    }
                }
            }
            TcpState::Established if !sock.reset && !sock.write_shutdown => {
                if let (Some(local), Some(peer)) = (sock.local, sock.peer) {
                    fx.outgoing.push(Packet::tcp(local, peer, Segment::Fin));
                }
            }
            _ => {}
        }
        fx.wake.extend([
            BlockReason::SocketReadable(id),
            BlockReason::SocketWritable(id),
            BlockReason::SocketAcceptable(id),
            BlockReason::SocketConnected(id),
        ]);
    }

    // ═══════════════════════════════════════════════════════════════════
    //  Addressing
    // ═══════════════════════════════════════════════════════════════════

    fn allocate_port(&mut self, kind: SocketKind) -> Result<u16, Errno> {
        let span = (EPHEMERAL_LAST - EPHEMERAL_FIRST) as u32 + 1;
        for _ in 0..span {
            let port = self.next_ephemeral;
            self.next_ephemeral = if port == EPHEMERAL_LAST {
                EPHEMERAL_FIRST
            } else {
                port + 1
            };
            if !self.ports.contains_key(&(kind, port)) {
                return Ok(port);
            }
        }
        Err(Errno::EADDRINUSE)
    }

    pub fn bind(&mut self, id: SocketId, addr: SockaddrIn) -> Result<(), Errno> {
        let sock = self.get(id)?;
        if sock.local.is_some() {
            return Err(Errno::EINVAL);
        }
        let kind = sock.kind;
        if !(addr.is_unspecified() || addr.is_loopback() || addr.addr == self.addr) {
            return Err(Errno::EADDRNOTAVAIL);
        }
        let port = if addr.port == 0 {
            self.allocate_port(kind)?
        } else {
            addr.port
        };
        if self.ports.contains_key(&(kind, port)) {
            return Err(Errno::EADDRINUSE);
        }
        self.ports.insert((kind, port), id);
        self.get_mut(id)?.local = Some(SockaddrIn::new(addr.addr, port));
        Ok(())
    }

    /// Bind to an ephemeral port on all addresses if not bound yet.
    fn ensure_bound(&mut self, id: SocketId) -> Result<SockaddrIn, Errno> {
        if let Some(local) = self.get(id)?.local {
            return Ok(local);
        }
        self.bind(id, SockaddrIn::new(so::INADDR_ANY, 0))?;
        self.get(id)?.local.ok_or(Errno::EINVAL)
    }

    pub fn local_name(&self, id: SocketId) -> Result<SockaddrIn, Errno> {
        Ok(self
            .get(id)?
            .local
            .unwrap_or(SockaddrIn::new(so::INADDR_ANY, 0)))
    }

    pub fn peer_name(&self, id: SocketId) -> Result<SockaddrIn, Errno> {
        let sock = self.get(id)?;
        match (sock.kind, sock.tcp) {
            (SocketKind::Tcp, TcpState::Established) | (SocketKind::Udp, _) => {
                sock.peer.ok_or(Errno::ENOTCONN)
            }
            _ => Err(Errno::ENOTCONN),
        }
    }

    // ═══════════════════════════════════════════════════════════════════
    //  Connection management
    // ═══════════════════════════════════════════════════════════════════

    pub fn listen(&mut self, id: SocketId, backlog: i32) -> Result<(), Errno> {
        let sock = self.get(id)?;
        if sock.kind != SocketKind::Tcp {
            return Err(Errno::EOPNOTSUPP);
        }
        if matches!(sock.tcp, TcpState::Connecting | TcpState::Established) {
            return Err(Errno::EINVAL);
        }
        self.ensure_bound(id)?;
        let backlog = (backlog.max(1) as usize).min(MAX_BACKLOG);
        self.get_mut(id)?.tcp = TcpState::Listening { backlog };
        Ok(())
    }

    /// Take the next established connection from a listener.
    pub fn accept(&mut self, id: SocketId) -> Result<SocketId, Errno> {
        let sock = self.get_mut(id)?;
        if sock.kind != SocketKind::Tcp {
            return Err(Errno::EOPNOTSUPP);
        }
        if !sock.is_listening() {
            return Err(Errno::EINVAL);
        }
        sock.accept_queue.pop_front().ok_or(Errno::EAGAIN)
    }

    /// Start connecting.
    ///
    /// Datagram sockets just record the peer.  Stream sockets send a SYN and
    /// report `EINPROGRESS`; [`poll_connect`](Self::poll_connect) observes
    /// the outcome.
    pub fn connect(
        &mut self,
        id: SocketId,
        addr: SockaddrIn,
        fx: &mut NetEffects,
    ) -> Result<(), Errno> {
        let sock = self.get_mut(id)?;
        if sock.kind == SocketKind::Udp {
            self.ensure_bound(id)?;
            self.get_mut(id)?.peer = Some(addr);
            return Ok(());
        }
        match sock.tcp {
            TcpState::Listening { .. } => return Err(Errno::EINVAL),
            TcpState::Established => return Err(Errno::EISCONN),
            TcpState::Connecting => return Err(Errno::EALREADY),
            TcpState::Closed => {}
        }
        if let Some(err) = sock.connect_error.take() {
            return Err(err);
        }
        if addr.is_unspecified() || addr.port == 0 {
            return Err(Errno::ECONNREFUSED);
        }

        let bound = self.ensure_bound(id)?;
        let local = if bound.is_unspecified() {
            SockaddrIn::new(self.source_addr(addr.addr), bound.port)
        } else {
            bound
        };
        let sock = self.get_mut(id)?;
        sock.local = Some(local);
        sock.peer = Some(addr);
        sock.tcp = TcpState::Connecting;
        sock.reset = false;
        sock.peer_closed = false;
        self.connections.insert((local, addr), id);
        fx.outgoing.push(Packet::tcp(local, addr, Segment::Syn));
        Err(Errno::EINPROGRESS)
    }

    /// Outcome of a pending stream connect: `Ok(true)` once established,
    /// `Ok(false)` while the handshake is in flight.
    pub fn poll_connect(&mut self, id: SocketId) -> Result<bool, Errno> {
        let sock = self.get_mut(id)?;
        match sock.tcp {
            TcpState::Established => Ok(true),
            TcpState::Connecting => Ok(false),
            _ => Err(sock.connect_error.take().unwrap_or(Errno::ECONNREFUSED)),
        }
    }

    pub fn shutdown(&mut self, id: SocketId, how: u64, fx: &mut NetEffects) -> Result<(), Errno> {
        if how > so::SHUT_RDWR {
            return Err(Errno::EINVAL);
        }
        let sock = self.get_mut(id)?;
        let connected = match sock.kind {
            SocketKind::Tcp => sock.tcp == TcpState::Established,
            SocketKind::Udp => sock.peer.is_some(),
        };
        if !connected {
            return Err(Errno::ENOTCONN);
        }
        if how == so::SHUT_RD || how == so::SHUT_RDWR {
            sock.read_shutdown = true;
            fx.wake.push(BlockReason::SocketReadable(id));
        }
        if (how == so::SHUT_WR || how == so::SHUT_RDWR) && !sock.write_shutdown {
            sock.write_shutdown = true;
            if sock.kind == SocketKind::Tcp && !sock.reset {
                if let (Some(local), Some(peer)) = (sock.local, sock.peer) {
                    fx.outgoing.push(Packet::tcp(local, peer, Segment::Fin));
                }
            }
        }
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════
    //  Data transfer
    // ═══════════════════════════════════════════════════════════════════

    /// Send `data`; returns the number of bytes accepted.
    ///
    /// Streams accept at most the peer's remaining window, so a partial
    /// count is normal.  A full window is `EAGAIN`.
    pub fn send(
        &mut self,
        id: SocketId,
        dst: Option<SockaddrIn>,
        data: &[u8],
        fx: &mut NetEffects,
    ) -> Result<usize, Errno> {
        let sock = self.get(id)?;
        match sock.kind {
            SocketKind::Udp => {
                if sock.write_shutdown {
                    return Err(Errno::EPIPE);
                }
                let target = dst.or(sock.peer).ok_or(Errno::EDESTADDRREQ)?;
                if data.len() > MAX_DATAGRAM {
                    return Err(Errno::EMSGSIZE);
                }
                let bound = self.ensure_bound(id)?;
                let src = if bound.is_unspecified() {
                    SockaddrIn::new(self.source_addr(target.addr), bound.port)
                } else {
                    bound
                };
                fx.outgoing.push(Packet::udp(src, target, data.to_vec()));
                Ok(data.len())
            }
            SocketKind::Tcp => {
                let sock = self.get_mut(id)?;
                if sock.tcp != TcpState::Established {
                    return Err(Errno::ENOTCONN);
                }
                if sock.reset {
                    return Err(Errno::ECONNRESET);
                }
                if sock.write_shutdown {
                    return Err(Errno::EPIPE);
                }
                if sock.send_window == 0 {
                    return Err(Errno::EAGAIN);
                }
                let (Some(local), Some(peer)) = (sock.local, sock.peer) else {
                    return Err(Errno::ENOTCONN);
                };
                let n = data.len().min(sock.send_window).min(MAX_SEGMENT);
                sock.send_window -= n;
                fx.outgoing
                    .push(Packet::tcp(local, peer, Segment::Data(data[..n].to_vec())));
                Ok(n)
            }
        }
    }

    /// Receive up to `len` bytes.  Datagrams longer than `len` are truncated.
    ///
    /// An empty result means end of stream.
    pub fn recv(
        &mut self,
        id: SocketId,
        len: usize,
        peek: bool,
        fx: &mut NetEffects,
    ) -> Result<Received, Errno> {
        let sock = self.get_mut(id)?;
        match sock.kind {
            SocketKind::Udp => {
                let Some((from, data)) = sock.datagrams.front() else {
                    if sock.read_shutdown {
                        return Ok(Received {
                            data: Vec::new(),
                            from: None,
                        });
                    }
                    return Err(Errno::EAGAIN);
                };
                let from = *from;
                let data = data[..len.min(data.len())].to_vec();
                if !peek {
                    sock.datagrams.pop_front();
                }
                Ok(Received {
                    data,
                    from: Some(from),
                })
            }
            SocketKind::Tcp => {
                if sock.tcp != TcpState::Established {
                    return Err(Errno::ENOTCONN);
                }
                let from = sock.peer;
                if !sock.stream.is_empty() && !sock.read_shutdown {
                    let n = len.min(sock.stream.len());
                    let data: Vec<u8> = if peek {
                        sock.stream.iter().take(n).copied().collect()
                    } else {
                        sock.stream.drain(..n).collect()
                    };
                    if !peek && !sock.reset && !sock.peer_closed {
                        if let (Some(local), Some(peer)) = (sock.local, sock.peer) {
                            fx.outgoing
                                .push(Packet::tcp(local, peer, Segment::Window(n as u32)));
                        }
                    }
                    return Ok(Received { data, from });
                }
                if sock.reset {
                    return Err(Errno::ECONNRESET);
                }
                if sock.peer_closed || sock.read_shutdown {
                    return Ok(Received {
                        data: Vec::new(),
                        from,
                    });
                }
                Err(Errno::EAGAIN)
            }
        }
    }

    // ═══════════════════════════════════════════════════════════════════
    //  Packet arrival
    // ═══════════════════════════════════════════════════════════════════

    /// Hand an arriving packet to the socket it addresses.
    pub fn deliver(&mut self, packet: Packet, fx: &mut NetEffects) {
        match packet.payload {
            Payload::Datagram(data) => self.deliver_datagram(packet.src, packet.dst, data, fx),
            Payload::Tcp(segment) => self.deliver_segment(packet.src, packet.dst, segment, fx),
        }
    }

    fn deliver_datagram(
        &mut self,
        src: SockaddrIn,
        dst: SockaddrIn,
        data: Vec<u8>,
        fx: &mut NetEffects,
    ) {
        let target = self
            .ports
            .get(&(SocketKind::Udp, dst.port))
            .and_then(|id| self.sockets.get_mut(id))
            .filter(|sock| sock.accepts_datagram(src, dst));
        match target {
            Some(sock) if sock.datagrams.len() < MAX_QUEUED_DATAGRAMS => {
                sock.datagrams.push_back((src, data));
                fx.wake.push(BlockReason::SocketReadable(sock.id));
            }
            Some(sock) => {
                debug!("{}: receive queue full, dropping datagram from {src}", sock.id);
                self.dropped += 1;
            }
            None => {
                debug!("no socket for datagram {src} -> {dst}, dropping");
                self.dropped += 1;
            }
        }
    }

    fn deliver_segment(
        &mut self,
        src: SockaddrIn,
        dst: SockaddrIn,
        segment: Segment,
        fx: &mut NetEffects,
    ) {
        let conn = self.connections.get(&(dst, src)).copied();
        match (segment, conn) {
            (Segment::Syn, None) => self.handle_syn(src, dst, fx),
            (Segment::Syn, Some(_)) => {}
            (Segment::SynAck, Some(id)) => {
                if let Some(sock) = self.sockets.get_mut(&id) {
                    if sock.tcp == TcpState::Connecting {
                        sock.tcp = TcpState::Established;
                        sock.send_window = STREAM_WINDOW;
                        fx.wake.push(BlockReason::SocketConnected(id));
                        fx.wake.push(BlockReason::SocketWritable(id));
                    }
                }
            }
            (Segment::Data(bytes), Some(id)) => {
                if let Some(sock) = self.sockets.get_mut(&id) {
                    sock.stream.extend(bytes);
                    fx.wake.push(BlockReason::SocketReadable(id));
                }
            }
            (Segment::Window(n), Some(id)) => {
                if let Some(sock) = self.sockets.get_mut(&id) {
                    sock.send_window += n as usize;
                    fx.wake.push(BlockReason::SocketWritable(id));
                }
            }
            (Segment::Fin, Some(id)) => {
                if let Some(sock) = self.sockets.get_mut(&id) {
                    sock.peer_closed = true;
                    fx.wake.push(BlockReason::SocketReadable(id));
                }
            }
            (Segment::Rst, Some(id)) => {
                if let Some(sock) = self.sockets.get_mut(&id) {
                    if sock.tcp == TcpState::Connecting {
                        sock.tcp = TcpState::Closed;
                        sock.connect_error = Some(Errno::ECONNREFUSED);
                        sock.peer = None;
                        self.connections.remove(&(dst, src));
                    } else {
                        sock.reset = true;
                    }
                    fx.wake.extend([
                        BlockReason::SocketConnected(id),
                        BlockReason::SocketReadable(id),
                        BlockReason::SocketWritable(id),
                    ]);
                }
            }
            (segment, None) => {
                debug!("no connection for {segment:?} {src} -> {dst}, dropping");
                self.dropped += 1;
            }
        }
    }

    fn handle_syn(&mut self, src: SockaddrIn, dst: SockaddrIn, fx: &mut NetEffects) {
        let listener = self
            .ports
            .get(&(SocketKind::Tcp, dst.port))
            .copied()
            .filter(|id| {
                self.sockets.get(id).is_some_and(|s| {
                    s.is_listening()
                        && s.local
                            .is_some_and(|l| l.is_unspecified() || l.addr == dst.addr)
                })
            });
        let Some(listener) = listener else {
            fx.outgoing.push(Packet::tcp(dst, src, Segment::Rst));
            return;
        };
        let full = self.sockets.get(&listener).map_or(true, |s| match s.tcp {
            TcpState::Listening { backlog } => s.accept_queue.len() >= backlog,
            _ => true,
        });
        if full {
            debug!("{listener}: accept queue full, refusing {src}");
            fx.outgoing.push(Packet::tcp(dst, src, Segment::Rst));
            return;
        }

        let child = self.create(SocketKind::Tcp, false);
        if let Some(sock) = self.sockets.get_mut(&child) {
            sock.local = Some(dst);
            sock.peer = Some(src);
            sock.tcp = TcpState::Established;
            sock.send_window = STREAM_WINDOW;
        }
        self.connections.insert((dst, src), child);
        if let Some(sock) = self.sockets.get_mut(&listener) {
            sock.accept_queue.push_back(child);
        }
        fx.outgoing.push(Packet::tcp(dst, src, Segment::SynAck));
        fx.wake.push(BlockReason::SocketAcceptable(listener));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: [u8; 4] = [11, 0, 0, 1];
    const B: [u8; 4] = [11, 0, 0, 2];

    /// Move every outgoing packet of `fx` into the stack that owns its
    /// destination, until both sides are quiet.
    fn pump(a: &mut NetStack, b: &mut NetStack, mut fx: NetEffects) -> Vec<BlockReason> {
        let mut woken = std::mem::take(&mut fx.wake);
        let mut pending = fx.outgoing;
        while let Some(packet) = pending.pop() {
            let mut fx = NetEffects::default();
            if packet.dst.addr == b.addr() {
                b.deliver(packet, &mut fx);
            } else {
                a.deliver(packet, &mut fx);
            }
            woken.extend(fx.wake);
            pending.extend(fx.outgoing);
        }
        woken
    }

    #[test]
    fn udp_send_and_receive() {
        let mut a = NetStack::new(A, 0);
        let mut b = NetStack::new(B, 0);
        let server = b.create(SocketKind::Udp, false);
        b.bind(server, SockaddrIn::new(so::INADDR_ANY, 53)).unwrap();
        let client = a.create(SocketKind::Udp, false);

        let mut fx = NetEffects::default();
        let dst = SockaddrIn::new(B, 53);
        assert_eq!(a.send(client, Some(dst), b"ping", &mut fx), Ok(4));
        let src = a.local_name(client).unwrap();
        assert_eq!(src.port, EPHEMERAL_FIRST);
        let woken = pump(&mut a, &mut b, fx);
        assert_eq!(woken, vec![BlockReason::SocketReadable(server)]);

        let mut fx = NetEffects::default();
        let got = b.recv(server, 2, false, &mut fx).unwrap();
        assert_eq!(got.data, b"pi");
        assert_eq!(got.from, Some(SockaddrIn::new(A, src.port)));
        assert_eq!(b.recv(server, 16, false, &mut fx), Err(Errno::EAGAIN));
    }

    #[test]
    fn bind_conflicts_and_bad_addresses() {
        let mut a = NetStack::new(A, 0);
        let s1 = a.create(SocketKind::Udp, false);
        let s2 = a.create(SocketKind::Udp, false);
        let t1 = a.create(SocketKind::Tcp, false);
        a.bind(s1, SockaddrIn::new(A, 80)).unwrap();
        assert_eq!(a.bind(s2, SockaddrIn::new(A, 80)), Err(Errno::EADDRINUSE));
        assert_eq!(a.bind(s1, SockaddrIn::new(A, 81)), Err(Errno::EINVAL));
        assert_eq!(
            a.bind(s2, SockaddrIn::new([1, 2, 3, 4], 80)),
            Err(Errno::EADDRNOTAVAIL)
        );
        // TCP and UDP port spaces are separate.
        a.bind(t1, SockaddrIn::new(A, 80)).unwrap();
    }

    #[test]
    fn datagram_to_unbound_port_is_dropped() {
        let mut a = NetStack::new(A, 0);
        let mut b = NetStack::new(B, 0);
        let client = a.create(SocketKind::Udp, false);
        let mut fx = NetEffects::default();
        a.send(client, Some(SockaddrIn::new(B, 9)), b"x", &mut fx).unwrap();
        assert!(pump(&mut a, &mut b, fx).is_empty());
        assert_eq!(b.dropped(), 1);
    }

    #[test]
    fn tcp_handshake_transfer_and_close() {
        let mut a = NetStack::new(A, 0);
        let mut b = NetStack::new(B, 0);
        let listener = b.create(SocketKind::Tcp, false);
        b.bind(listener, SockaddrIn::new(so::INADDR_ANY, 80)).unwrap();
        b.listen(listener, 4).unwrap();
        assert_eq!(b.accept(listener), Err(Errno::EAGAIN));

        let client = a.create(SocketKind::Tcp, false);
        let mut fx = NetEffects::default();
        assert_eq!(
            a.connect(client, SockaddrIn::new(B, 80), &mut fx),
            Err(Errno::EINPROGRESS)
        );
        assert_eq!(a.poll_connect(client), Ok(false));
        let woken = pump(&mut a, &mut b, fx);
        assert!(woken.contains(&BlockReason::SocketAcceptable(listener)));
        assert!(woken.contains(&BlockReason::SocketConnected(client)));
        assert_eq!(a.poll_connect(client), Ok(true));

        let conn = b.accept(listener).unwrap();
        assert_eq!(b.peer_name(conn).unwrap().addr, A);

        let mut fx = NetEffects::default();
        assert_eq!(a.send(client, None, b"hello", &mut fx), Ok(5));
        pump(&mut a, &mut b, fx);
        let mut fx = NetEffects::default();
        assert_eq!(b.recv(conn, 64, false, &mut fx).unwrap().data, b"hello");
        assert_eq!(a.get(client).unwrap().send_window, STREAM_WINDOW - 5);
        pump(&mut a, &mut b, fx);
        assert_eq!(a.get(client).unwrap().send_window, STREAM_WINDOW);

        let mut fx = NetEffects::default();
        a.retain(client);
        a.release(client, &mut fx);
        pump(&mut a, &mut b, fx);
        let mut fx = NetEffects::default();
        assert!(b.recv(conn, 64, false, &mut fx).unwrap().data.is_empty());
    }

    #[test]
    fn connect_to_closed_port_is_refused() {
        let mut a = NetStack::new(A, 0);
        let mut b = NetStack::new(B, 0);
        let client = a.create(SocketKind::Tcp, false);
        let mut fx = NetEffects::default();
        let _ = a.connect(client, SockaddrIn::new(B, 81), &mut fx);
        let woken = pump(&mut a, &mut b, fx);
        assert!(woken.contains(&BlockReason::SocketConnected(client)));
        assert_eq!(a.poll_connect(client), Err(Errno::ECONNREFUSED));
    }

    #[test]
    fn full_window_would_block() {
        let mut a = NetStack::new(A, 0);
        let mut b = NetStack::new(B, 0);
        let listener = b.create(SocketKind::Tcp, false);
        b.bind(listener, SockaddrIn::new(B, 80)).unwrap();
        b.listen(listener, 1).unwrap();
        let client = a.create(SocketKind::Tcp, false);
        let mut fx = NetEffects::default();
        let _ = a.connect(client, SockaddrIn::new(B, 80), &mut fx);
        pump(&mut a, &mut b, fx);

        let chunk = vec![7u8; MAX_SEGMENT];
        let mut sent = 0;
        let mut fx = NetEffects::default();
        while let Ok(n) = a.send(client, None, &chunk, &mut fx) {
            sent += n;
        }
        assert_eq!(sent, STREAM_WINDOW);
        assert_eq!(a.send(client, None, &chunk, &mut fx), Err(Errno::EAGAIN));
    }

    #[test]
    fn closing_listener_resets_queued_connections() {
        let mut a = NetStack::new(A, 0);
        let mut b = NetStack::new(B, 0);
        let listener = b.create(SocketKind::Tcp, false);
        b.bind(listener, SockaddrIn::new(B, 80)).unwrap();
        b.listen(listener, 1).unwrap();
        let client = a.create(SocketKind::Tcp, false);
        let mut fx = NetEffects::default();
        let _ = a.connect(client, SockaddrIn::new(B, 80), &mut fx);
        pump(&mut a, &mut b, fx);

        let mut fx = NetEffects::default();
        b.destroy(listener, &mut fx);
        pump(&mut a, &mut b, fx);
        let mut fx = NetEffects::default();
        assert_eq!(a.recv(client, 8, false, &mut fx), Err(Errno::ECONNRESET));
        assert_eq!(b.socket_count(), 0);
    }
}
