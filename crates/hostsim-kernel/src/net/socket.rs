//! Socket state.

use crate::id::SocketId;
use crate::time::SimulationTime;
use hostsim_abi::{Errno, SockaddrIn};
use std::collections::VecDeque;

/// Bytes a stream receiver buffers before the sender must wait.
pub const STREAM_WINDOW: usize = 64 * 1024;
/// Largest payload carried in one stream segment.
pub const MAX_SEGMENT: usize = 16 * 1024;
/// Datagrams buffered per socket; arrivals beyond this are dropped.
pub const MAX_QUEUED_DATAGRAMS: usize = 128;
/// Largest UDP payload over IPv4.
pub const MAX_DATAGRAM: usize = 65_507;
/// Upper bound on a listener's accept queue.
pub const MAX_BACKLOG: usize = 128;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum SocketKind {
    Udp,
    Tcp,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TcpState {
    Closed,
    Listening { backlog: usize },
    Connecting,
    Established,
}

#[derive(Debug)]
pub struct Socket {
    pub id: SocketId,
    pub kind: SocketKind,
    pub nonblocking: bool,
    pub local: Option<SockaddrIn>,
    pub peer: Option<SockaddrIn>,
    pub tcp: TcpState,
    /// Descriptors referring to this socket across all processes.
    pub refs: u32,
    pub recv_timeout: Option<SimulationTime>,
    pub reuse_addr: bool,
    pub(crate) datagrams: VecDeque<(SockaddrIn, Vec<u8>)>,
    pub(crate) stream: VecDeque<u8>,
    pub(crate) accept_queue: VecDeque<SocketId>,
    /// Bytes the peer can still buffer.
    pub(crate) send_window: usize,
    pub(crate) peer_closed: bool,
    pub(crate) reset: bool,
    pub(crate) connect_error: Option<Errno>,
    pub(crate) read_shutdown: bool,
    pub(crate) write_shutdown: bool,
}

impl Socket {
    pub fn new(id: SocketId, kind: SocketKind, nonblocking: bool) -> Self {
        Self {
            id,
            kind,
            nonblocking,
            local: None,
            peer: None,
            tcp: TcpState::Closed,
            refs: 0,
            recv_timeout: None,
            reuse_addr: false,
            datagrams: VecDeque::new(),
            stream: VecDeque::new(),
            accept_queue: VecDeque::new(),
            send_window: 0,
            peer_closed: false,
            reset: false,
            connect_error: None,
            read_shutdown: false,
            write_shutdown: false,
        }
    }

    pub fn is_listening(&self) -> bool {
        matches!(self.tcp, TcpState::Listening { .. })
    }

    /// Whether a read would return without blocking.
    pub fn is_readable(&self) -> bool {
        match self.kind {
            SocketKind::Udp => !self.datagrams.is_empty() || self.read_shutdown,
            SocketKind::Tcp => {
                !self.stream.is_empty() || self.peer_closed || self.reset || self.read_shutdown
            }
        }
    }

    pub fn queued_bytes(&self) -> usize {
        match self.kind {
            SocketKind::Udp => self.datagrams.iter().map(|(_, d)| d.len()).sum(),
            SocketKind::Tcp => self.stream.len(),
        }
    }

    /// Whether a datagram for `dst` should be delivered to this socket.
    pub(crate) fn accepts_datagram(&self, src: SockaddrIn, dst: SockaddrIn) -> bool {
        let Some(local) = self.local else {
            return false;
        };
        let addr_ok = local.is_unspecified() || local.addr == dst.addr;
        let peer_ok = self.peer.map_or(true, |peer| peer == src);
        local.port == dst.port && addr_ok && peer_ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_socket_is_not_readable() {
        let s = Socket::new(SocketId(0), SocketKind::Tcp, false);
        assert!(!s.is_readable());
        assert!(!s.is_listening());
    }

    #[test]
    fn end_of_stream_is_readable() {
        let mut s = Socket::new(SocketId(0), SocketKind::Tcp, false);
        s.peer_closed = true;
        assert!(s.is_readable());
    }

    #[test]
    fn datagram_filtering() {
        let mut s = Socket::new(SocketId(0), SocketKind::Udp, false);
        let src = SockaddrIn::new([11, 0, 0, 2], 5000);
        let dst = SockaddrIn::new([11, 0, 0, 1], 53);
        assert!(!s.accepts_datagram(src, dst));
        s.local = Some(SockaddrIn::new([0, 0, 0, 0], 53));
        assert!(s.accepts_datagram(src, dst));
        s.peer = Some(SockaddrIn::new([11, 0, 0, 3], 5000));
        assert!(!s.accepts_datagram(src, dst));
    }
}
