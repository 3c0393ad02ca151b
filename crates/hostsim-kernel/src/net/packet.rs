//! Packets exchanged between simulated network stacks.

use hostsim_abi::SockaddrIn;

/// IPv4 + UDP header bytes charged against bandwidth.
pub const UDP_HEADER_LEN: usize = 28;
/// IPv4 + TCP header bytes charged against bandwidth.
pub const TCP_HEADER_LEN: usize = 40;

/// Stream control and data carried between TCP endpoints.
///
/// The simulated network never loses or reorders stream traffic, so there
/// are no sequence numbers: a connection is a reliable ordered pipe with
/// receiver-driven flow control (`Window`).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Segment {
    Syn,
    SynAck,
    Data(Vec<u8>),
    /// The receiver consumed this many bytes; the sender may send as many more.
    Window(u32),
    Fin,
    Rst,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Payload {
    Datagram(Vec<u8>),
    Tcp(Segment),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Packet {
    pub src: SockaddrIn,
    pub dst: SockaddrIn,
    pub payload: Payload,
}

impl Packet {
    pub fn udp(src: SockaddrIn, dst: SockaddrIn, data: Vec<u8>) -> Self {
        Self {
            src,
            dst,
            payload: Payload::Datagram(data),
        }
    }

    pub fn tcp(src: SockaddrIn, dst: SockaddrIn, segment: Segment) -> Self {
        Self {
            src,
            dst,
            payload: Payload::Tcp(segment),
        }
    }

    /// Bytes on the wire, headers included.
    pub fn wire_len(&self) -> usize {
        match &self.payload {
            Payload::Datagram(data) => UDP_HEADER_LEN + data.len(),
            Payload::Tcp(Segment::Data(data)) => TCP_HEADER_LEN + data.len(),
            Payload::Tcp(_) => TCP_HEADER_LEN,
        }
    }

    pub fn is_datagram(&self) -> bool {
        matches!(self.payload, Payload::Datagram(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_len_includes_headers() {
        let a = SockaddrIn::new([10, 0, 0, 1], 1);
        let b = SockaddrIn::new([10, 0, 0, 2], 2);
        assert_eq!(Packet::udp(a, b, vec![0; 100]).wire_len(), 128);
        assert_eq!(Packet::tcp(a, b, Segment::Syn).wire_len(), 40);
        assert_eq!(Packet::tcp(a, b, Segment::Data(vec![0; 10])).wire_len(), 50);
    }
}
