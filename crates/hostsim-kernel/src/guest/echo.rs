//! UDP and TCP echo servers and clients.

use super::{arg_or, call, parse_endpoint, print, required, result, Buffer, Guest, Machine};
use crate::memory::MemoryView;
use crate::thread::{ManagedThread, ThreadStep};
use hostsim_abi::socket::{
    AF_INET, INADDR_ANY, SOCK_DGRAM, SOCK_STREAM, SOL_SOCKET, SO_RCVTIMEO, SO_REUSEADDR,
};
use hostsim_abi::{nr, Errno, SockaddrIn, Timeval, SOCKADDR_IN_SIZE, TIMESPEC_SIZE};

const BUF_SIZE: usize = 2048;
const LINE_SIZE: usize = 256;
const DEFAULT_PORT: u16 = 8000;
const BACKLOG: u64 = 16;

// ═══════════════════════════════════════════════════════════════════════
//  UDP server
// ═══════════════════════════════════════════════════════════════════════

pub(super) fn udp_server(args: &[String]) -> Result<Box<dyn ManagedThread>, String> {
    Ok(Guest::boxed(UdpServer {
        port: arg_or(args, 0, DEFAULT_PORT)?,
        count: arg_or(args, 1, 0)?,
        served: 0,
        fd: 0,
        buf: Buffer::UNSET,
        peer: Buffer::UNSET,
        peer_len: Buffer::UNSET,
        state: UdpServerState::Start,
    }))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum UdpServerState {
    Start,
    Socket,
    Bind,
    Recv,
    Send,
    Close,
}

struct UdpServer {
    port: u16,
    /// Datagrams to echo before exiting; 0 is unbounded.
    count: u64,
    served: u64,
    fd: u64,
    buf: Buffer,
    peer: Buffer,
    peer_len: Buffer,
    state: UdpServerState,
}

impl UdpServer {
    fn recv(&mut self, mem: &mut MemoryView) -> Result<ThreadStep, String> {
        mem.write_u32(self.peer_len.ptr, SOCKADDR_IN_SIZE as u32)
            .map_err(|e| e.to_string())?;
        self.state = UdpServerState::Recv;
        Ok(call(
            nr::RECVFROM,
            &[
                self.fd,
                self.buf.addr(),
                self.buf.cap as u64,
                0,
                self.peer.addr(),
                self.peer_len.addr(),
            ],
        ))
    }
}

impl Machine for UdpServer {
    fn step(&mut self, mem: &mut MemoryView, last: Option<i64>) -> Result<ThreadStep, String> {
        match self.state {
            UdpServerState::Start => {
                self.buf = Buffer::alloc(mem, BUF_SIZE)?;
                self.peer = Buffer::alloc(mem, SOCKADDR_IN_SIZE)?;
                self.peer_len = Buffer::alloc(mem, 4)?;
                self.state = UdpServerState::Socket;
                Ok(call(nr::SOCKET, &[AF_INET, SOCK_DGRAM, 0]))
            }
            UdpServerState::Socket => {
                self.fd = result(last, "socket")? as u64;
                let local = SockaddrIn::new(INADDR_ANY, self.port);
                self.peer.fill(mem, &local.to_bytes())?;
                self.state = UdpServerState::Bind;
                Ok(call(
                    nr::BIND,
                    &[self.fd, self.peer.addr(), SOCKADDR_IN_SIZE as u64],
                ))
            }
            UdpServerState::Bind => {
                result(last, "bind")?;
                self.recv(mem)
            }
            UdpServerState::Recv => {
                let n = result(last, "recvfrom")?;
                self.state = UdpServerState::Send;
                Ok(call(
                    nr::SENDTO,
                    &[
                        self.fd,
                        self.buf.addr(),
                        n as u64,
                        0,
                        self.peer.addr(),
                        SOCKADDR_IN_SIZE as u64,
                    ],
                ))
            }
            UdpServerState::Send => {
                result(last, "sendto")?;
                self.served += 1;
                if self.count != 0 && self.served >= self.count {
                    self.state = UdpServerState::Close;
                    return Ok(call(nr::CLOSE, &[self.fd]));
                }
                self.recv(mem)
            }
            UdpServerState::Close => {
                result(last, "close")?;
                Ok(ThreadStep::Exit(0))
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  UDP client
// ═══════════════════════════════════════════════════════════════════════

pub(super) fn udp_client(args: &[String]) -> Result<Box<dyn ManagedThread>, String> {
    let server = parse_endpoint(required(args, 0, "server")?)?;
    let message = required(args, 1, "message")?.as_bytes().to_vec();
    if message.is_empty() || message.len() > BUF_SIZE {
        return Err(format!("message must be 1..={BUF_SIZE} bytes"));
    }
    Ok(Guest::boxed(UdpClient {
        server,
        message,
        rounds: arg_or(args, 2, 1)?,
        timeout_ns: arg_or(args, 3, 0)?,
        done: 0,
        fd: 0,
        buf: Buffer::UNSET,
        msg: Buffer::UNSET,
        dst: Buffer::UNSET,
        line: Buffer::UNSET,
        state: UdpClientState::Start,
    }))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum UdpClientState {
    Start,
    Socket,
    SetTimeout,
    Send,
    Recv,
    Print,
    Close,
}

/// Sends `message` `rounds` times and prints each echo.
///
/// With a receive timeout, a lost datagram prints `timeout` instead.
struct UdpClient {
    server: SockaddrIn,
    message: Vec<u8>,
    rounds: u64,
    timeout_ns: u64,
    done: u64,
    fd: u64,
    buf: Buffer,
    msg: Buffer,
    dst: Buffer,
    line: Buffer,
    state: UdpClientState,
}

impl UdpClient {
    fn send(&mut self) -> ThreadStep {
        self.state = UdpClientState::Send;
        call(
            nr::SENDTO,
            &[
                self.fd,
                self.msg.addr(),
                self.message.len() as u64,
                0,
                self.dst.addr(),
                SOCKADDR_IN_SIZE as u64,
            ],
        )
    }

    fn next_round(&mut self) -> ThreadStep {
        self.done += 1;
        if self.done >= self.rounds {
            self.state = UdpClientState::Close;
            return call(nr::CLOSE, &[self.fd]);
        }
        self.send()
    }
}

impl Machine for UdpClient {
    fn step(&mut self, mem: &mut MemoryView, last: Option<i64>) -> Result<ThreadStep, String> {
        match self.state {
            UdpClientState::Start => {
                self.buf = Buffer::alloc(mem, BUF_SIZE)?;
                self.msg = Buffer::alloc(mem, self.message.len())?;
                self.msg.fill(mem, &self.message)?;
                self.dst = Buffer::alloc(mem, TIMESPEC_SIZE.max(SOCKADDR_IN_SIZE))?;
                self.line = Buffer::alloc(mem, LINE_SIZE)?;
                self.state = UdpClientState::Socket;
                Ok(call(nr::SOCKET, &[AF_INET, SOCK_DGRAM, 0]))
            }
            UdpClientState::Socket => {
                self.fd = result(last, "socket")? as u64;
                if self.timeout_ns == 0 {
                    self.dst.fill(mem, &self.server.to_bytes())?;
                    return Ok(self.send());
                }
                // The destination buffer briefly holds the timeval.
                self.dst
                    .fill(mem, &Timeval::from_nanos(self.timeout_ns).to_bytes())?;
                self.state = UdpClientState::SetTimeout;
                Ok(call(
                    nr::SETSOCKOPT,
                    &[
                        self.fd,
                        SOL_SOCKET,
                        SO_RCVTIMEO,
                        self.dst.addr(),
                        TIMESPEC_SIZE as u64,
                    ],
                ))
            }
            UdpClientState::SetTimeout => {
                result(last, "setsockopt")?;
                self.dst.fill(mem, &self.server.to_bytes())?;
                Ok(self.send())
            }
            UdpClientState::Send => {
                result(last, "sendto")?;
                self.state = UdpClientState::Recv;
                Ok(call(
                    nr::RECVFROM,
                    &[self.fd, self.buf.addr(), self.buf.cap as u64, 0, 0, 0],
                ))
            }
            UdpClientState::Recv => {
                let text = match last.and_then(Errno::from_syscall_return) {
                    Some(Errno::EAGAIN) => "timeout\n".to_string(),
                    _ => {
                        let n = result(last, "recvfrom")?;
                        let data = self.buf.read(mem, n as usize)?;
                        format!("echo: {}\n", String::from_utf8_lossy(&data))
                    }
                };
                self.state = UdpClientState::Print;
                print(mem, &self.line, 1, &text)
            }
            UdpClientState::Print => {
                result(last, "write")?;
                Ok(self.next_round())
            }
            UdpClientState::Close => {
                result(last, "close")?;
                Ok(ThreadStep::Exit(0))
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  TCP server
// ═══════════════════════════════════════════════════════════════════════

pub(super) fn tcp_server(args: &[String]) -> Result<Box<dyn ManagedThread>, String> {
    Ok(Guest::boxed(TcpServer {
        port: arg_or(args, 0, DEFAULT_PORT)?,
        listener: 0,
        conn: 0,
        pending: 0,
        sent: 0,
        buf: Buffer::UNSET,
        scratch: Buffer::UNSET,
        state: TcpServerState::Start,
    }))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TcpServerState {
    Start,
    Socket,
    ReuseAddr,
    Bind,
    Listen,
    Accept,
    Read,
    Write,
    CloseConn,
    CloseListener,
}

/// Serves one connection: echoes everything until the peer closes.
struct TcpServer {
    port: u16,
    listener: u64,
    conn: u64,
    /// Bytes of the current chunk still to echo.
    pending: usize,
    sent: usize,
    buf: Buffer,
    scratch: Buffer,
    state: TcpServerState,
}

impl TcpServer {
    fn read(&mut self) -> ThreadStep {
        self.state = TcpServerState::Read;
        call(nr::READ, &[self.conn, self.buf.addr(), self.buf.cap as u64])
    }

    fn write(&mut self) -> ThreadStep {
        self.state = TcpServerState::Write;
        call(
            nr::WRITE,
            &[
                self.conn,
                self.buf.addr() + self.sent as u64,
                (self.pending - self.sent) as u64,
            ],
        )
    }
}

impl Machine for TcpServer {
    fn step(&mut self, mem: &mut MemoryView, last: Option<i64>) -> Result<ThreadStep, String> {
        match self.state {
            TcpServerState::Start => {
                self.buf = Buffer::alloc(mem, BUF_SIZE)?;
                self.scratch = Buffer::alloc(mem, SOCKADDR_IN_SIZE)?;
                self.state = TcpServerState::Socket;
                Ok(call(nr::SOCKET, &[AF_INET, SOCK_STREAM, 0]))
            }
            TcpServerState::Socket => {
                self.listener = result(last, "socket")? as u64;
                self.scratch.fill(mem, &1u32.to_le_bytes())?;
                self.state = TcpServerState::ReuseAddr;
                Ok(call(
                    nr::SETSOCKOPT,
                    &[self.listener, SOL_SOCKET, SO_REUSEADDR, self.scratch.addr(), 4],
                ))
            }
            TcpServerState::ReuseAddr => {
                result(last, "setsockopt")?;
                let local = SockaddrIn::new(INADDR_ANY, self.port);
                self.scratch.fill(mem, &local.to_bytes())?;
                self.state = TcpServerState::Bind;
                Ok(call(
                    nr::BIND,
                    &[self.listener, self.scratch.addr(), SOCKADDR_IN_SIZE as u64],
                ))
            }
            TcpServerState::Bind => {
                result(last, "bind")?;
                self.state = TcpServerState::Listen;
                Ok(call(nr::LISTEN, &[self.listener, BACKLOG]))
            }
            TcpServerState::Listen => {
                result(last, "listen")?;
                self.state = TcpServerState::Accept;
                Ok(call(nr::ACCEPT, &[self.listener, 0, 0]))
            }
            TcpServerState::Accept => {
                self.conn = result(last, "accept")? as u64;
                Ok(self.read())
            }
            TcpServerState::Read => {
                let n = result(last, "read")? as usize;
                if n == 0 {
                    self.state = TcpServerState::CloseConn;
                    return Ok(call(nr::CLOSE, &[self.conn]));
                }
                self.pending = n;
                self.sent = 0;
                Ok(self.write())
            }
            TcpServerState::Write => {
                self.sent += result(last, "write")? as usize;
                if self.sent < self.pending {
                    return Ok(self.write());
                }
                Ok(self.read())
            }
            TcpServerState::CloseConn => {
                result(last, "close")?;
                self.state = TcpServerState::CloseListener;
                Ok(call(nr::CLOSE, &[self.listener]))
            }
            TcpServerState::CloseListener => {
                result(last, "close")?;
                Ok(ThreadStep::Exit(0))
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  TCP client
// ═══════════════════════════════════════════════════════════════════════

pub(super) fn tcp_client(args: &[String]) -> Result<Box<dyn ManagedThread>, String> {
    let server = parse_endpoint(required(args, 0, "server")?)?;
    let message = required(args, 1, "message")?.as_bytes().to_vec();
    if message.is_empty() || message.len() > BUF_SIZE {
        return Err(format!("message must be 1..={BUF_SIZE} bytes"));
    }
    Ok(Guest::boxed(TcpClient {
        server,
        message,
        fd: 0,
        sent: 0,
        received: Vec::new(),
        buf: Buffer::UNSET,
        msg: Buffer::UNSET,
        line: Buffer::UNSET,
        state: TcpClientState::Start,
    }))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TcpClientState {
    Start,
    Socket,
    Connect,
    Write,
    Read,
    Print,
    Close,
}

/// Connects, sends `message`, reads the echo back and prints it.
struct TcpClient {
    server: SockaddrIn,
    message: Vec<u8>,
    fd: u64,
    sent: usize,
    received: Vec<u8>,
    buf: Buffer,
    msg: Buffer,
    line: Buffer,
    state: TcpClientState,
}

impl TcpClient {
    fn write(&mut self) -> ThreadStep {
        self.state = TcpClientState::Write;
        call(
            nr::WRITE,
            &[
                self.fd,
                self.msg.addr() + self.sent as u64,
                (self.message.len() - self.sent) as u64,
            ],
        )
    }

    fn read(&mut self) -> ThreadStep {
        self.state = TcpClientState::Read;
        call(nr::READ, &[self.fd, self.buf.addr(), self.buf.cap as u64])
    }
}

impl Machine for TcpClient {
    fn step(&mut self, mem: &mut MemoryView, last: Option<i64>) -> Result<ThreadStep, String> {
        match self.state {
            TcpClientState::Start => {
                self.buf = Buffer::alloc(mem, BUF_SIZE)?;
                self.msg = Buffer::alloc(mem, self.message.len().max(SOCKADDR_IN_SIZE))?;
                self.line = Buffer::alloc(mem, LINE_SIZE)?;
                self.state = TcpClientState::Socket;
                Ok(call(nr::SOCKET, &[AF_INET, SOCK_STREAM, 0]))
            }
            TcpClientState::Socket => {
                self.fd = result(last, "socket")? as u64;
                // The message buffer doubles as the sockaddr until connected.
                self.msg.fill(mem, &self.server.to_bytes())?;
                self.state = TcpClientState::Connect;
                Ok(call(
                    nr::CONNECT,
                    &[self.fd, self.msg.addr(), SOCKADDR_IN_SIZE as u64],
                ))
            }
            TcpClientState::Connect => {
                result(last, "connect")?;
                self.msg.fill(mem, &self.message)?;
                Ok(self.write())
            }
            TcpClientState::Write => {
                self.sent += result(last, "write")? as usize;
                if self.sent < self.message.len() {
                    return Ok(self.write());
                }
                Ok(self.read())
            }
            TcpClientState::Read => {
                let n = result(last, "read")? as usize;
                if n > 0 {
                    self.received.extend(self.buf.read(mem, n)?);
                }
                if n > 0 && self.received.len() < self.message.len() {
                    return Ok(self.read());
                }
                let text = format!("echo: {}\n", String::from_utf8_lossy(&self.received));
                self.state = TcpClientState::Print;
                print(mem, &self.line, 1, &text)
            }
            TcpClientState::Print => {
                result(last, "write")?;
                self.state = TcpClientState::Close;
                Ok(call(nr::CLOSE, &[self.fd]))
            }
            TcpClientState::Close => {
                result(last, "close")?;
                Ok(ThreadStep::Exit(0))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn expect_call(step: ThreadStep, number: u64) -> [u64; 6] {
        match step {
            ThreadStep::Syscall(req) => {
                assert_eq!(req.number, number, "unexpected {req:?}");
                req.args.raw
            }
            other => panic!("expected syscall {number}, got {other:?}"),
        }
    }

    #[test]
    fn udp_server_binds_then_receives() {
        let mut mem = MemoryView::new();
        let mut server = udp_server(&args(&["9000", "1"])).unwrap();
        let socket = expect_call(server.resume(&mut mem, None), nr::SOCKET);
        assert_eq!(socket[..2], [AF_INET, SOCK_DGRAM]);

        let bind = expect_call(server.resume(&mut mem, Some(3)), nr::BIND);
        assert_eq!(bind[0], 3);
        let bytes = mem.read(crate::memory::GuestPtr::new(bind[1]), 16).unwrap();
        assert_eq!(SockaddrIn::from_bytes(&bytes).unwrap().port, 9000);

        let recv = expect_call(server.resume(&mut mem, Some(0)), nr::RECVFROM);
        assert_eq!(recv[2], BUF_SIZE as u64);
        let send = expect_call(server.resume(&mut mem, Some(4)), nr::SENDTO);
        assert_eq!(send[2], 4);
        assert_eq!(send[4], recv[4]);

        // One datagram was requested, so the server closes and exits.
        expect_call(server.resume(&mut mem, Some(4)), nr::CLOSE);
        assert_eq!(server.resume(&mut mem, Some(0)), ThreadStep::Exit(0));
    }

    #[test]
    fn udp_client_prints_timeout_on_eagain() {
        let mut mem = MemoryView::new();
        let mut client = udp_client(&args(&["11.0.0.1:9000", "hi", "1", "5000"])).unwrap();
        expect_call(client.resume(&mut mem, None), nr::SOCKET);
        let opt = expect_call(client.resume(&mut mem, Some(3)), nr::SETSOCKOPT);
        assert_eq!(opt[2], SO_RCVTIMEO);
        expect_call(client.resume(&mut mem, Some(0)), nr::SENDTO);
        expect_call(client.resume(&mut mem, Some(2)), nr::RECVFROM);
        let write = expect_call(
            client.resume(&mut mem, Some(Errno::EAGAIN.to_syscall_return())),
            nr::WRITE,
        );
        let text = mem
            .read(crate::memory::GuestPtr::new(write[1]), write[2] as usize)
            .unwrap();
        assert_eq!(text, b"timeout\n");
    }

    #[test]
    fn tcp_client_rejects_bad_arguments() {
        assert!(tcp_client(&args(&["nowhere", "x"])).is_err());
        assert!(tcp_client(&args(&["11.0.0.1:80"])).is_err());
        assert!(tcp_client(&args(&["11.0.0.1:80", ""])).is_err());
    }

    #[test]
    fn tcp_server_echoes_partial_writes() {
        let mut mem = MemoryView::new();
        let mut server = tcp_server(&args(&[])).unwrap();
        expect_call(server.resume(&mut mem, None), nr::SOCKET);
        expect_call(server.resume(&mut mem, Some(3)), nr::SETSOCKOPT);
        expect_call(server.resume(&mut mem, Some(0)), nr::BIND);
        expect_call(server.resume(&mut mem, Some(0)), nr::LISTEN);
        expect_call(server.resume(&mut mem, Some(0)), nr::ACCEPT);
        let read = expect_call(server.resume(&mut mem, Some(4)), nr::READ);
        assert_eq!(read[0], 4);
        let first = expect_call(server.resume(&mut mem, Some(10)), nr::WRITE);
        assert_eq!(first[2], 10);
        let rest = expect_call(server.resume(&mut mem, Some(6)), nr::WRITE);
        assert_eq!(rest[1], first[1] + 6);
        assert_eq!(rest[2], 4);
        expect_call(server.resume(&mut mem, Some(4)), nr::READ);
        let close = expect_call(server.resume(&mut mem, Some(0)), nr::CLOSE);
        assert_eq!(close[0], 4);
    }
}
