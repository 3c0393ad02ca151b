//! Built-in guest programs.
//!
//! A program is a named factory producing the [`ManagedThread`] for a new
//! process's main thread.  The built-ins are explicit state machines that
//! talk to the kernel only through syscalls, exactly like an interposed
//! binary would.  They exist to exercise the kernel end to end from the
//! tests and the command-line runner.
//!
//! | Name | Arguments | Behaviour |
//! |---|---|---|
//! | `udp_echo_server` | `[port] [count]` | echo `count` datagrams (0 = forever) |
//! | `udp_echo_client` | `ip:port message [count]` | send, print each echo |
//! | `tcp_echo_server` | `[port]` | accept one connection, echo until EOF |
//! | `tcp_echo_client` | `ip:port message` | connect, send, print the echo |
//! | `sleeper` | `[ns]` | sleep and print the elapsed virtual time |
//! | `spawner` | `[threads]` | start threads, join them through futexes |
//! | `forker` | `[code]` | fork a child exiting with `code`, reap it |

mod echo;
mod sleeper;
mod spawner;

use crate::error::SimError;
use crate::memory::{GuestPtr, MemoryView};
use crate::syscall::SyscallRequest;
use crate::thread::{CloneRequest, ManagedThread, ThreadStep};
use hostsim_abi::{nr, Errno, SockaddrIn};
use std::collections::BTreeMap;
use std::fmt;
use std::net::SocketAddrV4;
use std::sync::Arc;

/// Builds the main thread of a new process from its arguments.
pub type ProgramFactory =
    Arc<dyn Fn(&[String]) -> Result<Box<dyn ManagedThread>, String> + Send + Sync>;

/// Programs a config may launch, by name.
#[derive(Clone, Default)]
pub struct ProgramRegistry {
    programs: BTreeMap<String, ProgramFactory>,
}

impl fmt::Debug for ProgramRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.programs.keys()).finish()
    }
}

impl ProgramRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every built-in program.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register("udp_echo_server", echo::udp_server);
        registry.register("udp_echo_client", echo::udp_client);
        registry.register("tcp_echo_server", echo::tcp_server);
        registry.register("tcp_echo_client", echo::tcp_client);
        registry.register("sleeper", sleeper::sleeper);
        registry.register("spawner", spawner::spawner);
        registry.register("forker", spawner::forker);
        registry
    }

    /// Add or replace a program.
    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&[String]) -> Result<Box<dyn ManagedThread>, String> + Send + Sync + 'static,
    {
        self.programs.insert(name.to_string(), Arc::new(factory));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.programs.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.programs.keys().map(String::as_str)
    }

    /// Build the main thread of a new `name` process.
    pub fn spawn(&self, name: &str, args: &[String]) -> Result<Box<dyn ManagedThread>, SimError> {
        let factory = self
            .programs
            .get(name)
            .ok_or_else(|| SimError::UnknownProgram(name.to_string()))?;
        factory(args).map_err(|message| SimError::ProgramArgs {
            program: name.to_string(),
            message,
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  State-machine plumbing
// ═══════════════════════════════════════════════════════════════════════

/// One guest thread's logic, advanced one syscall at a time.
///
/// `step` receives the previous syscall's result and returns the next
/// step.  An `Err` ends the thread: the message goes to stderr and the
/// thread exits with code 1.
pub(crate) trait Machine: Send + 'static {
    fn step(&mut self, mem: &mut MemoryView, last: Option<i64>) -> Result<ThreadStep, String>;

    fn clone_thread(&mut self, _request: &CloneRequest) -> Result<Box<dyn ManagedThread>, Errno> {
        Err(Errno::ENOTSUP)
    }
}

/// Adapts a [`Machine`] to the kernel's [`ManagedThread`] seam.
pub(crate) struct Guest<M> {
    machine: M,
    failed: bool,
}

impl<M: Machine> Guest<M> {
    pub(crate) fn boxed(machine: M) -> Box<dyn ManagedThread> {
        Box::new(Self {
            machine,
            failed: false,
        })
    }
}

impl<M: Machine> ManagedThread for Guest<M> {
    fn resume(&mut self, mem: &mut MemoryView, last_result: Option<i64>) -> ThreadStep {
        if self.failed {
            return ThreadStep::Exit(1);
        }
        match self.machine.step(mem, last_result) {
            Ok(step) => step,
            Err(message) => {
                self.failed = true;
                let line = format!("{message}\n");
                match mem.alloc_bytes(line.as_bytes()) {
                    Ok(ptr) => call(nr::WRITE, &[2, ptr.addr(), line.len() as u64]),
                    Err(_) => ThreadStep::Exit(1),
                }
            }
        }
    }

    fn clone_thread(&mut self, request: &CloneRequest) -> Result<Box<dyn ManagedThread>, Errno> {
        self.machine.clone_thread(request)
    }
}

pub(crate) fn call(number: u64, args: &[u64]) -> ThreadStep {
    ThreadStep::Syscall(SyscallRequest::new(number, args))
}

/// The previous syscall's value, or a description of why there is none.
pub(crate) fn result(last: Option<i64>, what: &str) -> Result<i64, String> {
    let rv = last.ok_or_else(|| format!("{what}: no result"))?;
    match Errno::from_syscall_return(rv) {
        Some(errno) => Err(format!("{what}: {errno}")),
        None => Ok(rv),
    }
}

/// A guest buffer of fixed capacity, allocated once.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Buffer {
    pub ptr: GuestPtr,
    pub cap: usize,
}

impl Buffer {
    /// Placeholder until the first step allocates the real buffer.
    pub(crate) const UNSET: Buffer = Buffer {
        ptr: GuestPtr::NULL,
        cap: 0,
    };

    pub(crate) fn alloc(mem: &mut MemoryView, cap: usize) -> Result<Self, String> {
        let ptr = mem.alloc(cap).map_err(|e| e.to_string())?;
        Ok(Self { ptr, cap })
    }

    /// Copy `bytes` (truncated to the capacity) in; returns the stored length.
    pub(crate) fn fill(&self, mem: &mut MemoryView, bytes: &[u8]) -> Result<usize, String> {
        let n = bytes.len().min(self.cap);
        mem.write(self.ptr, &bytes[..n]).map_err(|e| e.to_string())?;
        Ok(n)
    }

    pub(crate) fn read(&self, mem: &MemoryView, len: usize) -> Result<Vec<u8>, String> {
        mem.read(self.ptr, len.min(self.cap)).map_err(|e| e.to_string())
    }

    pub(crate) fn addr(&self) -> u64 {
        self.ptr.addr()
    }
}

/// `write(fd, text)` through `buf`.
pub(crate) fn print(
    mem: &mut MemoryView,
    buf: &Buffer,
    fd: u64,
    text: &str,
) -> Result<ThreadStep, String> {
    let n = buf.fill(mem, text.as_bytes())?;
    Ok(call(nr::WRITE, &[fd, buf.addr(), n as u64]))
}

/// Parse `ip:port`.
pub(crate) fn parse_endpoint(text: &str) -> Result<SockaddrIn, String> {
    let addr: SocketAddrV4 = text
        .parse()
        .map_err(|e| format!("bad endpoint {text:?}: {e}"))?;
    Ok(SockaddrIn::new(addr.ip().octets(), addr.port()))
}

/// Positional argument `index`, parsed, or `default` when absent.
pub(crate) fn arg_or<T>(args: &[String], index: usize, default: T) -> Result<T, String>
where
    T: std::str::FromStr,
    T::Err: fmt::Display,
{
    match args.get(index) {
        Some(text) => text
            .parse()
            .map_err(|e| format!("argument {index} ({text:?}): {e}")),
        None => Ok(default),
    }
}

pub(crate) fn required<'a>(args: &'a [String], index: usize, name: &str) -> Result<&'a str, String> {
    args.get(index)
        .map(String::as_str)
        .ok_or_else(|| format!("missing argument {index} ({name})"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_registry_lists_every_program() {
        let registry = ProgramRegistry::builtin();
        let names: Vec<&str> = registry.names().collect();
        assert_eq!(
            names,
            vec![
                "forker",
                "sleeper",
                "spawner",
                "tcp_echo_client",
                "tcp_echo_server",
                "udp_echo_client",
                "udp_echo_server",
            ]
        );
    }

    #[test]
    fn spawn_reports_unknown_programs_and_bad_args() {
        let registry = ProgramRegistry::builtin();
        assert!(matches!(
            registry.spawn("nope", &[]),
            Err(SimError::UnknownProgram(name)) if name == "nope"
        ));
        assert!(matches!(
            registry.spawn("udp_echo_client", &[]),
            Err(SimError::ProgramArgs { .. })
        ));
        assert!(registry.spawn("sleeper", &["abc".to_string()]).is_err());
        assert!(registry.spawn("sleeper", &["1000".to_string()]).is_ok());
    }

    #[test]
    fn endpoint_parsing() {
        let addr = parse_endpoint("11.0.0.1:8000").unwrap();
        assert_eq!(addr, SockaddrIn::new([11, 0, 0, 1], 8000));
        assert!(parse_endpoint("11.0.0.1").is_err());
    }

    #[test]
    fn result_maps_negative_returns_to_messages() {
        assert_eq!(result(Some(3), "read"), Ok(3));
        let err = result(Some(Errno::EBADF.to_syscall_return()), "read").unwrap_err();
        assert!(err.starts_with("read: "));
        assert!(result(None, "read").is_err());
    }

    struct Failing;

    impl Machine for Failing {
        fn step(&mut self, _mem: &mut MemoryView, _last: Option<i64>) -> Result<ThreadStep, String> {
            Err("boom".to_string())
        }
    }

    #[test]
    fn failing_machine_writes_stderr_then_exits() {
        let mut mem = MemoryView::new();
        let mut guest = Guest::boxed(Failing);
        match guest.resume(&mut mem, None) {
            ThreadStep::Syscall(req) => {
                assert_eq!(req.number, nr::WRITE);
                assert_eq!(req.args.get(0), 2);
                assert_eq!(mem.read(req.args.ptr(1), 5).unwrap(), b"boom\n");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(guest.resume(&mut mem, Some(5)), ThreadStep::Exit(1));
    }
}
