//! hostsim: a deterministic discrete-event network simulator that runs
//! guest programs against an emulated Linux kernel.
//!
//! Each simulated host owns a virtual clock, an event queue, a process and
//! thread registry and a network stack.  Guest threads talk to the host
//! only through syscalls; a syscall either completes, fails with an errno,
//! or blocks the thread on a condition until a wakeup or timeout.  Hosts
//! advance in rounds bounded by the runahead (the smallest link latency),
//! so a pool of workers can run them in parallel while every run with the
//! same config and seed produces the same result.
//!
//! # Architecture
//!
//! - [`config`]: Simulation, host, process and link configuration
//! - [`simulation`]: Builds hosts from a config, runs them, reports
//! - [`worker`]: Round barrier and cross-host event routing
//! - [`host`]: Per-host event loop, blocking protocol, process lifecycle
//! - [`syscall`]: Dispatch table, conditions and the emulated handlers
//! - [`net`]: Sockets, packets, interfaces and the host topology
//! - [`guest`]: Built-in guest programs
//! - [`trace`]: Executed-event records for determinism checks
//! - [`verified`]: Pure functions extracted from the kernel paths
//!
//! # Example
//!
//! ```no_run
//! use hostsim_kernel::config::{HostConfig, SimulationConfig};
//! use hostsim_kernel::simulation::run_builtin;
//!
//! let config = SimulationConfig::new(100_000_000)
//!     .with_host(HostConfig::new("server").with_process("udp_echo_server", &["8000", "1"], 0))
//!     .with_host(HostConfig::new("client").with_process(
//!         "udp_echo_client",
//!         &["11.0.0.1:8000", "hello"],
//!         1_000_000,
//!     ));
//! let report = run_builtin(config).unwrap();
//! assert_eq!(report.processes[1].stdout, "echo: hello\n");
//! ```

pub mod config;
pub mod descriptor;
pub mod error;
pub mod event;
pub mod futex;
pub mod guest;
pub mod host;
pub mod id;
pub mod memory;
pub mod net;
pub mod process;
pub mod queue;
pub mod simulation;
pub mod syscall;
pub mod thread;
pub mod time;
pub mod trace;
pub mod verified;
pub mod worker;

pub use config::{HostConfig, LinkConfig, ProcessConfig, SimulationConfig};
pub use error::SimError;
pub use guest::ProgramRegistry;
pub use simulation::{ProcessReport, Simulation, SimulationReport};
pub use time::{SimulationTime, VirtualTime};
