//! Simulation configuration.
//!
//! A [`SimulationConfig`] is plain data, loadable from JSON.  It is checked
//! once with [`SimulationConfig::validate`] before the core sees it; after
//! that the core assumes every invariant listed on the fields.

use hostsim_abi::{nr, SYSCALL_TABLE_SIZE};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::net::Ipv4Addr;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("no hosts configured")]
    NoHosts,

    #[error("worker count must be at least 1")]
    NoWorkers,

    #[error("stop time must be greater than zero")]
    ZeroStopTime,

    #[error("latency must be at least 1 ns ({context})")]
    ZeroLatency { context: String },

    #[error("duplicate host name {0:?}")]
    DuplicateHost(String),

    #[error("duplicate host address {0}")]
    DuplicateAddress(Ipv4Addr),

    #[error("host {host:?} uses reserved address {addr}")]
    ReservedAddress { host: String, addr: Ipv4Addr },

    #[error("link references unknown host {0:?}")]
    UnknownLinkHost(String),

    #[error("link from {0:?} to itself")]
    SelfLink(String),

    #[error("loss rate {0} ppm exceeds 1000000")]
    LossRate(u32),

    #[error("process {program:?} on {host:?} shuts down before it starts")]
    ShutdownBeforeStart { host: String, program: String },

    #[error("syscall number {0} is out of range")]
    SyscallNumber(u64),

    #[error("unblocked syscall latency must be at least 1 ns when the limit is enabled")]
    ZeroUnblockedLatency,
}

fn default_seed() -> u64 {
    1
}

fn default_workers() -> usize {
    1
}

fn default_latency_ns() -> u64 {
    1_000_000
}

fn default_unblocked_syscall_latency_ns() -> u64 {
    1_000
}

fn default_native_syscalls() -> Vec<u64> {
    vec![nr::ARCH_PRCTL]
}

/// Top-level configuration of one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Master seed; per-host RNGs derive from it.
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Number of OS worker threads.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Events after this virtual time never run.
    pub stop_time_ns: u64,
    /// One-way latency between any two hosts without an explicit link.
    #[serde(default = "default_latency_ns")]
    pub default_latency_ns: u64,
    #[serde(default)]
    pub links: Vec<LinkConfig>,
    /// Consecutive non-blocking syscalls before a thread yields; 0 disables.
    #[serde(default)]
    pub unblocked_syscall_limit: u32,
    /// Virtual time a yielding thread waits before continuing.
    #[serde(default = "default_unblocked_syscall_latency_ns")]
    pub unblocked_syscall_latency_ns: u64,
    /// Syscalls the guest executes natively instead of being emulated.
    #[serde(default = "default_native_syscalls")]
    pub native_syscalls: Vec<u64>,
    /// Record every executed event in the report.
    #[serde(default)]
    pub trace: bool,
    pub hosts: Vec<HostConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostConfig {
    pub name: String,
    /// Assigned automatically from 11.0.0.0/8 when absent.
    #[serde(default)]
    pub ip: Option<Ipv4Addr>,
    /// Upstream bandwidth in bits per second; 0 is unlimited.
    #[serde(default)]
    pub bandwidth_bps: u64,
    #[serde(default)]
    pub processes: Vec<ProcessConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessConfig {
    /// Name in the program registry.
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub start_time_ns: u64,
    /// The process is killed with SIGKILL at this time if still running.
    #[serde(default)]
    pub shutdown_time_ns: Option<u64>,
}

/// Symmetric override of the latency (and UDP loss) between two hosts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkConfig {
    pub a: String,
    pub b: String,
    pub latency_ns: u64,
    /// Datagram loss in parts per million.  Stream traffic is never lost.
    #[serde(default)]
    pub loss_ppm: u32,
}

impl SimulationConfig {
    /// A config with defaults and no hosts.
    pub fn new(stop_time_ns: u64) -> Self {
        Self {
            seed: default_seed(),
            workers: default_workers(),
            stop_time_ns,
            default_latency_ns: default_latency_ns(),
            links: Vec::new(),
            unblocked_syscall_limit: 0,
            unblocked_syscall_latency_ns: default_unblocked_syscall_latency_ns(),
            native_syscalls: default_native_syscalls(),
            trace: false,
            hosts: Vec::new(),
        }
    }

    pub fn with_host(mut self, host: HostConfig) -> Self {
        self.hosts.push(host);
        self
    }

    pub fn with_link(mut self, a: &str, b: &str, latency_ns: u64) -> Self {
        self.links.push(LinkConfig {
            a: a.to_string(),
            b: b.to_string(),
            latency_ns,
            loss_ppm: 0,
        });
        self
    }

    /// Address of host `index`: configured, or derived from the index.
    pub fn host_addr(&self, index: usize) -> Ipv4Addr {
        self.hosts
            .get(index)
            .and_then(|h| h.ip)
            .unwrap_or_else(|| default_host_addr(index))
    }

    /// Check every invariant the core relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.hosts.is_empty() {
            return Err(ConfigError::NoHosts);
        }
        if self.workers == 0 {
            return Err(ConfigError::NoWorkers);
        }
        if self.stop_time_ns == 0 {
            return Err(ConfigError::ZeroStopTime);
        }
        if self.default_latency_ns == 0 {
            return Err(ConfigError::ZeroLatency {
                context: "default".to_string(),
            });
        }
        if self.unblocked_syscall_limit > 0 && self.unblocked_syscall_latency_ns == 0 {
            return Err(ConfigError::ZeroUnblockedLatency);
        }
        if let Some(&number) = self
            .native_syscalls
            .iter()
            .find(|&&n| n as usize >= SYSCALL_TABLE_SIZE)
        {
            return Err(ConfigError::SyscallNumber(number));
        }

        let mut names = BTreeSet::new();
        let mut addrs = BTreeSet::new();
        for (index, host) in self.hosts.iter().enumerate() {
            if !names.insert(host.name.as_str()) {
                return Err(ConfigError::DuplicateHost(host.name.clone()));
            }
            let addr = self.host_addr(index);
            if addr.is_loopback() || addr.is_unspecified() || addr.is_broadcast() {
                return Err(ConfigError::ReservedAddress {
                    host: host.name.clone(),
                    addr,
                });
            }
            if !addrs.insert(addr) {
                return Err(ConfigError::DuplicateAddress(addr));
            }
            for process in &host.processes {
                if let Some(shutdown) = process.shutdown_time_ns {
                    if shutdown <= process.start_time_ns {
                        return Err(ConfigError::ShutdownBeforeStart {
                            host: host.name.clone(),
                            program: process.program.clone(),
                        });
                    }
                }
            }
        }

        for link in &self.links {
            for end in [&link.a, &link.b] {
                if !names.contains(end.as_str()) {
                    return Err(ConfigError::UnknownLinkHost(end.clone()));
                }
            }
            if link.a == link.b {
                return Err(ConfigError::SelfLink(link.a.clone()));
            }
            if link.latency_ns == 0 {
                return Err(ConfigError::ZeroLatency {
                    context: format!("{} <-> {}", link.a, link.b),
                });
            }
            if link.loss_ppm > 1_000_000 {
                return Err(ConfigError::LossRate(link.loss_ppm));
            }
        }
        Ok(())
    }
}

impl HostConfig {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ip: None,
            bandwidth_bps: 0,
            processes: Vec::new(),
        }
    }

    pub fn with_ip(mut self, ip: Ipv4Addr) -> Self {
        self.ip = Some(ip);
        self
    }

    pub fn with_process(mut self, program: &str, args: &[&str], start_time_ns: u64) -> Self {
        self.processes.push(ProcessConfig {
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            start_time_ns,
            shutdown_time_ns: None,
        });
        self
    }
}

/// 11.x.y.z, numbered from 1.
pub fn default_host_addr(index: usize) -> Ipv4Addr {
    let n = index as u32 + 1;
    Ipv4Addr::new(11, (n >> 16) as u8, (n >> 8) as u8, n as u8)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_hosts() -> SimulationConfig {
        SimulationConfig::new(1_000)
            .with_host(HostConfig::new("a"))
            .with_host(HostConfig::new("b"))
    }

    #[test]
    fn minimal_json_gets_defaults() {
        let json = r#"{
            "stop_time_ns": 5000,
            "hosts": [{ "name": "server", "processes": [{ "program": "sleeper" }] }]
        }"#;
        let config: SimulationConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.seed, 1);
        assert_eq!(config.workers, 1);
        assert_eq!(config.default_latency_ns, 1_000_000);
        assert_eq!(config.native_syscalls, vec![nr::ARCH_PRCTL]);
        assert_eq!(config.hosts[0].processes[0].args, Vec::<String>::new());
        config.validate().unwrap();
    }

    #[test]
    fn addresses_are_assigned_by_index() {
        let config = two_hosts();
        assert_eq!(config.host_addr(0), Ipv4Addr::new(11, 0, 0, 1));
        assert_eq!(config.host_addr(1), Ipv4Addr::new(11, 0, 0, 2));
        assert_eq!(default_host_addr(255), Ipv4Addr::new(11, 0, 1, 0));
    }

    #[test]
    fn rejects_zero_latency_links() {
        let config = two_hosts().with_link("a", "b", 0);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ZeroLatency { .. })
        ));
    }

    #[test]
    fn rejects_duplicates_and_unknown_links() {
        let dup = two_hosts().with_host(HostConfig::new("a"));
        assert_eq!(dup.validate(), Err(ConfigError::DuplicateHost("a".into())));

        let clash = SimulationConfig::new(10)
            .with_host(HostConfig::new("a").with_ip(Ipv4Addr::new(11, 0, 0, 2)))
            .with_host(HostConfig::new("b"));
        assert!(matches!(
            clash.validate(),
            Err(ConfigError::DuplicateAddress(_))
        ));

        let unknown = two_hosts().with_link("a", "zzz", 5);
        assert_eq!(
            unknown.validate(),
            Err(ConfigError::UnknownLinkHost("zzz".into()))
        );
    }

    #[test]
    fn rejects_empty_and_degenerate_configs() {
        assert_eq!(SimulationConfig::new(10).validate(), Err(ConfigError::NoHosts));
        let mut config = two_hosts();
        config.workers = 0;
        assert_eq!(config.validate(), Err(ConfigError::NoWorkers));
        let mut config = two_hosts();
        config.native_syscalls.push(100_000);
        assert_eq!(config.validate(), Err(ConfigError::SyscallNumber(100_000)));
    }

    #[test]
    fn rejects_shutdown_before_start() {
        let mut host = HostConfig::new("a").with_process("sleeper", &[], 50);
        host.processes[0].shutdown_time_ns = Some(50);
        let config = SimulationConfig::new(100).with_host(host);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ShutdownBeforeStart { .. })
        ));
    }
}
