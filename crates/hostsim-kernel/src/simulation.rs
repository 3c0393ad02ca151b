//! One simulation run, from config to report.
//!
//! A [`Simulation`] owns every host.  [`Simulation::run`] hands them to the
//! worker pool until the queues drain or the stop time passes, then shuts
//! the hosts down and summarizes what happened in a [`SimulationReport`].

use crate::config::SimulationConfig;
use crate::error::SimError;
use crate::event::EventTag;
use crate::guest::ProgramRegistry;
use crate::host::{Host, KernelShared, Launch};
use crate::id::{HostId, ProcessId};
use crate::process::ExitStatus;
use crate::time::VirtualTime;
use crate::trace::{self, TraceRecord};
use crate::worker;
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Outcome of one process.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessReport {
    pub host: String,
    pub pid: ProcessId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ppid: Option<ProcessId>,
    pub program: String,
    /// Shell-style exit code; `None` if the process was still running.
    pub exit_code: Option<i32>,
    pub signaled: bool,
    pub started_at: VirtualTime,
    pub exited_at: Option<VirtualTime>,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessReport {
    pub fn is_running(&self) -> bool {
        self.exit_code.is_none()
    }
}

/// Per-host counters.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostReport {
    pub name: String,
    pub addr: std::net::Ipv4Addr,
    pub final_time: VirtualTime,
    pub syscalls: u64,
    pub syscall_errors: u64,
    pub blocked: u64,
    pub packets_sent: u64,
    pub packets_dropped: u64,
}

/// Everything a run produced.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationReport {
    pub seed: u64,
    pub workers: usize,
    pub rounds: u64,
    /// Latest virtual time any host reached.
    pub end_time: VirtualTime,
    pub events: BTreeMap<EventTag, u64>,
    pub hosts: Vec<HostReport>,
    pub processes: Vec<ProcessReport>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub trace: Vec<TraceRecord>,
}

impl SimulationReport {
    /// Processes launched on `host` running `program`, in pid order.
    /// Processes named `program` on `host`.  The items borrow only the
    /// report, not the filter strings.
    pub fn processes_of<'a, 'b>(
        &'a self,
        host: &'b str,
        program: &'b str,
    ) -> impl Iterator<Item = &'a ProcessReport> + 'b
    where
        'a: 'b,
    {
        self.processes
            .iter()
            .filter(move |p| p.host == host && p.program == program)
    }

    pub fn total_events(&self) -> u64 {
        self.events.values().sum()
    }
}

pub struct Simulation {
    config: SimulationConfig,
    shared: Arc<KernelShared>,
    hosts: Vec<Host>,
}

impl Simulation {
    /// Validate `config` and build every host with its launches scheduled.
    pub fn new(config: SimulationConfig, programs: ProgramRegistry) -> Result<Self, SimError> {
        config.validate()?;
        for host in &config.hosts {
            for process in &host.processes {
                if !programs.contains(&process.program) {
                    return Err(SimError::UnknownProgram(process.program.clone()));
                }
            }
        }

        let shared = Arc::new(KernelShared::new(&config, programs));
        let mut hosts = Vec::with_capacity(config.hosts.len());
        for (index, host) in config.hosts.iter().enumerate() {
            let launches = host
                .processes
                .iter()
                .map(|p| Launch {
                    program: p.program.clone(),
                    args: p.args.clone(),
                    start: VirtualTime::from_nanos(p.start_time_ns),
                    shutdown: p.shutdown_time_ns.map(VirtualTime::from_nanos),
                    pid: None,
                })
                .collect();
            hosts.push(Host::new(
                HostId(index as u32),
                host.name.clone(),
                host.bandwidth_bps,
                Arc::clone(&shared),
                launches,
            )?);
        }
        Ok(Self {
            config,
            shared,
            hosts,
        })
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn hosts(&self) -> &[Host] {
        &self.hosts
    }

    /// Run to completion.
    pub fn run(mut self) -> Result<SimulationReport, SimError> {
        let stop = VirtualTime::from_nanos(self.config.stop_time_ns);
        let runahead = self.shared.topology.runahead();
        info!(
            "starting simulation: {} hosts, {} workers, seed {}, runahead {}, stop at {}",
            self.hosts.len(),
            self.config.workers,
            self.config.seed,
            runahead,
            stop
        );

        let summary = worker::run_rounds(&mut self.hosts, self.config.workers, runahead, stop)?;
        for host in &mut self.hosts {
            host.shutdown();
        }
        let report = self.report(summary.rounds);
        info!(
            "simulation finished at {} after {} rounds and {} events",
            report.end_time,
            report.rounds,
            report.total_events()
        );
        Ok(report)
    }

    fn report(&mut self, rounds: u64) -> SimulationReport {
        let mut events = BTreeMap::new();
        let mut hosts = Vec::with_capacity(self.hosts.len());
        let mut processes = Vec::new();
        let mut traces = Vec::with_capacity(self.hosts.len());

        for host in &mut self.hosts {
            let stats = host.stats();
            for (&tag, &count) in &stats.events {
                *events.entry(tag).or_insert(0) += count;
            }
            hosts.push(HostReport {
                name: host.name().to_string(),
                addr: host.addr().into(),
                final_time: host.now(),
                syscalls: stats.syscalls,
                syscall_errors: stats.syscall_errors,
                blocked: stats.blocked,
                packets_sent: stats.packets_sent,
                packets_dropped: stats.packets_dropped,
            });
            for process in host.processes() {
                let status = process.exit_status();
                processes.push(ProcessReport {
                    host: host.name().to_string(),
                    pid: process.pid,
                    ppid: process.ppid,
                    program: process.program.clone(),
                    exit_code: status.map(ExitStatus::return_code),
                    signaled: matches!(status, Some(ExitStatus::Signaled(_))),
                    started_at: process.started_at(),
                    exited_at: process.exited_at(),
                    stdout: String::from_utf8_lossy(process.stdout()).into_owned(),
                    stderr: String::from_utf8_lossy(process.stderr()).into_owned(),
                });
            }
            traces.push(host.take_trace());
        }

        let end_time = hosts
            .iter()
            .map(|h| h.final_time)
            .max()
            .unwrap_or(VirtualTime::ZERO);
        SimulationReport {
            seed: self.config.seed,
            workers: self.config.workers,
            rounds,
            end_time,
            events,
            hosts,
            processes,
            trace: trace::merge(traces),
        }
    }
}

/// Build and run `config` with the built-in programs.
pub fn run_builtin(config: SimulationConfig) -> Result<SimulationReport, SimError> {
    Simulation::new(config, ProgramRegistry::builtin())?.run()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{HostConfig, LinkConfig};

    const MS: u64 = 1_000_000;

    fn echo_config(workers: usize) -> SimulationConfig {
        let mut config = SimulationConfig::new(100 * MS)
            .with_host(HostConfig::new("server").with_process("udp_echo_server", &["8000", "3"], 0))
            .with_host(HostConfig::new("client").with_process(
                "udp_echo_client",
                &["11.0.0.1:8000", "hello", "3"],
                MS,
            ))
            .with_host(HostConfig::new("idle"));
        config.workers = workers;
        config.trace = true;
        config
    }

    fn only<'a>(report: &'a SimulationReport, host: &str, program: &str) -> &'a ProcessReport {
        let found: Vec<&ProcessReport> = report.processes_of(host, program).collect();
        assert_eq!(found.len(), 1, "expected one {program} on {host}");
        found[0]
    }

    #[test]
    fn udp_echo_round_trips() {
        let report = run_builtin(echo_config(1)).unwrap();
        let client = only(&report, "client", "udp_echo_client");
        assert_eq!(client.exit_code, Some(0), "stderr: {}", client.stderr);
        assert_eq!(client.stdout, "echo: hello\n".repeat(3));
        let server = only(&report, "server", "udp_echo_server");
        assert_eq!(server.exit_code, Some(0));
        // Three round trips of 1 ms each way, starting at 1 ms.
        assert_eq!(client.exited_at, Some(VirtualTime::from_nanos(7 * MS)));
    }

    #[test]
    fn identical_configs_produce_identical_reports() {
        let a = run_builtin(echo_config(1)).unwrap();
        let b = run_builtin(echo_config(1)).unwrap();
        assert!(!a.trace.is_empty());
        assert_eq!(a, b);
    }

    #[test]
    fn worker_count_does_not_change_the_outcome() {
        let one = run_builtin(echo_config(1)).unwrap();
        let three = run_builtin(echo_config(3)).unwrap();
        assert_eq!(one.trace, three.trace);
        assert_eq!(one.processes, three.processes);
        assert_eq!(one.events, three.events);
        assert_eq!(one.end_time, three.end_time);
    }

    #[test]
    fn tcp_echo_round_trips() {
        let config = SimulationConfig::new(100 * MS)
            .with_host(HostConfig::new("server").with_process("tcp_echo_server", &["9000"], 0))
            .with_host(HostConfig::new("client").with_process(
                "tcp_echo_client",
                &["11.0.0.1:9000", "over tcp"],
                MS,
            ));
        let report = run_builtin(config).unwrap();
        let client = only(&report, "client", "tcp_echo_client");
        assert_eq!(client.exit_code, Some(0), "stderr: {}", client.stderr);
        assert_eq!(client.stdout, "echo: over tcp\n");
        let server = only(&report, "server", "tcp_echo_server");
        assert_eq!(server.exit_code, Some(0), "stderr: {}", server.stderr);
    }

    #[test]
    fn tcp_connect_without_listener_is_refused() {
        let config = SimulationConfig::new(100 * MS)
            .with_host(HostConfig::new("server"))
            .with_host(HostConfig::new("client").with_process(
                "tcp_echo_client",
                &["11.0.0.1:9000", "x"],
                0,
            ));
        let report = run_builtin(config).unwrap();
        let client = only(&report, "client", "tcp_echo_client");
        assert_eq!(client.exit_code, Some(1));
        assert!(client.stderr.starts_with("connect: "), "{}", client.stderr);
    }

    #[test]
    fn sleeper_sees_exactly_its_sleep() {
        let config = SimulationConfig::new(100 * MS)
            .with_host(HostConfig::new("a").with_process("sleeper", &["5000"], 42));
        let report = run_builtin(config).unwrap();
        let sleeper = only(&report, "a", "sleeper");
        assert_eq!(sleeper.stdout, "slept 5000 ns\n");
        assert_eq!(sleeper.exited_at, Some(VirtualTime::from_nanos(5042)));
    }

    #[test]
    fn processes_running_at_stop_time_have_no_exit_code() {
        let config = SimulationConfig::new(MS)
            .with_host(HostConfig::new("a").with_process("sleeper", &["10000000"], 0));
        let report = run_builtin(config).unwrap();
        let sleeper = only(&report, "a", "sleeper");
        assert!(sleeper.is_running());
        assert_eq!(sleeper.exited_at, None);
        assert_eq!(report.end_time, VirtualTime::ZERO);
    }

    #[test]
    fn spawner_joins_its_threads() {
        let config = SimulationConfig::new(MS)
            .with_host(HostConfig::new("a").with_process("spawner", &["3"], 0));
        let report = run_builtin(config).unwrap();
        let spawner = only(&report, "a", "spawner");
        assert_eq!(spawner.exit_code, Some(0), "stderr: {}", spawner.stderr);
        assert!(spawner.stdout.ends_with("joined 3 threads\n"));
        for index in 0..3 {
            assert!(spawner.stdout.contains(&format!("thread {index} is ")));
        }
    }

    #[test]
    fn forker_reaps_its_child() {
        let config = SimulationConfig::new(MS)
            .with_host(HostConfig::new("a").with_process("forker", &["7"], 0));
        let report = run_builtin(config).unwrap();
        let procs: Vec<&ProcessReport> = report.processes_of("a", "forker").collect();
        assert_eq!(procs.len(), 2);
        let (parent, child) = (procs[0], procs[1]);
        assert_eq!(child.ppid, Some(parent.pid));
        assert_eq!(child.exit_code, Some(7));
        assert_eq!(parent.exit_code, Some(0));
        assert_eq!(
            parent.stdout,
            format!("child {} exited with 7\n", child.pid.as_u32())
        );
    }

    #[test]
    fn shutdown_time_kills_with_sigkill() {
        let mut host = HostConfig::new("server").with_process("udp_echo_server", &[], 0);
        host.processes[0].shutdown_time_ns = Some(3 * MS);
        let config = SimulationConfig::new(10 * MS).with_host(host);
        let report = run_builtin(config).unwrap();
        let server = only(&report, "server", "udp_echo_server");
        assert_eq!(server.exit_code, Some(137));
        assert!(server.signaled);
        assert_eq!(server.exited_at, Some(VirtualTime::from_nanos(3 * MS)));
    }

    #[test]
    fn lossy_link_times_out_the_client() {
        let mut config = SimulationConfig::new(100 * MS)
            .with_host(HostConfig::new("server").with_process("udp_echo_server", &[], 0))
            .with_host(HostConfig::new("client").with_process(
                "udp_echo_client",
                &["11.0.0.1:8000", "lost", "2", "5000000"],
                0,
            ));
        config.links.push(LinkConfig {
            a: "server".to_string(),
            b: "client".to_string(),
            latency_ns: MS,
            loss_ppm: 1_000_000,
        });
        let report = run_builtin(config).unwrap();
        let client = only(&report, "client", "udp_echo_client");
        assert_eq!(client.stdout, "timeout\ntimeout\n");
        assert_eq!(client.exited_at, Some(VirtualTime::from_nanos(10 * MS)));
        assert!(only(&report, "server", "udp_echo_server").is_running());
        assert_eq!(report.hosts[1].packets_dropped, 2);
    }

    #[test]
    fn unknown_programs_are_rejected_up_front() {
        let config = SimulationConfig::new(MS)
            .with_host(HostConfig::new("a").with_process("does_not_exist", &[], 0));
        assert!(matches!(
            Simulation::new(config, ProgramRegistry::builtin()),
            Err(SimError::UnknownProgram(name)) if name == "does_not_exist"
        ));
    }

    #[test]
    fn sample_config_runs_to_completion() {
        let config: SimulationConfig =
            serde_json::from_str(include_str!("../../../configs/echo.json")).unwrap();
        let report = run_builtin(config).unwrap();
        assert_eq!(
            only(&report, "client", "tcp_echo_client").stdout,
            "echo: hello over tcp\n"
        );
        assert_eq!(
            only(&report, "client", "udp_echo_client").stdout,
            "echo: hello\n".repeat(5)
        );
        let lossy = only(&report, "lossy", "udp_echo_client");
        assert_eq!(lossy.exit_code, Some(0));
        assert_eq!(lossy.stdout.lines().count(), 10);
        assert_eq!(only(&report, "server", "udp_echo_server").exit_code, Some(137));
        assert_eq!(only(&report, "worker", "sleeper").stdout, "slept 250000000 ns\n");
    }

    #[test]
    fn report_serializes_to_json() {
        let report = run_builtin(echo_config(2)).unwrap();
        let json = serde_json::to_string(&report).unwrap();
        let back: SimulationReport = serde_json::from_str(&json).unwrap();
        assert_eq!(back, report);
        assert!(json.contains("\"packet_arrival\""));
    }
}
