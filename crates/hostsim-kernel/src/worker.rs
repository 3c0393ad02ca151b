//! Worker pool and round barrier.
//!
//! Hosts are split statically over a fixed set of OS threads: host `i` runs
//! on worker `i % workers`.  Time advances in rounds.  Each round every
//! worker executes its hosts' events inside the same window
//! `[start, end)` and then forwards the events its hosts produced for other
//! hosts to their inboxes.  The window is at most one runahead wide, so no
//! forwarded event can fall inside the round that produced it.
//!
//! Per round:
//!
//! 1. each worker drains its hosts' inboxes and reports its earliest event;
//! 2. barrier; the leader computes the next window (or stops);
//! 3. barrier; each worker executes the window and forwards its outboxes;
//! 4. barrier, so every forwarded event is in place before step 1.

use crate::error::SimError;
use crate::host::Host;
use crate::queue::EventInbox;
use crate::time::{SimulationTime, VirtualTime};
use crate::verified::window::{earliest, next_window, RoundWindow};
use log::{debug, error};
use std::sync::{Barrier, Mutex};

/// What the round loop did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RoundSummary {
    pub rounds: u64,
    /// Start of the last executed round.
    pub last_window_start: Option<VirtualTime>,
}

/// State every worker reads and the leader writes between barriers.
struct Shared {
    barrier: Barrier,
    inboxes: Vec<EventInbox>,
    earliest: Mutex<Vec<Option<u64>>>,
    window: Mutex<Option<RoundWindow>>,
    failure: Mutex<Option<SimError>>,
    summary: Mutex<RoundSummary>,
}

impl Shared {
    fn fail(&self, err: SimError) {
        error!("simulation aborted: {err}");
        let mut failure = self.failure.lock().unwrap_or_else(|e| e.into_inner());
        failure.get_or_insert(err);
    }

    fn failed(&self) -> bool {
        self.failure
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }
}

/// Run rounds until every queue is empty or `stop_time` has passed.
///
/// Events at exactly `stop_time` still run.  The first fatal error on any
/// worker stops all of them at the next barrier and is returned.
pub fn run_rounds(
    hosts: &mut [Host],
    workers: usize,
    runahead: SimulationTime,
    stop_time: VirtualTime,
) -> Result<RoundSummary, SimError> {
    if hosts.is_empty() {
        return Ok(RoundSummary::default());
    }
    let workers = workers.clamp(1, hosts.len());
    let runahead = runahead.as_nanos().max(1);

    let shared = Shared {
        barrier: Barrier::new(workers),
        inboxes: hosts.iter().map(Host::inbox).collect(),
        earliest: Mutex::new(vec![None; workers]),
        window: Mutex::new(None),
        failure: Mutex::new(None),
        summary: Mutex::new(RoundSummary::default()),
    };

    let mut partitions: Vec<Vec<&mut Host>> = (0..workers).map(|_| Vec::new()).collect();
    for (index, host) in hosts.iter_mut().enumerate() {
        partitions[index % workers].push(host);
    }

    std::thread::scope(|s| {
        for (worker, partition) in partitions.into_iter().enumerate() {
            let shared = &shared;
            s.spawn(move || worker_loop(worker, partition, shared, runahead, stop_time));
        }
    });

    if let Some(err) = shared.failure.into_inner().unwrap_or_else(|e| e.into_inner()) {
        return Err(err);
    }
    Ok(shared.summary.into_inner().unwrap_or_else(|e| e.into_inner()))
}

fn worker_loop(
    worker: usize,
    mut hosts: Vec<&mut Host>,
    shared: &Shared,
    runahead: u64,
    stop_time: VirtualTime,
) {
    loop {
        // 1. Drain and report.
        let mut mine = None;
        for host in hosts.iter_mut() {
            if let Err(err) = host.drain_inbox() {
                shared.fail(err);
            }
            let next = host.next_event_time().map(VirtualTime::as_nanos);
            mine = earliest(&[mine, next]);
        }
        shared.earliest.lock().unwrap_or_else(|e| e.into_inner())[worker] = mine;

        // 2. Leader picks the window.
        if shared.barrier.wait().is_leader() {
            let times = shared.earliest.lock().unwrap_or_else(|e| e.into_inner()).clone();
            let window = if shared.failed() {
                None
            } else {
                next_window(earliest(&times), runahead, stop_time.as_nanos())
            };
            if let Some(w) = window {
                let mut summary = shared.summary.lock().unwrap_or_else(|e| e.into_inner());
                summary.rounds += 1;
                summary.last_window_start = Some(VirtualTime::from_nanos(w.start));
                debug!("round {}: [{}, {}]", summary.rounds, w.start, w.last);
            }
            *shared.window.lock().unwrap_or_else(|e| e.into_inner()) = window;
        }
        shared.barrier.wait();

        // 3. Execute and forward.
        let Some(window) = *shared.window.lock().unwrap_or_else(|e| e.into_inner()) else {
            break;
        };
        let last = VirtualTime::from_nanos(window.last);
        for host in hosts.iter_mut() {
            if let Err(err) = execute_host(host, last, &shared.inboxes) {
                shared.fail(err);
                break;
            }
        }

        // 4. Forwarded events are visible to every owner after this.
        shared.barrier.wait();
    }
}

fn execute_host(host: &mut Host, last: VirtualTime, inboxes: &[EventInbox]) -> Result<(), SimError> {
    host.execute(last)?;
    for event in host.take_outbox() {
        if event.time() <= last {
            return Err(SimError::invariant(format!(
                "{} sent an event for {} inside the current round ({} <= {last})",
                host.name(),
                event.host,
                event.time()
            )));
        }
        let inbox = inboxes
            .get(event.host.as_u32() as usize)
            .ok_or_else(|| SimError::invariant(format!("event for unknown {}", event.host)))?;
        inbox.push(event);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{HostConfig, SimulationConfig};
    use crate::guest::ProgramRegistry;
    use crate::host::{KernelShared, Launch};
    use crate::id::HostId;
    use std::sync::Arc;

    fn hosts(launches: &[&[(&str, &[&str], u64)]]) -> Vec<Host> {
        let mut config = SimulationConfig::new(1_000_000_000);
        for i in 0..launches.len() {
            config = config.with_host(HostConfig::new(&format!("h{i}")));
        }
        let shared = Arc::new(KernelShared::new(&config, ProgramRegistry::builtin()));
        launches
            .iter()
            .enumerate()
            .map(|(i, list)| {
                let launches = list
                    .iter()
                    .map(|(program, args, start)| Launch {
                        program: program.to_string(),
                        args: args.iter().map(|a| a.to_string()).collect(),
                        start: VirtualTime::from_nanos(*start),
                        shutdown: None,
                        pid: None,
                    })
                    .collect();
                Host::new(HostId(i as u32), format!("h{i}"), 0, Arc::clone(&shared), launches)
                    .unwrap()
            })
            .collect()
    }

    fn exited(host: &Host) -> usize {
        host.processes().filter(|p| !p.is_alive()).count()
    }

    #[test]
    fn nothing_to_do() {
        let summary = run_rounds(&mut [], 4, SimulationTime::from_millis(1), VirtualTime::MAX);
        assert_eq!(summary.unwrap(), RoundSummary::default());

        let mut idle = hosts(&[&[], &[]]);
        let summary =
            run_rounds(&mut idle, 2, SimulationTime::from_millis(1), VirtualTime::MAX).unwrap();
        assert_eq!(summary.rounds, 0);
    }

    #[test]
    fn rounds_skip_idle_time() {
        let mut hs = hosts(&[&[("sleeper", &["5000000"], 0)], &[("sleeper", &["1000"], 0)]]);
        let summary = run_rounds(
            &mut hs,
            2,
            SimulationTime::from_millis(1),
            VirtualTime::from_nanos(1_000_000_000),
        )
        .unwrap();
        // Start at 0, wake-ups at 1 us and 5 ms: the empty millisecond
        // windows in between are never visited.
        assert_eq!(summary.rounds, 2);
        assert_eq!(summary.last_window_start, Some(VirtualTime::from_nanos(5_000_000)));
        assert_eq!(exited(&hs[0]), 1);
        assert_eq!(exited(&hs[1]), 1);
    }

    #[test]
    fn stop_time_cuts_the_run_short() {
        let mut hs = hosts(&[&[("sleeper", &["10000"], 0)]]);
        run_rounds(
            &mut hs,
            1,
            SimulationTime::from_nanos(1_000),
            VirtualTime::from_nanos(5_000),
        )
        .unwrap();
        assert_eq!(exited(&hs[0]), 0);
        assert_eq!(hs[0].next_event_time(), Some(VirtualTime::from_nanos(10_000)));
    }

    #[test]
    fn events_at_the_end_of_time_run_and_terminate() {
        // The sleep deadline saturates at u64::MAX, which is also the stop time.
        let mut hs = hosts(&[&[("sleeper", &["18446744073709551615"], 1)]]);
        let summary = run_rounds(
            &mut hs,
            1,
            SimulationTime::from_millis(1),
            VirtualTime::MAX,
        )
        .unwrap();
        assert_eq!(summary.rounds, 2);
        assert_eq!(summary.last_window_start, Some(VirtualTime::MAX));
        assert_eq!(exited(&hs[0]), 1);
        assert_eq!(hs[0].next_event_time(), None);
    }

    #[test]
    fn first_failure_stops_every_worker() {
        let mut hs = hosts(&[
            &[("sleeper", &["1000000"], 0)],
            &[("missing", &[], 500)],
            &[("sleeper", &["1000000"], 0)],
        ]);
        let result = run_rounds(
            &mut hs,
            3,
            SimulationTime::from_nanos(100),
            VirtualTime::from_nanos(1_000_000_000),
        );
        assert!(matches!(result, Err(SimError::UnknownProgram(name)) if name == "missing"));
        assert_eq!(exited(&hs[0]), 0);
    }
}
