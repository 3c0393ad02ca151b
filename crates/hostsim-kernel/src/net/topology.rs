//! Static network topology shared read-only by all workers.

use crate::config::SimulationConfig;
use crate::id::HostId;
use crate::time::SimulationTime;
use std::collections::BTreeMap;

/// Latency of packets a host sends to itself.
pub const LOOPBACK_LATENCY: SimulationTime = SimulationTime::NANOSECOND;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct LinkProperties {
    latency: SimulationTime,
    loss_ppm: u32,
}

/// Host addresses and pairwise link properties.
#[derive(Clone, Debug)]
pub struct Topology {
    names: Vec<String>,
    addrs: Vec<[u8; 4]>,
    by_addr: BTreeMap<[u8; 4], HostId>,
    default_latency: SimulationTime,
    /// Keyed by (lower id, higher id).
    links: BTreeMap<(HostId, HostId), LinkProperties>,
}

fn ordered(a: HostId, b: HostId) -> (HostId, HostId) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

impl Topology {
    /// Build from a validated config.
    pub fn from_config(config: &SimulationConfig) -> Self {
        let names: Vec<String> = config.hosts.iter().map(|h| h.name.clone()).collect();
        let addrs: Vec<[u8; 4]> = (0..config.hosts.len())
            .map(|i| config.host_addr(i).octets())
            .collect();
        let by_addr = addrs
            .iter()
            .enumerate()
            .map(|(i, &addr)| (addr, HostId(i as u32)))
            .collect();
        let index: BTreeMap<&str, HostId> = names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.as_str(), HostId(i as u32)))
            .collect();
        let mut links = BTreeMap::new();
        for link in &config.links {
            if let (Some(&a), Some(&b)) = (index.get(link.a.as_str()), index.get(link.b.as_str())) {
                links.insert(
                    ordered(a, b),
                    LinkProperties {
                        latency: SimulationTime::from_nanos(link.latency_ns),
                        loss_ppm: link.loss_ppm,
                    },
                );
            }
        }
        Self {
            names,
            addrs,
            by_addr,
            default_latency: SimulationTime::from_nanos(config.default_latency_ns),
            links,
        }
    }

    pub fn host_count(&self) -> usize {
        self.names.len()
    }

    pub fn name(&self, host: HostId) -> &str {
        self.names.get(host.index()).map_or("?", String::as_str)
    }

    pub fn addr(&self, host: HostId) -> [u8; 4] {
        self.addrs.get(host.index()).copied().unwrap_or([0; 4])
    }

    pub fn host_by_addr(&self, addr: [u8; 4]) -> Option<HostId> {
        self.by_addr.get(&addr).copied()
    }

    /// One-way latency from `a` to `b`.
    pub fn latency(&self, a: HostId, b: HostId) -> SimulationTime {
        if a == b {
            return LOOPBACK_LATENCY;
        }
        self.links
            .get(&ordered(a, b))
            .map_or(self.default_latency, |link| link.latency)
    }

    /// Datagram loss from `a` to `b`, in parts per million.
    pub fn loss_ppm(&self, a: HostId, b: HostId) -> u32 {
        if a == b {
            return 0;
        }
        self.links.get(&ordered(a, b)).map_or(0, |link| link.loss_ppm)
    }

    /// Width of a scheduling round: the smallest inter-host latency.
    ///
    /// Any event one host causes on another lands at least this far in the
    /// future, so hosts can run a round of this width independently.
    pub fn runahead(&self) -> SimulationTime {
        let n = self.host_count();
        let explicit_pairs = self.links.len();
        let total_pairs = n * n.saturating_sub(1) / 2;
        let link_min = self.links.values().map(|link| link.latency).min();
        match link_min {
            Some(min) if explicit_pairs == total_pairs => min,
            Some(min) => min.min(self.default_latency),
            None => self.default_latency,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HostConfig;

    fn config() -> SimulationConfig {
        SimulationConfig::new(1_000)
            .with_host(HostConfig::new("a"))
            .with_host(HostConfig::new("b"))
            .with_host(HostConfig::new("c"))
    }

    #[test]
    fn default_latency_without_links() {
        let topo = Topology::from_config(&config());
        assert_eq!(topo.latency(HostId(0), HostId(2)), SimulationTime::from_millis(1));
        assert_eq!(topo.latency(HostId(1), HostId(1)), LOOPBACK_LATENCY);
        assert_eq!(topo.runahead(), SimulationTime::from_millis(1));
    }

    #[test]
    fn links_are_symmetric_and_lower_runahead() {
        let topo = Topology::from_config(&config().with_link("c", "a", 250));
        assert_eq!(topo.latency(HostId(0), HostId(2)), SimulationTime::from_nanos(250));
        assert_eq!(topo.latency(HostId(2), HostId(0)), SimulationTime::from_nanos(250));
        assert_eq!(topo.runahead(), SimulationTime::from_nanos(250));
    }

    #[test]
    fn runahead_ignores_default_when_every_pair_is_linked() {
        let mut cfg = SimulationConfig::new(1_000)
            .with_host(HostConfig::new("a"))
            .with_host(HostConfig::new("b"))
            .with_link("a", "b", 5_000_000);
        cfg.default_latency_ns = 1;
        let topo = Topology::from_config(&cfg);
        assert_eq!(topo.runahead(), SimulationTime::from_millis(5));
    }

    #[test]
    fn address_lookup() {
        let topo = Topology::from_config(&config());
        assert_eq!(topo.host_by_addr([11, 0, 0, 2]), Some(HostId(1)));
        assert_eq!(topo.host_by_addr([10, 0, 0, 2]), None);
        assert_eq!(topo.name(HostId(2)), "c");
        assert_eq!(topo.addr(HostId(0)), [11, 0, 0, 1]);
    }
}
