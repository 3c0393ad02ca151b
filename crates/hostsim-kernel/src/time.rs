//! Virtual time.
//!
//! All simulated clocks derive from a single nanosecond counter that starts
//! at zero when the simulation starts.  [`VirtualTime`] is an instant on that
//! counter, [`SimulationTime`] a span between two instants.

use serde::{Deserialize, Serialize};
use std::fmt;

/// An instant of virtual time, in nanoseconds since simulation start.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct VirtualTime(u64);

/// A span of virtual time, in nanoseconds.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct SimulationTime(u64);

impl VirtualTime {
    pub const ZERO: VirtualTime = VirtualTime(0);
    pub const MAX: VirtualTime = VirtualTime(u64::MAX);

    pub const fn from_nanos(ns: u64) -> Self {
        VirtualTime(ns)
    }

    pub const fn as_nanos(self) -> u64 {
        self.0
    }

    /// `self + span`, clamped at [`VirtualTime::MAX`].
    pub const fn saturating_add(self, span: SimulationTime) -> Self {
        VirtualTime(self.0.saturating_add(span.0))
    }

    pub fn checked_add(self, span: SimulationTime) -> Option<Self> {
        self.0.checked_add(span.0).map(VirtualTime)
    }

    /// Span from `earlier` to `self`, zero if `earlier` is later.
    pub const fn saturating_since(self, earlier: VirtualTime) -> SimulationTime {
        SimulationTime(self.0.saturating_sub(earlier.0))
    }
}

impl SimulationTime {
    pub const ZERO: SimulationTime = SimulationTime(0);
    pub const NANOSECOND: SimulationTime = SimulationTime(1);

    pub const fn from_nanos(ns: u64) -> Self {
        SimulationTime(ns)
    }

    pub const fn from_micros(us: u64) -> Self {
        SimulationTime(us.saturating_mul(1_000))
    }

    pub const fn from_millis(ms: u64) -> Self {
        SimulationTime(ms.saturating_mul(1_000_000))
    }

    pub const fn from_secs(s: u64) -> Self {
        SimulationTime(s.saturating_mul(1_000_000_000))
    }

    pub const fn as_nanos(self) -> u64 {
        self.0
    }

    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for VirtualTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ns", self.0)
    }
}

impl fmt::Display for SimulationTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ns", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn saturating_arithmetic() {
        let t = VirtualTime::from_nanos(u64::MAX - 1);
        assert_eq!(t.saturating_add(SimulationTime::from_nanos(5)), VirtualTime::MAX);
        assert!(t.checked_add(SimulationTime::from_nanos(5)).is_none());
        assert_eq!(
            VirtualTime::from_nanos(3).saturating_since(VirtualTime::from_nanos(10)),
            SimulationTime::ZERO
        );
    }

    #[test]
    fn unit_constructors() {
        assert_eq!(SimulationTime::from_micros(2).as_nanos(), 2_000);
        assert_eq!(SimulationTime::from_millis(2).as_nanos(), 2_000_000);
        assert_eq!(SimulationTime::from_secs(2).as_nanos(), 2_000_000_000);
    }

    #[test]
    fn display_in_nanoseconds() {
        assert_eq!(VirtualTime::from_nanos(42).to_string(), "42ns");
    }
}
