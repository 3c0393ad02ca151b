//! Upstream network interface of a host.

use crate::time::VirtualTime;
use crate::verified::net::{departure_time, transmit_delay_ns};

/// Serializes outgoing packets at the host's upstream bandwidth.
#[derive(Clone, Debug)]
pub struct NetworkInterface {
    bandwidth_bps: u64,
    busy_until: VirtualTime,
    packets_sent: u64,
    bytes_sent: u64,
}

impl NetworkInterface {
    /// `bandwidth_bps == 0` means unlimited.
    pub fn new(bandwidth_bps: u64) -> Self {
        Self {
            bandwidth_bps,
            busy_until: VirtualTime::ZERO,
            packets_sent: 0,
            bytes_sent: 0,
        }
    }

    /// Queue `bytes` for transmission at `now`; returns when the last bit
    /// leaves the interface.
    pub fn transmit(&mut self, now: VirtualTime, bytes: usize) -> VirtualTime {
        let delay = transmit_delay_ns(bytes as u64, self.bandwidth_bps);
        let departure = departure_time(now.as_nanos(), self.busy_until.as_nanos(), delay);
        self.busy_until = VirtualTime::from_nanos(departure);
        self.packets_sent += 1;
        self.bytes_sent += bytes as u64;
        self.busy_until
    }

    pub fn packets_sent(&self) -> u64 {
        self.packets_sent
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unlimited_interface_departs_immediately() {
        let mut nic = NetworkInterface::new(0);
        let now = VirtualTime::from_nanos(7);
        assert_eq!(nic.transmit(now, 1500), now);
        assert_eq!(nic.transmit(now, 1500), now);
        assert_eq!(nic.packets_sent(), 2);
    }

    #[test]
    fn back_to_back_packets_queue() {
        // 8 Mbit/s: 1000 bytes take 1 ms.
        let mut nic = NetworkInterface::new(8_000_000);
        let t0 = VirtualTime::ZERO;
        assert_eq!(nic.transmit(t0, 1000), VirtualTime::from_nanos(1_000_000));
        assert_eq!(nic.transmit(t0, 1000), VirtualTime::from_nanos(2_000_000));
        // After the link drains, transmission starts at `now`.
        let later = VirtualTime::from_nanos(10_000_000);
        assert_eq!(nic.transmit(later, 1000), VirtualTime::from_nanos(11_000_000));
        assert_eq!(nic.bytes_sent(), 3000);
    }
}
