//! Transmission timing for the simulated network interface.

/// Nanoseconds needed to serialize `bytes` onto a link of `bandwidth_bps`.
///
/// A bandwidth of zero means unlimited.  The result is rounded up so that a
/// non-empty packet on a finite link always takes at least 1 ns.
///
/// # Examples
///
/// ```
/// use hostsim_kernel::verified::net::transmit_delay_ns;
///
/// assert_eq!(transmit_delay_ns(125, 1_000_000_000), 1_000); // 1000 bits at 1 Gbit/s
/// assert_eq!(transmit_delay_ns(1500, 0), 0);
/// ```
pub fn transmit_delay_ns(bytes: u64, bandwidth_bps: u64) -> u64 {
    if bandwidth_bps == 0 || bytes == 0 {
        return 0;
    }
    let bits = bytes as u128 * 8;
    let ns = (bits * 1_000_000_000).div_ceil(bandwidth_bps as u128);
    let result = ns.min(u64::MAX as u128) as u64;

    debug_assert!(result > 0);
    result
}

/// When a packet finishes leaving the interface.
///
/// Packets are serialized back to back: transmission starts at the later of
/// `now` and the end of the previous transmission.
pub fn departure_time(now: u64, busy_until: u64, delay: u64) -> u64 {
    let start = now.max(busy_until);
    let result = start.saturating_add(delay);

    debug_assert!(result >= now);
    debug_assert!(result >= busy_until);
    result
}

/// Whether a packet is dropped, given a uniform draw in `[0, 1_000_000)`.
pub fn is_dropped(loss_ppm: u32, draw: u32) -> bool {
    debug_assert!(draw < 1_000_000);
    draw < loss_ppm
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unlimited_bandwidth_has_no_delay() {
        assert_eq!(transmit_delay_ns(1_000_000, 0), 0);
    }

    #[test]
    fn delay_rounds_up() {
        // 1 byte at 3 bit/s = 8/3 s.
        assert_eq!(transmit_delay_ns(1, 3), 2_666_666_667);
    }

    #[test]
    fn departure_queues_behind_previous_packet() {
        assert_eq!(departure_time(10, 0, 5), 15);
        assert_eq!(departure_time(10, 40, 5), 45);
    }

    #[test]
    fn loss_bounds() {
        assert!(!is_dropped(0, 0));
        assert!(is_dropped(1_000_000, 999_999));
        assert!(is_dropped(10, 9));
        assert!(!is_dropped(10, 10));
    }
}
