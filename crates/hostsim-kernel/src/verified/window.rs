//! Round window arithmetic for the worker barrier.

/// Bounds of one scheduling round, `[start, last]` in nanoseconds.
///
/// The upper bound is inclusive so that a round ending at `u64::MAX` is
/// representable.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RoundWindow {
    pub start: u64,
    pub last: u64,
}

/// Compute the next round from the earliest pending event.
///
/// Returns `None` when nothing is pending or the earliest event lies past
/// `stop_time`.  Otherwise the round covers `runahead` nanoseconds, clipped
/// so that no event after `stop_time` runs.
///
/// # Examples
///
/// ```
/// use hostsim_kernel::verified::window::{next_window, RoundWindow};
///
/// assert_eq!(
///     next_window(Some(100), 10, 1_000),
///     Some(RoundWindow { start: 100, last: 109 })
/// );
/// assert_eq!(next_window(Some(995), 10, 1_000), Some(RoundWindow { start: 995, last: 1_000 }));
/// assert_eq!(next_window(Some(1_001), 10, 1_000), None);
/// ```
pub fn next_window(earliest: Option<u64>, runahead: u64, stop_time: u64) -> Option<RoundWindow> {
    debug_assert!(runahead > 0);
    let start = earliest?;
    if start > stop_time {
        return None;
    }
    let last = start
        .saturating_add(runahead.max(1) - 1)
        .min(stop_time);

    debug_assert!(last >= start);
    debug_assert!(last <= stop_time);
    Some(RoundWindow { start, last })
}

/// Earliest of the per-worker minima.
pub fn earliest(times: &[Option<u64>]) -> Option<u64> {
    let result = times.iter().flatten().copied().min();

    debug_assert!(result.map_or(true, |m| times.iter().flatten().all(|&t| t >= m)));
    result
}
