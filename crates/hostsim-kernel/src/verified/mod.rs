//! Pure functions with stated pre- and postconditions.
//!
//! Each function here is a side-effect-free piece of a kernel decision
//! (which clone flags are acceptable, when a packet leaves the interface,
//! how wide a scheduling round is).  Keeping them pure lets them be checked
//! exhaustively in isolation; the stateful code calls into them.
//!
//! Assertions follow Tiger Style: both the positive and the negative space
//! is checked with `debug_assert!`.

pub mod clone;
pub mod net;
pub mod window;
