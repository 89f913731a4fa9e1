//! Timing capabilities.
//!
//! Every pause in the protocol is expressed as a [`Duration`] with a named
//! minimum, never as a count of loop iterations, so timing intent survives a
//! change of host CPU.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

use core::time::Duration;

/// Blocking delay.
///
/// Implementations may sleep or spin, but must not return before `duration`
/// has elapsed.  Sub-millisecond accuracy matters for the handshake settle
/// times, so a scheduler sleep with coarse granularity is only acceptable if
/// it errs on the long side.
pub trait Delay {
    fn delay(&mut self, duration: Duration);
}

/// Monotonic clock.
///
/// `now()` returns the time since an arbitrary, fixed epoch.
pub trait Clock {
    fn now(&self) -> Duration;
}
