//! Host side of a byte-wide, dual-port PIA style link to an 8-bit target.
//!
//! This crate bootstraps and talks to an 8-bit processor (a 6809 in the
//! original hardware) whose only connection to the host is a handful of
//! digital lines emulating a classic dual-port peripheral interface chip,
//! such as a 6522 VIA:
//! - one byte-wide port for host to target transfer
//! - one byte-wide port for target to host transfer
//! - a ready/taken handshake pair for each port
//! - the target's reset and interrupt (NMI) lines
//!
//! The host can download an executable image to the target and have it
//! jump to a given address, and continuously drain and display what the
//! target sends back.  Alongside that it pulses the target's interrupt line as
//! a heartbeat, and polls low priority peripherals that share the data bus.
//!
//! `no_std`.  Requires `alloc`.
//!
//! ## Architecture
//!
//! Leaf first:
//! - [`line`] - the [`line::Line`] capability every board provides, and a
//!   polarity-aware [`line::Signal`] wrapper
//! - [`bus`] - the Bus Arbiter, granting exclusive use of the shared data bus
//!   via [`bus::BusToken`]s
//! - [`codec`] - bytes to line levels, words to bytes (big-endian)
//! - [`handshake`] - the Strobe Handshake Engine, [`handshake::Pia`], moving
//!   one byte at a time in either direction
//! - [`protocol`] - the download-and-execute frame, and the image layout
//! - [`inbound`] - non-blocking draining of the target's output
//! - [`heartbeat`] - periodic interrupt pulses to the target
//! - [`session`] - cooperative scheduling of all of the above, with
//!   cancellation
//!
//! ## Boot sequence
//!
//! When the target leaves reset it runs a minimal ROM loader.  This can
//! accept a download, but cannot acknowledge each byte in time, so the host
//! sends with [`handshake::SendStrategy::PulseTimed`] - a fixed settle delay
//! per byte.  The first download is therefore a second-stage loader which
//! does handshake properly.  Once it is running the host switches to
//! [`handshake::SendStrategy::Acknowledged`] with
//! [`handshake::Pia::enable_acknowledged()`] and downloads the application.
//! [`session::Session::bootstrap()`] does both.
//!
//! ## Getting Started
//!
//! 1. Implement [`line::Line`] for your board's GPIOs, [`time::Delay`] and
//!    [`time::Clock`].
//! 2. Build a [`bus::DataBus`] from the 8 data lines and chip selects, and
//!    [`handshake::Handshake`] pairs for each direction.
//! 3. Create a [`handshake::Pia`], a [`heartbeat::Heartbeat`], and a
//!    [`session::Session`] (or [`session::AsyncSession`]) with a
//!    [`sink::Sink`], such as [`sink::LogSink`].
//! 4. Call `init()`, `bootstrap()`, then `run()`, passing the last two a stop
//!    flag set by your Ctrl-C handler.
//!
//! ## Features
//!
//! Default features:
//! - `async` - Enable [`session::AsyncSession`] and [`sink::AsyncSink`].
//!
//! Compile with `--no-default-features` for the blocking session only.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

#![no_std]

extern crate alloc;

pub mod bus;
pub mod codec;
pub mod handshake;
pub mod heartbeat;
pub mod inbound;
pub mod line;
pub mod protocol;
pub mod session;
pub mod sink;
pub mod time;

#[cfg(test)]
mod sim;

use bus::BusOwner;

/// Link errors
///
/// Read-back mismatches are not errors - see
/// [`handshake::ReadbackMismatch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Bus claimed while already owned
    Contention(BusOwner),
    /// Bus released, or used, by other than its owner
    Ownership,
    /// Image length field disagrees with the payload
    Format { declared: u16, actual: usize },
    /// Image too short to hold a header
    Truncated,
    /// Payload too large for a frame
    PayloadTooLarge,
    /// Cancelled by the operator
    Interrupted,
    /// Invalid operation
    InvalidOperation,
    /// Line I/O error
    Line,
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::Contention(owner) => write!(f, "bus already owned by {owner:?}"),
            Error::Ownership => write!(f, "bus not owned by caller"),
            Error::Format { declared, actual } => {
                write!(f, "image declares {declared} bytes, has {actual}")
            }
            Error::Truncated => write!(f, "image truncated"),
            Error::PayloadTooLarge => write!(f, "payload too large"),
            Error::Interrupted => write!(f, "interrupted"),
            Error::InvalidOperation => write!(f, "invalid operation"),
            Error::Line => write!(f, "line I/O error"),
        }
    }
}

impl core::error::Error for Error {}

/// Type to represent the result of a link operation
pub type Result<T> = core::result::Result<T, Error>;
