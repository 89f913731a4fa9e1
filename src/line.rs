//! Digital line capability, implemented once per board.
//!
//! The protocol core never knows what a line physically is - a Raspberry Pi
//! GPIO, an RP2040 pin, or a simulated wire in a test.  It only needs the four
//! operations of the [`Line`] trait.
//!
//! Most lines in this protocol are active-low (handshakes, chip selects), some
//! are active-high (the target's interrupt line).  [`Signal`] wraps a [`Line`]
//! with its [`Polarity`] so that callers `assert()` and `deassert()` a signal
//! rather than remembering which level means what.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

use crate::{Error, Result};

/// Line direction, from the host's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Input,
    Output,
}

/// Electrical level of a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Low,
    High,
}

impl Level {
    /// Level representing a single data bit.
    pub const fn from_bit(bit: bool) -> Self {
        if bit { Level::High } else { Level::Low }
    }

    pub const fn is_high(self) -> bool {
        matches!(self, Level::High)
    }
}

/// Which level means "active" for a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Polarity {
    ActiveHigh,
    ActiveLow,
}

impl Polarity {
    pub const fn active(self) -> Level {
        match self {
            Polarity::ActiveHigh => Level::High,
            Polarity::ActiveLow => Level::Low,
        }
    }

    pub const fn inactive(self) -> Level {
        match self {
            Polarity::ActiveHigh => Level::Low,
            Polarity::ActiveLow => Level::High,
        }
    }

    /// The edge seen when a signal of this polarity becomes active.
    pub const fn activating_edge(self) -> Edge {
        match self {
            Polarity::ActiveHigh => Edge::Rising,
            Polarity::ActiveLow => Edge::Falling,
        }
    }
}

/// Edge kind for edge detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    Rising,
    Falling,
    Both,
}

/// Capability interface for a single digital line.
///
/// Edge detection is latched: after [`Line::on_edge()`] the implementation
/// must record every matching edge, however short the pulse, until it is
/// collected with [`Line::edge_detected()`].  Strobe pulses from the target's
/// PIA can be well under a microsecond, so polling [`Line::get()`] is not a
/// substitute.  On Linux this maps naturally onto GPIO character device
/// events, on microcontrollers onto a pin interrupt or PIO state machine
/// setting a flag.
pub trait Line {
    /// The error type returned by line operations.
    type Error: core::fmt::Debug;

    /// Set the line's direction.
    fn configure(&mut self, direction: Direction) -> core::result::Result<(), Self::Error>;

    /// Drive the line, if configured as an output.
    fn set(&mut self, level: Level) -> core::result::Result<(), Self::Error>;

    /// Sample the line's current level.
    fn get(&mut self) -> core::result::Result<Level, Self::Error>;

    /// Subscribe to edges of the given kind.  Replaces any previous
    /// subscription and clears the latch.
    fn on_edge(&mut self, edge: Edge) -> core::result::Result<(), Self::Error>;

    /// Returns whether a subscribed edge has occurred since the last call,
    /// clearing the latch.
    fn edge_detected(&mut self) -> core::result::Result<bool, Self::Error>;
}

// Maps board errors onto the crate error, logging the original.
pub(crate) fn line_err<E: core::fmt::Debug>(e: E) -> Error {
    log::error!("Line error: {e:?}");
    Error::Line
}

/// A [`Line`] with a known polarity and role.
pub struct Signal<L: Line> {
    line: L,
    polarity: Polarity,
}

impl<L: Line> Signal<L> {
    pub fn new(line: L, polarity: Polarity) -> Self {
        Self { line, polarity }
    }

    /// Active-low signal - handshakes and chip selects.
    pub fn active_low(line: L) -> Self {
        Self::new(line, Polarity::ActiveLow)
    }

    /// Active-high signal - e.g. the target's NMI.
    pub fn active_high(line: L) -> Self {
        Self::new(line, Polarity::ActiveHigh)
    }

    pub fn polarity(&self) -> Polarity {
        self.polarity
    }

    /// Configure as an output, starting inactive.
    ///
    /// The level is written before the direction changes so that the line
    /// never glitches active while being set up.
    pub fn init_output(&mut self) -> Result<()> {
        self.line.set(self.polarity.inactive()).map_err(line_err)?;
        self.line.configure(Direction::Output).map_err(line_err)
    }

    /// Configure as an input.
    pub fn init_input(&mut self) -> Result<()> {
        self.line.configure(Direction::Input).map_err(line_err)
    }

    pub fn assert(&mut self) -> Result<()> {
        self.line.set(self.polarity.active()).map_err(line_err)
    }

    pub fn deassert(&mut self) -> Result<()> {
        self.line.set(self.polarity.inactive()).map_err(line_err)
    }

    pub fn is_active(&mut self) -> Result<bool> {
        Ok(self.line.get().map_err(line_err)? == self.polarity.active())
    }

    /// Subscribe to this signal becoming active.
    pub fn listen(&mut self) -> Result<()> {
        self.line
            .on_edge(self.polarity.activating_edge())
            .map_err(line_err)
    }

    /// Whether the signal has become active since the last call.
    pub fn activated(&mut self) -> Result<bool> {
        self.line.edge_detected().map_err(line_err)
    }
}
