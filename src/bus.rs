//! Bus Arbiter for the shared 8-bit data bus.
//!
//! The host's data lines are shared between several buffers, each enabled by
//! its own active-low chip select: the host-to-target port, the
//! target-to-host port, and any auxiliary peripherals (e.g. quadrature
//! counters).  At most one of them may be enabled at a time.
//!
//! [`DataBus::claim()`] hands out a [`BusToken`], which must be presented to
//! read or write the bus and finally surrendered to [`DataBus::release()`].
//! Tokens are neither `Clone` nor `Copy`, so ownership is tracked by the type
//! system as well as at runtime.
//!
//! Changing the direction of the data lines can glitch the bus, so the
//! arbiter remembers the current direction and only reconfigures the lines
//! when a claim actually needs the other direction.  Releasing always returns
//! the lines to [`Direction::Input`], which is the safe idle state.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

use alloc::vec::Vec;
#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::codec::{self, BitOrder, ByteLevels};
use crate::line::{Direction, Level, Line, Signal, line_err};
use crate::{Error, Result};

/// Who currently owns the data bus.  "No owner" is represented by `None`
/// wherever an `Option<BusOwner>` is used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusOwner {
    /// Host driving the host-to-target port.
    HostOutput,
    /// Host reading the target-to-host port.
    PeerInput,
    /// Host reading the auxiliary peripheral with this index.
    Auxiliary(usize),
}

/// Proof of bus ownership, returned by [`DataBus::claim()`].
#[derive(Debug, PartialEq, Eq)]
#[must_use = "a claimed bus must be released"]
pub struct BusToken {
    owner: BusOwner,
    generation: u32,
}

impl BusToken {
    pub fn owner(&self) -> BusOwner {
        self.owner
    }

    #[cfg(test)]
    pub(crate) fn forged(owner: BusOwner, generation: u32) -> Self {
        Self { owner, generation }
    }
}

/// The shared data bus and the chip selects gating it.
pub struct DataBus<L: Line> {
    data: [L; 8],
    order: BitOrder,
    direction: Direction,
    host_output_cs: Signal<L>,
    peer_input_cs: Signal<L>,
    auxiliary_cs: Vec<Signal<L>>,
    owner: Option<BusOwner>,
    generation: u32,
}

impl<L: Line> DataBus<L> {
    /// Create a new bus.
    ///
    /// Arguments:
    /// - `data` - the 8 data lines, listed in `order`
    /// - `order` - the bit order of `data`
    /// - `host_output_cs` - chip select enabling the host-to-target port
    /// - `peer_input_cs` - chip select enabling the target-to-host port
    ///
    /// Call [`Self::init()`] before use.
    pub fn new(
        data: [L; 8],
        order: BitOrder,
        host_output_cs: Signal<L>,
        peer_input_cs: Signal<L>,
    ) -> Self {
        Self {
            data,
            order,
            direction: Direction::Input,
            host_output_cs,
            peer_input_cs,
            auxiliary_cs: Vec::new(),
            owner: None,
            generation: 0,
        }
    }

    /// Add an auxiliary peripheral's chip select.  Auxiliary peripherals are
    /// numbered from 0 in the order they are added.
    pub fn with_auxiliary(mut self, cs: Signal<L>) -> Self {
        self.auxiliary_cs.push(cs);
        self
    }

    /// Put every chip select and data line into its idle state.
    ///
    /// Chip selects are deasserted first so no buffer drives the bus while
    /// the data lines change direction.
    pub fn init(&mut self) -> Result<()> {
        self.host_output_cs.init_output()?;
        self.peer_input_cs.init_output()?;
        for cs in self.auxiliary_cs.iter_mut() {
            cs.init_output()?;
        }
        for line in self.data.iter_mut() {
            line.configure(Direction::Input).map_err(line_err)?;
        }
        self.direction = Direction::Input;
        self.owner = None;
        debug!("Data bus idle");
        Ok(())
    }

    /// Claim exclusive use of the bus.
    ///
    /// Fails with [`Error::Contention`] if the bus is already owned.
    pub fn claim(&mut self, owner: BusOwner, direction: Direction) -> Result<BusToken> {
        if let Some(current) = self.owner {
            error!("Bus claim by {owner:?} while owned by {current:?}");
            return Err(Error::Contention(current));
        }
        if let BusOwner::Auxiliary(index) = owner {
            if index >= self.auxiliary_cs.len() {
                return Err(Error::InvalidOperation);
            }
        }

        // Direction first, so an input buffer is never enabled onto lines
        // the host is still driving.
        self.set_direction(direction)?;
        self.select(owner)?;

        self.owner = Some(owner);
        self.generation = self.generation.wrapping_add(1);
        trace!("Bus claimed by {owner:?} ({direction:?})");

        Ok(BusToken {
            owner,
            generation: self.generation,
        })
    }

    /// Release a previous claim.
    ///
    /// Fails with [`Error::Ownership`] if `token` does not represent the
    /// current owner.
    pub fn release(&mut self, token: BusToken) -> Result<()> {
        self.check_owner(&token)?;

        self.chip_select(token.owner).deassert()?;
        self.owner = None;
        self.set_direction(Direction::Input)?;
        trace!("Bus released by {:?}", token.owner);

        Ok(())
    }

    /// Pass ownership from the holder of `token` straight to `owner`, without
    /// idling the bus in between.  `token` is updated to represent the new
    /// owner.
    ///
    /// Used for read-back, where the host flips between its output port and
    /// the target's output port for every byte.
    pub fn handover(
        &mut self,
        token: &mut BusToken,
        owner: BusOwner,
        direction: Direction,
    ) -> Result<()> {
        self.check_owner(token)?;
        if let BusOwner::Auxiliary(index) = owner {
            if index >= self.auxiliary_cs.len() {
                return Err(Error::InvalidOperation);
            }
        }

        self.chip_select(token.owner).deassert()?;
        self.owner = None;
        self.set_direction(direction)?;
        self.select(owner)?;

        self.owner = Some(owner);
        self.generation = self.generation.wrapping_add(1);
        trace!("Bus handed from {:?} to {owner:?} ({direction:?})", token.owner);

        token.owner = owner;
        token.generation = self.generation;
        Ok(())
    }

    /// Drive a byte onto the data lines.  The bus must be claimed for output.
    pub fn write(&mut self, token: &BusToken, byte: u8) -> Result<()> {
        self.check_owner(token)?;
        if self.direction != Direction::Output {
            return Err(Error::InvalidOperation);
        }

        let levels = codec::encode(byte, self.order);
        for (line, level) in self.data.iter_mut().zip(levels) {
            line.set(level).map_err(line_err)?;
        }
        Ok(())
    }

    /// Sample the data lines.  The bus must be claimed for input.
    pub fn read(&mut self, token: &BusToken) -> Result<u8> {
        self.check_owner(token)?;
        if self.direction != Direction::Input {
            return Err(Error::InvalidOperation);
        }

        let mut levels: ByteLevels = [Level::Low; 8];
        for (level, line) in levels.iter_mut().zip(self.data.iter_mut()) {
            *level = line.get().map_err(line_err)?;
        }
        Ok(codec::decode(&levels, self.order))
    }

    pub fn owner(&self) -> Option<BusOwner> {
        self.owner
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn bit_order(&self) -> BitOrder {
        self.order
    }

    /// Number of auxiliary peripherals attached.
    pub fn auxiliary_count(&self) -> usize {
        self.auxiliary_cs.len()
    }

    /// Abandon any current claim and return the bus to idle, without a
    /// token.  Only for cleanup after cancellation - any token still held
    /// becomes stale and is rejected by [`Self::release()`].
    pub fn force_release(&mut self) -> Result<()> {
        if let Some(owner) = self.owner.take() {
            warn!("Forcing release of bus from {owner:?}");
            self.generation = self.generation.wrapping_add(1);
        }
        self.init()
    }
}

// Internal functions
impl<L: Line> DataBus<L> {
    fn check_owner(&self, token: &BusToken) -> Result<()> {
        if self.owner == Some(token.owner) && self.generation == token.generation {
            Ok(())
        } else {
            error!(
                "Bus token {:?} does not match owner {:?}",
                token.owner, self.owner
            );
            Err(Error::Ownership)
        }
    }

    fn chip_select(&mut self, owner: BusOwner) -> &mut Signal<L> {
        match owner {
            BusOwner::HostOutput => &mut self.host_output_cs,
            BusOwner::PeerInput => &mut self.peer_input_cs,
            BusOwner::Auxiliary(index) => &mut self.auxiliary_cs[index],
        }
    }

    // Assert `owner`'s chip select.  On failure the bus is unowned, so the
    // data lines go back to input.
    fn select(&mut self, owner: BusOwner) -> Result<()> {
        let result = self.chip_select(owner).assert();
        if result.is_err() {
            if let Err(e) = self.set_direction(Direction::Input) {
                error!("Failed to idle data lines: {e}");
            }
        }
        result
    }

    fn set_direction(&mut self, direction: Direction) -> Result<()> {
        if self.direction != direction {
            for line in self.data.iter_mut() {
                line.configure(direction).map_err(line_err)?;
            }
            self.direction = direction;
        }
        Ok(())
    }
}
