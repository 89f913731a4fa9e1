//! Inbound Stream Reader, and auxiliary peripheral reads.
//!
//! [`Pia::receive()`] never waits for the target.  If the target has nothing
//! to say it returns immediately, without touching the bus, so that it can be
//! called every time round a cooperative loop.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

use alloc::vec::Vec;
#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::bus::{BusOwner, BusToken};
use crate::handshake::Pia;
use crate::line::{Direction, Line};
use crate::time::Delay;
use crate::Result;

impl<L: Line, D: Delay> Pia<L, D> {
    /// Whether the target is signalling "data ready".
    pub fn data_ready(&mut self) -> Result<bool> {
        self.inbound.ready.is_active()
    }

    /// Drain whatever bytes the target has ready.
    ///
    /// Returns an empty `Vec` if "data ready" is inactive - in that case the
    /// bus is not claimed.  Otherwise claims the bus, receives bytes until
    /// "data ready" goes inactive, and releases the bus, returning the bytes
    /// in arrival order.
    pub fn receive(&mut self) -> Result<Vec<u8>> {
        let mut bytes = Vec::new();
        if !self.data_ready()? {
            return Ok(bytes);
        }

        let token = self.bus.claim(BusOwner::PeerInput, Direction::Input)?;
        let result = self.drain(&token, &mut bytes);
        let released = self.bus.release(token);
        result?;
        released?;

        trace!("Drained {} bytes", bytes.len());
        Ok(bytes)
    }

    /// Read the auxiliary peripheral `index` (e.g. a quadrature counter).
    pub fn read_auxiliary(&mut self, index: usize) -> Result<u8> {
        let token = self
            .bus
            .claim(BusOwner::Auxiliary(index), Direction::Input)?;
        let result = self.bus.read(&token);
        self.bus.release(token)?;
        result
    }

    fn drain(&mut self, token: &BusToken, bytes: &mut Vec<u8>) -> Result<()> {
        loop {
            bytes.push(self.receive_byte(token)?);
            if !self.data_ready()? {
                return Ok(());
            }
        }
    }
}
