//! Heartbeat Task - periodically pulses the target's interrupt line.
//!
//! Purely time driven.  The interrupt line is not part of the data bus, so the
//! heartbeat never needs bus ownership and can run between any two byte
//! transfers, including in the middle of a download.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

use core::time::Duration;
#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::Result;
use crate::line::{Line, Signal};
use crate::time::{Clock, Delay};

pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

/// Minimum interrupt pulse the target reliably latches.
pub const HEARTBEAT_PULSE: Duration = Duration::from_micros(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatConfig {
    pub interval: Duration,
    pub pulse_width: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: HEARTBEAT_INTERVAL,
            pulse_width: HEARTBEAT_PULSE,
        }
    }
}

pub struct Heartbeat<L: Line> {
    irq: Signal<L>,
    config: HeartbeatConfig,
    last: Option<Duration>,
    count: u32,
}

impl<L: Line> Heartbeat<L> {
    pub fn new(irq: Signal<L>, config: HeartbeatConfig) -> Self {
        Self {
            irq,
            config,
            last: None,
            count: 0,
        }
    }

    /// Configure the interrupt line, inactive.  Must be done before the
    /// target leaves reset.
    pub fn init(&mut self) -> Result<()> {
        self.last = None;
        self.irq.init_output()
    }

    /// Pulse the interrupt line if an interval has passed since the last
    /// pulse.  The first call only starts the interval.
    ///
    /// Returns whether a pulse was sent.
    pub fn poll<C: Clock, D: Delay>(&mut self, clock: &C, delay: &mut D) -> Result<bool> {
        let now = clock.now();
        match self.last {
            None => {
                self.last = Some(now);
                Ok(false)
            }
            Some(last) if now.saturating_sub(last) >= self.config.interval => {
                self.pulse(delay)?;
                self.last = Some(now);
                Ok(true)
            }
            Some(_) => Ok(false),
        }
    }

    pub fn pulse<D: Delay>(&mut self, delay: &mut D) -> Result<()> {
        self.irq.assert()?;
        delay.delay(self.config.pulse_width);
        self.irq.deassert()?;
        self.count = self.count.wrapping_add(1);
        trace!("Heartbeat {}", self.count);
        Ok(())
    }

    /// Leave the interrupt line inactive.
    pub fn idle(&mut self) -> Result<()> {
        self.irq.deassert()
    }

    /// Pulses sent so far.
    pub fn count(&self) -> u32 {
        self.count
    }
}
