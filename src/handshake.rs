//! Strobe Handshake Engine.
//!
//! Each byte crosses between host and target using a pair of active-low
//! handshake lines, as a 6522 VIA's CA1/CA2 and CB1/CB2 would provide:
//!
//! ```text
//! host -> target (outbound)          target -> host (inbound)
//!   ready  (host drives, CA1)          ready  (target drives, CB2)
//!   taken  (target drives, CA2)        taken  (host drives, CB1)
//! ```
//!
//! A transfer moves through `Idle -> ReadyAsserted -> Acknowledged -> Idle`:
//! the sender drives the data and asserts ready, the receiver pulses taken,
//! the sender deasserts ready.
//!
//! The target's PIA runs its handshake lines in strobe (pulse) mode, so the
//! acknowledge can be shorter than a microsecond.  The outbound wait therefore
//! relies on the [`Line`]'s latched edge detection and never on sampling the
//! level.
//!
//! There is no timeout on the acknowledge wait - a target which never
//! acknowledges stalls the host until the operator's stop flag is set, see
//! [`Pia::send_byte_cancellable()`].
//!
//! Outbound transfers use one of two [`SendStrategy`]s, chosen by boot phase.
//! See [`Pia::enable_acknowledged()`].

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

use core::sync::atomic::{AtomicBool, Ordering};
use core::time::Duration;
#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::bus::{BusOwner, BusToken, DataBus};
use crate::line::{Direction, Line, Signal};
use crate::time::Delay;
use crate::{Error, Result};

/// Time the target's first-stage loader is given to consume each byte when
/// it cannot acknowledge.  Must exceed its worst-case per-byte time.
pub const PULSE_TIMED_SETTLE: Duration = Duration::from_millis(1);

/// How long inbound "data taken" is held active, giving the target time to
/// present its next byte before the host samples "data ready" again.
pub const INBOUND_SETTLE: Duration = Duration::from_micros(20);

/// How long the target is held in reset.
pub const RESET_HOLD: Duration = Duration::from_millis(300);

/// How long the target is given to start after leaving reset.
pub const RESET_RECOVERY: Duration = Duration::from_millis(300);

/// How outbound bytes wait for the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStrategy {
    /// Wait a fixed settle time, don't look for an acknowledge.  Used while
    /// the target runs its first-stage ROM loader.
    PulseTimed,
    /// Wait for the target's "data taken" strobe.  Used once a second-stage
    /// loader which handshakes properly is running.
    Acknowledged,
}

/// A read-back which didn't match what was sent.  Advisory only - the byte is
/// not resent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadbackMismatch {
    pub sent: u8,
    pub received: u8,
}

/// Protocol engine configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PiaConfig {
    /// Read back each acknowledged byte from the target's output port and
    /// compare.  Requires the target to echo.
    pub readback: bool,
    /// Settle time for [`SendStrategy::PulseTimed`].
    pub pulse_timed_settle: Duration,
    /// Inbound "data taken" pulse width.  May be zero.
    pub inbound_settle: Duration,
    pub reset_hold: Duration,
    pub reset_recovery: Duration,
}

impl Default for PiaConfig {
    fn default() -> Self {
        Self {
            readback: false,
            pulse_timed_settle: PULSE_TIMED_SETTLE,
            inbound_settle: INBOUND_SETTLE,
            reset_hold: RESET_HOLD,
            reset_recovery: RESET_RECOVERY,
        }
    }
}

/// Ready/taken line pair for one direction.
pub struct Handshake<L: Line> {
    pub(crate) ready: Signal<L>,
    pub(crate) taken: Signal<L>,
    direction: Direction,
}

impl<L: Line> Handshake<L> {
    /// Host-to-target pair: the host drives `ready`, the target `taken`.
    pub fn outbound(ready: Signal<L>, taken: Signal<L>) -> Self {
        Self {
            ready,
            taken,
            direction: Direction::Output,
        }
    }

    /// Target-to-host pair: the target drives `ready`, the host `taken`.
    pub fn inbound(ready: Signal<L>, taken: Signal<L>) -> Self {
        Self {
            ready,
            taken,
            direction: Direction::Input,
        }
    }

    // Configure directions, idle the host's output, and subscribe to the
    // target's strobe.
    fn init(&mut self) -> Result<()> {
        match self.direction {
            Direction::Output => {
                self.ready.init_output()?;
                self.taken.init_input()?;
                self.taken.listen()
            }
            Direction::Input => {
                self.taken.init_output()?;
                self.ready.init_input()?;
                self.ready.listen()
            }
        }
    }

    // Deassert whichever line the host drives.
    fn idle(&mut self) -> Result<()> {
        match self.direction {
            Direction::Output => self.ready.deassert(),
            Direction::Input => self.taken.deassert(),
        }
    }
}

/// The protocol engine - the emulated PIA as seen from the host.
///
/// Owns the [`DataBus`], both [`Handshake`] pairs, the target's reset line
/// and a [`Delay`].
pub struct Pia<L: Line, D: Delay> {
    pub(crate) bus: DataBus<L>,
    pub(crate) outbound: Handshake<L>,
    pub(crate) inbound: Handshake<L>,
    reset: Signal<L>,
    pub(crate) delay: D,
    config: PiaConfig,
    strategy: SendStrategy,
}

impl<L: Line, D: Delay> Pia<L, D> {
    /// Create a new engine.
    ///
    /// Arguments:
    /// - `bus` - the shared data bus
    /// - `outbound` - host-to-target handshake, see [`Handshake::outbound()`]
    /// - `inbound` - target-to-host handshake, see [`Handshake::inbound()`]
    /// - `reset` - asserting this holds the target in reset
    /// - `delay` - delay implementation
    /// - `config` - timing and read-back configuration
    ///
    /// No lines are touched until [`Self::reset_target()`].
    pub fn new(
        bus: DataBus<L>,
        outbound: Handshake<L>,
        inbound: Handshake<L>,
        reset: Signal<L>,
        delay: D,
        config: PiaConfig,
    ) -> Self {
        Self {
            bus,
            outbound,
            inbound,
            reset,
            delay,
            config,
            strategy: SendStrategy::PulseTimed,
        }
    }

    /// Configure every line and reset the target.
    ///
    /// Starts a new boot sequence: the strategy returns to
    /// [`SendStrategy::PulseTimed`], as the target will come up in its ROM
    /// loader.
    pub fn reset_target(&mut self) -> Result<()> {
        info!("Resetting target");

        self.bus.force_release()?;
        self.outbound.init()?;
        self.inbound.init()?;

        self.reset.init_output()?;
        self.reset.assert()?;
        self.delay.delay(self.config.reset_hold);
        self.reset.deassert()?;
        self.delay.delay(self.config.reset_recovery);

        self.strategy = SendStrategy::PulseTimed;
        debug!("Target out of reset");
        Ok(())
    }

    /// Switch from [`SendStrategy::PulseTimed`] to
    /// [`SendStrategy::Acknowledged`].
    ///
    /// Call once the second-stage loader has been downloaded and started.
    /// This can only happen once per boot sequence - a second call fails with
    /// [`Error::InvalidOperation`].
    pub fn enable_acknowledged(&mut self) -> Result<()> {
        if self.strategy == SendStrategy::Acknowledged {
            return Err(Error::InvalidOperation);
        }

        // Strobes seen while we weren't looking for them must not satisfy
        // the first acknowledged wait.
        self.outbound.taken.listen()?;

        self.strategy = SendStrategy::Acknowledged;
        info!("Send strategy now {:?}", self.strategy);
        Ok(())
    }

    pub fn strategy(&self) -> SendStrategy {
        self.strategy
    }

    pub fn config(&self) -> &PiaConfig {
        &self.config
    }

    pub fn bus(&self) -> &DataBus<L> {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut DataBus<L> {
        &mut self.bus
    }

    pub fn delay_mut(&mut self) -> &mut D {
        &mut self.delay
    }

    /// Send one byte to the target.
    ///
    /// `token` must be a [`BusOwner::HostOutput`] claim.  When read-back is
    /// enabled and the strategy is [`SendStrategy::Acknowledged`], the bus
    /// is briefly handed to [`BusOwner::PeerInput`] and back, with `token`
    /// tracking it.
    ///
    /// Returns any read-back mismatch.  It has been logged, and is not an
    /// error.
    pub fn send_byte(
        &mut self,
        token: &mut BusToken,
        byte: u8,
    ) -> Result<Option<ReadbackMismatch>> {
        self.send_byte_cancellable(token, byte, &AtomicBool::new(false))
    }

    /// As [`Self::send_byte()`], but gives up with [`Error::Interrupted`] if
    /// `stop` is set while waiting for the target.
    ///
    /// "Data ready" is deasserted before returning.  The bus is left claimed.
    pub fn send_byte_cancellable(
        &mut self,
        token: &mut BusToken,
        byte: u8,
        stop: &AtomicBool,
    ) -> Result<Option<ReadbackMismatch>> {
        if token.owner() != BusOwner::HostOutput {
            return Err(Error::Ownership);
        }
        let readback = self.config.readback && self.strategy == SendStrategy::Acknowledged;

        self.bus.write(token, byte)?;
        // Clear stale strobes, so only this byte's satisfy the waits
        if readback {
            self.inbound.ready.activated()?;
        }
        if self.strategy == SendStrategy::Acknowledged {
            self.outbound.taken.activated()?;
        }
        self.outbound.ready.assert()?;

        let waited = match self.strategy {
            SendStrategy::PulseTimed => {
                self.delay.delay(self.config.pulse_timed_settle);
                Ok(())
            }
            SendStrategy::Acknowledged => wait_for(&mut self.outbound.taken, stop),
        };

        self.outbound.ready.deassert()?;
        if let Err(e) = waited {
            warn!("Abandoned send of {byte:#04X}: {e}");
            return Err(e);
        }
        trace!("Sent {byte:#04X}");

        if readback {
            self.readback(token, byte, stop)
        } else {
            Ok(None)
        }
    }

    /// Receive one byte from the target.
    ///
    /// The target's "data ready" must have been seen active, and `token` must
    /// be a [`BusOwner::PeerInput`] claim.
    pub fn receive_byte(&mut self, token: &BusToken) -> Result<u8> {
        if token.owner() != BusOwner::PeerInput {
            return Err(Error::Ownership);
        }

        let byte = self.bus.read(token)?;

        // The target's ready goes inactive as soon as it sees taken, so
        // ready being active again after this pulse means a new byte.
        self.inbound.taken.assert()?;
        self.delay.delay(self.config.inbound_settle);
        self.inbound.taken.deassert()?;

        trace!("Received {byte:#04X}");
        Ok(byte)
    }

    /// Abandon any bus claim and return every host-driven line to idle.
    ///
    /// Used on cancellation.  A partially sent frame is abandoned - the
    /// target resynchronises on the next frame's prefix byte.
    pub fn restore_idle(&mut self) -> Result<()> {
        self.bus.force_release()?;
        self.outbound.idle()?;
        self.inbound.idle()?;
        self.reset.deassert()?;
        debug!("Lines restored to idle");
        Ok(())
    }
}

// Internal functions
impl<L: Line, D: Delay> Pia<L, D> {
    // Read the target's echo of the byte just sent.  The target is still in
    // strobe mode, so no "data taken" is sent for the echo.
    fn readback(
        &mut self,
        token: &mut BusToken,
        sent: u8,
        stop: &AtomicBool,
    ) -> Result<Option<ReadbackMismatch>> {
        wait_for(&mut self.inbound.ready, stop)?;

        self.bus.handover(token, BusOwner::PeerInput, Direction::Input)?;
        let received = self.bus.read(token)?;
        self.bus.handover(token, BusOwner::HostOutput, Direction::Output)?;

        if received == sent {
            Ok(None)
        } else {
            warn!("Read-back mismatch: sent {sent:#04X} received {received:#04X}");
            Ok(Some(ReadbackMismatch { sent, received }))
        }
    }
}

// Spin until `signal` strobes active.  No timeout, only `stop`.
fn wait_for<L: Line>(signal: &mut Signal<L>, stop: &AtomicBool) -> Result<()> {
    loop {
        if signal.activated()? {
            return Ok(());
        }
        if stop.load(Ordering::Acquire) {
            return Err(Error::Interrupted);
        }
        core::hint::spin_loop();
    }
}
