//! Cooperative session - downloads, then listens to the target.
//!
//! All tasks run on one thread, one after another:
//! - the Inbound Stream Reader ([`Pia::receive()`])
//! - the [`Heartbeat`]
//! - any number of [`Poller`]s, e.g. for buttons and quadrature counters
//!
//! Each task claims the bus only within its own turn, so the arbiter never
//! sees contention between well-behaved tasks.  During a download the
//! heartbeat is also given a turn after every byte.
//!
//! Cancellation is by an `AtomicBool`, typically set from a Ctrl-C handler,
//! passed to every call which can take a while.  It is checked between turns,
//! before every byte of a download, and while waiting for the target.  When it
//! is seen any partial frame is abandoned, the session returns every line to
//! idle and returns [`Error::Interrupted`].
//!
//! [`Session`] is the blocking form, [`AsyncSession`] (feature `async`) yields
//! to an executor between turns.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

#[cfg(feature = "async")]
pub mod futures;
pub mod sync;

#[cfg(feature = "async")]
pub use futures::{AsyncDelay, AsyncSession};
pub use sync::Session;

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::sync::atomic::AtomicBool;
#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::handshake::{Pia, SendStrategy};
use crate::heartbeat::Heartbeat;
use crate::line::Line;
use crate::protocol::{DownloadReport, Image};
use crate::time::{Clock, Delay};
use crate::{Error, Result};

/// A low priority task given a turn every cycle.
pub trait Poller<L: Line, D: Delay> {
    fn poll(&mut self, pia: &mut Pia<L, D>) -> Result<()>;
}

/// Polls an auxiliary peripheral and logs its value when it changes.
#[derive(Debug)]
pub struct AuxiliaryMonitor {
    index: usize,
    last: Option<u8>,
}

impl AuxiliaryMonitor {
    pub fn new(index: usize) -> Self {
        Self { index, last: None }
    }

    pub fn last(&self) -> Option<u8> {
        self.last
    }
}

impl<L: Line, D: Delay> Poller<L, D> for AuxiliaryMonitor {
    fn poll(&mut self, pia: &mut Pia<L, D>) -> Result<()> {
        let value = pia.read_auxiliary(self.index)?;
        if self.last != Some(value) {
            info!("Auxiliary {} = {value:#010b}", self.index);
            self.last = Some(value);
        }
        Ok(())
    }
}

// State shared by the sync and async sessions.
struct Tasks<L: Line, D: Delay, C: Clock> {
    pia: Pia<L, D>,
    heartbeat: Heartbeat<L>,
    clock: C,
    pollers: Vec<Box<dyn Poller<L, D>>>,
}

impl<L: Line, D: Delay, C: Clock> Tasks<L, D, C> {
    fn init(&mut self) -> Result<()> {
        self.heartbeat.init()?;
        self.pia.reset_target()
    }

    // Cancellation aborts the session, other errors leave it usable.
    fn download(&mut self, image: &Image, stop: &AtomicBool) -> Result<DownloadReport> {
        info!(
            "Downloading {} bytes to {:#06X}, exec {:#06X}",
            image.payload.len(),
            image.load_addr,
            image.exec_addr
        );
        let frame = image.frame()?;
        let heartbeat = &mut self.heartbeat;
        let clock = &self.clock;
        let result = self
            .pia
            .dload_exec_with(&frame, stop, |delay| heartbeat.poll(clock, delay).map(|_| ()));
        match result {
            Err(Error::Interrupted) => Err(self.abort(Error::Interrupted)),
            result => result,
        }
    }

    fn bootstrap(
        &mut self,
        loader: &Image,
        app: &Image,
        stop: &AtomicBool,
    ) -> Result<[DownloadReport; 2]> {
        if self.pia.strategy() != SendStrategy::PulseTimed {
            return Err(Error::InvalidOperation);
        }
        let loader_report = self.download(loader, stop)?;
        self.pia.enable_acknowledged()?;
        let app_report = self.download(app, stop)?;
        Ok([loader_report, app_report])
    }

    // One turn of every task.  Returns what the target sent.
    fn turn(&mut self) -> Result<Vec<u8>> {
        self.heartbeat.poll(&self.clock, self.pia.delay_mut())?;
        let bytes = self.pia.receive()?;
        for poller in self.pollers.iter_mut() {
            poller.poll(&mut self.pia)?;
        }
        Ok(bytes)
    }

    fn shutdown(&mut self) -> Result<()> {
        let pia = self.pia.restore_idle();
        let heartbeat = self.heartbeat.idle();
        pia.and(heartbeat)
    }

    // Clean up after a fatal error or cancellation, keeping the original
    // error.
    fn abort(&mut self, error: Error) -> Error {
        error!("Session stopping: {error}");
        if let Err(e) = self.shutdown() {
            error!("Cleanup failed: {e}");
        }
        error
    }
}
