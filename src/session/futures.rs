//! Asynchronous cooperative session - yields to the executor between turns.
//!
//! The handshake itself stays synchronous: the waits inside a byte transfer
//! are short and bounded by the target's strobe timing, and the bus must not
//! be held across a yield point.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, Ordering};
#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::handshake::Pia;
use crate::heartbeat::Heartbeat;
use crate::line::Line;
use crate::protocol::{DownloadReport, Image};
use crate::session::{Poller, Tasks};
use crate::sink::AsyncSink;
use crate::time::{Clock, Delay};
use crate::{Error, Result};

/// Yield delay between turns of the async session.
///
/// Application must provide an implementation of this trait so the session
/// can hand control back to other tasks on the executor.  Keep it short - the
/// target's output is only drained while the session runs.
///
/// This trait keeps `pia-link` free of any specific async runtime.
///
/// Example:
///
/// ```rust,ignore
/// use embassy_time::{Duration, Timer};
/// struct Delay;
/// impl AsyncDelay for Delay {
///     async fn delay() {
///         Timer::after(Duration::from_micros(100)).await;
///     }
/// }
/// ```
pub trait AsyncDelay {
    fn delay() -> impl Future<Output = ()>;
}

/// Async session, running every task in turn until cancelled.
///
/// See [`crate::session::Session`] for the blocking equivalent.
pub struct AsyncSession<L: Line, D: Delay, C: Clock, S: AsyncSink, Y: AsyncDelay> {
    tasks: Tasks<L, D, C>,
    sink: S,
    _yield: core::marker::PhantomData<Y>,
}

impl<L: Line, D: Delay, C: Clock, S: AsyncSink, Y: AsyncDelay> AsyncSession<L, D, C, S, Y> {
    pub fn new(pia: Pia<L, D>, heartbeat: Heartbeat<L>, clock: C, sink: S) -> Self {
        Self {
            tasks: Tasks {
                pia,
                heartbeat,
                clock,
                pollers: Vec::new(),
            },
            sink,
            _yield: core::marker::PhantomData,
        }
    }

    pub fn add_poller(&mut self, poller: Box<dyn Poller<L, D>>) {
        self.tasks.pollers.push(poller);
    }

    pub fn init(&mut self) -> Result<()> {
        self.tasks.init()
    }

    /// Download and execute an image.  Does not yield until complete, but
    /// is cancelled by `stop` as [`crate::session::Session::download()`] is.
    pub fn download(&mut self, image: &Image, stop: &AtomicBool) -> Result<DownloadReport> {
        self.tasks.download(image, stop)
    }

    /// See [`crate::session::Session::bootstrap()`].
    pub async fn bootstrap(
        &mut self,
        loader: &Image<'_>,
        app: &Image<'_>,
        stop: &AtomicBool,
    ) -> Result<[DownloadReport; 2]> {
        let reports = self.tasks.bootstrap(loader, app, stop)?;
        Y::delay().await;
        Ok(reports)
    }

    /// Run one turn of every task, passing anything received to the sink.
    pub async fn turn(&mut self) -> Result<usize> {
        let bytes = self.tasks.turn()?;
        if !bytes.is_empty() {
            self.sink.write(&bytes).await;
        }
        Ok(bytes.len())
    }

    /// Run turns until `stop` is set, yielding after each, then return every
    /// line to idle.
    ///
    /// Always returns an error - [`Error::Interrupted`] if stopped, otherwise
    /// the fatal error which ended the session.
    pub async fn run(&mut self, stop: &AtomicBool) -> Result<()> {
        info!("Listening...");
        loop {
            if stop.load(Ordering::Acquire) {
                return Err(self.tasks.abort(Error::Interrupted));
            }
            if let Err(e) = self.turn().await {
                return Err(self.tasks.abort(e));
            }
            Y::delay().await;
        }
    }

    pub fn shutdown(&mut self) -> Result<()> {
        self.tasks.shutdown()
    }

    pub fn pia(&self) -> &Pia<L, D> {
        &self.tasks.pia
    }

    pub fn pia_mut(&mut self) -> &mut Pia<L, D> {
        &mut self.tasks.pia
    }

    pub fn heartbeat(&self) -> &Heartbeat<L> {
        &self.tasks.heartbeat
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }
}
