//! Blocking cooperative session.

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
use crate::sink::Sink;
use crate::time::{Clock, Delay};
use crate::{Error, Result};

/// Blocking session, running every task in turn until cancelled.
///
/// ```rust,ignore
/// static STOP: AtomicBool = AtomicBool::new(false);
///
/// let mut session = Session::new(pia, heartbeat, clock, LogSink);
/// session.init()?;
/// session.bootstrap(&Image::from_bytes(&boot2)?, &Image::from_bytes(&app)?, &STOP)?;
/// session.run(&STOP)?;
/// ```
pub struct Session<L: Line, D: Delay, C: Clock, S: Sink> {
    tasks: Tasks<L, D, C>,
    sink: S,
}

impl<L: Line, D: Delay, C: Clock, S: Sink> Session<L, D, C, S> {
    pub fn new(pia: Pia<L, D>, heartbeat: Heartbeat<L>, clock: C, sink: S) -> Self {
        Self {
            tasks: Tasks {
                pia,
                heartbeat,
                clock,
                pollers: Vec::new(),
            },
            sink,
        }
    }

    /// Add a low priority task, given a turn every cycle.
    pub fn add_poller(&mut self, poller: Box<dyn Poller<L, D>>) {
        self.tasks.pollers.push(poller);
    }

    /// Configure all lines and reset the target.
    pub fn init(&mut self) -> Result<()> {
        self.tasks.init()
    }

    /// Download and execute an image, using the current send strategy.
    ///
    /// If `stop` is set part way through, the frame is abandoned, every line
    /// returned to idle, and [`Error::Interrupted`] returned.
    pub fn download(&mut self, image: &Image, stop: &AtomicBool) -> Result<DownloadReport> {
        self.tasks.download(image, stop)
    }

    /// Boot the target in two stages: download `loader` to the ROM loader
    /// (pulse timed), switch to acknowledged transfers, then download `app`
    /// via the newly running loader.
    ///
    /// Must be called straight after [`Self::init()`].  Cancelled by `stop`
    /// as [`Self::download()`] is.
    pub fn bootstrap(
        &mut self,
        loader: &Image,
        app: &Image,
        stop: &AtomicBool,
    ) -> Result<[DownloadReport; 2]> {
        self.tasks.bootstrap(loader, app, stop)
    }

    /// Run one turn of every task, passing anything received to the sink.
    ///
    /// Returns the number of bytes received.
    pub fn turn(&mut self) -> Result<usize> {
        let bytes = self.tasks.turn()?;
        if !bytes.is_empty() {
            self.sink.write(&bytes);
        }
        Ok(bytes.len())
    }

    /// Run turns until `stop` is set, then return every line to idle.
    ///
    /// Always returns an error - [`Error::Interrupted`] if stopped, otherwise
    /// the fatal error which ended the session.
    pub fn run(&mut self, stop: &AtomicBool) -> Result<()> {
        info!("Listening...");
        loop {
            if stop.load(Ordering::Acquire) {
                return Err(self.tasks.abort(Error::Interrupted));
            }
            if let Err(e) = self.turn() {
                return Err(self.tasks.abort(e));
            }
        }
    }

    /// Return every line to idle.
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
