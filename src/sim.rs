//! Simulated board and target, for tests.
//!
//! The simulated target behaves like a 6522 in strobe mode driven by the
//! second-stage loader:
//! - latches a byte when host "data ready" goes active on the outbound port,
//!   acknowledging with a "data taken" strobe too short to be seen on the
//!   level (edge only)
//! - optionally echoes each byte on its own port, strobing inbound "data
//!   ready"
//! - holds inbound "data ready" active while it has bytes queued, moving to
//!   the next byte on each host "data taken"

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

use alloc::collections::{BTreeMap, VecDeque};
use alloc::rc::Rc;
use alloc::vec::Vec;
use core::cell::RefCell;
use core::time::Duration;

use crate::bus::DataBus;
use crate::codec::{self, BitOrder};
use crate::handshake::{Handshake, Pia, PiaConfig};
use crate::heartbeat::{Heartbeat, HeartbeatConfig};
use crate::line::{Direction, Edge, Level, Line, Signal};
use crate::time::{Clock, Delay};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Pin {
    /// Data line, by position in the port (bit 7 first)
    Data(usize),
    OutReady,
    OutTaken,
    InReady,
    InTaken,
    CsOut,
    CsIn,
    CsAux(usize),
    Irq,
    Reset,
}

#[derive(Default)]
struct State {
    levels: BTreeMap<Pin, Level>,
    directions: BTreeMap<Pin, Direction>,
    configures: BTreeMap<Pin, usize>,
    history: Vec<(Pin, Level)>,
    subscriptions: BTreeMap<Pin, Edge>,
    latches: BTreeMap<Pin, bool>,
    now: Duration,
    delays: Vec<Duration>,

    // Target behaviour
    no_acknowledge: bool,
    echo: bool,
    corrupt: Option<(usize, u8)>,
    received: Vec<u8>,
    echo_byte: Option<u8>,
    outbox: VecDeque<u8>,
    auxiliary: [u8; 2],

    failing: Vec<Pin>,
}

impl State {
    fn level(&self, pin: Pin) -> Level {
        self.levels.get(&pin).copied().unwrap_or(Level::High)
    }

    fn driven_byte(&self) -> u8 {
        let levels = core::array::from_fn(|i| self.level(Pin::Data(i)));
        codec::decode(&levels, BitOrder::MsbFirst)
    }

    fn latch(&mut self, pin: Pin, edge: Edge) {
        if let Some(subscribed) = self.subscriptions.get(&pin) {
            if *subscribed == edge || *subscribed == Edge::Both {
                self.latches.insert(pin, true);
            }
        }
    }

    fn set(&mut self, pin: Pin, level: Level) {
        let prev = self.level(pin);
        self.levels.insert(pin, level);
        self.history.push((pin, level));
        let falling = prev == Level::High && level == Level::Low;

        match pin {
            Pin::OutReady if falling && self.level(Pin::CsOut) == Level::Low => {
                let byte = self.driven_byte();
                let index = self.received.len();
                self.received.push(byte);
                if !self.no_acknowledge {
                    self.latch(Pin::OutTaken, Edge::Falling);
                }
                if self.echo {
                    let mask = match self.corrupt {
                        Some((i, mask)) if i == index => mask,
                        _ => 0,
                    };
                    self.echo_byte = Some(byte ^ mask);
                    self.latch(Pin::InReady, Edge::Falling);
                }
            }
            Pin::InTaken if falling => {
                self.outbox.pop_front();
                if !self.outbox.is_empty() {
                    self.latch(Pin::InReady, Edge::Falling);
                }
            }
            Pin::CsIn if level == Level::High => self.echo_byte = None,
            _ => {}
        }
    }

    fn get(&self, pin: Pin) -> Level {
        match pin {
            Pin::InReady => {
                if self.outbox.is_empty() {
                    Level::High
                } else {
                    Level::Low
                }
            }
            Pin::Data(i) => {
                let byte = if self.level(Pin::CsIn) == Level::Low {
                    self.echo_byte
                        .or(self.outbox.front().copied())
                        .unwrap_or(0xFF)
                } else if let Some(n) =
                    (0..2).find(|n| self.level(Pin::CsAux(*n)) == Level::Low)
                {
                    self.auxiliary[n]
                } else {
                    return self.level(pin);
                };
                codec::encode(byte, BitOrder::MsbFirst)[i]
            }
            _ => self.level(pin),
        }
    }
}

#[derive(Clone, Default)]
pub struct SimBoard {
    state: Rc<RefCell<State>>,
}

impl SimBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn line(&self, pin: Pin) -> SimLine {
        SimLine {
            pin,
            state: self.state.clone(),
        }
    }

    pub fn delay(&self) -> SimDelay {
        SimDelay {
            state: self.state.clone(),
        }
    }

    pub fn clock(&self) -> SimClock {
        SimClock {
            state: self.state.clone(),
        }
    }

    /// Bus with two auxiliary peripherals.
    pub fn data_bus(&self) -> DataBus<SimLine> {
        DataBus::new(
            core::array::from_fn(|i| self.line(Pin::Data(i))),
            BitOrder::MsbFirst,
            Signal::active_low(self.line(Pin::CsOut)),
            Signal::active_low(self.line(Pin::CsIn)),
        )
        .with_auxiliary(Signal::active_low(self.line(Pin::CsAux(0))))
        .with_auxiliary(Signal::active_low(self.line(Pin::CsAux(1))))
    }

    pub fn pia(&self, config: PiaConfig) -> Pia<SimLine, SimDelay> {
        Pia::new(
            self.data_bus(),
            Handshake::outbound(
                Signal::active_low(self.line(Pin::OutReady)),
                Signal::active_low(self.line(Pin::OutTaken)),
            ),
            Handshake::inbound(
                Signal::active_low(self.line(Pin::InReady)),
                Signal::active_low(self.line(Pin::InTaken)),
            ),
            Signal::active_high(self.line(Pin::Reset)),
            self.delay(),
            config,
        )
    }

    pub fn heartbeat(&self, config: HeartbeatConfig) -> Heartbeat<SimLine> {
        Heartbeat::new(Signal::active_high(self.line(Pin::Irq)), config)
    }

    pub fn level(&self, pin: Pin) -> Level {
        self.state.borrow().level(pin)
    }

    pub fn direction(&self, pin: Pin) -> Direction {
        self.state
            .borrow()
            .directions
            .get(&pin)
            .copied()
            .unwrap_or(Direction::Input)
    }

    pub fn configure_count(&self, pin: Pin) -> usize {
        self.state
            .borrow()
            .configures
            .get(&pin)
            .copied()
            .unwrap_or(0)
    }

    /// Every level the host has set on `pin`, in order.
    pub fn sets(&self, pin: Pin) -> Vec<Level> {
        self.state
            .borrow()
            .history
            .iter()
            .filter(|(p, _)| *p == pin)
            .map(|(_, level)| *level)
            .collect()
    }

    pub fn driven_byte(&self) -> u8 {
        self.state.borrow().driven_byte()
    }

    pub fn advance(&self, duration: Duration) {
        self.state.borrow_mut().now += duration;
    }

    pub fn delays(&self) -> Vec<Duration> {
        self.state.borrow().delays.clone()
    }

    pub fn clear_delays(&self) {
        self.state.borrow_mut().delays.clear();
    }

    pub fn set_acknowledge(&self, acknowledge: bool) {
        self.state.borrow_mut().no_acknowledge = !acknowledge;
    }

    pub fn set_echo(&self, echo: bool) {
        self.state.borrow_mut().echo = echo;
    }

    /// XOR the echo of the `index`th received byte with `mask`.
    pub fn corrupt_echo(&self, index: usize, mask: u8) {
        self.state.borrow_mut().corrupt = Some((index, mask));
    }

    /// Bytes the target has received.
    pub fn received(&self) -> Vec<u8> {
        self.state.borrow().received.clone()
    }

    pub fn clear_received(&self) {
        self.state.borrow_mut().received.clear();
    }

    /// Bytes for the target to send.
    pub fn queue_outbound(&self, bytes: &[u8]) {
        let mut state = self.state.borrow_mut();
        let was_empty = state.outbox.is_empty();
        state.outbox.extend(bytes.iter().copied());
        if was_empty && !bytes.is_empty() {
            state.latch(Pin::InReady, Edge::Falling);
        }
    }

    pub fn set_auxiliary_value(&self, index: usize, value: u8) {
        self.state.borrow_mut().auxiliary[index] = value;
    }

    /// Latch an active-low strobe on `pin`, as the target would.
    pub fn strobe(&self, pin: Pin) {
        self.state.borrow_mut().latch(pin, Edge::Falling);
    }

    /// Make every later `set()` on `pin` fail.
    pub fn fail_sets(&self, pin: Pin) {
        self.state.borrow_mut().failing.push(pin);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimError(pub Pin);

pub struct SimLine {
    pin: Pin,
    state: Rc<RefCell<State>>,
}

impl Line for SimLine {
    type Error = SimError;

    fn configure(&mut self, direction: Direction) -> Result<(), SimError> {
        let mut state = self.state.borrow_mut();
        state.directions.insert(self.pin, direction);
        *state.configures.entry(self.pin).or_insert(0) += 1;
        Ok(())
    }

    fn set(&mut self, level: Level) -> Result<(), SimError> {
        let mut state = self.state.borrow_mut();
        if state.failing.contains(&self.pin) {
            return Err(SimError(self.pin));
        }
        state.set(self.pin, level);
        Ok(())
    }

    fn get(&mut self) -> Result<Level, SimError> {
        Ok(self.state.borrow().get(self.pin))
    }

    fn on_edge(&mut self, edge: Edge) -> Result<(), SimError> {
        let mut state = self.state.borrow_mut();
        state.subscriptions.insert(self.pin, edge);
        state.latches.insert(self.pin, false);
        Ok(())
    }

    fn edge_detected(&mut self) -> Result<bool, SimError> {
        let mut state = self.state.borrow_mut();
        Ok(state.latches.insert(self.pin, false).unwrap_or(false))
    }
}

pub struct SimDelay {
    state: Rc<RefCell<State>>,
}

impl Delay for SimDelay {
    fn delay(&mut self, duration: Duration) {
        let mut state = self.state.borrow_mut();
        state.delays.push(duration);
        state.now += duration;
    }
}

pub struct SimClock {
    state: Rc<RefCell<State>>,
}

impl Clock for SimClock {
    fn now(&self) -> Duration {
        self.state.borrow().now
    }
}
