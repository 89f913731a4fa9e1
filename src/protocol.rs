//! Download-and-execute protocol.
//!
//! The target's loaders accept a single command, framed as:
//!
//! ```text
//! 0xAA | load_hi | load_lo | len_hi | len_lo | payload[0..len) | exec_hi | exec_lo
//! ```
//!
//! The target discards anything until it sees the `0xAA` prefix, so a frame
//! abandoned part way through is recovered from by simply sending the next
//! one.  Once the last byte arrives the target jumps to `exec_addr`, which
//! need not be within the payload.
//!
//! Images on disk use the same layout without the prefix - see [`Image`].

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

use alloc::vec::Vec;
use core::iter;
use core::sync::atomic::{AtomicBool, Ordering};
#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::bus::{BusOwner, BusToken};
use crate::codec::{decode_word, encode_word};
use crate::handshake::{Pia, ReadbackMismatch};
use crate::line::{Direction, Line};
use crate::time::Delay;
use crate::{Error, Result};

/// Byte synchronising the target to the start of a command.
pub const DOWNLOAD_PREFIX: u8 = 0xAA;

/// Bytes in a frame other than the payload.
pub const FRAME_OVERHEAD: usize = 1 + 2 + 2 + 2;

/// A download-and-execute command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame<'a> {
    load_addr: u16,
    payload: &'a [u8],
    exec_addr: u16,
}

impl<'a> Frame<'a> {
    /// Fails with [`Error::PayloadTooLarge`] if the payload length doesn't
    /// fit the 16-bit length field.
    pub fn new(load_addr: u16, payload: &'a [u8], exec_addr: u16) -> Result<Self> {
        if payload.len() > u16::MAX as usize {
            return Err(Error::PayloadTooLarge);
        }
        Ok(Self {
            load_addr,
            payload,
            exec_addr,
        })
    }

    pub fn load_addr(&self) -> u16 {
        self.load_addr
    }

    pub fn payload(&self) -> &'a [u8] {
        self.payload
    }

    pub fn exec_addr(&self) -> u16 {
        self.exec_addr
    }

    /// Total bytes on the wire.
    pub fn wire_len(&self) -> usize {
        FRAME_OVERHEAD + self.payload.len()
    }

    /// The frame's bytes, in wire order.
    pub fn bytes(&self) -> impl Iterator<Item = u8> + use<'a> {
        // Length checked by new()
        let len = self.payload.len() as u16;
        iter::once(DOWNLOAD_PREFIX)
            .chain(encode_word(self.load_addr))
            .chain(encode_word(len))
            .chain(self.payload.iter().copied())
            .chain(encode_word(self.exec_addr))
    }
}

/// An executable image, in the target's `.ex9` layout:
///
/// ```text
/// [2 bytes load_addr][2 bytes length][length bytes payload][2 bytes exec_addr]
/// ```
///
/// All values big-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Image<'a> {
    pub load_addr: u16,
    pub payload: &'a [u8],
    pub exec_addr: u16,
}

impl<'a> Image<'a> {
    /// Parse an image.
    ///
    /// # Errors
    ///
    /// - [`Error::Truncated`] - fewer than 4 bytes, so no header
    /// - [`Error::Format`] - the length field disagrees with the payload
    ///   present, including when the execution address is missing
    ///
    /// Anything after the execution address is ignored.
    pub fn from_bytes(bytes: &'a [u8]) -> Result<Self> {
        let [load_hi, load_lo, len_hi, len_lo, rest @ ..] = bytes else {
            return Err(Error::Truncated);
        };
        let load_addr = decode_word(*load_hi, *load_lo);
        let declared = decode_word(*len_hi, *len_lo);

        let len = declared as usize;
        let (payload, exec_addr) = match (rest.get(..len), rest.get(len..len + 2)) {
            (Some(payload), Some([exec_hi, exec_lo])) => {
                (payload, decode_word(*exec_hi, *exec_lo))
            }
            _ => {
                // A short payload is assumed to be followed by the exec
                // address.  Otherwise only the exec address is missing.
                let actual = if rest.len() < len {
                    rest.len().saturating_sub(2)
                } else {
                    len
                };
                error!("Image declares {declared} bytes, has {actual}");
                return Err(Error::Format { declared, actual });
            }
        };

        Ok(Self {
            load_addr,
            payload,
            exec_addr,
        })
    }

    pub fn frame(&self) -> Result<Frame<'a>> {
        Frame::new(self.load_addr, self.payload, self.exec_addr)
    }
}

/// Outcome of a completed download.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DownloadReport {
    /// Bytes sent, including the frame envelope.
    pub bytes_sent: usize,
    /// Read-back mismatches, with their offset in the frame.
    pub mismatches: Vec<(usize, ReadbackMismatch)>,
}

impl<L: Line, D: Delay> Pia<L, D> {
    /// Download `payload` to `load_addr`, then have the target execute from
    /// `exec_addr`.
    ///
    /// Read-back mismatches don't stop the download, they are collected in the
    /// returned [`DownloadReport`].
    pub fn dload_exec(
        &mut self,
        load_addr: u16,
        payload: &[u8],
        exec_addr: u16,
    ) -> Result<DownloadReport> {
        let frame = Frame::new(load_addr, payload, exec_addr)?;
        self.dload_exec_with(&frame, &AtomicBool::new(false), |_| Ok(()))
    }

    /// Download and execute an [`Image`].
    pub fn dload_exec_image(&mut self, image: &Image) -> Result<DownloadReport> {
        info!(
            "Image load address {:#06X} length {} exec address {:#06X}",
            image.load_addr,
            image.payload.len(),
            image.exec_addr
        );
        let frame = image.frame()?;
        self.dload_exec_with(&frame, &AtomicBool::new(false), |_| Ok(()))
    }

    /// Send `frame`, calling `between` after every byte.
    ///
    /// The bus is held for the whole frame, so `between` must not need it.
    /// It is given the engine's delay, e.g. for pulsing the target's
    /// interrupt line.
    ///
    /// `stop` is checked before every byte and while waiting for the target.
    /// Once it is set the download fails with [`Error::Interrupted`].
    ///
    /// On error the bus is released and the rest of the frame abandoned.
    pub fn dload_exec_with<F>(
        &mut self,
        frame: &Frame,
        stop: &AtomicBool,
        mut between: F,
    ) -> Result<DownloadReport>
    where
        F: FnMut(&mut D) -> Result<()>,
    {
        debug!(
            "Download {} bytes to {:#06X}, exec {:#06X} ({:?})",
            frame.payload().len(),
            frame.load_addr(),
            frame.exec_addr(),
            self.strategy()
        );

        let mut token = self.bus.claim(BusOwner::HostOutput, Direction::Output)?;
        let mut report = DownloadReport::default();

        let result = self.send_frame(&mut token, frame, stop, &mut report, &mut between);
        match result {
            Ok(()) => {
                self.bus.release(token)?;
                debug!("Download complete, {} bytes sent", report.bytes_sent);
                Ok(report)
            }
            Err(e) => {
                error!("Download abandoned after {} bytes: {e}", report.bytes_sent);
                // Keep the first error
                if let Err(release) = self.bus.release(token) {
                    error!("Bus release failed: {release}");
                }
                Err(e)
            }
        }
    }

    fn send_frame<F>(
        &mut self,
        token: &mut BusToken,
        frame: &Frame,
        stop: &AtomicBool,
        report: &mut DownloadReport,
        between: &mut F,
    ) -> Result<()>
    where
        F: FnMut(&mut D) -> Result<()>,
    {
        for (offset, byte) in frame.bytes().enumerate() {
            if stop.load(Ordering::Acquire) {
                return Err(Error::Interrupted);
            }
            if let Some(mismatch) = self.send_byte_cancellable(token, byte, stop)? {
                report.mismatches.push((offset, mismatch));
            }
            report.bytes_sent += 1;
            between(&mut self.delay)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handshake::{PULSE_TIMED_SETTLE, PiaConfig, SendStrategy};
    use crate::sim::{Pin, SimBoard};
    use alloc::vec;

    #[test]
    fn frame_wire_bytes() {
        let frame = Frame::new(0x0200, &[0x48, 0x49], 0x0200).unwrap();
        let bytes: Vec<u8> = frame.bytes().collect();
        assert_eq!(bytes, [0xAA, 0x02, 0x00, 0x00, 0x02, 0x48, 0x49, 0x02, 0x00]);
        assert_eq!(frame.wire_len(), 9);
    }

    #[test]
    fn empty_payload_frame() {
        let frame = Frame::new(0x1234, &[], 0xFFFE).unwrap();
        let bytes: Vec<u8> = frame.bytes().collect();
        assert_eq!(bytes, [0xAA, 0x12, 0x34, 0x00, 0x00, 0xFF, 0xFE]);
    }

    #[test]
    fn oversize_payload_rejected() {
        let payload = vec![0u8; 0x10000];
        assert_eq!(
            Frame::new(0, &payload, 0).unwrap_err(),
            Error::PayloadTooLarge
        );
    }

    #[test]
    fn image_parses() {
        let bytes = [0x40, 0x00, 0x00, 0x03, 1, 2, 3, 0x40, 0x02, 0xEE];
        let image = Image::from_bytes(&bytes).unwrap();
        assert_eq!(image.load_addr, 0x4000);
        assert_eq!(image.payload, &[1, 2, 3]);
        assert_eq!(image.exec_addr, 0x4002);
    }

    #[test]
    fn image_length_mismatch_rejected() {
        // Declares 4 bytes, has 1 plus exec address
        let bytes = [0x40, 0x00, 0x00, 0x04, 1, 0x40, 0x00];
        assert_eq!(
            Image::from_bytes(&bytes),
            Err(Error::Format {
                declared: 4,
                actual: 1
            })
        );

        // Whole payload, missing exec address
        let bytes = [0x40, 0x00, 0x00, 0x02, 1, 2];
        assert_eq!(
            Image::from_bytes(&bytes),
            Err(Error::Format {
                declared: 2,
                actual: 2
            })
        );

        // Half an exec address
        let bytes = [0x40, 0x00, 0x00, 0x02, 1, 2, 0x40];
        assert_eq!(
            Image::from_bytes(&bytes),
            Err(Error::Format {
                declared: 2,
                actual: 2
            })
        );

        assert_eq!(Image::from_bytes(&[0x40, 0x00, 0x00]), Err(Error::Truncated));
    }

    #[test]
    fn dload_exec_sends_exact_frame() {
        let board = SimBoard::new();
        board.set_acknowledge(false);
        let mut pia = board.pia(PiaConfig::default());
        pia.reset_target().unwrap();

        let report = pia.dload_exec(0x0200, &[0x48, 0x49], 0x0200).unwrap();
        assert_eq!(report.bytes_sent, 9);
        assert!(report.mismatches.is_empty());
        assert_eq!(
            board.received(),
            vec![0xAA, 0x02, 0x00, 0x00, 0x02, 0x48, 0x49, 0x02, 0x00]
        );
        assert_eq!(pia.bus().owner(), None);
        assert_eq!(pia.bus().direction(), Direction::Input);
    }

    #[test]
    fn mismatch_does_not_abort_download() {
        let board = SimBoard::new();
        board.set_echo(true);
        board.corrupt_echo(5, 0x80);
        let config = PiaConfig {
            readback: true,
            ..Default::default()
        };
        let mut pia = board.pia(config);
        pia.reset_target().unwrap();
        pia.enable_acknowledged().unwrap();

        let report = pia.dload_exec(0x0200, &[0x48, 0x49], 0x0200).unwrap();
        assert_eq!(report.bytes_sent, 9);
        assert_eq!(
            report.mismatches,
            vec![(
                5,
                ReadbackMismatch {
                    sent: 0x48,
                    received: 0xC8
                }
            )]
        );
        // Nothing resent
        assert_eq!(
            board.received(),
            vec![0xAA, 0x02, 0x00, 0x00, 0x02, 0x48, 0x49, 0x02, 0x00]
        );
    }

    #[test]
    fn strategy_switch_changes_only_waiting() {
        let board = SimBoard::new();
        let mut pia = board.pia(PiaConfig::default());
        pia.reset_target().unwrap();
        board.clear_delays();

        pia.dload_exec(0x0100, &[0xDE, 0xAD], 0x0100).unwrap();
        let pulse_timed = board.received();
        assert_eq!(board.delays(), vec![PULSE_TIMED_SETTLE; 9]);

        board.clear_received();
        board.clear_delays();
        pia.enable_acknowledged().unwrap();
        assert_eq!(pia.strategy(), SendStrategy::Acknowledged);

        pia.dload_exec(0x0100, &[0xDE, 0xAD], 0x0100).unwrap();
        assert_eq!(board.received(), pulse_timed);
        assert!(board.delays().is_empty());
    }

    #[test]
    fn download_fails_while_bus_owned() {
        let board = SimBoard::new();
        let mut pia = board.pia(PiaConfig::default());
        pia.reset_target().unwrap();

        let token = pia
            .bus_mut()
            .claim(BusOwner::PeerInput, Direction::Input)
            .unwrap();
        assert_eq!(
            pia.dload_exec(0x0200, &[1], 0x0200),
            Err(Error::Contention(BusOwner::PeerInput))
        );
        assert!(board.received().is_empty());
        pia.bus_mut().release(token).unwrap();
    }

    #[test]
    fn between_hook_runs_per_byte_and_aborts_on_error() {
        let board = SimBoard::new();
        let mut pia = board.pia(PiaConfig::default());
        pia.reset_target().unwrap();

        let frame = Frame::new(0x0200, &[1, 2, 3], 0x0200).unwrap();
        let stop = AtomicBool::new(false);
        let mut calls = 0;
        pia.dload_exec_with(&frame, &stop, |_| {
            calls += 1;
            Ok(())
        })
        .unwrap();
        assert_eq!(calls, frame.wire_len());

        board.clear_received();
        let mut calls = 0;
        let result = pia.dload_exec_with(&frame, &stop, |_| {
            calls += 1;
            if calls == 3 {
                Err(Error::Interrupted)
            } else {
                Ok(())
            }
        });
        assert_eq!(result, Err(Error::Interrupted));
        assert_eq!(board.received(), vec![0xAA, 0x02, 0x00]);
        assert_eq!(pia.bus().owner(), None);
        assert_eq!(board.level(Pin::CsOut), crate::line::Level::High);
    }

    #[test]
    fn image_download() {
        let board = SimBoard::new();
        let mut pia = board.pia(PiaConfig::default());
        pia.reset_target().unwrap();

        let bytes = [0x10, 0x00, 0x00, 0x01, 0x39, 0x10, 0x00];
        let image = Image::from_bytes(&bytes).unwrap();
        pia.dload_exec_image(&image).unwrap();
        assert_eq!(
            board.received(),
            vec![0xAA, 0x10, 0x00, 0x00, 0x01, 0x39, 0x10, 0x00]
        );
    }

    #[test]
    fn stop_abandons_frame() {
        let board = SimBoard::new();
        let mut pia = board.pia(PiaConfig::default());
        pia.reset_target().unwrap();
        pia.enable_acknowledged().unwrap();

        let frame = Frame::new(0x0200, &[1, 2, 3], 0x0200).unwrap();
        let stop = AtomicBool::new(false);
        let mut calls = 0;
        let result = pia.dload_exec_with(&frame, &stop, |_| {
            calls += 1;
            if calls == 4 {
                stop.store(true, Ordering::Release);
            }
            Ok(())
        });
        assert_eq!(result, Err(Error::Interrupted));
        assert_eq!(board.received(), vec![0xAA, 0x02, 0x00, 0x00]);
        assert_eq!(pia.bus().owner(), None);
        assert_eq!(pia.bus().direction(), Direction::Input);
        assert_eq!(board.level(Pin::CsOut), crate::line::Level::High);
        assert_eq!(board.level(Pin::OutReady), crate::line::Level::High);
    }

    #[test]
    fn stop_already_set_sends_nothing() {
        let board = SimBoard::new();
        let mut pia = board.pia(PiaConfig::default());
        pia.reset_target().unwrap();

        let frame = Frame::new(0x0200, &[0u8; 64], 0x0200).unwrap();
        let stop = AtomicBool::new(true);
        assert_eq!(
            pia.dload_exec_with(&frame, &stop, |_| Ok(())),
            Err(Error::Interrupted)
        );
        assert!(board.received().is_empty());
        assert_eq!(pia.bus().owner(), None);
    }
}
