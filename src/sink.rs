//! Console/log sink for bytes received from the target.
//!
//! The protocol doesn't interpret what the target sends.  A sink receives each
//! drained chunk as raw bytes and decides how to present it.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

#[cfg(feature = "async")]
use alloc::boxed::Box;
use alloc::vec::Vec;
#[cfg(feature = "async")]
use async_trait::async_trait;
#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

/// Receives chunks of inbound bytes.
pub trait Sink {
    fn write(&mut self, bytes: &[u8]);
}

/// Async version of [`Sink`], for output which may need to wait, such as a
/// USB or network console.
#[cfg(feature = "async")]
#[async_trait(?Send)]
pub trait AsyncSink {
    async fn write(&mut self, bytes: &[u8]);
}

/// Sink which logs each chunk at info level - as text if it is valid UTF-8,
/// otherwise as hex.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

// How a chunk is presented.
#[derive(Debug, PartialEq, Eq)]
enum Rendered<'a> {
    Text(&'a str),
    Hex(&'a [u8]),
}

impl<'a> Rendered<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        match core::str::from_utf8(bytes) {
            Ok(text) => Rendered::Text(text.trim_end_matches(['\r', '\n'])),
            Err(_) => Rendered::Hex(bytes),
        }
    }
}

impl LogSink {
    fn log(bytes: &[u8]) {
        match Rendered::new(bytes) {
            Rendered::Text(text) => info!("Target: {text}"),
            Rendered::Hex(bytes) => info!("Target: {bytes:02X?}"),
        }
    }
}

impl Sink for LogSink {
    fn write(&mut self, bytes: &[u8]) {
        Self::log(bytes);
    }
}

#[cfg(feature = "async")]
#[async_trait(?Send)]
impl AsyncSink for LogSink {
    async fn write(&mut self, bytes: &[u8]) {
        Self::log(bytes);
    }
}

/// Collects everything received.
impl Sink for Vec<u8> {
    fn write(&mut self, bytes: &[u8]) {
        self.extend_from_slice(bytes);
    }
}

#[cfg(feature = "async")]
#[async_trait(?Send)]
impl AsyncSink for Vec<u8> {
    async fn write(&mut self, bytes: &[u8]) {
        self.extend_from_slice(bytes);
    }
}
