//! Byte and word codec.
//!
//! Maps bytes to the levels of a port's 8 data lines, in the port's fixed bit
//! order, and 16-bit words to bytes, high byte first.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

use crate::line::Level;

/// Line levels for one byte, in port order.
pub type ByteLevels = [Level; 8];

/// Order in which a port's data lines are listed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum BitOrder {
    /// Lines listed bit 7 first, down to bit 0.
    #[default]
    MsbFirst,
    /// Lines listed bit 0 first, up to bit 7.
    LsbFirst,
}

impl BitOrder {
    // Bit number carried by the line at position `index`.
    const fn bit(self, index: usize) -> usize {
        match self {
            BitOrder::MsbFirst => 7 - index,
            BitOrder::LsbFirst => index,
        }
    }
}

pub fn encode(byte: u8, order: BitOrder) -> ByteLevels {
    core::array::from_fn(|i| Level::from_bit(byte & (1 << order.bit(i)) != 0))
}

pub fn decode(levels: &ByteLevels, order: BitOrder) -> u8 {
    levels
        .iter()
        .enumerate()
        .filter(|(_, level)| level.is_high())
        .fold(0u8, |byte, (i, _)| byte | (1 << order.bit(i)))
}

/// Split a word for the wire, high byte first.
pub const fn encode_word(word: u16) -> [u8; 2] {
    word.to_be_bytes()
}

pub const fn decode_word(hi: u8, lo: u8) -> u16 {
    u16::from_be_bytes([hi, lo])
}
