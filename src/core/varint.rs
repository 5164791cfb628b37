//! # VarInt and String primitives
//!
//! Base-128 variable-length encoding of unsigned 32-bit values. Each byte
//! carries 7 data bits, least significant group first; the high bit marks a
//! continuation. A value never takes more than [`MAX_VARINT_LEN`] bytes.
//!
//! ```text
//! 0           -> 00
//! 127         -> 7F
//! 128         -> 80 01
//! 25565       -> DD C7 01
//! u32::MAX    -> FF FF FF FF 0F
//! ```
//!
//! Strings are a VarInt byte length followed by UTF-8 bytes.

use bytes::{Buf, BufMut};
use std::io;

use crate::error::{constants, ProtocolError, Result};

/// Maximum number of bytes a VarInt may occupy on the wire
pub const MAX_VARINT_LEN: usize = 5;

/// Number of bytes `value` occupies once encoded
#[inline]
pub fn varint_len(value: u32) -> usize {
    match value {
        0..=0x7F => 1,
        0x80..=0x3FFF => 2,
        0x4000..=0x1F_FFFF => 3,
        0x20_0000..=0x0FFF_FFFF => 4,
        _ => 5,
    }
}

/// Append `value` to `dst`
pub fn put_varint<B: BufMut>(dst: &mut B, mut value: u32) {
    loop {
        let byte = (value & 0x7F) as u8;
        value >>= 7;
        if value == 0 {
            dst.put_u8(byte);
            return;
        }
        dst.put_u8(byte | 0x80);
    }
}

/// Try to read a VarInt from the front of `src` without consuming it.
///
/// Returns `Ok(None)` when more bytes are needed, otherwise the value and
/// the number of bytes it occupied.
pub fn peek_varint(src: &[u8]) -> Result<Option<(u32, usize)>> {
    let mut value = 0u32;
    for (i, &byte) in src.iter().enumerate() {
        if i >= MAX_VARINT_LEN {
            return Err(ProtocolError::Frame(constants::ERR_VARINT_TOO_LONG.into()));
        }
        value |= u32::from(byte & 0x7F) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok(Some((value, i + 1)));
        }
    }
    if src.len() >= MAX_VARINT_LEN {
        return Err(ProtocolError::Frame(constants::ERR_VARINT_TOO_LONG.into()));
    }
    Ok(None)
}

/// Read and consume a VarInt from `src`.
///
/// Running out of bytes is an `UnexpectedEof` I/O error.
pub fn get_varint<B: Buf>(src: &mut B) -> Result<u32> {
    let mut value = 0u32;
    for i in 0..MAX_VARINT_LEN {
        if !src.has_remaining() {
            return Err(unexpected_eof());
        }
        let byte = src.get_u8();
        value |= u32::from(byte & 0x7F) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok(value);
        }
    }
    Err(ProtocolError::Frame(constants::ERR_VARINT_TOO_LONG.into()))
}

/// Append a length-prefixed UTF-8 string
pub fn put_string<B: BufMut>(dst: &mut B, value: &str) {
    put_varint(dst, value.len() as u32);
    dst.put_slice(value.as_bytes());
}

/// Read and consume a length-prefixed UTF-8 string
pub fn get_string<B: Buf>(src: &mut B) -> Result<String> {
    let len = get_varint(src)? as usize;
    if src.remaining() < len {
        return Err(unexpected_eof());
    }
    let mut raw = vec![0u8; len];
    src.copy_to_slice(&mut raw);
    String::from_utf8(raw).map_err(|_| ProtocolError::Decode(constants::ERR_INVALID_UTF8.into()))
}

pub(crate) fn unexpected_eof() -> ProtocolError {
    ProtocolError::Io(io::Error::from(io::ErrorKind::UnexpectedEof))
}
