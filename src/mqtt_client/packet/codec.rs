// MIT License
//
// Copyright (c) 2025 Takatoshi Kondo
//
// Permission is hereby granted, free of charge, to any person obtaining a copy
// of this software and associated documentation files (the "Software"), to deal
// in the Software without restriction, including without limitation the rights
// to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
// copies of the Software, and to permit persons to whom the Software is
// furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in all
// copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
// OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
// SOFTWARE.

//! Wire-level encoding and decoding primitives for MQTT 3.1.1.
//!
//! Covers the remaining-length variable integer, big-endian u16 fields,
//! length-prefixed UTF-8 strings and binary data, and the fixed header.

use super::{CodecError, PacketType};

/// Parsed MQTT fixed header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedHeader {
    pub packet_type: PacketType,
    pub flags: u8,
    pub remaining_length: u32,
    /// Length of the fixed header itself (type byte + varint).
    pub header_length: usize,
}

/// Read a variable-length integer (remaining length encoding).
///
/// Returns `(value, bytes_consumed)`, `Ok(None)` if more bytes are needed,
/// or an error for a malformed encoding (more than 4 continuation bytes).
pub fn read_variable_int(buf: &[u8]) -> Result<Option<(u32, usize)>, CodecError> {
    let mut multiplier = 1u32;
    let mut value = 0u32;

    for (i, &byte) in buf.iter().enumerate() {
        value += (byte & 0x7F) as u32 * multiplier;

        if multiplier > 128 * 128 * 128 {
            return Err(CodecError::Malformed("remaining length exceeds 4 bytes"));
        }

        if byte & 0x80 == 0 {
            return Ok(Some((value, i + 1)));
        }

        multiplier *= 128;
    }

    Ok(None)
}

/// Write a variable-length integer.
///
/// Returns the number of bytes written, or `None` if the buffer is too small.
pub fn write_variable_int(buf: &mut [u8], mut value: u32) -> Option<usize> {
    let mut i = 0;

    loop {
        if i >= buf.len() {
            return None;
        }

        let mut byte = (value % 128) as u8;
        value /= 128;

        if value > 0 {
            byte |= 0x80;
        }

        buf[i] = byte;
        i += 1;

        if value == 0 {
            break;
        }
    }

    Some(i)
}

/// Number of bytes a variable-length integer occupies on the wire.
pub const fn variable_int_len(value: u32) -> usize {
    if value < 128 {
        1
    } else if value < 128 * 128 {
        2
    } else if value < 128 * 128 * 128 {
        3
    } else {
        4
    }
}

/// Read a 2-byte big-endian u16.
pub fn read_u16(buf: &[u8]) -> Option<u16> {
    if buf.len() < 2 {
        return None;
    }
    Some(u16::from_be_bytes([buf[0], buf[1]]))
}

/// Write a 2-byte big-endian u16.
pub fn write_u16(buf: &mut [u8], value: u16) -> Option<()> {
    if buf.len() < 2 {
        return None;
    }
    buf[..2].copy_from_slice(&value.to_be_bytes());
    Some(())
}

/// Read a UTF-8 string as a slice (2-byte length prefix + data).
pub fn read_string_slice(buf: &[u8]) -> Result<(&str, usize), CodecError> {
    let len = read_u16(buf).ok_or(CodecError::Incomplete { needed: 2 })? as usize;

    if buf.len() < 2 + len {
        return Err(CodecError::Incomplete {
            needed: 2 + len - buf.len(),
        });
    }

    let s = core::str::from_utf8(&buf[2..2 + len]).map_err(|_| CodecError::InvalidUtf8)?;

    Ok((s, 2 + len))
}

/// Write a UTF-8 string (2-byte length prefix + data).
pub fn write_string(buf: &mut [u8], s: &str) -> Option<usize> {
    let bytes = s.as_bytes();
    let len = bytes.len();

    if len > u16::MAX as usize || buf.len() < 2 + len {
        return None;
    }

    write_u16(buf, len as u16)?;
    buf[2..2 + len].copy_from_slice(bytes);

    Some(2 + len)
}

/// Read binary data as a slice (2-byte length prefix + data).
pub fn read_binary_slice(buf: &[u8]) -> Result<(&[u8], usize), CodecError> {
    let len = read_u16(buf).ok_or(CodecError::Incomplete { needed: 2 })? as usize;

    if buf.len() < 2 + len {
        return Err(CodecError::Incomplete {
            needed: 2 + len - buf.len(),
        });
    }

    Ok((&buf[2..2 + len], 2 + len))
}

/// Write binary data (2-byte length prefix + data).
pub fn write_binary(buf: &mut [u8], data: &[u8]) -> Option<usize> {
    let len = data.len();

    if len > u16::MAX as usize || buf.len() < 2 + len {
        return None;
    }

    write_u16(buf, len as u16)?;
    buf[2..2 + len].copy_from_slice(data);

    Some(2 + len)
}

/// Parse a fixed header from the front of `buf`.
pub fn read_fixed_header(buf: &[u8]) -> Result<FixedHeader, CodecError> {
    if buf.is_empty() {
        return Err(CodecError::Incomplete { needed: 1 });
    }

    let first_byte = buf[0];
    let packet_type_byte = first_byte >> 4;
    let flags = first_byte & 0x0F;

    let packet_type = PacketType::from_u8(packet_type_byte)
        .ok_or(CodecError::InvalidPacketType(packet_type_byte))?;

    let (remaining_length, var_len) =
        read_variable_int(&buf[1..])?.ok_or(CodecError::Incomplete { needed: 1 })?;

    Ok(FixedHeader {
        packet_type,
        flags,
        remaining_length,
        header_length: 1 + var_len,
    })
}

/// Write a fixed header into `buf`.
pub fn write_fixed_header(
    buf: &mut [u8],
    packet_type: PacketType,
    flags: u8,
    remaining_length: u32,
) -> Option<usize> {
    if buf.is_empty() {
        return None;
    }

    buf[0] = ((packet_type as u8) << 4) | (flags & 0x0F);
    let var_len = write_variable_int(&mut buf[1..], remaining_length)?;

    Some(1 + var_len)
}
