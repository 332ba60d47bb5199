//! Compact encoding for term position lists stored in the postings table.
//!
//! Positions are strictly increasing within a section, so they are stored
//! as varint deltas.

use anyhow::{bail, Result};

/// Encode a u32 as a variable-length integer
fn encode_varint(mut value: u32, buf: &mut Vec<u8>) {
    loop {
        if value < 0x80 {
            buf.push(value as u8);
            break;
        }
        buf.push((value as u8) | 0x80);
        value >>= 7;
    }
}

/// Decode a variable-length integer from a slice.
/// Returns (value, bytes_consumed)
fn decode_varint(buf: &[u8]) -> Option<(u32, usize)> {
    let mut result: u32 = 0;
    let mut shift = 0;

    for (i, &byte) in buf.iter().enumerate() {
        if shift >= 32 {
            return None;
        }

        result |= ((byte & 0x7F) as u32) << shift;

        if byte & 0x80 == 0 {
            return Some((result, i + 1));
        }

        shift += 7;
    }

    None
}

/// Encode a sorted position list as varint deltas.
pub fn encode_positions(positions: &[u32]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(positions.len() * 2);
    let mut prev = 0u32;
    for &position in positions {
        encode_varint(position.saturating_sub(prev), &mut buf);
        prev = position;
    }
    buf
}

/// Decode a position list. A truncated varint means the blob was damaged,
/// which is reported rather than silently shortened.
pub fn decode_positions(buf: &[u8]) -> Result<Vec<u32>> {
    let mut result = Vec::new();
    let mut prev = 0u32;
    let mut pos = 0;

    while pos < buf.len() {
        match decode_varint(&buf[pos..]) {
            Some((delta, consumed)) => {
                prev = prev.saturating_add(delta);
                result.push(prev);
                pos += consumed;
            }
            None => bail!("truncated position list at byte {}", pos),
        }
    }

    Ok(result)
}
