//! Little-endian field access with explicit bounds checks.

use crate::error::{Error, Result};

fn field<'a>(buf: &'a [u8], at: usize, len: usize, what: &'static str) -> Result<&'a [u8]> {
    buf.get(at..at.saturating_add(len)).ok_or_else(|| {
        Error::malformed(what, format!("need {} bytes at offset {}, have {}", len, at, buf.len()))
    })
}

pub(crate) fn le_u32(buf: &[u8], at: usize, what: &'static str) -> Result<u32> {
    let mut b = [0u8; 4];
    b.copy_from_slice(field(buf, at, 4, what)?);
    Ok(u32::from_le_bytes(b))
}

pub(crate) fn le_u64(buf: &[u8], at: usize, what: &'static str) -> Result<u64> {
    let mut b = [0u8; 8];
    b.copy_from_slice(field(buf, at, 8, what)?);
    Ok(u64::from_le_bytes(b))
}

pub(crate) fn bytes16(buf: &[u8], at: usize, what: &'static str) -> Result<[u8; 16]> {
    let mut b = [0u8; 16];
    b.copy_from_slice(field(buf, at, 16, what)?);
    Ok(b)
}

/// Pads `buf` with zero bytes up to the next multiple of 4.
pub(crate) fn pad4(buf: &mut Vec<u8>) {
    let rem = buf.len() % 4;
    if rem != 0 {
        buf.resize(buf.len() + 4 - rem, 0);
    }
}

/// Strips trailing NUL padding from a fixed-width string field.
pub(crate) fn trim_nul(buf: &[u8]) -> &[u8] {
    let end = buf.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
    &buf[..end]
}
