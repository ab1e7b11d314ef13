//! Generic PAR2 packet envelope.
//!
//! Header layout (little-endian, 64 bytes):
//!
//! | offset | size | field                                   |
//! |--------|------|-----------------------------------------|
//! | 0      | 8    | magic `PAR2\0PKT`                       |
//! | 8      | 8    | total length (header + body), % 4 == 0  |
//! | 16     | 16   | MD5(set id ‖ type ‖ body)               |
//! | 32     | 16   | recovery set id                         |
//! | 48     | 16   | packet type                             |

use crate::error::{Error, Result};
use crate::hash::{md5_concat, Md5};
use crate::wire::{bytes16, le_u64, pad4};

pub const MAGIC: [u8; 8] = *b"PAR2\0PKT";
pub const HEADER_LEN: usize = 64;

const LENGTH_OFF: usize = 8;
const HASH_OFF: usize = 16;
const SET_ID_OFF: usize = 32;
const TYPE_OFF: usize = 48;

pub type SetId = [u8; 16];
pub type PacketType = [u8; 16];

#[derive(Clone, Copy, Debug)]
pub struct PacketLimits {
    /// Largest packet length accepted from a header before any allocation happens.
    pub max_packet_len: u64,
}

impl Default for PacketLimits {
    fn default() -> Self {
        Self { max_packet_len: 1 << 30 }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Packet {
    pub set_id: SetId,
    pub kind: PacketType,
    pub body: Vec<u8>,
}

fn content_hash(set_id: &SetId, kind: &PacketType, body: &[u8]) -> Md5 {
    md5_concat(&[&set_id[..], &kind[..], body])
}

/// Parses one packet from the start of `buf`, returning it with the number of bytes consumed.
pub fn read_packet(buf: &[u8], limits: &PacketLimits) -> Result<(Packet, usize)> {
    if buf.len() < HEADER_LEN {
        return Err(Error::ShortRead { needed: HEADER_LEN, available: buf.len() });
    }
    if buf[..MAGIC.len()] != MAGIC {
        return Err(Error::BadMagic);
    }
    let length = le_u64(buf, LENGTH_OFF, "packet header")?;
    if length < HEADER_LEN as u64 || length % 4 != 0 || length > limits.max_packet_len {
        return Err(Error::BadLength(length));
    }
    let total = usize::try_from(length).map_err(|_| Error::BadLength(length))?;
    if buf.len() < total {
        return Err(Error::ShortRead { needed: total, available: buf.len() });
    }
    let stored = bytes16(buf, HASH_OFF, "packet header")?;
    let set_id = bytes16(buf, SET_ID_OFF, "packet header")?;
    let kind = bytes16(buf, TYPE_OFF, "packet header")?;
    let body = &buf[HEADER_LEN..total];
    let actual = content_hash(&set_id, &kind, body);
    if actual != stored {
        return Err(Error::HashMismatch { expected: stored, actual });
    }
    Ok((Packet { set_id, kind, body: body.to_vec() }, total))
}

/// Serialises a packet; the body is zero-padded to a multiple of 4 before hashing.
pub fn write_packet(set_id: &SetId, kind: &PacketType, body: &[u8]) -> Vec<u8> {
    let mut padded = body.to_vec();
    pad4(&mut padded);
    let length = (HEADER_LEN + padded.len()) as u64;
    let mut out = Vec::with_capacity(HEADER_LEN + padded.len());
    out.extend_from_slice(&MAGIC);
    out.extend_from_slice(&length.to_le_bytes());
    out.extend_from_slice(&content_hash(set_id, kind, &padded));
    out.extend_from_slice(set_id);
    out.extend_from_slice(kind);
    out.extend_from_slice(&padded);
    out
}

fn find_magic(buf: &[u8], from: usize) -> Option<usize> {
    buf.get(from..)?.windows(MAGIC.len()).position(|w| w == MAGIC).map(|p| p + from)
}

/// Walks a byte stream packet by packet.
///
/// Every item carries the offset it was read from. A packet that fails to parse, or a run of
/// bytes that is not a packet, yields one `Err` item; scanning then resumes at the next magic.
pub struct PacketScanner<'a> {
    buf: &'a [u8],
    pos: usize,
    limits: PacketLimits,
}

impl<'a> PacketScanner<'a> {
    pub fn new(buf: &'a [u8], limits: PacketLimits) -> Self {
        Self { buf, pos: 0, limits }
    }
}

impl Iterator for PacketScanner<'_> {
    type Item = (usize, Result<Packet>);

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.buf.len() {
            return None;
        }
        let at = self.pos;
        if !self.buf[at..].starts_with(&MAGIC) {
            self.pos = find_magic(self.buf, at).unwrap_or(self.buf.len());
            return Some((at, Err(Error::BadMagic)));
        }
        match read_packet(&self.buf[at..], &self.limits) {
            Ok((packet, used)) => {
                self.pos = at + used;
                Some((at, Ok(packet)))
            }
            Err(e) => {
                self.pos = find_magic(self.buf, at + 1).unwrap_or(self.buf.len());
                Some((at, Err(e)))
            }
        }
    }
}
