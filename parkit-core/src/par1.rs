//! PAR 1.0 volume layout.
//!
//! Every volume (index and recovery alike) is one flat record:
//!
//! | offset | size | field                                     |
//! |--------|------|-------------------------------------------|
//! | 0x00   | 8    | magic `PAR\0\0\0\0\0`                     |
//! | 0x08   | 8    | version, 0x00010000                       |
//! | 0x10   | 16   | control hash, MD5 of bytes 0x20..EOF      |
//! | 0x20   | 16   | set hash, MD5 of the in-set file MD5s     |
//! | 0x30   | 8    | volume number (0 for the index)           |
//! | 0x38   | 8    | file count                                |
//! | 0x40   | 8    | file list offset                          |
//! | 0x48   | 8    | file list size                            |
//! | 0x50   | 8    | data offset                               |
//! | 0x58   | 8    | data size                                 |
//!
//! File entries follow the header; recovery data follows the file list.

use std::path::{Path, PathBuf};

use crate::encode::check_allocation;
use crate::error::{Error, Result};
use crate::hash::{md5, md5_concat, Md5};
use crate::set::{FileDescriptor, RecoverySet};
use crate::wire::{bytes16, le_u64};

pub const MAGIC: [u8; 8] = *b"PAR\0\0\0\0\0";
pub const VERSION: u64 = 0x0001_0000;
pub const HEADER_LEN: usize = 0x60;
pub const EXTENSION: &str = ".par";
/// Recovery volumes are numbered `.p01` through `.p99`.
pub const MAX_VOLUMES: usize = 99;

const CONTROL_HASH_OFF: usize = 0x10;
const CONTROL_FROM: usize = 0x20;
const ENTRY_FIXED_LEN: usize = 0x38;
const STATUS_IN_SET: u64 = 1;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileEntry {
    pub status: u64,
    pub len: u64,
    pub hash: Md5,
    pub hash16k: Md5,
    pub name: String,
}

impl FileEntry {
    pub fn in_set(&self) -> bool {
        self.status & STATUS_IN_SET != 0
    }

    pub fn descriptor(&self) -> FileDescriptor {
        FileDescriptor {
            name: self.name.clone(),
            len: self.len,
            hash: self.hash,
            hash16k: self.hash16k,
            checksums: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Volume {
    pub set_hash: Md5,
    pub number: u64,
    pub entries: Vec<FileEntry>,
    pub data: Vec<u8>,
}

/// File entries for every file of `set`, all marked as part of the parity set.
pub fn entries(set: &RecoverySet) -> Vec<FileEntry> {
    set.files()
        .iter()
        .map(|f| FileEntry {
            status: STATUS_IN_SET,
            len: f.len,
            hash: f.hash,
            hash16k: f.hash16k,
            name: f.name.clone(),
        })
        .collect()
}

/// MD5 over the concatenated MD5s of the in-set files, in list order.
pub fn set_hash(entries: &[FileEntry]) -> Md5 {
    let hashes: Vec<&[u8]> = entries.iter().filter(|e| e.in_set()).map(|e| &e.hash[..]).collect();
    md5_concat(&hashes)
}

/// Block size implied by a file list: the longest in-set file, at least 1. Fails when the
/// blocks of the set could not be held in memory.
pub fn block_size(entries: &[FileEntry]) -> Result<usize> {
    let in_set = || entries.iter().filter(|e| e.in_set());
    let max = in_set().map(|e| e.len).max().unwrap_or(0).max(1);
    let blocks = in_set().filter(|e| e.len > 0).count() as u64;
    let (block_size, _) = check_allocation(max, blocks)?;
    Ok(block_size)
}

fn encode_entry(e: &FileEntry, out: &mut Vec<u8>) {
    let name: Vec<u8> = e.name.encode_utf16().flat_map(u16::to_le_bytes).collect();
    out.extend_from_slice(&((ENTRY_FIXED_LEN + name.len()) as u64).to_le_bytes());
    out.extend_from_slice(&e.status.to_le_bytes());
    out.extend_from_slice(&e.len.to_le_bytes());
    out.extend_from_slice(&e.hash);
    out.extend_from_slice(&e.hash16k);
    out.extend_from_slice(&name);
}

fn decode_entry(buf: &[u8]) -> Result<(FileEntry, usize)> {
    let size = le_u64(buf, 0, "file entry")?;
    let size = usize::try_from(size)
        .ok()
        .filter(|&s| s >= ENTRY_FIXED_LEN && s <= buf.len() && (s - ENTRY_FIXED_LEN) % 2 == 0)
        .ok_or_else(|| Error::malformed("file entry", format!("entry size {}", size)))?;
    let units: Vec<u16> = buf[ENTRY_FIXED_LEN..size]
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect();
    let name =
        String::from_utf16(&units).map_err(|e| Error::malformed("file entry", e.to_string()))?;
    let entry = FileEntry {
        status: le_u64(buf, 8, "file entry")?,
        len: le_u64(buf, 16, "file entry")?,
        hash: bytes16(buf, 24, "file entry")?,
        hash16k: bytes16(buf, 40, "file entry")?,
        name: name.trim_end_matches('\0').to_string(),
    };
    Ok((entry, size))
}

pub fn write_volume(vol: &Volume) -> Vec<u8> {
    let mut list = Vec::new();
    for e in &vol.entries {
        encode_entry(e, &mut list);
    }
    let data_off = HEADER_LEN + list.len();
    let mut out = Vec::with_capacity(data_off + vol.data.len());
    out.extend_from_slice(&MAGIC);
    out.extend_from_slice(&VERSION.to_le_bytes());
    out.extend_from_slice(&[0u8; 16]);
    out.extend_from_slice(&vol.set_hash);
    for v in [
        vol.number,
        vol.entries.len() as u64,
        HEADER_LEN as u64,
        list.len() as u64,
        data_off as u64,
        vol.data.len() as u64,
    ] {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out.extend_from_slice(&list);
    out.extend_from_slice(&vol.data);
    let control = md5(&out[CONTROL_FROM..]);
    out[CONTROL_HASH_OFF..CONTROL_FROM].copy_from_slice(&control);
    out
}

fn region(buf: &[u8], off: u64, len: u64, what: &'static str) -> Result<std::ops::Range<usize>> {
    let end = off.checked_add(len).filter(|&e| e <= buf.len() as u64);
    match end {
        Some(end) => Ok(off as usize..end as usize),
        None => Err(Error::malformed(
            what,
            format!("{} bytes at offset {} exceed volume of {} bytes", len, off, buf.len()),
        )),
    }
}

/// Parses a volume. A control hash mismatch is reported as `HashMismatch`.
pub fn read_volume(buf: &[u8]) -> Result<Volume> {
    if buf.len() < HEADER_LEN {
        return Err(Error::ShortRead { needed: HEADER_LEN, available: buf.len() });
    }
    if buf[..MAGIC.len()] != MAGIC {
        return Err(Error::BadMagic);
    }
    let version = le_u64(buf, 0x08, "volume header")?;
    if version >> 16 != VERSION >> 16 {
        let detail = format!("unsupported version {:#x}", version);
        return Err(Error::malformed("volume header", detail));
    }
    let stored = bytes16(buf, CONTROL_HASH_OFF, "volume header")?;
    let actual = md5(&buf[CONTROL_FROM..]);
    if stored != actual {
        return Err(Error::HashMismatch { expected: stored, actual });
    }

    let set_hash = bytes16(buf, 0x20, "volume header")?;
    let number = le_u64(buf, 0x30, "volume header")?;
    let count = le_u64(buf, 0x38, "volume header")?;
    let field = |at| le_u64(buf, at, "volume header");
    let list = region(buf, field(0x40)?, field(0x48)?, "file list")?;
    let data = region(buf, field(0x50)?, field(0x58)?, "volume data")?;

    let mut entries = Vec::new();
    let mut rest = &buf[list];
    while !rest.is_empty() {
        let (entry, used) = decode_entry(rest)?;
        entries.push(entry);
        rest = &rest[used..];
    }
    if entries.len() as u64 != count {
        let detail = format!("header says {} files, found {}", count, entries.len());
        return Err(Error::malformed("file list", detail));
    }
    Ok(Volume { set_hash, number, entries, data: buf[data].to_vec() })
}

/// `foo.par` → `foo`; other paths are used as-is.
pub fn stem(par_path: &Path) -> PathBuf {
    let s = par_path.to_string_lossy();
    match s.strip_suffix(EXTENSION) {
        Some(base) => PathBuf::from(base),
        None => par_path.to_path_buf(),
    }
}

/// Path of recovery volume `number` (1-based), which carries exponent `number - 1`.
pub fn volume_path(par_path: &Path, number: usize) -> PathBuf {
    let mut name = stem(par_path).into_os_string();
    name.push(format!(".p{:02}", number));
    PathBuf::from(name)
}

