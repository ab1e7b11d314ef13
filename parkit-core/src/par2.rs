//! PAR 2.0 packet bodies and volume naming.

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::hash::{md5, md5_concat, Md5};
use crate::packet::{write_packet, PacketType, SetId};
use crate::set::{BlockChecksum, FileDescriptor, RecoverySet};
use crate::wire::{bytes16, le_u32, le_u64, pad4, trim_nul};

pub const MAIN: PacketType = *b"PAR 2.0\0Main\0\0\0\0";
pub const FILE_DESC: PacketType = *b"PAR 2.0\0FileDesc";
pub const IFSC: PacketType = *b"PAR 2.0\0IFSC\0\0\0\0";
pub const RECOVERY_SLICE: PacketType = *b"PAR 2.0\0RecvSlic";
pub const CREATOR: PacketType = *b"PAR 2.0\0Creator\0";

pub const EXTENSION: &str = ".par2";

pub type FileId = [u8; 16];

/// File id = MD5(MD5-16k ‖ length ‖ name).
pub fn file_id(hash16k: &Md5, len: u64, name: &str) -> FileId {
    md5_concat(&[&hash16k[..], &len.to_le_bytes(), name.as_bytes()])
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MainPacket {
    pub block_size: u64,
    pub file_ids: Vec<FileId>,
    pub non_recovery_ids: Vec<FileId>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileDescPacket {
    pub file_id: FileId,
    pub hash: Md5,
    pub hash16k: Md5,
    pub len: u64,
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IfscPacket {
    pub file_id: FileId,
    pub checksums: Vec<BlockChecksum>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecoverySlicePacket {
    pub exponent: u32,
    pub data: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Body {
    Main(MainPacket),
    FileDesc(FileDescPacket),
    Ifsc(IfscPacket),
    RecoverySlice(RecoverySlicePacket),
    Creator(String),
}

impl Body {
    pub fn kind(&self) -> PacketType {
        match self {
            Body::Main(_) => MAIN,
            Body::FileDesc(_) => FILE_DESC,
            Body::Ifsc(_) => IFSC,
            Body::RecoverySlice(_) => RECOVERY_SLICE,
            Body::Creator(_) => CREATOR,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        match self {
            Body::Main(m) => {
                out.extend_from_slice(&m.block_size.to_le_bytes());
                out.extend_from_slice(&(m.file_ids.len() as u32).to_le_bytes());
                for id in m.file_ids.iter().chain(&m.non_recovery_ids) {
                    out.extend_from_slice(id);
                }
            }
            Body::FileDesc(d) => {
                out.extend_from_slice(&d.file_id);
                out.extend_from_slice(&d.hash);
                out.extend_from_slice(&d.hash16k);
                out.extend_from_slice(&d.len.to_le_bytes());
                out.extend_from_slice(d.name.as_bytes());
                pad4(&mut out);
            }
            Body::Ifsc(p) => {
                out.extend_from_slice(&p.file_id);
                for cs in &p.checksums {
                    out.extend_from_slice(&cs.md5);
                    out.extend_from_slice(&cs.crc32.to_le_bytes());
                }
            }
            Body::RecoverySlice(r) => {
                out.extend_from_slice(&r.exponent.to_le_bytes());
                out.extend_from_slice(&r.data);
            }
            Body::Creator(c) => {
                out.extend_from_slice(c.as_bytes());
                pad4(&mut out);
            }
        }
        out
    }

    /// Decodes a body of a known type; `Ok(None)` for unrecognised type tags.
    pub fn decode(kind: &PacketType, body: &[u8]) -> Result<Option<Body>> {
        let parsed = match *kind {
            MAIN => {
                let block_size = le_u64(body, 0, "main packet")?;
                let count = le_u32(body, 8, "main packet")? as usize;
                let ids = &body[12..];
                if ids.len() % 16 != 0 || ids.len() / 16 < count {
                    let detail = format!("{} file id bytes", ids.len());
                    return Err(Error::malformed("main packet", detail));
                }
                let all = (0..ids.len() / 16)
                    .map(|i| bytes16(ids, i * 16, "main packet"))
                    .collect::<Result<Vec<FileId>>>()?;
                Body::Main(MainPacket {
                    block_size,
                    file_ids: all[..count].to_vec(),
                    non_recovery_ids: all[count..].to_vec(),
                })
            }
            FILE_DESC => {
                let name = trim_nul(body.get(56..).unwrap_or_default());
                let name = String::from_utf8(name.to_vec())
                    .map_err(|e| Error::malformed("file description", e.to_string()))?;
                Body::FileDesc(FileDescPacket {
                    file_id: bytes16(body, 0, "file description")?,
                    hash: bytes16(body, 16, "file description")?,
                    hash16k: bytes16(body, 32, "file description")?,
                    len: le_u64(body, 48, "file description")?,
                    name,
                })
            }
            IFSC => {
                let file_id = bytes16(body, 0, "input slice checksums")?;
                let rest = &body[16..];
                if rest.len() % 20 != 0 {
                    let detail = format!("{} entry bytes", rest.len());
                    return Err(Error::malformed("input slice checksums", detail));
                }
                let mut checksums = Vec::with_capacity(rest.len() / 20);
                for i in 0..rest.len() / 20 {
                    checksums.push(BlockChecksum {
                        md5: bytes16(rest, i * 20, "input slice checksums")?,
                        crc32: le_u32(rest, i * 20 + 16, "input slice checksums")?,
                    });
                }
                Body::Ifsc(IfscPacket { file_id, checksums })
            }
            RECOVERY_SLICE => Body::RecoverySlice(RecoverySlicePacket {
                exponent: le_u32(body, 0, "recovery slice")?,
                data: body[4..].to_vec(),
            }),
            CREATOR => Body::Creator(String::from_utf8_lossy(trim_nul(body)).into_owned()),
            _ => return Ok(None),
        };
        Ok(Some(parsed))
    }

    pub fn to_packet(&self, set_id: &SetId) -> Vec<u8> {
        write_packet(set_id, &self.kind(), &self.encode())
    }
}

pub fn main_packet(set: &RecoverySet) -> MainPacket {
    MainPacket {
        block_size: set.block_size() as u64,
        file_ids: set.files().iter().map(|f| file_id(&f.hash16k, f.len, &f.name)).collect(),
        non_recovery_ids: Vec::new(),
    }
}

/// Recovery set id = MD5 of the main packet body.
pub fn set_id(main: &MainPacket) -> SetId {
    md5(&Body::Main(main.clone()).encode())
}

/// Main, file description, input slice checksum and creator packets for `set`.
pub fn critical_packets(set: &RecoverySet, creator: &str) -> Vec<u8> {
    let main = main_packet(set);
    let mut out = Body::Main(main.clone()).to_packet(&set.set_id);
    for (f, id) in set.files().iter().zip(&main.file_ids) {
        let desc = FileDescPacket {
            file_id: *id,
            hash: f.hash,
            hash16k: f.hash16k,
            len: f.len,
            name: f.name.clone(),
        };
        out.extend(Body::FileDesc(desc).to_packet(&set.set_id));
        let checksums = set.blocks()[f.blocks()]
            .iter()
            .map(|b| b.checksum.unwrap_or_else(|| BlockChecksum::of(&b.data)))
            .collect();
        out.extend(Body::Ifsc(IfscPacket { file_id: *id, checksums }).to_packet(&set.set_id));
    }
    out.extend(Body::Creator(creator.to_string()).to_packet(&set.set_id));
    out
}

/// Builds a descriptor from a file description and its (optional) checksum packet.
pub fn descriptor(desc: &FileDescPacket, ifsc: Option<&IfscPacket>) -> FileDescriptor {
    FileDescriptor {
        name: desc.name.clone(),
        len: desc.len,
        hash: desc.hash,
        hash16k: desc.hash16k,
        checksums: ifsc.map(|p| p.checksums.clone()),
    }
}

/// `foo.par2` → `foo`; other paths are used as-is.
pub fn stem(par_path: &Path) -> PathBuf {
    let s = par_path.to_string_lossy();
    match s.strip_suffix(EXTENSION) {
        Some(base) => PathBuf::from(base),
        None => par_path.to_path_buf(),
    }
}

/// Path of the recovery volume holding exponent `exponent`.
pub fn volume_path(par_path: &Path, exponent: u32) -> PathBuf {
    let stem = stem(par_path);
    let mut name = stem.into_os_string();
    name.push(format!(".vol{:02}+01{}", exponent, EXTENSION));
    PathBuf::from(name)
}
