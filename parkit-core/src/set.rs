//! In-memory recovery set: ordered input files, their fixed-size blocks and checksums.
//!
//! Global block order is file-list order, then block order within each file. That index is
//! the column of a block in every coefficient matrix, for encode and repair alike.

use std::collections::{BTreeMap, HashSet};
use std::ops::Range;
use std::path::PathBuf;

use serde::Serialize;

use crate::error::{Error, Result};
use crate::hash::{crc32, md5, md5_with_16k, Md5};
use crate::packet::SetId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockStatus {
    Intact,
    Corrupt,
    Missing,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Unchecked,
    Intact,
    Corrupt,
    Missing,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ParityStatus {
    Usable,
    Corrupt,
    ForeignSet,
}

/// One block of redundancy. `exponent` selects its row of the coefficient matrix.
#[derive(Clone, Debug)]
pub struct ParityBlock {
    pub exponent: u32,
    pub data: Vec<u8>,
    pub source: PathBuf,
    pub status: ParityStatus,
}

impl ParityBlock {
    pub fn is_usable(&self) -> bool {
        self.status == ParityStatus::Usable
    }
}

/// MD5 and CRC32 of one zero-padded block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockChecksum {
    pub md5: Md5,
    pub crc32: u32,
}

impl BlockChecksum {
    pub fn of(block: &[u8]) -> Self {
        Self { md5: md5(block), crc32: crc32(block) }
    }
}

#[derive(Clone, Debug)]
pub struct DataBlock {
    pub file: usize,
    pub index: usize,
    /// Byte offset of the block within its file.
    pub offset: u64,
    /// Bytes of real file data; the rest of `data` is padding.
    pub len: usize,
    pub checksum: Option<BlockChecksum>,
    /// Block bytes padded to the set's block size; empty while nothing usable is loaded.
    pub data: Vec<u8>,
    pub status: BlockStatus,
}

#[derive(Clone, Debug)]
pub struct InputFile {
    pub name: String,
    pub len: u64,
    pub hash: Md5,
    pub hash16k: Md5,
    pub first_block: usize,
    pub block_count: usize,
    pub status: FileStatus,
}

impl InputFile {
    pub fn blocks(&self) -> Range<usize> {
        self.first_block..self.first_block + self.block_count
    }
}

/// Expected metadata of a file, as recorded in a parity archive.
#[derive(Clone, Debug)]
pub struct FileDescriptor {
    pub name: String,
    pub len: u64,
    pub hash: Md5,
    pub hash16k: Md5,
    pub checksums: Option<Vec<BlockChecksum>>,
}

#[derive(Clone, Debug, Default)]
pub struct RecoverySet {
    block_size: Option<usize>,
    files: Vec<InputFile>,
    blocks: Vec<DataBlock>,
    names: HashSet<String>,
    pub set_id: SetId,
}

fn block_count(len: u64, block_size: usize) -> Result<usize> {
    let n = len.div_ceil(block_size as u64);
    usize::try_from(n)
        .map_err(|_| Error::AllocationTooLarge { block_size, block_count: usize::MAX })
}

fn padded(bytes: &[u8], block_size: usize) -> Vec<u8> {
    let mut v = vec![0u8; block_size];
    v[..bytes.len()].copy_from_slice(bytes);
    v
}

impl RecoverySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block size of the set, or 0 before the first file is added.
    pub fn block_size(&self) -> usize {
        self.block_size.unwrap_or(0)
    }

    pub fn files(&self) -> &[InputFile] {
        &self.files
    }

    pub fn blocks(&self) -> &[DataBlock] {
        &self.blocks
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn block_at(&self, index: usize) -> Option<&DataBlock> {
        self.blocks.get(index)
    }

    pub fn file_for(&self, index: usize) -> Option<&InputFile> {
        self.blocks.get(index).map(|b| &self.files[b.file])
    }

    fn fix_block_size(&mut self, block_size: usize) -> Result<()> {
        if block_size == 0 {
            return Err(Error::InvalidBlockSize(block_size));
        }
        match self.block_size {
            None => self.block_size = Some(block_size),
            Some(bs) if bs != block_size => {
                return Err(Error::InconsistentBlockSize { expected: bs, actual: block_size })
            }
            Some(_) => {}
        }
        Ok(())
    }

    fn push_file(
        &mut self,
        name: &str,
        len: u64,
        hash: Md5,
        hash16k: Md5,
        block_size: usize,
    ) -> Result<(usize, usize)> {
        if self.names.contains(name) {
            return Err(Error::DuplicateFileName(name.to_string()));
        }
        self.fix_block_size(block_size)?;
        let count = block_count(len, block_size)?;
        self.names.insert(name.to_string());
        let fi = self.files.len();
        self.files.push(InputFile {
            name: name.to_string(),
            len,
            hash,
            hash16k,
            first_block: self.blocks.len(),
            block_count: count,
            status: FileStatus::Unchecked,
        });
        Ok((fi, count))
    }

    /// Adds a file with its contents, splitting it into blocks of `block_size` bytes.
    pub fn add_file(&mut self, name: &str, data: &[u8], block_size: usize) -> Result<usize> {
        let (hash, hash16k) = md5_with_16k(data);
        let (fi, count) = self.push_file(name, data.len() as u64, hash, hash16k, block_size)?;
        for (i, chunk) in data.chunks(block_size).enumerate() {
            let block = padded(chunk, block_size);
            self.blocks.push(DataBlock {
                file: fi,
                index: self.blocks.len(),
                offset: (i * block_size) as u64,
                len: chunk.len(),
                checksum: Some(BlockChecksum::of(&block)),
                data: block,
                status: BlockStatus::Intact,
            });
        }
        debug_assert_eq!(self.blocks.len(), self.files[fi].first_block + count);
        self.files[fi].status = FileStatus::Intact;
        Ok(fi)
    }

    /// Adds the expected shape of a file without its contents. Blocks start out Missing.
    pub fn add_descriptor(&mut self, desc: FileDescriptor, block_size: usize) -> Result<usize> {
        // Validate before touching the set so a bad descriptor leaves it unchanged.
        let expected = block_count(desc.len, block_size.max(1))?;
        if let Some(cs) = &desc.checksums {
            if cs.len() != expected {
                return Err(Error::malformed(
                    "block checksums",
                    format!("{:?} has {} blocks but {} checksums", desc.name, expected, cs.len()),
                ));
            }
        }
        let (fi, count) =
            self.push_file(&desc.name, desc.len, desc.hash, desc.hash16k, block_size)?;
        for i in 0..count {
            let offset = (i as u64) * block_size as u64;
            let len = (desc.len - offset).min(block_size as u64) as usize;
            self.blocks.push(DataBlock {
                file: fi,
                index: self.blocks.len(),
                offset,
                len,
                checksum: desc.checksums.as_ref().map(|cs| cs[i]),
                data: Vec::new(),
                status: BlockStatus::Missing,
            });
        }
        Ok(fi)
    }

    /// Classifies a file and its blocks against on-disk contents (`None` when unreadable).
    pub fn load_file(&mut self, file: usize, contents: Option<&[u8]>) -> FileStatus {
        let bs = self.block_size();
        let range = self.files[file].blocks();
        let Some(bytes) = contents else {
            for b in &mut self.blocks[range] {
                b.data.clear();
                b.status = BlockStatus::Missing;
            }
            self.files[file].status = FileStatus::Missing;
            return FileStatus::Missing;
        };

        let f = &self.files[file];
        let (hash, hash16k) = md5_with_16k(bytes);
        let file_ok = bytes.len() as u64 == f.len && hash == f.hash && hash16k == f.hash16k;
        for b in &mut self.blocks[range] {
            let start = b.offset as usize;
            if start >= bytes.len() {
                b.data.clear();
                b.status = BlockStatus::Missing;
                continue;
            }
            let end = (start + b.len).min(bytes.len());
            b.data = padded(&bytes[start..end], bs);
            let ok = match &b.checksum {
                Some(cs) => *cs == BlockChecksum::of(&b.data),
                None => file_ok,
            };
            b.status = if ok { BlockStatus::Intact } else { BlockStatus::Corrupt };
        }
        let status = if file_ok { FileStatus::Intact } else { FileStatus::Corrupt };
        self.files[file].status = status;
        status
    }

    pub fn is_loaded(&self) -> bool {
        self.files.iter().all(|f| f.status != FileStatus::Unchecked)
    }

    pub fn is_intact(&self) -> bool {
        self.files.iter().all(|f| f.status == FileStatus::Intact)
    }

    /// Global indices of blocks that are Corrupt or Missing.
    pub fn damaged_blocks(&self) -> Vec<usize> {
        self.blocks.iter().filter(|b| b.status != BlockStatus::Intact).map(|b| b.index).collect()
    }

    /// Rebuilds a file's bytes from its blocks, taking reconstructed blocks from `replacements`.
    pub fn assemble_file(&self, file: usize, replacements: &BTreeMap<usize, Vec<u8>>) -> Vec<u8> {
        let f = &self.files[file];
        let mut out = Vec::with_capacity(f.len as usize);
        for b in &self.blocks[f.blocks()] {
            let src = replacements.get(&b.index).unwrap_or(&b.data);
            let take = b.len.min(src.len());
            out.extend_from_slice(&src[..take]);
            // A block with no usable bytes still occupies its length in the file.
            out.resize(out.len() + (b.len - take), 0);
        }
        out
    }
}
