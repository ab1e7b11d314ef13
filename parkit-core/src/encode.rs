use std::path::{Component, Path, PathBuf};

use serde::Serialize;
use tracing::debug;

use crate::error::{Error, Result};
use crate::fs::FileSystem;
use crate::gf::{data_bases, Field, Gf16, Gf8};
use crate::matrix::Matrix;
use crate::par1;
use crate::par2::{self, Body, RecoverySlicePacket};
use crate::progress::EncoderDelegate;
use crate::set::RecoverySet;

/// Target number of data blocks when PAR2 picks its own block size.
const TARGET_BLOCKS: u64 = 2000;
/// Largest exponent count a PAR2 set can address.
pub const PAR2_MAX_PARITY: usize = 65535;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    Par1,
    Par2,
}

impl Format {
    /// `.par2` → PAR2, `.par` → PAR1.
    pub fn from_path(path: &Path) -> Result<Format> {
        let name = path.to_string_lossy();
        if name.ends_with(par2::EXTENSION) {
            Ok(Format::Par2)
        } else if name.ends_with(par1::EXTENSION) {
            Ok(Format::Par1)
        } else {
            Err(Error::UnsupportedFormat(path.to_path_buf()))
        }
    }

    pub fn max_parity(self) -> usize {
        match self {
            Format::Par1 => par1::MAX_VOLUMES,
            Format::Par2 => PAR2_MAX_PARITY,
        }
    }

    pub fn max_data_blocks(self) -> usize {
        match self {
            Format::Par1 => Gf8::MAX_DATA_BLOCKS,
            Format::Par2 => Gf16::MAX_DATA_BLOCKS,
        }
    }
}

#[derive(Clone, Debug)]
pub struct EncoderConfig {
    pub format: Format,
    /// PAR2 only; `None` picks one automatically. PAR1 always uses the longest file.
    pub block_size: Option<usize>,
    pub parity_volumes: usize,
    pub creator: String,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            format: Format::Par2,
            block_size: None,
            parity_volumes: 3,
            creator: concat!("parkit ", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// Parity rows `exponents` over every data block of `set`, in global block order.
pub(crate) fn compute_parity<F: Field>(
    set: &RecoverySet,
    exponents: &[u32],
) -> Result<Vec<Vec<u8>>> {
    if set.block_count() == 0 {
        return Ok(exponents.iter().map(|_| vec![0u8; set.block_size()]).collect());
    }
    let bases = data_bases::<F>(set.block_count())?;
    let blocks: Vec<&[u8]> = set.blocks().iter().map(|b| b.data.as_slice()).collect();
    Matrix::vandermonde(exponents, &bases).mul_blocks(&blocks)
}

fn blocks_for(lens: &[u64], block_size: u64) -> u64 {
    lens.iter().map(|l| l.div_ceil(block_size)).sum()
}

fn par2_block_size(lens: &[u64], configured: Option<usize>) -> Result<u64> {
    if let Some(bs) = configured {
        if bs == 0 || bs % 4 != 0 {
            return Err(Error::InvalidBlockSize(bs));
        }
        return Ok(bs as u64);
    }
    let non_empty = lens.iter().filter(|&&l| l > 0).count();
    if non_empty > Gf16::MAX_DATA_BLOCKS {
        return Err(Error::TooManyBlocks { count: non_empty, max: Gf16::MAX_DATA_BLOCKS });
    }
    let total: u64 = lens.iter().sum();
    let mut bs = total.div_ceil(TARGET_BLOCKS).max(1).next_multiple_of(4);
    // Per-file rounding can still overflow the field with many small files.
    while blocks_for(lens, bs) > Gf16::MAX_DATA_BLOCKS as u64 {
        bs = bs.saturating_mul(2);
    }
    Ok(bs)
}

/// `block_size × block_count` as addressable sizes, or `AllocationTooLarge`.
pub(crate) fn check_allocation(block_size: u64, block_count: u64) -> Result<(usize, usize)> {
    let too_large = || Error::AllocationTooLarge {
        block_size: usize::try_from(block_size).unwrap_or(usize::MAX),
        block_count: usize::try_from(block_count).unwrap_or(usize::MAX),
    };
    match block_size.checked_mul(block_count) {
        Some(total) if total <= isize::MAX as u64 => Ok((
            usize::try_from(block_size).map_err(|_| too_large())?,
            usize::try_from(block_count).map_err(|_| too_large())?,
        )),
        _ => Err(too_large()),
    }
}

/// `/`-separated name of `path` relative to `dir`. Paths that would need `..` have none.
fn archive_name(dir: &Path, path: &Path) -> Result<String> {
    let outside = || Error::OutsideArchiveDir { path: path.to_path_buf(), dir: dir.to_path_buf() };
    let rel = pathdiff::diff_paths(path, dir).ok_or_else(outside)?;
    let mut parts = Vec::new();
    for comp in rel.components() {
        match comp {
            Component::Normal(p) => parts.push(p.to_string_lossy()),
            Component::CurDir => {}
            _ => return Err(outside()),
        }
    }
    if parts.is_empty() {
        return Err(outside());
    }
    Ok(parts.join("/"))
}

/// Builds parity volumes for a list of files.
///
/// Files are recorded by their path relative to the directory of `par_path`, so every input
/// must live below it. Usage is strictly `load_file_data` → `compute_parity_data` → `write`.
pub struct Encoder<'a> {
    fs: &'a dyn FileSystem,
    delegate: &'a dyn EncoderDelegate,
    par_path: PathBuf,
    paths: Vec<PathBuf>,
    cfg: EncoderConfig,
    set: Option<RecoverySet>,
    parity: Option<Vec<Vec<u8>>>,
}

impl<'a> Encoder<'a> {
    pub fn new(
        fs: &'a dyn FileSystem,
        delegate: &'a dyn EncoderDelegate,
        par_path: impl Into<PathBuf>,
        paths: Vec<PathBuf>,
        cfg: EncoderConfig,
    ) -> Self {
        Self { fs, delegate, par_path: par_path.into(), paths, cfg, set: None, parity: None }
    }

    pub fn par_path(&self) -> &Path {
        &self.par_path
    }

    pub fn set(&self) -> Option<&RecoverySet> {
        self.set.as_ref()
    }

    pub fn parity(&self) -> Option<&[Vec<u8>]> {
        self.parity.as_deref()
    }

    pub fn load_file_data(&mut self) -> Result<()> {
        if self.paths.is_empty() {
            return Err(Error::NoInputFiles);
        }
        let max_parity = self.cfg.format.max_parity();
        if self.cfg.parity_volumes > max_parity {
            return Err(Error::TooManyParityVolumes {
                count: self.cfg.parity_volumes,
                max: max_parity,
            });
        }
        let dir = self.par_path.parent().unwrap_or_else(|| Path::new(""));
        let names = self.paths.iter().map(|p| archive_name(dir, p)).collect::<Result<Vec<_>>>()?;

        let n = self.paths.len();
        let mut contents = Vec::with_capacity(n);
        for (i, path) in self.paths.iter().enumerate() {
            match self.fs.read_file(path).map_err(Error::io(path)) {
                Ok(data) => {
                    self.delegate.on_data_file_load(i + 1, n, path, data.len(), None);
                    contents.push(data);
                }
                Err(e) => {
                    self.delegate.on_data_file_load(i + 1, n, path, 0, Some(&e));
                    return Err(e);
                }
            }
        }

        let lens: Vec<u64> = contents.iter().map(|c| c.len() as u64).collect();
        let block_size = match self.cfg.format {
            Format::Par1 => lens.iter().copied().max().unwrap_or(0).max(1),
            Format::Par2 => par2_block_size(&lens, self.cfg.block_size)?,
        };
        let count = blocks_for(&lens, block_size);
        let max = self.cfg.format.max_data_blocks();
        if count > max as u64 {
            let count = usize::try_from(count).unwrap_or(usize::MAX);
            return Err(Error::TooManyBlocks { count, max });
        }
        let (block_size, _) = check_allocation(block_size, count)?;
        check_allocation(block_size as u64, self.cfg.parity_volumes as u64)?;

        let mut set = RecoverySet::new();
        for (name, data) in names.iter().zip(&contents) {
            set.add_file(name, data, block_size)?;
        }
        set.set_id = match self.cfg.format {
            Format::Par1 => par1::set_hash(&par1::entries(&set)),
            Format::Par2 => par2::set_id(&par2::main_packet(&set)),
        };
        debug!(files = n, blocks = set.block_count(), block_size, "loaded recovery set");
        self.set = Some(set);
        self.parity = None;
        Ok(())
    }

    pub fn compute_parity_data(&mut self) -> Result<()> {
        let set = self.set.as_ref().ok_or(Error::NotLoaded("data files"))?;
        let exponents: Vec<u32> = (0..self.cfg.parity_volumes as u32).collect();
        let parity = match self.cfg.format {
            Format::Par1 => compute_parity::<Gf8>(set, &exponents)?,
            Format::Par2 => compute_parity::<Gf16>(set, &exponents)?,
        };
        debug!(parity = parity.len(), "computed parity blocks");
        self.parity = Some(parity);
        Ok(())
    }

    /// Writes the index file at `par_path` and one volume per parity block. Returns every
    /// path written, index first.
    pub fn write(&self) -> Result<Vec<PathBuf>> {
        let par_path = self.par_path.as_path();
        let set = self.set.as_ref().ok_or(Error::NotLoaded("data files"))?;
        let parity = self.parity.as_ref().ok_or(Error::NotLoaded("parity data"))?;

        let mut outputs: Vec<(PathBuf, usize, Vec<u8>)> = Vec::with_capacity(parity.len() + 1);
        match self.cfg.format {
            Format::Par2 => {
                let critical = par2::critical_packets(set, &self.cfg.creator);
                outputs.push((par_path.to_path_buf(), 0, critical.clone()));
                for (exp, data) in parity.iter().enumerate() {
                    let exponent = exp as u32;
                    let slice = RecoverySlicePacket { exponent, data: data.clone() };
                    let mut bytes = Body::RecoverySlice(slice).to_packet(&set.set_id);
                    bytes.extend_from_slice(&critical);
                    outputs.push((par2::volume_path(par_path, exponent), data.len(), bytes));
                }
            }
            Format::Par1 => {
                let entries = par1::entries(set);
                let index = par1::Volume {
                    set_hash: set.set_id,
                    number: 0,
                    entries: entries.clone(),
                    data: Vec::new(),
                };
                outputs.push((par_path.to_path_buf(), 0, par1::write_volume(&index)));
                for (i, data) in parity.iter().enumerate() {
                    let vol = par1::Volume {
                        set_hash: set.set_id,
                        number: i as u64 + 1,
                        entries: entries.clone(),
                        data: data.clone(),
                    };
                    let bytes = par1::write_volume(&vol);
                    outputs.push((par1::volume_path(par_path, i + 1), data.len(), bytes));
                }
            }
        }

        let n = outputs.len();
        let mut written = Vec::with_capacity(n);
        for (i, (path, data_len, bytes)) in outputs.into_iter().enumerate() {
            let res = self.fs.write_file(&path, &bytes).map_err(Error::io(&path));
            let err = res.as_ref().err();
            self.delegate.on_volume_file_write(i + 1, n, &path, data_len, bytes.len(), err);
            res?;
            written.push(path);
        }
        Ok(written)
    }
}
