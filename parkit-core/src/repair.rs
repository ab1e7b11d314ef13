//! Reconstruction of damaged data blocks from surviving data and parity.
//!
//! With `exps` the exponents of the chosen parity blocks:
//!
//! ```text
//! corrected = parity ⊕ V(exps, known bases) · known
//! unknown   = V(exps, unknown bases)⁻¹ · corrected
//! ```

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{debug, info};

use crate::encode::Format;
use crate::error::{Error, Result};
use crate::gf::{data_bases, Field, Gf16, Gf8};
use crate::hash::md5_with_16k;
use crate::matrix::Matrix;
use crate::path_safety;
use crate::set::{BlockStatus, FileStatus, ParityBlock, RecoverySet};
use crate::verify::Decoder;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairState {
    NotAttempted,
    GatheringBlocks,
    Solving,
    Reconstructed,
    InsufficientRedundancy,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct RepairReport {
    pub repaired_files: Vec<String>,
    pub reconstructed_blocks: usize,
}

/// Solves for the damaged blocks of one recovery set.
pub struct Repairer<'s> {
    set: &'s RecoverySet,
    parity: &'s [ParityBlock],
    state: RepairState,
}

fn xor_into(dst: &mut [u8], src: &[u8]) {
    for (d, s) in dst.iter_mut().zip(src) {
        *d ^= s;
    }
}

impl<'s> Repairer<'s> {
    pub fn new(set: &'s RecoverySet, parity: &'s [ParityBlock]) -> Self {
        Self { set, parity, state: RepairState::NotAttempted }
    }

    pub fn state(&self) -> RepairState {
        self.state
    }

    /// Returns reconstructed contents keyed by global block index. Nothing in the set is
    /// modified.
    pub fn reconstruct<F: Field>(&mut self) -> Result<BTreeMap<usize, Vec<u8>>> {
        let set = self.set;
        self.state = RepairState::GatheringBlocks;
        let (known, unknown): (Vec<usize>, Vec<usize>) = set
            .blocks()
            .iter()
            .map(|b| b.index)
            .partition(|&i| set.blocks()[i].status == BlockStatus::Intact);
        if unknown.is_empty() {
            self.state = RepairState::Reconstructed;
            return Ok(BTreeMap::new());
        }

        let mut usable: Vec<&ParityBlock> = self.parity.iter().filter(|p| p.is_usable()).collect();
        usable.sort_by_key(|p| p.exponent);
        usable.dedup_by_key(|p| p.exponent);
        if usable.len() < unknown.len() {
            self.state = RepairState::InsufficientRedundancy;
            return Err(Error::InsufficientRedundancy {
                needed: unknown.len(),
                available: usable.len(),
            });
        }
        usable.truncate(unknown.len());
        debug!(known = known.len(), unknown = unknown.len(), "gathered blocks");

        self.state = RepairState::Solving;
        let bases = data_bases::<F>(set.block_count())?;
        let exps: Vec<u32> = usable.iter().map(|p| p.exponent).collect();
        let pick = |idx: &[usize]| idx.iter().map(|&i| bases[i]).collect::<Vec<F>>();

        let mut corrected: Vec<Vec<u8>> = usable.iter().map(|p| p.data.clone()).collect();
        if !known.is_empty() {
            let known_data: Vec<&[u8]> =
                known.iter().map(|&i| set.blocks()[i].data.as_slice()).collect();
            let contribution = Matrix::vandermonde(&exps, &pick(&known)).mul_blocks(&known_data)?;
            for (c, k) in corrected.iter_mut().zip(&contribution) {
                xor_into(c, k);
            }
        }

        let inverse = Matrix::vandermonde(&exps, &pick(&unknown)).invert()?;
        let refs: Vec<&[u8]> = corrected.iter().map(Vec::as_slice).collect();
        let solved = inverse.mul_blocks(&refs)?;

        self.state = RepairState::Reconstructed;
        Ok(unknown.into_iter().zip(solved).collect())
    }
}

impl Decoder<'_> {
    /// Rebuilds every damaged file. Reconstructed contents are checked against the stored
    /// MD5 and MD5-16k before anything is written, and the written files are verified again.
    pub fn repair(&mut self) -> Result<RepairReport> {
        if !self.set.is_loaded() {
            return Err(Error::NotLoaded("data files"));
        }
        let parity = self.parity.as_deref().ok_or(Error::NotLoaded("parity data"))?;
        if self.set.is_intact() {
            self.repair_state = RepairState::Reconstructed;
            return Ok(RepairReport::default());
        }

        let mut repairer = Repairer::new(&self.set, parity);
        let res = match self.format {
            Format::Par1 => repairer.reconstruct::<Gf8>(),
            Format::Par2 => repairer.reconstruct::<Gf16>(),
        };
        self.repair_state = repairer.state();
        let blocks = res?;

        let dir = self.data_dir();
        let mut rebuilt = Vec::new();
        for (i, f) in self.set.files().iter().enumerate() {
            if f.status == FileStatus::Intact {
                continue;
            }
            let bytes = self.set.assemble_file(i, &blocks);
            let (hash, hash16k) = md5_with_16k(&bytes);
            if bytes.len() as u64 != f.len || hash != f.hash || hash16k != f.hash16k {
                return Err(Error::RepairVerificationFailed(format!(
                    "reconstructed {:?} does not match its stored checksum",
                    f.name
                )));
            }
            rebuilt.push((path_safety::resolve(&dir, &f.name)?, f.name.clone(), bytes));
        }

        let n = rebuilt.len();
        for (i, (path, _, bytes)) in rebuilt.iter().enumerate() {
            let res = self.fs.write_file(path, bytes).map_err(Error::io(path));
            self.delegate.on_data_file_write(i + 1, n, path, bytes.len(), res.as_ref().err());
            res?;
        }

        self.load_file_data()?;
        if !self.verify()? {
            let detail = "files are still damaged after writing".to_string();
            return Err(Error::RepairVerificationFailed(detail));
        }
        info!(files = n, blocks = blocks.len(), "repair complete");
        Ok(RepairReport {
            repaired_files: rebuilt.into_iter().map(|(_, name, _)| name).collect(),
            reconstructed_blocks: blocks.len(),
        })
    }
}
