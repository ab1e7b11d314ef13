//! Reads a parity archive, classifies the files it protects and collects usable parity.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, warn};

use crate::encode::{compute_parity, Format};
use crate::error::{Error, Result};
use crate::fs::FileSystem;
use crate::gf::{Gf16, Gf8};
use crate::hash::hex;
use crate::packet::{PacketLimits, PacketScanner, PacketType, SetId, HEADER_LEN};
use crate::par1;
use crate::par2::{self, Body, FileDescPacket, FileId, IfscPacket, MainPacket};
use crate::path_safety;
use crate::progress::DecoderDelegate;
use crate::repair::RepairState;
use crate::set::{BlockStatus, FileStatus, ParityBlock, ParityStatus, RecoverySet};

/// A decoded PAR2 packet with its envelope fields.
struct Decoded {
    set_id: SetId,
    kind: PacketType,
    len: usize,
    body: Body,
}

#[derive(Clone, Debug, Serialize)]
pub struct FileReport {
    pub name: String,
    pub len: u64,
    pub status: FileStatus,
    pub blocks: usize,
    pub damaged_blocks: usize,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct ParityReport {
    pub usable: usize,
    pub corrupt: usize,
    pub foreign_set: usize,
}

#[derive(Clone, Debug, Serialize)]
pub struct VerifyReport {
    pub format: Format,
    pub set_id: String,
    pub block_size: usize,
    pub intact: bool,
    pub damaged_blocks: usize,
    pub repairable: bool,
    pub files: Vec<FileReport>,
    pub parity: ParityReport,
}

pub struct Decoder<'a> {
    pub(crate) fs: &'a dyn FileSystem,
    pub(crate) delegate: &'a dyn DecoderDelegate,
    pub(crate) par_path: PathBuf,
    pub(crate) format: Format,
    pub(crate) limits: PacketLimits,
    pub(crate) set: RecoverySet,
    pub(crate) creator: Option<String>,
    pub(crate) comment: Option<Vec<u8>>,
    pub(crate) parity: Option<Vec<ParityBlock>>,
    pub(crate) repair_state: RepairState,
}

impl<'a> Decoder<'a> {
    /// Builds the skeleton of the recovery set from the index file at `par_path`.
    pub fn open(
        fs: &'a dyn FileSystem,
        delegate: &'a dyn DecoderDelegate,
        par_path: impl Into<PathBuf>,
        limits: PacketLimits,
    ) -> Result<Self> {
        let par_path = par_path.into();
        let format = Format::from_path(&par_path)?;
        let mut dec = Decoder {
            fs,
            delegate,
            par_path,
            format,
            limits,
            set: RecoverySet::new(),
            creator: None,
            comment: None,
            parity: None,
            repair_state: RepairState::NotAttempted,
        };
        match format {
            Format::Par2 => dec.open_par2()?,
            Format::Par1 => dec.open_par1()?,
        }
        debug!(
            files = dec.set.files().len(),
            blocks = dec.set.block_count(),
            set_id = %hex(&dec.set.set_id),
            "opened recovery set"
        );
        Ok(dec)
    }

    pub fn format(&self) -> Format {
        self.format
    }

    pub fn par_path(&self) -> &Path {
        &self.par_path
    }

    pub fn set(&self) -> &RecoverySet {
        &self.set
    }

    pub fn creator(&self) -> Option<&str> {
        self.creator.as_deref()
    }

    /// PAR1 only: the comment stored in the index volume, if any.
    pub fn comment(&self) -> Option<&[u8]> {
        self.comment.as_deref()
    }

    /// Parity blocks found by `load_parity_data`, sorted by exponent.
    pub fn parity(&self) -> Option<&[ParityBlock]> {
        self.parity.as_deref()
    }

    pub fn repair_state(&self) -> RepairState {
        self.repair_state
    }

    pub(crate) fn data_dir(&self) -> PathBuf {
        match self.par_path.parent() {
            Some(p) => p.to_path_buf(),
            None => PathBuf::new(),
        }
    }

    fn read(&self, path: &Path) -> Result<Vec<u8>> {
        self.fs.read_file(path).map_err(Error::io(path))
    }

    /// Limits for reading volumes. A recovery slice of the selected set always fits, whatever
    /// the configured maximum.
    fn volume_limits(&self) -> PacketLimits {
        let slice = (HEADER_LEN + 4 + self.set.block_size()) as u64;
        PacketLimits { max_packet_len: self.limits.max_packet_len.max(slice) }
    }

    /// Decodes every packet of `buf`. Rejected packets go to the delegate.
    fn scan(&self, path: &Path, buf: &[u8], limits: PacketLimits) -> Vec<Decoded> {
        let mut out = Vec::new();
        for (offset, res) in PacketScanner::new(buf, limits) {
            let pkt = match res {
                Ok(p) => p,
                Err(e) => {
                    self.delegate.on_packet_error(path, offset, &e);
                    continue;
                }
            };
            let len = pkt.body.len();
            match Body::decode(&pkt.kind, &pkt.body) {
                Ok(Some(body)) => {
                    self.delegate.on_packet_load(&pkt.kind, len);
                    out.push(Decoded { set_id: pkt.set_id, kind: pkt.kind, len, body });
                }
                Ok(None) => self.delegate.on_packet_skip(&pkt.set_id, &pkt.kind, len),
                Err(e) => self.delegate.on_packet_error(path, offset, &e),
            }
        }
        out
    }

    fn par2_volume_paths(&self) -> Result<Vec<PathBuf>> {
        let stem = par2::stem(&self.par_path);
        self.fs.find_with_prefix_and_suffix(&stem, par2::EXTENSION).map_err(Error::io(&stem))
    }

    fn open_par2(&mut self) -> Result<()> {
        let mut packets = match self.read(&self.par_path) {
            Ok(buf) => self.scan(&self.par_path, &buf, self.limits),
            Err(e) => {
                warn!("cannot read index {:?}: {}", self.par_path, e);
                Vec::new()
            }
        };
        if select_main(&packets).is_none() {
            debug!("index has no usable main packet; reading critical packets from volumes");
            for path in self.par2_volume_paths()? {
                if path == self.par_path {
                    continue;
                }
                match self.read(&path) {
                    Ok(buf) => packets.extend(self.scan(&path, &buf, self.limits)),
                    Err(e) => warn!("cannot read volume {:?}: {}", path, e),
                }
            }
        }
        let (set_id, main) = select_main(&packets)
            .ok_or_else(|| Error::NoRecoverySet(self.par_path.clone()))?;

        let mut descs: HashMap<FileId, &FileDescPacket> = HashMap::new();
        let mut ifscs: HashMap<FileId, &IfscPacket> = HashMap::new();
        for p in &packets {
            if p.set_id != set_id {
                self.delegate.on_packet_skip(&p.set_id, &p.kind, p.len);
                continue;
            }
            match &p.body {
                Body::FileDesc(d) => {
                    descs.entry(d.file_id).or_insert(d);
                }
                Body::Ifsc(c) => {
                    ifscs.entry(c.file_id).or_insert(c);
                }
                Body::Creator(c) if self.creator.is_none() => self.creator = Some(c.clone()),
                _ => {}
            }
        }

        let block_size = usize::try_from(main.block_size)
            .ok()
            .filter(|bs| *bs > 0 && bs % 4 == 0)
            .ok_or_else(|| {
                Error::malformed("main packet", format!("slice size {}", main.block_size))
            })?;
        let n = main.file_ids.len();
        let mut set = RecoverySet::new();
        for (i, id) in main.file_ids.iter().enumerate() {
            let desc = descs.get(id).ok_or_else(|| Error::MissingFileDescription(hex(id)))?;
            path_safety::resolve(Path::new(""), &desc.name)?;
            let expected = desc.len.div_ceil(block_size as u64);
            let ifsc = ifscs.get(id).copied().filter(|c| {
                let ok = c.checksums.len() as u64 == expected;
                if !ok {
                    warn!(
                        "ignoring checksums for {:?}: {} entries for {} blocks",
                        desc.name,
                        c.checksums.len(),
                        expected
                    );
                }
                ok
            });
            set.add_descriptor(par2::descriptor(desc, ifsc), block_size)?;
            self.delegate.on_file_entry_load(i + 1, n, &desc.name);
        }
        set.set_id = set_id;
        self.set = set;
        Ok(())
    }

    fn open_par1(&mut self) -> Result<()> {
        let mut candidates = vec![self.par_path.clone()];
        candidates.extend((1..=par1::MAX_VOLUMES).map(|v| par1::volume_path(&self.par_path, v)));

        let mut found = None;
        for path in candidates {
            let buf = match self.read(&path) {
                Ok(b) => b,
                Err(e) if e.is_not_found() => continue,
                Err(e) => {
                    warn!("cannot read {:?}: {}", path, e);
                    continue;
                }
            };
            match par1::read_volume(&buf) {
                Ok(vol) => {
                    found = Some((path, vol));
                    break;
                }
                Err(e) => self.delegate.on_packet_error(&path, 0, &e),
            }
        }
        let (path, vol) = found.ok_or_else(|| Error::NoRecoverySet(self.par_path.clone()))?;

        let computed = par1::set_hash(&vol.entries);
        self.delegate.on_header_load(&format!(
            "volume {} of set {}, {} file entries, {} data bytes",
            vol.number,
            hex(&vol.set_hash),
            vol.entries.len(),
            vol.data.len()
        ));
        let data_len = vol.data.len();
        self.delegate.on_volume_file_load(&path, Some(&vol.set_hash), &computed, data_len, None);
        let block_size = par1::block_size(&vol.entries)?;
        let in_set: Vec<&par1::FileEntry> = vol.entries.iter().filter(|e| e.in_set()).collect();
        let n = in_set.len();
        let mut set = RecoverySet::new();
        for (i, entry) in in_set.into_iter().enumerate() {
            path_safety::resolve(Path::new(""), &entry.name)?;
            set.add_descriptor(entry.descriptor(), block_size)?;
            self.delegate.on_file_entry_load(i + 1, n, &entry.name);
        }
        set.set_id = computed;
        self.set = set;
        if vol.number == 0 && !vol.data.is_empty() {
            self.delegate.on_comment_load(&vol.data);
            self.comment = Some(vol.data);
        }
        Ok(())
    }

    /// Reads every protected file from the directory of the PAR file and classifies it.
    pub fn load_file_data(&mut self) -> Result<()> {
        let dir = self.data_dir();
        let n = self.set.files().len();
        for i in 0..n {
            let path = path_safety::resolve(&dir, &self.set.files()[i].name)?;
            match self.read(&path) {
                Ok(bytes) => {
                    let status = self.set.load_file(i, Some(&bytes));
                    self.delegate.on_data_file_load(i + 1, n, &path, bytes.len(), status, None);
                }
                Err(e) => {
                    let status = self.set.load_file(i, None);
                    self.delegate.on_data_file_load(i + 1, n, &path, 0, status, Some(&e));
                }
            }
        }
        Ok(())
    }

    /// Collects every parity block of the archive. Blocks that cannot take part in repair are
    /// kept with a non-usable status so they show up in reports.
    pub fn load_parity_data(&mut self) -> Result<()> {
        let mut parity = match self.format {
            Format::Par2 => self.load_par2_parity()?,
            Format::Par1 => self.load_par1_parity(),
        };
        parity.sort_by_key(|p| p.exponent);
        debug!(
            usable = parity.iter().filter(|p| p.is_usable()).count(),
            total = parity.len(),
            "loaded parity data"
        );
        self.parity = Some(parity);
        Ok(())
    }

    fn load_par2_parity(&self) -> Result<Vec<ParityBlock>> {
        let set_id = self.set.set_id;
        let bs = self.set.block_size();
        let limits = self.volume_limits();
        let mut usable: BTreeMap<u32, ParityBlock> = BTreeMap::new();
        let mut rejected = Vec::new();
        for path in self.par2_volume_paths()? {
            let buf = match self.read(&path) {
                Ok(b) => b,
                Err(e) => {
                    self.delegate.on_volume_file_load(&path, None, &set_id, 0, Some(&e));
                    continue;
                }
            };
            let packets = self.scan(&path, &buf, limits);
            let stored = packets.first().map(|p| p.set_id);
            let mut data_bytes = 0;
            for p in packets {
                let Body::RecoverySlice(slice) = p.body else { continue };
                let status = if p.set_id != set_id {
                    self.delegate.on_packet_skip(&p.set_id, &p.kind, p.len);
                    ParityStatus::ForeignSet
                } else if slice.data.len() != bs {
                    warn!(
                        "{:?}: recovery slice {} has {} bytes, expected {}",
                        path,
                        slice.exponent,
                        slice.data.len(),
                        bs
                    );
                    ParityStatus::Corrupt
                } else {
                    ParityStatus::Usable
                };
                let block = ParityBlock {
                    exponent: slice.exponent,
                    data: slice.data,
                    source: path.clone(),
                    status,
                };
                if status != ParityStatus::Usable {
                    rejected.push(block);
                } else if usable.contains_key(&block.exponent) {
                    debug!("{:?}: duplicate recovery slice {} ignored", path, block.exponent);
                } else {
                    data_bytes += block.data.len();
                    usable.insert(block.exponent, block);
                }
            }
            self.delegate.on_volume_file_load(&path, stored.as_ref(), &set_id, data_bytes, None);
        }
        Ok(usable.into_values().chain(rejected).collect())
    }

    fn load_par1_parity(&self) -> Vec<ParityBlock> {
        let set_id = self.set.set_id;
        let bs = self.set.block_size();
        let mut out = Vec::new();
        for number in 1..=par1::MAX_VOLUMES {
            let path = par1::volume_path(&self.par_path, number);
            let buf = match self.read(&path) {
                Ok(b) => b,
                Err(e) => {
                    self.delegate.on_volume_file_load(&path, None, &set_id, 0, Some(&e));
                    continue;
                }
            };
            let exponent = (number - 1) as u32;
            let (status, data, stored) = match par1::read_volume(&buf) {
                Err(e) => {
                    warn!("{:?}: rejecting volume: {}", path, e);
                    (ParityStatus::Corrupt, Vec::new(), None)
                }
                Ok(vol) if vol.set_hash != set_id => {
                    (ParityStatus::ForeignSet, vol.data, Some(vol.set_hash))
                }
                Ok(vol) if vol.number != number as u64 || vol.data.len() != bs => {
                    warn!(
                        "{:?}: volume number {} with {} data bytes, expected {} with {}",
                        path,
                        vol.number,
                        vol.data.len(),
                        number,
                        bs
                    );
                    (ParityStatus::Corrupt, vol.data, Some(vol.set_hash))
                }
                Ok(vol) => (ParityStatus::Usable, vol.data, Some(vol.set_hash)),
            };
            let data_bytes = if status == ParityStatus::Usable { data.len() } else { 0 };
            self.delegate.on_volume_file_load(&path, stored.as_ref(), &set_id, data_bytes, None);
            out.push(ParityBlock { exponent, data, source: path, status });
        }
        out
    }

    /// True iff every protected file is intact.
    pub fn verify(&self) -> Result<bool> {
        if !self.set.is_loaded() {
            return Err(Error::NotLoaded("data files"));
        }
        Ok(self.set.is_intact())
    }

    /// Recomputes every usable parity block from the data and returns the exponents whose
    /// stored contents disagree. Data that is not intact cannot vouch for parity, so nothing is
    /// checked in that case.
    pub fn verify_parity(&self) -> Result<Vec<u32>> {
        if !self.verify()? {
            return Ok(Vec::new());
        }
        let parity = self.parity.as_ref().ok_or(Error::NotLoaded("parity data"))?;
        let usable: Vec<&ParityBlock> = parity.iter().filter(|p| p.is_usable()).collect();
        let exponents: Vec<u32> = usable.iter().map(|p| p.exponent).collect();
        let expected = match self.format {
            Format::Par1 => compute_parity::<Gf8>(&self.set, &exponents)?,
            Format::Par2 => compute_parity::<Gf16>(&self.set, &exponents)?,
        };
        Ok(usable
            .iter()
            .zip(&expected)
            .filter(|(p, e)| p.data != **e)
            .map(|(p, _)| p.exponent)
            .collect())
    }

    pub fn report(&self) -> VerifyReport {
        let files: Vec<FileReport> = self
            .set
            .files()
            .iter()
            .map(|f| FileReport {
                name: f.name.clone(),
                len: f.len,
                status: f.status,
                blocks: f.block_count,
                damaged_blocks: self.set.blocks()[f.blocks()]
                    .iter()
                    .filter(|b| b.status != BlockStatus::Intact)
                    .count(),
            })
            .collect();
        let mut parity = ParityReport::default();
        for p in self.parity.iter().flatten() {
            match p.status {
                ParityStatus::Usable => parity.usable += 1,
                ParityStatus::Corrupt => parity.corrupt += 1,
                ParityStatus::ForeignSet => parity.foreign_set += 1,
            }
        }
        let damaged = files.iter().map(|f| f.damaged_blocks).sum();
        VerifyReport {
            format: self.format,
            set_id: hex(&self.set.set_id),
            block_size: self.set.block_size(),
            intact: self.set.is_loaded() && self.set.is_intact(),
            damaged_blocks: damaged,
            repairable: damaged <= parity.usable,
            files,
            parity,
        }
    }
}

/// The first main packet whose set id matches the MD5 of its own body.
fn select_main(packets: &[Decoded]) -> Option<(SetId, MainPacket)> {
    packets.iter().find_map(|p| match &p.body {
        Body::Main(m) if par2::set_id(m) == p.set_id => Some((p.set_id, m.clone())),
        _ => None,
    })
}
