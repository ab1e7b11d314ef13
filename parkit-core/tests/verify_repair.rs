use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use parkit_core::encode::{Encoder, EncoderConfig, Format};
use parkit_core::error::{Error, Result};
use parkit_core::fs::{DiskFs, FileSystem, MemFs};
use parkit_core::packet::{PacketLimits, HEADER_LEN};
use parkit_core::par1;
use parkit_core::par2::{self, Body, MainPacket, RecoverySlicePacket};
use parkit_core::progress::{DecoderDelegate, NoopDelegate};
use parkit_core::repair::RepairState;
use parkit_core::set::{FileStatus, ParityStatus};
use parkit_core::verify::Decoder;
use rand::{rngs::StdRng, Rng, SeedableRng};

const PAR2: &str = "data/set.par2";

fn random(len: usize, seed: u64) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..len).map(|_| rng.gen()).collect()
}

/// Three 100-byte files protected by three parity blocks of 64 bytes.
fn scenario(
    fs: &dyn FileSystem,
    dir: &Path,
    par: &Path,
    format: Format,
) -> Vec<(PathBuf, Vec<u8>)> {
    let files: Vec<(PathBuf, Vec<u8>)> = ["a.bin", "b.bin", "c.bin"]
        .iter()
        .enumerate()
        .map(|(i, n)| (dir.join(n), random(100, 10 + i as u64)))
        .collect();
    for (p, d) in &files {
        fs.write_file(p, d).unwrap();
    }
    let block_size = (format == Format::Par2).then_some(64);
    let cfg = EncoderConfig { format, block_size, parity_volumes: 3, ..EncoderConfig::default() };
    let paths = files.iter().map(|(p, _)| p.clone()).collect();
    let mut enc = Encoder::new(fs, &NoopDelegate, par, paths, cfg);
    enc.load_file_data().unwrap();
    enc.compute_parity_data().unwrap();
    enc.write().unwrap();
    files
}

fn mem_scenario() -> (MemFs, Vec<(PathBuf, Vec<u8>)>) {
    let fs = MemFs::new();
    let files = scenario(&fs, Path::new("data"), Path::new(PAR2), Format::Par2);
    (fs, files)
}

fn loaded<'a>(
    fs: &'a dyn FileSystem,
    delegate: &'a dyn DecoderDelegate,
    par: &str,
) -> Result<Decoder<'a>> {
    let mut dec = Decoder::open(fs, delegate, par, PacketLimits::default())?;
    dec.load_file_data()?;
    dec.load_parity_data()?;
    Ok(dec)
}

fn flip(fs: &MemFs, path: &str, at: usize) {
    assert!(fs.modify(path, |d| d[at] ^= 0x5A));
}

#[test]
fn intact_set_verifies() {
    let (fs, _) = mem_scenario();
    let dec = loaded(&fs, &NoopDelegate, PAR2).unwrap();
    assert!(dec.verify().unwrap());
    assert_eq!(dec.set().block_count(), 6);
    assert_eq!(dec.creator().map(|c| c.starts_with("parkit")), Some(true));
    assert!(dec.verify_parity().unwrap().is_empty());
    let report = dec.report();
    assert!(report.intact && report.repairable);
    assert_eq!(report.parity.usable, 3);
    assert!(report.files.iter().all(|f| f.status == FileStatus::Intact));

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["format"], "par2");
    assert_eq!(json["files"][1]["status"], "intact");
    assert_eq!(json["set_id"].as_str().map(str::len), Some(32));
}

#[test]
fn scenario_a_repairs_three_damaged_blocks() {
    let (fs, files) = mem_scenario();
    fs.insert("data/b.bin", vec![0u8; 100]);
    flip(&fs, "data/c.bin", 10);

    let mut dec = loaded(&fs, &NoopDelegate, PAR2).unwrap();
    assert!(!dec.verify().unwrap());
    let statuses: Vec<FileStatus> = dec.set().files().iter().map(|f| f.status).collect();
    assert_eq!(statuses, vec![FileStatus::Intact, FileStatus::Corrupt, FileStatus::Corrupt]);
    assert_eq!(dec.set().damaged_blocks(), vec![2, 3, 4]);
    assert_eq!(dec.report().damaged_blocks, 3);

    let report = dec.repair().unwrap();
    assert_eq!(report.repaired_files, vec!["b.bin", "c.bin"]);
    assert_eq!(report.reconstructed_blocks, 3);
    assert_eq!(dec.repair_state(), RepairState::Reconstructed);
    assert!(dec.verify().unwrap());
    for (p, d) in &files {
        assert_eq!(&fs.get(p).unwrap(), d);
    }
}

struct CountErrors(AtomicUsize);

impl DecoderDelegate for CountErrors {
    fn on_packet_error(&self, _path: &Path, _offset: usize, err: &Error) {
        assert!(matches!(err, Error::HashMismatch { .. }));
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn scenario_b_rejects_damaged_parity() {
    let (fs, _) = mem_scenario();
    fs.insert("data/b.bin", vec![0u8; 100]);
    flip(&fs, "data/c.bin", 10);
    for exp in 0..3 {
        // First packet of each volume is its recovery slice; skip header and exponent.
        let vol = par2::volume_path(Path::new(PAR2), exp);
        flip(&fs, vol.to_str().unwrap(), HEADER_LEN + 4 + 7);
    }

    let counter = CountErrors(AtomicUsize::new(0));
    let mut dec = loaded(&fs, &counter, PAR2).unwrap();
    assert_eq!(counter.0.load(Ordering::SeqCst), 3);
    assert_eq!(dec.report().parity.usable, 0);
    assert!(!dec.report().repairable);

    let res = dec.repair();
    assert!(matches!(res, Err(Error::InsufficientRedundancy { needed: 3, available: 0 })));
    assert_eq!(dec.repair_state(), RepairState::InsufficientRedundancy);
    assert_eq!(fs.get("data/b.bin").unwrap(), vec![0u8; 100]);
}

#[test]
fn one_block_too_many_writes_nothing() {
    let (fs, _) = mem_scenario();
    fs.insert("data/b.bin", vec![0u8; 100]);
    flip(&fs, "data/c.bin", 10);
    flip(&fs, "data/c.bin", 90);
    let damaged_c = fs.get("data/c.bin").unwrap();

    let mut dec = loaded(&fs, &NoopDelegate, PAR2).unwrap();
    let err = dec.repair().unwrap_err();
    assert!(matches!(err, Error::InsufficientRedundancy { needed: 4, available: 3 }));
    assert!(err.to_string().contains("1 more needed"));
    assert_eq!(fs.get("data/b.bin").unwrap(), vec![0u8; 100]);
    assert_eq!(fs.get("data/c.bin").unwrap(), damaged_c);
}

#[test]
fn missing_and_truncated_files_are_rebuilt() {
    let (fs, files) = mem_scenario();
    fs.remove("data/a.bin");
    assert!(fs.modify("data/c.bin", |d| d.truncate(64)));

    let mut dec = loaded(&fs, &NoopDelegate, PAR2).unwrap();
    let statuses: Vec<FileStatus> = dec.set().files().iter().map(|f| f.status).collect();
    assert_eq!(statuses, vec![FileStatus::Missing, FileStatus::Intact, FileStatus::Corrupt]);
    assert_eq!(dec.set().damaged_blocks(), vec![0, 1, 5]);

    dec.repair().unwrap();
    for (p, d) in &files {
        assert_eq!(&fs.get(p).unwrap(), d);
    }
}

#[test]
fn random_damage_up_to_parity_count_is_repaired() {
    fastrand::seed(0x1BADF00Du64);
    for _ in 0..8 {
        let (fs, files) = mem_scenario();
        let mut blocks: Vec<usize> = (0..6).collect();
        fastrand::shuffle(&mut blocks);
        let hit = fastrand::usize(1..=3);
        for &k in &blocks[..hit] {
            // Two blocks per file: 0..64 and 64..100.
            let at = if k % 2 == 0 { fastrand::usize(0..64) } else { fastrand::usize(64..100) };
            flip(&fs, files[k / 2].0.to_str().unwrap(), at);
        }

        let mut dec = loaded(&fs, &NoopDelegate, PAR2).unwrap();
        assert!(!dec.verify().unwrap());
        assert_eq!(dec.set().damaged_blocks().len(), hit);
        assert_eq!(dec.repair().unwrap().reconstructed_blocks, hit);
        for (p, d) in &files {
            assert_eq!(&fs.get(p).unwrap(), d);
        }
    }
}

#[test]
fn repair_of_intact_set_is_a_no_op() {
    let (fs, _) = mem_scenario();
    let mut dec = loaded(&fs, &NoopDelegate, PAR2).unwrap();
    let report = dec.repair().unwrap();
    assert!(report.repaired_files.is_empty());
    assert_eq!(report.reconstructed_blocks, 0);
}

#[test]
fn critical_packets_fall_back_to_volumes() {
    let (fs, _) = mem_scenario();
    fs.remove(PAR2);
    fs.insert("data/a.bin", vec![1u8; 100]);
    let mut dec = loaded(&fs, &NoopDelegate, PAR2).unwrap();
    assert_eq!(dec.set().files().len(), 3);
    dec.repair().unwrap();
    assert!(dec.verify().unwrap());
}

#[test]
fn foreign_volumes_are_not_used() {
    let (fs, _) = mem_scenario();
    fs.insert("other/x.bin", random(50, 99));
    let cfg = EncoderConfig { block_size: Some(64), parity_volumes: 1, ..EncoderConfig::default() };
    let paths = vec!["other/x.bin".into()];
    let mut enc = Encoder::new(&fs, &NoopDelegate, "other/x.par2", paths, cfg);
    enc.load_file_data().unwrap();
    enc.compute_parity_data().unwrap();
    enc.write().unwrap();
    fs.insert("data/set.vol09+01.par2", fs.get("other/x.vol00+01.par2").unwrap());

    let dec = loaded(&fs, &NoopDelegate, PAR2).unwrap();
    let parity = dec.parity().unwrap();
    assert_eq!(parity.iter().filter(|p| p.status == ParityStatus::ForeignSet).count(), 1);
    assert_eq!(dec.report().parity.usable, 3);
    assert_eq!(dec.report().parity.foreign_set, 1);
}

#[test]
fn verify_parity_finds_wrong_slices() {
    let (fs, _) = mem_scenario();
    let set_id = loaded(&fs, &NoopDelegate, PAR2).unwrap().set().set_id;
    let slice = RecoverySlicePacket { exponent: 1, data: vec![0; 64] };
    let forged = Body::RecoverySlice(slice).to_packet(&set_id);
    fs.insert("data/set.vol01+01.par2", forged);

    let dec = loaded(&fs, &NoopDelegate, PAR2).unwrap();
    assert!(dec.verify().unwrap());
    assert_eq!(dec.verify_parity().unwrap(), vec![1]);
}

#[test]
fn decoder_errors() {
    let (fs, _) = mem_scenario();
    let open = |p: &str| Decoder::open(&fs, &NoopDelegate, p, PacketLimits::default()).err();

    assert!(matches!(open("data/set.zip"), Some(Error::UnsupportedFormat(_))));
    fs.insert("junk.par2", b"not a parity file".to_vec());
    assert!(matches!(open("junk.par2"), Some(Error::NoRecoverySet(_))));

    let main = MainPacket { block_size: 64, file_ids: vec![[7; 16]], non_recovery_ids: vec![] };
    fs.insert("lonely.par2", Body::Main(main.clone()).to_packet(&par2::set_id(&main)));
    assert!(matches!(open("lonely.par2"), Some(Error::MissingFileDescription(_))));

    let dec = Decoder::open(&fs, &NoopDelegate, PAR2, PacketLimits::default()).unwrap();
    assert!(matches!(dec.verify(), Err(Error::NotLoaded(_))));
}

#[test]
fn repair_requires_parity() {
    let (fs, _) = mem_scenario();
    let mut dec = Decoder::open(&fs, &NoopDelegate, PAR2, PacketLimits::default()).unwrap();
    dec.load_file_data().unwrap();
    assert!(matches!(dec.repair(), Err(Error::NotLoaded(_))));
}

#[test]
fn par1_roundtrip() {
    let fs = MemFs::new();
    let files = scenario(&fs, Path::new("data"), Path::new("data/set.par"), Format::Par1);
    fs.remove("data/a.bin");
    fs.insert("data/c.bin", vec![0u8; 100]);

    let mut dec = loaded(&fs, &NoopDelegate, "data/set.par").unwrap();
    assert_eq!(dec.format(), Format::Par1);
    assert_eq!(dec.set().block_size(), 100);
    assert_eq!(dec.report().parity.usable, 3);
    assert_eq!(dec.set().damaged_blocks(), vec![0, 2]);

    let report = dec.repair().unwrap();
    assert_eq!(report.repaired_files, vec!["a.bin", "c.bin"]);
    for (p, d) in &files {
        assert_eq!(&fs.get(p).unwrap(), d);
    }
}

#[test]
fn par1_volume_damage_is_classified() {
    let fs = MemFs::new();
    scenario(&fs, Path::new("data"), Path::new("data/set.par"), Format::Par1);
    flip(&fs, "data/set.p01", 0x70);
    fs.remove("data/set.p03");

    let dec = loaded(&fs, &NoopDelegate, "data/set.par").unwrap();
    let parity = dec.parity().unwrap();
    assert_eq!(parity.len(), 2);
    assert_eq!(parity[0].status, ParityStatus::Corrupt);
    assert_eq!(parity[1].status, ParityStatus::Usable);
    assert_eq!(parity[1].exponent, 1);
}

#[test]
fn disk_roundtrip() {
    let td = tempfile::tempdir().unwrap();
    let dir = td.path().join("data");
    std::fs::create_dir(&dir).unwrap();
    let par = dir.join("set.par2");
    let files = scenario(&DiskFs, &dir, &par, Format::Par2);
    std::fs::remove_file(&files[1].0).unwrap();

    let par = par.to_str().unwrap().to_string();
    let mut dec = loaded(&DiskFs, &NoopDelegate, &par).unwrap();
    assert!(!dec.verify().unwrap());
    dec.repair().unwrap();
    for (p, d) in &files {
        assert_eq!(&std::fs::read(p).unwrap(), d);
    }
}

fn encode(fs: &MemFs, par: &str, paths: &[&str], cfg: EncoderConfig) {
    let paths = paths.iter().map(PathBuf::from).collect();
    let mut enc = Encoder::new(fs, &NoopDelegate, par, paths, cfg);
    enc.load_file_data().unwrap();
    enc.compute_parity_data().unwrap();
    enc.write().unwrap();
}

#[test]
fn nested_inputs_verify_and_repair_in_place() {
    let fs = MemFs::new();
    fs.insert("data/top.bin", random(300, 40));
    fs.insert("data/sub/inner.bin", random(200, 41));
    fs.insert("data/other/inner.bin", random(150, 42));
    let cfg = EncoderConfig { block_size: Some(64), ..EncoderConfig::default() };
    let inputs = ["data/top.bin", "data/sub/inner.bin", "data/other/inner.bin"];
    encode(&fs, PAR2, &inputs, cfg);

    let dec = loaded(&fs, &NoopDelegate, PAR2).unwrap();
    let names: Vec<&str> = dec.set().files().iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, vec!["top.bin", "sub/inner.bin", "other/inner.bin"]);
    assert!(dec.verify().unwrap());

    let original = fs.remove("data/sub/inner.bin").unwrap();
    let mut dec = loaded(&fs, &NoopDelegate, PAR2).unwrap();
    assert_eq!(dec.repair().unwrap().repaired_files, vec!["sub/inner.bin"]);
    assert_eq!(fs.get("data/sub/inner.bin").unwrap(), original);
    assert!(fs.get("data/inner.bin").is_none());
}

#[test]
fn parity_file_beside_the_data_directory() {
    let fs = MemFs::new();
    fs.insert("data/a.bin", random(120, 43));
    fs.insert("data/deep/b.bin", random(90, 44));
    let cfg = EncoderConfig { block_size: Some(32), parity_volumes: 2, ..EncoderConfig::default() };
    encode(&fs, "set.par2", &["data/a.bin", "data/deep/b.bin"], cfg);

    let original = fs.get("data/deep/b.bin").unwrap();
    flip(&fs, "data/deep/b.bin", 5);
    let mut dec = loaded(&fs, &NoopDelegate, "set.par2").unwrap();
    let statuses: Vec<FileStatus> = dec.set().files().iter().map(|f| f.status).collect();
    assert_eq!(statuses, vec![FileStatus::Intact, FileStatus::Corrupt]);
    dec.repair().unwrap();
    assert_eq!(fs.get("data/deep/b.bin").unwrap(), original);
}

#[test]
fn slices_larger_than_the_packet_limit_are_still_read() {
    let fs = MemFs::new();
    fs.insert("data/a.bin", random(3000, 45));
    fs.insert("data/b.bin", random(2000, 46));
    let cfg =
        EncoderConfig { block_size: Some(1024), parity_volumes: 2, ..EncoderConfig::default() };
    encode(&fs, PAR2, &["data/a.bin", "data/b.bin"], cfg);
    let original = fs.remove("data/b.bin").unwrap();

    // Large enough for every critical packet, far too small for a 1 KiB recovery slice.
    let limits = PacketLimits { max_packet_len: 512 };
    let mut dec = Decoder::open(&fs, &NoopDelegate, PAR2, limits).unwrap();
    dec.load_file_data().unwrap();
    dec.load_parity_data().unwrap();
    assert_eq!(dec.report().parity.usable, 2);
    dec.repair().unwrap();
    assert_eq!(fs.get("data/b.bin").unwrap(), original);
}

#[derive(Default)]
struct Par1Info {
    headers: std::sync::Mutex<Vec<String>>,
    comments: std::sync::Mutex<Vec<Vec<u8>>>,
}

impl DecoderDelegate for Par1Info {
    fn on_header_load(&self, header: &str) {
        self.headers.lock().unwrap().push(header.to_string());
    }

    fn on_comment_load(&self, comment: &[u8]) {
        self.comments.lock().unwrap().push(comment.to_vec());
    }
}

#[test]
fn par1_index_comment_is_reported() {
    let fs = MemFs::new();
    scenario(&fs, Path::new("data"), Path::new("data/set.par"), Format::Par1);
    let mut index = par1::read_volume(&fs.get("data/set.par").unwrap()).unwrap();
    assert!(index.data.is_empty());

    let info = Par1Info::default();
    let dec = Decoder::open(&fs, &info, "data/set.par", PacketLimits::default()).unwrap();
    assert!(dec.comment().is_none());
    assert_eq!(info.headers.lock().unwrap().len(), 1);
    assert!(info.comments.lock().unwrap().is_empty());

    index.data = b"weekly backup".to_vec();
    fs.insert("data/set.par", par1::write_volume(&index));
    let info = Par1Info::default();
    let dec = Decoder::open(&fs, &info, "data/set.par", PacketLimits::default()).unwrap();
    assert_eq!(dec.comment(), Some(&b"weekly backup"[..]));
    assert_eq!(*info.comments.lock().unwrap(), vec![b"weekly backup".to_vec()]);
    let headers = info.headers.lock().unwrap();
    assert!(headers[0].starts_with("volume 0 of set "), "{}", headers[0]);
    assert!(headers[0].contains("3 file entries"));
}
