use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

use parkit_core::fs::DiskFs;
use parkit_core::packet::PacketLimits;
use parkit_core::progress::LogDelegate;
use parkit_core::set::FileStatus;
use parkit_core::{Decoder, Encoder, EncoderConfig, Format};

#[derive(Parser)]
#[command(name = "parkit", version, about = "PAR1/PAR2 parity archives: create, verify, repair")]
struct Cli {
    /// More log output (debug level)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
    /// Only warnings and errors
    #[arg(short, long, global = true)]
    quiet: bool,
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Create a parity archive; the format follows the extension (.par2 or .par)
    #[command(visible_alias = "c")]
    Create {
        /// Number of parity volumes
        #[arg(short = 'n', long = "parity", default_value_t = 3)]
        parity: usize,
        /// PAR2 block size in bytes (multiple of 4); picked automatically when omitted
        #[arg(long)]
        block_size: Option<usize>,
        #[arg(long)]
        include: Vec<String>,
        #[arg(long)]
        exclude: Vec<String>,
        /// Parity file; every input must live below its directory
        par: PathBuf,
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
    },
    /// Verify the files protected by a parity archive
    #[command(visible_alias = "v")]
    Verify {
        #[arg(long)]
        json: bool,
        par: PathBuf,
    },
    /// Repair damaged or missing files from a parity archive
    #[command(visible_alias = "r")]
    Repair {
        #[arg(long)]
        json: bool,
        par: PathBuf,
    },
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);
    match cli.cmd {
        Cmd::Create { parity, block_size, include, exclude, par, inputs } => {
            create(&par, &inputs, parity, block_size, &include, &exclude)?;
            Ok(ExitCode::SUCCESS)
        }
        Cmd::Verify { json, par } => verify(&par, json),
        Cmd::Repair { json, par } => {
            repair(&par, json)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn init_logging(verbose: u8, quiet: bool) {
    let default = if quiet {
        "warn"
    } else if verbose > 0 {
        "debug"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn build_globset(includes: &[String], excludes: &[String]) -> Result<(GlobSet, GlobSet)> {
    let mut incb = GlobSetBuilder::new();
    let mut excb = GlobSetBuilder::new();
    if includes.is_empty() {
        incb.add(Glob::new("**/*")?);
    }
    for g in includes {
        incb.add(Glob::new(g).with_context(|| format!("bad include glob {:?}", g))?);
    }
    for g in excludes {
        excb.add(Glob::new(g).with_context(|| format!("bad exclude glob {:?}", g))?);
    }
    Ok((incb.build()?, excb.build()?))
}

/// Expands directories into the regular files below them, filtered by the include/exclude
/// globs (matched against paths relative to the walked directory). Plain files are kept as given.
fn list_files(inputs: &[PathBuf], inc: &GlobSet, exc: &GlobSet) -> Result<Vec<PathBuf>> {
    let mut v = vec![];
    for p in inputs {
        let md = fs::metadata(p).with_context(|| format!("stat {}", p.display()))?;
        if md.is_dir() {
            let mut found = vec![];
            for e in WalkDir::new(p) {
                let e = e.with_context(|| format!("walk {}", p.display()))?;
                if !e.file_type().is_file() {
                    continue;
                }
                let rp =
                    pathdiff::diff_paths(e.path(), p).unwrap_or_else(|| e.path().to_path_buf());
                let rp_str = rp.to_string_lossy().replace('\\', "/");
                if inc.is_match(&rp_str) && !exc.is_match(&rp_str) {
                    found.push(e.path().to_path_buf());
                }
            }
            found.sort();
            v.extend(found);
        } else if md.is_file() {
            v.push(p.clone());
        }
    }
    Ok(v)
}

/// Anchors a relative path at the current directory so inputs and the parity file compare
/// on equal terms.
fn absolute(p: &Path) -> Result<PathBuf> {
    if p.is_absolute() {
        return Ok(p.to_path_buf());
    }
    Ok(std::env::current_dir().context("current directory")?.join(p))
}

fn create(
    par: &Path,
    inputs: &[PathBuf],
    parity: usize,
    block_size: Option<usize>,
    include: &[String],
    exclude: &[String],
) -> Result<()> {
    let format = Format::from_path(par)?;
    let (inc, exc) = build_globset(include, exclude)?;
    let files = list_files(inputs, &inc, &exc)?
        .iter()
        .map(|f| absolute(f))
        .collect::<Result<Vec<_>>>()?;
    let cfg =
        EncoderConfig { format, block_size, parity_volumes: parity, ..EncoderConfig::default() };
    let mut enc = Encoder::new(&DiskFs, &LogDelegate, absolute(par)?, files, cfg);
    enc.load_file_data().context("load input files")?;
    enc.compute_parity_data().context("compute parity")?;
    for p in enc.write().with_context(|| format!("write {}", par.display()))? {
        println!("{}", p.display());
    }
    Ok(())
}

fn open(par: &Path) -> Result<Decoder<'static>> {
    let mut dec = Decoder::open(&DiskFs, &LogDelegate, par, PacketLimits::default())
        .with_context(|| format!("open {}", par.display()))?;
    dec.load_file_data().context("load data files")?;
    dec.load_parity_data().context("load parity volumes")?;
    Ok(dec)
}

fn status_name(s: FileStatus) -> &'static str {
    match s {
        FileStatus::Unchecked => "unchecked",
        FileStatus::Intact => "ok",
        FileStatus::Corrupt => "corrupt",
        FileStatus::Missing => "missing",
    }
}

fn verify(par: &Path, json: bool) -> Result<ExitCode> {
    let dec = open(par)?;
    let ok = dec.verify()?;
    let report = dec.report();
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for f in &report.files {
            println!(
                "{:<9} {} ({}/{} blocks damaged)",
                status_name(f.status),
                f.name,
                f.damaged_blocks,
                f.blocks
            );
        }
        println!(
            "parity: {} usable, {} corrupt, {} foreign",
            report.parity.usable, report.parity.corrupt, report.parity.foreign_set
        );
        if ok {
            println!("all files intact");
        } else if report.repairable {
            println!("{} damaged blocks; repair is possible", report.damaged_blocks);
        } else {
            println!(
                "{} damaged blocks; repair is not possible ({} usable parity blocks)",
                report.damaged_blocks, report.parity.usable
            );
        }
    }
    if ok {
        let bad = dec.verify_parity()?;
        if !bad.is_empty() {
            tracing::warn!("parity blocks {:?} disagree with the data", bad);
        }
    }
    Ok(if ok { ExitCode::SUCCESS } else { ExitCode::from(1) })
}

fn repair(par: &Path, json: bool) -> Result<()> {
    let mut dec = open(par)?;
    let report = dec.repair().with_context(|| format!("repair {}", par.display()))?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else if report.repaired_files.is_empty() {
        println!("all files intact");
    } else {
        for name in &report.repaired_files {
            println!("repaired {}", name);
        }
        println!("{} blocks reconstructed", report.reconstructed_blocks);
    }
    Ok(())
}
