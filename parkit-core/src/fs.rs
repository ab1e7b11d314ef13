//! Filesystem seam used by the encoder and decoder.
//!
//! `DiskFs` talks to the real filesystem; `MemFs` keeps files in memory for tests.

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use fs2::FileExt;

pub trait FileSystem: Send + Sync {
    fn read_file(&self, path: &Path) -> io::Result<Vec<u8>>;

    /// Creates or truncates `path` and writes `data` to it. Missing parent directories are
    /// created.
    fn write_file(&self, path: &Path, data: &[u8]) -> io::Result<()>;

    /// Same as globbing `prefix*suffix`, where the wildcard does not cross directories.
    /// Results are sorted.
    fn find_with_prefix_and_suffix(&self, prefix: &Path, suffix: &str) -> io::Result<Vec<PathBuf>>;
}

fn matches_glob(name: &str, prefix: &str, suffix: &str) -> bool {
    name.len() >= prefix.len() + suffix.len() && name.starts_with(prefix) && name.ends_with(suffix)
}

#[derive(Clone, Copy, Debug, Default)]
pub struct DiskFs;

impl FileSystem for DiskFs {
    fn read_file(&self, path: &Path) -> io::Result<Vec<u8>> {
        fs::read(path)
    }

    fn write_file(&self, path: &Path, data: &[u8]) -> io::Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        // Truncate only once the lock is held.
        let mut f = OpenOptions::new().write(true).create(true).truncate(false).open(path)?;
        f.lock_exclusive()?;
        let res = f.set_len(0).and_then(|_| f.write_all(data)).and_then(|_| f.sync_all());
        let unlock = FileExt::unlock(&f);
        res.and(unlock)
    }

    fn find_with_prefix_and_suffix(&self, prefix: &Path, suffix: &str) -> io::Result<Vec<PathBuf>> {
        let dir = match prefix.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let stem = prefix.file_name().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
        let mut out = Vec::new();
        for ent in fs::read_dir(&dir)? {
            let ent = ent?;
            if !ent.file_type()?.is_file() {
                continue;
            }
            let name = ent.file_name().to_string_lossy().into_owned();
            if matches_glob(&name, &stem, suffix) {
                out.push(prefix.with_file_name(name));
            }
        }
        out.sort();
        Ok(out)
    }
}

#[derive(Debug, Default)]
pub struct MemFs {
    files: Mutex<BTreeMap<PathBuf, Vec<u8>>>,
}

impl MemFs {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<PathBuf, Vec<u8>>> {
        // A panic while holding the lock cannot leave the map half-updated.
        self.files.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn insert(&self, path: impl Into<PathBuf>, data: impl Into<Vec<u8>>) {
        self.lock().insert(path.into(), data.into());
    }

    pub fn get(&self, path: impl AsRef<Path>) -> Option<Vec<u8>> {
        self.lock().get(path.as_ref()).cloned()
    }

    pub fn remove(&self, path: impl AsRef<Path>) -> Option<Vec<u8>> {
        self.lock().remove(path.as_ref())
    }

    /// Applies `f` to the stored bytes of `path`; returns false if there is no such file.
    pub fn modify(&self, path: impl AsRef<Path>, f: impl FnOnce(&mut Vec<u8>)) -> bool {
        match self.lock().get_mut(path.as_ref()) {
            Some(data) => {
                f(data);
                true
            }
            None => false,
        }
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        self.lock().keys().cloned().collect()
    }
}

impl FileSystem for MemFs {
    fn read_file(&self, path: &Path) -> io::Result<Vec<u8>> {
        self.lock()
            .get(path)
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("{}", path.display())))
    }

    fn write_file(&self, path: &Path, data: &[u8]) -> io::Result<()> {
        self.lock().insert(path.to_path_buf(), data.to_vec());
        Ok(())
    }

    fn find_with_prefix_and_suffix(&self, prefix: &Path, suffix: &str) -> io::Result<Vec<PathBuf>> {
        let stem = prefix.file_name().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
        let dir = prefix.parent().unwrap_or_else(|| Path::new(""));
        Ok(self
            .lock()
            .keys()
            .filter(|p| p.parent().unwrap_or_else(|| Path::new("")) == dir)
            .filter(|p| {
                p.file_name()
                    .map(|n| matches_glob(&n.to_string_lossy(), &stem, suffix))
                    .unwrap_or(false)
            })
            .cloned()
            .collect())
    }
}
