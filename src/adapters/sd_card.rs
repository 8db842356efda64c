//! SD card over the VFS.
//!
//! On target the FAT volume is mounted at [`MOUNT_POINT`] by the binary and
//! reached through `std::fs` like any other path; on the host any
//! directory can stand in for the card.  Card paths are absolute
//! (`/datalog.csv`) and never escape the root.

use std::fs::{self, File, OpenOptions};
use std::path::{Component, Path, PathBuf};
use std::time::UNIX_EPOCH;

use log::{debug, warn};

use crate::app::ports::{CardInfo, SdCard, SdEntry};
use crate::error::SdError;

/// VFS mount point of the card on target.
pub const MOUNT_POINT: &str = "/sdcard";

/// [`SdCard`] backed by a directory.
#[derive(Debug, Clone)]
pub struct FsSdCard {
    root: PathBuf,
    capacity_bytes: u64,
}

impl FsSdCard {
    pub fn new(root: impl Into<PathBuf>, capacity_bytes: u64) -> Self {
        Self {
            root: root.into(),
            capacity_bytes,
        }
    }

    /// Map a card path onto the filesystem.
    fn resolve(&self, path: &str) -> Result<PathBuf, SdError> {
        if !path.starts_with('/') {
            return Err(SdError::InvalidPath);
        }
        let rel = Path::new(path.trim_start_matches('/'));
        if rel
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            warn!("SdCard: rejected path '{path}'");
            return Err(SdError::InvalidPath);
        }
        Ok(self.root.join(rel))
    }

    fn used_bytes(dir: &Path) -> u64 {
        let Ok(entries) = fs::read_dir(dir) else {
            return 0;
        };
        entries
            .flatten()
            .map(|e| match e.metadata() {
                Ok(m) if m.is_dir() => Self::used_bytes(&e.path()),
                Ok(m) => m.len(),
                Err(_) => 0,
            })
            .sum()
    }
}

fn entry(name: String, meta: &fs::Metadata) -> SdEntry {
    let modified = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map_or(0, |d| d.as_secs() as i64);
    SdEntry {
        name,
        is_dir: meta.is_dir(),
        size: if meta.is_dir() { 0 } else { meta.len() },
        modified,
    }
}

impl SdCard for FsSdCard {
    type File = File;

    fn is_present(&self) -> bool {
        self.root.is_dir()
    }

    fn card_info(&self) -> Result<CardInfo, SdError> {
        if !self.is_present() {
            return Err(SdError::Unavailable);
        }
        Ok(CardInfo {
            card_type: "SDHC",
            size: self.capacity_bytes,
            total_bytes: self.capacity_bytes,
            used_bytes: Self::used_bytes(&self.root),
        })
    }

    fn stat(&self, path: &str) -> Result<SdEntry, SdError> {
        let full = self.resolve(path)?;
        let meta = fs::metadata(&full)?;
        let name = full
            .file_name()
            .map_or_else(|| "/".to_owned(), |n| n.to_string_lossy().into_owned());
        Ok(entry(name, &meta))
    }

    fn list(&self, dir: &str) -> Result<Vec<SdEntry>, SdError> {
        let full = self.resolve(dir)?;
        let mut out = Vec::new();
        for e in fs::read_dir(&full)? {
            let e = e?;
            let meta = e.metadata()?;
            out.push(entry(e.file_name().to_string_lossy().into_owned(), &meta));
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    fn open(&self, path: &str) -> Result<File, SdError> {
        let full = self.resolve(path)?;
        if full.is_dir() {
            return Err(SdError::IsDirectory);
        }
        Ok(File::open(full)?)
    }

    fn create(&self, path: &str) -> Result<File, SdError> {
        let full = self.resolve(path)?;
        if full.is_dir() {
            return Err(SdError::IsDirectory);
        }
        debug!("SdCard: create '{path}'");
        Ok(File::create(full)?)
    }

    fn append(&self, path: &str) -> Result<(File, bool), SdError> {
        let full = self.resolve(path)?;
        let created = !full.exists();
        let file = OpenOptions::new().create(true).append(true).open(full)?;
        Ok((file, created))
    }

    fn remove(&self, path: &str) -> Result<(), SdError> {
        let full = self.resolve(path)?;
        if fs::metadata(&full)?.is_dir() {
            return Err(SdError::IsDirectory);
        }
        fs::remove_file(full)?;
        debug!("SdCard: removed '{path}'");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};

    fn card(name: &str) -> FsSdCard {
        let dir = std::env::temp_dir().join(format!("emondc-sd-{name}-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        FsSdCard::new(dir, 1 << 30)
    }

    #[test]
    fn append_reports_creation_once() {
        let sd = card("append");
        let (mut f, created) = sd.append("/log.csv").unwrap();
        assert!(created);
        f.write_all(b"a\n").unwrap();
        let (mut f, created) = sd.append("/log.csv").unwrap();
        assert!(!created);
        f.write_all(b"b\n").unwrap();

        let mut s = String::new();
        sd.open("/log.csv").unwrap().read_to_string(&mut s).unwrap();
        assert_eq!(s, "a\nb\n");
    }

    #[test]
    fn rejects_escaping_paths() {
        let sd = card("escape");
        assert_eq!(sd.open("/../etc/passwd").unwrap_err(), SdError::InvalidPath);
        assert_eq!(sd.stat("relative").unwrap_err(), SdError::InvalidPath);
    }

    #[test]
    fn list_and_stat() {
        let sd = card("list");
        sd.create("/b.txt").unwrap().write_all(b"xyz").unwrap();
        fs::create_dir(sd.resolve("/a").unwrap()).unwrap();
        let names: Vec<_> = sd.list("/").unwrap().into_iter().map(|e| (e.name, e.is_dir)).collect();
        assert_eq!(names, vec![("a".to_owned(), true), ("b.txt".to_owned(), false)]);
        assert_eq!(sd.stat("/b.txt").unwrap().size, 3);
        assert_eq!(sd.card_info().unwrap().used_bytes, 3);
    }

    #[test]
    fn remove_refuses_directories() {
        let sd = card("remove");
        fs::create_dir(sd.resolve("/d").unwrap()).unwrap();
        assert_eq!(sd.remove("/d").unwrap_err(), SdError::IsDirectory);
        assert_eq!(sd.remove("/missing").unwrap_err(), SdError::NotFound);
    }

    #[test]
    fn missing_root_is_unavailable() {
        let sd = FsSdCard::new("/nonexistent/emondc-card", 0);
        assert!(!sd.is_present());
        assert_eq!(sd.card_info().unwrap_err(), SdError::Unavailable);
    }
}
