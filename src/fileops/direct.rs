//! Ordinary-file-API tier.
//!
//! The plain std::fs implementation used wherever the process can address
//! a path directly. Copy and move create missing parent directories and
//! always replace an existing destination.

use std::fs;
use std::io::{BufWriter, Read, Write};
use std::path::Path;

use tracing::warn;

use super::{FileEntry, FileOps};
use crate::hash;

pub struct DirectFileOps;

fn ensure_parent(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.exists() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

fn mtime_millis(meta: &fs::Metadata) -> i64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

impl FileOps for DirectFileOps {
    fn delete(&self, path: &Path) -> bool {
        let result = if path.is_dir() {
            fs::remove_dir_all(path)
        } else {
            fs::remove_file(path)
        };
        match result {
            Ok(()) => true,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => true,
            Err(err) => {
                warn!("delete {} failed: {err}", path.display());
                false
            }
        }
    }

    fn copy(&self, src: &Path, dest: &Path) -> bool {
        let run = || -> std::io::Result<()> {
            ensure_parent(dest)?;
            if dest.exists() {
                fs::remove_file(dest)?;
            }
            fs::copy(src, dest)?;
            Ok(())
        };
        match run() {
            Ok(()) => true,
            Err(err) => {
                warn!("copy {} -> {} failed: {err}", src.display(), dest.display());
                false
            }
        }
    }

    fn move_file(&self, src: &Path, dest: &Path) -> bool {
        let run = || -> std::io::Result<()> {
            ensure_parent(dest)?;
            if dest.exists() {
                fs::remove_file(dest)?;
            }
            match fs::rename(src, dest) {
                Ok(()) => Ok(()),
                // Cross-device moves fall back to copy + delete. The source
                // is only removed once the destination is in place.
                Err(_) => {
                    fs::copy(src, dest)?;
                    if !dest.exists() {
                        return Err(std::io::Error::from(std::io::ErrorKind::Other));
                    }
                    fs::remove_file(src)
                }
            }
        };
        match run() {
            Ok(()) => true,
            Err(err) => {
                warn!("move {} -> {} failed: {err}", src.display(), dest.display());
                false
            }
        }
    }

    fn list_names(&self, path: &Path) -> Vec<String> {
        match fs::read_dir(path) {
            Ok(entries) => entries
                .flatten()
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .collect(),
            Err(err) => {
                warn!("list {} failed: {err}", path.display());
                Vec::new()
            }
        }
    }

    fn write(&self, dir: &Path, filename: &str, content: &str) -> bool {
        let path = dir.join(filename);
        let run = || -> std::io::Result<()> {
            ensure_parent(&path)?;
            fs::write(&path, content)
        };
        match run() {
            Ok(()) => true,
            Err(err) => {
                warn!("write {} failed: {err}", path.display());
                false
            }
        }
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn is_file(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn create_file_from_stream(&self, dir: &Path, filename: &str, stream: &mut dyn Read) -> bool {
        let path = dir.join(filename);
        let mut run = || -> std::io::Result<()> {
            ensure_parent(&path)?;
            let file = fs::File::create(&path)?;
            let mut writer = BufWriter::new(file);
            std::io::copy(stream, &mut writer)?;
            writer.flush()
        };
        match run() {
            Ok(()) => true,
            Err(err) => {
                warn!("stream write {} failed: {err}", path.display());
                // A half-written file must not survive as the destination.
                let _ = fs::remove_file(&path);
                false
            }
        }
    }

    fn last_modified(&self, path: &Path) -> Option<i64> {
        fs::metadata(path).ok().map(|meta| mtime_millis(&meta))
    }

    fn file_len(&self, path: &Path) -> Option<u64> {
        fs::metadata(path).ok().map(|meta| meta.len())
    }

    fn rename_directory(&self, path: &Path, new_name: &str) -> bool {
        let Some(parent) = path.parent() else {
            return false;
        };
        match fs::rename(path, parent.join(new_name)) {
            Ok(()) => true,
            Err(err) => {
                warn!("rename {} failed: {err}", path.display());
                false
            }
        }
    }

    fn create_directory(&self, path: &Path) -> bool {
        match fs::create_dir_all(path) {
            Ok(()) => true,
            Err(err) => {
                warn!("mkdir {} failed: {err}", path.display());
                false
            }
        }
    }

    fn read_text(&self, path: &Path) -> Option<String> {
        match fs::read_to_string(path) {
            Ok(text) => Some(text),
            Err(err) => {
                warn!("read {} failed: {err}", path.display());
                None
            }
        }
    }

    fn list_files(&self, path: &Path) -> Vec<FileEntry> {
        match fs::read_dir(path) {
            Ok(entries) => entries
                .flatten()
                .filter_map(|e| {
                    let meta = e.metadata().ok()?;
                    Some(FileEntry {
                        path: e.path(),
                        is_dir: meta.is_dir(),
                        size: meta.len(),
                        modified: mtime_millis(&meta),
                    })
                })
                .collect(),
            Err(err) => {
                warn!("list {} failed: {err}", path.display());
                Vec::new()
            }
        }
    }

    fn md5(&self, path: &Path) -> Option<String> {
        match hash::md5_file(path) {
            Ok(digest) => Some(digest),
            Err(err) => {
                warn!("hash {} failed: {err}", path.display());
                None
            }
        }
    }
}
