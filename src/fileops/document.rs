//! Document-tree tier.
//!
//! Models SAF-style access: operations are only legal under a persisted
//! grant, and writes go through the provider's create-then-stream shape
//! (delete any existing document, create a fresh one, stream content into
//! it) rather than in-place file mutation. Reads outside a grant fail with
//! a negative result, mirroring a revoked or never-given grant.

use std::fs;
use std::io::{BufWriter, Read, Write};
use std::path::Path;
use std::sync::Arc;

use tracing::warn;

use super::{FileEntry, FileOps};
use crate::access::AccessResolver;
use crate::hash;

pub struct DocumentTreeOps {
    resolver: Arc<AccessResolver>,
}

impl DocumentTreeOps {
    pub fn new(resolver: Arc<AccessResolver>) -> Self {
        Self { resolver }
    }

    /// Every operation re-checks the grant; grants are revocable at any
    /// time and a stale router must not keep mutating the tree.
    fn authorized(&self, path: &Path) -> bool {
        if self.resolver.has_grant(path) {
            return true;
        }
        warn!("no document grant covers {}", path.display());
        false
    }

    /// Provider-style document creation: remove, recreate, stream.
    fn create_document(&self, path: &Path, stream: &mut dyn Read) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        if path.exists() {
            fs::remove_file(path)?;
        }
        let file = fs::File::create(path)?;
        let mut writer = BufWriter::new(file);
        std::io::copy(stream, &mut writer)?;
        writer.flush()
    }
}

impl FileOps for DocumentTreeOps {
    fn delete(&self, path: &Path) -> bool {
        if !self.authorized(path) {
            return false;
        }
        let result = if path.is_dir() {
            fs::remove_dir_all(path)
        } else {
            fs::remove_file(path)
        };
        match result {
            Ok(()) => true,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => true,
            Err(err) => {
                warn!("document delete {} failed: {err}", path.display());
                false
            }
        }
    }

    fn copy(&self, src: &Path, dest: &Path) -> bool {
        // Either side may be the granted one; the other is expected to be
        // reachable with plain file APIs (the router only picks this tier
        // when at least one side needs it).
        if !self.resolver.has_grant(src) && !self.resolver.has_grant(dest) {
            warn!(
                "no document grant covers {} or {}",
                src.display(),
                dest.display()
            );
            return false;
        }
        let run = || -> std::io::Result<()> {
            let mut reader = fs::File::open(src)?;
            self.create_document(dest, &mut reader)
        };
        match run() {
            Ok(()) => true,
            Err(err) => {
                warn!(
                    "document copy {} -> {} failed: {err}",
                    src.display(),
                    dest.display()
                );
                false
            }
        }
    }

    fn move_file(&self, src: &Path, dest: &Path) -> bool {
        if !self.copy(src, dest) {
            return false;
        }
        // Source is disposed only after the destination document exists.
        if !dest.exists() {
            return false;
        }
        match fs::remove_file(src) {
            Ok(()) => true,
            Err(err) => {
                warn!("document move could not drop source {}: {err}", src.display());
                false
            }
        }
    }

    fn list_names(&self, path: &Path) -> Vec<String> {
        if !self.authorized(path) {
            return Vec::new();
        }
        match fs::read_dir(path) {
            Ok(entries) => entries
                .flatten()
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .collect(),
            Err(err) => {
                warn!("document list {} failed: {err}", path.display());
                Vec::new()
            }
        }
    }

    fn write(&self, dir: &Path, filename: &str, content: &str) -> bool {
        if !self.authorized(dir) {
            return false;
        }
        let path = dir.join(filename);
        let mut cursor = std::io::Cursor::new(content.as_bytes().to_vec());
        match self.create_document(&path, &mut cursor) {
            Ok(()) => true,
            Err(err) => {
                warn!("document write {} failed: {err}", path.display());
                false
            }
        }
    }

    fn exists(&self, path: &Path) -> bool {
        self.resolver.has_grant(path) && path.exists()
    }

    fn is_file(&self, path: &Path) -> bool {
        self.resolver.has_grant(path) && path.is_file()
    }

    fn create_file_from_stream(&self, dir: &Path, filename: &str, stream: &mut dyn Read) -> bool {
        if !self.authorized(dir) {
            return false;
        }
        let path = dir.join(filename);
        match self.create_document(&path, stream) {
            Ok(()) => true,
            Err(err) => {
                warn!("document stream write {} failed: {err}", path.display());
                let _ = fs::remove_file(&path);
                false
            }
        }
    }

    fn last_modified(&self, path: &Path) -> Option<i64> {
        if !self.resolver.has_grant(path) {
            return None;
        }
        fs::metadata(path)
            .ok()?
            .modified()
            .ok()?
            .duration_since(std::time::UNIX_EPOCH)
            .ok()
            .map(|d| d.as_millis() as i64)
    }

    fn file_len(&self, path: &Path) -> Option<u64> {
        if !self.resolver.has_grant(path) {
            return None;
        }
        fs::metadata(path).ok().map(|meta| meta.len())
    }

    fn rename_directory(&self, path: &Path, new_name: &str) -> bool {
        if !self.authorized(path) {
            return false;
        }
        let Some(parent) = path.parent() else {
            return false;
        };
        match fs::rename(path, parent.join(new_name)) {
            Ok(()) => true,
            Err(err) => {
                warn!("document rename {} failed: {err}", path.display());
                false
            }
        }
    }

    fn create_directory(&self, path: &Path) -> bool {
        if !self.authorized(path) {
            return false;
        }
        match fs::create_dir_all(path) {
            Ok(()) => true,
            Err(err) => {
                warn!("document mkdir {} failed: {err}", path.display());
                false
            }
        }
    }

    fn read_text(&self, path: &Path) -> Option<String> {
        if !self.authorized(path) {
            return None;
        }
        fs::read_to_string(path).ok()
    }

    fn list_files(&self, path: &Path) -> Vec<FileEntry> {
        if !self.authorized(path) {
            return Vec::new();
        }
        match fs::read_dir(path) {
            Ok(entries) => entries
                .flatten()
                .filter_map(|e| {
                    let meta = e.metadata().ok()?;
                    let modified = meta
                        .modified()
                        .ok()
                        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                        .map(|d| d.as_millis() as i64)
                        .unwrap_or(0);
                    Some(FileEntry {
                        path: e.path(),
                        is_dir: meta.is_dir(),
                        size: meta.len(),
                        modified,
                    })
                })
                .collect(),
            Err(_) => Vec::new(),
        }
    }

    fn md5(&self, path: &Path) -> Option<String> {
        if !self.authorized(path) {
            return None;
        }
        hash::md5_file(path).ok()
    }
}
