//! Uniform file-operation facade over the three access tiers.
//!
//! One operation set, one implementation per tier. The router asks the
//! resolver which tier applies to the operand path(s) and dispatches to
//! that implementation; when the two operands of a copy or move straddle
//! tiers, the higher-privilege tier handles the whole operation.
//!
//! Failure policy: expected failures (missing file, i/o error) become a
//! `false`/empty result and a log line. No implementation lets an error
//! escape the trait boundary.

pub mod direct;
pub mod document;
pub mod helper;

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::access::{AccessResolver, AccessTier};
use crate::helper::HelperChannel;

pub use direct::DirectFileOps;
pub use document::DocumentTreeOps;
pub use helper::HelperFileOps;

/// A directory listing entry with the metadata the scanner needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub path: PathBuf,
    pub is_dir: bool,
    pub size: u64,
    /// Millisecond mtime, 0 when unavailable.
    pub modified: i64,
}

/// The per-tier operation set. All operations are synchronous and blocking;
/// callers run them off the interactive thread.
pub trait FileOps: Send + Sync {
    fn delete(&self, path: &Path) -> bool;
    fn copy(&self, src: &Path, dest: &Path) -> bool;
    fn move_file(&self, src: &Path, dest: &Path) -> bool;
    fn list_names(&self, path: &Path) -> Vec<String>;
    fn write(&self, dir: &Path, filename: &str, content: &str) -> bool;
    fn exists(&self, path: &Path) -> bool;
    fn is_file(&self, path: &Path) -> bool;
    fn create_file_from_stream(&self, dir: &Path, filename: &str, stream: &mut dyn Read) -> bool;
    /// Millisecond mtime, `None` for missing files.
    fn last_modified(&self, path: &Path) -> Option<i64>;
    /// File length in bytes, `None` for missing files.
    fn file_len(&self, path: &Path) -> Option<u64>;
    fn rename_directory(&self, path: &Path, new_name: &str) -> bool;
    fn create_directory(&self, path: &Path) -> bool;
    fn read_text(&self, path: &Path) -> Option<String>;
    fn list_files(&self, path: &Path) -> Vec<FileEntry>;
    fn md5(&self, path: &Path) -> Option<String>;
}

/// Tier-dispatching facade. The only place tier selection happens.
pub struct FileRouter {
    resolver: Arc<AccessResolver>,
    direct: DirectFileOps,
    document: DocumentTreeOps,
    helper: HelperFileOps,
}

impl FileRouter {
    pub fn new(resolver: Arc<AccessResolver>, channel: Arc<HelperChannel>) -> Self {
        let document = DocumentTreeOps::new(Arc::clone(&resolver));
        Self {
            resolver,
            direct: DirectFileOps,
            document,
            helper: HelperFileOps::new(channel),
        }
    }

    pub fn resolver(&self) -> &Arc<AccessResolver> {
        &self.resolver
    }

    pub fn by_tier(&self, tier: AccessTier) -> Option<&dyn FileOps> {
        match tier {
            AccessTier::DirectFile => Some(&self.direct),
            AccessTier::DocumentTree => Some(&self.document),
            AccessTier::PrivilegedHelper => Some(&self.helper),
            AccessTier::None => None,
        }
    }

    /// Implementation for a single-operand operation, `None` when the path
    /// is unreachable under every tier.
    pub fn for_path(&self, path: &Path) -> Option<&dyn FileOps> {
        self.by_tier(self.resolver.resolve(path))
    }

    /// Implementation for a two-operand operation; the higher-privilege
    /// tier of the two wins.
    pub fn for_pair(&self, a: &Path, b: &Path) -> Option<&dyn FileOps> {
        self.by_tier(self.resolver.resolve_pair(a, b))
    }

    // Pass-throughs for the operations callers use pervasively. Each is a
    // no-op returning the negative result when no tier reaches the path.

    pub fn delete(&self, path: &Path) -> bool {
        self.for_path(path).map(|t| t.delete(path)).unwrap_or(false)
    }

    pub fn copy(&self, src: &Path, dest: &Path) -> bool {
        self.for_pair(src, dest)
            .map(|t| t.copy(src, dest))
            .unwrap_or(false)
    }

    pub fn move_file(&self, src: &Path, dest: &Path) -> bool {
        self.for_pair(src, dest)
            .map(|t| t.move_file(src, dest))
            .unwrap_or(false)
    }

    pub fn list_names(&self, path: &Path) -> Vec<String> {
        self.for_path(path)
            .map(|t| t.list_names(path))
            .unwrap_or_default()
    }

    pub fn exists(&self, path: &Path) -> bool {
        self.for_path(path).map(|t| t.exists(path)).unwrap_or(false)
    }

    pub fn is_file(&self, path: &Path) -> bool {
        self.for_path(path).map(|t| t.is_file(path)).unwrap_or(false)
    }

    pub fn create_file_from_stream(
        &self,
        dir: &Path,
        filename: &str,
        stream: &mut dyn Read,
    ) -> bool {
        self.for_path(dir)
            .map(|t| t.create_file_from_stream(dir, filename, stream))
            .unwrap_or(false)
    }

    pub fn last_modified(&self, path: &Path) -> Option<i64> {
        self.for_path(path).and_then(|t| t.last_modified(path))
    }

    pub fn file_len(&self, path: &Path) -> Option<u64> {
        self.for_path(path).and_then(|t| t.file_len(path))
    }

    pub fn create_directory(&self, path: &Path) -> bool {
        self.for_path(path)
            .map(|t| t.create_directory(path))
            .unwrap_or(false)
    }

    pub fn read_text(&self, path: &Path) -> Option<String> {
        self.for_path(path).and_then(|t| t.read_text(path))
    }

    pub fn write(&self, dir: &Path, filename: &str, content: &str) -> bool {
        self.for_path(dir)
            .map(|t| t.write(dir, filename, content))
            .unwrap_or(false)
    }

    pub fn list_files(&self, path: &Path) -> Vec<FileEntry> {
        self.for_path(path)
            .map(|t| t.list_files(path))
            .unwrap_or_default()
    }

    pub fn md5(&self, path: &Path) -> Option<String> {
        self.for_path(path).and_then(|t| t.md5(path))
    }
}
