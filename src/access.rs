//! Access-tier resolution.
//!
//! Storage permissions on device are inconsistent and partially revocable:
//! some paths are reachable with ordinary file APIs, some only through a
//! granted document tree, some only via the privileged helper process. The
//! resolver decides, per path, which regime applies; every file operation
//! in the engine goes through this decision.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use tracing::debug;

use crate::helper::HelperChannel;

/// Permission regime for a single path. Ordering is privilege ordering:
/// a higher tier can always operate on paths of a lower tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AccessTier {
    /// No regime reaches the path; callers must surface a permission
    /// request instead of attempting the operation.
    None,
    /// Ordinary file APIs work (app-private area, generally-writable
    /// shared storage).
    DirectFile,
    /// Reachable through a persisted document-tree grant.
    DocumentTree,
    /// Reachable only via the privileged helper process.
    PrivilegedHelper,
}

impl AccessTier {
    pub fn is_usable(self) -> bool {
        self != AccessTier::None
    }
}

/// Per-path tier decisions, stable for as long as grants and the helper
/// connection do not change.
pub struct AccessResolver {
    /// Roots addressable with ordinary file APIs.
    direct_roots: Vec<PathBuf>,
    /// Persisted document-tree grants (each grant covers its subtree).
    grants: RwLock<BTreeSet<PathBuf>>,
    helper: Arc<HelperChannel>,
}

impl AccessResolver {
    pub fn new(direct_roots: Vec<PathBuf>, helper: Arc<HelperChannel>) -> Self {
        Self {
            direct_roots,
            grants: RwLock::new(BTreeSet::new()),
            helper,
        }
    }

    /// Record a persisted grant over `root` and its subtree.
    pub fn grant(&self, root: impl Into<PathBuf>) {
        let root = root.into();
        debug!("document grant added for {}", root.display());
        self.grants.write().unwrap().insert(root);
    }

    /// Drop a previously persisted grant.
    pub fn revoke(&self, root: &Path) {
        debug!("document grant revoked for {}", root.display());
        self.grants.write().unwrap().remove(root);
    }

    pub fn grants(&self) -> Vec<PathBuf> {
        self.grants.read().unwrap().iter().cloned().collect()
    }

    pub fn helper(&self) -> &Arc<HelperChannel> {
        &self.helper
    }

    /// Decide the tier for one path.
    pub fn resolve(&self, path: &Path) -> AccessTier {
        if self.direct_roots.iter().any(|root| path.starts_with(root)) {
            return AccessTier::DirectFile;
        }
        if self.has_grant(path) {
            return AccessTier::DocumentTree;
        }
        if self.helper.is_connected() {
            return AccessTier::PrivilegedHelper;
        }
        AccessTier::None
    }

    /// Decide the tier for a two-operand operation. If either side is
    /// unreachable the whole operation is unreachable; otherwise the
    /// higher-privilege tier handles both sides.
    pub fn resolve_pair(&self, a: &Path, b: &Path) -> AccessTier {
        let ta = self.resolve(a);
        let tb = self.resolve(b);
        if !ta.is_usable() || !tb.is_usable() {
            return AccessTier::None;
        }
        ta.max(tb)
    }

    /// Whether a persisted grant covers `path`.
    pub fn has_grant(&self, path: &Path) -> bool {
        self.grants
            .read()
            .unwrap()
            .iter()
            .any(|root| path.starts_with(root))
    }

    /// The root a caller should request a grant for to reach `path`: the
    /// nearest ancestor that is a per-app data directory, else the path's
    /// parent.
    pub fn request_root_for(&self, path: &Path) -> PathBuf {
        for ancestor in path.ancestors() {
            if ancestor
                .parent()
                .and_then(|p| p.file_name())
                .map(|n| n == "data")
                .unwrap_or(false)
            {
                return ancestor.to_path_buf();
            }
        }
        path.parent().unwrap_or(path).to_path_buf()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver_with(direct: &[&str]) -> AccessResolver {
        AccessResolver::new(
            direct.iter().map(PathBuf::from).collect(),
            Arc::new(HelperChannel::new()),
        )
    }

    #[test]
    fn direct_root_wins() {
        let resolver = resolver_with(&["/storage/Android/data/com.example.vault"]);
        assert_eq!(
            resolver.resolve(Path::new(
                "/storage/Android/data/com.example.vault/backup/a.bin"
            )),
            AccessTier::DirectFile
        );
    }

    #[test]
    fn grant_makes_document_tree() {
        let resolver = resolver_with(&[]);
        let game_dir = Path::new("/storage/Android/data/com.some.game");
        assert_eq!(resolver.resolve(game_dir), AccessTier::None);

        resolver.grant(game_dir);
        assert_eq!(
            resolver.resolve(&game_dir.join("files/assets/a.ab")),
            AccessTier::DocumentTree
        );

        resolver.revoke(game_dir);
        assert_eq!(resolver.resolve(game_dir), AccessTier::None);
    }

    #[test]
    fn resolution_is_stable_between_changes() {
        let resolver = resolver_with(&["/storage/emulated/0/Download"]);
        let p = Path::new("/storage/emulated/0/Download/Mods/skin.zip");
        let first = resolver.resolve(p);
        for _ in 0..10 {
            assert_eq!(resolver.resolve(p), first);
        }
    }

    #[test]
    fn pair_uses_higher_tier_or_none() {
        let resolver = resolver_with(&["/storage/emulated/0/Download"]);
        resolver.grant("/storage/Android/data/com.some.game");

        let download = Path::new("/storage/emulated/0/Download/skin.zip");
        let game = Path::new("/storage/Android/data/com.some.game/files/a.ab");
        assert_eq!(
            resolver.resolve_pair(download, game),
            AccessTier::DocumentTree
        );

        let unreachable = Path::new("/storage/Android/data/com.other.game/files/b.ab");
        assert_eq!(resolver.resolve_pair(download, unreachable), AccessTier::None);
    }

    #[test]
    fn request_root_targets_app_data_dir() {
        let resolver = resolver_with(&[]);
        let target =
            Path::new("/storage/Android/data/com.some.game/files/assets/chars/hero.png");
        assert_eq!(
            resolver.request_root_for(target),
            Path::new("/storage/Android/data/com.some.game")
        );
    }
}
