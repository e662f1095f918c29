//! Per-game special handling.
//!
//! Some titles verify their asset files against game-side manifests; for
//! those, swapping bytes on disk is not enough — the manifest entries
//! (MD5, size) have to be patched too, or the game rejects the files and
//! re-downloads them. Hooks are registered per package-name fragment and
//! invoked around enable/disable/scan/select/start; a game with no hook is
//! a no-op, not an error.
//!
//! Hook failures are best-effort bookkeeping: the orchestrator logs and
//! surfaces them but never rolls back an otherwise successful file swap.

mod checklist;
mod pak_manifest;

pub use checklist::AssetChecklistHook;
pub use pak_manifest::PakManifestHook;

use std::sync::Arc;

use crate::config::GameInfo;
use crate::db::{BackupRecord, ModRecord};
use crate::error::Result;
use crate::fileops::FileRouter;
use crate::paths::AppPaths;

/// Shared dependencies hooks operate with.
#[derive(Clone)]
pub struct HookContext {
    pub router: Arc<FileRouter>,
    pub paths: AppPaths,
}

/// Capability set of a per-title hook. Default implementations make every
/// capability opt-in.
pub trait SpecialGameHook: Send + Sync {
    /// Patch game-side records after a mod's files were placed.
    fn on_enable(&self, mod_record: &ModRecord, game: &GameInfo, ctx: &HookContext) -> Result<()> {
        let _ = (mod_record, game, ctx);
        Ok(())
    }

    /// Patch game-side records after a mod's originals were restored.
    fn on_disable(
        &self,
        mod_record: &ModRecord,
        backups: &[BackupRecord],
        game: &GameInfo,
        ctx: &HookContext,
    ) -> Result<()> {
        let _ = (mod_record, backups, game, ctx);
        Ok(())
    }

    /// Invoked when the user launches the game through the manager.
    fn on_game_start(&self, game: &GameInfo, ctx: &HookContext) -> Result<()> {
        let _ = (game, ctx);
        Ok(())
    }

    /// Invoked when the game is selected as active.
    fn on_game_select(&self, game: &GameInfo, ctx: &HookContext) -> Result<()> {
        let _ = (game, ctx);
        Ok(())
    }

    /// Whether a member name is a recognized mod payload for this title
    /// even without a live-asset name match.
    fn recognizes_payload(&self, member_name: &str) -> bool {
        let _ = member_name;
        false
    }

    /// Adjust a freshly loaded descriptor (e.g. version-derived subdirs).
    fn update_game_info(&self, game: GameInfo) -> GameInfo {
        game
    }
}

/// Package-fragment keyed hook registry.
pub struct SpecialGameRegistry {
    entries: Vec<(&'static str, Arc<dyn SpecialGameHook>)>,
}

impl Default for SpecialGameRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl SpecialGameRegistry {
    /// The registry with both known per-title hooks.
    pub fn builtin() -> Self {
        let checklist: Arc<dyn SpecialGameHook> = Arc::new(AssetChecklistHook::new());
        let pak: Arc<dyn SpecialGameHook> = Arc::new(PakManifestHook::new());
        Self {
            entries: vec![
                ("arknights", Arc::clone(&checklist)),
                ("com.mrfz", checklist),
                ("projectsnow", pak),
            ],
        }
    }

    /// An empty registry (no special handling at all).
    pub fn empty() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn get(&self, package: &str) -> Option<&Arc<dyn SpecialGameHook>> {
        let lowered = package.to_lowercase();
        self.entries
            .iter()
            .find(|(fragment, _)| lowered.contains(fragment))
            .map(|(_, hook)| hook)
    }

    pub fn is_special(&self, package: &str) -> bool {
        self.get(package).is_some()
    }

    /// Scan-time payload recognition; false when no hook matches.
    pub fn recognizes_payload(&self, package: &str, member_name: &str) -> bool {
        self.get(package)
            .map(|hook| hook.recognizes_payload(member_name))
            .unwrap_or(false)
    }

    pub fn on_enable(
        &self,
        mod_record: &ModRecord,
        game: &GameInfo,
        ctx: &HookContext,
    ) -> Result<()> {
        match self.get(&game.package_name) {
            Some(hook) => hook.on_enable(mod_record, game, ctx),
            None => Ok(()),
        }
    }

    pub fn on_disable(
        &self,
        mod_record: &ModRecord,
        backups: &[BackupRecord],
        game: &GameInfo,
        ctx: &HookContext,
    ) -> Result<()> {
        match self.get(&game.package_name) {
            Some(hook) => hook.on_disable(mod_record, backups, game, ctx),
            None => Ok(()),
        }
    }

    pub fn on_game_start(&self, game: &GameInfo, ctx: &HookContext) -> Result<()> {
        match self.get(&game.package_name) {
            Some(hook) => hook.on_game_start(game, ctx),
            None => Ok(()),
        }
    }

    pub fn on_game_select(&self, game: &GameInfo, ctx: &HookContext) -> Result<()> {
        match self.get(&game.package_name) {
            Some(hook) => hook.on_game_select(game, ctx),
            None => Ok(()),
        }
    }

    pub fn update_game_info(&self, game: GameInfo) -> GameInfo {
        match self.get(&game.package_name) {
            Some(hook) => hook.update_game_info(game),
            None => game,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_package_is_noop() {
        let registry = SpecialGameRegistry::builtin();
        assert!(registry.get("com.plain.game").is_none());
        assert!(!registry.recognizes_payload("com.plain.game", "mod.pak"));
    }

    #[test]
    fn fragment_matching_is_case_insensitive() {
        let registry = SpecialGameRegistry::builtin();
        assert!(registry.is_special("com.hypergryph.Arknights"));
        assert!(registry.is_special("com.mrfz.bilibili"));
        assert!(registry.is_special("com.dragonli.ProjectSnow.lhm"));
    }

    #[test]
    fn pak_payloads_recognized_for_matching_title_only() {
        let registry = SpecialGameRegistry::builtin();
        assert!(registry.recognizes_payload("com.dragonli.projectsnow.lhm", "skins/hero.pak"));
        assert!(!registry.recognizes_payload("com.hypergryph.arknights", "skins/hero.pak"));
    }
}
