//! Pak-manifest injector.
//!
//! The pak-based title reads a `manifest.json` listing every pak it will
//! mount, and rewrites that file itself during startup. To get mod paks
//! mounted, their entries are staged while mods are enabled and then, when
//! the game launches, the merged manifest is written over the live one in
//! a loop for a fixed window — long enough to win the race against the
//! game's own startup write. The loop is deliberately time-boxed; it never
//! becomes a background task.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{HookContext, SpecialGameHook};
use crate::archive;
use crate::config::GameInfo;
use crate::db::{BackupRecord, ModRecord};
use crate::error::{ModError, Result};
use crate::hash;
use crate::paths::file_name_of;

const MANIFEST_NAME: &str = "manifest.json";
/// How long the startup rewrite keeps going.
const INJECT_WINDOW: Duration = Duration::from_secs(40);
const INJECT_PAUSE: Duration = Duration::from_millis(25);

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct PakManifest {
    version: String,
    project_version: String,
    path_offset: String,
    b_user_cache: bool,
    paks: Vec<PakEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct PakEntry {
    name: String,
    hash: String,
    size_in_bytes: u64,
    b_primary: bool,
    #[serde(skip_serializing_if = "String::is_empty")]
    base: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    diff: String,
    #[serde(skip_serializing_if = "is_zero")]
    diff_size_bytes: u64,
}

impl Default for PakEntry {
    fn default() -> Self {
        Self {
            name: String::new(),
            hash: String::new(),
            size_in_bytes: 0,
            b_primary: false,
            base: String::new(),
            diff: String::new(),
            diff_size_bytes: 0,
        }
    }
}

fn is_zero(v: &u64) -> bool {
    *v == 0
}

pub struct PakManifestHook;

impl PakManifestHook {
    pub fn new() -> Self {
        Self
    }

    fn staged_manifest_path(ctx: &HookContext, package: &str) -> PathBuf {
        ctx.paths.check_file_dir().join(package).join(MANIFEST_NAME)
    }

    fn live_manifest_dir(game: &GameInfo) -> PathBuf {
        Path::new(&game.game_path).join("files")
    }

    fn load_staged(path: &Path) -> PakManifest {
        std::fs::read_to_string(path)
            .ok()
            .and_then(|text| serde_json::from_str(&text).ok())
            .unwrap_or_default()
    }

    fn store_staged(path: &Path, manifest: &PakManifest) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|_| crate::error::FileError::CreateDirectoryFailed(parent.into()))?;
        }
        let json = serde_json::to_string(manifest)
            .map_err(|_| crate::error::FileError::WriteFailed(path.to_path_buf()))?;
        std::fs::write(path, json)
            .map_err(|_| crate::error::FileError::WriteFailed(path.to_path_buf()))?;
        Ok(())
    }

    fn digest_of(
        ctx: &HookContext,
        mod_record: &ModRecord,
        member: &str,
        game_file: &Path,
    ) -> Option<(String, u64)> {
        if let (Some(md5), Some(len)) = (ctx.router.md5(game_file), ctx.router.file_len(game_file))
        {
            return Some((md5, len));
        }
        if !mod_record.zip_file {
            return None;
        }
        let data = archive::read_member(
            Path::new(&mod_record.path),
            member,
            mod_record.password.as_deref(),
        )
        .ok()?;
        Some((hash::md5_bytes(&data), data.len() as u64))
    }
}

impl Default for PakManifestHook {
    fn default() -> Self {
        Self::new()
    }
}

impl SpecialGameHook for PakManifestHook {
    fn on_enable(&self, mod_record: &ModRecord, game: &GameInfo, ctx: &HookContext) -> Result<()> {
        let staged_path = Self::staged_manifest_path(ctx, &game.package_name);
        let mut staged = Self::load_staged(&staged_path);

        for (member, game_path) in mod_record
            .mod_files
            .iter()
            .zip(mod_record.game_file_paths.iter())
        {
            let game_file = Path::new(game_path);
            let Some((md5, size)) = Self::digest_of(ctx, mod_record, member, game_file) else {
                return Err(ModError::EnableFailed {
                    name: mod_record.name.clone(),
                    reason: format!("cannot digest {game_path}"),
                }
                .into());
            };
            let name = file_name_of(game_file);
            staged.paks.retain(|pak| pak.name != name);
            staged.paks.push(PakEntry {
                name,
                hash: md5,
                size_in_bytes: size,
                b_primary: false,
                ..PakEntry::default()
            });
        }
        Self::store_staged(&staged_path, &staged)
    }

    fn on_disable(
        &self,
        mod_record: &ModRecord,
        _backups: &[BackupRecord],
        game: &GameInfo,
        ctx: &HookContext,
    ) -> Result<()> {
        let staged_path = Self::staged_manifest_path(ctx, &game.package_name);
        let mut staged = Self::load_staged(&staged_path);
        let removed: Vec<String> = mod_record
            .mod_files
            .iter()
            .map(|member| file_name_of(Path::new(member)))
            .collect();
        staged.paks.retain(|pak| !removed.contains(&pak.name));
        Self::store_staged(&staged_path, &staged)
    }

    fn on_game_start(&self, game: &GameInfo, ctx: &HookContext) -> Result<()> {
        let staged_path = Self::staged_manifest_path(ctx, &game.package_name);
        let staged = Self::load_staged(&staged_path);
        if staged.paks.is_empty() {
            debug!("no staged paks, skipping manifest injection");
            return Ok(());
        }

        let live_dir = Self::live_manifest_dir(game);
        let live = live_dir.join(MANIFEST_NAME);
        let Some(text) = ctx.router.read_text(&live) else {
            return Err(ModError::EnableFailed {
                name: game.game_name.clone(),
                reason: "live manifest unreadable".to_string(),
            }
            .into());
        };
        let mut merged: PakManifest = serde_json::from_str(&text)
            .map_err(|_| crate::error::FileError::ReadFailed(live.clone()))?;

        // Mod paks go in front so they shadow same-named stock entries.
        for pak in staged.paks.iter().rev() {
            if !merged.paks.contains(pak) {
                merged.paks.insert(0, pak.clone());
            }
        }
        let json = serde_json::to_string(&merged)
            .map_err(|_| crate::error::FileError::WriteFailed(live.clone()))?;

        info!(
            "injecting {} pak entries for {}s",
            staged.paks.len(),
            INJECT_WINDOW.as_secs()
        );
        let start = Instant::now();
        while start.elapsed() < INJECT_WINDOW {
            if !ctx.router.write(&live_dir, MANIFEST_NAME, &json) {
                return Err(ModError::EnableFailed {
                    name: game.game_name.clone(),
                    reason: "manifest write failed mid-injection".to_string(),
                }
                .into());
            }
            std::thread::sleep(INJECT_PAUSE);
        }
        info!("manifest injection window elapsed");
        Ok(())
    }

    fn recognizes_payload(&self, member_name: &str) -> bool {
        member_name.to_lowercase().ends_with(".pak")
    }

    /// The live asset dirs carry a patch-version subdirectory derived from
    /// the descriptor version with the hotfix digit zeroed.
    fn update_game_info(&self, mut game: GameInfo) -> GameInfo {
        let subdir = version_dir(&game.version);
        if subdir.is_empty() {
            return game;
        }
        game.game_file_path = game
            .game_file_path
            .iter()
            .map(|dir| format!("{}/{}", dir.trim_end_matches('/'), subdir))
            .collect();
        game
    }
}

/// `"1.2.3-hotfix"` -> `"1.2.0"`; empty when the version has no
/// `major.minor.patch` prefix.
fn version_dir(version: &str) -> String {
    let mut parts = Vec::new();
    for (i, part) in version.split(['.', '-']).take(3).enumerate() {
        if part.chars().all(|c| c.is_ascii_digit()) && !part.is_empty() {
            parts.push(if i == 2 { "0".to_string() } else { part.to_string() });
        } else {
            break;
        }
    }
    if parts.len() == 3 {
        parts.join(".")
    } else {
        String::new()
    }
}
