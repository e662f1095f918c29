//! Checksum-manifest patcher.
//!
//! The AB-asset titles keep two JSON check files next to their bundles
//! (`persistent_res_list.json`, `hot_update_list.json`) recording MD5 and
//! size per asset. After the engine swaps an asset, the matching entries
//! must be rewritten or the game discards the file as corrupt and
//! re-downloads it. The same patch runs on disable with the restored
//! originals' digests.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{HookContext, SpecialGameHook};
use crate::archive;
use crate::config::GameInfo;
use crate::db::{BackupRecord, ModRecord};
use crate::error::{ModError, Result};
use crate::hash;
use crate::paths::file_name_of;

const CHECK_FILES: [&str; 2] = ["persistent_res_list.json", "hot_update_list.json"];

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct HotUpdateList {
    version_id: String,
    ab_infos: Vec<AbInfo>,
    manifest_name: String,
    manifest_version: String,
    pack_infos: Vec<AbInfo>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct AbInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    md5: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    total_size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ab_size: Option<u64>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cid: Option<i64>,
}

pub struct AssetChecklistHook;

impl AssetChecklistHook {
    pub fn new() -> Self {
        Self
    }

    fn bundles_dir(game: &GameInfo) -> PathBuf {
        Path::new(&game.game_path).join("files").join("Bundles")
    }

    /// MD5 and size of the content now live at `game_file`, falling back
    /// to the mod's source archive when the live file cannot be read.
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

    /// Rewrite entries matching `filename` across one check file.
    fn patch_entries(list: &mut HotUpdateList, filename: &str, md5: &str, size: u64) -> bool {
        let mut touched = false;
        for info in list.ab_infos.iter_mut().chain(list.pack_infos.iter_mut()) {
            let matches = info
                .name
                .as_deref()
                .map(|name| name == filename || file_name_of(Path::new(name)) == filename)
                .unwrap_or(false);
            if matches {
                info.md5 = Some(md5.to_string());
                info.hash = Some(md5.to_string());
                info.total_size = Some(size);
                info.ab_size = Some(size);
                touched = true;
            }
        }
        touched
    }

    fn patch_check_files(
        &self,
        mod_record: &ModRecord,
        game: &GameInfo,
        ctx: &HookContext,
    ) -> Result<()> {
        let bundles = Self::bundles_dir(game);
        let staging = ctx.paths.check_file_dir().join(&game.package_name);
        std::fs::create_dir_all(&staging)
            .map_err(|_| crate::error::FileError::CreateDirectoryFailed(staging.clone()))?;

        // Digests of everything the mod touches, computed once.
        let mut digests = Vec::new();
        for (member, game_path) in mod_record
            .mod_files
            .iter()
            .zip(mod_record.game_file_paths.iter())
        {
            let game_file = Path::new(game_path);
            match Self::digest_of(ctx, mod_record, member, game_file) {
                Some(digest) => digests.push((file_name_of(game_file), digest)),
                None => {
                    return Err(ModError::EnableFailed {
                        name: mod_record.name.clone(),
                        reason: format!("cannot digest {game_path}"),
                    }
                    .into())
                }
            }
        }

        for check_name in CHECK_FILES {
            let live = bundles.join(check_name);
            let staged = staging.join(check_name);
            if !ctx.router.copy(&live, &staged) {
                debug!("check file {} not present, skipping", live.display());
                continue;
            }
            let Some(text) = ctx.router.read_text(&staged) else {
                continue;
            };
            let mut list: HotUpdateList = match serde_json::from_str(&text) {
                Ok(list) => list,
                Err(err) => {
                    warn!("unparsable check file {check_name}: {err}");
                    continue;
                }
            };

            let mut touched = false;
            for (filename, (md5, size)) in &digests {
                touched |= Self::patch_entries(&mut list, filename, md5, *size);
            }
            if !touched {
                continue;
            }

            let json = serde_json::to_string(&list)
                .map_err(|_| crate::error::FileError::WriteFailed(staged.clone()))?;
            if !ctx.router.write(&staging, check_name, &json)
                || !ctx.router.copy(&staged, &live)
            {
                return Err(ModError::EnableFailed {
                    name: mod_record.name.clone(),
                    reason: format!("cannot write back {check_name}"),
                }
                .into());
            }
            debug!("patched {} entries into {check_name}", digests.len());
        }
        Ok(())
    }
}

impl Default for AssetChecklistHook {
    fn default() -> Self {
        Self::new()
    }
}

impl SpecialGameHook for AssetChecklistHook {
    fn on_enable(&self, mod_record: &ModRecord, game: &GameInfo, ctx: &HookContext) -> Result<()> {
        self.patch_check_files(mod_record, game, ctx)
    }

    fn on_disable(
        &self,
        mod_record: &ModRecord,
        _backups: &[BackupRecord],
        game: &GameInfo,
        ctx: &HookContext,
    ) -> Result<()> {
        // The originals are back on disk at this point; the same patch
        // writes their digests into the check files.
        self.patch_check_files(mod_record, game, ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::AccessResolver;
    use crate::fileops::FileRouter;
    use crate::helper::HelperChannel;
    use crate::paths::AppPaths;
    use std::sync::Arc;

    fn context(root: &Path) -> HookContext {
        let channel = Arc::new(HelperChannel::new());
        let resolver = Arc::new(AccessResolver::new(
            vec![root.to_path_buf()],
            Arc::clone(&channel),
        ));
        HookContext {
            router: Arc::new(FileRouter::new(resolver, channel)),
            paths: AppPaths::new(root, "com.example.vault"),
        }
    }

    fn game(root: &Path) -> GameInfo {
        GameInfo {
            game_name: "AB Title".into(),
            service_name: "global".into(),
            package_name: "com.hypergryph.arknights".into(),
            game_path: root
                .join("Android/data/com.hypergryph.arknights")
                .to_string_lossy()
                .into_owned(),
            mod_save_path: String::new(),
            game_file_path: vec![],
            version: "1.0".into(),
            mod_type: vec![],
            is_game_file_repeat: false,
            enable_backup: true,
            tips: String::new(),
        }
    }

    #[test]
    fn patches_matching_entries_in_place() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = context(tmp.path());
        ctx.paths.ensure_layout().unwrap();
        let game = game(tmp.path());

        // Live asset the mod replaced.
        let bundles = AssetChecklistHook::bundles_dir(&game);
        let asset_dir = bundles.join("chars");
        std::fs::create_dir_all(&asset_dir).unwrap();
        std::fs::write(asset_dir.join("hero.ab"), b"modded-bytes").unwrap();

        // Check file referencing it by bare name.
        let check = serde_json::json!({
            "versionId": "v1",
            "abInfos": [
                {"name": "hero.ab", "md5": "stale", "totalSize": 1},
                {"name": "other.ab", "md5": "keep", "totalSize": 2}
            ],
            "manifestName": "m",
            "manifestVersion": "7",
            "packInfos": []
        });
        std::fs::write(
            bundles.join("hot_update_list.json"),
            serde_json::to_string(&check).unwrap(),
        )
        .unwrap();

        let mut record = crate::db::test_support::sample_mod("skin", &game.package_name);
        record.mod_files = vec!["chars/hero.ab".into()];
        record.game_file_paths =
            vec![asset_dir.join("hero.ab").to_string_lossy().into_owned()];

        let hook = AssetChecklistHook::new();
        hook.on_enable(&record, &game, &ctx).unwrap();

        let patched: HotUpdateList = serde_json::from_str(
            &std::fs::read_to_string(bundles.join("hot_update_list.json")).unwrap(),
        )
        .unwrap();
        let expected = crate::hash::md5_bytes(b"modded-bytes");
        assert_eq!(patched.ab_infos[0].md5.as_deref(), Some(expected.as_str()));
        assert_eq!(patched.ab_infos[0].total_size, Some(12));
        assert_eq!(patched.ab_infos[1].md5.as_deref(), Some("keep"));
        assert_eq!(patched.manifest_version, "7");
    }
}
