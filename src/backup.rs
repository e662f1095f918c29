//! Backup capture and verified restore.
//!
//! Backups are keyed by the game file path they shadow, not by mod: two
//! mods overwriting the same file share one backup row, and the stored
//! original survives no matter how many mods stack on the path. A capture
//! happens only when no valid backup exists; a restore happens only after
//! the live file's digest proves it still holds what the manager wrote.
//! A live file that matches neither the recorded original nor any of our
//! own replacements means the game updated underneath us — the stale
//! backup is recaptured on enable, and a restore is refused rather than
//! stomping unknown state.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::archive;
use crate::config::GameInfo;
use crate::db::{now_millis, BackupRecord, Database, ModRecord, ReplacedFileRecord};
use crate::error::{ModError, Result};
use crate::fileops::FileRouter;
use crate::hash;
use crate::paths::{file_name_of, AppPaths};

pub struct BackupEngine {
    db: Arc<Database>,
    router: Arc<FileRouter>,
    paths: AppPaths,
}

impl BackupEngine {
    pub fn new(db: Arc<Database>, router: Arc<FileRouter>, paths: AppPaths) -> Self {
        Self { db, router, paths }
    }

    /// Capture (or reuse) backups for every game file `mod_record` will
    /// overwrite. Returns the authoritative records, one per target path.
    ///
    /// Runs strictly before payload placement; the payload digest is
    /// computed from the mod source here, never from the game directory.
    pub fn backup_originals(
        &self,
        mod_record: &ModRecord,
        game: &GameInfo,
    ) -> Result<Vec<BackupRecord>> {
        if !game.enable_backup {
            debug!("backups disabled for {}", game.package_name);
            return Ok(Vec::new());
        }

        let replaced = self.db.replaced_map_for_game(&game.package_name)?;
        let mut records = Vec::new();

        for (member, game_path) in mod_record
            .mod_files
            .iter()
            .zip(mod_record.game_file_paths.iter())
        {
            let game_file = Path::new(game_path);
            if !self.router.is_file(game_file) {
                // Nothing to preserve; the payload adds a new file.
                debug!("no live original at {game_path}, skipping capture");
                continue;
            }

            let live_md5 = self.router.md5(game_file).ok_or_else(|| {
                ModError::BackupFailed(format!("cannot hash live file {game_path}"))
            })?;
            let payload_md5 = self.payload_md5(mod_record, member)?;
            let now = now_millis();

            match self.db.backup_for_game_file(game_path)? {
                Some(mut existing) => {
                    let ours = replaced
                        .get(game_path)
                        .map(|r| r.md5 == live_md5)
                        .unwrap_or(false);
                    if existing.original_md5 == live_md5 || ours {
                        // The stored original is still authoritative; no
                        // new copy, just the digest of the incoming payload.
                        existing.mod_file_md5 = payload_md5;
                        self.db.update_backup(&existing)?;
                        records.push(existing);
                    } else {
                        // Game update invalidated the capture: the live
                        // file is the new ground truth.
                        warn!(
                            "stale backup for {game_path} (original changed externally), recapturing"
                        );
                        let backup_path = PathBuf::from(&existing.backup_path);
                        self.copy_to_backup(game_file, &backup_path)?;
                        existing.original_md5 = live_md5;
                        existing.mod_file_md5 = payload_md5;
                        existing.backup_time = now;
                        existing.copy_time = now_millis();
                        existing.mod_id = mod_record.id;
                        self.db.update_backup(&existing)?;
                        records.push(existing);
                    }
                }
                None => {
                    let backup_path = self.backup_path_for(game, game_file);
                    self.copy_to_backup(game_file, &backup_path)?;
                    let mut record = BackupRecord {
                        id: 0,
                        mod_id: mod_record.id,
                        filename: file_name_of(game_file),
                        game_file_path: game_path.clone(),
                        backup_path: backup_path.to_string_lossy().into_owned(),
                        game_package_name: game.package_name.clone(),
                        backup_time: now,
                        copy_time: now_millis(),
                        original_md5: live_md5,
                        mod_file_md5: payload_md5,
                    };
                    record.id = self.db.insert_backup(&record)?;
                    debug!("captured original {game_path} -> {}", record.backup_path);
                    records.push(record);
                }
            }
        }
        Ok(records)
    }

    /// Replay originals for `mod_record`'s targets. Every path is
    /// verified before anything is mutated: a single live file that is not
    /// what the manager last wrote there blocks the whole restore with a
    /// typed error and zero mutations.
    pub fn restore_originals(
        &self,
        mod_record: &ModRecord,
        game: &GameInfo,
    ) -> Result<Vec<BackupRecord>> {
        let replaced = self.db.replaced_map_for_game(&game.package_name)?;

        enum Action {
            Skip,
            RemoveAdded(PathBuf),
            Replay(BackupRecord),
            DropRecord(BackupRecord),
        }

        // Verification pass, no mutation.
        let mut actions = Vec::new();
        for game_path in &mod_record.game_file_paths {
            let game_file = Path::new(game_path);

            // While another enabled mod still claims this path, the file
            // legitimately holds mod content; the last one out restores.
            let claimants = self.db.enabled_claimants(game_path, mod_record.id)?;
            if !claimants.is_empty() {
                info!(
                    "{game_path} still claimed by {} enabled mod(s), deferring restore",
                    claimants.len()
                );
                actions.push(Action::Skip);
                continue;
            }

            let Some(backup) = self.db.backup_for_game_file(game_path)? else {
                // Purely additive file: remove it if it is still ours.
                let ours = replaced
                    .get(game_path)
                    .and_then(|r| self.router.md5(game_file).map(|live| live == r.md5))
                    .unwrap_or(false);
                if ours {
                    actions.push(Action::RemoveAdded(game_file.to_path_buf()));
                } else {
                    actions.push(Action::Skip);
                }
                continue;
            };

            if self.router.is_file(game_file) {
                let live_md5 = self.router.md5(game_file).ok_or_else(|| {
                    ModError::BackupFailed(format!("cannot hash live file {game_path}"))
                })?;
                if live_md5 != backup.mod_file_md5 {
                    // The game or another process altered the file since
                    // this mod enabled; blind restoration could destroy
                    // unrelated state.
                    return Err(ModError::GameFileChanged {
                        path: game_path.clone(),
                    }
                    .into());
                }
            }

            if self.router.is_file(Path::new(&backup.backup_path)) {
                actions.push(Action::Replay(backup));
            } else {
                // The backup copy is gone (cache wipe); nothing to replay.
                warn!("backup file missing for {game_path}, leaving live file");
                actions.push(Action::DropRecord(backup));
            }
        }

        // Apply pass.
        let mut restored = Vec::new();
        for action in actions {
            match action {
                Action::Skip => {}
                Action::RemoveAdded(game_file) => {
                    if !self.router.delete(&game_file) {
                        return Err(ModError::DisableFailed {
                            name: mod_record.name.clone(),
                            reason: format!(
                                "cannot remove added file {}",
                                game_file.display()
                            ),
                        }
                        .into());
                    }
                }
                Action::DropRecord(backup) => {
                    self.db.delete_backup(backup.id)?;
                }
                Action::Replay(backup) => {
                    let game_file = Path::new(&backup.game_file_path);
                    if !self.router.copy(Path::new(&backup.backup_path), game_file) {
                        return Err(ModError::DisableFailed {
                            name: mod_record.name.clone(),
                            reason: format!(
                                "restore copy failed for {}",
                                backup.game_file_path
                            ),
                        }
                        .into());
                    }
                    self.db.delete_backup(backup.id)?;
                    debug!("restored original at {}", backup.game_file_path);
                    restored.push(backup);
                }
            }
        }
        Ok(restored)
    }

    /// Paths this game has overwritten externally since we replaced them:
    /// the live digest no longer matches the recorded replacement. Pure
    /// read; hashing fans out across paths.
    pub fn detect_external_changes(&self, game: &GameInfo) -> Result<Vec<ReplacedFileRecord>> {
        let replaced = self.db.replaced_map_for_game(&game.package_name)?;
        let records: Vec<ReplacedFileRecord> = replaced.into_values().collect();
        Ok(records
            .into_par_iter()
            .filter(|record| {
                let live = Path::new(&record.game_file_path);
                match self.router.md5(live) {
                    Some(md5) => md5 != record.md5,
                    None => true,
                }
            })
            .collect())
    }

    /// Drop every stored backup of one game (files and rows).
    pub fn delete_backups_for_game(&self, game: &GameInfo) -> Result<usize> {
        let dir = self.paths.backup_dir_for(&game.package_name);
        self.router.delete(&dir);
        self.db.delete_backups_for_game(&game.package_name)
    }

    /// Digest of the payload content that is about to be placed.
    fn payload_md5(&self, mod_record: &ModRecord, member: &str) -> Result<String> {
        if mod_record.zip_file {
            let data = archive::read_member(
                Path::new(&mod_record.path),
                member,
                mod_record.password.as_deref(),
            )?;
            Ok(hash::md5_bytes(&data))
        } else {
            self.router.md5(Path::new(member)).ok_or_else(|| {
                ModError::BackupFailed(format!("cannot hash payload {member}")).into()
            })
        }
    }

    fn copy_to_backup(&self, game_file: &Path, backup_path: &Path) -> Result<()> {
        if self.router.copy(game_file, backup_path) && self.router.exists(backup_path) {
            Ok(())
        } else {
            Err(ModError::BackupFailed(format!(
                "copy {} -> {} failed",
                game_file.display(),
                backup_path.display()
            ))
            .into())
        }
    }

    /// Backup storage path mirrors the target's layout under the game's
    /// data root.
    fn backup_path_for(&self, game: &GameInfo, game_file: &Path) -> PathBuf {
        let base = self.paths.backup_dir_for(&game.package_name);
        match game_file.strip_prefix(&game.game_path) {
            Ok(relative) => base.join(relative),
            Err(_) => base.join(file_name_of(game_file)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::AccessResolver;
    use crate::db::test_support::sample_mod;
    use crate::helper::HelperChannel;
    use std::fs;

    struct Fixture {
        _tmp: tempfile::TempDir,
        engine: BackupEngine,
        db: Arc<Database>,
        game: GameInfo,
        asset: PathBuf,
    }

    fn fixture() -> Fixture {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().to_path_buf();
        let channel = Arc::new(HelperChannel::new());
        let resolver = Arc::new(AccessResolver::new(vec![root.clone()], Arc::clone(&channel)));
        let router = Arc::new(FileRouter::new(resolver, channel));
        let paths = AppPaths::new(&root, "com.example.vault");
        paths.ensure_layout().unwrap();
        let db = Arc::new(Database::in_memory().unwrap());

        let asset_dir = root.join("Android/data/com.some.game/files/assets/chars");
        fs::create_dir_all(&asset_dir).unwrap();
        let asset = asset_dir.join("hero.png");
        fs::write(&asset, b"original-content").unwrap();

        let game = GameInfo {
            game_name: "Some Game".into(),
            service_name: "global".into(),
            package_name: "com.some.game".into(),
            game_path: root
                .join("Android/data/com.some.game")
                .to_string_lossy()
                .into_owned(),
            mod_save_path: root.join("Mods").to_string_lossy().into_owned(),
            game_file_path: vec![asset_dir.to_string_lossy().into_owned()],
            version: "1.0.0".into(),
            mod_type: vec!["character".into()],
            is_game_file_repeat: false,
            enable_backup: true,
            tips: String::new(),
        };

        let engine = BackupEngine::new(Arc::clone(&db), router, paths);
        Fixture {
            _tmp: tmp,
            engine,
            db,
            game,
            asset,
        }
    }

    /// A loose-file mod targeting the fixture asset, payload on disk.
    fn loose_mod(fx: &Fixture, name: &str, payload: &[u8]) -> ModRecord {
        let payload_path = fx.asset.parent().unwrap().join(format!("{name}.payload"));
        fs::write(&payload_path, payload).unwrap();
        let mut record = sample_mod(name, &fx.game.package_name);
        record.zip_file = false;
        record.mod_files = vec![payload_path.to_string_lossy().into_owned()];
        record.game_file_paths = vec![fx.asset.to_string_lossy().into_owned()];
        record.id = fx.db.insert_mod(&record).unwrap();
        record
    }

    fn mark_replaced(fx: &Fixture, record: &ModRecord, md5: &str) {
        fx.db
            .insert_replaced(&ReplacedFileRecord {
                id: 0,
                mod_id: record.id,
                filename: "hero.png".into(),
                game_file_path: fx.asset.to_string_lossy().into_owned(),
                md5: md5.into(),
                game_package_name: fx.game.package_name.clone(),
                replace_time: now_millis(),
            })
            .unwrap();
    }

    #[test]
    fn first_enable_captures_original() {
        let fx = fixture();
        let record = loose_mod(&fx, "a", b"mod-a-content");
        let backups = fx.engine.backup_originals(&record, &fx.game).unwrap();

        assert_eq!(backups.len(), 1);
        let backup = &backups[0];
        assert_eq!(backup.original_md5, hash::md5_bytes(b"original-content"));
        assert_eq!(backup.mod_file_md5, hash::md5_bytes(b"mod-a-content"));
        assert_eq!(
            fs::read(&backup.backup_path).unwrap(),
            b"original-content"
        );
    }

    #[test]
    fn second_mod_on_same_path_keeps_true_original() {
        let fx = fixture();
        let a = loose_mod(&fx, "a", b"mod-a-content");
        let h1 = hash::md5_bytes(b"original-content");

        fx.engine.backup_originals(&a, &fx.game).unwrap();
        // Mod A's content goes live.
        fs::write(&fx.asset, b"mod-a-content").unwrap();
        mark_replaced(&fx, &a, &hash::md5_bytes(b"mod-a-content"));
        fx.db.set_mod_enabled(a.id, true, now_millis()).unwrap();

        // Mod B enables over the same path without A disabling.
        let b = loose_mod(&fx, "b", b"mod-b-content");
        let backups = fx.engine.backup_originals(&b, &fx.game).unwrap();

        assert_eq!(backups.len(), 1);
        // The original digest is still H1, not mod A's content.
        assert_eq!(backups[0].original_md5, h1);
        assert_eq!(
            fs::read(&backups[0].backup_path).unwrap(),
            b"original-content"
        );
        assert_eq!(backups[0].mod_file_md5, hash::md5_bytes(b"mod-b-content"));
    }

    #[test]
    fn external_change_triggers_recapture() {
        let fx = fixture();
        let a = loose_mod(&fx, "a", b"mod-a-content");
        fx.engine.backup_originals(&a, &fx.game).unwrap();

        // Game update rewrites the asset outside the manager.
        fs::write(&fx.asset, b"updated-by-game").unwrap();

        let b = loose_mod(&fx, "b", b"mod-b-content");
        let backups = fx.engine.backup_originals(&b, &fx.game).unwrap();
        assert_eq!(
            backups[0].original_md5,
            hash::md5_bytes(b"updated-by-game")
        );
        assert_eq!(
            fs::read(&backups[0].backup_path).unwrap(),
            b"updated-by-game"
        );
    }

    #[test]
    fn restore_round_trip() {
        let fx = fixture();
        let record = loose_mod(&fx, "a", b"mod-a-content");
        fx.engine.backup_originals(&record, &fx.game).unwrap();

        fs::write(&fx.asset, b"mod-a-content").unwrap();
        mark_replaced(&fx, &record, &hash::md5_bytes(b"mod-a-content"));

        let restored = fx.engine.restore_originals(&record, &fx.game).unwrap();
        assert_eq!(restored.len(), 1);
        assert_eq!(fs::read(&fx.asset).unwrap(), b"original-content");
        // The consumed backup row is gone.
        assert!(fx
            .db
            .backup_for_game_file(&fx.asset.to_string_lossy())
            .unwrap()
            .is_none());
    }

    #[test]
    fn restore_blocked_when_live_file_changed_externally() {
        let fx = fixture();
        let record = loose_mod(&fx, "a", b"mod-a-content");
        fx.engine.backup_originals(&record, &fx.game).unwrap();
        fs::write(&fx.asset, b"mod-a-content").unwrap();

        // Game update rewrites the file after the mod enabled.
        fs::write(&fx.asset, b"updated-by-game").unwrap();

        let err = fx.engine.restore_originals(&record, &fx.game).unwrap_err();
        assert!(matches!(
            err,
            crate::error::AppError::Mod(ModError::GameFileChanged { .. })
        ));
        // The live file is untouched.
        assert_eq!(fs::read(&fx.asset).unwrap(), b"updated-by-game");
    }

    #[test]
    fn restore_deferred_while_another_mod_claims_path() {
        let fx = fixture();
        let a = loose_mod(&fx, "a", b"mod-a-content");
        let b = loose_mod(&fx, "b", b"mod-b-content");
        fx.engine.backup_originals(&a, &fx.game).unwrap();
        fs::write(&fx.asset, b"mod-b-content").unwrap();
        fx.db.set_mod_enabled(a.id, true, now_millis()).unwrap();
        fx.db.set_mod_enabled(b.id, true, now_millis()).unwrap();

        // Disabling A while B is enabled must not touch the file.
        let restored = fx.engine.restore_originals(&a, &fx.game).unwrap();
        assert!(restored.is_empty());
        assert_eq!(fs::read(&fx.asset).unwrap(), b"mod-b-content");
        assert!(fx
            .db
            .backup_for_game_file(&fx.asset.to_string_lossy())
            .unwrap()
            .is_some());
    }

    #[test]
    fn backups_disabled_for_title() {
        let fx = fixture();
        let mut game = fx.game.clone();
        game.enable_backup = false;
        let record = loose_mod(&fx, "a", b"mod-a-content");
        let backups = fx.engine.backup_originals(&record, &game).unwrap();
        assert!(backups.is_empty());
    }

    #[test]
    fn external_change_detection() {
        let fx = fixture();
        let record = loose_mod(&fx, "a", b"mod-a-content");
        fs::write(&fx.asset, b"mod-a-content").unwrap();
        mark_replaced(&fx, &record, &hash::md5_bytes(b"mod-a-content"));

        // Nothing changed yet.
        assert!(fx.engine.detect_external_changes(&fx.game).unwrap().is_empty());

        fs::write(&fx.asset, b"updated-by-game").unwrap();
        let changed = fx.engine.detect_external_changes(&fx.game).unwrap();
        assert_eq!(changed.len(), 1);
        assert_eq!(
            changed[0].game_file_path,
            fx.asset.to_string_lossy().into_owned()
        );
    }
}
