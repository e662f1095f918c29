//! The mod enable/disable state machine.
//!
//! One mod moves `Disabled -> Enabling -> Enabled -> Disabling -> Disabled`;
//! any error drops it back to the stable state it came from. The
//! orchestrator is the serialization point per mod id — a mod that is
//! already mid-transition refuses a second operation — and drives the
//! backup engine, the file facade and the per-game hook in the required
//! order: backup, place, hook on enable; restore, clear, hook on disable.
//!
//! A multi-file mod is all-or-nothing: if any single file fails to place,
//! the whole enable fails, already-placed files are rolled back through
//! the backup engine, and the mod is reported failed instead of being left
//! half-applied with its flag set.

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex};

use tracing::{info, warn};

use crate::archive;
use crate::backup::BackupEngine;
use crate::config::GameInfo;
use crate::db::{now_millis, Database, ModRecord, ReplacedFileRecord};
use crate::error::{AppError, ArchiveError, ModError, PermissionError, Result};
use crate::fileops::FileRouter;
use crate::paths::{file_name_of, file_stem_of, AppPaths};
use crate::scanner::CancelToken;
use crate::special::{HookContext, SpecialGameRegistry};

/// Lifecycle states of one mod.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModState {
    Disabled,
    Enabling,
    Enabled,
    Disabling,
}

/// Result of a batch enable/disable.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub succeeded: Vec<ModRecord>,
    pub failed: Vec<(ModRecord, String)>,
    /// Encrypted mods halted for a password; no files were touched.
    pub password_required: Vec<ModRecord>,
    /// Non-fatal special-hook failures.
    pub hook_warnings: Vec<String>,
    pub cancelled: bool,
}

impl BatchOutcome {
    pub fn all_succeeded(&self) -> bool {
        self.failed.is_empty() && self.password_required.is_empty()
    }
}

pub struct Orchestrator {
    db: Arc<Database>,
    router: Arc<FileRouter>,
    paths: AppPaths,
    engine: BackupEngine,
    hooks: Arc<SpecialGameRegistry>,
    /// Mods currently mid-transition.
    in_flight: Mutex<HashSet<i64>>,
}

impl Orchestrator {
    pub fn new(
        db: Arc<Database>,
        router: Arc<FileRouter>,
        paths: AppPaths,
        hooks: Arc<SpecialGameRegistry>,
    ) -> Self {
        let engine = BackupEngine::new(Arc::clone(&db), Arc::clone(&router), paths.clone());
        Self {
            db,
            router,
            paths,
            engine,
            hooks,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub fn backup_engine(&self) -> &BackupEngine {
        &self.engine
    }

    /// Enable a batch of mods. Mods are processed sequentially; each one
    /// runs to completion (or failure) before the next starts and before
    /// cancellation is honored.
    pub fn enable_mods(
        &self,
        ids: &[i64],
        game: &GameInfo,
        cancel: &CancelToken,
    ) -> Result<BatchOutcome> {
        let mut outcome = BatchOutcome::default();
        for &id in ids {
            if cancel.is_cancelled() {
                outcome.cancelled = true;
                break;
            }
            let Some(record) = self.db.get_mod(id)? else {
                warn!("enable requested for unknown mod {id}");
                continue;
            };
            if record.enabled {
                continue;
            }
            if record.encrypted && record.password.is_none() {
                outcome.password_required.push(record);
                continue;
            }
            match self.enable_one(&record, game, &mut outcome.hook_warnings) {
                Ok(()) => outcome.succeeded.push(record),
                Err(err) => {
                    warn!("enable failed for {}: {err}", record.name);
                    outcome.failed.push((record, err.to_string()));
                }
            }
        }
        Ok(outcome)
    }

    /// Disable a batch of mods, sequentially per the same rules.
    pub fn disable_mods(
        &self,
        ids: &[i64],
        game: &GameInfo,
        cancel: &CancelToken,
    ) -> Result<BatchOutcome> {
        let mut outcome = BatchOutcome::default();
        for &id in ids {
            if cancel.is_cancelled() {
                outcome.cancelled = true;
                break;
            }
            let Some(record) = self.db.get_mod(id)? else {
                continue;
            };
            if !record.enabled {
                continue;
            }
            match self.disable_one(&record, game, &mut outcome.hook_warnings) {
                Ok(()) => outcome.succeeded.push(record),
                Err(err) => {
                    warn!("disable failed for {}: {err}", record.name);
                    outcome.failed.push((record, err.to_string()));
                }
            }
        }
        Ok(outcome)
    }

    /// Delete mods: enabled ones are disabled first; a failed disable
    /// blocks the deletion of that mod.
    pub fn delete_mods(
        &self,
        ids: &[i64],
        game: &GameInfo,
        cancel: &CancelToken,
    ) -> Result<BatchOutcome> {
        let mut outcome = BatchOutcome::default();
        for &id in ids {
            if cancel.is_cancelled() {
                outcome.cancelled = true;
                break;
            }
            let Some(record) = self.db.get_mod(id)? else {
                continue;
            };
            if record.enabled {
                if let Err(err) = self.disable_one(&record, game, &mut outcome.hook_warnings) {
                    outcome.failed.push((record, err.to_string()));
                    continue;
                }
            }
            // Source archive goes with the record; loose sources stay.
            if record.zip_file {
                self.router.delete(Path::new(&record.path));
            }
            self.db.delete_mod(record.id)?;
            outcome.succeeded.push(record);
        }
        Ok(outcome)
    }

    /// Validate and cache an archive password on the record.
    pub fn set_password(&self, id: i64, password: &str) -> Result<()> {
        let record = self
            .db
            .get_mod(id)?
            .ok_or_else(|| ModError::MalformedMetadata(format!("unknown mod {id}")))?;
        if !record.zip_file {
            return Err(ModError::MalformedMetadata(format!(
                "mod {} is not an archive",
                record.name
            ))
            .into());
        }
        let source = Path::new(&record.path);
        if !archive::verify_password(source, password)? {
            return Err(ArchiveError::WrongPassword(source.to_path_buf()).into());
        }
        self.db.set_mod_password(id, Some(password))?;
        Ok(())
    }

    /// Launch-time hook dispatch (pak-manifest injection and friends).
    pub fn start_game(&self, game: &GameInfo) -> Result<()> {
        self.hooks.on_game_start(game, &self.hook_context())
    }

    fn hook_context(&self) -> HookContext {
        HookContext {
            router: Arc::clone(&self.router),
            paths: self.paths.clone(),
        }
    }

    fn enable_one(
        &self,
        record: &ModRecord,
        game: &GameInfo,
        hook_warnings: &mut Vec<String>,
    ) -> Result<()> {
        let _guard = self.claim(record.id)?;
        info!("mod {} ({}): {:?} -> {:?}", record.id, record.name, ModState::Disabled, ModState::Enabling);

        // Validation before any mutation.
        if record.mod_files.is_empty() {
            return Err(ModError::MissingPayload(record.name.clone()).into());
        }
        if !self.router.exists(Path::new(&record.path)) {
            return Err(ModError::SourceMissing(record.name.clone()).into());
        }
        let install_dir = Path::new(&record.install_dir);
        if !self
            .router
            .resolver()
            .resolve(install_dir)
            .is_usable()
        {
            return Err(PermissionError::NoAccess(install_dir.to_path_buf()).into());
        }

        // Capture originals, then place the payload.
        self.engine.backup_originals(record, game)?;
        if let Err(err) = self.place_payload(record, game) {
            // Roll the already-placed files back; the mod must not stay
            // half-applied. If the rollback itself fails, the replaced-file
            // rows are kept — they record what actually reached the game
            // directory and keep later backup decisions honest.
            match self.engine.restore_originals(record, game) {
                Ok(_) => {
                    self.db.delete_replaced_for_mod(record.id)?;
                }
                Err(rollback) => {
                    warn!("rollback after failed enable also failed: {rollback}");
                }
            }
            return Err(err);
        }

        // Game-side bookkeeping is best-effort: a hook failure is
        // surfaced, never rolled back over a successful file swap.
        if let Err(err) = self.hooks.on_enable(record, game, &self.hook_context()) {
            warn!("post-enable hook failed for {}: {err}", record.name);
            hook_warnings.push(format!("{}: {err}", record.name));
        }

        self.db.set_mod_enabled(record.id, true, now_millis())?;
        info!("mod {} ({}): {:?} -> {:?}", record.id, record.name, ModState::Enabling, ModState::Enabled);
        Ok(())
    }

    fn disable_one(
        &self,
        record: &ModRecord,
        game: &GameInfo,
        hook_warnings: &mut Vec<String>,
    ) -> Result<()> {
        let _guard = self.claim(record.id)?;
        info!("mod {} ({}): {:?} -> {:?}", record.id, record.name, ModState::Enabled, ModState::Disabling);

        let backups = self.engine.restore_originals(record, game)?;
        self.db.delete_replaced_for_mod(record.id)?;
        self.db.set_mod_enabled(record.id, false, now_millis())?;

        if let Err(err) = self
            .hooks
            .on_disable(record, &backups, game, &self.hook_context())
        {
            warn!("post-disable hook failed for {}: {err}", record.name);
            hook_warnings.push(format!("{}: {err}", record.name));
        }
        info!("mod {} ({}): {:?} -> {:?}", record.id, record.name, ModState::Disabling, ModState::Disabled);
        Ok(())
    }

    /// Place every payload file, recording a replaced-file row per target.
    fn place_payload(&self, record: &ModRecord, game: &GameInfo) -> Result<()> {
        // Archive payloads are extracted once into the unzip area, then
        // copied per target through the facade.
        let staged_root = if record.zip_file {
            let source = Path::new(&record.path);
            let dir = self
                .paths
                .unzip_dir()
                .join(&game.package_name)
                .join(file_stem_of(source));
            archive::extract_members(
                source,
                &record.mod_files,
                &dir,
                record.password.as_deref(),
            )?;
            Some(dir)
        } else {
            None
        };

        for (member, game_path) in record.mod_files.iter().zip(record.game_file_paths.iter()) {
            let target = Path::new(game_path);
            let source = match &staged_root {
                Some(root) => root.join(member),
                None => Path::new(member).to_path_buf(),
            };
            if !self.router.copy(&source, target) {
                return Err(ModError::EnableFailed {
                    name: record.name.clone(),
                    reason: format!("failed to place {game_path}"),
                }
                .into());
            }
            let md5 = self.router.md5(target).ok_or_else(|| {
                AppError::from(ModError::EnableFailed {
                    name: record.name.clone(),
                    reason: format!("cannot hash placed file {game_path}"),
                })
            })?;
            self.db.insert_replaced(&ReplacedFileRecord {
                id: 0,
                mod_id: record.id,
                filename: file_name_of(target),
                game_file_path: game_path.clone(),
                md5,
                game_package_name: game.package_name.clone(),
                replace_time: now_millis(),
            })?;
        }

        if let Some(dir) = staged_root {
            self.router.delete(&dir);
        }
        Ok(())
    }

    /// Mark a mod as mid-transition; the guard releases it on drop.
    fn claim(&self, id: i64) -> Result<InFlightGuard<'_>> {
        let mut in_flight = self.in_flight.lock().unwrap();
        if !in_flight.insert(id) {
            return Err(ModError::EnableFailed {
                name: format!("mod {id}"),
                reason: "operation already in progress".to_string(),
            }
            .into());
        }
        Ok(InFlightGuard {
            orchestrator: self,
            id,
        })
    }
}

struct InFlightGuard<'a> {
    orchestrator: &'a Orchestrator,
    id: i64,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.orchestrator
            .in_flight
            .lock()
            .unwrap()
            .remove(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::AccessResolver;
    use crate::db::test_support::sample_mod;
    use crate::hash;
    use crate::helper::HelperChannel;
    use std::fs;
    use std::io::Write;
    use std::path::PathBuf;

    struct Fixture {
        _tmp: tempfile::TempDir,
        orchestrator: Orchestrator,
        db: Arc<Database>,
        game: GameInfo,
        asset: PathBuf,
        save_dir: PathBuf,
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

        let save_dir = root.join("Download/Mods/com.some.game");
        fs::create_dir_all(&save_dir).unwrap();

        let game = GameInfo {
            game_name: "Some Game".into(),
            service_name: "global".into(),
            package_name: "com.some.game".into(),
            game_path: root
                .join("Android/data/com.some.game")
                .to_string_lossy()
                .into_owned(),
            mod_save_path: save_dir.to_string_lossy().into_owned(),
            game_file_path: vec![asset_dir.to_string_lossy().into_owned()],
            version: "1.0.0".into(),
            mod_type: vec!["character".into()],
            is_game_file_repeat: false,
            enable_backup: true,
            tips: String::new(),
        };

        let orchestrator = Orchestrator::new(
            Arc::clone(&db),
            router,
            paths,
            Arc::new(SpecialGameRegistry::empty()),
        );
        Fixture {
            _tmp: tmp,
            orchestrator,
            db,
            game,
            asset,
            save_dir,
        }
    }

    fn zip_mod(fx: &Fixture, name: &str, payload: &[u8], password: Option<&str>) -> ModRecord {
        let zip_path = fx.save_dir.join(format!("{name}.zip"));
        let file = fs::File::create(&zip_path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        let options = match password {
            Some(pass) => zip::write::SimpleFileOptions::default()
                .with_aes_encryption(zip::AesMode::Aes256, pass),
            None => zip::write::SimpleFileOptions::default(),
        };
        writer.start_file("chars/hero.png", options).unwrap();
        writer.write_all(payload).unwrap();
        writer.finish().unwrap();

        let mut record = sample_mod(name, &fx.game.package_name);
        record.path = zip_path.to_string_lossy().into_owned();
        record.encrypted = password.is_some();
        record.mod_files = vec!["chars/hero.png".into()];
        record.game_file_paths = vec![fx.asset.to_string_lossy().into_owned()];
        record.install_dir = fx.asset.parent().unwrap().to_string_lossy().into_owned();
        record.id = fx.db.insert_mod(&record).unwrap();
        record
    }

    #[test]
    fn enable_then_disable_round_trips_bytes() {
        let fx = fixture();
        let record = zip_mod(&fx, "skin", b"modded-hero", None);
        let original_md5 = hash::md5_file(&fx.asset).unwrap();

        let outcome = fx
            .orchestrator
            .enable_mods(&[record.id], &fx.game, &CancelToken::new())
            .unwrap();
        assert!(outcome.all_succeeded(), "failed: {:?}", outcome.failed);
        assert_eq!(fs::read(&fx.asset).unwrap(), b"modded-hero");
        assert!(fx.db.get_mod(record.id).unwrap().unwrap().enabled);
        // A backup now shadows the path.
        assert!(fx
            .db
            .backup_for_game_file(&fx.asset.to_string_lossy())
            .unwrap()
            .is_some());

        let outcome = fx
            .orchestrator
            .disable_mods(&[record.id], &fx.game, &CancelToken::new())
            .unwrap();
        assert!(outcome.all_succeeded());
        assert_eq!(fs::read(&fx.asset).unwrap(), b"original-content");
        assert_eq!(hash::md5_file(&fx.asset).unwrap(), original_md5);
        assert!(!fx.db.get_mod(record.id).unwrap().unwrap().enabled);
    }

    #[test]
    fn encrypted_mod_without_password_halts_untouched() {
        let fx = fixture();
        let record = zip_mod(&fx, "locked", b"modded-hero", Some("pw123"));

        let outcome = fx
            .orchestrator
            .enable_mods(&[record.id], &fx.game, &CancelToken::new())
            .unwrap();
        assert_eq!(outcome.password_required.len(), 1);
        assert!(outcome.succeeded.is_empty());
        // No files were touched.
        assert_eq!(fs::read(&fx.asset).unwrap(), b"original-content");
        assert!(!fx.db.get_mod(record.id).unwrap().unwrap().enabled);
    }

    #[test]
    fn password_flow_unlocks_enable() {
        let fx = fixture();
        let record = zip_mod(&fx, "locked", b"modded-hero", Some("pw123"));

        assert!(matches!(
            fx.orchestrator.set_password(record.id, "wrong"),
            Err(AppError::Archive(ArchiveError::WrongPassword(_)))
        ));
        fx.orchestrator.set_password(record.id, "pw123").unwrap();

        let outcome = fx
            .orchestrator
            .enable_mods(&[record.id], &fx.game, &CancelToken::new())
            .unwrap();
        assert!(outcome.all_succeeded(), "failed: {:?}", outcome.failed);
        assert_eq!(fs::read(&fx.asset).unwrap(), b"modded-hero");
    }

    #[test]
    fn missing_source_fails_cleanly() {
        let fx = fixture();
        let record = zip_mod(&fx, "gone", b"modded-hero", None);
        fs::remove_file(&record.path).unwrap();

        let outcome = fx
            .orchestrator
            .enable_mods(&[record.id], &fx.game, &CancelToken::new())
            .unwrap();
        assert_eq!(outcome.failed.len(), 1);
        assert!(!fx.db.get_mod(record.id).unwrap().unwrap().enabled);
        assert_eq!(fs::read(&fx.asset).unwrap(), b"original-content");
    }

    #[test]
    fn stacked_mods_restore_in_reverse() {
        let fx = fixture();
        let a = zip_mod(&fx, "a", b"content-a", None);
        let b = zip_mod(&fx, "b", b"content-b", None);
        let cancel = CancelToken::new();

        assert!(fx
            .orchestrator
            .enable_mods(&[a.id], &fx.game, &cancel)
            .unwrap()
            .all_succeeded());
        assert!(fx
            .orchestrator
            .enable_mods(&[b.id], &fx.game, &cancel)
            .unwrap()
            .all_succeeded());
        assert_eq!(fs::read(&fx.asset).unwrap(), b"content-b");

        // The shared backup still holds the true original.
        let backup = fx
            .db
            .backup_for_game_file(&fx.asset.to_string_lossy())
            .unwrap()
            .unwrap();
        assert_eq!(backup.original_md5, hash::md5_bytes(b"original-content"));

        // Disabling A first leaves B's content in place.
        assert!(fx
            .orchestrator
            .disable_mods(&[a.id], &fx.game, &cancel)
            .unwrap()
            .all_succeeded());
        assert_eq!(fs::read(&fx.asset).unwrap(), b"content-b");

        // Disabling B (the last claimant) restores the original.
        assert!(fx
            .orchestrator
            .disable_mods(&[b.id], &fx.game, &cancel)
            .unwrap()
            .all_succeeded());
        assert_eq!(fs::read(&fx.asset).unwrap(), b"original-content");
    }

    #[test]
    fn delete_disables_first() {
        let fx = fixture();
        let record = zip_mod(&fx, "skin", b"modded-hero", None);
        let cancel = CancelToken::new();
        fx.orchestrator
            .enable_mods(&[record.id], &fx.game, &cancel)
            .unwrap();

        let outcome = fx
            .orchestrator
            .delete_mods(&[record.id], &fx.game, &cancel)
            .unwrap();
        assert!(outcome.all_succeeded());
        assert_eq!(fs::read(&fx.asset).unwrap(), b"original-content");
        assert!(fx.db.get_mod(record.id).unwrap().is_none());
        assert!(!Path::new(&record.path).exists());
    }
}
