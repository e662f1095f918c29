//! Mod discovery.
//!
//! The scan pipeline walks candidate source directories (the user's mod
//! folder, downloads, a messaging-app receive folder), relocates anything
//! that looks like a mod for the active game into that game's mod-save
//! directory, drafts mod records out of archives and loose directories
//! there, and reconciles the drafts against the persisted repository.
//!
//! Scans report progress incrementally and honor cooperative cancellation
//! between file-level steps: a cancelled scan keeps everything already
//! relocated or persisted and skips the reconcile phase, so no record is
//! ever half-written.

pub mod diff;
pub mod metadata;

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::access::AccessTier;
use crate::archive;
use crate::config::GameInfo;
use crate::db::{now_millis, Database, ModForm, ModRecord, ScanFileRecord};
use crate::error::{AppError, Result};
use crate::fileops::FileRouter;
use crate::helper::protocol::HelperRequest;
use crate::paths::{file_name_of, file_stem_of, normalize_member, AppPaths};
use crate::special::SpecialGameRegistry;

/// File types never eligible as mod payloads or mod sources.
const EXCLUDED_EXTS: [&str; 8] = ["jpg", "jpeg", "png", "gif", "mp4", "mp3", "ogg", "apk"];

/// Cooperative cancellation flag shared with the caller.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanStep {
    Relocating,
    Listing,
    Drafting,
    Syncing,
}

/// Progress events for UI consumers.
#[derive(Debug, Clone)]
pub enum ScanEvent {
    Step {
        step: ScanStep,
        current_file: String,
        current: usize,
        total: usize,
    },
    ModFound {
        name: String,
    },
}

pub type ProgressFn<'a> = &'a (dyn Fn(ScanEvent) + Send + Sync);

/// No-op progress sink for callers that do not render progress.
pub fn no_progress(_event: ScanEvent) {}

#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    /// Drop the change-detection cache and re-read every source.
    pub force: bool,
    /// Also draft loose (non-archive) directories in the mod-save dir.
    pub scan_directory_mods: bool,
}

#[derive(Debug, Default)]
pub struct ScanOutcome {
    pub added: Vec<ModRecord>,
    pub updated: Vec<ModRecord>,
    pub removed: Vec<ModRecord>,
    /// Records missing on disk but currently enabled: deletion is deferred
    /// to the caller, which must disable them first.
    pub deferred_removals: Vec<ModRecord>,
    /// Source directories no access tier could reach.
    pub permission_failures: Vec<PathBuf>,
    pub relocated: usize,
    pub cancelled: bool,
}

/// A candidate mod drafted from one archive or loose directory, before
/// metadata enrichment.
#[derive(Debug, Clone)]
struct ModDraft {
    name: String,
    source_path: String,
    mod_files: Vec<String>,
    game_file_paths: Vec<String>,
    mod_type: String,
    install_dir: String,
    icon: Option<String>,
    images: Vec<String>,
    readme_path: Option<String>,
    file_readme_path: Option<String>,
    encrypted: bool,
    zip_file: bool,
}

pub struct Scanner {
    db: Arc<Database>,
    router: Arc<FileRouter>,
    paths: AppPaths,
    hooks: Arc<SpecialGameRegistry>,
}

impl Scanner {
    pub fn new(
        db: Arc<Database>,
        router: Arc<FileRouter>,
        paths: AppPaths,
        hooks: Arc<SpecialGameRegistry>,
    ) -> Self {
        Self {
            db,
            router,
            paths,
            hooks,
        }
    }

    /// Run the full pipeline over `sources` for one game.
    pub fn scan(
        &self,
        sources: &[PathBuf],
        game: &GameInfo,
        options: &ScanOptions,
        progress: ProgressFn<'_>,
        cancel: &CancelToken,
    ) -> Result<ScanOutcome> {
        let mut outcome = ScanOutcome::default();
        let mod_save_dir = game.mod_save_dir().to_path_buf();
        self.router.create_directory(&mod_save_dir);

        // Phase 1: relocate matching candidates out of the source dirs.
        for source in sources {
            if cancel.is_cancelled() {
                outcome.cancelled = true;
                return Ok(outcome);
            }
            match self.relocate_source(source, game, progress) {
                Ok(moved) => outcome.relocated += moved,
                Err(AppError::Permission(err)) => {
                    warn!("source {} unreachable: {err}", source.display());
                    outcome.permission_failures.push(source.clone());
                }
                Err(err) => return Err(err),
            }
        }

        if options.force {
            self.db.clear_scan_files(Some(&game.package_name))?;
        }

        // Phase 2: refresh the change-detection cache.
        let mut fresh: HashSet<String> = HashSet::new();
        for row in self.db.scan_files_for_game(&game.package_name)? {
            let path = Path::new(&row.path);
            let unchanged = self.router.is_file(path)
                && self.router.last_modified(path) == Some(row.modified)
                && self.router.file_len(path) == Some(row.size as u64);
            if unchanged {
                fresh.insert(row.path);
            } else {
                debug!("scan cache invalidated for {}", row.path);
                self.db.delete_scan_file(&row.path)?;
            }
        }

        // Phase 3: draft candidates from the mod-save directory.
        let stored = self.db.mods_for_game(&game.package_name)?;
        let mut scanned: Vec<ModRecord> = Vec::new();

        let archives = collect_archives(&mod_save_dir);
        let total = archives.len();
        for (index, file) in archives.iter().enumerate() {
            if cancel.is_cancelled() {
                outcome.cancelled = true;
                return Ok(outcome);
            }
            progress(ScanEvent::Step {
                step: ScanStep::Listing,
                current_file: file_name_of(file),
                current: index + 1,
                total,
            });

            let key = file.to_string_lossy().into_owned();
            if !options.force && fresh.contains(&key) {
                // Unchanged since last scan; carry the stored records over.
                scanned.extend(stored.iter().filter(|m| m.path == key).cloned());
                continue;
            }

            match self.scan_archive(file, game, progress) {
                Ok(mods) => {
                    scanned.extend(mods);
                    self.remember_scan_file(file, game)?;
                }
                // A broken archive is skipped, and deliberately not cached
                // so the next scan retries it.
                Err(AppError::Archive(err)) => {
                    warn!("skipping archive {}: {err}", file.display());
                }
                Err(err) => return Err(err),
            }
        }

        if options.scan_directory_mods {
            if cancel.is_cancelled() {
                outcome.cancelled = true;
                return Ok(outcome);
            }
            scanned.extend(self.scan_loose_dirs(&mod_save_dir, game, progress)?);
        } else {
            // Loose records are out of scope for this pass; carry them
            // through untouched so the diff does not remove them.
            scanned.extend(stored.iter().filter(|m| !m.zip_file).cloned());
        }

        // Phase 4: reconcile against the repository.
        progress(ScanEvent::Step {
            step: ScanStep::Syncing,
            current_file: String::new(),
            current: total,
            total,
        });
        let result = diff::classify(&stored, &scanned);
        for record in &result.added {
            let mut record = record.clone();
            record.id = self.db.insert_mod(&record)?;
            progress(ScanEvent::ModFound {
                name: record.name.clone(),
            });
            outcome.added.push(record);
        }
        for record in &result.updated {
            self.db.update_mod(record)?;
        }
        outcome.updated = result.updated;
        for record in result.removed {
            if record.enabled {
                // Never silently delete an active mod's backing record.
                outcome.deferred_removals.push(record);
            } else {
                self.db.delete_mod(record.id)?;
                outcome.removed.push(record);
            }
        }

        let dropped = self.db.dedupe_mods(&game.package_name)?;
        if dropped > 0 {
            warn!("dropped {dropped} duplicate mod record(s)");
        }

        info!(
            "scan finished: {} added, {} updated, {} removed, {} deferred, {} relocated",
            outcome.added.len(),
            outcome.updated.len(),
            outcome.removed.len(),
            outcome.deferred_removals.len(),
            outcome.relocated,
        );
        Ok(outcome)
    }

    /// Relocate mod candidates from one source directory into the game's
    /// mod-save directory.
    fn relocate_source(
        &self,
        source: &Path,
        game: &GameInfo,
        progress: ProgressFn<'_>,
    ) -> Result<usize> {
        let tier = self.router.resolver().resolve(source);
        match tier {
            AccessTier::None => {
                Err(crate::error::PermissionError::NoAccess(source.to_path_buf()).into())
            }
            AccessTier::PrivilegedHelper => {
                // The helper runs the relocation pass with its own
                // privileges and reports how many files it moved.
                let reply = self
                    .router
                    .resolver()
                    .helper()
                    .call(&HelperRequest::ScanMods {
                        path: source.to_path_buf(),
                        game: game.clone(),
                    })
                    .map_err(AppError::Permission)?;
                Ok(reply.payload.as_u64().unwrap_or(0) as usize)
            }
            AccessTier::DocumentTree => {
                // Stage document-tree sources into the temp area first;
                // archives need random access the tree cannot give.
                let staging = self.paths.temp_dir().join("incoming");
                self.router.create_directory(&staging);
                for name in self.router.list_names(source) {
                    if is_excluded_type(&name) {
                        continue;
                    }
                    let from = source.join(&name);
                    if self.router.is_file(&from) {
                        self.router.copy(&from, &staging.join(&name));
                    }
                }
                let moved =
                    relocate_candidates(&self.router, &staging, game, &self.hooks, progress);
                self.router.delete(&staging);
                Ok(moved)
            }
            AccessTier::DirectFile => Ok(relocate_candidates(
                &self.router,
                source,
                game,
                &self.hooks,
                progress,
            )),
        }
    }

    /// Draft and enrich records out of one archive.
    fn scan_archive(
        &self,
        file: &Path,
        game: &GameInfo,
        progress: ProgressFn<'_>,
    ) -> Result<Vec<ModRecord>> {
        let members = archive::list_members(file)?;
        let encrypted = archive::is_encrypted(file).unwrap_or(false);
        progress(ScanEvent::Step {
            step: ScanStep::Drafting,
            current_file: file_name_of(file),
            current: 0,
            total: members.len(),
        });

        let drafts = self.draft_candidates(Some(file), &members, encrypted, game);
        let mut records = Vec::new();
        for draft in drafts {
            records.push(self.record_from_draft(draft, Some(file), game));
        }
        Ok(records)
    }

    /// Draft records from loose directories under the mod-save dir.
    fn scan_loose_dirs(
        &self,
        mod_save_dir: &Path,
        game: &GameInfo,
        progress: ProgressFn<'_>,
    ) -> Result<Vec<ModRecord>> {
        let mut members = Vec::new();
        for entry in WalkDir::new(mod_save_dir)
            .min_depth(2)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if entry.file_type().is_file() && !archive::is_archive(entry.path()) {
                if let Ok(relative) = entry.path().strip_prefix(mod_save_dir) {
                    members.push(normalize_member(&relative.to_string_lossy()));
                }
            }
        }
        if members.is_empty() {
            return Ok(Vec::new());
        }
        progress(ScanEvent::Step {
            step: ScanStep::Drafting,
            current_file: file_name_of(mod_save_dir),
            current: 0,
            total: members.len(),
        });

        let drafts = self.draft_candidates(None, &members, false, game);
        let mut records = Vec::new();
        for mut draft in drafts {
            // A loose draft's source is its directory under the save dir.
            let dir = Path::new(&draft.mod_files[0])
                .parent()
                .map(|p| mod_save_dir.join(p))
                .unwrap_or_else(|| mod_save_dir.to_path_buf());
            draft.source_path = dir.to_string_lossy().into_owned();
            // Loose payload members become absolute paths.
            draft.mod_files = draft
                .mod_files
                .iter()
                .map(|m| mod_save_dir.join(m).to_string_lossy().into_owned())
                .collect();
            records.push(self.record_from_draft(draft, None, game));
        }
        Ok(records)
    }

    /// Group members into drafts keyed by their parent directory and map
    /// each payload member onto the game file it would replace.
    fn draft_candidates(
        &self,
        archive_path: Option<&Path>,
        members: &[String],
        encrypted: bool,
        game: &GameInfo,
    ) -> Vec<ModDraft> {
        let mut drafts: std::collections::BTreeMap<String, ModDraft> =
            std::collections::BTreeMap::new();

        for member in members {
            let member = normalize_member(member);
            let filename = file_name_of(Path::new(&member));
            if filename.is_empty() || is_excluded_type(&filename) {
                continue;
            }
            let Some((mod_type, install_dir, target)) = self.map_member(&filename, &member, game)
            else {
                continue;
            };

            let key = Path::new(&member)
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_default();
            let draft = drafts.entry(key.clone()).or_insert_with(|| ModDraft {
                name: draft_name(archive_path, &key),
                source_path: archive_path
                    .map(|p| p.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                mod_files: Vec::new(),
                game_file_paths: Vec::new(),
                mod_type,
                install_dir,
                icon: None,
                images: Vec::new(),
                readme_path: None,
                file_readme_path: None,
                encrypted,
                zip_file: archive_path.is_some(),
            });
            draft.mod_files.push(member.clone());
            draft.game_file_paths.push(target);
        }

        // Second pass: associate readmes and preview images with drafts.
        for member in members {
            let member = normalize_member(member);
            let filename = file_name_of(Path::new(&member)).to_lowercase();
            let key = Path::new(&member)
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_default();

            if filename == "readme.txt" || filename == "readme.md" {
                if key.is_empty() {
                    // Root readme applies to every draft in the source.
                    for draft in drafts.values_mut() {
                        draft.file_readme_path = Some(member.clone());
                    }
                } else if let Some(draft) = drafts.get_mut(&key) {
                    draft.readme_path = Some(member.clone());
                }
            } else if is_image_name(&filename) {
                if let Some(draft) = drafts.get_mut(&key) {
                    draft.images.push(member.clone());
                    draft.icon = Some(member.clone());
                }
            }
        }

        drafts.into_values().collect()
    }

    /// Map a payload member onto `(mod_type, install_dir, target path)`,
    /// or `None` when it matches nothing in the game.
    fn map_member(
        &self,
        filename: &str,
        member: &str,
        game: &GameInfo,
    ) -> Option<(String, String, String)> {
        let parent_name = Path::new(member)
            .parent()
            .map(|p| file_name_of(p))
            .unwrap_or_default();

        for (dir, mod_type) in game.game_file_path.iter().zip(game.mod_type.iter()) {
            let dir_path = Path::new(dir);
            let target = if !game.is_game_file_repeat {
                dir_path.join(filename)
            } else if file_name_of(dir_path) == parent_name {
                // Repeating layouts disambiguate by the member's parent
                // directory name.
                dir_path.join(filename)
            } else if parent_name.is_empty() {
                dir_path.join(filename)
            } else {
                dir_path.join(&parent_name).join(filename)
            };
            if self.router.is_file(&target) {
                return Some((
                    mod_type.clone(),
                    target
                        .parent()
                        .unwrap_or(dir_path)
                        .to_string_lossy()
                        .into_owned(),
                    target.to_string_lossy().into_owned(),
                ));
            }
        }

        // No live asset matched; a special hook may still claim the file.
        if self.hooks.recognizes_payload(&game.package_name, member) {
            let dir = game.game_file_path.first()?;
            let mod_type = game.mod_type.first()?.clone();
            let target = Path::new(dir).join(filename);
            return Some((
                mod_type,
                dir.clone(),
                target.to_string_lossy().into_owned(),
            ));
        }
        None
    }

    /// Build the persistent record for a draft, enriching it with readme
    /// metadata and cached images.
    fn record_from_draft(
        &self,
        draft: ModDraft,
        archive_path: Option<&Path>,
        game: &GameInfo,
    ) -> ModRecord {
        let now = now_millis();
        let created_at = archive_path
            .and_then(|p| self.router.last_modified(p))
            .unwrap_or(now);
        let mut record = ModRecord {
            id: 0,
            name: draft.name,
            description: None,
            author: None,
            version: Some("1.0".to_string()),
            created_at,
            updated_at: now,
            path: draft.source_path,
            mod_files: draft.mod_files,
            game_file_paths: draft.game_file_paths,
            encrypted: draft.encrypted,
            password: None,
            enabled: false,
            zip_file: draft.zip_file,
            game_package_name: game.package_name.clone(),
            install_dir: draft.install_dir,
            mod_type: draft.mod_type,
            mod_form: ModForm::Legacy,
            icon: draft.icon,
            images: draft.images,
            readme_path: draft.readme_path,
            file_readme_path: draft.file_readme_path,
        };

        if record.encrypted {
            record.version = None;
            record.description = Some("encrypted archive, details unavailable".to_string());
            return record;
        }

        match archive_path {
            Some(path) => {
                metadata::apply_archive_readme(&mut record, path);
                metadata::cache_archive_images(&mut record, path, &self.paths);
            }
            None => {
                let readme = record
                    .readme_path
                    .clone()
                    .or_else(|| record.file_readme_path.clone());
                if let Some(member) = readme {
                    metadata::apply_loose_readme(
                        &mut record,
                        &game.mod_save_dir().join(member),
                    );
                }
            }
        }
        record
    }

    fn remember_scan_file(&self, file: &Path, game: &GameInfo) -> Result<()> {
        let record = ScanFileRecord {
            id: 0,
            path: file.to_string_lossy().into_owned(),
            name: file_name_of(file),
            modified: self.router.last_modified(file).unwrap_or(0),
            size: self.router.file_len(file).unwrap_or(0) as i64,
            is_dir: false,
            md5: self.router.md5(file).unwrap_or_default(),
            game_package_name: game.package_name.clone(),
        };
        self.db.upsert_scan_file(&record)
    }
}

/// The relocation pass over one directory: archives (and loose files)
/// whose content matches a live game asset, or is claimed by a special
/// hook, move into the game's mod-save directory. The move verifies the
/// destination before the source counts as disposed; unmatched files stay
/// where they are.
pub fn relocate_candidates(
    router: &FileRouter,
    dir: &Path,
    game: &GameInfo,
    hooks: &SpecialGameRegistry,
    progress: ProgressFn<'_>,
) -> usize {
    let live_assets = live_asset_names(router, game);
    let mod_save_dir = game.mod_save_dir().to_path_buf();
    let entries = router.list_files(dir);
    let total = entries.len();
    let mut moved = 0;

    for (index, entry) in entries.iter().enumerate() {
        progress(ScanEvent::Step {
            step: ScanStep::Relocating,
            current_file: file_name_of(&entry.path),
            current: index + 1,
            total,
        });
        if entry.is_dir {
            continue;
        }
        let filename = file_name_of(&entry.path);
        if is_excluded_type(&filename) {
            continue;
        }
        // Skip anything already inside the save dir.
        if entry.path.starts_with(&mod_save_dir) {
            continue;
        }

        let matches = if archive::is_archive(&entry.path) {
            match archive::list_members(&entry.path) {
                Ok(members) => members.iter().any(|member| {
                    let name = file_name_of(Path::new(member));
                    live_assets.contains(&name)
                        || hooks.recognizes_payload(&game.package_name, member)
                }),
                Err(err) => {
                    warn!("unreadable archive {}: {err}", entry.path.display());
                    false
                }
            }
        } else {
            live_assets.contains(&filename)
                || hooks.recognizes_payload(&game.package_name, &filename)
        };
        if !matches {
            continue;
        }

        let dest = mod_save_dir.join(&filename);
        if router.move_file(&entry.path, &dest) && router.exists(&dest) {
            debug!("relocated {} -> {}", entry.path.display(), dest.display());
            moved += 1;
        } else {
            warn!("failed to relocate {}", entry.path.display());
        }
    }
    moved
}

/// Names of every live asset file across the game's asset directories.
fn live_asset_names(router: &FileRouter, game: &GameInfo) -> HashSet<String> {
    let mut names = HashSet::new();
    for dir in &game.game_file_path {
        for name in router.list_names(Path::new(dir)) {
            names.insert(name);
        }
    }
    names
}

fn collect_archives(dir: &Path) -> Vec<PathBuf> {
    let mut archives: Vec<PathBuf> = WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| !is_excluded_type(&file_name_of(p)) && archive::is_archive(p))
        .collect();
    archives.sort();
    archives
}

fn is_excluded_type(filename: &str) -> bool {
    Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|ext| EXCLUDED_EXTS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

fn is_image_name(filename: &str) -> bool {
    Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|ext| matches!(ext.to_lowercase().as_str(), "jpg" | "jpeg" | "png" | "gif"))
        .unwrap_or(false)
}

fn draft_name(archive_path: Option<&Path>, key: &str) -> String {
    match archive_path {
        Some(path) => {
            let stem = file_stem_of(path);
            if key.is_empty() {
                stem
            } else {
                format!("{stem}({})", key.replace('/', "|"))
            }
        }
        None => {
            if key.is_empty() {
                "loose files".to_string()
            } else {
                key.replace('/', "|")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::AccessResolver;
    use crate::helper::HelperChannel;
    use std::fs;
    use std::io::Write;

    struct Fixture {
        _tmp: tempfile::TempDir,
        scanner: Scanner,
        game: GameInfo,
        source_dir: PathBuf,
        asset_dir: PathBuf,
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
        fs::write(asset_dir.join("hero.png"), b"original-hero").unwrap();

        let source_dir = root.join("Download");
        fs::create_dir_all(&source_dir).unwrap();

        let game = GameInfo {
            game_name: "Some Game".into(),
            service_name: "global".into(),
            package_name: "com.some.game".into(),
            game_path: root
                .join("Android/data/com.some.game")
                .to_string_lossy()
                .into_owned(),
            mod_save_path: root
                .join("Download/Mods/com.some.game")
                .to_string_lossy()
                .into_owned(),
            game_file_path: vec![asset_dir.to_string_lossy().into_owned()],
            version: "1.0.0".into(),
            mod_type: vec!["character".into()],
            is_game_file_repeat: false,
            enable_backup: true,
            tips: String::new(),
        };

        let scanner = Scanner::new(
            db,
            router,
            paths,
            Arc::new(SpecialGameRegistry::builtin()),
        );
        Fixture {
            _tmp: tmp,
            scanner,
            game,
            source_dir,
            asset_dir,
        }
    }

    fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
        let file = fs::File::create(path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default();
        for (member, data) in entries {
            writer.start_file(*member, options).unwrap();
            writer.write_all(data).unwrap();
        }
        writer.finish().unwrap();
    }

    #[test]
    fn matching_archive_is_relocated_and_recorded() {
        let fx = fixture();
        let zip_path = fx.source_dir.join("skin.zip");
        write_zip(&zip_path, &[("chars/hero.png", b"modded-hero")]);

        let outcome = fx
            .scanner
            .scan(
                &[fx.source_dir.clone()],
                &fx.game,
                &ScanOptions::default(),
                &no_progress,
                &CancelToken::new(),
            )
            .unwrap();

        assert_eq!(outcome.relocated, 1);
        assert!(!zip_path.exists());
        let relocated = fx.game.mod_save_dir().join("skin.zip");
        assert!(relocated.exists());

        assert_eq!(outcome.added.len(), 1);
        let record = &outcome.added[0];
        assert_eq!(record.mod_files, vec!["chars/hero.png".to_string()]);
        assert_eq!(
            record.game_file_paths,
            vec![fx.asset_dir.join("hero.png").to_string_lossy().into_owned()]
        );
        assert!(record.zip_file);
        assert!(!record.enabled);
    }

    #[test]
    fn unmatched_archive_stays_in_place() {
        let fx = fixture();
        let zip_path = fx.source_dir.join("unrelated.zip");
        write_zip(&zip_path, &[("docs/manual.pdf", b"pdf")]);

        let outcome = fx
            .scanner
            .scan(
                &[fx.source_dir.clone()],
                &fx.game,
                &ScanOptions::default(),
                &no_progress,
                &CancelToken::new(),
            )
            .unwrap();

        assert_eq!(outcome.relocated, 0);
        assert!(zip_path.exists());
        assert!(outcome.added.is_empty());
    }

    #[test]
    fn second_scan_of_unchanged_dir_is_quiet() {
        let fx = fixture();
        write_zip(
            &fx.source_dir.join("skin.zip"),
            &[("chars/hero.png", b"modded-hero")],
        );

        let first = fx
            .scanner
            .scan(
                &[fx.source_dir.clone()],
                &fx.game,
                &ScanOptions::default(),
                &no_progress,
                &CancelToken::new(),
            )
            .unwrap();
        assert_eq!(first.added.len(), 1);

        let second = fx
            .scanner
            .scan(
                &[fx.source_dir.clone()],
                &fx.game,
                &ScanOptions::default(),
                &no_progress,
                &CancelToken::new(),
            )
            .unwrap();
        assert!(second.added.is_empty());
        assert!(second.updated.is_empty());
        assert!(second.removed.is_empty());
    }

    #[test]
    fn readme_metadata_is_applied() {
        let fx = fixture();
        write_zip(
            &fx.source_dir.join("skin.zip"),
            &[
                ("chars/hero.png", b"modded-hero"),
                ("chars/readme.txt", "名称：Hero Redux\n作者：tester\n版本：3.0\n".as_bytes()),
            ],
        );

        let outcome = fx
            .scanner
            .scan(
                &[fx.source_dir.clone()],
                &fx.game,
                &ScanOptions::default(),
                &no_progress,
                &CancelToken::new(),
            )
            .unwrap();

        assert_eq!(outcome.added.len(), 1);
        let record = &outcome.added[0];
        assert_eq!(record.name, "Hero Redux");
        assert_eq!(record.author.as_deref(), Some("tester"));
        assert_eq!(record.version.as_deref(), Some("3.0"));
    }

    #[test]
    fn missing_disabled_mod_is_removed_enabled_is_deferred() {
        let fx = fixture();
        write_zip(
            &fx.source_dir.join("a.zip"),
            &[("chars/hero.png", b"mod-a")],
        );
        let outcome = fx
            .scanner
            .scan(
                &[fx.source_dir.clone()],
                &fx.game,
                &ScanOptions::default(),
                &no_progress,
                &CancelToken::new(),
            )
            .unwrap();
        let record = &outcome.added[0];

        // Enable it, then delete the backing archive.
        fx.scanner
            .db
            .set_mod_enabled(record.id, true, now_millis())
            .unwrap();
        fs::remove_file(fx.game.mod_save_dir().join("a.zip")).unwrap();

        let second = fx
            .scanner
            .scan(
                &[fx.source_dir.clone()],
                &fx.game,
                &ScanOptions::default(),
                &no_progress,
                &CancelToken::new(),
            )
            .unwrap();
        assert_eq!(second.deferred_removals.len(), 1);
        assert!(second.removed.is_empty());
        // Record still present in the store.
        assert!(fx.scanner.db.get_mod(record.id).unwrap().is_some());

        // Disable and rescan: now it really goes away.
        fx.scanner
            .db
            .set_mod_enabled(record.id, false, now_millis())
            .unwrap();
        let third = fx
            .scanner
            .scan(
                &[fx.source_dir.clone()],
                &fx.game,
                &ScanOptions::default(),
                &no_progress,
                &CancelToken::new(),
            )
            .unwrap();
        assert_eq!(third.removed.len(), 1);
        assert!(fx.scanner.db.get_mod(record.id).unwrap().is_none());
    }

    #[test]
    fn cancellation_skips_reconcile() {
        let fx = fixture();
        write_zip(
            &fx.source_dir.join("skin.zip"),
            &[("chars/hero.png", b"mod")],
        );
        let cancel = CancelToken::new();
        cancel.cancel();
        let outcome = fx
            .scanner
            .scan(
                &[fx.source_dir.clone()],
                &fx.game,
                &ScanOptions::default(),
                &no_progress,
                &cancel,
            )
            .unwrap();
        assert!(outcome.cancelled);
        assert!(outcome.added.is_empty());
    }

    #[test]
    fn unreachable_source_is_surfaced_not_fatal() {
        let fx = fixture();
        let outside = PathBuf::from("/no/grant/here");
        let outcome = fx
            .scanner
            .scan(
                &[outside.clone()],
                &fx.game,
                &ScanOptions::default(),
                &no_progress,
                &CancelToken::new(),
            )
            .unwrap();
        assert_eq!(outcome.permission_failures, vec![outside]);
    }
}
