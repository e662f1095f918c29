//! Per-game JSON descriptors.
//!
//! Each supported game ships as a `GameConfig/<package>.json` descriptor
//! telling the engine where the game keeps its asset directories, where
//! relocated mods should be saved, and whether originals must be backed up.
//! Descriptors dropped into the shared download area are validated and
//! imported into the app-private `GameConfig/` directory.

use std::path::Path;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{GameConfigError, Result};
use crate::paths::AppPaths;

/// Descriptor for one game title (one service/variant of it).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameInfo {
    pub game_name: String,
    pub service_name: String,
    pub package_name: String,
    /// The game's data root under shared storage.
    pub game_path: String,
    /// Where relocated mod archives are kept for this game.
    #[serde(default)]
    pub mod_save_path: String,
    /// In-game asset directories considered for collision checks.
    pub game_file_path: Vec<String>,
    #[serde(default)]
    pub version: String,
    /// Human-readable mod type labels, parallel to `game_file_path`.
    pub mod_type: Vec<String>,
    /// Whether the same asset filename may legitimately appear in more
    /// than one of the asset directories.
    #[serde(default = "default_true")]
    pub is_game_file_repeat: bool,
    /// Titles that never verify originals can opt out of backups.
    #[serde(default = "default_true")]
    pub enable_backup: bool,
    #[serde(default)]
    pub tips: String,
}

fn default_true() -> bool {
    true
}

fn package_name_re() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| {
        regex::Regex::new(r"^[a-zA-Z_][a-zA-Z0-9_]*(\.[a-zA-Z_][a-zA-Z0-9_]*)+$").unwrap()
    })
}

impl GameInfo {
    /// Validate required fields and the parallel-list invariant.
    pub fn validate(&self) -> Result<(), GameConfigError> {
        if self.game_name.trim().is_empty() {
            return Err(GameConfigError::EmptyName);
        }
        if self.package_name.trim().is_empty() {
            return Err(GameConfigError::EmptyField("packageName"));
        }
        if !package_name_re().is_match(&self.package_name) {
            return Err(GameConfigError::InvalidPackageName(
                self.package_name.clone(),
            ));
        }
        if self.service_name.trim().is_empty() {
            return Err(GameConfigError::EmptyField("serviceName"));
        }
        if self.game_path.trim().is_empty() {
            return Err(GameConfigError::EmptyField("gamePath"));
        }
        if self.game_file_path.is_empty() {
            return Err(GameConfigError::EmptyField("gameFilePath"));
        }
        if self.mod_type.is_empty() {
            return Err(GameConfigError::EmptyField("modType"));
        }
        if self.game_file_path.len() != self.mod_type.len() {
            return Err(GameConfigError::MismatchedLists {
                paths: self.game_file_path.len(),
                types: self.mod_type.len(),
            });
        }
        Ok(())
    }

    /// Rewrite relative descriptor paths into absolute ones under `paths`'
    /// storage root, and default the mod-save path if unset.
    pub fn normalized(mut self, paths: &AppPaths) -> Self {
        let root = paths.root().to_string_lossy();
        self.game_path = paths
            .data_dir_of(&self.package_name)
            .to_string_lossy()
            .into_owned();
        self.game_file_path = self
            .game_file_path
            .iter()
            .map(|p| {
                if Path::new(p).is_absolute() {
                    p.clone()
                } else {
                    format!("{}/{}", root, p.trim_start_matches('/'))
                }
            })
            .collect();
        if self.mod_save_path.trim().is_empty() {
            self.mod_save_path = paths
                .download_mods_dir()
                .join(&self.package_name)
                .to_string_lossy()
                .into_owned();
        }
        self
    }

    /// Directory mod archives for this game are relocated into.
    pub fn mod_save_dir(&self) -> &Path {
        Path::new(&self.mod_save_path)
    }
}

/// Load every valid descriptor from `dir`. Invalid files are logged and
/// skipped, never fatal to the rest of the directory.
pub fn load_game_configs(dir: &Path, paths: &AppPaths) -> Vec<GameInfo> {
    let mut configs = Vec::new();
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) => {
            warn!("cannot read game config dir {}: {err}", dir.display());
            return configs;
        }
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        match read_game_config(&path) {
            Ok(info) => configs.push(info.normalized(paths)),
            Err(err) => warn!("skipping game config {}: {err}", path.display()),
        }
    }
    configs.sort_by(|a, b| a.game_name.cmp(&b.game_name));
    configs
}

/// Parse and validate a single descriptor file.
pub fn read_game_config(path: &Path) -> Result<GameInfo> {
    let text = std::fs::read_to_string(path)
        .map_err(|_| crate::error::FileError::ReadFailed(path.to_path_buf()))?;
    let info: GameInfo = serde_json::from_str(&text)
        .map_err(|err| crate::error::GameConfigError::Malformed(err.to_string()))?;
    info.validate()?;
    Ok(info)
}

/// Import descriptors found in the shared download area into the app's
/// own `GameConfig/` directory, replacing older copies.
pub fn import_game_configs(paths: &AppPaths) -> Result<usize> {
    let src = paths.game_config_import_dir();
    let dest_dir = paths.game_config_dir();
    std::fs::create_dir_all(&dest_dir)
        .map_err(|_| crate::error::FileError::CreateDirectoryFailed(dest_dir.clone()))?;

    let mut imported = 0;
    for info in load_game_configs(&src, paths) {
        let dest = dest_dir.join(format!("{}.json", info.package_name));
        match write_game_config(&dest, &info) {
            Ok(()) => {
                info!("imported game config for {}", info.package_name);
                imported += 1;
            }
            Err(err) => warn!("failed to import config for {}: {err}", info.package_name),
        }
    }
    Ok(imported)
}

/// Serialize a descriptor to disk.
pub fn write_game_config(path: &Path, info: &GameInfo) -> Result<()> {
    let json = serde_json::to_string_pretty(info)
        .map_err(|_| crate::error::FileError::WriteFailed(path.to_path_buf()))?;
    std::fs::write(path, json)
        .map_err(|_| crate::error::FileError::WriteFailed(path.to_path_buf()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> GameInfo {
        GameInfo {
            game_name: "Starfall".to_string(),
            service_name: "global".to_string(),
            package_name: "com.example.starfall".to_string(),
            game_path: "Android/data/com.example.starfall".to_string(),
            mod_save_path: String::new(),
            game_file_path: vec!["Android/data/com.example.starfall/files/AB/chars".to_string()],
            version: "1.2.0".to_string(),
            mod_type: vec!["character".to_string()],
            is_game_file_repeat: false,
            enable_backup: true,
            tips: String::new(),
        }
    }

    #[test]
    fn valid_descriptor_passes() {
        assert!(sample().validate().is_ok());
    }

    #[test]
    fn empty_name_rejected() {
        let mut info = sample();
        info.game_name.clear();
        assert!(matches!(info.validate(), Err(GameConfigError::EmptyName)));
    }

    #[test]
    fn bad_package_rejected() {
        let mut info = sample();
        info.package_name = "not a package".to_string();
        assert!(matches!(
            info.validate(),
            Err(GameConfigError::InvalidPackageName(_))
        ));
        info.package_name = "nodots".to_string();
        assert!(info.validate().is_err());
    }

    #[test]
    fn mismatched_lists_rejected() {
        let mut info = sample();
        info.mod_type.push("extra".to_string());
        assert!(matches!(
            info.validate(),
            Err(GameConfigError::MismatchedLists { .. })
        ));
    }

    #[test]
    fn normalization_absolutizes() {
        let paths = AppPaths::new("/storage", "com.example.vault");
        let info = sample().normalized(&paths);
        assert_eq!(
            info.game_path,
            "/storage/Android/data/com.example.starfall"
        );
        assert!(info.game_file_path[0].starts_with("/storage/"));
        assert!(info.mod_save_path.ends_with("com.example.starfall"));
    }

    #[test]
    fn import_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = AppPaths::new(tmp.path(), "com.example.vault");
        paths.ensure_layout().unwrap();
        std::fs::create_dir_all(paths.game_config_import_dir()).unwrap();

        let file = paths.game_config_import_dir().join("starfall.json");
        write_game_config(&file, &sample()).unwrap();
        // one broken file alongside, which must be skipped
        std::fs::write(paths.game_config_import_dir().join("bad.json"), "{").unwrap();

        let imported = import_game_configs(&paths).unwrap();
        assert_eq!(imported, 1);
        let loaded = load_game_configs(&paths.game_config_dir(), &paths);
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].package_name, "com.example.starfall");
    }
}
