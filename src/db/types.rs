//! Record types persisted in the store.

use serde::{Deserialize, Serialize};

/// Millisecond UTC timestamp used by every record.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// How a mod declares itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModForm {
    /// Passively discovered: payload matched against live game assets.
    Legacy,
    /// Ships its own `mod.json` declaring targets.
    Declared,
    /// Bundled form with a `package.json`, payload needs repacking.
    Packaged,
}

impl ModForm {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModForm::Legacy => "legacy",
            ModForm::Declared => "declared",
            ModForm::Packaged => "packaged",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "declared" => ModForm::Declared,
            "packaged" => ModForm::Packaged,
            _ => ModForm::Legacy,
        }
    }
}

/// A known mod. `(path, name, game_package_name)` identifies a record;
/// the id is the storage key.
#[derive(Debug, Clone, PartialEq)]
pub struct ModRecord {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub author: Option<String>,
    pub version: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    /// Source archive path, or the loose-mod directory.
    pub path: String,
    /// Payload member paths inside the source.
    pub mod_files: Vec<String>,
    /// Absolute game paths the payload maps onto, parallel to `mod_files`.
    pub game_file_paths: Vec<String>,
    pub encrypted: bool,
    pub password: Option<String>,
    pub enabled: bool,
    pub zip_file: bool,
    pub game_package_name: String,
    /// Directory inside the game the payload is placed into.
    pub install_dir: String,
    /// Human-readable mod type label from the game descriptor.
    pub mod_type: String,
    pub mod_form: ModForm,
    pub icon: Option<String>,
    pub images: Vec<String>,
    pub readme_path: Option<String>,
    pub file_readme_path: Option<String>,
}

impl ModRecord {
    /// Whether the record can be enabled at all: a payload must exist and
    /// an encrypted source needs a known password.
    pub fn enable_ready(&self) -> bool {
        !self.mod_files.is_empty() && (!self.encrypted || self.password.is_some())
    }
}

/// A captured original, keyed by the game file path it shadows. At most
/// one live row exists per `game_file_path`.
#[derive(Debug, Clone, PartialEq)]
pub struct BackupRecord {
    pub id: i64,
    pub mod_id: i64,
    pub filename: String,
    pub game_file_path: String,
    pub backup_path: String,
    pub game_package_name: String,
    /// When the capture was decided.
    pub backup_time: i64,
    /// When the backup copy finished.
    pub copy_time: i64,
    /// MD5 of the original game file at capture time.
    pub original_md5: String,
    /// MD5 of the mod content that replaced it.
    pub mod_file_md5: String,
}

/// A game file the manager believes it currently controls. Lets the next
/// scan detect a game update silently restoring a path.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplacedFileRecord {
    pub id: i64,
    pub mod_id: i64,
    pub filename: String,
    pub game_file_path: String,
    /// MD5 of the replacement content this mod wrote.
    pub md5: String,
    pub game_package_name: String,
    pub replace_time: i64,
}

/// Change-detection cache row; a rescan skips sources whose mtime, size
/// and digest are unchanged.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanFileRecord {
    pub id: i64,
    pub path: String,
    pub name: String,
    pub modified: i64,
    pub size: i64,
    pub is_dir: bool,
    pub md5: String,
    pub game_package_name: String,
}
