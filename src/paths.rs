//! Filesystem layout of the manager's own storage area.
//!
//! Everything the engine persists on disk lives in a per-app area under the
//! shared storage root: captured backups, temporary extraction dirs, icon
//! and preview-image caches, game-side check-file staging and the per-game
//! JSON descriptors. Paths are computed here and nowhere else.

use std::path::{Path, PathBuf};

/// Subdirectory of the shared root where per-app private areas live.
const APP_DATA_SEGMENT: &str = "Android/data";
/// Shared download drop point scanned for incoming mods and descriptors.
const DOWNLOAD_MODS_SEGMENT: &str = "Download/Mods";

#[derive(Debug, Clone)]
pub struct AppPaths {
    root: PathBuf,
    app_dir: PathBuf,
}

impl AppPaths {
    /// Build the layout for `own_package` under `root` (the shared storage
    /// root, e.g. `/sdcard` on device or a scratch dir in tests).
    pub fn new(root: impl Into<PathBuf>, own_package: &str) -> Self {
        let root = root.into();
        let app_dir = root.join(APP_DATA_SEGMENT).join(own_package);
        Self { root, app_dir }
    }

    /// Layout rooted at the platform data dir, for CLI use without an
    /// explicit `--root`.
    pub fn default_layout(own_package: &str) -> Self {
        let root = dirs::data_dir()
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("."));
        Self::new(root, own_package)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn app_dir(&self) -> &Path {
        &self.app_dir
    }

    /// Where captured originals are stored, one tree per game package.
    pub fn backup_dir(&self) -> PathBuf {
        self.app_dir.join("backup")
    }

    pub fn backup_dir_for(&self, package: &str) -> PathBuf {
        self.backup_dir().join(package)
    }

    pub fn temp_dir(&self) -> PathBuf {
        self.app_dir.join("temp")
    }

    pub fn unzip_dir(&self) -> PathBuf {
        self.app_dir.join("temp").join("unzip")
    }

    pub fn icon_dir(&self) -> PathBuf {
        self.app_dir.join("icon")
    }

    pub fn images_dir(&self) -> PathBuf {
        self.app_dir.join("images")
    }

    /// Staging area for game-side integrity check files patched by
    /// special-game hooks.
    pub fn check_file_dir(&self) -> PathBuf {
        self.app_dir.join("gameCheckFile")
    }

    pub fn game_config_dir(&self) -> PathBuf {
        self.app_dir.join("GameConfig")
    }

    pub fn db_path(&self) -> PathBuf {
        self.app_dir.join("modvault.db")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.app_dir.join("logs")
    }

    /// Socket the privileged helper process listens on.
    pub fn helper_socket(&self) -> PathBuf {
        self.app_dir.join("helper.sock")
    }

    /// Shared download drop point (`<root>/Download/Mods/`).
    pub fn download_mods_dir(&self) -> PathBuf {
        self.root.join(DOWNLOAD_MODS_SEGMENT)
    }

    /// Where downloaded per-game descriptors land before import.
    pub fn game_config_import_dir(&self) -> PathBuf {
        self.download_mods_dir().join("GameConfig")
    }

    /// Per-app data dir of an arbitrary package under this root.
    pub fn data_dir_of(&self, package: &str) -> PathBuf {
        self.root.join(APP_DATA_SEGMENT).join(package)
    }

    /// Drop the temp and image caches, leaving backups and configs alone.
    /// The directories themselves are recreated empty.
    pub fn clear_caches(&self) -> std::io::Result<()> {
        for dir in [self.temp_dir(), self.icon_dir(), self.images_dir()] {
            if dir.exists() {
                std::fs::remove_dir_all(&dir)?;
            }
            std::fs::create_dir_all(&dir)?;
        }
        std::fs::create_dir_all(self.unzip_dir())
    }

    /// Create the whole private layout. Idempotent.
    pub fn ensure_layout(&self) -> std::io::Result<()> {
        for dir in [
            self.backup_dir(),
            self.unzip_dir(),
            self.icon_dir(),
            self.images_dir(),
            self.check_file_dir(),
            self.game_config_dir(),
            self.log_dir(),
        ] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}

/// Final path component as a string, empty for bare roots.
pub fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Stem (name without the last extension) of a path's final component.
pub fn file_stem_of(path: &Path) -> String {
    path.file_stem()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Normalize an archive member path: forward slashes, no leading slash.
pub fn normalize_member(name: &str) -> String {
    name.replace('\\', "/").trim_start_matches('/').to_string()
}
