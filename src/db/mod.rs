//! SQLite-backed mod repository.
//!
//! The single source of truth for what is known to exist, independent of
//! what is currently on disk: mod records, captured backups, replaced-file
//! records and the scan cache. Only the scanner, the orchestrator and the
//! backup engine write here.

mod backups;
mod mods;
mod replaced;
mod scan_cache;
mod types;

pub use types::{
    now_millis, BackupRecord, ModForm, ModRecord, ReplacedFileRecord, ScanFileRecord,
};

use std::path::Path;
use std::sync::Mutex;

use rusqlite::Connection;

use crate::error::Result;

/// Shared handle over the store. The connection is mutex-guarded: callers
/// on worker threads take short exclusive sections per statement batch.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open or create the store at `db_path`.
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let conn = Connection::open(db_path)?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;
             PRAGMA cache_size = 10000;
             PRAGMA temp_store = MEMORY;",
        )?;

        let db = Self {
            conn: Mutex::new(conn),
        };
        db.create_tables()?;
        Ok(db)
    }

    /// In-memory store for tests.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.create_tables()?;
        Ok(db)
    }

    fn create_tables(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS mods (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                description TEXT,
                author TEXT,
                version TEXT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                path TEXT NOT NULL,
                mod_files TEXT NOT NULL,
                game_file_paths TEXT NOT NULL,
                encrypted INTEGER NOT NULL DEFAULT 0,
                password TEXT,
                enabled INTEGER NOT NULL DEFAULT 0,
                zip_file INTEGER NOT NULL DEFAULT 1,
                game_package_name TEXT NOT NULL,
                install_dir TEXT NOT NULL,
                mod_type TEXT NOT NULL DEFAULT '',
                mod_form TEXT NOT NULL DEFAULT 'legacy',
                icon TEXT,
                images TEXT NOT NULL DEFAULT '[]',
                readme_path TEXT,
                file_readme_path TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_mods_path_package
                ON mods(path, game_package_name);
            CREATE INDEX IF NOT EXISTS idx_mods_package_enabled
                ON mods(game_package_name, enabled);

            CREATE TABLE IF NOT EXISTS backups (
                id INTEGER PRIMARY KEY,
                mod_id INTEGER NOT NULL REFERENCES mods(id) ON DELETE CASCADE,
                filename TEXT NOT NULL,
                game_file_path TEXT NOT NULL UNIQUE,
                backup_path TEXT NOT NULL,
                game_package_name TEXT NOT NULL,
                backup_time INTEGER NOT NULL,
                copy_time INTEGER NOT NULL,
                original_md5 TEXT NOT NULL DEFAULT '',
                mod_file_md5 TEXT NOT NULL DEFAULT ''
            );

            CREATE INDEX IF NOT EXISTS idx_backups_mod ON backups(mod_id);

            CREATE TABLE IF NOT EXISTS replaced_files (
                id INTEGER PRIMARY KEY,
                mod_id INTEGER NOT NULL REFERENCES mods(id) ON DELETE CASCADE,
                filename TEXT NOT NULL,
                game_file_path TEXT NOT NULL,
                md5 TEXT NOT NULL,
                game_package_name TEXT NOT NULL,
                replace_time INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_replaced_mod ON replaced_files(mod_id);
            CREATE INDEX IF NOT EXISTS idx_replaced_game_file
                ON replaced_files(game_file_path);
            CREATE INDEX IF NOT EXISTS idx_replaced_package
                ON replaced_files(game_package_name);

            CREATE TABLE IF NOT EXISTS scan_files (
                id INTEGER PRIMARY KEY,
                path TEXT NOT NULL UNIQUE,
                name TEXT NOT NULL,
                modified INTEGER NOT NULL,
                size INTEGER NOT NULL,
                is_dir INTEGER NOT NULL DEFAULT 0,
                md5 TEXT NOT NULL DEFAULT '',
                game_package_name TEXT NOT NULL DEFAULT ''
            );

            CREATE INDEX IF NOT EXISTS idx_scan_files_package
                ON scan_files(game_package_name);
            "#,
        )?;
        Ok(())
    }

    /// Run `f` with the guarded connection.
    pub(crate) fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> rusqlite::Result<T>,
    ) -> Result<T> {
        let conn = self.conn.lock().unwrap();
        Ok(f(&conn)?)
    }
}

pub(crate) fn to_json(list: &[String]) -> String {
    serde_json::to_string(list).unwrap_or_else(|_| "[]".to_string())
}

pub(crate) fn from_json(text: &str) -> Vec<String> {
    serde_json::from_str(text).unwrap_or_default()
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_creates_schema_on_disk() {
        let tmp = tempfile::tempdir().unwrap();
        let db_path = tmp.path().join("sub/modvault.db");
        let db = Database::open(&db_path).unwrap();
        drop(db);
        assert!(db_path.exists());
        // Re-open over the existing file.
        Database::open(&db_path).unwrap();
    }

    #[test]
    fn json_list_roundtrip() {
        let list = vec!["a/b.png".to_string(), "c.bin".to_string()];
        assert_eq!(from_json(&to_json(&list)), list);
        assert!(from_json("not json").is_empty());
    }
}
