//! CRUD for backup records.
//!
//! The UNIQUE index on `game_file_path` enforces the one-live-backup-per-
//! path policy at the storage level; a second capture for the same path is
//! a bug, not a race to be won.

use rusqlite::{params, Row};

use super::types::BackupRecord;
use super::Database;
use crate::error::Result;

fn backup_from_row(row: &Row<'_>) -> rusqlite::Result<BackupRecord> {
    Ok(BackupRecord {
        id: row.get("id")?,
        mod_id: row.get("mod_id")?,
        filename: row.get("filename")?,
        game_file_path: row.get("game_file_path")?,
        backup_path: row.get("backup_path")?,
        game_package_name: row.get("game_package_name")?,
        backup_time: row.get("backup_time")?,
        copy_time: row.get("copy_time")?,
        original_md5: row.get("original_md5")?,
        mod_file_md5: row.get("mod_file_md5")?,
    })
}

impl Database {
    pub fn insert_backup(&self, record: &BackupRecord) -> Result<i64> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO backups (mod_id, filename, game_file_path, backup_path,
                                      game_package_name, backup_time, copy_time,
                                      original_md5, mod_file_md5)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    record.mod_id,
                    record.filename,
                    record.game_file_path,
                    record.backup_path,
                    record.game_package_name,
                    record.backup_time,
                    record.copy_time,
                    record.original_md5,
                    record.mod_file_md5,
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    pub fn update_backup(&self, record: &BackupRecord) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE backups SET mod_id = ?1, filename = ?2, backup_path = ?3,
                                    backup_time = ?4, copy_time = ?5,
                                    original_md5 = ?6, mod_file_md5 = ?7
                 WHERE id = ?8",
                params![
                    record.mod_id,
                    record.filename,
                    record.backup_path,
                    record.backup_time,
                    record.copy_time,
                    record.original_md5,
                    record.mod_file_md5,
                    record.id,
                ],
            )?;
            Ok(())
        })
    }

    pub fn backups_for_mod(&self, mod_id: i64) -> Result<Vec<BackupRecord>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT * FROM backups WHERE mod_id = ?1 ORDER BY id")?;
            let rows = stmt.query_map(params![mod_id], backup_from_row)?;
            rows.collect()
        })
    }

    /// The live backup shadowing `game_file_path`, if any.
    pub fn backup_for_game_file(&self, game_file_path: &str) -> Result<Option<BackupRecord>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT * FROM backups WHERE game_file_path = ?1")?;
            let mut rows = stmt.query_map(params![game_file_path], backup_from_row)?;
            rows.next().transpose()
        })
    }

    pub fn delete_backup(&self, id: i64) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM backups WHERE id = ?1", params![id])?;
            Ok(())
        })
    }

    pub fn delete_backups_for_game(&self, package: &str) -> Result<usize> {
        self.with_conn(|conn| {
            conn.execute(
                "DELETE FROM backups WHERE game_package_name = ?1",
                params![package],
            )
        })
    }
}
