//! Scan-cache rows: one per seen source file, keyed by path.

use rusqlite::{params, Row};

use super::types::ScanFileRecord;
use super::Database;
use crate::error::Result;

fn scan_file_from_row(row: &Row<'_>) -> rusqlite::Result<ScanFileRecord> {
    Ok(ScanFileRecord {
        id: row.get("id")?,
        path: row.get("path")?,
        name: row.get("name")?,
        modified: row.get("modified")?,
        size: row.get("size")?,
        is_dir: row.get("is_dir")?,
        md5: row.get("md5")?,
        game_package_name: row.get("game_package_name")?,
    })
}

impl Database {
    /// Insert or refresh the row for `record.path`.
    pub fn upsert_scan_file(&self, record: &ScanFileRecord) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO scan_files (path, name, modified, size, is_dir, md5,
                                         game_package_name)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(path) DO UPDATE SET
                     name = excluded.name,
                     modified = excluded.modified,
                     size = excluded.size,
                     is_dir = excluded.is_dir,
                     md5 = excluded.md5,
                     game_package_name = excluded.game_package_name",
                params![
                    record.path,
                    record.name,
                    record.modified,
                    record.size,
                    record.is_dir,
                    record.md5,
                    record.game_package_name,
                ],
            )?;
            Ok(())
        })
    }

    pub fn scan_file_by_path(&self, path: &str) -> Result<Option<ScanFileRecord>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT * FROM scan_files WHERE path = ?1")?;
            let mut rows = stmt.query_map(params![path], scan_file_from_row)?;
            rows.next().transpose()
        })
    }

    pub fn scan_files_for_game(&self, package: &str) -> Result<Vec<ScanFileRecord>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT * FROM scan_files WHERE game_package_name = ?1")?;
            let rows = stmt.query_map(params![package], scan_file_from_row)?;
            rows.collect()
        })
    }

    pub fn delete_scan_file(&self, path: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM scan_files WHERE path = ?1", params![path])?;
            Ok(())
        })
    }

    /// Drop the whole cache (forced rescan).
    pub fn clear_scan_files(&self, package: Option<&str>) -> Result<usize> {
        self.with_conn(|conn| match package {
            Some(package) => conn.execute(
                "DELETE FROM scan_files WHERE game_package_name = ?1",
                params![package],
            ),
            None => conn.execute("DELETE FROM scan_files", []),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::now_millis;

    fn record(path: &str, size: i64) -> ScanFileRecord {
        ScanFileRecord {
            id: 0,
            path: path.into(),
            name: "skin.zip".into(),
            modified: now_millis(),
            size,
            is_dir: false,
            md5: "abcd".into(),
            game_package_name: "com.some.game".into(),
        }
    }

    #[test]
    fn upsert_replaces_by_path() {
        let db = Database::in_memory().unwrap();
        db.upsert_scan_file(&record("/mods/skin.zip", 100)).unwrap();
        db.upsert_scan_file(&record("/mods/skin.zip", 250)).unwrap();

        let row = db.scan_file_by_path("/mods/skin.zip").unwrap().unwrap();
        assert_eq!(row.size, 250);
        assert_eq!(db.scan_files_for_game("com.some.game").unwrap().len(), 1);
    }

    #[test]
    fn clear_by_game() {
        let db = Database::in_memory().unwrap();
        db.upsert_scan_file(&record("/mods/a.zip", 1)).unwrap();
        let mut other = record("/mods/b.zip", 2);
        other.game_package_name = "com.other.game".into();
        db.upsert_scan_file(&other).unwrap();

        assert_eq!(db.clear_scan_files(Some("com.some.game")).unwrap(), 1);
        assert!(db.scan_file_by_path("/mods/a.zip").unwrap().is_none());
        assert!(db.scan_file_by_path("/mods/b.zip").unwrap().is_some());
    }
}
