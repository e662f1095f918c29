//! CRUD for replaced-file records.

use std::collections::HashMap;

use rusqlite::{params, Row};

use super::types::ReplacedFileRecord;
use super::Database;
use crate::error::Result;

fn replaced_from_row(row: &Row<'_>) -> rusqlite::Result<ReplacedFileRecord> {
    Ok(ReplacedFileRecord {
        id: row.get("id")?,
        mod_id: row.get("mod_id")?,
        filename: row.get("filename")?,
        game_file_path: row.get("game_file_path")?,
        md5: row.get("md5")?,
        game_package_name: row.get("game_package_name")?,
        replace_time: row.get("replace_time")?,
    })
}

impl Database {
    pub fn insert_replaced(&self, record: &ReplacedFileRecord) -> Result<i64> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO replaced_files (mod_id, filename, game_file_path, md5,
                                             game_package_name, replace_time)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    record.mod_id,
                    record.filename,
                    record.game_file_path,
                    record.md5,
                    record.game_package_name,
                    record.replace_time,
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    pub fn replaced_for_mod(&self, mod_id: i64) -> Result<Vec<ReplacedFileRecord>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT * FROM replaced_files WHERE mod_id = ?1 ORDER BY id")?;
            let rows = stmt.query_map(params![mod_id], replaced_from_row)?;
            rows.collect()
        })
    }

    /// Latest replacement per game file path for one game: the state the
    /// manager believes each controlled file is in.
    pub fn replaced_map_for_game(
        &self,
        package: &str,
    ) -> Result<HashMap<String, ReplacedFileRecord>> {
        let rows = self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT * FROM replaced_files WHERE game_package_name = ?1
                 ORDER BY replace_time ASC, id ASC",
            )?;
            let rows = stmt.query_map(params![package], replaced_from_row)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
        })?;
        // Ascending order means later rows overwrite earlier ones.
        let mut map = HashMap::new();
        for record in rows {
            map.insert(record.game_file_path.clone(), record);
        }
        Ok(map)
    }

    pub fn delete_replaced_for_mod(&self, mod_id: i64) -> Result<usize> {
        self.with_conn(|conn| {
            conn.execute(
                "DELETE FROM replaced_files WHERE mod_id = ?1",
                params![mod_id],
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::now_millis;
    use crate::db::test_support::sample_mod;

    fn record(mod_id: i64, path: &str, md5: &str, at: i64) -> ReplacedFileRecord {
        ReplacedFileRecord {
            id: 0,
            mod_id,
            filename: "hero.png".into(),
            game_file_path: path.into(),
            md5: md5.into(),
            game_package_name: "com.some.game".into(),
            replace_time: at,
        }
    }

    #[test]
    fn map_keeps_latest_replacement_per_path() {
        let db = Database::in_memory().unwrap();
        let a = db.insert_mod(&sample_mod("a", "com.some.game")).unwrap();
        let b = db.insert_mod(&sample_mod("b", "com.some.game")).unwrap();

        let t = now_millis();
        db.insert_replaced(&record(a, "/game/chars/hero.png", "md5-a", t))
            .unwrap();
        db.insert_replaced(&record(b, "/game/chars/hero.png", "md5-b", t + 10))
            .unwrap();

        let map = db.replaced_map_for_game("com.some.game").unwrap();
        assert_eq!(map.len(), 1);
        assert_eq!(map["/game/chars/hero.png"].md5, "md5-b");
    }

    #[test]
    fn delete_for_mod_leaves_others() {
        let db = Database::in_memory().unwrap();
        let a = db.insert_mod(&sample_mod("a", "com.some.game")).unwrap();
        let b = db.insert_mod(&sample_mod("b", "com.some.game")).unwrap();
        let t = now_millis();
        db.insert_replaced(&record(a, "/game/x.png", "m1", t)).unwrap();
        db.insert_replaced(&record(b, "/game/y.png", "m2", t)).unwrap();

        assert_eq!(db.delete_replaced_for_mod(a).unwrap(), 1);
        assert!(db.replaced_for_mod(a).unwrap().is_empty());
        assert_eq!(db.replaced_for_mod(b).unwrap().len(), 1);
    }
}
