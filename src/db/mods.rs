//! CRUD for mod records.

use rusqlite::{params, Row};

use super::types::{ModForm, ModRecord};
use super::{from_json, to_json, Database};
use crate::error::Result;

fn mod_from_row(row: &Row<'_>) -> rusqlite::Result<ModRecord> {
    Ok(ModRecord {
        id: row.get("id")?,
        name: row.get("name")?,
        description: row.get("description")?,
        author: row.get("author")?,
        version: row.get("version")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
        path: row.get("path")?,
        mod_files: from_json(&row.get::<_, String>("mod_files")?),
        game_file_paths: from_json(&row.get::<_, String>("game_file_paths")?),
        encrypted: row.get("encrypted")?,
        password: row.get("password")?,
        enabled: row.get("enabled")?,
        zip_file: row.get("zip_file")?,
        game_package_name: row.get("game_package_name")?,
        install_dir: row.get("install_dir")?,
        mod_type: row.get("mod_type")?,
        mod_form: ModForm::from_str(&row.get::<_, String>("mod_form")?),
        icon: row.get("icon")?,
        images: from_json(&row.get::<_, String>("images")?),
        readme_path: row.get("readme_path")?,
        file_readme_path: row.get("file_readme_path")?,
    })
}

impl Database {
    /// Insert a new record; returns the assigned id.
    pub fn insert_mod(&self, record: &ModRecord) -> Result<i64> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO mods (name, description, author, version, created_at, updated_at,
                                   path, mod_files, game_file_paths, encrypted, password, enabled,
                                   zip_file, game_package_name, install_dir, mod_type, mod_form,
                                   icon, images, readme_path, file_readme_path)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
                         ?17, ?18, ?19, ?20, ?21)",
                params![
                    record.name,
                    record.description,
                    record.author,
                    record.version,
                    record.created_at,
                    record.updated_at,
                    record.path,
                    to_json(&record.mod_files),
                    to_json(&record.game_file_paths),
                    record.encrypted,
                    record.password,
                    record.enabled,
                    record.zip_file,
                    record.game_package_name,
                    record.install_dir,
                    record.mod_type,
                    record.mod_form.as_str(),
                    record.icon,
                    to_json(&record.images),
                    record.readme_path,
                    record.file_readme_path,
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    /// Update every mutable field of an existing record.
    pub fn update_mod(&self, record: &ModRecord) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE mods SET name = ?1, description = ?2, author = ?3, version = ?4,
                                 updated_at = ?5, path = ?6, mod_files = ?7,
                                 game_file_paths = ?8, encrypted = ?9, password = ?10,
                                 enabled = ?11, zip_file = ?12, game_package_name = ?13,
                                 install_dir = ?14, mod_type = ?15, mod_form = ?16, icon = ?17,
                                 images = ?18, readme_path = ?19, file_readme_path = ?20
                 WHERE id = ?21",
                params![
                    record.name,
                    record.description,
                    record.author,
                    record.version,
                    record.updated_at,
                    record.path,
                    to_json(&record.mod_files),
                    to_json(&record.game_file_paths),
                    record.encrypted,
                    record.password,
                    record.enabled,
                    record.zip_file,
                    record.game_package_name,
                    record.install_dir,
                    record.mod_type,
                    record.mod_form.as_str(),
                    record.icon,
                    to_json(&record.images),
                    record.readme_path,
                    record.file_readme_path,
                    record.id,
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_mod(&self, id: i64) -> Result<Option<ModRecord>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT * FROM mods WHERE id = ?1")?;
            let mut rows = stmt.query_map(params![id], mod_from_row)?;
            rows.next().transpose()
        })
    }

    pub fn all_mods(&self) -> Result<Vec<ModRecord>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT * FROM mods ORDER BY id")?;
            let rows = stmt.query_map([], mod_from_row)?;
            rows.collect()
        })
    }

    pub fn mods_for_game(&self, package: &str) -> Result<Vec<ModRecord>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT * FROM mods WHERE game_package_name = ?1 ORDER BY id")?;
            let rows = stmt.query_map(params![package], mod_from_row)?;
            rows.collect()
        })
    }

    pub fn enabled_mods_for_game(&self, package: &str) -> Result<Vec<ModRecord>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT * FROM mods WHERE game_package_name = ?1 AND enabled = 1 ORDER BY id",
            )?;
            let rows = stmt.query_map(params![package], mod_from_row)?;
            rows.collect()
        })
    }

    /// Lookup by the record identity `(path, name, game)`.
    pub fn find_mod(&self, path: &str, name: &str, package: &str) -> Result<Option<ModRecord>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT * FROM mods
                 WHERE path = ?1 AND name = ?2 AND game_package_name = ?3",
            )?;
            let mut rows = stmt.query_map(params![path, name, package], mod_from_row)?;
            rows.next().transpose()
        })
    }

    pub fn set_mod_enabled(&self, id: i64, enabled: bool, at: i64) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE mods SET enabled = ?1, updated_at = ?2 WHERE id = ?3",
                params![enabled, at, id],
            )?;
            Ok(())
        })
    }

    pub fn set_mod_password(&self, id: i64, password: Option<&str>) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE mods SET password = ?1 WHERE id = ?2",
                params![password, id],
            )?;
            Ok(())
        })
    }

    /// Delete a record; backups and replaced-file rows cascade.
    pub fn delete_mod(&self, id: i64) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM mods WHERE id = ?1", params![id])?;
            Ok(())
        })
    }

    /// Collapse duplicate records sharing `(path, name)` within one game,
    /// keeping the enabled row, or the newest when none is enabled.
    /// Returns how many duplicates were dropped.
    pub fn dedupe_mods(&self, package: &str) -> Result<usize> {
        let all = self.mods_for_game(package)?;
        let mut by_key: std::collections::HashMap<(String, String), Vec<ModRecord>> =
            std::collections::HashMap::new();
        for record in all {
            by_key
                .entry((record.path.clone(), record.name.clone()))
                .or_default()
                .push(record);
        }

        let mut dropped = 0;
        for (_, mut group) in by_key {
            if group.len() < 2 {
                continue;
            }
            // Enabled first, then newest.
            group.sort_by_key(|r| (std::cmp::Reverse(r.enabled), std::cmp::Reverse(r.created_at)));
            for duplicate in &group[1..] {
                self.delete_mod(duplicate.id)?;
                dropped += 1;
            }
        }
        Ok(dropped)
    }

    /// Enabled mods (other than `except_mod`) that claim `game_file_path`
    /// as one of their targets.
    pub fn enabled_claimants(
        &self,
        game_file_path: &str,
        except_mod: i64,
    ) -> Result<Vec<ModRecord>> {
        let enabled = self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT * FROM mods WHERE enabled = 1 AND id != ?1")?;
            let rows = stmt.query_map(params![except_mod], mod_from_row)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
        })?;
        Ok(enabled
            .into_iter()
            .filter(|m| m.game_file_paths.iter().any(|p| p == game_file_path))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::now_millis;
    use crate::db::test_support::sample_mod;

    #[test]
    fn insert_find_update_delete() {
        let db = Database::in_memory().unwrap();
        let mut record = sample_mod("skin", "com.some.game");
        let id = db.insert_mod(&record).unwrap();
        record.id = id;

        let found = db
            .find_mod(&record.path, "skin", "com.some.game")
            .unwrap()
            .unwrap();
        assert_eq!(found.mod_files, vec!["chars/hero.png".to_string()]);

        db.set_mod_enabled(id, true, now_millis()).unwrap();
        assert_eq!(db.enabled_mods_for_game("com.some.game").unwrap().len(), 1);

        db.set_mod_password(id, Some("pw")).unwrap();
        assert_eq!(
            db.get_mod(id).unwrap().unwrap().password.as_deref(),
            Some("pw")
        );

        db.delete_mod(id).unwrap();
        assert!(db.get_mod(id).unwrap().is_none());
    }

    #[test]
    fn dedupe_keeps_enabled_then_newest() {
        let db = Database::in_memory().unwrap();
        let mut a = sample_mod("skin", "com.some.game");
        a.created_at = 100;
        let mut b = sample_mod("skin", "com.some.game");
        b.created_at = 200;
        let a_id = db.insert_mod(&a).unwrap();
        let b_id = db.insert_mod(&b).unwrap();

        // Same (path, name): newest wins when neither is enabled.
        assert_eq!(db.dedupe_mods("com.some.game").unwrap(), 1);
        assert!(db.get_mod(a_id).unwrap().is_none());
        assert!(db.get_mod(b_id).unwrap().is_some());

        // The enabled row wins over a newer disabled one.
        let mut c = sample_mod("skin", "com.some.game");
        c.created_at = 300;
        let c_id = db.insert_mod(&c).unwrap();
        db.set_mod_enabled(b_id, true, now_millis()).unwrap();
        assert_eq!(db.dedupe_mods("com.some.game").unwrap(), 1);
        assert!(db.get_mod(b_id).unwrap().is_some());
        assert!(db.get_mod(c_id).unwrap().is_none());
    }

    #[test]
    fn claimants_excludes_self_and_disabled() {
        let db = Database::in_memory().unwrap();
        let mut a = sample_mod("a", "com.some.game");
        let mut b = sample_mod("b", "com.some.game");
        a.id = db.insert_mod(&a).unwrap();
        b.id = db.insert_mod(&b).unwrap();

        // Nobody enabled yet.
        assert!(db
            .enabled_claimants("/game/chars/hero.png", a.id)
            .unwrap()
            .is_empty());

        db.set_mod_enabled(b.id, true, now_millis()).unwrap();
        let claimants = db.enabled_claimants("/game/chars/hero.png", a.id).unwrap();
        assert_eq!(claimants.len(), 1);
        assert_eq!(claimants[0].id, b.id);

        // The asking mod itself is excluded.
        assert!(db
            .enabled_claimants("/game/chars/hero.png", b.id)
            .unwrap()
            .is_empty());
    }
}
