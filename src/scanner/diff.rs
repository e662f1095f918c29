//! Reconciliation of scanned candidates against persisted records.
//!
//! Records are compared as values, keyed by `(path, name)` within one
//! game. The classification is explicit — added, updated, removed or
//! unchanged — and an update never loses the stored id, enabled flag,
//! cached password or creation time.

use std::collections::HashMap;

use crate::db::{now_millis, ModRecord};

#[derive(Debug, Default)]
pub struct DiffResult {
    pub added: Vec<ModRecord>,
    /// Updated records, already merged over their stored counterpart.
    pub updated: Vec<ModRecord>,
    /// Stored records whose source is gone from disk.
    pub removed: Vec<ModRecord>,
    pub unchanged: usize,
}

fn key_of(record: &ModRecord) -> (String, String) {
    (record.path.clone(), record.name.clone())
}

/// Whether the scanned candidate carries different metadata than the
/// stored record. The enabled flag and password are state, not metadata,
/// and never make two records differ.
fn metadata_differs(stored: &ModRecord, scanned: &ModRecord) -> bool {
    stored.version != scanned.version
        || stored.description != scanned.description
        || stored.author != scanned.author
        || stored.icon != scanned.icon
        || stored.images != scanned.images
        || stored.mod_files != scanned.mod_files
        || stored.game_file_paths != scanned.game_file_paths
        || stored.readme_path != scanned.readme_path
        || stored.file_readme_path != scanned.file_readme_path
        || stored.zip_file != scanned.zip_file
        || stored.mod_type != scanned.mod_type
        || stored.install_dir != scanned.install_dir
        || stored.mod_form != scanned.mod_form
}

/// Merge scanned metadata over a stored record, preserving identity and
/// state fields.
fn merge(stored: &ModRecord, scanned: &ModRecord) -> ModRecord {
    let mut merged = scanned.clone();
    merged.id = stored.id;
    merged.enabled = stored.enabled;
    merged.created_at = stored.created_at;
    merged.updated_at = now_millis();
    // A password learned earlier keeps working for an updated archive
    // until proven otherwise.
    if merged.password.is_none() {
        merged.password = stored.password.clone();
    }
    merged
}

/// Classify `scanned` against `stored`.
pub fn classify(stored: &[ModRecord], scanned: &[ModRecord]) -> DiffResult {
    let mut result = DiffResult::default();
    let stored_by_key: HashMap<(String, String), &ModRecord> =
        stored.iter().map(|r| (key_of(r), r)).collect();
    let mut seen = std::collections::HashSet::new();

    for candidate in scanned {
        let key = key_of(candidate);
        seen.insert(key.clone());
        match stored_by_key.get(&key) {
            None => result.added.push(candidate.clone()),
            Some(existing) if metadata_differs(existing, candidate) => {
                result.updated.push(merge(existing, candidate));
            }
            Some(_) => result.unchanged += 1,
        }
    }

    for record in stored {
        if !seen.contains(&key_of(record)) {
            result.removed.push(record.clone());
        }
    }
    result
}
