//! Mod metadata extraction: readme parsing and icon/preview caching.
//!
//! Mods commonly ship a `readme.txt`/`readme.md` of colon-separated
//! key-value lines (名称/描述/版本/作者, with English keys accepted too)
//! plus preview images. Readmes are parsed out of the archive through a
//! temp file; images are extracted into the shared image cache so the
//! record can reference them after the archive moves or disappears.

use std::collections::HashMap;
use std::path::Path;

use tracing::warn;

use crate::archive;
use crate::db::ModRecord;
use crate::paths::{file_stem_of, AppPaths};

/// Parsed readme fields.
#[derive(Debug, Default, PartialEq)]
pub struct ReadmeInfo {
    pub name: Option<String>,
    pub description: Option<String>,
    pub version: Option<String>,
    pub author: Option<String>,
}

/// Parse colon-separated key-value lines. Both the fullwidth and ASCII
/// colon are accepted; unknown keys are ignored.
pub fn parse_readme(text: &str) -> ReadmeInfo {
    let mut fields: HashMap<&str, String> = HashMap::new();
    for line in text.lines() {
        let Some((key, value)) = line.split_once('：').or_else(|| line.split_once(':')) else {
            continue;
        };
        let key = key.trim();
        let value = value.trim();
        if value.is_empty() {
            continue;
        }
        let canonical = match key {
            "名称" | "name" | "Name" => "name",
            "描述" | "description" | "Description" => "description",
            "版本" | "version" | "Version" => "version",
            "作者" | "author" | "Author" => "author",
            _ => continue,
        };
        fields.insert(canonical, value.to_string());
    }
    ReadmeInfo {
        name: fields.remove("name"),
        description: fields.remove("description"),
        version: fields.remove("version"),
        author: fields.remove("author"),
    }
}

/// Apply a readme found inside the record's source archive.
pub fn apply_archive_readme(record: &mut ModRecord, archive_path: &Path) {
    let Some(member) = record
        .readme_path
        .clone()
        .or_else(|| record.file_readme_path.clone())
    else {
        return;
    };
    match archive::read_member(archive_path, &member, record.password.as_deref()) {
        Ok(bytes) => {
            let info = parse_readme(&String::from_utf8_lossy(&bytes));
            apply_info(record, info);
        }
        Err(err) => warn!(
            "readme {} unreadable in {}: {err}",
            member,
            archive_path.display()
        ),
    }
}

/// Apply a readme lying next to a loose mod.
pub fn apply_loose_readme(record: &mut ModRecord, readme_file: &Path) {
    match std::fs::read_to_string(readme_file) {
        Ok(text) => apply_info(record, parse_readme(&text)),
        Err(err) => warn!("readme {} unreadable: {err}", readme_file.display()),
    }
}

fn apply_info(record: &mut ModRecord, info: ReadmeInfo) {
    if let Some(name) = info.name {
        record.name = name;
    }
    if info.description.is_some() {
        record.description = info.description;
    }
    if info.version.is_some() {
        record.version = info.version;
    }
    if info.author.is_some() {
        record.author = info.author;
    }
}

/// Extract the record's icon/preview members into the image cache and
/// re-point the record at the cached copies. Extraction failures keep the
/// record usable without images.
pub fn cache_archive_images(record: &mut ModRecord, archive_path: &Path, paths: &AppPaths) {
    if record.images.is_empty() && record.icon.is_none() {
        return;
    }
    let stem = file_stem_of(archive_path);
    let cache_dir = paths.images_dir().join(&stem);

    let members: Vec<String> = record.images.clone();
    if let Err(err) = archive::extract_members(
        archive_path,
        &members,
        &cache_dir,
        record.password.as_deref(),
    ) {
        warn!(
            "image extraction failed for {}: {err}",
            archive_path.display()
        );
        record.icon = None;
        record.images.clear();
        return;
    }

    record.images = members
        .iter()
        .map(|member| cache_dir.join(member).to_string_lossy().into_owned())
        .collect();
    record.icon = record
        .icon
        .as_ref()
        .map(|member| cache_dir.join(member).to_string_lossy().into_owned());
}
