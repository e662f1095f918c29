//! Archive reading for mod packages.
//!
//! Mods arrive as ZIP, 7z or RAR archives, frequently password-protected
//! and frequently produced by tools that wrote member names in a legacy
//! codepage. This module provides one surface over the three formats:
//! magic-byte detection (never extension-based), member listing with
//! mojibake recovery, encryption checks, and streaming extraction with a
//! bounded buffer per member.
//!
//! Wrong password, missing password and a broken archive are distinct
//! [`ArchiveError`] kinds; callers drive user-facing flows off that
//! distinction.

pub mod encoding;
mod rar;
mod sevenz;
mod zip;

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use crate::error::ArchiveError;

/// Archive container format, detected by magic bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    Zip,
    SevenZ,
    Rar,
}

/// Detect the container format by reading leading magic bytes.
///
/// Mislabeled archives are common (a `.zip` that is really RAR), so the
/// extension is never consulted.
pub fn detect_kind(path: &Path) -> Option<ArchiveKind> {
    let mut file = File::open(path).ok()?;
    let mut magic = [0u8; 8];
    let n = file.read(&mut magic).unwrap_or(0);
    if n < 4 {
        return None;
    }
    // ZIP: PK\x03\x04
    if magic[0..4] == [0x50, 0x4B, 0x03, 0x04] {
        return Some(ArchiveKind::Zip);
    }
    // RAR: Rar!
    if magic[0..4] == [0x52, 0x61, 0x72, 0x21] {
        return Some(ArchiveKind::Rar);
    }
    // 7z: 7z\xBC\xAF\x27\x1C
    if n >= 6 && magic[0..6] == [0x37, 0x7A, 0xBC, 0xAF, 0x27, 0x1C] {
        return Some(ArchiveKind::SevenZ);
    }
    None
}

/// Whether `path` is a readable archive of a supported format.
pub fn is_archive(path: &Path) -> bool {
    if !path.is_file() {
        return false;
    }
    detect_kind(path).is_some()
}

/// List file members (directories excluded), names normalized to forward
/// slashes. Member names are re-decoded archive-wide when the default
/// text encoding produces mojibake.
pub fn list_members(path: &Path) -> Result<Vec<String>, ArchiveError> {
    match require_kind(path)? {
        ArchiveKind::Zip => zip::list_members(path),
        ArchiveKind::SevenZ => sevenz::list_members(path),
        ArchiveKind::Rar => rar::list_members(path),
    }
}

/// Whether any member of the archive is encrypted.
pub fn is_encrypted(path: &Path) -> Result<bool, ArchiveError> {
    match require_kind(path)? {
        ArchiveKind::Zip => zip::is_encrypted(path),
        ArchiveKind::SevenZ => sevenz::is_encrypted(path),
        ArchiveKind::Rar => rar::is_encrypted(path),
    }
}

/// Stream one member into `out`. Returns the number of bytes written.
pub fn extract_member(
    path: &Path,
    member: &str,
    password: Option<&str>,
    out: &mut dyn Write,
) -> Result<u64, ArchiveError> {
    match require_kind(path)? {
        ArchiveKind::Zip => zip::extract_member(path, member, password, out),
        ArchiveKind::SevenZ => sevenz::extract_member(path, member, password, out),
        ArchiveKind::Rar => rar::extract_member(path, member, password, out),
    }
}

/// Read one member fully into memory. For small metadata members (readme,
/// icons); payload placement goes through [`extract_member`].
pub fn read_member(
    path: &Path,
    member: &str,
    password: Option<&str>,
) -> Result<Vec<u8>, ArchiveError> {
    let mut buf = Vec::new();
    extract_member(path, member, password, &mut buf)?;
    Ok(buf)
}

/// Extract the named members under `dest_dir`, preserving member paths.
pub fn extract_members(
    path: &Path,
    members: &[String],
    dest_dir: &Path,
    password: Option<&str>,
) -> Result<(), ArchiveError> {
    match require_kind(path)? {
        ArchiveKind::Zip => zip::extract_members(path, members, dest_dir, password),
        ArchiveKind::SevenZ => sevenz::extract_members(path, members, dest_dir, password),
        ArchiveKind::Rar => rar::extract_members(path, members, dest_dir, password),
    }
}

/// Extract every member under `dest_dir`. Returns the file count.
pub fn extract_all(
    path: &Path,
    dest_dir: &Path,
    password: Option<&str>,
) -> Result<usize, ArchiveError> {
    let members = list_members(path)?;
    extract_members(path, &members, dest_dir, password)?;
    Ok(members.len())
}

/// Verify a candidate password by test-extracting the first member.
pub fn verify_password(path: &Path, password: &str) -> Result<bool, ArchiveError> {
    let members = list_members(path)?;
    let Some(member) = members.first() else {
        return Ok(true);
    };
    match extract_member(path, member, Some(password), &mut std::io::sink()) {
        Ok(_) => Ok(true),
        Err(ArchiveError::WrongPassword(_)) => Ok(false),
        Err(err) => Err(err),
    }
}

fn require_kind(path: &Path) -> Result<ArchiveKind, ArchiveError> {
    if !path.is_file() {
        return Err(ArchiveError::Corrupt(path.to_path_buf()));
    }
    detect_kind(path).ok_or_else(|| ArchiveError::UnsupportedFormat(path.to_path_buf()))
}

/// Create the destination file for a member under `dest_dir`, refusing
/// member paths that escape it.
pub(crate) fn member_dest(dest_dir: &Path, member: &str) -> Result<std::path::PathBuf, ArchiveError> {
    let normalized = crate::paths::normalize_member(member);
    if normalized.split('/').any(|seg| seg == "..") {
        return Err(ArchiveError::ExtractFailed {
            member: member.to_string(),
            reason: "path escapes destination".to_string(),
        });
    }
    Ok(dest_dir.join(normalized))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    fn build_zip(dir: &Path, name: &str, entries: &[(&str, &[u8])]) -> std::path::PathBuf {
        let path = dir.join(name);
        let file = File::create(&path).unwrap();
        let mut writer = ::zip::ZipWriter::new(file);
        let options = ::zip::write::SimpleFileOptions::default();
        for (member, data) in entries {
            writer.start_file(*member, options).unwrap();
            writer.write_all(data).unwrap();
        }
        writer.finish().unwrap();
        path
    }

    #[test]
    fn kind_detection_ignores_extension() {
        let tmp = tempfile::tempdir().unwrap();
        // A ZIP masquerading as .rar still detects as ZIP.
        let path = build_zip(tmp.path(), "actually-a-zip.rar", &[("a.txt", b"x")]);
        assert_eq!(detect_kind(&path), Some(ArchiveKind::Zip));
        assert!(is_archive(&path));

        let not_archive = tmp.path().join("plain.txt");
        std::fs::write(&not_archive, "not magic").unwrap();
        assert!(!is_archive(&not_archive));
    }

    #[test]
    fn list_and_read_member() {
        let tmp = tempfile::tempdir().unwrap();
        let path = build_zip(
            tmp.path(),
            "skin.zip",
            &[("chars/hero.png", b"png-bytes"), ("readme.txt", b"hi")],
        );
        let members = list_members(&path).unwrap();
        assert_eq!(members, vec!["chars/hero.png", "readme.txt"]);
        assert_eq!(
            read_member(&path, "chars/hero.png", None).unwrap(),
            b"png-bytes"
        );
        assert!(matches!(
            read_member(&path, "missing.bin", None),
            Err(ArchiveError::MemberNotFound(_))
        ));
    }

    #[test]
    fn extract_members_to_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let path = build_zip(
            tmp.path(),
            "skin.zip",
            &[("chars/hero.png", b"png"), ("chars/villain.png", b"png2")],
        );
        let dest = tmp.path().join("out");
        let count = extract_all(&path, &dest, None).unwrap();
        assert_eq!(count, 2);
        assert!(dest.join("chars/hero.png").is_file());
        assert!(dest.join("chars/villain.png").is_file());
    }

    #[test]
    fn member_dest_blocks_traversal() {
        let dest = Path::new("/safe");
        assert!(member_dest(dest, "../evil.bin").is_err());
        assert_eq!(
            member_dest(dest, "ok/fine.bin").unwrap(),
            Path::new("/safe/ok/fine.bin")
        );
    }

    #[test]
    fn plain_zip_reports_unencrypted() {
        let tmp = tempfile::tempdir().unwrap();
        let path = build_zip(tmp.path(), "open.zip", &[("a.txt", b"x")]);
        assert!(!is_encrypted(&path).unwrap());
    }
}
