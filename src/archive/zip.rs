//! ZIP backend.
//!
//! Listing works on raw name bytes so the archive-wide mojibake recovery
//! in [`super::encoding`] can decide a single decoding for the name table.
//! Extraction matches members against those decoded names, streams with
//! `io::copy`, and maps password failures to the distinct error kinds.

use std::fs::File;
use std::io::{BufReader, Write};
use std::path::Path;

use zip::result::ZipError;
use zip::ZipArchive;

use super::{encoding, member_dest};
use crate::error::ArchiveError;
use crate::paths::normalize_member;

type Archive = ZipArchive<BufReader<File>>;

fn open(path: &Path) -> Result<Archive, ArchiveError> {
    let file = File::open(path).map_err(|_| ArchiveError::Corrupt(path.to_path_buf()))?;
    ZipArchive::new(BufReader::new(file)).map_err(|_| ArchiveError::Corrupt(path.to_path_buf()))
}

/// Decoded member names for every entry, parallel to entry indices.
/// Directory entries are included here and filtered by callers.
fn decoded_names(archive: &mut Archive, path: &Path) -> Result<Vec<String>, ArchiveError> {
    let mut raw = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let entry = archive
            .by_index_raw(i)
            .map_err(|_| ArchiveError::Corrupt(path.to_path_buf()))?;
        raw.push(entry.name_raw().to_vec());
    }
    Ok(encoding::decode_member_names(&raw)
        .into_iter()
        .map(|name| normalize_member(&name))
        .collect())
}

pub fn list_members(path: &Path) -> Result<Vec<String>, ArchiveError> {
    let mut archive = open(path)?;
    let names = decoded_names(&mut archive, path)?;
    let mut members = Vec::new();
    for (i, name) in names.into_iter().enumerate() {
        let entry = archive
            .by_index_raw(i)
            .map_err(|_| ArchiveError::Corrupt(path.to_path_buf()))?;
        if !entry.is_dir() {
            members.push(name);
        }
    }
    Ok(members)
}

pub fn is_encrypted(path: &Path) -> Result<bool, ArchiveError> {
    let mut archive = open(path)?;
    for i in 0..archive.len() {
        let entry = archive
            .by_index_raw(i)
            .map_err(|_| ArchiveError::Corrupt(path.to_path_buf()))?;
        if entry.encrypted() {
            return Ok(true);
        }
    }
    Ok(false)
}

pub fn extract_member(
    path: &Path,
    member: &str,
    password: Option<&str>,
    out: &mut dyn Write,
) -> Result<u64, ArchiveError> {
    let mut archive = open(path)?;
    let names = decoded_names(&mut archive, path)?;
    let wanted = normalize_member(member);
    let index = names
        .iter()
        .position(|name| *name == wanted)
        .ok_or_else(|| ArchiveError::MemberNotFound(member.to_string()))?;

    let needs_password = {
        let entry = archive
            .by_index_raw(index)
            .map_err(|_| ArchiveError::Corrupt(path.to_path_buf()))?;
        entry.encrypted()
    };
    if needs_password && password.is_none() {
        return Err(ArchiveError::PasswordRequired(path.to_path_buf()));
    }

    let mut entry = match password {
        Some(pass) if needs_password => archive
            .by_index_decrypt(index, pass.as_bytes())
            .map_err(|err| map_err(path, member, err))?,
        _ => archive
            .by_index(index)
            .map_err(|err| map_err(path, member, err))?,
    };
    std::io::copy(&mut entry, out).map_err(|err| {
        // An encrypted stream with the wrong key usually survives open and
        // dies on read with a checksum failure.
        if needs_password {
            ArchiveError::WrongPassword(path.to_path_buf())
        } else {
            ArchiveError::ExtractFailed {
                member: member.to_string(),
                reason: err.to_string(),
            }
        }
    })
}

pub fn extract_members(
    path: &Path,
    members: &[String],
    dest_dir: &Path,
    password: Option<&str>,
) -> Result<(), ArchiveError> {
    for member in members {
        let dest = member_dest(dest_dir, member)?;
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent).map_err(|err| ArchiveError::ExtractFailed {
                member: member.clone(),
                reason: err.to_string(),
            })?;
        }
        let mut out = File::create(&dest).map_err(|err| ArchiveError::ExtractFailed {
            member: member.clone(),
            reason: err.to_string(),
        })?;
        extract_member(path, member, password, &mut out)?;
    }
    Ok(())
}

fn map_err(path: &Path, member: &str, err: ZipError) -> ArchiveError {
    match err {
        ZipError::InvalidPassword => ArchiveError::WrongPassword(path.to_path_buf()),
        ZipError::UnsupportedArchive(detail) if detail == ZipError::PASSWORD_REQUIRED => {
            ArchiveError::PasswordRequired(path.to_path_buf())
        }
        ZipError::FileNotFound => ArchiveError::MemberNotFound(member.to_string()),
        other => ArchiveError::ExtractFailed {
            member: member.to_string(),
            reason: other.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;
    use zip::write::SimpleFileOptions;

    fn encrypted_zip(dir: &Path, password: &str) -> std::path::PathBuf {
        let path = dir.join("locked.zip");
        let file = File::create(&path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        let options =
            SimpleFileOptions::default().with_aes_encryption(zip::AesMode::Aes256, password);
        writer.start_file("payload.bin", options).unwrap();
        writer.write_all(b"secret payload").unwrap();
        writer.finish().unwrap();
        path
    }

    #[test]
    fn encrypted_zip_is_detected() {
        let tmp = tempfile::tempdir().unwrap();
        let path = encrypted_zip(tmp.path(), "pw123");
        assert!(is_encrypted(&path).unwrap());
    }

    #[test]
    fn missing_password_is_required_not_wrong() {
        let tmp = tempfile::tempdir().unwrap();
        let path = encrypted_zip(tmp.path(), "pw123");
        let err = extract_member(&path, "payload.bin", None, &mut std::io::sink()).unwrap_err();
        assert!(matches!(err, ArchiveError::PasswordRequired(_)));
    }

    #[test]
    fn correct_password_extracts() {
        let tmp = tempfile::tempdir().unwrap();
        let path = encrypted_zip(tmp.path(), "pw123");
        let mut buf = Vec::new();
        extract_member(&path, "payload.bin", Some("pw123"), &mut buf).unwrap();
        assert_eq!(buf, b"secret payload");
    }

    #[test]
    fn wrong_password_is_distinct() {
        let tmp = tempfile::tempdir().unwrap();
        let path = encrypted_zip(tmp.path(), "pw123");
        let err = extract_member(&path, "payload.bin", Some("nope"), &mut std::io::sink())
            .unwrap_err();
        assert!(matches!(err, ArchiveError::WrongPassword(_)));
    }
}
