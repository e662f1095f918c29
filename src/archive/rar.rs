//! RAR backend.
//!
//! The unrar crate exposes a cursor-style API: read a header, then either
//! read/extract that entry or skip to the next header. Listing uses the
//! cheaper listing mode; extraction walks the cursor and streams matched
//! entries out of memory buffers the library hands back.

use std::io::Write;
use std::path::Path;

use unrar::error::{Code, UnrarError};
use unrar::Archive;

use super::member_dest;
use crate::error::ArchiveError;
use crate::paths::normalize_member;

pub fn list_members(path: &Path) -> Result<Vec<String>, ArchiveError> {
    let archive = Archive::new(path)
        .open_for_listing()
        .map_err(|err| map_err(path, None, err))?;

    let mut members = Vec::new();
    for entry in archive {
        let header = entry.map_err(|err| map_err(path, None, err))?;
        if header.is_file() {
            members.push(normalize_member(&header.filename.to_string_lossy()));
        }
    }
    Ok(members)
}

pub fn is_encrypted(path: &Path) -> Result<bool, ArchiveError> {
    // Header-encrypted archives refuse to list at all; stream-encrypted
    // ones list fine and fail on the first passwordless read.
    match list_members(path) {
        Err(ArchiveError::PasswordRequired(_)) | Err(ArchiveError::WrongPassword(_)) => {
            return Ok(true)
        }
        Err(err) => return Err(err),
        Ok(members) if members.is_empty() => return Ok(false),
        Ok(_) => {}
    }

    let mut cursor = Archive::new(path)
        .open_for_processing()
        .map_err(|err| map_err(path, None, err))?;
    while let Some(header) = cursor.read_header().map_err(|err| map_err(path, None, err))? {
        if !header.entry().is_file() {
            cursor = header.skip().map_err(|err| map_err(path, None, err))?;
            continue;
        }
        return match header.read() {
            Ok(_) => Ok(false),
            Err(err) if is_password_code(err.code) => Ok(true),
            Err(_) => Ok(false),
        };
    }
    Ok(false)
}

pub fn extract_member(
    path: &Path,
    member: &str,
    password: Option<&str>,
    out: &mut dyn Write,
) -> Result<u64, ArchiveError> {
    let wanted = normalize_member(member);
    let mut cursor = open_for_processing(path, password)?;

    while let Some(header) = cursor
        .read_header()
        .map_err(|err| map_err(path, password, err))?
    {
        let name = normalize_member(&header.entry().filename.to_string_lossy());
        if header.entry().is_file() && name == wanted {
            let (data, _) = header.read().map_err(|err| map_err(path, password, err))?;
            out.write_all(&data).map_err(|err| ArchiveError::ExtractFailed {
                member: member.to_string(),
                reason: err.to_string(),
            })?;
            return Ok(data.len() as u64);
        }
        cursor = header.skip().map_err(|err| map_err(path, password, err))?;
    }
    Err(ArchiveError::MemberNotFound(member.to_string()))
}

pub fn extract_members(
    path: &Path,
    members: &[String],
    dest_dir: &Path,
    password: Option<&str>,
) -> Result<(), ArchiveError> {
    let wanted: Vec<String> = members.iter().map(|m| normalize_member(m)).collect();
    let mut remaining = wanted.len();
    let mut cursor = open_for_processing(path, password)?;

    while remaining > 0 {
        let Some(header) = cursor
            .read_header()
            .map_err(|err| map_err(path, password, err))?
        else {
            break;
        };
        let name = normalize_member(&header.entry().filename.to_string_lossy());
        if header.entry().is_file() && wanted.contains(&name) {
            let dest = member_dest(dest_dir, &name)?;
            if let Some(parent) = dest.parent() {
                std::fs::create_dir_all(parent).map_err(|err| ArchiveError::ExtractFailed {
                    member: name.clone(),
                    reason: err.to_string(),
                })?;
            }
            let (data, next) = header.read().map_err(|err| map_err(path, password, err))?;
            std::fs::write(&dest, &data).map_err(|err| ArchiveError::ExtractFailed {
                member: name.clone(),
                reason: err.to_string(),
            })?;
            cursor = next;
            remaining -= 1;
        } else {
            cursor = header.skip().map_err(|err| map_err(path, password, err))?;
        }
    }
    Ok(())
}

fn open_for_processing(
    path: &Path,
    password: Option<&str>,
) -> Result<unrar::OpenArchive<unrar::Process, unrar::CursorBeforeHeader>, ArchiveError> {
    let archive = match password {
        Some(pass) => Archive::with_password(path, pass),
        None => Archive::new(path),
    };
    archive
        .open_for_processing()
        .map_err(|err| map_err(path, password, err))
}

fn is_password_code(code: Code) -> bool {
    matches!(code, Code::MissingPassword | Code::BadPassword)
}

fn map_err(path: &Path, password: Option<&str>, err: UnrarError) -> ArchiveError {
    match err.code {
        Code::MissingPassword => ArchiveError::PasswordRequired(path.to_path_buf()),
        Code::BadPassword => ArchiveError::WrongPassword(path.to_path_buf()),
        // Wrong stream keys on RAR4 often surface as data errors instead of
        // a password code.
        Code::BadData if password.is_some() => ArchiveError::WrongPassword(path.to_path_buf()),
        _ => ArchiveError::Corrupt(path.to_path_buf()),
    }
}
