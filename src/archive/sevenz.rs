//! 7z backend.
//!
//! Entries are visited with `for_each_entries`, which hands over a
//! bounded-buffer reader per member; solid archives decompress in entry
//! order without ever buffering the whole archive. Password failures in 7z
//! surface either at open (encrypted headers) or as checksum errors on the
//! first read (encrypted streams); both are normalized here.

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use sevenz_rust2::{ArchiveEntry, ArchiveReader as SevenZReader, Password};

use super::member_dest;
use crate::error::ArchiveError;
use crate::paths::normalize_member;

fn open(path: &Path, password: Option<&str>) -> Result<SevenZReader<File>, ArchiveError> {
    let file = File::open(path).map_err(|_| ArchiveError::Corrupt(path.to_path_buf()))?;
    let pass = password.map(Password::from).unwrap_or_else(Password::empty);
    SevenZReader::new(file, pass).map_err(|err| map_open_err(path, password, err))
}

pub fn list_members(path: &Path) -> Result<Vec<String>, ArchiveError> {
    let reader = open(path, None)?;
    Ok(reader
        .archive()
        .files
        .iter()
        .filter(|entry| !entry.is_directory)
        .map(|entry| normalize_member(&entry.name))
        .collect())
}

pub fn is_encrypted(path: &Path) -> Result<bool, ArchiveError> {
    // Encrypted headers fail at open; encrypted streams only fail once the
    // first member is actually read.
    let mut reader = match open(path, None) {
        Ok(reader) => reader,
        Err(ArchiveError::PasswordRequired(_)) | Err(ArchiveError::WrongPassword(_)) => {
            return Ok(true)
        }
        Err(err) => return Err(err),
    };

    let mut read_failed = false;
    let mut probed = false;
    let result = reader.for_each_entries(&mut |entry: &ArchiveEntry, stream: &mut dyn Read| {
        if entry.is_directory {
            return Ok(true);
        }
        probed = true;
        let mut buf = [0u8; 4096];
        if stream.read(&mut buf).is_err() {
            read_failed = true;
        }
        // One member is enough to probe.
        Ok(false)
    });

    match result {
        Ok(_) => Ok(probed && read_failed),
        Err(err) if is_password_err(&err) => Ok(true),
        Err(_) => Ok(probed && read_failed),
    }
}

pub fn extract_member(
    path: &Path,
    member: &str,
    password: Option<&str>,
    out: &mut dyn Write,
) -> Result<u64, ArchiveError> {
    let wanted = normalize_member(member);
    let mut reader = open(path, password)?;

    let mut written: Option<u64> = None;
    let result = reader.for_each_entries(&mut |entry: &ArchiveEntry, stream: &mut dyn Read| {
        if entry.is_directory || normalize_member(&entry.name) != wanted {
            return Ok(true);
        }
        let mut buf = [0u8; 64 * 1024];
        let mut total = 0u64;
        loop {
            let n = stream.read(&mut buf)?;
            if n == 0 {
                break;
            }
            out.write_all(&buf[..n])?;
            total += n as u64;
        }
        written = Some(total);
        Ok(false)
    });

    match result {
        Ok(_) => written.ok_or_else(|| ArchiveError::MemberNotFound(member.to_string())),
        Err(err) => Err(map_read_err(path, member, password, err)),
    }
}

pub fn extract_members(
    path: &Path,
    members: &[String],
    dest_dir: &Path,
    password: Option<&str>,
) -> Result<(), ArchiveError> {
    let wanted: Vec<String> = members.iter().map(|m| normalize_member(m)).collect();
    let mut reader = open(path, password)?;
    let mut remaining = wanted.len();

    let result = reader.for_each_entries(&mut |entry: &ArchiveEntry, stream: &mut dyn Read| {
        let name = normalize_member(&entry.name);
        if entry.is_directory || !wanted.contains(&name) {
            return Ok(true);
        }
        let dest = member_dest(dest_dir, &name).map_err(|err| {
            std::io::Error::new(std::io::ErrorKind::InvalidInput, err.to_string())
        })?;
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = File::create(&dest)?;
        let mut buf = [0u8; 64 * 1024];
        loop {
            let n = stream.read(&mut buf)?;
            if n == 0 {
                break;
            }
            file.write_all(&buf[..n])?;
        }
        remaining -= 1;
        Ok(remaining > 0)
    });

    match result {
        Ok(_) => Ok(()),
        Err(err) => Err(map_read_err(path, "<batch>", password, err)),
    }
}

fn is_password_err(err: &sevenz_rust2::Error) -> bool {
    matches!(
        err,
        sevenz_rust2::Error::PasswordRequired | sevenz_rust2::Error::MaybeBadPassword(_)
    )
}

fn map_open_err(path: &Path, password: Option<&str>, err: sevenz_rust2::Error) -> ArchiveError {
    match err {
        sevenz_rust2::Error::PasswordRequired if password.is_none() => {
            ArchiveError::PasswordRequired(path.to_path_buf())
        }
        sevenz_rust2::Error::PasswordRequired => ArchiveError::WrongPassword(path.to_path_buf()),
        sevenz_rust2::Error::MaybeBadPassword(_) => {
            ArchiveError::WrongPassword(path.to_path_buf())
        }
        _ => ArchiveError::Corrupt(path.to_path_buf()),
    }
}

fn map_read_err(
    path: &Path,
    member: &str,
    password: Option<&str>,
    err: sevenz_rust2::Error,
) -> ArchiveError {
    if is_password_err(&err) {
        return if password.is_none() {
            ArchiveError::PasswordRequired(path.to_path_buf())
        } else {
            ArchiveError::WrongPassword(path.to_path_buf())
        };
    }
    ArchiveError::ExtractFailed {
        member: member.to_string(),
        reason: err.to_string(),
    }
}
