//! MD5 hashing for backup verification and change detection.
//!
//! All records in the store key file identity by MD5, so this module is the
//! single place the digest is computed. Files are streamed with a bounded
//! buffer; nothing here loads a whole file into memory.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

const BUF_SIZE: usize = 1024 * 1024;

/// Compute the MD5 of a file and return it as a lowercase hex string.
pub fn md5_file(path: &Path) -> std::io::Result<String> {
    let file = File::open(path)?;
    let mut reader = BufReader::with_capacity(BUF_SIZE, file);
    md5_stream(&mut reader)
}

/// Compute the MD5 of an arbitrary reader with a bounded buffer.
pub fn md5_stream<R: Read + ?Sized>(reader: &mut R) -> std::io::Result<String> {
    let mut ctx = md5::Context::new();
    let mut buf = vec![0u8; BUF_SIZE];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        ctx.consume(&buf[..n]);
    }
    Ok(format!("{:x}", ctx.compute()))
}

/// MD5 of an in-memory buffer.
pub fn md5_bytes(data: &[u8]) -> String {
    format!("{:x}", md5::compute(data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn known_digest() {
        // RFC 1321 test vector
        assert_eq!(md5_bytes(b"abc"), "900150983cd24fb0d6963f7d28e17f72");
    }

    #[test]
    fn file_and_bytes_agree() -> std::io::Result<()> {
        let mut tmp = NamedTempFile::new()?;
        tmp.write_all(b"modvault test payload")?;
        tmp.flush()?;
        assert_eq!(md5_file(tmp.path())?, md5_bytes(b"modvault test payload"));
        Ok(())
    }

    #[test]
    fn empty_file() -> std::io::Result<()> {
        let tmp = NamedTempFile::new()?;
        assert_eq!(md5_file(tmp.path())?, "d41d8cd98f00b204e9800998ecf8427e");
        Ok(())
    }
}
