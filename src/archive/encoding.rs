//! Member-name mojibake recovery.
//!
//! Archives produced by legacy Windows tools store member names in a
//! regional codepage without marking it. Decoding those bytes as UTF-8 (or
//! the ZIP default CP437) yields mojibake. When any raw name fails to
//! decode cleanly as UTF-8, the whole name table is re-decoded with a
//! sequence of legacy codepages and the first codepage that decodes every
//! name without replacement characters wins — one codepage for the whole
//! archive, never per-name guessing.

use encoding_rs::{Encoding, BIG5, GBK, SHIFT_JIS, WINDOWS_1252};

/// Candidate legacy codepages, in the order they are tried.
const LEGACY_CODEPAGES: [&Encoding; 4] = [GBK, SHIFT_JIS, BIG5, WINDOWS_1252];

/// Decode a whole archive's raw member names with a single consistent
/// encoding.
pub fn decode_member_names(raw_names: &[Vec<u8>]) -> Vec<String> {
    if raw_names
        .iter()
        .all(|bytes| std::str::from_utf8(bytes).is_ok())
    {
        return raw_names
            .iter()
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
            .collect();
    }

    for codepage in LEGACY_CODEPAGES {
        if let Some(decoded) = decode_all_clean(codepage, raw_names) {
            return decoded;
        }
    }

    // Nothing decodes cleanly; lossy UTF-8 keeps the archive usable.
    raw_names
        .iter()
        .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
        .collect()
}

/// Decode every name with `codepage`; `None` if any name has errors.
fn decode_all_clean(codepage: &'static Encoding, raw_names: &[Vec<u8>]) -> Option<Vec<String>> {
    let mut decoded = Vec::with_capacity(raw_names.len());
    for bytes in raw_names {
        let (text, _, had_errors) = codepage.decode(bytes);
        if had_errors {
            return None;
        }
        decoded.push(text.into_owned());
    }
    Some(decoded)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn utf8_names_pass_through() {
        let raw = vec![b"chars/hero.png".to_vec(), "角色/英雄.png".as_bytes().to_vec()];
        let decoded = decode_member_names(&raw);
        assert_eq!(decoded[0], "chars/hero.png");
        assert_eq!(decoded[1], "角色/英雄.png");
    }

    #[test]
    fn gbk_names_are_recovered() {
        // "预览.png" encoded as GBK is invalid UTF-8.
        let (gbk_bytes, _, _) = GBK.encode("预览.png");
        assert!(std::str::from_utf8(&gbk_bytes).is_err());

        let raw = vec![b"plain.txt".to_vec(), gbk_bytes.into_owned()];
        let decoded = decode_member_names(&raw);
        assert_eq!(decoded[0], "plain.txt");
        assert_eq!(decoded[1], "预览.png");
    }

    #[test]
    fn one_codepage_for_the_whole_archive() {
        let (a, _, _) = GBK.encode("美术");
        let (b, _, _) = GBK.encode("模型");
        let raw = vec![a.into_owned(), b.into_owned()];
        let decoded = decode_member_names(&raw);
        assert_eq!(decoded, vec!["美术", "模型"]);
    }

    #[test]
    fn undecodable_names_fall_back_lossy() {
        let raw = vec![vec![0xFF, 0xFE, 0x80, 0x81, 0x82]];
        let decoded = decode_member_names(&raw);
        assert_eq!(decoded.len(), 1);
        assert!(!decoded[0].is_empty());
    }
}
