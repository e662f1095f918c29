//! Wire protocol of the privileged helper channel.
//!
//! One JSON object per line in each direction. Every request is answered
//! with a [`HelperReply`] carrying a success flag, a numeric code and a
//! human-readable message; an exception never crosses the boundary.

use std::path::PathBuf;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::config::GameInfo;

/// Reply codes shared by both sides of the channel.
pub mod code {
    pub const OK: i32 = 0;
    pub const FAILED: i32 = 1;
    pub const NOT_FOUND: i32 = 2;
    pub const UNAUTHORIZED: i32 = 3;
    pub const BAD_REQUEST: i32 = 4;
}

/// The fixed RPC surface: the file-operation set plus mod scanning and
/// archive extraction on behalf of the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum HelperRequest {
    Delete { path: PathBuf },
    Copy { src: PathBuf, dest: PathBuf },
    Move { src: PathBuf, dest: PathBuf },
    ListNames { path: PathBuf },
    Write { dir: PathBuf, filename: String, content: String },
    Exists { path: PathBuf },
    IsFile { path: PathBuf },
    /// Byte payloads travel base64-encoded inside the JSON line.
    WriteStream { dir: PathBuf, filename: String, data_b64: String },
    LastModified { path: PathBuf },
    FileLen { path: PathBuf },
    RenameDirectory { path: PathBuf, new_name: String },
    CreateDirectory { path: PathBuf },
    ReadText { path: PathBuf },
    ListFiles { path: PathBuf },
    Md5 { path: PathBuf },
    ScanMods { path: PathBuf, game: GameInfo },
    Unzip {
        archive: PathBuf,
        dest: PathBuf,
        member: String,
        password: Option<String>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelperReply {
    pub ok: bool,
    pub code: i32,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl HelperReply {
    pub fn ok(payload: serde_json::Value) -> Self {
        Self {
            ok: true,
            code: code::OK,
            message: String::new(),
            payload,
        }
    }

    pub fn ok_flag(flag: bool) -> Self {
        Self {
            ok: flag,
            code: if flag { code::OK } else { code::FAILED },
            message: String::new(),
            payload: serde_json::Value::Null,
        }
    }

    pub fn fail(code: i32, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            code,
            message: message.into(),
            payload: serde_json::Value::Null,
        }
    }

    pub fn as_bool(&self) -> bool {
        self.ok
            && match &self.payload {
                serde_json::Value::Bool(b) => *b,
                serde_json::Value::Null => true,
                _ => true,
            }
    }
}

pub fn encode_bytes(data: &[u8]) -> String {
    BASE64.encode(data)
}

pub fn decode_bytes(data_b64: &str) -> Option<Vec<u8>> {
    BASE64.decode(data_b64).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_roundtrip() {
        let req = HelperRequest::Copy {
            src: PathBuf::from("/a"),
            dest: PathBuf::from("/b"),
        };
        let line = serde_json::to_string(&req).unwrap();
        assert!(line.contains("\"op\":\"copy\""));
        let back: HelperRequest = serde_json::from_str(&line).unwrap();
        assert!(matches!(back, HelperRequest::Copy { .. }));
    }

    #[test]
    fn bytes_roundtrip() {
        let encoded = encode_bytes(b"\x00\x01payload");
        assert_eq!(decode_bytes(&encoded).unwrap(), b"\x00\x01payload");
    }

    #[test]
    fn reply_flags() {
        assert!(HelperReply::ok_flag(true).as_bool());
        assert!(!HelperReply::ok_flag(false).as_bool());
        assert!(!HelperReply::fail(code::NOT_FOUND, "missing").as_bool());
    }
}
