//! Privileged-helper tier.
//!
//! Forwards every operation across the helper channel. Stream payloads are
//! read fully and shipped base64-encoded; the helper writes them out with
//! its own privileges. A dead channel yields negative results, never an
//! error at the trait boundary.

use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use tracing::warn;

use super::{FileEntry, FileOps};
use crate::helper::protocol::{encode_bytes, HelperRequest};
use crate::helper::HelperChannel;

pub struct HelperFileOps {
    channel: Arc<HelperChannel>,
}

impl HelperFileOps {
    pub fn new(channel: Arc<HelperChannel>) -> Self {
        Self { channel }
    }

    fn call_bool(&self, request: HelperRequest) -> bool {
        self.channel.call_bool(&request)
    }

    fn call_payload(&self, request: HelperRequest) -> Option<serde_json::Value> {
        match self.channel.call(&request) {
            Ok(reply) if reply.ok => Some(reply.payload),
            Ok(_) => None,
            Err(err) => {
                warn!("helper call failed: {err}");
                None
            }
        }
    }
}

impl FileOps for HelperFileOps {
    fn delete(&self, path: &Path) -> bool {
        self.call_bool(HelperRequest::Delete {
            path: path.to_path_buf(),
        })
    }

    fn copy(&self, src: &Path, dest: &Path) -> bool {
        self.call_bool(HelperRequest::Copy {
            src: src.to_path_buf(),
            dest: dest.to_path_buf(),
        })
    }

    fn move_file(&self, src: &Path, dest: &Path) -> bool {
        self.call_bool(HelperRequest::Move {
            src: src.to_path_buf(),
            dest: dest.to_path_buf(),
        })
    }

    fn list_names(&self, path: &Path) -> Vec<String> {
        self.call_payload(HelperRequest::ListNames {
            path: path.to_path_buf(),
        })
        .and_then(|v| serde_json::from_value(v).ok())
        .unwrap_or_default()
    }

    fn write(&self, dir: &Path, filename: &str, content: &str) -> bool {
        self.call_bool(HelperRequest::Write {
            dir: dir.to_path_buf(),
            filename: filename.to_string(),
            content: content.to_string(),
        })
    }

    fn exists(&self, path: &Path) -> bool {
        self.call_bool(HelperRequest::Exists {
            path: path.to_path_buf(),
        })
    }

    fn is_file(&self, path: &Path) -> bool {
        self.call_bool(HelperRequest::IsFile {
            path: path.to_path_buf(),
        })
    }

    fn create_file_from_stream(&self, dir: &Path, filename: &str, stream: &mut dyn Read) -> bool {
        let mut data = Vec::new();
        if let Err(err) = stream.read_to_end(&mut data) {
            warn!("failed to read stream for helper write: {err}");
            return false;
        }
        self.call_bool(HelperRequest::WriteStream {
            dir: dir.to_path_buf(),
            filename: filename.to_string(),
            data_b64: encode_bytes(&data),
        })
    }

    fn last_modified(&self, path: &Path) -> Option<i64> {
        self.call_payload(HelperRequest::LastModified {
            path: path.to_path_buf(),
        })
        .and_then(|v| v.as_i64())
    }

    fn file_len(&self, path: &Path) -> Option<u64> {
        self.call_payload(HelperRequest::FileLen {
            path: path.to_path_buf(),
        })
        .and_then(|v| v.as_u64())
    }

    fn rename_directory(&self, path: &Path, new_name: &str) -> bool {
        self.call_bool(HelperRequest::RenameDirectory {
            path: path.to_path_buf(),
            new_name: new_name.to_string(),
        })
    }

    fn create_directory(&self, path: &Path) -> bool {
        self.call_bool(HelperRequest::CreateDirectory {
            path: path.to_path_buf(),
        })
    }

    fn read_text(&self, path: &Path) -> Option<String> {
        self.call_payload(HelperRequest::ReadText {
            path: path.to_path_buf(),
        })
        .and_then(|v| v.as_str().map(str::to_owned))
    }

    fn list_files(&self, path: &Path) -> Vec<FileEntry> {
        #[derive(serde::Deserialize)]
        struct WireEntry {
            path: std::path::PathBuf,
            is_dir: bool,
            size: u64,
            modified: i64,
        }
        self.call_payload(HelperRequest::ListFiles {
            path: path.to_path_buf(),
        })
        .and_then(|v| serde_json::from_value::<Vec<WireEntry>>(v).ok())
        .map(|entries| {
            entries
                .into_iter()
                .map(|e| FileEntry {
                    path: e.path,
                    is_dir: e.is_dir,
                    size: e.size,
                    modified: e.modified,
                })
                .collect()
        })
        .unwrap_or_default()
    }

    fn md5(&self, path: &Path) -> Option<String> {
        self.call_payload(HelperRequest::Md5 {
            path: path.to_path_buf(),
        })
        .and_then(|v| v.as_str().map(str::to_owned))
    }
}
