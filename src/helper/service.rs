//! Helper-side service loop.
//!
//! Runs inside the separately-privileged helper process and executes the
//! RPC surface with plain file access. Requests are handled one at a time
//! per connection — the channel is serialized by construction — and every
//! outcome, including an internal panic-worthy condition, is reported as a
//! [`HelperReply`], never as a broken stream.

use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use super::protocol::{code, decode_bytes, HelperReply, HelperRequest};
use crate::access::AccessResolver;
use crate::archive;
use crate::fileops::{DirectFileOps, FileOps, FileRouter};
use crate::helper::HelperChannel;
use crate::scanner;
use crate::special::SpecialGameRegistry;

/// Serve forever on `listener`. Clients are handled sequentially; the
/// client side holds a single connection for the process lifetime.
pub fn serve(listener: UnixListener) -> Result<()> {
    info!("helper service listening");
    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                if let Err(err) = handle_client(stream) {
                    warn!("helper client ended with error: {err}");
                }
            }
            Err(err) => warn!("helper accept failed: {err}"),
        }
    }
    Ok(())
}

/// Bind the helper socket at `socket_path`, replacing a stale one.
pub fn bind(socket_path: &Path) -> Result<UnixListener> {
    if socket_path.exists() {
        std::fs::remove_file(socket_path)
            .with_context(|| format!("cannot remove stale socket {}", socket_path.display()))?;
    }
    if let Some(parent) = socket_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    UnixListener::bind(socket_path)
        .with_context(|| format!("cannot bind helper socket {}", socket_path.display()))
}

fn handle_client(stream: UnixStream) -> Result<()> {
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut writer = stream;
    let mut line = String::new();

    loop {
        line.clear();
        let n = reader.read_line(&mut line)?;
        if n == 0 {
            return Ok(());
        }
        let reply = match serde_json::from_str::<HelperRequest>(&line) {
            Ok(request) => dispatch(request),
            Err(err) => HelperReply::fail(code::BAD_REQUEST, err.to_string()),
        };
        let mut out = serde_json::to_string(&reply)?;
        out.push('\n');
        writer.write_all(out.as_bytes())?;
        writer.flush()?;
    }
}

/// Execute one request with direct file access.
pub fn dispatch(request: HelperRequest) -> HelperReply {
    let ops = DirectFileOps;
    match request {
        HelperRequest::Delete { path } => HelperReply::ok_flag(ops.delete(&path)),
        HelperRequest::Copy { src, dest } => HelperReply::ok_flag(ops.copy(&src, &dest)),
        HelperRequest::Move { src, dest } => HelperReply::ok_flag(ops.move_file(&src, &dest)),
        HelperRequest::ListNames { path } => {
            HelperReply::ok(serde_json::json!(ops.list_names(&path)))
        }
        HelperRequest::Write {
            dir,
            filename,
            content,
        } => HelperReply::ok_flag(ops.write(&dir, &filename, &content)),
        HelperRequest::Exists { path } => HelperReply::ok_flag(ops.exists(&path)),
        HelperRequest::IsFile { path } => HelperReply::ok_flag(ops.is_file(&path)),
        HelperRequest::WriteStream {
            dir,
            filename,
            data_b64,
        } => match decode_bytes(&data_b64) {
            Some(data) => {
                let mut cursor = std::io::Cursor::new(data);
                HelperReply::ok_flag(ops.create_file_from_stream(&dir, &filename, &mut cursor))
            }
            None => HelperReply::fail(code::BAD_REQUEST, "undecodable stream payload"),
        },
        HelperRequest::LastModified { path } => match ops.last_modified(&path) {
            Some(mtime) => HelperReply::ok(serde_json::json!(mtime)),
            None => HelperReply::fail(code::NOT_FOUND, "no such file"),
        },
        HelperRequest::FileLen { path } => match ops.file_len(&path) {
            Some(len) => HelperReply::ok(serde_json::json!(len)),
            None => HelperReply::fail(code::NOT_FOUND, "no such file"),
        },
        HelperRequest::RenameDirectory { path, new_name } => {
            HelperReply::ok_flag(ops.rename_directory(&path, &new_name))
        }
        HelperRequest::CreateDirectory { path } => {
            HelperReply::ok_flag(ops.create_directory(&path))
        }
        HelperRequest::ReadText { path } => match ops.read_text(&path) {
            Some(text) => HelperReply::ok(serde_json::json!(text)),
            None => HelperReply::fail(code::NOT_FOUND, "unreadable file"),
        },
        HelperRequest::ListFiles { path } => {
            let entries: Vec<serde_json::Value> = ops
                .list_files(&path)
                .into_iter()
                .map(|e| {
                    serde_json::json!({
                        "path": e.path,
                        "is_dir": e.is_dir,
                        "size": e.size,
                        "modified": e.modified,
                    })
                })
                .collect();
            HelperReply::ok(serde_json::json!(entries))
        }
        HelperRequest::Md5 { path } => match ops.md5(&path) {
            Some(digest) => HelperReply::ok(serde_json::json!(digest)),
            None => HelperReply::fail(code::NOT_FOUND, "unreadable file"),
        },
        HelperRequest::ScanMods { path, game } => {
            // The helper sees everything with plain file APIs.
            let channel = Arc::new(HelperChannel::new());
            let resolver = Arc::new(AccessResolver::new(
                vec![PathBuf::from("/")],
                Arc::clone(&channel),
            ));
            let router = FileRouter::new(resolver, channel);
            let hooks = SpecialGameRegistry::builtin();
            let moved =
                scanner::relocate_candidates(&router, &path, &game, &hooks, &scanner::no_progress);
            HelperReply::ok(serde_json::json!(moved))
        }
        HelperRequest::Unzip {
            archive,
            dest,
            member,
            password,
        } => match archive::extract_members(
            &archive,
            std::slice::from_ref(&member),
            &dest,
            password.as_deref(),
        ) {
            Ok(()) => HelperReply::ok_flag(true),
            Err(err) => HelperReply::fail(code::FAILED, err.to_string()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatch_copy_and_md5() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("a.bin");
        std::fs::write(&src, b"payload").unwrap();
        let dest = tmp.path().join("sub/b.bin");

        let reply = dispatch(HelperRequest::Copy {
            src: src.clone(),
            dest: dest.clone(),
        });
        assert!(reply.as_bool());
        assert!(dest.is_file());

        let reply = dispatch(HelperRequest::Md5 { path: dest });
        assert!(reply.ok);
        assert_eq!(
            reply.payload.as_str().unwrap(),
            crate::hash::md5_bytes(b"payload")
        );
    }

    #[test]
    fn dispatch_missing_file_is_typed_failure() {
        let reply = dispatch(HelperRequest::Md5 {
            path: PathBuf::from("/no/such/file"),
        });
        assert!(!reply.ok);
        assert_eq!(reply.code, code::NOT_FOUND);
    }

    #[test]
    fn end_to_end_over_socket() {
        let tmp = tempfile::tempdir().unwrap();
        let socket = tmp.path().join("helper.sock");
        let listener = bind(&socket).unwrap();
        std::thread::spawn(move || {
            // One client is enough for the test.
            if let Ok((stream, _)) = listener.accept() {
                let _ = handle_client(stream);
            }
        });

        let channel = HelperChannel::new();
        channel.connect(&socket).unwrap();

        let dir = tmp.path().join("made-by-helper");
        assert!(channel.call_bool(&HelperRequest::CreateDirectory { path: dir.clone() }));
        assert!(dir.is_dir());

        let reply = channel
            .call(&HelperRequest::Exists { path: dir })
            .unwrap();
        assert!(reply.as_bool());
    }
}
