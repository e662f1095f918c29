//! Privileged helper channel.
//!
//! Some paths are only reachable by a separately-privileged helper process.
//! This module owns the client side of that channel: a connection manager
//! with explicit connect/disconnect and a line-delimited JSON protocol over
//! a Unix socket. The channel is a single shared pipe; calls through it are
//! serialized here regardless of how many callers issue them concurrently.
//!
//! Call sites never see a raw socket or a null handle. A dropped or absent
//! connection surfaces as [`PermissionError::HelperUnavailable`].

pub mod protocol;
pub mod service;

use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::sync::Mutex;

use tracing::{debug, warn};

use crate::error::{PermissionError, Result};
use protocol::{HelperReply, HelperRequest};

struct Conn {
    reader: BufReader<UnixStream>,
    writer: UnixStream,
}

/// Client end of the helper channel, safe to share between threads.
pub struct HelperChannel {
    conn: Mutex<Option<Conn>>,
}

impl Default for HelperChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl HelperChannel {
    pub fn new() -> Self {
        Self {
            conn: Mutex::new(None),
        }
    }

    /// Connect to the helper socket. Replaces any previous connection.
    pub fn connect(&self, socket: &Path) -> Result<(), PermissionError> {
        let stream =
            UnixStream::connect(socket).map_err(|_| PermissionError::HelperUnavailable)?;
        let writer = stream
            .try_clone()
            .map_err(|_| PermissionError::HelperUnavailable)?;
        let mut guard = self.conn.lock().unwrap();
        *guard = Some(Conn {
            reader: BufReader::new(stream),
            writer,
        });
        debug!("helper channel connected via {}", socket.display());
        Ok(())
    }

    pub fn disconnect(&self) {
        let mut guard = self.conn.lock().unwrap();
        if guard.take().is_some() {
            debug!("helper channel disconnected");
        }
    }

    pub fn is_connected(&self) -> bool {
        self.conn.lock().unwrap().is_some()
    }

    /// Issue one request and wait for its reply. The mutex both guards the
    /// stream and enforces the one-call-in-flight rule of the channel.
    pub fn call(&self, request: &HelperRequest) -> Result<HelperReply, PermissionError> {
        let mut guard = self.conn.lock().unwrap();
        let conn = guard.as_mut().ok_or(PermissionError::HelperUnavailable)?;

        let outcome = Self::exchange(conn, request);
        match outcome {
            Ok(reply) => {
                if reply.code == protocol::code::UNAUTHORIZED {
                    return Err(PermissionError::HelperUnauthorized(reply.message));
                }
                Ok(reply)
            }
            Err(err) => {
                // A broken pipe poisons the channel; drop it so the resolver
                // stops offering the helper tier until a reconnect.
                warn!("helper channel i/o failure: {err}");
                *guard = None;
                Err(PermissionError::HelperUnavailable)
            }
        }
    }

    /// Convenience for fire-and-check operations.
    pub fn call_bool(&self, request: &HelperRequest) -> bool {
        match self.call(request) {
            Ok(reply) => reply.as_bool(),
            Err(_) => false,
        }
    }

    fn exchange(conn: &mut Conn, request: &HelperRequest) -> std::io::Result<HelperReply> {
        let mut line = serde_json::to_string(request)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        line.push('\n');
        conn.writer.write_all(line.as_bytes())?;
        conn.writer.flush()?;

        let mut reply_line = String::new();
        let n = conn.reader.read_line(&mut reply_line)?;
        if n == 0 {
            return Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof));
        }
        serde_json::from_str(&reply_line)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }
}
