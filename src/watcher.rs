//! Filesystem change observer.
//!
//! Watches the user's mod source directory and the active game's
//! mod-install directory and signals when either changes, so the UI layer
//! can trigger a rescan. Bursts of events collapse into a single pending
//! signal: the channel holds at most one undelivered rescan request, and
//! additional changes while one is pending are absorbed.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, warn};

/// A coalesced "something changed, rescan" signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RescanRequested;

pub struct ChangeObserver {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
    signals: Receiver<RescanRequested>,
}

impl ChangeObserver {
    /// Start watching `dirs`, polling every `interval`.
    pub fn start(dirs: Vec<PathBuf>, interval: Duration) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        // Capacity 1 is the coalescing: a pending signal absorbs new ones.
        let (tx, rx) = std::sync::mpsc::sync_channel(1);
        let thread_stop = Arc::clone(&stop);
        let thread = std::thread::Builder::new()
            .name("modvault-watcher".to_string())
            .spawn(move || poll_loop(dirs, interval, tx, thread_stop))
            .expect("failed to spawn watcher thread");
        Self {
            stop,
            thread: Some(thread),
            signals: rx,
        }
    }

    /// Receiver of coalesced rescan signals.
    pub fn signals(&self) -> &Receiver<RescanRequested> {
        &self.signals
    }

    /// Stop the watcher and join its thread.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for ChangeObserver {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn poll_loop(
    dirs: Vec<PathBuf>,
    interval: Duration,
    tx: SyncSender<RescanRequested>,
    stop: Arc<AtomicBool>,
) {
    let mut last = signatures(&dirs);
    while !stop.load(Ordering::Relaxed) {
        std::thread::sleep(interval);
        if stop.load(Ordering::Relaxed) {
            break;
        }
        let current = signatures(&dirs);
        if current != last {
            last = current;
            match tx.try_send(RescanRequested) {
                Ok(()) => debug!("directory change detected, rescan signalled"),
                // A signal is already pending; this change rides along.
                Err(TrySendError::Full(_)) => {}
                Err(TrySendError::Disconnected(_)) => {
                    warn!("rescan receiver dropped, stopping watcher");
                    break;
                }
            }
        }
    }
}

/// Cheap per-directory content signature: entry names, sizes and mtimes.
fn signatures(dirs: &[PathBuf]) -> Vec<u64> {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    dirs.iter()
        .map(|dir| {
            let mut hasher = DefaultHasher::new();
            if let Ok(entries) = std::fs::read_dir(dir) {
                let mut items: Vec<(String, u64, i64)> = entries
                    .flatten()
                    .filter_map(|e| {
                        let meta = e.metadata().ok()?;
                        let mtime = meta
                            .modified()
                            .ok()
                            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                            .map(|d| d.as_millis() as i64)
                            .unwrap_or(0);
                        Some((
                            e.file_name().to_string_lossy().into_owned(),
                            meta.len(),
                            mtime,
                        ))
                    })
                    .collect();
                items.sort();
                items.hash(&mut hasher);
            }
            hasher.finish()
        })
        .collect()
}
