//! # LogTailer
//!
//! Follows a log file for newly appended lines and exposes them as an
//! async stream of strings.
//!
//! Grounded on `monitor.go`'s `logger.TailLog(file)`, which hands back a
//! channel fed by a background goroutine watching the file for appended
//! bytes. The `notify` crate's filesystem watcher is the idiomatic Rust
//! replacement for that polling goroutine; a `tokio::sync::mpsc` channel
//! plays the same role as the Go channel.

use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use notify::{Event, EventKind, RecursiveMode, Watcher};
use tokio::sync::mpsc;

/// Handle to a running tail. Dropping it stops the underlying watcher.
pub struct LogTailer {
    receiver: mpsc::Receiver<String>,
    _watcher: notify::RecommendedWatcher,
}

impl LogTailer {
    /// Starts tailing `path` from its current end-of-file. Every line
    /// appended after this call is delivered through [`LogTailer::recv`].
    pub fn start(path: impl AsRef<Path>) -> notify::Result<Self> {
        let path: PathBuf = path.as_ref().to_path_buf();
        let (tx, receiver) = mpsc::channel(256);

        let mut offset = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
        let watch_path = path.clone();

        let mut watcher = notify::recommended_watcher(move |event: notify::Result<Event>| {
            let Ok(event) = event else { return };
            if !matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                return;
            }
            if let Ok(mut file) = std::fs::File::open(&watch_path) {
                if file.seek(SeekFrom::Start(offset)).is_err() {
                    return;
                }
                let mut buf = String::new();
                if file.read_to_string(&mut buf).is_ok() && !buf.is_empty() {
                    offset += buf.len() as u64;
                    for line in buf.lines() {
                        let _ = tx.try_send(line.to_string());
                    }
                }
            }
        })?;

        watcher.watch(&path, RecursiveMode::NonRecursive)?;

        Ok(LogTailer {
            receiver,
            _watcher: watcher,
        })
    }

    /// Waits for the next appended line, or `None` once the sender half
    /// has been dropped (the watcher errored out permanently).
    pub async fn recv(&mut self) -> Option<String> {
        self.receiver.recv().await
    }
}
