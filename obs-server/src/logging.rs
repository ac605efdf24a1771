//! # LogBackend
//!
//! Structured JSON logging with a daily-rotating file appender, plus a
//! background task that gzip-compresses logs past `compress_after_days`
//! and deletes compressed logs past `retain_days`.
//!
//! Grounded on `logger/log.go`'s `NewTracingLog` (zap JSON encoder over
//! a `lestrrat-go/file-rotatelogs` writer) and `logger/writer.go`'s
//! `backend()`/`compressAndRemoveFile` loop (compress N days back, keep
//! a bounded window of compressed files). `tracing_subscriber` plus
//! `tracing-appender`'s daily rolling file appender is the idiomatic
//! Rust equivalent of the zap + rotatelogs pairing; `flate2` replaces
//! the Go source's `archive/zip` writer since gzip-per-file matches
//! `tracing-appender`'s one-file-per-day layout more directly than a
//! zip archive would.
//!
//! Dynamic level adjustment mirrors `logger/splitlogger.go`'s
//! `Handler::SetLevel(lv, duration)`: a lowered level is installed
//! immediately, and a timer (here a `tokio::spawn` sleep rather than the
//! Go source's dedicated `resetLogLevel` goroutine polling a channel of
//! `resetLevelCmd`s) reverts to the default level once the duration
//! elapses. `tracing_subscriber::reload::Handle` is the idiomatic Rust
//! analogue of swapping a `zerolog.Logger`'s level in place.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use flate2::write::GzEncoder;
use flate2::Compression;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{reload, EnvFilter, Registry};

use obs_common::ObservatoryConfig;

/// Log file label.
const LOG_LABEL: &str = "trace";

/// Handle onto the live `EnvFilter` layer, letting a caller lower the
/// log level at runtime and have it automatically revert to the
/// configured default after `revert_after`.
pub struct LogController {
    handle: reload::Handle<EnvFilter, Registry>,
    default_level: String,
    revert_after: Duration,
    revert_task: Mutex<Option<JoinHandle<()>>>,
}

impl LogController {
    /// Installs `level` immediately. Any revert previously scheduled by
    /// an earlier call is cancelled and replaced by a new one that fires
    /// after `revert_after`, restoring the configured default level.
    pub fn set_level(self: &Arc<Self>, level: &str) -> io::Result<()> {
        let filter = EnvFilter::try_new(level)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))?;
        self.handle
            .reload(filter)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;

        if let Some(previous) = self.revert_task.lock().take() {
            previous.abort();
        }

        let this = self.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(this.revert_after).await;
            if let Ok(filter) = EnvFilter::try_new(&this.default_level) {
                let _ = this.handle.reload(filter);
            }
        });
        *self.revert_task.lock() = Some(task);
        Ok(())
    }

    /// The level this controller reverts to once a lowered level expires.
    pub fn default_level(&self) -> &str {
        &self.default_level
    }
}

/// Initializes the global `tracing` subscriber with JSON output routed
/// to a daily-rotating file under `config.log_dir`. Returns a guard that
/// must be kept alive for the duration of the process (dropping it stops
/// the non-blocking writer's background flush thread), plus a
/// [`LogController`] for adjusting the level at runtime.
pub fn init(config: &ObservatoryConfig) -> io::Result<(WorkerGuard, Arc<LogController>)> {
    std::fs::create_dir_all(&config.log_dir)?;

    let file_appender = tracing_appender::rolling::daily(&config.log_dir, LOG_LABEL);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = EnvFilter::try_new(&config.log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let (filter_layer, reload_handle) = reload::Layer::new(env_filter);

    let fmt_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_current_span(false);

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .init();

    let controller = Arc::new(LogController {
        handle: reload_handle,
        default_level: config.log_level.clone(),
        revert_after: config.log_level_revert_after,
        revert_task: Mutex::new(None),
    });

    Ok((guard, controller))
}

/// Spawns the background rotation task: once a day, gzip-compresses log
/// files older than `compress_after_days` and deletes compressed files
/// older than `retain_days`. Runs until the process exits; there is no
/// handle to join because it is meant to outlive everything else.
pub fn spawn_rotation_task(config: ObservatoryConfig) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(24 * 3600));
        loop {
            interval.tick().await;
            if let Err(e) = rotate_once(&config.log_dir, config.compress_after_days, config.retain_days) {
                tracing::warn!(error = %e, "log rotation sweep failed");
            }
        }
    });
}

fn rotate_once(log_dir: &Path, compress_after_days: u32, retain_days: u32) -> io::Result<()> {
    let now = std::time::SystemTime::now();
    let compress_after = Duration::from_secs(compress_after_days as u64 * 86_400);
    let retain_after = Duration::from_secs(retain_days as u64 * 86_400);

    for entry in std::fs::read_dir(log_dir)? {
        let entry = entry?;
        let path = entry.path();
        let Ok(metadata) = entry.metadata() else { continue };
        let Ok(modified) = metadata.modified() else { continue };
        let Ok(age) = now.duration_since(modified) else { continue };

        let is_gz = path.extension().is_some_and(|ext| ext == "gz");

        if is_gz {
            if age > retain_after {
                let _ = std::fs::remove_file(&path);
            }
        } else if age > compress_after && path.is_file() {
            compress_and_remove(&path)?;
        }
    }
    Ok(())
}

fn compress_and_remove(path: &Path) -> io::Result<()> {
    let mut dest: PathBuf = path.to_path_buf();
    dest.as_mut_os_string().push(".gz");

    let mut src = std::fs::File::open(path)?;
    let out = std::fs::File::create(&dest)?;
    let mut encoder = GzEncoder::new(out, Compression::default());
    io::copy(&mut src, &mut encoder)?;
    encoder.finish()?;

    std::fs::remove_file(path)
}
