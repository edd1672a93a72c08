//! Log output for the engine and CLI.
//!
//! Events go to two sinks at once: a per-session file for after-the-fact
//! debugging and stdout for whoever launched the process. The file is
//! truncated at startup, so each session reads top to bottom without
//! hunting for where the previous run ended. Verbosity comes from the
//! `RUST_LOG` environment variable, falling back to `info`.
//!
//! Both sinks use the compact single-line format: provider workers and
//! the tiler emit one event per tile, and multi-line records make those
//! streams impossible to grep or tail. Span timing events are not emitted
//! for the same reason; the engine logs its units of work explicitly.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// File name of the session log within the log directory.
pub const LOG_FILE: &str = "zoomtile.log";

/// Keeps the background file writer alive.
///
/// Buffered lines are flushed when this drops; hold it until the process
/// is done logging.
pub struct LogGuard {
    _writer: WorkerGuard,
}

/// Route `tracing` events to `<dir>/zoomtile.log` and stdout.
///
/// Creates `dir` if needed and truncates any previous session's file.
///
/// # Errors
///
/// Fails when the directory cannot be created or the log file is not
/// writable.
pub fn init_logging(dir: impl AsRef<Path>) -> io::Result<LogGuard> {
    let dir = dir.as_ref();
    fs::create_dir_all(dir)?;

    // Truncate rather than append: one file per session.
    File::create(dir.join(LOG_FILE))?;

    let (file_writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::never(dir, LOG_FILE));

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false)
                .compact(),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(io::stdout)
                .compact(),
        )
        .init();

    Ok(LogGuard { _writer: guard })
}

/// Default log directory, relative to the working directory.
pub fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}
