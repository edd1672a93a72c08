//! Source-format normalization in isolated worker processes.
//!
//! Decoder libraries keep internal thread pools that interact badly with
//! the provider workers running in this process, so every conversion runs
//! in a freshly spawned child process rather than a thread. The
//! [`ConversionRunner`] bounds how many children run at once and hands out
//! [`ConversionHandle`]s to poll or wait on.
//!
//! The child entry point is the engine binary's `convert-worker`
//! subcommand; embedders with their own binary either route that
//! subcommand to [`worker::run_cli`] or configure a custom
//! [`WorkerCommand`].

mod runner;
pub mod worker;

pub use runner::{ConversionHandle, ConversionRunner, JobStatus, WorkerCommand};

use std::path::PathBuf;

use thiserror::Error;

/// Default number of conversion worker slots: `min(cpu_count, 4)`.
pub fn default_conversion_workers() -> usize {
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4);
    cpus.min(4)
}

/// One conversion job: a source file into a streamable P6 raster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversionJob {
    /// Decode an image file, optionally transforming it on the way.
    ConvertImage {
        input: PathBuf,
        output: PathBuf,
        /// Clockwise rotation in degrees: 0, 90, 180, or 270.
        rotation: u16,
        /// Invert colors.
        invert: bool,
        /// Convert to grayscale (kept as RGB on disk).
        mono: bool,
    },
    /// Rasterize the first page of a document at the given resolution.
    ConvertDocument {
        input: PathBuf,
        output: PathBuf,
        dpi: u32,
    },
}

impl ConversionJob {
    /// The output path this job writes.
    pub fn output(&self) -> &PathBuf {
        match self {
            ConversionJob::ConvertImage { output, .. } => output,
            ConversionJob::ConvertDocument { output, .. } => output,
        }
    }

    /// Serialize to worker-process command-line arguments.
    pub fn to_worker_args(&self) -> Vec<String> {
        match self {
            ConversionJob::ConvertImage {
                input,
                output,
                rotation,
                invert,
                mono,
            } => {
                let mut args = vec![
                    "image".to_string(),
                    input.display().to_string(),
                    output.display().to_string(),
                    "--rotation".to_string(),
                    rotation.to_string(),
                ];
                if *invert {
                    args.push("--invert".to_string());
                }
                if *mono {
                    args.push("--mono".to_string());
                }
                args
            }
            ConversionJob::ConvertDocument { input, output, dpi } => vec![
                "document".to_string(),
                input.display().to_string(),
                output.display().to_string(),
                "--dpi".to_string(),
                dpi.to_string(),
            ],
        }
    }
}

/// Errors from the conversion pipeline.
#[derive(Debug, Error)]
pub enum ConversionError {
    /// Filesystem or process spawn failure.
    #[error("conversion I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The source could not be decoded.
    #[error("cannot decode source: {0}")]
    Decode(String),

    /// Rotation must be one of 0, 90, 180, 270.
    #[error("unsupported rotation: {0}")]
    UnsupportedRotation(u16),

    /// An external rasterizer failed.
    #[error("rasterizer failed: {0}")]
    Tool(String),

    /// Malformed worker-process arguments.
    #[error("bad worker arguments: {0}")]
    BadArgs(String),
}
