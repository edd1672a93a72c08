//! CLI error handling with user-friendly messages.
//!
//! Centralizes error handling for the CLI, providing consistent formatting
//! and appropriate exit codes.

use std::fmt;
use std::process;

use zoomtile::manager::ManagerError;
use zoomtile::store::StoreError;

/// CLI-specific errors with user-friendly messages.
#[derive(Debug)]
pub enum CliError {
    /// Failed to initialize logging
    LoggingInit(String),
    /// Failed to build the engine
    EngineCreation(ManagerError),
    /// The convert-and-tile pipeline failed
    Tiling(String),
    /// A tile store operation failed
    Store(StoreError),
    /// Cleanup finished but reported I/O failures
    CleanupErrors(usize),
}

impl CliError {
    /// Exit the process with an appropriate error message and code.
    pub fn exit(&self) -> ! {
        eprintln!("Error: {}", self);

        match self {
            CliError::Tiling(_) => {
                eprintln!();
                eprintln!("Common issues:");
                eprintln!("  1. Document sources need pdftoppm on PATH (poppler-utils)");
                eprintln!("  2. The source file must be a readable raster image or PDF");
            }
            CliError::CleanupErrors(_) => {
                eprintln!();
                eprintln!("Some media directories could not be examined or removed;");
                eprintln!("check permissions under the tile store root.");
            }
            _ => {}
        }

        process::exit(match self {
            CliError::CleanupErrors(_) => 2,
            _ => 1,
        })
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::LoggingInit(msg) => write!(f, "Failed to initialize logging: {}", msg),
            CliError::EngineCreation(e) => write!(f, "Failed to create engine: {}", e),
            CliError::Tiling(msg) => write!(f, "Tiling failed: {}", msg),
            CliError::Store(e) => write!(f, "Tile store error: {}", e),
            CliError::CleanupErrors(count) => {
                write!(f, "Cleanup reported {} I/O failure(s)", count)
            }
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::EngineCreation(e) => Some(e),
            CliError::Store(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ManagerError> for CliError {
    fn from(e: ManagerError) -> Self {
        CliError::EngineCreation(e)
    }
}

impl From<StoreError> for CliError {
    fn from(e: StoreError) -> Self {
        CliError::Store(e)
    }
}
