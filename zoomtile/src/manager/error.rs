//! The engine-level error taxonomy.

use thiserror::Error;

use crate::store::StoreError;

/// Errors surfaced by [`TileManager`](super::TileManager) operations.
#[derive(Debug, Error)]
pub enum ManagerError {
    /// The media has no on-disk pyramid and is not a dynamic generator.
    /// The caller should trigger conversion and tiling.
    #[error("media has not been tiled")]
    NotTiled,

    /// The tile is valid but not yet in the cache; retry after the
    /// provider services the request.
    #[error("tile is not yet loaded")]
    NotLoaded,

    /// The tile cannot exist: out-of-range coordinates, a recorded
    /// tombstone, or a permanent load failure.
    #[error("tile is not available")]
    NotAvailable,

    /// Filesystem or encode/decode failure.
    #[error("I/O failure: {0}")]
    Io(String),

    /// A source format could not be normalized.
    #[error("conversion failed: {0}")]
    Conversion(String),

    /// The operation was aborted by purge or shutdown.
    #[error("operation cancelled")]
    Cancelled,
}

impl From<StoreError> for ManagerError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::MediaNotTiled => ManagerError::NotTiled,
            other => ManagerError::Io(other.to_string()),
        }
    }
}

impl From<std::io::Error> for ManagerError {
    fn from(e: std::io::Error) -> Self {
        ManagerError::Io(e.to_string())
    }
}
