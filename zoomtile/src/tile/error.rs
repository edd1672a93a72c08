//! Error type for tile pixel operations.

use thiserror::Error;

/// Errors raised while loading, saving, or manipulating tile pixels.
#[derive(Debug, Error)]
pub enum TileError {
    /// Filesystem error while reading or writing a tile file.
    #[error("tile I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The tile file exists but could not be decoded.
    #[error("tile decode error: {0}")]
    Decode(String),

    /// The tile could not be encoded to the requested format.
    #[error("tile encode error: {0}")]
    Encode(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_display() {
        let err = TileError::from(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "missing",
        ));
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn test_decode_display() {
        let err = TileError::Decode("truncated jpeg".to_string());
        assert_eq!(err.to_string(), "tile decode error: truncated jpeg");
    }

    #[test]
    fn test_encode_display() {
        let err = TileError::Encode("bad dimensions".to_string());
        assert_eq!(err.to_string(), "tile encode error: bad dimensions");
    }
}
