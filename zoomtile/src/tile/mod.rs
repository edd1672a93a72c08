//! Tile identity and the in-memory tile value type.
//!
//! A [`Tile`] is an owned square of RGB pixels with the operations the rest
//! of the engine needs: cropping, resizing, 2x2 merging during pyramid
//! reduction, and encoding to/from the on-disk formats. A [`TileId`] names
//! one tile within one media's pyramid.

mod error;
mod id;
mod image;

pub use self::error::TileError;
pub use self::id::{TileId, DYNAMIC_PREFIX};
pub use self::image::Tile;

/// On-disk encoding for tile files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TileFormat {
    /// JPEG, default for photographic sources.
    Jpeg,
    /// PNG, default for generated content.
    Png,
}

impl TileFormat {
    /// File extension without the leading dot.
    pub fn ext(&self) -> &'static str {
        match self {
            TileFormat::Jpeg => "jpg",
            TileFormat::Png => "png",
        }
    }

    /// Parse a file extension as stored in metadata.
    pub fn from_ext(ext: &str) -> Option<Self> {
        match ext {
            "jpg" | "jpeg" => Some(TileFormat::Jpeg),
            "png" => Some(TileFormat::Png),
            _ => None,
        }
    }
}

impl std::fmt::Display for TileFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.ext())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_ext_round_trip() {
        assert_eq!(TileFormat::from_ext(TileFormat::Jpeg.ext()), Some(TileFormat::Jpeg));
        assert_eq!(TileFormat::from_ext(TileFormat::Png.ext()), Some(TileFormat::Png));
    }

    #[test]
    fn test_format_jpeg_alias() {
        assert_eq!(TileFormat::from_ext("jpeg"), Some(TileFormat::Jpeg));
    }

    #[test]
    fn test_format_unknown_ext() {
        assert_eq!(TileFormat::from_ext("gif"), None);
        assert_eq!(TileFormat::from_ext(""), None);
    }

    #[test]
    fn test_format_display() {
        assert_eq!(TileFormat::Jpeg.to_string(), "jpg");
        assert_eq!(TileFormat::Png.to_string(), "png");
    }
}
