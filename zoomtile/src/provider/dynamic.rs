//! Procedural tile generation.

use std::sync::Arc;

use tracing::debug;

use super::TileLoad;
use crate::tile::{Tile, TileFormat, TileId};

/// Assumed depth for generators that do not declare a maximum level.
pub const DEFAULT_DYNAMIC_MAX_LEVEL: i32 = 18;

/// A registered source of procedural tiles.
///
/// Implementations must be deterministic: the same `(level, row, col)`
/// always yields the same pixels, because callers cache and re-derive tiles
/// freely.
pub trait TileGenerator: Send + Sync {
    /// Routing key; the generator serves media id `dynamic:<key>`.
    fn key(&self) -> &str;

    /// Edge length of generated tiles.
    fn tilesize(&self) -> u32 {
        256
    }

    /// Encoding used if generated tiles are persisted.
    fn file_ext(&self) -> TileFormat {
        TileFormat::Png
    }

    /// Width over height of the whole virtual image.
    fn aspect_ratio(&self) -> f64 {
        1.0
    }

    /// Deepest level this generator produces, `None` for unbounded.
    fn max_level(&self) -> Option<i32> {
        None
    }

    /// Produce the tile at `(level, row, col)`.
    ///
    /// Coordinates are pre-validated against the level's grid; returning
    /// `None` marks the tile unavailable.
    fn generate(&self, level: i32, row: i32, col: i32) -> Option<Tile>;
}

/// Adapts a [`TileGenerator`] to the provider worker.
pub struct DynamicLoad {
    generator: Arc<dyn TileGenerator>,
    media_id: String,
}

impl DynamicLoad {
    /// Wrap `generator`; it serves the media id `dynamic:<key>`.
    pub fn new(generator: Arc<dyn TileGenerator>) -> Self {
        let media_id = format!("{}{}", crate::tile::DYNAMIC_PREFIX, generator.key());
        Self {
            generator,
            media_id,
        }
    }

    /// The media id this loader serves.
    pub fn media_id(&self) -> &str {
        &self.media_id
    }

    /// Coordinate validity for a square grid of `2^level` tiles per side.
    fn in_range(level: i32, row: i32, col: i32) -> bool {
        if level < 0 || row < 0 || col < 0 {
            return false;
        }
        if level >= 31 {
            // Grid wider than any representable coordinate.
            return true;
        }
        let side = 1i64 << level;
        i64::from(row) < side && i64::from(col) < side
    }
}

impl TileLoad for DynamicLoad {
    fn name(&self) -> &str {
        "dynamic"
    }

    fn load(&self, id: &TileId) -> Option<Tile> {
        if id.media_id != self.media_id {
            debug!(id = %id, expected = %self.media_id, "request routed to wrong generator");
            return None;
        }
        if !Self::in_range(id.level, id.row, id.col) {
            debug!(id = %id, "coordinates out of range for level");
            return None;
        }
        if let Some(max) = self.generator.max_level() {
            if id.level > max {
                return None;
            }
        }
        self.generator.generate(id.level, id.row, id.col)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ProbeGenerator {
        calls: AtomicUsize,
    }

    impl TileGenerator for ProbeGenerator {
        fn key(&self) -> &str {
            "probe"
        }
        fn tilesize(&self) -> u32 {
            8
        }
        fn max_level(&self) -> Option<i32> {
            Some(4)
        }
        fn generate(&self, _level: i32, _row: i32, _col: i32) -> Option<Tile> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Some(Tile::solid(8, [1, 2, 3]))
        }
    }

    fn load() -> (DynamicLoad, Arc<ProbeGenerator>) {
        let generator = Arc::new(ProbeGenerator {
            calls: AtomicUsize::new(0),
        });
        (DynamicLoad::new(Arc::clone(&generator) as Arc<dyn TileGenerator>), generator)
    }

    #[test]
    fn test_media_id_has_prefix() {
        let (load, _) = load();
        assert_eq!(load.media_id(), "dynamic:probe");
    }

    #[test]
    fn test_generates_valid_tile() {
        let (load, generator) = load();
        assert!(load.load(&TileId::new("dynamic:probe", 2, 1, 3)).is_some());
        assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_out_of_range_skips_generator() {
        let (load, generator) = load();

        // Row equal to the grid side is the first invalid coordinate.
        assert!(load.load(&TileId::new("dynamic:probe", 2, 4, 0)).is_none());
        assert!(load.load(&TileId::new("dynamic:probe", 2, 0, 4)).is_none());
        assert!(load.load(&TileId::new("dynamic:probe", 2, -1, 0)).is_none());
        assert!(load.load(&TileId::new("dynamic:probe", 2, 0, -1)).is_none());
        assert!(load.load(&TileId::new("dynamic:probe", -1, 0, 0)).is_none());

        assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_level_zero_accepts_only_origin() {
        let (load, _) = load();
        assert!(load.load(&TileId::new("dynamic:probe", 0, 0, 0)).is_some());
        assert!(load.load(&TileId::new("dynamic:probe", 0, 0, 1)).is_none());
    }

    #[test]
    fn test_beyond_declared_max_level() {
        let (load, generator) = load();
        assert!(load.load(&TileId::new("dynamic:probe", 5, 0, 0)).is_none());
        assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_wrong_media_id() {
        let (load, _) = load();
        assert!(load.load(&TileId::new("dynamic:other", 0, 0, 0)).is_none());
    }
}
