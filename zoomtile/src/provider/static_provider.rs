//! Loading tiles from the on-disk store.

use std::sync::Arc;

use tracing::debug;

use super::TileLoad;
use crate::store::TileStore;
use crate::tile::{Tile, TileId};

/// Reads persisted pyramid tiles out of a [`TileStore`].
///
/// Requests for untiled media, out-of-range levels, or missing files all
/// come back as `None`, which the worker records as a tombstone.
pub struct StaticLoad {
    store: Arc<TileStore>,
}

impl StaticLoad {
    /// Create a loader over `store`.
    pub fn new(store: Arc<TileStore>) -> Self {
        Self { store }
    }
}

impl TileLoad for StaticLoad {
    fn name(&self) -> &str {
        "static"
    }

    fn load(&self, id: &TileId) -> Option<Tile> {
        if id.level < 0 || id.row < 0 || id.col < 0 {
            return None;
        }

        let meta = match self.store.read_metadata(&id.media_id) {
            Ok(meta) => meta,
            Err(e) => {
                debug!(id = %id, error = %e, "no metadata for requested tile");
                return None;
            }
        };
        if !meta.tiled || id.level > meta.max_level {
            return None;
        }

        match self.store.load_tile(id) {
            Ok(tile) => Some(tile),
            Err(e) => {
                debug!(id = %id, error = %e, "tile missing from store");
                None
            }
        }
    }
}
