//! Tile providers: workers that materialize tiles into the shared cache.
//!
//! A [`Provider`] owns one background thread servicing a LIFO request
//! queue; the newest request reflects the user's current viewport, so it is
//! served first. What "loading" means is behind the [`TileLoad`] seam:
//! [`StaticLoad`] reads persisted pyramids from the [`TileStore`], and
//! [`DynamicLoad`] runs a registered [`TileGenerator`].
//!
//! Providers never raise out of a load: a tile that cannot be produced is
//! recorded as a cache tombstone, which suppresses re-enqueue storms.
//!
//! [`TileStore`]: crate::store::TileStore

mod dynamic;
mod fern;
mod static_provider;
mod worker;

pub use dynamic::{DynamicLoad, TileGenerator, DEFAULT_DYNAMIC_MAX_LEVEL};
pub use fern::FernGenerator;
pub use static_provider::StaticLoad;
pub use worker::{Provider, TileLoad};
