//! Zoomtile - multi-resolution tile pyramids for zooming user interfaces
//!
//! This library converts arbitrarily large raster images into tile pyramids,
//! persists them on disk, and serves tiles to renderers through a concurrent
//! in-memory cache with fallback synthesis for tiles that are not yet loaded.
//!
//! # High-Level API
//!
//! For most use cases, the [`manager`] module provides the coordinating facade:
//!
//! ```ignore
//! use zoomtile::config::EngineConfig;
//! use zoomtile::manager::TileManager;
//! use zoomtile::tile::TileId;
//!
//! let manager = TileManager::new(EngineConfig::default(), Vec::new())?;
//!
//! let id = TileId::new("photos/alps.jpg", 2, 1, 3);
//! manager.request(id.clone());
//! let fetched = manager.fetch(&id)?;
//! ```

pub mod cache;
pub mod config;
pub mod convert;
pub mod logging;
pub mod manager;
pub mod provider;
pub mod store;
pub mod tile;
pub mod tiler;

/// Version of the zoomtile library and CLI.
///
/// This is synchronized across all components in the workspace.
/// The version is defined in `Cargo.toml` and injected at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
