//! Streaming tile pyramid construction.
//!
//! The tiler consumes a raster one scanline at a time, writes the
//! full-resolution base level in tile-row groups, then reduces upward level
//! by level with 2x2 merges until the single overview tile. Metadata with
//! `tiled=true` is written only after every tile file exists, so readers
//! never observe a half-built pyramid.

mod ppm;

pub use ppm::{read_ppm_header, PpmReader, PpmWriter};

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, warn};

use crate::store::{StoreError, TileMetadata, TileStore};
use crate::tile::{Tile, TileError, TileFormat, TileId};

/// Default tile edge length in pixels.
pub const DEFAULT_TILESIZE: u32 = 256;

/// Errors terminating a tiling job. Partial output is removed on failure.
#[derive(Debug, Error)]
pub enum TilerError {
    /// Raster header was malformed or unsupported.
    #[error("bad raster header: {0}")]
    BadHeader(String),

    /// The raster held fewer pixels than its header promised.
    #[error("less data in raster than reported by the header")]
    ShortRead,

    /// Zero-sized rasters cannot be tiled.
    #[error("raster has zero width or height")]
    EmptyRaster,

    /// The job was cancelled cooperatively.
    #[error("tiling cancelled")]
    Cancelled,

    /// Tile encode/decode failure.
    #[error(transparent)]
    Tile(#[from] TileError),

    /// Store failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Filesystem failure.
    #[error("tiler I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A raster that can be consumed one scanline at a time.
///
/// Implementations yield rows of `width * 3` interleaved RGB bytes, top to
/// bottom. [`PpmReader`] is the on-disk implementation; tests use in-memory
/// sources.
pub trait ScanlineSource {
    /// Raster width in pixels.
    fn width(&self) -> u32;
    /// Raster height in pixels.
    fn height(&self) -> u32;
    /// Fill `buf` (length `width * 3`) with the next row.
    fn read_scanline(&mut self, buf: &mut [u8]) -> Result<(), TilerError>;
}

/// Shared progress and cancellation state for one tiling job.
///
/// Cheap to clone behind an `Arc`; renderers poll [`fraction`] while the
/// job runs on its worker thread and may [`cancel`] it between rows.
///
/// [`fraction`]: TilerProgress::fraction
/// [`cancel`]: TilerProgress::cancel
#[derive(Debug, Default)]
pub struct TilerProgress {
    done: AtomicU64,
    total: AtomicU64,
    cancelled: AtomicBool,
}

impl TilerProgress {
    /// Fraction of tiles written so far, in `[0, 1]`.
    pub fn fraction(&self) -> f32 {
        let total = self.total.load(Ordering::Relaxed);
        if total == 0 {
            return 0.0;
        }
        (self.done.load(Ordering::Relaxed) as f32 / total as f32).min(1.0)
    }

    /// Request cooperative cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    /// True once cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    fn reset(&self, total: u64) {
        self.done.store(0, Ordering::Relaxed);
        self.total.store(total, Ordering::Relaxed);
    }

    fn inc(&self) {
        self.done.fetch_add(1, Ordering::Relaxed);
    }

    fn finish(&self) {
        let total = self.total.load(Ordering::Relaxed);
        self.done.store(total, Ordering::Relaxed);
    }
}

/// Smallest level whose tiling covers `max(width, height)`.
///
/// Level 0 holds the whole image in one tile; level `n` spans
/// `tilesize * 2^n` source pixels per tile edge. Pure integer arithmetic;
/// the float-log formulation invites off-by-one rounding at exact powers
/// of two.
pub fn max_level_for(width: u32, height: u32, tilesize: u32) -> i32 {
    let maxdim = u64::from(width.max(height));
    let mut level = 0;
    let mut covered = u64::from(tilesize.max(1));
    while covered < maxdim {
        covered = covered.saturating_mul(2);
        level += 1;
    }
    level
}

/// Tile grid dimensions `(across, down)` at `level`.
pub fn tiles_at_level(
    width: u32,
    height: u32,
    tilesize: u32,
    max_level: i32,
    level: i32,
) -> (u32, u32) {
    let shift = (max_level - level).clamp(0, 62) as u32;
    let span = u64::from(tilesize).saturating_mul(1u64 << shift);
    let across = u64::from(width).div_ceil(span);
    let down = u64::from(height).div_ceil(span);
    (across as u32, down as u32)
}

/// Total tile count across all levels `0..=max_level`.
pub fn total_tiles(width: u32, height: u32, tilesize: u32, max_level: i32) -> u64 {
    (0..=max_level)
        .map(|level| {
            let (across, down) = tiles_at_level(width, height, tilesize, max_level, level);
            u64::from(across) * u64::from(down)
        })
        .sum()
}

/// Builds one media's tile pyramid from a streamed raster.
pub struct Tiler {
    store: Arc<TileStore>,
    media_id: String,
    tilesize: u32,
    format: TileFormat,
    progress: Arc<TilerProgress>,
}

impl Tiler {
    /// Create a tiler for `media_id` writing into `store`.
    pub fn new(store: Arc<TileStore>, media_id: impl Into<String>) -> Self {
        Self {
            store,
            media_id: media_id.into(),
            tilesize: DEFAULT_TILESIZE,
            format: TileFormat::Jpeg,
            progress: Arc::new(TilerProgress::default()),
        }
    }

    /// Override the tile edge length.
    pub fn with_tilesize(mut self, tilesize: u32) -> Self {
        self.tilesize = tilesize.max(1);
        self
    }

    /// Override the tile file format.
    pub fn with_format(mut self, format: TileFormat) -> Self {
        self.format = format;
        self
    }

    /// Shared progress/cancellation handle for this job.
    pub fn progress(&self) -> Arc<TilerProgress> {
        Arc::clone(&self.progress)
    }

    /// Tile the raster.
    ///
    /// On success the media's metadata is written with `tiled=true` as the
    /// final step. On any failure, cancellation included, every tile
    /// written for this media is removed and the media stays untiled, so a
    /// retry starts clean.
    pub fn run(&self, source: &mut dyn ScanlineSource) -> Result<TileMetadata, TilerError> {
        let width = source.width();
        let height = source.height();
        if width == 0 || height == 0 {
            return Err(TilerError::EmptyRaster);
        }

        let max_level = max_level_for(width, height, self.tilesize);
        self.progress
            .reset(total_tiles(width, height, self.tilesize, max_level));

        debug!(
            media_id = %self.media_id,
            width,
            height,
            tilesize = self.tilesize,
            max_level,
            "beginning tiling"
        );

        // A previous partial or complete run is wiped so retries are clean
        // and re-tiling reproduces the tree byte for byte.
        self.store.delete_media(&self.media_id)?;

        match self.build(source, width, height, max_level) {
            Ok(()) => {
                let meta = TileMetadata {
                    width,
                    height,
                    tilesize: self.tilesize,
                    file_ext: self.format,
                    max_level,
                    aspect_ratio: Some(f64::from(width) / f64::from(height)),
                    tiled: true,
                    extra: Vec::new(),
                };
                self.store.write_metadata(&self.media_id, &meta)?;
                self.progress.finish();
                debug!(media_id = %self.media_id, "tiling complete");
                Ok(meta)
            }
            Err(e) => {
                let _ = self.store.delete_media(&self.media_id);
                warn!(media_id = %self.media_id, error = %e, "tiling aborted, partial output removed");
                Err(e)
            }
        }
    }

    fn build(
        &self,
        source: &mut dyn ScanlineSource,
        width: u32,
        height: u32,
        max_level: i32,
    ) -> Result<(), TilerError> {
        let t = self.tilesize;
        let (across, down) = tiles_at_level(width, height, t, max_level, max_level);
        let row_bytes = width as usize * 3;
        let tile_row_bytes = t as usize * 3;
        let mut row_buf = vec![0u8; row_bytes];

        // Base level: split each group of `t` scanlines into black-padded
        // tiles.
        for tile_row in 0..down {
            self.check_cancelled()?;
            let rows_here = (height - tile_row * t).min(t);
            let mut bufs = vec![vec![0u8; tile_row_bytes * t as usize]; across as usize];

            for y in 0..rows_here {
                self.check_cancelled()?;
                source.read_scanline(&mut row_buf)?;
                for (c, buf) in bufs.iter_mut().enumerate() {
                    let x0 = c * tile_row_bytes;
                    let len = row_bytes.saturating_sub(x0).min(tile_row_bytes);
                    let dst = y as usize * tile_row_bytes;
                    buf[dst..dst + len].copy_from_slice(&row_buf[x0..x0 + len]);
                }
            }

            for (c, buf) in bufs.into_iter().enumerate() {
                let tile = Tile::from_raw(t, t, buf)
                    .ok_or_else(|| TilerError::BadHeader("tile buffer size mismatch".to_string()))?;
                self.save(max_level, tile_row as i32, c as i32, &tile)?;
            }
        }

        // Reduce upward: each tile is the 2x2 merge of its children.
        for level in (0..max_level).rev() {
            self.check_cancelled()?;
            let (child_across, child_down) = tiles_at_level(width, height, t, max_level, level + 1);
            let (across, down) = tiles_at_level(width, height, t, max_level, level);

            for r in 0..down {
                for c in 0..across {
                    let (cr, cc) = (2 * r, 2 * c);
                    let tl = self.load(level + 1, cr, cc)?;
                    let tr = (cc + 1 < child_across)
                        .then(|| self.load(level + 1, cr, cc + 1))
                        .transpose()?;
                    let bl = (cr + 1 < child_down)
                        .then(|| self.load(level + 1, cr + 1, cc))
                        .transpose()?;
                    let br = (cc + 1 < child_across && cr + 1 < child_down)
                        .then(|| self.load(level + 1, cr + 1, cc + 1))
                        .transpose()?;

                    let merged = Tile::merge(&tl, tr.as_ref(), bl.as_ref(), br.as_ref());
                    self.save(level, r as i32, c as i32, &merged)?;
                }
            }
        }

        Ok(())
    }

    fn save(&self, level: i32, row: i32, col: i32, tile: &Tile) -> Result<(), TilerError> {
        let id = TileId::new(self.media_id.clone(), level, row, col);
        self.store.save_tile(&id, tile, self.format)?;
        self.progress.inc();
        debug!(id = %id, progress = self.progress.fraction(), "saved tile");
        Ok(())
    }

    fn load(&self, level: i32, row: u32, col: u32) -> Result<Tile, TilerError> {
        let id = TileId::new(self.media_id.clone(), level, row as i32, col as i32);
        Ok(Tile::decode(&self.store.tile_path(&id, self.format))?)
    }

    fn check_cancelled(&self) -> Result<(), TilerError> {
        if self.progress.is_cancelled() {
            Err(TilerError::Cancelled)
        } else {
            Ok(())
        }
    }
}
