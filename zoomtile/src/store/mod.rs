//! Disk-based tile storage.
//!
//! A [`TileStore`] owns one directory tree of tiled media. Each media lives
//! under a directory named by the hash of its id and holds a `metadata`
//! record plus one image file per tile:
//!
//! ```text
//! <root>/<sha1(media_id)>/
//!     metadata
//!     00/00_000000_000000.jpg
//!     01/01_000000_000000.jpg
//!     01/01_000000_000001.jpg
//!     ...
//! ```
//!
//! Writes are serialized by one process-wide lock; reads run concurrently
//! with each other but not with writes.

mod cleanup;
mod metadata;
mod path;

pub use cleanup::{cleanup_old_tiles, CleanupReport};
pub use metadata::{MetaValue, TileMetadata};
pub use path::{default_store_root, media_dir, media_hash, tile_rel_path};

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock, RwLockWriteGuard};

use thiserror::Error;

use crate::tile::{Tile, TileError, TileFormat, TileId};

/// Storage-level errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The media has no completed pyramid on disk.
    #[error("media is not tiled")]
    MediaNotTiled,

    /// The metadata file exists but could not be parsed.
    #[error("bad metadata: {0}")]
    Metadata(String),

    /// Pixel-level failure while reading or writing a tile file.
    #[error(transparent)]
    Tile(#[from] TileError),

    /// Filesystem error.
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Aggregate statistics over the store directory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Number of media directories.
    pub media_count: usize,
    /// Number of files across all media.
    pub file_count: usize,
    /// Total size of all files in bytes.
    pub total_bytes: u64,
}

/// Content-addressed repository of tile pyramids.
pub struct TileStore {
    root: PathBuf,
    disk_lock: RwLock<()>,
    metadata_cache: Mutex<HashMap<String, TileMetadata>>,
}

impl TileStore {
    /// Open a store rooted at `root`, creating the directory if needed.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            disk_lock: RwLock::new(()),
            metadata_cache: Mutex::new(HashMap::new()),
        })
    }

    /// Open the platform-default store location.
    pub fn open_default() -> Result<Self, StoreError> {
        Self::new(default_store_root())
    }

    /// The store root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding all files for `media_id`.
    pub fn media_path(&self, media_id: &str) -> PathBuf {
        media_dir(&self.root, media_id)
    }

    /// Full path of one tile file with an explicit extension.
    pub fn tile_path(&self, id: &TileId, format: TileFormat) -> PathBuf {
        self.media_path(&id.media_id)
            .join(tile_rel_path(id.level, id.row, id.col, format))
    }

    /// Write one tile file.
    ///
    /// The extension is explicit so the tiler can write before the media's
    /// metadata record exists.
    pub fn save_tile(&self, id: &TileId, tile: &Tile, format: TileFormat) -> Result<(), StoreError> {
        let _guard = self.disk_lock.write().unwrap();
        let path = self.tile_path(id, format);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        tile.encode(&path, format)?;
        Ok(())
    }

    /// Load one tile of a tiled media.
    ///
    /// Fails with [`StoreError::MediaNotTiled`] when the media's metadata is
    /// absent or reports an incomplete pyramid.
    pub fn load_tile(&self, id: &TileId) -> Result<Tile, StoreError> {
        let meta = self.read_metadata(&id.media_id)?;
        if !meta.tiled {
            return Err(StoreError::MediaNotTiled);
        }
        let _guard = self.disk_lock.read().unwrap();
        Ok(Tile::decode(&self.tile_path(id, meta.file_ext))?)
    }

    /// Read and cache the metadata record for `media_id`.
    pub fn read_metadata(&self, media_id: &str) -> Result<TileMetadata, StoreError> {
        if let Some(meta) = self.metadata_cache.lock().unwrap().get(media_id) {
            return Ok(meta.clone());
        }

        let text = {
            let _guard = self.disk_lock.read().unwrap();
            match fs::read_to_string(self.media_path(media_id).join("metadata")) {
                Ok(text) => text,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    return Err(StoreError::MediaNotTiled)
                }
                Err(e) => return Err(StoreError::Io(e)),
            }
        };

        let meta = TileMetadata::parse(&text).map_err(StoreError::Metadata)?;
        self.metadata_cache
            .lock()
            .unwrap()
            .insert(media_id.to_string(), meta.clone());
        Ok(meta)
    }

    /// Write the metadata record for `media_id`.
    ///
    /// The record is written to a temporary file and renamed into place, so
    /// a reader never observes `tiled=true` before the record is complete.
    pub fn write_metadata(&self, media_id: &str, meta: &TileMetadata) -> Result<(), StoreError> {
        let _guard = self.disk_lock.write().unwrap();
        let dir = self.media_path(media_id);
        fs::create_dir_all(&dir)?;

        let tmp = dir.join("metadata.tmp");
        fs::write(&tmp, meta.to_file_contents())?;
        fs::rename(&tmp, dir.join("metadata"))?;

        self.metadata_cache
            .lock()
            .unwrap()
            .insert(media_id.to_string(), meta.clone());
        Ok(())
    }

    /// Adjust the metadata record for `media_id` in place.
    ///
    /// The record is re-read from disk, handed to `mutate`, and renamed
    /// back into place within a single hold of the write lock, so a
    /// concurrent update can never drop keys this library does not
    /// interpret. Fails with [`StoreError::MediaNotTiled`] when no record
    /// exists yet.
    pub fn update_metadata<F>(&self, media_id: &str, mutate: F) -> Result<TileMetadata, StoreError>
    where
        F: FnOnce(&mut TileMetadata),
    {
        let _guard = self.disk_lock.write().unwrap();
        let dir = self.media_path(media_id);
        let path = dir.join("metadata");

        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::MediaNotTiled)
            }
            Err(e) => return Err(StoreError::Io(e)),
        };
        let mut meta = TileMetadata::parse(&text).map_err(StoreError::Metadata)?;
        mutate(&mut meta);

        let tmp = dir.join("metadata.tmp");
        fs::write(&tmp, meta.to_file_contents())?;
        fs::rename(&tmp, path)?;

        self.metadata_cache
            .lock()
            .unwrap()
            .insert(media_id.to_string(), meta.clone());
        Ok(meta)
    }

    /// True when the media has a completed pyramid.
    pub fn is_tiled(&self, media_id: &str) -> bool {
        self.read_metadata(media_id)
            .map(|meta| meta.tiled)
            .unwrap_or(false)
    }

    /// Walk the store and report aggregate statistics.
    pub fn stats(&self) -> Result<StoreStats, StoreError> {
        let _guard = self.disk_lock.read().unwrap();
        let mut stats = StoreStats::default();
        if !self.root.exists() {
            return Ok(stats);
        }
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.path().is_dir() {
                stats.media_count += 1;
                accumulate_dir(&entry.path(), &mut stats)?;
            }
        }
        Ok(stats)
    }

    /// Remove every file for `media_id`.
    pub fn delete_media(&self, media_id: &str) -> Result<(), StoreError> {
        let _guard = self.disk_lock.write().unwrap();
        let dir = self.media_path(media_id);
        if dir.exists() {
            fs::remove_dir_all(&dir)?;
            tracing::debug!(media_id, "deleted media from store");
        }
        self.metadata_cache.lock().unwrap().remove(media_id);
        Ok(())
    }

    /// Exclusive hold on the disk, shared with the cleanup pass.
    pub(crate) fn lock_exclusive(&self) -> RwLockWriteGuard<'_, ()> {
        self.disk_lock.write().unwrap()
    }

    /// Drop cached metadata whose media hashes to `hash`.
    pub(crate) fn forget_media_hash(&self, hash: &str) {
        self.metadata_cache
            .lock()
            .unwrap()
            .retain(|media_id, _| media_hash(media_id) != hash);
    }
}

fn accumulate_dir(dir: &Path, stats: &mut StoreStats) -> Result<(), StoreError> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            accumulate_dir(&path, stats)?;
        } else if let Ok(meta) = entry.metadata() {
            stats.file_count += 1;
            stats.total_bytes += meta.len();
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (TileStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = TileStore::new(dir.path()).unwrap();
        (store, dir)
    }

    fn sample_meta(tiled: bool) -> TileMetadata {
        TileMetadata {
            width: 512,
            height: 512,
            tilesize: 256,
            file_ext: TileFormat::Png,
            max_level: 1,
            aspect_ratio: Some(1.0),
            tiled,
            extra: Vec::new(),
        }
    }

    #[test]
    fn test_save_and_load_tile() {
        let (store, _dir) = store();
        store.write_metadata("m", &sample_meta(true)).unwrap();

        let id = TileId::new("m", 1, 0, 1);
        let tile = Tile::solid(256, [1, 2, 3]);
        store.save_tile(&id, &tile, TileFormat::Png).unwrap();

        let loaded = store.load_tile(&id).unwrap();
        assert_eq!(loaded.as_bytes(), tile.as_bytes());
    }

    #[test]
    fn test_load_untiled_media() {
        let (store, _dir) = store();
        let err = store.load_tile(&TileId::new("m", 0, 0, 0)).unwrap_err();
        assert!(matches!(err, StoreError::MediaNotTiled));

        store.write_metadata("m", &sample_meta(false)).unwrap();
        let err = store.load_tile(&TileId::new("m", 0, 0, 0)).unwrap_err();
        assert!(matches!(err, StoreError::MediaNotTiled));
    }

    #[test]
    fn test_is_tiled() {
        let (store, _dir) = store();
        assert!(!store.is_tiled("m"));

        store.write_metadata("m", &sample_meta(false)).unwrap();
        assert!(!store.is_tiled("m"));

        store.write_metadata("m", &sample_meta(true)).unwrap();
        assert!(store.is_tiled("m"));
    }

    #[test]
    fn test_metadata_round_trip_through_disk() {
        let (store, dir) = store();
        let mut meta = sample_meta(true);
        meta.extra.push(("origin".to_string(), MetaValue::Str("scan".to_string())));
        store.write_metadata("m", &meta).unwrap();

        // Bypass the in-memory cache with a fresh store over the same root.
        let fresh = TileStore::new(dir.path()).unwrap();
        let read = fresh.read_metadata("m").unwrap();
        assert_eq!(read, meta);
    }

    #[test]
    fn test_metadata_rename_leaves_no_temp_file() {
        let (store, _dir) = store();
        store.write_metadata("m", &sample_meta(true)).unwrap();
        assert!(store.media_path("m").join("metadata").exists());
        assert!(!store.media_path("m").join("metadata.tmp").exists());
    }

    #[test]
    fn test_update_metadata_changes_one_key() {
        let (store, _dir) = store();
        store.write_metadata("m", &sample_meta(false)).unwrap();

        let updated = store
            .update_metadata("m", |meta| meta.tiled = true)
            .unwrap();
        assert!(updated.tiled);
        assert!(store.is_tiled("m"));
        // Everything else survives untouched.
        assert_eq!(store.read_metadata("m").unwrap().width, 512);
    }

    #[test]
    fn test_update_metadata_preserves_unknown_keys() {
        let (store, dir) = store();
        let mut meta = sample_meta(true);
        meta.extra
            .push(("source_dpi".to_string(), MetaValue::Int(300)));
        store.write_metadata("m", &meta).unwrap();

        store
            .update_metadata("m", |meta| meta.max_level = 4)
            .unwrap();

        let fresh = TileStore::new(dir.path()).unwrap();
        let read = fresh.read_metadata("m").unwrap();
        assert_eq!(read.max_level, 4);
        assert_eq!(read.get("source_dpi"), Some(MetaValue::Int(300)));
    }

    #[test]
    fn test_update_metadata_missing_media() {
        let (store, _dir) = store();
        let err = store.update_metadata("m", |_| {}).unwrap_err();
        assert!(matches!(err, StoreError::MediaNotTiled));
    }

    #[test]
    fn test_delete_media() {
        let (store, _dir) = store();
        store.write_metadata("m", &sample_meta(true)).unwrap();
        let id = TileId::new("m", 0, 0, 0);
        store
            .save_tile(&id, &Tile::solid(8, [0, 0, 0]), TileFormat::Png)
            .unwrap();

        store.delete_media("m").unwrap();
        assert!(!store.media_path("m").exists());
        assert!(!store.is_tiled("m"));
    }

    #[test]
    fn test_delete_missing_media_is_ok() {
        let (store, _dir) = store();
        store.delete_media("never-seen").unwrap();
    }

    #[test]
    fn test_stats() {
        let (store, _dir) = store();
        assert_eq!(store.stats().unwrap(), StoreStats::default());

        store.write_metadata("a", &sample_meta(true)).unwrap();
        store.write_metadata("b", &sample_meta(true)).unwrap();
        store
            .save_tile(&TileId::new("a", 0, 0, 0), &Tile::solid(8, [5, 5, 5]), TileFormat::Png)
            .unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.media_count, 2);
        assert_eq!(stats.file_count, 3);
        assert!(stats.total_bytes > 0);
    }

    #[test]
    fn test_tile_path_layout() {
        let (store, _dir) = store();
        let path = store.tile_path(&TileId::new("m", 1, 0, 1), TileFormat::Jpeg);
        assert!(path.ends_with("01/01_000000_000001.jpg"));
        assert!(path.starts_with(store.media_path("m")));
    }

    #[test]
    fn test_corrupt_metadata_reports_parse_error() {
        let (store, _dir) = store();
        let dir = store.media_path("m");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("metadata"), "width\tx\tint\n").unwrap();

        let err = store.read_metadata("m").unwrap_err();
        assert!(matches!(err, StoreError::Metadata(_)));
    }
}
