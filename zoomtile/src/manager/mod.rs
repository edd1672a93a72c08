//! The coordinating facade over caches, providers, store, and conversion.
//!
//! A [`TileManager`] routes tile requests to the right provider, owns the
//! two in-memory caches, and synthesizes stand-in tiles from cached
//! ancestors when the exact tile is not loaded yet.
//!
//! # Dual caches
//!
//! Provider-loaded tiles land in the *permanent* cache; tiles produced by
//! [`cut_tile`](TileManager::cut_tile) go to the *scratch* cache. Synthetic
//! tiles can always be recomputed from their ancestor, so they must never
//! displace real tiles.
//!
//! # Routing
//!
//! The media id prefix selects the provider: a registered `dynamic:<key>`
//! id goes to that generator's worker, everything else to the static
//! provider backed by the on-disk store. Exactly one provider sees each
//! request.

mod error;
mod tiling;

pub use error::ManagerError;
pub use tiling::{ConvertOptions, TilingJob, TilingState};

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::cache::{Lookup, TileCache};
use crate::config::EngineConfig;
use crate::convert::{ConversionRunner, WorkerCommand};
use crate::provider::{
    DynamicLoad, Provider, StaticLoad, TileGenerator, DEFAULT_DYNAMIC_MAX_LEVEL,
};
use crate::store::{
    cleanup_old_tiles, default_store_root, CleanupReport, MetaValue, TileStore,
};
use crate::tile::{Tile, TileId, DYNAMIC_PREFIX};
use crate::tiler::DEFAULT_TILESIZE;

/// How long shutdown waits for each provider to drain.
const PROVIDER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Mid-gray, drawn while nothing better is cached.
const PLACEHOLDER_COLOR: [u8; 3] = [128, 128, 128];

/// Rough in-memory footprint of one cached tile, used to turn the byte
/// budget into entry counts.
const ESTIMATED_TILE_BYTES: usize = (DEFAULT_TILESIZE * DEFAULT_TILESIZE * 3) as usize;

/// Provenance bound on the synthesis side map.
const PROVENANCE_PRUNE_THRESHOLD: usize = 4096;

/// Where a fetched tile came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provenance {
    /// The exact tile, straight from the cache.
    Loaded,
    /// Cropped and rescaled from a cached ancestor at `from_level`.
    Synthesized { from_level: i32 },
    /// Nothing usable was cached; a solid stand-in while loads are queued.
    Placeholder,
}

/// A tile plus where it came from.
#[derive(Debug, Clone)]
pub struct Fetched {
    pub tile: Tile,
    pub provenance: Provenance,
}

struct DynamicEntry {
    provider: Provider,
    generator: Arc<dyn TileGenerator>,
}

/// All provider workers, shared with background tiling jobs.
pub(crate) struct ProviderSet {
    static_provider: Provider,
    dynamic: HashMap<String, DynamicEntry>,
}

impl ProviderSet {
    fn route(&self, media_id: &str) -> &Provider {
        match self.dynamic.get(media_id) {
            Some(entry) => &entry.provider,
            None => &self.static_provider,
        }
    }

    pub(crate) fn pause_all(&self) {
        self.static_provider.pause();
        for entry in self.dynamic.values() {
            entry.provider.pause();
        }
        debug!("all tile providers paused");
    }

    pub(crate) fn resume_all(&self) {
        self.static_provider.resume();
        for entry in self.dynamic.values() {
            entry.provider.resume();
        }
        debug!("all tile providers resumed");
    }

    fn purge_all(&self, media_id: Option<&str>) {
        self.static_provider.purge(media_id);
        for entry in self.dynamic.values() {
            entry.provider.purge(media_id);
        }
    }

    fn shutdown_all(&self, timeout: Duration) {
        self.static_provider.shutdown(timeout);
        for entry in self.dynamic.values() {
            entry.provider.shutdown(timeout);
        }
    }

    fn wait_idle_all(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let remaining = |deadline: Instant| deadline.saturating_duration_since(Instant::now());
        if !self.static_provider.wait_idle(remaining(deadline)) {
            return false;
        }
        for entry in self.dynamic.values() {
            if !entry.provider.wait_idle(remaining(deadline)) {
                return false;
            }
        }
        true
    }
}

/// The tile engine's public face.
///
/// Create one instance at startup and share it; all methods take `&self`
/// and are safe to call from any thread.
pub struct TileManager {
    config: EngineConfig,
    store: Arc<TileStore>,
    permanent: Arc<TileCache>,
    scratch: Arc<TileCache>,
    providers: Arc<ProviderSet>,
    runner: Arc<ConversionRunner>,
    /// Remembers which ancestor each scratch tile was cut from.
    cut_provenance: Mutex<HashMap<TileId, i32>>,
    shut_down: AtomicBool,
}

impl TileManager {
    /// Build the engine: caches, one static provider, one provider per
    /// registered generator, and the conversion pool.
    ///
    /// Conversion workers re-invoke the current executable; embedders whose
    /// binary does not route the `convert-worker` subcommand should use
    /// [`TileManager::with_worker_command`].
    pub fn new(
        config: EngineConfig,
        generators: Vec<Arc<dyn TileGenerator>>,
    ) -> Result<Self, ManagerError> {
        let command = WorkerCommand::current_exe()?;
        Self::with_worker_command(config, generators, command)
    }

    /// [`TileManager::new`] with an explicit conversion worker command.
    pub fn with_worker_command(
        config: EngineConfig,
        generators: Vec<Arc<dyn TileGenerator>>,
        worker_command: WorkerCommand,
    ) -> Result<Self, ManagerError> {
        let root = config
            .store_root
            .clone()
            .unwrap_or_else(default_store_root);
        let store = Arc::new(TileStore::new(root)?);

        let fraction = config.clamped_permanent_fraction();
        let total_entries = (config.cache_total_bytes / ESTIMATED_TILE_BYTES).max(2);
        let permanent_entries = ((total_entries as f64 * fraction) as usize).max(1);
        let scratch_entries = total_entries.saturating_sub(permanent_entries).max(1);

        let permanent = Arc::new(TileCache::new(permanent_entries, config.cache_max_age, None));
        let scratch = Arc::new(TileCache::new(
            scratch_entries,
            config.cache_max_age,
            config.scratch_max_accesses,
        ));

        let static_provider = Provider::spawn(
            "static",
            Box::new(StaticLoad::new(Arc::clone(&store))),
            Arc::clone(&permanent),
        );

        let mut dynamic = HashMap::new();
        for generator in generators {
            let load = DynamicLoad::new(Arc::clone(&generator));
            let media_id = load.media_id().to_string();
            let provider = Provider::spawn(
                media_id.clone(),
                Box::new(load),
                Arc::clone(&permanent),
            );
            dynamic.insert(media_id, DynamicEntry { provider, generator });
        }

        let runner = Arc::new(ConversionRunner::new(
            config.conversion_workers,
            worker_command,
        ));

        info!(
            store_root = %store.root().display(),
            permanent_entries,
            scratch_entries,
            generators = dynamic.len(),
            "tile engine initialized"
        );

        Ok(Self {
            config,
            store,
            permanent,
            scratch,
            providers: Arc::new(ProviderSet {
                static_provider,
                dynamic,
            }),
            runner,
            cut_provenance: Mutex::new(HashMap::new()),
            shut_down: AtomicBool::new(false),
        })
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<TileStore> {
        &self.store
    }

    /// Queue a load for `id` with its provider. Non-blocking.
    pub fn request(&self, id: TileId) {
        if self.shut_down.load(Ordering::SeqCst) {
            return;
        }
        self.providers.route(&id.media_id).enqueue(id);
    }

    /// Return the cached tile for `id`, or say why it is not there.
    ///
    /// A miss on tiled media queues the load as a side effect, so a renderer
    /// can simply retry next frame.
    pub fn peek(&self, id: &TileId) -> Result<Tile, ManagerError> {
        if id.level < 0 {
            return Err(ManagerError::NotAvailable);
        }
        match self.permanent.lookup(id) {
            Lookup::Hit(tile) => Ok(tile),
            Lookup::Tombstone => Err(ManagerError::NotAvailable),
            Lookup::Miss => {
                if self.is_tiled(&id.media_id) {
                    self.request(id.clone());
                    Err(ManagerError::NotLoaded)
                } else {
                    Err(ManagerError::NotTiled)
                }
            }
        }
    }

    /// Return the best tile available for `id`, synthesizing if needed.
    ///
    /// Recovers from `NotLoaded` and `NotAvailable` via
    /// [`cut_tile`](TileManager::cut_tile); still surfaces `NotTiled` (the
    /// caller must trigger conversion) and I/O failures. For levels >= 0 on
    /// tiled media this never fails with `NotLoaded` or `NotAvailable`.
    pub fn fetch(&self, id: &TileId) -> Result<Fetched, ManagerError> {
        match self.peek(id) {
            Ok(tile) => Ok(Fetched {
                tile,
                provenance: Provenance::Loaded,
            }),
            Err(ManagerError::NotLoaded) | Err(ManagerError::NotAvailable) => {
                let (tile, provenance) = self.cut_tile(id)?;
                Ok(Fetched { tile, provenance })
            }
            Err(e) => Err(e),
        }
    }

    /// Synthesize a tile from the nearest cached ancestor.
    ///
    /// Walks from the parent up to the overview, queueing each missing
    /// ancestor so later calls resolve from the cache. The result goes to
    /// the scratch cache. When nothing is cached yet, a solid placeholder
    /// comes back with [`Provenance::Placeholder`].
    pub fn cut_tile(&self, id: &TileId) -> Result<(Tile, Provenance), ManagerError> {
        if !self.is_tiled(&id.media_id) {
            return Err(ManagerError::NotTiled);
        }
        let tilesize = self.tilesize_of(&id.media_id)?;

        if id.level < 0 {
            return Ok(self.cut_zoom_out(id, tilesize));
        }

        if id.level == 0 {
            return Ok(match self.permanent.lookup(id) {
                Lookup::Hit(tile) => (tile, Provenance::Loaded),
                Lookup::Tombstone => self.placeholder(tilesize),
                Lookup::Miss => {
                    self.request(id.clone());
                    self.placeholder(tilesize)
                }
            });
        }

        // Served from a previous synthesis?
        if let Lookup::Hit(tile) = self.scratch.lookup(id) {
            let from_level = self
                .cut_provenance
                .lock()
                .unwrap()
                .get(id)
                .copied()
                .unwrap_or(id.level - 1);
            return Ok((tile, Provenance::Synthesized { from_level }));
        }

        for delta in 1..=id.level {
            let ancestor = TileId::new(
                id.media_id.clone(),
                id.level - delta,
                shift_down(id.row, delta),
                shift_down(id.col, delta),
            );
            match self.permanent.lookup(&ancestor) {
                Lookup::Hit(big) => {
                    let tile = cut_from_ancestor(&big, id, delta, tilesize);
                    self.scratch.insert(id.clone(), Some(tile.clone()));
                    self.record_provenance(id.clone(), ancestor.level);
                    debug!(id = %id, from_level = ancestor.level, "synthesized tile from ancestor");
                    return Ok((tile, Provenance::Synthesized {
                        from_level: ancestor.level,
                    }));
                }
                Lookup::Miss => self.request(ancestor),
                Lookup::Tombstone => {}
            }
        }

        // The overview was queued by the walk above.
        Ok(self.placeholder(tilesize))
    }

    /// True for `dynamic:*` and for static media with a completed pyramid.
    pub fn is_tiled(&self, media_id: &str) -> bool {
        media_id.starts_with(DYNAMIC_PREFIX) || self.store.is_tiled(media_id)
    }

    /// Metadata lookup spanning both media kinds.
    ///
    /// Registered dynamic media answer from their generator declarations;
    /// width and height derive from the tile size at the deepest level.
    pub fn get_metadata(&self, media_id: &str, key: &str) -> Option<MetaValue> {
        if let Some(entry) = self.providers.dynamic.get(media_id) {
            let generator = &entry.generator;
            let max_level = generator.max_level().unwrap_or(DEFAULT_DYNAMIC_MAX_LEVEL);
            let side = i64::from(generator.tilesize()) << max_level.clamp(0, 30);
            return match key {
                "tilesize" => Some(MetaValue::Int(i64::from(generator.tilesize()))),
                "file_ext" => Some(MetaValue::Str(generator.file_ext().ext().to_string())),
                "aspect_ratio" => Some(MetaValue::Float(generator.aspect_ratio())),
                "max_level" => Some(MetaValue::Int(i64::from(max_level))),
                "width" | "height" => Some(MetaValue::Int(side)),
                _ => None,
            };
        }
        self.store.read_metadata(media_id).ok()?.get(key)
    }

    /// Drop pending requests and cache entries for `media_id`, or for all
    /// media when `None`.
    pub fn purge(&self, media_id: Option<&str>) {
        self.providers.purge_all(media_id);
        match media_id {
            Some(media) => {
                self.permanent.remove_matching(media);
                self.scratch.remove_matching(media);
                self.cut_provenance
                    .lock()
                    .unwrap()
                    .retain(|id, _| id.media_id != media);
            }
            None => {
                self.permanent.purge();
                self.scratch.purge();
                self.cut_provenance.lock().unwrap().clear();
            }
        }
    }

    /// Suspend all provider workers (while exclusive filesystem work runs).
    pub fn pause_providers(&self) {
        self.providers.pause_all();
    }

    /// Resume all provider workers.
    pub fn resume_providers(&self) {
        self.providers.resume_all();
    }

    /// Block until every provider queue drains, up to `timeout`.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        self.providers.wait_idle_all(timeout)
    }

    /// Stop workers, shut the conversion pool, and run the configured
    /// shutdown cleanup. Idempotent; only the first call acts.
    pub fn shutdown(&self) -> Option<CleanupReport> {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return None;
        }
        info!("shutting down tile engine");
        self.providers.shutdown_all(PROVIDER_DRAIN_TIMEOUT);
        self.runner.shutdown();

        if self.config.auto_cleanup && self.config.cleanup_on_shutdown {
            Some(cleanup_old_tiles(
                &self.store,
                self.config.cleanup_age_days,
                false,
                self.config.collect_cleanup_stats,
            ))
        } else {
            None
        }
    }

    fn cut_zoom_out(&self, id: &TileId, tilesize: u32) -> (Tile, Provenance) {
        if let Lookup::Hit(tile) = self.scratch.lookup(id) {
            return (tile, Provenance::Synthesized { from_level: 0 });
        }
        let overview = id.overview();
        match self.permanent.lookup(&overview) {
            Lookup::Hit(tile) => {
                let shift = (-id.level).clamp(0, 16) as u32;
                let size = (tilesize >> shift).max(1);
                let tile = tile.resize(size, size);
                self.scratch.insert(id.clone(), Some(tile.clone()));
                self.record_provenance(id.clone(), 0);
                (tile, Provenance::Synthesized { from_level: 0 })
            }
            Lookup::Tombstone => self.placeholder(tilesize),
            Lookup::Miss => {
                self.request(overview);
                self.placeholder(tilesize)
            }
        }
    }

    fn placeholder(&self, tilesize: u32) -> (Tile, Provenance) {
        (
            Tile::solid(tilesize, PLACEHOLDER_COLOR),
            Provenance::Placeholder,
        )
    }

    fn tilesize_of(&self, media_id: &str) -> Result<u32, ManagerError> {
        if media_id.starts_with(DYNAMIC_PREFIX) {
            Ok(self
                .providers
                .dynamic
                .get(media_id)
                .map(|entry| entry.generator.tilesize())
                .unwrap_or(DEFAULT_TILESIZE))
        } else {
            Ok(self.store.read_metadata(media_id)?.tilesize)
        }
    }

    fn record_provenance(&self, id: TileId, from_level: i32) {
        let mut map = self.cut_provenance.lock().unwrap();
        if map.len() > PROVENANCE_PRUNE_THRESHOLD {
            let scratch = &self.scratch;
            map.retain(|id, _| scratch.contains(id));
        }
        map.insert(id, from_level);
    }
}

impl Drop for TileManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Floor division of a coordinate by `2^delta`, correct for negatives.
fn shift_down(value: i32, delta: i32) -> i32 {
    let shift = delta.clamp(0, 62) as u32;
    i64::from(value).div_euclid(1i64 << shift) as i32
}

/// Crop the quadrant of `big` covering `id` and scale it back up.
fn cut_from_ancestor(big: &Tile, id: &TileId, delta: i32, tilesize: u32) -> Tile {
    let shift = delta.clamp(1, 62) as u32;
    let side = 1i64 << shift.min(30);
    let qx = i64::from(id.col).rem_euclid(side) as u32;
    let qy = i64::from(id.row).rem_euclid(side) as u32;
    let sub = (tilesize >> shift.min(30)).max(1);
    let x0 = (qx.saturating_mul(sub)).min(tilesize.saturating_sub(sub));
    let y0 = (qy.saturating_mul(sub)).min(tilesize.saturating_sub(sub));
    big.crop((x0, y0, x0 + sub, y0 + sub)).resize(tilesize, tilesize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::FernGenerator;
    use crate::tiler::{ScanlineSource, Tiler, TilerError};
    use crate::tile::TileFormat;
    use tempfile::TempDir;

    const T: u32 = 8;

    struct Gradient {
        width: u32,
        height: u32,
        row: u32,
    }

    impl ScanlineSource for Gradient {
        fn width(&self) -> u32 {
            self.width
        }
        fn height(&self) -> u32 {
            self.height
        }
        fn read_scanline(&mut self, buf: &mut [u8]) -> Result<(), TilerError> {
            for x in 0..self.width as usize {
                buf[x * 3] = (x % 256) as u8;
                buf[x * 3 + 1] = (self.row % 256) as u8;
                buf[x * 3 + 2] = 0;
            }
            self.row += 1;
            Ok(())
        }
    }

    fn manager_with_fern() -> (TileManager, TempDir) {
        let dir = TempDir::new().unwrap();
        let config = EngineConfig::default()
            .with_store_root(dir.path())
            .with_auto_cleanup(false)
            .with_conversion_workers(1);
        let fern: Arc<dyn TileGenerator> = Arc::new(FernGenerator::new().with_tilesize(16));
        let manager = TileManager::new(config, vec![fern]).unwrap();
        (manager, dir)
    }

    /// Tile a 2-level gradient pyramid for `media` into the manager's store.
    fn tile_media(manager: &TileManager, media: &str) {
        let tiler = Tiler::new(Arc::clone(manager.store()), media)
            .with_tilesize(T)
            .with_format(TileFormat::Png);
        tiler
            .run(&mut Gradient {
                width: 2 * T,
                height: 2 * T,
                row: 0,
            })
            .unwrap();
    }

    const WAIT: Duration = Duration::from_secs(5);

    #[test]
    fn test_peek_unknown_media() {
        let (manager, _dir) = manager_with_fern();
        let err = manager.peek(&TileId::new("nope", 0, 0, 0)).unwrap_err();
        assert!(matches!(err, ManagerError::NotTiled));
    }

    #[test]
    fn test_peek_negative_level() {
        let (manager, _dir) = manager_with_fern();
        let err = manager.peek(&TileId::new("m", -1, 0, 0)).unwrap_err();
        assert!(matches!(err, ManagerError::NotAvailable));
    }

    #[test]
    fn test_request_then_peek_loaded() {
        let (manager, _dir) = manager_with_fern();
        tile_media(&manager, "m");

        let id = TileId::new("m", 1, 0, 1);
        assert!(matches!(
            manager.peek(&id),
            Err(ManagerError::NotLoaded)
        ));
        assert!(manager.wait_idle(WAIT));

        let tile = manager.peek(&id).unwrap();
        let from_store = manager.store().load_tile(&id).unwrap();
        assert_eq!(tile.as_bytes(), from_store.as_bytes());
    }

    #[test]
    fn test_fetch_synthesizes_from_overview() {
        let (manager, _dir) = manager_with_fern();
        tile_media(&manager, "m");

        // Warm the overview.
        manager.request(TileId::new("m", 0, 0, 0));
        assert!(manager.wait_idle(WAIT));

        let fetched = manager.fetch(&TileId::new("m", 1, 0, 0)).unwrap();
        assert_eq!(fetched.provenance, Provenance::Synthesized { from_level: 0 });
        assert_eq!(fetched.tile.size(), (T, T));

        // The exact tile was queued as a side effect and resolves soon.
        assert!(manager.wait_idle(WAIT));
        assert!(manager.peek(&TileId::new("m", 1, 0, 0)).is_ok());
    }

    #[test]
    fn test_fetch_placeholder_when_nothing_cached() {
        let (manager, _dir) = manager_with_fern();
        tile_media(&manager, "m");

        let fetched = manager.fetch(&TileId::new("m", 1, 1, 1)).unwrap();
        assert_eq!(fetched.provenance, Provenance::Placeholder);
        assert_eq!(fetched.tile.size(), (T, T));
    }

    #[test]
    fn test_fetch_never_fails_on_tiled_media() {
        let (manager, _dir) = manager_with_fern();
        tile_media(&manager, "m");

        for level in 0..4 {
            for row in 0..3 {
                for col in 0..3 {
                    let id = TileId::new("m", level, row, col);
                    assert!(
                        manager.fetch(&id).is_ok(),
                        "fetch must not fail for {}",
                        id
                    );
                }
            }
        }
    }

    #[test]
    fn test_cut_tile_is_deterministic() {
        let (manager, _dir) = manager_with_fern();
        tile_media(&manager, "m");
        manager.request(TileId::new("m", 0, 0, 0));
        assert!(manager.wait_idle(WAIT));

        let id = TileId::new("m", 1, 0, 1);
        let (a, pa) = manager.cut_tile(&id).unwrap();
        let (b, pb) = manager.cut_tile(&id).unwrap();
        assert_eq!(a.as_bytes(), b.as_bytes());
        assert_eq!(pa, pb);
    }

    #[test]
    fn test_negative_level_downscales_overview() {
        let (manager, _dir) = manager_with_fern();
        tile_media(&manager, "m");
        manager.request(TileId::new("m", 0, 0, 0));
        assert!(manager.wait_idle(WAIT));

        let fetched = manager.fetch(&TileId::new("m", -1, 0, 0)).unwrap();
        assert_eq!(fetched.provenance, Provenance::Synthesized { from_level: 0 });
        assert_eq!(fetched.tile.size(), (T / 2, T / 2));

        let fetched = manager.fetch(&TileId::new("m", -2, 0, 0)).unwrap();
        assert_eq!(fetched.tile.size(), (T / 4, T / 4));
    }

    #[test]
    fn test_dynamic_generator_flow() {
        let (manager, _dir) = manager_with_fern();
        let id = TileId::new("dynamic:fern", 1, 0, 0);

        assert!(manager.is_tiled("dynamic:fern"));
        assert!(matches!(manager.peek(&id), Err(ManagerError::NotLoaded)));
        assert!(manager.wait_idle(WAIT));
        assert!(manager.peek(&id).is_ok());
    }

    #[test]
    fn test_dynamic_out_of_range_tombstones() {
        let (manager, _dir) = manager_with_fern();
        // Row 2^level is the first invalid coordinate at level 1.
        let id = TileId::new("dynamic:fern", 1, 2, 0);

        assert!(matches!(manager.peek(&id), Err(ManagerError::NotLoaded)));
        assert!(manager.wait_idle(WAIT));
        assert!(matches!(
            manager.peek(&id),
            Err(ManagerError::NotAvailable)
        ));
    }

    #[test]
    fn test_purge_clears_requests_and_cache() {
        let (manager, _dir) = manager_with_fern();
        tile_media(&manager, "m");

        let id = TileId::new("m", 1, 0, 0);
        manager.request(id.clone());
        manager.purge(Some("m"));
        assert!(manager.wait_idle(WAIT));

        // Whatever raced through, the cache must not hold the purged media.
        assert!(!self::contains_media(&manager, "m"));
    }

    fn contains_media(manager: &TileManager, media: &str) -> bool {
        // Probe through peek: Loaded or tombstone means an entry survived.
        let id = TileId::new(media, 1, 0, 0);
        !matches!(
            manager.peek(&id),
            Err(ManagerError::NotLoaded) | Err(ManagerError::NotTiled)
        )
    }

    #[test]
    fn test_is_tiled() {
        let (manager, _dir) = manager_with_fern();
        assert!(manager.is_tiled("dynamic:fern"));
        assert!(manager.is_tiled("dynamic:unregistered"));
        assert!(!manager.is_tiled("never-tiled"));

        tile_media(&manager, "m");
        assert!(manager.is_tiled("m"));
    }

    #[test]
    fn test_get_metadata_static() {
        let (manager, _dir) = manager_with_fern();
        tile_media(&manager, "m");

        assert_eq!(
            manager.get_metadata("m", "tilesize"),
            Some(MetaValue::Int(i64::from(T)))
        );
        assert_eq!(
            manager.get_metadata("m", "tiled"),
            Some(MetaValue::Bool(true))
        );
        assert_eq!(manager.get_metadata("m", "unknown-key"), None);
    }

    #[test]
    fn test_get_metadata_dynamic() {
        let (manager, _dir) = manager_with_fern();

        assert_eq!(
            manager.get_metadata("dynamic:fern", "tilesize"),
            Some(MetaValue::Int(16))
        );
        assert_eq!(
            manager.get_metadata("dynamic:fern", "file_ext"),
            Some(MetaValue::Str("png".to_string()))
        );
        assert_eq!(
            manager.get_metadata("dynamic:fern", "max_level"),
            Some(MetaValue::Int(i64::from(DEFAULT_DYNAMIC_MAX_LEVEL)))
        );
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let (manager, _dir) = manager_with_fern();
        assert!(manager.shutdown().is_none()); // auto_cleanup disabled
        assert!(manager.shutdown().is_none());
    }

    #[test]
    fn test_shutdown_runs_cleanup_when_enabled() {
        let dir = TempDir::new().unwrap();
        let config = EngineConfig::default()
            .with_store_root(dir.path())
            .with_cleanup_age_days(3)
            .with_conversion_workers(1);
        let manager = TileManager::new(config, Vec::new()).unwrap();

        let report = manager.shutdown().expect("cleanup should run at shutdown");
        assert_eq!(report.deleted_media_count, 0);
    }

    #[test]
    fn test_shift_down() {
        assert_eq!(shift_down(5, 1), 2);
        assert_eq!(shift_down(4, 2), 1);
        assert_eq!(shift_down(-1, 1), -1);
        assert_eq!(shift_down(-4, 2), -1);
        assert_eq!(shift_down(7, 40), 0);
    }

    #[test]
    fn test_cut_from_ancestor_quadrants() {
        let size = 8u32;
        let mut big = image::RgbImage::new(size, size);
        for y in 0..size {
            for x in 0..size {
                let v = if x < size / 2 { 10 } else { 200 };
                big.put_pixel(x, y, image::Rgb([v, v, v]));
            }
        }
        let big = Tile::from_image(big);

        let left = cut_from_ancestor(&big, &TileId::new("m", 1, 0, 0), 1, size);
        let right = cut_from_ancestor(&big, &TileId::new("m", 1, 0, 1), 1, size);

        assert_eq!(left.size(), (size, size));
        assert_eq!(left.as_bytes()[0], 10);
        assert_eq!(right.as_bytes()[0], 200);
    }
}
