//! Engine configuration.

use std::path::PathBuf;
use std::time::Duration;

use crate::convert::default_conversion_workers;

/// Default total memory budget for both tile caches.
pub const DEFAULT_CACHE_TOTAL_BYTES: usize = 256 * 1024 * 1024;

/// Default share of the budget given to the permanent cache.
pub const DEFAULT_PERMANENT_FRACTION: f64 = 0.8;

/// Default age threshold for disk cleanup.
pub const DEFAULT_CLEANUP_AGE_DAYS: u32 = 3;

/// Default access budget for synthesized tiles in the scratch cache.
pub const DEFAULT_SCRATCH_MAX_ACCESSES: u32 = 8;

/// Tunables for the tile engine.
///
/// The two caches split `cache_total_bytes`: provider-loaded tiles go to
/// the permanent cache (`permanent_fraction` of the budget) and synthesized
/// tiles to the scratch cache (the remainder), so synthetic content never
/// displaces real tiles.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Tile store root; platform default when `None`.
    pub store_root: Option<PathBuf>,
    /// Memory budget for both caches together, in bytes.
    pub cache_total_bytes: usize,
    /// Fraction of the budget for the permanent cache, `0.05..=0.95`.
    pub permanent_fraction: f64,
    /// Expire cache entries unread for this long.
    pub cache_max_age: Option<Duration>,
    /// Drop a synthesized tile after this many reads.
    pub scratch_max_accesses: Option<u32>,
    /// Master switch for disk cleanup.
    pub auto_cleanup: bool,
    /// Media untouched for this many days are reclaimed.
    pub cleanup_age_days: u32,
    /// Run cleanup during shutdown (keeps startup fast).
    pub cleanup_on_shutdown: bool,
    /// Collect before/after store statistics during cleanup.
    pub collect_cleanup_stats: bool,
    /// Conversion worker process slots.
    pub conversion_workers: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            store_root: None,
            cache_total_bytes: DEFAULT_CACHE_TOTAL_BYTES,
            permanent_fraction: DEFAULT_PERMANENT_FRACTION,
            cache_max_age: None,
            scratch_max_accesses: Some(DEFAULT_SCRATCH_MAX_ACCESSES),
            auto_cleanup: true,
            cleanup_age_days: DEFAULT_CLEANUP_AGE_DAYS,
            cleanup_on_shutdown: true,
            collect_cleanup_stats: false,
            conversion_workers: default_conversion_workers(),
        }
    }
}

impl EngineConfig {
    /// Override the store root.
    pub fn with_store_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.store_root = Some(root.into());
        self
    }

    /// Override the total cache budget in bytes.
    pub fn with_cache_total_bytes(mut self, bytes: usize) -> Self {
        self.cache_total_bytes = bytes;
        self
    }

    /// Override the permanent cache fraction.
    pub fn with_permanent_fraction(mut self, fraction: f64) -> Self {
        self.permanent_fraction = fraction;
        self
    }

    /// Enable or disable automatic cleanup.
    pub fn with_auto_cleanup(mut self, enabled: bool) -> Self {
        self.auto_cleanup = enabled;
        self
    }

    /// Override the cleanup age threshold in days.
    pub fn with_cleanup_age_days(mut self, days: u32) -> Self {
        self.cleanup_age_days = days;
        self
    }

    /// Enable or disable cleanup statistics collection.
    pub fn with_collect_cleanup_stats(mut self, enabled: bool) -> Self {
        self.collect_cleanup_stats = enabled;
        self
    }

    /// Override the conversion worker count.
    pub fn with_conversion_workers(mut self, workers: usize) -> Self {
        self.conversion_workers = workers.max(1);
        self
    }

    /// The permanent fraction clamped to its valid range.
    pub fn clamped_permanent_fraction(&self) -> f64 {
        if !(0.05..=0.95).contains(&self.permanent_fraction) {
            let clamped = self.permanent_fraction.clamp(0.05, 0.95);
            tracing::warn!(
                requested = self.permanent_fraction,
                clamped,
                "permanent_fraction outside 0.05..=0.95, clamping"
            );
            clamped
        } else {
            self.permanent_fraction
        }
    }
}
