//! Age-based disk reclamation.
//!
//! Media directories whose newest file access is older than the configured
//! age are deleted wholesale. The pass holds the store's exclusive disk
//! lock, so it never races tile writes; by default the engine runs it at
//! shutdown so startup stays fast.

use std::fs;
use std::path::Path;
use std::time::{Duration, SystemTime};

use tracing::{debug, info, warn};

use super::{StoreStats, TileStore};

/// Outcome of one cleanup pass.
#[derive(Debug, Clone, Default)]
pub struct CleanupReport {
    /// Media directories deleted (or that would be, in a dry run).
    pub deleted_media_count: usize,
    /// Bytes freed by the deletions.
    pub freed_bytes: u64,
    /// Media directories young enough to keep.
    pub kept_media_count: usize,
    /// Errors encountered; the pass continues past individual failures.
    pub errors: Vec<String>,
    /// Store statistics before the pass, when requested.
    pub before: Option<StoreStats>,
    /// Store statistics after the pass, when requested.
    pub after: Option<StoreStats>,
}

impl CleanupReport {
    /// True when any media directory failed to be examined or removed.
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

/// Delete media directories untouched for more than `max_age_days`.
///
/// A directory's age is the newest `atime`/`mtime` across its files. With
/// `dry_run` the report is produced without deleting anything. With
/// `collect_stats` the report carries before/after store statistics.
pub fn cleanup_old_tiles(
    store: &TileStore,
    max_age_days: u32,
    dry_run: bool,
    collect_stats: bool,
) -> CleanupReport {
    let mut report = CleanupReport::default();

    if collect_stats {
        match store.stats() {
            Ok(stats) => report.before = Some(stats),
            Err(e) => report.errors.push(format!("stats before cleanup: {}", e)),
        }
    }

    info!(
        root = %store.root().display(),
        max_age_days,
        dry_run,
        "starting tile store cleanup"
    );

    let cutoff = SystemTime::now() - Duration::from_secs(u64::from(max_age_days) * 24 * 60 * 60);

    {
        let _guard = store.lock_exclusive();

        let entries = match fs::read_dir(store.root()) {
            Ok(entries) => entries,
            Err(e) => {
                report.errors.push(format!("reading store root: {}", e));
                return report;
            }
        };

        for entry in entries {
            let path = match entry {
                Ok(entry) => entry.path(),
                Err(e) => {
                    report.errors.push(format!("reading store root entry: {}", e));
                    continue;
                }
            };
            if !path.is_dir() {
                continue;
            }
            let hash = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();

            match newest_access(&path) {
                Ok(Some(newest)) if newest < cutoff => {
                    let size = directory_size(&path);
                    if dry_run {
                        info!(media = %hash, bytes = size, "cleanup would delete media");
                    } else if let Err(e) = fs::remove_dir_all(&path) {
                        report.errors.push(format!("removing {}: {}", hash, e));
                        continue;
                    } else {
                        info!(media = %hash, bytes = size, "cleanup deleted old media");
                        store.forget_media_hash(&hash);
                    }
                    report.deleted_media_count += 1;
                    report.freed_bytes += size;
                }
                Ok(_) => {
                    debug!(media = %hash, "cleanup keeping media");
                    report.kept_media_count += 1;
                }
                Err(e) => {
                    report.errors.push(format!("examining {}: {}", hash, e));
                }
            }
        }
    }

    if collect_stats {
        match store.stats() {
            Ok(stats) => report.after = Some(stats),
            Err(e) => report.errors.push(format!("stats after cleanup: {}", e)),
        }
    }

    info!(
        deleted = report.deleted_media_count,
        kept = report.kept_media_count,
        freed_bytes = report.freed_bytes,
        errors = report.errors.len(),
        "tile store cleanup complete"
    );
    if report.has_errors() {
        warn!(count = report.errors.len(), "cleanup finished with errors");
    }

    report
}

/// Newest access or modification time of any file under `dir`.
///
/// `None` when the directory holds no files.
fn newest_access(dir: &Path) -> std::io::Result<Option<SystemTime>> {
    let mut newest = None;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            if let Some(t) = newest_access(&path)? {
                newest = Some(newest.map_or(t, |n: SystemTime| n.max(t)));
            }
        } else if let Ok(meta) = entry.metadata() {
            let modified = meta.modified().ok();
            let accessed = meta.accessed().ok();
            let t = match (modified, accessed) {
                (Some(m), Some(a)) => Some(m.max(a)),
                (m, a) => m.or(a),
            };
            if let Some(t) = t {
                newest = Some(newest.map_or(t, |n: SystemTime| n.max(t)));
            }
        }
    }
    Ok(newest)
}

fn directory_size(dir: &Path) -> u64 {
    let mut total = 0;
    if let Ok(entries) = fs::read_dir(dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                total += directory_size(&path);
            } else if let Ok(meta) = entry.metadata() {
                total += meta.len();
            }
        }
    }
    total
}
