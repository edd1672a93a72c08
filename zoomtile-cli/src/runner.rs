//! Common setup and command execution for the CLI.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use zoomtile::config::EngineConfig;
use zoomtile::logging::{default_log_dir, init_logging, LogGuard};
use zoomtile::manager::{ConvertOptions, TileManager, TilingState};
use zoomtile::provider::FernGenerator;
use zoomtile::store::{cleanup_old_tiles, CleanupReport, TileStore};
use zoomtile::tile::TileFormat;

use crate::error::CliError;

/// Global flags shared by every subcommand.
pub struct GlobalOpts {
    pub no_cleanup: bool,
    pub cleanup_age: Option<u32>,
    pub fast_cleanup: bool,
    pub store_root: Option<PathBuf>,
}

/// Holds the logging guard and derived configuration for one invocation.
pub struct CliRunner {
    _logging: LogGuard,
    config: EngineConfig,
}

impl CliRunner {
    /// Initialize logging and build the engine configuration.
    pub fn new(opts: &GlobalOpts) -> Result<Self, CliError> {
        let logging = init_logging(default_log_dir())
            .map_err(|e| CliError::LoggingInit(e.to_string()))?;

        let mut config = EngineConfig::default();
        if let Some(root) = &opts.store_root {
            config = config.with_store_root(root.clone());
        }
        if opts.no_cleanup {
            config = config.with_auto_cleanup(false);
        }
        if let Some(age) = opts.cleanup_age {
            config = config.with_cleanup_age_days(age);
        }
        config = config.with_collect_cleanup_stats(!opts.fast_cleanup);

        Ok(Self {
            _logging: logging,
            config,
        })
    }

    fn open_store(&self) -> Result<TileStore, CliError> {
        match &self.config.store_root {
            Some(root) => Ok(TileStore::new(root.clone())?),
            None => Ok(TileStore::open_default()?),
        }
    }

    /// Convert `input` and build its pyramid; blocks until done.
    #[allow(clippy::too_many_arguments)]
    pub fn run_tile(
        &self,
        input: &Path,
        media_id: Option<String>,
        tilesize: u32,
        format: TileFormat,
        rotation: u16,
        invert: bool,
        mono: bool,
        dpi: u32,
    ) -> Result<(), CliError> {
        let media_id = media_id.unwrap_or_else(|| input.display().to_string());

        let manager = TileManager::new(self.config.clone(), vec![Arc::new(FernGenerator::new())])?;
        let job = manager.convert_and_tile(
            &media_id,
            input,
            ConvertOptions {
                rotation,
                invert,
                mono,
                dpi,
                tilesize,
                format,
            },
        );

        let mut last_percent = 0;
        let state = loop {
            let state = job.wait(Some(Duration::from_millis(200)));
            if state.is_terminal() {
                break state;
            }
            let percent = (job.progress() * 100.0) as u32;
            if percent > last_percent {
                last_percent = percent;
                println!("{:3}% tiled", percent);
            }
        };

        let result = match state {
            TilingState::Done => {
                println!("tiled {} into {}", media_id, manager.store().root().display());
                Ok(())
            }
            TilingState::Failed(message) => Err(CliError::Tiling(message)),
            TilingState::Cancelled => Err(CliError::Tiling("cancelled".to_string())),
            other => Err(CliError::Tiling(format!("unexpected state {:?}", other))),
        };

        // Shutdown runs the configured cleanup pass.
        if let Some(report) = manager.shutdown() {
            print_cleanup(&report);
            if report.has_errors() {
                return Err(CliError::CleanupErrors(report.errors.len()));
            }
        }
        result
    }

    /// Run a manual cleanup pass.
    ///
    /// `age` overrides the configured threshold for this pass only;
    /// `no_stats` skips the before/after statistics walk.
    pub fn run_cleanup(&self, age: Option<u32>, dry_run: bool, no_stats: bool) -> Result<(), CliError> {
        let store = self.open_store()?;
        let age = age.unwrap_or(self.config.cleanup_age_days);
        let collect_stats = self.config.collect_cleanup_stats && !no_stats;
        let report = cleanup_old_tiles(&store, age, dry_run, collect_stats);
        print_cleanup(&report);
        if report.has_errors() {
            return Err(CliError::CleanupErrors(report.errors.len()));
        }
        Ok(())
    }

    /// Print store statistics.
    pub fn run_stats(&self) -> Result<(), CliError> {
        let store = self.open_store()?;
        let stats = store.stats()?;
        println!("store root:  {}", store.root().display());
        println!("media:       {}", stats.media_count);
        println!("files:       {}", stats.file_count);
        println!("total bytes: {}", stats.total_bytes);
        Ok(())
    }
}

fn print_cleanup(report: &CleanupReport) {
    println!(
        "cleanup: deleted {} media ({} bytes freed), kept {}",
        report.deleted_media_count, report.freed_bytes, report.kept_media_count
    );
    if let (Some(before), Some(after)) = (&report.before, &report.after) {
        println!(
            "store: {} -> {} files, {} -> {} bytes",
            before.file_count, after.file_count, before.total_bytes, after.total_bytes
        );
    }
    for error in &report.errors {
        eprintln!("cleanup error: {}", error);
    }
}
