//! Zoomtile CLI - command-line interface to the tile pyramid engine.
//!
//! The CLI is organized into:
//! - `Cli` / `Commands`: argument parsing (clap)
//! - `CliRunner`: common setup (logging, configuration, store access)
//! - `CliError`: centralized error handling with exit codes
//!
//! The hidden `convert-worker` subcommand is the entry point for the
//! engine's conversion worker processes; it must stay routed to
//! `zoomtile::convert::worker` for conversions to function.

mod error;
mod runner;

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use error::CliError;
use runner::{CliRunner, GlobalOpts};
use zoomtile::convert::worker;
use zoomtile::tile::TileFormat;

#[derive(Debug, Clone, ValueEnum)]
enum TileExt {
    /// JPEG tiles (default for photographic sources)
    Jpg,
    /// PNG tiles (default for generated content)
    Png,
}

impl From<TileExt> for TileFormat {
    fn from(ext: TileExt) -> Self {
        match ext {
            TileExt::Jpg => TileFormat::Jpeg,
            TileExt::Png => TileFormat::Png,
        }
    }
}

#[derive(Parser)]
#[command(name = "zoomtile", version = zoomtile::VERSION, about = "Tile pyramid engine")]
struct Cli {
    /// Disable automatic tile store cleanup at shutdown
    #[arg(long, global = true)]
    no_cleanup: bool,

    /// Maximum age in days for tile store cleanup
    #[arg(long, value_name = "N", global = true)]
    cleanup_age: Option<u32>,

    /// Skip cleanup statistics collection for a faster shutdown
    #[arg(long, global = true)]
    fast_cleanup: bool,

    /// Override the tile store root directory
    #[arg(long, value_name = "PATH", global = true)]
    store_root: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert a source file and build its tile pyramid
    Tile {
        /// Source image or PDF
        input: PathBuf,

        /// Media id to tile under (defaults to the input path)
        #[arg(long)]
        media_id: Option<String>,

        /// Tile edge length in pixels
        #[arg(long, default_value_t = 256)]
        tilesize: u32,

        /// Tile file format
        #[arg(long, value_enum, default_value = "jpg")]
        ext: TileExt,

        /// Rotate the source clockwise (0, 90, 180, or 270 degrees)
        #[arg(long, default_value_t = 0)]
        rotation: u16,

        /// Invert source colors
        #[arg(long)]
        invert: bool,

        /// Convert the source to grayscale
        #[arg(long)]
        mono: bool,

        /// Rasterization resolution for PDF sources
        #[arg(long, default_value_t = 150)]
        dpi: u32,
    },

    /// Reclaim old media from the tile store
    Cleanup {
        /// Maximum age in days for this pass (overrides --cleanup-age)
        #[arg(long, value_name = "N")]
        age: Option<u32>,

        /// Report what would be deleted without deleting anything
        #[arg(long)]
        dry_run: bool,

        /// Skip before/after statistics collection
        #[arg(long)]
        no_stats: bool,
    },

    /// Print tile store statistics
    Stats,

    /// Conversion worker process entry (spawned by the engine)
    #[command(hide = true)]
    ConvertWorker {
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
}

fn main() {
    let cli = Cli::parse();

    let opts = GlobalOpts {
        no_cleanup: cli.no_cleanup,
        cleanup_age: cli.cleanup_age,
        fast_cleanup: cli.fast_cleanup,
        store_root: cli.store_root.clone(),
    };

    let result = match cli.command {
        // Worker processes skip logging setup; stderr is their failure
        // channel.
        Commands::ConvertWorker { args } => std::process::exit(worker::run_cli(args)),
        command => {
            let runner = match CliRunner::new(&opts) {
                Ok(runner) => runner,
                Err(e) => e.exit(),
            };
            match command {
                Commands::Tile {
                    input,
                    media_id,
                    tilesize,
                    ext,
                    rotation,
                    invert,
                    mono,
                    dpi,
                } => runner.run_tile(
                    &input,
                    media_id,
                    tilesize,
                    ext.into(),
                    rotation,
                    invert,
                    mono,
                    dpi,
                ),
                Commands::Cleanup {
                    age,
                    dry_run,
                    no_stats,
                } => runner.run_cleanup(age, dry_run, no_stats),
                Commands::Stats => runner.run_stats(),
                Commands::ConvertWorker { .. } => unreachable!("handled above"),
            }
        }
    };

    if let Err(e) = result {
        e.exit();
    }
}
