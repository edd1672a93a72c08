//! End-to-end tests over the whole engine: conversion, tiling, providers,
//! caching, and synthesis working together.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use zoomtile::config::EngineConfig;
use zoomtile::convert::WorkerCommand;
use zoomtile::manager::{ConvertOptions, ManagerError, Provenance, TileManager, TilingState};
use zoomtile::tile::{TileFormat, TileId};
use zoomtile::tiler::PpmWriter;

const WAIT: Duration = Duration::from_secs(10);

/// Conversion worker stand-in: the test inputs are already PPM, so the
/// "conversion" is a copy. Positional args are `image <input> <output> ...`.
#[cfg(unix)]
fn copying_worker() -> WorkerCommand {
    WorkerCommand::new(
        "sh",
        vec!["-c".into(), r#"cp "$2" "$3""#.into(), "sh".into()],
    )
}

fn write_gradient_ppm(path: &Path, width: u32, height: u32) {
    let mut writer = PpmWriter::create(path, width, height).unwrap();
    let mut row = vec![0u8; width as usize * 3];
    for y in 0..height {
        for x in 0..width as usize {
            row[x * 3] = (x % 256) as u8;
            row[x * 3 + 1] = (y % 256) as u8;
            row[x * 3 + 2] = 99;
        }
        writer.write_row(&row).unwrap();
    }
    writer.finish().unwrap();
}

#[cfg(unix)]
fn engine(dir: &TempDir) -> TileManager {
    let config = EngineConfig::default()
        .with_store_root(dir.path().join("store"))
        .with_auto_cleanup(false)
        .with_conversion_workers(1);
    TileManager::with_worker_command(config, Vec::new(), copying_worker()).unwrap()
}

#[cfg(unix)]
#[test]
fn convert_and_tile_produces_a_usable_pyramid() {
    let dir = TempDir::new().unwrap();
    let source = dir.path().join("source.ppm");
    write_gradient_ppm(&source, 32, 32);

    let manager = engine(&dir);
    let job = manager.convert_and_tile(
        "scene/mural",
        &source,
        ConvertOptions {
            tilesize: 8,
            format: TileFormat::Png,
            ..ConvertOptions::default()
        },
    );

    assert_eq!(job.wait(Some(WAIT)), TilingState::Done);
    assert!((job.progress() - 1.0).abs() < f32::EPSILON);
    assert!(manager.is_tiled("scene/mural"));

    // 32x32 at tilesize 8: levels 0..=2.
    let meta = manager.store().read_metadata("scene/mural").unwrap();
    assert_eq!(meta.width, 32);
    assert_eq!(meta.height, 32);
    assert_eq!(meta.max_level, 2);
    assert!(meta.tiled);

    // Every tile of every level loads and decodes.
    for (level, side) in [(0, 1), (1, 2), (2, 4)] {
        for row in 0..side {
            for col in 0..side {
                let id = TileId::new("scene/mural", level, row, col);
                manager.request(id.clone());
            }
        }
    }
    assert!(manager.wait_idle(WAIT));
    for (level, side) in [(0, 1), (1, 2), (2, 4)] {
        for row in 0..side {
            for col in 0..side {
                let id = TileId::new("scene/mural", level, row, col);
                let tile = manager.peek(&id).unwrap();
                assert_eq!(tile.size(), (8, 8));
            }
        }
    }
}

#[cfg(unix)]
#[test]
fn already_tiled_media_completes_without_work() {
    let dir = TempDir::new().unwrap();
    let source = dir.path().join("source.ppm");
    write_gradient_ppm(&source, 16, 16);

    let manager = engine(&dir);
    let options = ConvertOptions {
        tilesize: 8,
        format: TileFormat::Png,
        ..ConvertOptions::default()
    };
    assert_eq!(
        manager
            .convert_and_tile("m", &source, options.clone())
            .wait(Some(WAIT)),
        TilingState::Done
    );

    // Second run short-circuits.
    let job = manager.convert_and_tile("m", &source, options);
    assert_eq!(job.state(), TilingState::Done);
}

#[cfg(unix)]
#[test]
fn conversion_failure_reaches_the_job() {
    let dir = TempDir::new().unwrap();
    let config = EngineConfig::default()
        .with_store_root(dir.path().join("store"))
        .with_auto_cleanup(false)
        .with_conversion_workers(1);
    let failing = WorkerCommand::new(
        "sh",
        vec!["-c".into(), "echo decoder exploded >&2; exit 9".into(), "sh".into()],
    );
    let manager = TileManager::with_worker_command(config, Vec::new(), failing).unwrap();

    let source = dir.path().join("source.ppm");
    write_gradient_ppm(&source, 16, 16);

    let job = manager.convert_and_tile("m", &source, ConvertOptions::default());
    match job.wait(Some(WAIT)) {
        TilingState::Failed(message) => assert!(message.contains("decoder exploded")),
        other => panic!("expected failure, got {:?}", other),
    }
    assert!(!manager.is_tiled("m"));
}

#[cfg(unix)]
#[test]
fn fetch_before_load_synthesizes_then_resolves() {
    let dir = TempDir::new().unwrap();
    let source = dir.path().join("source.ppm");
    write_gradient_ppm(&source, 32, 32);

    let manager = engine(&dir);
    let job = manager.convert_and_tile(
        "m",
        &source,
        ConvertOptions {
            tilesize: 8,
            format: TileFormat::Png,
            ..ConvertOptions::default()
        },
    );
    assert_eq!(job.wait(Some(WAIT)), TilingState::Done);

    // Warm the overview so synthesis has an ancestor.
    manager.request(TileId::new("m", 0, 0, 0));
    assert!(manager.wait_idle(WAIT));

    let id = TileId::new("m", 2, 0, 0);
    manager.request(id.clone());
    let fetched = manager.fetch(&id).unwrap();
    assert!(matches!(
        fetched.provenance,
        Provenance::Synthesized { .. } | Provenance::Loaded
    ));

    assert!(manager.wait_idle(WAIT));
    let tile = manager.peek(&id).unwrap();
    let direct = manager.store().load_tile(&id).unwrap();
    assert_eq!(tile.as_bytes(), direct.as_bytes());
}

#[cfg(unix)]
#[test]
fn concurrent_fetches_converge_to_one_cached_value() {
    let dir = TempDir::new().unwrap();
    let source = dir.path().join("source.ppm");
    write_gradient_ppm(&source, 32, 32);

    let manager = Arc::new(engine(&dir));
    let job = manager.convert_and_tile(
        "m",
        &source,
        ConvertOptions {
            tilesize: 8,
            format: TileFormat::Png,
            ..ConvertOptions::default()
        },
    );
    assert_eq!(job.wait(Some(WAIT)), TilingState::Done);

    let id = TileId::new("m", 1, 0, 0);
    let mut threads = Vec::new();
    for _ in 0..10 {
        let manager = Arc::clone(&manager);
        let id = id.clone();
        threads.push(std::thread::spawn(move || {
            manager.request(id);
        }));
    }
    for thread in threads {
        thread.join().unwrap();
    }

    assert!(manager.wait_idle(WAIT));
    let first = manager.peek(&id).unwrap();
    let second = manager.peek(&id).unwrap();
    assert_eq!(first.as_bytes(), second.as_bytes());
}

#[cfg(unix)]
#[test]
fn purge_forgets_a_media() {
    let dir = TempDir::new().unwrap();
    let source = dir.path().join("source.ppm");
    write_gradient_ppm(&source, 32, 32);

    let manager = engine(&dir);
    let job = manager.convert_and_tile(
        "m",
        &source,
        ConvertOptions {
            tilesize: 8,
            format: TileFormat::Png,
            ..ConvertOptions::default()
        },
    );
    assert_eq!(job.wait(Some(WAIT)), TilingState::Done);

    let id = TileId::new("m", 2, 1, 1);
    manager.request(id.clone());
    manager.purge(Some("m"));
    assert!(manager.wait_idle(WAIT));

    // The cache holds nothing for the media; the next peek re-requests.
    assert!(matches!(manager.peek(&id), Err(ManagerError::NotLoaded)));
}

#[test]
fn overview_stays_pinned_under_pressure() {
    let dir = TempDir::new().unwrap();
    let config = EngineConfig::default()
        .with_store_root(dir.path().join("store"))
        // Budget of two tiles total: one permanent entry, one scratch.
        .with_cache_total_bytes(2 * 256 * 256 * 3)
        .with_auto_cleanup(false)
        .with_conversion_workers(1);
    let manager = TileManager::new(config, Vec::new()).unwrap();

    // Tile a small pyramid directly through the tiler.
    let source = dir.path().join("direct.ppm");
    write_gradient_ppm(&source, 32, 32);
    let mut reader = zoomtile::tiler::PpmReader::open(&source).unwrap();
    let tiler = zoomtile::tiler::Tiler::new(Arc::clone(manager.store()), "m")
        .with_tilesize(8)
        .with_format(TileFormat::Png);
    tiler.run(&mut reader).unwrap();

    let overview = TileId::new("m", 0, 0, 0);
    manager.request(overview.clone());
    assert!(manager.wait_idle(WAIT));
    assert!(manager.peek(&overview).is_ok());

    // Flood the permanent cache with deeper tiles.
    for col in 0..4 {
        manager.request(TileId::new("m", 2, 0, col));
        assert!(manager.wait_idle(WAIT));
    }

    // The overview survives arbitrary pressure.
    assert!(manager.peek(&overview).is_ok());
}
