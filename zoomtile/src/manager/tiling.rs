//! The convert-then-tile pipeline behind first-time media references.
//!
//! When a scene references a static media id with no pyramid on disk, the
//! source file is first normalized to a streamable raster by a conversion
//! worker process, then fed through the [`Tiler`]. Providers pause for the
//! conversion phase so the decoder process has the filesystem to itself.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use super::TileManager;
use crate::convert::{ConversionJob, JobStatus};
use crate::tile::TileFormat;
use crate::tiler::{PpmReader, Tiler, TilerError, TilerProgress, DEFAULT_TILESIZE};

/// Options for converting and tiling one source file.
#[derive(Debug, Clone)]
pub struct ConvertOptions {
    /// Clockwise rotation in degrees: 0, 90, 180, or 270.
    pub rotation: u16,
    /// Invert colors during conversion.
    pub invert: bool,
    /// Convert to grayscale during conversion.
    pub mono: bool,
    /// Rasterization resolution for document sources.
    pub dpi: u32,
    /// Tile edge length for the produced pyramid.
    pub tilesize: u32,
    /// Tile file format for the produced pyramid.
    pub format: TileFormat,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        Self {
            rotation: 0,
            invert: false,
            mono: false,
            dpi: 150,
            tilesize: DEFAULT_TILESIZE,
            format: TileFormat::Jpeg,
        }
    }
}

/// Pipeline phase of a [`TilingJob`].
#[derive(Debug, Clone, PartialEq)]
pub enum TilingState {
    /// The conversion worker process is running.
    Converting,
    /// The tiler is building the pyramid.
    Tiling,
    /// The pyramid is complete and the media is tiled.
    Done,
    /// The pipeline failed; the media stays untiled.
    Failed(String),
    /// The job was cancelled; partial output was removed.
    Cancelled,
}

impl TilingState {
    /// True for `Done`, `Failed`, and `Cancelled`.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TilingState::Done | TilingState::Failed(_) | TilingState::Cancelled
        )
    }
}

struct JobShared {
    state: Mutex<TilingState>,
    changed: Condvar,
    cancel: AtomicBool,
    tiler_progress: Mutex<Option<Arc<TilerProgress>>>,
}

/// Handle to one background convert-and-tile pipeline.
#[derive(Clone)]
pub struct TilingJob {
    shared: Arc<JobShared>,
}

impl TilingJob {
    fn new(initial: TilingState) -> Self {
        Self {
            shared: Arc::new(JobShared {
                state: Mutex::new(initial),
                changed: Condvar::new(),
                cancel: AtomicBool::new(false),
                tiler_progress: Mutex::new(None),
            }),
        }
    }

    /// Current pipeline phase.
    pub fn state(&self) -> TilingState {
        self.shared.state.lock().unwrap().clone()
    }

    /// Overall progress in `[0, 1]`.
    ///
    /// Conversion reports no incremental progress (it runs in a separate
    /// process), so the fraction stays at zero until tiling starts.
    pub fn progress(&self) -> f32 {
        match self.state() {
            TilingState::Converting => 0.0,
            TilingState::Tiling => self
                .shared
                .tiler_progress
                .lock()
                .unwrap()
                .as_ref()
                .map(|p| p.fraction())
                .unwrap_or(0.0),
            _ => 1.0,
        }
    }

    /// Request cooperative cancellation.
    ///
    /// An in-flight conversion process cannot be aborted, but its output is
    /// discarded; a running tiler stops between rows.
    pub fn cancel(&self) {
        self.shared.cancel.store(true, Ordering::SeqCst);
        if let Some(progress) = self.shared.tiler_progress.lock().unwrap().as_ref() {
            progress.cancel();
        }
        self.shared.changed.notify_all();
    }

    /// Block until the job reaches a terminal state, up to `timeout`.
    pub fn wait(&self, timeout: Option<Duration>) -> TilingState {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.shared.state.lock().unwrap();
        while !state.is_terminal() {
            match deadline {
                None => state = self.shared.changed.wait(state).unwrap(),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        break;
                    }
                    let (guard, _) = self
                        .shared
                        .changed
                        .wait_timeout(state, deadline - now)
                        .unwrap();
                    state = guard;
                }
            }
        }
        state.clone()
    }

    fn is_cancelled(&self) -> bool {
        self.shared.cancel.load(Ordering::SeqCst)
    }

    fn set(&self, state: TilingState) {
        let mut guard = self.shared.state.lock().unwrap();
        *guard = state;
        self.shared.changed.notify_all();
    }

    fn attach_tiler(&self, progress: Arc<TilerProgress>) {
        if self.is_cancelled() {
            progress.cancel();
        }
        *self.shared.tiler_progress.lock().unwrap() = Some(progress);
    }
}

/// Distinct temp raster path per job within this process.
fn temp_raster_path() -> PathBuf {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    std::env::temp_dir().join(format!(
        "zoomtile-{}-{}.ppm",
        std::process::id(),
        COUNTER.fetch_add(1, Ordering::Relaxed)
    ))
}

fn is_document(source: &Path) -> bool {
    source
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("pdf"))
}

impl TileManager {
    /// Normalize `source` and build its tile pyramid in the background.
    ///
    /// Returns immediately; poll or wait on the returned job. An already
    /// tiled media id yields a completed job without any work. Providers
    /// pause while the conversion process runs and resume afterwards.
    pub fn convert_and_tile(
        &self,
        media_id: &str,
        source: &Path,
        options: ConvertOptions,
    ) -> TilingJob {
        if self.store().is_tiled(media_id) {
            debug!(media_id, "media already tiled, nothing to do");
            return TilingJob::new(TilingState::Done);
        }

        let job = TilingJob::new(TilingState::Converting);
        let raster = temp_raster_path();

        let conversion = if is_document(source) {
            ConversionJob::ConvertDocument {
                input: source.to_path_buf(),
                output: raster.clone(),
                dpi: options.dpi,
            }
        } else {
            ConversionJob::ConvertImage {
                input: source.to_path_buf(),
                output: raster.clone(),
                rotation: options.rotation,
                invert: options.invert,
                mono: options.mono,
            }
        };

        let handle = self.runner.submit(conversion);
        let store = Arc::clone(&self.store);
        let providers = Arc::clone(&self.providers);
        let media = media_id.to_string();
        let worker_job = job.clone();

        let spawned = std::thread::Builder::new()
            .name(format!("tiling-{}", crate::store::media_hash(&media)))
            .spawn(move || {
                providers.pause_all();
                let status = loop {
                    let status = handle.wait(Some(Duration::from_millis(100)));
                    if status.is_terminal() {
                        break status;
                    }
                };
                providers.resume_all();

                match status {
                    JobStatus::Failed(message) => {
                        let _ = std::fs::remove_file(&raster);
                        warn!(media_id = %media, error = %message, "conversion failed");
                        worker_job.set(TilingState::Failed(message));
                    }
                    JobStatus::Done if worker_job.is_cancelled() => {
                        let _ = std::fs::remove_file(&raster);
                        worker_job.set(TilingState::Cancelled);
                    }
                    JobStatus::Done => {
                        worker_job.set(TilingState::Tiling);
                        let result = tile_raster(&store, &media, &raster, &options, &worker_job);
                        let _ = std::fs::remove_file(&raster);
                        match result {
                            Ok(()) => worker_job.set(TilingState::Done),
                            Err(TilerError::Cancelled) => worker_job.set(TilingState::Cancelled),
                            Err(e) => worker_job.set(TilingState::Failed(e.to_string())),
                        }
                    }
                    other => {
                        let _ = std::fs::remove_file(&raster);
                        worker_job.set(TilingState::Failed(format!(
                            "conversion ended in unexpected state {:?}",
                            other
                        )));
                    }
                }
            });

        if let Err(e) = spawned {
            job.set(TilingState::Failed(format!(
                "failed to spawn tiling thread: {}",
                e
            )));
        }

        job
    }
}

fn tile_raster(
    store: &Arc<crate::store::TileStore>,
    media_id: &str,
    raster: &Path,
    options: &ConvertOptions,
    job: &TilingJob,
) -> Result<(), TilerError> {
    let mut reader = PpmReader::open(raster)?;
    let tiler = Tiler::new(Arc::clone(store), media_id)
        .with_tilesize(options.tilesize)
        .with_format(options.format);
    job.attach_tiler(tiler.progress());
    tiler.run(&mut reader).map(|_| ())
}
