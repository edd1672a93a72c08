//! The provider worker thread and its request queue.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::cache::TileCache;
use crate::tile::{Tile, TileId};

/// The loading strategy a [`Provider`] runs for each popped request.
pub trait TileLoad: Send + 'static {
    /// Name for logging.
    fn name(&self) -> &str;

    /// Produce the tile, or `None` when it cannot exist.
    ///
    /// Implementations must not panic on missing data; unavailability is an
    /// expected outcome and becomes a cache tombstone.
    fn load(&self, id: &TileId) -> Option<Tile>;
}

struct QueueState {
    queue: VecDeque<TileId>,
    inflight: Option<TileId>,
    discard_inflight: bool,
    paused: bool,
    stopping: bool,
}

struct Shared {
    state: Mutex<QueueState>,
    changed: Condvar,
}

/// A worker servicing tile requests in LIFO order.
///
/// Duplicate requests coalesce while queued, and the worker skips ids that
/// reached the cache while they waited, so a burst of identical requests
/// costs at most one load after the first insert.
pub struct Provider {
    name: String,
    shared: Arc<Shared>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Provider {
    /// Spawn a provider feeding `cache` through `loader`.
    pub fn spawn(name: impl Into<String>, loader: Box<dyn TileLoad>, cache: Arc<TileCache>) -> Self {
        let name = name.into();
        let shared = Arc::new(Shared {
            state: Mutex::new(QueueState {
                queue: VecDeque::new(),
                inflight: None,
                discard_inflight: false,
                paused: false,
                stopping: false,
            }),
            changed: Condvar::new(),
        });

        let worker_shared = Arc::clone(&shared);
        let thread_name = format!("provider-{}", name);
        let handle = std::thread::Builder::new()
            .name(thread_name)
            .spawn(move || worker_loop(&worker_shared, loader, cache))
            .expect("failed to spawn provider worker");

        Self {
            name,
            shared,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Provider name (used for routing diagnostics).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Queue a request. O(1); duplicates of a pending request coalesce.
    pub fn enqueue(&self, id: TileId) {
        let mut state = self.shared.state.lock().unwrap();
        if state.stopping || state.queue.contains(&id) {
            return;
        }
        state.queue.push_back(id);
        self.shared.changed.notify_all();
    }

    /// Drop queued requests for `media_id`, or all when `None`.
    ///
    /// An in-flight load cannot be aborted, but its result is discarded.
    pub fn purge(&self, media_id: Option<&str>) {
        let mut state = self.shared.state.lock().unwrap();
        debug!(provider = %self.name, media = media_id.unwrap_or("all"), "purging requests");
        match media_id {
            Some(media) => state.queue.retain(|id| id.media_id != media),
            None => state.queue.clear(),
        }
        let discard = match (&state.inflight, media_id) {
            (Some(_), None) => true,
            (Some(id), Some(media)) => id.media_id == media,
            (None, _) => false,
        };
        if discard {
            state.discard_inflight = true;
        }
        self.shared.changed.notify_all();
    }

    /// Suspend popping between loads.
    pub fn pause(&self) {
        let mut state = self.shared.state.lock().unwrap();
        state.paused = true;
        self.shared.changed.notify_all();
    }

    /// Resume a paused worker.
    pub fn resume(&self) {
        let mut state = self.shared.state.lock().unwrap();
        state.paused = false;
        self.shared.changed.notify_all();
    }

    /// True when the queue is empty and no load is in flight.
    pub fn is_idle(&self) -> bool {
        let state = self.shared.state.lock().unwrap();
        state.queue.is_empty() && state.inflight.is_none()
    }

    /// Block until the worker is idle, up to `timeout`.
    ///
    /// Returns whether idleness was reached.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock().unwrap();
        loop {
            if state.queue.is_empty() && state.inflight.is_none() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _) = self
                .shared
                .changed
                .wait_timeout(state, deadline - now)
                .unwrap();
            state = guard;
        }
    }

    /// Stop the worker and wait up to `timeout` for it to exit.
    ///
    /// Returns whether the worker thread finished in time; a straggler is
    /// detached rather than blocked on.
    pub fn shutdown(&self, timeout: Duration) -> bool {
        {
            let mut state = self.shared.state.lock().unwrap();
            state.stopping = true;
            state.queue.clear();
            self.shared.changed.notify_all();
        }

        let Some(handle) = self.handle.lock().unwrap().take() else {
            return true;
        };
        let deadline = Instant::now() + timeout;
        while !handle.is_finished() {
            if Instant::now() >= deadline {
                warn!(provider = %self.name, "worker did not drain before timeout, detaching");
                return false;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        let _ = handle.join();
        true
    }
}

fn worker_loop(shared: &Shared, loader: Box<dyn TileLoad>, cache: Arc<TileCache>) {
    loop {
        // Wait for work; LIFO pop from the top of the queue.
        let id = {
            let mut state = shared.state.lock().unwrap();
            loop {
                if state.stopping {
                    return;
                }
                if !state.paused {
                    if let Some(id) = state.queue.pop_back() {
                        state.inflight = Some(id.clone());
                        state.discard_inflight = false;
                        break id;
                    }
                }
                state = shared.changed.wait(state).unwrap();
            }
        };

        // A duplicate request may have been satisfied while queued.
        if !cache.contains(&id) {
            let tile = loader.load(&id);

            let mut state = shared.state.lock().unwrap();
            if state.discard_inflight {
                debug!(loader = loader.name(), id = %id, "discarding purged in-flight load");
            } else {
                match tile {
                    Some(tile) => {
                        debug!(loader = loader.name(), id = %id, "loaded tile");
                        cache.insert(id.clone(), Some(tile));
                    }
                    None => {
                        debug!(loader = loader.name(), id = %id, "tile unavailable, recording tombstone");
                        cache.insert(id.clone(), None);
                    }
                }
            }
            state.inflight = None;
            state.discard_inflight = false;
        } else {
            let mut state = shared.state.lock().unwrap();
            state.inflight = None;
            state.discard_inflight = false;
        }
        shared.changed.notify_all();
    }
}
