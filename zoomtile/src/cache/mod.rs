//! In-memory tile cache with LRU eviction and eviction classes.
//!
//! Overview tiles (level 0) are immortal: they anchor zoom-out synthesis
//! and are the cheapest-to-keep, most-reused surface, so eviction never
//! touches them. Everything else, tombstones included, is mortal and leaves
//! under LRU pressure, age expiry, or access-count exhaustion.
//!
//! The cache is guarded by a reentrant lock: provider workers call into it
//! while holding their own queue locks, and the manager may re-enter from
//! the same thread during synthesis.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use parking_lot::ReentrantMutex;

use crate::tile::{Tile, TileId};

/// Whether an entry may ever be evicted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionClass {
    /// Never evicted; level-0 tiles holding pixels.
    Immortal,
    /// Subject to LRU, age, and access-count policies.
    Mortal,
}

/// Result of probing the cache for an id.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    /// A tile is cached.
    Hit(Tile),
    /// A previous load failed; the id is known unavailable.
    Tombstone,
    /// Nothing is known about this id.
    Miss,
}

#[derive(Debug)]
struct CacheEntry {
    /// `None` marks a known-unavailable tile.
    value: Option<Tile>,
    last_access: Instant,
    access_count: u32,
    #[allow(dead_code)]
    inserted_at: Instant,
    class: EvictionClass,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<TileId, CacheEntry>,
    /// Mortal ids ordered least- to most-recently used.
    lru: VecDeque<TileId>,
}

/// Bounded associative tile container.
///
/// `max_entries` bounds the number of **mortal** entries; immortal overview
/// tiles live outside the budget. Optional `max_age` expires entries whose
/// last access is too old; optional `max_accesses` drops an entry once it
/// has been read that many times (the scratch cache uses this for
/// synthesized tiles that can always be recomputed).
pub struct TileCache {
    inner: ReentrantMutex<RefCell<Inner>>,
    max_entries: usize,
    max_age: Option<Duration>,
    max_accesses: Option<u32>,
}

impl TileCache {
    /// Create a cache bounded to `max_entries` mortal entries.
    pub fn new(max_entries: usize, max_age: Option<Duration>, max_accesses: Option<u32>) -> Self {
        Self {
            inner: ReentrantMutex::new(RefCell::new(Inner::default())),
            max_entries: max_entries.max(1),
            max_age,
            max_accesses,
        }
    }

    /// Insert a tile, or a tombstone when `value` is `None`.
    ///
    /// Concurrent inserts for the same id resolve to last-writer-wins, with
    /// one exception: a tombstone never replaces a live tile, because the
    /// tile is strictly better information.
    pub fn insert(&self, id: TileId, value: Option<Tile>) {
        let guard = self.inner.lock();
        let mut inner = guard.borrow_mut();

        if let Some(existing) = inner.entries.get(&id) {
            if value.is_none() && existing.value.is_some() {
                return;
            }
            detach(&mut inner, &id);
        }

        let class = if id.level == 0 && value.is_some() {
            EvictionClass::Immortal
        } else {
            EvictionClass::Mortal
        };
        let now = Instant::now();
        if class == EvictionClass::Mortal {
            inner.lru.push_back(id.clone());
        }
        inner.entries.insert(
            id,
            CacheEntry {
                value,
                last_access: now,
                access_count: 0,
                inserted_at: now,
                class,
            },
        );

        self.expire_aged(&mut inner);
        self.evict_over_capacity(&mut inner);
    }

    /// Probe the cache, distinguishing hits, tombstones, and misses.
    ///
    /// Counts as an access: recency and access counters update exactly as
    /// for [`TileCache::get`].
    pub fn lookup(&self, id: &TileId) -> Lookup {
        let guard = self.inner.lock();
        let mut inner = guard.borrow_mut();

        let Some(entry) = inner.entries.get_mut(id) else {
            return Lookup::Miss;
        };
        entry.access_count += 1;
        entry.last_access = Instant::now();
        let value = entry.value.clone();
        let mortal = entry.class == EvictionClass::Mortal;
        let exhausted = mortal
            && self
                .max_accesses
                .is_some_and(|max| entry.access_count >= max);

        if mortal {
            // Refresh the LRU position.
            if let Some(pos) = inner.lru.iter().position(|i| i == id) {
                inner.lru.remove(pos);
            }
            inner.lru.push_back(id.clone());
        }
        if exhausted {
            detach(&mut inner, id);
        }

        match value {
            Some(tile) => Lookup::Hit(tile),
            None => Lookup::Tombstone,
        }
    }

    /// Fetch a cached tile, updating recency and access counters.
    ///
    /// Returns `None` for both misses and tombstones; use
    /// [`TileCache::lookup`] to tell them apart.
    pub fn get(&self, id: &TileId) -> Option<Tile> {
        match self.lookup(id) {
            Lookup::Hit(tile) => Some(tile),
            _ => None,
        }
    }

    /// True when the id has an entry (tile or tombstone).
    pub fn contains(&self, id: &TileId) -> bool {
        let guard = self.inner.lock();
        let inner = guard.borrow();
        inner.entries.contains_key(id)
    }

    /// Remove one entry.
    pub fn remove(&self, id: &TileId) {
        let guard = self.inner.lock();
        let mut inner = guard.borrow_mut();
        detach(&mut inner, id);
    }

    /// Remove every entry belonging to `media_id`.
    pub fn remove_matching(&self, media_id: &str) {
        let guard = self.inner.lock();
        let mut inner = guard.borrow_mut();
        let ids: Vec<TileId> = inner
            .entries
            .keys()
            .filter(|id| id.media_id == media_id)
            .cloned()
            .collect();
        for id in &ids {
            detach(&mut inner, id);
        }
        if !ids.is_empty() {
            tracing::debug!(media_id, removed = ids.len(), "purged cache entries");
        }
    }

    /// Drop everything, immortal entries included.
    pub fn purge(&self) {
        let guard = self.inner.lock();
        let mut inner = guard.borrow_mut();
        inner.entries.clear();
        inner.lru.clear();
    }

    /// Total number of entries, tombstones and immortals included.
    pub fn len(&self) -> usize {
        let guard = self.inner.lock();
        let inner = guard.borrow();
        inner.entries.len()
    }

    /// True when the cache holds nothing at all.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of mortal entries currently counted against `max_entries`.
    pub fn mortal_len(&self) -> usize {
        let guard = self.inner.lock();
        let inner = guard.borrow();
        inner.lru.len()
    }

    fn expire_aged(&self, inner: &mut Inner) {
        let Some(max_age) = self.max_age else { return };
        while let Some(front) = inner.lru.front().cloned() {
            let expired = inner
                .entries
                .get(&front)
                .is_some_and(|e| e.last_access.elapsed() > max_age);
            if !expired {
                break;
            }
            tracing::debug!(id = %front, "cache entry expired by age");
            detach(inner, &front);
        }
    }

    fn evict_over_capacity(&self, inner: &mut Inner) {
        while inner.lru.len() > self.max_entries {
            let Some(victim) = inner.lru.front().cloned() else {
                break;
            };
            tracing::debug!(id = %victim, "evicting least recently used tile");
            detach(inner, &victim);
        }
    }
}

fn detach(inner: &mut Inner, id: &TileId) {
    if inner.entries.remove(id).is_some() {
        if let Some(pos) = inner.lru.iter().position(|i| i == id) {
            inner.lru.remove(pos);
        }
    }
}
