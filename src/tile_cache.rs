//! Raw IQ tile cache with single-flight fetches.
//!
//! Each key is either `Pending`, holding the one shared future every caller
//! for that tile awaits, or `Ready`. Missing tiles of one `get` are grouped
//! into contiguous runs and each run is one backend call. Failures are never
//! cached: the key is removed so the next request retries.
//!
//! Fetches are driven by a spawned task, so a caller that gives up (scrolled
//! away, superseded render) does not throw away I/O that is already in flight.
//! Each caller's `CancelToken` only ends that caller's wait.
//! Ready tiles are evicted oldest-first once their total size passes the
//! configured byte budget.

use crate::datasource::{CancelToken, DataSourceClient, IqBlock, SourceKey};
use crate::error::{EngineError, Result};
use crate::grouping::group_contiguous_indexes;
use crate::metadata::SigMFMetadata;
use futures::future::{join_all, BoxFuture, FutureExt, Shared};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Immutable interleaved IQ for one tile.
pub type Tile = Arc<[f32]>;

type SharedTile = Shared<BoxFuture<'static, Result<Tile>>>;
type SharedRun = Shared<BoxFuture<'static, Result<Vec<IqBlock>>>>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TileKey {
    pub source: SourceKey,
    pub index: usize,
    pub tile_size: usize,
}

enum Slot {
    Pending { id: u64, fetch: SharedTile },
    /// `stamp` is the tile's position in the LRU order.
    Ready { tile: Tile, stamp: u64 },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub ready_tiles: usize,
    pub pending_tiles: usize,
    pub ready_bytes: usize,
    pub hits: u64,
    pub misses: u64,
    pub coalesced: u64,
    pub backend_calls: u64,
    pub failures: u64,
    pub evictions: u64,
}

struct Inner {
    slots: HashMap<TileKey, Slot>,
    /// Ready keys by last access, lowest stamp = least recently used.
    lru: BTreeMap<u64, TileKey>,
    clock: u64,
    next_id: u64,
    stats: CacheStats,
    max_bytes: usize,
}

fn tile_bytes(tile: &Tile) -> usize {
    tile.len() * std::mem::size_of::<f32>()
}

impl Inner {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn touch(&mut self, key: &TileKey) {
        let next = self.tick();
        if let Some(Slot::Ready { stamp, .. }) = self.slots.get_mut(key) {
            let old = std::mem::replace(stamp, next);
            if let Some(k) = self.lru.remove(&old) {
                self.lru.insert(next, k);
            }
        }
    }

    fn put_ready(&mut self, key: TileKey, tile: Tile) {
        if let Some(Slot::Ready { tile: old, stamp }) = self.slots.remove(&key) {
            self.stats.ready_bytes = self.stats.ready_bytes.saturating_sub(tile_bytes(&old));
            self.lru.remove(&stamp);
        }
        let stamp = self.tick();
        self.stats.ready_bytes += tile_bytes(&tile);
        self.slots.insert(key.clone(), Slot::Ready { tile, stamp });
        self.lru.insert(stamp, key);
        self.evict_over_budget();
    }

    fn evict_over_budget(&mut self) {
        while self.stats.ready_bytes > self.max_bytes {
            let Some((_, oldest)) = self.lru.pop_first() else {
                break;
            };
            if let Some(Slot::Ready { tile, .. }) = self.slots.remove(&oldest) {
                self.stats.ready_bytes = self.stats.ready_bytes.saturating_sub(tile_bytes(&tile));
                self.stats.evictions += 1;
            }
        }
    }

    /// Settle a pending slot, unless it was evicted or replaced meanwhile.
    fn complete(&mut self, key: &TileKey, id: u64, outcome: &Result<Tile>) {
        match self.slots.get(key) {
            Some(Slot::Pending { id: current, .. }) if *current == id => {}
            _ => return,
        }
        match outcome {
            Ok(tile) => self.put_ready(key.clone(), tile.clone()),
            Err(e) => {
                self.slots.remove(key);
                self.stats.failures += 1;
                tracing::debug!("tile {} of {} failed: {}", key.index, key.source.canonical_path(), e);
            }
        }
    }

    fn remove_where(&mut self, pred: impl Fn(&TileKey) -> bool) {
        let doomed: Vec<TileKey> = self.slots.keys().filter(|k| pred(k)).cloned().collect();
        for key in doomed {
            if let Some(Slot::Ready { tile, stamp }) = self.slots.remove(&key) {
                self.stats.ready_bytes = self.stats.ready_bytes.saturating_sub(tile_bytes(&tile));
                self.lru.remove(&stamp);
            }
        }
    }
}

enum Wait {
    Ready(Tile),
    Pending(SharedTile),
    Gone,
}

#[derive(Clone)]
pub struct TileCache {
    client: Arc<dyn DataSourceClient>,
    inner: Arc<Mutex<Inner>>,
}

impl TileCache {
    pub fn new(client: Arc<dyn DataSourceClient>, max_bytes: usize) -> Self {
        TileCache {
            client,
            inner: Arc::new(Mutex::new(Inner {
                slots: HashMap::new(),
                lru: BTreeMap::new(),
                clock: 0,
                next_id: 0,
                stats: CacheStats::default(),
                max_bytes,
            })),
        }
    }

    /// Tiles for `indices`, one result per index in input order.
    pub async fn get(
        &self,
        meta: &SigMFMetadata,
        indices: &[usize],
        tile_size: usize,
        cancel: &CancelToken,
    ) -> Vec<Result<Tile>> {
        if indices.is_empty() {
            return Vec::new();
        }
        if cancel.is_cancelled() {
            return indices.iter().map(|_| Err(EngineError::Cancelled)).collect();
        }
        let source = match meta.origin() {
            Ok(origin) => origin.clone(),
            Err(e) => return indices.iter().map(|_| Err(e.clone())).collect(),
        };

        let waits: Vec<Wait> = {
            let mut inner = self.inner.lock().await;

            let mut seen = HashSet::new();
            let missing: Vec<usize> = indices
                .iter()
                .copied()
                .filter(|&index| {
                    let key = TileKey { source: source.clone(), index, tile_size };
                    !inner.slots.contains_key(&key) && seen.insert(index)
                })
                .collect();

            if !missing.is_empty() {
                self.start_fetches(&mut inner, meta, &source, &missing, tile_size);
            }

            let missing: HashSet<usize> = missing.into_iter().collect();
            let mut waits = Vec::with_capacity(indices.len());
            for &index in indices {
                let key = TileKey { source: source.clone(), index, tile_size };
                let wait = match inner.slots.get(&key) {
                    Some(Slot::Ready { tile, .. }) => Wait::Ready(tile.clone()),
                    Some(Slot::Pending { fetch, .. }) => Wait::Pending(fetch.clone()),
                    None => Wait::Gone,
                };
                match &wait {
                    Wait::Ready(_) => {
                        inner.stats.hits += 1;
                        inner.touch(&key);
                    }
                    Wait::Pending(_) if missing.contains(&index) => inner.stats.misses += 1,
                    Wait::Pending(_) => inner.stats.coalesced += 1,
                    Wait::Gone => {}
                }
                waits.push(wait);
            }
            waits
        };

        join_all(waits.into_iter().zip(indices).map(|(wait, &index)| async move {
            match wait {
                Wait::Ready(tile) => Ok(tile),
                Wait::Pending(fetch) => cancel.guard(fetch).await,
                Wait::Gone => Err(EngineError::NotFound(format!("tile {}", index))),
            }
        }))
        .await
    }

    /// Register pending slots for `missing` and spawn one backend call per run.
    fn start_fetches(
        &self,
        inner: &mut Inner,
        meta: &SigMFMetadata,
        source: &SourceKey,
        missing: &[usize],
        tile_size: usize,
    ) {
        let meta = Arc::new(meta.clone());
        let mut drivers = Vec::with_capacity(missing.len());

        for run in group_contiguous_indexes(missing) {
            inner.stats.backend_calls += 1;
            let run_fetch: SharedRun = {
                let client = self.client.clone();
                let meta = meta.clone();
                async move {
                    // Shared by every waiter, so no single caller's token may stop it.
                    let io = CancelToken::new();
                    let run_indices: Vec<usize> = run.indices().collect();
                    client.get_iq_data_blocks(&meta, &run_indices, tile_size, &io).await
                }
                .boxed()
                .shared()
            };
            tracing::debug!(
                "fetching tiles {}..{} (size {}) of {}",
                run.start,
                run.end(),
                tile_size,
                source.canonical_path()
            );

            for index in run.indices() {
                let key = TileKey { source: source.clone(), index, tile_size };
                let id = inner.next_id;
                inner.next_id += 1;

                let run_fetch = run_fetch.clone();
                let shared_inner = self.inner.clone();
                let slot_key = key.clone();
                let fetch: SharedTile = async move {
                    let outcome = match run_fetch.await {
                        Ok(blocks) => blocks
                            .iter()
                            .find(|b| b.index == index)
                            .map(|b| b.iq.clone())
                            .ok_or_else(|| EngineError::NotFound(format!("tile {index}"))),
                        Err(e) => Err(e),
                    };
                    shared_inner.lock().await.complete(&slot_key, id, &outcome);
                    outcome
                }
                .boxed()
                .shared();

                drivers.push(fetch.clone());
                inner.slots.insert(key, Slot::Pending { id, fetch });
            }
        }

        tokio::spawn(join_all(drivers));
    }

    /// Indices of ready tiles for one source and tile size. Never fetches.
    pub async fn resident_indices(&self, source: &SourceKey, tile_size: usize) -> Vec<usize> {
        let inner = self.inner.lock().await;
        let mut out: Vec<usize> = inner
            .slots
            .iter()
            .filter(|(k, slot)| &k.source == source && k.tile_size == tile_size && matches!(slot, Slot::Ready { .. }))
            .map(|(k, _)| k.index)
            .collect();
        out.sort_unstable();
        out
    }

    /// Ready tile if resident. Never fetches.
    pub async fn peek(&self, source: &SourceKey, index: usize, tile_size: usize) -> Option<Tile> {
        let inner = self.inner.lock().await;
        let key = TileKey { source: source.clone(), index, tile_size };
        match inner.slots.get(&key) {
            Some(Slot::Ready { tile, .. }) => Some(tile.clone()),
            _ => None,
        }
    }

    /// Seed a tile computed elsewhere. Existing entries, pending or ready, win.
    pub async fn insert_ready(&self, source: &SourceKey, index: usize, tile_size: usize, tile: Tile) -> bool {
        let mut inner = self.inner.lock().await;
        let key = TileKey { source: source.clone(), index, tile_size };
        if inner.slots.contains_key(&key) {
            return false;
        }
        inner.put_ready(key, tile);
        true
    }

    /// Drop every entry of `source`. Fetches still in flight finish without
    /// being stored.
    pub async fn evict_source(&self, source: &SourceKey) {
        let mut inner = self.inner.lock().await;
        inner.remove_where(|k| &k.source == source);
        tracing::info!("evicted cached tiles of {}", source.canonical_path());
    }

    pub async fn clear(&self) {
        let mut inner = self.inner.lock().await;
        inner.remove_where(|_| true);
    }

    pub async fn stats(&self) -> CacheStats {
        let inner = self.inner.lock().await;
        let mut stats = inner.stats.clone();
        stats.ready_tiles = inner.lru.len();
        stats.pending_tiles = inner.slots.len() - inner.lru.len();
        stats
    }
}
