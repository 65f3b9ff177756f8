//! One open recording: its tile cache, render parameters and computed rows.
//!
//! Every parameter change bumps the session generation. A render pass records
//! the generation it started under and returns `Ok(None)` if a newer one
//! appears before it finishes, so late results never overwrite a newer view.

use crate::colormap::{auto_bounds, fft_to_rgb, Colormap};
use crate::config::{AppConfig, EngineConfig, RenderConfig};
use crate::datasource::{client_for, metadata_source_for, CancelToken, DataSourceClient, SourceKey};
use crate::decimate::{displayed_rows, padding_rows};
use crate::error::{EngineError, Result};
use crate::fft::{FftEngine, WindowKind};
use crate::grouping::group_contiguous_indexes;
use crate::metadata::{center_frequency, total_samples, AnnotationBox, SampleWindow, SigMFMetadata, TraceabilityOrigin};
use crate::reshape::{is_complete, reshape_iq_rows, Row};
use crate::tile_cache::{Tile, TileCache};
use crate::viewport::{self, Viewport, ViewportInput};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

#[derive(Debug, Clone, PartialEq)]
pub struct RenderParams {
    pub fft_size: usize,
    pub window: WindowKind,
    pub magnitude_min: f32,
    pub magnitude_max: f32,
    pub colormap: Colormap,
    pub fft_step_size: usize,
    pub spectrogram_height: usize,
    pub zoom_level: f64,
    pub taps: Vec<f32>,
}

impl RenderParams {
    pub fn from_config(cfg: &RenderConfig) -> Result<Self> {
        let params = RenderParams {
            fft_size: cfg.fft_size,
            window: cfg.window_kind()?,
            magnitude_min: cfg.magnitude_min,
            magnitude_max: cfg.magnitude_max,
            colormap: cfg.colormap()?,
            fft_step_size: cfg.fft_step_size,
            spectrogram_height: cfg.spectrogram_height,
            zoom_level: cfg.zoom_level,
            taps: cfg.taps.clone(),
        };
        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> Result<()> {
        if self.fft_size == 0 {
            return Err(EngineError::InvalidParameter("fft size must be positive".into()));
        }
        if !(self.magnitude_min < self.magnitude_max) {
            return Err(EngineError::InvalidParameter(format!(
                "magnitude bounds must satisfy min < max, got [{}, {}]",
                self.magnitude_min, self.magnitude_max
            )));
        }
        if !(self.zoom_level > 0.0) {
            return Err(EngineError::InvalidParameter(format!("zoom level must be positive, got {}", self.zoom_level)));
        }
        Ok(())
    }

    /// Whether cached rows computed under `self` are stale under `next`.
    fn rows_differ(&self, next: &RenderParams) -> bool {
        self.fft_size != next.fft_size
            || self.window != next.window
            || self.taps != next.taps
            || self.magnitude_min != next.magnitude_min
            || self.magnitude_max != next.magnitude_max
            || self.colormap != next.colormap
    }
}

/// Colorized view of consecutive displayed rows.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub generation: u64,
    pub width: usize,
    pub height: usize,
    /// Source row index of each output line.
    pub rows: Vec<usize>,
    /// Rows drawn as gaps because their tile could not be loaded.
    pub missing_rows: Vec<usize>,
    pub rgba: Vec<u8>,
}

pub struct SpectrogramSession {
    meta: Arc<SigMFMetadata>,
    source: SourceKey,
    cache: TileCache,
    params: RwLock<Arc<RenderParams>>,
    rows: Mutex<HashMap<usize, Arc<[f32]>>>,
    generation: AtomicU64,
    engine: EngineConfig,
}

fn join_error(e: tokio::task::JoinError) -> EngineError {
    EngineError::Io(format!("compute task failed: {e}"))
}

impl SpectrogramSession {
    pub fn new(
        meta: SigMFMetadata,
        client: Arc<dyn DataSourceClient>,
        engine: EngineConfig,
        params: RenderParams,
    ) -> Result<Self> {
        let source = meta.origin()?.clone();
        params.validate()?;
        let cache = TileCache::new(client, engine.max_cache_bytes);
        tracing::info!(
            "opened {} ({} samples, fft {})",
            source.canonical_path(),
            total_samples(&meta),
            params.fft_size
        );
        Ok(SpectrogramSession {
            meta: Arc::new(meta),
            source,
            cache,
            params: RwLock::new(Arc::new(params)),
            rows: Mutex::new(HashMap::new()),
            generation: AtomicU64::new(0),
            engine,
        })
    }

    /// Resolve backends for `origin` from configuration and load its metadata.
    pub async fn open(origin: &TraceabilityOrigin, config: &AppConfig) -> Result<Self> {
        let meta_source = metadata_source_for(&origin.kind, &config.datasource)?;
        let client = client_for(&origin.kind, &config.datasource)?;
        let meta = meta_source.get_meta(origin).await?;
        let params = RenderParams::from_config(&config.render)?;
        SpectrogramSession::new(meta, client, config.engine.clone(), params)
    }

    pub fn meta(&self) -> &SigMFMetadata {
        &self.meta
    }

    pub fn cache(&self) -> &TileCache {
        &self.cache
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub async fn params(&self) -> Arc<RenderParams> {
        self.params.read().await.clone()
    }

    fn rows_per_tile(&self) -> usize {
        self.engine.tile_rows.max(1)
    }

    fn tile_size(&self, fft_size: usize) -> usize {
        fft_size * self.rows_per_tile()
    }

    fn total_rows(&self, fft_size: usize) -> usize {
        viewport::total_rows(total_samples(&self.meta), fft_size)
    }

    /// Swap in `next` as one unit and start a new generation.
    pub async fn apply_params(&self, next: RenderParams) -> Result<u64> {
        next.validate()?;
        let next = Arc::new(next);
        // Params, generation and the row cache change together under the row lock.
        let (previous, generation) = {
            let mut rows = self.rows.lock().await;
            let previous = {
                let mut guard = self.params.write().await;
                std::mem::replace(&mut *guard, next.clone())
            };
            let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
            if previous.rows_differ(&next) {
                rows.clear();
            }
            (previous, generation)
        };
        if previous.fft_size != next.fft_size {
            self.reseed_tiles(previous.fft_size, next.fft_size).await;
        }
        tracing::debug!("render parameters now at generation {}", generation);
        Ok(generation)
    }

    /// Re-slice resident tiles of the old size into tiles of the new size so
    /// data already downloaded is not fetched again.
    async fn reseed_tiles(&self, old_fft: usize, new_fft: usize) {
        let old_tile = self.tile_size(old_fft);
        let new_tile = self.tile_size(new_fft);
        let resident = self.cache.resident_indices(&self.source, old_tile).await;
        if resident.is_empty() || (old_tile % new_tile != 0 && new_tile % old_tile != 0) {
            return;
        }
        let grow = (new_tile / old_tile).max(1);
        let shrink = (old_tile / new_tile).max(1);

        let mut seeded = 0usize;
        for run in group_contiguous_indexes(&resident) {
            let lo = run.start - run.start % grow;
            let hi = run.end().div_ceil(grow) * grow;
            let mut rows: Vec<Option<Row>> = Vec::with_capacity(hi - lo);
            for index in lo..hi {
                let tile = self.cache.peek(&self.source, index, old_tile).await;
                rows.push(tile.filter(|t| t.len() == old_tile * 2).map(|t| t.to_vec()));
            }
            let reshaped = match reshape_iq_rows(old_tile, &rows, new_tile) {
                Ok(r) => r.into_owned(),
                Err(e) => {
                    tracing::warn!("could not reshape resident tiles: {}", e);
                    return;
                }
            };
            let first = lo / grow * shrink;
            for (offset, row) in reshaped.into_iter().enumerate() {
                let Some(row) = row.filter(|r| is_complete(r)) else {
                    continue;
                };
                if self
                    .cache
                    .insert_ready(&self.source, first + offset, new_tile, Arc::from(row))
                    .await
                {
                    seeded += 1;
                }
            }
        }
        tracing::debug!("seeded {} tiles of {} samples from resident data", seeded, new_tile);
    }

    pub async fn viewport(&self, handle_top: f64, minimap_height: f64) -> Viewport {
        let params = self.params().await;
        viewport::compute(&ViewportInput {
            handle_top,
            minimap_height,
            total_samples: total_samples(&self.meta),
            fft_size: params.fft_size,
            tile_size: self.tile_size(params.fft_size),
            spectrogram_height: params.spectrogram_height,
            zoom_level: params.zoom_level,
            fft_step_size: params.fft_step_size,
            padding_rows: viewport::fetch_padding_rows(self.engine.fetch_padding, params.fft_size),
        })
    }

    pub async fn handle_height(&self) -> f64 {
        let params = self.params().await;
        viewport::handle_height(
            params.spectrogram_height,
            total_samples(&self.meta),
            params.fft_size,
            params.fft_step_size,
            self.engine.min_handle_height,
        )
    }

    /// Render the view whose first row is `current_row`.
    ///
    /// Returns `Ok(None)` when parameters changed while the pass was running.
    /// Rows whose tile could not be loaded are drawn with the NaN sentinel and
    /// listed in `missing_rows`.
    pub async fn render_frame(&self, current_row: usize, cancel: &CancelToken) -> Result<Option<Frame>> {
        let generation = self.generation();
        let params = self.params().await;
        let fft_size = params.fft_size;
        let total_rows = self.total_rows(fft_size);

        if total_rows == 0 {
            return Ok(Some(Frame {
                generation,
                width: fft_size,
                height: 0,
                rows: Vec::new(),
                missing_rows: Vec::new(),
                rgba: Vec::new(),
            }));
        }
        if current_row >= total_rows {
            return Err(EngineError::OutOfRange { index: current_row, total: total_rows });
        }
        cancel.check()?;

        let shown = displayed_rows(current_row, params.fft_step_size, params.spectrogram_height, total_rows);
        let padding = viewport::fetch_padding_rows(self.engine.fetch_padding, fft_size);
        let prefetch = padding_rows(&shown, params.fft_step_size, padding, total_rows);

        let rows_per_tile = self.rows_per_tile();
        let tile_indices: Vec<usize> = {
            let cached = self.rows.lock().await;
            shown
                .iter()
                .chain(&prefetch)
                .filter(|row| !cached.contains_key(*row))
                .map(|row| row / rows_per_tile)
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect()
        };

        let results = self
            .cache
            .get(&self.meta, &tile_indices, self.tile_size(fft_size), cancel)
            .await;
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        if self.generation() != generation {
            return Ok(None);
        }

        let mut loaded: Vec<(usize, Tile)> = Vec::with_capacity(results.len());
        for (index, result) in tile_indices.iter().zip(results) {
            match result {
                Ok(tile) => loaded.push((*index, tile)),
                Err(e) if e.is_transient() => {
                    tracing::debug!("tile {} unavailable: {}", index, e);
                }
                Err(e) => return Err(e),
            }
        }

        let engine = FftEngine::new(fft_size, params.window, &params.taps)?;
        let tiles: Vec<Tile> = loaded.iter().map(|(_, t)| t.clone()).collect();
        let computed = tokio::task::spawn_blocking(move || engine.compute_tiles(&tiles))
            .await
            .map_err(join_error)?;

        let mut values = Vec::with_capacity(shown.len() * fft_size);
        let mut missing_rows = Vec::new();
        {
            let mut cached = self.rows.lock().await;
            if self.generation() != generation {
                return Ok(None);
            }
            for ((tile_index, _), tile_rows) in loaded.iter().zip(computed) {
                for (k, row) in tile_rows.into_iter().enumerate() {
                    cached.insert(tile_index * rows_per_tile + k, Arc::from(row));
                }
            }
            self.trim_rows(&mut cached, &shown, &prefetch, fft_size);

            for row in &shown {
                match cached.get(row).filter(|r| r.len() == fft_size) {
                    Some(r) => values.extend_from_slice(r),
                    None => {
                        values.extend(std::iter::repeat(f32::NAN).take(fft_size));
                        missing_rows.push(*row);
                    }
                }
            }
        }

        let (min, max, colormap) = (params.magnitude_min, params.magnitude_max, params.colormap.clone());
        let rgba = tokio::task::spawn_blocking(move || fft_to_rgb(&values, fft_size, min, max, &colormap))
            .await
            .map_err(join_error)??;

        if self.generation() != generation {
            return Ok(None);
        }
        if !missing_rows.is_empty() {
            tracing::debug!("frame at row {} has {} missing rows", current_row, missing_rows.len());
        }
        Ok(Some(Frame {
            generation,
            width: fft_size,
            height: shown.len(),
            rows: shown,
            missing_rows,
            rgba,
        }))
    }

    /// Keep the row cache within the byte budget, dropping rows far from the view first.
    fn trim_rows(&self, cached: &mut HashMap<usize, Arc<[f32]>>, shown: &[usize], prefetch: &[usize], fft_size: usize) {
        let row_bytes = fft_size * std::mem::size_of::<f32>();
        let max_rows = (self.engine.max_cache_bytes / row_bytes.max(1)).max(shown.len() + prefetch.len());
        if cached.len() <= max_rows {
            return;
        }
        let keep: HashSet<usize> = shown.iter().chain(prefetch).copied().collect();
        cached.retain(|row, _| keep.contains(row));
    }

    /// Render with the view's top edge at minimap pixel `handle_top`.
    pub async fn render_at_handle(
        &self,
        handle_top: f64,
        minimap_height: f64,
        cancel: &CancelToken,
    ) -> Result<Option<Frame>> {
        let vp = self.viewport(handle_top, minimap_height).await;
        let top = vp.top_row.min(vp.total_rows.saturating_sub(1));
        self.render_frame(top, cancel).await
    }

    /// Overview of the whole recording: one short FFT from evenly spaced
    /// positions, coloured with bounds taken from the data itself.
    pub async fn minimap(&self, cancel: &CancelToken) -> Result<Frame> {
        let params = self.params().await;
        let fft_size = self.engine.minimap_fft_size;
        let total_tiles = viewport::total_rows(total_samples(&self.meta), fft_size);
        let rows = self.engine.minimap_rows.min(total_tiles);
        let indices: Vec<usize> = (0..rows).map(|k| k * total_tiles / rows.max(1)).collect();

        let results = self.cache.get(&self.meta, &indices, fft_size, cancel).await;
        cancel.check()?;

        let engine = FftEngine::new(fft_size, params.window, &[1.0])?;
        let tiles: Vec<Option<Tile>> = results.into_iter().map(|r| r.ok()).collect();
        let values = tokio::task::spawn_blocking(move || {
            let mut values = Vec::with_capacity(tiles.len() * fft_size);
            for tile in &tiles {
                match tile.as_ref().and_then(|t| engine.compute_rows(t).into_iter().next()) {
                    Some(row) => values.extend(row),
                    None => values.extend(std::iter::repeat(f32::NAN).take(fft_size)),
                }
            }
            values
        })
        .await
        .map_err(join_error)?;

        let (min, max) = auto_bounds(&values).unwrap_or((params.magnitude_min, params.magnitude_max));
        let colormap = params.colormap.clone();
        let height = values.len() / fft_size.max(1);
        let rgba = tokio::task::spawn_blocking(move || fft_to_rgb(&values, fft_size, min, max, &colormap))
            .await
            .map_err(join_error)??;
        Ok(Frame {
            generation: self.generation(),
            width: fft_size,
            height,
            rows: indices,
            missing_rows: Vec::new(),
            rgba,
        })
    }

    /// Download coverage of the current tile size in `buckets` slices.
    pub async fn coverage(&self, buckets: usize) -> Vec<bool> {
        let params = self.params().await;
        let rows_per_tile = self.rows_per_tile();
        let resident: Vec<usize> = self
            .cache
            .resident_indices(&self.source, self.tile_size(params.fft_size))
            .await
            .into_iter()
            .map(|tile| tile * rows_per_tile)
            .collect();
        viewport::coverage_buckets(&resident, self.total_rows(params.fft_size), buckets)
    }

    /// Annotation boxes overlapping the view that starts at `current_row`.
    pub async fn annotations_in_view(&self, current_row: usize) -> Vec<(String, AnnotationBox)> {
        let params = self.params().await;
        let window = SampleWindow {
            start: (current_row * params.fft_size) as u64,
            len: (params.spectrogram_height * params.fft_size * (params.fft_step_size + 1)) as u64,
        };
        let center = center_frequency(&self.meta);
        self.meta
            .annotations
            .iter()
            .filter_map(|a| {
                a.position(window, center, self.meta.global.sample_rate, params.fft_size, params.zoom_level)
                    .map(|b| (a.display_label().to_string(), b))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::colormap::{ColormapKind, NAN_SENTINEL};
    use crate::metadata::tests::fixture;
    use crate::tile_cache::tests::CountingClient;
    use std::time::Duration;

    fn engine_config() -> EngineConfig {
        EngineConfig {
            tile_rows: 1,
            fetch_padding: 0,
            minimap_fft_size: 16,
            minimap_rows: 50,
            max_cache_bytes: usize::MAX,
            min_handle_height: 5.0,
        }
    }

    fn params() -> RenderParams {
        RenderParams {
            fft_size: 64,
            window: WindowKind::Hamming,
            magnitude_min: -80.0,
            magnitude_max: -20.0,
            colormap: Colormap::new(ColormapKind::Viridis),
            fft_step_size: 0,
            spectrogram_height: 20,
            zoom_level: 1.0,
            taps: vec![1.0],
        }
    }

    fn session(client: Arc<CountingClient>) -> SpectrogramSession {
        SpectrogramSession::new(fixture("cf32_le", 100_000), client, engine_config(), params()).unwrap()
    }

    #[tokio::test]
    async fn test_render_frame_shape() {
        let client = Arc::new(CountingClient::default());
        let s = session(client.clone());
        let frame = s.render_frame(0, &CancelToken::new()).await.unwrap().unwrap();
        assert_eq!(frame.width, 64);
        assert_eq!(frame.height, 20);
        assert_eq!(frame.rows, (0..20).collect::<Vec<_>>());
        assert!(frame.missing_rows.is_empty());
        assert_eq!(frame.rgba.len(), 20 * 64 * 4);
        assert_eq!(client.calls(), 1);
    }

    #[tokio::test]
    async fn test_scrolling_reuses_rows() {
        let client = Arc::new(CountingClient::default());
        let s = session(client.clone());
        s.render_frame(0, &CancelToken::new()).await.unwrap();
        s.render_frame(5, &CancelToken::new()).await.unwrap();
        // only rows 20..25 are new
        assert_eq!(client.requested.lock().unwrap().last(), Some(&(20..25).collect::<Vec<_>>()));
        s.render_frame(0, &CancelToken::new()).await.unwrap();
        assert_eq!(client.calls(), 2);
    }

    #[tokio::test]
    async fn test_decimated_rows() {
        let client = Arc::new(CountingClient::default());
        let s = session(client);
        let mut p = params();
        p.fft_step_size = 1;
        s.apply_params(p).await.unwrap();
        let frame = s.render_frame(0, &CancelToken::new()).await.unwrap().unwrap();
        assert_eq!(frame.rows, (0..20).map(|i| i * 2).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_missing_tiles_render_as_gaps() {
        let client = Arc::new(CountingClient::default());
        client.missing.lock().unwrap().insert(3);
        let s = session(client);
        let frame = s.render_frame(0, &CancelToken::new()).await.unwrap().unwrap();
        assert_eq!(frame.missing_rows, vec![3]);
        let line = &frame.rgba[3 * 64 * 4..4 * 64 * 4];
        assert!(line.chunks(4).all(|px| px == NAN_SENTINEL));
    }

    #[tokio::test]
    async fn test_param_change_supersedes_running_pass() {
        let client = Arc::new(CountingClient::with_delay(Duration::from_millis(50)));
        let s = Arc::new(session(client));
        let pass = {
            let s = s.clone();
            tokio::spawn(async move { s.render_frame(0, &CancelToken::new()).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        let mut p = params();
        p.colormap = Colormap::new(ColormapKind::Jet);
        assert_eq!(s.apply_params(p).await.unwrap(), 1);
        assert_eq!(pass.await.unwrap().unwrap(), None);

        let frame = s.render_frame(0, &CancelToken::new()).await.unwrap().unwrap();
        assert_eq!(frame.generation, 1);
    }

    #[tokio::test]
    async fn test_cancelled_pass() {
        let client = Arc::new(CountingClient::with_delay(Duration::from_secs(10)));
        let s = session(client);
        let cancel = CancelToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });
        assert_eq!(s.render_frame(0, &cancel).await, Err(EngineError::Cancelled));
    }

    #[tokio::test]
    async fn test_out_of_range_row() {
        let s = session(Arc::new(CountingClient::default()));
        // 100_000 samples / 64 = 1563 rows
        assert_eq!(
            s.render_frame(1563, &CancelToken::new()).await,
            Err(EngineError::OutOfRange { index: 1563, total: 1563 })
        );
        let last = s.render_frame(1562, &CancelToken::new()).await.unwrap().unwrap();
        assert_eq!(last.rows, vec![1562]);
    }

    #[tokio::test]
    async fn test_fft_size_change_reuses_downloaded_tiles() {
        let client = Arc::new(CountingClient::default());
        let s = session(client.clone());
        s.render_frame(0, &CancelToken::new()).await.unwrap();

        let mut p = params();
        p.fft_size = 128;
        s.apply_params(p).await.unwrap();
        let source = s.meta().origin().unwrap().clone();
        assert_eq!(s.cache().resident_indices(&source, 128).await, (0..10).collect::<Vec<_>>());

        let frame = s.render_frame(0, &CancelToken::new()).await.unwrap().unwrap();
        assert_eq!(frame.width, 128);
        assert_eq!(client.requested.lock().unwrap().last(), Some(&(10..20).collect::<Vec<_>>()));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_frames_never_mix_fft_sizes_during_param_change() {
        let client = Arc::new(CountingClient::default());
        let s = Arc::new(session(client));
        s.render_frame(0, &CancelToken::new()).await.unwrap();

        let renders: Vec<_> = (0..16)
            .map(|_| {
                let s = s.clone();
                tokio::spawn(async move {
                    let mut frames = Vec::new();
                    for _ in 0..20 {
                        if let Some(frame) = s.render_frame(0, &CancelToken::new()).await.unwrap() {
                            frames.push(frame);
                        }
                        tokio::task::yield_now().await;
                    }
                    frames
                })
            })
            .collect();
        for fft_size in [128, 64, 256, 128] {
            let mut p = params();
            p.fft_size = fft_size;
            s.apply_params(p).await.unwrap();
            tokio::task::yield_now().await;
        }

        let sizes = [64, 128, 64, 256, 128];
        for handle in renders {
            for frame in handle.await.unwrap() {
                assert_eq!(frame.width, sizes[frame.generation as usize]);
                assert_eq!(frame.rgba.len(), frame.width * frame.height * 4);
                assert!(frame.missing_rows.is_empty());
            }
        }
    }

    #[tokio::test]
    async fn test_invalid_params_rejected() {
        let s = session(Arc::new(CountingClient::default()));
        let mut p = params();
        p.magnitude_min = 0.0;
        p.magnitude_max = -10.0;
        assert!(matches!(s.apply_params(p).await, Err(EngineError::InvalidParameter(_))));
        assert_eq!(s.generation(), 0);
    }

    #[tokio::test]
    async fn test_minimap_and_coverage() {
        let client = Arc::new(CountingClient::default());
        let s = session(client);
        let map = s.minimap(&CancelToken::new()).await.unwrap();
        assert_eq!(map.width, 16);
        assert_eq!(map.height, 50);
        assert_eq!(map.rgba.len(), 16 * 50 * 4);

        s.render_frame(0, &CancelToken::new()).await.unwrap();
        let cov = s.coverage(10).await;
        assert!(cov[0]);
        assert!(!cov[9]);
    }

    #[tokio::test]
    async fn test_viewport_and_annotations() {
        let s = session(Arc::new(CountingClient::default()));
        let vp = s.viewport(0.0, 800.0).await;
        assert_eq!(vp.lower_tile, 0);
        assert_eq!(vp.total_rows, 1563);

        let boxes = s.annotations_in_view(0).await;
        assert_eq!(boxes.len(), 1);
        assert_eq!(boxes[0].0, "burst");
        assert_eq!(boxes[0].1.y1, 16.0);
        assert!(s.annotations_in_view(1000).await.is_empty());
    }
}
