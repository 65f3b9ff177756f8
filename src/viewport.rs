//! Maps a minimap handle position onto the rows and tiles a view needs.

/// Everything the tile range depends on, captured at one instant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewportInput {
    /// Pixel offset of the handle's top edge within the minimap.
    pub handle_top: f64,
    pub minimap_height: f64,
    pub total_samples: u64,
    pub fft_size: usize,
    /// Samples per fetched tile, a multiple of `fft_size`.
    pub tile_size: usize,
    pub spectrogram_height: usize,
    pub zoom_level: f64,
    pub fft_step_size: usize,
    /// Extra rows fetched on each side of the view.
    pub padding_rows: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub lower_tile: usize,
    pub upper_tile: usize,
    pub top_row: usize,
    pub rows_visible: usize,
    pub total_rows: usize,
    pub total_tiles: usize,
    pub handle_top: f64,
    pub zoom_level: f64,
    pub spectrogram_height: usize,
    pub fft_step_size: usize,
}

impl Viewport {
    pub fn tiles(&self) -> std::ops::RangeInclusive<usize> {
        self.lower_tile..=self.upper_tile
    }
}

pub fn total_rows(total_samples: u64, fft_size: usize) -> usize {
    if fft_size == 0 {
        return 0;
    }
    total_samples.div_ceil(fft_size as u64) as usize
}

/// Padding in rows for `fft_size`, scaled from the 1024-point `base`.
pub fn fetch_padding_rows(base: usize, fft_size: usize) -> usize {
    if fft_size == 0 {
        return 0;
    }
    base * 1024 / fft_size
}

pub fn compute(input: &ViewportInput) -> Viewport {
    let total_rows = total_rows(input.total_samples, input.fft_size);
    let rows_per_tile = (input.tile_size / input.fft_size.max(1)).max(1);
    let total_tiles = total_rows.div_ceil(rows_per_tile);
    let zoom = if input.zoom_level > 0.0 { input.zoom_level } else { 1.0 };
    let rows_visible = (input.spectrogram_height as f64 / zoom).ceil() as usize;
    let rows_spanned = rows_visible * (input.fft_step_size + 1);

    let top_row = if input.minimap_height > 0.0 {
        ((input.handle_top / input.minimap_height).clamp(0.0, 1.0) * total_rows as f64).floor() as usize
    } else {
        0
    };

    let last_tile = total_tiles.saturating_sub(1);
    let lower_row = top_row.saturating_sub(input.padding_rows);
    let upper_row = top_row + rows_spanned + input.padding_rows;
    let lower_tile = (lower_row / rows_per_tile).min(last_tile);
    let upper_tile = upper_row.div_ceil(rows_per_tile).min(last_tile);

    Viewport {
        lower_tile,
        upper_tile,
        top_row,
        rows_visible,
        total_rows,
        total_tiles,
        handle_top: input.handle_top,
        zoom_level: zoom,
        spectrogram_height: input.spectrogram_height,
        fft_step_size: input.fft_step_size,
    }
}

/// Height of the minimap handle in pixels, never below `min_height`.
pub fn handle_height(
    spectrogram_height: usize,
    total_samples: u64,
    fft_size: usize,
    fft_step_size: usize,
    min_height: f64,
) -> f64 {
    let shown = total_samples as f64 / fft_size.max(1) as f64 / (fft_step_size + 1) as f64;
    if shown <= 0.0 {
        return min_height.max(spectrogram_height as f64);
    }
    let h = spectrogram_height as f64;
    (h * h / shown).max(min_height)
}

/// Top row for a click at `y` pixels, centring the handle on the click.
pub fn row_for_handle(y: f64, handle_height: f64, spectrogram_height: usize, total_rows: usize) -> usize {
    let h = spectrogram_height as f64;
    if h <= 0.0 {
        return 0;
    }
    let top = (y - handle_height / 2.0).clamp(0.0, (h - handle_height).max(0.0));
    (top * total_rows as f64 / h).floor() as usize
}

/// Which of `buckets` equal slices of the recording hold at least one resident row.
pub fn coverage_buckets(resident_rows: &[usize], total_rows: usize, buckets: usize) -> Vec<bool> {
    let mut out = vec![false; buckets];
    if total_rows == 0 || buckets == 0 {
        return out;
    }
    let width = total_rows as f64 / buckets as f64;
    for &row in resident_rows {
        let b = ((row as f64 / width).floor() as usize).min(buckets - 1);
        out[b] = true;
    }
    out
}
