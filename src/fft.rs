//! Windowed FFT rows in dB from interleaved IQ.

use crate::error::{EngineError, Result};
use crate::samples::apply_taps;
use rayon::prelude::*;
use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Power assigned to an all-zero bin instead of `-inf`.
pub const POWER_FLOOR_DB: f32 = -200.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WindowKind {
    Rectangular,
    Hann,
    Hamming,
    Bartlett,
    Blackman,
}

impl WindowKind {
    /// Symmetric window of `len` points.
    pub fn coefficients(self, len: usize) -> Vec<f32> {
        if len <= 1 {
            return vec![1.0; len];
        }
        let span = (len - 1) as f32;
        (0..len)
            .map(|n| {
                let phase = n as f32 * std::f32::consts::TAU / span;
                match self {
                    WindowKind::Rectangular => 1.0,
                    WindowKind::Hann => 0.5 - 0.5 * phase.cos(),
                    WindowKind::Hamming => 0.54 - 0.46 * phase.cos(),
                    WindowKind::Bartlett => 1.0 - (2.0 * n as f32 / span - 1.0).abs(),
                    WindowKind::Blackman => 0.42 - 0.5 * phase.cos() + 0.08 * (2.0 * phase).cos(),
                }
            })
            .collect()
    }
}

impl FromStr for WindowKind {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "nowindow" | "none" | "rectangular" => Ok(WindowKind::Rectangular),
            "hann" | "hanning" => Ok(WindowKind::Hann),
            "hamming" => Ok(WindowKind::Hamming),
            "bartlett" => Ok(WindowKind::Bartlett),
            "blackman" => Ok(WindowKind::Blackman),
            other => Err(EngineError::InvalidParameter(format!("unknown window function: {other}"))),
        }
    }
}

impl fmt::Display for WindowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WindowKind::Rectangular => "nowindow",
            WindowKind::Hann => "hann",
            WindowKind::Hamming => "hamming",
            WindowKind::Bartlett => "bartlett",
            WindowKind::Blackman => "blackman",
        };
        f.write_str(name)
    }
}

/// Move the DC bin to the middle of the row.
pub fn fft_shift<T>(row: &mut [T]) {
    let half = row.len() / 2;
    row.rotate_right(half);
}

/// Planned transform plus window for one FFT size.
#[derive(Clone)]
pub struct FftEngine {
    fft_size: usize,
    window: WindowKind,
    coefficients: Arc<[f32]>,
    taps: Arc<[f32]>,
    plan: Arc<dyn Fft<f32>>,
}

impl fmt::Debug for FftEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FftEngine")
            .field("fft_size", &self.fft_size)
            .field("window", &self.window)
            .field("taps", &self.taps.len())
            .finish()
    }
}

impl FftEngine {
    pub fn new(fft_size: usize, window: WindowKind, taps: &[f32]) -> Result<Self> {
        if fft_size == 0 {
            return Err(EngineError::InvalidParameter("fft size must be positive".into()));
        }
        let plan = FftPlanner::new().plan_fft_forward(fft_size);
        Ok(FftEngine {
            fft_size,
            window,
            coefficients: Arc::from(window.coefficients(fft_size)),
            taps: Arc::from(taps),
            plan,
        })
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    pub fn window(&self) -> WindowKind {
        self.window
    }

    /// One dB row per complete `fft_size` block of `iq`. A trailing partial
    /// block produces no row.
    pub fn compute_rows(&self, iq: &[f32]) -> Vec<Vec<f32>> {
        let filtered = apply_taps(iq, &self.taps);
        let mut buffer = vec![Complex::new(0.0f32, 0.0); self.fft_size];
        let mut scratch = vec![Complex::new(0.0f32, 0.0); self.plan.get_inplace_scratch_len()];
        filtered
            .chunks_exact(self.fft_size * 2)
            .map(|block| self.transform(block, &mut buffer, &mut scratch))
            .collect()
    }

    fn transform(&self, block: &[f32], buffer: &mut [Complex<f32>], scratch: &mut [Complex<f32>]) -> Vec<f32> {
        for ((slot, pair), &w) in buffer.iter_mut().zip(block.chunks_exact(2)).zip(self.coefficients.iter()) {
            *slot = Complex::new(pair[0] * w, pair[1] * w);
        }
        self.plan.process_with_scratch(buffer, scratch);

        let norm = self.fft_size as f32;
        let mut row: Vec<f32> = buffer
            .iter()
            .map(|c| {
                let power = (*c / norm).norm_sqr();
                if power > 0.0 {
                    (10.0 * power.log10()).max(POWER_FLOOR_DB)
                } else {
                    POWER_FLOOR_DB
                }
            })
            .collect();
        fft_shift(&mut row);
        row
    }

    /// Rows for many tiles at once, tiles processed in parallel.
    pub fn compute_tiles(&self, tiles: &[Arc<[f32]>]) -> Vec<Vec<Vec<f32>>> {
        tiles.par_iter().map(|iq| self.compute_rows(iq)).collect()
    }
}
