//! dB rows to RGBA through a 256-entry colormap.

use crate::error::{EngineError, Result};
use std::fmt;

/// Pixel written for NaN (missing) values.
pub const NAN_SENTINEL: [u8; 4] = [255, 255, 255, 255];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColormapKind {
    Viridis,
    Jet,
    Turbo,
    Gray,
}

#[derive(Clone)]
pub struct Colormap {
    kind: ColormapKind,
    table: Box<[[u8; 3]; 256]>,
}

impl fmt::Debug for Colormap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Colormap").field(&self.kind).finish()
    }
}

impl PartialEq for Colormap {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
    }
}

impl Colormap {
    pub fn new(kind: ColormapKind) -> Self {
        let mut table = Box::new([[0u8; 3]; 256]);
        for (i, entry) in table.iter_mut().enumerate() {
            let t = i as f32 / 255.0;
            let (r, g, b) = match kind {
                ColormapKind::Viridis => viridis(t),
                ColormapKind::Jet => jet(t),
                ColormapKind::Turbo => turbo(t),
                ColormapKind::Gray => (t, t, t),
            };
            *entry = [to_u8(r), to_u8(g), to_u8(b)];
        }
        Colormap { kind, table }
    }

    pub fn from_name(name: &str) -> Result<Self> {
        let kind = match name.to_ascii_lowercase().as_str() {
            "viridis" => ColormapKind::Viridis,
            "jet" => ColormapKind::Jet,
            "turbo" => ColormapKind::Turbo,
            "gray" | "grey" => ColormapKind::Gray,
            other => return Err(EngineError::InvalidParameter(format!("unknown colormap: {other}"))),
        };
        Ok(Colormap::new(kind))
    }

    pub fn kind(&self) -> ColormapKind {
        self.kind
    }

    pub fn color(&self, index: u8) -> [u8; 3] {
        self.table[index as usize]
    }
}

fn to_u8(v: f32) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0).round() as u8
}

fn viridis(t: f32) -> (f32, f32, f32) {
    (
        0.267 + 0.003 * t + 0.993 * t * t - 0.263 * t * t * t,
        0.004 + 0.874 * t - 0.523 * t * t + 0.645 * t * t * t,
        0.329 + 0.899 * t - 2.179 * t * t + 1.952 * t * t * t,
    )
}

fn jet(t: f32) -> (f32, f32, f32) {
    let r = if t < 0.35 {
        0.0
    } else if t < 0.66 {
        (t - 0.35) / 0.31
    } else if t < 0.89 {
        1.0
    } else {
        1.0 - (t - 0.89) / 0.11 * 0.5
    };
    let g = if t < 0.125 {
        0.0
    } else if t < 0.375 {
        (t - 0.125) / 0.25
    } else if t < 0.64 {
        1.0
    } else if t < 0.91 {
        1.0 - (t - 0.64) / 0.27
    } else {
        0.0
    };
    let b = if t < 0.11 {
        0.5 + t / 0.11 * 0.5
    } else if t < 0.34 {
        1.0
    } else if t < 0.65 {
        1.0 - (t - 0.34) / 0.31
    } else {
        0.0
    };
    (r, g, b)
}

// Polynomial fit of the Turbo colormap.
fn turbo(t: f32) -> (f32, f32, f32) {
    let poly = |c: [f32; 6]| c[0] + t * (c[1] + t * (c[2] + t * (c[3] + t * (c[4] + t * c[5]))));
    (
        poly([0.135_721_4, 4.615_392_6, -42.660_32, 132.131_08, -152.942_39, 59.286_38]),
        poly([0.091_402_61, 2.194_188_4, 4.842_966_6, -14.185_033, 4.277_298_5, 2.829_566]),
        poly([0.106_673_3, 12.641_946, -60.582_05, 110.362_77, -89.903_11, 27.348_25]),
    )
}

/// Colorize concatenated rows of `fft_size` dB values into RGBA.
///
/// Values are mapped linearly from `[min, max]` onto the 256 colormap entries
/// and clamped; NaN becomes [`NAN_SENTINEL`].
pub fn fft_to_rgb(values: &[f32], fft_size: usize, min: f32, max: f32, colormap: &Colormap) -> Result<Vec<u8>> {
    if !(min.is_finite() && max.is_finite()) || min >= max {
        return Err(EngineError::InvalidParameter(format!(
            "magnitude bounds must satisfy min < max, got [{min}, {max}]"
        )));
    }
    if fft_size == 0 || values.len() % fft_size != 0 {
        return Err(EngineError::InvalidParameter(format!(
            "{} values do not form whole rows of {fft_size}",
            values.len()
        )));
    }

    let scale = 255.0 / (max - min);
    let mut out = Vec::with_capacity(values.len() * 4);
    for &v in values {
        if v.is_nan() {
            out.extend_from_slice(&NAN_SENTINEL);
            continue;
        }
        let idx = ((v - min) * scale).round().clamp(0.0, 255.0) as u8;
        let [r, g, b] = colormap.color(idx);
        out.extend_from_slice(&[r, g, b, 255]);
    }
    Ok(out)
}

/// Finite min and max of `values`, widened when they coincide. `None` when
/// nothing is finite.
pub fn auto_bounds(values: &[f32]) -> Option<(f32, f32)> {
    let (lo, hi) = values
        .iter()
        .filter(|v| v.is_finite())
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    if lo > hi {
        return None;
    }
    if lo == hi {
        return Some((lo - 1.0, hi + 1.0));
    }
    Some((lo, hi))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_shape_and_alpha() {
        let cmap = Colormap::from_name("viridis").unwrap();
        let rows = vec![-80.0, -50.0, -20.0, 0.0, -100.0, -65.0];
        let rgba = fft_to_rgb(&rows, 3, -80.0, -20.0, &cmap).unwrap();
        assert_eq!(rgba.len(), rows.len() * 4);
        assert!(rgba.chunks(4).all(|px| px[3] == 255));
    }

    #[test]
    fn test_endpoints_and_clamping() {
        let cmap = Colormap::new(ColormapKind::Gray);
        let rgba = fft_to_rgb(&[-80.0, -20.0, -200.0, 10.0, -50.0], 5, -80.0, -20.0, &cmap).unwrap();
        assert_eq!(&rgba[0..4], &[0, 0, 0, 255]);
        assert_eq!(&rgba[4..8], &[255, 255, 255, 255]);
        assert_eq!(&rgba[8..12], &[0, 0, 0, 255]);
        assert_eq!(&rgba[12..16], &[255, 255, 255, 255]);
        // (30 / 60) * 255 = 127.5 rounds up
        assert_eq!(rgba[16], 128);
    }

    #[test]
    fn test_nan_uses_sentinel() {
        let cmap = Colormap::new(ColormapKind::Jet);
        let rgba = fft_to_rgb(&[f32::NAN, -80.0], 2, -80.0, -20.0, &cmap).unwrap();
        assert_eq!(&rgba[0..4], &NAN_SENTINEL);
        assert_eq!(&rgba[4..7], &cmap.color(0));
    }

    #[test]
    fn test_invalid_bounds_rejected() {
        let cmap = Colormap::new(ColormapKind::Turbo);
        assert!(matches!(
            fft_to_rgb(&[0.0], 1, -20.0, -20.0, &cmap),
            Err(EngineError::InvalidParameter(_))
        ));
        assert!(fft_to_rgb(&[0.0], 1, -10.0, -20.0, &cmap).is_err());
        assert!(fft_to_rgb(&[0.0, 1.0, 2.0], 2, -80.0, -20.0, &cmap).is_err());
    }

    #[test]
    fn test_colormaps_run_dark_to_bright() {
        let viridis = Colormap::new(ColormapKind::Viridis);
        assert!(viridis.color(0)[0] < viridis.color(255)[0]);
        let jet = Colormap::new(ColormapKind::Jet);
        assert!(jet.color(0)[2] > jet.color(0)[0]);
        assert!(jet.color(255)[0] > jet.color(255)[2]);
        assert!(Colormap::from_name("plasma").is_err());
    }

    #[test]
    fn test_auto_bounds() {
        assert_eq!(auto_bounds(&[-3.0, f32::NAN, 5.0, -1.0]), Some((-3.0, 5.0)));
        assert_eq!(auto_bounds(&[2.0, 2.0]), Some((1.0, 3.0)));
        assert_eq!(auto_bounds(&[f32::NAN]), None);
    }
}
