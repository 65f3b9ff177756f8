//! Re-slicing of already computed rows when the FFT size changes.
//!
//! Sizes must divide one another. Shrinking splits each row into
//! `current / new` rows. Growing concatenates `new / current` consecutive rows,
//! filling the segments of absent rows with NaN so callers can tell real
//! values from holes.

use crate::error::{EngineError, Result};
use std::borrow::Cow;

pub type Row = Vec<f32>;

/// Reshape FFT rows (one float per bin) from `current` to `new` bins.
pub fn reshape_ffts(current: usize, rows: &[Option<Row>], new: usize) -> Result<Cow<'_, [Option<Row>]>> {
    reshape_rows(current, rows, new, 1)
}

/// Reshape interleaved IQ rows (two floats per sample) from `current` to `new` samples.
pub fn reshape_iq_rows(current: usize, rows: &[Option<Row>], new: usize) -> Result<Cow<'_, [Option<Row>]>> {
    reshape_rows(current, rows, new, 2)
}

/// True when a reshaped row carries no NaN holes.
pub fn is_complete(row: &[f32]) -> bool {
    !row.iter().any(|v| v.is_nan())
}

fn reshape_rows(current: usize, rows: &[Option<Row>], new: usize, width: usize) -> Result<Cow<'_, [Option<Row>]>> {
    if current == 0 || new == 0 || (current % new != 0 && new % current != 0) {
        return Err(EngineError::SizeMismatch { current, requested: new });
    }
    if current == new {
        return Ok(Cow::Borrowed(rows));
    }

    if current > new {
        let factor = current / new;
        let seg = new * width;
        let mut out = Vec::with_capacity(rows.len() * factor);
        for row in rows {
            match row {
                Some(r) => out.extend((0..factor).map(|k| r.get(k * seg..(k + 1) * seg).map(<[f32]>::to_vec))),
                None => out.extend(std::iter::repeat(None).take(factor)),
            }
        }
        return Ok(Cow::Owned(out));
    }

    let factor = new / current;
    let seg = current * width;
    let out = rows
        .chunks(factor)
        .map(|group| {
            if group.iter().all(Option::is_none) {
                return None;
            }
            let mut merged = vec![f32::NAN; new * width];
            for (i, row) in group.iter().enumerate() {
                if let Some(r) = row {
                    let n = r.len().min(seg);
                    merged[i * seg..i * seg + n].copy_from_slice(&r[..n]);
                }
            }
            Some(merged)
        })
        .collect();
    Ok(Cow::Owned(out))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dense(rows: usize, size: usize) -> Vec<Option<Row>> {
        (0..rows)
            .map(|r| Some((0..size).map(|c| (r * size + c) as f32).collect()))
            .collect()
    }

    #[test]
    fn test_same_size_borrows_input() {
        let data = dense(4, 16);
        let out = reshape_ffts(16, &data, 16).unwrap();
        assert!(matches!(out, Cow::Borrowed(_)));
        assert!(std::ptr::eq(out.as_ptr(), data.as_ptr()));
    }

    #[test]
    fn test_grow_is_lossless() {
        let data = dense(800, 128);
        let out = reshape_ffts(128, &data, 256).unwrap();
        assert_eq!(out.len(), 400);
        let flat_in: Vec<f32> = data.iter().flatten().flatten().copied().collect();
        let flat_out: Vec<f32> = out.iter().flatten().flatten().copied().collect();
        assert_eq!(flat_in, flat_out);
    }

    #[test]
    fn test_shrink_then_grow_round_trips() {
        let data = dense(10, 64);
        let small = reshape_ffts(64, &data, 16).unwrap().into_owned();
        assert_eq!(small.len(), 40);
        assert_eq!(small[5].as_ref().unwrap()[0], 80.0);
        let back = reshape_ffts(16, &small, 64).unwrap();
        assert_eq!(back.as_ref(), data.as_slice());
    }

    #[test]
    fn test_non_multiple_sizes_fail() {
        let data = dense(2, 16);
        assert_eq!(
            reshape_ffts(16, &data, 30).unwrap_err(),
            EngineError::SizeMismatch { current: 16, requested: 30 }
        );
        assert!(reshape_ffts(0, &data, 16).is_err());
    }

    #[test]
    fn test_sparse_grow_fills_holes_with_nan() {
        const F: usize = 32;
        let mut data = dense(8, F);
        data[1] = None;
        data[3] = None;
        for row in data.iter_mut().skip(4) {
            *row = None;
        }
        let out = reshape_ffts(F, &data, 4 * F).unwrap();
        assert_eq!(out.len(), 2);
        let first = out[0].as_ref().unwrap();
        assert_eq!(first[0], data[0].as_ref().unwrap()[0]);
        assert!(first[F].is_nan());
        assert_eq!(first[2 * F], data[2].as_ref().unwrap()[0]);
        assert!(!is_complete(first));
        assert!(out[1].is_none());
    }

    #[test]
    fn test_sparse_shrink_keeps_absence() {
        let data = vec![None, Some(vec![1.0; 8])];
        let out = reshape_ffts(8, &data, 4).unwrap();
        assert_eq!(out.len(), 4);
        assert!(out[0].is_none() && out[1].is_none());
        assert_eq!(out[2].as_deref(), Some(&[1.0; 4][..]));
    }

    #[test]
    fn test_iq_rows_use_two_floats_per_sample() {
        let data = dense(4, 8);
        let out = reshape_iq_rows(4, &data, 8).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].as_ref().unwrap().len(), 16);
        assert!(is_complete(out[1].as_ref().unwrap()));
        assert_eq!(out[1].as_ref().unwrap()[0], 16.0);
    }
}
