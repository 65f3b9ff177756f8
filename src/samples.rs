//! Raw sample decoding and light pre-FFT processing.

use crate::error::{EngineError, Result};
use crate::metadata::{Datatype, SampleFormat};
use base64::{engine::general_purpose, Engine as _};

/// Decode raw data-file bytes into interleaved I/Q `f32`.
///
/// Integer formats are scaled to roughly `[-1, 1)`; unsigned formats are
/// offset-binary. Real datatypes produce `Q = 0`. A trailing partial sample is
/// ignored.
pub fn decode_iq(bytes: &[u8], datatype: Datatype) -> Vec<f32> {
    let width = datatype.format.component_bytes();
    let components: Vec<f32> = bytes
        .chunks_exact(width)
        .map(|c| decode_component(c, datatype.format, datatype.big_endian))
        .collect();

    if datatype.complex {
        let whole = components.len() / 2 * 2;
        let mut out = components;
        out.truncate(whole);
        out
    } else {
        let mut out = Vec::with_capacity(components.len() * 2);
        for v in components {
            out.push(v);
            out.push(0.0);
        }
        out
    }
}

fn decode_component(c: &[u8], format: SampleFormat, big_endian: bool) -> f32 {
    macro_rules! read {
        ($t:ty, $n:expr) => {{
            let mut b = [0u8; $n];
            b.copy_from_slice(c);
            if big_endian { <$t>::from_be_bytes(b) } else { <$t>::from_le_bytes(b) }
        }};
    }
    match format {
        SampleFormat::I8 => c[0] as i8 as f32 / 128.0,
        SampleFormat::U8 => (c[0] as f32 - 128.0) / 128.0,
        SampleFormat::I16 => read!(i16, 2) as f32 / 32_768.0,
        SampleFormat::U16 => (read!(u16, 2) as f32 - 32_768.0) / 32_768.0,
        SampleFormat::I32 => (read!(i32, 4) as f64 / 2_147_483_648.0) as f32,
        SampleFormat::U32 => ((read!(u32, 4) as f64 - 2_147_483_648.0) / 2_147_483_648.0) as f32,
        SampleFormat::F32 => read!(f32, 4),
        SampleFormat::F64 => read!(f64, 8) as f32,
    }
}

/// Convolve interleaved IQ with real FIR `taps` ("same" length output).
///
/// An even tap count is padded with a trailing zero so the filter stays
/// centred. A single tap of any value is a plain gain.
pub fn apply_taps(iq: &[f32], taps: &[f32]) -> Vec<f32> {
    if taps.is_empty() || (taps.len() == 1 && taps[0] == 1.0) {
        return iq.to_vec();
    }
    let mut taps = taps.to_vec();
    if taps.len() % 2 == 0 {
        taps.push(0.0);
    }
    let n = iq.len() / 2;
    let half = taps.len() / 2;
    let mut out = vec![0.0f32; n * 2];
    for i in 0..n {
        let (mut acc_i, mut acc_q) = (0.0f32, 0.0f32);
        for (k, &tap) in taps.iter().enumerate() {
            let Some(src) = (i + k).checked_sub(half) else {
                continue;
            };
            if src >= n {
                break;
            }
            acc_i += iq[src * 2] * tap;
            acc_q += iq[src * 2 + 1] * tap;
        }
        out[i * 2] = acc_i;
        out[i * 2 + 1] = acc_q;
    }
    out
}

/// Decode a base64 payload of raw data-file bytes, as returned by the
/// datasource API's slice endpoint, into interleaved I/Q.
pub fn decode_base64_iq(encoded: &str, datatype: Datatype) -> Result<Vec<f32>> {
    let bytes = general_purpose::STANDARD
        .decode(encoded.trim())
        .map_err(|e| EngineError::InvalidParameter(format!("bad base64 payload: {e}")))?;
    Ok(decode_iq(&bytes, datatype))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dt(s: &str) -> Datatype {
        Datatype::parse(s).unwrap()
    }

    #[test]
    fn test_decode_cf32() {
        let values = [0.5f32, -0.25, 1.0, 0.0];
        let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        assert_eq!(decode_iq(&bytes, dt("cf32_le")), values.to_vec());
    }

    #[test]
    fn test_decode_ci16_big_endian() {
        let bytes = [0x40, 0x00, 0xC0, 0x00];
        assert_eq!(decode_iq(&bytes, dt("ci16_be")), vec![0.5, -0.5]);
    }

    #[test]
    fn test_decode_unsigned_is_offset_binary() {
        assert_eq!(decode_iq(&[128, 0], dt("cu8")), vec![0.0, -1.0]);
    }

    #[test]
    fn test_decode_real_fills_quadrature_with_zero() {
        let bytes: Vec<u8> = [1.0f32, 2.0].iter().flat_map(|v| v.to_le_bytes()).collect();
        assert_eq!(decode_iq(&bytes, dt("rf32_le")), vec![1.0, 0.0, 2.0, 0.0]);
    }

    #[test]
    fn test_decode_drops_partial_sample() {
        let bytes: Vec<u8> = [1.0f32, 2.0, 3.0].iter().flat_map(|v| v.to_le_bytes()).collect();
        assert_eq!(decode_iq(&bytes, dt("cf32_le")).len(), 2);
    }

    #[test]
    fn test_identity_taps_leave_samples_unchanged() {
        let iq = vec![1.0, 2.0, 3.0, 4.0];
        assert_eq!(apply_taps(&iq, &[1.0]), iq);
    }

    #[test]
    fn test_moving_average_taps() {
        let iq = vec![3.0, 0.0, 3.0, 0.0, 3.0, 0.0];
        let out = apply_taps(&iq, &[1.0 / 3.0; 3]);
        assert!((out[2] - 3.0).abs() < 1e-6);
        assert!((out[0] - 2.0).abs() < 1e-6);
        assert!((out[4] - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_base64_payload_decodes_as_datatype() {
        let bytes: Vec<u8> = [0.5f32, -0.25, 1.0, 0.0].iter().flat_map(|v| v.to_le_bytes()).collect();
        let encoded = general_purpose::STANDARD.encode(&bytes);
        assert_eq!(decode_base64_iq(&encoded, dt("cf32_le")).unwrap(), vec![0.5, -0.25, 1.0, 0.0]);

        let encoded = general_purpose::STANDARD.encode([0x40u8, 0x00, 0xC0, 0x00]);
        assert_eq!(decode_base64_iq(&encoded, dt("ci16_be")).unwrap(), vec![0.5, -0.5]);

        assert!(matches!(
            decode_base64_iq("not base64!", dt("cf32_le")),
            Err(EngineError::InvalidParameter(_))
        ));
    }
}
