//! Human-readable units and timestamp arithmetic for recordings.

use crate::error::{EngineError, Result};
use crate::metadata::parse_instant;
use chrono::{DateTime, Duration, Timelike, Utc};
use std::fmt;

/// Number of decimal digits in the rounded integer part, sign included.
fn digit_len(value: f64) -> usize {
    (value.round() as i64).to_string().len()
}

/// Express a frequency in Hz with the most fitting prefix.
/// MHz values are rounded to the nearest kHz first.
pub fn unit_prefix_hz(freq: f64) -> (f64, &'static str) {
    if !freq.is_finite() || freq == 0.0 {
        return (0.0, "Hz");
    }
    let freq = freq.round();
    let len = digit_len(freq);
    if len >= 10 {
        (freq / 1e9, "GHz")
    } else if len >= 7 {
        ((freq / 1e3).round() * 1e3 / 1e6, "MHz")
    } else if len >= 4 {
        (freq / 1e3, "kHz")
    } else {
        (freq, "Hz")
    }
}

/// Inverse of [`unit_prefix_hz`]; unknown units are treated as Hz.
pub fn unit_prefix_hz_inverse(freq: f64, unit: &str) -> f64 {
    if !freq.is_finite() || freq == 0.0 {
        return 0.0;
    }
    let scale = match unit {
        "GHz" => 1e9,
        "MHz" => 1e6,
        "kHz" => 1e3,
        _ => 1.0,
    };
    (freq * scale).round()
}

/// Express a duration in seconds as ms, us, ns or ps.
pub fn unit_prefix_seconds(seconds: f64) -> (f64, &'static str) {
    let pico = (seconds * 1e12).round();
    let len = digit_len(pico);
    if len >= 10 {
        (pico / 1e9, "ms")
    } else if len >= 7 {
        (pico / 1e6, "us")
    } else if len >= 4 {
        (pico / 1e3, "ns")
    } else {
        (pico, "ps")
    }
}

/// Express a sample count with a k/M/B suffix.
pub fn unit_prefix_samples(samples: f64) -> (f64, &'static str) {
    if !samples.is_finite() || samples == 0.0 {
        return (0.0, "");
    }
    let samples = samples.round();
    let len = digit_len(samples);
    if len >= 10 {
        (samples / 1e9, "B")
    } else if len >= 7 {
        ((samples / 1e3).round() * 1e3 / 1e6, "M")
    } else if len >= 4 {
        (samples / 1e3, "k")
    } else {
        (samples, "")
    }
}

/// ISO-8601 UTC with the fractional part trimmed of trailing zeros.
pub fn format_instant(t: DateTime<Utc>) -> String {
    let base = t.format("%Y-%m-%dT%H:%M:%S").to_string();
    let nanos = t.nanosecond() % 1_000_000_000;
    if nanos == 0 {
        return format!("{base}Z");
    }
    let frac = format!("{nanos:09}");
    format!("{base}.{}Z", frac.trim_end_matches('0'))
}

/// Timestamp of the sample `count` samples after `start`.
pub fn calculate_date(start: &str, count: f64, sample_rate: f64) -> Result<String> {
    let start = parse_instant(start)?;
    let nanos = (count / sample_rate * 1e9).round() as i64;
    Ok(format_instant(start + Duration::nanoseconds(nanos)))
}

/// Fractional number of samples between `start` and `current`.
pub fn calculate_sample_count(start: &str, current: &str, sample_rate: f64) -> Result<f64> {
    let start = parse_instant(start)?;
    let current = parse_instant(current)?;
    let nanos = (current - start)
        .num_nanoseconds()
        .ok_or_else(|| EngineError::InvalidDate("interval overflows nanoseconds".into()))?;
    Ok(nanos as f64 * sample_rate / 1e9)
}

#[derive(Debug, Clone, PartialEq)]
pub enum RangeViolation {
    InvalidFrequency,
    BelowMinimumFrequency,
    AboveMaximumFrequency,
    InvalidDate,
    BeforeStart,
    AfterEnd,
}

impl fmt::Display for RangeViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            RangeViolation::InvalidFrequency => "Invalid frequency",
            RangeViolation::BelowMinimumFrequency => {
                "Frequency must be greater than the minimum frequency of the file"
            }
            RangeViolation::AboveMaximumFrequency => {
                "Frequency must be less than the maximum frequency of the file"
            }
            RangeViolation::InvalidDate => "Invalid date",
            RangeViolation::BeforeStart => "Date must be after start of the file",
            RangeViolation::AfterEnd => "Date must be before end of the file",
        };
        f.write_str(msg)
    }
}

pub fn validate_frequency(value: f64, min: f64, max: f64) -> std::result::Result<(), RangeViolation> {
    if !value.is_finite() {
        return Err(RangeViolation::InvalidFrequency);
    }
    if value < min {
        return Err(RangeViolation::BelowMinimumFrequency);
    }
    if value > max {
        return Err(RangeViolation::AboveMaximumFrequency);
    }
    Ok(())
}

/// Check `current` lies within `[start, end]`, compared at microsecond precision.
pub fn validate_date(current: &str, start: &str, end: &str) -> std::result::Result<(), RangeViolation> {
    let parse = |s: &str| parse_instant(s).map_err(|_| RangeViolation::InvalidDate);
    let (current, start, end) = (parse(current)?, parse(start)?, parse(end)?);
    if current.timestamp_micros() < start.timestamp_micros() {
        return Err(RangeViolation::BeforeStart);
    }
    if current.timestamp_micros() > end.timestamp_micros() {
        return Err(RangeViolation::AfterEnd);
    }
    Ok(())
}
