//! SigMF metadata model.
//!
//! The structs are plain data mirroring the `.sigmf-meta` JSON layout; all
//! derivations (sample counts, time and frequency arithmetic) are free
//! functions over them.

use crate::error::{EngineError, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

pub const DATA_EXTENSION: &str = ".sigmf-data";
pub const META_EXTENSION: &str = ".sigmf-meta";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SigMFMetadata {
    pub global: Global,
    #[serde(default)]
    pub captures: Vec<CaptureSegment>,
    #[serde(default)]
    pub annotations: Vec<Annotation>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Global {
    #[serde(rename = "core:datatype")]
    pub datatype: String,
    #[serde(rename = "core:sample_rate")]
    pub sample_rate: f64,
    #[serde(rename = "core:version", default)]
    pub version: String,
    #[serde(rename = "core:offset", default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,
    #[serde(rename = "core:description", default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "core:author", default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(rename = "core:num_channels", default, skip_serializing_if = "Option::is_none")]
    pub num_channels: Option<u32>,
    #[serde(rename = "core:extensions", default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Vec<Value>>,
    #[serde(rename = "traceability:origin", default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<TraceabilityOrigin>,
    #[serde(rename = "traceability:sample_length", default, skip_serializing_if = "Option::is_none")]
    pub sample_length: Option<u64>,
    /// Keys this crate does not interpret, kept so re-serialisation is lossless.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TraceabilityOrigin {
    #[serde(rename = "type", default = "default_origin_type")]
    pub kind: String,
    #[serde(default)]
    pub account: String,
    #[serde(default)]
    pub container: String,
    #[serde(default)]
    pub file_path: String,
}

fn default_origin_type() -> String {
    "local".to_string()
}

impl TraceabilityOrigin {
    pub fn canonical_path(&self) -> String {
        format!("{}/{}/{}", self.account, self.container, self.file_path)
    }

    /// Name of the data half of the SigMF pair.
    pub fn data_file_path(&self) -> String {
        with_extension(&self.file_path, DATA_EXTENSION)
    }

    pub fn meta_file_path(&self) -> String {
        with_extension(&self.file_path, META_EXTENSION)
    }
}

fn with_extension(path: &str, ext: &str) -> String {
    let base = path
        .strip_suffix(DATA_EXTENSION)
        .or_else(|| path.strip_suffix(META_EXTENSION))
        .unwrap_or(path);
    format!("{base}{ext}")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureSegment {
    #[serde(rename = "core:sample_start")]
    pub sample_start: u64,
    #[serde(rename = "core:frequency", default, skip_serializing_if = "Option::is_none")]
    pub frequency: Option<f64>,
    #[serde(rename = "core:datetime", default, skip_serializing_if = "Option::is_none")]
    pub datetime: Option<String>,
    #[serde(rename = "core:global_index", default, skip_serializing_if = "Option::is_none")]
    pub global_index: Option<u64>,
    #[serde(rename = "core:header_bytes", default, skip_serializing_if = "Option::is_none")]
    pub header_bytes: Option<u64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    #[serde(rename = "core:sample_start")]
    pub sample_start: u64,
    #[serde(rename = "core:sample_count", default)]
    pub sample_count: u64,
    #[serde(rename = "core:freq_lower_edge", default, skip_serializing_if = "Option::is_none")]
    pub freq_lower_edge: Option<f64>,
    #[serde(rename = "core:freq_upper_edge", default, skip_serializing_if = "Option::is_none")]
    pub freq_upper_edge: Option<f64>,
    #[serde(rename = "core:label", default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(rename = "core:description", default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "core:generator", default, skip_serializing_if = "Option::is_none")]
    pub generator: Option<String>,
    #[serde(rename = "core:comment", default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(rename = "core:uuid", default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Contiguous sample span currently backed by resident tiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleWindow {
    pub start: u64,
    pub len: u64,
}

/// Annotation box in spectrogram coordinates: x in FFT bins, y in display rows.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnnotationBox {
    pub x1: f64,
    pub x2: f64,
    pub y1: f64,
    pub y2: f64,
}

impl Annotation {
    pub fn display_label(&self) -> &str {
        self.label
            .as_deref()
            .or(self.description.as_deref())
            .unwrap_or("")
    }

    /// Place the annotation inside `window`, or `None` when it does not overlap.
    /// Missing frequency edges default to the full captured band.
    pub fn position(
        &self,
        window: SampleWindow,
        center_frequency: f64,
        sample_rate: f64,
        fft_size: usize,
        zoom_level: f64,
    ) -> Option<AnnotationBox> {
        let stop = window.start.saturating_add(window.len);
        let end = self.sample_start.saturating_add(self.sample_count);
        if self.sample_start >= stop || end < window.start {
            return None;
        }
        let lower_freq = center_frequency - sample_rate / 2.0;
        let lower_edge = self.freq_lower_edge.unwrap_or(lower_freq);
        let upper_edge = self.freq_upper_edge.unwrap_or(center_frequency + sample_rate / 2.0);
        let fft = fft_size as f64;
        let offset = self.sample_start as f64 - window.start as f64;
        Some(AnnotationBox {
            x1: (lower_edge - lower_freq) / sample_rate * fft,
            x2: (upper_edge - lower_freq) / sample_rate * fft,
            y1: offset / fft / zoom_level,
            y2: (offset + self.sample_count as f64) / fft / zoom_level,
        })
    }
}

// ── Datatypes ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleFormat {
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    F32,
    F64,
}

impl SampleFormat {
    pub fn component_bytes(self) -> usize {
        match self {
            SampleFormat::I8 | SampleFormat::U8 => 1,
            SampleFormat::I16 | SampleFormat::U16 => 2,
            SampleFormat::I32 | SampleFormat::U32 | SampleFormat::F32 => 4,
            SampleFormat::F64 => 8,
        }
    }
}

/// Parsed `core:datatype`, e.g. `cf32_le` or `ri16_be`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Datatype {
    pub complex: bool,
    pub format: SampleFormat,
    pub big_endian: bool,
}

impl Datatype {
    pub fn parse(s: &str) -> Result<Self> {
        let invalid = || EngineError::InvalidDatatype(s.to_string());
        let (complex, rest) = match s.as_bytes().first() {
            Some(b'c') => (true, &s[1..]),
            Some(b'r') => (false, &s[1..]),
            _ => return Err(invalid()),
        };
        let (body, big_endian) = if let Some(b) = rest.strip_suffix("_le") {
            (b, false)
        } else if let Some(b) = rest.strip_suffix("_be") {
            (b, true)
        } else {
            (rest, false)
        };
        let format = match body {
            "i8" => SampleFormat::I8,
            "u8" => SampleFormat::U8,
            "i16" => SampleFormat::I16,
            "u16" => SampleFormat::U16,
            "i32" => SampleFormat::I32,
            "u32" => SampleFormat::U32,
            "f32" => SampleFormat::F32,
            "f64" => SampleFormat::F64,
            _ => return Err(invalid()),
        };
        Ok(Datatype { complex, format, big_endian })
    }

    pub fn components(&self) -> usize {
        if self.complex { 2 } else { 1 }
    }

    pub fn bytes_per_sample(&self) -> usize {
        self.format.component_bytes() * self.components()
    }
}

impl FromStr for Datatype {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        Datatype::parse(s)
    }
}

impl fmt::Display for Datatype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let body = match self.format {
            SampleFormat::I8 => "i8",
            SampleFormat::U8 => "u8",
            SampleFormat::I16 => "i16",
            SampleFormat::U16 => "u16",
            SampleFormat::I32 => "i32",
            SampleFormat::U32 => "u32",
            SampleFormat::F32 => "f32",
            SampleFormat::F64 => "f64",
        };
        let kind = if self.complex { "c" } else { "r" };
        let endian = if self.big_endian { "_be" } else { "_le" };
        write!(f, "{kind}{body}{endian}")
    }
}

// ── Parsing & validation ────────────────────────────────────────────────────

impl SigMFMetadata {
    pub fn from_json(json: &str) -> Result<Self> {
        let meta: SigMFMetadata = serde_json::from_str(json)?;
        meta.validate()?;
        Ok(meta)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn datatype(&self) -> Result<Datatype> {
        Datatype::parse(&self.global.datatype)
    }

    pub fn origin(&self) -> Result<&TraceabilityOrigin> {
        self.global
            .origin
            .as_ref()
            .ok_or_else(|| EngineError::InvalidMetadata("missing traceability:origin".into()))
    }

    pub fn validate(&self) -> Result<()> {
        self.datatype()?;
        let rate = self.global.sample_rate;
        if !(rate.is_finite() && rate > 0.0) {
            return Err(EngineError::InvalidMetadata(format!("sample rate must be positive, got {rate}")));
        }
        for pair in self.captures.windows(2) {
            if pair[1].sample_start <= pair[0].sample_start {
                return Err(EngineError::InvalidMetadata(format!(
                    "captures out of order at sample {}",
                    pair[1].sample_start
                )));
            }
        }
        for capture in &self.captures {
            if let Some(dt) = &capture.datetime {
                parse_instant(dt)?;
            }
        }
        let total = total_samples(self);
        for a in &self.annotations {
            let end = a.sample_start.checked_add(a.sample_count).ok_or_else(|| {
                EngineError::InvalidMetadata(format!(
                    "annotation at sample {} with {} samples overflows",
                    a.sample_start, a.sample_count
                ))
            })?;
            if total > 0 && end > total {
                return Err(EngineError::InvalidMetadata(format!(
                    "annotation at sample {} runs past the end of the recording ({total} samples)",
                    a.sample_start
                )));
            }
        }
        Ok(())
    }
}

// ── Derivations ─────────────────────────────────────────────────────────────

pub fn total_samples(meta: &SigMFMetadata) -> u64 {
    meta.global.sample_length.unwrap_or(0)
}

pub fn bytes_per_sample(meta: &SigMFMetadata) -> Result<usize> {
    Ok(meta.datatype()?.bytes_per_sample())
}

/// Number of whole samples held in `byte_len` bytes of data file.
pub fn samples_in_bytes(meta: &SigMFMetadata, byte_len: u64) -> Result<u64> {
    Ok(byte_len / bytes_per_sample(meta)? as u64)
}

/// First capture frequency, 0 when no capture carries one.
pub fn center_frequency(meta: &SigMFMetadata) -> f64 {
    meta.captures
        .iter()
        .find_map(|c| c.frequency)
        .unwrap_or(0.0)
}

pub fn frequency_range(meta: &SigMFMetadata) -> (f64, f64) {
    let center = meta
        .captures
        .first()
        .and_then(|c| c.frequency)
        .unwrap_or(0.0);
    let half = meta.global.sample_rate / 2.0;
    (center - half, center + half)
}

pub fn duration_seconds(meta: &SigMFMetadata) -> f64 {
    total_samples(meta) as f64 / meta.global.sample_rate
}

pub(crate) fn parse_instant(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| EngineError::InvalidDate(format!("{s}: {e}")))
}

fn capture_start(capture: &CaptureSegment) -> Result<DateTime<Utc>> {
    let s = capture
        .datetime
        .as_deref()
        .ok_or_else(|| EngineError::InvalidDate("capture has no core:datetime".into()))?;
    parse_instant(s)
}

/// Instant of sample `n` counted from the start of `capture`.
pub fn sample_to_time(capture: &CaptureSegment, n: f64, sample_rate: f64) -> Result<DateTime<Utc>> {
    let start = capture_start(capture)?;
    let nanos = (n / sample_rate * 1e9).round() as i64;
    Ok(start + Duration::nanoseconds(nanos))
}

/// Fractional sample offset of `t` from the start of `capture`.
pub fn time_to_sample(capture: &CaptureSegment, t: DateTime<Utc>, sample_rate: f64) -> Result<f64> {
    let start = capture_start(capture)?;
    let nanos = (t - start)
        .num_nanoseconds()
        .ok_or_else(|| EngineError::InvalidDate(format!("{t} is too far from capture start")))?;
    Ok(nanos as f64 * sample_rate / 1e9)
}
