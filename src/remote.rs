//! HTTP backends: the datasource API and direct cloud-blob range reads.

use crate::config::DataSourceConfig;
use crate::datasource::{run_byte_range, split_run, CancelToken, DataSourceClient, IqBlock, MetadataSource};
use crate::error::{EngineError, Result};
use crate::grouping::{group_contiguous_indexes, split_runs, IndexRun};
use crate::metadata::{samples_in_bytes, Datatype, SigMFMetadata, TraceabilityOrigin};
use crate::samples::decode_base64_iq;
use bytes::Bytes;
use futures::future::{try_join_all, BoxFuture};
use reqwest::header::{CONTENT_LENGTH, RANGE};
use reqwest::StatusCode;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

fn build_http(cfg: &DataSourceConfig) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(cfg.request_timeout_secs))
        .build()?)
}

/// Attach origin and derived fields to metadata fetched over the wire.
fn finish_meta(mut meta: SigMFMetadata, origin: &TraceabilityOrigin) -> Result<SigMFMetadata> {
    meta.global.origin = Some(origin.clone());
    meta.validate()?;
    Ok(meta)
}

// ── Datasource API ──────────────────────────────────────────────────────────

/// Client for `GET /api/datasources/{account}/{container}/{path}/iq-data`.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(cfg: &DataSourceConfig) -> Result<Self> {
        Ok(ApiClient {
            http: build_http(cfg)?,
            base_url: cfg.api_base_url.trim_end_matches('/').to_string(),
        })
    }

    fn recording_url(&self, origin: &TraceabilityOrigin) -> String {
        format!(
            "{}/api/datasources/{}/{}/{}",
            self.base_url, origin.account, origin.container, origin.file_path
        )
    }

    pub fn iq_url(&self, origin: &TraceabilityOrigin) -> String {
        format!("{}/iq-data", self.recording_url(origin))
    }

    pub fn meta_url(&self, origin: &TraceabilityOrigin) -> String {
        format!("{}/meta", self.recording_url(origin))
    }

    pub fn slice_url(&self, origin: &TraceabilityOrigin) -> String {
        format!("{}/iqslice", self.recording_url(origin))
    }

    /// Decoded IQ for `count` samples starting at sample `start`, for time-domain views.
    pub async fn iq_slice(&self, meta: &SigMFMetadata, start: u64, count: u64) -> Result<Vec<f32>> {
        let datatype = meta.datatype()?;
        let origin = meta.origin()?;
        let bps = datatype.bytes_per_sample() as u64;
        let resp = self
            .http
            .get(self.slice_url(origin))
            .query(&[
                ("offsetBytes", (start * bps).to_string()),
                ("countBytes", (count * bps).to_string()),
            ])
            .send()
            .await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Err(EngineError::NotFound(origin.canonical_path()));
        }
        let body = resp.error_for_status()?.bytes().await?;
        parse_iq_slice(&body, datatype)
    }

    async fn fetch(&self, meta: &SigMFMetadata, indices: &[usize], tile_size: usize) -> Result<Vec<IqBlock>> {
        let datatype = meta.datatype()?;
        let origin = meta.origin()?;
        let mut sorted = indices.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        let joined = sorted
            .iter()
            .map(|i| i.to_string())
            .collect::<Vec<_>>()
            .join(",");

        let url = self.iq_url(origin);
        tracing::debug!("GET {} ({} tiles of {} samples)", url, sorted.len(), tile_size);
        let resp = self
            .http
            .get(&url)
            .query(&[
                ("block_indexes_str", joined),
                ("block_size", tile_size.to_string()),
                ("format", datatype.to_string()),
            ])
            .send()
            .await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Err(EngineError::NotFound(origin.canonical_path()));
        }
        let body = resp.error_for_status()?.bytes().await?;
        Ok(split_api_response(&body, &sorted, tile_size, datatype))
    }

    async fn fetch_meta(&self, origin: &TraceabilityOrigin) -> Result<SigMFMetadata> {
        let resp = self.http.get(self.meta_url(origin)).send().await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Err(EngineError::NotFound(origin.canonical_path()));
        }
        let meta: SigMFMetadata = resp.error_for_status()?.json().await?;
        finish_meta(meta, origin)
    }
}

#[derive(Deserialize)]
struct IqSliceBody {
    data: String,
}

/// Slice responses carry the raw bytes base64-encoded as `{"data": "..."}`.
fn parse_iq_slice(body: &[u8], datatype: Datatype) -> Result<Vec<f32>> {
    let slice: IqSliceBody = serde_json::from_slice(body)?;
    decode_base64_iq(&slice.data, datatype)
}

/// The API streams the requested tiles back to back in ascending index order,
/// truncating at the end of the recording.
fn split_api_response(body: &[u8], sorted: &[usize], tile_size: usize, datatype: Datatype) -> Vec<IqBlock> {
    let tile_bytes = tile_size * datatype.bytes_per_sample();
    sorted
        .iter()
        .zip(body.chunks(tile_bytes.max(1)))
        .flat_map(|(&index, chunk)| split_run(chunk, IndexRun { start: index, count: 1 }, tile_size, datatype))
        .collect()
}

impl DataSourceClient for ApiClient {
    fn get_iq_data_blocks<'a>(
        &'a self,
        meta: &'a SigMFMetadata,
        indices: &'a [usize],
        tile_size: usize,
        cancel: &'a CancelToken,
    ) -> BoxFuture<'a, Result<Vec<IqBlock>>> {
        Box::pin(async move {
            if indices.is_empty() {
                return Ok(Vec::new());
            }
            cancel.guard(self.fetch(meta, indices, tile_size)).await
        })
    }
}

impl MetadataSource for ApiClient {
    fn get_meta<'a>(&'a self, origin: &'a TraceabilityOrigin) -> BoxFuture<'a, Result<SigMFMetadata>> {
        Box::pin(self.fetch_meta(origin))
    }
}

// ── Cloud blob ──────────────────────────────────────────────────────────────

/// Range reads straight from `https://{account}.blob.core.windows.net/{container}/{path}`.
#[derive(Debug, Clone)]
pub struct BlobClient {
    http: reqwest::Client,
    endpoint: Option<String>,
    sas_token: Option<Arc<str>>,
    max_tiles_per_request: usize,
}

impl BlobClient {
    pub fn new(cfg: &DataSourceConfig) -> Result<Self> {
        Ok(BlobClient {
            http: build_http(cfg)?,
            endpoint: cfg.blob_endpoint.as_ref().map(|e| e.trim_end_matches('/').to_string()),
            sas_token: cfg.blob_sas_token.as_deref().map(|t| Arc::from(t.trim_start_matches('?'))),
            max_tiles_per_request: cfg.max_tiles_per_request,
        })
    }

    /// Blob URL without credentials, safe to log.
    pub fn blob_url(&self, origin: &TraceabilityOrigin, name: &str) -> String {
        match &self.endpoint {
            Some(endpoint) => format!("{}/{}/{}", endpoint, origin.container, name),
            None => format!(
                "https://{}.blob.core.windows.net/{}/{}",
                origin.account, origin.container, name
            ),
        }
    }

    fn signed(&self, url: &str) -> String {
        match &self.sas_token {
            Some(sas) => format!("{url}?{sas}"),
            None => url.to_string(),
        }
    }

    async fn fetch_range(&self, url: &str, offset: u64, len: u64) -> Result<Bytes> {
        if len == 0 {
            return Ok(Bytes::new());
        }
        let resp = self
            .http
            .get(self.signed(url))
            .header(RANGE, format!("bytes={}-{}", offset, offset + len - 1))
            .send()
            .await?;
        match resp.status() {
            StatusCode::NOT_FOUND => Err(EngineError::NotFound(url.to_string())),
            StatusCode::RANGE_NOT_SATISFIABLE => Ok(Bytes::new()),
            _ => Ok(resp.error_for_status()?.bytes().await?),
        }
    }

    async fn fetch(&self, meta: &SigMFMetadata, indices: &[usize], tile_size: usize) -> Result<Vec<IqBlock>> {
        let datatype = meta.datatype()?;
        let url = self.blob_url(meta.origin()?, &meta.origin()?.data_file_path());
        let runs = split_runs(&group_contiguous_indexes(indices), self.max_tiles_per_request);
        tracing::debug!("fetching {} range(s) from {}", runs.len(), url);

        let url = url.as_str();
        let per_run = try_join_all(runs.iter().map(|&run| async move {
            let (offset, len) = run_byte_range(run, tile_size, datatype.bytes_per_sample());
            let bytes = self.fetch_range(url, offset, len).await?;
            Ok::<_, EngineError>(split_run(&bytes, run, tile_size, datatype))
        }))
        .await?;
        Ok(per_run.into_iter().flatten().collect())
    }

    async fn data_length(&self, url: &str) -> Result<u64> {
        let resp = self.http.head(self.signed(url)).send().await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Err(EngineError::NotFound(url.to_string()));
        }
        let resp = resp.error_for_status()?;
        resp.headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .ok_or_else(|| EngineError::Http(format!("{url}: missing content-length")))
    }

    async fn fetch_meta(&self, origin: &TraceabilityOrigin) -> Result<SigMFMetadata> {
        let url = self.blob_url(origin, &origin.meta_file_path());
        let resp = self.http.get(self.signed(&url)).send().await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Err(EngineError::NotFound(url));
        }
        let text = resp.error_for_status()?.text().await?;
        let mut meta: SigMFMetadata = serde_json::from_str(&text)?;
        if meta.global.sample_length.is_none() {
            let data_len = self
                .data_length(&self.blob_url(origin, &origin.data_file_path()))
                .await?;
            meta.global.sample_length = Some(samples_in_bytes(&meta, data_len)?);
        }
        finish_meta(meta, origin)
    }
}

impl DataSourceClient for BlobClient {
    fn get_iq_data_blocks<'a>(
        &'a self,
        meta: &'a SigMFMetadata,
        indices: &'a [usize],
        tile_size: usize,
        cancel: &'a CancelToken,
    ) -> BoxFuture<'a, Result<Vec<IqBlock>>> {
        Box::pin(async move {
            if indices.is_empty() {
                return Ok(Vec::new());
            }
            cancel.guard(self.fetch(meta, indices, tile_size)).await
        })
    }
}

impl MetadataSource for BlobClient {
    fn get_meta<'a>(&'a self, origin: &'a TraceabilityOrigin) -> BoxFuture<'a, Result<SigMFMetadata>> {
        Box::pin(self.fetch_meta(origin))
    }
}
