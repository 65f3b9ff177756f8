//! Storage backend contracts shared by the local, API and blob clients.

use crate::config::DataSourceConfig;
use crate::error::{EngineError, Result};
use crate::grouping::IndexRun;
use crate::local::LocalFileClient;
use crate::metadata::{Datatype, SigMFMetadata, TraceabilityOrigin};
use crate::remote::{ApiClient, BlobClient};
use crate::samples::decode_iq;
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// Identity of one recording in one backend. Two open recordings never share
/// tile cache entries because this is part of every key.
pub type SourceKey = TraceabilityOrigin;

/// One fetched tile worth of interleaved I/Q.
#[derive(Debug, Clone, PartialEq)]
pub struct IqBlock {
    pub index: usize,
    pub iq: Arc<[f32]>,
}

/// Fetches raw samples for tile ranges.
///
/// Implementations return only the blocks that exist (a tile past the end of
/// the data is simply absent), fail with `NotFound` when the backing object is
/// missing, and return `Cancelled` promptly once `cancel` fires. An empty
/// `indices` slice resolves to an empty vec without I/O.
pub trait DataSourceClient: Send + Sync {
    fn get_iq_data_blocks<'a>(
        &'a self,
        meta: &'a SigMFMetadata,
        indices: &'a [usize],
        tile_size: usize,
        cancel: &'a CancelToken,
    ) -> BoxFuture<'a, Result<Vec<IqBlock>>>;
}

/// Loads and parses the `.sigmf-meta` half of a recording.
pub trait MetadataSource: Send + Sync {
    fn get_meta<'a>(&'a self, origin: &'a TraceabilityOrigin) -> BoxFuture<'a, Result<SigMFMetadata>>;
}

// ── Cancellation ────────────────────────────────────────────────────────────

#[derive(Default)]
struct CancelState {
    cancelled: AtomicBool,
    notify: Notify,
}

/// Cloneable cancellation flag passed explicitly into every fetch.
#[derive(Clone, Default)]
pub struct CancelToken {
    state: Arc<CancelState>,
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.state.cancelled.store(true, Ordering::SeqCst);
        self.state.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::SeqCst)
    }

    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(EngineError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Resolves once `cancel` has been called.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.state.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }

    /// Run `fut` unless the token fires first.
    pub async fn guard<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.check()?;
        tokio::select! {
            biased;
            _ = self.cancelled() => Err(EngineError::Cancelled),
            res = fut => res,
        }
    }
}

// ── Helpers shared by backends ──────────────────────────────────────────────

/// Cut the bytes of one contiguous run into per-tile blocks. The last block may
/// be short; tiles past the end of `bytes` are omitted.
pub(crate) fn split_run(bytes: &[u8], run: IndexRun, tile_size: usize, datatype: Datatype) -> Vec<IqBlock> {
    let tile_bytes = tile_size * datatype.bytes_per_sample();
    bytes
        .chunks(tile_bytes.max(1))
        .take(run.count)
        .enumerate()
        .filter(|(_, chunk)| chunk.len() >= datatype.bytes_per_sample())
        .map(|(k, chunk)| IqBlock {
            index: run.start + k,
            iq: Arc::from(decode_iq(chunk, datatype)),
        })
        .collect()
}

pub(crate) fn run_byte_range(run: IndexRun, tile_size: usize, bytes_per_sample: usize) -> (u64, u64) {
    let tile_bytes = (tile_size * bytes_per_sample) as u64;
    (run.start as u64 * tile_bytes, run.count as u64 * tile_bytes)
}

/// Build the IQ client for an origin `type` (`local`, `api`, `azure_blob`).
pub fn client_for(kind: &str, cfg: &DataSourceConfig) -> Result<Arc<dyn DataSourceClient>> {
    Ok(match kind {
        "local" => Arc::new(LocalFileClient::new(&cfg.local_root)),
        "api" => Arc::new(ApiClient::new(cfg)?),
        "azure_blob" | "blob" => Arc::new(BlobClient::new(cfg)?),
        other => {
            return Err(EngineError::InvalidParameter(format!("unknown data source type: {other}")));
        }
    })
}

pub fn metadata_source_for(kind: &str, cfg: &DataSourceConfig) -> Result<Arc<dyn MetadataSource>> {
    Ok(match kind {
        "local" => Arc::new(LocalFileClient::new(&cfg.local_root)),
        "api" => Arc::new(ApiClient::new(cfg)?),
        "azure_blob" | "blob" => Arc::new(BlobClient::new(cfg)?),
        other => {
            return Err(EngineError::InvalidParameter(format!("unknown data source type: {other}")));
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_guard_returns_cancelled() {
        let token = CancelToken::new();
        let waiter = token.clone();
        let handle = tokio::spawn(async move {
            waiter
                .guard(async {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Ok(())
                })
                .await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel();
        let res = tokio::time::timeout(Duration::from_secs(2), handle).await;
        assert_eq!(res.unwrap().unwrap(), Err(EngineError::Cancelled));
    }

    #[tokio::test]
    async fn test_guard_passes_result_through() {
        let token = CancelToken::new();
        assert_eq!(token.guard(async { Ok(7) }).await, Ok(7));
        token.cancel();
        assert_eq!(token.guard(async { Ok(7) }).await, Err(EngineError::Cancelled));
    }

    #[test]
    fn test_split_run_handles_short_tail() {
        let dt = Datatype::parse("cf32_le").unwrap();
        let samples: Vec<f32> = (0..10).map(|v| v as f32).collect();
        let bytes: Vec<u8> = samples.iter().flat_map(|v| v.to_le_bytes()).collect();
        // 5 complex samples, tiles of 2 samples: two full tiles and one single-sample tail
        let blocks = split_run(&bytes, IndexRun { start: 4, count: 4 }, 2, dt);
        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[0].index, 4);
        assert_eq!(&blocks[1].iq[..], &[4.0, 5.0, 6.0, 7.0]);
        assert_eq!(&blocks[2].iq[..], &[8.0, 9.0]);
    }

    #[test]
    fn test_unknown_kind_is_rejected() {
        let cfg = DataSourceConfig::default();
        assert!(client_for("ftp", &cfg).is_err());
        assert!(client_for("local", &cfg).is_ok());
    }
}
