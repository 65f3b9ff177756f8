//! SigMF pairs on the local filesystem.

use crate::datasource::{run_byte_range, split_run, CancelToken, DataSourceClient, IqBlock, MetadataSource};
use crate::error::{EngineError, Result};
use crate::grouping::group_contiguous_indexes;
use crate::metadata::{samples_in_bytes, SigMFMetadata, TraceabilityOrigin, DATA_EXTENSION, META_EXTENSION};
use futures::future::BoxFuture;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

/// Reads `<root>/<file_path>.sigmf-meta` and `<root>/<file_path>.sigmf-data`.
#[derive(Debug, Clone)]
pub struct LocalFileClient {
    root: PathBuf,
}

impl LocalFileClient {
    pub fn new(root: impl AsRef<Path>) -> Self {
        LocalFileClient {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Origin for a recording given any path to one half of its SigMF pair.
    /// The client root becomes the recording's directory.
    pub fn for_recording(path: impl AsRef<Path>) -> (Self, TraceabilityOrigin) {
        let path = path.as_ref();
        let root = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let stem = name
            .strip_suffix(DATA_EXTENSION)
            .or_else(|| name.strip_suffix(META_EXTENSION))
            .unwrap_or(&name)
            .to_string();
        let origin = TraceabilityOrigin {
            kind: "local".to_string(),
            account: String::new(),
            container: String::new(),
            file_path: stem,
        };
        (LocalFileClient::new(root), origin)
    }

    fn data_path(&self, origin: &TraceabilityOrigin) -> PathBuf {
        self.root.join(origin.data_file_path())
    }

    fn meta_path(&self, origin: &TraceabilityOrigin) -> PathBuf {
        self.root.join(origin.meta_file_path())
    }

    async fn read_blocks(&self, meta: &SigMFMetadata, indices: &[usize], tile_size: usize) -> Result<Vec<IqBlock>> {
        let datatype = meta.datatype()?;
        let path = self.data_path(meta.origin()?);
        let mut file = File::open(&path)
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => EngineError::NotFound(path.display().to_string()),
                _ => EngineError::from(e),
            })?;

        let mut blocks = Vec::with_capacity(indices.len());
        for run in group_contiguous_indexes(indices) {
            let (offset, len) = run_byte_range(run, tile_size, datatype.bytes_per_sample());
            file.seek(SeekFrom::Start(offset)).await?;
            let mut buf = Vec::with_capacity(len as usize);
            (&mut file).take(len).read_to_end(&mut buf).await?;
            tracing::debug!(
                "read {} bytes for tiles {}..{} from {}",
                buf.len(),
                run.start,
                run.end(),
                path.display()
            );
            blocks.extend(split_run(&buf, run, tile_size, datatype));
        }
        Ok(blocks)
    }

    async fn read_meta(&self, origin: &TraceabilityOrigin) -> Result<SigMFMetadata> {
        let meta_path = self.meta_path(origin);
        let text = tokio::fs::read_to_string(&meta_path)
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => EngineError::NotFound(meta_path.display().to_string()),
                _ => EngineError::from(e),
            })?;
        let mut meta: SigMFMetadata = serde_json::from_str(&text)?;
        meta.global.origin = Some(origin.clone());

        if meta.global.sample_length.is_none() {
            let data_len = tokio::fs::metadata(self.data_path(origin)).await?.len();
            meta.global.sample_length = Some(samples_in_bytes(&meta, data_len)?);
        }
        meta.validate()?;
        tracing::info!(
            "loaded {} ({} samples, {})",
            meta_path.display(),
            meta.global.sample_length.unwrap_or(0),
            meta.global.datatype
        );
        Ok(meta)
    }
}

impl DataSourceClient for LocalFileClient {
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
            cancel.guard(self.read_blocks(meta, indices, tile_size)).await
        })
    }
}

impl MetadataSource for LocalFileClient {
    fn get_meta<'a>(&'a self, origin: &'a TraceabilityOrigin) -> BoxFuture<'a, Result<SigMFMetadata>> {
        Box::pin(self.read_meta(origin))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::metadata::tests::fixture_json;
    use anyhow::Result;
    use tempfile::TempDir;

    /// Write `capture.sigmf-{meta,data}` where sample `i` is `(i, -i)`.
    pub(crate) async fn write_recording(dir: &Path, samples: usize, with_length: bool) -> Result<()> {
        let mut json: serde_json::Value = serde_json::from_str(&fixture_json("cf32_le", samples as u64))?;
        if !with_length {
            if let Some(global) = json["global"].as_object_mut() {
                global.remove("traceability:sample_length");
            }
        }
        tokio::fs::write(dir.join("capture.sigmf-meta"), json.to_string()).await?;

        let bytes: Vec<u8> = (0..samples)
            .flat_map(|i| [i as f32, -(i as f32)])
            .flat_map(|v| v.to_le_bytes())
            .collect();
        tokio::fs::write(dir.join("capture.sigmf-data"), bytes).await?;
        Ok(())
    }

    fn origin() -> TraceabilityOrigin {
        TraceabilityOrigin {
            kind: "local".into(),
            account: "acct".into(),
            container: "recs".into(),
            file_path: "capture".into(),
        }
    }

    #[tokio::test]
    async fn test_meta_derives_sample_length() -> Result<()> {
        let dir = TempDir::new()?;
        write_recording(dir.path(), 4096, false).await?;
        let client = LocalFileClient::new(dir.path());
        let meta = client.get_meta(&origin()).await?;
        assert_eq!(meta.global.sample_length, Some(4096));
        assert_eq!(meta.origin()?, &origin());
        Ok(())
    }

    #[tokio::test]
    async fn test_reads_sparse_blocks_with_short_tail() -> Result<()> {
        let dir = TempDir::new()?;
        write_recording(dir.path(), 4096 + 10, true).await?;
        let client = LocalFileClient::new(dir.path());
        let meta = client.get_meta(&origin()).await?;

        let blocks = client
            .get_iq_data_blocks(&meta, &[4, 0, 1, 9], 1024, &CancelToken::new())
            .await?;
        let indices: Vec<usize> = blocks.iter().map(|b| b.index).collect();
        // tile 9 starts past the end of the data
        assert_eq!(indices, vec![0, 1, 4]);
        assert_eq!(blocks[1].iq[0], 1024.0);
        assert_eq!(blocks[1].iq[1], -1024.0);
        assert_eq!(blocks[2].iq.len(), 10 * 2);
        assert_eq!(blocks[2].iq[0], 4096.0);
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_file_is_not_found() -> Result<()> {
        let dir = TempDir::new()?;
        let client = LocalFileClient::new(dir.path());
        let err = client.get_meta(&origin()).await.unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));

        write_recording(dir.path(), 4096, true).await?;
        let meta = client.get_meta(&origin()).await?;
        tokio::fs::remove_file(dir.path().join("capture.sigmf-data")).await?;
        let err = client
            .get_iq_data_blocks(&meta, &[0], 1024, &CancelToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
        Ok(())
    }

    #[tokio::test]
    async fn test_empty_and_cancelled_requests() -> Result<()> {
        let dir = TempDir::new()?;
        write_recording(dir.path(), 4096, true).await?;
        let client = LocalFileClient::new(dir.path());
        let meta = client.get_meta(&origin()).await?;

        let cancel = CancelToken::new();
        assert!(client.get_iq_data_blocks(&meta, &[], 1024, &cancel).await?.is_empty());
        cancel.cancel();
        let err = client.get_iq_data_blocks(&meta, &[0], 1024, &cancel).await.unwrap_err();
        assert_eq!(err, EngineError::Cancelled);
        Ok(())
    }

    #[test]
    fn test_for_recording_splits_path() {
        let (client, origin) = LocalFileClient::for_recording("/data/rf/capture.sigmf-meta");
        assert_eq!(client.root(), Path::new("/data/rf"));
        assert_eq!(origin.file_path, "capture");
        let (client, _) = LocalFileClient::for_recording("capture.sigmf-data");
        assert_eq!(client.root(), Path::new("."));
    }
}
