//! Tile-based spectrogram engine for SigMF recordings.
//!
//! A recording is read in fixed-size tiles of IQ samples through a
//! [`DataSourceClient`], cached with request coalescing in [`TileCache`], and
//! turned into colorized FFT rows by a [`SpectrogramSession`].

pub mod colormap;
pub mod config;
pub mod datasource;
pub mod decimate;
pub mod error;
pub mod fft;
pub mod grouping;
pub mod local;
pub mod metadata;
pub mod remote;
pub mod reshape;
pub mod samples;
pub mod session;
pub mod tile_cache;
pub mod units;
pub mod viewport;

pub use config::AppConfig;
pub use datasource::{CancelToken, DataSourceClient, IqBlock, MetadataSource};
pub use error::{EngineError, Result};
pub use local::LocalFileClient;
pub use metadata::SigMFMetadata;
pub use remote::{ApiClient, BlobClient};
pub use session::{Frame, RenderParams, SpectrogramSession};
pub use tile_cache::TileCache;
