use crate::colormap::Colormap;
use crate::error::EngineError;
use crate::fft::WindowKind;
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// FFT rows per fetched tile; a tile holds `fft_size * tile_rows` samples.
    #[serde(default = "default_tile_rows")]
    pub tile_rows: usize,
    /// Rows prefetched above and below the view at a 1024-point FFT.
    pub fetch_padding: usize,
    pub minimap_fft_size: usize,
    pub minimap_rows: usize,
    pub max_cache_bytes: usize,
    #[serde(default = "default_min_handle_height")]
    pub min_handle_height: f64,
}

fn default_tile_rows() -> usize {
    1
}

fn default_min_handle_height() -> f64 {
    5.0
}

#[derive(Debug, Clone, Deserialize)]
pub struct RenderConfig {
    pub fft_size: usize,
    pub window: String,
    pub magnitude_min: f32,
    pub magnitude_max: f32,
    pub colormap: String,
    #[serde(default)]
    pub fft_step_size: usize,
    pub spectrogram_height: usize,
    #[serde(default = "default_zoom")]
    pub zoom_level: f64,
    #[serde(default = "default_taps")]
    pub taps: Vec<f32>,
}

fn default_zoom() -> f64 {
    1.0
}

fn default_taps() -> Vec<f32> {
    vec![1.0]
}

impl RenderConfig {
    pub fn window_kind(&self) -> Result<WindowKind, EngineError> {
        self.window.parse()
    }

    pub fn colormap(&self) -> Result<Colormap, EngineError> {
        Colormap::from_name(&self.colormap)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DataSourceConfig {
    pub local_root: PathBuf,
    pub api_base_url: String,
    #[serde(default = "default_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub blob_endpoint: Option<String>,
    #[serde(default)]
    pub blob_sas_token: Option<String>,
    #[serde(default = "default_max_tiles")]
    pub max_tiles_per_request: usize,
}

fn default_timeout() -> u64 {
    30
}

fn default_max_tiles() -> usize {
    100
}

impl Default for DataSourceConfig {
    fn default() -> Self {
        DataSourceConfig {
            local_root: PathBuf::from("."),
            api_base_url: "http://localhost:3000".to_string(),
            request_timeout_secs: default_timeout(),
            blob_endpoint: None,
            blob_sas_token: None,
            max_tiles_per_request: default_max_tiles(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub engine: EngineConfig,
    pub render: RenderConfig,
    #[serde(default)]
    pub datasource: DataSourceConfig,
}

impl AppConfig {
    pub fn load_default() -> anyhow::Result<Self> {
        let default = include_str!("../config/default.toml");
        let cfg: AppConfig = toml::from_str(default)?;
        Ok(cfg)
    }

    pub fn load_from(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let p = path.into();
        let s = fs::read_to_string(&p)?;
        let cfg: AppConfig = toml::from_str(&s)?;
        Ok(cfg)
    }

    /// Fill the SAS token from the environment when the file leaves it out.
    pub fn with_env_overrides(mut self) -> Self {
        if self.datasource.blob_sas_token.is_none() {
            self.datasource.blob_sas_token = std::env::var("SIGMF_TILES_SAS_TOKEN").ok();
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use tempfile::TempDir;

    #[test]
    fn test_default_config_parses() -> Result<()> {
        let cfg = AppConfig::load_default()?;
        assert_eq!(cfg.engine.tile_rows, 1);
        assert_eq!(cfg.engine.fetch_padding, 300);
        assert_eq!(cfg.render.fft_size, 1024);
        assert_eq!(cfg.render.taps, vec![1.0]);
        assert_eq!(cfg.render.window_kind()?, WindowKind::Hamming);
        assert!(cfg.render.colormap().is_ok());
        assert_eq!(cfg.datasource.api_base_url, "http://localhost:3000");
        Ok(())
    }

    #[test]
    fn test_load_from_file_with_minimal_sections() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("custom.toml");
        fs::write(
            &path,
            r#"
[engine]
fetch_padding = 100
minimap_fft_size = 64
minimap_rows = 500
max_cache_bytes = 1048576

[render]
fft_size = 256
window = "hann"
magnitude_min = -90.0
magnitude_max = -10.0
colormap = "jet"
spectrogram_height = 400
"#,
        )?;
        let cfg = AppConfig::load_from(&path)?;
        assert_eq!(cfg.engine.tile_rows, 1);
        assert_eq!(cfg.render.fft_size, 256);
        assert_eq!(cfg.render.zoom_level, 1.0);
        assert_eq!(cfg.datasource.request_timeout_secs, 30);
        Ok(())
    }
}
