use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sigmf_tiles::datasource::CancelToken;
use sigmf_tiles::metadata::{center_frequency, duration_seconds, frequency_range, total_samples};
use sigmf_tiles::session::{Frame, RenderParams, SpectrogramSession};
use sigmf_tiles::units::{unit_prefix_hz, unit_prefix_samples, unit_prefix_seconds};
use sigmf_tiles::{AppConfig, LocalFileClient, MetadataSource};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "sigmf-tiles", about = "Spectrogram tiles from SigMF recordings")]
struct Cli {
    /// TOML configuration; the built-in defaults are used when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print a summary of a recording's metadata.
    Info { recording: PathBuf },
    /// Render one view of a recording to an image.
    Render {
        recording: PathBuf,
        #[arg(short, long)]
        out: PathBuf,
        /// First FFT row of the view.
        #[arg(long, default_value_t = 0)]
        row: usize,
        #[arg(long)]
        fft_size: Option<usize>,
        #[arg(long)]
        rows: Option<usize>,
        #[arg(long)]
        colormap: Option<String>,
        #[arg(long)]
        window: Option<String>,
    },
    /// Render the whole-recording overview.
    Minimap {
        recording: PathBuf,
        #[arg(short, long)]
        out: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => AppConfig::load_from(path).with_context(|| format!("loading {}", path.display()))?,
        None => AppConfig::load_default()?,
    }
    .with_env_overrides();

    match cli.command {
        Command::Info { recording } => print_info(&recording).await,
        Command::Render { recording, out, row, fft_size, rows, colormap, window } => {
            let mut render = config.render.clone();
            if let Some(n) = fft_size {
                render.fft_size = n;
            }
            if let Some(n) = rows {
                render.spectrogram_height = n;
            }
            if let Some(name) = colormap {
                render.colormap = name;
            }
            if let Some(name) = window {
                render.window = name;
            }
            let params = RenderParams::from_config(&render)?;
            let session = open_local(&recording, &config, params).await?;
            let frame = session
                .render_frame(row, &CancelToken::new())
                .await?
                .context("render was superseded")?;
            if !frame.missing_rows.is_empty() {
                tracing::warn!("{} rows could not be loaded", frame.missing_rows.len());
            }
            write_frame(&frame, &out).await
        }
        Command::Minimap { recording, out } => {
            let params = RenderParams::from_config(&config.render)?;
            let session = open_local(&recording, &config, params).await?;
            let frame = session.minimap(&CancelToken::new()).await?;
            write_frame(&frame, &out).await
        }
    }
}

async fn open_local(recording: &Path, config: &AppConfig, params: RenderParams) -> Result<SpectrogramSession> {
    let (client, origin) = LocalFileClient::for_recording(recording);
    let meta = client.get_meta(&origin).await?;
    let session = SpectrogramSession::new(meta, Arc::new(client), config.engine.clone(), params)?;
    Ok(session)
}

async fn print_info(recording: &Path) -> Result<()> {
    let (client, origin) = LocalFileClient::for_recording(recording);
    let meta = client.get_meta(&origin).await?;

    let (rate, rate_unit) = unit_prefix_hz(meta.global.sample_rate);
    let (center, center_unit) = unit_prefix_hz(center_frequency(&meta));
    let (lo, hi) = frequency_range(&meta);
    let (samples, samples_unit) = unit_prefix_samples(total_samples(&meta) as f64);
    let (duration, duration_unit) = unit_prefix_seconds(duration_seconds(&meta));

    println!("recording:   {}", origin.canonical_path());
    println!("datatype:    {}", meta.global.datatype);
    println!("sample rate: {rate} {rate_unit}");
    println!("center:      {center} {center_unit}");
    println!("band:        {lo} Hz .. {hi} Hz");
    println!("samples:     {samples}{samples_unit}");
    println!("duration:    {duration} {duration_unit}");
    println!("captures:    {}", meta.captures.len());
    println!("annotations: {}", meta.annotations.len());
    if let Some(desc) = &meta.global.description {
        println!("description: {desc}");
    }
    Ok(())
}

#[cfg(feature = "png")]
async fn write_frame(frame: &Frame, out: &Path) -> Result<()> {
    let image = image::RgbaImage::from_raw(frame.width as u32, frame.height as u32, frame.rgba.clone())
        .context("frame buffer does not match its dimensions")?;
    image.save(out).with_context(|| format!("writing {}", out.display()))?;
    info!("wrote {}x{} image to {}", frame.width, frame.height, out.display());
    Ok(())
}

#[cfg(not(feature = "png"))]
async fn write_frame(frame: &Frame, out: &Path) -> Result<()> {
    tokio::fs::write(out, &frame.rgba).await?;
    info!("wrote {}x{} raw RGBA to {}", frame.width, frame.height, out.display());
    Ok(())
}
