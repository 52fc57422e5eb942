use crate::pipeline::bright_spot::BrightSpotDetector;
use crate::pipeline::config::{PipelineConfig, DEFAULT_BOX_THICKNESS, DEFAULT_CONFIDENCE};
use crate::pipeline::detection::Detector;
use crate::pipeline::slicing::{GridConfig, RemainderPolicy};
use crate::pipeline::types::ConfidenceTiers;
use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use std::net::IpAddr;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Annotate a video, TIFF stack or frame directory and write the processed stack
    Run(RunArgs),
    /// Accept uploads over HTTP and stream back the processed stack
    Serve(ServeArgs),
}

#[derive(clap::Args, Debug)]
pub struct RunArgs {
    /// Video file, multi-page TIFF, or directory of frame images
    pub input: PathBuf,

    /// Where to write the stack (default: <input stem>_processed.tif in the current directory)
    #[arg(long, short)]
    pub output: Option<PathBuf>,

    #[command(flatten)]
    pub pipeline: PipelineArgs,
}

#[derive(clap::Args, Debug)]
pub struct ServeArgs {
    /// Host to bind to
    #[arg(long, default_value = "127.0.0.1")]
    pub host: IpAddr,

    /// Port to bind to
    #[arg(long, default_value_t = 5000)]
    pub port: u16,

    /// Directory uploaded videos are saved to
    #[arg(long, env = "TILESCOPE_UPLOAD_DIR", default_value = "uploads")]
    pub upload_dir: PathBuf,

    /// Largest accepted upload, in megabytes
    #[arg(long, default_value_t = 2048)]
    pub max_upload_mb: usize,

    #[command(flatten)]
    pub pipeline: PipelineArgs,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum DetectorKind {
    /// Connected bright regions on a dark background (built in)
    BrightSpot,
    /// RT-DETR ONNX model (needs the `rtdetr` feature and --model)
    RtDetr,
}

/// Grid size given as `<columns>x<rows>`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GridSize {
    pub columns: u32,
    pub rows: u32,
}

fn parse_grid(value: &str) -> Result<GridSize, String> {
    let (columns, rows) = value
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected <columns>x<rows>, got '{}'", value))?;
    let columns: u32 = columns
        .trim()
        .parse()
        .map_err(|_| format!("invalid column count '{}'", columns))?;
    let rows: u32 = rows
        .trim()
        .parse()
        .map_err(|_| format!("invalid row count '{}'", rows))?;
    if columns == 0 || rows == 0 {
        return Err("grid dimensions must be at least 1".to_string());
    }
    Ok(GridSize { columns, rows })
}

#[derive(clap::Args, Debug, Clone)]
pub struct PipelineArgs {
    /// Minimum detector confidence for a box to be drawn
    #[arg(long, short, env = "TILESCOPE_CONFIDENCE", default_value_t = DEFAULT_CONFIDENCE)]
    pub confidence: f32,

    /// Tile grid as <columns>x<rows>
    #[arg(long, value_parser = parse_grid, default_value = "3x3")]
    pub grid: GridSize,

    /// What to do with pixels left over when the frame does not divide evenly
    #[arg(long, value_enum, default_value_t = RemainderPolicy::Drop)]
    pub remainder: RemainderPolicy,

    /// Merge boxes overlapping above this IoU across tile seams (off by default)
    #[arg(long)]
    pub nms_iou: Option<f32>,

    /// Box outline width in pixels
    #[arg(long, default_value_t = DEFAULT_BOX_THICKNESS)]
    pub thickness: u32,

    /// Scratch directory for extracted and annotated frames
    #[arg(long, env = "TILESCOPE_WORKSPACE", default_value = "work")]
    pub workspace: PathBuf,

    #[arg(long, value_enum, env = "TILESCOPE_DETECTOR", default_value_t = DetectorKind::BrightSpot)]
    pub detector: DetectorKind,

    /// Model weights for the rt-detr detector
    #[arg(long, env = "TILESCOPE_MODEL")]
    pub model: Option<PathBuf>,

    /// Luminance (0-255) a pixel must exceed to count as foreground (bright-spot)
    #[arg(long, default_value_t = 128)]
    pub luminance_threshold: u8,

    /// Smallest region, in pixels, reported as a detection (bright-spot)
    #[arg(long, default_value_t = 4)]
    pub min_area: u32,
}

impl PipelineArgs {
    pub fn to_config(&self) -> PipelineConfig {
        PipelineConfig {
            grid: GridConfig::new(self.grid.columns, self.grid.rows)
                .with_remainder(self.remainder),
            confidence: self.confidence,
            tiers: ConfidenceTiers::default(),
            thickness: self.thickness,
            nms_iou: self.nms_iou,
        }
    }

    /// Construct the detector once for the lifetime of the process.
    pub fn build_detector(&self) -> Result<Box<dyn Detector>> {
        match self.detector {
            DetectorKind::BrightSpot => Ok(Box::new(BrightSpotDetector::new(
                self.luminance_threshold,
                self.min_area,
            ))),
            DetectorKind::RtDetr => self.build_rtdetr(),
        }
    }

    #[cfg(feature = "rtdetr")]
    fn build_rtdetr(&self) -> Result<Box<dyn Detector>> {
        use anyhow::Context;

        let model = self
            .model
            .as_ref()
            .context("--model is required for the rt-detr detector")?;
        let detector = crate::pipeline::detection::RtDetrDetector::new(&model.to_string_lossy())
            .with_context(|| format!("Failed to load model {:?}", model))?;
        Ok(Box::new(detector))
    }

    #[cfg(not(feature = "rtdetr"))]
    fn build_rtdetr(&self) -> Result<Box<dyn Detector>> {
        anyhow::bail!("the rt-detr detector needs a build with `--features rtdetr`")
    }
}

impl Args {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
