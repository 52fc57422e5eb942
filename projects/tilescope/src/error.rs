use crate::pipeline::types::PipelineStage;
use std::fmt::Display;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Failures surfaced by the tiling/annotation pipeline.
///
/// Every variant names the input it failed on so a caller can tell which
/// file or frame broke the run.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Failed to open frame source {path:?}: {reason}")]
    Open { path: PathBuf, reason: String },
    #[error("Failed to decode {path:?}: {reason}")]
    Decode { path: PathBuf, reason: String },
    #[error("Cannot assemble a stack from zero frames")]
    EmptyStack,
    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Detector failed on frame {frame}, tile {tile}: {reason}")]
    Detector {
        frame: usize,
        tile: usize,
        reason: String,
    },
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("{stage} failed: {source}")]
    Stage {
        stage: PipelineStage,
        #[source]
        source: Box<PipelineError>,
    },
}

impl PipelineError {
    pub fn open(path: &Path, reason: impl Display) -> Self {
        Self::Open {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        }
    }

    pub fn decode(path: &Path, reason: impl Display) -> Self {
        Self::Decode {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        }
    }

    pub fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    /// Maps an `image` crate error onto the taxonomy: I/O problems stay I/O,
    /// everything else is a decode/encode failure of that file.
    pub fn from_image(path: &Path, err: image::ImageError) -> Self {
        match err {
            image::ImageError::IoError(source) => Self::io(path, source),
            other => Self::decode(path, other),
        }
    }

    /// Maps a `tiff` crate error the same way as [`PipelineError::from_image`].
    pub fn from_tiff(path: &Path, err: tiff::TiffError) -> Self {
        match err {
            tiff::TiffError::IoError(source) => Self::io(path, source),
            other => Self::decode(path, other),
        }
    }

    pub fn at_stage(self, stage: PipelineStage) -> Self {
        match self {
            already @ Self::Stage { .. } => already,
            other => Self::Stage {
                stage,
                source: Box::new(other),
            },
        }
    }

    /// The underlying failure with any stage wrapper removed.
    pub fn root(&self) -> &PipelineError {
        match self {
            Self::Stage { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn stage(&self) -> Option<PipelineStage> {
        match self {
            Self::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}
