use image::{Rgb, RgbImage};
use serde::{Deserialize, Serialize};
use std::fmt;

pub use crate::run_artifacts::BBox;

/// A decoded raster frame and its zero-based position in the source.
pub struct Frame {
    pub index: usize,
    pub image: RgbImage,
}

/// Pixel rectangle of a tile inside its parent frame.
///
/// `x1`/`y1` is the top-left corner, `x2`/`y2` is exclusive.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct OffsetBox {
    pub x1: u32,
    pub y1: u32,
    pub x2: u32,
    pub y2: u32,
}

impl OffsetBox {
    pub fn width(&self) -> u32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> u32 {
        self.y2 - self.y1
    }

    pub fn area(&self) -> u64 {
        self.width() as u64 * self.height() as u64
    }

    pub fn overlaps(&self, other: &OffsetBox) -> bool {
        self.x1 < other.x2 && other.x1 < self.x2 && self.y1 < other.y2 && other.y1 < self.y2
    }
}

/// A box reported by a detector together with its confidence in [0, 1].
///
/// Detectors produce these in tile-local coordinates; the annotator converts
/// them to frame space before they go anywhere else.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    pub bbox: BBox,
    pub confidence: f32,
}

impl Detection {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32, confidence: f32) -> Self {
        Self {
            bbox: BBox { x1, y1, x2, y2 },
            confidence,
        }
    }
}

/// Confidence band a drawn box falls into.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    High,
    Medium,
    Low,
}

/// Thresholds and colours for the confidence-tiered box colouring.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ConfidenceTiers {
    /// Lower bound (inclusive) of the high tier
    pub high: f32,
    /// Lower bound (inclusive) of the medium tier
    pub medium: f32,
    pub high_color: [u8; 3],
    pub medium_color: [u8; 3],
    pub low_color: [u8; 3],
}

impl Default for ConfidenceTiers {
    fn default() -> Self {
        Self {
            high: 0.4,
            medium: 0.25,
            high_color: [0, 255, 0],
            medium_color: [255, 165, 0],
            low_color: [255, 0, 0],
        }
    }
}

impl ConfidenceTiers {
    pub fn tier_for(&self, confidence: f32) -> Tier {
        if confidence >= self.high {
            Tier::High
        } else if confidence >= self.medium {
            Tier::Medium
        } else {
            Tier::Low
        }
    }

    pub fn color(&self, tier: Tier) -> Rgb<u8> {
        match tier {
            Tier::High => Rgb(self.high_color),
            Tier::Medium => Rgb(self.medium_color),
            Tier::Low => Rgb(self.low_color),
        }
    }
}

/// A frame with its frame-space detections drawn on a copy of the pixels.
pub struct AnnotatedFrame {
    pub index: usize,
    pub image: RgbImage,
    pub detections: Vec<Detection>,
}

/// Lifecycle of a single pipeline run.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Idle,
    FramesExtracting,
    FramesAnnotating,
    StackAssembling,
    Done,
    Failed,
}

impl PipelineStage {
    #[cfg(test)]
    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineStage::Done | PipelineStage::Failed)
    }

    /// The stage that follows this one on the success path.
    pub fn next(&self) -> Option<PipelineStage> {
        match self {
            PipelineStage::Idle => Some(PipelineStage::FramesExtracting),
            PipelineStage::FramesExtracting => Some(PipelineStage::FramesAnnotating),
            PipelineStage::FramesAnnotating => Some(PipelineStage::StackAssembling),
            PipelineStage::StackAssembling => Some(PipelineStage::Done),
            PipelineStage::Done | PipelineStage::Failed => None,
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineStage::Idle => "idle",
            PipelineStage::FramesExtracting => "frame extraction",
            PipelineStage::FramesAnnotating => "frame annotation",
            PipelineStage::StackAssembling => "stack assembling",
            PipelineStage::Done => "done",
            PipelineStage::Failed => "failed",
        };
        f.write_str(name)
    }
}
