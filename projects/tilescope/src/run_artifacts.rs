// Run artifact struct definitions
//
// Structs persisted inside a run's scratch workspace: the run manifest
// (run.json) and one row per drawn box (detections.csv).

use crate::pipeline::config::PipelineConfig;
use crate::pipeline::types::{PipelineStage, Tier};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Axis-aligned box in pixel coordinates, `(x1, y1)` top-left, `(x2, y2)` bottom-right
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct BBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BBox {
    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.0)
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }
}

/// Summary of one pipeline run, written as run.json
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RunManifest {
    pub run_id: String,
    pub input: String,
    #[serde(default)]
    pub output: Option<String>,
    pub confidence: f32,
    pub config: PipelineConfig,
    pub status: PipelineStage,
    #[serde(default)]
    pub error: Option<String>,
    pub frame_count: usize,
    pub detection_count: usize,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
}

/// One drawn box, in frame-space coordinates
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DetectionRecord {
    pub frame: usize,
    pub file: String,
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub confidence: f32,
    pub tier: Tier,
}
