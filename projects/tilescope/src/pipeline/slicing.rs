use crate::error::PipelineError;
use crate::pipeline::types::{Detection, OffsetBox};
use image::{imageops, RgbImage};
use serde::{Deserialize, Serialize};

/// What happens to pixels left over when the frame size is not a multiple of the grid.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum RemainderPolicy {
    /// Leftover columns/rows on the right and bottom edges are never tiled
    Drop,
    /// The last column and row grow to reach the frame edges
    #[value(name = "extend")]
    ExtendEdges,
}

/// Configuration for fixed-grid tiling
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GridConfig {
    pub columns: u32,
    pub rows: u32,
    #[serde(default = "default_remainder")]
    pub remainder: RemainderPolicy,
}

fn default_remainder() -> RemainderPolicy {
    RemainderPolicy::Drop
}

impl GridConfig {
    pub fn new(columns: u32, rows: u32) -> Self {
        Self {
            columns,
            rows,
            remainder: RemainderPolicy::Drop,
        }
    }

    pub fn with_remainder(mut self, remainder: RemainderPolicy) -> Self {
        self.remainder = remainder;
        self
    }

    pub fn tile_count(&self) -> usize {
        self.columns as usize * self.rows as usize
    }
}

impl Default for GridConfig {
    fn default() -> Self {
        Self::new(3, 3)
    }
}

/// A tile cut out of a larger frame
pub struct Tile {
    pub image: RgbImage,
    /// Where the tile sits in the parent frame
    pub offset: OffsetBox,
}

/// Offset boxes for every grid cell, column-major: cell (i, j) for column i
/// and row j comes before (i, j + 1).
pub fn grid_boxes(
    width: u32,
    height: u32,
    grid: &GridConfig,
) -> Result<Vec<OffsetBox>, PipelineError> {
    if grid.columns == 0 || grid.rows == 0 {
        return Err(PipelineError::InvalidConfig(format!(
            "grid must have at least one column and row, got {}x{}",
            grid.columns, grid.rows
        )));
    }

    let tile_w = width / grid.columns;
    let tile_h = height / grid.rows;
    if tile_w == 0 || tile_h == 0 {
        // Every pixel is remainder: under Drop none are inspected
        if grid.remainder == RemainderPolicy::Drop {
            tracing::warn!(
                "Frame of {}x{} is smaller than the {}x{} grid; no tiles inspected",
                width,
                height,
                grid.columns,
                grid.rows
            );
            return Ok(Vec::new());
        }
        return Err(PipelineError::InvalidConfig(format!(
            "frame of {}x{} is too small to extend a {}x{} grid over",
            width, height, grid.columns, grid.rows
        )));
    }

    let mut boxes = Vec::with_capacity(grid.tile_count());
    for i in 0..grid.columns {
        for j in 0..grid.rows {
            let mut offset = OffsetBox {
                x1: i * tile_w,
                y1: j * tile_h,
                x2: (i + 1) * tile_w,
                y2: (j + 1) * tile_h,
            };

            if grid.remainder == RemainderPolicy::ExtendEdges {
                if i + 1 == grid.columns {
                    offset.x2 = width;
                }
                if j + 1 == grid.rows {
                    offset.y2 = height;
                }
            }

            boxes.push(offset);
        }
    }

    Ok(boxes)
}

/// Split a frame into grid tiles, each tagged with its offset box.
pub fn generate_tiles(image: &RgbImage, grid: &GridConfig) -> Result<Vec<Tile>, PipelineError> {
    let boxes = grid_boxes(image.width(), image.height(), grid)?;

    let tiles = boxes
        .into_iter()
        .map(|offset| Tile {
            image: imageops::crop_imm(image, offset.x1, offset.y1, offset.width(), offset.height())
                .to_image(),
            offset,
        })
        .collect();

    Ok(tiles)
}

/// Transform a detection from tile coordinates to frame coordinates.
///
/// x components move by the tile's x1, y components by its y1.
pub fn transform_detection_to_frame_coords(detection: &Detection, offset: &OffsetBox) -> Detection {
    let dx = offset.x1 as f32;
    let dy = offset.y1 as f32;

    Detection::new(
        detection.bbox.x1 + dx,
        detection.bbox.y1 + dy,
        detection.bbox.x2 + dx,
        detection.bbox.y2 + dy,
        detection.confidence,
    )
}

/// Apply Non-Maximum Suppression to remove duplicate detections
pub fn nms(detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    if detections.is_empty() {
        return detections;
    }

    // Sort by confidence (highest first)
    let mut sorted = detections;
    sorted.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep = Vec::new();
    let mut suppressed = vec![false; sorted.len()];

    for i in 0..sorted.len() {
        if suppressed[i] {
            continue;
        }

        keep.push(sorted[i]);

        for j in (i + 1)..sorted.len() {
            if suppressed[j] {
                continue;
            }

            if compute_iou(&sorted[i], &sorted[j]) > iou_threshold {
                suppressed[j] = true;
            }
        }
    }

    keep
}

/// Compute Intersection over Union between two boxes
fn compute_iou(a: &Detection, b: &Detection) -> f32 {
    let x1 = a.bbox.x1.max(b.bbox.x1);
    let y1 = a.bbox.y1.max(b.bbox.y1);
    let x2 = a.bbox.x2.min(b.bbox.x2);
    let y2 = a.bbox.y2.min(b.bbox.y2);

    if x2 <= x1 || y2 <= y1 {
        return 0.0;
    }

    let intersection = (x2 - x1) * (y2 - y1);
    let union = a.bbox.area() + b.bbox.area() - intersection;

    if union <= 0.0 {
        0.0
    } else {
        intersection / union
    }
}
