use crate::error::PipelineError;
use crate::pipeline::detection::Detector;
use crate::pipeline::slicing::{nms, transform_detection_to_frame_coords, Tile};
use crate::pipeline::types::{AnnotatedFrame, ConfidenceTiers, Detection, Frame};
use image::{Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;

/// How boxes are rendered onto the frame copy.
#[derive(Clone, Debug)]
pub struct AnnotationStyle {
    pub tiers: ConfidenceTiers,
    pub thickness: u32,
    pub nms_iou: Option<f32>,
}

/// Run the detector over every tile and draw the frame-space boxes onto a
/// copy of the frame. The caller's frame is left untouched.
pub fn annotate_frame(
    frame: &Frame,
    tiles: &[Tile],
    detector: &mut dyn Detector,
    min_conf: f32,
    style: &AnnotationStyle,
) -> Result<AnnotatedFrame, PipelineError> {
    let mut detections = Vec::new();

    for (tile_idx, tile) in tiles.iter().enumerate() {
        let found = detector
            .detect(&tile.image, min_conf)
            .map_err(|e| PipelineError::Detector {
                frame: frame.index,
                tile: tile_idx,
                reason: format!("{:#}", e),
            })?;

        if found.is_empty() {
            continue;
        }
        tracing::debug!(
            "Frame {} tile {} ({:?}): {} detections",
            frame.index,
            tile_idx,
            tile.offset,
            found.len()
        );

        detections.extend(
            found
                .iter()
                .filter(|d| d.confidence >= min_conf)
                .map(|d| transform_detection_to_frame_coords(d, &tile.offset)),
        );
    }

    if let Some(iou) = style.nms_iou {
        let before = detections.len();
        detections = nms(detections, iou);
        if detections.len() != before {
            tracing::debug!(
                "Frame {}: merged {} seam duplicates",
                frame.index,
                before - detections.len()
            );
        }
    }

    let mut image = frame.image.clone();
    for detection in &detections {
        let color = style.tiers.color(style.tiers.tier_for(detection.confidence));
        draw_detection(&mut image, detection, color, style.thickness);
    }

    Ok(AnnotatedFrame {
        index: frame.index,
        image,
        detections,
    })
}

/// Draw a box outline whose outer edge runs through (x1, y1) and (x2, y2),
/// growing inward by `thickness` pixels. Coordinates are truncated to whole
/// pixels; anything off-frame is clipped.
///
/// Detector output is untrusted: coordinates are clamped to a band just
/// outside the frame first, so huge, infinite or NaN values never overflow.
pub fn draw_detection(
    image: &mut RgbImage,
    detection: &Detection,
    color: Rgb<u8>,
    thickness: u32,
) {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return;
    }
    let thickness = thickness.min(width.max(height));

    // Edges past the limit are off-frame either way; clamping keeps them off-frame
    let limit = i64::from(width.max(height)) + i64::from(thickness) + 1;
    let clamp = |v: f32| (v as i64).clamp(-limit, limit);
    let x1 = clamp(detection.bbox.x1);
    let y1 = clamp(detection.bbox.y1);
    let x2 = clamp(detection.bbox.x2);
    let y2 = clamp(detection.bbox.y2);

    for k in 0..i64::from(thickness) {
        let left = x1 + k;
        let top = y1 + k;
        let right = x2 - k;
        let bottom = y2 - k;
        if right < left || bottom < top {
            break;
        }
        let rect = Rect::at(left as i32, top as i32)
            .of_size((right - left + 1) as u32, (bottom - top + 1) as u32);
        draw_hollow_rect_mut(image, rect, color);
    }
}
