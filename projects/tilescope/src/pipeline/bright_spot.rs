use crate::pipeline::detection::Detector;
use crate::pipeline::types::Detection;
use anyhow::Result;
use image::{imageops, GrayImage, Luma, RgbImage};
use imageproc::region_labelling::{connected_components, Connectivity};
use std::collections::HashMap;

/// Detects bright blobs on a dark background, the typical look of
/// fluorescence microscopy frames.
///
/// Each 8-connected region of pixels brighter than `luminance_threshold`
/// becomes one box; its confidence is the region's mean luminance over 255.
#[derive(Debug, Clone)]
pub struct BrightSpotDetector {
    pub luminance_threshold: u8,
    pub min_area: u32,
}

impl Default for BrightSpotDetector {
    fn default() -> Self {
        Self {
            luminance_threshold: 128,
            min_area: 4,
        }
    }
}

impl BrightSpotDetector {
    pub fn new(luminance_threshold: u8, min_area: u32) -> Self {
        Self {
            luminance_threshold,
            min_area,
        }
    }
}

struct Region {
    min_x: u32,
    min_y: u32,
    max_x: u32,
    max_y: u32,
    pixels: u32,
    luminance: u64,
}

impl Detector for BrightSpotDetector {
    fn name(&self) -> &str {
        "bright-spot"
    }

    fn detect(&mut self, tile: &RgbImage, min_conf: f32) -> Result<Vec<Detection>> {
        let gray = imageops::grayscale(tile);
        let threshold = self.luminance_threshold;
        let mask = GrayImage::from_fn(gray.width(), gray.height(), |x, y| {
            if gray.get_pixel(x, y)[0] > threshold {
                Luma([255])
            } else {
                Luma([0])
            }
        });

        let labeled = connected_components(&mask, Connectivity::Eight, Luma([0u8]));

        let mut regions: HashMap<u32, Region> = HashMap::new();
        for (x, y, label) in labeled.enumerate_pixels() {
            let label = label[0];
            if label == 0 {
                continue; // background
            }
            let lum = gray.get_pixel(x, y)[0] as u64;

            regions
                .entry(label)
                .and_modify(|r| {
                    r.min_x = r.min_x.min(x);
                    r.min_y = r.min_y.min(y);
                    r.max_x = r.max_x.max(x);
                    r.max_y = r.max_y.max(y);
                    r.pixels += 1;
                    r.luminance += lum;
                })
                .or_insert(Region {
                    min_x: x,
                    min_y: y,
                    max_x: x,
                    max_y: y,
                    pixels: 1,
                    luminance: lum,
                });
        }

        let mut detections: Vec<Detection> = regions
            .into_values()
            .filter(|r| r.pixels >= self.min_area)
            .filter_map(|r| {
                let confidence = (r.luminance as f32 / r.pixels as f32) / 255.0;
                if confidence < min_conf {
                    return None;
                }
                // Box edges sit on pixel boundaries: x2/y2 is one past the last pixel
                Some(Detection::new(
                    r.min_x as f32,
                    r.min_y as f32,
                    (r.max_x + 1) as f32,
                    (r.max_y + 1) as f32,
                    confidence,
                ))
            })
            .collect();

        // HashMap iteration order is random; keep output stable
        detections.sort_by(|a, b| {
            (a.bbox.y1, a.bbox.x1)
                .partial_cmp(&(b.bbox.y1, b.bbox.x1))
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        tracing::debug!("Bright-spot detector found {} regions", detections.len());
        Ok(detections)
    }
}
