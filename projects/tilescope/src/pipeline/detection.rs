use crate::pipeline::types::Detection;
use anyhow::Result;
use image::RgbImage;

/// An object detector run independently on every tile.
///
/// Implementations return boxes in the tile's own coordinate space and must
/// drop anything scoring below `min_conf`.
pub trait Detector: Send {
    fn name(&self) -> &str;

    fn detect(&mut self, tile: &RgbImage, min_conf: f32) -> Result<Vec<Detection>>;
}

#[cfg(feature = "rtdetr")]
pub use rtdetr::RtDetrDetector;

#[cfg(feature = "rtdetr")]
mod rtdetr {
    use super::Detector;
    use crate::pipeline::types::Detection;
    use anyhow::Result;
    use image::{DynamicImage, RgbImage};
    use usls::models::RTDETR;
    use usls::{Config, Image};

    /// A wrapper around the USLS RT-DETR model that corrects for the
    /// aspect-ratio padding bug in the underlying model library.
    pub struct RtDetrDetector {
        model: RTDETR,
    }

    impl RtDetrDetector {
        /// Load the model once; the same instance serves every tile of every frame.
        pub fn new(model_path: &str) -> Result<Self> {
            let config = Config::default()
                .with_model_file(model_path)
                .with_class_names(&usls::NAMES_COCO_80);

            #[cfg(target_os = "macos")]
            let config = config.with_model_device(usls::Device::CoreMl);

            let config = config.commit()?;
            let model = RTDETR::new(config)?;
            tracing::info!("Loaded RT-DETR model from {}", model_path);
            Ok(Self { model })
        }
    }

    impl Detector for RtDetrDetector {
        fn name(&self) -> &str {
            "rtdetr"
        }

        fn detect(&mut self, tile: &RgbImage, min_conf: f32) -> Result<Vec<Detection>> {
            let img_w = tile.width() as f32;
            let img_h = tile.height() as f32;

            let (x_corr, y_corr) = if img_w > img_h {
                (img_w / img_h, 1.0)
            } else if img_h > img_w {
                (1.0, img_h / img_w)
            } else {
                (1.0, 1.0)
            };

            let input = Image::from(DynamicImage::ImageRgb8(tile.clone()));
            let results = self.model.forward(&[input])?;

            let detections = results
                .into_iter()
                .next()
                .map(|y| y.hbbs)
                .unwrap_or_default()
                .into_iter()
                .filter_map(|hbb| {
                    let confidence = hbb.confidence().unwrap_or(0.0);
                    if confidence < min_conf {
                        return None;
                    }
                    let x = hbb.xmin() * x_corr;
                    let y = hbb.ymin() * y_corr;
                    let w = hbb.width() * x_corr;
                    let h = hbb.height() * y_corr;
                    Some(Detection::new(x, y, x + w, y + h, confidence))
                })
                .collect();

            Ok(detections)
        }
    }
}

#[cfg(test)]
pub mod testing {
    use super::Detector;
    use crate::pipeline::types::Detection;
    use anyhow::{anyhow, Result};
    use image::RgbImage;
    use std::collections::VecDeque;

    /// Replays a fixed list of per-call results, one call per tile.
    pub struct ScriptedDetector {
        pub responses: VecDeque<Vec<Detection>>,
        pub calls: usize,
        pub fail_on_call: Option<usize>,
    }

    impl ScriptedDetector {
        pub fn new(responses: Vec<Vec<Detection>>) -> Self {
            Self {
                responses: responses.into(),
                calls: 0,
                fail_on_call: None,
            }
        }
    }

    impl Detector for ScriptedDetector {
        fn name(&self) -> &str {
            "scripted"
        }

        fn detect(&mut self, _tile: &RgbImage, min_conf: f32) -> Result<Vec<Detection>> {
            let call = self.calls;
            self.calls += 1;
            if self.fail_on_call == Some(call) {
                return Err(anyhow!("model exploded"));
            }
            Ok(self
                .responses
                .pop_front()
                .unwrap_or_default()
                .into_iter()
                .filter(|d| d.confidence >= min_conf)
                .collect())
        }
    }
}
