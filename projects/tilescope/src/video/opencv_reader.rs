use super::FrameSource;
use crate::error::PipelineError;
use crate::pipeline::types::Frame;
use image::RgbImage;
use opencv::{
    core::Mat,
    imgproc,
    prelude::*,
    videoio::{VideoCapture, CAP_ANY, CAP_PROP_FPS, CAP_PROP_FRAME_COUNT},
};
use std::path::{Path, PathBuf};

/// Decodes any container OpenCV's VideoCapture understands (avi, mp4, ...).
pub struct OpencvReader {
    path: PathBuf,
    capture: VideoCapture,
    total_frames: usize,
    next_index: usize,
}

impl OpencvReader {
    pub fn open(path: &Path) -> Result<Self, PipelineError> {
        let path_str = path
            .to_str()
            .ok_or_else(|| PipelineError::open(path, "path is not valid UTF-8"))?;

        let capture =
            VideoCapture::from_file(path_str, CAP_ANY).map_err(|e| PipelineError::open(path, e))?;
        if !capture.is_opened().map_err(|e| PipelineError::open(path, e))? {
            return Err(PipelineError::open(path, "Could not open the video file"));
        }

        let fps = capture.get(CAP_PROP_FPS).unwrap_or(0.0);
        let raw_count = capture.get(CAP_PROP_FRAME_COUNT).unwrap_or(0.0).max(0.0) as usize;

        tracing::info!(
            "OpencvReader: opened {}, fps={:.2}, stream_frames={}",
            path_str,
            fps,
            raw_count
        );

        Ok(Self {
            path: path.to_path_buf(),
            capture,
            total_frames: raw_count,
            next_index: 0,
        })
    }
}

impl FrameSource for OpencvReader {
    fn frame_count_hint(&self) -> Option<usize> {
        // Container metadata is an estimate and is zero for some codecs
        (self.total_frames > 0).then_some(self.total_frames)
    }

    fn next_frame(&mut self) -> Result<Option<Frame>, PipelineError> {
        let mut mat = Mat::default();
        let success = self
            .capture
            .read(&mut mat)
            .map_err(|e| PipelineError::decode(&self.path, e))?;
        if !success || mat.empty() {
            return Ok(None);
        }

        let image = mat_to_rgb_image(&mat).map_err(|e| {
            PipelineError::decode(&self.path, format!("frame {}: {}", self.next_index, e))
        })?;

        let frame = Frame {
            index: self.next_index,
            image,
        };
        self.next_index += 1;
        Ok(Some(frame))
    }
}

/// Convert an OpenCV Mat (BGR) to an RGB image buffer
fn mat_to_rgb_image(mat: &Mat) -> anyhow::Result<RgbImage> {
    let mut rgb_mat = Mat::default();
    imgproc::cvt_color_def(mat, &mut rgb_mat, imgproc::COLOR_BGR2RGB)?;

    let size = rgb_mat.size()?;
    let width = size.width as u32;
    let height = size.height as u32;

    if !rgb_mat.is_continuous() {
        anyhow::bail!("Mat is not continuous");
    }

    let buffer = rgb_mat.data_bytes()?.to_vec();

    RgbImage::from_vec(width, height, buffer)
        .ok_or_else(|| anyhow::anyhow!("Failed to create ImageBuffer from Mat data"))
}
