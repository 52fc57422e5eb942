pub mod image_sequence;
#[cfg(feature = "opencv")]
pub mod opencv_reader;
pub mod processor;
pub mod tiff_reader;

use crate::error::PipelineError;
use crate::pipeline::types::Frame;
use std::path::Path;

/// An ordered source of raster frames.
///
/// Frames come out in source order with zero-based, contiguous indices.
/// `Ok(None)` marks the end of the stream.
pub trait FrameSource: Send {
    /// Total number of frames, when the container reports it up front.
    fn frame_count_hint(&self) -> Option<usize>;
    fn next_frame(&mut self) -> Result<Option<Frame>, PipelineError>;
}

/// Open the right source for `path`: a directory of images, a multi-page
/// TIFF, or (with the `opencv` feature) any video container OpenCV can read.
pub fn open_source(path: &Path) -> Result<Box<dyn FrameSource>, PipelineError> {
    if !path.exists() {
        return Err(PipelineError::open(path, "no such file or directory"));
    }

    if path.is_dir() {
        return Ok(Box::new(image_sequence::ImageSequenceSource::open(path)?));
    }

    let extension = path
        .extension()
        .and_then(|s| s.to_str())
        .map(|s| s.to_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "tif" | "tiff" => Ok(Box::new(tiff_reader::TiffStackSource::open(path)?)),
        _ => open_video(path),
    }
}

#[cfg(feature = "opencv")]
fn open_video(path: &Path) -> Result<Box<dyn FrameSource>, PipelineError> {
    Ok(Box::new(opencv_reader::OpencvReader::open(path)?))
}

#[cfg(not(feature = "opencv"))]
fn open_video(path: &Path) -> Result<Box<dyn FrameSource>, PipelineError> {
    Err(PipelineError::open(
        path,
        "video containers need the `opencv` feature; pass a TIFF stack or a frame directory",
    ))
}
