use super::FrameSource;
use crate::error::PipelineError;
use crate::pipeline::types::Frame;
use crate::run_context::list_image_files;
use std::path::{Path, PathBuf};

/// Treats a directory of still images as a video, ordered by the numeric
/// key in each file name.
pub struct ImageSequenceSource {
    files: Vec<PathBuf>,
    next_index: usize,
}

impl ImageSequenceSource {
    pub fn open(dir: &Path) -> Result<Self, PipelineError> {
        let files = list_image_files(dir)?;
        tracing::info!(
            "ImageSequenceSource: {} image files in {:?}",
            files.len(),
            dir
        );
        Ok(Self {
            files,
            next_index: 0,
        })
    }
}

impl FrameSource for ImageSequenceSource {
    fn frame_count_hint(&self) -> Option<usize> {
        Some(self.files.len())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>, PipelineError> {
        let Some(path) = self.files.get(self.next_index) else {
            return Ok(None);
        };

        let image = image::open(path)
            .map_err(|e| PipelineError::decode(path, e))?
            .to_rgb8();

        let frame = Frame {
            index: self.next_index,
            image,
        };
        self.next_index += 1;
        Ok(Some(frame))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    #[test]
    fn test_frames_follow_numeric_file_order() {
        let dir = tempfile::tempdir().unwrap();
        for (name, value) in [("img_10.png", 3u8), ("img_2.png", 2), ("img_1.png", 1)] {
            RgbImage::from_pixel(3, 3, Rgb([value, 0, 0]))
                .save(dir.path().join(name))
                .unwrap();
        }
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let mut source = ImageSequenceSource::open(dir.path()).unwrap();
        assert_eq!(source.frame_count_hint(), Some(3));

        let mut seen = Vec::new();
        while let Some(frame) = source.next_frame().unwrap() {
            seen.push((frame.index, frame.image.get_pixel(0, 0)[0]));
        }
        assert_eq!(seen, vec![(0, 1), (1, 2), (2, 3)]);
    }

    #[test]
    fn test_corrupt_image_is_a_decode_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("frame_0.png"), b"junk").unwrap();

        let mut source = ImageSequenceSource::open(dir.path()).unwrap();
        let err = source.next_frame().err().unwrap();
        assert!(matches!(err, PipelineError::Decode { .. }));
    }
}
