use super::FrameSource;
use crate::error::PipelineError;
use crate::pipeline::types::Frame;
use image::{DynamicImage, GrayImage, RgbImage, RgbaImage};
use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::{Path, PathBuf};
use tiff::decoder::{Decoder, DecodingResult};
use tiff::ColorType;

/// Reads each page of a multi-page TIFF as one frame.
pub struct TiffStackSource {
    path: PathBuf,
    decoder: Decoder<BufReader<File>>,
    next_index: usize,
    exhausted: bool,
}

impl TiffStackSource {
    pub fn open(path: &Path) -> Result<Self, PipelineError> {
        let file = File::open(path).map_err(|e| PipelineError::open(path, e))?;
        let decoder =
            Decoder::new(BufReader::new(file)).map_err(|e| PipelineError::open(path, e))?;

        tracing::info!("TiffStackSource: opened {:?}", path);

        Ok(Self {
            path: path.to_path_buf(),
            decoder,
            next_index: 0,
            exhausted: false,
        })
    }
}

impl FrameSource for TiffStackSource {
    fn frame_count_hint(&self) -> Option<usize> {
        // Page count is only known after walking the IFD chain
        None
    }

    fn next_frame(&mut self) -> Result<Option<Frame>, PipelineError> {
        if self.exhausted {
            return Ok(None);
        }

        let image = decode_page(&mut self.decoder, &self.path)?;

        if self.decoder.more_images() {
            self.decoder
                .next_image()
                .map_err(|e| PipelineError::from_tiff(&self.path, e))?;
        } else {
            self.exhausted = true;
        }

        let frame = Frame {
            index: self.next_index,
            image,
        };
        self.next_index += 1;
        Ok(Some(frame))
    }
}

/// Decode the decoder's current page into RGB8. 8-bit gray, RGB and RGBA
/// pages are accepted.
fn decode_page<R: Read + Seek>(
    decoder: &mut Decoder<R>,
    path: &Path,
) -> Result<RgbImage, PipelineError> {
    let (width, height) = decoder
        .dimensions()
        .map_err(|e| PipelineError::from_tiff(path, e))?;
    let color = decoder
        .colortype()
        .map_err(|e| PipelineError::from_tiff(path, e))?;

    let data = match decoder
        .read_image()
        .map_err(|e| PipelineError::from_tiff(path, e))?
    {
        DecodingResult::U8(data) => data,
        _ => return Err(PipelineError::decode(path, "only 8-bit pages are supported")),
    };

    let image = match color {
        ColorType::RGB(8) => RgbImage::from_raw(width, height, data),
        ColorType::RGBA(8) => RgbaImage::from_raw(width, height, data)
            .map(|img| DynamicImage::ImageRgba8(img).to_rgb8()),
        ColorType::Gray(8) => GrayImage::from_raw(width, height, data)
            .map(|img| DynamicImage::ImageLuma8(img).to_rgb8()),
        other => {
            return Err(PipelineError::decode(
                path,
                format!("unsupported colour type {:?}", other),
            ))
        }
    };

    image.ok_or_else(|| PipelineError::decode(path, "page data does not match its dimensions"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use std::io::BufWriter;
    use tiff::encoder::{colortype, TiffEncoder};

    #[test]
    fn test_reads_pages_in_order_with_contiguous_indices() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.tif");
        {
            let file = File::create(&path).unwrap();
            let mut encoder = TiffEncoder::new(BufWriter::new(file)).unwrap();
            for value in [5u8, 50, 150] {
                let page = RgbImage::from_pixel(4, 3, Rgb([value, value, value]));
                encoder
                    .write_image::<colortype::RGB8>(4, 3, page.as_raw())
                    .unwrap();
            }
        }

        let mut source = TiffStackSource::open(&path).unwrap();
        let mut seen = Vec::new();
        while let Some(frame) = source.next_frame().unwrap() {
            seen.push((frame.index, frame.image.get_pixel(0, 0)[0]));
        }

        assert_eq!(seen, vec![(0, 5), (1, 50), (2, 150)]);
        assert!(source.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_gray_pages_expand_to_rgb() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gray.tif");
        {
            let file = File::create(&path).unwrap();
            let mut encoder = TiffEncoder::new(BufWriter::new(file)).unwrap();
            encoder
                .write_image::<colortype::Gray8>(2, 2, &[0, 64, 128, 255])
                .unwrap();
        }

        let mut source = TiffStackSource::open(&path).unwrap();
        let frame = source.next_frame().unwrap().unwrap();

        assert_eq!(*frame.image.get_pixel(1, 1), Rgb([255, 255, 255]));
        assert_eq!(*frame.image.get_pixel(1, 0), Rgb([64, 64, 64]));
    }
}
