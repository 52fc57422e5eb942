// Stack assembler: orders annotated frame files and writes them as one
// multi-page TIFF.

use crate::error::PipelineError;
use crate::video::tiff_reader::TiffStackSource;
use crate::video::FrameSource;
use image::RgbImage;
use std::cmp::Ordering;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tiff::encoder::{colortype, TiffEncoder};

/// The last run of ASCII digits in `name`, with leading zeros stripped.
///
/// Compared by length and then lexically this orders like the integer it
/// spells, however long the run is. `None` means the name has no digits and
/// sorts after every numbered name.
pub fn numeric_sort_key(name: &str) -> Option<&str> {
    let bytes = name.as_bytes();
    let end = bytes.iter().rposition(|b| b.is_ascii_digit())? + 1;
    let start = bytes[..end]
        .iter()
        .rposition(|b| !b.is_ascii_digit())
        .map_or(0, |p| p + 1);
    Some(name[start..end].trim_start_matches('0'))
}

/// Numeric-key ordering; ties fall back to the plain name so the result does
/// not depend on directory listing order.
pub fn compare_numeric(a: &str, b: &str) -> Ordering {
    match (numeric_sort_key(a), numeric_sort_key(b)) {
        (Some(ka), Some(kb)) => ka.len().cmp(&kb.len()).then_with(|| ka.cmp(kb)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
    .then_with(|| a.cmp(b))
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Sort paths by the numeric key of their file names.
pub fn sort_by_numeric_key(paths: &mut [PathBuf]) {
    paths.sort_by(|a, b| compare_numeric(&file_name_of(a), &file_name_of(b)));
}

/// Write `frames` (image files, ordered by numeric key) to `destination` as a
/// lossless multi-page RGB TIFF. Returns the number of pages written.
///
/// Pages are streamed into a sibling `.partial` file that is renamed over
/// `destination` only after every page is written, so a failed run never
/// leaves a truncated stack behind.
pub fn assemble(frames: &[PathBuf], destination: &Path) -> Result<usize, PipelineError> {
    if frames.is_empty() {
        return Err(PipelineError::EmptyStack);
    }

    let mut ordered = frames.to_vec();
    sort_by_numeric_key(&mut ordered);

    let partial = partial_path(destination)?;
    match write_pages(&ordered, &partial) {
        Ok(pages) => {
            fs::rename(&partial, destination)
                .map_err(|e| PipelineError::io(destination, e))?;
            tracing::info!("Wrote {} page stack to {:?}", pages, destination);
            Ok(pages)
        }
        Err(e) => {
            let _ = fs::remove_file(&partial);
            Err(e)
        }
    }
}

fn partial_path(destination: &Path) -> Result<PathBuf, PipelineError> {
    let name = destination.file_name().ok_or_else(|| {
        PipelineError::InvalidConfig(format!("stack destination {:?} has no file name", destination))
    })?;
    let mut partial = name.to_os_string();
    partial.push(".partial");
    Ok(destination.with_file_name(partial))
}

fn write_pages(frames: &[PathBuf], out: &Path) -> Result<usize, PipelineError> {
    let file = File::create(out).map_err(|e| PipelineError::io(out, e))?;
    let mut writer = BufWriter::new(file);

    {
        let mut encoder =
            TiffEncoder::new(&mut writer).map_err(|e| PipelineError::from_tiff(out, e))?;

        for path in frames {
            let page = image::open(path)
                .map_err(|e| PipelineError::decode(path, e))?
                .to_rgb8();
            encoder
                .write_image::<colortype::RGB8>(page.width(), page.height(), page.as_raw())
                .map_err(|e| PipelineError::from_tiff(out, e))?;
        }
    }

    writer.flush().map_err(|e| PipelineError::io(out, e))?;
    let file = writer
        .into_inner()
        .map_err(|e| PipelineError::io(out, e.into_error()))?;
    file.sync_all().map_err(|e| PipelineError::io(out, e))?;

    Ok(frames.len())
}

/// Read every page of a stack back, in page order.
pub fn read_stack(path: &Path) -> Result<Vec<RgbImage>, PipelineError> {
    let mut source = TiffStackSource::open(path)?;
    let mut pages = Vec::new();
    while let Some(frame) = source.next_frame()? {
        pages.push(frame.image);
    }
    Ok(pages)
}
