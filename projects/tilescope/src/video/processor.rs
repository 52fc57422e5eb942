use crate::error::PipelineError;
use crate::pipeline::types::Frame;
use crate::run_context::Workspace;
use crate::video::FrameSource;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::{Duration, Instant};

pub struct ProcessingStats {
    pub processed_frames: usize,
    pub duration: Duration,
}

/// A trait for handling video frames. This separates the "how to process"
/// from the "how to read" logic.
pub trait FrameProcessor {
    fn process(&mut self, frame: Frame) -> Result<(), PipelineError>;
}

/// Blanket implementation so any closure with the right signature
/// automatically implements FrameProcessor.
impl<F> FrameProcessor for F
where
    F: FnMut(Frame) -> Result<(), PipelineError>,
{
    fn process(&mut self, frame: Frame) -> Result<(), PipelineError> {
        self(frame)
    }
}

/// Progress bar for `len` frames, or a spinner when the length is unknown.
/// Hidden when `visible` is false.
pub fn frame_progress(len: Option<usize>, visible: bool, label: &str) -> ProgressBar {
    if !visible {
        return ProgressBar::hidden();
    }

    let pb = match len {
        Some(len) => {
            let pb = ProgressBar::new(len as u64);
            if let Ok(style) = ProgressStyle::default_bar().template(
                "{spinner:.green} {msg} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec:.1.yellow}, {eta})",
            ) {
                pb.set_style(style.progress_chars("#>-"));
            }
            pb
        }
        None => {
            let pb = ProgressBar::new_spinner();
            if let Ok(style) =
                ProgressStyle::default_spinner().template("{spinner:.green} {msg} {pos} frames")
            {
                pb.set_style(style);
            }
            pb
        }
    };
    pb.set_message(label.to_string());
    pb
}

/// Drain `source`, handing every frame to `processor` in order.
pub fn process_source<P>(
    source: &mut dyn FrameSource,
    show_progress: bool,
    mut processor: P,
) -> Result<ProcessingStats, PipelineError>
where
    P: FrameProcessor,
{
    let start_time = Instant::now();
    let pb = frame_progress(source.frame_count_hint(), show_progress, "extract");
    let mut processed_frames = 0;

    while let Some(frame) = source.next_frame()? {
        processor.process(frame)?;
        processed_frames += 1;
        pb.inc(1);
    }

    pb.finish_and_clear();

    Ok(ProcessingStats {
        processed_frames,
        duration: start_time.elapsed(),
    })
}

/// Write every frame of `source` into the workspace's frames directory as
/// `frame_NNNN.png`. Returns the number of frames written.
pub fn extract_frames(
    source: &mut dyn FrameSource,
    workspace: &Workspace,
    show_progress: bool,
) -> Result<usize, PipelineError> {
    let stats = process_source(source, show_progress, |frame: Frame| {
        let path = workspace.frame_path(frame.index);
        frame
            .image
            .save(&path)
            .map_err(|e| PipelineError::from_image(&path, e))
    })?;

    tracing::info!(
        "Extracted {} frames in {:.2}s",
        stats.processed_frames,
        stats.duration.as_secs_f64()
    );

    Ok(stats.processed_frames)
}
