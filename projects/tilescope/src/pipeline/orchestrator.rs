// Pipeline orchestrator: manages the lifecycle of one run
//
// Idle -> FramesExtracting -> FramesAnnotating -> StackAssembling -> Done,
// with Failed reachable from every non-terminal stage. Each frame is tiled,
// detected and annotated before the next one starts.

use crate::error::PipelineError;
use crate::pipeline::annotate::{annotate_frame, AnnotationStyle};
use crate::pipeline::config::{validate_confidence, PipelineConfig};
use crate::pipeline::detection::Detector;
use crate::pipeline::slicing::generate_tiles;
use crate::pipeline::stack::assemble;
use crate::pipeline::types::{Frame, PipelineStage};
use crate::run_artifacts::{DetectionRecord, RunManifest};
use crate::run_context::Workspace;
use crate::video::open_source;
use crate::video::processor::{extract_frames, frame_progress};
use chrono::Utc;
use std::path::{Path, PathBuf};

/// `<input stem>_processed.tif`
pub fn output_file_name(input: &Path) -> String {
    let stem = input
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .unwrap_or("stack");
    format!("{}_processed.tif", stem)
}

/// Owns the detector and the scratch workspace for a sequence of runs.
///
/// The detector is loaded once by the caller and reused read-only for every
/// tile of every frame. Runs on one `Pipeline` never overlap because `run`
/// takes `&mut self`.
pub struct Pipeline {
    detector: Box<dyn Detector>,
    config: PipelineConfig,
    workspace: Workspace,
    show_progress: bool,
}

/// Tracks stage transitions and the manifest of the run in flight.
struct RunTracker {
    stage: PipelineStage,
    manifest: RunManifest,
}

impl RunTracker {
    fn new(input: &Path, confidence: f32, config: &PipelineConfig) -> Self {
        let started_at = Utc::now();
        let stem = input
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("run");
        let run_id = format!("{}-{}", stem, started_at.format("%Y%m%dT%H%M%S%.3f"));

        Self {
            stage: PipelineStage::Idle,
            manifest: RunManifest {
                run_id,
                input: input.to_string_lossy().into_owned(),
                output: None,
                confidence,
                config: config.clone(),
                status: PipelineStage::Idle,
                error: None,
                frame_count: 0,
                detection_count: 0,
                started_at,
                finished_at: None,
            },
        }
    }

    fn advance(&mut self, next: PipelineStage) {
        debug_assert_eq!(self.stage.next(), Some(next));
        tracing::info!(
            "Run {}: {} -> {}",
            self.manifest.run_id,
            self.stage,
            next
        );
        self.stage = next;
        self.manifest.status = next;
    }

    fn fail(&mut self, err: &PipelineError) {
        tracing::error!(
            "Run {} failed during {}: {}",
            self.manifest.run_id,
            self.stage,
            err
        );
        self.stage = PipelineStage::Failed;
        self.manifest.status = PipelineStage::Failed;
        self.manifest.error = Some(err.to_string());
        self.manifest.finished_at = Some(Utc::now());
    }
}

impl Pipeline {
    pub fn new(
        detector: Box<dyn Detector>,
        config: PipelineConfig,
        workspace: Workspace,
    ) -> Result<Self, PipelineError> {
        config.validate()?;
        tracing::info!(
            "Pipeline ready: detector={}, grid={}x{}, workspace={:?}",
            detector.name(),
            config.grid.columns,
            config.grid.rows,
            workspace.root()
        );
        Ok(Self {
            detector,
            config,
            workspace,
            show_progress: false,
        })
    }

    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    /// Run the pipeline and write the stack into the workspace root as
    /// `<input stem>_processed.tif`.
    pub fn run(&mut self, input: &Path, confidence: Option<f32>) -> Result<PathBuf, PipelineError> {
        let destination = self.workspace.root().join(output_file_name(input));
        self.run_to(input, confidence, &destination)
    }

    /// Run the pipeline on `input`, writing the stack to `destination`.
    ///
    /// `confidence` overrides the configured threshold for this run only.
    /// On failure the error carries the stage it happened in and the
    /// workspace is left as-is for inspection.
    pub fn run_to(
        &mut self,
        input: &Path,
        confidence: Option<f32>,
        destination: &Path,
    ) -> Result<PathBuf, PipelineError> {
        let confidence = confidence.unwrap_or(self.config.confidence);
        let mut run = RunTracker::new(input, confidence, &self.config);

        match self.execute(&mut run, input, confidence, destination) {
            Ok(()) => {
                run.manifest.output = Some(destination.to_string_lossy().into_owned());
                run.manifest.finished_at = Some(Utc::now());
                self.workspace.write_manifest(&run.manifest)?;
                Ok(destination.to_path_buf())
            }
            Err(err) => {
                let err = err.at_stage(run.stage);
                run.fail(&err);
                if let Err(e) = self.workspace.write_manifest(&run.manifest) {
                    tracing::warn!("Could not record failed run manifest: {}", e);
                }
                Err(err)
            }
        }
    }

    fn execute(
        &mut self,
        run: &mut RunTracker,
        input: &Path,
        confidence: f32,
        destination: &Path,
    ) -> Result<(), PipelineError> {
        validate_confidence(confidence)?;

        run.advance(PipelineStage::FramesExtracting);
        self.workspace.reset()?;
        let mut source = open_source(input)?;
        let extracted = extract_frames(source.as_mut(), &self.workspace, self.show_progress)?;
        if extracted == 0 {
            return Err(PipelineError::decode(input, "no frames extracted"));
        }
        run.manifest.frame_count = extracted;

        run.advance(PipelineStage::FramesAnnotating);
        run.manifest.detection_count = self.annotate_frames(confidence)?;

        run.advance(PipelineStage::StackAssembling);
        let processed = self.workspace.list_processed()?;
        assemble(&processed, destination)?;

        run.advance(PipelineStage::Done);
        Ok(())
    }

    /// Annotate every extracted frame in numeric order. Returns the total
    /// number of boxes drawn.
    fn annotate_frames(&mut self, confidence: f32) -> Result<usize, PipelineError> {
        let frames = self.workspace.list_frames()?;
        let style = AnnotationStyle {
            tiers: self.config.tiers.clone(),
            thickness: self.config.thickness,
            nms_iou: self.config.nms_iou,
        };
        let mut log = self.workspace.detections_writer()?;
        let log_path = self.workspace.detections_path();
        let pb = frame_progress(Some(frames.len()), self.show_progress, "annotate");
        let mut total = 0;

        for (index, path) in frames.iter().enumerate() {
            let image = image::open(path)
                .map_err(|e| PipelineError::decode(path, e))?
                .to_rgb8();
            let frame = Frame { index, image };

            let tiles = generate_tiles(&frame.image, &self.config.grid)?;
            let annotated = annotate_frame(
                &frame,
                &tiles,
                self.detector.as_mut(),
                confidence,
                &style,
            )?;

            let file_name = path
                .file_name()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| Workspace::frame_file_name(index));
            let out = self.workspace.processed_path(&file_name);
            annotated
                .image
                .save(&out)
                .map_err(|e| PipelineError::from_image(&out, e))?;

            for detection in &annotated.detections {
                log.serialize(DetectionRecord {
                    frame: index,
                    file: file_name.clone(),
                    x1: detection.bbox.x1,
                    y1: detection.bbox.y1,
                    x2: detection.bbox.x2,
                    y2: detection.bbox.y2,
                    confidence: detection.confidence,
                    tier: style.tiers.tier_for(detection.confidence),
                })
                .map_err(|e| PipelineError::io(&log_path, e.into()))?;
            }

            total += annotated.detections.len();
            pb.inc(1);
        }

        log.flush().map_err(|e| PipelineError::io(&log_path, e))?;
        pb.finish_and_clear();

        tracing::info!(
            "Annotated {} frames, {} boxes drawn",
            frames.len(),
            total
        );
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::bright_spot::BrightSpotDetector;
    use crate::pipeline::detection::testing::ScriptedDetector;
    use crate::pipeline::stack::read_stack;
    use crate::pipeline::types::{Detection, Tier};
    use image::{Rgb, RgbImage};
    use std::fs::{self, File};
    use std::io::BufWriter;
    use tiff::encoder::{colortype, TiffEncoder};

    const GREEN: Rgb<u8> = Rgb([0, 255, 0]);
    const ORANGE: Rgb<u8> = Rgb([255, 165, 0]);
    const BLACK: Rgb<u8> = Rgb([0, 0, 0]);

    /// Square position in frame 1: column 1, row 2 of the 3x3 grid
    const SQUARE_X: u32 = 37;
    const SQUARE_Y: u32 = 64;

    /// Three 90x90 black frames; frame 1 carries a white 10x10 square.
    fn write_synthetic_video(path: &Path) {
        let file = File::create(path).unwrap();
        let mut encoder = TiffEncoder::new(BufWriter::new(file)).unwrap();
        for index in 0..3 {
            let mut frame = RgbImage::new(90, 90);
            if index == 1 {
                for y in SQUARE_Y..SQUARE_Y + 10 {
                    for x in SQUARE_X..SQUARE_X + 10 {
                        frame.put_pixel(x, y, Rgb([255, 255, 255]));
                    }
                }
            }
            encoder
                .write_image::<colortype::RGB8>(90, 90, frame.as_raw())
                .unwrap();
        }
    }

    fn pipeline_with(detector: Box<dyn Detector>, root: &Path) -> Pipeline {
        Pipeline::new(detector, PipelineConfig::default(), Workspace::new(root)).unwrap()
    }

    #[test]
    fn test_end_to_end_single_square() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("clip.tif");
        write_synthetic_video(&input);
        let work = dir.path().join("work");
        let mut pipeline = pipeline_with(Box::new(BrightSpotDetector::default()), &work);

        let stack_path = pipeline.run(&input, Some(0.15)).unwrap();

        assert_eq!(stack_path, work.join("clip_processed.tif"));
        let pages = read_stack(&stack_path).unwrap();
        assert_eq!(pages.len(), 3);

        // Frames 0 and 2 are untouched
        assert!(pages[0].pixels().all(|p| *p == BLACK));
        assert!(pages[2].pixels().all(|p| *p == BLACK));

        // Frame 1: one box around the square, in the high tier colour
        let page = &pages[1];
        assert_eq!(*page.get_pixel(SQUARE_X, SQUARE_Y), GREEN);
        assert_eq!(*page.get_pixel(SQUARE_X + 10, SQUARE_Y + 10), GREEN);
        assert_eq!(*page.get_pixel(SQUARE_X + 5, SQUARE_Y), GREEN);
        assert_eq!(*page.get_pixel(SQUARE_X + 5, SQUARE_Y + 5), Rgb([255, 255, 255]));

        let records = pipeline.workspace().read_detections().unwrap();
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.frame, 1);
        assert_eq!(record.file, "frame_0001.png");
        assert_eq!(
            (record.x1, record.y1, record.x2, record.y2),
            (
                SQUARE_X as f32,
                SQUARE_Y as f32,
                (SQUARE_X + 10) as f32,
                (SQUARE_Y + 10) as f32
            )
        );
        assert_eq!(record.tier, Tier::High);

        let manifest = pipeline.workspace().read_manifest().unwrap();
        assert_eq!(manifest.status, PipelineStage::Done);
        assert_eq!(manifest.frame_count, 3);
        assert_eq!(manifest.detection_count, 1);
        assert!(manifest.finished_at.is_some());
    }

    #[test]
    fn test_reported_confidence_picks_the_colour() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("clip.tif");
        write_synthetic_video(&input);

        // 9 tiles per frame; frame 1, tile 5 (offset 30, 60) reports one box
        let mut responses = vec![Vec::new(); 27];
        responses[9 + 5] = vec![Detection::new(7.0, 4.0, 17.0, 14.0, 0.3)];
        let mut pipeline =
            pipeline_with(Box::new(ScriptedDetector::new(responses)), &dir.path().join("w"));

        let stack_path = pipeline.run(&input, Some(0.1)).unwrap();

        let pages = read_stack(&stack_path).unwrap();
        assert_eq!(*pages[1].get_pixel(SQUARE_X, SQUARE_Y), ORANGE);
        assert_eq!(*pages[1].get_pixel(SQUARE_X + 10, SQUARE_Y + 10), ORANGE);
    }

    #[test]
    fn test_stale_artifacts_do_not_leak_into_the_stack() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("clip.tif");
        write_synthetic_video(&input);
        let work = dir.path().join("work");
        let workspace = Workspace::new(&work);
        workspace.reset().unwrap();
        RgbImage::new(90, 90)
            .save(workspace.processed_path("frame_0099.png"))
            .unwrap();
        RgbImage::new(90, 90)
            .save(workspace.frame_path(42))
            .unwrap();

        let mut pipeline = pipeline_with(Box::new(BrightSpotDetector::default()), &work);
        let stack_path = pipeline.run(&input, None).unwrap();

        assert_eq!(read_stack(&stack_path).unwrap().len(), 3);
    }

    #[test]
    fn test_empty_source_fails_during_extraction() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("empty_frames");
        fs::create_dir(&input).unwrap();
        let mut pipeline =
            pipeline_with(Box::new(BrightSpotDetector::default()), &dir.path().join("w"));

        let err = pipeline.run(&input, None).unwrap_err();

        assert_eq!(err.stage(), Some(PipelineStage::FramesExtracting));
        assert!(matches!(err.root(), PipelineError::Decode { .. }));
        let manifest = pipeline.workspace().read_manifest().unwrap();
        assert_eq!(manifest.status, PipelineStage::Failed);
        assert!(manifest.error.is_some());
    }

    #[test]
    fn test_missing_source_is_an_open_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut pipeline =
            pipeline_with(Box::new(BrightSpotDetector::default()), &dir.path().join("w"));

        let err = pipeline
            .run(&dir.path().join("missing.avi"), None)
            .unwrap_err();

        assert_eq!(err.stage(), Some(PipelineStage::FramesExtracting));
        assert!(matches!(err.root(), PipelineError::Open { .. }));
    }

    #[test]
    fn test_detector_failure_aborts_without_partial_stack() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("clip.tif");
        write_synthetic_video(&input);
        let work = dir.path().join("work");
        let mut detector = ScriptedDetector::new(Vec::new());
        detector.fail_on_call = Some(12);
        let mut pipeline = pipeline_with(Box::new(detector), &work);

        let err = pipeline.run(&input, None).unwrap_err();

        assert_eq!(err.stage(), Some(PipelineStage::FramesAnnotating));
        match err.root() {
            PipelineError::Detector { frame, tile, .. } => assert_eq!((*frame, *tile), (1, 3)),
            other => panic!("unexpected error: {other}"),
        }
        assert!(!work.join("clip_processed.tif").exists());
        // Extracted frames stay behind for diagnostics
        assert_eq!(pipeline.workspace().list_frames().unwrap().len(), 3);
    }

    #[test]
    fn test_out_of_range_confidence_is_rejected_before_any_work() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("clip.tif");
        write_synthetic_video(&input);
        let mut pipeline =
            pipeline_with(Box::new(BrightSpotDetector::default()), &dir.path().join("w"));

        let err = pipeline.run(&input, Some(1.5)).unwrap_err();

        assert_eq!(err.stage(), Some(PipelineStage::Idle));
        assert!(matches!(err.root(), PipelineError::InvalidConfig(_)));
    }

    #[test]
    fn test_output_file_name() {
        assert_eq!(
            output_file_name(Path::new("/data/LESC pos 3.avi")),
            "LESC pos 3_processed.tif"
        );
        assert_eq!(output_file_name(Path::new("frames_dir")), "frames_dir_processed.tif");
    }
}
