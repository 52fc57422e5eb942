use crate::error::PipelineError;
use crate::pipeline::stack::sort_by_numeric_key;
use crate::run_artifacts::{DetectionRecord, RunManifest};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "tif", "tiff", "bmp"];

const FRAMES_DIR: &str = "frames";
const PROCESSED_DIR: &str = "processed";
const MANIFEST_FILE: &str = "run.json";
const DETECTIONS_FILE: &str = "detections.csv";

/// Scratch area owned by one pipeline at a time.
///
/// `frames/` holds extracted frames, `processed/` the annotated copies. Both
/// are wiped at the start of every run; the run manifest and detection log
/// sit next to them.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn frames_dir(&self) -> PathBuf {
        self.root.join(FRAMES_DIR)
    }

    pub fn processed_dir(&self) -> PathBuf {
        self.root.join(PROCESSED_DIR)
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.root.join(MANIFEST_FILE)
    }

    pub fn detections_path(&self) -> PathBuf {
        self.root.join(DETECTIONS_FILE)
    }

    pub fn frame_file_name(index: usize) -> String {
        format!("frame_{:04}.png", index)
    }

    pub fn frame_path(&self, index: usize) -> PathBuf {
        self.frames_dir().join(Self::frame_file_name(index))
    }

    pub fn processed_path(&self, file_name: &str) -> PathBuf {
        self.processed_dir().join(file_name)
    }

    /// Remove and recreate the frame and processed directories so nothing
    /// from a previous run leaks into this one.
    pub fn reset(&self) -> Result<(), PipelineError> {
        for dir in [self.frames_dir(), self.processed_dir()] {
            if dir.exists() {
                fs::remove_dir_all(&dir).map_err(|e| PipelineError::io(&dir, e))?;
            }
            fs::create_dir_all(&dir).map_err(|e| PipelineError::io(&dir, e))?;
        }
        tracing::debug!("Reset workspace at {:?}", self.root);
        Ok(())
    }

    pub fn list_frames(&self) -> Result<Vec<PathBuf>, PipelineError> {
        list_image_files(&self.frames_dir())
    }

    pub fn list_processed(&self) -> Result<Vec<PathBuf>, PipelineError> {
        list_image_files(&self.processed_dir())
    }

    pub fn write_manifest(&self, manifest: &RunManifest) -> Result<(), PipelineError> {
        let path = self.manifest_path();
        let content = serde_json::to_string_pretty(manifest)
            .map_err(|e| PipelineError::io(&path, e.into()))?;
        fs::write(&path, content).map_err(|e| PipelineError::io(&path, e))
    }

    pub fn read_manifest(&self) -> Result<RunManifest, PipelineError> {
        let path = self.manifest_path();
        let content = fs::read_to_string(&path).map_err(|e| PipelineError::io(&path, e))?;
        serde_json::from_str(&content).map_err(|e| PipelineError::decode(&path, e))
    }

    pub fn detections_writer(&self) -> Result<csv::Writer<fs::File>, PipelineError> {
        let path = self.detections_path();
        csv::Writer::from_path(&path).map_err(|e| PipelineError::io(&path, e.into()))
    }

    pub fn read_detections(&self) -> Result<Vec<DetectionRecord>, PipelineError> {
        let path = self.detections_path();
        let mut reader =
            csv::Reader::from_path(&path).map_err(|e| PipelineError::io(&path, e.into()))?;
        reader
            .deserialize()
            .collect::<Result<Vec<DetectionRecord>, _>>()
            .map_err(|e| PipelineError::decode(&path, e))
    }
}

/// Image files directly inside `dir`, ordered by the numeric key of their names.
pub fn list_image_files(dir: &Path) -> Result<Vec<PathBuf>, PipelineError> {
    if !dir.is_dir() {
        return Err(PipelineError::io(
            dir,
            std::io::Error::new(std::io::ErrorKind::NotFound, "not a directory"),
        ));
    }

    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| {
            e.path()
                .extension()
                .and_then(|s| s.to_str())
                .map(|s| IMAGE_EXTENSIONS.contains(&s.to_lowercase().as_str()))
                .unwrap_or(false)
        })
        .map(|e| e.path().to_path_buf())
        .collect();

    sort_by_numeric_key(&mut files);
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reset_clears_stale_frames_but_keeps_root_files() {
        let dir = tempfile::tempdir().unwrap();
        let workspace = Workspace::new(dir.path());
        workspace.reset().unwrap();

        fs::write(workspace.frame_path(7), b"stale").unwrap();
        fs::write(workspace.processed_path("frame_0007.png"), b"stale").unwrap();
        fs::write(dir.path().join("upload.avi"), b"keep me").unwrap();

        workspace.reset().unwrap();

        assert!(workspace.frames_dir().is_dir());
        assert!(workspace.processed_dir().is_dir());
        assert_eq!(fs::read_dir(workspace.frames_dir()).unwrap().count(), 0);
        assert_eq!(fs::read_dir(workspace.processed_dir()).unwrap().count(), 0);
        assert!(dir.path().join("upload.avi").exists());
    }

    #[test]
    fn test_frame_names_are_zero_padded() {
        assert_eq!(Workspace::frame_file_name(3), "frame_0003.png");
        assert_eq!(Workspace::frame_file_name(12345), "frame_12345.png");
    }

    #[test]
    fn test_list_image_files_filters_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b_10.PNG", "b_9.jpg", "readme.md", "a_100.tif"] {
            fs::write(dir.path().join(name), b"").unwrap();
        }
        fs::create_dir(dir.path().join("nested_1.png")).unwrap();

        let names: Vec<String> = list_image_files(dir.path())
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();

        assert_eq!(names, vec!["b_9.jpg", "b_10.PNG", "a_100.tif"]);
    }
}
