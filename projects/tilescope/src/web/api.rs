use crate::error::PipelineError;
use crate::pipeline::orchestrator::{output_file_name, Pipeline};
use async_stream::try_stream;
use axum::{
    body::{Body, Bytes},
    extract::{Multipart, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use futures::Stream;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tempfile::TempPath;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Size of each chunk streamed back to the client.
pub const CHUNK_SIZE: usize = 8192;

pub struct AppState {
    /// One pipeline, one run at a time
    pub pipeline: Arc<Mutex<Pipeline>>,
    pub upload_dir: PathBuf,
}

pub enum ApiError {
    BadRequest(String),
    Pipeline(PipelineError),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Pipeline(err) if matches!(err.root(), PipelineError::InvalidConfig(_)) => {
                (StatusCode::BAD_REQUEST, err.to_string())
            }
            ApiError::Pipeline(err) => {
                tracing::error!("Pipeline failed: {}", err);
                (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
            }
            ApiError::Internal(msg) => {
                tracing::error!("Upload failed: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };
        (status, message).into_response()
    }
}

fn bad_request(e: impl ToString) -> ApiError {
    ApiError::BadRequest(e.to_string())
}

fn internal(e: impl ToString) -> ApiError {
    ApiError::Internal(e.to_string())
}

pub async fn health_handler() -> &'static str {
    "ok"
}

/// `POST /upload`: multipart `file` plus optional `confidence`.
///
/// Saves the upload, runs the pipeline on a blocking thread and streams the
/// processed stack back as an attachment.
pub async fn upload_handler(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Response, ApiError> {
    let mut confidence: Option<f32> = None;
    let mut upload: Option<(TempPath, String)> = None;

    while let Some(mut field) = multipart.next_field().await.map_err(bad_request)? {
        let name = field.name().map(str::to_owned);
        match name.as_deref() {
            Some("file") => {
                let file_name = field
                    .file_name()
                    .and_then(sanitize_file_name)
                    .ok_or_else(|| bad_request("No file selected"))?;

                tokio::fs::create_dir_all(&state.upload_dir)
                    .await
                    .map_err(internal)?;
                let (file, path) =
                    reserve_upload(&state.upload_dir, &file_name).map_err(internal)?;
                let mut file = tokio::fs::File::from_std(file);
                let mut written = 0usize;
                while let Some(chunk) = field.chunk().await.map_err(bad_request)? {
                    file.write_all(&chunk).await.map_err(internal)?;
                    written += chunk.len();
                }
                file.flush().await.map_err(internal)?;

                tracing::info!("Saved upload {:?} as {:?} ({} bytes)", file_name, path, written);
                upload = Some((path, file_name));
            }
            Some("confidence") => {
                let text = field.text().await.map_err(bad_request)?;
                let value = text
                    .trim()
                    .parse::<f32>()
                    .map_err(|_| bad_request(format!("invalid confidence '{}'", text.trim())))?;
                confidence = Some(value);
            }
            _ => {}
        }
    }

    let (input, file_name) = upload.ok_or_else(|| bad_request("No file part"))?;
    let download_name = output_file_name(Path::new(&file_name));

    let pipeline = state.pipeline.clone();
    let stack = tokio::task::spawn_blocking(move || {
        let mut pipeline = lock_recovering(&*pipeline);
        let stack_path = pipeline
            .run(&input, confidence)
            .map_err(ApiError::Pipeline)?;
        // Open before the lock is released so no later run can replace the file
        let stack = std::fs::File::open(&stack_path).map_err(internal)?;
        if let Err(e) = std::fs::remove_file(&stack_path) {
            tracing::debug!("Keeping {:?} after open: {}", stack_path, e);
        }
        drop(input);
        Ok::<_, ApiError>(stack)
    })
    .await
    .map_err(internal)??;

    Response::builder()
        .header(header::CONTENT_TYPE, "image/tiff")
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", download_name),
        )
        .body(Body::from_stream(chunked(
            tokio::fs::File::from_std(stack),
            CHUNK_SIZE,
        )))
        .map_err(internal)
}

/// Create a file in `dir` named after `file_name` plus a random suffix, so
/// two uploads of the same name never share a path. The extension is kept
/// because it picks the frame source. The file is removed when the returned
/// path is dropped.
pub fn reserve_upload(dir: &Path, file_name: &str) -> std::io::Result<(std::fs::File, TempPath)> {
    let path = Path::new(file_name);
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("upload");
    let suffix = path
        .extension()
        .and_then(|s| s.to_str())
        .map(|ext| format!(".{}", ext))
        .unwrap_or_default();

    let named = tempfile::Builder::new()
        .prefix(&format!("{}-", stem))
        .suffix(&suffix)
        .tempfile_in(dir)?;
    Ok(named.into_parts())
}

/// A panicking detector poisons the lock; the next run resets the workspace
/// anyway, so the pipeline stays usable.
fn lock_recovering<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| {
        tracing::warn!("Recovering pipeline lock after a panicked run");
        poisoned.into_inner()
    })
}

/// Read `reader` to the end in chunks of at most `chunk_size` bytes.
pub fn chunked<R>(mut reader: R, chunk_size: usize) -> impl Stream<Item = std::io::Result<Bytes>>
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    try_stream! {
        let mut buf = vec![0u8; chunk_size];
        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            yield Bytes::copy_from_slice(&buf[..n]);
        }
    }
}

/// Reduce a client-supplied name to a safe file name inside the upload dir.
///
/// Directory parts are stripped, whitespace becomes `_` and anything other
/// than ASCII alphanumerics, `.`, `-` and `_` is dropped. Returns `None`
/// when nothing usable is left.
pub fn sanitize_file_name(name: &str) -> Option<String> {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned: String = base
        .chars()
        .filter_map(|c| match c {
            c if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') => Some(c),
            c if c.is_whitespace() => Some('_'),
            _ => None,
        })
        .collect();
    let cleaned = cleaned.trim_start_matches(['.', '_']).to_string();

    (!cleaned.is_empty() && Path::new(&cleaned).file_stem().is_some()).then_some(cleaned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(
            sanitize_file_name("LESC pos 3.avi").as_deref(),
            Some("LESC_pos_3.avi")
        );
        assert_eq!(
            sanitize_file_name("../../etc/passwd").as_deref(),
            Some("passwd")
        );
        assert_eq!(
            sanitize_file_name("C:\\videos\\run-7.tif").as_deref(),
            Some("run-7.tif")
        );
        assert_eq!(sanitize_file_name(".hidden").as_deref(), Some("hidden"));
        assert_eq!(sanitize_file_name("..."), None);
        assert_eq!(sanitize_file_name(""), None);
    }

    #[test]
    fn test_same_name_uploads_get_distinct_paths() {
        let dir = tempfile::tempdir().unwrap();

        let (_, first) = reserve_upload(dir.path(), "clip.avi").unwrap();
        let (_, second) = reserve_upload(dir.path(), "clip.avi").unwrap();

        assert_ne!(first.to_path_buf(), second.to_path_buf());
        for path in [&first, &second] {
            let name = path.file_name().unwrap().to_string_lossy().into_owned();
            assert!(name.starts_with("clip-"), "{name}");
            assert!(name.ends_with(".avi"), "{name}");
            assert!(path.exists());
        }

        let kept = first.to_path_buf();
        drop(first);
        assert!(!kept.exists());
        assert!(second.exists());
    }

    #[test]
    fn test_extensionless_upload_keeps_its_stem() {
        let dir = tempfile::tempdir().unwrap();
        let (_, path) = reserve_upload(dir.path(), "frames").unwrap();
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("frames-"), "{name}");
        assert!(path.extension().is_none());
    }

    #[test]
    fn test_poisoned_lock_is_recovered() {
        let mutex = Arc::new(Mutex::new(7u32));
        let poisoner = mutex.clone();
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.lock().unwrap();
            panic!("detector blew up");
        })
        .join();
        assert!(mutex.is_poisoned());

        assert_eq!(*lock_recovering(&*mutex), 7);
    }

    #[tokio::test]
    async fn test_chunked_splits_at_chunk_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blob.bin");
        let data: Vec<u8> = (0..20_000u32).map(|i| (i % 251) as u8).collect();
        std::fs::write(&path, &data).unwrap();

        let file = tokio::fs::File::open(&path).await.unwrap();
        let chunks: Vec<Bytes> = chunked(file, CHUNK_SIZE)
            .map(|c| c.unwrap())
            .collect()
            .await;

        let total: usize = chunks.iter().map(|c| c.len()).sum();
        assert_eq!(total, data.len());
        assert!(chunks.iter().all(|c| c.len() <= CHUNK_SIZE));
        assert_eq!(chunks.concat(), data);
    }

    #[tokio::test]
    async fn test_chunked_empty_reader() {
        let chunks: Vec<_> = chunked(tokio::io::empty(), CHUNK_SIZE).collect().await;
        assert!(chunks.is_empty());
    }

    #[test]
    fn test_invalid_config_maps_to_bad_request() {
        let response =
            ApiError::Pipeline(PipelineError::InvalidConfig("confidence".into())).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let staged = PipelineError::InvalidConfig("confidence".into())
            .at_stage(crate::pipeline::types::PipelineStage::Idle);
        let response = ApiError::Pipeline(staged).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = ApiError::Pipeline(PipelineError::EmptyStack).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
