use crate::api::error::ApiError;
use axum::body::Bytes;
use axum::extract::Multipart;
use axum::BoxError;
use futures::{Stream, TryStreamExt};
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, BufWriter};
use tokio_util::io::StreamReader;
use tracing::warn;
use uuid::Uuid;

/// Multipart field name carrying the source videos.
const VIDEOS_FIELD: &str = "videos";
/// Most source files accepted in one merge request.
pub const MAX_FILES: usize = 10;
/// Fewest source files that make a merge meaningful.
pub const MIN_FILES: usize = 2;

/// A source file staged in the upload directory, owned by the merge job
/// from this point on.
#[derive(Debug)]
pub struct UploadedFile {
    pub path: PathBuf,
    pub original_name: String,
}

/// Persist every `videos` part of the request into `dir` under a unique
/// name. Validation failures (too few, too many, not a video, oversized,
/// unreadable multipart) reject the whole request and remove anything
/// already staged, so a rejected request leaves no files behind.
pub async fn collect_videos(
    multipart: &mut Multipart,
    dir: &Path,
    max_file_bytes: u64,
) -> Result<Vec<UploadedFile>, ApiError> {
    let mut saved = Vec::new();
    match collect_into(multipart, dir, max_file_bytes, &mut saved).await {
        Ok(()) => Ok(saved),
        Err(err) => {
            discard(&saved).await;
            Err(err)
        }
    }
}

async fn collect_into(
    multipart: &mut Multipart,
    dir: &Path,
    max_file_bytes: u64,
    saved: &mut Vec<UploadedFile>,
) -> Result<(), ApiError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| ApiError::Upload(err.to_string()))?
    {
        if field.name() != Some(VIDEOS_FIELD) {
            continue;
        }
        let file_name = match field.file_name() {
            Some(name) => name.to_owned(),
            None => continue,
        };

        if !field
            .content_type()
            .is_some_and(|ct| ct.starts_with("video/"))
        {
            return Err(ApiError::UnsupportedMedia(file_name));
        }
        if saved.len() == MAX_FILES {
            return Err(ApiError::TooManyFiles);
        }

        let path = dir.join(format!("{}-{}", Uuid::new_v4(), sanitize_file_name(&file_name)));
        match stream_to_file(&path, field, max_file_bytes).await {
            Ok(()) => saved.push(UploadedFile {
                path,
                original_name: file_name,
            }),
            Err(SaveError::TooLarge) => {
                remove_quietly(&path).await;
                return Err(ApiError::FileTooLarge(file_name));
            }
            Err(SaveError::Io(err)) => {
                remove_quietly(&path).await;
                return Err(ApiError::Upload(err.to_string()));
            }
        }
    }

    if saved.len() < MIN_FILES {
        return Err(ApiError::InsufficientFiles);
    }
    Ok(())
}

/// Best-effort removal of staged files after a rejected request.
pub async fn discard(files: &[UploadedFile]) {
    for file in files {
        remove_quietly(&file.path).await;
    }
}

async fn remove_quietly(path: &Path) {
    if let Err(err) = tokio::fs::remove_file(path).await {
        warn!(path = %path.display(), error = %err, "Failed to remove staged upload");
    }
}

enum SaveError {
    TooLarge,
    Io(io::Error),
}

// Save a `Stream` to a file, refusing streams longer than `limit` bytes.
async fn stream_to_file<S, E>(path: &Path, stream: S, limit: u64) -> Result<(), SaveError>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: Into<BoxError>,
{
    let body_with_io_error = stream.map_err(|err| io::Error::new(io::ErrorKind::Other, err));
    let body_reader = StreamReader::new(body_with_io_error);
    futures::pin_mut!(body_reader);

    let mut file = BufWriter::new(File::create(path).await.map_err(SaveError::Io)?);
    // Read one byte past the limit so an oversized stream is detectable.
    let mut limited = body_reader.take(limit + 1);
    let copied = tokio::io::copy(&mut limited, &mut file)
        .await
        .map_err(SaveError::Io)?;
    if copied > limit {
        return Err(SaveError::TooLarge);
    }

    Ok(())
}

/// Client-supplied names are reduced to their final path component before
/// they touch the filesystem.
fn sanitize_file_name(raw: &str) -> String {
    Path::new(raw)
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("upload.bin")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use futures::stream;
    use std::fs;
    use tempfile::tempdir;

    type E = std::io::Error;

    #[tokio::test]
    async fn stream_to_file_writes_contents() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("clip.mp4");

        let data = "fake video bytes";
        let mock_stream = stream::iter(vec![Ok::<Bytes, E>(Bytes::from(data))]);

        assert!(stream_to_file(&path, mock_stream, 1024).await.is_ok());
        assert_eq!(fs::read_to_string(path).unwrap(), data);
    }

    #[tokio::test]
    async fn stream_to_file_propagates_stream_errors() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("clip.mp4");

        let mock_stream = stream::iter(vec![Err("connection reset")]);

        let result = stream_to_file(&path, mock_stream, 1024).await;
        assert!(matches!(result, Err(SaveError::Io(_))));
    }

    #[tokio::test]
    async fn stream_to_file_rejects_oversized_streams() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("clip.mp4");

        let chunks: Vec<Result<Bytes, E>> =
            vec![Ok(Bytes::from(vec![0u8; 64])), Ok(Bytes::from(vec![0u8; 64]))];
        let result = stream_to_file(&path, stream::iter(chunks), 100).await;
        assert!(matches!(result, Err(SaveError::TooLarge)));
    }

    #[test]
    fn file_names_are_reduced_to_their_basename() {
        assert_eq!(sanitize_file_name("clip.mp4"), "clip.mp4");
        assert_eq!(sanitize_file_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_file_name("dir/nested.mp4"), "nested.mp4");
        assert_eq!(sanitize_file_name(""), "upload.bin");
    }
}
