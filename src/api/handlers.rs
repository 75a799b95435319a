use crate::api::error::ApiError;
use crate::api::upload;
use crate::api::AppState;
use crate::jobs::registry::LIST_LIMIT;
use crate::jobs::{Job, JobRegistry, JobStatus};
use axum::body::Body;
use axum::extract::{Multipart, Path, Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path as StdPath, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::io::ReaderStream;
use tracing::{error, warn};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeQuery {
    pub output_file_name: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeAccepted {
    pub job_id: String,
    pub status: JobStatus,
    pub message: String,
    pub status_url: String,
    pub download_url: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusResponse {
    pub job_id: String,
    pub status: JobStatus,
    pub progress: u8,
    pub start_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    /// Milliseconds from submission to terminal state.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_file_name: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSummary {
    pub job_id: String,
    pub status: JobStatus,
    pub progress: u8,
    pub start_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    pub output_file_name: String,
}

#[derive(Debug, Serialize)]
pub struct JobListResponse {
    pub jobs: Vec<JobSummary>,
    pub total: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobDeleted {
    pub message: String,
    pub job_id: String,
}

/// Synchronous merge: the caller blocks until the job terminates and
/// receives the artifact directly. Internally this is the async path run to
/// completion; the record is ephemeral since nobody will poll it.
pub async fn merge(
    State(state): State<AppState>,
    Query(query): Query<MergeQuery>,
    mut multipart: Multipart,
) -> Result<Response, ApiError> {
    let files = upload::collect_videos(
        &mut multipart,
        &state.config.upload_dir,
        state.config.max_file_bytes,
    )
    .await?;

    let output_file_name = resolve_output_name(query.output_file_name);
    let job = state.registry.create(output_file_name.clone()).await;
    let output_path = artifact_path(&state, &job);
    let inputs: Vec<PathBuf> = files.iter().map(|f| f.path.clone()).collect();

    let result = state.runner.run(&job.id, inputs, output_path).await;
    state.registry.delete(&job.id).await;

    let artifact = result.map_err(|err| ApiError::MergeFailed(err.to_string()))?;
    let response = serve_artifact(&artifact, &output_file_name).await?;
    schedule_artifact_expiry(
        artifact,
        state.config.download_linger,
        None,
        state.registry.clone(),
    );
    Ok(response)
}

/// Asynchronous merge: responds with the job id as soon as the record
/// exists; the merge itself runs on a spawned task and failures are
/// captured into the record, never thrown back across this boundary.
pub async fn merge_async(
    State(state): State<AppState>,
    Query(query): Query<MergeQuery>,
    mut multipart: Multipart,
) -> Result<Json<MergeAccepted>, ApiError> {
    let files = upload::collect_videos(
        &mut multipart,
        &state.config.upload_dir,
        state.config.max_file_bytes,
    )
    .await?;

    let output_file_name = resolve_output_name(query.output_file_name);
    let job = state.registry.create(output_file_name).await;
    let output_path = artifact_path(&state, &job);
    let inputs: Vec<PathBuf> = files.iter().map(|f| f.path.clone()).collect();

    let runner = state.runner.clone();
    let run_id = job.id.clone();
    tokio::spawn(async move {
        if let Err(err) = runner.run(&run_id, inputs, output_path).await {
            error!(job_id = %run_id, error = %err, "Async merge failed");
        }
    });

    Ok(Json(MergeAccepted {
        status_url: format!("/api/jobs/{}", job.id),
        download_url: format!("/api/jobs/{}/download", job.id),
        job_id: job.id,
        status: JobStatus::Started,
        message: String::from("Video merge job started successfully"),
    }))
}

pub async fn job_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<JobStatusResponse>, ApiError> {
    let job = state.registry.get(&id).await.ok_or(ApiError::JobNotFound)?;
    Ok(Json(status_response(&job)))
}

/// Serves the artifact of a completed job. The artifact and the record are
/// expired a short fixed delay after the download begins.
pub async fn download(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let job = state.registry.get(&id).await.ok_or(ApiError::JobNotFound)?;
    if job.status != JobStatus::Completed {
        return Err(ApiError::JobNotReady {
            status: job.status,
            progress: job.progress,
        });
    }

    let artifact = job.output_path.clone().ok_or(ApiError::ArtifactMissing)?;
    if !tokio::fs::try_exists(&artifact).await.unwrap_or(false) {
        return Err(ApiError::ArtifactMissing);
    }

    let response = serve_artifact(&artifact, &job.output_file_name).await?;
    schedule_artifact_expiry(
        artifact,
        state.config.download_linger,
        Some(job.id),
        state.registry.clone(),
    );
    Ok(response)
}

pub async fn list_jobs(State(state): State<AppState>) -> Json<JobListResponse> {
    let jobs = state.registry.list(LIST_LIMIT).await;
    let jobs: Vec<JobSummary> = jobs.iter().map(summary).collect();
    Json(JobListResponse {
        total: jobs.len(),
        jobs,
    })
}

pub async fn delete_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<JobDeleted>, ApiError> {
    let job = state.registry.get(&id).await.ok_or(ApiError::JobNotFound)?;

    // Release the artifact before dropping the record.
    if let Some(path) = &job.output_path {
        if let Err(err) = tokio::fs::remove_file(path).await {
            warn!(artifact = %path.display(), error = %err, "Failed to remove artifact on delete");
        }
    }
    state.registry.delete(&id).await;

    Ok(Json(JobDeleted {
        message: String::from("Job deleted successfully"),
        job_id: id,
    }))
}

fn status_response(job: &Job) -> JobStatusResponse {
    let completed = job.status == JobStatus::Completed;
    JobStatusResponse {
        job_id: job.id.clone(),
        status: job.status,
        progress: job.progress,
        start_time: job.start_time,
        end_time: job.end_time,
        duration: job.duration_ms(),
        error: job.error.clone(),
        download_url: completed.then(|| format!("/api/jobs/{}/download", job.id)),
        output_file_name: completed.then(|| job.output_file_name.clone()),
    }
}

fn summary(job: &Job) -> JobSummary {
    JobSummary {
        job_id: job.id.clone(),
        status: job.status,
        progress: job.progress,
        start_time: job.start_time,
        end_time: job.end_time,
        output_file_name: job.output_file_name.clone(),
    }
}

/// On-disk artifact location. The job id prefix keeps artifacts of jobs
/// that requested the same output name from clobbering each other; the
/// user-facing name is only used for the download.
fn artifact_path(state: &AppState, job: &Job) -> PathBuf {
    state
        .config
        .output_dir
        .join(format!("{}-{}", job.id, job.output_file_name))
}

fn resolve_output_name(requested: Option<String>) -> String {
    requested
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .and_then(|name| {
            StdPath::new(name)
                .file_name()
                .and_then(|base| base.to_str())
                .map(ToOwned::to_owned)
        })
        .unwrap_or_else(|| format!("merged-video-{}.mp4", Utc::now().timestamp_millis()))
}

async fn serve_artifact(path: &StdPath, file_name: &str) -> Result<Response, ApiError> {
    let file = tokio::fs::File::open(path)
        .await
        .map_err(|_| ApiError::ArtifactMissing)?;
    let len = file
        .metadata()
        .await
        .map_err(|err| ApiError::Internal(err.to_string()))?
        .len();

    let body = Body::from_stream(ReaderStream::new(file));
    let headers = [
        (header::CONTENT_TYPE, String::from("application/octet-stream")),
        (header::CONTENT_LENGTH, len.to_string()),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{file_name}\""),
        ),
    ];
    Ok((headers, body).into_response())
}

/// Remove a handed-off artifact (and optionally its registry entry) after
/// the linger delay. Best-effort: an artifact that is already gone is only
/// worth a log line.
fn schedule_artifact_expiry(
    artifact: PathBuf,
    linger: Duration,
    registry_entry: Option<String>,
    registry: Arc<JobRegistry>,
) {
    tokio::spawn(async move {
        tokio::time::sleep(linger).await;
        if let Err(err) = tokio::fs::remove_file(&artifact).await {
            warn!(artifact = %artifact.display(), error = %err, "Failed to expire downloaded artifact");
        }
        if let Some(id) = registry_entry {
            registry.delete(&id).await;
        }
    });
}
