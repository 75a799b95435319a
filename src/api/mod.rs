//! HTTP surface: router, shared state, and the request handlers consuming
//! the job registry and runner.

pub mod error;
pub mod handlers;
pub mod upload;

use crate::config::Config;
use crate::encoder::Encoder;
use crate::jobs::{JobRegistry, JobRunner};
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: Arc<JobRegistry>,
    pub runner: Arc<JobRunner>,
}

impl AppState {
    pub fn new(config: Config, encoder: Arc<dyn Encoder>) -> Self {
        let registry = Arc::new(JobRegistry::new());
        let runner = Arc::new(JobRunner::new(registry.clone(), encoder));
        Self {
            config: Arc::new(config),
            registry,
            runner,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api", get(api_index))
        .route("/api/merge", post(handlers::merge))
        .route("/api/merge/async", post(handlers::merge_async))
        .route("/api/jobs", get(handlers::list_jobs))
        .route(
            "/api/jobs/:id",
            get(handlers::job_status).delete(handlers::delete_job),
        )
        .route("/api/jobs/:id/download", get(handlers::download))
        // Uploads are size-limited per file, not per request body.
        .layer(DefaultBodyLimit::disable())
        .with_state(state)
}

async fn api_index() -> Json<serde_json::Value> {
    Json(json!({
        "name": "Medley Video Merge API",
        "version": env!("CARGO_PKG_VERSION"),
        "description": "API for merging multiple video files",
        "endpoints": {
            "POST /api/merge": "Upload and merge video files, responds with the merged file",
            "POST /api/merge/async": "Start a merge job, responds with a job id for tracking",
            "GET /api/jobs/{id}": "Status and progress of a merge job",
            "GET /api/jobs/{id}/download": "Download a completed merge result",
            "GET /api/jobs": "List recent jobs",
            "DELETE /api/jobs/{id}": "Delete a job and its stored output"
        },
        "examples": {
            "curl_sync": "curl -X POST -F \"videos=@a.mp4\" -F \"videos=@b.mp4\" http://localhost:3000/api/merge -o merged.mp4",
            "curl_async": "curl -X POST -F \"videos=@a.mp4\" -F \"videos=@b.mp4\" http://localhost:3000/api/merge/async"
        }
    }))
}
