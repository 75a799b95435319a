use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Lifecycle of a merge job. `Started` and `Processing` are both in flight;
/// `Processing` means the encoder has confirmed it is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Started,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// One tracked unit of merge work.
///
/// Created by a submission handler, mutated only by the runner while the
/// job executes, read by the status/list handlers. Exactly one of
/// `output_path` / `error` is populated once `end_time` is set.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: String,
    pub status: JobStatus,
    /// Percent complete, 0-100, non-decreasing while processing.
    pub progress: u8,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    /// Desired artifact name, fixed at creation.
    pub output_file_name: String,
    /// On-disk artifact location, set on successful completion.
    pub output_path: Option<PathBuf>,
    pub error: Option<String>,
    /// Encoder invocation captured for diagnostics once processing begins.
    pub command_line: Option<String>,
}

impl Job {
    pub fn new(id: String, output_file_name: String) -> Self {
        Self {
            id,
            status: JobStatus::Started,
            progress: 0,
            start_time: Utc::now(),
            end_time: None,
            output_file_name,
            output_path: None,
            error: None,
            command_line: None,
        }
    }

    /// Wall-clock duration in milliseconds, available once terminal.
    pub fn duration_ms(&self) -> Option<i64> {
        self.end_time
            .map(|end| (end - self.start_time).num_milliseconds())
    }
}
