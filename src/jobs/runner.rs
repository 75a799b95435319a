use crate::encoder::{EncodeEvent, Encoder};
use crate::jobs::job::JobStatus;
use crate::jobs::registry::JobRegistry;
use chrono::Utc;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Debug)]
pub enum MergeError {
    /// The encoder reported a failure.
    Encode(String),
    /// The encoder went away without reporting a result.
    Interrupted,
}

impl fmt::Display for MergeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MergeError::Encode(msg) => write!(f, "encoding failed: {msg}"),
            MergeError::Interrupted => {
                write!(f, "encoder terminated without reporting a result")
            }
        }
    }
}

impl std::error::Error for MergeError {}

/// Drives one merge job from submission to terminal state: translates the
/// encoder's event stream into registry updates and releases everything the
/// job consumed once it is over. The runner is the only writer of a job's
/// record while it executes.
pub struct JobRunner {
    registry: Arc<JobRegistry>,
    encoder: Arc<dyn Encoder>,
}

impl JobRunner {
    pub fn new(registry: Arc<JobRegistry>, encoder: Arc<dyn Encoder>) -> Self {
        Self { registry, encoder }
    }

    /// Run job `job_id` to completion, merging `inputs` (in order) into
    /// `output_path`. Inputs are consumed: they are deleted when the job
    /// terminates, success or failure. Returns the artifact path for
    /// synchronous callers; asynchronous callers poll the registry instead.
    pub async fn run(
        &self,
        job_id: &str,
        inputs: Vec<PathBuf>,
        output_path: PathBuf,
    ) -> Result<PathBuf, MergeError> {
        let mut events = self.encoder.start(inputs.clone(), output_path.clone());

        let mut outcome = Err(MergeError::Interrupted);
        while let Some(event) = events.recv().await {
            match event {
                EncodeEvent::Started { command } => {
                    self.registry
                        .update(job_id, |job| {
                            job.status = JobStatus::Processing;
                            job.command_line = Some(command);
                        })
                        .await;
                }
                EncodeEvent::Progress { percent } => {
                    let reported = clamp_percent(percent);
                    self.registry
                        .update(job_id, |job| {
                            if reported > job.progress {
                                job.progress = reported;
                            }
                        })
                        .await;
                }
                EncodeEvent::Completed { output } => {
                    self.registry
                        .update(job_id, |job| {
                            job.status = JobStatus::Completed;
                            job.progress = 100;
                            job.end_time = Some(Utc::now());
                            job.output_path = Some(output.clone());
                        })
                        .await;
                    info!(job_id, output = %output.display(), "Merge completed");
                    outcome = Ok(output);
                    break;
                }
                EncodeEvent::Failed { message } => {
                    self.mark_failed(job_id, message.clone()).await;
                    error!(job_id, error = %message, "Merge failed");
                    outcome = Err(MergeError::Encode(message));
                    break;
                }
            }
        }

        if matches!(outcome, Err(MergeError::Interrupted)) {
            self.mark_failed(job_id, MergeError::Interrupted.to_string())
                .await;
            error!(job_id, "Encoder event stream closed without a terminal event");
        }

        // Inputs are consumed whatever the outcome.
        release_inputs(&inputs).await;

        if outcome.is_err() {
            discard_partial_output(&output_path).await;
        }

        outcome
    }

    async fn mark_failed(&self, job_id: &str, message: String) {
        self.registry
            .update(job_id, |job| {
                job.status = JobStatus::Failed;
                job.end_time = Some(Utc::now());
                job.error = Some(message);
            })
            .await;
    }
}

fn clamp_percent(percent: f64) -> u8 {
    percent.clamp(0.0, 100.0).round() as u8
}

/// Best-effort deletion of the consumed source files. A file that cannot be
/// removed is logged and left behind; it never fails the merge.
async fn release_inputs(inputs: &[PathBuf]) {
    for input in inputs {
        if let Err(err) = tokio::fs::remove_file(input).await {
            warn!(input = %input.display(), error = %err, "Failed to release input file");
        }
    }
}

/// A failed merge keeps no partial output.
async fn discard_partial_output(output_path: &Path) {
    match tokio::fs::try_exists(output_path).await {
        Ok(true) => {
            if let Err(err) = tokio::fs::remove_file(output_path).await {
                warn!(output = %output_path.display(), error = %err, "Failed to remove partial output");
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::MockEncoder;
    use crate::jobs::job::JobStatus;
    use std::fs;
    use tempfile::tempdir;
    use tokio::sync::mpsc;

    fn write_input(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, b"fake video bytes").unwrap();
        path
    }

    /// Encoder stub that replays a fixed event script, optionally writing
    /// the output file before the terminal event.
    fn scripted_encoder(events: Vec<EncodeEvent>, write_output: bool) -> MockEncoder {
        let mut encoder = MockEncoder::new();
        encoder
            .expect_start()
            .return_once(move |_inputs, output: PathBuf| {
                let (tx, rx) = mpsc::channel(8);
                tokio::spawn(async move {
                    for event in events {
                        let event = match event {
                            EncodeEvent::Completed { .. } => {
                                if write_output {
                                    tokio::fs::write(&output, b"merged").await.unwrap();
                                }
                                EncodeEvent::Completed {
                                    output: output.clone(),
                                }
                            }
                            other => other,
                        };
                        let _ = tx.send(event).await;
                    }
                });
                rx
            });
        encoder
    }

    #[tokio::test]
    async fn completed_merge_updates_job_and_releases_inputs() {
        let dir = tempdir().unwrap();
        let inputs = vec![write_input(dir.path(), "a.mp4"), write_input(dir.path(), "b.mp4")];
        let output = dir.path().join("merged.mp4");

        let registry = Arc::new(JobRegistry::new());
        let job = registry.create("merged.mp4".to_string()).await;
        let encoder = scripted_encoder(
            vec![
                EncodeEvent::Started {
                    command: "ffmpeg -f concat".to_string(),
                },
                EncodeEvent::Progress { percent: 42.0 },
                EncodeEvent::Completed {
                    output: PathBuf::new(),
                },
            ],
            true,
        );
        let runner = JobRunner::new(registry.clone(), Arc::new(encoder));

        let result = runner.run(&job.id, inputs.clone(), output.clone()).await;
        assert_eq!(result.unwrap(), output);

        let stored = registry.get(&job.id).await.unwrap();
        assert_eq!(stored.status, JobStatus::Completed);
        assert_eq!(stored.progress, 100);
        assert!(stored.end_time.is_some());
        assert_eq!(stored.output_path.as_deref(), Some(output.as_path()));
        assert!(stored.error.is_none());
        assert!(stored.command_line.is_some());

        assert!(output.exists());
        for input in &inputs {
            assert!(!input.exists(), "input {input:?} should have been released");
        }
    }

    #[tokio::test]
    async fn failed_merge_records_error_and_cleans_up() {
        let dir = tempdir().unwrap();
        let inputs = vec![write_input(dir.path(), "a.mp4"), write_input(dir.path(), "b.mp4")];
        let output = dir.path().join("merged.mp4");
        // A partial artifact the encoder left behind before failing.
        fs::write(&output, b"partial").unwrap();

        let registry = Arc::new(JobRegistry::new());
        let job = registry.create("merged.mp4".to_string()).await;
        let encoder = scripted_encoder(
            vec![
                EncodeEvent::Started {
                    command: "ffmpeg -f concat".to_string(),
                },
                EncodeEvent::Progress { percent: 10.0 },
                EncodeEvent::Failed {
                    message: "ffmpeg exited with signal 6".to_string(),
                },
            ],
            false,
        );
        let runner = JobRunner::new(registry.clone(), Arc::new(encoder));

        let result = runner.run(&job.id, inputs.clone(), output.clone()).await;
        assert!(matches!(result, Err(MergeError::Encode(_))));

        let stored = registry.get(&job.id).await.unwrap();
        assert_eq!(stored.status, JobStatus::Failed);
        assert_eq!(stored.error.as_deref(), Some("ffmpeg exited with signal 6"));
        assert!(stored.end_time.is_some());
        assert!(stored.output_path.is_none());

        assert!(!output.exists(), "partial output should have been discarded");
        for input in &inputs {
            assert!(!input.exists());
        }
    }

    #[tokio::test]
    async fn progress_never_regresses() {
        let dir = tempdir().unwrap();
        let inputs = vec![write_input(dir.path(), "a.mp4"), write_input(dir.path(), "b.mp4")];
        let output = dir.path().join("merged.mp4");

        let registry = Arc::new(JobRegistry::new());
        let job = registry.create("merged.mp4".to_string()).await;
        // The encoder reports a transient regression; the failure path does
        // not force progress to 100, so the high-water mark is observable.
        let encoder = scripted_encoder(
            vec![
                EncodeEvent::Started {
                    command: String::new(),
                },
                EncodeEvent::Progress { percent: 50.0 },
                EncodeEvent::Progress { percent: 30.0 },
                EncodeEvent::Failed {
                    message: "boom".to_string(),
                },
            ],
            false,
        );
        let runner = JobRunner::new(registry.clone(), Arc::new(encoder));

        runner.run(&job.id, inputs, output).await.unwrap_err();
        assert_eq!(registry.get(&job.id).await.unwrap().progress, 50);
    }

    #[tokio::test]
    async fn out_of_range_progress_is_clamped() {
        let dir = tempdir().unwrap();
        let inputs = vec![write_input(dir.path(), "a.mp4"), write_input(dir.path(), "b.mp4")];
        let output = dir.path().join("merged.mp4");

        let registry = Arc::new(JobRegistry::new());
        let job = registry.create("merged.mp4".to_string()).await;
        let encoder = scripted_encoder(
            vec![
                EncodeEvent::Progress { percent: 250.0 },
                EncodeEvent::Failed {
                    message: "boom".to_string(),
                },
            ],
            false,
        );
        let runner = JobRunner::new(registry.clone(), Arc::new(encoder));

        runner.run(&job.id, inputs, output).await.unwrap_err();
        assert_eq!(registry.get(&job.id).await.unwrap().progress, 100);
    }

    #[tokio::test]
    async fn closed_event_stream_counts_as_failure() {
        let dir = tempdir().unwrap();
        let inputs = vec![write_input(dir.path(), "a.mp4"), write_input(dir.path(), "b.mp4")];
        let output = dir.path().join("merged.mp4");

        let registry = Arc::new(JobRegistry::new());
        let job = registry.create("merged.mp4".to_string()).await;
        let mut encoder = MockEncoder::new();
        encoder.expect_start().return_once(|_inputs, _output| {
            let (tx, rx) = mpsc::channel(8);
            // The sender is dropped without a terminal event.
            drop(tx);
            rx
        });
        let runner = JobRunner::new(registry.clone(), Arc::new(encoder));

        let result = runner.run(&job.id, inputs.clone(), output).await;
        assert!(matches!(result, Err(MergeError::Interrupted)));

        let stored = registry.get(&job.id).await.unwrap();
        assert_eq!(stored.status, JobStatus::Failed);
        assert!(stored.error.is_some());
        for input in &inputs {
            assert!(!input.exists());
        }
    }

    #[tokio::test]
    async fn concurrent_delete_does_not_disturb_the_run() {
        let dir = tempdir().unwrap();
        let inputs = vec![write_input(dir.path(), "a.mp4"), write_input(dir.path(), "b.mp4")];
        let output = dir.path().join("merged.mp4");

        let registry = Arc::new(JobRegistry::new());
        let job = registry.create("merged.mp4".to_string()).await;
        // The record vanishes before the run; every update becomes a no-op.
        assert!(registry.delete(&job.id).await);

        let encoder = scripted_encoder(
            vec![
                EncodeEvent::Started {
                    command: String::new(),
                },
                EncodeEvent::Completed {
                    output: PathBuf::new(),
                },
            ],
            true,
        );
        let runner = JobRunner::new(registry.clone(), Arc::new(encoder));

        let result = runner.run(&job.id, inputs, output.clone()).await;
        assert!(result.is_ok());
        assert!(registry.get(&job.id).await.is_none());
        assert_eq!(registry.len().await, 0);
    }

    #[test]
    fn clamp_bounds_and_rounds() {
        assert_eq!(clamp_percent(-3.0), 0);
        assert_eq!(clamp_percent(0.0), 0);
        assert_eq!(clamp_percent(49.6), 50);
        assert_eq!(clamp_percent(100.0), 100);
        assert_eq!(clamp_percent(250.0), 100);
        // NaN saturates to zero through the cast; the job just reports no
        // progress rather than garbage.
        assert_eq!(clamp_percent(f64::NAN), 0);
    }
}
