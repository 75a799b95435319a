use crate::encoder::{EncodeEvent, Encoder};
use regex::Regex;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::OnceLock;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::warn;
use uuid::Uuid;

/// Trailing stderr lines retained for the failure diagnostic.
const STDERR_TAIL_LINES: usize = 8;

/// Concatenates videos by shelling out to ffmpeg's concat demuxer with
/// stream copy, probing input durations up front so the `time=` positions
/// ffmpeg prints can be turned into percentages.
#[derive(Clone)]
pub struct FfmpegEncoder {
    ffmpeg_bin: String,
    ffprobe_bin: String,
}

impl FfmpegEncoder {
    pub fn new(ffmpeg_bin: impl Into<String>, ffprobe_bin: impl Into<String>) -> Self {
        Self {
            ffmpeg_bin: ffmpeg_bin.into(),
            ffprobe_bin: ffprobe_bin.into(),
        }
    }

    async fn run(self, inputs: Vec<PathBuf>, output: PathBuf, tx: mpsc::Sender<EncodeEvent>) {
        let total = self.probe_total_duration(&inputs).await;

        if let Some(parent) = output.parent() {
            if let Err(err) = tokio::fs::create_dir_all(parent).await {
                let _ = tx
                    .send(EncodeEvent::Failed {
                        message: format!("could not create output directory: {err}"),
                    })
                    .await;
                return;
            }
        }

        // The concat demuxer wants its input list in a file.
        let manifest = output.with_file_name(format!("filelist-{}.txt", Uuid::new_v4()));
        if let Err(err) = tokio::fs::write(&manifest, concat_manifest(&inputs)).await {
            let _ = tx
                .send(EncodeEvent::Failed {
                    message: format!("could not write concat manifest: {err}"),
                })
                .await;
            return;
        }

        let result = self.run_ffmpeg(&manifest, &output, total, &tx).await;

        if let Err(err) = tokio::fs::remove_file(&manifest).await {
            warn!(manifest = %manifest.display(), error = %err, "Failed to remove concat manifest");
        }

        let terminal = match result {
            Ok(()) => EncodeEvent::Completed { output },
            Err(message) => EncodeEvent::Failed { message },
        };
        let _ = tx.send(terminal).await;
    }

    async fn run_ffmpeg(
        &self,
        manifest: &Path,
        output: &Path,
        total_duration: Option<f64>,
        tx: &mpsc::Sender<EncodeEvent>,
    ) -> Result<(), String> {
        let mut command = Command::new(&self.ffmpeg_bin);
        command
            .arg("-y")
            .arg("-f")
            .arg("concat")
            .arg("-safe")
            .arg("0")
            .arg("-i")
            .arg(manifest)
            .arg("-c")
            .arg("copy")
            .arg(output)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        let mut child = command
            .spawn()
            .map_err(|err| format!("failed to spawn {}: {err}", self.ffmpeg_bin))?;

        let _ = tx
            .send(EncodeEvent::Started {
                command: format!(
                    "{} -y -f concat -safe 0 -i {} -c copy {}",
                    self.ffmpeg_bin,
                    manifest.display(),
                    output.display()
                ),
            })
            .await;

        let mut tail: VecDeque<String> = VecDeque::with_capacity(STDERR_TAIL_LINES);
        if let Some(stderr) = child.stderr.take() {
            // ffmpeg separates its in-place stats lines with carriage returns.
            let mut segments = BufReader::new(stderr).split(b'\r');
            while let Ok(Some(segment)) = segments.next_segment().await {
                let text = String::from_utf8_lossy(&segment);
                for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
                    match parse_time_secs(line) {
                        Some(elapsed) => {
                            if let Some(total) = total_duration {
                                let _ = tx
                                    .send(EncodeEvent::Progress {
                                        percent: percent_of(elapsed, total),
                                    })
                                    .await;
                            }
                        }
                        None => {
                            if tail.len() == STDERR_TAIL_LINES {
                                tail.pop_front();
                            }
                            tail.push_back(line.to_string());
                        }
                    }
                }
            }
        }

        let status = child
            .wait()
            .await
            .map_err(|err| format!("ffmpeg did not exit cleanly: {err}"))?;

        if !status.success() {
            let detail = tail.into_iter().collect::<Vec<_>>().join(" | ");
            return Err(format!("ffmpeg exited with {status}: {detail}"));
        }

        match tokio::fs::try_exists(output).await {
            Ok(true) => Ok(()),
            _ => Err(String::from("ffmpeg reported success but produced no output")),
        }
    }

    /// Sum of the input durations, or `None` when any probe fails. Without
    /// a total the merge still runs; it just reports no percentages.
    async fn probe_total_duration(&self, inputs: &[PathBuf]) -> Option<f64> {
        let mut total = 0.0;
        for input in inputs {
            total += self.probe_duration(input).await?;
        }
        Some(total)
    }

    async fn probe_duration(&self, input: &Path) -> Option<f64> {
        let probe = Command::new(&self.ffprobe_bin)
            .arg("-v")
            .arg("error")
            .arg("-show_entries")
            .arg("format=duration")
            .arg("-of")
            .arg("default=noprint_wrappers=1:nokey=1")
            .arg(input)
            .output()
            .await
            .ok()?;
        if !probe.status.success() {
            return None;
        }
        String::from_utf8_lossy(&probe.stdout).trim().parse().ok()
    }
}

impl Encoder for FfmpegEncoder {
    fn start(&self, inputs: Vec<PathBuf>, output: PathBuf) -> mpsc::Receiver<EncodeEvent> {
        let (tx, rx) = mpsc::channel(32);
        let encoder = self.clone();
        tokio::spawn(async move {
            encoder.run(inputs, output, tx).await;
        });
        rx
    }
}

/// Concat-demuxer input list: one `file '<path>'` line per input, in order.
fn concat_manifest(inputs: &[PathBuf]) -> String {
    inputs
        .iter()
        .map(|path| {
            let escaped = path.display().to_string().replace('\'', r"'\''");
            format!("file '{escaped}'\n")
        })
        .collect()
}

/// Pull the `time=HH:MM:SS.cc` position out of an ffmpeg stats line.
fn parse_time_secs(line: &str) -> Option<f64> {
    static TIME_RE: OnceLock<Regex> = OnceLock::new();
    let re = TIME_RE
        .get_or_init(|| Regex::new(r"time=(\d+):(\d{2}):(\d{2}(?:\.\d+)?)").unwrap());
    let caps = re.captures(line)?;
    let hours: f64 = caps[1].parse().ok()?;
    let minutes: f64 = caps[2].parse().ok()?;
    let seconds: f64 = caps[3].parse().ok()?;
    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}

fn percent_of(elapsed: f64, total: f64) -> f64 {
    if total <= 0.0 {
        return 0.0;
    }
    elapsed / total * 100.0
}
