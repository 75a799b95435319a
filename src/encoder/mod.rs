//! Boundary to the external media-concatenation capability.
//!
//! An encoder only reads its inputs, concatenates them in exactly the
//! given order, and reports what happened through a typed event stream:
//! `Started` once the underlying process is running, any number of raw
//! `Progress` notifications, then exactly one terminal event.

pub mod ffmpeg;

pub use ffmpeg::FfmpegEncoder;

use std::path::PathBuf;
use tokio::sync::mpsc;

#[derive(Debug, Clone)]
pub enum EncodeEvent {
    /// The encoder process has begun; carries the invocation for diagnostics.
    Started { command: String },
    /// Raw percent-complete. May be non-monotonic or out of range; the
    /// consumer clamps.
    Progress { percent: f64 },
    /// The artifact was written at the given path.
    Completed { output: PathBuf },
    /// The merge failed; any partial output must be treated as invalid.
    Failed { message: String },
}

#[cfg_attr(test, mockall::automock)]
pub trait Encoder: Send + Sync {
    /// Begin concatenating `inputs` (in order) into `output` and return the
    /// event stream. Dropping the receiver abandons event delivery but does
    /// not stop the underlying work.
    fn start(&self, inputs: Vec<PathBuf>, output: PathBuf) -> mpsc::Receiver<EncodeEvent>;
}
