//! Environment configuration.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Runtime configuration, loaded once at startup.
#[derive(Clone, Debug)]
pub struct Config {
    /// HTTP server bind address
    pub addr: String,
    /// HTTP server port
    pub port: String,
    /// Directory where uploaded source files are staged
    pub upload_dir: PathBuf,
    /// Directory where merged artifacts are written
    pub output_dir: PathBuf,
    /// ffmpeg binary to invoke for merging
    pub ffmpeg_bin: String,
    /// ffprobe binary to invoke for duration probing
    pub ffprobe_bin: String,
    /// How long a merged artifact lingers after a download begins
    pub download_linger: Duration,
    /// Per-file upload size limit in bytes
    pub max_file_bytes: u64,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();

        Self {
            addr: env::var("ADDR").unwrap_or_else(|_| String::from("127.0.0.1")),
            port: env::var("PORT").unwrap_or_else(|_| String::from("3000")),
            upload_dir: env::var("UPLOAD_DIR")
                .unwrap_or_else(|_| String::from("./uploads"))
                .into(),
            output_dir: env::var("OUTPUT_DIR")
                .unwrap_or_else(|_| String::from("./output"))
                .into(),
            ffmpeg_bin: env::var("FFMPEG_BIN").unwrap_or_else(|_| String::from("ffmpeg")),
            ffprobe_bin: env::var("FFPROBE_BIN").unwrap_or_else(|_| String::from("ffprobe")),
            download_linger: Duration::from_secs(
                env::var("DOWNLOAD_LINGER_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(5),
            ),
            max_file_bytes: env::var("MAX_FILE_BYTES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(100 * 1024 * 1024),
        }
    }
}
