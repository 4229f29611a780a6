//! Probe module for reading source video metadata.
//!
//! Runs ffprobe once per request and reduces its JSON report to the handful
//! of fields the geometry resolver and the captions need.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::process::Command;
use thiserror::Error;

/// Frame rate assumed when ffprobe reports none or a degenerate one.
pub const DEFAULT_FPS: f64 = 30.0;

/// Error type for probe operations.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// ffprobe command failed to execute.
    #[error("ffprobe failed: {0}")]
    FfprobeFailed(String),

    /// Failed to parse ffprobe JSON output.
    #[error("Failed to parse ffprobe output: {0}")]
    ParseError(String),

    /// The file has no video stream.
    #[error("No video stream found")]
    NoVideoStream,

    /// The video stream reports a zero dimension.
    #[error("Invalid video dimensions {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },

    /// IO error during probe.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Metadata of the uploaded source video.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceVideoInfo {
    pub width: u32,
    pub height: u32,
    pub duration_secs: f64,
    pub codec: String,
    pub fps: f64,
    /// Whether the container carries at least one audio stream.
    pub has_audio: bool,
}

/// Reads metadata from a video file.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, path: &Path) -> Result<SourceVideoInfo, ProbeError>;
}

/// [`Prober`] backed by the ffprobe binary.
#[derive(Debug, Clone)]
pub struct FfprobeProber {
    ffprobe_path: PathBuf,
}

impl FfprobeProber {
    pub fn new(ffprobe_path: impl Into<PathBuf>) -> Self {
        Self {
            ffprobe_path: ffprobe_path.into(),
        }
    }

    /// Build the ffprobe invocation for `path`.
    pub fn build_command(&self, path: &Path) -> Command {
        let mut cmd = Command::new(&self.ffprobe_path);
        cmd.args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_streams",
            "-show_format",
        ])
        .arg(path)
        .kill_on_drop(true);
        cmd
    }
}

impl Default for FfprobeProber {
    fn default() -> Self {
        Self::new("ffprobe")
    }
}

#[async_trait]
impl Prober for FfprobeProber {
    async fn probe(&self, path: &Path) -> Result<SourceVideoInfo, ProbeError> {
        let output = self.build_command(path).output().await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ProbeError::FfprobeFailed(format!(
                "ffprobe exited with status {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let info = parse_ffprobe_output(&stdout)?;
        tracing::debug!(
            path = %path.display(),
            width = info.width,
            height = info.height,
            duration_secs = info.duration_secs,
            codec = %info.codec,
            "probed source"
        );
        Ok(info)
    }
}

/// Raw ffprobe JSON structures for parsing.
mod ffprobe_json {
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    pub struct FfprobeOutput {
        pub streams: Option<Vec<Stream>>,
        pub format: Option<Format>,
    }

    #[derive(Debug, Deserialize)]
    pub struct Stream {
        pub codec_type: Option<String>,
        pub codec_name: Option<String>,
        pub width: Option<u32>,
        pub height: Option<u32>,
        pub r_frame_rate: Option<String>,
        pub duration: Option<String>,
    }

    #[derive(Debug, Deserialize)]
    pub struct Format {
        pub duration: Option<String>,
    }
}

/// Parses ffprobe JSON output into a [`SourceVideoInfo`].
pub fn parse_ffprobe_output(json_str: &str) -> Result<SourceVideoInfo, ProbeError> {
    let ffprobe: ffprobe_json::FfprobeOutput =
        serde_json::from_str(json_str).map_err(|e| ProbeError::ParseError(e.to_string()))?;

    let streams = ffprobe.streams.unwrap_or_default();

    let video = streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .ok_or(ProbeError::NoVideoStream)?;

    let has_audio = streams
        .iter()
        .any(|s| s.codec_type.as_deref() == Some("audio"));

    let width = video.width.unwrap_or(0);
    let height = video.height.unwrap_or(0);
    if width == 0 || height == 0 {
        return Err(ProbeError::InvalidDimensions { width, height });
    }

    let duration_secs = video
        .duration
        .as_deref()
        .and_then(parse_seconds)
        .or_else(|| {
            ffprobe
                .format
                .as_ref()
                .and_then(|f| f.duration.as_deref())
                .and_then(parse_seconds)
        })
        .unwrap_or(0.0);

    Ok(SourceVideoInfo {
        width,
        height,
        duration_secs,
        codec: video.codec_name.clone().unwrap_or_default(),
        fps: video
            .r_frame_rate
            .as_deref()
            .map(parse_frame_rate)
            .unwrap_or(DEFAULT_FPS),
        has_audio,
    })
}

fn parse_seconds(s: &str) -> Option<f64> {
    s.trim().parse::<f64>().ok().filter(|d| d.is_finite() && *d >= 0.0)
}

/// Parses an ffprobe rational such as `30000/1001`.
///
/// A zero denominator or anything unparsable yields [`DEFAULT_FPS`].
pub fn parse_frame_rate(rate: &str) -> f64 {
    let (num, den) = match rate.split_once('/') {
        Some((n, d)) => (n.trim(), d.trim()),
        None => (rate.trim(), "1"),
    };

    match (num.parse::<f64>(), den.parse::<f64>()) {
        (Ok(n), Ok(d)) if d != 0.0 && n.is_finite() && d.is_finite() => n / d,
        _ => DEFAULT_FPS,
    }
}
