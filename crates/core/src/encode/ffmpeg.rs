//! ffmpeg encoder module for Storyframe
//!
//! Builds the libx264 command line for one variant and runs it as a child
//! process. The runner sits behind [`Transcoder`] so the invoker can be
//! driven without a real ffmpeg.

use crate::geometry::{CanvasSpec, GeometryPlan};
use crate::policy::{BorderColor, QualityPreset};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command;

/// Longest stderr tail kept in an error
const STDERR_TAIL_BYTES: usize = 4096;

/// Error type for encoding operations
#[derive(Debug, Error)]
pub enum EncodeError {
    /// ffmpeg exited with non-zero status
    #[error("ffmpeg failed with exit code {code}: {stderr}")]
    FfmpegFailed { code: i32, stderr: String },

    /// ffmpeg was terminated by signal
    #[error("ffmpeg process was terminated by signal")]
    FfmpegTerminated,

    /// ffmpeg reported success but left nothing usable behind
    #[error("Output file missing or empty: {0}")]
    MissingOutput(PathBuf),

    /// IO error during encoding
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Everything needed to render one variant
#[derive(Debug, Clone)]
pub struct EncodeParams {
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub plan: GeometryPlan,
    pub canvas: CanvasSpec,
    pub color: BorderColor,
    pub preset: QualityPreset,
    /// Emit an AAC track; otherwise audio is dropped
    pub has_audio: bool,
    pub audio_bitrate: String,
}

impl EncodeParams {
    /// `scale=W:H,pad=CW:CH:X:Y:color=C`
    pub fn video_filter(&self) -> String {
        format!(
            "scale={}:{},pad={}:{}:{}:{}:color={}",
            self.plan.scale_width,
            self.plan.scale_height,
            self.canvas.width,
            self.canvas.height,
            self.plan.pad_left,
            self.plan.pad_top,
            self.color
        )
    }
}

/// Build the ffmpeg command for one variant
///
/// The output is overwritten if it exists. Video is always libx264 in
/// yuv420p with the moov atom moved to the front.
pub fn build_ffmpeg_command(params: &EncodeParams, ffmpeg_path: &Path) -> Command {
    let preset = &params.preset;
    let mut cmd = Command::new(ffmpeg_path);

    cmd.arg("-y");
    cmd.arg("-i").arg(&params.input_path);
    cmd.arg("-vf").arg(params.video_filter());

    cmd.arg("-c:v").arg("libx264");
    cmd.arg("-crf").arg(preset.crf.to_string());
    cmd.arg("-preset").arg(preset.speed.as_str());
    cmd.arg("-tune").arg("fastdecode");

    cmd.arg("-b:v").arg(format!("{}k", preset.bitrate_kbps));
    cmd.arg("-maxrate").arg(format!("{}k", preset.maxrate_kbps));
    cmd.arg("-bufsize").arg(format!("{}k", preset.bufsize_kbps()));

    cmd.arg("-threads").arg("0");
    cmd.arg("-pix_fmt").arg("yuv420p");
    cmd.arg("-movflags").arg("+faststart");

    if params.has_audio {
        cmd.arg("-c:a").arg("aac");
        cmd.arg("-b:a").arg(&params.audio_bitrate);
    } else {
        cmd.arg("-an");
    }

    cmd.arg(&params.output_path);
    cmd
}

/// Runs one encode to completion
#[async_trait]
pub trait Transcoder: Send + Sync {
    async fn run(&self, params: &EncodeParams) -> Result<(), EncodeError>;
}

/// [`Transcoder`] that spawns ffmpeg
#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    ffmpeg_path: PathBuf,
}

impl FfmpegTranscoder {
    pub fn new(ffmpeg_path: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
        }
    }
}

impl Default for FfmpegTranscoder {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn run(&self, params: &EncodeParams) -> Result<(), EncodeError> {
        let mut cmd = build_ffmpeg_command(params, &self.ffmpeg_path);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = cmd.output().await?;

        if output.status.success() {
            return Ok(());
        }

        match output.status.code() {
            Some(code) => Err(EncodeError::FfmpegFailed {
                code,
                stderr: stderr_tail(&output.stderr),
            }),
            None => Err(EncodeError::FfmpegTerminated),
        }
    }
}

/// Last few KiB of stderr, where ffmpeg puts the actual error
fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let trimmed = text.trim();
    if trimmed.len() <= STDERR_TAIL_BYTES {
        return trimmed.to_string();
    }
    let mut start = trimmed.len() - STDERR_TAIL_BYTES;
    while !trimmed.is_char_boundary(start) {
        start += 1;
    }
    trimmed[start..].to_string()
}
