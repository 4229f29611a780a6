//! Encoding modules for Storyframe

pub mod ffmpeg;
pub mod invoker;

pub use ffmpeg::{build_ffmpeg_command, EncodeError, EncodeParams, FfmpegTranscoder, Transcoder};
pub use invoker::EncodeInvoker;

use crate::policy::{BorderColor, BorderThickness, QualityPreset};
use serde::Serialize;
use std::path::PathBuf;

/// One planned encode: preset plus the border drawn for it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VariantJob {
    /// 1-based position in the batch
    pub index: usize,
    pub preset: QualityPreset,
    pub thickness: BorderThickness,
    pub color: BorderColor,
    pub output_path: PathBuf,
}

/// A variant that was encoded and is ready for delivery
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VariantResult {
    pub index: usize,
    pub preset: QualityPreset,
    pub thickness: BorderThickness,
    pub color: BorderColor,
    pub output_path: PathBuf,
    pub size_bytes: u64,
}

impl VariantResult {
    pub fn size_mb(&self) -> f64 {
        self.size_bytes as f64 / (1024.0 * 1024.0)
    }
}
