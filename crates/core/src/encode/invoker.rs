//! Encode invoker for Storyframe
//!
//! Turns one [`VariantJob`] into an encoded file. Failures are logged and
//! absorbed here: a bad variant never takes the rest of the batch with it.

use super::ffmpeg::{EncodeError, EncodeParams, Transcoder};
use super::{VariantJob, VariantResult};
use crate::geometry::{resolve, CanvasSpec};
use crate::probe::SourceVideoInfo;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error};

/// Runs single-variant encodes through a [`Transcoder`]
#[derive(Clone)]
pub struct EncodeInvoker {
    transcoder: Arc<dyn Transcoder>,
    audio_bitrate: String,
}

impl EncodeInvoker {
    pub fn new(transcoder: Arc<dyn Transcoder>, audio_bitrate: impl Into<String>) -> Self {
        Self {
            transcoder,
            audio_bitrate: audio_bitrate.into(),
        }
    }

    /// Encode `source` into `job.output_path`.
    ///
    /// Returns `None` when geometry cannot be resolved, when the encoder
    /// fails, or when it leaves a missing or empty file.
    pub async fn encode(
        &self,
        source: &Path,
        info: &SourceVideoInfo,
        canvas: CanvasSpec,
        job: &VariantJob,
    ) -> Option<VariantResult> {
        match self.try_encode(source, info, canvas, job).await {
            Ok(result) => {
                debug!(
                    variant = job.index,
                    preset = job.preset.label,
                    size_bytes = result.size_bytes,
                    "variant encoded"
                );
                Some(result)
            }
            Err(e) => {
                error!(
                    variant = job.index,
                    preset = job.preset.label,
                    output = %job.output_path.display(),
                    error = %e,
                    "variant encode failed"
                );
                // Partial output from a failed run is never delivered
                if tokio::fs::remove_file(&job.output_path).await.is_ok() {
                    debug!(output = %job.output_path.display(), "removed partial output");
                }
                None
            }
        }
    }

    async fn try_encode(
        &self,
        source: &Path,
        info: &SourceVideoInfo,
        canvas: CanvasSpec,
        job: &VariantJob,
    ) -> Result<VariantResult, InvokeError> {
        let plan = resolve(info.width, info.height, canvas, job.thickness.pixels)?;

        let params = EncodeParams {
            input_path: source.to_path_buf(),
            output_path: job.output_path.clone(),
            plan,
            canvas,
            color: job.color,
            preset: job.preset,
            has_audio: info.has_audio,
            audio_bitrate: self.audio_bitrate.clone(),
        };

        self.transcoder.run(&params).await?;

        let size_bytes = match tokio::fs::metadata(&job.output_path).await {
            Ok(meta) if meta.len() > 0 => meta.len(),
            _ => return Err(EncodeError::MissingOutput(job.output_path.clone()).into()),
        };

        Ok(VariantResult {
            index: job.index,
            preset: job.preset,
            thickness: job.thickness,
            color: job.color,
            output_path: job.output_path.clone(),
            size_bytes,
        })
    }
}

#[derive(Debug, thiserror::Error)]
enum InvokeError {
    #[error(transparent)]
    Geometry(#[from] crate::geometry::GeometryError),

    #[error(transparent)]
    Encode(#[from] EncodeError),
}
