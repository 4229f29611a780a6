//! Request-level errors surfaced to the requester.

use crate::admission::AdmissionError;
use crate::ingest::{DownloadError, ValidationError};
use crate::probe::ProbeError;
use thiserror::Error;

/// Why a request did not end in delivered variants
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("Download failed: {0}")]
    Download(#[from] DownloadError),

    #[error("Probe failed: {0}")]
    Probe(#[from] ProbeError),

    /// Every variant failed to encode
    #[error("No variants could be produced")]
    BatchEmpty,

    #[error("Admission failed: {0}")]
    Admission(#[from] AdmissionError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The handler itself broke, e.g. a panic in a transport callback
    #[error("Internal error: {0}")]
    Internal(String),
}

impl RequestError {
    /// Text sent to the requester
    pub fn user_message(&self) -> String {
        match self {
            RequestError::Validation(e) => e.user_message(),
            RequestError::Download(e) => e.user_message(),
            RequestError::Probe(_) | RequestError::Io(_) | RequestError::Internal(_) => {
                "An error occurred while processing the video. Try another file.".to_string()
            }
            RequestError::BatchEmpty => "Failed to create video variants.".to_string(),
            RequestError::Admission(AdmissionError::AlreadyQueued { .. }) => {
                "This video is already in the queue.".to_string()
            }
            RequestError::Admission(AdmissionError::Closed) => {
                "The processing queue is unavailable. Try again later.".to_string()
            }
        }
    }

    /// Rejections happen before any work and are the requester's to fix.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            RequestError::Validation(_)
                | RequestError::Admission(AdmissionError::AlreadyQueued { .. })
                | RequestError::Download(DownloadError::PlatformLimit { .. })
        )
    }
}
