//! Boundary to the messaging platform that carries uploads and results.

use crate::delivery::Caption;
use crate::encode::VariantResult;
use crate::ingest::{DownloadError, Upload};
use async_trait::async_trait;
use std::path::Path;
use thiserror::Error;

/// Error type for outbound transport calls
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Everything the request service needs from the platform.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Size of the upload as the platform reports it right before download.
    async fn resolve_size(&self, upload: &Upload) -> Result<u64, DownloadError>;

    /// Store the upload's bytes at `dest`.
    async fn fetch(&self, upload: &Upload, dest: &Path) -> Result<(), DownloadError>;

    /// Send a plain text message to the requester.
    async fn notify(&self, requester: &str, text: &str) -> Result<(), TransportError>;

    /// Send one finished variant with its caption.
    async fn deliver(
        &self,
        requester: &str,
        variant: &VariantResult,
        caption: &Caption,
    ) -> Result<(), TransportError>;
}
