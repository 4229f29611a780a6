//! Transport backed by the local filesystem.
//!
//! Uploads are plain files on disk; delivered variants are copied into a
//! directory next to a caption text file.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use storyframe::{
    sanitize_requester, Caption, DownloadError, Transport, TransportError, Upload, VariantResult,
};
use tracing::info;

pub struct LocalDirTransport {
    deliver_dir: PathBuf,
}

impl LocalDirTransport {
    pub fn new(deliver_dir: impl Into<PathBuf>) -> Self {
        Self {
            deliver_dir: deliver_dir.into(),
        }
    }

    /// Announce a local file as an upload from `requester`.
    ///
    /// The file's path doubles as its transport handle.
    pub fn upload_for(requester: &str, path: &Path) -> Upload {
        let declared_size = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        Upload {
            requester: requester.to_string(),
            file_id: path.display().to_string(),
            file_name,
            declared_size,
        }
    }

    fn delivered_path(&self, requester: &str, variant: &VariantResult) -> PathBuf {
        let name = variant
            .output_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("variant_{}.mp4", variant.index));
        self.deliver_dir.join(sanitize_requester(requester)).join(name)
    }
}

#[async_trait]
impl Transport for LocalDirTransport {
    async fn resolve_size(&self, upload: &Upload) -> Result<u64, DownloadError> {
        tokio::fs::metadata(&upload.file_id)
            .await
            .map(|m| m.len())
            .map_err(|e| DownloadError::classify(e.to_string()))
    }

    async fn fetch(&self, upload: &Upload, dest: &Path) -> Result<(), DownloadError> {
        tokio::fs::copy(&upload.file_id, dest)
            .await
            .map(|_| ())
            .map_err(|e| DownloadError::classify(e.to_string()))
    }

    async fn notify(&self, requester: &str, text: &str) -> Result<(), TransportError> {
        info!(%requester, "notify");
        println!("[{}] {}", requester, text);
        Ok(())
    }

    async fn deliver(
        &self,
        requester: &str,
        variant: &VariantResult,
        caption: &Caption,
    ) -> Result<(), TransportError> {
        let dest = self.delivered_path(requester, variant);
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(&variant.output_path, &dest).await?;
        tokio::fs::write(dest.with_extension("txt"), caption.to_string()).await?;

        info!(path = %dest.display(), size_bytes = variant.size_bytes, "variant delivered");
        println!("[{}] {}", requester, dest.display());
        Ok(())
    }
}
