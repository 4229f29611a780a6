//! Ingest checks for incoming uploads.
//!
//! Everything here runs before or around the download, so a rejected
//! upload never touches the staging directories.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use storyframe_config::LimitsConfig;
use thiserror::Error;

/// Container extensions accepted for upload (case-insensitive matching).
pub const SUPPORTED_EXTENSIONS: &[&str] = &[
    "mp4", "avi", "mov", "mkv", "webm", "flv", "wmv", "3gp", "m4v", "mpg", "mpeg", "ogv",
];

const MB: f64 = 1024.0 * 1024.0;

/// A file offered by a requester, as announced by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Upload {
    pub requester: String,
    /// Transport-side handle used to fetch the bytes.
    pub file_id: String,
    pub file_name: String,
    /// Size claimed by the transport before download.
    pub declared_size: u64,
}

/// Rejections raised before any download.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Unsupported format: {file_name}")]
    UnsupportedFormat { file_name: String },

    #[error("File is {size_bytes} bytes, limit is {limit_bytes} bytes")]
    TooLarge { size_bytes: u64, limit_bytes: u64 },
}

impl ValidationError {
    pub fn user_message(&self) -> String {
        match self {
            ValidationError::UnsupportedFormat { .. } => format!(
                "Unsupported video format. Supported formats: {}",
                SUPPORTED_EXTENSIONS.join(", ")
            ),
            ValidationError::TooLarge {
                size_bytes,
                limit_bytes,
            } => format!(
                "The video exceeds the maximum size.\n\nYour file: {:.1}MB\nMaximum: {:.0}MB",
                *size_bytes as f64 / MB,
                *limit_bytes as f64 / MB
            ),
        }
    }
}

/// Failures while fetching the source from the transport.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DownloadError {
    /// Resolved size exceeds the platform ceiling.
    #[error("File is {size_bytes} bytes, platform limit is {limit_bytes} bytes")]
    PlatformLimit { size_bytes: u64, limit_bytes: u64 },

    /// The transport refused the file as too big.
    #[error("File too large to download: {0}")]
    TooLarge(String),

    #[error("Download timed out: {0}")]
    Timeout(String),

    #[error("Download failed: {0}")]
    Other(String),
}

impl DownloadError {
    /// Sort a transport error message into a category.
    pub fn classify(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();

        if lower.contains("file is too big")
            || lower.contains("too large")
            || lower.contains("request entity too large")
        {
            DownloadError::TooLarge(message)
        } else if lower.contains("timeout") || lower.contains("timed out") {
            DownloadError::Timeout(message)
        } else {
            DownloadError::Other(message)
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            DownloadError::PlatformLimit {
                size_bytes,
                limit_bytes,
            } => format!(
                "The file exceeds the platform limit.\n\nFile size: {:.1}MB\nHard limit: {:.0}MB",
                *size_bytes as f64 / MB,
                *limit_bytes as f64 / MB
            ),
            DownloadError::TooLarge(_) => {
                "The file is too large to download. Compress it or send a shorter video."
                    .to_string()
            }
            DownloadError::Timeout(_) => {
                "Timed out while downloading the file. Try a smaller file.".to_string()
            }
            DownloadError::Other(detail) => {
                format!("Failed to download the file.\n\nDetails: {}", detail)
            }
        }
    }
}

/// True when the file name carries a supported container extension.
pub fn is_supported_extension(file_name: &str) -> bool {
    Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext_lower = ext.to_lowercase();
            SUPPORTED_EXTENSIONS.contains(&ext_lower.as_str())
        })
        .unwrap_or(false)
}

/// Extension and soft-limit check on the declared size.
pub fn validate_upload(upload: &Upload, limits: &LimitsConfig) -> Result<(), ValidationError> {
    if !is_supported_extension(&upload.file_name) {
        return Err(ValidationError::UnsupportedFormat {
            file_name: upload.file_name.clone(),
        });
    }

    let limit_bytes = limits.max_file_size_bytes();
    if upload.declared_size > limit_bytes {
        return Err(ValidationError::TooLarge {
            size_bytes: upload.declared_size,
            limit_bytes,
        });
    }

    Ok(())
}

/// Hard platform ceiling on the size the transport resolved.
pub fn check_platform_limit(size_bytes: u64, limits: &LimitsConfig) -> Result<(), DownloadError> {
    let limit_bytes = limits.platform_limit_bytes();
    if size_bytes > limit_bytes {
        return Err(DownloadError::PlatformLimit {
            size_bytes,
            limit_bytes,
        });
    }
    Ok(())
}

/// Downloads above the large-file threshold run under a timeout; smaller
/// ones are left to the transport's own limits.
pub fn download_timeout(size_bytes: u64, limits: &LimitsConfig) -> Option<Duration> {
    (size_bytes > limits.large_file_threshold_bytes())
        .then(|| Duration::from_secs(limits.download_timeout_secs))
}

/// Strip directory components so a requester-supplied name cannot escape
/// the staging directory.
/// Requester ids end up in file and directory names
pub fn sanitize_requester(requester: &str) -> String {
    if requester.is_empty() {
        return "_".to_string();
    }
    requester
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect()
}

pub fn sanitize_file_name(file_name: &str) -> String {
    let base = file_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(file_name)
        .trim();
    if base.is_empty() || base == "." || base == ".." {
        "upload.mp4".to_string()
    } else {
        base.to_string()
    }
}
