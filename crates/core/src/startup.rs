//! Startup checks module for Storyframe
//!
//! Preflight work done once before serving requests:
//! - ffmpeg and ffprobe must run
//! - staging directories must exist
//! - leftovers from a previous run are swept

use crate::cleanup::{sweep_staging, SweepReport};
use crate::config::{Config, PathsConfig};
use std::path::Path;
use std::process::Command;
use thiserror::Error;
use tracing::{info, warn};

/// Error types for startup checks
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("{tool} not available: {reason}")]
    ToolUnavailable { tool: String, reason: String },

    #[error("Failed to create directory {path}: {source}")]
    Directory {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Check that `tool -version` runs and exits successfully
///
/// Returns the tool's version banner.
pub fn check_tool_available(tool: &Path) -> Result<String, StartupError> {
    let name = tool.display().to_string();
    let output = Command::new(tool).arg("-version").output().map_err(|e| {
        StartupError::ToolUnavailable {
            tool: name.clone(),
            reason: format!("{} -version failed; is it installed and in PATH? Error: {}", name, e),
        }
    })?;

    if !output.status.success() {
        return Err(StartupError::ToolUnavailable {
            tool: name.clone(),
            reason: format!("{} -version exited with {}", name, output.status),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Parse the version token from `ffmpeg -version` / `ffprobe -version`
///
/// Handles various version formats:
/// - Standard: "ffmpeg version 6.1.1 ..."
/// - N-prefixed: "ffmpeg version n7.0-... ..."
/// - Git builds: "ffprobe version N-113240-g..."
pub fn parse_ffmpeg_version(version_output: &str) -> Option<String> {
    let version_line = version_output
        .lines()
        .find(|line| line.to_lowercase().contains(" version "))?;

    let token = version_line
        .split(" version ")
        .nth(1)?
        .split_whitespace()
        .next()?;

    let token = token.strip_prefix('n').unwrap_or(token);
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

/// Create the staging directories if they are missing
pub fn setup_directories(paths: &PathsConfig) -> Result<(), StartupError> {
    for dir in [&paths.temp_dir, &paths.output_dir] {
        std::fs::create_dir_all(dir).map_err(|source| StartupError::Directory {
            path: dir.display().to_string(),
            source,
        })?;
    }
    info!(
        temp_dir = %paths.temp_dir.display(),
        output_dir = %paths.output_dir.display(),
        "staging directories ready"
    );
    Ok(())
}

/// Verify ffmpeg and ffprobe are usable, logging their versions
pub fn run_startup_checks(cfg: &Config) -> Result<(), StartupError> {
    for tool in [&cfg.encoder.ffmpeg_path, &cfg.encoder.ffprobe_path] {
        let banner = check_tool_available(Path::new(tool))?;
        match parse_ffmpeg_version(&banner) {
            Some(version) => info!(tool = %tool, %version, "tool available"),
            None => warn!(tool = %tool, "tool available but version banner not recognized"),
        }
    }
    Ok(())
}

/// Remove files left over from earlier runs
pub fn startup_sweep(cfg: &Config) -> (SweepReport, SweepReport) {
    let (temp, output) = sweep_staging(&cfg.paths, &cfg.cleanup);
    info!(
        temp_removed = temp.removed,
        output_removed = output.removed,
        "startup sweep finished"
    );
    (temp, output)
}
