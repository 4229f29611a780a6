//! Core configuration structures and loading logic

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Error type for configuration operations
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Failed to read config file: {}", e),
            ConfigError::Parse(e) => write!(f, "Failed to parse config: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

const MB: u64 = 1024 * 1024;

/// Upload size limits and download timeouts
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LimitsConfig {
    /// Soft limit checked against the declared size before download (MB)
    #[serde(default = "default_max_file_size_mb")]
    pub max_file_size_mb: u64,
    /// Hard limit imposed by the transport, checked on the resolved size (MB)
    #[serde(default = "default_platform_limit_mb")]
    pub platform_limit_mb: u64,
    /// Files above this size get the extended download timeout (MB)
    #[serde(default = "default_large_file_threshold_mb")]
    pub large_file_threshold_mb: u64,
    /// Extended download timeout in seconds
    #[serde(default = "default_download_timeout_secs")]
    pub download_timeout_secs: u64,
}

fn default_max_file_size_mb() -> u64 {
    50
}

fn default_platform_limit_mb() -> u64 {
    20
}

fn default_large_file_threshold_mb() -> u64 {
    15
}

fn default_download_timeout_secs() -> u64 {
    300
}

impl LimitsConfig {
    pub fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_mb.saturating_mul(MB)
    }

    pub fn platform_limit_bytes(&self) -> u64 {
        self.platform_limit_mb.saturating_mul(MB)
    }

    pub fn large_file_threshold_bytes(&self) -> u64 {
        self.large_file_threshold_mb.saturating_mul(MB)
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_file_size_mb: default_max_file_size_mb(),
            platform_limit_mb: default_platform_limit_mb(),
            large_file_threshold_mb: default_large_file_threshold_mb(),
            download_timeout_secs: default_download_timeout_secs(),
        }
    }
}

/// Staging directories
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PathsConfig {
    /// Where downloaded sources are staged
    #[serde(default = "default_temp_dir")]
    pub temp_dir: PathBuf,
    /// Where encoded variants are written before delivery
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

fn default_temp_dir() -> PathBuf {
    PathBuf::from("temp")
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("output")
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            temp_dir: default_temp_dir(),
            output_dir: default_output_dir(),
        }
    }
}

/// Variant generation settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VariantsConfig {
    /// Variants requested per source (capped by the preset table)
    #[serde(default = "default_variant_count")]
    pub count: usize,
    /// Encodes allowed in flight for a single request (1 = sequential)
    #[serde(default = "default_parallel_encodes")]
    pub parallel_encodes: usize,
    /// AAC bitrate used when the source carries audio
    #[serde(default = "default_audio_bitrate")]
    pub audio_bitrate: String,
}

fn default_variant_count() -> usize {
    6
}

fn default_parallel_encodes() -> usize {
    1
}

fn default_audio_bitrate() -> String {
    "128k".to_string()
}

impl Default for VariantsConfig {
    fn default() -> Self {
        Self {
            count: default_variant_count(),
            parallel_encodes: default_parallel_encodes(),
            audio_bitrate: default_audio_bitrate(),
        }
    }
}

/// External tool locations
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EncoderConfig {
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: String,
    #[serde(default = "default_ffprobe_path")]
    pub ffprobe_path: String,
}

fn default_ffmpeg_path() -> String {
    "ffmpeg".to_string()
}

fn default_ffprobe_path() -> String {
    "ffprobe".to_string()
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: default_ffmpeg_path(),
            ffprobe_path: default_ffprobe_path(),
        }
    }
}

/// Admission queue settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueueConfig {
    /// Requests allowed to be active at once, process-wide
    #[serde(default = "default_queue_capacity")]
    pub capacity: usize,
    /// Fixed per-entry cost used for wait estimates, in seconds
    #[serde(default = "default_per_item_estimate_secs")]
    pub per_item_estimate_secs: u64,
}

fn default_queue_capacity() -> usize {
    1
}

fn default_per_item_estimate_secs() -> u64 {
    120
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: default_queue_capacity(),
            per_item_estimate_secs: default_per_item_estimate_secs(),
        }
    }
}

/// Staging directory cleanup settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CleanupConfig {
    #[serde(default = "default_temp_max_age_secs")]
    pub temp_max_age_secs: u64,
    #[serde(default = "default_output_max_age_secs")]
    pub output_max_age_secs: u64,
    /// Period of the background sweeper (0 disables it)
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// Attempts made to delete a busy file
    #[serde(default = "default_delete_attempts")]
    pub delete_attempts: u32,
    /// Fixed wait between delete attempts
    #[serde(default = "default_delete_backoff_ms")]
    pub delete_backoff_ms: u64,
}

fn default_temp_max_age_secs() -> u64 {
    3600
}

fn default_output_max_age_secs() -> u64 {
    86400
}

fn default_sweep_interval_secs() -> u64 {
    600
}

fn default_delete_attempts() -> u32 {
    3
}

fn default_delete_backoff_ms() -> u64 {
    1000
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            temp_max_age_secs: default_temp_max_age_secs(),
            output_max_age_secs: default_output_max_age_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            delete_attempts: default_delete_attempts(),
            delete_backoff_ms: default_delete_backoff_ms(),
        }
    }
}

/// Status endpoint settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_status_bind")]
    pub bind: String,
}

fn default_status_bind() -> String {
    "127.0.0.1:7879".to_string()
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind: default_status_bind(),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub variants: VariantsConfig,
    #[serde(default)]
    pub encoder: EncoderConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub cleanup: CleanupConfig,
    #[serde(default)]
    pub status: StatusConfig,
}

fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Missing sections and fields fall back to their defaults.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Overrides the following values if environment variables are set:
    /// - MAX_FILE_SIZE_MB -> limits.max_file_size_mb
    /// - PLATFORM_LIMIT_MB -> limits.platform_limit_mb
    /// - TEMP_DIR -> paths.temp_dir
    /// - OUTPUT_DIR -> paths.output_dir
    /// - VARIANT_COUNT -> variants.count
    /// - PARALLEL_ENCODES -> variants.parallel_encodes
    /// - FFMPEG_PATH -> encoder.ffmpeg_path
    /// - FFPROBE_PATH -> encoder.ffprobe_path
    /// - QUEUE_CAPACITY -> queue.capacity
    /// - STATUS_ENABLED -> status.enabled
    ///
    /// Values that fail to parse leave the existing setting untouched.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("MAX_FILE_SIZE_MB") {
            if let Ok(mb) = val.parse::<u64>() {
                self.limits.max_file_size_mb = mb;
            }
        }

        if let Ok(val) = env::var("PLATFORM_LIMIT_MB") {
            if let Ok(mb) = val.parse::<u64>() {
                self.limits.platform_limit_mb = mb;
            }
        }

        if let Ok(val) = env::var("TEMP_DIR") {
            if !val.is_empty() {
                self.paths.temp_dir = PathBuf::from(val);
            }
        }

        if let Ok(val) = env::var("OUTPUT_DIR") {
            if !val.is_empty() {
                self.paths.output_dir = PathBuf::from(val);
            }
        }

        if let Ok(val) = env::var("VARIANT_COUNT") {
            if let Ok(count) = val.parse::<usize>() {
                self.variants.count = count;
            }
        }

        if let Ok(val) = env::var("PARALLEL_ENCODES") {
            if let Ok(n) = val.parse::<usize>() {
                self.variants.parallel_encodes = n;
            }
        }

        if let Ok(val) = env::var("FFMPEG_PATH") {
            if !val.is_empty() {
                self.encoder.ffmpeg_path = val;
            }
        }

        if let Ok(val) = env::var("FFPROBE_PATH") {
            if !val.is_empty() {
                self.encoder.ffprobe_path = val;
            }
        }

        if let Ok(val) = env::var("QUEUE_CAPACITY") {
            if let Ok(n) = val.parse::<usize>() {
                self.queue.capacity = n;
            }
        }

        if let Ok(val) = env::var("STATUS_ENABLED") {
            if let Some(enabled) = parse_bool(&val) {
                self.status.enabled = enabled;
            }
        }
    }

    /// Load configuration from file and apply environment overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Like [`Config::load`], but a missing file yields the defaults
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        if path.as_ref().exists() {
            return Self::load(path);
        }
        let mut config = Self::default();
        config.apply_env_overrides();
        Ok(config)
    }
}
