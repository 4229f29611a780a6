//! Storyframe
//!
//! Turns one uploaded video into several bordered 1080x1920 "stories"
//! variants, each encoded with a different compression preset.

pub mod admission;
pub mod cleanup;
pub mod delivery;
pub mod encode;
pub mod error;
pub mod geometry;
pub mod ingest;
pub mod orchestrator;
pub mod policy;
pub mod probe;
pub mod service;
pub mod startup;
pub mod status;
pub mod status_server;
pub mod transport;

pub use storyframe_config as config;
pub use storyframe_config::Config;
pub use admission::{
    ActiveGuard, ActiveProcessRecord, AdmissionError, AdmissionSnapshot, AdmissionTracker,
    QueueEntry, Ticket,
};
pub use cleanup::{
    dir_stats, remove_with, remove_with_retry, spawn_sweeper, sweep_dir, sweep_staging,
    CleanupError, CleanupOutcome, DirStats, SweepReport,
};
pub use delivery::Caption;
pub use encode::{
    build_ffmpeg_command, EncodeError, EncodeInvoker, EncodeParams, FfmpegTranscoder, Transcoder,
    VariantJob, VariantResult,
};
pub use error::RequestError;
pub use geometry::{resolve, CanvasSpec, GeometryError, GeometryPlan};
pub use ingest::{
    check_platform_limit, download_timeout, sanitize_file_name, sanitize_requester,
    validate_upload, DownloadError, Upload, ValidationError, SUPPORTED_EXTENSIONS,
};
pub use orchestrator::{VariantBatch, VariantOrchestrator};
pub use policy::{
    draw_border_color, draw_border_thickness, presets, select_count, BorderColor,
    BorderThickness, QualityPreset, SpeedTier,
};
pub use probe::{parse_ffprobe_output, FfprobeProber, ProbeError, Prober, SourceVideoInfo};
pub use service::{RequestOutcome, StatsSnapshot, StoryService};
pub use startup::{
    check_tool_available, parse_ffmpeg_version, run_startup_checks, setup_directories,
    startup_sweep, StartupError,
};
pub use status::{collect_status, collect_system_metrics, StatusSnapshot, SystemMetrics};
pub use status_server::{create_status_router, run_status_server, ServerError};
pub use transport::{Transport, TransportError};
