//! Status snapshot for Storyframe
//!
//! Queue state, request counters, staging-directory usage, and host load,
//! gathered into one JSON-serializable value.

use crate::admission::ActiveProcessRecord;
use crate::cleanup::{dir_stats, DirStats};
use crate::service::{StatsSnapshot, StoryService};
use serde::Serialize;
use std::time::{SystemTime, UNIX_EPOCH};

/// System-level metrics for resource monitoring
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SystemMetrics {
    pub cpu_usage_percent: f32,
    pub mem_usage_percent: f32,
    pub load_avg_1: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub timestamp_unix_ms: i64,
    pub queue_len: usize,
    pub capacity: usize,
    pub active: Vec<ActiveProcessRecord>,
    pub requests: StatsSnapshot,
    pub temp_dir: DirStats,
    pub output_dir: DirStats,
    pub system: SystemMetrics,
}

/// Collects current system metrics using sysinfo
pub fn collect_system_metrics() -> SystemMetrics {
    use sysinfo::System;

    let mut sys = System::new();
    sys.refresh_cpu_usage();
    sys.refresh_memory();

    let total_memory = sys.total_memory();
    let mem_usage = if total_memory > 0 {
        (sys.used_memory() as f64 / total_memory as f64 * 100.0) as f32
    } else {
        0.0
    };

    SystemMetrics {
        cpu_usage_percent: sys.global_cpu_usage(),
        mem_usage_percent: mem_usage,
        load_avg_1: System::load_average().one as f32,
    }
}

/// Gather a snapshot of `service`. Touches the filesystem, so callers on
/// the async runtime should run it via `spawn_blocking`.
pub fn collect_status(service: &StoryService) -> StatusSnapshot {
    let admission = service.admission().snapshot();
    let paths = &service.config().paths;

    StatusSnapshot {
        timestamp_unix_ms: SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0),
        queue_len: admission.queued.len(),
        capacity: admission.capacity,
        active: admission.active,
        requests: service.stats(),
        temp_dir: dir_stats(&paths.temp_dir),
        output_dir: dir_stats(&paths.output_dir),
        system: collect_system_metrics(),
    }
}
