//! Variant orchestrator for Storyframe
//!
//! Probes a source once, plans one job per preset, and runs the encodes
//! with bounded parallelism. Results come back in preset-table order no
//! matter which encode finishes first.

use crate::cleanup::remove_with_retry;
use crate::encode::{EncodeInvoker, VariantJob, VariantResult};
use crate::geometry::CanvasSpec;
use crate::policy::{draw_border_color, draw_border_thickness, presets, select_count};
use crate::probe::{ProbeError, Prober, SourceVideoInfo};
use futures::stream::{self, StreamExt};
use rand::Rng;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Variants produced for one source, with the probe that drove them
#[derive(Debug, Clone)]
pub struct VariantBatch {
    pub source: SourceVideoInfo,
    pub variants: Vec<VariantResult>,
}

/// Output file name for variant `index` (1-based)
pub fn variant_file_name(namespace: &str, index: usize, preset_slug: &str) -> String {
    format!("{}_variant_{}_{}.mp4", namespace, index, preset_slug)
}

/// Plan the first `count` presets, drawing a border for each
pub fn plan_jobs<R: Rng + ?Sized>(
    count: usize,
    output_dir: &Path,
    namespace: &str,
    rng: &mut R,
) -> Vec<VariantJob> {
    let table = presets();
    table
        .iter()
        .take(select_count(count, table.len()))
        .enumerate()
        .map(|(i, preset)| {
            let index = i + 1;
            VariantJob {
                index,
                preset: *preset,
                thickness: draw_border_thickness(rng),
                color: draw_border_color(rng),
                output_path: output_dir.join(variant_file_name(namespace, index, &preset.slug())),
            }
        })
        .collect()
}

pub struct VariantOrchestrator {
    prober: Arc<dyn Prober>,
    invoker: EncodeInvoker,
    canvas: CanvasSpec,
    parallel_encodes: usize,
    delete_attempts: u32,
    delete_backoff: Duration,
}

impl VariantOrchestrator {
    pub fn new(prober: Arc<dyn Prober>, invoker: EncodeInvoker, parallel_encodes: usize) -> Self {
        Self {
            prober,
            invoker,
            canvas: CanvasSpec::STORIES,
            parallel_encodes: parallel_encodes.max(1),
            delete_attempts: 3,
            delete_backoff: Duration::from_secs(1),
        }
    }

    /// Retry policy used by [`discard`](Self::discard)
    pub fn with_delete_policy(mut self, attempts: u32, backoff: Duration) -> Self {
        self.delete_attempts = attempts;
        self.delete_backoff = backoff;
        self
    }

    pub fn canvas(&self) -> CanvasSpec {
        self.canvas
    }

    /// Produce up to `count` variants of `source` in `output_dir`.
    ///
    /// Failed variants are left out. A probe failure is the only error.
    pub async fn create_variants(
        &self,
        source: &Path,
        output_dir: &Path,
        count: usize,
        namespace: &str,
    ) -> Result<Vec<VariantResult>, ProbeError> {
        self.create_batch(source, output_dir, count, namespace)
            .await
            .map(|batch| batch.variants)
    }

    /// [`create_variants`](Self::create_variants), keeping the probe result
    pub async fn create_batch(
        &self,
        source: &Path,
        output_dir: &Path,
        count: usize,
        namespace: &str,
    ) -> Result<VariantBatch, ProbeError> {
        let info = self.probe(source).await?;
        let jobs = self.plan(count, output_dir, namespace);
        let variants = self.encode_jobs(source, &info, jobs).await;
        Ok(VariantBatch {
            source: info,
            variants,
        })
    }

    pub async fn probe(&self, source: &Path) -> Result<SourceVideoInfo, ProbeError> {
        self.prober.probe(source).await
    }

    /// Jobs for the first `count` presets with freshly drawn borders
    pub fn plan(&self, count: usize, output_dir: &Path, namespace: &str) -> Vec<VariantJob> {
        plan_jobs(count, output_dir, namespace, &mut rand::thread_rng())
    }

    /// Run `jobs` with at most `parallel_encodes` in flight. Failed jobs
    /// are left out; the rest come back in job order.
    pub async fn encode_jobs(
        &self,
        source: &Path,
        info: &SourceVideoInfo,
        jobs: Vec<VariantJob>,
    ) -> Vec<VariantResult> {
        let planned = jobs.len();

        info!(
            source = %source.display(),
            resolution = %format!("{}x{}", info.width, info.height),
            duration_secs = info.duration_secs,
            variants = planned,
            parallel = self.parallel_encodes,
            "creating variants"
        );

        let variants: Vec<VariantResult> = stream::iter(jobs)
            .map(|job| async move { self.invoker.encode(source, info, self.canvas, &job).await })
            .buffered(self.parallel_encodes)
            .filter_map(|result| async move { result })
            .collect()
            .await;

        if variants.len() < planned {
            warn!(
                produced = variants.len(),
                planned,
                "some variants failed to encode"
            );
        }

        variants
    }

    /// Delete every produced file. Failures are logged, never returned.
    pub async fn discard(&self, results: &[VariantResult]) {
        let paths: Vec<PathBuf> = results.iter().map(|r| r.output_path.clone()).collect();
        self.discard_paths(&paths).await;
    }

    /// Delete `paths`, whether or not an encode ever wrote them
    pub async fn discard_paths(&self, paths: &[PathBuf]) {
        for path in paths {
            remove_with_retry(path, self.delete_attempts, self.delete_backoff).await;
        }
    }
}
