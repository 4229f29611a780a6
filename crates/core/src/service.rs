//! Request service for Storyframe
//!
//! Drives one upload from validation to delivery: admission, download,
//! variant creation, delivery, and cleanup of everything the request
//! staged. The handler never returns an error; every outcome is reported
//! to the requester through the transport and summarized in a
//! [`RequestOutcome`].

use crate::admission::{ActiveGuard, AdmissionTracker};
use crate::cleanup::remove_with_retry;
use crate::config::Config;
use crate::delivery::Caption;
use crate::encode::{EncodeInvoker, FfmpegTranscoder, Transcoder};
use crate::error::RequestError;
use crate::ingest::{
    check_platform_limit, download_timeout, sanitize_file_name, sanitize_requester,
    validate_upload, DownloadError, Upload,
};
use crate::orchestrator::VariantOrchestrator;
use crate::probe::{FfprobeProber, Prober};
use crate::transport::Transport;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Downloaded size may differ from the declared one by this much before
/// it is worth a warning
const SIZE_MISMATCH_TOLERANCE: u64 = 1024;

/// How a request ended
#[derive(Debug)]
pub enum RequestOutcome {
    /// Variants were produced; `variants` counts the ones actually sent
    Delivered { variants: usize },
    /// Turned away before any processing
    Rejected(RequestError),
    /// Accepted but could not be completed
    Failed(RequestError),
}

impl RequestOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, RequestOutcome::Delivered { .. })
    }
}

/// Process-wide request counters
#[derive(Debug, Default)]
pub struct ServiceStats {
    received: AtomicU64,
    delivered: AtomicU64,
    rejected: AtomicU64,
    failed: AtomicU64,
    variants_delivered: AtomicU64,
}

/// Plain copy of [`ServiceStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub received: u64,
    pub delivered: u64,
    pub rejected: u64,
    pub failed: u64,
    pub variants_delivered: u64,
}

impl ServiceStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            variants_delivered: self.variants_delivered.load(Ordering::Relaxed),
        }
    }

    fn record(&self, outcome: &RequestOutcome) {
        let counter = match outcome {
            RequestOutcome::Delivered { .. } => &self.delivered,
            RequestOutcome::Rejected(_) => &self.rejected,
            RequestOutcome::Failed(_) => &self.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Files a request has put on disk, removed when it ends
#[derive(Debug, Default)]
struct Staged {
    input: Option<PathBuf>,
    /// Every planned variant path, recorded before any encode starts
    outputs: Vec<PathBuf>,
}

/// Handles uploads end to end
pub struct StoryService {
    config: Config,
    admission: AdmissionTracker,
    orchestrator: VariantOrchestrator,
    stats: ServiceStats,
}

impl StoryService {
    /// Build the service with the ffmpeg/ffprobe binaries named in `config`
    pub fn new(config: Config) -> Self {
        let prober = Arc::new(FfprobeProber::new(&config.encoder.ffprobe_path));
        let transcoder = Arc::new(FfmpegTranscoder::new(&config.encoder.ffmpeg_path));
        Self::with_components(config, prober, transcoder)
    }

    /// Build the service around caller-supplied probe and encode backends
    pub fn with_components(
        config: Config,
        prober: Arc<dyn Prober>,
        transcoder: Arc<dyn Transcoder>,
    ) -> Self {
        let invoker = EncodeInvoker::new(transcoder, config.variants.audio_bitrate.clone());
        let orchestrator =
            VariantOrchestrator::new(prober, invoker, config.variants.parallel_encodes)
                .with_delete_policy(
                    config.cleanup.delete_attempts,
                    Duration::from_millis(config.cleanup.delete_backoff_ms),
                );

        Self {
            admission: AdmissionTracker::from_config(&config.queue),
            orchestrator,
            stats: ServiceStats::default(),
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn admission(&self) -> &AdmissionTracker {
        &self.admission
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Run one upload to completion.
    pub async fn handle(&self, upload: Upload, transport: &dyn Transport) -> RequestOutcome {
        let request_id = Uuid::new_v4();
        let span = info_span!("request", %request_id, requester = %upload.requester);

        async move {
            self.stats.received.fetch_add(1, Ordering::Relaxed);
            info!(file = %upload.file_name, declared_size = upload.declared_size, "request received");

            let mut staged = Staged::default();
            let mut slot: Option<ActiveGuard> = None;

            let result = AssertUnwindSafe(self.process(&upload, transport, &mut staged, &mut slot))
                .catch_unwind()
                .await;

            self.cleanup(&staged).await;
            // Release the slot only after the request's files are gone
            drop(slot);

            let outcome = match result {
                Ok(Ok(variants)) => RequestOutcome::Delivered { variants },
                Ok(Err(e)) => {
                    if e.is_rejection() {
                        warn!(error = %e, "request rejected");
                    } else {
                        error!(error = %e, "request failed");
                    }
                    self.send_notice(transport, &upload.requester, &e.user_message())
                        .await;
                    if e.is_rejection() {
                        RequestOutcome::Rejected(e)
                    } else {
                        RequestOutcome::Failed(e)
                    }
                }
                Err(_) => {
                    error!("request handler panicked");
                    let e = RequestError::Internal("request handler panicked".to_string());
                    self.send_notice(transport, &upload.requester, &e.user_message())
                        .await;
                    RequestOutcome::Failed(e)
                }
            };

            self.stats.record(&outcome);
            info!(outcome = ?outcome, "request finished");
            outcome
        }
        .instrument(span)
        .await
    }

    async fn process(
        &self,
        upload: &Upload,
        transport: &dyn Transport,
        staged: &mut Staged,
        slot: &mut Option<ActiveGuard>,
    ) -> Result<usize, RequestError> {
        let limits = &self.config.limits;

        validate_upload(upload, limits)?;

        let ticket = self
            .admission
            .enqueue_file(&upload.requester, &upload.file_id, &upload.file_name)?;
        if ticket.position() > 0 {
            let minutes = ticket.estimated_wait().as_secs().div_ceil(60);
            self.send_notice(
                transport,
                &upload.requester,
                &format!(
                    "Your video is #{} in the queue. Estimated wait: ~{} min",
                    ticket.position(),
                    minutes
                ),
            )
            .await;
        }
        *slot = Some(ticket.wait_turn().await?);

        self.send_notice(transport, &upload.requester, "Processing started...")
            .await;

        let size = transport.resolve_size(upload).await?;
        check_platform_limit(size, limits)?;

        let namespace = format!("{}_{}", sanitize_requester(&upload.requester), unix_now());
        let input = self.config.paths.temp_dir.join(format!(
            "{}_input_{}",
            namespace,
            sanitize_file_name(&upload.file_name)
        ));
        staged.input = Some(input.clone());

        let fetch = transport.fetch(upload, &input);
        match download_timeout(size, limits) {
            Some(limit) => tokio::time::timeout(limit, fetch).await.map_err(|_| {
                DownloadError::Timeout(format!("no completion after {}s", limit.as_secs()))
            })??,
            None => fetch.await?,
        }

        let downloaded = tokio::fs::metadata(&input).await?.len();
        if downloaded.abs_diff(size) > SIZE_MISMATCH_TOLERANCE {
            warn!(declared = size, downloaded, "downloaded size differs from declared size");
        }
        info!(bytes = downloaded, path = %input.display(), "source downloaded");

        let source = self.orchestrator.probe(&input).await?;
        let jobs = self.orchestrator.plan(
            self.config.variants.count,
            &self.config.paths.output_dir,
            &namespace,
        );
        staged.outputs = jobs.iter().map(|job| job.output_path.clone()).collect();

        let variants = self.orchestrator.encode_jobs(&input, &source, jobs).await;
        if variants.is_empty() {
            return Err(RequestError::BatchEmpty);
        }

        let total = variants.len();
        let canvas = self.orchestrator.canvas();
        let mut sent = 0;
        for (i, variant) in variants.iter().enumerate() {
            let caption = Caption::new(i + 1, total, &source, canvas, variant);
            match transport
                .deliver(&upload.requester, variant, &caption)
                .await
            {
                Ok(()) => sent += 1,
                Err(e) => error!(variant = i + 1, error = %e, "failed to deliver variant"),
            }
        }

        self.stats
            .variants_delivered
            .fetch_add(sent as u64, Ordering::Relaxed);
        info!(sent, total, "variants delivered");
        Ok(sent)
    }

    async fn cleanup(&self, staged: &Staged) {
        self.orchestrator.discard_paths(&staged.outputs).await;

        if let Some(input) = &staged.input {
            remove_with_retry(
                input,
                self.config.cleanup.delete_attempts,
                Duration::from_millis(self.config.cleanup.delete_backoff_ms),
            )
            .await;
        }
    }

    async fn send_notice(&self, transport: &dyn Transport, requester: &str, text: &str) {
        if let Err(e) = transport.notify(requester, text).await {
            warn!(error = %e, "failed to notify requester");
        }
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::{EncodeError, EncodeParams, VariantResult};
    use crate::ingest::ValidationError;
    use crate::probe::{ProbeError, SourceVideoInfo};
    use crate::transport::TransportError;
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::Mutex;
    use tempfile::TempDir;

    const MIB: u64 = 1024 * 1024;

    struct FakeProber {
        fail: bool,
    }

    #[async_trait]
    impl Prober for FakeProber {
        async fn probe(&self, _path: &Path) -> Result<SourceVideoInfo, ProbeError> {
            if self.fail {
                return Err(ProbeError::NoVideoStream);
            }
            Ok(SourceVideoInfo {
                width: 1920,
                height: 1080,
                duration_secs: 4.0,
                codec: "h264".to_string(),
                fps: 30.0,
                has_audio: true,
            })
        }
    }

    struct FakeTranscoder {
        fail: bool,
        panic_on: Option<&'static str>,
    }

    #[async_trait]
    impl Transcoder for FakeTranscoder {
        async fn run(&self, params: &EncodeParams) -> Result<(), EncodeError> {
            if self.panic_on == Some(params.preset.label) {
                panic!("encoder bug");
            }
            if self.fail {
                return Err(EncodeError::FfmpegTerminated);
            }
            tokio::fs::write(&params.output_path, b"encoded").await?;
            Ok(())
        }
    }

    /// Records traffic and serves a fixed payload
    #[derive(Default)]
    struct FakeTransport {
        size: u64,
        fetch_error: Option<String>,
        fetch_delay: Option<Duration>,
        panic_on_deliver: bool,
        notices: Mutex<Vec<String>>,
        delivered: Mutex<Vec<(PathBuf, String)>>,
        fetched_to: Mutex<Option<PathBuf>>,
    }

    impl FakeTransport {
        fn serving(size: u64) -> Self {
            Self {
                size,
                ..Self::default()
            }
        }

        fn notices(&self) -> Vec<String> {
            self.notices.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Transport for FakeTransport {
        async fn resolve_size(&self, _upload: &Upload) -> Result<u64, DownloadError> {
            Ok(self.size)
        }

        async fn fetch(&self, _upload: &Upload, dest: &Path) -> Result<(), DownloadError> {
            *self.fetched_to.lock().unwrap() = Some(dest.to_path_buf());
            if let Some(delay) = self.fetch_delay {
                tokio::time::sleep(delay).await;
            }
            if let Some(msg) = &self.fetch_error {
                return Err(DownloadError::classify(msg.clone()));
            }
            tokio::fs::write(dest, vec![0u8; 64])
                .await
                .map_err(|e| DownloadError::Other(e.to_string()))
        }

        async fn notify(&self, _requester: &str, text: &str) -> Result<(), TransportError> {
            self.notices.lock().unwrap().push(text.to_string());
            Ok(())
        }

        async fn deliver(
            &self,
            _requester: &str,
            variant: &VariantResult,
            caption: &Caption,
        ) -> Result<(), TransportError> {
            if self.panic_on_deliver {
                panic!("transport bug");
            }
            assert!(variant.output_path.exists());
            self.delivered
                .lock()
                .unwrap()
                .push((variant.output_path.clone(), caption.to_string()));
            Ok(())
        }
    }

    fn test_config(dir: &TempDir) -> Config {
        let mut config = Config::default();
        config.paths.temp_dir = dir.path().join("temp");
        config.paths.output_dir = dir.path().join("output");
        config.cleanup.delete_attempts = 1;
        config.cleanup.delete_backoff_ms = 1;
        std::fs::create_dir_all(&config.paths.temp_dir).unwrap();
        std::fs::create_dir_all(&config.paths.output_dir).unwrap();
        config
    }

    fn service(config: Config, probe_fails: bool, encode_fails: bool) -> StoryService {
        StoryService::with_components(
            config,
            Arc::new(FakeProber { fail: probe_fails }),
            Arc::new(FakeTranscoder {
                fail: encode_fails,
                panic_on: None,
            }),
        )
    }

    fn upload(name: &str, size: u64) -> Upload {
        Upload {
            requester: "42".to_string(),
            file_id: format!("id-{}", name),
            file_name: name.to_string(),
            declared_size: size,
        }
    }

    fn dir_is_empty(path: &Path) -> bool {
        std::fs::read_dir(path).unwrap().next().is_none()
    }

    #[tokio::test]
    async fn test_happy_path_delivers_all_variants_and_cleans_up() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);
        let svc = service(config.clone(), false, false);
        let transport = FakeTransport::serving(5 * MIB);

        let outcome = svc.handle(upload("clip.mp4", 5 * MIB), &transport).await;

        assert!(matches!(outcome, RequestOutcome::Delivered { variants: 6 }));
        let delivered = transport.delivered.lock().unwrap().clone();
        assert_eq!(delivered.len(), 6);
        assert!(delivered[0].1.starts_with("Variant 1/6: High"));
        assert!(delivered[5].1.starts_with("Variant 6/6: Maximum"));

        let fetched = transport.fetched_to.lock().unwrap().clone().unwrap();
        let fetched_name = fetched.file_name().unwrap().to_string_lossy().to_string();
        assert!(fetched_name.starts_with("42_"));
        assert!(fetched_name.ends_with("_input_clip.mp4"));

        assert!(dir_is_empty(&config.paths.temp_dir));
        assert!(dir_is_empty(&config.paths.output_dir));
        assert!(svc.admission().active_records().is_empty());

        let stats = svc.stats();
        assert_eq!(stats.received, 1);
        assert_eq!(stats.delivered, 1);
        assert_eq!(stats.variants_delivered, 6);
    }

    #[tokio::test]
    async fn test_validation_rejects_before_download() {
        let dir = TempDir::new().unwrap();
        let svc = service(test_config(&dir), false, false);
        let transport = FakeTransport::serving(MIB);

        let outcome = svc.handle(upload("notes.pdf", MIB), &transport).await;

        assert!(matches!(
            outcome,
            RequestOutcome::Rejected(RequestError::Validation(
                ValidationError::UnsupportedFormat { .. }
            ))
        ));
        assert!(transport.fetched_to.lock().unwrap().is_none());
        assert_eq!(transport.notices().len(), 1);
        assert_eq!(svc.stats().rejected, 1);
    }

    #[tokio::test]
    async fn test_oversized_upload_rejected_without_temp_file() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);
        let svc = service(config.clone(), false, false);
        let transport = FakeTransport::serving(60 * MIB);

        let outcome = svc.handle(upload("clip.mp4", 60 * MIB), &transport).await;

        assert!(matches!(
            outcome,
            RequestOutcome::Rejected(RequestError::Validation(ValidationError::TooLarge { .. }))
        ));
        assert!(transport.fetched_to.lock().unwrap().is_none());
        assert!(dir_is_empty(&config.paths.temp_dir));
        assert_eq!(svc.admission().queue_len(), 0);
        assert!(svc.admission().active_records().is_empty());
        assert!(transport.notices()[0].contains("50"));
    }

    #[tokio::test]
    async fn test_platform_limit_rejects_after_soft_check() {
        let dir = TempDir::new().unwrap();
        let svc = service(test_config(&dir), false, false);
        // Declared 10MB passes the soft check; resolved 30MB trips the hard one
        let transport = FakeTransport::serving(30 * MIB);

        let outcome = svc.handle(upload("clip.mp4", 10 * MIB), &transport).await;

        assert!(matches!(
            outcome,
            RequestOutcome::Rejected(RequestError::Download(DownloadError::PlatformLimit { .. }))
        ));
        assert!(transport.fetched_to.lock().unwrap().is_none());
        assert!(svc.admission().active_records().is_empty());
    }

    #[tokio::test]
    async fn test_download_error_is_classified() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);
        let svc = service(config.clone(), false, false);
        let transport = FakeTransport {
            size: MIB,
            fetch_error: Some("Read timeout".to_string()),
            ..FakeTransport::default()
        };

        let outcome = svc.handle(upload("clip.mp4", MIB), &transport).await;

        assert!(matches!(
            outcome,
            RequestOutcome::Failed(RequestError::Download(DownloadError::Timeout(_)))
        ));
        assert!(transport.notices().last().unwrap().contains("Timed out"));
        assert!(dir_is_empty(&config.paths.temp_dir));
    }

    #[tokio::test]
    async fn test_large_download_times_out() {
        let dir = TempDir::new().unwrap();
        let mut config = test_config(&dir);
        config.limits.download_timeout_secs = 1;
        let svc = service(config, false, false);
        let transport = FakeTransport {
            size: 16 * MIB,
            fetch_delay: Some(Duration::from_secs(60)),
            ..FakeTransport::default()
        };

        let outcome = svc.handle(upload("clip.mp4", 16 * MIB), &transport).await;

        assert!(matches!(
            outcome,
            RequestOutcome::Failed(RequestError::Download(DownloadError::Timeout(_)))
        ));
    }

    #[tokio::test]
    async fn test_probe_failure_fails_request() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);
        let svc = service(config.clone(), true, false);
        let transport = FakeTransport::serving(MIB);

        let outcome = svc.handle(upload("clip.mp4", MIB), &transport).await;

        assert!(matches!(
            outcome,
            RequestOutcome::Failed(RequestError::Probe(_))
        ));
        assert!(dir_is_empty(&config.paths.temp_dir));
        assert_eq!(svc.stats().failed, 1);
    }

    #[tokio::test]
    async fn test_all_variants_failing_is_batch_empty() {
        let dir = TempDir::new().unwrap();
        let svc = service(test_config(&dir), false, true);
        let transport = FakeTransport::serving(MIB);

        let outcome = svc.handle(upload("clip.mp4", MIB), &transport).await;

        assert!(matches!(
            outcome,
            RequestOutcome::Failed(RequestError::BatchEmpty)
        ));
        assert_eq!(
            transport.notices().last().unwrap(),
            &RequestError::BatchEmpty.user_message()
        );
    }

    #[tokio::test]
    async fn test_panic_is_contained_and_cleaned_up() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);
        let svc = service(config.clone(), false, false);
        let transport = FakeTransport {
            size: MIB,
            panic_on_deliver: true,
            ..FakeTransport::default()
        };

        let outcome = svc.handle(upload("clip.mp4", MIB), &transport).await;

        assert!(matches!(
            outcome,
            RequestOutcome::Failed(RequestError::Internal(_))
        ));
        assert!(dir_is_empty(&config.paths.temp_dir));
        assert!(dir_is_empty(&config.paths.output_dir));
        assert!(svc.admission().active_records().is_empty());
    }

    #[tokio::test]
    async fn test_panic_mid_batch_removes_encoded_variants() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);
        let svc = StoryService::with_components(
            config.clone(),
            Arc::new(FakeProber { fail: false }),
            Arc::new(FakeTranscoder {
                fail: false,
                panic_on: Some("Compact"),
            }),
        );
        let transport = FakeTransport::serving(MIB);

        let outcome = svc.handle(upload("clip.mp4", MIB), &transport).await;

        assert!(matches!(
            outcome,
            RequestOutcome::Failed(RequestError::Internal(_))
        ));
        assert!(transport.delivered.lock().unwrap().is_empty());
        assert!(dir_is_empty(&config.paths.output_dir));
        assert!(dir_is_empty(&config.paths.temp_dir));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_requests_run_on_spawned_tasks() {
        let dir = TempDir::new().unwrap();
        let svc = Arc::new(service(test_config(&dir), false, false));
        let transport = Arc::new(FakeTransport::serving(MIB));

        let handles: Vec<_> = ["a.mp4", "b.mp4"]
            .into_iter()
            .map(|name| {
                let (svc, transport) = (svc.clone(), transport.clone());
                tokio::spawn(async move { svc.handle(upload(name, MIB), transport.as_ref()).await })
            })
            .collect();

        for handle in handles {
            assert!(handle.await.unwrap().is_delivered());
        }
        assert_eq!(transport.delivered.lock().unwrap().len(), 12);
    }

    #[tokio::test]
    async fn test_queued_request_is_told_its_position() {
        let dir = TempDir::new().unwrap();
        let svc = Arc::new(service(test_config(&dir), false, false));

        // Hold the only slot so the next request has to wait
        let holder = svc.admission().enqueue("someone", "other").unwrap();
        let guard = holder.wait_turn().await.unwrap();

        let transport = Arc::new(FakeTransport::serving(MIB));
        let task = {
            let (svc, transport) = (svc.clone(), transport.clone());
            tokio::spawn(async move { svc.handle(upload("clip.mp4", MIB), transport.as_ref()).await })
        };

        while svc.admission().queue_len() == 0 {
            tokio::task::yield_now().await;
        }
        drop(guard);

        let outcome = task.await.unwrap();
        assert!(outcome.is_delivered());
        let notices = transport.notices();
        assert_eq!(
            notices[0],
            "Your video is #1 in the queue. Estimated wait: ~2 min"
        );
    }
}
