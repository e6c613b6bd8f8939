//! Job manager: FIFO queue, bounded worker pool, and pipeline composition.
//!
//! The manager exclusively owns every job record and the job store. Workers
//! take ownership of a job at dequeue time; cancellation propagates through
//! per-job child tokens down into the subprocess drivers.

use log::{info, warn};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex, RwLock, Weak};
use thiserror::Error;
use tokio::sync::{mpsc, Mutex as TokioMutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::ai::{self, SharedAiProvider};
use crate::extract::{ExtractError, ExtractOptions, Extractor};
use crate::jobs::{Job, JobKind, JobStatus, JobStore};
use crate::progress::{format_hms, ProgressFn, TranscodeProgress};
use crate::subtitles;
use crate::transcode::{
    AudioCodec, Container, GpuVendor, QualityPreset, TargetResolution, TranscodeError,
    TranscodeOptions, Transcoder,
};
use mediaforge_config::Config;

/// Queue capacity, far above any realistic burst of discovered files.
const QUEUE_CAPACITY: usize = 1024;

/// Extensions routed through the composed disc-image pipeline.
const DISC_IMAGE_EXTENSIONS: &[&str] = &["iso", "img", "mdf"];

/// Error type for job pipelines
#[derive(Debug, Error)]
pub enum JobError {
    #[error("ffmpeg wrapper not initialized")]
    TranscoderUnavailable,

    #[error("makemkv wrapper not initialized")]
    ExtractorUnavailable,

    #[error("failed to scan disc: {0}")]
    Scan(ExtractError),

    #[error("no titles found on disc")]
    NoTitles,

    #[error("extraction failed: {0}")]
    Extract(ExtractError),

    #[error("{0}")]
    Transcode(#[from] TranscodeError),

    #[error("failed to create directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("extraction finished but no output file found")]
    NoExtractedOutput,

    #[error("job cancelled")]
    Cancelled,
}

/// Hook invoked with a snapshot of each finished job.
pub type CompletionHook = Box<dyn Fn(&Job) + Send + Sync>;

/// Encoder and capability settings the manager copies out of the service
/// configuration at construction time.
struct ManagerSettings {
    gpu_vendor: GpuVendor,
    preset: QualityPreset,
    quality_level: u32,
    premium: bool,
}

/// Concurrent, persistent, bounded-concurrency job scheduler.
pub struct JobManager {
    /// Self-reference handed to spawned tasks and progress callbacks.
    this: Weak<JobManager>,
    jobs: RwLock<HashMap<String, Job>>,
    /// Cancellation scopes of currently running jobs; ephemeral.
    active: StdMutex<HashMap<String, CancellationToken>>,
    queue_tx: mpsc::Sender<String>,
    queue_rx: Arc<TokioMutex<mpsc::Receiver<String>>>,
    shutdown: CancellationToken,
    worker_count: usize,
    workers: StdMutex<Vec<JoinHandle<()>>>,
    store: JobStore,
    transcoder: Option<Transcoder>,
    extractor: Option<Extractor>,
    ai: RwLock<Option<SharedAiProvider>>,
    on_complete: RwLock<Option<CompletionHook>>,
    settings: ManagerSettings,
}

impl JobManager {
    /// Create a manager, probing the external binaries and loading persisted
    /// jobs from the store.
    ///
    /// A missing binary is noted with a warning rather than failing; jobs
    /// that need it will fail individually with a clear error.
    ///
    /// # Arguments
    /// * `config` - Service configuration (worker count, encoder defaults,
    ///   premium flag)
    /// * `ai_provider` - Optional AI capability for premium assists
    /// * `store_path` - Location of the durable job store
    pub async fn new(
        config: &Config,
        ai_provider: Option<SharedAiProvider>,
        store_path: PathBuf,
    ) -> Arc<Self> {
        let transcoder = {
            let t = Transcoder::new();
            match t.detect().await {
                Ok(()) => Some(t),
                Err(e) => {
                    warn!("FFmpeg not available: {}", e);
                    None
                }
            }
        };

        let extractor = {
            let e = Extractor::new();
            match e.detect().await {
                Ok(()) => Some(e),
                Err(err) => {
                    warn!("MakeMKV not available: {}", err);
                    None
                }
            }
        };

        Self::with_drivers(config, ai_provider, store_path, transcoder, extractor)
    }

    /// Create a manager with explicit (possibly absent) drivers.
    pub fn with_drivers(
        config: &Config,
        ai_provider: Option<SharedAiProvider>,
        store_path: PathBuf,
        transcoder: Option<Transcoder>,
        extractor: Option<Extractor>,
    ) -> Arc<Self> {
        let store = JobStore::new(store_path);

        let mut jobs = HashMap::new();
        match store.load() {
            Ok(loaded) => {
                let pending = loaded
                    .iter()
                    .filter(|j| j.status == JobStatus::Pending)
                    .count();
                info!("Loaded {} jobs from disk ({} pending)", loaded.len(), pending);
                for job in loaded {
                    jobs.insert(job.id.clone(), job);
                }
            }
            Err(e) => warn!("Could not load existing jobs: {}", e),
        }

        let (queue_tx, queue_rx) = mpsc::channel(QUEUE_CAPACITY);

        Arc::new_cyclic(|this| Self {
            this: this.clone(),
            jobs: RwLock::new(jobs),
            active: StdMutex::new(HashMap::new()),
            queue_tx,
            queue_rx: Arc::new(TokioMutex::new(queue_rx)),
            shutdown: CancellationToken::new(),
            worker_count: config.jobs.max_concurrent.max(1),
            workers: StdMutex::new(Vec::new()),
            store,
            transcoder,
            extractor,
            ai: RwLock::new(ai_provider),
            on_complete: RwLock::new(None),
            settings: ManagerSettings {
                gpu_vendor: GpuVendor::parse(&config.encoding.gpu_vendor),
                preset: QualityPreset::parse(&config.encoding.quality_preset),
                quality_level: config.encoding.quality_level,
                premium: config.premium,
            },
        })
    }

    /// Launch the worker pool.
    pub fn start(&self) {
        let this = match self.this.upgrade() {
            Some(this) => this,
            None => return,
        };
        info!("Job manager started with {} workers", self.worker_count);
        let mut workers = self.workers.lock().unwrap();
        for _ in 0..self.worker_count {
            let manager = Arc::clone(&this);
            workers.push(tokio::spawn(async move {
                manager.worker_loop().await;
            }));
        }
    }

    /// Signal shutdown and wait for all workers to drain.
    ///
    /// Running jobs observe the cancellation inside their subprocess driver.
    pub async fn stop(&self) {
        self.shutdown.cancel();
        let handles: Vec<_> = {
            let mut workers = self.workers.lock().unwrap();
            workers.drain(..).collect()
        };
        for handle in handles {
            let _ = handle.await;
        }
        info!("Job manager stopped");
    }

    /// Enqueue every pending job exactly once. Call once, after `start`.
    pub async fn requeue_pending_jobs(&self) {
        let mut pending: Vec<String> = {
            let jobs = self.jobs.read().unwrap();
            jobs.values()
                .filter(|j| j.status == JobStatus::Pending)
                .map(|j| j.id.clone())
                .collect()
        };
        // Ids sort by creation time, which restores the original FIFO order
        pending.sort();

        let count = pending.len();
        for id in pending {
            if self.queue_tx.send(id).await.is_err() {
                break;
            }
        }
        if count > 0 {
            info!("Requeued {} pending jobs", count);
        }
    }

    /// Insert a job and schedule it.
    ///
    /// The job is durable before it becomes visible in the queue. Re-adding
    /// an existing id overwrites the record without a second dispatch.
    pub async fn add_job(&self, job: Job) {
        let id = job.id.clone();
        let already_known = {
            let mut jobs = self.jobs.write().unwrap();
            jobs.insert(id.clone(), job).is_some()
        };
        self.persist();

        if !already_known && self.queue_tx.send(id).await.is_err() {
            warn!("Job queue closed; job will only run after a restart");
        }
    }

    /// Snapshot of a single job.
    pub fn get_job(&self, id: &str) -> Option<Job> {
        self.jobs.read().unwrap().get(id).cloned()
    }

    /// Snapshot of all jobs, ordered by id (creation order).
    pub fn list_jobs(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self.jobs.read().unwrap().values().cloned().collect();
        jobs.sort_by(|a, b| a.id.cmp(&b.id));
        jobs
    }

    /// Cancel a running job.
    ///
    /// Returns `true` when a live cancellation scope was cancelled. Pending
    /// and terminal jobs have no scope and return `false`.
    pub fn cancel_job(&self, id: &str) -> bool {
        let token = {
            let active = self.active.lock().unwrap();
            active.get(id).cloned()
        };

        match token {
            Some(token) => {
                token.cancel();
                self.update_job(id, |job| job.status = JobStatus::Cancelled);
                self.persist();
                true
            }
            None => false,
        }
    }

    /// Swap the AI provider used for premium assists.
    pub fn update_ai_provider(&self, provider: Option<SharedAiProvider>) {
        *self.ai.write().unwrap() = provider;
        info!("Job manager AI provider updated");
    }

    /// Current AI provider, if any.
    pub fn ai_provider(&self) -> Option<SharedAiProvider> {
        self.ai.read().unwrap().clone()
    }

    /// Whether premium assists are enabled.
    pub fn premium(&self) -> bool {
        self.settings.premium
    }

    /// Register the completion hook, replacing any previous one.
    pub fn set_on_complete(&self, hook: CompletionHook) {
        *self.on_complete.write().unwrap() = Some(hook);
    }

    async fn worker_loop(self: Arc<Self>) {
        loop {
            let next = {
                let queue_rx = Arc::clone(&self.queue_rx);
                tokio::select! {
                    _ = self.shutdown.cancelled() => return,
                    id = async move { queue_rx.lock().await.recv().await } => id,
                }
            };

            match next {
                Some(id) => self.process_job(&id).await,
                None => return,
            }
        }
    }

    /// Apply a mutation to a job under the write lock.
    fn update_job<F: FnOnce(&mut Job)>(&self, id: &str, f: F) {
        let mut jobs = self.jobs.write().unwrap();
        if let Some(job) = jobs.get_mut(id) {
            f(job);
        }
    }

    /// Persist the current job set; failures are logged, not fatal.
    ///
    /// The map lock is held only across the snapshot, not the disk write.
    fn persist(&self) {
        let snapshot: Vec<Job> = {
            let jobs = self.jobs.read().unwrap();
            jobs.values().cloned().collect()
        };
        if let Err(e) = self.store.save(&snapshot) {
            warn!("Failed to persist job store: {}", e);
        }
    }

    /// A progress callback that writes percentage, fps, and ETA onto the job.
    fn progress_sink(&self, id: &str) -> ProgressFn {
        let weak = self.this.clone();
        let id = id.to_string();
        Arc::new(move |p: TranscodeProgress| {
            if let Some(manager) = weak.upgrade() {
                manager.update_job(&id, |job| {
                    job.progress = p.percentage;
                    if p.fps > 0.0 {
                        job.fps = p.fps;
                    }
                    if !p.eta.is_empty() {
                        job.eta = p.eta.clone();
                    }
                });
            }
        })
    }

    async fn process_job(&self, id: &str) {
        let cancel = self.shutdown.child_token();
        {
            let mut active = self.active.lock().unwrap();
            active.insert(id.to_string(), cancel.clone());
        }

        let source_path = match self.get_job(id) {
            Some(job) => job.source_path,
            None => {
                self.active.lock().unwrap().remove(id);
                return;
            }
        };
        let input_size = std::fs::metadata(&source_path).map(|m| m.len()).unwrap_or(0);

        self.update_job(id, |job| {
            job.status = JobStatus::Processing;
            job.started_at = Some(chrono::Utc::now());
            job.input_size = input_size;
        });
        self.persist();

        self.maybe_clean_destination(id, &cancel).await;

        let job = match self.get_job(id) {
            Some(job) => job,
            None => {
                self.active.lock().unwrap().remove(id);
                return;
            }
        };

        info!("[Job {}] Starting {} of {}", id, job.kind, job.source_path.display());

        let result = match job.kind {
            JobKind::Extract => self.run_extraction(&job, &cancel).await,
            JobKind::Optimize => {
                if is_disc_image(&job.source_path) {
                    self.run_disc_image_optimization(&job, &cancel).await
                } else {
                    self.run_optimization(&job, &cancel).await
                }
            }
            JobKind::Test => self.run_test(id, &cancel).await,
        };

        let destination = self
            .get_job(id)
            .map(|j| j.destination_path)
            .unwrap_or_default();

        match result {
            Ok(()) => {
                let output_size = std::fs::metadata(&destination).map(|m| m.len()).unwrap_or(0);
                self.update_job(id, |job| {
                    job.status = JobStatus::Completed;
                    job.progress = 100;
                    job.output_size = output_size;
                });
                info!("[Job {}] Completed", id);
            }
            Err(e) => {
                self.update_job(id, |job| {
                    // A cancel may have landed first; keep that status
                    if job.status != JobStatus::Cancelled {
                        job.status = JobStatus::Failed;
                        job.error = e.to_string();
                    }
                });
                warn!("[Job {}] Finished with error: {}", id, e);
            }
        }

        self.update_job(id, |job| job.completed_at = Some(chrono::Utc::now()));
        self.persist();

        {
            let mut active = self.active.lock().unwrap();
            active.remove(id);
        }

        if let Some(job) = self.get_job(id) {
            let hook = self.on_complete.read().unwrap();
            if let Some(hook) = hook.as_ref() {
                hook(&job);
            }
        }
    }

    /// Premium assist: rewrite the destination filename from an AI-cleaned
    /// title. Silent on any failure.
    async fn maybe_clean_destination(&self, id: &str, _cancel: &CancellationToken) {
        if !self.settings.premium {
            return;
        }
        let provider = match self.ai_provider() {
            Some(p) => p,
            None => return,
        };
        let job = match self.get_job(id) {
            Some(job) if job.kind == JobKind::Optimize => job,
            _ => return,
        };

        let filename = job
            .source_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        if let Ok(title) = ai::clean_filename(provider.as_ref(), &filename).await {
            info!("[Job {}] AI cleaned filename: {} -> {}", id, filename, title);
            self.update_job(id, |job| {
                let ext = job
                    .destination_path
                    .extension()
                    .map(|e| e.to_string_lossy().into_owned());
                let dir = job
                    .destination_path
                    .parent()
                    .map(Path::to_path_buf)
                    .unwrap_or_default();
                let mut renamed = dir.join(&title);
                if let Some(ext) = ext {
                    renamed.set_extension(ext);
                }
                job.destination_path = renamed;
                job.ai_cleaned = true;
            });
        }
    }

    async fn run_extraction(
        &self,
        job: &Job,
        cancel: &CancellationToken,
    ) -> Result<(), JobError> {
        let extractor = self.extractor.as_ref().ok_or(JobError::ExtractorUnavailable)?;

        let info = extractor
            .scan(&job.source_path, cancel)
            .await
            .map_err(JobError::Scan)?;
        if info.titles.is_empty() {
            return Err(JobError::NoTitles);
        }

        let main_title = info.main_title().ok_or(JobError::NoTitles)?;
        info!("[Job {}] Detected main feature: title {}", job.id, main_title);

        std::fs::create_dir_all(&job.destination_path).map_err(|e| JobError::CreateDir {
            path: job.destination_path.clone(),
            source: e,
        })?;

        let opts = ExtractOptions {
            source: job.source_path.clone(),
            output_dir: job.destination_path.clone(),
            title_index: Some(main_title),
            min_length_secs: None,
        };

        extractor
            .extract_with_progress(&opts, cancel, self.progress_sink(&job.id))
            .await
            .map_err(JobError::Extract)?;

        info!("[Job {}] Extraction complete", job.id);
        Ok(())
    }

    /// Composed pipeline for a disc image submitted as an optimize job:
    /// extract the main feature into a scratch directory, then run the
    /// ordinary optimization against the extracted file.
    async fn run_disc_image_optimization(
        &self,
        job: &Job,
        cancel: &CancellationToken,
    ) -> Result<(), JobError> {
        let extractor = self.extractor.as_ref().ok_or(JobError::ExtractorUnavailable)?;

        info!(
            "[Job {}] Disc image input detected, starting auto-extraction",
            job.id
        );

        let scratch_dir = job
            .destination_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default()
            .join(format!("extract_{}", job.id));
        std::fs::create_dir_all(&scratch_dir).map_err(|e| JobError::CreateDir {
            path: scratch_dir.clone(),
            source: e,
        })?;

        let info = extractor
            .scan(&job.source_path, cancel)
            .await
            .map_err(JobError::Scan)?;
        if info.titles.is_empty() {
            return Err(JobError::NoTitles);
        }

        let main_title = info.main_title().ok_or(JobError::NoTitles)?;
        info!("[Job {}] Identified main feature: title {}", job.id, main_title);

        // Phase 1 of two: the progress bar runs 0-100 for the extraction,
        // then again for the transcode.
        let opts = ExtractOptions {
            source: job.source_path.clone(),
            output_dir: scratch_dir.clone(),
            title_index: Some(main_title),
            min_length_secs: None,
        };
        extractor
            .extract_with_progress(&opts, cancel, self.progress_sink(&job.id))
            .await
            .map_err(JobError::Extract)?;

        let extracted = find_first_mkv(&scratch_dir).ok_or(JobError::NoExtractedOutput)?;
        info!(
            "[Job {}] Extraction complete, file: {}",
            job.id,
            extracted.display()
        );

        // Run the ordinary pipeline against the extracted file; the original
        // source is restored afterwards so audits identify the logical input.
        let original_source = job.source_path.clone();
        self.update_job(&job.id, |j| j.source_path = extracted.clone());
        self.persist();

        let mut phase_two = job.clone();
        phase_two.source_path = extracted;
        let result = self.run_optimization(&phase_two, cancel).await;

        if result.is_ok() {
            let _ = std::fs::remove_dir_all(&scratch_dir);
            self.update_job(&job.id, |j| j.source_path = original_source.clone());
            self.persist();
        }
        // On failure the scratch directory stays behind for post-mortem

        result
    }

    async fn run_optimization(
        &self,
        job: &Job,
        cancel: &CancellationToken,
    ) -> Result<(), JobError> {
        let transcoder = self
            .transcoder
            .as_ref()
            .ok_or(JobError::TranscoderUnavailable)?;

        // Probe failures degrade to duration zero, which disables percentage
        // and ETA but never fails the job.
        let media = match transcoder.media_info(&job.source_path).await {
            Ok(info) => info,
            Err(e) => {
                warn!("[Job {}] Probe failed, continuing without duration: {}", job.id, e);
                crate::transcode::MediaInfo::default()
            }
        };
        info!("[Job {}] Media duration: {:.2} seconds", job.id, media.duration);

        let mut quality_level = self.settings.quality_level;
        if self.settings.premium {
            if let Some(provider) = self.ai_provider() {
                match ai::recommend_quality(provider.as_ref(), &media.raw_json).await {
                    Ok(suggested) => {
                        info!(
                            "[Job {}] AI suggested quality {} (default {})",
                            job.id, suggested, quality_level
                        );
                        quality_level = suggested;
                    }
                    Err(e) => warn!("[Job {}] AI quality analysis failed: {}", job.id, e),
                }
            }
        }

        let opts = TranscodeOptions {
            input_path: job.source_path.clone(),
            output_path: job.destination_path.clone(),
            gpu_vendor: self.settings.gpu_vendor,
            preset: self.settings.preset,
            quality_level,
            audio_codec: AudioCodec::Copy,
            container: Container::Mkv,
            total_duration: media.duration,
            upscale: job.upscale,
            target_resolution: TargetResolution::parse(&job.resolution),
        };

        transcoder
            .transcode_with_progress(&opts, cancel, self.progress_sink(&job.id))
            .await?;

        info!("[Job {}] Transcoding completed", job.id);

        // Premium assist: subtitle generation never demotes the job
        if self.settings.premium && job.create_subtitles {
            if let Some(provider) = self.ai_provider() {
                match subtitles::generate_srt(
                    transcoder,
                    provider.as_ref(),
                    &job.destination_path,
                    cancel,
                )
                .await
                {
                    Ok(srt_path) => {
                        info!("[Job {}] Subtitles generated: {}", job.id, srt_path.display());
                        self.update_job(&job.id, |j| j.ai_subtitles = true);
                    }
                    Err(e) => warn!("[Job {}] Subtitle generation failed: {}", job.id, e),
                }
            }
        }

        Ok(())
    }

    /// Ten-second simulated job that yields to cancellation every 500 ms.
    async fn run_test(&self, id: &str, cancel: &CancellationToken) -> Result<(), JobError> {
        let total = std::time::Duration::from_secs(10);
        let start = tokio::time::Instant::now();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Err(JobError::Cancelled),
                _ = tokio::time::sleep(std::time::Duration::from_millis(500)) => {
                    let elapsed = start.elapsed();
                    if elapsed >= total {
                        return Ok(());
                    }
                    let remaining = total - elapsed;
                    self.update_job(id, |job| {
                        job.progress =
                            ((elapsed.as_secs_f64() / total.as_secs_f64()) * 100.0) as u8;
                        job.fps = 24.0;
                        job.eta = format_hms(remaining.as_secs_f64());
                    });
                }
            }
        }
    }
}

/// Whether a source path is a disc image routed through the composed pipeline.
fn is_disc_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            let lower = e.to_lowercase();
            DISC_IMAGE_EXTENSIONS.contains(&lower.as_str())
        })
        .unwrap_or(false)
}

/// First extracted MKV in a scratch directory, by name order.
fn find_first_mkv(dir: &Path) -> Option<PathBuf> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .ok()?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.extension()
                .and_then(|e| e.to_str())
                .map(|e| e.eq_ignore_ascii_case("mkv"))
                .unwrap_or(false)
        })
        .collect();
    files.sort();
    files.into_iter().next()
}
