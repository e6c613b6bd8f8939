//! Mode-driven directory monitor that feeds the job manager.
//!
//! The scanner walks configured directories (startup/periodic), reacts to
//! file-system create events (watch), gates candidates through glob and
//! size/age checks, deduplicates against the processed store, and lazily
//! creates jobs.

use glob::Pattern;
use log::{debug, info, warn};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex, RwLock, Weak};
use std::time::{Duration, SystemTime};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

use crate::jobs::{new_job_id, Job, JobKind};
use crate::manager::JobManager;
use crate::processed::{ProcessedStore, StoreError};

/// Error type for scanner operations
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("processed store error: {0}")]
    Store(#[from] StoreError),

    #[error("file watcher error: {0}")]
    Watcher(#[from] notify::Error),
}

/// How the scanner discovers files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanMode {
    /// Only explicit scans run
    Manual,
    /// One scan immediately, then idle
    Startup,
    /// Background scan every interval
    Periodic,
    /// Real-time file-system events
    Watch,
    /// Startup + watch + periodic, concurrently
    Hybrid,
}

impl ScanMode {
    /// Parse a configured mode string; unknown values fall back to manual.
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "startup" => ScanMode::Startup,
            "periodic" => ScanMode::Periodic,
            "watch" => ScanMode::Watch,
            "hybrid" => ScanMode::Hybrid,
            _ => ScanMode::Manual,
        }
    }
}

/// A directory the scanner monitors. Immutable after load.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WatchDirectory {
    pub path: PathBuf,
    #[serde(default)]
    pub recursive: bool,
    /// Basename globs; empty accepts everything not excluded
    #[serde(default)]
    pub include_globs: Vec<String>,
    /// Basename globs; a match rejects regardless of includes
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub min_size_bytes: u64,
    /// Files younger than this are deferred (watch) or skipped (scan)
    #[serde(default)]
    pub min_age_seconds: u64,
}

/// Full scanner configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScannerConfig {
    pub enabled: bool,
    pub mode: ScanMode,
    pub interval_seconds: u64,
    pub auto_create_jobs: bool,
    #[serde(default)]
    pub auto_create_subtitles: bool,
    pub watch_dirs: Vec<WatchDirectory>,
    /// Extensions (with leading dot) routed to extract jobs
    pub extract_extensions: Vec<String>,
    /// Extensions (with leading dot) routed to optimize jobs
    pub optimize_extensions: Vec<String>,
    pub default_priority: i32,
    /// Destination for derived outputs; empty places them beside the input
    pub output_directory: PathBuf,
    pub processed_file_path: PathBuf,
}

impl ScannerConfig {
    /// Build a scanner configuration from the service configuration,
    /// watching the source root with stock media patterns.
    pub fn from_service_config(config: &mediaforge_config::Config) -> Self {
        Self {
            enabled: config.scanner.enabled,
            mode: ScanMode::parse(&config.scanner.mode),
            interval_seconds: config.scanner.interval_secs,
            auto_create_jobs: config.scanner.auto_create_jobs,
            auto_create_subtitles: config.scanner.auto_create_subtitles,
            watch_dirs: vec![WatchDirectory {
                path: config.paths.source_dir.clone(),
                recursive: true,
                include_globs: vec![
                    "*.mkv".into(),
                    "*.mp4".into(),
                    "*.avi".into(),
                    "*.iso".into(),
                ],
                exclude_globs: vec!["*_optimized.mkv".into(), "*_temp*".into(), ".*".into()],
                min_size_bytes: 10 * 1024 * 1024,
                min_age_seconds: 120,
            }],
            extract_extensions: vec![".iso".into()],
            optimize_extensions: vec![
                ".mkv".into(),
                ".mp4".into(),
                ".avi".into(),
                ".mov".into(),
                ".m4v".into(),
                ".mpg".into(),
                ".mpeg".into(),
                ".wmv".into(),
                ".flv".into(),
                ".webm".into(),
            ],
            default_priority: 5,
            output_directory: config.paths.dest_dir.clone(),
            processed_file_path: config.processed_file(),
        }
    }
}

/// Result of a full scan pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanSummary {
    pub files_found: usize,
    pub jobs_created: usize,
}

/// Automatic file discovery and job creation.
pub struct Scanner {
    this: Weak<Scanner>,
    config: RwLock<ScannerConfig>,
    manager: Arc<JobManager>,
    processed: Arc<ProcessedStore>,
    /// Cancellation scope of the current generation of background tasks;
    /// replaced on every restart.
    stop: StdMutex<CancellationToken>,
    tasks: StdMutex<Vec<JoinHandle<()>>>,
}

impl Scanner {
    /// Create a scanner, opening (or creating) its processed store.
    pub fn new(config: ScannerConfig, manager: Arc<JobManager>) -> Result<Arc<Self>, ScanError> {
        let processed = Arc::new(ProcessedStore::open(&config.processed_file_path)?);

        Ok(Arc::new_cyclic(|this| Self {
            this: this.clone(),
            config: RwLock::new(config),
            manager,
            processed,
            stop: StdMutex::new(CancellationToken::new()),
            tasks: StdMutex::new(Vec::new()),
        }))
    }

    /// The processed-file store owned by this scanner.
    pub fn processed_store(&self) -> Arc<ProcessedStore> {
        Arc::clone(&self.processed)
    }

    /// Snapshot of the current configuration.
    pub fn config(&self) -> ScannerConfig {
        self.config.read().unwrap().clone()
    }

    /// Start background activity for the configured mode.
    pub async fn start(&self) -> Result<(), ScanError> {
        let config = self.config();
        if !config.enabled {
            info!("[Scanner] Disabled, not starting");
            return Ok(());
        }

        info!("[Scanner] Starting in {:?} mode", config.mode);

        // Fresh cancellation scope for this generation of tasks
        let stop = {
            let mut guard = self.stop.lock().unwrap();
            if guard.is_cancelled() {
                *guard = CancellationToken::new();
            }
            guard.clone()
        };

        match config.mode {
            ScanMode::Manual => Ok(()),
            ScanMode::Startup => {
                self.scan_all().await;
                Ok(())
            }
            ScanMode::Periodic => {
                self.spawn_periodic(stop);
                Ok(())
            }
            ScanMode::Watch => self.spawn_watcher(stop),
            ScanMode::Hybrid => {
                self.scan_all().await;
                self.spawn_watcher(stop.clone())?;
                self.spawn_periodic(stop);
                Ok(())
            }
        }
    }

    /// Stop background tasks, close watchers, and persist the processed store.
    pub async fn stop(&self) {
        info!("[Scanner] Stopping");
        self.stop.lock().unwrap().cancel();

        let handles: Vec<_> = {
            let mut tasks = self.tasks.lock().unwrap();
            tasks.drain(..).collect()
        };
        for handle in handles {
            let _ = handle.await;
        }

        if let Err(e) = self.processed.save() {
            warn!("[Scanner] Failed to save processed store: {}", e);
        }
        info!("[Scanner] Stopped");
    }

    /// Replace the configuration, restarting the scanner when enabled.
    ///
    /// Not transactional: there is a brief window where the scanner is
    /// neither the old nor the new configuration.
    pub async fn update_config(&self, new_config: ScannerConfig) -> Result<(), ScanError> {
        info!("[Scanner] Configuration updated, restarting");
        self.stop().await;

        let enabled = new_config.enabled;
        {
            let mut config = self.config.write().unwrap();
            *config = new_config;
        }

        if enabled {
            self.start().await
        } else {
            Ok(())
        }
    }

    /// Scan all configured directories once.
    pub async fn scan_all(&self) -> ScanSummary {
        info!("[Scanner] Starting full scan of all directories");
        let config = self.config();

        let mut summary = ScanSummary::default();

        for watch_dir in &config.watch_dirs {
            let files = scan_directory(watch_dir);
            summary.files_found += files.len();

            for file in files {
                if self.should_process(&file, watch_dir) {
                    match self.create_job_for_file(&file).await {
                        Ok(true) => summary.jobs_created += 1,
                        Ok(false) => {}
                        Err(e) => {
                            warn!("[Scanner] Failed to create job for {}: {}", file.display(), e)
                        }
                    }
                }
            }
        }

        info!(
            "[Scanner] Scan complete: {} files found, {} jobs created",
            summary.files_found, summary.jobs_created
        );
        summary
    }

    /// Whether a candidate passes dedup, stat, size, and age gates.
    fn should_process(&self, path: &Path, watch_dir: &WatchDirectory) -> bool {
        if self.processed.is_processed(path) {
            return false;
        }

        let meta = match std::fs::metadata(path) {
            Ok(meta) => meta,
            Err(e) => {
                debug!("[Scanner] Failed to stat {}: {}", path.display(), e);
                return false;
            }
        };

        if meta.len() < watch_dir.min_size_bytes {
            debug!(
                "[Scanner] Skipping {}: too small ({} < {} bytes)",
                path.display(),
                meta.len(),
                watch_dir.min_size_bytes
            );
            return false;
        }

        if watch_dir.min_age_seconds > 0 {
            let age = meta
                .modified()
                .ok()
                .and_then(|m| SystemTime::now().duration_since(m).ok())
                .unwrap_or(Duration::ZERO);
            if age < Duration::from_secs(watch_dir.min_age_seconds) {
                debug!(
                    "[Scanner] Skipping {}: too new ({:?} old)",
                    path.display(),
                    age
                );
                return false;
            }
        }

        true
    }

    /// Classify a file by extension and enqueue the matching job.
    ///
    /// Returns `Ok(true)` when a job was created, `Ok(false)` when the file
    /// was dropped (auto-create disabled or unknown extension).
    async fn create_job_for_file(&self, path: &Path) -> Result<bool, ScanError> {
        let config = self.config();

        if !config.auto_create_jobs {
            info!(
                "[Scanner] Found file {} (auto-create disabled)",
                path.display()
            );
            return Ok(false);
        }

        let ext = path
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
            .unwrap_or_default();

        let kind = if contains_extension(&config.extract_extensions, &ext) {
            JobKind::Extract
        } else if contains_extension(&config.optimize_extensions, &ext) {
            JobKind::Optimize
        } else {
            debug!(
                "[Scanner] Skipping {}: unknown extension {}",
                path.display(),
                ext
            );
            return Ok(false);
        };

        let output_path = derive_output_path(path, kind, &config.output_directory);

        let mut job = Job::new(
            new_job_id(),
            kind,
            path.to_path_buf(),
            output_path,
            config.default_priority,
        );
        job.create_subtitles = config.auto_create_subtitles;
        let job_id = job.id.clone();

        self.manager.add_job(job).await;
        self.processed
            .mark_processed(path, &job_id, &kind.to_string());

        info!(
            "[Scanner] Created {} job {} for {}",
            kind,
            job_id,
            path.display()
        );
        Ok(true)
    }

    /// React to a newly created file reported by the watcher.
    async fn handle_new_file(&self, path: PathBuf, stop: CancellationToken) {
        let config = self.config();

        for watch_dir in &config.watch_dirs {
            if !path.starts_with(&watch_dir.path) || !matches_patterns(&path, watch_dir) {
                continue;
            }

            if watch_dir.min_age_seconds > 0 {
                // Defer until the file has settled; cancellable by shutdown
                let scanner = self.this.clone();
                let watch_dir = watch_dir.clone();
                let delay = Duration::from_secs(watch_dir.min_age_seconds);
                let handle = tokio::spawn(async move {
                    debug!(
                        "[Scanner] Delaying processing of {} for {:?}",
                        path.display(),
                        delay
                    );
                    tokio::select! {
                        _ = stop.cancelled() => {}
                        _ = tokio::time::sleep(delay) => {
                            if let Some(scanner) = scanner.upgrade() {
                                if scanner.should_process(&path, &watch_dir) {
                                    if let Err(e) = scanner.create_job_for_file(&path).await {
                                        warn!(
                                            "[Scanner] Failed to create job for {}: {}",
                                            path.display(),
                                            e
                                        );
                                    }
                                }
                            }
                        }
                    }
                });
                self.tasks.lock().unwrap().push(handle);
            } else if self.should_process(&path, watch_dir) {
                if let Err(e) = self.create_job_for_file(&path).await {
                    warn!(
                        "[Scanner] Failed to create job for {}: {}",
                        path.display(),
                        e
                    );
                }
            }
            break;
        }
    }

    fn spawn_periodic(&self, stop: CancellationToken) {
        let scanner = self.this.clone();
        let interval = {
            let config = self.config.read().unwrap();
            Duration::from_secs(config.interval_seconds.max(1))
        };

        let handle = tokio::spawn(async move {
            info!("[Scanner] Periodic scan started (interval {:?})", interval);
            loop {
                tokio::select! {
                    _ = stop.cancelled() => return,
                    _ = tokio::time::sleep(interval) => {
                        match scanner.upgrade() {
                            Some(scanner) => {
                                info!("[Scanner] Running periodic scan");
                                scanner.scan_all().await;
                            }
                            None => return,
                        }
                    }
                }
            }
        });
        self.tasks.lock().unwrap().push(handle);
    }

    fn spawn_watcher(&self, stop: CancellationToken) -> Result<(), ScanError> {
        let (event_tx, mut event_rx) = tokio::sync::mpsc::unbounded_channel();

        let mut watcher: RecommendedWatcher =
            notify::recommended_watcher(move |result: Result<notify::Event, notify::Error>| {
                let _ = event_tx.send(result);
            })?;

        {
            let config = self.config.read().unwrap();
            for watch_dir in &config.watch_dirs {
                let mode = if watch_dir.recursive {
                    RecursiveMode::Recursive
                } else {
                    RecursiveMode::NonRecursive
                };
                watcher.watch(&watch_dir.path, mode)?;
                info!("[Scanner] Watching directory: {}", watch_dir.path.display());
            }
        }

        let scanner = self.this.clone();
        let handle = tokio::spawn(async move {
            // The watcher lives inside the task; dropping it on exit
            // detaches the OS-level watches.
            let _watcher = watcher;
            info!("[Scanner] File watcher started");

            loop {
                tokio::select! {
                    _ = stop.cancelled() => return,
                    event = event_rx.recv() => {
                        let event = match event {
                            Some(Ok(event)) => event,
                            Some(Err(e)) => {
                                warn!("[Scanner] Watcher error: {}", e);
                                continue;
                            }
                            None => return,
                        };

                        if !matches!(event.kind, notify::EventKind::Create(_)) {
                            continue;
                        }

                        let scanner = match scanner.upgrade() {
                            Some(scanner) => scanner,
                            None => return,
                        };
                        for path in event.paths {
                            scanner.handle_new_file(path, stop.clone()).await;
                        }
                    }
                }
            }
        });
        self.tasks.lock().unwrap().push(handle);
        Ok(())
    }

    /// Completion hook: enrich the processed record for a finished job.
    pub fn on_job_complete(&self, job: &Job) {
        self.processed.complete(job);
    }
}

/// Walk one watch directory and collect entries that match its patterns.
fn scan_directory(watch_dir: &WatchDirectory) -> Vec<PathBuf> {
    if !watch_dir.path.exists() {
        warn!(
            "[Scanner] Watch directory does not exist: {}",
            watch_dir.path.display()
        );
        return Vec::new();
    }

    let max_depth = if watch_dir.recursive { usize::MAX } else { 1 };

    WalkDir::new(&watch_dir.path)
        .min_depth(1)
        .max_depth(max_depth)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| matches_patterns(p, watch_dir))
        .collect()
}

/// Basename glob matching: excludes win, an empty include list accepts.
fn matches_patterns(path: &Path, watch_dir: &WatchDirectory) -> bool {
    let filename = match path.file_name().and_then(|n| n.to_str()) {
        Some(name) => name,
        None => return false,
    };

    for pattern in &watch_dir.exclude_globs {
        if let Ok(pattern) = Pattern::new(pattern) {
            if pattern.matches(filename) {
                return false;
            }
        }
    }

    if watch_dir.include_globs.is_empty() {
        return true;
    }

    watch_dir.include_globs.iter().any(|pattern| {
        Pattern::new(pattern)
            .map(|p| p.matches(filename))
            .unwrap_or(false)
    })
}

/// Case-insensitive membership test for dotted extensions.
fn contains_extension(extensions: &[String], ext: &str) -> bool {
    extensions.iter().any(|e| e.eq_ignore_ascii_case(ext))
}

/// Derive the output path for a scanner-created job.
///
/// Extract jobs get a subdirectory named by the input stem; optimize jobs get
/// `<stem>_optimized.mkv`. An empty output directory places results beside
/// the input.
fn derive_output_path(input: &Path, kind: JobKind, output_directory: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    let output_dir = if output_directory.as_os_str().is_empty() {
        input.parent().map(Path::to_path_buf).unwrap_or_default()
    } else {
        output_directory.to_path_buf()
    };

    match kind {
        JobKind::Extract => output_dir.join(stem),
        JobKind::Optimize => output_dir.join(format!("{}_optimized.mkv", stem)),
        JobKind::Test => output_dir.join(input.file_name().unwrap_or_default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::JobStatus;
    use mediaforge_config::Config;
    use tempfile::TempDir;

    fn test_watch_dir(path: &Path) -> WatchDirectory {
        WatchDirectory {
            path: path.to_path_buf(),
            recursive: true,
            include_globs: vec!["*.mkv".into(), "*.iso".into()],
            exclude_globs: vec!["*_optimized.mkv".into()],
            min_size_bytes: 0,
            min_age_seconds: 0,
        }
    }

    fn test_scanner_config(dir: &TempDir, source: &Path, output: &Path) -> ScannerConfig {
        ScannerConfig {
            enabled: true,
            mode: ScanMode::Manual,
            interval_seconds: 300,
            auto_create_jobs: true,
            auto_create_subtitles: false,
            watch_dirs: vec![test_watch_dir(source)],
            extract_extensions: vec![".iso".into()],
            optimize_extensions: vec![".mkv".into(), ".mp4".into()],
            default_priority: 5,
            output_directory: output.to_path_buf(),
            processed_file_path: dir.path().join("processed.json"),
        }
    }

    fn test_manager(dir: &TempDir) -> Arc<JobManager> {
        JobManager::with_drivers(
            &Config::default(),
            None,
            dir.path().join("jobs.json"),
            None,
            None,
        )
    }

    #[test]
    fn test_matches_patterns_exclude_wins() {
        let dir = test_watch_dir(Path::new("/m"));
        assert!(matches_patterns(Path::new("/m/a.mkv"), &dir));
        assert!(!matches_patterns(Path::new("/m/a_optimized.mkv"), &dir));
        assert!(!matches_patterns(Path::new("/m/a.txt"), &dir));
    }

    #[test]
    fn test_matches_patterns_empty_includes_accept_all() {
        let mut dir = test_watch_dir(Path::new("/m"));
        dir.include_globs.clear();
        assert!(matches_patterns(Path::new("/m/anything.xyz"), &dir));
        assert!(!matches_patterns(Path::new("/m/a_optimized.mkv"), &dir));
    }

    #[test]
    fn test_derive_output_path() {
        assert_eq!(
            derive_output_path(Path::new("/m/a.mkv"), JobKind::Optimize, Path::new("/out")),
            PathBuf::from("/out/a_optimized.mkv")
        );
        assert_eq!(
            derive_output_path(Path::new("/m/disc.iso"), JobKind::Extract, Path::new("/out")),
            PathBuf::from("/out/disc")
        );
        // Empty output directory places results beside the input
        assert_eq!(
            derive_output_path(Path::new("/m/a.mkv"), JobKind::Optimize, Path::new("")),
            PathBuf::from("/m/a_optimized.mkv")
        );
    }

    #[test]
    fn test_contains_extension_case_insensitive() {
        let exts = vec![".iso".to_string(), ".mkv".to_string()];
        assert!(contains_extension(&exts, ".ISO"));
        assert!(contains_extension(&exts, ".mkv"));
        assert!(!contains_extension(&exts, ".mp4"));
    }

    #[test]
    fn test_scan_mode_parse() {
        assert_eq!(ScanMode::parse("hybrid"), ScanMode::Hybrid);
        assert_eq!(ScanMode::parse("Watch"), ScanMode::Watch);
        assert_eq!(ScanMode::parse("bogus"), ScanMode::Manual);
    }

    #[tokio::test]
    async fn test_scan_all_creates_one_optimize_job() {
        let state = TempDir::new().unwrap();
        let source = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();

        let media = source.path().join("a.mkv");
        std::fs::write(&media, vec![0u8; 2048]).unwrap();

        let manager = test_manager(&state);
        let scanner = Scanner::new(
            test_scanner_config(&state, source.path(), output.path()),
            Arc::clone(&manager),
        )
        .unwrap();

        let summary = scanner.scan_all().await;
        assert_eq!(summary.files_found, 1);
        assert_eq!(summary.jobs_created, 1);

        let jobs = manager.list_jobs();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].kind, JobKind::Optimize);
        assert_eq!(jobs[0].status, JobStatus::Pending);
        assert_eq!(jobs[0].source_path, media);
        assert_eq!(
            jobs[0].destination_path,
            output.path().join("a_optimized.mkv")
        );
        assert_eq!(jobs[0].priority, 5);
    }

    #[tokio::test]
    async fn test_rescan_suppressed_by_processed_store() {
        let state = TempDir::new().unwrap();
        let source = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();

        std::fs::write(source.path().join("a.mkv"), vec![0u8; 2048]).unwrap();

        let manager = test_manager(&state);
        let scanner = Scanner::new(
            test_scanner_config(&state, source.path(), output.path()),
            Arc::clone(&manager),
        )
        .unwrap();

        let first = scanner.scan_all().await;
        assert_eq!(first.jobs_created, 1);

        let second = scanner.scan_all().await;
        assert_eq!(second.files_found, 1);
        assert_eq!(second.jobs_created, 0);
        assert_eq!(manager.list_jobs().len(), 1);
    }

    #[tokio::test]
    async fn test_iso_routed_to_extract_with_subdir_output() {
        let state = TempDir::new().unwrap();
        let source = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();

        std::fs::write(source.path().join("disc.iso"), vec![0u8; 2048]).unwrap();

        let manager = test_manager(&state);
        let scanner = Scanner::new(
            test_scanner_config(&state, source.path(), output.path()),
            Arc::clone(&manager),
        )
        .unwrap();

        scanner.scan_all().await;

        let jobs = manager.list_jobs();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].kind, JobKind::Extract);
        assert_eq!(jobs[0].destination_path, output.path().join("disc"));
    }

    #[tokio::test]
    async fn test_size_gate_rejects_small_files() {
        let state = TempDir::new().unwrap();
        let source = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();

        std::fs::write(source.path().join("small.mkv"), vec![0u8; 16]).unwrap();

        let mut config = test_scanner_config(&state, source.path(), output.path());
        config.watch_dirs[0].min_size_bytes = 1024;

        let manager = test_manager(&state);
        let scanner = Scanner::new(config, Arc::clone(&manager)).unwrap();

        let summary = scanner.scan_all().await;
        assert_eq!(summary.files_found, 1);
        assert_eq!(summary.jobs_created, 0);
    }

    #[tokio::test]
    async fn test_age_gate_rejects_fresh_files() {
        let state = TempDir::new().unwrap();
        let source = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();

        std::fs::write(source.path().join("fresh.mkv"), vec![0u8; 2048]).unwrap();

        let mut config = test_scanner_config(&state, source.path(), output.path());
        config.watch_dirs[0].min_age_seconds = 3600;

        let manager = test_manager(&state);
        let scanner = Scanner::new(config, Arc::clone(&manager)).unwrap();

        let summary = scanner.scan_all().await;
        assert_eq!(summary.jobs_created, 0);
    }

    #[tokio::test]
    async fn test_auto_create_disabled_drops_files() {
        let state = TempDir::new().unwrap();
        let source = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();

        std::fs::write(source.path().join("a.mkv"), vec![0u8; 2048]).unwrap();

        let mut config = test_scanner_config(&state, source.path(), output.path());
        config.auto_create_jobs = false;

        let manager = test_manager(&state);
        let scanner = Scanner::new(config, Arc::clone(&manager)).unwrap();

        let summary = scanner.scan_all().await;
        assert_eq!(summary.jobs_created, 0);
        assert!(manager.list_jobs().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_extension_dropped() {
        let state = TempDir::new().unwrap();
        let source = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();

        std::fs::write(source.path().join("notes.mkv"), vec![0u8; 2048]).unwrap();

        let mut config = test_scanner_config(&state, source.path(), output.path());
        // Include pattern matches, but no extension routing entry exists
        config.extract_extensions.clear();
        config.optimize_extensions = vec![".mp4".into()];

        let manager = test_manager(&state);
        let scanner = Scanner::new(config, Arc::clone(&manager)).unwrap();

        let summary = scanner.scan_all().await;
        assert_eq!(summary.files_found, 1);
        assert_eq!(summary.jobs_created, 0);
    }

    #[tokio::test]
    async fn test_non_recursive_skips_subdirectories() {
        let state = TempDir::new().unwrap();
        let source = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();

        let sub = source.path().join("sub");
        std::fs::create_dir(&sub).unwrap();
        std::fs::write(sub.join("nested.mkv"), vec![0u8; 2048]).unwrap();
        std::fs::write(source.path().join("top.mkv"), vec![0u8; 2048]).unwrap();

        let mut config = test_scanner_config(&state, source.path(), output.path());
        config.watch_dirs[0].recursive = false;

        let manager = test_manager(&state);
        let scanner = Scanner::new(config, Arc::clone(&manager)).unwrap();

        let summary = scanner.scan_all().await;
        assert_eq!(summary.files_found, 1);
        assert_eq!(summary.jobs_created, 1);
        assert!(manager.list_jobs()[0].source_path.ends_with("top.mkv"));
    }

    #[tokio::test]
    async fn test_update_config_round_trip() {
        let state = TempDir::new().unwrap();
        let source = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();

        let manager = test_manager(&state);
        let scanner = Scanner::new(
            test_scanner_config(&state, source.path(), output.path()),
            manager,
        )
        .unwrap();

        let mut updated = test_scanner_config(&state, source.path(), output.path());
        updated.enabled = false;
        updated.interval_seconds = 60;
        updated.default_priority = 9;

        scanner.update_config(updated.clone()).await.unwrap();
        assert_eq!(scanner.config(), updated);
    }

    #[tokio::test]
    async fn test_handle_new_file_immediate_processing() {
        let state = TempDir::new().unwrap();
        let source = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();

        let media = source.path().join("new.mkv");
        std::fs::write(&media, vec![0u8; 2048]).unwrap();

        let manager = test_manager(&state);
        let scanner = Scanner::new(
            test_scanner_config(&state, source.path(), output.path()),
            Arc::clone(&manager),
        )
        .unwrap();

        scanner
            .handle_new_file(media.clone(), CancellationToken::new())
            .await;

        let jobs = manager.list_jobs();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].source_path, media);
    }

    #[tokio::test]
    async fn test_handle_new_file_outside_watch_dirs_ignored() {
        let state = TempDir::new().unwrap();
        let source = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        let elsewhere = TempDir::new().unwrap();

        let media = elsewhere.path().join("stray.mkv");
        std::fs::write(&media, vec![0u8; 2048]).unwrap();

        let manager = test_manager(&state);
        let scanner = Scanner::new(
            test_scanner_config(&state, source.path(), output.path()),
            Arc::clone(&manager),
        )
        .unwrap();

        scanner
            .handle_new_file(media, CancellationToken::new())
            .await;
        assert!(manager.list_jobs().is_empty());
    }

    #[tokio::test]
    async fn test_on_job_complete_enriches_processed_entry() {
        let state = TempDir::new().unwrap();
        let source = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();

        let media = source.path().join("a.mkv");
        std::fs::write(&media, vec![0u8; 2048]).unwrap();

        let manager = test_manager(&state);
        let scanner = Scanner::new(
            test_scanner_config(&state, source.path(), output.path()),
            Arc::clone(&manager),
        )
        .unwrap();

        scanner.scan_all().await;

        let mut job = manager.list_jobs().remove(0);
        job.input_size = 2048;
        job.output_size = 512;
        job.ai_subtitles = true;
        scanner.on_job_complete(&job);

        let records = scanner.processed_store().list();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].input_size, 2048);
        assert_eq!(records[0].output_size, 512);
        assert!(records[0].ai_subtitles);
    }
}
