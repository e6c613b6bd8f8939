//! The core's outward control surface, consumed by the HTTP layer.
//!
//! A thin callable boundary over the job manager and scanner. Transport
//! framing, authentication, and rendering live elsewhere; this module only
//! deals in plain records.

use log::warn;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

use crate::ai::{self, AiError, MediaItem};
use crate::jobs::{new_job_id, Job, JobKind};
use crate::manager::JobManager;
use crate::paths::{confine, PathError};
use crate::processed::ProcessedFile;
use crate::scanner::{ScanError, Scanner, ScannerConfig};

/// Error type for facade operations
#[derive(Debug, Error)]
pub enum FacadeError {
    #[error("{0}")]
    Path(#[from] PathError),

    #[error("AI search is a premium feature")]
    PremiumRequired,

    #[error("AI provider not configured")]
    AiUnavailable,

    #[error("{0}")]
    Ai(#[from] AiError),

    #[error("{0}")]
    Scanner(#[from] ScanError),
}

/// Request record for creating a job.
#[derive(Debug, Clone)]
pub struct JobSpec {
    pub kind: JobKind,
    pub source_path: PathBuf,
    /// Empty derives a `_optimized` sibling of the source
    pub destination_path: PathBuf,
    pub priority: i32,
    pub create_subtitles: bool,
    pub upscale: bool,
    pub resolution: String,
}

/// Narrow surface shared with the HTTP layer.
pub struct Facade {
    manager: Arc<JobManager>,
    scanner: Arc<Scanner>,
    source_root: PathBuf,
    dest_root: PathBuf,
}

impl Facade {
    pub fn new(
        manager: Arc<JobManager>,
        scanner: Arc<Scanner>,
        source_root: PathBuf,
        dest_root: PathBuf,
    ) -> Self {
        Self {
            manager,
            scanner,
            source_root,
            dest_root,
        }
    }

    /// Create and schedule a job from the given spec.
    ///
    /// The source must resolve inside the source root and the destination
    /// inside the destination root. A destination that is an existing
    /// directory gains the source filename; an empty destination derives a
    /// `_optimized` sibling of the source.
    pub async fn enqueue(&self, spec: JobSpec) -> Result<Job, FacadeError> {
        let source_path = confine(&spec.source_path, &[self.source_root.as_path()])?;

        let destination_path = if spec.destination_path.as_os_str().is_empty() {
            default_destination(&source_path)
        } else {
            let dest = confine(&spec.destination_path, &[self.dest_root.as_path()])?;
            match std::fs::metadata(&dest) {
                Ok(meta) if meta.is_dir() => {
                    dest.join(source_path.file_name().unwrap_or_default())
                }
                _ => dest,
            }
        };

        let mut job = Job::new(
            new_job_id(),
            spec.kind,
            source_path,
            destination_path,
            spec.priority,
        );
        job.create_subtitles = spec.create_subtitles;
        job.upscale = spec.upscale;
        job.resolution = spec.resolution;

        self.manager.add_job(job.clone()).await;
        Ok(job)
    }

    /// Cancel a live job. `false` when the id is unknown or already terminal.
    pub fn cancel(&self, id: &str) -> bool {
        self.manager.cancel_job(id)
    }

    /// Snapshot of one job.
    pub fn get(&self, id: &str) -> Option<Job> {
        self.manager.get_job(id)
    }

    /// Snapshot of all jobs.
    pub fn list(&self) -> Vec<Job> {
        self.manager.list_jobs()
    }

    /// Current scanner configuration.
    pub fn scanner_config(&self) -> ScannerConfig {
        self.scanner.config()
    }

    /// Validate and apply a new scanner configuration, restarting the scanner.
    ///
    /// Every watch directory must resolve inside the source root; a non-empty
    /// output directory must resolve inside the destination root.
    pub async fn update_scanner_config(
        &self,
        mut config: ScannerConfig,
    ) -> Result<(), FacadeError> {
        for watch_dir in &mut config.watch_dirs {
            watch_dir.path = confine(&watch_dir.path, &[self.source_root.as_path()])?;
        }

        if !config.output_directory.as_os_str().is_empty() {
            config.output_directory =
                confine(&config.output_directory, &[self.dest_root.as_path()])?;
        }

        self.scanner.update_config(config).await?;
        Ok(())
    }

    /// Schedule a full scan without waiting for it.
    pub fn trigger_scan(&self) {
        let scanner = Arc::clone(&self.scanner);
        tokio::spawn(async move {
            let summary = scanner.scan_all().await;
            if summary.files_found == 0 {
                warn!("Manual scan found no files");
            }
        });
    }

    /// Rank processed files against a natural-language query.
    ///
    /// Premium-gated; requires a configured AI provider.
    pub async fn search_by_ai(&self, query: &str) -> Result<Vec<ProcessedFile>, FacadeError> {
        if !self.manager.premium() {
            return Err(FacadeError::PremiumRequired);
        }
        let provider = self.manager.ai_provider().ok_or(FacadeError::AiUnavailable)?;

        let records = self.scanner.processed_store().list();
        let items: Vec<MediaItem> = records
            .iter()
            .map(|record| MediaItem {
                id: record.job_id.clone(),
                title: record
                    .path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default(),
            })
            .collect();

        let matching_ids = ai::rank_media(provider.as_ref(), query, &items).await?;

        let by_id: std::collections::HashMap<&str, &ProcessedFile> = records
            .iter()
            .map(|record| (record.job_id.as_str(), record))
            .collect();

        Ok(matching_ids
            .iter()
            .filter_map(|id| by_id.get(id.as_str()).map(|&r| r.clone()))
            .collect())
    }
}

/// Default destination: a `_optimized` sibling keeping the source extension.
fn default_destination(source: &Path) -> PathBuf {
    let dir = source.parent().map(Path::to_path_buf).unwrap_or_default();
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    match source.extension() {
        Some(ext) => dir.join(format!("{}_optimized.{}", stem, ext.to_string_lossy())),
        None => dir.join(format!("{}_optimized", stem)),
    }
}
