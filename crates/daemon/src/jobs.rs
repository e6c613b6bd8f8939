//! Job model and durable job store.
//!
//! Jobs are persisted as a single JSON document rewritten on every state
//! change. On load, any job interrupted mid-processing is demoted back to
//! pending so the manager can requeue it.

use chrono::{DateTime, Utc};
use log::warn;
use rand::rngs::OsRng;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Error type for job store operations
#[derive(Debug, Error)]
pub enum JobStoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Kind of work a job performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    /// Rip the main feature from a disc or disc image
    Extract,
    /// Transcode a media file (or disc image, via the composed pipeline)
    Optimize,
    /// Simulated ten-second job used for wiring checks
    Test,
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobKind::Extract => write!(f, "extract"),
            JobKind::Optimize => write!(f, "optimize"),
            JobKind::Test => write!(f, "test"),
        }
    }
}

/// Lifecycle status of a job.
///
/// Transitions are monotone except for the processing -> pending demotion
/// applied during restart recovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Processing => write!(f, "processing"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
            JobStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// A unit of work owned by the job manager.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: String,
    pub kind: JobKind,
    pub source_path: PathBuf,
    pub destination_path: PathBuf,
    pub status: JobStatus,
    /// Completion percentage, 0-100
    #[serde(default)]
    pub progress: u8,
    #[serde(default)]
    pub fps: f64,
    /// Estimated time remaining (HH:MM:SS)
    #[serde(default)]
    pub eta: String,
    /// Advisory only; the queue dispatches strictly FIFO
    #[serde(default)]
    pub priority: i32,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Terminal error string, set only when status is failed
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
    #[serde(default)]
    pub create_subtitles: bool,
    #[serde(default)]
    pub upscale: bool,
    /// Target resolution when upscaling ("1080p" or "4k")
    #[serde(default)]
    pub resolution: String,
    #[serde(default)]
    pub input_size: u64,
    #[serde(default)]
    pub output_size: u64,
    #[serde(default)]
    pub ai_cleaned: bool,
    #[serde(default)]
    pub ai_subtitles: bool,
}

impl Job {
    /// Create a pending job with the given identity and routing.
    pub fn new(
        id: String,
        kind: JobKind,
        source_path: PathBuf,
        destination_path: PathBuf,
        priority: i32,
    ) -> Self {
        Self {
            id,
            kind,
            source_path,
            destination_path,
            status: JobStatus::Pending,
            progress: 0,
            fps: 0.0,
            eta: String::new(),
            priority,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error: String::new(),
            create_subtitles: false,
            upscale: false,
            resolution: String::new(),
            input_size: 0,
            output_size: 0,
            ai_cleaned: false,
            ai_subtitles: false,
        }
    }

    /// Whether the job has reached a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

const ID_SUFFIX_LEN: usize = 6;
const ID_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Generate a job id: sortable creation timestamp plus a random suffix.
///
/// The suffix comes from the operating system RNG so concurrent creations in
/// the same second cannot collide predictably.
pub fn new_job_id() -> String {
    let stamp = Utc::now().format("%Y%m%d%H%M%S");
    let mut rng = OsRng;
    let suffix: String = (0..ID_SUFFIX_LEN)
        .map(|_| ID_ALPHABET[rng.gen_range(0..ID_ALPHABET.len())] as char)
        .collect();
    format!("{}-{}", stamp, suffix)
}

/// Durable snapshot of all jobs, kept as one JSON document.
pub struct JobStore {
    file_path: PathBuf,
}

impl JobStore {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            file_path: path.into(),
        }
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.file_path
    }

    /// Persist the given jobs, writing to a temp file and renaming.
    pub fn save(&self, jobs: &[Job]) -> Result<(), JobStoreError> {
        let data = serde_json::to_vec_pretty(jobs)?;

        if let Some(parent) = self.file_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let tmp_path = self.file_path.with_extension("json.tmp");
        fs::write(&tmp_path, data)?;
        fs::rename(&tmp_path, &self.file_path)?;
        Ok(())
    }

    /// Load persisted jobs, demoting any `processing` entry to `pending`.
    ///
    /// A missing store file yields an empty list.
    pub fn load(&self) -> Result<Vec<Job>, JobStoreError> {
        let data = match fs::read_to_string(&self.file_path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut jobs: Vec<Job> = serde_json::from_str(&data)?;

        let mut demoted = 0;
        for job in &mut jobs {
            if job.status == JobStatus::Processing {
                job.status = JobStatus::Pending;
                demoted += 1;
            }
        }
        if demoted > 0 {
            warn!(
                "Demoted {} interrupted job(s) from processing to pending",
                demoted
            );
        }

        Ok(jobs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::TempDir;

    fn make_job(id: &str, status: JobStatus) -> Job {
        let mut job = Job::new(
            id.to_string(),
            JobKind::Optimize,
            PathBuf::from("/storage/movie.mkv"),
            PathBuf::from("/output/movie_optimized.mkv"),
            5,
        );
        job.status = status;
        job
    }

    #[test]
    fn test_id_format() {
        let id = new_job_id();
        let (stamp, suffix) = id.split_once('-').expect("id should contain a dash");
        assert_eq!(stamp.len(), 14);
        assert!(stamp.chars().all(|c| c.is_ascii_digit()));
        assert_eq!(suffix.len(), ID_SUFFIX_LEN);
        assert!(suffix
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    }

    #[test]
    fn test_ids_unique() {
        let mut seen = std::collections::HashSet::new();
        for _ in 0..100 {
            assert!(seen.insert(new_job_id()));
        }
    }

    #[test]
    fn test_status_display() {
        assert_eq!(JobStatus::Pending.to_string(), "pending");
        assert_eq!(JobStatus::Processing.to_string(), "processing");
        assert_eq!(JobStatus::Completed.to_string(), "completed");
        assert_eq!(JobStatus::Failed.to_string(), "failed");
        assert_eq!(JobStatus::Cancelled.to_string(), "cancelled");
    }

    #[test]
    fn test_is_terminal() {
        assert!(!make_job("a", JobStatus::Pending).is_terminal());
        assert!(!make_job("a", JobStatus::Processing).is_terminal());
        assert!(make_job("a", JobStatus::Completed).is_terminal());
        assert!(make_job("a", JobStatus::Failed).is_terminal());
        assert!(make_job("a", JobStatus::Cancelled).is_terminal());
    }

    #[test]
    fn test_camel_case_wire_format() {
        let job = make_job("20260101120000-abcdef", JobStatus::Pending);
        let json = serde_json::to_string(&job).unwrap();

        assert!(json.contains("\"sourcePath\""));
        assert!(json.contains("\"destinationPath\""));
        assert!(json.contains("\"createdAt\""));
        assert!(json.contains("\"createSubtitles\""));
        assert!(json.contains("\"status\":\"pending\""));
        assert!(json.contains("\"kind\":\"optimize\""));
        // Empty error and unset timestamps stay off the wire
        assert!(!json.contains("\"error\""));
        assert!(!json.contains("\"startedAt\""));
    }

    #[test]
    fn test_store_save_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = JobStore::new(dir.path().join("jobs.json"));

        let jobs = vec![
            make_job("20260101120000-aaaaaa", JobStatus::Pending),
            make_job("20260101120001-bbbbbb", JobStatus::Completed),
        ];
        store.save(&jobs).expect("save");

        let loaded = store.load().expect("load");
        assert_eq!(loaded, jobs);
    }

    #[test]
    fn test_load_demotes_processing_to_pending() {
        let dir = TempDir::new().unwrap();
        let store = JobStore::new(dir.path().join("jobs.json"));

        let jobs = vec![
            make_job("20260101120000-aaaaaa", JobStatus::Processing),
            make_job("20260101120001-bbbbbb", JobStatus::Pending),
            make_job("20260101120002-cccccc", JobStatus::Failed),
        ];
        store.save(&jobs).expect("save");

        let loaded = store.load().expect("load");
        assert_eq!(loaded[0].status, JobStatus::Pending);
        assert_eq!(loaded[1].status, JobStatus::Pending);
        assert_eq!(loaded[2].status, JobStatus::Failed);
    }

    #[test]
    fn test_load_missing_file_yields_empty() {
        let store = JobStore::new("/nonexistent/dir/jobs.json");
        assert!(store.load().expect("missing file is fine").is_empty());
    }

    fn job_status_strategy() -> impl Strategy<Value = JobStatus> {
        prop_oneof![
            Just(JobStatus::Pending),
            Just(JobStatus::Processing),
            Just(JobStatus::Completed),
            Just(JobStatus::Failed),
            Just(JobStatus::Cancelled),
        ]
    }

    fn job_kind_strategy() -> impl Strategy<Value = JobKind> {
        prop_oneof![
            Just(JobKind::Extract),
            Just(JobKind::Optimize),
            Just(JobKind::Test),
        ]
    }

    fn job_strategy() -> impl Strategy<Value = Job> {
        (
            "[0-9]{14}-[a-z0-9]{6}",
            job_kind_strategy(),
            job_status_strategy(),
            "[a-zA-Z0-9/_.-]{5,40}",
            "[a-zA-Z0-9/_.-]{5,40}",
            0u8..=100,
            0.0f64..500.0,
            -10i32..10,
            prop::option::of("[a-zA-Z0-9 ]{1,60}"),
        )
            .prop_map(
                |(id, kind, status, source, dest, progress, fps, priority, error)| {
                    let mut job = Job::new(
                        id,
                        kind,
                        PathBuf::from(source),
                        PathBuf::from(dest),
                        priority,
                    );
                    job.status = status;
                    job.progress = progress;
                    job.fps = fps;
                    job.error = error.unwrap_or_default();
                    job
                },
            )
    }

    proptest! {
        #[test]
        fn prop_job_json_round_trip(job in job_strategy()) {
            let json = serde_json::to_string(&job).expect("serialize");
            let back: Job = serde_json::from_str(&json).expect("deserialize");
            prop_assert_eq!(job, back);
        }
    }
}
