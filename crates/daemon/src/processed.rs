//! Persistent record of files that have already been turned into jobs.
//!
//! The scanner consults this store to avoid re-enqueueing a path, and the
//! completion hook enriches entries with output sizes and AI flags so the
//! dashboard can aggregate without inspecting jobs.

use chrono::{DateTime, Utc};
use log::warn;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use thiserror::Error;

use crate::jobs::Job;

/// Number of leading bytes hashed for deduplication.
///
/// Hashing the whole file would be prohibitive on multi-gigabyte media; the
/// first mebibyte is a dedup heuristic, not a security property.
const HASH_PREFIX_BYTES: u64 = 1024 * 1024;

/// Error type for store persistence
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Record of a single processed file, keyed by absolute path
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProcessedFile {
    pub path: PathBuf,
    /// SHA-256 of the first mebibyte of the file
    pub hash: String,
    pub processed_at: DateTime<Utc>,
    /// Id of the job that processed this file
    pub job_id: String,
    pub job_type: String,
    #[serde(default)]
    pub input_size: u64,
    #[serde(default)]
    pub output_size: u64,
    #[serde(default)]
    pub ai_cleaned: bool,
    #[serde(default)]
    pub ai_subtitles: bool,
    #[serde(default)]
    pub ai_upscale: bool,
}

/// Persistent mapping from absolute path to [`ProcessedFile`].
///
/// Concurrency is internal: a readers-writer lock protects the map, and
/// `save` snapshots under the read lock before writing atomically.
pub struct ProcessedStore {
    file_path: PathBuf,
    entries: RwLock<HashMap<PathBuf, ProcessedFile>>,
}

impl ProcessedStore {
    /// Open the store at the given path, loading any existing records.
    ///
    /// A missing file is not an error; the store starts empty.
    pub fn open<P: Into<PathBuf>>(path: P) -> Result<Self, StoreError> {
        let store = Self {
            file_path: path.into(),
            entries: RwLock::new(HashMap::new()),
        };
        store.load()?;
        Ok(store)
    }

    /// Load records from disk, replacing the in-memory map.
    pub fn load(&self) -> Result<(), StoreError> {
        let data = match fs::read_to_string(&self.file_path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        let loaded: HashMap<PathBuf, ProcessedFile> = serde_json::from_str(&data)?;
        let mut entries = self.entries.write().unwrap();
        *entries = loaded;
        Ok(())
    }

    /// Persist all records, writing to a sibling temp file and renaming.
    pub fn save(&self) -> Result<(), StoreError> {
        let data = {
            let entries = self.entries.read().unwrap();
            serde_json::to_vec_pretty(&*entries)?
        };

        if let Some(parent) = self.file_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let tmp_path = self.file_path.with_extension("json.tmp");
        fs::write(&tmp_path, data)?;
        fs::rename(&tmp_path, &self.file_path)?;
        Ok(())
    }

    /// Whether a path has already been processed.
    pub fn is_processed(&self, path: &Path) -> bool {
        self.entries.read().unwrap().contains_key(path)
    }

    /// Record that a path has been handed to the given job.
    ///
    /// The content hash is computed best-effort; an unreadable file is still
    /// recorded so it is not re-enqueued.
    pub fn mark_processed(&self, path: &Path, job_id: &str, job_type: &str) {
        let hash = hash_file_prefix(path).unwrap_or_default();

        let record = ProcessedFile {
            path: path.to_path_buf(),
            hash,
            processed_at: Utc::now(),
            job_id: job_id.to_string(),
            job_type: job_type.to_string(),
            input_size: 0,
            output_size: 0,
            ai_cleaned: false,
            ai_subtitles: false,
            ai_upscale: false,
        };

        self.entries
            .write()
            .unwrap()
            .insert(path.to_path_buf(), record);

        if let Err(e) = self.save() {
            warn!("Failed to persist processed store: {}", e);
        }
    }

    /// Enrich the entry for a finished job with sizes and AI flags.
    pub fn complete(&self, job: &Job) {
        {
            let mut entries = self.entries.write().unwrap();
            if let Some(record) = entries.get_mut(&job.source_path) {
                record.input_size = job.input_size;
                record.output_size = job.output_size;
                record.ai_cleaned = job.ai_cleaned;
                record.ai_subtitles = job.ai_subtitles;
                record.ai_upscale = job.upscale;
            } else {
                return;
            }
        }

        if let Err(e) = self.save() {
            warn!("Failed to persist processed store: {}", e);
        }
    }

    /// Snapshot of all records.
    pub fn list(&self) -> Vec<ProcessedFile> {
        self.entries.read().unwrap().values().cloned().collect()
    }

    /// Number of records currently held.
    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    /// Whether the store holds no records.
    pub fn is_empty(&self) -> bool {
        self.entries.read().unwrap().is_empty()
    }
}

/// SHA-256 of the first [`HASH_PREFIX_BYTES`] of a file, hex-encoded.
fn hash_file_prefix(path: &Path) -> Result<String, std::io::Error> {
    let file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut reader = file.take(HASH_PREFIX_BYTES);
    let mut buf = [0u8; 64 * 1024];

    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}
