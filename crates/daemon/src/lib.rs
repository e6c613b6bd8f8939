//! mediaforge daemon
//!
//! Core of the self-hosted media transcoding service: the persistent job
//! manager, the multi-mode file scanner, and the typed drivers for the
//! external transcoder and disc extractor.

pub mod ai;
pub mod extract;
pub mod facade;
pub mod jobs;
pub mod manager;
pub mod paths;
pub mod processed;
pub mod progress;
pub mod scanner;
mod subprocess;
pub mod subtitles;
pub mod transcode;

pub use mediaforge_config as config;
pub use mediaforge_config::Config;

pub use ai::{AiError, AiProvider, MediaItem, SharedAiProvider};
pub use extract::{DiscInfo, ExtractError, ExtractOptions, Extractor, Title};
pub use facade::{Facade, FacadeError, JobSpec};
pub use jobs::{new_job_id, Job, JobKind, JobStatus, JobStore, JobStoreError};
pub use manager::{JobError, JobManager};
pub use paths::{confine, PathError};
pub use processed::{ProcessedFile, ProcessedStore, StoreError};
pub use progress::{ProgressFn, ProgressParser, TranscodeProgress};
pub use scanner::{ScanError, ScanMode, ScanSummary, Scanner, ScannerConfig, WatchDirectory};
pub use subtitles::{generate_srt, SubtitleError};
pub use transcode::{
    build_transcode_args, AudioCodec, Container, GpuVendor, MediaInfo, QualityPreset,
    TargetResolution, TranscodeError, TranscodeOptions, Transcoder,
};
