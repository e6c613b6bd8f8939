//! Core configuration structures and loading logic

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Error type for configuration operations
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Failed to read config file: {}", e),
            ConfigError::Parse(e) => write!(f, "Failed to parse config: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

/// Filesystem roots the service is allowed to touch
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PathsConfig {
    /// Root directory for source media (library)
    #[serde(default = "default_source_dir")]
    pub source_dir: PathBuf,
    /// Root directory for transcoded output
    #[serde(default = "default_dest_dir")]
    pub dest_dir: PathBuf,
    /// Directory for service state (job store, processed store)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

fn default_source_dir() -> PathBuf {
    PathBuf::from("/storage")
}

fn default_dest_dir() -> PathBuf {
    PathBuf::from("/output")
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("/data")
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            source_dir: default_source_dir(),
            dest_dir: default_dest_dir(),
            data_dir: default_data_dir(),
        }
    }
}

/// Encoder defaults applied to optimize jobs
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EncodingConfig {
    /// Hardware acceleration vendor: "nvidia", "intel", "amd", or "cpu"
    #[serde(default = "default_gpu_vendor")]
    pub gpu_vendor: String,
    /// Speed/quality tradeoff: "fast", "medium", or "slow"
    #[serde(default = "default_quality_preset")]
    pub quality_preset: String,
    /// Constant-quality level handed to the encoder (CRF/CQ/QP)
    #[serde(default = "default_quality_level")]
    pub quality_level: u32,
}

fn default_gpu_vendor() -> String {
    "cpu".to_string()
}

fn default_quality_preset() -> String {
    "medium".to_string()
}

fn default_quality_level() -> u32 {
    23
}

impl Default for EncodingConfig {
    fn default() -> Self {
        Self {
            gpu_vendor: default_gpu_vendor(),
            quality_preset: default_quality_preset(),
            quality_level: default_quality_level(),
        }
    }
}

/// Job manager configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobsConfig {
    /// Number of concurrent worker tasks
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
}

fn default_max_concurrent() -> usize {
    2
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
        }
    }
}

/// AI provider settings (optional capability)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct AiConfig {
    /// Provider name: "none" disables AI assistance
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub model: String,
}

/// File scanner configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScannerSection {
    #[serde(default)]
    pub enabled: bool,
    /// Scan mode: "manual", "startup", "periodic", "watch", or "hybrid"
    #[serde(default = "default_scanner_mode")]
    pub mode: String,
    /// Interval between periodic scans in seconds
    #[serde(default = "default_scan_interval_secs")]
    pub interval_secs: u64,
    /// Automatically create jobs for discovered files
    #[serde(default = "default_auto_create_jobs")]
    pub auto_create_jobs: bool,
    /// Request subtitle generation on scanner-created jobs
    #[serde(default)]
    pub auto_create_subtitles: bool,
    /// Path to the processed-file store (defaults under data_dir)
    #[serde(default)]
    pub processed_file: Option<PathBuf>,
}

fn default_scanner_mode() -> String {
    "manual".to_string()
}

fn default_scan_interval_secs() -> u64 {
    300
}

fn default_auto_create_jobs() -> bool {
    true
}

impl Default for ScannerSection {
    fn default() -> Self {
        Self {
            enabled: false,
            mode: default_scanner_mode(),
            interval_secs: default_scan_interval_secs(),
            auto_create_jobs: default_auto_create_jobs(),
            auto_create_subtitles: false,
            processed_file: None,
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub encoding: EncodingConfig,
    #[serde(default)]
    pub jobs: JobsConfig,
    #[serde(default)]
    pub ai: AiConfig,
    #[serde(default)]
    pub scanner: ScannerSection,
    /// Premium capability flag, set by the license validator
    #[serde(default)]
    pub premium: bool,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Overrides the following values if environment variables are set:
    /// - SOURCE_DIR, DEST_DIR, DATA_DIR -> paths
    /// - GPU_VENDOR, QUALITY_PRESET, QUALITY_LEVEL -> encoding
    /// - MAX_CONCURRENT_JOBS -> jobs.max_concurrent
    /// - AI_PROVIDER, AI_API_KEY, AI_ENDPOINT, AI_MODEL -> ai
    /// - SCANNER_ENABLED, SCANNER_MODE, SCANNER_INTERVAL_SECS,
    ///   SCANNER_AUTO_CREATE, SCANNER_PROCESSED_FILE -> scanner
    /// - PREMIUM -> premium
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("SOURCE_DIR") {
            if !val.is_empty() {
                self.paths.source_dir = PathBuf::from(val);
            }
        }

        if let Ok(val) = env::var("DEST_DIR") {
            if !val.is_empty() {
                self.paths.dest_dir = PathBuf::from(val);
            }
        }

        if let Ok(val) = env::var("DATA_DIR") {
            if !val.is_empty() {
                self.paths.data_dir = PathBuf::from(val);
            }
        }

        if let Ok(val) = env::var("GPU_VENDOR") {
            if !val.is_empty() {
                self.encoding.gpu_vendor = val;
            }
        }

        if let Ok(val) = env::var("QUALITY_PRESET") {
            if !val.is_empty() {
                self.encoding.quality_preset = val;
            }
        }

        if let Ok(val) = env::var("QUALITY_LEVEL") {
            if let Ok(level) = val.parse::<u32>() {
                self.encoding.quality_level = level;
            }
        }

        if let Ok(val) = env::var("MAX_CONCURRENT_JOBS") {
            if let Ok(n) = val.parse::<usize>() {
                if n > 0 {
                    self.jobs.max_concurrent = n;
                }
            }
        }

        if let Ok(val) = env::var("AI_PROVIDER") {
            if !val.is_empty() {
                self.ai.provider = val;
            }
        }

        if let Ok(val) = env::var("AI_API_KEY") {
            if !val.is_empty() {
                self.ai.api_key = val;
            }
        }

        if let Ok(val) = env::var("AI_ENDPOINT") {
            if !val.is_empty() {
                self.ai.endpoint = val;
            }
        }

        if let Ok(val) = env::var("AI_MODEL") {
            if !val.is_empty() {
                self.ai.model = val;
            }
        }

        if let Ok(val) = env::var("SCANNER_ENABLED") {
            match val.to_lowercase().as_str() {
                "true" | "1" | "yes" => self.scanner.enabled = true,
                "false" | "0" | "no" => self.scanner.enabled = false,
                _ => {}
            }
        }

        if let Ok(val) = env::var("SCANNER_MODE") {
            if !val.is_empty() {
                self.scanner.mode = val;
            }
        }

        if let Ok(val) = env::var("SCANNER_INTERVAL_SECS") {
            if let Ok(secs) = val.parse::<u64>() {
                if secs > 0 {
                    self.scanner.interval_secs = secs;
                }
            }
        }

        if let Ok(val) = env::var("SCANNER_AUTO_CREATE") {
            match val.to_lowercase().as_str() {
                "true" | "1" | "yes" => self.scanner.auto_create_jobs = true,
                "false" | "0" | "no" => self.scanner.auto_create_jobs = false,
                _ => {}
            }
        }

        if let Ok(val) = env::var("SCANNER_PROCESSED_FILE") {
            if !val.is_empty() {
                self.scanner.processed_file = Some(PathBuf::from(val));
            }
        }

        if let Ok(val) = env::var("PREMIUM") {
            match val.to_lowercase().as_str() {
                "true" | "1" | "yes" => self.premium = true,
                "false" | "0" | "no" => self.premium = false,
                _ => {}
            }
        }
    }

    /// Load configuration from file and apply environment overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load configuration, falling back to defaults when the file is absent
    ///
    /// Environment overrides still apply, so a file-less deployment can be
    /// driven entirely from the environment.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = match fs::read_to_string(path) {
            Ok(content) => Self::parse_toml(&content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Config::default(),
            Err(e) => return Err(ConfigError::Io(e)),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Path of the durable job store
    pub fn jobs_file(&self) -> PathBuf {
        self.paths.data_dir.join("jobs.json")
    }

    /// Path of the processed-file store
    pub fn processed_file(&self) -> PathBuf {
        self.scanner
            .processed_file
            .clone()
            .unwrap_or_else(|| self.paths.data_dir.join("processed.json"))
    }
}
