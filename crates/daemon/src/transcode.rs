//! FFmpeg driver: argument-vector construction, streamed progress, probing.
//!
//! The driver never interpolates user strings into a shell; every invocation
//! builds a full argv and executes the binary directly.

use log::{debug, info};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::progress::{ProgressFn, ProgressParser};
use crate::subprocess::{wait_or_cancel, WaitOutcome};

/// Lines of encoder output retained for error reporting.
const OUTPUT_TAIL_LINES: usize = 40;

/// Error type for transcoder operations
#[derive(Debug, Error)]
pub enum TranscodeError {
    /// The ffmpeg binary could not be started
    #[error("failed to start {bin}: {source}")]
    Spawn {
        bin: String,
        source: std::io::Error,
    },

    /// Encoder exited with a non-zero status
    #[error("ffmpeg failed with exit code {code}:\n{output}")]
    Failed { code: i32, output: String },

    /// Encoder was terminated by a signal
    #[error("ffmpeg was terminated by a signal")]
    Terminated,

    /// The invocation was cancelled
    #[error("transcode cancelled")]
    Cancelled,

    /// Probe output could not be interpreted
    #[error("ffprobe failed: {0}")]
    Probe(String),

    /// IO error while driving the subprocess
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Hardware acceleration vendor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpuVendor {
    Nvidia,
    Intel,
    Amd,
    Cpu,
}

impl GpuVendor {
    /// Parse a configured vendor string; anything unknown falls back to CPU.
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "nvidia" => GpuVendor::Nvidia,
            "intel" => GpuVendor::Intel,
            "amd" => GpuVendor::Amd,
            _ => GpuVendor::Cpu,
        }
    }
}

/// Encoding speed/quality tradeoff
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QualityPreset {
    Fast,
    Medium,
    Slow,
}

impl QualityPreset {
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "fast" => QualityPreset::Fast,
            "slow" => QualityPreset::Slow,
            _ => QualityPreset::Medium,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QualityPreset::Fast => "fast",
            QualityPreset::Medium => "medium",
            QualityPreset::Slow => "slow",
        }
    }

    /// NVENC preset names diverge from the generic ones.
    fn nvenc_name(&self) -> &'static str {
        match self {
            QualityPreset::Fast => "p4",
            QualityPreset::Medium => "p5",
            QualityPreset::Slow => "p7",
        }
    }
}

/// Audio handling for the output stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AudioCodec {
    /// Pass audio streams through unchanged
    #[default]
    Copy,
    /// AAC at 256 kbit/s
    Aac256k,
    /// AC-3 at 640 kbit/s
    Ac3640k,
}

impl AudioCodec {
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "aac" => AudioCodec::Aac256k,
            "ac3" => AudioCodec::Ac3640k,
            _ => AudioCodec::Copy,
        }
    }
}

/// Output container format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Container {
    #[default]
    Mkv,
    Mp4,
}

impl Container {
    pub fn extension(&self) -> &'static str {
        match self {
            Container::Mkv => "mkv",
            Container::Mp4 => "mp4",
        }
    }
}

/// Target resolution for upscaling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetResolution {
    R1080p,
    R4k,
}

impl TargetResolution {
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "4k" => TargetResolution::R4k,
            _ => TargetResolution::R1080p,
        }
    }

    fn dimensions(&self) -> (u32, u32) {
        match self {
            TargetResolution::R1080p => (1920, 1080),
            TargetResolution::R4k => (3840, 2160),
        }
    }
}

/// All parameters for one transcode invocation
#[derive(Debug, Clone)]
pub struct TranscodeOptions {
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub gpu_vendor: GpuVendor,
    pub preset: QualityPreset,
    /// Constant-quality integer (CRF/CQ/QP), domain [10, 51]
    pub quality_level: u32,
    pub audio_codec: AudioCodec,
    pub container: Container,
    /// Total input duration in seconds; zero disables percentage and ETA
    pub total_duration: f64,
    pub upscale: bool,
    pub target_resolution: TargetResolution,
}

/// Basic metadata about a media file, as reported by the probe binary
#[derive(Debug, Clone, Default)]
pub struct MediaInfo {
    pub path: PathBuf,
    pub filename: String,
    /// Duration in seconds; zero when the probe could not determine it
    pub duration: f64,
    /// Container size in bytes
    pub size: u64,
    /// The probe's full JSON document, for downstream analysis
    pub raw_json: String,
}

/// Build the full ffmpeg argument vector for the given options.
///
/// Order matters: banner suppression, hardware acceleration input directives,
/// input, optional scaling filter, video encoder, audio encoder, subtitle
/// copy, stream mapping, forced overwrite, output.
pub fn build_transcode_args(opts: &TranscodeOptions) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "-hide_banner".into(),
        "-loglevel".into(),
        "info".into(),
        "-stats".into(),
    ];

    args.extend(hwaccel_input_args(opts.gpu_vendor));

    args.push("-i".into());
    args.push(opts.input_path.to_string_lossy().into_owned());

    args.extend(video_encoder_args(opts));
    args.extend(audio_encoder_args(opts.audio_codec));

    args.push("-c:s".into());
    args.push("copy".into());

    args.push("-map".into());
    args.push("0".into());

    args.push("-y".into());
    args.push(opts.output_path.to_string_lossy().into_owned());

    args
}

/// Hardware acceleration input directives by vendor.
fn hwaccel_input_args(vendor: GpuVendor) -> Vec<String> {
    match vendor {
        GpuVendor::Nvidia => vec![
            "-hwaccel".into(),
            "cuda".into(),
            "-hwaccel_output_format".into(),
            "cuda".into(),
        ],
        // VAAPI is the reliable path for both Intel and AMD in containers
        GpuVendor::Intel | GpuVendor::Amd => vec![
            "-hwaccel".into(),
            "vaapi".into(),
            "-hwaccel_device".into(),
            "/dev/dri/renderD128".into(),
            "-hwaccel_output_format".into(),
            "vaapi".into(),
        ],
        GpuVendor::Cpu => Vec::new(),
    }
}

/// Scaling filter for upscale requests, or `None` when not upscaling.
fn upscale_filter(opts: &TranscodeOptions) -> Option<String> {
    if !opts.upscale {
        return None;
    }

    let (w, h) = opts.target_resolution.dimensions();

    if opts.gpu_vendor == GpuVendor::Nvidia {
        Some(format!("scale_cuda={}:{}", w, h))
    } else {
        Some(format!("scale={}:{}:flags=lanczos", w, h))
    }
}

/// Video encoder arguments by vendor.
fn video_encoder_args(opts: &TranscodeOptions) -> Vec<String> {
    let mut args = Vec::new();

    if let Some(filter) = upscale_filter(opts) {
        args.push("-vf".into());
        args.push(filter);
    }

    match opts.gpu_vendor {
        GpuVendor::Nvidia => {
            args.extend([
                "-c:v".into(),
                "hevc_nvenc".into(),
                "-preset".into(),
                opts.preset.nvenc_name().into(),
                "-rc".into(),
                "vbr".into(),
                "-cq".into(),
                opts.quality_level.to_string(),
                "-b:v".into(),
                "0".into(),
                "-profile:v".into(),
                "main10".into(),
                "-tier".into(),
                "high".into(),
            ]);
        }
        GpuVendor::Intel | GpuVendor::Amd => {
            args.extend([
                "-c:v".into(),
                "hevc_vaapi".into(),
                "-qp".into(),
                opts.quality_level.to_string(),
                "-vf".into(),
                "hwupload".into(),
            ]);
        }
        GpuVendor::Cpu => {
            args.extend([
                "-c:v".into(),
                "libx265".into(),
                "-preset".into(),
                opts.preset.as_str().into(),
                "-crf".into(),
                opts.quality_level.to_string(),
                "-pix_fmt".into(),
                "yuv420p10le".into(),
                "-x265-params".into(),
                "profile=main10".into(),
            ]);
        }
    }

    args
}

/// Audio encoder arguments from the selected codec.
fn audio_encoder_args(codec: AudioCodec) -> Vec<String> {
    match codec {
        AudioCodec::Copy => vec!["-c:a".into(), "copy".into()],
        AudioCodec::Aac256k => vec!["-c:a".into(), "aac".into(), "-b:a".into(), "256k".into()],
        AudioCodec::Ac3640k => vec!["-c:a".into(), "ac3".into(), "-b:a".into(), "640k".into()],
    }
}

/// Typed wrapper around the ffmpeg and ffprobe binaries.
pub struct Transcoder {
    ffmpeg_bin: PathBuf,
    ffprobe_bin: PathBuf,
}

impl Transcoder {
    /// Create a transcoder resolving binaries from `PATH`.
    pub fn new() -> Self {
        Self::with_binaries("ffmpeg", "ffprobe")
    }

    /// Create a transcoder with explicit binary paths.
    pub fn with_binaries<P: Into<PathBuf>, Q: Into<PathBuf>>(ffmpeg: P, ffprobe: Q) -> Self {
        Self {
            ffmpeg_bin: ffmpeg.into(),
            ffprobe_bin: ffprobe.into(),
        }
    }

    /// Verify the ffmpeg binary is runnable.
    pub async fn detect(&self) -> Result<(), TranscodeError> {
        let output = Command::new(&self.ffmpeg_bin)
            .arg("-version")
            .output()
            .await
            .map_err(|e| TranscodeError::Spawn {
                bin: self.ffmpeg_bin.display().to_string(),
                source: e,
            })?;

        if !output.status.success() {
            return Err(TranscodeError::Probe(
                "ffmpeg -version exited non-zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Run a transcode, streaming parsed progress frames to the callback.
    ///
    /// The callback runs on the stderr reader task and must not block. On
    /// cancellation the child is signalled to terminate and reaped before
    /// the cancelled error is returned; the child is reaped on every exit
    /// path.
    ///
    /// # Arguments
    /// * `opts` - Full transcode parameters, including the total duration
    ///   used for percentage and ETA derivation
    /// * `cancel` - Cancellation scope of the owning job
    /// * `on_progress` - Invoked with each parsed progress frame
    pub async fn transcode_with_progress(
        &self,
        opts: &TranscodeOptions,
        cancel: &CancellationToken,
        on_progress: ProgressFn,
    ) -> Result<(), TranscodeError> {
        let mut args = vec!["-progress".to_string(), "pipe:2".to_string()];
        args.extend(build_transcode_args(opts));

        debug!(
            "Running {} {}",
            self.ffmpeg_bin.display(),
            args.join(" ")
        );

        let mut child = Command::new(&self.ffmpeg_bin)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| TranscodeError::Spawn {
                bin: self.ffmpeg_bin.display().to_string(),
                source: e,
            })?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| TranscodeError::Probe("failed to capture stderr".to_string()))?;

        let total_duration = opts.total_duration;
        let reader = tokio::spawn(async move {
            let mut parser = ProgressParser::new(total_duration);
            let mut tail: VecDeque<String> = VecDeque::with_capacity(OUTPUT_TAIL_LINES);
            let mut lines = BufReader::new(stderr).lines();

            while let Ok(Some(line)) = lines.next_line().await {
                if let Some(frame) = parser.push_line(&line) {
                    on_progress(frame);
                }
                if tail.len() == OUTPUT_TAIL_LINES {
                    tail.pop_front();
                }
                tail.push_back(line);
            }

            tail.into_iter().collect::<Vec<_>>().join("\n")
        });

        let status = match wait_or_cancel(&mut child, cancel).await? {
            WaitOutcome::Exited(status) => status,
            WaitOutcome::Cancelled => {
                let _ = reader.await;
                return Err(TranscodeError::Cancelled);
            }
        };

        // The parser has hit EOF by the time the child exits
        let output_tail = reader.await.unwrap_or_default();

        match status.code() {
            Some(0) => Ok(()),
            Some(code) => Err(TranscodeError::Failed {
                code,
                output: output_tail,
            }),
            None => Err(TranscodeError::Terminated),
        }
    }

    /// Extract the audio track to a compact mono MP3, for transcription.
    pub async fn extract_audio(
        &self,
        input: &Path,
        output: &Path,
        cancel: &CancellationToken,
    ) -> Result<(), TranscodeError> {
        let args: Vec<String> = vec![
            "-i".into(),
            input.to_string_lossy().into_owned(),
            "-vn".into(),
            "-acodec".into(),
            "libmp3lame".into(),
            "-ar".into(),
            "16000".into(),
            "-ac".into(),
            "1".into(),
            "-b:a".into(),
            "64k".into(),
            "-y".into(),
            output.to_string_lossy().into_owned(),
        ];

        let mut child = Command::new(&self.ffmpeg_bin)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| TranscodeError::Spawn {
                bin: self.ffmpeg_bin.display().to_string(),
                source: e,
            })?;

        let status = match wait_or_cancel(&mut child, cancel).await? {
            WaitOutcome::Exited(status) => status,
            WaitOutcome::Cancelled => return Err(TranscodeError::Cancelled),
        };

        match status.code() {
            Some(0) => Ok(()),
            Some(code) => Err(TranscodeError::Failed {
                code,
                output: "audio extraction failed".to_string(),
            }),
            None => Err(TranscodeError::Terminated),
        }
    }

    /// Probe a media file for duration, size, and the raw metadata document.
    pub async fn media_info(&self, path: &Path) -> Result<MediaInfo, TranscodeError> {
        let output = Command::new(&self.ffprobe_bin)
            .args([
                "-v",
                "quiet",
                "-print_format",
                "json",
                "-show_format",
                "-show_streams",
            ])
            .arg(path)
            .output()
            .await
            .map_err(|e| TranscodeError::Spawn {
                bin: self.ffprobe_bin.display().to_string(),
                source: e,
            })?;

        if !output.status.success() {
            return Err(TranscodeError::Probe(format!(
                "ffprobe exited with {} for {}",
                output.status,
                path.display()
            )));
        }

        let raw = String::from_utf8_lossy(&output.stdout).into_owned();
        info!("Probed {}", path.display());
        Ok(parse_media_info(path, raw))
    }
}

impl Default for Transcoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Interpret a probe JSON document.
///
/// Missing or malformed duration/size fields degrade to zero rather than
/// failing; the raw document is preserved either way.
fn parse_media_info(path: &Path, raw_json: String) -> MediaInfo {
    #[derive(serde::Deserialize)]
    struct ProbeFormat {
        #[serde(default)]
        duration: String,
        #[serde(default)]
        size: String,
    }

    #[derive(serde::Deserialize)]
    struct ProbeDoc {
        #[serde(default = "empty_format")]
        format: ProbeFormat,
    }

    fn empty_format() -> ProbeFormat {
        ProbeFormat {
            duration: String::new(),
            size: String::new(),
        }
    }

    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let (duration, size) = match serde_json::from_str::<ProbeDoc>(&raw_json) {
        Ok(doc) => (
            doc.format.duration.parse().unwrap_or(0.0),
            doc.format.size.parse().unwrap_or(0),
        ),
        Err(_) => (0.0, 0),
    };

    MediaInfo {
        path: path.to_path_buf(),
        filename,
        duration,
        size,
        raw_json,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn base_opts(vendor: GpuVendor) -> TranscodeOptions {
        TranscodeOptions {
            input_path: PathBuf::from("/storage/in.mkv"),
            output_path: PathBuf::from("/output/out.mkv"),
            gpu_vendor: vendor,
            preset: QualityPreset::Medium,
            quality_level: 23,
            audio_codec: AudioCodec::Copy,
            container: Container::Mkv,
            total_duration: 3600.0,
            upscale: false,
            target_resolution: TargetResolution::R1080p,
        }
    }

    fn has_pair(args: &[String], flag: &str, value: &str) -> bool {
        args.windows(2).any(|w| w[0] == flag && w[1] == value)
    }

    #[test]
    fn test_nvidia_args() {
        let args = build_transcode_args(&base_opts(GpuVendor::Nvidia));

        assert!(has_pair(&args, "-hwaccel", "cuda"));
        assert!(has_pair(&args, "-hwaccel_output_format", "cuda"));
        assert!(has_pair(&args, "-c:v", "hevc_nvenc"));
        assert!(has_pair(&args, "-preset", "p5"));
        assert!(has_pair(&args, "-rc", "vbr"));
        assert!(has_pair(&args, "-cq", "23"));
        assert!(has_pair(&args, "-b:v", "0"));
        assert!(has_pair(&args, "-profile:v", "main10"));
        assert!(has_pair(&args, "-tier", "high"));
    }

    #[test]
    fn test_vaapi_args_for_intel_and_amd() {
        for vendor in [GpuVendor::Intel, GpuVendor::Amd] {
            let args = build_transcode_args(&base_opts(vendor));

            assert!(has_pair(&args, "-hwaccel", "vaapi"));
            assert!(has_pair(&args, "-hwaccel_device", "/dev/dri/renderD128"));
            assert!(has_pair(&args, "-c:v", "hevc_vaapi"));
            assert!(has_pair(&args, "-qp", "23"));
            assert!(has_pair(&args, "-vf", "hwupload"));
        }
    }

    #[test]
    fn test_cpu_args() {
        let args = build_transcode_args(&base_opts(GpuVendor::Cpu));

        assert!(!args.iter().any(|a| a == "-hwaccel"));
        assert!(has_pair(&args, "-c:v", "libx265"));
        assert!(has_pair(&args, "-preset", "medium"));
        assert!(has_pair(&args, "-crf", "23"));
        assert!(has_pair(&args, "-pix_fmt", "yuv420p10le"));
        assert!(has_pair(&args, "-x265-params", "profile=main10"));
    }

    #[test]
    fn test_audio_codec_mapping() {
        let mut opts = base_opts(GpuVendor::Cpu);

        opts.audio_codec = AudioCodec::Copy;
        assert!(has_pair(&build_transcode_args(&opts), "-c:a", "copy"));

        opts.audio_codec = AudioCodec::Aac256k;
        let args = build_transcode_args(&opts);
        assert!(has_pair(&args, "-c:a", "aac"));
        assert!(has_pair(&args, "-b:a", "256k"));

        opts.audio_codec = AudioCodec::Ac3640k;
        let args = build_transcode_args(&opts);
        assert!(has_pair(&args, "-c:a", "ac3"));
        assert!(has_pair(&args, "-b:a", "640k"));
    }

    #[test]
    fn test_upscale_filter_selection() {
        let mut opts = base_opts(GpuVendor::Cpu);
        opts.upscale = true;

        let args = build_transcode_args(&opts);
        assert!(has_pair(&args, "-vf", "scale=1920:1080:flags=lanczos"));

        opts.target_resolution = TargetResolution::R4k;
        let args = build_transcode_args(&opts);
        assert!(has_pair(&args, "-vf", "scale=3840:2160:flags=lanczos"));

        opts.gpu_vendor = GpuVendor::Nvidia;
        let args = build_transcode_args(&opts);
        assert!(has_pair(&args, "-vf", "scale_cuda=3840:2160"));
    }

    #[test]
    fn test_stream_handling_and_overwrite() {
        let args = build_transcode_args(&base_opts(GpuVendor::Cpu));

        assert!(has_pair(&args, "-c:s", "copy"));
        assert!(has_pair(&args, "-map", "0"));

        // -y immediately precedes the output path, which comes last
        let y_pos = args.iter().position(|a| a == "-y").unwrap();
        assert_eq!(y_pos, args.len() - 2);
        assert_eq!(args.last().unwrap(), "/output/out.mkv");
    }

    #[test]
    fn test_preset_mapping() {
        assert_eq!(QualityPreset::Fast.nvenc_name(), "p4");
        assert_eq!(QualityPreset::Medium.nvenc_name(), "p5");
        assert_eq!(QualityPreset::Slow.nvenc_name(), "p7");
        assert_eq!(QualityPreset::parse("FAST"), QualityPreset::Fast);
        assert_eq!(QualityPreset::parse("weird"), QualityPreset::Medium);
    }

    #[test]
    fn test_vendor_parse() {
        assert_eq!(GpuVendor::parse("nvidia"), GpuVendor::Nvidia);
        assert_eq!(GpuVendor::parse("Intel"), GpuVendor::Intel);
        assert_eq!(GpuVendor::parse("AMD"), GpuVendor::Amd);
        assert_eq!(GpuVendor::parse("cpu"), GpuVendor::Cpu);
        assert_eq!(GpuVendor::parse("auto"), GpuVendor::Cpu);
    }

    #[test]
    fn test_parse_media_info() {
        let raw = r#"{"format":{"duration":"5400.04","size":"734003200"}}"#;
        let info = parse_media_info(Path::new("/storage/movie.mkv"), raw.to_string());

        assert_eq!(info.filename, "movie.mkv");
        assert!((info.duration - 5400.04).abs() < 0.001);
        assert_eq!(info.size, 734003200);
        assert_eq!(info.raw_json, raw);
    }

    #[test]
    fn test_parse_media_info_degrades_on_bad_json() {
        let info = parse_media_info(Path::new("/storage/movie.mkv"), "not json".to_string());
        assert_eq!(info.duration, 0.0);
        assert_eq!(info.size, 0);
        assert_eq!(info.raw_json, "not json");
    }

    proptest! {
        #[test]
        fn prop_quality_token_appears_verbatim(
            level in 10u32..=51,
            vendor_idx in 0usize..4,
        ) {
            let vendor = [GpuVendor::Nvidia, GpuVendor::Intel, GpuVendor::Amd, GpuVendor::Cpu][vendor_idx];
            let mut opts = base_opts(vendor);
            opts.quality_level = level;

            let args = build_transcode_args(&opts);
            let flag = match vendor {
                GpuVendor::Nvidia => "-cq",
                GpuVendor::Intel | GpuVendor::Amd => "-qp",
                GpuVendor::Cpu => "-crf",
            };
            prop_assert!(has_pair(&args, flag, &level.to_string()));
        }

        #[test]
        fn prop_argv_starts_with_banner_suppression(vendor_idx in 0usize..4) {
            let vendor = [GpuVendor::Nvidia, GpuVendor::Intel, GpuVendor::Amd, GpuVendor::Cpu][vendor_idx];
            let args = build_transcode_args(&base_opts(vendor));
            prop_assert_eq!(&args[0], "-hide_banner");
            prop_assert!(has_pair(&args, "-loglevel", "info"));
            prop_assert!(args.contains(&"-stats".to_string()));
        }
    }
}
