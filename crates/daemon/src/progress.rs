//! Parsing of encoder progress output.
//!
//! The transcoder reports progress as `key=value` fields on stderr. A single
//! parser accumulates fields across lines and derives percentage and ETA so
//! callers only deal with complete [`TranscodeProgress`] frames.

use regex::Regex;
use std::sync::Arc;

/// Callback invoked with each parsed progress frame.
///
/// Runs on the driver's reader task, so it must not block.
pub type ProgressFn = Arc<dyn Fn(TranscodeProgress) + Send + Sync>;

/// Real-time transcoding metrics extracted from encoder output
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TranscodeProgress {
    /// Current frame number
    pub frame: u64,
    /// Frames per second
    pub fps: f64,
    /// Current bitrate as reported (e.g. "2034.5kbits/s")
    pub bitrate: String,
    /// Output size as reported (e.g. "48128kB")
    pub size: String,
    /// Current timestamp (H:MM:SS.ms)
    pub time: String,
    /// Processing speed as reported (e.g. "2.5x")
    pub speed: String,
    /// Numerical speed multiplier
    pub speed_multiplier: f64,
    /// Completion percentage (0-100)
    pub percentage: u8,
    /// Estimated time remaining (HH:MM:SS)
    pub eta: String,
}

/// Line-by-line parser for encoder progress output.
///
/// Fields missing from a given line carry over from the previous one, so the
/// current frame accumulates monotonically. A frame is only reported once the
/// `frame=` field has appeared, which suppresses the noise lines the encoder
/// prints before encoding starts.
pub struct ProgressParser {
    total_duration: f64,
    current: TranscodeProgress,
    frame_re: Regex,
    fps_re: Regex,
    bitrate_re: Regex,
    size_re: Regex,
    time_re: Regex,
    speed_re: Regex,
}

impl ProgressParser {
    /// Create a parser for a stream with the given total duration in seconds.
    ///
    /// A zero duration disables percentage and ETA derivation.
    pub fn new(total_duration: f64) -> Self {
        let current = TranscodeProgress {
            eta: "00:00:00".to_string(),
            ..TranscodeProgress::default()
        };
        Self {
            total_duration,
            current,
            frame_re: Regex::new(r"frame=\s*(\d+)").unwrap(),
            fps_re: Regex::new(r"fps=\s*([\d.]+)").unwrap(),
            bitrate_re: Regex::new(r"bitrate=\s*([\d.]+\w+/s)").unwrap(),
            size_re: Regex::new(r"size=\s*(\d+\w+)").unwrap(),
            time_re: Regex::new(r"time=\s*([\d:.]+)").unwrap(),
            speed_re: Regex::new(r"speed=\s*([\d.]+x)").unwrap(),
        }
    }

    /// Feed one line of encoder output.
    ///
    /// Returns an updated progress frame when the line (or an earlier one)
    /// carried a frame count, `None` otherwise.
    pub fn push_line(&mut self, line: &str) -> Option<TranscodeProgress> {
        if let Some(caps) = self.frame_re.captures(line) {
            self.current.frame = caps[1].parse().unwrap_or(self.current.frame);
        }
        if let Some(caps) = self.fps_re.captures(line) {
            self.current.fps = caps[1].parse().unwrap_or(self.current.fps);
        }
        if let Some(caps) = self.bitrate_re.captures(line) {
            self.current.bitrate = caps[1].to_string();
        }
        if let Some(caps) = self.size_re.captures(line) {
            self.current.size = caps[1].to_string();
        }
        if let Some(caps) = self.time_re.captures(line) {
            self.current.time = caps[1].to_string();
        }
        if let Some(caps) = self.speed_re.captures(line) {
            self.current.speed = caps[1].to_string();
            let trimmed = caps[1].trim_end_matches('x');
            self.current.speed_multiplier = trimmed.parse().unwrap_or(0.0);
        }

        if self.total_duration > 0.0 && !self.current.time.is_empty() {
            self.current.percentage =
                calculate_percentage(&self.current.time, self.total_duration);
            self.current.eta =
                estimate_eta(&self.current.time, self.total_duration, &self.current.speed);
        }

        if self.current.frame > 0 {
            Some(self.current.clone())
        } else {
            None
        }
    }
}

/// Completion percentage for a timestamp within a known total duration.
pub fn calculate_percentage(current_time: &str, total_duration: f64) -> u8 {
    if total_duration <= 0.0 {
        return 0;
    }
    let current = parse_time_to_seconds(current_time);
    let percentage = (current / total_duration * 100.0).round();
    percentage.clamp(0.0, 100.0) as u8
}

/// Estimated wall-clock time remaining, formatted `HH:MM:SS`.
///
/// Unknown or zero speed is treated as 1x. Returns `00:00:00` once no time
/// remains.
pub fn estimate_eta(current_time: &str, total_duration: f64, speed: &str) -> String {
    let current = parse_time_to_seconds(current_time);
    let remaining = total_duration - current;

    if remaining <= 0.0 {
        return "00:00:00".to_string();
    }

    let mut multiplier = speed
        .trim_end_matches('x')
        .parse::<f64>()
        .unwrap_or(1.0);
    if multiplier == 0.0 {
        multiplier = 1.0;
    }

    format_hms(remaining / multiplier)
}

/// Convert an encoder time field (`H:MM:SS.ms`) to seconds.
fn parse_time_to_seconds(time_str: &str) -> f64 {
    let parts: Vec<&str> = time_str.split(':').collect();
    if parts.len() != 3 {
        return 0.0;
    }

    let hours: f64 = parts[0].parse().unwrap_or(0.0);
    let minutes: f64 = parts[1].parse().unwrap_or(0.0);
    let seconds: f64 = parts[2].parse().unwrap_or(0.0);

    hours * 3600.0 + minutes * 60.0 + seconds
}

/// Format a duration in seconds as `HH:MM:SS`.
pub fn format_hms(total_seconds: f64) -> String {
    let total = total_seconds.max(0.0) as u64;
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;
    format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
}
