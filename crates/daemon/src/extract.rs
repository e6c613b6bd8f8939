//! MakeMKV driver: disc scanning, title selection, robot-mode extraction.
//!
//! The extractor's machine-readable output is a keyed-prefix grammar:
//! `CINFO:` carries disc-level attributes, `TINFO:<title>,<attr>,...`
//! carries per-title attributes, and `PRGV:` carries progress during
//! extraction. Unknown lines are tolerated.

use log::debug;
use regex::Regex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::progress::{ProgressFn, TranscodeProgress};
use crate::subprocess::{wait_or_cancel, WaitOutcome};

/// Error type for extractor operations
#[derive(Debug, Error)]
pub enum ExtractError {
    /// The extractor binary could not be started
    #[error("failed to start {bin}: {source}")]
    Spawn {
        bin: String,
        source: std::io::Error,
    },

    /// Extractor exited with a non-zero status
    #[error("makemkvcon failed with exit code {code}:\n{output}")]
    Failed { code: i32, output: String },

    /// Extractor was terminated by a signal
    #[error("makemkvcon was terminated by a signal")]
    Terminated,

    /// The invocation was cancelled
    #[error("extraction cancelled")]
    Cancelled,

    /// IO error while driving the subprocess
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A single title on a disc
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Title {
    pub index: u32,
    /// Duration as reported, `H:MM:SS`
    pub duration: String,
    pub chapter_count: u32,
    pub description: String,
}

impl Title {
    /// Duration in whole seconds; zero when the field is absent or malformed.
    pub fn duration_seconds(&self) -> u64 {
        parse_duration_hms(&self.duration)
    }
}

/// Information about a scanned disc or disc image
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiscInfo {
    pub name: String,
    /// Titles ordered by index
    pub titles: Vec<Title>,
}

impl DiscInfo {
    /// Index of the main feature: the title with the greatest duration,
    /// ties broken by the smaller index. `None` when the disc has no titles.
    pub fn main_title(&self) -> Option<u32> {
        let mut best: Option<(&Title, u64)> = None;
        for title in &self.titles {
            let secs = title.duration_seconds();
            match best {
                Some((_, best_secs)) if secs <= best_secs => {}
                _ => best = Some((title, secs)),
            }
        }
        best.map(|(t, _)| t.index)
    }
}

/// Parameters for a disc extraction
#[derive(Debug, Clone)]
pub struct ExtractOptions {
    /// Disc device or disc-image file
    pub source: PathBuf,
    pub output_dir: PathBuf,
    /// Title to extract; `None` extracts all titles
    pub title_index: Option<u32>,
    /// Minimum title length filter in seconds
    pub min_length_secs: Option<u32>,
}

/// Typed wrapper around the makemkvcon binary.
pub struct Extractor {
    makemkvcon_bin: PathBuf,
}

impl Extractor {
    /// Create an extractor resolving the binary from `PATH`.
    pub fn new() -> Self {
        Self::with_binary("makemkvcon")
    }

    pub fn with_binary<P: Into<PathBuf>>(bin: P) -> Self {
        Self {
            makemkvcon_bin: bin.into(),
        }
    }

    /// Verify the extractor binary is runnable.
    pub async fn detect(&self) -> Result<(), ExtractError> {
        Command::new(&self.makemkvcon_bin)
            .arg("version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map_err(|e| ExtractError::Spawn {
                bin: self.makemkvcon_bin.display().to_string(),
                source: e,
            })?;
        Ok(())
    }

    /// Scan a disc or disc image and enumerate its titles.
    pub async fn scan(
        &self,
        source: &Path,
        cancel: &CancellationToken,
    ) -> Result<DiscInfo, ExtractError> {
        let source_arg = format!("file:{}", source.display());

        let mut child = Command::new(&self.makemkvcon_bin)
            .args(["info", source_arg.as_str()])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| ExtractError::Spawn {
                bin: self.makemkvcon_bin.display().to_string(),
                source: e,
            })?;

        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| {
                std::io::Error::new(std::io::ErrorKind::Other, "failed to capture stdout")
            })?;

        let reader = tokio::spawn(async move {
            let mut buf = String::new();
            let _ = stdout.read_to_string(&mut buf).await;
            buf
        });

        let status = match wait_or_cancel(&mut child, cancel).await? {
            WaitOutcome::Exited(status) => status,
            WaitOutcome::Cancelled => {
                let _ = reader.await;
                return Err(ExtractError::Cancelled);
            }
        };

        let output = reader.await.unwrap_or_default();

        match status.code() {
            Some(0) => Ok(parse_disc_info(&output)),
            Some(code) => Err(ExtractError::Failed { code, output }),
            None => Err(ExtractError::Terminated),
        }
    }

    /// Extract titles to MKV, forwarding progress to the callback.
    ///
    /// Runs the extractor in robot mode and converts `PRGV:current,total,max`
    /// records into percentage frames. Cancellation terminates the child and
    /// returns [`ExtractError::Cancelled`]; the child is always reaped.
    pub async fn extract_with_progress(
        &self,
        opts: &ExtractOptions,
        cancel: &CancellationToken,
        on_progress: ProgressFn,
    ) -> Result<(), ExtractError> {
        let source_arg = format!("file:{}", opts.source.display());
        let title_arg = match opts.title_index {
            Some(index) => index.to_string(),
            None => "all".to_string(),
        };

        let mut args: Vec<String> = vec![
            "-r".into(),
            "mkv".into(),
            source_arg,
            title_arg,
            opts.output_dir.to_string_lossy().into_owned(),
        ];
        if let Some(min_length) = opts.min_length_secs {
            args.push("--minlength".into());
            args.push(min_length.to_string());
        }

        debug!(
            "Running {} {}",
            self.makemkvcon_bin.display(),
            args.join(" ")
        );

        let mut child = Command::new(&self.makemkvcon_bin)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| ExtractError::Spawn {
                bin: self.makemkvcon_bin.display().to_string(),
                source: e,
            })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| {
                std::io::Error::new(std::io::ErrorKind::Other, "failed to capture stdout")
            })?;

        let reader = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            let mut tail = Vec::new();

            while let Ok(Some(line)) = lines.next_line().await {
                if let Some(percentage) = parse_prgv_line(&line) {
                    on_progress(TranscodeProgress {
                        percentage,
                        ..TranscodeProgress::default()
                    });
                } else {
                    tail.push(line);
                    if tail.len() > 40 {
                        tail.remove(0);
                    }
                }
            }

            tail.join("\n")
        });

        let status = match wait_or_cancel(&mut child, cancel).await? {
            WaitOutcome::Exited(status) => status,
            WaitOutcome::Cancelled => {
                let _ = reader.await;
                return Err(ExtractError::Cancelled);
            }
        };

        let output = reader.await.unwrap_or_default();

        match status.code() {
            Some(0) => Ok(()),
            Some(code) => Err(ExtractError::Failed { code, output }),
            None => Err(ExtractError::Terminated),
        }
    }

    /// Expected output filename for a title, as the extractor names them.
    pub fn output_filename(&self, disc_name: &str, title_index: u32) -> String {
        if disc_name.is_empty() {
            format!("title_t{:02}.mkv", title_index)
        } else {
            format!("{}_t{:02}.mkv", sanitize_filename(disc_name), title_index)
        }
    }
}

impl Default for Extractor {
    fn default() -> Self {
        Self::new()
    }
}

/// Extract the completion percentage from a `PRGV:current,total,max` record.
fn parse_prgv_line(line: &str) -> Option<u8> {
    let rest = line.strip_prefix("PRGV:")?;
    let mut fields = rest.split(',');
    let _current = fields.next()?;
    let total: f64 = fields.next()?.trim().parse().ok()?;
    let max: f64 = fields.next()?.trim().parse().ok()?;
    if max <= 0.0 {
        return None;
    }
    Some(((total / max) * 100.0).clamp(0.0, 100.0) as u8)
}

/// Parse the extractor's information-mode output into a [`DiscInfo`].
///
/// Best-effort by design: malformed lines are skipped, and a document with
/// no recognizable titles yields an empty list for the pipeline to reject.
pub fn parse_disc_info(output: &str) -> DiscInfo {
    let name_re = Regex::new(r#"CINFO:2,0,"([^"]*)""#).unwrap();
    let tinfo_re = Regex::new(r#"TINFO:(\d+),(\d+),\d+,"([^"]*)""#).unwrap();

    let mut info = DiscInfo::default();
    let mut titles: BTreeMap<u32, Title> = BTreeMap::new();

    for line in output.lines() {
        if let Some(caps) = name_re.captures(line) {
            info.name = caps[1].to_string();
            continue;
        }

        if let Some(caps) = tinfo_re.captures(line) {
            let index: u32 = match caps[1].parse() {
                Ok(i) => i,
                Err(_) => continue,
            };
            let attr: u32 = match caps[2].parse() {
                Ok(a) => a,
                Err(_) => continue,
            };
            let value = caps[3].to_string();

            let title = titles.entry(index).or_insert_with(|| Title {
                index,
                ..Title::default()
            });

            match attr {
                // Attribute 9 is the title duration, H:MM:SS
                9 => title.duration = value,
                // Attribute 8 is the chapter count
                8 => title.chapter_count = value.parse().unwrap_or(0),
                _ => title.description = value,
            }
        }
    }

    info.titles = titles.into_values().collect();
    info
}

/// Duration string `H:MM:SS` to seconds; malformed input yields zero.
fn parse_duration_hms(duration: &str) -> u64 {
    let parts: Vec<&str> = duration.split(':').collect();
    if parts.len() != 3 {
        return 0;
    }

    let hours: u64 = parts[0].parse().unwrap_or(0);
    let minutes: u64 = parts[1].parse().unwrap_or(0);
    let seconds: u64 = parts[2].parse().unwrap_or(0);

    hours * 3600 + minutes * 60 + seconds
}

/// Replace characters that are invalid in filenames.
fn sanitize_filename(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            other => other,
        })
        .collect();
    sanitized.trim().trim_matches('.').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCAN_OUTPUT: &str = r#"MSG:1005,0,1,"MakeMKV started","%1 started","MakeMKV"
CINFO:1,6209,"Blu-ray disc"
CINFO:2,0,"BIG_MOVIE"
TINFO:0,2,0,"Main Feature"
TINFO:0,8,0,"24"
TINFO:0,9,0,"2:14:05"
TINFO:1,2,0,"Extras"
TINFO:1,8,0,"4"
TINFO:1,9,0,"0:22:10"
TINFO:2,2,0,"Trailer"
TINFO:2,8,0,"1"
TINFO:2,9,0,"0:02:30"
garbage line that should be ignored
"#;

    #[test]
    fn test_parse_disc_info() {
        let info = parse_disc_info(SCAN_OUTPUT);

        assert_eq!(info.name, "BIG_MOVIE");
        assert_eq!(info.titles.len(), 3);

        let main = &info.titles[0];
        assert_eq!(main.index, 0);
        assert_eq!(main.duration, "2:14:05");
        assert_eq!(main.chapter_count, 24);
        assert_eq!(main.duration_seconds(), 2 * 3600 + 14 * 60 + 5);
    }

    #[test]
    fn test_parse_disc_info_empty_output() {
        let info = parse_disc_info("MSG:1005,0,1,\"nothing here\"\n");
        assert!(info.titles.is_empty());
        assert!(info.name.is_empty());
    }

    #[test]
    fn test_main_title_selects_longest() {
        let info = parse_disc_info(SCAN_OUTPUT);
        assert_eq!(info.main_title(), Some(0));
    }

    #[test]
    fn test_main_title_tie_breaks_to_smaller_index() {
        let output = r#"TINFO:3,9,0,"1:00:00"
TINFO:1,9,0,"1:00:00"
TINFO:2,9,0,"0:30:00"
"#;
        let info = parse_disc_info(output);
        assert_eq!(info.main_title(), Some(1));
    }

    #[test]
    fn test_main_title_empty_disc() {
        assert_eq!(DiscInfo::default().main_title(), None);
    }

    #[test]
    fn test_parse_duration_hms() {
        assert_eq!(parse_duration_hms("2:14:05"), 8045);
        assert_eq!(parse_duration_hms("0:00:30"), 30);
        assert_eq!(parse_duration_hms("bogus"), 0);
        assert_eq!(parse_duration_hms("10:00"), 0);
    }

    #[test]
    fn test_parse_prgv_line() {
        assert_eq!(parse_prgv_line("PRGV:100,32768,65536"), Some(50));
        assert_eq!(parse_prgv_line("PRGV:0,0,65536"), Some(0));
        assert_eq!(parse_prgv_line("PRGV:0,65536,65536"), Some(100));
        // Zero max would divide by zero
        assert_eq!(parse_prgv_line("PRGV:1,2,0"), None);
        assert_eq!(parse_prgv_line("PRGC:1,2,3"), None);
        assert_eq!(parse_prgv_line("PRGV:broken"), None);
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("BIG_MOVIE"), "BIG_MOVIE");
        assert_eq!(sanitize_filename("a/b\\c:d"), "a_b_c_d");
        assert_eq!(sanitize_filename(" .Name. "), "Name");
    }

    #[test]
    fn test_output_filename() {
        let ex = Extractor::new();
        assert_eq!(ex.output_filename("BIG_MOVIE", 0), "BIG_MOVIE_t00.mkv");
        assert_eq!(ex.output_filename("", 3), "title_t03.mkv");
        assert_eq!(ex.output_filename("A:B", 12), "A_B_t12.mkv");
    }

    #[test]
    fn test_duration_line_also_updates_nothing_else() {
        // A title known only by duration still materializes
        let info = parse_disc_info("TINFO:7,9,0,\"0:45:00\"\n");
        assert_eq!(info.titles.len(), 1);
        assert_eq!(info.titles[0].index, 7);
        assert_eq!(info.titles[0].duration_seconds(), 2700);
        assert_eq!(info.titles[0].chapter_count, 0);
    }
}
