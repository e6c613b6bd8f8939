//! AI subtitle generation: audio extraction, transcription, SRT sidecar.

use log::info;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::ai::{AiError, AiProvider};
use crate::transcode::{TranscodeError, Transcoder};

/// Error type for the subtitle pipeline
#[derive(Debug, Error)]
pub enum SubtitleError {
    #[error("audio extraction failed: {0}")]
    Audio(#[from] TranscodeError),

    #[error("transcription failed: {0}")]
    Transcribe(#[from] AiError),

    #[error("failed to write subtitle file: {0}")]
    Io(#[from] std::io::Error),
}

/// Generate an SRT sidecar for a video file.
///
/// Extracts the audio track to a compact temporary MP3, asks the provider to
/// transcribe it, and writes the result next to the video with an `.srt`
/// extension. The temporary audio file is removed on every path.
pub async fn generate_srt(
    transcoder: &Transcoder,
    provider: &dyn AiProvider,
    video_path: &Path,
    cancel: &CancellationToken,
) -> Result<PathBuf, SubtitleError> {
    let audio_path = std::env::temp_dir().join(format!(
        "mediaforge_audio_{}_{}.mp3",
        std::process::id(),
        video_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
    ));

    info!(
        "Extracting audio for transcription: {}",
        video_path.display()
    );
    let extract_result = transcoder
        .extract_audio(video_path, &audio_path, cancel)
        .await;

    let result = match extract_result {
        Ok(()) => {
            info!("Transcribing audio with {}", provider.name());
            match provider.transcribe(&audio_path).await {
                Ok(srt_content) => {
                    let srt_path = video_path.with_extension("srt");
                    std::fs::write(&srt_path, srt_content)
                        .map(|_| srt_path)
                        .map_err(SubtitleError::Io)
                }
                Err(e) => Err(SubtitleError::Transcribe(e)),
            }
        }
        Err(e) => Err(SubtitleError::Audio(e)),
    };

    let _ = std::fs::remove_file(&audio_path);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::test_support::CannedProvider;
    use tempfile::TempDir;

    // Audio extraction needs a real encoder binary; a bogus one exercises the
    // error path and the guarantee that no sidecar appears.
    #[tokio::test]
    async fn test_failed_extraction_writes_no_sidecar() {
        let dir = TempDir::new().unwrap();
        let video = dir.path().join("movie.mkv");
        std::fs::write(&video, b"not a real video").unwrap();

        let transcoder = Transcoder::with_binaries("/nonexistent/ffmpeg", "/nonexistent/ffprobe");
        let provider = CannedProvider {
            reply: String::new(),
        };
        let cancel = CancellationToken::new();

        let result = generate_srt(&transcoder, &provider, &video, &cancel).await;
        assert!(matches!(result, Err(SubtitleError::Audio(_))));
        assert!(!dir.path().join("movie.srt").exists());
    }
}
