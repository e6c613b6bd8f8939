//! AI capability boundary and the prompt helpers built on it.
//!
//! The core talks to AI backends through the single [`AiProvider`] trait; a
//! null provider (`None`) is always valid and every AI-assisted step degrades
//! gracefully without it. All analyze calls run under a ten-second timeout.

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Timeout applied to every subsidiary analyze call.
const ANALYZE_TIMEOUT: Duration = Duration::from_secs(10);

/// Error type for AI operations
#[derive(Debug, Error)]
pub enum AiError {
    #[error("AI provider not configured")]
    NotConfigured,

    #[error("AI request timed out")]
    Timeout,

    #[error("AI provider error: {0}")]
    Provider(String),

    #[error("unusable AI response: {0}")]
    InvalidResponse(String),
}

/// Interface to an AI backend.
///
/// Implementations live outside the core; the pipelines only ever call
/// `analyze` (text in, text out) and `transcribe` (audio file to SRT text).
#[async_trait]
pub trait AiProvider: Send + Sync {
    /// Ask the provider to analyze a prompt and return its text response.
    async fn analyze(&self, prompt: &str) -> Result<String, AiError>;

    /// Transcribe an audio file into SRT subtitle text.
    async fn transcribe(&self, audio_path: &Path) -> Result<String, AiError>;

    /// Provider name for logging.
    fn name(&self) -> &str;
}

/// Shared handle to an optional provider.
pub type SharedAiProvider = Arc<dyn AiProvider>;

async fn analyze_with_timeout(
    provider: &dyn AiProvider,
    prompt: &str,
) -> Result<String, AiError> {
    tokio::time::timeout(ANALYZE_TIMEOUT, provider.analyze(prompt))
        .await
        .map_err(|_| AiError::Timeout)?
}

/// Ask the provider to turn a messy release filename into a clean title.
///
/// Returns the trimmed title, e.g. `"The Matrix (1999)"`.
pub async fn clean_filename(
    provider: &dyn AiProvider,
    filename: &str,
) -> Result<String, AiError> {
    let prompt = format!(
        "Extract the clean movie or TV show title and the release year from this filename.\n\
         Filename: \"{}\"\n\n\
         Return ONLY the clean title and year in this format: \"Title (Year)\"\n\
         If year is unknown, return ONLY the Title.\n\
         Example Input: \"The.Matrix.1999.1080p.BluRay.x264.mkv\"\n\
         Example Output: \"The Matrix (1999)\"",
        filename
    );

    let response = analyze_with_timeout(provider, &prompt).await?;
    let cleaned = response.trim().trim_matches('"').trim();
    if cleaned.is_empty() {
        return Err(AiError::InvalidResponse("empty title".to_string()));
    }
    Ok(cleaned.to_string())
}

/// Ask the provider for an encoding quality level based on a raw probe document.
///
/// The answer is accepted only when it parses to an integer within [10, 51];
/// anything else is an error and the caller keeps its configured default.
pub async fn recommend_quality(
    provider: &dyn AiProvider,
    raw_probe_json: &str,
) -> Result<u32, AiError> {
    let prompt = format!(
        "Analyze this media probe JSON output and recommend the optimal constant \
         quality level (CRF) for H.265 encoding to balance high quality and small \
         file size.\n\nMedia Info: {}\n\n\
         Return ONLY the recommended CRF as an integer (typically between 18 and 28).\n\
         Example Output: 22",
        raw_probe_json
    );

    let response = analyze_with_timeout(provider, &prompt).await?;
    let trimmed = response.trim();
    let level: u32 = trimmed
        .parse()
        .map_err(|_| AiError::InvalidResponse(trimmed.to_string()))?;

    if !(10..=51).contains(&level) {
        return Err(AiError::InvalidResponse(format!(
            "quality level {} out of range",
            level
        )));
    }

    Ok(level)
}

/// A searchable media item handed to [`rank_media`].
#[derive(Debug, Clone)]
pub struct MediaItem {
    pub id: String,
    pub title: String,
}

/// Rank media items against a natural-language query.
///
/// Returns matching ids in relevance order; an empty list when nothing
/// matches.
pub async fn rank_media(
    provider: &dyn AiProvider,
    query: &str,
    items: &[MediaItem],
) -> Result<Vec<String>, AiError> {
    if items.is_empty() {
        return Ok(Vec::new());
    }

    let mut library = String::new();
    for item in items {
        library.push_str(&format!("- ID: {}, Title: {}\n", item.id, item.title));
    }

    let prompt = format!(
        "You are a media discovery assistant. A user is searching for media with \
         the query: \"{}\"\n\nHere is the media library:\n{}\n\
         Rank the media items by relevance to the query.\n\
         Return ONLY a comma-separated list of the matching IDs in order of relevance.\n\
         If no items match, return \"NONE\".",
        query, library
    );

    let response = analyze_with_timeout(provider, &prompt).await?;
    let cleaned = response.trim();
    if cleaned.is_empty() || cleaned == "NONE" {
        return Ok(Vec::new());
    }

    Ok(cleaned
        .split(',')
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .collect())
}


#[cfg(test)]
mod tests {
    use super::test_support::{CannedProvider, FailingProvider};
    use super::*;

    #[tokio::test]
    async fn test_recommend_quality_accepts_in_range() {
        let provider = CannedProvider {
            reply: "22".to_string(),
        };
        let level = recommend_quality(&provider, "{}").await.unwrap();
        assert_eq!(level, 22);
    }

    #[tokio::test]
    async fn test_recommend_quality_trims_whitespace() {
        let provider = CannedProvider {
            reply: "  19\n".to_string(),
        };
        assert_eq!(recommend_quality(&provider, "{}").await.unwrap(), 19);
    }

    #[tokio::test]
    async fn test_recommend_quality_rejects_out_of_range() {
        for reply in ["9", "52", "0", "100"] {
            let provider = CannedProvider {
                reply: reply.to_string(),
            };
            let result = recommend_quality(&provider, "{}").await;
            assert!(matches!(result, Err(AiError::InvalidResponse(_))));
        }
    }

    #[tokio::test]
    async fn test_recommend_quality_rejects_non_integer() {
        let provider = CannedProvider {
            reply: "use CRF 22 for this file".to_string(),
        };
        let result = recommend_quality(&provider, "{}").await;
        assert!(matches!(result, Err(AiError::InvalidResponse(_))));
    }

    #[tokio::test]
    async fn test_clean_filename_trims_quotes() {
        let provider = CannedProvider {
            reply: "\"The Matrix (1999)\"\n".to_string(),
        };
        let title = clean_filename(&provider, "The.Matrix.1999.1080p.mkv")
            .await
            .unwrap();
        assert_eq!(title, "The Matrix (1999)");
    }

    #[tokio::test]
    async fn test_clean_filename_propagates_provider_error() {
        let result = clean_filename(&FailingProvider, "a.mkv").await;
        assert!(matches!(result, Err(AiError::Provider(_))));
    }

    #[tokio::test]
    async fn test_rank_media_parses_id_list() {
        let provider = CannedProvider {
            reply: "20260101-abc, 20260102-def".to_string(),
        };
        let items = vec![
            MediaItem {
                id: "20260101-abc".to_string(),
                title: "a.mkv".to_string(),
            },
            MediaItem {
                id: "20260102-def".to_string(),
                title: "b.mkv".to_string(),
            },
        ];
        let ids = rank_media(&provider, "space movies", &items).await.unwrap();
        assert_eq!(ids, vec!["20260101-abc", "20260102-def"]);
    }

    #[tokio::test]
    async fn test_rank_media_none_yields_empty() {
        let provider = CannedProvider {
            reply: "NONE".to_string(),
        };
        let items = vec![MediaItem {
            id: "x".to_string(),
            title: "y".to_string(),
        }];
        assert!(rank_media(&provider, "q", &items).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rank_media_empty_library_short_circuits() {
        // Provider would fail, but an empty library never reaches it
        assert!(rank_media(&FailingProvider, "q", &[]).await.unwrap().is_empty());
    }
}
