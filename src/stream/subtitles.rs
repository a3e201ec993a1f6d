//! Stremio Subtitle Provider
//!
//! Free subtitle search using Stremio's public addon endpoint.
//! No API key required - uses Stremio's OpenSubtitles v3 addon.
//!
//! - groups search results per language into [`SubtitleInfo`]s
//! - downloads SRT files into ~/.cache/streamplay/subtitles/
//! - parses SRT/WebVTT into cues, converts SRT to WebVTT for Chromecast

use async_trait::async_trait;
use parking_lot::RwLock;
use regex::Regex;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, trace, warn};

use crate::config::SubtitleSettings;
use crate::models::{
    Quality, SubtitleCue, SubtitleFile, SubtitleInfo, SubtitleLanguage, SubtitleMatcher,
    SubtitlePreference, SubtitleTrack,
};
use crate::playback::subtitle_sync::{SubtitleLookup, SubtitleProvider};

const DEFAULT_BASE_URL: &str = "https://opensubtitles-v3.strem.io";

/// Subtitle errors
#[derive(Debug, Error)]
pub enum SubtitleError {
    #[error("Unable to resolve subtitle: {0}")]
    Resolution(String),
    #[error("Failed to download subtitle: {0}")]
    Download(String),
    #[error("Subtitle result discarded, playback changed in the meantime")]
    StaleResultDiscarded,
    #[error("No subtitle files found for {0}")]
    NoFilesFound(String),
    #[error("Failed to parse subtitle: {0}")]
    Parse(String),
    #[error("Subtitle request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Subtitle file error: {0}")]
    Io(#[from] std::io::Error),
}

/// Stremio subtitle response
#[derive(Debug, Deserialize)]
struct StremioResponse {
    subtitles: Vec<StremioSubtitle>,
}

/// Single subtitle from Stremio
#[derive(Debug, Deserialize)]
struct StremioSubtitle {
    id: String,
    url: String,
    lang: String,
}

/// Subtitle provider using Stremio's free public endpoint
pub struct StremioSubtitleProvider {
    base_url: String,
    client: reqwest::Client,
    cache_dir: PathBuf,
    preference: RwLock<SubtitlePreference>,
}

impl StremioSubtitleProvider {
    /// Create a new provider (free, no API key)
    pub fn new() -> Self {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    /// Create with custom base URL (for testing)
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client: reqwest::Client::new(),
            cache_dir: default_cache_dir(),
            preference: RwLock::new(SubtitlePreference::Disabled),
        }
    }

    /// Create from the subtitle settings, seeding the preferred language
    pub fn from_settings(settings: &SubtitleSettings) -> Self {
        let provider = Self::new();
        let provider = match &settings.cache_dir {
            Some(dir) => provider.with_cache_dir(dir.clone()),
            None => provider,
        };
        let preference = match &settings.preferred_language {
            Some(lang) if !lang.is_empty() => SubtitlePreference::Language(lang.clone()),
            _ => SubtitlePreference::Disabled,
        };
        provider.with_preference(preference)
    }

    pub fn with_cache_dir(mut self, cache_dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = cache_dir.into();
        self
    }

    pub fn with_preference(self, preference: SubtitlePreference) -> Self {
        *self.preference.write() = preference;
        self
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Search subtitles for a movie or an episode
    pub async fn search(
        &self,
        imdb_id: &str,
        season: Option<u8>,
        episode: Option<u8>,
    ) -> Result<Vec<SubtitleInfo>, SubtitleError> {
        let imdb = normalize_imdb_id(imdb_id);
        let url = match (season, episode) {
            (Some(s), Some(e)) => format!(
                "{}/subtitles/series/{}:{}:{}.json",
                self.base_url, imdb, s, e
            ),
            _ => format!("{}/subtitles/movie/{}.json", self.base_url, imdb),
        };
        debug!("Searching subtitles at {}", url);

        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(SubtitleError::Resolution(format!(
                "Stremio API error: {}",
                response.status()
            )));
        }

        let api_response: StremioResponse = response.json().await?;
        let subtitles = group_by_language(&imdb, api_response.subtitles);
        info!("Found {} subtitle languages for {}", subtitles.len(), imdb);
        Ok(subtitles)
    }

    /// Download a subtitle file, served from cache when already present
    pub async fn download(
        &self,
        language: &str,
        file: &SubtitleFile,
    ) -> Result<PathBuf, SubtitleError> {
        let cache_path = self.cache_path(language, file);
        if cache_path.exists() {
            trace!("Subtitle {} served from cache", file.id);
            return Ok(cache_path);
        }

        let response = self.client.get(&file.url).send().await?;
        if !response.status().is_success() {
            return Err(SubtitleError::Download(format!(
                "{} returned {}",
                file.url,
                response.status()
            )));
        }
        let content = response.text().await?;

        if let Some(parent) = cache_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&cache_path, &content).await?;
        debug!("Cached subtitle {} at {}", file.id, cache_path.display());

        Ok(cache_path)
    }

    /// Get the cache path for a subtitle file
    fn cache_path(&self, language: &str, file: &SubtitleFile) -> PathBuf {
        let id: String = file
            .id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        self.cache_dir.join(format!("{}_{}.srt", language, id))
    }
}

impl Default for StremioSubtitleProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SubtitleProvider for StremioSubtitleProvider {
    async fn retrieve_subtitles(
        &self,
        lookup: &SubtitleLookup,
    ) -> anyhow::Result<Vec<SubtitleInfo>> {
        let mut subtitles = self.default_subtitles();
        match lookup {
            SubtitleLookup::Filename(name) => {
                debug!("No media id for {}, only default subtitles are available", name);
            }
            SubtitleLookup::Media {
                imdb_id,
                season,
                episode,
            } => subtitles.extend(self.search(imdb_id, *season, *episode).await?),
        }
        Ok(subtitles)
    }

    async fn download_and_parse(
        &self,
        info: &SubtitleInfo,
        matcher: &SubtitleMatcher,
    ) -> anyhow::Result<SubtitleTrack> {
        let path = if info.is_custom() {
            let file = info
                .files
                .first()
                .ok_or_else(|| SubtitleError::NoFilesFound("custom subtitle".into()))?;
            PathBuf::from(&file.url)
        } else {
            let file = info.best_matching_file(matcher).ok_or_else(|| {
                SubtitleError::NoFilesFound(info.imdb_id.clone().unwrap_or_default())
            })?;
            self.download(info.language.code(), file).await?
        };

        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(SubtitleError::from)?;
        let cues = parse_srt(&content)?;
        debug!("Parsed {} cues from {}", cues.len(), path.display());

        Ok(SubtitleTrack::new(info.clone(), path, cues))
    }

    fn preference(&self) -> SubtitlePreference {
        self.preference.read().clone()
    }

    fn update_preference(&self, preference: SubtitlePreference) {
        info!("Subtitle preference changed to {}", preference);
        *self.preference.write() = preference;
    }

    fn disable_subtitle(&self) {
        self.update_preference(SubtitlePreference::Disabled);
    }
}

fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("streamplay")
        .join("subtitles")
}

/// Group Stremio results into one descriptor per language, sorted by name
fn group_by_language(imdb_id: &str, subtitles: Vec<StremioSubtitle>) -> Vec<SubtitleInfo> {
    let mut grouped: Vec<SubtitleInfo> = Vec::new();

    for subtitle in subtitles {
        let name = extract_release_from_id(&subtitle.id);
        let quality = match Quality::from_str_loose(&name) {
            Quality::Unknown => None,
            quality => Some(quality.to_string()),
        };
        let file = SubtitleFile {
            id: subtitle.id,
            name,
            url: subtitle.url,
            quality,
            score: 0.0,
            downloads: 0,
        };

        let language = SubtitleLanguage::Code(subtitle.lang.to_lowercase());
        match grouped.iter_mut().find(|i| i.language == language) {
            Some(info) => info.files.push(file),
            None => grouped.push(SubtitleInfo {
                imdb_id: Some(imdb_id.to_string()),
                language,
                files: vec![file],
            }),
        }
    }

    grouped.sort_by_key(|i| i.language.name());
    grouped
}

/// Normalize IMDB ID to have "tt" prefix
pub fn normalize_imdb_id(imdb_id: &str) -> String {
    if imdb_id.starts_with("tt") {
        imdb_id.to_string()
    } else {
        format!("tt{}", imdb_id)
    }
}

/// Extract release name from Stremio subtitle ID
/// Stremio IDs can be: "12345678" (numeric) or contain embedded release info
fn extract_release_from_id(id: &str) -> String {
    if let Some((_, release)) = id.split_once('|') {
        if !release.is_empty() {
            return release.trim().chars().take(80).collect();
        }
    }

    let dashed_release =
        id.contains('-') && !id.chars().all(|c| c.is_ascii_digit() || c == '-');
    if id.contains('.') || dashed_release {
        return id.trim().chars().take(80).collect();
    }

    "OpenSubtitles".to_string()
}

// =============================================================================
// SRT Parsing
// =============================================================================

/// Parse SRT (or WebVTT) content into cues
///
/// Malformed blocks are skipped; content without a single cue is an error.
pub fn parse_srt(content: &str) -> Result<Vec<SubtitleCue>, SubtitleError> {
    let timing = Regex::new(
        r"(\d{1,2}):(\d{2}):(\d{2})[,.](\d{3})\s*-->\s*(\d{1,2}):(\d{2}):(\d{2})[,.](\d{3})",
    )
    .map_err(|e| SubtitleError::Parse(e.to_string()))?;

    let normalized = content.trim_start_matches('\u{feff}').replace("\r\n", "\n");
    let mut cues = Vec::new();

    for (index, block) in normalized.split("\n\n").enumerate() {
        let lines: Vec<&str> = block.lines().filter(|l| !l.trim().is_empty()).collect();
        let Some(timing_index) = lines.iter().position(|l| l.contains("-->")) else {
            continue;
        };
        let Some(caps) = timing.captures(lines[timing_index]) else {
            warn!("Skipping subtitle block with invalid timing: {}", lines[timing_index]);
            continue;
        };

        let millis = |offset: usize| -> u64 {
            let part = |i: usize| caps[offset + i].parse::<u64>().unwrap_or(0);
            part(0) * 3_600_000 + part(1) * 60_000 + part(2) * 1000 + part(3)
        };

        let id = match timing_index {
            0 => (index + 1).to_string(),
            i => lines[i - 1].trim().to_string(),
        };

        cues.push(SubtitleCue {
            id,
            start_ms: millis(1),
            end_ms: millis(5),
            lines: lines[timing_index + 1..]
                .iter()
                .map(|l| l.trim().to_string())
                .collect(),
        });
    }

    if cues.is_empty() && !normalized.trim().is_empty() {
        return Err(SubtitleError::Parse("no cues found".into()));
    }

    Ok(cues)
}

/// Convert SRT content to WebVTT format
///
/// WebVTT is required for Chromecast subtitle playback.
/// This converts SRT timestamps (00:00:00,000) to WebVTT format (00:00:00.000)
/// and adds the required WEBVTT header.
pub fn srt_to_webvtt(srt: &str) -> String {
    let mut webvtt = String::from("WEBVTT\n\n");

    for line in srt.lines() {
        if line.contains(" --> ") {
            webvtt.push_str(&line.replace(',', "."));
        } else {
            webvtt.push_str(line);
        }
        webvtt.push('\n');
    }

    webvtt
}
