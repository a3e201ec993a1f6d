//! Data structures and types for streamplay
//!
//! Contains all shared models used across the crate organized by domain:
//! - **Playback**: play requests, player state, stream handles
//! - **Media**: movies, shows, episodes and successor lookup
//! - **Stream**: torrent stream state and download progress
//! - **Cast**: Chromecast device info and catt status parsing
//! - **Subtitles**: subtitle descriptors, preferences, parsed tracks

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;

// =============================================================================
// Playback Models
// =============================================================================

/// State of a backend or logical player
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayerState {
    #[default]
    Unknown,
    Loading,
    Buffering,
    Playing,
    Paused,
    Stopped,
    Finished,
    Error,
}

impl PlayerState {
    /// Terminal states end a play session; only a new request leaves them.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PlayerState::Stopped | PlayerState::Finished | PlayerState::Error
        )
    }

    /// Parse state from catt status output
    pub fn from_catt_state(s: &str) -> Self {
        match s.trim().to_uppercase().as_str() {
            "PLAYING" => PlayerState::Playing,
            "PAUSED" => PlayerState::Paused,
            "BUFFERING" => PlayerState::Buffering,
            "IDLE" | "STOPPED" => PlayerState::Stopped,
            _ => PlayerState::Unknown,
        }
    }
}

impl fmt::Display for PlayerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlayerState::Unknown => write!(f, "Unknown"),
            PlayerState::Loading => write!(f, "Loading..."),
            PlayerState::Buffering => write!(f, "Buffering..."),
            PlayerState::Playing => write!(f, "▶ Playing"),
            PlayerState::Paused => write!(f, "⏸ Paused"),
            PlayerState::Stopped => write!(f, "⏹ Stopped"),
            PlayerState::Finished => write!(f, "Finished"),
            PlayerState::Error => write!(f, "Error"),
        }
    }
}

/// Identifies the torrent stream backing a playback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamHandle(Uuid);

impl StreamHandle {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for StreamHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for StreamHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Subtitle part of a play request
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlaySubtitleRequest {
    /// Whether subtitles should be loaded at all for this playback
    pub enabled: bool,
    /// Explicit selection made before playback started (e.g. in a details view)
    pub info: Option<SubtitleInfo>,
}

/// Immutable description of a play intent.
///
/// Built once through [`PlaybackRequest::builder`] and never mutated
/// afterwards; components that need per-session state keep their own copy.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackRequest {
    url: String,
    title: String,
    caption: Option<String>,
    quality: Option<String>,
    media: Option<Media>,
    subtitle: PlaySubtitleRequest,
    resume_timestamp: Option<u64>,
    auto_resume: bool,
    stream_handle: Option<StreamHandle>,
}

impl PlaybackRequest {
    pub fn builder() -> PlaybackRequestBuilder {
        PlaybackRequestBuilder::default()
    }

    /// The stream URL to play
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn caption(&self) -> Option<&str> {
        self.caption.as_deref()
    }

    /// Quality label of the stream (e.g. "1080p")
    pub fn quality(&self) -> Option<&str> {
        self.quality.as_deref()
    }

    pub fn media(&self) -> Option<&Media> {
        self.media.as_ref()
    }

    pub fn subtitle(&self) -> &PlaySubtitleRequest {
        &self.subtitle
    }

    pub fn subtitles_enabled(&self) -> bool {
        self.subtitle.enabled
    }

    /// Resume position in milliseconds, only when auto-resume is enabled
    pub fn auto_resume_timestamp(&self) -> Option<u64> {
        if self.auto_resume {
            self.resume_timestamp
        } else {
            None
        }
    }

    pub fn stream_handle(&self) -> Option<StreamHandle> {
        self.stream_handle
    }
}

impl fmt::Display for PlaybackRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.quality {
            Some(quality) => write!(f, "{} [{}] ({})", self.title, quality, self.url),
            None => write!(f, "{} ({})", self.title, self.url),
        }
    }
}

/// Builder for [`PlaybackRequest`]
#[derive(Debug, Default)]
pub struct PlaybackRequestBuilder {
    url: String,
    title: Option<String>,
    caption: Option<String>,
    quality: Option<String>,
    media: Option<Media>,
    subtitle: PlaySubtitleRequest,
    resume_timestamp: Option<u64>,
    auto_resume: Option<bool>,
    stream_handle: Option<StreamHandle>,
}

impl PlaybackRequestBuilder {
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn caption(mut self, caption: impl Into<String>) -> Self {
        self.caption = Some(caption.into());
        self
    }

    pub fn quality(mut self, quality: impl Into<String>) -> Self {
        self.quality = Some(quality.into());
        self
    }

    pub fn media(mut self, media: Media) -> Self {
        self.media = Some(media);
        self
    }

    pub fn subtitles_enabled(mut self, enabled: bool) -> Self {
        self.subtitle.enabled = enabled;
        self
    }

    /// Pre-select a subtitle; a selection implies subtitles are enabled
    pub fn subtitle(mut self, info: SubtitleInfo) -> Self {
        self.subtitle.enabled = true;
        self.subtitle.info = Some(info);
        self
    }

    pub fn resume_timestamp(mut self, timestamp_ms: u64) -> Self {
        self.resume_timestamp = Some(timestamp_ms);
        self
    }

    pub fn auto_resume(mut self, enabled: bool) -> Self {
        self.auto_resume = Some(enabled);
        self
    }

    pub fn stream_handle(mut self, handle: StreamHandle) -> Self {
        self.stream_handle = Some(handle);
        self
    }

    pub fn build(self) -> PlaybackRequest {
        let title = self
            .title
            .or_else(|| self.media.as_ref().map(|m| m.title()))
            .unwrap_or_else(|| filename_without_extension(&self.url).unwrap_or_default());

        PlaybackRequest {
            url: self.url,
            title,
            caption: self.caption,
            quality: self.quality,
            media: self.media,
            subtitle: self.subtitle,
            resume_timestamp: self.resume_timestamp,
            auto_resume: self.auto_resume.unwrap_or(true),
            stream_handle: self.stream_handle,
        }
    }
}

/// Derive the filename without extension from a URL or path
///
/// `http://host:8888/files/Show.S01E02.1080p.mkv?x=1` -> `Show.S01E02.1080p`
pub fn filename_without_extension(url: &str) -> Option<String> {
    let without_query = url.split(['?', '#']).next().unwrap_or(url);
    let name = without_query
        .rsplit(['/', '\\'])
        .next()
        .filter(|s| !s.is_empty())?;

    let stem = match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() && ext.len() <= 4 => stem,
        _ => name,
    };

    Some(stem.to_string())
}

// =============================================================================
// Media Models
// =============================================================================

/// Video quality classification, used to rank stream sources
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Quality {
    UHD4K,
    FHD1080p,
    HD720p,
    SD480p,
    #[default]
    Unknown,
}

impl Quality {
    /// Parse quality from a string (e.g., "4K", "1080p", "720p")
    pub fn from_str_loose(s: &str) -> Self {
        let s_lower = s.to_lowercase();
        if s_lower.contains("4k") || s_lower.contains("2160p") || s_lower.contains("uhd") {
            Quality::UHD4K
        } else if s_lower.contains("1080p") || s_lower.contains("fhd") {
            Quality::FHD1080p
        } else if s_lower.contains("720p") || s_lower.contains("hd") && !s_lower.contains("hdcam") {
            Quality::HD720p
        } else if s_lower.contains("480p") || s_lower.contains("sd") {
            Quality::SD480p
        } else {
            Quality::Unknown
        }
    }

    /// Quality ranking for sorting (higher = better)
    pub fn rank(&self) -> u8 {
        match self {
            Quality::UHD4K => 4,
            Quality::FHD1080p => 3,
            Quality::HD720p => 2,
            Quality::SD480p => 1,
            Quality::Unknown => 0,
        }
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Quality::UHD4K => write!(f, "4K"),
            Quality::FHD1080p => write!(f, "1080p"),
            Quality::HD720p => write!(f, "720p"),
            Quality::SD480p => write!(f, "480p"),
            Quality::Unknown => write!(f, "???"),
        }
    }
}

/// Movie identity attached to a play request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovieInfo {
    pub imdb_id: String,
    pub title: String,
    #[serde(default)]
    pub year: Option<u16>,
}

/// Show identity, shared by all of its episodes
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ShowInfo {
    pub id: String,
    pub imdb_id: String,
    pub title: String,
}

/// TV episode information
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Episode {
    pub season: u8,
    pub episode: u8,
    pub name: String,
    #[serde(default)]
    pub overview: String,
    #[serde(default)]
    pub runtime: Option<u32>,
    #[serde(default)]
    pub imdb_id: Option<String>,
    /// Stream URLs keyed by quality label
    #[serde(default)]
    pub sources: BTreeMap<String, String>,
}

impl Episode {
    /// Position of the episode within its show
    pub fn key(&self) -> (u8, u8) {
        (self.season, self.episode)
    }

    /// Pick a source for the requested quality.
    ///
    /// Exact label match first, otherwise the best ranked source.
    pub fn source_for(&self, quality: Option<&str>) -> Option<(&str, &str)> {
        if let Some(quality) = quality {
            if let Some((label, url)) = self.sources.get_key_value(quality) {
                return Some((label.as_str(), url.as_str()));
            }
        }

        self.sources
            .iter()
            .max_by_key(|(label, _)| Quality::from_str_loose(label).rank())
            .map(|(label, url)| (label.as_str(), url.as_str()))
    }
}

impl fmt::Display for Episode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S{:02}E{:02} - {}", self.season, self.episode, self.name)
    }
}

/// An episode together with the show it belongs to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodeMedia {
    pub show: ShowInfo,
    pub episode: Episode,
}

/// Media identity associated with a play request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Media {
    Movie(MovieInfo),
    Episode(EpisodeMedia),
}

impl Media {
    /// IMDB id used for subtitle lookups (episode id when known, else the show's)
    pub fn imdb_id(&self) -> &str {
        match self {
            Media::Movie(movie) => &movie.imdb_id,
            Media::Episode(e) => e.episode.imdb_id.as_deref().unwrap_or(&e.show.imdb_id),
        }
    }

    pub fn title(&self) -> String {
        match self {
            Media::Movie(movie) => movie.title.clone(),
            Media::Episode(e) => format!("{} - {}", e.show.title, e.episode),
        }
    }

    pub fn as_episode(&self) -> Option<&EpisodeMedia> {
        match self {
            Media::Episode(e) => Some(e),
            Media::Movie(_) => None,
        }
    }
}

/// Sibling episodes of a show with their watched state
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ShowEpisodes {
    pub episodes: Vec<Episode>,
    pub watched: HashSet<(u8, u8)>,
}

impl ShowEpisodes {
    /// The episode following `current` in (season, episode) order
    pub fn successor(&self, current: &Episode) -> Option<&Episode> {
        let mut sorted: Vec<&Episode> = self.episodes.iter().collect();
        sorted.sort_by_key(|e| e.key());

        let index = sorted.iter().position(|e| e.key() == current.key())?;
        sorted.get(index + 1).copied()
    }

    pub fn is_watched(&self, episode: &Episode) -> bool {
        self.watched.contains(&episode.key())
    }
}

/// Episode scheduled to play after the current one
#[derive(Debug, Clone, PartialEq)]
pub struct NextEpisode {
    pub show: ShowInfo,
    pub episode: Episode,
    pub watched: bool,
}

impl fmt::Display for NextEpisode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.show.title, self.episode)
    }
}

// =============================================================================
// Stream Models
// =============================================================================

/// State of a torrent stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamState {
    /// Torrent engine is preparing the stream
    Starting,
    /// Fetching torrent metadata from DHT/trackers
    FetchingMetadata { peers: u32 },
    /// Connecting to peers for download
    Connecting { peers: u32 },
    /// Buffering initial data for playback
    Buffering { peers: u32, progress: u8 },
    /// Stream is being served
    Streaming,
    /// Stream download paused
    Paused,
    /// Stopped by user
    Stopped,
    /// Error occurred
    Error(String),
}

impl StreamState {
    /// Get peer count if available
    pub fn peers(&self) -> Option<u32> {
        match self {
            StreamState::FetchingMetadata { peers } => Some(*peers),
            StreamState::Connecting { peers } => Some(*peers),
            StreamState::Buffering { peers, .. } => Some(*peers),
            _ => None,
        }
    }

    /// Check if state is in connecting phase (not yet streaming)
    pub fn is_connecting(&self) -> bool {
        matches!(
            self,
            StreamState::Starting
                | StreamState::FetchingMetadata { .. }
                | StreamState::Connecting { .. }
                | StreamState::Buffering { .. }
        )
    }
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamState::Starting => write!(f, "Starting..."),
            StreamState::FetchingMetadata { peers } => {
                write!(f, "Fetching metadata ({} peers)", peers)
            }
            StreamState::Connecting { peers } => write!(f, "Connecting ({} peers)", peers),
            StreamState::Buffering { peers, progress } => {
                write!(f, "Buffering {}% ({} peers)", progress, peers)
            }
            StreamState::Streaming => write!(f, "Streaming"),
            StreamState::Paused => write!(f, "Paused"),
            StreamState::Stopped => write!(f, "Stopped"),
            StreamState::Error(e) => write!(f, "Error: {}", e),
        }
    }
}

/// Download progress snapshot of the current stream
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DownloadStatus {
    /// Progress between 0 and 1
    pub progress: f32,
    pub seeds: u32,
    pub peers: u32,
    /// Bytes per second
    pub download_speed: u64,
    /// Bytes per second
    pub upload_speed: u64,
    pub downloaded: u64,
    pub total_size: u64,
}

impl DownloadStatus {
    /// Number of live connections (seeds + peers)
    pub fn connections(&self) -> u32 {
        self.seeds + self.peers
    }

    /// Format download speed for display
    pub fn format_speed(&self) -> String {
        let mb_per_sec = self.download_speed as f64 / (1024.0 * 1024.0);
        format!("{:.1} MB/s", mb_per_sec)
    }

    /// Format downloaded amount for display
    pub fn format_downloaded(&self) -> String {
        let gb = self.downloaded as f64 / (1024.0 * 1024.0 * 1024.0);
        if gb >= 1.0 {
            format!("{:.2} GB", gb)
        } else {
            let mb = self.downloaded as f64 / (1024.0 * 1024.0);
            format!("{:.0} MB", mb)
        }
    }
}

impl fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:.0}% @ {} ({} connections, {})",
            self.progress * 100.0,
            self.format_speed(),
            self.connections(),
            self.format_downloaded()
        )
    }
}

// =============================================================================
// Cast Models (Chromecast)
// =============================================================================

/// Chromecast device discovered on the network
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CastDevice {
    pub id: String,
    pub name: String,
    pub address: IpAddr,
    pub port: u16,
    pub model: Option<String>,
}

impl CastDevice {
    /// Parse devices from catt scan output
    /// Format: "192.168.1.36 - Device Name - Google Inc. Chromecast"
    pub fn parse_catt_scan(output: &str) -> Vec<CastDevice> {
        output
            .lines()
            .map(str::trim)
            .filter(|line| {
                !line.is_empty() && !line.starts_with("Scanning") && !line.contains("No devices")
            })
            .filter_map(|line| {
                let mut parts = line.splitn(3, " - ").map(str::trim);
                let ip = parts.next()?;
                let name = parts.next()?;
                let address = ip.parse::<IpAddr>().ok()?;

                Some(CastDevice {
                    id: ip.to_string(),
                    name: name.to_string(),
                    address,
                    port: 8009,
                    model: parts.next().map(str::to_string),
                })
            })
            .collect()
    }
}

impl fmt::Display for CastDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.model {
            Some(model) => write!(f, "{} ({}) - {}", self.name, model, self.address),
            None => write!(f, "{} - {}", self.name, self.address),
        }
    }
}

/// Chromecast playback status as reported by `catt status`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackStatus {
    pub state: PlayerState,
    pub position: Duration,
    pub duration: Duration,
    /// Volume between 0 and 1
    pub volume: f32,
    pub title: Option<String>,
}

impl PlaybackStatus {
    /// Parse status from catt status output
    /// Format:
    /// ```text
    /// State: PLAYING
    /// Duration: 10234.5
    /// Current time: 1234.5
    /// Volume: 80
    /// ```
    pub fn parse_catt_status(output: &str) -> Option<Self> {
        let mut status = Self {
            state: PlayerState::Unknown,
            position: Duration::ZERO,
            duration: Duration::ZERO,
            volume: 1.0,
            title: None,
        };
        let mut recognized = false;

        for line in output.lines() {
            let Some((key, value)) = line.trim().split_once(':') else {
                continue;
            };
            let value = value.trim();

            match key.trim().to_lowercase().as_str() {
                "state" => status.state = PlayerState::from_catt_state(value),
                "duration" => {
                    if let Ok(secs) = value.parse::<f64>() {
                        status.duration = Duration::from_secs_f64(secs.max(0.0));
                    }
                }
                "current time" => {
                    if let Ok(secs) = value.parse::<f64>() {
                        status.position = Duration::from_secs_f64(secs.max(0.0));
                    }
                }
                "volume" => {
                    if let Ok(vol) = value.parse::<f32>() {
                        status.volume = (vol / 100.0).clamp(0.0, 1.0);
                    }
                }
                "title" => status.title = Some(value.to_string()),
                _ => continue,
            }
            recognized = true;
        }

        recognized.then_some(status)
    }

    /// Volume as a 0-100 percentage
    pub fn volume_percent(&self) -> u8 {
        (self.volume * 100.0).round() as u8
    }

    /// Get progress as percentage (0.0-1.0)
    pub fn progress(&self) -> f32 {
        if self.duration.as_millis() == 0 {
            0.0
        } else {
            self.position.as_secs_f32() / self.duration.as_secs_f32()
        }
    }
}

impl fmt::Display for PlaybackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} / {} ({}%)",
            self.state,
            format_duration(self.position),
            format_duration(self.duration),
            self.volume_percent()
        )
    }
}

// =============================================================================
// Subtitle Models
// =============================================================================

/// Subtitle file format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubFormat {
    Srt,
    WebVtt,
    Sub,
    Ass,
}

impl SubFormat {
    /// Parse format from file extension
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_lowercase().as_str() {
            "vtt" | "webvtt" => SubFormat::WebVtt,
            "sub" => SubFormat::Sub,
            "ass" | "ssa" => SubFormat::Ass,
            _ => SubFormat::Srt,
        }
    }

    pub fn from_path(path: &Path) -> Self {
        path.extension()
            .and_then(|e| e.to_str())
            .map(Self::from_extension)
            .unwrap_or(SubFormat::Srt)
    }

    /// Get file extension for this format
    pub fn extension(&self) -> &'static str {
        match self {
            SubFormat::Srt => "srt",
            SubFormat::WebVtt => "vtt",
            SubFormat::Sub => "sub",
            SubFormat::Ass => "ass",
        }
    }
}

impl fmt::Display for SubFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubFormat::Srt => write!(f, "SRT"),
            SubFormat::WebVtt => write!(f, "WebVTT"),
            SubFormat::Sub => write!(f, "SUB"),
            SubFormat::Ass => write!(f, "ASS"),
        }
    }
}

/// Language of a subtitle descriptor, including the two special entries
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubtitleLanguage {
    /// Subtitles disabled
    None,
    /// User supplied subtitle file
    Custom,
    /// Language code as reported by the provider ("eng", "fr", ...)
    Code(String),
}

impl SubtitleLanguage {
    pub fn code(&self) -> &str {
        match self {
            SubtitleLanguage::None => "none",
            SubtitleLanguage::Custom => "custom",
            SubtitleLanguage::Code(code) => code,
        }
    }

    /// Loose language match: "fr" matches "fre", "eng" matches "en"
    pub fn matches(&self, lang: &str) -> bool {
        match self {
            SubtitleLanguage::Code(code) => {
                let lang = lang.trim();
                !lang.is_empty()
                    && (code.eq_ignore_ascii_case(lang)
                        || code.to_lowercase().starts_with(&lang.to_lowercase())
                        || lang.to_lowercase().starts_with(&code.to_lowercase()))
            }
            _ => false,
        }
    }

    pub fn name(&self) -> String {
        match self {
            SubtitleLanguage::None => "Disabled".to_string(),
            SubtitleLanguage::Custom => "Custom".to_string(),
            SubtitleLanguage::Code(code) => lang_code_to_name(code),
        }
    }
}

impl fmt::Display for SubtitleLanguage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A downloadable subtitle file belonging to a [`SubtitleInfo`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubtitleFile {
    pub id: String,
    /// Release name the file was made for
    pub name: String,
    /// Download URL, or a local path for custom files
    pub url: String,
    #[serde(default)]
    pub quality: Option<String>,
    #[serde(default)]
    pub score: f32,
    #[serde(default)]
    pub downloads: u32,
}

impl SubtitleFile {
    /// Ordering key: highest score first, then most downloaded
    fn rank(&self) -> (i64, u32) {
        ((self.score * 1000.0) as i64, self.downloads)
    }
}

/// Selectable subtitle descriptor.
///
/// [`SubtitleInfo::none`] is the distinguished "disabled" entry and is used
/// instead of an absent value everywhere in the crate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubtitleInfo {
    pub imdb_id: Option<String>,
    pub language: SubtitleLanguage,
    #[serde(default)]
    pub files: Vec<SubtitleFile>,
}

impl SubtitleInfo {
    pub fn new(imdb_id: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            imdb_id: Some(imdb_id.into()),
            language: SubtitleLanguage::Code(language.into()),
            files: Vec::new(),
        }
    }

    /// The "disabled" sentinel
    pub fn none() -> Self {
        Self {
            imdb_id: None,
            language: SubtitleLanguage::None,
            files: Vec::new(),
        }
    }

    /// The "pick a file" entry offered in subtitle selections
    pub fn custom() -> Self {
        Self {
            imdb_id: None,
            language: SubtitleLanguage::Custom,
            files: Vec::new(),
        }
    }

    /// A custom subtitle backed by a file the user picked
    pub fn custom_file(path: &Path) -> Self {
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();

        Self {
            imdb_id: None,
            language: SubtitleLanguage::Custom,
            files: vec![SubtitleFile {
                id: path.display().to_string(),
                name,
                url: path.display().to_string(),
                quality: None,
                score: 0.0,
                downloads: 0,
            }],
        }
    }

    pub fn with_files(mut self, files: Vec<SubtitleFile>) -> Self {
        self.files = files;
        self
    }

    pub fn is_none(&self) -> bool {
        self.language == SubtitleLanguage::None
    }

    pub fn is_custom(&self) -> bool {
        self.language == SubtitleLanguage::Custom
    }

    pub fn is_special(&self) -> bool {
        self.is_none() || self.is_custom()
    }

    /// Custom entry which still needs the user to pick a file
    pub fn needs_custom_file(&self) -> bool {
        self.is_custom() && self.files.is_empty()
    }

    /// Best file for the given matcher.
    ///
    /// Exact (normalized) release name first, then files matching the
    /// quality (files without quality always qualify), then best score.
    pub fn best_matching_file(&self, matcher: &SubtitleMatcher) -> Option<&SubtitleFile> {
        if let Some(name) = matcher.name.as_deref() {
            let wanted = normalize_release_name(name);
            let by_name = self
                .files
                .iter()
                .filter(|f| normalize_release_name(&f.name) == wanted)
                .max_by_key(|f| f.rank());
            if by_name.is_some() {
                return by_name;
            }
        }

        let mut candidates: Vec<&SubtitleFile> = match matcher.quality.as_deref() {
            Some(quality) => self
                .files
                .iter()
                .filter(|f| f.quality.as_deref().map_or(true, |q| q == quality))
                .collect(),
            None => Vec::new(),
        };
        if candidates.is_empty() {
            candidates = self.files.iter().collect();
        }

        candidates.into_iter().max_by_key(|f| f.rank())
    }
}

impl fmt::Display for SubtitleInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.imdb_id {
            Some(imdb) => write!(f, "{} ({}, {} files)", self.language, imdb, self.files.len()),
            None => write!(f, "{}", self.language),
        }
    }
}

fn normalize_release_name(name: &str) -> String {
    name.chars()
        .filter(|c| !matches!(c, '[' | ']' | '(' | ')' | '_' | '-' | '.' | ' '))
        .flat_map(char::to_lowercase)
        .collect()
}

/// Match key used to pick the right file of a subtitle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubtitleMatcher {
    /// Filename of the playing stream, without extension
    pub name: Option<String>,
    pub quality: Option<String>,
}

impl SubtitleMatcher {
    pub fn new(name: Option<String>, quality: Option<String>) -> Self {
        Self { name, quality }
    }

    /// Build the matcher from the playing URL and quality label
    pub fn from_url(url: Option<&str>, quality: Option<&str>) -> Self {
        Self {
            name: url.and_then(filename_without_extension),
            quality: quality.map(str::to_string),
        }
    }
}

/// The user's subtitle preference
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", content = "language", rename_all = "lowercase")]
pub enum SubtitlePreference {
    #[default]
    Disabled,
    Language(String),
    Custom,
}

impl fmt::Display for SubtitlePreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubtitlePreference::Disabled => write!(f, "disabled"),
            SubtitlePreference::Language(lang) => write!(f, "language({})", lang),
            SubtitlePreference::Custom => write!(f, "custom"),
        }
    }
}

/// One timed subtitle entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubtitleCue {
    pub id: String,
    pub start_ms: u64,
    pub end_ms: u64,
    pub lines: Vec<String>,
}

/// A downloaded and parsed subtitle bound to the playing session
#[derive(Debug, Clone, PartialEq)]
pub struct SubtitleTrack {
    pub info: SubtitleInfo,
    /// Local file of the subtitle, handed to backends that render natively
    pub file: PathBuf,
    pub format: SubFormat,
    pub cues: Vec<SubtitleCue>,
    /// Time-base shift applied by overlay renderers, in milliseconds
    pub offset_ms: i64,
}

impl SubtitleTrack {
    pub fn new(info: SubtitleInfo, file: PathBuf, cues: Vec<SubtitleCue>) -> Self {
        let format = SubFormat::from_path(&file);
        Self {
            info,
            file,
            format,
            cues,
            offset_ms: 0,
        }
    }

    /// Same track with another time-base
    pub fn with_offset(&self, offset_ms: i64) -> Self {
        Self {
            offset_ms,
            ..self.clone()
        }
    }

    /// Cues visible at the given playback time, offset applied
    pub fn cues_at(&self, time_ms: u64) -> impl Iterator<Item = &SubtitleCue> {
        let time = time_ms as i64 - self.offset_ms;
        self.cues
            .iter()
            .filter(move |cue| cue.start_ms as i64 <= time && time < cue.end_ms as i64)
    }
}

// =============================================================================
// Utility Functions
// =============================================================================

/// Format a Duration as HH:MM:SS or MM:SS
pub fn format_duration(d: Duration) -> String {
    let total_secs = d.as_secs();
    let hours = total_secs / 3600;
    let mins = (total_secs % 3600) / 60;
    let secs = total_secs % 60;

    if hours > 0 {
        format!("{:02}:{:02}:{:02}", hours, mins, secs)
    } else {
        format!("{:02}:{:02}", mins, secs)
    }
}

/// Convert 3-letter language code to full name
pub fn lang_code_to_name(code: &str) -> String {
    let name = match code.to_lowercase().as_str() {
        "eng" | "en" => "English",
        "spa" | "es" => "Spanish",
        "fre" | "fra" | "fr" => "French",
        "ger" | "deu" | "de" => "German",
        "ita" | "it" => "Italian",
        "por" | "pob" | "pt" => "Portuguese",
        "rus" | "ru" => "Russian",
        "jpn" | "ja" => "Japanese",
        "kor" | "ko" => "Korean",
        "chi" | "zho" | "zh" => "Chinese",
        "ara" | "ar" => "Arabic",
        "dut" | "nld" | "nl" => "Dutch",
        "pol" | "pl" => "Polish",
        "tur" | "tr" => "Turkish",
        "swe" | "sv" => "Swedish",
        "nor" | "no" => "Norwegian",
        "dan" | "da" => "Danish",
        "fin" | "fi" => "Finnish",
        "gre" | "ell" | "el" => "Greek",
        "heb" | "he" => "Hebrew",
        "hun" | "hu" => "Hungarian",
        "cze" | "ces" | "cs" => "Czech",
        "rum" | "ron" | "ro" => "Romanian",
        "ukr" | "uk" => "Ukrainian",
        "vie" | "vi" => "Vietnamese",
        _ => return code.to_uppercase(),
    };
    name.to_string()
}

// =============================================================================
// Unit Tests
// =============================================================================
