//! Configuration management for streamplay
//!
//! Handles config file loading/saving and read-only settings access.
//! Config is stored at ~/.config/streamplay/config.toml

use anyhow::Result;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::stream::player::PlayerType;

/// Application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub playback: PlaybackSettings,
    pub subtitles: SubtitleSettings,
    pub cast: CastSettings,
}

/// Playback behaviour
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackSettings {
    /// Start the next episode when the current one ends
    pub autoplay_next_episode: bool,
    /// Local player used for http/file streams
    pub preferred_player: PlayerType,
    /// Quality label used when a request doesn't name one (e.g. "1080p")
    pub default_quality: Option<String>,
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        Self {
            autoplay_next_episode: true,
            preferred_player: PlayerType::default(),
            default_quality: None,
        }
    }
}

/// Subtitle rendering decoration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubtitleDecoration {
    None,
    #[default]
    Outline,
    OpaqueBackground,
    SeeThroughBackground,
}

impl fmt::Display for SubtitleDecoration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubtitleDecoration::None => write!(f, "none"),
            SubtitleDecoration::Outline => write!(f, "outline"),
            SubtitleDecoration::OpaqueBackground => write!(f, "opaque background"),
            SubtitleDecoration::SeeThroughBackground => write!(f, "see-through background"),
        }
    }
}

/// Subtitle defaults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubtitleSettings {
    /// Language code selected when a playback starts (e.g. "eng")
    pub preferred_language: Option<String>,
    pub font_family: String,
    pub font_size: u32,
    pub bold: bool,
    pub decoration: SubtitleDecoration,
    /// Overrides ~/.cache/streamplay/subtitles
    pub cache_dir: Option<PathBuf>,
}

impl Default for SubtitleSettings {
    fn default() -> Self {
        Self {
            preferred_language: None,
            font_family: "Arial".to_string(),
            font_size: 28,
            bold: true,
            decoration: SubtitleDecoration::default(),
            cache_dir: None,
        }
    }
}

/// Chromecast settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CastSettings {
    /// Default Chromecast device name
    pub default_device: Option<String>,
}

impl Config {
    /// Get config file path (~/.config/streamplay/config.toml)
    pub fn path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("streamplay").join("config.toml"))
    }

    /// Load config from the default path, or return default if not found
    pub fn load() -> Self {
        match Self::path() {
            Some(path) => Self::load_from(&path),
            None => Self::default(),
        }
    }

    /// Load config from a file; missing or invalid files yield the defaults
    pub fn load_from(path: &Path) -> Self {
        let Ok(content) = std::fs::read_to_string(path) else {
            debug!("No config at {}, using defaults", path.display());
            return Self::default();
        };

        toml::from_str(&content).unwrap_or_else(|e| {
            warn!("Invalid config {}, using defaults: {}", path.display(), e);
            Self::default()
        })
    }

    /// Save config to the default path
    pub fn save(&self) -> Result<()> {
        let path = Self::path().ok_or_else(|| anyhow::anyhow!("Could not determine config path"))?;
        self.save_to(&path)
    }

    /// Save config to the given file
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let toml = toml::to_string_pretty(self)?;
        std::fs::write(path, toml)?;
        Ok(())
    }
}

/// Read-only access to the settings
pub trait SettingsProvider: Send + Sync {
    fn playback(&self) -> PlaybackSettings;

    fn subtitles(&self) -> SubtitleSettings;
}

impl SettingsProvider for Config {
    fn playback(&self) -> PlaybackSettings {
        self.playback.clone()
    }

    fn subtitles(&self) -> SubtitleSettings {
        self.subtitles.clone()
    }
}

impl SettingsProvider for RwLock<Config> {
    fn playback(&self) -> PlaybackSettings {
        self.read().playback.clone()
    }

    fn subtitles(&self) -> SubtitleSettings {
        self.read().subtitles.clone()
    }
}
