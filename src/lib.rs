//! streamplay - playback orchestration core
//!
//! Decides which backend plays a stream, keeps subtitles in sync with the
//! playback, fans player and stream events out to observers and plays the
//! next episode when the current one ends.
//!
//! # Modules
//!
//! - `models` - Data structures for requests, media, subtitles, streams
//! - `config` - Config file and read-only settings
//! - `logging` - Tracing setup
//! - `stream` - Backends, cast player, stream hub, subtitle provider
//! - `playback` - Player registry, event hub, subtitle sync, autoplay
//! - `cli` - Command line definitions and output helpers

pub mod models;
pub mod config;
pub mod logging;
pub mod stream;
pub mod playback;
pub mod cli;

// Re-export commonly used types
pub use models::{
    Quality, PlayerState, PlaybackRequest, StreamHandle,
    Media, MovieInfo, ShowInfo, Episode, EpisodeMedia, NextEpisode,
    StreamState, DownloadStatus,
    CastDevice, PlaybackStatus,
    SubtitleInfo, SubtitleFile, SubtitleTrack, SubtitlePreference, SubFormat,
};

pub use config::{Config, SettingsProvider};
pub use playback::PlaybackCoordinator;
pub use stream::{BackendError, BackendRegistry};
