//! Streaming collaborators
//!
//! - Backend: backend trait and the backend registry
//! - Player: VLC/mpv process backend
//! - Cast: Chromecast player via catt
//! - Torrent: stream state and download progress per stream handle
//! - Subtitles: Stremio OpenSubtitles provider and SRT parsing

pub mod backend;
pub mod player;
pub mod cast;
pub mod torrent;
pub mod subtitles;

pub use backend::{ActiveBackendHandle, BackendError, BackendRegistry, VideoBackend};
pub use cast::{CastError, CastPlayer};
pub use player::{PlayerError, PlayerType, ProcessBackend};
pub use subtitles::{parse_srt, srt_to_webvtt, StremioSubtitleProvider, SubtitleError};
pub use torrent::{StreamListener, StreamSource, TorrentStreamHub};
