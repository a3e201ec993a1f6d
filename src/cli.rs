//! CLI - Command Line Interface for streamplay
//!
//! Every command is scriptable. With `--json` (or when stdout is not a
//! terminal) results are printed as JSON.
//!
//! # Examples
//!
//! ```bash
//! # Play a local file in mpv with French subtitles
//! streamplay play /media/movie.mkv --imdb tt1877830 --subtitle fre --player mpv
//!
//! # Play an episode and continue with the next one
//! streamplay play http://127.0.0.1:8888/s01e01.mkv --imdb tt0944947 -s 1 -e 1 --episodes got.json
//!
//! # Cast to a Chromecast
//! streamplay play http://192.168.1.10:8888/movie.mp4 --device "Living Room TV"
//! ```

use clap::{Args, Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::io::IsTerminal;
use std::path::PathBuf;

use crate::models::{PlayerState, SubtitleInfo};
use crate::stream::player::PlayerType;

// =============================================================================
// Exit Codes
// =============================================================================

/// Exit codes for CLI operations (semantic for scripting)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    /// Success
    Success = 0,
    /// General error
    Error = 1,
    /// Invalid arguments
    InvalidArgs = 2,
    /// Network error
    NetworkError = 3,
    /// Device not found
    DeviceNotFound = 4,
    /// No backend supports the URL
    NoCompatibleBackend = 5,
    /// Playback failed to start or ended in error
    PlaybackFailed = 6,
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> i32 {
        code as i32
    }
}

impl From<ExitCode> for std::process::ExitCode {
    fn from(code: ExitCode) -> std::process::ExitCode {
        std::process::ExitCode::from(code as u8)
    }
}

// =============================================================================
// Main CLI Structure
// =============================================================================

/// streamplay - play streams locally or on a Chromecast
#[derive(Parser, Debug)]
#[command(
    name = "streamplay",
    version,
    author = "Gorka & Hermes",
    about = "Play streams with synchronized subtitles and autoplay-next",
    long_about = "Plays a stream URL or local file in VLC, mpv or on a Chromecast.\n\n\
                  Subtitles are fetched for the given IMDB id and kept in sync with \
                  the playback. Episodes continue with the next one when a show \
                  description file is given.",
    after_help = "EXAMPLES:\n\
                  streamplay play movie.mkv --subtitle eng     Play with English subtitles\n\
                  streamplay play URL -d TV                    Cast to device\n\
                  streamplay devices --json                    List Chromecast devices"
)]
pub struct Cli {
    /// Output format as JSON (default for non-TTY)
    #[arg(long, short = 'j', global = true)]
    pub json: bool,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(long, short = 'v', global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Path to config file
    #[arg(long, short = 'c', global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    /// Check if JSON output should be used
    pub fn should_json(&self) -> bool {
        self.json || !std::io::stdout().is_terminal()
    }
}

// =============================================================================
// Subcommands
// =============================================================================

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Play a URL or local file
    #[command(visible_alias = "p")]
    Play(PlayCmd),

    /// List available Chromecast devices
    #[command(visible_alias = "dev")]
    Devices(DevicesCmd),

    /// Print the effective configuration
    Config(ConfigCmd),
}

// =============================================================================
// Play Command
// =============================================================================

/// Play a stream through the playback coordinator
#[derive(Args, Debug)]
pub struct PlayCmd {
    /// Stream URL or absolute file path
    #[arg(required = true)]
    pub url: String,

    /// Title shown while playing (default: file name)
    #[arg(long, short = 't')]
    pub title: Option<String>,

    /// Quality label (e.g., "1080p")
    #[arg(long, short = 'Q')]
    pub quality: Option<String>,

    /// Subtitle: language code, "none", or "custom:PATH"
    #[arg(long)]
    pub subtitle: Option<String>,

    /// IMDB ID of the movie or show (e.g., tt1877830)
    #[arg(long)]
    pub imdb: Option<String>,

    /// Season number (for TV shows)
    #[arg(long, short = 's', requires = "episode")]
    pub season: Option<u8>,

    /// Episode number (for TV shows)
    #[arg(long, short = 'e', requires = "season")]
    pub episode: Option<u8>,

    /// Show description file used to find the next episode
    #[arg(long)]
    pub episodes: Option<PathBuf>,

    /// Resume position in milliseconds
    #[arg(long)]
    pub resume: Option<u64>,

    /// Local player (overrides config)
    #[arg(long, short = 'p')]
    pub player: Option<PlayerType>,

    /// Cast to this Chromecast device instead of playing locally
    #[arg(long, short = 'd')]
    pub device: Option<String>,
}

impl PlayCmd {
    /// Parse the subtitle argument
    pub fn subtitle_choice(&self) -> Option<SubtitleChoice> {
        self.subtitle.as_deref().map(SubtitleChoice::parse)
    }

    /// Season and episode when both are given
    pub fn episode_key(&self) -> Option<(u8, u8)> {
        self.season.zip(self.episode)
    }
}

/// Parsed `--subtitle` argument
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubtitleChoice {
    /// Subtitles disabled
    None,
    /// Local subtitle file
    Custom(PathBuf),
    /// Language code
    Language(String),
}

impl SubtitleChoice {
    pub fn parse(s: &str) -> Self {
        let s = s.trim();
        if s.eq_ignore_ascii_case("none") || s.eq_ignore_ascii_case("off") {
            SubtitleChoice::None
        } else if let Some(path) = s.strip_prefix("custom:") {
            SubtitleChoice::Custom(PathBuf::from(path))
        } else {
            SubtitleChoice::Language(s.to_lowercase())
        }
    }

    /// Explicit subtitle for the request; language choices go through the preference
    pub fn info(&self) -> Option<SubtitleInfo> {
        match self {
            SubtitleChoice::None => Some(SubtitleInfo::none()),
            SubtitleChoice::Custom(path) => Some(SubtitleInfo::custom_file(path)),
            SubtitleChoice::Language(_) => None,
        }
    }
}

// =============================================================================
// Devices / Config Commands
// =============================================================================

/// List available Chromecast devices on the network
#[derive(Args, Debug)]
pub struct DevicesCmd {
    /// Path to the catt executable
    #[arg(long, default_value = "catt")]
    pub catt: String,
}

/// Print the effective configuration
#[derive(Args, Debug)]
pub struct ConfigCmd {
    /// Only print the config file path
    #[arg(long)]
    pub path: bool,
}

// =============================================================================
// JSON Output Types
// =============================================================================

/// Generic JSON output wrapper with status
#[derive(Debug, Serialize, Deserialize)]
pub struct JsonOutput<T: Serialize> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "is_zero")]
    pub exit_code: i32,
}

fn is_zero(n: &i32) -> bool {
    *n == 0
}

impl<T: Serialize> JsonOutput<T> {
    /// Create success output with data
    pub fn success(data: T) -> Self {
        Self {
            data: Some(data),
            error: None,
            exit_code: 0,
        }
    }

    /// Create error output (no data)
    pub fn error_msg(msg: impl Into<String>, code: ExitCode) -> JsonOutput<()> {
        JsonOutput::<()> {
            data: None,
            error: Some(msg.into()),
            exit_code: code.into(),
        }
    }
}

/// Play result
#[derive(Debug, Serialize, Deserialize)]
pub struct PlayResponse {
    pub state: PlayerState,
    pub player: String,
    pub title: String,
    /// Episodes started by autoplay
    #[serde(skip_serializing_if = "is_zero_count")]
    pub autoplayed: u32,
}

fn is_zero_count(n: &u32) -> bool {
    *n == 0
}

// =============================================================================
// Output Helpers
// =============================================================================

/// Output handler for consistent formatting
pub struct Output {
    pub json: bool,
    pub quiet: bool,
}

impl Output {
    pub fn new(cli: &Cli) -> Self {
        Self {
            json: cli.should_json(),
            quiet: cli.quiet,
        }
    }

    /// Print success data
    pub fn print<T: Serialize>(&self, data: T) -> anyhow::Result<()> {
        if self.json {
            let output = JsonOutput::success(data);
            println!("{}", serde_json::to_string_pretty(&output)?);
        } else {
            println!("{}", serde_json::to_string_pretty(&data)?);
        }
        Ok(())
    }

    /// Print error and return exit code
    pub fn error(&self, msg: impl Into<String>, code: ExitCode) -> ExitCode {
        let msg = msg.into();
        if self.json {
            let output = JsonOutput::<()>::error_msg(&msg, code);
            if let Ok(json) = serde_json::to_string_pretty(&output) {
                eprintln!("{}", json);
            }
        } else if !self.quiet {
            eprintln!("Error: {}", msg);
        }
        code
    }

    /// Print info message (suppressed in quiet mode)
    pub fn info(&self, msg: impl std::fmt::Display) {
        if !self.quiet && !self.json {
            eprintln!("{}", msg);
        }
    }
}

// =============================================================================
// IMDB ID Validation
// =============================================================================

/// Validate IMDB ID format (tt followed by digits)
pub fn validate_imdb_id(id: &str) -> Result<&str, &'static str> {
    if id.starts_with("tt") && id.len() >= 9 && id[2..].chars().all(|c| c.is_ascii_digit()) {
        Ok(id)
    } else {
        Err("Invalid IMDB ID format (expected tt followed by 7+ digits)")
    }
}

// =============================================================================
// Tests
// =============================================================================
