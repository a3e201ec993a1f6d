//! Process Backend - VLC/mpv playback support
//!
//! Plays streams by launching VLC or mpv as a child process. The process is
//! detached from our control once started: pause, seek and volume stay with
//! the player window, only stop and subtitles are driven from here.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tokio::process::{Child, Command};
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use crate::models::PlayerState;
use crate::playback::listeners::{Listeners, PlayerListener};
use crate::stream::backend::VideoBackend;

/// Supported local players
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayerType {
    /// VLC media player (default)
    #[default]
    Vlc,
    /// mpv media player
    Mpv,
}

impl PlayerType {
    /// Get the command name for this player
    pub fn command(&self) -> &'static str {
        match self {
            PlayerType::Vlc => {
                // On macOS, VLC is an app bundle
                #[cfg(target_os = "macos")]
                if std::path::Path::new("/Applications/VLC.app").exists() {
                    return "/Applications/VLC.app/Contents/MacOS/VLC";
                }
                "vlc"
            }
            PlayerType::Mpv => "mpv",
        }
    }

    /// Get a display name for this player
    pub fn display_name(&self) -> &'static str {
        match self {
            PlayerType::Vlc => "VLC",
            PlayerType::Mpv => "mpv",
        }
    }
}

impl std::fmt::Display for PlayerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

impl FromStr for PlayerType {
    type Err = PlayerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "vlc" => Ok(PlayerType::Vlc),
            "mpv" => Ok(PlayerType::Mpv),
            other => Err(PlayerError::NotFound(other.to_string())),
        }
    }
}

/// Errors from local player operations
#[derive(Debug, Error)]
pub enum PlayerError {
    #[error("Player '{0}' not found. Install it first.")]
    NotFound(String),
    #[error("Failed to start player: {0}")]
    StartFailed(#[from] std::io::Error),
    #[error("Subtitle file not found: {0}")]
    SubtitleNotFound(String),
    #[error("Unsupported stream url: {0}")]
    UnsupportedUrl(String),
}

#[derive(Default)]
struct ProcessState {
    state: PlayerState,
    error: Option<String>,
    url: Option<String>,
    subtitle: Option<PathBuf>,
    subtitle_delay_ms: i64,
    /// Incremented on every launch and stop; watchers of older launches stay silent
    generation: u64,
    kill: Option<oneshot::Sender<()>>,
}

struct Shared {
    inner: Mutex<ProcessState>,
    listeners: Listeners<dyn PlayerListener>,
}

impl Shared {
    fn set_state(&self, state: PlayerState) {
        self.inner.lock().state = state;
        self.listeners.invoke(|l| l.on_state_changed(state));
    }

    /// Report the exit of a launch, unless it has been superseded
    fn exited(&self, generation: u64, state: PlayerState, error: Option<String>) {
        {
            let mut inner = self.inner.lock();
            if inner.generation != generation {
                return;
            }
            inner.state = state;
            inner.error = error;
            inner.kill = None;
        }
        self.listeners.invoke(|l| l.on_state_changed(state));
    }
}

/// Backend running VLC or mpv as a child process
pub struct ProcessBackend {
    player_type: PlayerType,
    command: String,
    name: String,
    shared: Arc<Shared>,
}

impl ProcessBackend {
    /// Create a new process backend with the specified player
    pub fn new(player_type: PlayerType) -> Self {
        Self::with_command(player_type, player_type.command())
    }

    /// Create a VLC backend
    pub fn vlc() -> Self {
        Self::new(PlayerType::Vlc)
    }

    /// Create an mpv backend
    pub fn mpv() -> Self {
        Self::new(PlayerType::Mpv)
    }

    /// Create with a custom executable, using the argument style of `player_type`
    pub fn with_command(player_type: PlayerType, command: impl Into<String>) -> Self {
        Self {
            player_type,
            command: command.into(),
            name: format!("{} process", player_type.display_name()),
            shared: Arc::new(Shared {
                inner: Mutex::new(ProcessState::default()),
                listeners: Listeners::new(),
            }),
        }
    }

    /// Get the player type
    pub fn player_type(&self) -> PlayerType {
        self.player_type
    }

    /// Check if the player is available on the system
    pub async fn is_available(&self) -> bool {
        if self.command.starts_with('/') {
            return Path::new(&self.command).exists();
        }

        Command::new("which")
            .arg(&self.command)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false)
    }

    /// Arguments passed to the player for the given url
    pub fn args(&self, url: &str, subtitle: Option<&Path>, subtitle_delay_ms: i64) -> Vec<String> {
        let mut args = vec![url.to_string()];

        match self.player_type {
            PlayerType::Vlc => {
                if let Some(sub) = subtitle {
                    args.push("--sub-file".to_string());
                    args.push(sub.display().to_string());
                }
                if subtitle_delay_ms != 0 {
                    // VLC expects tenths of a second
                    args.push(format!("--sub-delay={}", subtitle_delay_ms / 100));
                }
                args.push("--no-video-title-show".to_string());
            }
            PlayerType::Mpv => {
                if let Some(sub) = subtitle {
                    args.push(format!("--sub-file={}", sub.display()));
                }
                if subtitle_delay_ms != 0 {
                    args.push(format!("--sub-delay={:.3}", subtitle_delay_ms as f64 / 1000.0));
                }
                args.push("--force-window=immediate".to_string());
            }
        }

        args
    }

    /// Spawn the player, replacing a running one
    fn launch(&self, url: &str) -> Result<(), PlayerError> {
        let (subtitle, delay) = {
            let inner = self.shared.inner.lock();
            (inner.subtitle.clone(), inner.subtitle_delay_ms)
        };

        if let Some(sub) = &subtitle {
            if !sub.exists() {
                return Err(PlayerError::SubtitleNotFound(sub.display().to_string()));
            }
        }

        let child = Command::new(&self.command)
            .args(self.args(url, subtitle.as_deref(), delay))
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    PlayerError::NotFound(self.command.clone())
                } else {
                    PlayerError::StartFailed(e)
                }
            })?;

        let (kill_tx, kill_rx) = oneshot::channel();
        let generation = {
            let mut inner = self.shared.inner.lock();
            inner.generation += 1;
            // dropping the previous sender kills the previous process
            inner.kill = Some(kill_tx);
            inner.url = Some(url.to_string());
            inner.error = None;
            inner.generation
        };

        info!("Launched {} for {}", self.player_type, url);
        self.shared.set_state(PlayerState::Playing);
        tokio::spawn(watch(
            self.shared.clone(),
            generation,
            child,
            kill_rx,
            self.player_type,
        ));
        Ok(())
    }

    fn running_url(&self) -> Option<String> {
        let inner = self.shared.inner.lock();
        inner.kill.as_ref().and(inner.url.clone())
    }
}

async fn watch(
    shared: Arc<Shared>,
    generation: u64,
    mut child: Child,
    kill_rx: oneshot::Receiver<()>,
    player_type: PlayerType,
) {
    tokio::select! {
        status = child.wait() => {
            match status {
                Ok(status) if status.success() => {
                    debug!("{} exited", player_type);
                    shared.exited(generation, PlayerState::Finished, None);
                }
                Ok(status) => {
                    let message = format!("{} exited with {}", player_type, status);
                    warn!("{}", message);
                    shared.exited(generation, PlayerState::Error, Some(message));
                }
                Err(e) => {
                    error!("Failed to wait for {}, {}", player_type, e);
                    shared.exited(generation, PlayerState::Error, Some(e.to_string()));
                }
            }
        }
        _ = kill_rx => {
            debug!("Killing {} process", player_type);
            if let Err(e) = child.kill().await {
                warn!("Failed to kill {}, {}", player_type, e);
            }
        }
    }
}

#[async_trait]
impl VideoBackend for ProcessBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn supports(&self, url: &str) -> bool {
        let lower = url.to_lowercase();
        lower.starts_with("http://")
            || lower.starts_with("https://")
            || lower.starts_with("file://")
            || Path::new(url).is_absolute()
    }

    async fn play(&self, url: &str) -> anyhow::Result<()> {
        if !self.supports(url) {
            return Err(PlayerError::UnsupportedUrl(url.to_string()).into());
        }

        {
            // subtitles belong to a single playback, the next one starts without
            let mut inner = self.shared.inner.lock();
            inner.subtitle = None;
            inner.subtitle_delay_ms = 0;
        }

        self.shared.set_state(PlayerState::Loading);
        if let Err(e) = self.launch(url) {
            {
                let mut inner = self.shared.inner.lock();
                inner.error = Some(e.to_string());
            }
            self.shared.set_state(PlayerState::Error);
            return Err(e.into());
        }
        Ok(())
    }

    fn pause(&self) {
        warn!("{} can't be paused from here, use the player window", self.player_type);
    }

    fn resume(&self) {
        warn!("{} can't be resumed from here, use the player window", self.player_type);
    }

    fn stop(&self) {
        {
            let mut inner = self.shared.inner.lock();
            inner.generation += 1;
            inner.url = None;
            inner.subtitle = None;
            inner.subtitle_delay_ms = 0;
            if let Some(kill) = inner.kill.take() {
                let _ = kill.send(());
            }
        }
        self.shared.set_state(PlayerState::Stopped);
    }

    fn seek(&self, time_ms: u64) {
        warn!("{} can't seek to {} ms from here", self.player_type, time_ms);
    }

    fn volume(&self, level: u8) {
        warn!("{} volume can't be set to {} from here", self.player_type, level);
    }

    fn state(&self) -> PlayerState {
        self.shared.inner.lock().state
    }

    fn error_info(&self) -> Option<String> {
        self.shared.inner.lock().error.clone()
    }

    fn supports_native_subtitle_file(&self) -> bool {
        true
    }

    /// Relaunches a running player when the subtitle changes
    fn subtitle_file(&self, path: Option<&Path>) {
        let subtitle = path.map(Path::to_path_buf);
        {
            let mut inner = self.shared.inner.lock();
            if inner.subtitle == subtitle {
                return;
            }
            inner.subtitle = subtitle;
        }

        if let Some(url) = self.running_url() {
            match path {
                Some(path) => info!("Reloading {} with subtitle {}", url, path.display()),
                None => info!("Reloading {} without subtitle", url),
            }
            if let Err(e) = self.launch(&url) {
                error!("Failed to reload {}, {}", url, e);
            }
        }
    }

    fn supports_native_subtitle_delay(&self) -> bool {
        true
    }

    fn subtitle_delay(&self, offset_ms: i64) {
        self.shared.inner.lock().subtitle_delay_ms = offset_ms;
        debug!("Subtitle delay of {} ms applies from the next launch", offset_ms);
    }

    fn add_listener(&self, listener: Arc<dyn PlayerListener>) {
        self.shared.listeners.add(listener);
    }

    fn remove_listener(&self, listener: &Arc<dyn PlayerListener>) {
        self.shared.listeners.remove(listener);
    }

    fn dispose(&self) -> anyhow::Result<()> {
        if self.running_url().is_some() {
            self.stop();
        }
        Ok(())
    }
}
