//! Chromecast control via catt CLI
//!
//! Exposes a Chromecast as a logical [`Player`]. Every control runs the
//! matching `catt` command; playback progress is read back with
//! `catt status`.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::models::{CastDevice, PlaybackRequest, PlaybackStatus, PlayerState};
use crate::playback::listeners::{Listeners, PlayerListener};
use crate::playback::players::Player;

const DEFAULT_CATT: &str = "catt";

/// Errors from Chromecast control
#[derive(Debug, Error)]
pub enum CastError {
    #[error("catt not found. Install with: pip install catt")]
    CattNotFound,
    #[error("No Chromecast devices found")]
    NoDevices,
    #[error("catt {command} failed: {stderr}")]
    CommandFailed { command: String, stderr: String },
    #[error("catt status output not recognized")]
    InvalidStatus,
    #[error("catt error: {0}")]
    Io(#[from] std::io::Error),
}

/// Discover Chromecast devices on the network
pub async fn discover() -> Result<Vec<CastDevice>, CastError> {
    discover_with(DEFAULT_CATT).await
}

/// Discover using a custom catt binary
pub async fn discover_with(catt_path: &str) -> Result<Vec<CastDevice>, CastError> {
    let output = run_catt(catt_path, &["scan".to_string()]).await?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    let mut devices = CastDevice::parse_catt_scan(&stdout);
    if devices.is_empty() {
        // catt sometimes reports devices on stderr
        devices = CastDevice::parse_catt_scan(&String::from_utf8_lossy(&output.stderr));
    }

    if devices.is_empty() {
        return Err(CastError::NoDevices);
    }
    info!("Discovered {} Chromecast devices", devices.len());
    Ok(devices)
}

async fn run_catt(catt_path: &str, args: &[String]) -> Result<std::process::Output, CastError> {
    trace!("Running {} {}", catt_path, args.join(" "));
    Command::new(catt_path).args(args).output().await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            CastError::CattNotFound
        } else {
            CastError::Io(e)
        }
    })
}

#[derive(Default)]
struct CastSession {
    state: PlayerState,
    request: Option<PlaybackRequest>,
    status: Option<PlaybackStatus>,
}

/// Chromecast device as logical player
pub struct CastPlayer {
    id: String,
    device: String,
    catt_path: String,
    listeners: Listeners<dyn PlayerListener>,
    session: Mutex<CastSession>,
}

impl CastPlayer {
    /// Create a player for the named device
    pub fn new(device: impl Into<String>) -> Self {
        Self::with_path(device, DEFAULT_CATT)
    }

    /// Create with custom catt path
    pub fn with_path(device: impl Into<String>, catt_path: impl Into<String>) -> Self {
        let device = device.into();
        Self {
            id: format!("chromecast:{}", device),
            device,
            catt_path: catt_path.into(),
            listeners: Listeners::new(),
            session: Mutex::new(CastSession::default()),
        }
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    /// catt arguments targeting this device
    pub fn args(&self, action: &[&str]) -> Vec<String> {
        let mut args = vec!["-d".to_string(), self.device.clone()];
        args.extend(action.iter().map(|a| a.to_string()));
        args
    }

    /// Last status read from the device
    pub fn last_status(&self) -> Option<PlaybackStatus> {
        self.session.lock().status.clone()
    }

    async fn run(&self, action: &[&str]) -> Result<String, CastError> {
        let output = run_catt(&self.catt_path, &self.args(action)).await?;

        if !output.status.success() {
            return Err(CastError::CommandFailed {
                command: action.join(" "),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Run a control command in the background
    fn spawn_control(&self, action: Vec<String>) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("Unable to run catt {}, no async runtime", action.join(" "));
            return;
        };

        let catt_path = self.catt_path.clone();
        let mut args = self.args(&[]);
        args.extend(action);
        runtime.spawn(async move {
            match run_catt(&catt_path, &args).await {
                Ok(output) if output.status.success() => trace!("catt {} done", args.join(" ")),
                Ok(output) => warn!(
                    "catt {} failed: {}",
                    args.join(" "),
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
                Err(e) => warn!("catt {} failed: {}", args.join(" "), e),
            }
        });
    }

    fn set_state(&self, state: PlayerState) {
        let changed = {
            let mut session = self.session.lock();
            let changed = session.state != state;
            session.state = state;
            changed
        };
        if changed {
            self.listeners.invoke(|l| l.on_state_changed(state));
        }
    }

    /// Read the device status and publish it to the listeners
    pub async fn poll_status(&self) -> Result<PlaybackStatus, CastError> {
        let stdout = self.run(&["status"]).await?;
        let status = PlaybackStatus::parse_catt_status(&stdout).ok_or(CastError::InvalidStatus)?;

        self.session.lock().status = Some(status.clone());
        self.set_state(status.state);
        let time = status.position.as_millis() as u64;
        let duration = status.duration.as_millis() as u64;
        let volume = status.volume_percent();
        self.listeners.invoke(|l| {
            l.on_duration_changed(duration);
            l.on_time_changed(time);
            l.on_volume_changed(volume);
        });

        Ok(status)
    }

    /// Poll the status every `interval` while the player is alive and playing
    pub fn spawn_status_poller(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let player: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let Some(player) = player.upgrade() else {
                    break;
                };
                if player.state().is_terminal() {
                    break;
                }
                if let Err(e) = player.poll_status().await {
                    debug!("Failed to poll {}, {}", player.id, e);
                }
            }
        })
    }
}

#[async_trait]
impl Player for CastPlayer {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.device
    }

    fn description(&self) -> &str {
        "Chromecast device"
    }

    fn supports_embedded_playback(&self) -> bool {
        false
    }

    fn state(&self) -> PlayerState {
        self.session.lock().state
    }

    fn request(&self) -> Option<PlaybackRequest> {
        self.session.lock().request.clone()
    }

    async fn play(&self, request: PlaybackRequest) -> anyhow::Result<()> {
        self.session.lock().request = Some(request.clone());
        self.set_state(PlayerState::Loading);

        match self.run(&["cast", request.url()]).await {
            Ok(_) => {
                info!("Casting {} to {}", request, self.device);
                self.set_state(PlayerState::Playing);
                Ok(())
            }
            Err(e) => {
                self.set_state(PlayerState::Error);
                Err(e.into())
            }
        }
    }

    fn pause(&self) {
        self.spawn_control(vec!["pause".into()]);
        self.set_state(PlayerState::Paused);
    }

    fn resume(&self) {
        self.spawn_control(vec!["play".into()]);
        self.set_state(PlayerState::Playing);
    }

    fn stop(&self) {
        self.spawn_control(vec!["stop".into()]);
        self.session.lock().request = None;
        self.set_state(PlayerState::Stopped);
    }

    fn seek(&self, time_ms: u64) {
        self.spawn_control(vec!["seek".into(), (time_ms / 1000).to_string()]);
    }

    fn volume(&self, level: u8) {
        self.spawn_control(vec!["volume".into(), level.min(100).to_string()]);
    }

    fn add_listener(&self, listener: Arc<dyn PlayerListener>) {
        self.listeners.add(listener);
    }

    fn remove_listener(&self, listener: &Arc<dyn PlayerListener>) {
        self.listeners.remove(listener);
    }

    fn dispose(&self) -> anyhow::Result<()> {
        if !self.state().is_terminal() && self.state() != PlayerState::Unknown {
            self.stop();
        }
        Ok(())
    }
}
