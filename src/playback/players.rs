//! Logical players and the active-player registry
//!
//! A logical player is an addressable playback target: the in-process
//! [`InternalPlayer`] backed by the [`BackendRegistry`], or an external one
//! such as a Chromecast. The [`PlayerRegistry`] tracks which one is active.

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, trace, warn};

use crate::models::{PlaybackRequest, PlayerState};
use crate::playback::listeners::{Listeners, PlayerListener};
use crate::stream::backend::BackendRegistry;

/// Identifier of the in-process player
pub const INTERNAL_PLAYER_ID: &str = "internalPlayer";

/// Errors from the player registry
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Player {0} already exists")]
    PlayerAlreadyExists(String),
    #[error("Player {0} not found")]
    PlayerNotFound(String),
}

/// An addressable playback target
#[async_trait]
pub trait Player: Send + Sync {
    /// Stable unique identifier
    fn id(&self) -> &str;

    /// Display name
    fn name(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    /// Whether playback is rendered inside the application
    fn supports_embedded_playback(&self) -> bool;

    fn state(&self) -> PlayerState;

    /// The request currently being played
    fn request(&self) -> Option<PlaybackRequest>;

    async fn play(&self, request: PlaybackRequest) -> anyhow::Result<()>;

    fn pause(&self);

    fn resume(&self);

    fn stop(&self);

    /// Seek to the given position in milliseconds
    fn seek(&self, time_ms: u64);

    /// Set the volume (0-100)
    fn volume(&self, level: u8);

    fn add_listener(&self, listener: Arc<dyn PlayerListener>);

    fn remove_listener(&self, listener: &Arc<dyn PlayerListener>);

    fn dispose(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Active player transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerChange {
    pub old_id: Option<String>,
    pub new_id: Option<String>,
    pub new_name: Option<String>,
}

/// Events of the player registry
pub trait PlayerRegistryListener: Send + Sync {
    fn on_active_player_changed(&self, _change: &PlayerChange) {}

    /// A player was registered or unregistered
    fn on_players_changed(&self) {}
}

// =============================================================================
// Registry
// =============================================================================

/// Registry of logical players with at most one active player
pub struct PlayerRegistry {
    players: RwLock<Vec<Arc<dyn Player>>>,
    active: RwLock<Option<Arc<dyn Player>>>,
    listeners: Listeners<dyn PlayerRegistryListener>,
    disposed: AtomicBool,
}

impl PlayerRegistry {
    pub fn new() -> Self {
        Self {
            players: RwLock::new(Vec::new()),
            active: RwLock::new(None),
            listeners: Listeners::new(),
            disposed: AtomicBool::new(false),
        }
    }

    /// Register a player, the id must be unique
    pub fn register(&self, player: Arc<dyn Player>) -> Result<(), RegistryError> {
        {
            let mut players = self.players.write();
            if players.iter().any(|p| p.id() == player.id()) {
                warn!("Player {} has already been registered", player.id());
                return Err(RegistryError::PlayerAlreadyExists(player.id().to_string()));
            }

            info!("Registering player {} ({})", player.id(), player.name());
            players.push(player);
        }

        self.listeners.invoke(|l| l.on_players_changed());
        Ok(())
    }

    /// Remove a player; clears the active player when it was the one removed
    pub fn unregister(&self, id: &str) -> Option<Arc<dyn Player>> {
        let removed = {
            let mut players = self.players.write();
            let position = players.iter().position(|p| p.id() == id)?;
            players.remove(position)
        };
        info!("Unregistered player {}", id);

        let cleared = {
            let mut active = self.active.write();
            if active.as_ref().is_some_and(|p| p.id() == id) {
                *active = None;
                true
            } else {
                false
            }
        };

        if cleared {
            let change = PlayerChange {
                old_id: Some(id.to_string()),
                new_id: None,
                new_name: None,
            };
            self.listeners.invoke(|l| l.on_active_player_changed(&change));
        }
        self.listeners.invoke(|l| l.on_players_changed());
        Some(removed)
    }

    pub fn get_by_id(&self, id: &str) -> Option<Arc<dyn Player>> {
        self.players.read().iter().find(|p| p.id() == id).cloned()
    }

    /// All players in registration order
    pub fn list(&self) -> Vec<Arc<dyn Player>> {
        self.players.read().clone()
    }

    /// Activate the player with the given id, `None` clears the active player
    pub fn set_active(&self, id: Option<&str>) -> Result<(), RegistryError> {
        let new_player = match id {
            Some(id) => Some(
                self.get_by_id(id)
                    .ok_or_else(|| RegistryError::PlayerNotFound(id.to_string()))?,
            ),
            None => None,
        };

        let change = {
            let mut active = self.active.write();
            let old_id = active.as_ref().map(|p| p.id().to_string());
            let new_id = new_player.as_ref().map(|p| p.id().to_string());

            if old_id == new_id {
                trace!("Player {:?} is already active", new_id);
                return Ok(());
            }

            let change = PlayerChange {
                old_id,
                new_id,
                new_name: new_player.as_ref().map(|p| p.name().to_string()),
            };
            *active = new_player;
            change
        };

        info!(
            "Active player changed from {:?} to {:?}",
            change.old_id, change.new_id
        );
        self.listeners.invoke(|l| l.on_active_player_changed(&change));
        Ok(())
    }

    pub fn active(&self) -> Option<Arc<dyn Player>> {
        self.active.read().clone()
    }

    pub fn add_listener(&self, listener: Arc<dyn PlayerRegistryListener>) {
        self.listeners.add(listener);
    }

    pub fn remove_listener(&self, listener: &Arc<dyn PlayerRegistryListener>) {
        self.listeners.remove(listener);
    }

    /// Dispose every player once, in registration order.
    ///
    /// A failing player is logged and the remaining ones are still disposed.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            debug!("Player registry already disposed");
            return;
        }

        *self.active.write() = None;
        let players = self.list();
        debug!("Disposing {} players", players.len());

        for player in players {
            if let Err(e) = player.dispose() {
                error!("Failed to dispose player {}, {}", player.id(), e);
            }
        }
    }
}

impl Default for PlayerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for PlayerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ids: Vec<String> = self.list().iter().map(|p| p.id().to_string()).collect();
        f.debug_struct("PlayerRegistry")
            .field("players", &ids)
            .field("active", &self.active().map(|p| p.id().to_string()))
            .finish()
    }
}

// =============================================================================
// Internal Player
// =============================================================================

/// In-process player delegating to the active video backend
pub struct InternalPlayer {
    backends: Arc<BackendRegistry>,
    request: Mutex<Option<PlaybackRequest>>,
}

impl InternalPlayer {
    pub fn new(backends: Arc<BackendRegistry>) -> Self {
        Self {
            backends,
            request: Mutex::new(None),
        }
    }

    pub fn backends(&self) -> &Arc<BackendRegistry> {
        &self.backends
    }
}

#[async_trait]
impl Player for InternalPlayer {
    fn id(&self) -> &str {
        INTERNAL_PLAYER_ID
    }

    fn name(&self) -> &str {
        "Streamplay"
    }

    fn description(&self) -> &str {
        "Plays streams on this machine"
    }

    fn supports_embedded_playback(&self) -> bool {
        true
    }

    fn state(&self) -> PlayerState {
        self.backends.state()
    }

    fn request(&self) -> Option<PlaybackRequest> {
        self.request.lock().clone()
    }

    async fn play(&self, request: PlaybackRequest) -> anyhow::Result<()> {
        *self.request.lock() = Some(request.clone());
        let handle = self.backends.select_and_activate(&request).await?;
        debug!("Playing {} on backend {}", request, handle.name());
        Ok(())
    }

    fn pause(&self) {
        self.backends.pause();
    }

    fn resume(&self) {
        self.backends.resume();
    }

    fn stop(&self) {
        self.backends.stop();
        *self.request.lock() = None;
    }

    fn seek(&self, time_ms: u64) {
        self.backends.seek(time_ms);
    }

    fn volume(&self, level: u8) {
        self.backends.volume(level);
    }

    fn add_listener(&self, listener: Arc<dyn PlayerListener>) {
        self.backends.add_listener(listener);
    }

    fn remove_listener(&self, listener: &Arc<dyn PlayerListener>) {
        self.backends.remove_listener(listener);
    }

    fn dispose(&self) -> anyhow::Result<()> {
        self.backends.dispose();
        Ok(())
    }
}
