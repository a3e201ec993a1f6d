//! Playback event fan-out
//!
//! The [`PlaybackEventHub`] follows the active player of the
//! [`PlayerRegistry`] and the torrent stream of the current request, and
//! republishes their events to a set of [`PlaybackObserver`]s.
//!
//! - player subscriptions are rewired on every active player change
//! - at most one stream subscription is live at a time
//! - a panicking observer never blocks delivery to the others

use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, info, trace, warn};

use crate::models::{DownloadStatus, PlaybackRequest, PlayerState, StreamHandle, StreamState};
use crate::playback::listeners::{Listeners, PlayerListener};
use crate::playback::players::{Player, PlayerChange, PlayerRegistry, PlayerRegistryListener};
use crate::stream::torrent::{StreamListener, StreamSource};

/// Step used by [`PlaybackEventHub::go_back`] and [`PlaybackEventHub::go_forward`]
pub const SEEK_STEP_MS: u64 = 10_000;

const DEFAULT_VOLUME: u8 = 100;

/// Information published when a playback starts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayStarted {
    pub title: String,
    pub caption: Option<String>,
    pub quality: Option<String>,
}

impl From<&PlaybackRequest> for PlayStarted {
    fn from(request: &PlaybackRequest) -> Self {
        Self {
            title: request.title().to_string(),
            caption: request.caption().map(str::to_string),
            quality: request.quality().map(str::to_string),
        }
    }
}

/// Observer of the current playback
pub trait PlaybackObserver: Send + Sync {
    fn on_play_started(&self, _info: &PlayStarted) {}

    fn on_state_changed(&self, _state: PlayerState) {}

    fn on_time_changed(&self, _time_ms: u64) {}

    fn on_duration_changed(&self, _duration_ms: u64) {}

    fn on_volume_changed(&self, _volume: u8) {}

    fn on_download_status(&self, _status: &DownloadStatus) {}

    fn on_stream_state_changed(&self, _state: &StreamState) {}
}

/// State shared between the hub and its relays
struct Shared {
    observers: Listeners<dyn PlaybackObserver>,
    /// Attachment epoch, read while delivering and written on rewire
    epoch: RwLock<u64>,
    last_time: AtomicU64,
    volume: AtomicU8,
}

/// Relays the events of one player attachment.
///
/// Delivery holds the epoch for reading, so a rewire waits for it and the
/// old player is silent once the rewire returns.
struct PlayerRelay {
    epoch: u64,
    shared: Arc<Shared>,
}

impl PlayerRelay {
    fn deliver(&self, f: impl FnOnce(&Shared)) {
        let current = self.shared.epoch.read_recursive();
        if *current == self.epoch {
            f(&self.shared);
        }
    }
}

impl PlayerListener for PlayerRelay {
    fn on_state_changed(&self, state: PlayerState) {
        self.deliver(|shared| {
            trace!("Player state changed to {:?}", state);
            shared.observers.invoke(|o| o.on_state_changed(state));
        });
    }

    fn on_time_changed(&self, time_ms: u64) {
        self.deliver(|shared| {
            shared.last_time.store(time_ms, Ordering::SeqCst);
            shared.observers.invoke(|o| o.on_time_changed(time_ms));
        });
    }

    fn on_duration_changed(&self, duration_ms: u64) {
        self.deliver(|shared| {
            shared
                .observers
                .invoke(|o| o.on_duration_changed(duration_ms));
        });
    }

    fn on_volume_changed(&self, volume: u8) {
        self.deliver(|shared| {
            shared.volume.store(volume, Ordering::SeqCst);
            shared.observers.invoke(|o| o.on_volume_changed(volume));
        });
    }
}

struct StreamRelay {
    shared: Arc<Shared>,
}

impl StreamListener for StreamRelay {
    fn on_stream_state_changed(&self, state: &StreamState) {
        self.shared
            .observers
            .invoke(|o| o.on_stream_state_changed(state));
    }

    fn on_download_status(&self, status: &DownloadStatus) {
        self.shared.observers.invoke(|o| o.on_download_status(status));
    }
}

/// Rewires the hub when the registry's active player changes
struct ActivePlayerWatcher {
    hub: Weak<PlaybackEventHub>,
}

impl PlayerRegistryListener for ActivePlayerWatcher {
    fn on_active_player_changed(&self, change: &PlayerChange) {
        if let Some(hub) = self.hub.upgrade() {
            debug!("Rewiring playback events to player {:?}", change.new_id);
            let player = change
                .new_id
                .as_deref()
                .and_then(|id| hub.players.get_by_id(id));
            hub.attach_player(player);
        }
    }
}

#[derive(Default)]
struct Subscriptions {
    player: Option<(Arc<dyn Player>, Arc<dyn PlayerListener>)>,
    stream: Option<(StreamHandle, Arc<dyn StreamListener>)>,
}

/// Fans out player and stream events of the current playback
pub struct PlaybackEventHub {
    players: Arc<PlayerRegistry>,
    streams: Arc<dyn StreamSource>,
    shared: Arc<Shared>,
    subscriptions: Mutex<Subscriptions>,
    watcher: Mutex<Option<Arc<dyn PlayerRegistryListener>>>,
}

impl PlaybackEventHub {
    /// Create the hub and attach it to the registry's active player
    pub fn new(players: Arc<PlayerRegistry>, streams: Arc<dyn StreamSource>) -> Arc<Self> {
        let hub = Arc::new(Self {
            players,
            streams,
            shared: Arc::new(Shared {
                observers: Listeners::new(),
                epoch: RwLock::new(0),
                last_time: AtomicU64::new(0),
                volume: AtomicU8::new(DEFAULT_VOLUME),
            }),
            subscriptions: Mutex::new(Subscriptions::default()),
            watcher: Mutex::new(None),
        });

        let watcher: Arc<dyn PlayerRegistryListener> = Arc::new(ActivePlayerWatcher {
            hub: Arc::downgrade(&hub),
        });
        hub.players.add_listener(watcher.clone());
        *hub.watcher.lock() = Some(watcher);
        hub.attach_player(hub.players.active());

        hub
    }

    pub fn add_observer(&self, observer: Arc<dyn PlaybackObserver>) {
        self.shared.observers.add(observer);
    }

    pub fn remove_observer(&self, observer: &Arc<dyn PlaybackObserver>) {
        self.shared.observers.remove(observer);
    }

    pub fn observer_count(&self) -> usize {
        self.shared.observers.len()
    }

    /// Publish the play start and move the stream subscription to the
    /// request's stream.
    pub fn on_play_request(&self, request: &PlaybackRequest) {
        info!("Playback requested for {}", request);
        self.shared
            .last_time
            .store(request.auto_resume_timestamp().unwrap_or(0), Ordering::SeqCst);

        self.subscribe_stream(request.stream_handle());

        let started = PlayStarted::from(request);
        self.shared.observers.invoke(|o| o.on_play_started(&started));
    }

    /// Handle of the stream currently subscribed to
    pub fn current_stream(&self) -> Option<StreamHandle> {
        self.subscriptions.lock().stream.as_ref().map(|(h, _)| *h)
    }

    /// Last playback position seen from the active player
    pub fn last_time(&self) -> u64 {
        self.shared.last_time.load(Ordering::SeqCst)
    }

    pub fn volume(&self) -> u8 {
        self.shared.volume.load(Ordering::SeqCst)
    }

    /// Resume when paused, pause otherwise
    pub fn toggle_playback_state(&self) {
        let Some(player) = self.players.active() else {
            warn!("Unable to toggle playback, no active player");
            return;
        };

        if player.state() == PlayerState::Paused {
            player.resume();
        } else {
            player.pause();
        }
    }

    /// Stop the active player and drop the stream subscription
    pub fn close_player(&self) {
        if let Some(player) = self.players.active() {
            debug!("Closing player {}", player.id());
            player.stop();
        }
        self.subscribe_stream(None);
    }

    pub fn go_back(&self) {
        self.seek(self.last_time().saturating_sub(SEEK_STEP_MS));
    }

    pub fn go_forward(&self) {
        self.seek(self.last_time().saturating_add(SEEK_STEP_MS));
    }

    /// Change the volume by `delta`, clamped to 0-100
    pub fn on_volume_scroll(&self, delta: i16) {
        let volume = (i16::from(self.volume()) + delta).clamp(0, 100) as u8;
        self.shared.volume.store(volume, Ordering::SeqCst);

        if let Some(player) = self.players.active() {
            player.volume(volume);
        }
    }

    /// Detach from the player registry, the active player and the stream
    pub fn detach(&self) {
        if let Some(watcher) = self.watcher.lock().take() {
            self.players.remove_listener(&watcher);
        }
        self.attach_player(None);
        self.subscribe_stream(None);
    }

    fn seek(&self, time_ms: u64) {
        match self.players.active() {
            Some(player) => player.seek(time_ms),
            None => warn!("Unable to seek, no active player"),
        }
    }

    fn attach_player(&self, player: Option<Arc<dyn Player>>) {
        // waits for deliveries in progress, which may need `subscriptions`
        let epoch = {
            let mut current = self.shared.epoch.write();
            *current += 1;
            *current
        };

        let mut subscriptions = self.subscriptions.lock();
        if *self.shared.epoch.read_recursive() != epoch {
            trace!("Rewire to epoch {} superseded", epoch);
            return;
        }

        if let Some((old, relay)) = subscriptions.player.take() {
            trace!("Detaching from player {}", old.id());
            old.remove_listener(&relay);
        }

        if let Some(player) = player {
            let relay: Arc<dyn PlayerListener> = Arc::new(PlayerRelay {
                epoch,
                shared: self.shared.clone(),
            });
            player.add_listener(relay.clone());
            debug!("Attached to player {} (epoch {})", player.id(), epoch);
            subscriptions.player = Some((player, relay));
        }
    }

    fn subscribe_stream(&self, handle: Option<StreamHandle>) {
        let mut subscriptions = self.subscriptions.lock();

        let current = subscriptions.stream.as_ref().map(|(h, _)| *h);
        if current == handle {
            return;
        }

        if let Some((old, relay)) = subscriptions.stream.take() {
            trace!("Removing listener of stream {}", old);
            self.streams.remove_listener(old, &relay);
        }

        if let Some(handle) = handle {
            let relay: Arc<dyn StreamListener> = Arc::new(StreamRelay {
                shared: self.shared.clone(),
            });
            self.streams.add_listener(handle, relay.clone());
            debug!("Listening to stream {}", handle);
            subscriptions.stream = Some((handle, relay));
        }
    }
}

impl fmt::Debug for PlaybackEventHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlaybackEventHub")
            .field("observers", &self.observer_count())
            .field("stream", &self.current_stream())
            .field("last_time", &self.last_time())
            .finish()
    }
}
