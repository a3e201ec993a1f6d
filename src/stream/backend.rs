//! Video backends and backend selection
//!
//! A backend is a concrete playback engine for a class of stream URLs
//! (a local VLC/mpv process, an embedded renderer, ...). The
//! [`BackendRegistry`] keeps them in registration order, picks the first one
//! supporting a URL and relays its events to the registry's own listeners,
//! so observers keep receiving events across backend switches.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, trace, warn};

use crate::models::{PlaybackRequest, PlayerState};
use crate::playback::listeners::{Listeners, PlayerListener};

/// Errors from backend selection
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("No compatible backend found for {url}")]
    NoCompatibleBackend { url: String },
    #[error("Failed to start playback of {url}: {source}")]
    PlaybackStart {
        url: String,
        #[source]
        source: anyhow::Error,
    },
}

impl BackendError {
    /// The stream URL the error relates to
    pub fn url(&self) -> &str {
        match self {
            BackendError::NoCompatibleBackend { url } => url,
            BackendError::PlaybackStart { url, .. } => url,
        }
    }
}

/// Capability interface of a playback engine
#[async_trait]
pub trait VideoBackend: Send + Sync {
    /// Display name used in logs
    fn name(&self) -> &str;

    /// Whether this backend can render the given URL
    fn supports(&self, url: &str) -> bool;

    /// Start playback of the URL; returns once the backend accepted it
    async fn play(&self, url: &str) -> anyhow::Result<()>;

    fn pause(&self);

    fn resume(&self);

    fn stop(&self);

    /// Seek to the given position in milliseconds
    fn seek(&self, time_ms: u64);

    /// Set the volume (0-100)
    fn volume(&self, level: u8);

    fn state(&self) -> PlayerState;

    /// Description of the last failure, if any
    fn error_info(&self) -> Option<String>;

    /// Whether the backend renders subtitle files itself
    fn supports_native_subtitle_file(&self) -> bool {
        false
    }

    /// Load a subtitle file into the native renderer, `None` unloads it
    fn subtitle_file(&self, _path: Option<&Path>) {}

    /// Whether the backend can shift subtitles itself
    fn supports_native_subtitle_delay(&self) -> bool {
        false
    }

    /// Native subtitle delay in milliseconds
    fn subtitle_delay(&self, _offset_ms: i64) {}

    fn add_listener(&self, listener: Arc<dyn PlayerListener>);

    fn remove_listener(&self, listener: &Arc<dyn PlayerListener>);

    /// Release the backend's resources on shutdown
    fn dispose(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Result of a successful backend selection
#[derive(Clone)]
pub struct ActiveBackendHandle {
    backend: Arc<dyn VideoBackend>,
    epoch: u64,
}

impl ActiveBackendHandle {
    pub fn backend(&self) -> &Arc<dyn VideoBackend> {
        &self.backend
    }

    pub fn name(&self) -> &str {
        self.backend.name()
    }

    /// Activation sequence number, increases on every backend switch
    pub fn epoch(&self) -> u64 {
        self.epoch
    }
}

impl fmt::Debug for ActiveBackendHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActiveBackendHandle")
            .field("backend", &self.backend.name())
            .field("epoch", &self.epoch)
            .finish()
    }
}

/// Forwards events of one activation; goes silent once a newer backend
/// has been activated.
///
/// Events are delivered while holding the epoch for reading. A switch takes
/// it for writing, so it waits for deliveries in progress and no event of
/// the old backend gets through once the switch returns.
struct BackendRelay {
    epoch: u64,
    current: Arc<RwLock<u64>>,
    listeners: Arc<Listeners<dyn PlayerListener>>,
}

impl BackendRelay {
    fn deliver(&self, f: impl Fn(&(dyn PlayerListener + 'static))) {
        // recursive, a listener may trigger another event of the same backend
        let current = self.current.read_recursive();
        if *current == self.epoch {
            self.listeners.invoke(f);
        }
    }
}

impl PlayerListener for BackendRelay {
    fn on_state_changed(&self, state: PlayerState) {
        self.deliver(|l| l.on_state_changed(state));
    }

    fn on_time_changed(&self, time_ms: u64) {
        self.deliver(|l| l.on_time_changed(time_ms));
    }

    fn on_duration_changed(&self, duration_ms: u64) {
        self.deliver(|l| l.on_duration_changed(duration_ms));
    }

    fn on_volume_changed(&self, volume: u8) {
        self.deliver(|l| l.on_volume_changed(volume));
    }
}

struct Activation {
    backend: Arc<dyn VideoBackend>,
    relay: Arc<dyn PlayerListener>,
    epoch: u64,
}

/// Ordered set of backends with a single active one
pub struct BackendRegistry {
    backends: RwLock<Vec<Arc<dyn VideoBackend>>>,
    active: RwLock<Option<Activation>>,
    /// Serializes switch + play
    switch: tokio::sync::Mutex<()>,
    epoch: Arc<RwLock<u64>>,
    listeners: Arc<Listeners<dyn PlayerListener>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self {
            backends: RwLock::new(Vec::new()),
            active: RwLock::new(None),
            switch: tokio::sync::Mutex::new(()),
            epoch: Arc::new(RwLock::new(0)),
            listeners: Arc::new(Listeners::new()),
        }
    }

    /// Create a registry with the given backends, in priority order
    pub fn with_backends(backends: Vec<Arc<dyn VideoBackend>>) -> Self {
        let registry = Self::new();
        for backend in backends {
            registry.register(backend);
        }
        registry
    }

    /// Append a backend; earlier registrations win on overlapping support
    pub fn register(&self, backend: Arc<dyn VideoBackend>) {
        info!("Registering video backend {}", backend.name());
        self.backends.write().push(backend);
    }

    pub fn backends(&self) -> Vec<Arc<dyn VideoBackend>> {
        self.backends.read().clone()
    }

    /// Whether any registered backend supports the URL
    pub fn supports(&self, url: &str) -> bool {
        self.find(url).is_some()
    }

    /// First backend, in registration order, supporting the URL
    pub fn find(&self, url: &str) -> Option<Arc<dyn VideoBackend>> {
        if url.trim().is_empty() {
            return None;
        }
        self.backends
            .read()
            .iter()
            .find(|b| b.supports(url))
            .cloned()
    }

    /// The currently active backend
    pub fn active(&self) -> Option<Arc<dyn VideoBackend>> {
        self.active.read().as_ref().map(|a| a.backend.clone())
    }

    /// Listen to the events of whichever backend is active
    pub fn add_listener(&self, listener: Arc<dyn PlayerListener>) {
        self.listeners.add(listener);
    }

    pub fn remove_listener(&self, listener: &Arc<dyn PlayerListener>) {
        self.listeners.remove(listener);
    }

    /// Select the backend for the request, activate it and start playback.
    ///
    /// Switching detaches the old backend before the new one is attached,
    /// and attaches before `play` is invoked.
    pub async fn select_and_activate(
        &self,
        request: &PlaybackRequest,
    ) -> Result<ActiveBackendHandle, BackendError> {
        let url = request.url();
        let _guard = self.switch.lock().await;

        let backend = self.find(url).ok_or_else(|| {
            warn!("No compatible backend found for {}", url);
            BackendError::NoCompatibleBackend {
                url: url.to_string(),
            }
        })?;
        debug!("Selected backend {} for {}", backend.name(), url);

        let epoch = self.activate(&backend);
        self.listeners
            .invoke(|l| l.on_state_changed(PlayerState::Loading));

        backend.play(url).await.map_err(|source| {
            error!("Backend {} failed to play {}, {}", backend.name(), url, source);
            BackendError::PlaybackStart {
                url: url.to_string(),
                source,
            }
        })?;

        if let Some(timestamp) = request.auto_resume_timestamp() {
            debug!("Resuming {} at {} ms", url, timestamp);
            backend.seek(timestamp);
        }

        Ok(ActiveBackendHandle { backend, epoch })
    }

    /// Make the backend active, returns the activation epoch
    fn activate(&self, backend: &Arc<dyn VideoBackend>) -> u64 {
        if let Some(current) = self.active.read().as_ref() {
            if Arc::ptr_eq(&current.backend, backend) {
                trace!("Backend {} is already active", backend.name());
                return current.epoch;
            }
        }

        // waits for deliveries of the old backend, not while holding `active`
        let epoch = self.bump_epoch();

        let mut active = self.active.write();
        if let Some(old) = active.take() {
            debug!("Detaching backend {}", old.backend.name());
            old.backend.remove_listener(&old.relay);
        }

        let relay: Arc<dyn PlayerListener> = Arc::new(BackendRelay {
            epoch,
            current: self.epoch.clone(),
            listeners: self.listeners.clone(),
        });
        backend.add_listener(relay.clone());
        info!("Activated backend {} (epoch {})", backend.name(), epoch);

        *active = Some(Activation {
            backend: backend.clone(),
            relay,
            epoch,
        });
        epoch
    }

    fn bump_epoch(&self) -> u64 {
        let mut current = self.epoch.write();
        *current += 1;
        *current
    }

    pub fn pause(&self) {
        if let Some(backend) = self.active() {
            backend.pause();
        }
    }

    pub fn resume(&self) {
        if let Some(backend) = self.active() {
            backend.resume();
        }
    }

    pub fn stop(&self) {
        if let Some(backend) = self.active() {
            backend.stop();
        }
    }

    pub fn seek(&self, time_ms: u64) {
        if let Some(backend) = self.active() {
            backend.seek(time_ms);
        }
    }

    pub fn volume(&self, level: u8) {
        if let Some(backend) = self.active() {
            backend.volume(level);
        }
    }

    /// State of the active backend, `Unknown` when none is active
    pub fn state(&self) -> PlayerState {
        self.active()
            .map(|b| b.state())
            .unwrap_or(PlayerState::Unknown)
    }

    /// Dispose every backend; failures are logged and don't stop the others
    pub fn dispose(&self) {
        self.bump_epoch();
        let old = self.active.write().take();
        if let Some(old) = old {
            old.backend.remove_listener(&old.relay);
        }

        for backend in self.backends.read().iter() {
            debug!("Disposing backend {}", backend.name());
            if let Err(e) = backend.dispose() {
                error!("Failed to dispose backend {}, {}", backend.name(), e);
            }
        }
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self
            .backends
            .read()
            .iter()
            .map(|b| b.name().to_string())
            .collect();
        f.debug_struct("BackendRegistry")
            .field("backends", &names)
            .field("active", &self.active().map(|b| b.name().to_string()))
            .finish()
    }
}
