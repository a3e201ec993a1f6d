//! Subtitle synchronization
//!
//! Keeps the active subtitle in line with the current playback. Two triggers
//! start a resolution:
//! - a new play request with subtitles enabled
//! - a change of the user's [`SubtitlePreference`]
//!
//! Every resolution runs under a monotonic epoch. Each await point re-checks
//! the epoch and results of superseded resolutions are dropped.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::config::{SettingsProvider, SubtitleSettings};
use crate::models::{
    filename_without_extension, Media, PlaybackRequest, SubtitleInfo, SubtitleMatcher,
    SubtitlePreference, SubtitleTrack,
};
use crate::playback::listeners::{Listeners, Notification, Notifier};
use crate::stream::backend::BackendRegistry;
use crate::stream::subtitles::SubtitleError;

/// How the available subtitles of a playback are looked up
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubtitleLookup {
    /// Only the stream's filename is known
    Filename(String),
    /// Movie or episode identified by IMDB id
    Media {
        imdb_id: String,
        season: Option<u8>,
        episode: Option<u8>,
    },
}

impl SubtitleLookup {
    /// Derive the lookup from the request's media, or its filename
    pub fn for_request(request: &PlaybackRequest) -> Self {
        match request.media() {
            Some(Media::Episode(e)) => SubtitleLookup::Media {
                imdb_id: e.show.imdb_id.clone(),
                season: Some(e.episode.season),
                episode: Some(e.episode.episode),
            },
            Some(media @ Media::Movie(_)) => SubtitleLookup::Media {
                imdb_id: media.imdb_id().to_string(),
                season: None,
                episode: None,
            },
            None => SubtitleLookup::Filename(
                filename_without_extension(request.url()).unwrap_or_default(),
            ),
        }
    }
}

impl fmt::Display for SubtitleLookup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubtitleLookup::Filename(name) => write!(f, "file {}", name),
            SubtitleLookup::Media {
                imdb_id,
                season: Some(s),
                episode: Some(e),
            } => write!(f, "{} S{:02}E{:02}", imdb_id, s, e),
            SubtitleLookup::Media { imdb_id, .. } => write!(f, "{}", imdb_id),
        }
    }
}

/// Source of subtitles and owner of the subtitle preference
#[async_trait]
pub trait SubtitleProvider: Send + Sync {
    /// Entries always offered: disabled and custom
    fn default_subtitles(&self) -> Vec<SubtitleInfo> {
        vec![SubtitleInfo::none(), SubtitleInfo::custom()]
    }

    /// Available subtitles, including the defaults
    async fn retrieve_subtitles(
        &self,
        lookup: &SubtitleLookup,
    ) -> anyhow::Result<Vec<SubtitleInfo>>;

    /// Download the best file of the subtitle and parse it
    async fn download_and_parse(
        &self,
        info: &SubtitleInfo,
        matcher: &SubtitleMatcher,
    ) -> anyhow::Result<SubtitleTrack>;

    fn preference(&self) -> SubtitlePreference;

    fn update_preference(&self, preference: SubtitlePreference);

    fn disable_subtitle(&self);
}

/// Lets the user pick a subtitle file
#[async_trait]
pub trait SubtitlePicker: Send + Sync {
    /// `None` when the user cancelled
    async fn pick_custom_subtitle(&self) -> Option<PathBuf>;
}

/// Picker for environments without a file dialog, always cancels
#[derive(Debug, Default, Clone, Copy)]
pub struct NoPicker;

#[async_trait]
impl SubtitlePicker for NoPicker {
    async fn pick_custom_subtitle(&self) -> Option<PathBuf> {
        None
    }
}

/// Observer of subtitle changes
pub trait SubtitleObserver: Send + Sync {
    /// Subtitles available for the current playback
    fn on_available_subtitles(&self, _subtitles: &[SubtitleInfo]) {}

    fn on_active_subtitle_changed(&self, _info: &SubtitleInfo) {}

    /// Track to render as overlay, `None` clears the overlay
    fn on_subtitle_changed(&self, _track: Option<&SubtitleTrack>) {}
}

#[derive(Default)]
struct SessionState {
    epoch: u64,
    url: Option<String>,
    quality: Option<String>,
    available: Vec<SubtitleInfo>,
    active: Option<SubtitleInfo>,
    track: Option<SubtitleTrack>,
    offset_ms: i64,
    task: Option<JoinHandle<()>>,
}

/// Resolves, downloads and delivers the subtitle of the current playback
pub struct SubtitleSynchronizer {
    provider: Arc<dyn SubtitleProvider>,
    picker: Arc<dyn SubtitlePicker>,
    backends: Arc<BackendRegistry>,
    notifier: Arc<dyn Notifier>,
    settings: Arc<dyn SettingsProvider>,
    observers: Listeners<dyn SubtitleObserver>,
    state: Mutex<SessionState>,
}

impl SubtitleSynchronizer {
    pub fn new(
        provider: Arc<dyn SubtitleProvider>,
        picker: Arc<dyn SubtitlePicker>,
        backends: Arc<BackendRegistry>,
        notifier: Arc<dyn Notifier>,
        settings: Arc<dyn SettingsProvider>,
    ) -> Arc<Self> {
        Arc::new(Self {
            provider,
            picker,
            backends,
            notifier,
            settings,
            observers: Listeners::new(),
            state: Mutex::new(SessionState::default()),
        })
    }

    pub fn add_observer(&self, observer: Arc<dyn SubtitleObserver>) {
        self.observers.add(observer);
    }

    pub fn remove_observer(&self, observer: &Arc<dyn SubtitleObserver>) {
        self.observers.remove(observer);
    }

    /// Subtitles available for the current playback
    pub fn available(&self) -> Vec<SubtitleInfo> {
        self.state.lock().available.clone()
    }

    /// The active subtitle, [`SubtitleInfo::none`] when disabled
    pub fn active(&self) -> SubtitleInfo {
        self.state
            .lock()
            .active
            .clone()
            .unwrap_or_else(SubtitleInfo::none)
    }

    /// The parsed track of the current playback
    pub fn track(&self) -> Option<SubtitleTrack> {
        self.state.lock().track.clone()
    }

    pub fn offset(&self) -> i64 {
        self.state.lock().offset_ms
    }

    /// Rendering settings for overlay renderers
    pub fn subtitle_settings(&self) -> SubtitleSettings {
        self.settings.subtitles()
    }

    pub fn preference(&self) -> SubtitlePreference {
        self.provider.preference()
    }

    /// Start the resolution for a new play request in the background.
    ///
    /// Aborts the resolution that was in flight.
    pub fn spawn_play(self: &Arc<Self>, request: PlaybackRequest) {
        let this = self.clone();
        self.spawn(async move {
            if let Err(e) = this.handle_play(&request).await {
                log_outcome(&e);
            }
        });
    }

    /// Resolve the subtitle for a new play request.
    ///
    /// The previous playback's subtitle is dropped first, a new playback
    /// never starts with it.
    pub async fn handle_play(
        &self,
        request: &PlaybackRequest,
    ) -> Result<SubtitleInfo, SubtitleError> {
        let (epoch, previous) = {
            let mut state = self.state.lock();
            state.epoch += 1;
            state.url = Some(request.url().to_string());
            state.quality = request.quality().map(str::to_string);
            state.available.clear();
            (state.epoch, reset_session(&mut state))
        };
        self.release(previous);

        if !request.subtitles_enabled() {
            debug!("Subtitles are disabled for {}", request);
            return self.apply(epoch, SubtitleInfo::none()).await;
        }

        let lookup = SubtitleLookup::for_request(request);
        debug!("Retrieving subtitles for {}", lookup);
        let available = match self.provider.retrieve_subtitles(&lookup).await {
            Ok(subtitles) => subtitles,
            Err(e) => {
                warn!("Failed to retrieve subtitles for {}, {}", lookup, e);
                self.provider.default_subtitles()
            }
        };

        {
            let mut state = self.state.lock();
            check_epoch(&state, epoch)?;
            state.available = available.clone();
        }
        self.observers
            .invoke(|o| o.on_available_subtitles(&available));

        let info = match &request.subtitle().info {
            Some(info) => {
                debug!("Using subtitle {} selected by the request", info);
                info.clone()
            }
            None => self.resolve_preference(epoch, &available).await?,
        };

        self.apply(epoch, info).await
    }

    /// Change the user's preference and re-resolve the active subtitle
    pub fn set_preference(self: &Arc<Self>, preference: SubtitlePreference) {
        let this = self.clone();
        self.spawn(async move {
            if let Err(e) = this.handle_preference(preference).await {
                log_outcome(&e);
            }
        });
    }

    /// Apply a preference change
    pub async fn handle_preference(
        &self,
        preference: SubtitlePreference,
    ) -> Result<SubtitleInfo, SubtitleError> {
        self.provider.update_preference(preference);

        let (epoch, available, playing) = {
            let mut state = self.state.lock();
            state.epoch += 1;
            (state.epoch, state.available.clone(), state.url.is_some())
        };

        if !playing {
            trace!("No playback active, preference stored only");
            return Ok(self.active());
        }

        let info = self.resolve_preference(epoch, &available).await?;
        self.apply(epoch, info).await
    }

    /// Select an entry of the available subtitles
    pub fn select_subtitle(self: &Arc<Self>, info: &SubtitleInfo) {
        let preference = if info.is_none() {
            SubtitlePreference::Disabled
        } else if info.is_custom() {
            SubtitlePreference::Custom
        } else {
            SubtitlePreference::Language(info.language.code().to_string())
        };
        self.set_preference(preference);
    }

    /// Use the given file as custom subtitle
    pub async fn update_custom_subtitle(&self, path: &Path) -> Result<SubtitleInfo, SubtitleError> {
        let epoch = self.bump_epoch();
        self.provider.update_preference(SubtitlePreference::Custom);
        self.apply(epoch, SubtitleInfo::custom_file(path)).await
    }

    /// Disable subtitles for the current playback
    pub async fn disable_subtitle(&self) -> Result<SubtitleInfo, SubtitleError> {
        let epoch = self.bump_epoch();
        self.provider.disable_subtitle();
        self.apply(epoch, SubtitleInfo::none()).await
    }

    /// Shift the subtitle time-base
    pub fn update_offset(&self, offset_ms: i64) {
        let track = {
            let mut state = self.state.lock();
            state.offset_ms = offset_ms;
            state.track.as_ref().map(|t| t.with_offset(offset_ms))
        };
        debug!("Subtitle offset changed to {} ms", offset_ms);

        match self.backends.active() {
            Some(backend) if backend.supports_native_subtitle_delay() => {
                backend.subtitle_delay(offset_ms);
            }
            _ => {
                if let Some(track) = track {
                    self.state.lock().track = Some(track.clone());
                    self.observers.invoke(|o| o.on_subtitle_changed(Some(&track)));
                }
            }
        }
    }

    /// Reset the playback context; in-flight results are discarded
    pub fn stop(&self) {
        let previous = {
            let mut state = self.state.lock();
            state.epoch += 1;
            state.url = None;
            state.quality = None;
            if let Some(task) = state.task.take() {
                task.abort();
            }
            debug!("Subtitle context reset (epoch {})", state.epoch);
            reset_session(&mut state)
        };

        self.release(previous);
    }

    /// Cancel the resolution in flight without touching the current track
    pub fn cancel(&self) {
        let mut state = self.state.lock();
        state.epoch += 1;
        if let Some(task) = state.task.take() {
            trace!("Cancelling subtitle resolution");
            task.abort();
        }
    }

    fn spawn<F>(&self, future: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(future);
        if let Some(previous) = self.state.lock().task.replace(handle) {
            trace!("Aborting previous subtitle resolution");
            previous.abort();
        }
    }

    fn bump_epoch(&self) -> u64 {
        let mut state = self.state.lock();
        state.epoch += 1;
        state.epoch
    }

    async fn resolve_preference(
        &self,
        epoch: u64,
        available: &[SubtitleInfo],
    ) -> Result<SubtitleInfo, SubtitleError> {
        match self.provider.preference() {
            SubtitlePreference::Disabled => Ok(SubtitleInfo::none()),
            SubtitlePreference::Language(lang) => available
                .iter()
                .find(|i| i.language.matches(&lang))
                .cloned()
                .ok_or_else(|| {
                    warn!("No subtitle available for language {}", lang);
                    SubtitleError::Resolution(format!("no subtitle for language {}", lang))
                }),
            SubtitlePreference::Custom => self.pick_custom(epoch).await,
        }
    }

    /// Pause playback while the user picks a file
    async fn pick_custom(&self, epoch: u64) -> Result<SubtitleInfo, SubtitleError> {
        self.backends.pause();
        let picked = self.picker.pick_custom_subtitle().await;
        self.backends.resume();

        check_epoch(&self.state.lock(), epoch)?;
        match picked {
            Some(path) => {
                info!("Custom subtitle {} picked", path.display());
                self.provider.update_preference(SubtitlePreference::Custom);
                Ok(SubtitleInfo::custom_file(&path))
            }
            None => {
                debug!("Custom subtitle selection cancelled");
                self.provider.disable_subtitle();
                Ok(SubtitleInfo::none())
            }
        }
    }

    async fn apply(&self, epoch: u64, info: SubtitleInfo) -> Result<SubtitleInfo, SubtitleError> {
        let info = if info.needs_custom_file() {
            self.pick_custom(epoch).await?
        } else {
            info
        };

        if info.is_none() {
            {
                let mut state = self.state.lock();
                check_epoch(&state, epoch)?;
                state.active = Some(info.clone());
                state.track = None;
            }
            info!("Subtitles disabled");
            self.clear_native(false);
            self.observers.invoke(|o| o.on_active_subtitle_changed(&info));
            self.observers.invoke(|o| o.on_subtitle_changed(None));
            return Ok(info);
        }

        let matcher = {
            let state = self.state.lock();
            check_epoch(&state, epoch)?;
            SubtitleMatcher::from_url(state.url.as_deref(), state.quality.as_deref())
        };

        let result = self.provider.download_and_parse(&info, &matcher).await;
        check_epoch(&self.state.lock(), epoch)?;

        let track = match result {
            Ok(track) => track,
            Err(e) => {
                warn!("Failed to load subtitle {}, {}", info, e);
                self.notifier.notify(Notification::error(format!(
                    "Failed to load {} subtitles",
                    info.language
                )));
                return Err(SubtitleError::Download(e.to_string()));
            }
        };

        let track = {
            let mut state = self.state.lock();
            check_epoch(&state, epoch)?;
            let track = track.with_offset(state.offset_ms);
            state.active = Some(info.clone());
            state.track = Some(track.clone());
            track
        };

        info!("Subtitle {} activated", info);
        self.observers.invoke(|o| o.on_active_subtitle_changed(&info));
        self.deliver(&track);
        Ok(info)
    }

    /// Hand the file to a native renderer, otherwise publish for overlay
    fn deliver(&self, track: &SubtitleTrack) {
        match self.backends.active() {
            Some(backend) if backend.supports_native_subtitle_file() => {
                debug!(
                    "Backend {} renders {} natively",
                    backend.name(),
                    track.file.display()
                );
                backend.subtitle_file(Some(&track.file));
                if track.offset_ms != 0 && backend.supports_native_subtitle_delay() {
                    backend.subtitle_delay(track.offset_ms);
                }
            }
            _ => self.observers.invoke(|o| o.on_subtitle_changed(Some(track))),
        }
    }

    /// Withdraw the subtitle of a finished session from observers and backend
    fn release(&self, previous: PreviousSession) {
        if previous.had_track {
            self.observers.invoke(|o| o.on_subtitle_changed(None));
        }
        if previous.had_track || previous.offset_ms != 0 {
            self.clear_native(previous.offset_ms != 0);
        }
    }

    /// Unload the subtitle file of a native renderer, and its delay if asked
    fn clear_native(&self, delay: bool) {
        let Some(backend) = self.backends.active() else {
            return;
        };
        if backend.supports_native_subtitle_file() {
            backend.subtitle_file(None);
        }
        if delay && backend.supports_native_subtitle_delay() {
            backend.subtitle_delay(0);
        }
    }
}

/// What a session reset dropped
struct PreviousSession {
    had_track: bool,
    offset_ms: i64,
}

fn reset_session(state: &mut SessionState) -> PreviousSession {
    let previous = PreviousSession {
        had_track: state.track.take().is_some(),
        offset_ms: std::mem::take(&mut state.offset_ms),
    };
    state.active = None;
    previous
}

impl fmt::Debug for SubtitleSynchronizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("SubtitleSynchronizer")
            .field("epoch", &state.epoch)
            .field("url", &state.url)
            .field("active", &state.active)
            .field("offset_ms", &state.offset_ms)
            .finish()
    }
}

fn check_epoch(state: &SessionState, epoch: u64) -> Result<(), SubtitleError> {
    if state.epoch == epoch {
        Ok(())
    } else {
        trace!("Discarding subtitle result of epoch {} (now {})", epoch, state.epoch);
        Err(SubtitleError::StaleResultDiscarded)
    }
}

fn log_outcome(e: &SubtitleError) {
    match e {
        SubtitleError::StaleResultDiscarded => trace!("{}", e),
        _ => debug!("Subtitle resolution ended without a track, {}", e),
    }
}
