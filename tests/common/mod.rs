//! Shared fakes for the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use streamplay::config::Config;
use streamplay::models::{
    DownloadStatus, Episode, EpisodeMedia, Media, PlaybackRequest, PlayerState, ShowEpisodes,
    ShowInfo, StreamState, SubtitleCue, SubtitleInfo, SubtitleMatcher, SubtitlePreference,
    SubtitleTrack,
};
use streamplay::playback::{
    Listeners, MediaDetailLookup, Notification, Notifier, PlayStarted, PlaybackObserver, Player,
    PlayerListener, SubtitleLookup, SubtitleObserver, SubtitlePicker, SubtitleProvider,
};
use streamplay::stream::VideoBackend;

// =============================================================================
// Backends and players
// =============================================================================

/// Backend supporting URLs with a prefix, recording every call
pub struct FakeBackend {
    name: String,
    prefix: String,
    native_subtitles: bool,
    fail_play: bool,
    listeners: Listeners<dyn PlayerListener>,
    state: Mutex<PlayerState>,
    calls: Mutex<Vec<String>>,
}

impl FakeBackend {
    pub fn new(name: &str, prefix: &str) -> Arc<Self> {
        Self::build(name, prefix, false, false)
    }

    /// Backend rendering subtitle files and delays itself
    pub fn native(name: &str, prefix: &str) -> Arc<Self> {
        Self::build(name, prefix, true, false)
    }

    pub fn failing(name: &str, prefix: &str) -> Arc<Self> {
        Self::build(name, prefix, false, true)
    }

    fn build(name: &str, prefix: &str, native_subtitles: bool, fail_play: bool) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            prefix: prefix.to_string(),
            native_subtitles,
            fail_play,
            listeners: Listeners::new(),
            state: Mutex::new(PlayerState::Unknown),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    pub fn emit_time(&self, time_ms: u64) {
        self.listeners.invoke(|l| l.on_time_changed(time_ms));
    }

    pub fn emit_state(&self, state: PlayerState) {
        *self.state.lock() = state;
        self.listeners.invoke(|l| l.on_state_changed(state));
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().push(call.into());
    }
}

#[async_trait]
impl VideoBackend for FakeBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn supports(&self, url: &str) -> bool {
        url.starts_with(&self.prefix)
    }

    async fn play(&self, url: &str) -> anyhow::Result<()> {
        self.record(format!("play {}", url));
        if self.fail_play {
            anyhow::bail!("codec not supported");
        }
        *self.state.lock() = PlayerState::Playing;
        Ok(())
    }

    fn pause(&self) {
        self.record("pause");
    }

    fn resume(&self) {
        self.record("resume");
    }

    fn stop(&self) {
        self.record("stop");
    }

    fn seek(&self, time_ms: u64) {
        self.record(format!("seek {}", time_ms));
    }

    fn volume(&self, level: u8) {
        self.record(format!("volume {}", level));
    }

    fn state(&self) -> PlayerState {
        *self.state.lock()
    }

    fn error_info(&self) -> Option<String> {
        None
    }

    fn supports_native_subtitle_file(&self) -> bool {
        self.native_subtitles
    }

    fn subtitle_file(&self, path: Option<&Path>) {
        match path {
            Some(path) => self.record(format!("subtitle_file {}", path.display())),
            None => self.record("subtitle_file none"),
        }
    }

    fn supports_native_subtitle_delay(&self) -> bool {
        self.native_subtitles
    }

    fn subtitle_delay(&self, offset_ms: i64) {
        self.record(format!("subtitle_delay {}", offset_ms));
    }

    fn add_listener(&self, listener: Arc<dyn PlayerListener>) {
        self.listeners.add(listener);
    }

    fn remove_listener(&self, listener: &Arc<dyn PlayerListener>) {
        self.listeners.remove(listener);
    }
}

/// Logical player recording calls and dispose order
pub struct FakePlayer {
    id: String,
    fail_dispose: bool,
    fail_play: bool,
    disposals: AtomicUsize,
    dispose_log: Arc<Mutex<Vec<String>>>,
    listeners: Listeners<dyn PlayerListener>,
    state: Mutex<PlayerState>,
    request: Mutex<Option<PlaybackRequest>>,
    calls: Mutex<Vec<String>>,
}

impl FakePlayer {
    pub fn new(id: &str) -> Arc<Self> {
        Self::with_log(id, false, Arc::new(Mutex::new(Vec::new())))
    }

    /// Player whose every play request fails
    pub fn failing(id: &str) -> Arc<Self> {
        Self::build(id, false, true, Arc::new(Mutex::new(Vec::new())))
    }

    pub fn with_log(
        id: &str,
        fail_dispose: bool,
        dispose_log: Arc<Mutex<Vec<String>>>,
    ) -> Arc<Self> {
        Self::build(id, fail_dispose, false, dispose_log)
    }

    fn build(
        id: &str,
        fail_dispose: bool,
        fail_play: bool,
        dispose_log: Arc<Mutex<Vec<String>>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            fail_dispose,
            fail_play,
            disposals: AtomicUsize::new(0),
            dispose_log,
            listeners: Listeners::new(),
            state: Mutex::new(PlayerState::Unknown),
            request: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn disposals(&self) -> usize {
        self.disposals.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    pub fn set_state(&self, state: PlayerState) {
        *self.state.lock() = state;
        self.listeners.invoke(|l| l.on_state_changed(state));
    }

    pub fn emit_time(&self, time_ms: u64) {
        self.listeners.invoke(|l| l.on_time_changed(time_ms));
    }

    pub fn emit_duration(&self, duration_ms: u64) {
        self.listeners.invoke(|l| l.on_duration_changed(duration_ms));
    }

    pub fn emit_volume(&self, volume: u8) {
        self.listeners.invoke(|l| l.on_volume_changed(volume));
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().push(call.into());
    }
}

#[async_trait]
impl Player for FakePlayer {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.id
    }

    fn supports_embedded_playback(&self) -> bool {
        false
    }

    fn state(&self) -> PlayerState {
        *self.state.lock()
    }

    fn request(&self) -> Option<PlaybackRequest> {
        self.request.lock().clone()
    }

    async fn play(&self, request: PlaybackRequest) -> anyhow::Result<()> {
        self.record(format!("play {}", request.url()));
        if self.fail_play {
            self.set_state(PlayerState::Error);
            anyhow::bail!("no backend can play {}", request.url());
        }
        *self.request.lock() = Some(request);
        self.set_state(PlayerState::Playing);
        Ok(())
    }

    fn pause(&self) {
        self.record("pause");
        *self.state.lock() = PlayerState::Paused;
    }

    fn resume(&self) {
        self.record("resume");
        *self.state.lock() = PlayerState::Playing;
    }

    fn stop(&self) {
        self.record("stop");
        *self.state.lock() = PlayerState::Stopped;
    }

    fn seek(&self, time_ms: u64) {
        self.record(format!("seek {}", time_ms));
    }

    fn volume(&self, level: u8) {
        self.record(format!("volume {}", level));
    }

    fn add_listener(&self, listener: Arc<dyn PlayerListener>) {
        self.listeners.add(listener);
    }

    fn remove_listener(&self, listener: &Arc<dyn PlayerListener>) {
        self.listeners.remove(listener);
    }

    fn dispose(&self) -> anyhow::Result<()> {
        self.disposals.fetch_add(1, Ordering::SeqCst);
        self.dispose_log.lock().push(self.id.clone());
        if self.fail_dispose {
            anyhow::bail!("{} refused to shut down", self.id);
        }
        Ok(())
    }
}

// =============================================================================
// Subtitles
// =============================================================================

/// Provider serving a fixed list, with optional per-language download delays
pub struct FakeSubtitleProvider {
    available: Vec<SubtitleInfo>,
    preference: RwLock<SubtitlePreference>,
    delays: HashMap<String, Duration>,
    failing: Vec<String>,
    downloads: Mutex<Vec<String>>,
    lookups: Mutex<Vec<SubtitleLookup>>,
}

impl FakeSubtitleProvider {
    pub fn new(languages: &[&str]) -> Self {
        let mut available = vec![SubtitleInfo::none(), SubtitleInfo::custom()];
        available.extend(languages.iter().map(|l| SubtitleInfo::new("tt0944947", *l)));
        Self {
            available,
            preference: RwLock::new(SubtitlePreference::Disabled),
            delays: HashMap::new(),
            failing: Vec::new(),
            downloads: Mutex::new(Vec::new()),
            lookups: Mutex::new(Vec::new()),
        }
    }

    pub fn with_preference(self, preference: SubtitlePreference) -> Self {
        *self.preference.write() = preference;
        self
    }

    pub fn with_delay(mut self, language: &str, delay: Duration) -> Self {
        self.delays.insert(language.to_string(), delay);
        self
    }

    pub fn with_failing(mut self, language: &str) -> Self {
        self.failing.push(language.to_string());
        self
    }

    pub fn downloads(&self) -> Vec<String> {
        self.downloads.lock().clone()
    }

    pub fn lookups(&self) -> Vec<SubtitleLookup> {
        self.lookups.lock().clone()
    }

    pub fn current_preference(&self) -> SubtitlePreference {
        self.preference.read().clone()
    }
}

/// Path the fake provider "downloads" a subtitle to
pub fn track_path(info: &SubtitleInfo) -> PathBuf {
    if info.is_custom() {
        info.files
            .first()
            .map(|f| PathBuf::from(&f.url))
            .unwrap_or_else(|| PathBuf::from("/tmp/custom.srt"))
    } else {
        PathBuf::from(format!("/tmp/{}.srt", info.language.code()))
    }
}

#[async_trait]
impl SubtitleProvider for FakeSubtitleProvider {
    async fn retrieve_subtitles(
        &self,
        lookup: &SubtitleLookup,
    ) -> anyhow::Result<Vec<SubtitleInfo>> {
        self.lookups.lock().push(lookup.clone());
        Ok(self.available.clone())
    }

    async fn download_and_parse(
        &self,
        info: &SubtitleInfo,
        _matcher: &SubtitleMatcher,
    ) -> anyhow::Result<SubtitleTrack> {
        let code = info.language.code().to_string();
        if let Some(delay) = self.delays.get(&code) {
            tokio::time::sleep(*delay).await;
        }
        self.downloads.lock().push(code.clone());
        if self.failing.contains(&code) {
            anyhow::bail!("HTTP 503 for {}", code);
        }

        let cue = SubtitleCue {
            id: "1".into(),
            start_ms: 1_000,
            end_ms: 4_000,
            lines: vec![format!("[{}]", code)],
        };
        Ok(SubtitleTrack::new(info.clone(), track_path(info), vec![cue]))
    }

    fn preference(&self) -> SubtitlePreference {
        self.preference.read().clone()
    }

    fn update_preference(&self, preference: SubtitlePreference) {
        *self.preference.write() = preference;
    }

    fn disable_subtitle(&self) {
        *self.preference.write() = SubtitlePreference::Disabled;
    }
}

/// Picker returning a fixed answer
pub struct FakePicker {
    answer: Option<PathBuf>,
    picks: AtomicUsize,
}

impl FakePicker {
    pub fn answering(path: &str) -> Self {
        Self {
            answer: Some(PathBuf::from(path)),
            picks: AtomicUsize::new(0),
        }
    }

    pub fn cancelling() -> Self {
        Self {
            answer: None,
            picks: AtomicUsize::new(0),
        }
    }

    pub fn picks(&self) -> usize {
        self.picks.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SubtitlePicker for FakePicker {
    async fn pick_custom_subtitle(&self) -> Option<PathBuf> {
        self.picks.fetch_add(1, Ordering::SeqCst);
        self.answer.clone()
    }
}

// =============================================================================
// Autoplay
// =============================================================================

/// Episode lookup serving a fixed show
pub struct FakeLookup {
    episodes: ShowEpisodes,
    delay: Option<Duration>,
    fail: bool,
    calls: AtomicUsize,
}

impl FakeLookup {
    pub fn new(episodes: ShowEpisodes) -> Self {
        Self {
            episodes,
            delay: None,
            fail: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new(ShowEpisodes::default())
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaDetailLookup for FakeLookup {
    async fn show_episodes(&self, _show: &ShowInfo) -> anyhow::Result<ShowEpisodes> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail {
            anyhow::bail!("metadata service unavailable");
        }
        Ok(self.episodes.clone())
    }
}

pub fn show() -> ShowInfo {
    ShowInfo {
        id: "1399".into(),
        imdb_id: "tt0944947".into(),
        title: "Game of Thrones".into(),
    }
}

pub fn episode(season: u8, number: u8, sources: &[(&str, &str)]) -> Episode {
    Episode {
        season,
        episode: number,
        name: format!("Episode {}", number),
        overview: String::new(),
        runtime: Some(60),
        imdb_id: None,
        sources: sources
            .iter()
            .map(|(q, url)| (q.to_string(), url.to_string()))
            .collect(),
    }
}

/// Three episodes of season 1, the first watched
pub fn season_one() -> ShowEpisodes {
    let mut episodes = ShowEpisodes::default();
    episodes.episodes = vec![
        episode(1, 3, &[("1080p", "http://local/s01e03-1080.mkv")]),
        episode(1, 1, &[("1080p", "http://local/s01e01-1080.mkv")]),
        episode(
            1,
            2,
            &[
                ("720p", "http://local/s01e02-720.mkv"),
                ("1080p", "http://local/s01e02-1080.mkv"),
            ],
        ),
    ];
    episodes.watched.insert((1, 1));
    episodes
}

pub fn episode_request(number: u8, quality: &str) -> PlaybackRequest {
    PlaybackRequest::builder()
        .url(format!("http://local/s01e{:02}-{}.mkv", number, quality))
        .quality(quality)
        .media(Media::Episode(EpisodeMedia {
            show: show(),
            episode: episode(1, number, &[]),
        }))
        .build()
}

pub fn settings(autoplay: bool) -> Arc<RwLock<Config>> {
    let mut config = Config::default();
    config.playback.autoplay_next_episode = autoplay;
    Arc::new(RwLock::new(config))
}

// =============================================================================
// Observers
// =============================================================================

/// Records every playback and subtitle event as text
#[derive(Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<String>>,
}

impl RecordingObserver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }

    fn record(&self, event: String) {
        self.events.lock().push(event);
    }
}

impl PlaybackObserver for RecordingObserver {
    fn on_play_started(&self, info: &PlayStarted) {
        self.record(format!("started {}", info.title));
    }

    fn on_state_changed(&self, state: PlayerState) {
        self.record(format!("state {:?}", state));
    }

    fn on_time_changed(&self, time_ms: u64) {
        self.record(format!("time {}", time_ms));
    }

    fn on_duration_changed(&self, duration_ms: u64) {
        self.record(format!("duration {}", duration_ms));
    }

    fn on_volume_changed(&self, volume: u8) {
        self.record(format!("volume {}", volume));
    }

    fn on_download_status(&self, status: &DownloadStatus) {
        self.record(format!("download {}", status.downloaded));
    }

    fn on_stream_state_changed(&self, state: &StreamState) {
        self.record(format!("stream {:?}", state));
    }
}

impl PlayerListener for RecordingObserver {
    fn on_state_changed(&self, state: PlayerState) {
        self.record(format!("state {:?}", state));
    }

    fn on_time_changed(&self, time_ms: u64) {
        self.record(format!("time {}", time_ms));
    }
}

impl SubtitleObserver for RecordingObserver {
    fn on_available_subtitles(&self, subtitles: &[SubtitleInfo]) {
        self.record(format!("available {}", subtitles.len()));
    }

    fn on_active_subtitle_changed(&self, info: &SubtitleInfo) {
        self.record(format!("active {}", info.language.code()));
    }

    fn on_subtitle_changed(&self, track: Option<&SubtitleTrack>) {
        match track {
            Some(track) => self.record(format!(
                "track {} offset {}",
                track.file.display(),
                track.offset_ms
            )),
            None => self.record("track cleared".to_string()),
        }
    }
}

/// Observer panicking on every event
pub struct PanickingObserver;

impl PlaybackObserver for PanickingObserver {
    fn on_time_changed(&self, _time_ms: u64) {
        panic!("observer bug");
    }
}

/// Collects notifications
#[derive(Default)]
pub struct RecordingNotifier {
    notifications: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn notifications(&self) -> Vec<Notification> {
        self.notifications.lock().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notification: Notification) {
        self.notifications.lock().push(notification);
    }
}
