//! Autoplay of the next episode
//!
//! [`AutoplayMachine`] is a pure state machine fed with play, duration and
//! time events. [`AutoplayService`] owns the machine, looks up the successor
//! episode and performs the side effects when the machine fires: pausing the
//! active player and emitting the next [`PlaybackRequest`].

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Deserialize;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::config::SettingsProvider;
use crate::models::{
    Episode, EpisodeMedia, Media, NextEpisode, PlaybackRequest, ShowEpisodes, ShowInfo,
};
use crate::playback::events::PlaybackObserver;
use crate::playback::players::PlayerRegistry;

/// Remaining seconds at which the countdown starts
pub const COUNTDOWN_THRESHOLD_SECS: i64 = 60;

/// Remaining seconds at which the next episode starts
pub const FIRE_THRESHOLD_SECS: i64 = 1;

// =============================================================================
// State Machine
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AutoplayState {
    #[default]
    Idle,
    /// Successor known, countdown not started yet
    Armed,
    Countdown,
    /// Transition triggered, waiting for the side effects to complete
    Fired,
}

impl fmt::Display for AutoplayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AutoplayState::Idle => write!(f, "idle"),
            AutoplayState::Armed => write!(f, "armed"),
            AutoplayState::Countdown => write!(f, "countdown"),
            AutoplayState::Fired => write!(f, "fired"),
        }
    }
}

/// Data of the countdown towards the next episode
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CountdownState {
    pub next_episode: Option<NextEpisode>,
    pub seconds_remaining: i64,
    pub quality: Option<String>,
    pub duration_ms: u64,
    pub time_ms: u64,
}

/// Emitted when the machine fires
#[derive(Debug, Clone, PartialEq)]
pub struct Fire {
    pub next_episode: NextEpisode,
    pub quality: Option<String>,
}

/// Pure autoplay state machine
#[derive(Debug, Default)]
pub struct AutoplayMachine {
    state: AutoplayState,
    countdown: CountdownState,
}

impl AutoplayMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> AutoplayState {
        self.state
    }

    pub fn countdown(&self) -> &CountdownState {
        &self.countdown
    }

    /// A new playback started; forget everything about the previous one
    pub fn on_play_started(&mut self) {
        self.state = AutoplayState::Idle;
        self.countdown = CountdownState::default();
    }

    /// Successor found for the playing episode
    pub fn arm(&mut self, next_episode: NextEpisode, quality: Option<String>) {
        self.state = AutoplayState::Armed;
        self.countdown.next_episode = Some(next_episode);
        self.countdown.quality = quality;
        self.countdown.seconds_remaining = 0;
    }

    /// Back to idle, the duration and time of the playback are kept
    pub fn reset(&mut self) {
        self.state = AutoplayState::Idle;
        self.countdown.next_episode = None;
        self.countdown.quality = None;
        self.countdown.seconds_remaining = 0;
    }

    pub fn on_duration(&mut self, duration_ms: u64) {
        self.countdown.duration_ms = duration_ms;
    }

    /// Feed a time event, returns the transition to perform when firing.
    ///
    /// Time events are ignored while the duration is unknown.
    pub fn on_time(&mut self, time_ms: u64) -> Option<Fire> {
        self.countdown.time_ms = time_ms;

        if !matches!(self.state, AutoplayState::Armed | AutoplayState::Countdown) {
            return None;
        }
        if self.countdown.duration_ms == 0 {
            return None;
        }

        let remaining = (self.countdown.duration_ms as i64 - time_ms as i64) / 1000;
        if remaining > COUNTDOWN_THRESHOLD_SECS {
            return None;
        }

        if self.state == AutoplayState::Armed {
            trace!("Autoplay countdown started at {} s", remaining);
        }
        self.state = AutoplayState::Countdown;
        self.countdown.seconds_remaining = remaining;

        if remaining <= FIRE_THRESHOLD_SECS {
            self.fire()
        } else {
            None
        }
    }

    /// Fire immediately if a next episode is known
    pub fn fire_now(&mut self) -> Option<Fire> {
        match self.state {
            AutoplayState::Armed | AutoplayState::Countdown => self.fire(),
            _ => None,
        }
    }

    /// Side effects of the fire are done
    pub fn complete(&mut self) {
        if self.state == AutoplayState::Fired {
            self.state = AutoplayState::Idle;
        }
    }

    fn fire(&mut self) -> Option<Fire> {
        let next_episode = self.countdown.next_episode.take()?;
        self.state = AutoplayState::Fired;
        self.countdown.seconds_remaining = 0;

        Some(Fire {
            next_episode,
            quality: self.countdown.quality.take(),
        })
    }
}

// =============================================================================
// Media Detail Lookup
// =============================================================================

/// Provides the sibling episodes of a show
#[async_trait]
pub trait MediaDetailLookup: Send + Sync {
    async fn show_episodes(&self, show: &ShowInfo) -> anyhow::Result<ShowEpisodes>;
}

#[derive(Debug, Deserialize)]
struct ShowFile {
    show: ShowInfo,
    episodes: Vec<EpisodeEntry>,
}

#[derive(Debug, Deserialize)]
struct EpisodeEntry {
    #[serde(flatten)]
    episode: Episode,
    #[serde(default)]
    watched: bool,
}

/// Lookup reading a JSON show description
///
/// ```json
/// {
///   "show": { "id": "1399", "imdb_id": "tt0944947", "title": "Game of Thrones" },
///   "episodes": [
///     { "season": 1, "episode": 1, "name": "Winter Is Coming", "watched": true,
///       "sources": { "1080p": "http://127.0.0.1:8888/s01e01.mkv" } }
///   ]
/// }
/// ```
#[derive(Debug, Clone)]
pub struct JsonEpisodeLookup {
    path: PathBuf,
}

impl JsonEpisodeLookup {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    async fn read(&self) -> anyhow::Result<ShowFile> {
        let content = tokio::fs::read_to_string(&self.path).await?;
        Ok(serde_json::from_str(&content)?)
    }

    /// The show described by the file
    pub async fn show(&self) -> anyhow::Result<ShowInfo> {
        Ok(self.read().await?.show)
    }

    /// A single episode of the show
    pub async fn episode(&self, season: u8, episode: u8) -> anyhow::Result<Episode> {
        self.read()
            .await?
            .episodes
            .into_iter()
            .map(|e| e.episode)
            .find(|e| e.key() == (season, episode))
            .ok_or_else(|| anyhow::anyhow!("Episode S{:02}E{:02} not found", season, episode))
    }
}

#[async_trait]
impl MediaDetailLookup for JsonEpisodeLookup {
    async fn show_episodes(&self, show: &ShowInfo) -> anyhow::Result<ShowEpisodes> {
        let file = self.read().await?;
        if file.show.id != show.id && file.show.imdb_id != show.imdb_id {
            anyhow::bail!("{} doesn't describe show {}", self.path.display(), show.title);
        }

        let mut episodes = ShowEpisodes::default();
        for entry in file.episodes {
            if entry.watched {
                episodes.watched.insert(entry.episode.key());
            }
            episodes.episodes.push(entry.episode);
        }
        Ok(episodes)
    }
}

// =============================================================================
// Service
// =============================================================================

#[derive(Default)]
struct Inner {
    machine: AutoplayMachine,
    epoch: u64,
    lookup: Option<JoinHandle<()>>,
}

/// Drives the autoplay machine from playback events
pub struct AutoplayService {
    settings: Arc<dyn SettingsProvider>,
    lookup: Arc<dyn MediaDetailLookup>,
    players: Arc<PlayerRegistry>,
    inner: Mutex<Inner>,
    sender: UnboundedSender<PlaybackRequest>,
}

impl AutoplayService {
    /// Create the service and the receiver of next-episode requests
    pub fn new(
        settings: Arc<dyn SettingsProvider>,
        lookup: Arc<dyn MediaDetailLookup>,
        players: Arc<PlayerRegistry>,
    ) -> (Arc<Self>, UnboundedReceiver<PlaybackRequest>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let service = Arc::new(Self {
            settings,
            lookup,
            players,
            inner: Mutex::new(Inner::default()),
            sender,
        });
        (service, receiver)
    }

    /// Start the successor lookup for a new playback in the background
    pub fn on_play(self: &Arc<Self>, request: PlaybackRequest) {
        let epoch = self.begin();
        let this = self.clone();
        let handle = tokio::spawn(async move {
            this.resolve(epoch, &request).await;
        });

        if let Some(previous) = self.inner.lock().lookup.replace(handle) {
            previous.abort();
        }
    }

    /// Look up and arm the successor of the request's episode
    pub async fn handle_play(&self, request: &PlaybackRequest) -> Option<NextEpisode> {
        let epoch = self.begin();
        self.resolve(epoch, request).await
    }

    /// Fire now; returns false with a warning when nothing is armed
    pub fn play_next_now(&self) -> bool {
        let fire = self.inner.lock().machine.fire_now();
        match fire {
            Some(fire) => {
                self.fire(fire);
                true
            }
            None => {
                warn!("Unable to play next episode, no next episode is known");
                false
            }
        }
    }

    pub fn next_episode(&self) -> Option<NextEpisode> {
        self.inner.lock().machine.countdown().next_episode.clone()
    }

    /// Seconds left before the next episode starts, only during the countdown
    pub fn playing_in_seconds(&self) -> Option<i64> {
        let inner = self.inner.lock();
        (inner.machine.state() == AutoplayState::Countdown)
            .then(|| inner.machine.countdown().seconds_remaining)
    }

    pub fn state(&self) -> AutoplayState {
        self.inner.lock().machine.state()
    }

    pub fn countdown(&self) -> CountdownState {
        self.inner.lock().machine.countdown().clone()
    }

    /// Back to idle; an in-flight lookup is cancelled
    pub fn stop(&self) {
        let mut inner = self.inner.lock();
        inner.epoch += 1;
        inner.machine.on_play_started();
        if let Some(lookup) = inner.lookup.take() {
            lookup.abort();
        }
        debug!("Autoplay stopped");
    }

    fn begin(&self) -> u64 {
        let mut inner = self.inner.lock();
        inner.epoch += 1;
        inner.machine.on_play_started();
        inner.epoch
    }

    async fn resolve(&self, epoch: u64, request: &PlaybackRequest) -> Option<NextEpisode> {
        if !self.settings.playback().autoplay_next_episode {
            debug!("Autoplay is disabled");
            return None;
        }
        let Some(current) = request.media().and_then(Media::as_episode) else {
            trace!("{} is not an episode, autoplay stays idle", request);
            return None;
        };

        let episodes = match self.lookup.show_episodes(&current.show).await {
            Ok(episodes) => episodes,
            Err(e) => {
                warn!("Failed to retrieve episodes of {}, {}", current.show.title, e);
                return None;
            }
        };

        let Some(successor) = episodes.successor(&current.episode) else {
            debug!("{} has no next episode", current.episode);
            return None;
        };
        let next = NextEpisode {
            show: current.show.clone(),
            episode: successor.clone(),
            watched: episodes.is_watched(successor),
        };

        let mut inner = self.inner.lock();
        if inner.epoch != epoch {
            trace!("Discarding next episode lookup of epoch {}", epoch);
            return None;
        }
        inner
            .machine
            .arm(next.clone(), request.quality().map(str::to_string));
        info!("Next episode armed: {}", next);
        Some(next)
    }

    fn fire(&self, fire: Fire) {
        if let Some(player) = self.players.active() {
            player.pause();
        }

        let next = fire.next_episode;
        match next.episode.source_for(fire.quality.as_deref()) {
            Some((quality, url)) => {
                let request = PlaybackRequest::builder()
                    .url(url)
                    .title(format!("{} - {}", next.show.title, next.episode))
                    .caption(next.episode.name.clone())
                    .quality(quality)
                    .media(Media::Episode(EpisodeMedia {
                        show: next.show.clone(),
                        episode: next.episode.clone(),
                    }))
                    .subtitles_enabled(true)
                    .build();

                info!("Starting next episode {}", next);
                if self.sender.send(request).is_err() {
                    warn!("Next episode request dropped, nobody is listening");
                }
            }
            None => warn!("No stream source available for {}", next),
        }

        self.inner.lock().machine.complete();
    }
}

impl PlaybackObserver for AutoplayService {
    fn on_duration_changed(&self, duration_ms: u64) {
        self.inner.lock().machine.on_duration(duration_ms);
    }

    fn on_time_changed(&self, time_ms: u64) {
        let fire = self.inner.lock().machine.on_time(time_ms);
        if let Some(fire) = fire {
            self.fire(fire);
        }
    }
}

impl fmt::Debug for AutoplayService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("AutoplayService")
            .field("state", &inner.machine.state())
            .field("countdown", inner.machine.countdown())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn next_episode() -> NextEpisode {
        NextEpisode {
            show: ShowInfo {
                id: "1".into(),
                imdb_id: "tt1".into(),
                title: "Show".into(),
            },
            episode: Episode {
                season: 1,
                episode: 2,
                name: "Second".into(),
                overview: String::new(),
                runtime: None,
                imdb_id: None,
                sources: BTreeMap::new(),
            },
            watched: false,
        }
    }

    fn armed(duration_ms: u64) -> AutoplayMachine {
        let mut machine = AutoplayMachine::new();
        machine.on_duration(duration_ms);
        machine.arm(next_episode(), Some("720p".into()));
        machine
    }

    #[test]
    fn test_countdown_and_fire_thresholds() {
        let mut machine = armed(60_000);

        assert!(machine.on_time(0).is_none());
        assert_eq!(machine.state(), AutoplayState::Countdown);
        assert_eq!(machine.countdown().seconds_remaining, 60);

        for time in (1_000..59_000).step_by(1_000) {
            assert!(machine.on_time(time).is_none(), "fired early at {}", time);
        }

        let fire = machine.on_time(59_000).unwrap();
        assert_eq!(fire.quality.as_deref(), Some("720p"));
        assert_eq!(machine.state(), AutoplayState::Fired);

        machine.complete();
        assert_eq!(machine.state(), AutoplayState::Idle);
        assert!(machine.countdown().next_episode.is_none());
    }

    #[test]
    fn test_armed_until_threshold() {
        let mut machine = armed(3_600_000);

        assert!(machine.on_time(60_000).is_none());
        assert_eq!(machine.state(), AutoplayState::Armed);
    }

    #[test]
    fn test_negative_remaining_fires() {
        let mut machine = armed(60_000);

        assert!(machine.on_time(75_000).is_some());
    }

    #[test]
    fn test_unknown_duration_is_ignored() {
        let mut machine = AutoplayMachine::new();
        machine.arm(next_episode(), None);

        assert!(machine.on_time(10_000).is_none());
        assert_eq!(machine.state(), AutoplayState::Armed);
    }

    #[test]
    fn test_fire_now_requires_next_episode() {
        let mut machine = AutoplayMachine::new();
        assert!(machine.fire_now().is_none());

        let mut machine = armed(60_000);
        assert!(machine.fire_now().is_some());
        assert!(machine.fire_now().is_none());
    }

    #[test]
    fn test_idle_ignores_time() {
        let mut machine = AutoplayMachine::new();
        machine.on_duration(60_000);

        assert!(machine.on_time(59_500).is_none());
        assert_eq!(machine.state(), AutoplayState::Idle);
    }
}
