//! Autoplay-Next Tests
//!
//! Arming from the episode list, countdown and firing through playback
//! events, manual "play next now" and the coordinator loop.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{episode_request, season_one, settings, FakeLookup, FakePlayer, FakeSubtitleProvider};
use streamplay::models::{Media, MovieInfo, PlaybackRequest, PlayerState};
use streamplay::playback::{
    AutoplayService, AutoplayState, NoPicker, PlaybackCoordinator, PlaybackEventHub,
    LogNotifier, PlaybackObserver, Player, PlayerRegistry, SubtitleSynchronizer,
};
use streamplay::stream::{BackendRegistry, TorrentStreamHub};
use tokio::sync::mpsc::UnboundedReceiver;

const HOUR_MS: u64 = 3_600_000;

struct Fixture {
    service: Arc<AutoplayService>,
    requests: UnboundedReceiver<PlaybackRequest>,
    player: Arc<FakePlayer>,
    lookup: Arc<FakeLookup>,
}

fn fixture_with(lookup: FakeLookup, autoplay: bool) -> Fixture {
    let players = Arc::new(PlayerRegistry::new());
    let player = FakePlayer::new("internalPlayer");
    players.register(player.clone()).unwrap();
    players.set_active(Some("internalPlayer")).unwrap();

    let lookup = Arc::new(lookup);
    let (service, requests) = AutoplayService::new(settings(autoplay), lookup.clone(), players);

    Fixture {
        service,
        requests,
        player,
        lookup,
    }
}

fn fixture() -> Fixture {
    fixture_with(FakeLookup::new(season_one()), true)
}

// =============================================================================
// Arming
// =============================================================================

#[tokio::test]
async fn test_arms_successor_episode() {
    let f = fixture();

    let next = f.service.handle_play(&episode_request(1, "1080p")).await.unwrap();

    assert_eq!(next.episode.key(), (1, 2));
    assert!(!next.watched);
    assert_eq!(f.service.state(), AutoplayState::Armed);
    assert_eq!(f.service.next_episode(), Some(next));
    assert_eq!(f.service.countdown().quality.as_deref(), Some("1080p"));
    assert_eq!(f.service.playing_in_seconds(), None);
}

#[tokio::test]
async fn test_last_episode_stays_idle() {
    let f = fixture();

    let next = f.service.handle_play(&episode_request(3, "1080p")).await;

    assert!(next.is_none());
    assert_eq!(f.service.state(), AutoplayState::Idle);
}

#[tokio::test]
async fn test_disabled_setting_skips_lookup() {
    let f = fixture_with(FakeLookup::new(season_one()), false);

    let next = f.service.handle_play(&episode_request(1, "1080p")).await;

    assert!(next.is_none());
    assert_eq!(f.lookup.calls(), 0);
    assert_eq!(f.service.state(), AutoplayState::Idle);
}

#[tokio::test]
async fn test_movie_stays_idle() {
    let f = fixture();
    let movie = PlaybackRequest::builder()
        .url("http://local/movie.mkv")
        .media(Media::Movie(MovieInfo {
            imdb_id: "tt1877830".into(),
            title: "The Batman".into(),
            year: None,
        }))
        .build();

    assert!(f.service.handle_play(&movie).await.is_none());
    assert_eq!(f.lookup.calls(), 0);
}

#[tokio::test]
async fn test_lookup_failure_stays_idle() {
    let f = fixture_with(FakeLookup::failing(), true);

    let next = f.service.handle_play(&episode_request(1, "1080p")).await;

    assert!(next.is_none());
    assert_eq!(f.service.state(), AutoplayState::Idle);
}

#[tokio::test]
async fn test_new_playback_cancels_pending_lookup() {
    let f = fixture_with(
        FakeLookup::new(season_one()).with_delay(Duration::from_millis(100)),
        true,
    );

    f.service.on_play(episode_request(1, "1080p"));
    tokio::time::sleep(Duration::from_millis(20)).await;
    f.service
        .on_play(PlaybackRequest::builder().url("http://local/movie.mkv").build());
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(f.service.state(), AutoplayState::Idle);
    assert!(f.service.next_episode().is_none());
}

// =============================================================================
// Countdown and firing
// =============================================================================

#[tokio::test]
async fn test_countdown_then_fire() {
    let mut f = fixture();
    f.service.handle_play(&episode_request(1, "720p")).await.unwrap();

    f.service.on_duration_changed(HOUR_MS);
    f.service.on_time_changed(HOUR_MS - 61_000);
    assert_eq!(f.service.state(), AutoplayState::Armed);

    f.service.on_time_changed(HOUR_MS - 60_000);
    assert_eq!(f.service.state(), AutoplayState::Countdown);
    assert_eq!(f.service.playing_in_seconds(), Some(60));

    f.service.on_time_changed(HOUR_MS - 2_500);
    assert_eq!(f.service.playing_in_seconds(), Some(2));
    assert!(f.requests.try_recv().is_err());

    f.service.on_time_changed(HOUR_MS - 1_000);

    let request = f.requests.try_recv().unwrap();
    assert_eq!(request.url(), "http://local/s01e02-720.mkv");
    assert_eq!(request.quality(), Some("720p"));
    assert_eq!(request.title(), "Game of Thrones - S01E02 - Episode 2");
    assert!(request.subtitles_enabled());
    assert!(request.subtitle().info.is_none());
    let episode = request.media().and_then(Media::as_episode).unwrap();
    assert_eq!(episode.episode.key(), (1, 2));

    assert_eq!(f.player.calls(), vec!["pause"]);
    assert_eq!(f.service.state(), AutoplayState::Idle);
    assert!(f.service.next_episode().is_none());
}

#[tokio::test]
async fn test_time_ignored_without_duration() {
    let mut f = fixture();
    f.service.handle_play(&episode_request(1, "1080p")).await.unwrap();

    f.service.on_time_changed(0);
    f.service.on_time_changed(5_000);

    assert_eq!(f.service.state(), AutoplayState::Armed);
    assert!(f.requests.try_recv().is_err());
}

#[tokio::test]
async fn test_unknown_quality_falls_back_to_best_source() {
    let mut f = fixture();
    f.service.handle_play(&episode_request(1, "4k")).await.unwrap();

    assert!(f.service.play_next_now());

    let request = f.requests.try_recv().unwrap();
    assert_eq!(request.url(), "http://local/s01e02-1080.mkv");
    assert_eq!(request.quality(), Some("1080p"));
}

#[tokio::test]
async fn test_play_next_now_without_next_episode() {
    let mut f = fixture();

    assert!(!f.service.play_next_now());

    assert!(f.requests.try_recv().is_err());
    assert!(f.player.calls().is_empty());
}

#[tokio::test]
async fn test_stop_disarms() {
    let mut f = fixture();
    f.service.handle_play(&episode_request(1, "1080p")).await.unwrap();

    f.service.stop();

    assert_eq!(f.service.state(), AutoplayState::Idle);
    assert!(!f.service.play_next_now());
    assert!(f.requests.try_recv().is_err());
}

// =============================================================================
// Coordinator
// =============================================================================

#[tokio::test]
async fn test_coordinator_plays_next_episode() {
    let players = Arc::new(PlayerRegistry::new());
    let player = FakePlayer::new("internalPlayer");
    players.register(player.clone()).unwrap();
    players.set_active(Some("internalPlayer")).unwrap();

    let events = PlaybackEventHub::new(players.clone(), Arc::new(TorrentStreamHub::new()));
    let subtitles = SubtitleSynchronizer::new(
        Arc::new(FakeSubtitleProvider::new(&[])),
        Arc::new(NoPicker),
        Arc::new(BackendRegistry::new()),
        Arc::new(LogNotifier),
        settings(true),
    );
    let (autoplay, next_requests) = AutoplayService::new(
        settings(true),
        Arc::new(FakeLookup::new(season_one())),
        players.clone(),
    );
    let coordinator = Arc::new(PlaybackCoordinator::new(
        players,
        events,
        subtitles,
        autoplay,
        next_requests,
    ));
    let receiver = coordinator.next_requests().unwrap();
    assert!(coordinator.next_requests().is_none());
    let runner = coordinator.clone();
    let autoplay_loop = tokio::spawn(async move { runner.run_autoplay_loop(receiver).await });

    coordinator.play(episode_request(1, "1080p")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(coordinator.autoplay().state(), AutoplayState::Armed);

    player.emit_duration(HOUR_MS);
    player.emit_time(HOUR_MS - 500);
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(
        player.calls(),
        vec![
            "play http://local/s01e01-1080p.mkv",
            "pause",
            "play http://local/s01e02-1080.mkv",
        ]
    );
    assert_eq!(player.state(), PlayerState::Playing);
    autoplay_loop.abort();
}

#[tokio::test]
async fn test_coordinator_requires_active_player() {
    let players = Arc::new(PlayerRegistry::new());
    let events = PlaybackEventHub::new(players.clone(), Arc::new(TorrentStreamHub::new()));
    let subtitles = SubtitleSynchronizer::new(
        Arc::new(FakeSubtitleProvider::new(&[])),
        Arc::new(NoPicker),
        Arc::new(BackendRegistry::new()),
        Arc::new(LogNotifier),
        settings(true),
    );
    let (autoplay, next_requests) = AutoplayService::new(
        settings(true),
        Arc::new(FakeLookup::new(season_one())),
        players.clone(),
    );
    let coordinator = PlaybackCoordinator::new(players, events, subtitles, autoplay, next_requests);

    let result = coordinator.play(episode_request(1, "1080p")).await;

    assert!(result.is_err());
}

fn subtitled_request(url: &str) -> PlaybackRequest {
    PlaybackRequest::builder()
        .url(url)
        .quality("1080p")
        .subtitles_enabled(true)
        .build()
}

fn coordinator_for(
    player: Arc<FakePlayer>,
    provider: Arc<FakeSubtitleProvider>,
) -> PlaybackCoordinator {
    let players = Arc::new(PlayerRegistry::new());
    let id = player.id().to_string();
    players.register(player).unwrap();
    players.set_active(Some(&id)).unwrap();

    let events = PlaybackEventHub::new(players.clone(), Arc::new(TorrentStreamHub::new()));
    let subtitles = SubtitleSynchronizer::new(
        provider,
        Arc::new(NoPicker),
        Arc::new(BackendRegistry::new()),
        Arc::new(LogNotifier),
        settings(true),
    );
    let (autoplay, next_requests) = AutoplayService::new(
        settings(true),
        Arc::new(FakeLookup::new(season_one())),
        players.clone(),
    );
    PlaybackCoordinator::new(players, events, subtitles, autoplay, next_requests)
}

#[tokio::test]
async fn test_coordinator_resolves_subtitles_after_player_started() {
    let provider = Arc::new(FakeSubtitleProvider::new(&["eng"]));
    let coordinator = coordinator_for(FakePlayer::new("internalPlayer"), provider.clone());

    coordinator.play(subtitled_request("http://local/movie.mkv")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(provider.lookups().len(), 1);
}

#[tokio::test]
async fn test_coordinator_skips_subtitles_when_player_fails() {
    let provider = Arc::new(FakeSubtitleProvider::new(&["eng"]));
    let player = FakePlayer::failing("internalPlayer");
    let coordinator = coordinator_for(player.clone(), provider.clone());

    let result = coordinator.play(subtitled_request("http://local/movie.mkv")).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(result.is_err());
    assert_eq!(player.calls(), vec!["play http://local/movie.mkv"]);
    assert!(provider.lookups().is_empty());
    assert!(coordinator.subtitles().active().is_none());
}
