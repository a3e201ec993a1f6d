//! Active-Player Registry Tests
//!
//! Registration, active player changes and disposal.

mod common;

use parking_lot::Mutex;
use std::sync::Arc;

use common::FakePlayer;
use streamplay::playback::{
    InternalPlayer, Player, PlayerChange, PlayerRegistry, PlayerRegistryListener, RegistryError,
    INTERNAL_PLAYER_ID,
};
use streamplay::stream::BackendRegistry;

#[derive(Default)]
struct ChangeRecorder {
    changes: Mutex<Vec<PlayerChange>>,
    list_changes: Mutex<usize>,
}

impl PlayerRegistryListener for ChangeRecorder {
    fn on_active_player_changed(&self, change: &PlayerChange) {
        self.changes.lock().push(change.clone());
    }

    fn on_players_changed(&self) {
        *self.list_changes.lock() += 1;
    }
}

fn registry_with(players: &[&Arc<FakePlayer>]) -> PlayerRegistry {
    let registry = PlayerRegistry::new();
    for player in players {
        let player: Arc<dyn Player> = (*player).clone();
        registry.register(player).unwrap();
    }
    registry
}

#[test]
fn test_duplicate_register_keeps_original() {
    let original = FakePlayer::new("chromecast:TV");
    let registry = registry_with(&[&original]);

    let duplicate: Arc<dyn Player> = FakePlayer::new("chromecast:TV");
    let result = registry.register(duplicate);

    assert_eq!(
        result,
        Err(RegistryError::PlayerAlreadyExists("chromecast:TV".into()))
    );
    assert_eq!(registry.list().len(), 1);
    let registered = registry.get_by_id("chromecast:TV").unwrap();
    let original: Arc<dyn Player> = original;
    assert!(Arc::ptr_eq(&registered, &original));
}

#[test]
fn test_list_keeps_registration_order() {
    let a = FakePlayer::new("a");
    let b = FakePlayer::new("b");
    let c = FakePlayer::new("c");
    let registry = registry_with(&[&b, &a, &c]);

    let ids: Vec<String> = registry.list().iter().map(|p| p.id().to_string()).collect();

    assert_eq!(ids, vec!["b", "a", "c"]);
}

#[test]
fn test_set_active_notifies_once_per_change() {
    let a = FakePlayer::new("a");
    let b = FakePlayer::new("b");
    let registry = registry_with(&[&a, &b]);
    let recorder = Arc::new(ChangeRecorder::default());
    registry.add_listener(recorder.clone());

    registry.set_active(Some("a")).unwrap();
    registry.set_active(Some("a")).unwrap();
    registry.set_active(Some("b")).unwrap();
    registry.set_active(None).unwrap();

    let changes = recorder.changes.lock().clone();
    assert_eq!(changes.len(), 3);
    assert_eq!(changes[0].old_id, None);
    assert_eq!(changes[0].new_id.as_deref(), Some("a"));
    assert_eq!(changes[1].old_id.as_deref(), Some("a"));
    assert_eq!(changes[1].new_name.as_deref(), Some("b"));
    assert_eq!(changes[2].new_id, None);
    assert!(registry.active().is_none());
}

#[test]
fn test_set_active_unknown_player() {
    let registry = registry_with(&[&FakePlayer::new("a")]);

    let result = registry.set_active(Some("missing"));

    assert_eq!(result, Err(RegistryError::PlayerNotFound("missing".into())));
    assert!(registry.active().is_none());
}

#[test]
fn test_unregister_active_player_clears_it() {
    let a = FakePlayer::new("a");
    let registry = registry_with(&[&a]);
    registry.set_active(Some("a")).unwrap();
    let recorder = Arc::new(ChangeRecorder::default());
    registry.add_listener(recorder.clone());

    let removed = registry.unregister("a");

    assert!(removed.is_some());
    assert!(registry.active().is_none());
    assert_eq!(recorder.changes.lock().len(), 1);
    assert_eq!(*recorder.list_changes.lock(), 1);
    assert!(registry.unregister("a").is_none());
}

#[test]
fn test_dispose_continues_after_failure() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let first = FakePlayer::with_log("first", false, log.clone());
    let second = FakePlayer::with_log("second", true, log.clone());
    let third = FakePlayer::with_log("third", false, log.clone());
    let registry = registry_with(&[&first, &second, &third]);

    registry.dispose();
    registry.dispose();

    assert_eq!(*log.lock(), vec!["first", "second", "third"]);
    assert_eq!(first.disposals(), 1);
    assert_eq!(second.disposals(), 1);
    assert_eq!(third.disposals(), 1);
    assert!(registry.active().is_none());
}

#[test]
fn test_internal_player_identity() {
    let internal = InternalPlayer::new(Arc::new(BackendRegistry::new()));

    assert_eq!(internal.id(), INTERNAL_PLAYER_ID);
    assert!(internal.supports_embedded_playback());
}

#[tokio::test]
async fn test_internal_player_without_backend_fails() {
    let internal = InternalPlayer::new(Arc::new(BackendRegistry::new()));
    let request = streamplay::models::PlaybackRequest::builder()
        .url("http://local/a.mkv")
        .build();

    tokio_test::assert_err!(internal.play(request).await);
    assert!(internal.request().is_some());
}
