//! Playback orchestration
//!
//! - Listeners: listener sets, player events, notifications
//! - Players: logical players and the active-player registry
//! - Events: fan-out of player and stream events to observers
//! - Subtitle sync: subtitle resolution for the current playback
//! - Autoplay: next-episode countdown
//! - Coordinator: wiring of the above

pub mod listeners;
pub mod players;
pub mod events;
pub mod subtitle_sync;
pub mod autoplay;
pub mod coordinator;

pub use autoplay::{
    AutoplayMachine, AutoplayService, AutoplayState, CountdownState, JsonEpisodeLookup,
    MediaDetailLookup,
};
pub use coordinator::PlaybackCoordinator;
pub use events::{PlayStarted, PlaybackEventHub, PlaybackObserver};
pub use listeners::{
    Listeners, LogNotifier, Notification, NotificationKind, Notifier, PlayerListener,
};
pub use players::{
    InternalPlayer, Player, PlayerChange, PlayerRegistry, PlayerRegistryListener, RegistryError,
    INTERNAL_PLAYER_ID,
};
pub use subtitle_sync::{
    NoPicker, SubtitleLookup, SubtitleObserver, SubtitlePicker, SubtitleProvider,
    SubtitleSynchronizer,
};
