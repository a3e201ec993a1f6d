//! Wiring of the orchestration components for one application

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, error, info};

use crate::models::PlaybackRequest;
use crate::playback::autoplay::AutoplayService;
use crate::playback::events::{PlaybackEventHub, PlaybackObserver};
use crate::playback::players::PlayerRegistry;
use crate::playback::subtitle_sync::SubtitleSynchronizer;

/// Routes play requests through the event hub, autoplay, subtitles and the
/// active player.
pub struct PlaybackCoordinator {
    players: Arc<PlayerRegistry>,
    events: Arc<PlaybackEventHub>,
    subtitles: Arc<SubtitleSynchronizer>,
    autoplay: Arc<AutoplayService>,
    next_requests: Mutex<Option<UnboundedReceiver<PlaybackRequest>>>,
}

impl PlaybackCoordinator {
    /// Wire the components; autoplay starts observing the event hub
    pub fn new(
        players: Arc<PlayerRegistry>,
        events: Arc<PlaybackEventHub>,
        subtitles: Arc<SubtitleSynchronizer>,
        autoplay: Arc<AutoplayService>,
        next_requests: UnboundedReceiver<PlaybackRequest>,
    ) -> Self {
        let observer: Arc<dyn PlaybackObserver> = autoplay.clone();
        events.add_observer(observer);

        Self {
            players,
            events,
            subtitles,
            autoplay,
            next_requests: Mutex::new(Some(next_requests)),
        }
    }

    pub fn players(&self) -> &Arc<PlayerRegistry> {
        &self.players
    }

    pub fn events(&self) -> &Arc<PlaybackEventHub> {
        &self.events
    }

    pub fn subtitles(&self) -> &Arc<SubtitleSynchronizer> {
        &self.subtitles
    }

    pub fn autoplay(&self) -> &Arc<AutoplayService> {
        &self.autoplay
    }

    /// Play the request on the active player
    pub async fn play(&self, request: PlaybackRequest) -> anyhow::Result<()> {
        let player = self
            .players
            .active()
            .ok_or_else(|| anyhow::anyhow!("No active player to play {}", request))?;
        info!("Playing {} on {}", request, player.name());

        self.events.on_play_request(&request);
        self.autoplay.on_play(request.clone());
        // resolution of the previous request must not reach the new backend
        self.subtitles.cancel();

        if let Err(e) = player.play(request.clone()).await {
            self.subtitles.stop();
            return Err(e);
        }
        self.subtitles.spawn_play(request);
        Ok(())
    }

    /// Receiver of the requests emitted by autoplay, handed out once
    pub fn next_requests(&self) -> Option<UnboundedReceiver<PlaybackRequest>> {
        self.next_requests.lock().take()
    }

    /// Play every autoplay request until the sender is gone
    pub async fn run_autoplay_loop(&self, mut receiver: UnboundedReceiver<PlaybackRequest>) {
        while let Some(request) = receiver.recv().await {
            debug!("Autoplay requested {}", request);
            if let Err(e) = self.play(request).await {
                error!("Failed to play next episode, {}", e);
            }
        }
    }

    /// Stop playback and reset every component
    pub fn stop(&self) {
        info!("Stopping playback");
        self.events.close_player();
        self.subtitles.stop();
        self.autoplay.stop();
    }

    /// Stop and release all players
    pub fn dispose(&self) {
        self.stop();
        self.events.detach();
        self.players.dispose();
    }
}
