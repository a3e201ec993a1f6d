//! Torrent stream events
//!
//! The torrent engine itself lives outside this crate. It feeds stream state
//! and download progress into a [`TorrentStreamHub`], which fans them out to
//! the listeners registered for a [`StreamHandle`].

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, trace, warn};

use crate::models::{DownloadStatus, StreamHandle, StreamState};
use crate::playback::listeners::Listeners;

/// Events of a torrent stream
pub trait StreamListener: Send + Sync {
    fn on_stream_state_changed(&self, _state: &StreamState) {}

    fn on_download_status(&self, _status: &DownloadStatus) {}
}

/// Source of torrent stream events
pub trait StreamSource: Send + Sync {
    fn add_listener(&self, handle: StreamHandle, listener: Arc<dyn StreamListener>);

    fn remove_listener(&self, handle: StreamHandle, listener: &Arc<dyn StreamListener>);
}

#[derive(Default)]
struct StreamEntry {
    state: Option<StreamState>,
    status: Option<DownloadStatus>,
    listeners: Arc<Listeners<dyn StreamListener>>,
}

/// In-memory stream source fed by the torrent engine
#[derive(Default)]
pub struct TorrentStreamHub {
    streams: RwLock<HashMap<StreamHandle, StreamEntry>>,
}

impl TorrentStreamHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a new stream
    pub fn create_stream(&self) -> StreamHandle {
        let handle = StreamHandle::new();
        self.streams.write().insert(
            handle,
            StreamEntry {
                state: Some(StreamState::Starting),
                ..StreamEntry::default()
            },
        );
        debug!("Created torrent stream {}", handle);
        handle
    }

    /// Publish a state change of the stream
    pub fn publish_state(&self, handle: StreamHandle, state: StreamState) {
        let listeners = {
            let mut streams = self.streams.write();
            let entry = streams.entry(handle).or_default();
            trace!("Stream {} state {}", handle, state);
            entry.state = Some(state.clone());
            entry.listeners.clone()
        };

        listeners.invoke(|l| l.on_stream_state_changed(&state));
    }

    /// Publish a download progress snapshot; replaces the previous one
    pub fn publish_download_status(&self, handle: StreamHandle, status: DownloadStatus) {
        let listeners = {
            let mut streams = self.streams.write();
            let entry = streams.entry(handle).or_default();
            entry.status = Some(status);
            entry.listeners.clone()
        };

        listeners.invoke(|l| l.on_download_status(&status));
    }

    pub fn state(&self, handle: StreamHandle) -> Option<StreamState> {
        self.streams.read().get(&handle).and_then(|e| e.state.clone())
    }

    pub fn download_status(&self, handle: StreamHandle) -> Option<DownloadStatus> {
        self.streams.read().get(&handle).and_then(|e| e.status)
    }

    pub fn listener_count(&self, handle: StreamHandle) -> usize {
        self.streams
            .read()
            .get(&handle)
            .map(|e| e.listeners.len())
            .unwrap_or(0)
    }

    /// Stop tracking the stream, listeners receive a final `Stopped`
    pub fn remove_stream(&self, handle: StreamHandle) {
        let Some(entry) = self.streams.write().remove(&handle) else {
            warn!("Unable to remove stream {}, stream not found", handle);
            return;
        };

        entry
            .listeners
            .invoke(|l| l.on_stream_state_changed(&StreamState::Stopped));
        debug!("Removed torrent stream {}", handle);
    }
}

impl StreamSource for TorrentStreamHub {
    fn add_listener(&self, handle: StreamHandle, listener: Arc<dyn StreamListener>) {
        self.streams
            .write()
            .entry(handle)
            .or_default()
            .listeners
            .add(listener);
    }

    fn remove_listener(&self, handle: StreamHandle, listener: &Arc<dyn StreamListener>) {
        if let Some(entry) = self.streams.read().get(&handle) {
            entry.listeners.remove(listener);
        }
    }
}
