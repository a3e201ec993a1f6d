//! Listener plumbing shared by every orchestration component
//!
//! - [`Listeners`]: copy-on-iterate listener set with panic isolation
//! - [`PlayerListener`]: state/time/duration/volume events of a player or backend
//! - [`Notifier`]: user-visible notifications for soft failures

use parking_lot::Mutex;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{error, trace, warn};

use crate::models::PlayerState;

// =============================================================================
// Listener Set
// =============================================================================

/// Set of listeners identified by pointer.
///
/// Invocation works on a snapshot, so listeners may add or remove entries
/// (including themselves) while an event is being delivered.
pub struct Listeners<L: ?Sized> {
    inner: Mutex<Vec<Arc<L>>>,
}

impl<L: ?Sized> Listeners<L> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Vec::new()),
        }
    }

    /// Add a listener; adding the same listener twice is a no-op
    pub fn add(&self, listener: Arc<L>) {
        let mut inner = self.inner.lock();
        if inner.iter().any(|l| same(l, &listener)) {
            trace!("Listener already registered, ignoring");
            return;
        }
        inner.push(listener);
        trace!("Added listener, new total {}", inner.len());
    }

    /// Remove a listener, returns false when it wasn't registered
    pub fn remove(&self, listener: &Arc<L>) -> bool {
        let mut inner = self.inner.lock();
        match inner.iter().position(|l| same(l, listener)) {
            Some(position) => {
                inner.remove(position);
                true
            }
            None => {
                warn!("Unable to remove listener, listener not found");
                false
            }
        }
    }

    pub fn contains(&self, listener: &Arc<L>) -> bool {
        self.inner.lock().iter().any(|l| same(l, listener))
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    pub fn clear(&self) {
        self.inner.lock().clear();
    }

    /// Copy of the current listeners
    pub fn snapshot(&self) -> Vec<Arc<L>> {
        self.inner.lock().clone()
    }

    /// Deliver an event to every listener.
    ///
    /// A panicking listener is logged and skipped; the others still receive
    /// the event.
    pub fn invoke<F>(&self, f: F)
    where
        F: Fn(&L),
    {
        for listener in self.snapshot() {
            if let Err(e) = catch_unwind(AssertUnwindSafe(|| f(&listener))) {
                error!("Listener panicked while handling event, {}", panic_message(&e));
            }
        }
    }
}

impl<L: ?Sized> Default for Listeners<L> {
    fn default() -> Self {
        Self::new()
    }
}

impl<L: ?Sized> fmt::Debug for Listeners<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listeners")
            .field("len", &self.len())
            .finish()
    }
}

fn same<L: ?Sized>(a: &Arc<L>, b: &Arc<L>) -> bool {
    Arc::as_ptr(a).cast::<()>() == Arc::as_ptr(b).cast::<()>()
}

fn panic_message(payload: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

// =============================================================================
// Player Events
// =============================================================================

/// Events emitted by backends and logical players.
///
/// Every method has an empty default so listeners only implement what they
/// care about.
pub trait PlayerListener: Send + Sync {
    fn on_state_changed(&self, _state: PlayerState) {}

    /// Playback position in milliseconds
    fn on_time_changed(&self, _time_ms: u64) {}

    /// Media duration in milliseconds
    fn on_duration_changed(&self, _duration_ms: u64) {}

    /// Volume between 0 and 100
    fn on_volume_changed(&self, _volume: u8) {}
}

// =============================================================================
// Notifications
// =============================================================================

/// Severity of a user-visible notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    Info,
    Warning,
    Error,
}

/// Message surfaced to the user for soft failures
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub kind: NotificationKind,
    pub message: String,
}

impl Notification {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            kind: NotificationKind::Info,
            message: message.into(),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            kind: NotificationKind::Warning,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            kind: NotificationKind::Error,
            message: message.into(),
        }
    }
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            NotificationKind::Info => write!(f, "{}", self.message),
            NotificationKind::Warning => write!(f, "warning: {}", self.message),
            NotificationKind::Error => write!(f, "error: {}", self.message),
        }
    }
}

/// Sink for user-visible notifications
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// Notifier that only writes to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notification: Notification) {
        match notification.kind {
            NotificationKind::Info => tracing::info!("{}", notification.message),
            NotificationKind::Warning => warn!("{}", notification.message),
            NotificationKind::Error => error!("{}", notification.message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    trait Counter: Send + Sync {
        fn hit(&self);
    }

    #[derive(Default)]
    struct Counting(AtomicUsize);

    impl Counter for Counting {
        fn hit(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Panicking;

    impl Counter for Panicking {
        fn hit(&self) {
            panic!("observer failure");
        }
    }

    #[test]
    fn test_add_is_idempotent() {
        let listeners: Listeners<dyn Counter> = Listeners::new();
        let counter: Arc<dyn Counter> = Arc::new(Counting::default());

        listeners.add(counter.clone());
        listeners.add(counter.clone());

        assert_eq!(listeners.len(), 1);
    }

    #[test]
    fn test_remove_by_identity() {
        let listeners: Listeners<dyn Counter> = Listeners::new();
        let a: Arc<dyn Counter> = Arc::new(Counting::default());
        let b: Arc<dyn Counter> = Arc::new(Counting::default());

        listeners.add(a.clone());
        listeners.add(b.clone());

        assert!(listeners.remove(&a));
        assert!(!listeners.remove(&a));
        assert!(listeners.contains(&b));
        assert_eq!(listeners.len(), 1);
    }

    #[test]
    fn test_panicking_listener_does_not_stop_delivery() {
        let listeners: Listeners<dyn Counter> = Listeners::new();
        let first = Arc::new(Counting::default());
        let last = Arc::new(Counting::default());

        listeners.add(first.clone());
        listeners.add(Arc::new(Panicking));
        listeners.add(last.clone());

        listeners.invoke(|l| l.hit());

        assert_eq!(first.0.load(Ordering::SeqCst), 1);
        assert_eq!(last.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_notification_display() {
        assert_eq!(Notification::warning("no subs").to_string(), "warning: no subs");
        assert_eq!(Notification::info("ok").to_string(), "ok");
    }
}
