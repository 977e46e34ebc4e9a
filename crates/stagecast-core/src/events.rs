use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use crate::modes::ModeKind;
use crate::streaming::StreamingState;

/// Events emitted by the session controller to UI listeners.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    ModeChanged(ModeKind),
    CameraVisibilityChanged(bool),
    MicrophoneChanged(bool),
    VideoDeviceChanged(String), // device id
    AudioDeviceChanged(String), // device id
    StreamingStateChanged(StreamingState),
    Destroyed,
}

/// Trait for receiving session events.
/// Implementations must be Send + Sync (called from tokio tasks).
pub trait SessionEventListener: Send + Sync {
    fn on_event(&self, event: SessionEvent);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Registry = Vec<(ListenerId, Arc<dyn SessionEventListener>)>;

/// Dispatches events to registered listeners, synchronously and in
/// registration order.
#[derive(Clone)]
pub struct EventEmitter {
    listeners: Arc<RwLock<Registry>>,
    next_id: Arc<AtomicU64>,
}

impl EventEmitter {
    pub fn new() -> Self {
        Self {
            listeners: Arc::new(RwLock::new(Vec::new())),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn add_listener(&self, listener: Arc<dyn SessionEventListener>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, listener));
        id
    }

    /// Returns whether a listener was registered under `id`.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write().unwrap_or_else(|e| e.into_inner());
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        listeners.len() != before
    }

    pub fn clear(&self) {
        self.listeners
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    pub fn len(&self) -> usize {
        self.listeners.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn emit(&self, event: SessionEvent) {
        // Snapshot so a listener may add or remove listeners re-entrantly.
        let listeners: Vec<Arc<dyn SessionEventListener>> = self
            .listeners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, l)| l.clone())
            .collect();
        for listener in listeners {
            listener.on_event(event.clone());
        }
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new()
    }
}
