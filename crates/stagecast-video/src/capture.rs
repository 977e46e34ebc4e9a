use std::sync::atomic::{AtomicBool, Ordering};

use stagecast_core::media::{MediaTrack, TrackKind, VideoFrame};
use tokio::sync::watch;

/// Live feed of a [`crate::RasterSurface`]'s presented frames.
///
/// The track does not pace itself: it always yields the most recently
/// presented frame, and `fps` is the rate the consumer asked for.
pub struct CanvasCaptureTrack {
    id: String,
    dimensions: (u32, u32),
    fps: u32,
    frames: watch::Receiver<Option<VideoFrame>>,
    live: AtomicBool,
    enabled: AtomicBool,
}

impl CanvasCaptureTrack {
    pub(crate) fn new(
        id: String,
        dimensions: (u32, u32),
        fps: u32,
        frames: watch::Receiver<Option<VideoFrame>>,
    ) -> Self {
        Self {
            id,
            dimensions,
            fps,
            frames,
            live: AtomicBool::new(true),
            enabled: AtomicBool::new(true),
        }
    }

    pub fn fps(&self) -> u32 {
        self.fps
    }
}

impl MediaTrack for CanvasCaptureTrack {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> TrackKind {
        TrackKind::Video
    }

    fn dimensions(&self) -> Option<(u32, u32)> {
        Some(self.dimensions)
    }

    fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    fn stop(&self) {
        if self.live.swap(false, Ordering::SeqCst) {
            tracing::debug!(id = %self.id, "canvas capture stopped");
        }
    }

    fn latest_frame(&self) -> Option<VideoFrame> {
        if !self.is_live() || !self.is_enabled() {
            return None;
        }
        self.frames.borrow().clone()
    }
}
