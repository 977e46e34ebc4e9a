use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use futures_util::future::BoxFuture;
use kurbo::Size;
use uuid::Uuid;

use crate::errors::DeviceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SourceKind {
    Camera,
    Screen,
    Audio,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SourceKind::Camera => "camera",
            SourceKind::Screen => "screen",
            SourceKind::Audio => "audio",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Audio,
    Video,
}

/// A decoded RGBA frame, row-major, `width * height * 4` bytes.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    pub rgba: Arc<[u8]>,
}

impl VideoFrame {
    pub fn solid(width: u32, height: u32, color: [u8; 4]) -> Self {
        let pixels = (width as usize) * (height as usize);
        let rgba: Vec<u8> = color.iter().copied().cycle().take(pixels * 4).collect();
        Self {
            width,
            height,
            rgba: rgba.into(),
        }
    }

    pub fn expected_len(&self) -> usize {
        self.width as usize * self.height as usize * 4
    }
}

/// A live platform track (camera, screen capture, microphone, canvas feed).
///
/// Implementations must be Send + Sync: tracks are painted from the draw
/// loop task and stopped from whichever task releases their handle.
pub trait MediaTrack: Send + Sync {
    fn id(&self) -> &str;
    fn kind(&self) -> TrackKind;
    /// Current native resolution of a video track.
    fn dimensions(&self) -> Option<(u32, u32)>;
    fn is_live(&self) -> bool;
    fn is_enabled(&self) -> bool;
    fn set_enabled(&self, enabled: bool);
    fn stop(&self);
    fn latest_frame(&self) -> Option<VideoFrame> {
        None
    }
}

struct SourceInner {
    id: Uuid,
    kind: SourceKind,
    device_id: Option<String>,
    tracks: Vec<Arc<dyn MediaTrack>>,
    released: AtomicBool,
}

impl SourceInner {
    fn release(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        for track in &self.tracks {
            track.stop();
        }
        tracing::debug!(source = %self.id, kind = %self.kind, "media source released");
    }

    fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    fn track(&self, kind: TrackKind) -> Option<&Arc<dyn MediaTrack>> {
        self.tracks.iter().find(|t| t.kind() == kind)
    }
}

/// Exclusive owner of one acquired source.
///
/// Not `Clone`: exactly one owner exists, and the tracks are stopped exactly
/// once, either through [`MediaSourceHandle::release`] or on drop.
pub struct MediaSourceHandle {
    inner: Arc<SourceInner>,
}

impl MediaSourceHandle {
    pub fn new(
        kind: SourceKind,
        device_id: Option<String>,
        tracks: Vec<Arc<dyn MediaTrack>>,
    ) -> Self {
        Self {
            inner: Arc::new(SourceInner {
                id: Uuid::new_v4(),
                kind,
                device_id,
                tracks,
                released: AtomicBool::new(false),
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn kind(&self) -> SourceKind {
        self.inner.kind
    }

    pub fn device_id(&self) -> Option<&str> {
        self.inner.device_id.as_deref()
    }

    pub fn video_track(&self) -> Option<&Arc<dyn MediaTrack>> {
        self.inner.track(TrackKind::Video)
    }

    pub fn audio_track(&self) -> Option<&Arc<dyn MediaTrack>> {
        self.inner.track(TrackKind::Audio)
    }

    /// Native size of the video track, if the source carries one.
    pub fn size(&self) -> Option<Size> {
        video_size(&self.inner)
    }

    /// Non-owning reference for layers.
    pub fn downgrade(&self) -> SourceRef {
        SourceRef(Arc::downgrade(&self.inner))
    }

    pub fn release(self) {
        drop(self);
    }
}

impl Drop for MediaSourceHandle {
    fn drop(&mut self) {
        self.inner.release();
    }
}

impl fmt::Debug for MediaSourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaSourceHandle")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("device_id", &self.inner.device_id)
            .finish()
    }
}

fn video_size(inner: &SourceInner) -> Option<Size> {
    let (w, h) = inner.track(TrackKind::Video)?.dimensions()?;
    Some(Size::new(w as f64, h as f64))
}

/// Weak reference held by layers. Resolves to nothing once the owning
/// handle is released, so a released source is never read.
#[derive(Clone, Default)]
pub struct SourceRef(Weak<SourceInner>);

impl SourceRef {
    fn live(&self) -> Option<Arc<SourceInner>> {
        self.0.upgrade().filter(|inner| !inner.is_released())
    }

    pub fn video_track(&self) -> Option<Arc<dyn MediaTrack>> {
        self.live()?.track(TrackKind::Video).cloned()
    }

    pub fn size(&self) -> Option<Size> {
        let inner = self.live()?;
        video_size(&inner)
    }

    pub fn source_id(&self) -> Option<Uuid> {
        self.live().map(|inner| inner.id)
    }

    pub fn is_live(&self) -> bool {
        self.live().is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcquireRequest {
    pub kind: SourceKind,
    pub device_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub id: String,
    pub kind: SourceKind,
    pub label: String,
}

impl DeviceInfo {
    /// Label for device pickers; unlabeled devices get a positional name.
    pub fn display_name(&self, index: usize) -> String {
        if !self.label.is_empty() {
            return self.label.clone();
        }
        let prefix: String = self.id.chars().take(7).collect();
        let noun = match self.kind {
            SourceKind::Audio => "Audio",
            _ => "Camera",
        };
        format!("{noun} device {index} ({prefix})")
    }
}

/// Reads a byte frequency spectrum from an audio source.
pub trait SpectrumAnalyser: Send {
    fn bin_count(&self) -> usize;
    fn byte_frequency_data(&mut self, out: &mut [u8]);
    fn disconnect(&mut self);
}

/// Platform device access: permission prompts, enumeration, capture.
pub trait DeviceMedia: Send + Sync {
    fn acquire(
        &self,
        request: AcquireRequest,
    ) -> BoxFuture<'_, Result<MediaSourceHandle, DeviceError>>;

    fn enumerate(&self) -> BoxFuture<'_, Result<Vec<DeviceInfo>, DeviceError>>;

    fn analyser(
        &self,
        source: &MediaSourceHandle,
    ) -> Result<Box<dyn SpectrumAnalyser>, DeviceError>;
}
