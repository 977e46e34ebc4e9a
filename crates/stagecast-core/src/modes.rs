//! Presentation modes: the mutually exclusive arrangements of layers.
//!
//! A mode is built from sources its caller already acquired, so building
//! one never fails. `attach` registers layers and interaction; `detach`
//! consumes the mode, unregisters everything and releases its sources.

mod camera;
mod idle;
mod screen;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::audio_level::{AudioLevelSampler, LevelFeed};
use crate::compositor::{Compositor, Layer, LayerId};
use crate::interaction::InteractionController;
use crate::media::{MediaSourceHandle, SourceRef};
use crate::settings::Settings;

pub use camera::CameraMode;
pub use idle::{DEFAULT_AVATAR_URI, IdleMode};
pub use screen::ScreenShareMode;

/// Priority slot of the full-surface layer of every mode.
pub const BACKGROUND_SLOT: i32 = 0;
/// Priority slot of the movable camera overlay.
pub const OVERLAY_SLOT: i32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModeKind {
    Camera,
    Screen,
    Idle,
}

impl fmt::Display for ModeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ModeKind::Camera => "camera",
            ModeKind::Screen => "screen",
            ModeKind::Idle => "idle",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceTopic {
    Video,
    Audio,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Which device-change notifications the current mode wants routed to it.
/// Modes subscribe on attach and unsubscribe on detach.
#[derive(Debug, Default)]
pub struct DeviceSubscriptions {
    next_id: u64,
    entries: Vec<(SubscriptionId, DeviceTopic)>,
}

impl DeviceSubscriptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, topic: DeviceTopic) -> SubscriptionId {
        self.next_id += 1;
        let id = SubscriptionId(self.next_id);
        self.entries.push((id, topic));
        id
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) {
        self.entries.retain(|(sid, _)| *sid != id);
    }

    pub fn is_subscribed(&self, topic: DeviceTopic) -> bool {
        self.entries.iter().any(|(_, t)| *t == topic)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Everything a mode touches while attaching or detaching.
pub struct ModeContext<'a> {
    pub compositor: &'a mut Compositor,
    pub interaction: &'a mut InteractionController,
    pub subscriptions: &'a mut DeviceSubscriptions,
    pub settings: &'a Settings,
    pub levels: &'a LevelFeed,
}

pub trait PresentationMode: Send {
    fn kind(&self) -> ModeKind;

    /// Register layers, interaction and device subscriptions. The camera
    /// layer, if any, starts with `camera_visible`.
    fn attach(&mut self, ctx: &mut ModeContext<'_>, camera_visible: bool);

    /// Undo `attach` and release every owned source.
    fn detach(self: Box<Self>, ctx: &mut ModeContext<'_>);

    fn set_camera_visible(&mut self, compositor: &mut Compositor, visible: bool);

    fn is_camera_visible(&self) -> bool;

    /// Owned sources that are not released yet.
    fn live_sources(&self) -> usize;

    fn camera_layer(&self) -> Option<LayerId> {
        None
    }

    /// Swap the camera source in place. Returns the displaced handle, or
    /// hands `camera` back when the mode shows no camera.
    fn replace_camera(
        &mut self,
        compositor: &mut Compositor,
        camera: MediaSourceHandle,
    ) -> Option<MediaSourceHandle> {
        let _ = compositor;
        Some(camera)
    }

    /// Slot holding the mode's level sampler, for modes that show levels.
    /// On an audio source change the caller empties the slot (tearing the
    /// old sampler down) before storing one built against the new source.
    fn level_sampler(&mut self) -> Option<&mut Option<AudioLevelSampler>> {
        None
    }
}

/// Camera handling shared by the modes that show one.
pub(crate) struct CameraSlot {
    handle: Option<MediaSourceHandle>,
    layer: Option<LayerId>,
    visible: bool,
}

impl CameraSlot {
    pub(crate) fn new(handle: MediaSourceHandle) -> Self {
        Self {
            handle: Some(handle),
            layer: None,
            visible: true,
        }
    }

    pub(crate) fn source(&self) -> SourceRef {
        self.handle
            .as_ref()
            .map(MediaSourceHandle::downgrade)
            .unwrap_or_default()
    }

    pub(crate) fn handle(&self) -> Option<&MediaSourceHandle> {
        self.handle.as_ref()
    }

    pub(crate) fn layer(&self) -> Option<LayerId> {
        self.layer
    }

    pub(crate) fn add_layer(
        &mut self,
        compositor: &mut Compositor,
        mut layer: Layer,
        visible: bool,
    ) -> LayerId {
        layer.set_enabled(visible);
        self.visible = visible;
        let id = add_mode_layer(compositor, layer);
        self.layer = Some(id);
        id
    }

    pub(crate) fn set_visible(&mut self, compositor: &mut Compositor, visible: bool) {
        self.visible = visible;
        if let Some(layer) = self.layer.and_then(|id| compositor.layer_mut(id)) {
            layer.set_enabled(visible);
        }
    }

    pub(crate) fn is_visible(&self) -> bool {
        self.visible
    }

    /// Repoint the layer at `camera` and hand back the previous handle.
    pub(crate) fn replace(
        &mut self,
        compositor: &mut Compositor,
        camera: MediaSourceHandle,
    ) -> Option<MediaSourceHandle> {
        if let Some(layer) = self.layer.and_then(|id| compositor.layer_mut(id)) {
            layer.set_source(camera.downgrade());
        }
        self.handle.replace(camera)
    }

    pub(crate) fn remove(&mut self, compositor: &mut Compositor) {
        if let Some(id) = self.layer.take() {
            compositor.remove_layer(id);
        }
        self.handle = None;
    }

    pub(crate) fn live(&self) -> usize {
        usize::from(self.handle.is_some())
    }
}

/// Add a layer for a mode; a displaced layer means the previous mode
/// did not detach cleanly.
pub(crate) fn add_mode_layer(compositor: &mut Compositor, layer: Layer) -> LayerId {
    let (id, displaced) = compositor.add_layer(layer);
    if let Some(old) = displaced {
        tracing::warn!(layer = ?old.id(), "mode layer displaced a stale layer");
    }
    id
}
