//! Layer model and the fixed-rate draw loop.
//!
//! The compositor owns the drawing surface and an ordered set of layers.
//! Every tick it clears the surface and paints each enabled layer in
//! priority order. Layers only hold weak references to their sources: the
//! presentation mode that acquired a source stays its sole owner.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use kurbo::{Point, Rect, Size, Vec2};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::errors::LayerError;
use crate::media::{MediaTrack, SourceRef};
use crate::surface::{Color, DrawSurface, ImageAsset, PaintContent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LayerId(u64);

/// Priority used when a layer carries no explicit slot.
pub const DEFAULT_PRIORITY: i32 = 0;

pub enum LayerContent {
    Source(SourceRef),
    Image(ImageAsset),
}

impl LayerContent {
    fn native_size(&self) -> Option<Size> {
        match self {
            LayerContent::Source(source) => source.size(),
            LayerContent::Image(image) => Some(image.size),
        }
    }
}

/// Where a layer sits on the surface.
///
/// `position` is the point of the layer designated by `anchor` (0..1 per
/// axis): anchor (0, 0) is the top-left corner, (1, 1) the bottom-right.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LayerGeometry {
    pub position: Point,
    pub size: Size,
    pub anchor: Vec2,
    /// Region of the source to sample; `None` samples the whole frame.
    pub crop: Option<Rect>,
}

impl LayerGeometry {
    pub fn new(position: Point, size: Size, anchor: Vec2) -> Self {
        Self {
            position,
            size,
            anchor,
            crop: None,
        }
    }

    /// Target rectangle on the surface.
    pub fn bounds(&self) -> Rect {
        let origin = Point::new(
            self.position.x - self.size.width * self.anchor.x,
            self.position.y - self.size.height * self.anchor.y,
        );
        Rect::from_origin_size(origin, self.size)
    }
}

/// Inputs available to a pre-draw hook.
#[derive(Debug, Clone, Copy)]
pub struct LayoutContext {
    pub surface: Size,
    pub source: Option<Size>,
}

pub type PreDrawHook =
    Box<dyn FnMut(&mut LayerGeometry, &LayoutContext) -> Result<(), LayerError> + Send>;
pub type PostDrawHook =
    Box<dyn FnMut(&LayerGeometry, &mut dyn DrawSurface) -> Result<(), LayerError> + Send>;

pub struct Layer {
    id: LayerId,
    seq: u64,
    priority: Option<i32>,
    content: LayerContent,
    geometry: LayerGeometry,
    enabled: bool,
    alpha: f64,
    pre_draw: Option<PreDrawHook>,
    post_draw: Option<PostDrawHook>,
}

impl Layer {
    pub fn new(content: LayerContent, geometry: LayerGeometry) -> Self {
        Self {
            id: LayerId(0),
            seq: 0,
            priority: None,
            content,
            geometry,
            enabled: true,
            alpha: 1.0,
            pre_draw: None,
            post_draw: None,
        }
    }

    /// Reserve a priority slot. Adding a second layer to the same slot
    /// replaces the first.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_pre_draw(
        mut self,
        hook: impl FnMut(&mut LayerGeometry, &LayoutContext) -> Result<(), LayerError>
            + Send
            + 'static,
    ) -> Self {
        self.pre_draw = Some(Box::new(hook));
        self
    }

    pub fn with_post_draw(
        mut self,
        hook: impl FnMut(&LayerGeometry, &mut dyn DrawSurface) -> Result<(), LayerError>
            + Send
            + 'static,
    ) -> Self {
        self.post_draw = Some(Box::new(hook));
        self
    }

    pub fn id(&self) -> LayerId {
        self.id
    }

    pub fn priority(&self) -> Option<i32> {
        self.priority
    }

    pub fn content(&self) -> &LayerContent {
        &self.content
    }

    /// Repoint the layer at another source without touching its geometry.
    pub fn set_source(&mut self, source: SourceRef) {
        self.content = LayerContent::Source(source);
    }

    pub fn geometry(&self) -> &LayerGeometry {
        &self.geometry
    }

    pub fn geometry_mut(&mut self) -> &mut LayerGeometry {
        &mut self.geometry
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    pub fn set_alpha(&mut self, alpha: f64) {
        self.alpha = alpha.clamp(0.0, 1.0);
    }

    fn sort_key(&self) -> (i32, u64) {
        (self.priority.unwrap_or(DEFAULT_PRIORITY), self.seq)
    }
}

pub struct Compositor {
    surface: Box<dyn DrawSurface>,
    layers: Vec<Layer>,
    background: Color,
    frame_rate: u32,
    next_id: u64,
    next_seq: u64,
    frames_drawn: u64,
}

pub type SharedCompositor = Arc<Mutex<Compositor>>;

impl Compositor {
    pub fn new(surface: Box<dyn DrawSurface>, frame_rate: u32, background: Color) -> Self {
        Self {
            surface,
            layers: Vec::new(),
            background,
            frame_rate: frame_rate.max(1),
            next_id: 1,
            next_seq: 0,
            frames_drawn: 0,
        }
    }

    pub fn into_shared(self) -> SharedCompositor {
        Arc::new(Mutex::new(self))
    }

    pub fn size(&self) -> Size {
        self.surface.size()
    }

    pub fn frame_rate(&self) -> u32 {
        self.frame_rate
    }

    pub fn frames_drawn(&self) -> u64 {
        self.frames_drawn
    }

    /// Insert a layer. Returns its id and, when the layer claimed an
    /// occupied priority slot, the layer it displaced. Disposing of the
    /// displaced layer's source is the caller's job.
    pub fn add_layer(&mut self, mut layer: Layer) -> (LayerId, Option<Layer>) {
        let replaced = match layer.priority {
            Some(slot) => self
                .layers
                .iter()
                .position(|l| l.priority == Some(slot))
                .map(|idx| self.layers.remove(idx)),
            None => None,
        };
        if let Some(old) = &replaced {
            tracing::debug!(layer = ?old.id, "layer displaced from its priority slot");
        }

        let id = LayerId(self.next_id);
        self.next_id += 1;
        layer.id = id;
        layer.seq = self.next_seq;
        self.next_seq += 1;

        let key = layer.sort_key();
        let idx = self.layers.partition_point(|l| l.sort_key() <= key);
        self.layers.insert(idx, layer);
        (id, replaced)
    }

    /// Unknown ids are ignored: the matching source may already be gone.
    pub fn remove_layer(&mut self, id: LayerId) -> Option<Layer> {
        let idx = self.layers.iter().position(|l| l.id == id)?;
        Some(self.layers.remove(idx))
    }

    pub fn layer(&self, id: LayerId) -> Option<&Layer> {
        self.layers.iter().find(|l| l.id == id)
    }

    pub fn layer_mut(&mut self, id: LayerId) -> Option<&mut Layer> {
        self.layers.iter_mut().find(|l| l.id == id)
    }

    /// Layer ids in paint order.
    pub fn layer_ids(&self) -> Vec<LayerId> {
        self.layers.iter().map(|l| l.id).collect()
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn clear(&mut self) {
        self.layers.clear();
    }

    /// Topmost enabled layer whose bounds contain `point`, among `candidates`.
    pub fn hit_test(&self, point: Point, candidates: impl Fn(LayerId) -> bool) -> Option<LayerId> {
        self.layers
            .iter()
            .rev()
            .filter(|l| l.enabled && candidates(l.id))
            .find(|l| l.geometry.bounds().contains(point))
            .map(|l| l.id)
    }

    pub fn capture_stream(&mut self, fps: u32) -> Arc<dyn MediaTrack> {
        self.surface.capture_stream(fps)
    }

    /// Paint one frame. Never fails: a misbehaving layer is logged and
    /// skipped, the rest of the frame still paints.
    pub fn draw(&mut self) {
        let surface_size = self.surface.size();
        let surface = self.surface.as_mut();
        surface.clear(self.background);

        for layer in self.layers.iter_mut().filter(|l| l.enabled) {
            draw_layer(surface, layer, surface_size);
        }

        surface.present();
        self.frames_drawn += 1;
    }
}

fn draw_layer(surface: &mut dyn DrawSurface, layer: &mut Layer, surface_size: Size) {
    let source_size = layer.content.native_size();

    if let Some(hook) = layer.pre_draw.as_mut() {
        let ctx = LayoutContext {
            surface: surface_size,
            source: source_size,
        };
        if let Err(e) = hook(&mut layer.geometry, &ctx) {
            tracing::warn!(layer = ?layer.id, "pre-draw hook failed, skipping layer: {e}");
            return;
        }
    }

    let dest = layer.geometry.bounds();
    let crop = layer
        .geometry
        .crop
        .or_else(|| source_size.map(|s| s.to_rect()))
        .unwrap_or(Rect::ZERO);

    let painted = match &layer.content {
        LayerContent::Source(source) => {
            // Released, ended, or mid-replacement sources paint nothing.
            let Some(track) = source.video_track().filter(|t| t.is_live()) else {
                return;
            };
            surface.paint(PaintContent::Video(track.as_ref()), crop, dest, layer.alpha)
        }
        LayerContent::Image(image) => {
            surface.paint(PaintContent::Image(image), crop, dest, layer.alpha)
        }
    };
    if let Err(e) = painted {
        tracing::warn!(layer = ?layer.id, "paint failed: {e}");
        return;
    }

    if let Some(hook) = layer.post_draw.as_mut() {
        if let Err(e) = hook(&layer.geometry, surface) {
            tracing::warn!(layer = ?layer.id, "post-draw hook failed: {e}");
        }
    }
}

/// Handle to the background draw loop. Dropping it stops the loop.
pub struct RenderLoop {
    cancel_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl RenderLoop {
    /// Spawn the draw loop on the current tokio runtime.
    pub fn spawn(compositor: SharedCompositor) -> Self {
        let fps = lock(&compositor).frame_rate;
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let handle = tokio::spawn(draw_loop(compositor, fps, cancel_rx));
        Self { cancel_tx, handle }
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    pub fn stop(self) {
        drop(self);
    }
}

impl Drop for RenderLoop {
    fn drop(&mut self) {
        let _ = self.cancel_tx.send(true);
    }
}

async fn draw_loop(compositor: SharedCompositor, fps: u32, mut cancel_rx: watch::Receiver<bool>) {
    tracing::info!(fps, "draw loop started");
    let mut ticker = tokio::time::interval(Duration::from_secs_f64(1.0 / fps as f64));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel_rx.changed() => break,
            _ = ticker.tick() => lock(&compositor).draw(),
        }
    }

    tracing::info!("draw loop stopped");
}

pub(crate) fn lock(compositor: &SharedCompositor) -> MutexGuard<'_, Compositor> {
    compositor.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
