use kurbo::Size;

use super::{
    BACKGROUND_SLOT, CameraSlot, DeviceTopic, ModeContext, ModeKind, OVERLAY_SLOT,
    PresentationMode, SubscriptionId, add_mode_layer,
};
use crate::compositor::{Compositor, Layer, LayerContent, LayerId};
use crate::layout::{corner_overlay, fit_centered};
use crate::media::MediaSourceHandle;
use crate::surface::Color;

const OUTER_BORDER: f64 = 7.0;
const INNER_BORDER: f64 = 4.0;

/// Screen capture fitted to the surface with a movable camera overlay in
/// the bottom-right corner.
pub struct ScreenShareMode {
    screen: Option<MediaSourceHandle>,
    screen_layer: Option<LayerId>,
    camera: CameraSlot,
    subscription: Option<SubscriptionId>,
}

impl ScreenShareMode {
    pub fn new(screen: MediaSourceHandle, camera: MediaSourceHandle) -> Self {
        Self {
            screen: Some(screen),
            screen_layer: None,
            camera: CameraSlot::new(camera),
            subscription: None,
        }
    }

    pub fn screen_layer(&self) -> Option<LayerId> {
        self.screen_layer
    }
}

impl PresentationMode for ScreenShareMode {
    fn kind(&self) -> ModeKind {
        ModeKind::Screen
    }

    fn attach(&mut self, ctx: &mut ModeContext<'_>, camera_visible: bool) {
        let surface = ctx.compositor.size();
        let screen_source = self
            .screen
            .as_ref()
            .map(MediaSourceHandle::downgrade)
            .unwrap_or_default();
        let screen_size = self
            .screen
            .as_ref()
            .and_then(MediaSourceHandle::size)
            .unwrap_or(surface);

        // Screen shares change resolution when windows resize; refit every frame.
        let screen = Layer::new(
            LayerContent::Source(screen_source),
            fit_centered(surface, screen_size, false),
        )
        .with_priority(BACKGROUND_SLOT)
        .with_pre_draw(|geometry, layout| {
            if let Some(source) = layout.source.filter(|s| *s != Size::ZERO) {
                *geometry = fit_centered(layout.surface, source, false);
            }
            Ok(())
        });
        self.screen_layer = Some(add_mode_layer(ctx.compositor, screen));

        let camera_size = self
            .camera
            .handle()
            .and_then(MediaSourceHandle::size)
            .unwrap_or(Size::new(4.0, 3.0));
        let overlay = Layer::new(
            LayerContent::Source(self.camera.source()),
            corner_overlay(
                surface,
                camera_size,
                ctx.settings.padding,
                ctx.settings.overlay_width_fraction,
            ),
        )
        .with_priority(OVERLAY_SLOT)
        .with_post_draw(|geometry, surface| {
            let bounds = geometry.bounds();
            surface.stroke_rect(bounds, Color::BLACK, OUTER_BORDER)?;
            surface.stroke_rect(bounds, Color::WHITE, INNER_BORDER)?;
            Ok(())
        });
        let overlay = self.camera.add_layer(ctx.compositor, overlay, camera_visible);

        ctx.interaction.register(overlay);
        self.subscription = Some(ctx.subscriptions.subscribe(DeviceTopic::Video));
        tracing::info!(screen = ?self.screen_layer, overlay = ?overlay, "screen mode attached");
    }

    fn detach(mut self: Box<Self>, ctx: &mut ModeContext<'_>) {
        if let Some(sub) = self.subscription.take() {
            ctx.subscriptions.unsubscribe(sub);
        }
        if let Some(overlay) = self.camera.layer() {
            ctx.interaction.end_drag(ctx.compositor);
            ctx.interaction.unregister(overlay);
        }
        self.camera.remove(ctx.compositor);
        if let Some(id) = self.screen_layer.take() {
            ctx.compositor.remove_layer(id);
        }
        self.screen = None;
        tracing::info!("screen mode detached");
    }

    fn set_camera_visible(&mut self, compositor: &mut Compositor, visible: bool) {
        self.camera.set_visible(compositor, visible);
    }

    fn is_camera_visible(&self) -> bool {
        self.camera.is_visible()
    }

    fn live_sources(&self) -> usize {
        usize::from(self.screen.is_some()) + self.camera.live()
    }

    fn camera_layer(&self) -> Option<LayerId> {
        self.camera.layer()
    }

    /// Keeps the overlay's position and width; height follows the new
    /// camera's aspect ratio.
    fn replace_camera(
        &mut self,
        compositor: &mut Compositor,
        camera: MediaSourceHandle,
    ) -> Option<MediaSourceHandle> {
        let new_size = camera.size();
        let old = self.camera.replace(compositor, camera);
        if let (Some(stream), Some(layer)) = (
            new_size.filter(|s| s.width > 0.0),
            self.camera.layer().and_then(|id| compositor.layer_mut(id)),
        ) {
            let geometry = layer.geometry_mut();
            geometry.size.height = stream.height * geometry.size.width / stream.width;
        }
        old
    }
}
