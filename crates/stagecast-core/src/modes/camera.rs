use kurbo::Size;

use super::{
    BACKGROUND_SLOT, CameraSlot, DeviceTopic, ModeContext, ModeKind, PresentationMode,
    SubscriptionId,
};
use crate::compositor::{Compositor, Layer, LayerContent, LayerId};
use crate::layout::fit_centered;
use crate::media::MediaSourceHandle;

/// Full-surface camera view.
pub struct CameraMode {
    camera: CameraSlot,
    subscription: Option<SubscriptionId>,
}

impl CameraMode {
    pub fn new(camera: MediaSourceHandle) -> Self {
        Self {
            camera: CameraSlot::new(camera),
            subscription: None,
        }
    }
}

impl PresentationMode for CameraMode {
    fn kind(&self) -> ModeKind {
        ModeKind::Camera
    }

    fn attach(&mut self, ctx: &mut ModeContext<'_>, camera_visible: bool) {
        let surface = ctx.compositor.size();
        let stream = self
            .camera
            .handle()
            .and_then(MediaSourceHandle::size)
            .unwrap_or(surface);

        let layer = Layer::new(
            LayerContent::Source(self.camera.source()),
            fit_centered(surface, stream, true),
        )
        .with_priority(BACKGROUND_SLOT)
        .with_pre_draw(|geometry, layout| {
            if let Some(source) = layout.source.filter(|s| *s != Size::ZERO) {
                *geometry = fit_centered(layout.surface, source, true);
            }
            Ok(())
        });

        let id = self.camera.add_layer(ctx.compositor, layer, camera_visible);
        self.subscription = Some(ctx.subscriptions.subscribe(DeviceTopic::Video));
        tracing::info!(layer = ?id, "camera mode attached");
    }

    fn detach(mut self: Box<Self>, ctx: &mut ModeContext<'_>) {
        if let Some(sub) = self.subscription.take() {
            ctx.subscriptions.unsubscribe(sub);
        }
        self.camera.remove(ctx.compositor);
        tracing::info!("camera mode detached");
    }

    fn set_camera_visible(&mut self, compositor: &mut Compositor, visible: bool) {
        self.camera.set_visible(compositor, visible);
    }

    fn is_camera_visible(&self) -> bool {
        self.camera.is_visible()
    }

    fn live_sources(&self) -> usize {
        self.camera.live()
    }

    fn camera_layer(&self) -> Option<LayerId> {
        self.camera.layer()
    }

    fn replace_camera(
        &mut self,
        compositor: &mut Compositor,
        camera: MediaSourceHandle,
    ) -> Option<MediaSourceHandle> {
        self.camera.replace(compositor, camera)
    }
}
