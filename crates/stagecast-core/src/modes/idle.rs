use kurbo::{Point, Size, Vec2};

use super::{
    BACKGROUND_SLOT, DeviceTopic, ModeContext, ModeKind, PresentationMode, SubscriptionId,
    add_mode_layer,
};
use crate::audio_level::{AudioLevelSampler, level_bar_rects};
use crate::compositor::{Compositor, Layer, LayerContent, LayerGeometry, LayerId};
use crate::surface::{Color, ImageAsset};

/// Placeholder for avatars without a configured picture.
pub const DEFAULT_AVATAR_URI: &str = "builtin:avatar";

const BAR_WIDTH: f64 = 6.0;
const BAR_GAP: f64 = 4.0;
const BAR_MAX_HEIGHT: f64 = 48.0;
const BAR_OFFSET: f64 = 40.0;

/// Static avatar with a voice level meter underneath. Holds no video
/// source.
pub struct IdleMode {
    avatar: ImageAsset,
    sampler: Option<AudioLevelSampler>,
    layer: Option<LayerId>,
    subscription: Option<SubscriptionId>,
    camera_visible: bool,
}

impl IdleMode {
    /// `sampler` is `None` when no microphone could be analysed; the
    /// avatar still shows, without bars.
    pub fn new(avatar: ImageAsset, sampler: Option<AudioLevelSampler>) -> Self {
        Self {
            avatar,
            sampler,
            layer: None,
            subscription: None,
            camera_visible: false,
        }
    }

    pub fn has_sampler(&self) -> bool {
        self.sampler.is_some()
    }
}

impl PresentationMode for IdleMode {
    fn kind(&self) -> ModeKind {
        ModeKind::Idle
    }

    fn attach(&mut self, ctx: &mut ModeContext<'_>, camera_visible: bool) {
        self.camera_visible = camera_visible;
        let surface = ctx.compositor.size();
        let side = self.avatar.size.width.max(self.avatar.size.height);
        let geometry = LayerGeometry::new(
            Point::new(surface.width / 2.0, surface.height / 2.0),
            Size::new(side, side),
            Vec2::new(0.5, 0.5),
        );

        let tap = ctx.levels.subscribe();
        let avatar = Layer::new(LayerContent::Image(self.avatar.clone()), geometry)
            .with_priority(BACKGROUND_SLOT)
            .with_post_draw(move |geometry, surface| {
                let bounds = geometry.bounds();
                let center = Point::new(bounds.center().x, bounds.y1 + BAR_OFFSET);
                let levels = tap.latest();
                for bar in level_bar_rects(&levels, center, BAR_WIDTH, BAR_GAP, BAR_MAX_HEIGHT) {
                    surface.fill_rect(bar, Color::WHITE)?;
                }
                Ok(())
            });
        self.layer = Some(add_mode_layer(ctx.compositor, avatar));
        self.subscription = Some(ctx.subscriptions.subscribe(DeviceTopic::Audio));
        tracing::info!(levels = self.sampler.is_some(), "idle mode attached");
    }

    fn detach(mut self: Box<Self>, ctx: &mut ModeContext<'_>) {
        if let Some(sub) = self.subscription.take() {
            ctx.subscriptions.unsubscribe(sub);
        }
        if let Some(id) = self.layer.take() {
            ctx.compositor.remove_layer(id);
        }
        self.sampler = None;
        tracing::info!("idle mode detached");
    }

    /// Nothing to show or hide; the flag is kept so the next mode can
    /// inherit it.
    fn set_camera_visible(&mut self, _compositor: &mut Compositor, visible: bool) {
        self.camera_visible = visible;
    }

    fn is_camera_visible(&self) -> bool {
        self.camera_visible
    }

    fn live_sources(&self) -> usize {
        0
    }

    fn level_sampler(&mut self) -> Option<&mut Option<AudioLevelSampler>> {
        Some(&mut self.sampler)
    }
}
