//! Constrained drag and wheel scaling for movable layers.
//!
//! Pointer coordinates are always passed in explicitly, in surface space.
//! Layer geometry lives in the compositor, so every operation takes the
//! compositor it acts on.

use kurbo::{Point, Rect, Size, Vec2};

use crate::compositor::{Compositor, LayerGeometry, LayerId};
use crate::layout::padded_width;
use crate::settings::Settings;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InteractionConfig {
    pub padding: f64,
    pub wheel_step: f64,
    pub drag_alpha: f64,
}

impl Default for InteractionConfig {
    fn default() -> Self {
        Self::from(&Settings::default())
    }
}

impl From<&Settings> for InteractionConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            padding: settings.padding,
            wheel_step: settings.wheel_step,
            drag_alpha: settings.drag_alpha,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct DragState {
    layer: LayerId,
    grab_offset: Vec2,
}

#[derive(Debug, Default)]
pub struct InteractionController {
    config: InteractionConfig,
    registered: Vec<LayerId>,
    drag: Option<DragState>,
}

/// Per-axis result of checking a candidate position against the box.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct AxisFit {
    x: bool,
    y: bool,
}

impl AxisFit {
    fn all(self) -> bool {
        self.x && self.y
    }
}

impl InteractionController {
    pub fn new(config: InteractionConfig) -> Self {
        Self {
            config,
            registered: Vec::new(),
            drag: None,
        }
    }

    pub fn config(&self) -> &InteractionConfig {
        &self.config
    }

    pub fn register(&mut self, layer: LayerId) {
        if !self.registered.contains(&layer) {
            self.registered.push(layer);
            tracing::debug!(?layer, "interaction registered");
        }
    }

    /// Drops the layer's handlers. A drag in progress on it is abandoned.
    pub fn unregister(&mut self, layer: LayerId) {
        self.registered.retain(|id| *id != layer);
        if self.drag.is_some_and(|d| d.layer == layer) {
            self.drag = None;
        }
    }

    pub fn clear(&mut self) {
        self.registered.clear();
        self.drag = None;
    }

    pub fn is_registered(&self, layer: LayerId) -> bool {
        self.registered.contains(&layer)
    }

    pub fn registered(&self) -> &[LayerId] {
        &self.registered
    }

    pub fn is_dragging(&self) -> bool {
        self.drag.is_some()
    }

    pub fn dragged_layer(&self) -> Option<LayerId> {
        self.drag.map(|d| d.layer)
    }

    /// Surface area a movable layer must stay inside.
    pub fn movement_box(&self, surface: Size) -> Rect {
        let pad = self.config.padding;
        Rect::new(pad, pad, surface.width - pad, surface.height - pad)
    }

    /// Hit-test registered layers and start dragging the topmost one.
    pub fn pointer_down(&mut self, compositor: &mut Compositor, pointer: Point) -> Option<LayerId> {
        let hit = compositor.hit_test(pointer, |id| self.registered.contains(&id))?;
        self.start_drag(compositor, hit, pointer).then_some(hit)
    }

    /// Begin a drag. Refused for unregistered or disabled layers and for
    /// layers that do not currently sit inside the movement box.
    pub fn start_drag(
        &mut self,
        compositor: &mut Compositor,
        layer: LayerId,
        pointer: Point,
    ) -> bool {
        if !self.is_registered(layer) {
            return false;
        }
        let movement_box = self.movement_box(compositor.size());
        let Some(target) = compositor.layer_mut(layer).filter(|l| l.is_enabled()) else {
            return false;
        };

        let geometry = *target.geometry();
        let grab_offset = pointer - geometry.position;
        if !fits(&geometry, geometry.position, movement_box).all() {
            return false;
        }

        target.set_alpha(self.config.drag_alpha);
        self.drag = Some(DragState { layer, grab_offset });
        tracing::debug!(?layer, "drag started");
        true
    }

    /// Move the dragged layer. Returns `false` when the candidate position
    /// left the box on either axis: those axes stay frozen and the grab
    /// offset is re-derived from `pointer`.
    pub fn pointer_move(&mut self, compositor: &mut Compositor, pointer: Point) -> bool {
        let movement_box = self.movement_box(compositor.size());
        let Some(drag) = self.drag.as_mut() else {
            return false;
        };
        let Some(target) = compositor.layer_mut(drag.layer) else {
            self.drag = None;
            return false;
        };

        let geometry = target.geometry_mut();
        // Whole pixels, checked after rounding.
        let candidate = (pointer - drag.grab_offset).round();
        let fit = fits(geometry, candidate, movement_box);

        if fit.x {
            geometry.position.x = candidate.x;
        }
        if fit.y {
            geometry.position.y = candidate.y;
        }
        if !fit.all() {
            drag.grab_offset = pointer - geometry.position;
        }
        fit.all()
    }

    /// Scale a registered layer by one wheel step. Positive `delta_y` grows,
    /// negative shrinks. Width stays within 1/8 and 1/2 of the padded surface
    /// width; the anchor point holds still.
    pub fn wheel(&mut self, compositor: &mut Compositor, layer: LayerId, delta_y: f64) -> bool {
        if !self.is_registered(layer) || delta_y == 0.0 {
            return false;
        }
        let padded = padded_width(compositor.size(), self.config.padding);
        let (min_w, max_w) = (padded / 8.0, padded / 2.0);
        let Some(target) = compositor.layer_mut(layer) else {
            return false;
        };

        let geometry = target.geometry_mut();
        let width = geometry.size.width;
        if width <= 0.0 {
            return false;
        }
        let factor = if delta_y > 0.0 {
            if width >= max_w {
                return false;
            }
            1.0 + self.config.wheel_step
        } else {
            if width <= min_w {
                return false;
            }
            1.0 - self.config.wheel_step
        };

        let new_width = (width * factor).clamp(min_w, max_w);
        let ratio = new_width / width;
        geometry.size = Size::new(new_width, geometry.size.height * ratio);
        true
    }

    pub fn end_drag(&mut self, compositor: &mut Compositor) {
        if let Some(drag) = self.drag.take() {
            if let Some(target) = compositor.layer_mut(drag.layer) {
                target.set_alpha(1.0);
            }
            tracing::debug!(layer = ?drag.layer, "drag ended");
        }
    }
}

fn fits(geometry: &LayerGeometry, candidate: Point, movement_box: Rect) -> AxisFit {
    let size = geometry.size;
    let anchor = geometry.anchor;
    let x_min = movement_box.x0 + size.width * anchor.x;
    let x_max = movement_box.x1 - size.width * (1.0 - anchor.x);
    let y_min = movement_box.y0 + size.height * anchor.y;
    let y_max = movement_box.y1 - size.height * (1.0 - anchor.y);
    AxisFit {
        x: candidate.x >= x_min && candidate.x <= x_max,
        y: candidate.y >= y_min && candidate.y <= y_max,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::compositor::{Layer, LayerContent};
    use crate::layout::corner_overlay;
    use crate::media::{MediaSourceHandle, MediaTrack, SourceKind};
    use crate::surface::Color;
    use crate::testing::{RecordingSurface, SyntheticTrack};

    const W: f64 = 1280.0;
    const H: f64 = 720.0;

    struct Fixture {
        compositor: Compositor,
        controller: InteractionController,
        overlay: LayerId,
        _camera: MediaSourceHandle,
    }

    fn fixture() -> Fixture {
        let track = Arc::new(SyntheticTrack::video("cam", 640, 480));
        let tracks: Vec<Arc<dyn MediaTrack>> = vec![track];
        let camera = MediaSourceHandle::new(SourceKind::Camera, None, tracks);

        let surface = RecordingSurface::new(W, H);
        let mut compositor = Compositor::new(Box::new(surface), 30, Color::BLACK);
        let geometry = corner_overlay(compositor.size(), Size::new(640.0, 480.0), 20.0, 0.25);
        let layer = Layer::new(LayerContent::Source(camera.downgrade()), geometry);
        let (overlay, _) = compositor.add_layer(layer);

        let mut controller = InteractionController::new(InteractionConfig::default());
        controller.register(overlay);
        Fixture {
            compositor,
            controller,
            overlay,
            _camera: camera,
        }
    }

    fn position(f: &Fixture) -> Point {
        f.compositor.layer(f.overlay).unwrap().geometry().position
    }

    fn width(f: &Fixture) -> f64 {
        f.compositor.layer(f.overlay).unwrap().geometry().size.width
    }

    #[test]
    fn in_bounds_drag_tracks_pointer_delta() {
        let mut f = fixture();
        let start = position(&f);
        let grab = Point::new(1200.0, 650.0);
        assert!(f.controller.start_drag(&mut f.compositor, f.overlay, grab));

        assert!(f.controller.pointer_move(&mut f.compositor, Point::new(1100.0, 600.0)));
        assert_eq!(position(&f), Point::new(start.x - 100.0, start.y - 50.0));

        assert!(f.controller.pointer_move(&mut f.compositor, Point::new(900.0, 500.0)));
        assert_eq!(position(&f), Point::new(start.x - 300.0, start.y - 150.0));
    }

    #[test]
    fn right_edge_never_passes_padding() {
        let mut f = fixture();
        assert!(f.controller.start_drag(&mut f.compositor, f.overlay, Point::new(1200.0, 650.0)));
        f.controller.pointer_move(&mut f.compositor, Point::new(1000.0, 650.0));

        for x in [1300.0, 1500.0, 4000.0, 1281.0] {
            f.controller.pointer_move(&mut f.compositor, Point::new(x, 650.0));
            let bounds = f.compositor.layer(f.overlay).unwrap().geometry().bounds();
            assert!(bounds.x1 <= W - 20.0, "right edge {} escaped at pointer {x}", bounds.x1);
        }
    }

    #[test]
    fn violated_axis_freezes_while_other_axis_moves() {
        let mut f = fixture();
        let start = position(&f);
        assert!(f.controller.start_drag(&mut f.compositor, f.overlay, Point::new(1200.0, 650.0)));

        // Overlay already touches the right/bottom edges: pushing right
        // freezes x, y still follows the pointer upward.
        assert!(!f.controller.pointer_move(&mut f.compositor, Point::new(1250.0, 600.0)));
        assert_eq!(position(&f), Point::new(start.x, start.y - 50.0));
    }

    #[test]
    fn resuming_after_violation_does_not_jump() {
        let mut f = fixture();
        let start = position(&f);
        assert!(f.controller.start_drag(&mut f.compositor, f.overlay, Point::new(1200.0, 650.0)));

        f.controller.pointer_move(&mut f.compositor, Point::new(1400.0, 650.0));
        assert_eq!(position(&f), start);

        // Moving left from the overshoot point moves the layer immediately.
        assert!(f.controller.pointer_move(&mut f.compositor, Point::new(1390.0, 650.0)));
        assert_eq!(position(&f), Point::new(start.x - 10.0, start.y));
    }

    #[test]
    fn positions_are_whole_pixels() {
        let mut f = fixture();
        assert!(f.controller.start_drag(&mut f.compositor, f.overlay, Point::new(1200.0, 650.0)));
        f.controller.pointer_move(&mut f.compositor, Point::new(1100.4, 600.6));
        let p = position(&f);
        assert_eq!(p, Point::new(p.x.round(), p.y.round()));
    }

    #[test]
    fn drag_dims_layer_and_end_restores_alpha() {
        let mut f = fixture();
        assert!(f.controller.start_drag(&mut f.compositor, f.overlay, Point::new(1200.0, 650.0)));
        assert_eq!(f.compositor.layer(f.overlay).unwrap().alpha(), 0.9);
        assert!(f.controller.is_dragging());

        f.controller.end_drag(&mut f.compositor);
        assert_eq!(f.compositor.layer(f.overlay).unwrap().alpha(), 1.0);
        assert!(!f.controller.is_dragging());
        assert!(!f.controller.pointer_move(&mut f.compositor, Point::new(100.0, 100.0)));
    }

    #[test]
    fn unregistered_or_disabled_layers_ignore_input() {
        let mut f = fixture();
        f.compositor.layer_mut(f.overlay).unwrap().set_enabled(false);
        assert!(!f.controller.start_drag(&mut f.compositor, f.overlay, Point::new(1200.0, 650.0)));

        f.compositor.layer_mut(f.overlay).unwrap().set_enabled(true);
        f.controller.unregister(f.overlay);
        assert!(!f.controller.start_drag(&mut f.compositor, f.overlay, Point::new(1200.0, 650.0)));
        assert!(!f.controller.wheel(&mut f.compositor, f.overlay, 1.0));
    }

    #[test]
    fn pointer_down_hits_registered_overlay_only() {
        let mut f = fixture();
        assert_eq!(f.controller.pointer_down(&mut f.compositor, Point::new(100.0, 100.0)), None);
        assert_eq!(
            f.controller.pointer_down(&mut f.compositor, Point::new(1200.0, 650.0)),
            Some(f.overlay)
        );
    }

    #[test]
    fn drag_refused_when_layer_starts_out_of_bounds() {
        let mut f = fixture();
        f.compositor.layer_mut(f.overlay).unwrap().geometry_mut().position = Point::new(W, H);
        assert!(!f.controller.start_drag(&mut f.compositor, f.overlay, Point::new(1250.0, 700.0)));
        assert!(!f.controller.is_dragging());
    }

    #[test]
    fn wheel_width_stays_within_limits() {
        let mut f = fixture();
        let padded = W - 40.0;

        let mut changed = 0;
        for _ in 0..500 {
            if f.controller.wheel(&mut f.compositor, f.overlay, 1.0) {
                changed += 1;
            }
            assert!(width(&f) <= padded / 2.0 + 1e-9);
        }
        assert!(changed > 0);
        assert!((width(&f) - padded / 2.0).abs() < 1e-9);

        for _ in 0..1000 {
            f.controller.wheel(&mut f.compositor, f.overlay, -1.0);
            assert!(width(&f) >= padded / 8.0 - 1e-9);
        }
        assert!((width(&f) - padded / 8.0).abs() < 1e-9);
    }

    #[test]
    fn wheel_keeps_aspect_ratio() {
        let mut f = fixture();
        f.controller.wheel(&mut f.compositor, f.overlay, 1.0);
        let size = f.compositor.layer(f.overlay).unwrap().geometry().size;
        assert!((size.width / size.height - 640.0 / 480.0).abs() < 1e-9);
        assert!((size.width - 310.0 * 1.01).abs() < 1e-9);
    }
}
