//! Property tests for layer ordering, constrained drag and wheel scaling.

use std::collections::BTreeMap;
use std::sync::Arc;

use kurbo::{Point, Size, Vec2};
use proptest::prelude::*;

use stagecast_core::compositor::{Compositor, Layer, LayerContent, LayerGeometry, LayerId};
use stagecast_core::interaction::{InteractionConfig, InteractionController};
use stagecast_core::layout::{corner_overlay, padded_width};
use stagecast_core::media::{MediaSourceHandle, MediaTrack, SourceKind};
use stagecast_core::surface::{Color, ImageAsset};
use stagecast_core::testing::{DrawOp, RecordingSurface, SyntheticTrack};

const PADDING: f64 = 20.0;

struct Stage {
    compositor: Compositor,
    interaction: InteractionController,
    overlay: LayerId,
    _camera: MediaSourceHandle,
}

fn stage(width: f64, height: f64, camera: (u32, u32)) -> Stage {
    let track = Arc::new(SyntheticTrack::video("cam", camera.0, camera.1));
    let tracks: Vec<Arc<dyn MediaTrack>> = vec![track];
    let handle = MediaSourceHandle::new(SourceKind::Camera, None, tracks);

    let surface = RecordingSurface::new(width, height);
    let mut compositor = Compositor::new(Box::new(surface), 30, Color::BLACK);
    let geometry = corner_overlay(
        compositor.size(),
        Size::new(camera.0 as f64, camera.1 as f64),
        PADDING,
        0.25,
    );
    let layer = Layer::new(LayerContent::Source(handle.downgrade()), geometry);
    let (overlay, _) = compositor.add_layer(layer);
    let mut interaction = InteractionController::new(InteractionConfig::default());
    interaction.register(overlay);
    Stage {
        compositor,
        interaction,
        overlay,
        _camera: handle,
    }
}

fn geometry(stage: &Stage) -> LayerGeometry {
    *stage.compositor.layer(stage.overlay).unwrap().geometry()
}

fn image_layer(uri: String) -> Layer {
    let geometry = LayerGeometry::new(Point::new(10.0, 10.0), Size::new(8.0, 8.0), Vec2::ZERO);
    Layer::new(
        LayerContent::Image(ImageAsset {
            uri,
            size: Size::new(8.0, 8.0),
        }),
        geometry,
    )
}

proptest! {
    /// A drag never carries the overlay outside the padded surface, and
    /// every committed position is a whole pixel.
    #[test]
    fn drag_stays_inside_padded_surface(
        path in prop::collection::vec((-400.0f64..1700.0, -400.0f64..1100.0), 1..40),
    ) {
        let mut s = stage(1280.0, 720.0, (640, 480));
        let start = geometry(&s).bounds();
        prop_assert!(s.interaction.start_drag(&mut s.compositor, s.overlay, start.center()));

        for (x, y) in path {
            s.interaction.pointer_move(&mut s.compositor, Point::new(x, y));
            let g = geometry(&s);
            let b = g.bounds();
            prop_assert!(b.x0 >= PADDING && b.y0 >= PADDING, "{b:?}");
            prop_assert!(b.x1 <= 1280.0 - PADDING && b.y1 <= 720.0 - PADDING, "{b:?}");
            prop_assert_eq!(g.position, Point::new(g.position.x.round(), g.position.y.round()));
        }
        s.interaction.end_drag(&mut s.compositor);
        prop_assert_eq!(s.compositor.layer(s.overlay).unwrap().alpha(), 1.0);
    }

    /// Wheel steps keep the width within bounds, the aspect ratio, and the
    /// anchor point where it was.
    #[test]
    fn wheel_respects_limits_and_aspect(
        width in 400.0f64..2560.0,
        height in 300.0f64..1440.0,
        camera in prop::sample::select(vec![(640u32, 480u32), (1280, 720), (480, 640)]),
        deltas in prop::collection::vec(
            prop::sample::select(vec![-3.0f64, -1.0, 1.0, 2.0]),
            1..300,
        ),
    ) {
        let mut s = stage(width, height, camera);
        let padded = padded_width(s.compositor.size(), PADDING);
        let aspect = camera.1 as f64 / camera.0 as f64;
        let anchor_point = geometry(&s).position;

        for delta in deltas {
            s.interaction.wheel(&mut s.compositor, s.overlay, delta);
            let g = geometry(&s);
            prop_assert!(g.size.width >= padded / 8.0 - 1e-9);
            prop_assert!(g.size.width <= padded / 2.0 + 1e-9);
            prop_assert!((g.size.height / g.size.width - aspect).abs() < 1e-9);
            prop_assert_eq!(g.position, anchor_point);
        }
    }

    /// Layers paint in ascending slot order; a reused slot keeps only its
    /// newest layer.
    #[test]
    fn layers_paint_in_slot_order(slots in prop::collection::vec(-5i32..5, 1..20)) {
        let surface = RecordingSurface::new(64.0, 64.0);
        let mut compositor = Compositor::new(Box::new(surface.clone()), 30, Color::BLACK);

        let mut expected = BTreeMap::new();
        for (i, slot) in slots.iter().enumerate() {
            let uri = format!("layer-{i}");
            compositor.add_layer(image_layer(uri.clone()).with_priority(*slot));
            expected.insert(*slot, uri);
        }
        compositor.draw();

        let painted: Vec<String> = surface
            .ops()
            .into_iter()
            .filter_map(|op| match op {
                DrawOp::Paint { content, .. } => Some(content),
                _ => None,
            })
            .collect();
        prop_assert_eq!(painted, expected.into_values().collect::<Vec<_>>());
    }
}
