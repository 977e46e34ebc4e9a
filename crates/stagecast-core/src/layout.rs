//! Pure layout math shared by the presentation modes.

use kurbo::{Point, Size, Vec2};

use crate::compositor::LayerGeometry;

/// Scale that fits `content` inside `container` without cropping.
pub fn fit_scale(container: Size, content: Size) -> f64 {
    if content.width <= 0.0 || content.height <= 0.0 {
        return 0.0;
    }
    (container.width / content.width).min(container.height / content.height)
}

/// Center `stream` on the surface at its native aspect ratio.
///
/// With `allow_upscale` unset a stream smaller than the surface keeps its
/// native size.
pub fn fit_centered(surface: Size, stream: Size, allow_upscale: bool) -> LayerGeometry {
    let mut scale = fit_scale(surface, stream);
    if !allow_upscale {
        scale = scale.min(1.0);
    }
    LayerGeometry::new(
        Point::new(surface.width / 2.0, surface.height / 2.0),
        Size::new(stream.width * scale, stream.height * scale),
        Vec2::new(0.5, 0.5),
    )
}

/// Bottom-right overlay: `fraction` of the padded surface width, height
/// from the stream's aspect ratio.
pub fn corner_overlay(surface: Size, stream: Size, padding: f64, fraction: f64) -> LayerGeometry {
    let width = padded_width(surface, padding) * fraction;
    let height = if stream.width > 0.0 {
        stream.height * (width / stream.width)
    } else {
        0.0
    };
    LayerGeometry::new(
        Point::new(surface.width - padding, surface.height - padding),
        Size::new(width, height),
        Vec2::new(1.0, 1.0),
    )
}

pub fn padded_width(surface: Size, padding: f64) -> f64 {
    (surface.width - 2.0 * padding).max(0.0)
}
