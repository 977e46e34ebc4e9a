//! CPU raster surface backed by an RGBA image buffer.

use std::collections::HashMap;
use std::sync::Arc;

use image::{Rgba, RgbaImage};
use kurbo::{Rect, Size};
use stagecast_core::errors::SurfaceError;
use stagecast_core::media::{MediaTrack, VideoFrame};
use stagecast_core::surface::{Color, DrawSurface, ImageAsset, PaintContent};
use tokio::sync::watch;

use crate::capture::CanvasCaptureTrack;

/// Fill used for images that cannot be loaded (built-in avatar, missing file).
pub const PLACEHOLDER: Color = Color::rgb(0x5a, 0x5a, 0x66);

/// Software [`DrawSurface`]. Each `present` publishes the finished frame to
/// every capture feed and frame subscriber.
pub struct RasterSurface {
    canvas: RgbaImage,
    images: HashMap<String, Option<Arc<RgbaImage>>>,
    frames: Arc<watch::Sender<Option<VideoFrame>>>,
    next_capture: u64,
}

impl RasterSurface {
    pub fn new(width: u32, height: u32) -> Self {
        let (frames, _) = watch::channel(None);
        Self {
            canvas: RgbaImage::new(width, height),
            images: HashMap::new(),
            frames: Arc::new(frames),
            next_capture: 0,
        }
    }

    /// Pixels of the frame being composed.
    pub fn canvas(&self) -> &RgbaImage {
        &self.canvas
    }

    /// Receives every presented frame.
    pub fn subscribe(&self) -> watch::Receiver<Option<VideoFrame>> {
        self.frames.subscribe()
    }

    fn image(&mut self, asset: &ImageAsset) -> Option<Arc<RgbaImage>> {
        self.images
            .entry(asset.uri.clone())
            .or_insert_with(|| match image::open(&asset.uri) {
                Ok(img) => Some(Arc::new(img.to_rgba8())),
                Err(e) => {
                    tracing::debug!(uri = %asset.uri, "image unavailable, using placeholder: {e}");
                    None
                }
            })
            .clone()
    }

    fn blend(&mut self, x: u32, y: u32, src: [u8; 4], alpha: f64) {
        let a = alpha * f64::from(src[3]) / 255.0;
        if a <= 0.0 {
            return;
        }
        let dst = self.canvas.get_pixel_mut(x, y);
        for c in 0..3 {
            let mixed = f64::from(src[c]) * a + f64::from(dst.0[c]) * (1.0 - a);
            dst.0[c] = mixed.round().clamp(0.0, 255.0) as u8;
        }
        dst.0[3] = 255;
    }

    fn fill_pixels(&mut self, rect: Rect, color: Color, skip: Option<Rect>) {
        let Some((x0, y0, x1, y1)) = pixel_span(rect, self.canvas.width(), self.canvas.height())
        else {
            return;
        };
        let inner = skip.and_then(|r| pixel_span(r, self.canvas.width(), self.canvas.height()));
        for y in y0..y1 {
            for x in x0..x1 {
                if inner
                    .is_some_and(|(ix0, iy0, ix1, iy1)| x >= ix0 && x < ix1 && y >= iy0 && y < iy1)
                {
                    continue;
                }
                self.blend(x, y, color.to_array(), 1.0);
            }
        }
    }

    /// Nearest-neighbour copy of `crop` of `src` into `dest`.
    fn blit(&mut self, src: &Source<'_>, crop: Rect, dest: Rect, alpha: f64) {
        if dest.width() <= 0.0 || dest.height() <= 0.0 || src.width == 0 || src.height == 0 {
            return;
        }
        let Some((x0, y0, x1, y1)) = pixel_span(dest, self.canvas.width(), self.canvas.height())
        else {
            return;
        };
        let crop = if crop.width() > 0.0 && crop.height() > 0.0 {
            crop
        } else {
            Rect::new(0.0, 0.0, f64::from(src.width), f64::from(src.height))
        };
        let sx_scale = crop.width() / dest.width();
        let sy_scale = crop.height() / dest.height();
        for y in y0..y1 {
            let sy = crop.y0 + (f64::from(y) + 0.5 - dest.y0) * sy_scale;
            let sy = (sy.floor().max(0.0) as u32).min(src.height - 1);
            for x in x0..x1 {
                let sx = crop.x0 + (f64::from(x) + 0.5 - dest.x0) * sx_scale;
                let sx = (sx.floor().max(0.0) as u32).min(src.width - 1);
                self.blend(x, y, src.pixel(sx, sy), alpha);
            }
        }
    }

    fn snapshot(&self) -> VideoFrame {
        VideoFrame {
            width: self.canvas.width(),
            height: self.canvas.height(),
            rgba: Arc::from(self.canvas.as_raw().as_slice()),
        }
    }
}

/// Borrowed RGBA pixels of a paint source.
struct Source<'a> {
    width: u32,
    height: u32,
    rgba: &'a [u8],
}

impl Source<'_> {
    fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let idx = (y as usize * self.width as usize + x as usize) * 4;
        [self.rgba[idx], self.rgba[idx + 1], self.rgba[idx + 2], self.rgba[idx + 3]]
    }
}

/// Whole-pixel columns and rows whose centers fall inside `rect`, clipped
/// to the canvas.
fn pixel_span(rect: Rect, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
    let clip = |lo: f64, hi: f64, max: u32| {
        let lo = lo.round().max(0.0).min(f64::from(max)) as u32;
        let hi = hi.round().max(0.0).min(f64::from(max)) as u32;
        (lo < hi).then_some((lo, hi))
    };
    let (x0, x1) = clip(rect.x0, rect.x1, width)?;
    let (y0, y1) = clip(rect.y0, rect.y1, height)?;
    Some((x0, y0, x1, y1))
}

impl DrawSurface for RasterSurface {
    fn size(&self) -> Size {
        Size::new(f64::from(self.canvas.width()), f64::from(self.canvas.height()))
    }

    fn clear(&mut self, color: Color) {
        let pixel = Rgba(color.to_array());
        for p in self.canvas.pixels_mut() {
            *p = pixel;
        }
    }

    fn paint(
        &mut self,
        content: PaintContent<'_>,
        crop: Rect,
        dest: Rect,
        alpha: f64,
    ) -> Result<(), SurfaceError> {
        match content {
            PaintContent::Video(track) => {
                // No frame yet: nothing to paint this tick.
                let Some(frame) = track.latest_frame() else {
                    return Ok(());
                };
                if frame.rgba.len() != frame.expected_len() {
                    return Err(SurfaceError::FrameSize {
                        expected: frame.expected_len(),
                        actual: frame.rgba.len(),
                    });
                }
                let source = Source {
                    width: frame.width,
                    height: frame.height,
                    rgba: &frame.rgba,
                };
                self.blit(&source, crop, dest, alpha);
            }
            PaintContent::Image(asset) => match self.image(asset) {
                Some(img) => {
                    let source = Source {
                        width: img.width(),
                        height: img.height(),
                        rgba: img.as_raw(),
                    };
                    self.blit(&source, crop, dest, alpha);
                }
                None => self.fill_pixels(dest, PLACEHOLDER, None),
            },
        }
        Ok(())
    }

    fn fill_rect(&mut self, rect: Rect, color: Color) -> Result<(), SurfaceError> {
        self.fill_pixels(rect, color, None);
        Ok(())
    }

    fn stroke_rect(&mut self, rect: Rect, color: Color, width: f64) -> Result<(), SurfaceError> {
        let half = width / 2.0;
        let outer = Rect::new(rect.x0 - half, rect.y0 - half, rect.x1 + half, rect.y1 + half);
        let inner = Rect::new(rect.x0 + half, rect.y0 + half, rect.x1 - half, rect.y1 - half);
        self.fill_pixels(outer, color, Some(inner));
        Ok(())
    }

    fn present(&mut self) {
        // Skip the copy when nobody is watching.
        if self.frames.receiver_count() > 0 {
            self.frames.send_replace(Some(self.snapshot()));
        }
    }

    fn capture_stream(&mut self, fps: u32) -> Arc<dyn MediaTrack> {
        let id = format!("canvas-{}", self.next_capture);
        self.next_capture += 1;
        tracing::debug!(%id, fps, "canvas capture started");
        Arc::new(CanvasCaptureTrack::new(
            id,
            (self.canvas.width(), self.canvas.height()),
            fps,
            self.frames.subscribe(),
        ))
    }
}
