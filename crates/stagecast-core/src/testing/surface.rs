use std::sync::{Arc, Mutex, MutexGuard};

use kurbo::{Rect, Size};

use super::tracks::SyntheticTrack;
use crate::errors::SurfaceError;
use crate::media::MediaTrack;
use crate::surface::{Color, DrawSurface, PaintContent};

#[derive(Debug, Clone, PartialEq)]
pub enum DrawOp {
    Clear(Color),
    Paint {
        /// Track id or image uri.
        content: String,
        crop: Rect,
        dest: Rect,
        alpha: f64,
    },
    Fill {
        rect: Rect,
        color: Color,
    },
    Stroke {
        rect: Rect,
        color: Color,
        width: f64,
    },
    Present,
}

#[derive(Default)]
struct Log {
    ops: Vec<DrawOp>,
    frames: usize,
    paints: usize,
    fail_paints: Option<SurfaceError>,
    captures: Vec<Arc<SyntheticTrack>>,
}

/// Surface that records draw calls instead of producing pixels. Clones
/// share one log, so a test keeps a clone after boxing one into a
/// compositor.
#[derive(Clone)]
pub struct RecordingSurface {
    size: Size,
    log: Arc<Mutex<Log>>,
}

impl RecordingSurface {
    pub fn new(width: f64, height: f64) -> Self {
        Self {
            size: Size::new(width, height),
            log: Arc::new(Mutex::new(Log::default())),
        }
    }

    fn log(&self) -> MutexGuard<'_, Log> {
        self.log.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Operations of the most recent frame, starting at its clear.
    pub fn ops(&self) -> Vec<DrawOp> {
        self.log().ops.clone()
    }

    /// Paint calls that reached the surface, across all frames.
    pub fn paint_count(&self) -> usize {
        self.log().paints
    }

    pub fn frames(&self) -> usize {
        self.log().frames
    }

    /// Make every subsequent paint fail with `error`; `None` heals.
    pub fn fail_paints(&self, error: Option<SurfaceError>) {
        self.log().fail_paints = error;
    }

    /// Frame feeds handed out by `capture_stream`.
    pub fn captures(&self) -> Vec<Arc<SyntheticTrack>> {
        self.log().captures.clone()
    }
}

impl DrawSurface for RecordingSurface {
    fn size(&self) -> Size {
        self.size
    }

    fn clear(&mut self, color: Color) {
        let mut log = self.log();
        // Keep a single frame of history.
        log.ops.clear();
        log.ops.push(DrawOp::Clear(color));
    }

    fn paint(
        &mut self,
        content: PaintContent<'_>,
        crop: Rect,
        dest: Rect,
        alpha: f64,
    ) -> Result<(), SurfaceError> {
        let mut log = self.log();
        if let Some(error) = log.fail_paints.clone() {
            return Err(error);
        }
        let content = match content {
            PaintContent::Video(track) => track.id().to_string(),
            PaintContent::Image(image) => image.uri.clone(),
        };
        log.paints += 1;
        log.ops.push(DrawOp::Paint {
            content,
            crop,
            dest,
            alpha,
        });
        Ok(())
    }

    fn fill_rect(&mut self, rect: Rect, color: Color) -> Result<(), SurfaceError> {
        self.log().ops.push(DrawOp::Fill { rect, color });
        Ok(())
    }

    fn stroke_rect(&mut self, rect: Rect, color: Color, width: f64) -> Result<(), SurfaceError> {
        self.log().ops.push(DrawOp::Stroke { rect, color, width });
        Ok(())
    }

    fn present(&mut self) {
        let mut log = self.log();
        log.ops.push(DrawOp::Present);
        log.frames += 1;
    }

    fn capture_stream(&mut self, _fps: u32) -> Arc<dyn MediaTrack> {
        let mut log = self.log();
        let id = format!("canvas-{}", log.captures.len());
        let track = Arc::new(SyntheticTrack::video(
            id,
            self.size.width as u32,
            self.size.height as u32,
        ));
        log.captures.push(track.clone());
        track
    }
}
