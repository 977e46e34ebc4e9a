use std::sync::Arc;

use kurbo::{Rect, Size};

use crate::errors::SurfaceError;
use crate::media::MediaTrack;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const BLACK: Color = Color::rgb(0, 0, 0);
    pub const WHITE: Color = Color::rgb(255, 255, 255);

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }

    /// Parses `#rgb` or `#rrggbb`.
    pub fn from_hex(hex: &str) -> Option<Self> {
        let digits = hex.strip_prefix('#').unwrap_or(hex);
        if !digits.is_ascii() {
            return None;
        }
        let channel = |s: &str| u8::from_str_radix(s, 16).ok();
        match digits.len() {
            3 => {
                let mut it = digits.chars().map(|c| channel(&c.to_string()).map(|v| v * 17));
                Some(Self::rgb(it.next()??, it.next()??, it.next()??))
            }
            6 => Some(Self::rgb(
                channel(&digits[0..2])?,
                channel(&digits[2..4])?,
                channel(&digits[4..6])?,
            )),
            _ => None,
        }
    }

    pub fn to_array(self) -> [u8; 4] {
        [self.r, self.g, self.b, self.a]
    }
}

/// A static picture painted instead of a live source (avatar, fallback).
#[derive(Debug, Clone, PartialEq)]
pub struct ImageAsset {
    pub uri: String,
    pub size: Size,
}

pub enum PaintContent<'a> {
    Video(&'a dyn MediaTrack),
    Image(&'a ImageAsset),
}

/// The drawing surface the compositor paints into.
///
/// `paint` copies the `crop` region of the content into `dest`, scaled.
/// `present` marks the end of one composited frame.
pub trait DrawSurface: Send {
    fn size(&self) -> Size;
    fn clear(&mut self, color: Color);
    fn paint(
        &mut self,
        content: PaintContent<'_>,
        crop: Rect,
        dest: Rect,
        alpha: f64,
    ) -> Result<(), SurfaceError>;
    fn fill_rect(&mut self, rect: Rect, color: Color) -> Result<(), SurfaceError>;
    fn stroke_rect(&mut self, rect: Rect, color: Color, width: f64) -> Result<(), SurfaceError>;
    fn present(&mut self) {}
    /// Continuous feed of composited frames at `fps`.
    fn capture_stream(&mut self, fps: u32) -> Arc<dyn MediaTrack>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_short_and_long_hex() {
        assert_eq!(Color::from_hex("#000"), Some(Color::BLACK));
        assert_eq!(Color::from_hex("#fff"), Some(Color::WHITE));
        assert_eq!(Color::from_hex("1099bb"), Some(Color::rgb(0x10, 0x99, 0xbb)));
    }

    #[test]
    fn rejects_malformed_hex() {
        assert_eq!(Color::from_hex("#12345"), None);
        assert_eq!(Color::from_hex("#zzzzzz"), None);
        assert_eq!(Color::from_hex(""), None);
    }
}
