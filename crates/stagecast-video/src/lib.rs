//! Software rendering backend for stagecast.
//!
//! Provides a CPU [`DrawSurface`](stagecast_core::surface::DrawSurface)
//! that composites into an RGBA buffer, a capture track fed by its
//! presented frames, and JPEG encoding for previews.

mod capture;
mod encode;
mod raster;

pub use capture::CanvasCaptureTrack;
pub use encode::{EncodeError, PREVIEW_QUALITY, encode_jpeg, encode_jpeg_base64};
pub use raster::{PLACEHOLDER, RasterSurface};
