//! Frame encoding for previews: RGBA frame to JPEG, optionally base64.

use base64::Engine;
use image::codecs::jpeg::JpegEncoder;
use image::{ImageBuffer, Rgb};
use stagecast_core::media::VideoFrame;
use thiserror::Error;

/// Quality used by previews (good balance of size vs. quality).
pub const PREVIEW_QUALITY: u8 = 60;

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("frame has {actual} bytes, expected {expected}")]
    FrameSize { expected: usize, actual: usize },
    #[error("jpeg encode failed: {0}")]
    Jpeg(#[from] image::ImageError),
}

pub fn encode_jpeg(frame: &VideoFrame, quality: u8) -> Result<Vec<u8>, EncodeError> {
    if frame.rgba.len() != frame.expected_len() {
        return Err(EncodeError::FrameSize {
            expected: frame.expected_len(),
            actual: frame.rgba.len(),
        });
    }

    // JPEG has no alpha channel.
    let rgb: Vec<u8> = frame
        .rgba
        .chunks_exact(4)
        .flat_map(|px| [px[0], px[1], px[2]])
        .collect();
    let img: ImageBuffer<Rgb<u8>, Vec<u8>> = ImageBuffer::from_raw(frame.width, frame.height, rgb)
        .ok_or(EncodeError::FrameSize {
            expected: frame.expected_len(),
            actual: frame.rgba.len(),
        })?;

    let mut jpeg = Vec::with_capacity(frame.expected_len() / 8);
    JpegEncoder::new_with_quality(&mut jpeg, quality.clamp(1, 100)).encode_image(&img)?;
    Ok(jpeg)
}

pub fn encode_jpeg_base64(frame: &VideoFrame, quality: u8) -> Result<String, EncodeError> {
    let jpeg = encode_jpeg(frame, quality)?;
    Ok(base64::engine::general_purpose::STANDARD.encode(jpeg))
}
