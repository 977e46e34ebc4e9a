use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::media::{MediaTrack, SpectrumAnalyser, TrackKind, VideoFrame};

/// Gradient frame that shifts with `frame_number`.
pub fn synthetic_video_frame(frame_number: u64, width: u32, height: u32) -> VideoFrame {
    let base = (frame_number % 256) as u8;
    let mut rgba = vec![0u8; width as usize * height as usize * 4];
    for y in 0..height {
        for x in 0..width {
            let idx = (y as usize * width as usize + x as usize) * 4;
            rgba[idx] = base.wrapping_add((x % 256) as u8);
            rgba[idx + 1] = base.wrapping_add((y % 256) as u8);
            rgba[idx + 2] = base.wrapping_add(((x + y) % 256) as u8);
            rgba[idx + 3] = 255;
        }
    }
    VideoFrame {
        width,
        height,
        rgba: rgba.into(),
    }
}

/// In-memory track. Video tracks report a resizable native resolution and
/// render gradient frames; stopping is counted.
pub struct SyntheticTrack {
    id: String,
    kind: TrackKind,
    dimensions: Mutex<Option<(u32, u32)>>,
    live: AtomicBool,
    enabled: AtomicBool,
    stops: AtomicUsize,
    frames: AtomicU64,
}

impl SyntheticTrack {
    pub fn video(id: impl Into<String>, width: u32, height: u32) -> Self {
        Self::new(id.into(), TrackKind::Video, Some((width, height)))
    }

    pub fn audio(id: impl Into<String>) -> Self {
        Self::new(id.into(), TrackKind::Audio, None)
    }

    fn new(id: String, kind: TrackKind, dimensions: Option<(u32, u32)>) -> Self {
        Self {
            id,
            kind,
            dimensions: Mutex::new(dimensions),
            live: AtomicBool::new(true),
            enabled: AtomicBool::new(true),
            stops: AtomicUsize::new(0),
            frames: AtomicU64::new(0),
        }
    }

    /// Simulate the source changing resolution (window resize, rotation).
    pub fn resize(&self, width: u32, height: u32) {
        if self.kind == TrackKind::Video {
            *self.dimensions.lock().unwrap_or_else(|e| e.into_inner()) = Some((width, height));
        }
    }

    /// Simulate the platform ending the track (device unplugged, share
    /// cancelled) without going through the owning handle.
    pub fn end(&self) {
        self.live.store(false, Ordering::SeqCst);
    }

    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

impl MediaTrack for SyntheticTrack {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> TrackKind {
        self.kind
    }

    fn dimensions(&self) -> Option<(u32, u32)> {
        *self.dimensions.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.live.store(false, Ordering::SeqCst);
    }

    fn latest_frame(&self) -> Option<VideoFrame> {
        if !self.is_live() {
            return None;
        }
        let (w, h) = self.dimensions()?;
        let n = self.frames.fetch_add(1, Ordering::Relaxed);
        Some(synthetic_video_frame(n, w, h))
    }
}

#[derive(Default)]
struct AnalyserState {
    value: AtomicU8,
    reads: AtomicUsize,
    disconnects: AtomicUsize,
}

/// Analyser reporting a flat spectrum of one adjustable value.
pub struct FakeAnalyser {
    bins: usize,
    state: Arc<AnalyserState>,
}

/// Observer side of a [`FakeAnalyser`], usable after the analyser moved
/// into a sampler.
#[derive(Clone)]
pub struct AnalyserProbe(Arc<AnalyserState>);

impl FakeAnalyser {
    pub fn new(bins: usize, value: u8) -> Self {
        let state = Arc::new(AnalyserState::default());
        state.value.store(value, Ordering::SeqCst);
        Self { bins, state }
    }

    pub fn probe(&self) -> AnalyserProbe {
        AnalyserProbe(self.state.clone())
    }
}

impl AnalyserProbe {
    pub fn set_value(&self, value: u8) {
        self.0.value.store(value, Ordering::SeqCst);
    }

    pub fn reads(&self) -> usize {
        self.0.reads.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.0.disconnects.load(Ordering::SeqCst)
    }
}

impl SpectrumAnalyser for FakeAnalyser {
    fn bin_count(&self) -> usize {
        self.bins
    }

    fn byte_frequency_data(&mut self, out: &mut [u8]) {
        self.state.reads.fetch_add(1, Ordering::SeqCst);
        out.fill(self.state.value.load(Ordering::SeqCst));
    }

    fn disconnect(&mut self) {
        self.state.disconnects.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gradient_frames_change_over_time() {
        let track = SyntheticTrack::video("cam", 4, 2);
        let first = track.latest_frame().unwrap();
        let second = track.latest_frame().unwrap();
        assert_eq!(first.rgba.len(), first.expected_len());
        assert_ne!(first.rgba, second.rgba);
    }

    #[test]
    fn ended_tracks_stop_producing_frames() {
        let track = SyntheticTrack::video("cam", 4, 2);
        track.end();
        assert!(track.latest_frame().is_none());
        assert_eq!(track.stop_count(), 0);
    }

    #[test]
    fn audio_tracks_have_no_dimensions() {
        let track = SyntheticTrack::audio("mic");
        track.resize(10, 10);
        assert_eq!(track.dimensions(), None);
        assert!(track.latest_frame().is_none());
    }
}
