//! Voice level meter fed by a spectrum analyser.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use kurbo::{Point, Rect};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::errors::DeviceError;
use crate::media::SpectrumAnalyser;

/// Reduce a byte spectrum to `n` bar heights in `[0, 1]`.
///
/// Only the lower half of the bins (the voice range) is read. It is split
/// into low, mid and high thirds; bar `i` averages slice `i` of each third
/// and is weighted by `1 - |i - n/2| * 0.1` so the center bars read tallest.
pub fn compute_levels(spectrum: &[u8], n: usize) -> Vec<f64> {
    if n == 0 {
        return Vec::new();
    }
    let voice = &spectrum[..spectrum.len() / 2];
    let third = voice.len() / 3;
    if third == 0 {
        return vec![0.0; n];
    }
    let bands = [
        &voice[..third],
        &voice[third..2 * third],
        &voice[2 * third..3 * third],
    ];

    (0..n)
        .map(|i| {
            let sum: f64 = bands.iter().map(|band| slice_mean(band, i, n)).sum();
            let magnitude = sum / bands.len() as f64 / 255.0;
            let shift = (1.0 - (i as f64 - n as f64 / 2.0).abs() * 0.1).max(0.0);
            (magnitude * shift).clamp(0.0, 1.0)
        })
        .collect()
}

fn slice_mean(band: &[u8], i: usize, n: usize) -> f64 {
    let start = i * band.len() / n;
    let end = ((i + 1) * band.len() / n).max(start + 1).min(band.len());
    if start >= end {
        return 0.0;
    }
    let slice = &band[start..end];
    slice.iter().map(|&v| v as f64).sum::<f64>() / slice.len() as f64
}

/// Symmetric bars centered on `center`, a bar of height `max_height` for a
/// level of 1.
pub fn level_bar_rects(
    levels: &[f64],
    center: Point,
    bar_width: f64,
    gap: f64,
    max_height: f64,
) -> Vec<Rect> {
    let count = levels.len() as f64;
    let total = count * bar_width + (count - 1.0).max(0.0) * gap;
    let left = center.x - total / 2.0;
    levels
        .iter()
        .enumerate()
        .map(|(i, level)| {
            let x0 = left + i as f64 * (bar_width + gap);
            let half = level.clamp(0.0, 1.0) * max_height / 2.0;
            Rect::new(x0, center.y - half, x0 + bar_width, center.y + half)
        })
        .collect()
}

/// Publishing side of the level channel. Outlives individual samplers so
/// readers keep one subscription across device changes.
#[derive(Clone)]
pub struct LevelFeed {
    tx: Arc<watch::Sender<Arc<[f64]>>>,
}

impl LevelFeed {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(Arc::<[f64]>::from(Vec::new()));
        Self { tx: Arc::new(tx) }
    }

    pub fn publish(&self, levels: Vec<f64>) {
        self.tx.send_replace(levels.into());
    }

    pub fn subscribe(&self) -> LevelTap {
        LevelTap {
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for LevelFeed {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone)]
pub struct LevelTap {
    rx: watch::Receiver<Arc<[f64]>>,
}

impl LevelTap {
    pub fn latest(&self) -> Arc<[f64]> {
        self.rx.borrow().clone()
    }

    /// Wait for the next published set of levels.
    pub async fn changed(&mut self) -> Option<Arc<[f64]>> {
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }
}

type SharedAnalyser = Arc<Mutex<Option<Box<dyn SpectrumAnalyser>>>>;

/// Periodic sampling task bound to one analyser. Never reused: a new audio
/// source gets a new sampler. Dropping it cancels the task and disconnects
/// the analyser.
pub struct AudioLevelSampler {
    analyser: SharedAnalyser,
    feed: LevelFeed,
    cancel_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl AudioLevelSampler {
    pub fn start(
        analyser: Box<dyn SpectrumAnalyser>,
        interval: Duration,
        level_count: usize,
        feed: LevelFeed,
    ) -> Result<Self, DeviceError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| DeviceError::Analysis(format!("no runtime for sampler: {e}")))?;
        let analyser: SharedAnalyser = Arc::new(Mutex::new(Some(analyser)));
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let handle = runtime.spawn(sample_loop(
            analyser.clone(),
            interval.max(Duration::from_millis(1)),
            level_count,
            feed.clone(),
            cancel_rx,
        ));
        tracing::debug!(?interval, level_count, "audio level sampler started");
        Ok(Self {
            analyser,
            feed,
            cancel_tx,
            handle,
        })
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    pub fn stop(self) {
        drop(self);
    }
}

impl Drop for AudioLevelSampler {
    fn drop(&mut self) {
        let _ = self.cancel_tx.send(true);
        let taken = self
            .analyser
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(mut analyser) = taken {
            analyser.disconnect();
        }
        self.feed.publish(Vec::new());
        tracing::debug!("audio level sampler stopped");
    }
}

async fn sample_loop(
    analyser: SharedAnalyser,
    interval: Duration,
    level_count: usize,
    feed: LevelFeed,
    mut cancel_rx: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut spectrum = Vec::new();

    loop {
        tokio::select! {
            _ = cancel_rx.changed() => break,
            _ = ticker.tick() => {
                // Publish under the lock so nothing lands after teardown.
                let mut guard = analyser.lock().unwrap_or_else(|e| e.into_inner());
                let Some(analyser) = guard.as_mut() else { break };
                spectrum.resize(analyser.bin_count(), 0);
                analyser.byte_frequency_data(&mut spectrum);
                feed.publish(compute_levels(&spectrum, level_count));
            }
        }
    }
}
