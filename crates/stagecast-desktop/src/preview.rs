//! Streaming client that writes JPEG snapshots of the outbound feed to
//! disk instead of publishing it.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures_util::future::BoxFuture;
use stagecast_core::errors::StreamingError;
use stagecast_core::media::MediaTrack;
use stagecast_core::streaming::{OutboundStream, StreamDestination, StreamingClient};
use stagecast_video::{PREVIEW_QUALITY, encode_jpeg};
use tokio::sync::watch;
use tokio::task::JoinHandle;

pub const PREVIEW_FILE: &str = "preview.jpg";

struct ActivePreview {
    cancel_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
    audio: Option<Arc<dyn MediaTrack>>,
}

pub struct PreviewStreaming {
    out_dir: PathBuf,
    interval: Duration,
    active: Mutex<Option<ActivePreview>>,
}

impl PreviewStreaming {
    pub fn new(out_dir: impl Into<PathBuf>, interval: Duration) -> Self {
        Self {
            out_dir: out_dir.into(),
            interval,
            active: Mutex::new(None),
        }
    }

    pub fn preview_path(&self) -> PathBuf {
        self.out_dir.join(PREVIEW_FILE)
    }

    fn active(&self) -> MutexGuard<'_, Option<ActivePreview>> {
        self.active.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Id of the audio track currently attached to the preview.
    pub fn audio_track_id(&self) -> Option<String> {
        self.active()
            .as_ref()
            .and_then(|a| a.audio.as_ref().map(|t| t.id().to_string()))
    }
}

impl StreamingClient for PreviewStreaming {
    fn start(
        &self,
        stream: OutboundStream,
        destination: StreamDestination,
    ) -> BoxFuture<'_, Result<(), StreamingError>> {
        Box::pin(async move {
            std::fs::create_dir_all(&self.out_dir)
                .map_err(|e| StreamingError::Client(format!("preview dir: {e}")))?;
            let mut active = self.active();
            if active.is_some() {
                return Err(StreamingError::AlreadyActive);
            }

            let (cancel_tx, cancel_rx) = watch::channel(false);
            let handle = tokio::spawn(snapshot_loop(
                stream.video,
                self.preview_path(),
                self.interval,
                cancel_rx,
            ));
            tracing::info!(
                url = %destination.rtmp_url(),
                relay = %destination.relay.address(),
                path = %self.preview_path().display(),
                "preview streaming started"
            );
            *active = Some(ActivePreview {
                cancel_tx,
                handle,
                audio: stream.audio,
            });
            Ok(())
        })
    }

    fn stop(&self) -> BoxFuture<'_, Result<(), StreamingError>> {
        Box::pin(async move {
            let taken = self.active().take();
            if let Some(active) = taken {
                let _ = active.cancel_tx.send(true);
                if let Err(e) = active.handle.await {
                    tracing::warn!("preview task ended abnormally: {e}");
                }
                tracing::info!("preview streaming stopped");
            }
            Ok(())
        })
    }

    fn replace_audio_track(&self, track: Arc<dyn MediaTrack>) -> Result<(), StreamingError> {
        let mut active = self.active();
        let Some(active) = active.as_mut() else {
            return Err(StreamingError::Client("preview is not running".into()));
        };
        tracing::info!(track = %track.id(), "preview audio track replaced");
        active.audio = Some(track);
        Ok(())
    }
}

async fn snapshot_loop(
    video: Arc<dyn MediaTrack>,
    path: PathBuf,
    interval: Duration,
    mut cancel_rx: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = cancel_rx.changed() => break,
            _ = ticker.tick() => write_snapshot(video.as_ref(), &path),
        }
    }
}

fn write_snapshot(video: &dyn MediaTrack, path: &Path) {
    let Some(frame) = video.latest_frame() else {
        return;
    };
    match encode_jpeg(&frame, PREVIEW_QUALITY) {
        Ok(jpeg) => {
            if let Err(e) = std::fs::write(path, jpeg) {
                tracing::warn!(path = %path.display(), "failed to write preview: {e}");
            }
        }
        Err(e) => tracing::warn!("failed to encode preview: {e}"),
    }
}
