use std::sync::{Arc, Mutex, MutexGuard};

use futures_util::future::BoxFuture;

use crate::errors::StreamingError;
use crate::media::MediaTrack;
use crate::streaming::{OutboundStream, StreamDestination, StreamingClient};

#[derive(Default)]
struct StreamingLog {
    active: Option<(OutboundStream, StreamDestination)>,
    starts: usize,
    stops: usize,
    replaced: Vec<String>,
    fail_start: Option<StreamingError>,
}

/// Streaming client that keeps the outbound stream in memory.
#[derive(Clone, Default)]
pub struct FakeStreaming {
    log: Arc<Mutex<StreamingLog>>,
}

impl FakeStreaming {
    pub fn new() -> Self {
        Self::default()
    }

    fn log(&self) -> MutexGuard<'_, StreamingLog> {
        self.log.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Fail the next `start` call with `error`.
    pub fn fail_next_start(&self, error: StreamingError) {
        self.log().fail_start = Some(error);
    }

    pub fn is_active(&self) -> bool {
        self.log().active.is_some()
    }

    pub fn starts(&self) -> usize {
        self.log().starts
    }

    pub fn stops(&self) -> usize {
        self.log().stops
    }

    pub fn destination(&self) -> Option<StreamDestination> {
        self.log().active.as_ref().map(|(_, d)| d.clone())
    }

    pub fn video_track(&self) -> Option<Arc<dyn MediaTrack>> {
        self.log().active.as_ref().map(|(s, _)| s.video.clone())
    }

    pub fn audio_track(&self) -> Option<Arc<dyn MediaTrack>> {
        self.log().active.as_ref().and_then(|(s, _)| s.audio.clone())
    }

    /// Ids of tracks passed to `replace_audio_track`, oldest first.
    pub fn audio_replacements(&self) -> Vec<String> {
        self.log().replaced.clone()
    }
}

impl StreamingClient for FakeStreaming {
    fn start(
        &self,
        stream: OutboundStream,
        destination: StreamDestination,
    ) -> BoxFuture<'_, Result<(), StreamingError>> {
        Box::pin(async move {
            let mut log = self.log();
            if let Some(error) = log.fail_start.take() {
                return Err(error);
            }
            if log.active.is_some() {
                return Err(StreamingError::AlreadyActive);
            }
            log.starts += 1;
            log.active = Some((stream, destination));
            Ok(())
        })
    }

    fn stop(&self) -> BoxFuture<'_, Result<(), StreamingError>> {
        Box::pin(async move {
            let mut log = self.log();
            log.stops += 1;
            log.active = None;
            Ok(())
        })
    }

    fn replace_audio_track(&self, track: Arc<dyn MediaTrack>) -> Result<(), StreamingError> {
        let mut log = self.log();
        let Some((stream, _)) = log.active.as_mut() else {
            return Err(StreamingError::Client("no active stream".into()));
        };
        let id = track.id().to_string();
        stream.audio = Some(track);
        log.replaced.push(id);
        Ok(())
    }
}
