use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::StreamingError;
use crate::media::MediaTrack;
use crate::settings::RelayConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamingState {
    Idle,
    Streaming,
}

/// Where the outbound session publishes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamDestination {
    /// RTMP ingest base, e.g. `rtmp://live.example.org/live`.
    pub server: String,
    pub session_id: String,
    /// Local relay that accepts the browser-side media and forwards it.
    pub relay: RelayConfig,
}

impl StreamDestination {
    pub fn new(server: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            session_id: session_id.into(),
            relay: RelayConfig::default(),
        }
    }

    /// Destination with a freshly generated session id.
    pub fn generate(server: impl Into<String>) -> Self {
        Self::new(server, Uuid::new_v4().to_string())
    }

    pub fn with_relay(mut self, relay: RelayConfig) -> Self {
        self.relay = relay;
        self
    }

    pub fn rtmp_url(&self) -> String {
        format!("{}/{}", self.server.trim_end_matches('/'), self.session_id)
    }
}

/// The media handed to the streaming client: the composited feed plus at
/// most one audio track.
#[derive(Clone)]
pub struct OutboundStream {
    pub video: Arc<dyn MediaTrack>,
    pub audio: Option<Arc<dyn MediaTrack>>,
}

impl std::fmt::Debug for OutboundStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutboundStream")
            .field("video", &self.video.id())
            .field("audio", &self.audio.as_ref().map(|t| t.id().to_string()))
            .finish()
    }
}

/// Streaming-protocol client. Encoding and transport are its business.
pub trait StreamingClient: Send + Sync {
    fn start(
        &self,
        stream: OutboundStream,
        destination: StreamDestination,
    ) -> BoxFuture<'_, Result<(), StreamingError>>;

    fn stop(&self) -> BoxFuture<'_, Result<(), StreamingError>>;

    /// Swap the live audio track without restarting the stream.
    fn replace_audio_track(&self, track: Arc<dyn MediaTrack>) -> Result<(), StreamingError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rtmp_url_joins_server_and_session() {
        let dest = StreamDestination::new("rtmp://live.example.org/live", "abc-123");
        assert_eq!(dest.rtmp_url(), "rtmp://live.example.org/live/abc-123");

        let trailing = StreamDestination::new("rtmp://host/app/", "s1");
        assert_eq!(trailing.rtmp_url(), "rtmp://host/app/s1");
    }

    #[test]
    fn generated_destinations_get_unique_sessions() {
        let a = StreamDestination::generate("rtmp://host/app");
        let b = StreamDestination::generate("rtmp://host/app");
        assert_ne!(a.session_id, b.session_id);
        assert!(Uuid::parse_str(&a.session_id).is_ok());
        assert_eq!(a.relay, RelayConfig::default());
    }
}
