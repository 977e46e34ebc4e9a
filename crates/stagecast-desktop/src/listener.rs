use stagecast_core::events::{SessionEvent, SessionEventListener};

/// Mirrors session events into the log.
pub struct LoggingListener;

impl SessionEventListener for LoggingListener {
    fn on_event(&self, event: SessionEvent) {
        match event {
            SessionEvent::ModeChanged(mode) => tracing::info!(%mode, "mode changed"),
            SessionEvent::CameraVisibilityChanged(visible) => {
                tracing::info!(visible, "camera visibility changed")
            }
            SessionEvent::MicrophoneChanged(enabled) => {
                tracing::info!(enabled, "microphone changed")
            }
            SessionEvent::VideoDeviceChanged(id) => {
                tracing::info!(device = %id, "video device selected")
            }
            SessionEvent::AudioDeviceChanged(id) => {
                tracing::info!(device = %id, "audio device selected")
            }
            SessionEvent::StreamingStateChanged(state) => {
                tracing::info!(?state, "streaming state changed")
            }
            SessionEvent::Destroyed => tracing::info!("session destroyed"),
        }
    }
}
