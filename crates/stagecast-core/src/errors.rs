use thiserror::Error;

use crate::media::SourceKind;

/// Top-level error returned by the session controller.
#[derive(Debug, Error)]
pub enum StagecastError {
    #[error("device error: {0}")]
    Device(#[from] DeviceError),
    #[error("session controller is closed")]
    Closed,
    #[error("a mode transition is already in progress")]
    TransitionInProgress,
    #[error("streaming error: {0}")]
    Streaming(#[from] StreamingError),
    #[error("persistence error: {0}")]
    Persistence(#[from] PersistenceError),
}

/// Acquisition failures reported by the device collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceError {
    #[error("permission denied for {0} source")]
    PermissionDenied(SourceKind),
    #[error("no {0} device found")]
    NotFound(SourceKind),
    #[error("{0} device is busy")]
    Busy(SourceKind),
    #[error("audio analysis unavailable: {0}")]
    Analysis(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamingError {
    #[error("an outbound stream is already active")]
    AlreadyActive,
    #[error("another streaming operation is in progress")]
    Busy,
    #[error("streaming client failed: {0}")]
    Client(String),
}

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("storage io: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed record: {0}")]
    Format(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SurfaceError {
    #[error("paint failed: {0}")]
    Paint(String),
    #[error("frame has {actual} bytes, expected {expected}")]
    FrameSize { expected: usize, actual: usize },
}

/// Failure raised by a layer's pre- or post-draw hook.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LayerError {
    #[error("layout hook failed: {0}")]
    Hook(String),
    #[error(transparent)]
    Surface(#[from] SurfaceError),
}
