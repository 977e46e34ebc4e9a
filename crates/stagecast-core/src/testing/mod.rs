//! Synthetic collaborators for offline runs and tests.
//!
//! Every platform seam of the core (devices, tracks, analysers, drawing
//! surface, streaming client) has an in-memory stand-in here that records
//! what the core asked of it.

mod devices;
mod streaming;
mod surface;
mod tracks;

pub use devices::SyntheticDevices;
pub use streaming::FakeStreaming;
pub use surface::{DrawOp, RecordingSurface};
pub use tracks::{AnalyserProbe, FakeAnalyser, SyntheticTrack, synthetic_video_frame};
