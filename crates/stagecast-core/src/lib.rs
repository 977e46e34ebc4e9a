//! Stagecast core: layer compositing and presentation modes.
//!
//! Pure Rust crate with no platform dependencies. Platform shells supply
//! a [`surface::DrawSurface`], a [`media::DeviceMedia`] and a
//! [`streaming::StreamingClient`]; everything else lives here.

pub mod audio_level;
pub mod compositor;
pub mod errors;
pub mod events;
pub mod interaction;
pub mod layout;
pub mod media;
pub mod modes;
pub mod persistence;
pub mod session;
pub mod settings;
pub mod streaming;
pub mod surface;
pub mod testing;

pub use compositor::{Compositor, Layer, LayerContent, LayerGeometry, LayerId, RenderLoop};
pub use errors::{DeviceError, StagecastError, StreamingError};
pub use events::{SessionEvent, SessionEventListener};
pub use media::{DeviceMedia, MediaSourceHandle, MediaTrack, SourceKind};
pub use modes::ModeKind;
pub use session::StreamSessionController;
pub use settings::{Settings, SettingsStore};
pub use streaming::{StreamDestination, StreamingClient, StreamingState};
pub use surface::{Color, DrawSurface};
