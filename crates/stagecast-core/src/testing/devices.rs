use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use futures_util::future::BoxFuture;
use tokio::sync::watch;

use super::tracks::{AnalyserProbe, FakeAnalyser, SyntheticTrack};
use crate::errors::DeviceError;
use crate::media::{
    AcquireRequest, DeviceInfo, DeviceMedia, MediaSourceHandle, MediaTrack, SourceKind,
    SpectrumAnalyser,
};

const ANALYSER_BINS: usize = 1024;

struct Minted {
    kind: SourceKind,
    track: Arc<SyntheticTrack>,
}

struct DevicesState {
    devices: Vec<DeviceInfo>,
    camera_size: (u32, u32),
    screen_size: (u32, u32),
    failures: HashMap<SourceKind, DeviceError>,
    requests: Vec<AcquireRequest>,
    minted: Vec<Minted>,
    analysers: Vec<AnalyserProbe>,
    level: u8,
}

/// Device collaborator minting synthetic tracks.
///
/// Records every request, can be told to fail per source kind, and can be
/// paused so that acquisitions hang until [`SyntheticDevices::resume`].
/// Single devices can be held the same way with
/// [`SyntheticDevices::hold_device`].
#[derive(Clone)]
pub struct SyntheticDevices {
    state: Arc<Mutex<DevicesState>>,
    gate: Arc<watch::Sender<bool>>,
    held: Arc<watch::Sender<HashSet<String>>>,
}

impl Default for SyntheticDevices {
    fn default() -> Self {
        Self::new()
    }
}

impl SyntheticDevices {
    /// Two cameras (the second unlabeled) and two microphones.
    pub fn new() -> Self {
        let device = |id: &str, kind, label: &str| DeviceInfo {
            id: id.to_string(),
            kind,
            label: label.to_string(),
        };
        Self::with_devices(vec![
            device("cam-0", SourceKind::Camera, "Integrated Camera"),
            device("cam-1f9e2d7c", SourceKind::Camera, ""),
            device("mic-0", SourceKind::Audio, "Built-in Microphone"),
            device("mic-1", SourceKind::Audio, "USB Headset"),
        ])
    }

    pub fn with_devices(devices: Vec<DeviceInfo>) -> Self {
        let (gate, _) = watch::channel(true);
        let (held, _) = watch::channel(HashSet::new());
        Self {
            state: Arc::new(Mutex::new(DevicesState {
                devices,
                camera_size: (640, 480),
                screen_size: (1920, 1080),
                failures: HashMap::new(),
                requests: Vec::new(),
                minted: Vec::new(),
                analysers: Vec::new(),
                level: 96,
            })),
            gate: Arc::new(gate),
            held: Arc::new(held),
        }
    }

    fn state(&self) -> MutexGuard<'_, DevicesState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_camera_size(&self, width: u32, height: u32) {
        self.state().camera_size = (width, height);
    }

    pub fn set_screen_size(&self, width: u32, height: u32) {
        self.state().screen_size = (width, height);
    }

    /// Spectrum value reported by analysers created from now on.
    pub fn set_level(&self, level: u8) {
        self.state().level = level;
    }

    /// Fail every acquisition of `kind` until cleared.
    pub fn fail(&self, kind: SourceKind, error: DeviceError) {
        self.state().failures.insert(kind, error);
    }

    pub fn clear_failure(&self, kind: SourceKind) {
        self.state().failures.remove(&kind);
    }

    /// Hold all acquisitions at their await point.
    pub fn pause(&self) {
        self.gate.send_replace(false);
    }

    pub fn resume(&self) {
        self.gate.send_replace(true);
    }

    /// Hold acquisitions resolving to device `id` until
    /// [`SyntheticDevices::release_device`].
    pub fn hold_device(&self, id: &str) {
        self.held.send_modify(|held| {
            held.insert(id.to_string());
        });
    }

    pub fn release_device(&self, id: &str) {
        self.held.send_modify(|held| {
            held.remove(id);
        });
    }

    pub fn requests(&self) -> Vec<AcquireRequest> {
        self.state().requests.clone()
    }

    /// Successful acquisitions of `kind`.
    pub fn acquisitions(&self, kind: SourceKind) -> usize {
        self.state().minted.iter().filter(|m| m.kind == kind).count()
    }

    /// Minted sources of `kind` whose tracks were not stopped yet.
    pub fn live(&self, kind: SourceKind) -> usize {
        self.state()
            .minted
            .iter()
            .filter(|m| m.kind == kind && m.track.is_live())
            .count()
    }

    /// Live camera plus screen sources.
    pub fn live_video(&self) -> usize {
        self.live(SourceKind::Camera) + self.live(SourceKind::Screen)
    }

    pub fn last_track(&self, kind: SourceKind) -> Option<Arc<SyntheticTrack>> {
        self.state()
            .minted
            .iter()
            .rev()
            .find(|m| m.kind == kind)
            .map(|m| m.track.clone())
    }

    pub fn analysers(&self) -> Vec<AnalyserProbe> {
        self.state().analysers.clone()
    }

    /// Device a request lands on; the first of its kind when unspecified.
    fn resolve(&self, request: &AcquireRequest) -> Option<String> {
        match &request.device_id {
            Some(id) => Some(id.clone()),
            None => self
                .state()
                .devices
                .iter()
                .find(|d| d.kind == request.kind)
                .map(|d| d.id.clone()),
        }
    }

    fn mint(&self, request: &AcquireRequest) -> Result<MediaSourceHandle, DeviceError> {
        let mut state = self.state();
        state.requests.push(request.clone());
        if let Some(error) = state.failures.get(&request.kind) {
            return Err(error.clone());
        }

        let device_id = match request.kind {
            SourceKind::Screen => None,
            kind => {
                let device = match &request.device_id {
                    Some(id) => state.devices.iter().find(|d| d.kind == kind && &d.id == id),
                    None => state.devices.iter().find(|d| d.kind == kind),
                };
                Some(device.ok_or(DeviceError::NotFound(kind))?.id.clone())
            }
        };

        let serial = state.minted.len();
        let label = device_id.as_deref().unwrap_or("display");
        let track = match request.kind {
            SourceKind::Camera => {
                let (w, h) = state.camera_size;
                SyntheticTrack::video(format!("{label}#{serial}"), w, h)
            }
            SourceKind::Screen => {
                let (w, h) = state.screen_size;
                SyntheticTrack::video(format!("{label}#{serial}"), w, h)
            }
            SourceKind::Audio => SyntheticTrack::audio(format!("{label}#{serial}")),
        };
        let track = Arc::new(track);
        state.minted.push(Minted {
            kind: request.kind,
            track: track.clone(),
        });

        let tracks: Vec<Arc<dyn MediaTrack>> = vec![track];
        Ok(MediaSourceHandle::new(request.kind, device_id, tracks))
    }
}

impl DeviceMedia for SyntheticDevices {
    fn acquire(
        &self,
        request: AcquireRequest,
    ) -> BoxFuture<'_, Result<MediaSourceHandle, DeviceError>> {
        let mut gate = self.gate.subscribe();
        let mut held = self.held.subscribe();
        let device = self.resolve(&request);
        Box::pin(async move {
            // A dropped sender cannot happen while `self` is borrowed.
            let _ = gate.wait_for(|open| *open).await;
            if let Some(device) = device {
                let _ = held.wait_for(|held| !held.contains(&device)).await;
            }
            self.mint(&request)
        })
    }

    fn enumerate(&self) -> BoxFuture<'_, Result<Vec<DeviceInfo>, DeviceError>> {
        let devices = self.state().devices.clone();
        Box::pin(async move { Ok(devices) })
    }

    fn analyser(
        &self,
        source: &MediaSourceHandle,
    ) -> Result<Box<dyn SpectrumAnalyser>, DeviceError> {
        if source.audio_track().is_none() {
            return Err(DeviceError::Analysis(format!(
                "{} source has no audio track",
                source.kind()
            )));
        }
        let mut state = self.state();
        let analyser = FakeAnalyser::new(ANALYSER_BINS, state.level);
        state.analysers.push(analyser.probe());
        Ok(Box::new(analyser))
    }
}
