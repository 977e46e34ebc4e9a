//! Top-level session controller.
//!
//! Owns the compositor, the current presentation mode, device selection
//! and the outbound stream. State lives behind a std mutex that is never
//! held across an await; the only suspension points are device
//! acquisition and streaming start/stop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use kurbo::{Point, Size};

use crate::audio_level::{AudioLevelSampler, LevelFeed, LevelTap};
use crate::compositor::{self, Compositor, LayerId, RenderLoop, SharedCompositor};
use crate::errors::{StagecastError, StreamingError};
use crate::events::{EventEmitter, ListenerId, SessionEvent, SessionEventListener};
use crate::interaction::{InteractionConfig, InteractionController};
use crate::media::{AcquireRequest, DeviceInfo, DeviceMedia, MediaSourceHandle, SourceKind};
use crate::modes::{
    CameraMode, DeviceSubscriptions, DeviceTopic, IdleMode, ModeContext, ModeKind,
    DEFAULT_AVATAR_URI, PresentationMode, ScreenShareMode,
};
use crate::settings::Settings;
use crate::streaming::{OutboundStream, StreamDestination, StreamingClient, StreamingState};
use crate::surface::{DrawSurface, ImageAsset};

/// Single-slot in-flight flag. Released on drop, on every exit path.
struct BusyGuard<'a>(&'a AtomicBool);

impl<'a> BusyGuard<'a> {
    fn try_acquire(flag: &'a AtomicBool) -> Option<Self> {
        (!flag.swap(true, Ordering::SeqCst)).then_some(Self(flag))
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

struct SessionState {
    mode: Option<Box<dyn PresentationMode>>,
    interaction: InteractionController,
    subscriptions: DeviceSubscriptions,
    video_device: Option<String>,
    audio_device: Option<String>,
    camera_visible: bool,
    microphone_enabled: bool,
    /// Microphone feeding the level meter.
    audio_probe: Option<MediaSourceHandle>,
    /// Microphone attached to the outbound stream.
    outbound_audio: Option<MediaSourceHandle>,
    streaming: StreamingState,
    destroyed: bool,
    /// Bumped on every committed transition; detects superseded swaps.
    mode_epoch: u64,
    /// Bumped on every camera selection.
    video_epoch: u64,
    /// Bumped on every audio device selection.
    audio_epoch: u64,
}

impl SessionState {
    fn ensure_open(&self) -> Result<(), StagecastError> {
        if self.destroyed {
            Err(StagecastError::Closed)
        } else {
            Ok(())
        }
    }
}

pub struct StreamSessionController {
    devices: Arc<dyn DeviceMedia>,
    streaming: Arc<dyn StreamingClient>,
    compositor: SharedCompositor,
    settings: Settings,
    events: EventEmitter,
    levels: LevelFeed,
    state: Mutex<SessionState>,
    transition: AtomicBool,
    streaming_busy: AtomicBool,
    render: Mutex<Option<RenderLoop>>,
}

impl StreamSessionController {
    /// Build a controller showing the idle avatar. No device is touched;
    /// see [`StreamSessionController::open`] for the full start-up.
    pub fn new(
        devices: Arc<dyn DeviceMedia>,
        streaming: Arc<dyn StreamingClient>,
        surface: Box<dyn DrawSurface>,
        settings: Settings,
    ) -> Self {
        let compositor = Compositor::new(surface, settings.frame_rate, settings.background_color())
            .into_shared();
        let controller = Self {
            devices,
            streaming,
            compositor,
            events: EventEmitter::new(),
            levels: LevelFeed::new(),
            state: Mutex::new(SessionState {
                mode: None,
                interaction: InteractionController::new(InteractionConfig::from(&settings)),
                subscriptions: DeviceSubscriptions::new(),
                video_device: settings.video_device.clone(),
                audio_device: settings.audio_device.clone(),
                camera_visible: true,
                microphone_enabled: settings.microphone_on_start,
                audio_probe: None,
                outbound_audio: None,
                streaming: StreamingState::Idle,
                destroyed: false,
                mode_epoch: 0,
                video_epoch: 0,
                audio_epoch: 0,
            }),
            settings,
            transition: AtomicBool::new(false),
            streaming_busy: AtomicBool::new(false),
            render: Mutex::new(None),
        };
        let idle = IdleMode::new(controller.avatar(), None);
        // A fresh controller is never closed.
        let _ = controller.commit(Box::new(idle));
        controller
    }

    /// Build, probe the microphone for the level meter, and enter camera
    /// mode when `camera_on_start` is set. A missing microphone or camera
    /// is logged and the controller stays idle.
    pub async fn open(
        devices: Arc<dyn DeviceMedia>,
        streaming: Arc<dyn StreamingClient>,
        surface: Box<dyn DrawSurface>,
        settings: Settings,
    ) -> Result<Self, StagecastError> {
        let camera_on_start = settings.camera_on_start;
        let controller = Self::new(devices, streaming, surface, settings);
        controller.goto_idle().await?;
        if camera_on_start {
            if let Err(e) = controller.goto_camera().await {
                tracing::warn!("camera unavailable at start, staying idle: {e}");
            }
        }
        Ok(controller)
    }

    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn ensure_open(&self) -> Result<(), StagecastError> {
        self.state().ensure_open()
    }

    fn avatar(&self) -> ImageAsset {
        let uri = self
            .settings
            .avatar_uri
            .clone()
            .unwrap_or_else(|| DEFAULT_AVATAR_URI.to_string());
        let side = self.settings.avatar_size;
        ImageAsset {
            uri,
            size: Size::new(side, side),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn compositor(&self) -> SharedCompositor {
        self.compositor.clone()
    }

    // -- lifecycle ------------------------------------------------------

    /// Start the fixed-rate draw loop. Must be called from within a tokio
    /// runtime; a second call while running is a no-op.
    pub fn start_render_loop(&self) -> Result<(), StagecastError> {
        self.ensure_open()?;
        let mut render = self.render.lock().unwrap_or_else(|e| e.into_inner());
        if render.as_ref().is_none_or(|r| !r.is_running()) {
            *render = Some(RenderLoop::spawn(self.compositor.clone()));
        }
        Ok(())
    }

    /// Tear everything down. Every later call, this one included, fails
    /// with [`StagecastError::Closed`].
    pub async fn destroy(&self) -> Result<(), StagecastError> {
        let (probe, outbound, was_streaming) = {
            let mut state = self.state();
            state.ensure_open()?;
            state.destroyed = true;
            let was_streaming = state.streaming == StreamingState::Streaming;
            state.streaming = StreamingState::Idle;
            (state.audio_probe.take(), state.outbound_audio.take(), was_streaming)
        };
        drop(probe);

        if was_streaming {
            if let Err(e) = self.streaming.stop().await {
                tracing::warn!("streaming client failed to stop during destroy: {e}");
            }
        }
        drop(outbound);

        {
            let mut state = self.state();
            let st = &mut *state;
            let mut compositor = compositor::lock(&self.compositor);
            if let Some(mode) = st.mode.take() {
                let mut ctx = ModeContext {
                    compositor: &mut compositor,
                    interaction: &mut st.interaction,
                    subscriptions: &mut st.subscriptions,
                    settings: &self.settings,
                    levels: &self.levels,
                };
                mode.detach(&mut ctx);
            }
            st.interaction.clear();
            compositor.clear();
        }

        if let Some(render) = self.render.lock().unwrap_or_else(|e| e.into_inner()).take() {
            render.stop();
        }

        tracing::info!("session destroyed");
        self.events.emit(SessionEvent::Destroyed);
        self.events.clear();
        Ok(())
    }

    // -- modes ----------------------------------------------------------

    pub async fn goto_camera(&self) -> Result<(), StagecastError> {
        self.ensure_open()?;
        let _guard = self.begin_transition()?;
        let device = self.state().video_device.clone();
        let camera = self.acquire(SourceKind::Camera, device).await?;
        self.commit(Box::new(CameraMode::new(camera)))
    }

    pub async fn goto_screen(&self) -> Result<(), StagecastError> {
        self.ensure_open()?;
        let _guard = self.begin_transition()?;
        let device = self.state().video_device.clone();
        let screen = self.acquire(SourceKind::Screen, None).await?;
        // A camera failure drops (and so releases) the screen capture.
        let camera = self.acquire(SourceKind::Camera, device).await?;
        self.commit(Box::new(ScreenShareMode::new(screen, camera)))
    }

    /// Show the avatar and level meter. Never fails on device trouble: a
    /// missing microphone only means no bars.
    pub async fn goto_idle(&self) -> Result<(), StagecastError> {
        self.ensure_open()?;
        let _guard = self.begin_transition()?;
        self.ensure_audio_probe().await?;
        let sampler = {
            let state = self.state();
            state.audio_probe.as_ref().and_then(|probe| self.start_sampler(probe))
        };
        self.commit(Box::new(IdleMode::new(self.avatar(), sampler)))
    }

    fn begin_transition(&self) -> Result<BusyGuard<'_>, StagecastError> {
        BusyGuard::try_acquire(&self.transition).ok_or(StagecastError::TransitionInProgress)
    }

    /// Detach the current mode, then attach `mode`. Runs entirely under
    /// the state lock; nothing is committed once the controller closed.
    fn commit(&self, mut mode: Box<dyn PresentationMode>) -> Result<(), StagecastError> {
        let kind = mode.kind();
        {
            let mut state = self.state();
            state.ensure_open()?;
            let st = &mut *state;
            let mut compositor = compositor::lock(&self.compositor);
            let mut ctx = ModeContext {
                compositor: &mut compositor,
                interaction: &mut st.interaction,
                subscriptions: &mut st.subscriptions,
                settings: &self.settings,
                levels: &self.levels,
            };
            if let Some(previous) = st.mode.take() {
                previous.detach(&mut ctx);
            }
            mode.attach(&mut ctx, st.camera_visible);
            st.mode = Some(mode);
            st.mode_epoch += 1;
        }
        tracing::info!(mode = %kind, "mode changed");
        self.events.emit(SessionEvent::ModeChanged(kind));
        Ok(())
    }

    pub fn mode(&self) -> Result<ModeKind, StagecastError> {
        let state = self.state();
        state.ensure_open()?;
        Ok(state.mode.as_ref().map_or(ModeKind::Idle, |m| m.kind()))
    }

    /// Sources held by the current mode.
    pub fn live_source_count(&self) -> Result<usize, StagecastError> {
        let state = self.state();
        state.ensure_open()?;
        Ok(state.mode.as_ref().map_or(0, |m| m.live_sources()))
    }

    pub fn camera_layer(&self) -> Result<Option<LayerId>, StagecastError> {
        let state = self.state();
        state.ensure_open()?;
        Ok(state.mode.as_ref().and_then(|m| m.camera_layer()))
    }

    // -- camera and microphone -----------------------------------------

    /// Show or hide the camera without releasing it. Returns the new
    /// visibility.
    pub fn toggle_camera(&self) -> Result<bool, StagecastError> {
        let visible = {
            let mut state = self.state();
            state.ensure_open()?;
            let st = &mut *state;
            let current = st.mode.as_ref().map_or(st.camera_visible, |m| m.is_camera_visible());
            let visible = !current;
            st.camera_visible = visible;
            if let Some(mode) = st.mode.as_mut() {
                mode.set_camera_visible(&mut compositor::lock(&self.compositor), visible);
            }
            visible
        };
        tracing::info!(visible, "camera visibility toggled");
        self.events.emit(SessionEvent::CameraVisibilityChanged(visible));
        Ok(visible)
    }

    pub fn is_camera_visible(&self) -> Result<bool, StagecastError> {
        let state = self.state();
        state.ensure_open()?;
        Ok(state.mode.as_ref().map_or(state.camera_visible, |m| m.is_camera_visible()))
    }

    /// Mute or unmute the outbound microphone. Returns the new state.
    pub fn toggle_microphone(&self) -> Result<bool, StagecastError> {
        let enabled = {
            let mut state = self.state();
            state.ensure_open()?;
            state.microphone_enabled = !state.microphone_enabled;
            if let Some(track) = state.outbound_audio.as_ref().and_then(|h| h.audio_track()) {
                track.set_enabled(state.microphone_enabled);
            }
            state.microphone_enabled
        };
        tracing::info!(enabled, "microphone toggled");
        self.events.emit(SessionEvent::MicrophoneChanged(enabled));
        Ok(enabled)
    }

    pub fn is_microphone_enabled(&self) -> Result<bool, StagecastError> {
        let state = self.state();
        state.ensure_open()?;
        Ok(state.microphone_enabled)
    }

    // -- devices --------------------------------------------------------

    pub async fn enumerate_devices(&self) -> Result<Vec<DeviceInfo>, StagecastError> {
        self.ensure_open()?;
        Ok(self.devices.enumerate().await?)
    }

    pub fn selected_video_device(&self) -> Result<Option<String>, StagecastError> {
        let state = self.state();
        state.ensure_open()?;
        Ok(state.video_device.clone())
    }

    pub fn selected_audio_device(&self) -> Result<Option<String>, StagecastError> {
        let state = self.state();
        state.ensure_open()?;
        Ok(state.audio_device.clone())
    }

    /// Select a camera. A mode showing one swaps just its camera source in
    /// place; the mode is not re-entered.
    pub async fn change_video_device(&self, id: &str) -> Result<(), StagecastError> {
        let (subscribed, mode_epoch, video_epoch) = {
            let mut state = self.state();
            state.ensure_open()?;
            state.video_device = Some(id.to_string());
            state.video_epoch += 1;
            (
                state.subscriptions.is_subscribed(DeviceTopic::Video),
                state.mode_epoch,
                state.video_epoch,
            )
        };
        tracing::info!(device = id, "video device changed");
        self.events.emit(SessionEvent::VideoDeviceChanged(id.to_string()));
        if !subscribed {
            return Ok(());
        }

        let camera = self.acquire(SourceKind::Camera, Some(id.to_string())).await?;
        let displaced = {
            let mut state = self.state();
            state.ensure_open()?;
            if state.mode_epoch != mode_epoch {
                tracing::debug!(device = id, "camera swap superseded by a transition");
                return Ok(());
            }
            if state.video_epoch != video_epoch {
                tracing::debug!(device = id, "camera swap superseded by a newer selection");
                return Ok(());
            }
            let st = &mut *state;
            match st.mode.as_mut() {
                Some(mode) => mode.replace_camera(&mut compositor::lock(&self.compositor), camera),
                None => Some(camera),
            }
        };
        drop(displaced);
        Ok(())
    }

    /// Select a microphone. The level meter is rebuilt against it and an
    /// active outbound stream gets its audio track replaced in place.
    pub async fn change_audio_device(&self, id: &str) -> Result<(), StagecastError> {
        let (epoch, streaming) = {
            let mut state = self.state();
            state.ensure_open()?;
            state.audio_device = Some(id.to_string());
            state.audio_epoch += 1;
            (state.audio_epoch, state.streaming)
        };
        tracing::info!(device = id, "audio device changed");
        self.events.emit(SessionEvent::AudioDeviceChanged(id.to_string()));

        let probe = self.acquire(SourceKind::Audio, Some(id.to_string())).await?;
        let outbound = match streaming {
            StreamingState::Streaming => {
                Some(self.acquire(SourceKind::Audio, Some(id.to_string())).await?)
            }
            StreamingState::Idle => None,
        };

        let released = {
            let mut state = self.state();
            state.ensure_open()?;
            if state.audio_epoch != epoch {
                tracing::debug!(device = id, "audio swap superseded by a newer selection");
                return Ok(());
            }
            let st = &mut *state;

            if st.subscriptions.is_subscribed(DeviceTopic::Audio) {
                if let Some(slot) = st.mode.as_mut().and_then(|m| m.level_sampler()) {
                    *slot = None;
                    *slot = self.start_sampler(&probe);
                }
            }
            let old_probe = st.audio_probe.replace(probe);

            let mut old_outbound = None;
            if let Some(outbound) = outbound.filter(|_| st.streaming == StreamingState::Streaming) {
                if let Some(track) = outbound.audio_track() {
                    track.set_enabled(st.microphone_enabled);
                    self.streaming.replace_audio_track(track.clone())?;
                }
                old_outbound = st.outbound_audio.replace(outbound);
            }
            (old_probe, old_outbound)
        };
        drop(released);
        Ok(())
    }

    async fn ensure_audio_probe(&self) -> Result<(), StagecastError> {
        let device = {
            let state = self.state();
            if state.audio_probe.is_some() {
                return Ok(());
            }
            state.audio_device.clone()
        };
        match self.acquire(SourceKind::Audio, device).await {
            Ok(probe) => {
                let mut state = self.state();
                state.ensure_open()?;
                if state.audio_probe.is_none() {
                    state.audio_probe = Some(probe);
                }
                Ok(())
            }
            Err(StagecastError::Device(e)) => {
                tracing::warn!("no microphone for level meter: {e}");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn start_sampler(&self, probe: &MediaSourceHandle) -> Option<AudioLevelSampler> {
        let started = self.devices.analyser(probe).and_then(|analyser| {
            AudioLevelSampler::start(
                analyser,
                Duration::from_millis(self.settings.sampler_interval_ms),
                self.settings.level_count,
                self.levels.clone(),
            )
        });
        started
            .inspect_err(|e| tracing::warn!("level meter unavailable: {e}"))
            .ok()
    }

    /// Acquire a source; the result is discarded (and released) when the
    /// controller closed in the meantime.
    async fn acquire(
        &self,
        kind: SourceKind,
        device_id: Option<String>,
    ) -> Result<MediaSourceHandle, StagecastError> {
        let handle = self
            .devices
            .acquire(AcquireRequest { kind, device_id })
            .await
            .inspect_err(|e| tracing::warn!(%kind, "acquisition failed: {e}"))?;
        self.ensure_open()?;
        tracing::debug!(%kind, source = %handle.id(), "source acquired");
        Ok(handle)
    }

    // -- streaming ------------------------------------------------------

    pub fn streaming_state(&self) -> Result<StreamingState, StagecastError> {
        let state = self.state();
        state.ensure_open()?;
        Ok(state.streaming)
    }

    /// Publish the composited surface plus the selected microphone (muted
    /// unless enabled) to `destination`.
    pub async fn start_streaming(
        &self,
        destination: StreamDestination,
    ) -> Result<(), StagecastError> {
        self.ensure_open()?;
        let _busy = BusyGuard::try_acquire(&self.streaming_busy).ok_or(StreamingError::Busy)?;
        let (device, audio_epoch) = {
            let state = self.state();
            if state.streaming == StreamingState::Streaming {
                return Err(StreamingError::AlreadyActive.into());
            }
            (state.audio_device.clone(), state.audio_epoch)
        };

        let audio = self.acquire(SourceKind::Audio, device).await?;
        let microphone_enabled = self.state().microphone_enabled;
        if let Some(track) = audio.audio_track() {
            track.set_enabled(microphone_enabled);
        }
        let video = compositor::lock(&self.compositor).capture_stream(self.settings.capture_rate);
        let stream = OutboundStream {
            video,
            audio: audio.audio_track().cloned(),
        };

        let url = destination.rtmp_url();
        self.streaming.start(stream, destination).await?;

        let (closed, stale_audio) = {
            let mut state = self.state();
            if state.destroyed {
                (true, false)
            } else {
                state.streaming = StreamingState::Streaming;
                state.outbound_audio = Some(audio);
                (false, state.audio_epoch != audio_epoch)
            }
        };
        if closed {
            let _ = self.streaming.stop().await;
            return Err(StagecastError::Closed);
        }

        tracing::info!(url = %url, "streaming started");
        self.events
            .emit(SessionEvent::StreamingStateChanged(StreamingState::Streaming));

        // A microphone change that landed while starting saw no stream.
        if stale_audio {
            if let Err(e) = self.refresh_outbound_audio().await {
                tracing::warn!("outbound audio kept on previous microphone: {e}");
            }
        }
        Ok(())
    }

    /// Point the outbound audio at the selected microphone, unless a newer
    /// selection or a stop overtakes the acquisition.
    async fn refresh_outbound_audio(&self) -> Result<(), StagecastError> {
        let (device, epoch) = {
            let state = self.state();
            (state.audio_device.clone(), state.audio_epoch)
        };
        let outbound = self.acquire(SourceKind::Audio, device).await?;
        let displaced = {
            let mut state = self.state();
            state.ensure_open()?;
            if state.audio_epoch != epoch || state.streaming != StreamingState::Streaming {
                tracing::debug!("outbound audio refresh superseded");
                return Ok(());
            }
            if let Some(track) = outbound.audio_track() {
                track.set_enabled(state.microphone_enabled);
                self.streaming.replace_audio_track(track.clone())?;
            }
            state.outbound_audio.replace(outbound)
        };
        drop(displaced);
        Ok(())
    }

    /// Stop the outbound stream. A no-op when not streaming.
    pub async fn stop_streaming(&self) -> Result<(), StagecastError> {
        self.ensure_open()?;
        let _busy = BusyGuard::try_acquire(&self.streaming_busy).ok_or(StreamingError::Busy)?;
        if self.state().streaming == StreamingState::Idle {
            return Ok(());
        }

        self.streaming.stop().await?;
        let outbound = {
            let mut state = self.state();
            state.streaming = StreamingState::Idle;
            state.outbound_audio.take()
        };
        drop(outbound);

        tracing::info!("streaming stopped");
        self.events
            .emit(SessionEvent::StreamingStateChanged(StreamingState::Idle));
        Ok(())
    }

    // -- pointer input --------------------------------------------------

    /// Returns whether a drag started.
    pub fn pointer_down(&self, pointer: Point) -> Result<bool, StagecastError> {
        let mut state = self.state();
        state.ensure_open()?;
        let mut compositor = compositor::lock(&self.compositor);
        Ok(state.interaction.pointer_down(&mut compositor, pointer).is_some())
    }

    pub fn pointer_move(&self, pointer: Point) -> Result<(), StagecastError> {
        let mut state = self.state();
        state.ensure_open()?;
        let mut compositor = compositor::lock(&self.compositor);
        state.interaction.pointer_move(&mut compositor, pointer);
        Ok(())
    }

    pub fn pointer_up(&self) -> Result<(), StagecastError> {
        let mut state = self.state();
        state.ensure_open()?;
        let mut compositor = compositor::lock(&self.compositor);
        state.interaction.end_drag(&mut compositor);
        Ok(())
    }

    /// Scale the movable layer under `pointer`. Returns whether it changed.
    pub fn wheel(&self, pointer: Point, delta_y: f64) -> Result<bool, StagecastError> {
        let mut state = self.state();
        state.ensure_open()?;
        let mut compositor = compositor::lock(&self.compositor);
        let interaction = &mut state.interaction;
        let Some(layer) = compositor.hit_test(pointer, |id| interaction.is_registered(id)) else {
            return Ok(false);
        };
        Ok(interaction.wheel(&mut compositor, layer, delta_y))
    }

    // -- observation ----------------------------------------------------

    pub fn add_listener(
        &self,
        listener: Arc<dyn SessionEventListener>,
    ) -> Result<ListenerId, StagecastError> {
        self.ensure_open()?;
        Ok(self.events.add_listener(listener))
    }

    pub fn remove_listener(&self, id: ListenerId) -> Result<bool, StagecastError> {
        self.ensure_open()?;
        Ok(self.events.remove_listener(id))
    }

    /// Latest level meter reading; empty when no meter is running.
    pub fn audio_levels(&self) -> Result<Arc<[f64]>, StagecastError> {
        self.ensure_open()?;
        Ok(self.levels.subscribe().latest())
    }

    pub fn level_tap(&self) -> Result<LevelTap, StagecastError> {
        self.ensure_open()?;
        Ok(self.levels.subscribe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kurbo::Rect;

    use crate::errors::DeviceError;
    use crate::media::MediaTrack;
    use crate::testing::{FakeStreaming, RecordingSurface, SyntheticDevices};

    struct Harness {
        controller: Arc<StreamSessionController>,
        devices: SyntheticDevices,
        streaming: FakeStreaming,
        surface: RecordingSurface,
    }

    fn harness() -> Harness {
        let devices = SyntheticDevices::new();
        let streaming = FakeStreaming::new();
        let surface = RecordingSurface::new(1280.0, 720.0);
        let controller = StreamSessionController::new(
            Arc::new(devices.clone()),
            Arc::new(streaming.clone()),
            Box::new(surface.clone()),
            Settings::default(),
        );
        Harness {
            controller: Arc::new(controller),
            devices,
            streaming,
            surface,
        }
    }

    fn layer_bounds(h: &Harness, id: LayerId) -> Rect {
        compositor::lock(&h.controller.compositor())
            .layer(id)
            .unwrap()
            .geometry()
            .bounds()
    }

    fn layer_enabled(h: &Harness, id: LayerId) -> bool {
        compositor::lock(&h.controller.compositor()).layer(id).unwrap().is_enabled()
    }

    #[tokio::test]
    async fn starts_idle_without_video() {
        let h = harness();
        assert_eq!(h.controller.mode().unwrap(), ModeKind::Idle);
        assert_eq!(h.controller.live_source_count().unwrap(), 0);
        assert_eq!(h.devices.live_video(), 0);
        assert_eq!(h.controller.streaming_state().unwrap(), StreamingState::Idle);
    }

    #[tokio::test]
    async fn live_handles_match_mode_after_every_transition() {
        let h = harness();
        let steps = [
            ModeKind::Camera,
            ModeKind::Screen,
            ModeKind::Screen,
            ModeKind::Camera,
            ModeKind::Idle,
            ModeKind::Screen,
            ModeKind::Idle,
        ];
        for step in steps {
            match step {
                ModeKind::Camera => h.controller.goto_camera().await.unwrap(),
                ModeKind::Screen => h.controller.goto_screen().await.unwrap(),
                ModeKind::Idle => h.controller.goto_idle().await.unwrap(),
            }
            let expected = match step {
                ModeKind::Camera => 1,
                ModeKind::Screen => 2,
                ModeKind::Idle => 0,
            };
            assert_eq!(h.devices.live_video(), expected, "after {step}");
            assert_eq!(h.controller.live_source_count().unwrap(), expected);
            assert_eq!(h.controller.mode().unwrap(), step);
        }
    }

    #[tokio::test]
    async fn toggling_twice_restores_without_reacquiring() {
        let h = harness();
        h.controller.goto_camera().await.unwrap();
        let layer = h.controller.camera_layer().unwrap().unwrap();
        let acquired = h.devices.acquisitions(SourceKind::Camera);

        assert!(!h.controller.toggle_camera().unwrap());
        assert!(!layer_enabled(&h, layer));
        assert_eq!(h.devices.live(SourceKind::Camera), 1);

        assert!(h.controller.toggle_camera().unwrap());
        assert!(layer_enabled(&h, layer));
        assert_eq!(h.devices.acquisitions(SourceKind::Camera), acquired);
    }

    #[tokio::test]
    async fn camera_visibility_carries_into_next_mode() {
        let h = harness();
        h.controller.goto_camera().await.unwrap();
        h.controller.toggle_camera().unwrap();

        h.controller.goto_screen().await.unwrap();
        let overlay = h.controller.camera_layer().unwrap().unwrap();
        assert!(!layer_enabled(&h, overlay));
        assert!(!h.controller.is_camera_visible().unwrap());
    }

    #[tokio::test]
    async fn failed_acquisition_keeps_previous_mode() {
        let h = harness();
        h.controller.goto_camera().await.unwrap();
        let layer = h.controller.camera_layer().unwrap();

        h.devices.fail(SourceKind::Screen, DeviceError::PermissionDenied(SourceKind::Screen));
        let err = h.controller.goto_screen().await.unwrap_err();
        assert!(matches!(err, StagecastError::Device(DeviceError::PermissionDenied(_))));
        assert_eq!(h.controller.mode().unwrap(), ModeKind::Camera);
        assert_eq!(h.controller.camera_layer().unwrap(), layer);
        assert_eq!(h.devices.live_video(), 1);
    }

    #[tokio::test]
    async fn camera_failure_in_screen_mode_releases_screen_capture() {
        let h = harness();
        h.devices.fail(SourceKind::Camera, DeviceError::Busy(SourceKind::Camera));
        assert!(h.controller.goto_screen().await.is_err());
        assert_eq!(h.devices.acquisitions(SourceKind::Screen), 1);
        assert_eq!(h.devices.live(SourceKind::Screen), 0);
        assert_eq!(h.controller.mode().unwrap(), ModeKind::Idle);
    }

    #[tokio::test]
    async fn concurrent_transition_is_rejected() {
        let h = harness();
        h.devices.pause();
        let first = {
            let controller = h.controller.clone();
            tokio::spawn(async move { controller.goto_camera().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let err = h.controller.goto_screen().await.unwrap_err();
        assert!(matches!(err, StagecastError::TransitionInProgress));

        h.devices.resume();
        first.await.unwrap().unwrap();
        assert_eq!(h.controller.mode().unwrap(), ModeKind::Camera);
        assert_eq!(h.devices.acquisitions(SourceKind::Screen), 0);

        // The guard is released after completion.
        h.controller.goto_screen().await.unwrap();
    }

    #[tokio::test]
    async fn video_device_change_swaps_camera_in_place() {
        let h = harness();
        h.controller.goto_screen().await.unwrap();
        let overlay = h.controller.camera_layer().unwrap().unwrap();
        let before = layer_bounds(&h, overlay);
        let old_track = h.devices.last_track(SourceKind::Camera).unwrap();

        h.controller.change_video_device("cam-1f9e2d7c").await.unwrap();

        assert_eq!(h.controller.mode().unwrap(), ModeKind::Screen);
        assert_eq!(h.controller.camera_layer().unwrap(), Some(overlay));
        assert_eq!(layer_bounds(&h, overlay), before);
        assert_eq!(old_track.stop_count(), 1);
        assert_eq!(h.devices.live_video(), 2);
        let requests = h.devices.requests();
        assert_eq!(requests.last().unwrap().device_id.as_deref(), Some("cam-1f9e2d7c"));
        assert_eq!(h.controller.selected_video_device().unwrap().as_deref(), Some("cam-1f9e2d7c"));
    }

    #[tokio::test]
    async fn video_device_change_while_idle_only_records_selection() {
        let h = harness();
        h.controller.change_video_device("cam-1f9e2d7c").await.unwrap();
        assert_eq!(h.devices.acquisitions(SourceKind::Camera), 0);

        h.controller.goto_camera().await.unwrap();
        let camera = h.devices.requests().into_iter().rfind(|r| r.kind == SourceKind::Camera);
        assert_eq!(camera.unwrap().device_id.as_deref(), Some("cam-1f9e2d7c"));
    }

    #[tokio::test]
    async fn swap_superseded_by_destroy_releases_new_handle() {
        let h = harness();
        h.controller.goto_camera().await.unwrap();
        h.devices.pause();
        let swap = {
            let controller = h.controller.clone();
            tokio::spawn(async move { controller.change_video_device("cam-1f9e2d7c").await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        h.controller.destroy().await.unwrap();
        h.devices.resume();
        assert!(matches!(swap.await.unwrap(), Err(StagecastError::Closed)));
        assert_eq!(h.devices.live_video(), 0);
    }

    #[tokio::test]
    async fn older_camera_swap_resolving_last_is_discarded() {
        let h = harness();
        h.controller.goto_camera().await.unwrap();
        let initial = h.devices.last_track(SourceKind::Camera).unwrap();
        h.devices.hold_device("cam-0");
        let older = {
            let controller = h.controller.clone();
            tokio::spawn(async move { controller.change_video_device("cam-0").await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        h.controller.change_video_device("cam-1f9e2d7c").await.unwrap();
        let shown = h.devices.last_track(SourceKind::Camera).unwrap();
        h.devices.release_device("cam-0");
        older.await.unwrap().unwrap();

        let late = h.devices.last_track(SourceKind::Camera).unwrap();
        assert!(late.id().starts_with("cam-0"));
        assert!(!late.is_live());
        assert!(!initial.is_live());
        assert!(shown.is_live());
        assert_eq!(h.devices.live_video(), 1);
        assert_eq!(
            h.controller.selected_video_device().unwrap().as_deref(),
            Some("cam-1f9e2d7c")
        );
    }

    #[tokio::test]
    async fn streaming_lifecycle() {
        let h = harness();
        let dest = StreamDestination::new("rtmp://live.example.org/live", "s-1");
        h.controller.start_streaming(dest.clone()).await.unwrap();
        assert_eq!(h.controller.streaming_state().unwrap(), StreamingState::Streaming);
        assert_eq!(
            h.streaming.destination().unwrap().rtmp_url(),
            "rtmp://live.example.org/live/s-1"
        );
        assert_eq!(h.surface.captures().len(), 1);
        assert_eq!(h.streaming.video_track().unwrap().dimensions(), Some((1280, 720)));

        let err = h.controller.start_streaming(dest).await.unwrap_err();
        assert!(matches!(err, StagecastError::Streaming(StreamingError::AlreadyActive)));

        h.controller.stop_streaming().await.unwrap();
        assert_eq!(h.controller.streaming_state().unwrap(), StreamingState::Idle);
        assert_eq!(h.devices.live(SourceKind::Audio), 0);

        h.controller.stop_streaming().await.unwrap();
        assert_eq!(h.streaming.stops(), 1);
    }

    #[tokio::test]
    async fn outbound_audio_is_muted_until_toggled() {
        let h = harness();
        h.controller.start_streaming(StreamDestination::generate("rtmp://host/app")).await.unwrap();
        let audio = h.streaming.audio_track().unwrap();
        assert!(!audio.is_enabled());

        assert!(h.controller.toggle_microphone().unwrap());
        assert!(audio.is_enabled());
    }

    #[tokio::test]
    async fn streaming_failure_is_surfaced_and_mode_untouched() {
        let h = harness();
        h.controller.goto_camera().await.unwrap();
        h.streaming.fail_next_start(StreamingError::Client("relay refused".into()));

        let err = h
            .controller
            .start_streaming(StreamDestination::generate("rtmp://host/app"))
            .await
            .unwrap_err();
        assert!(matches!(err, StagecastError::Streaming(StreamingError::Client(_))));
        assert_eq!(h.controller.streaming_state().unwrap(), StreamingState::Idle);
        assert_eq!(h.controller.mode().unwrap(), ModeKind::Camera);
        assert_eq!(h.devices.live(SourceKind::Audio), 0);
    }

    #[tokio::test]
    async fn audio_change_while_streaming_replaces_track_without_restart() {
        let h = harness();
        h.controller.start_streaming(StreamDestination::generate("rtmp://host/app")).await.unwrap();
        let old = h.streaming.audio_track().unwrap();

        h.controller.change_audio_device("mic-1").await.unwrap();

        let new = h.streaming.audio_track().unwrap();
        assert!(new.id().starts_with("mic-1"));
        assert!(!old.is_live());
        assert_eq!(h.streaming.starts(), 1);
        assert_eq!(h.streaming.stops(), 0);
        assert_eq!(h.streaming.audio_replacements().len(), 1);
        assert_eq!(h.controller.streaming_state().unwrap(), StreamingState::Streaming);
    }

    #[tokio::test]
    async fn audio_change_during_stream_start_reaches_outbound() {
        let h = harness();
        h.devices.hold_device("mic-0");
        let start = {
            let controller = h.controller.clone();
            tokio::spawn(async move {
                controller
                    .start_streaming(StreamDestination::generate("rtmp://host/app"))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        h.controller.change_audio_device("mic-1").await.unwrap();
        h.devices.release_device("mic-0");
        start.await.unwrap().unwrap();

        let outbound = h.streaming.audio_track().unwrap();
        assert!(outbound.id().starts_with("mic-1"));
        assert_eq!(h.streaming.audio_replacements().len(), 1);
        assert_eq!(h.streaming.starts(), 1);
        // Level meter plus outbound, both on the new microphone.
        assert_eq!(h.devices.live(SourceKind::Audio), 2);
        assert_eq!(h.controller.streaming_state().unwrap(), StreamingState::Streaming);
    }

    #[tokio::test]
    async fn audio_change_rebuilds_idle_meter() {
        let h = harness();
        h.controller.goto_idle().await.unwrap();
        assert_eq!(h.devices.analysers().len(), 1);

        h.controller.change_audio_device("mic-1").await.unwrap();
        let analysers = h.devices.analysers();
        assert_eq!(analysers.len(), 2);
        assert_eq!(analysers[0].disconnects(), 1);
        assert_eq!(analysers[1].disconnects(), 0);
        // Only the new probe is live.
        assert_eq!(h.devices.live(SourceKind::Audio), 1);
    }

    #[tokio::test]
    async fn idle_meter_publishes_levels() {
        let h = harness();
        h.devices.set_level(200);
        h.controller.goto_idle().await.unwrap();

        let mut tap = h.controller.level_tap().unwrap();
        let levels = tokio::time::timeout(Duration::from_secs(1), tap.changed())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(levels.len(), h.controller.settings().level_count);
        assert!(levels.iter().any(|&l| l > 0.0));
    }

    #[tokio::test]
    async fn missing_microphone_keeps_idle_without_meter() {
        let h = harness();
        h.devices.fail(SourceKind::Audio, DeviceError::NotFound(SourceKind::Audio));
        h.controller.goto_idle().await.unwrap();
        assert_eq!(h.controller.mode().unwrap(), ModeKind::Idle);
        assert!(h.devices.analysers().is_empty());
        assert!(h.controller.audio_levels().unwrap().is_empty());
    }

    #[tokio::test]
    async fn scenario_camera_screen_toggle_destroy() {
        let h = harness();
        h.devices.set_camera_size(1280, 720);

        h.controller.goto_camera().await.unwrap();
        let camera = h.controller.camera_layer().unwrap().unwrap();
        assert_eq!(layer_bounds(&h, camera), Rect::new(0.0, 0.0, 1280.0, 720.0));

        h.controller.goto_screen().await.unwrap();
        let overlay = h.controller.camera_layer().unwrap().unwrap();
        let bounds = layer_bounds(&h, overlay);
        assert_eq!(bounds.width(), 310.0);
        assert_eq!((bounds.x1, bounds.y1), (1260.0, 700.0));

        let screen = {
            let comp = h.controller.compositor();
            let comp = compositor::lock(&comp);
            let ids = comp.layer_ids();
            assert_eq!(ids.len(), 2);
            ids[0]
        };
        assert_eq!(layer_bounds(&h, screen), Rect::new(0.0, 0.0, 1280.0, 720.0));

        assert!(!h.controller.toggle_camera().unwrap());
        assert!(!layer_enabled(&h, overlay));
        assert!(layer_enabled(&h, screen));

        h.controller.destroy().await.unwrap();
        assert_eq!(h.devices.live_video(), 0);
        assert!(matches!(h.controller.goto_camera().await, Err(StagecastError::Closed)));
    }

    #[tokio::test]
    async fn every_call_fails_after_destroy() {
        let h = harness();
        h.controller.destroy().await.unwrap();
        let c = &h.controller;

        assert!(matches!(c.destroy().await, Err(StagecastError::Closed)));
        assert!(matches!(c.goto_camera().await, Err(StagecastError::Closed)));
        assert!(matches!(c.goto_screen().await, Err(StagecastError::Closed)));
        assert!(matches!(c.goto_idle().await, Err(StagecastError::Closed)));
        assert!(matches!(c.toggle_camera(), Err(StagecastError::Closed)));
        assert!(matches!(c.toggle_microphone(), Err(StagecastError::Closed)));
        assert!(matches!(c.change_video_device("cam-0").await, Err(StagecastError::Closed)));
        assert!(matches!(c.change_audio_device("mic-0").await, Err(StagecastError::Closed)));
        assert!(matches!(
            c.start_streaming(StreamDestination::generate("rtmp://h/a")).await,
            Err(StagecastError::Closed)
        ));
        assert!(matches!(c.stop_streaming().await, Err(StagecastError::Closed)));
        assert!(matches!(c.mode(), Err(StagecastError::Closed)));
        assert!(matches!(c.pointer_down(Point::ZERO), Err(StagecastError::Closed)));
        assert!(matches!(c.enumerate_devices().await, Err(StagecastError::Closed)));
        assert!(matches!(c.start_render_loop(), Err(StagecastError::Closed)));
    }

    #[tokio::test]
    async fn destroy_while_streaming_stops_client() {
        let h = harness();
        h.controller.goto_screen().await.unwrap();
        h.controller.start_streaming(StreamDestination::generate("rtmp://h/a")).await.unwrap();

        h.controller.destroy().await.unwrap();
        assert!(!h.streaming.is_active());
        assert_eq!(h.devices.live_video(), 0);
        assert_eq!(h.devices.live(SourceKind::Audio), 0);
    }

    #[tokio::test]
    async fn overlay_drag_and_wheel_through_controller() {
        let h = harness();
        h.controller.goto_screen().await.unwrap();
        let overlay = h.controller.camera_layer().unwrap().unwrap();
        let start = layer_bounds(&h, overlay);

        assert!(h.controller.pointer_down(Point::new(1200.0, 650.0)).unwrap());
        h.controller.pointer_move(Point::new(1000.0, 500.0)).unwrap();
        h.controller.pointer_up().unwrap();
        let moved = layer_bounds(&h, overlay);
        assert_eq!(moved.x1, start.x1 - 200.0);
        assert_eq!(moved.y1, start.y1 - 150.0);

        assert!(h.controller.wheel(moved.center(), 1.0).unwrap());
        assert!(layer_bounds(&h, overlay).width() > moved.width());
        assert!(!h.controller.wheel(Point::new(5.0, 5.0), 1.0).unwrap());
    }

    #[tokio::test]
    async fn camera_mode_layer_is_not_draggable() {
        let h = harness();
        h.controller.goto_camera().await.unwrap();
        assert!(!h.controller.pointer_down(Point::new(640.0, 360.0)).unwrap());
    }

    #[tokio::test]
    async fn events_reach_listeners_in_order() {
        use std::sync::Mutex as StdMutex;

        struct Capture(StdMutex<Vec<SessionEvent>>);
        impl SessionEventListener for Capture {
            fn on_event(&self, event: SessionEvent) {
                self.0.lock().unwrap().push(event);
            }
        }

        let h = harness();
        let capture = Arc::new(Capture(StdMutex::new(Vec::new())));
        h.controller.add_listener(capture.clone()).unwrap();

        h.controller.goto_camera().await.unwrap();
        h.controller.toggle_camera().unwrap();
        h.controller.change_video_device("cam-0").await.unwrap();
        h.controller.destroy().await.unwrap();

        let events = capture.0.lock().unwrap().clone();
        assert_eq!(
            events,
            vec![
                SessionEvent::ModeChanged(ModeKind::Camera),
                SessionEvent::CameraVisibilityChanged(false),
                SessionEvent::VideoDeviceChanged("cam-0".to_string()),
                SessionEvent::Destroyed,
            ]
        );
    }

    #[tokio::test]
    async fn open_probes_microphone_and_honors_camera_on_start() {
        let devices = SyntheticDevices::new();
        let settings = Settings {
            camera_on_start: true,
            ..Settings::default()
        };
        let controller = StreamSessionController::open(
            Arc::new(devices.clone()),
            Arc::new(FakeStreaming::new()),
            Box::new(RecordingSurface::new(640.0, 360.0)),
            settings,
        )
        .await
        .unwrap();
        assert_eq!(controller.mode().unwrap(), ModeKind::Camera);
        assert_eq!(devices.live(SourceKind::Audio), 1);
        controller.destroy().await.unwrap();
        assert_eq!(devices.live(SourceKind::Audio), 0);
    }

    #[tokio::test]
    async fn render_loop_paints_current_mode() {
        let h = harness();
        h.controller.goto_screen().await.unwrap();
        h.controller.start_render_loop().unwrap();
        h.controller.start_render_loop().unwrap();

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(h.surface.frames() >= 2);
        let screen_id = h.devices.last_track(SourceKind::Screen).unwrap().id().to_string();
        assert!(h.surface.ops().iter().any(|op| matches!(
            op,
            crate::testing::DrawOp::Paint { content, .. } if *content == screen_id
        )));

        h.controller.destroy().await.unwrap();
        let frames = h.surface.frames();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(h.surface.frames() <= frames + 1);
    }
}
