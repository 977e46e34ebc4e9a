use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::surface::Color;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct RelayConfig {
    #[serde(default = "default_relay_host")]
    pub host: String,
    #[serde(default = "default_relay_port")]
    pub port: u16,
}

impl RelayConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: default_relay_host(),
            port: default_relay_port(),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Settings {
    /// Distance kept between movable layers and the surface edges.
    #[serde(default = "default_padding")]
    pub padding: f64,
    #[serde(default = "default_rate")]
    pub frame_rate: u32,
    /// Rate of the frame feed handed to the streaming client.
    #[serde(default = "default_rate")]
    pub capture_rate: u32,
    #[serde(default)]
    pub camera_on_start: bool,
    #[serde(default)]
    pub microphone_on_start: bool,
    #[serde(default = "default_overlay_width_fraction")]
    pub overlay_width_fraction: f64,
    #[serde(default = "default_wheel_step")]
    pub wheel_step: f64,
    #[serde(default = "default_drag_alpha")]
    pub drag_alpha: f64,
    #[serde(default = "default_sampler_interval_ms")]
    pub sampler_interval_ms: u64,
    #[serde(default = "default_level_count")]
    pub level_count: usize,
    #[serde(default = "default_background")]
    pub background: String,
    #[serde(default)]
    pub avatar_uri: Option<String>,
    #[serde(default = "default_avatar_size")]
    pub avatar_size: f64,
    #[serde(default)]
    pub video_device: Option<String>,
    #[serde(default)]
    pub audio_device: Option<String>,
    #[serde(default)]
    pub relay: RelayConfig,
}

fn default_padding() -> f64 {
    20.0
}

fn default_rate() -> u32 {
    30
}

fn default_overlay_width_fraction() -> f64 {
    0.25
}

fn default_wheel_step() -> f64 {
    0.01
}

fn default_drag_alpha() -> f64 {
    0.9
}

fn default_sampler_interval_ms() -> u64 {
    10
}

fn default_level_count() -> usize {
    14
}

fn default_background() -> String {
    "#000000".to_string()
}

fn default_avatar_size() -> f64 {
    160.0
}

fn default_relay_host() -> String {
    "localhost".to_string()
}

fn default_relay_port() -> u16 {
    1234
}

impl Settings {
    /// Parsed background color; falls back to black on a malformed value.
    pub fn background_color(&self) -> Color {
        Color::from_hex(&self.background).unwrap_or(Color::BLACK)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            padding: default_padding(),
            frame_rate: default_rate(),
            capture_rate: default_rate(),
            camera_on_start: false,
            microphone_on_start: false,
            overlay_width_fraction: default_overlay_width_fraction(),
            wheel_step: default_wheel_step(),
            drag_alpha: default_drag_alpha(),
            sampler_interval_ms: default_sampler_interval_ms(),
            level_count: default_level_count(),
            background: default_background(),
            avatar_uri: None,
            avatar_size: default_avatar_size(),
            video_device: None,
            audio_device: None,
            relay: RelayConfig::default(),
        }
    }
}

pub struct SettingsStore {
    settings: Mutex<Settings>,
    file_path: PathBuf,
}

impl SettingsStore {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        let file_path = data_dir.as_ref().join("settings.json");
        let settings = Self::load(&file_path);
        Self {
            settings: Mutex::new(settings),
            file_path,
        }
    }

    pub fn path(&self) -> &Path {
        &self.file_path
    }

    pub fn get(&self) -> Settings {
        self.lock().clone()
    }

    pub fn set_camera_on_start(&self, enabled: bool) {
        self.update(|s| s.camera_on_start = enabled);
    }

    pub fn set_microphone_on_start(&self, enabled: bool) {
        self.update(|s| s.microphone_on_start = enabled);
    }

    pub fn set_video_device(&self, id: Option<String>) {
        self.update(|s| s.video_device = id);
    }

    pub fn set_audio_device(&self, id: Option<String>) {
        self.update(|s| s.audio_device = id);
    }

    pub fn set_relay(&self, relay: RelayConfig) {
        self.update(|s| s.relay = relay);
    }

    /// Apply `f` and persist the result.
    pub fn update(&self, f: impl FnOnce(&mut Settings)) {
        f(&mut self.lock());
        self.save();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Settings> {
        self.settings.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn save(&self) {
        let settings = self.get();
        if let Some(parent) = self.file_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        match serde_json::to_string_pretty(&settings) {
            Ok(json) => {
                if let Err(e) = std::fs::write(&self.file_path, json) {
                    tracing::warn!(
                        path = %self.file_path.display(),
                        "failed to save settings: {e}"
                    );
                }
            }
            Err(e) => tracing::warn!("failed to serialize settings: {e}"),
        }
    }

    fn load(path: &Path) -> Settings {
        match std::fs::read_to_string(path) {
            Ok(contents) => serde_json::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!(
                    path = %path.display(),
                    "corrupt settings file, using defaults: {e}"
                );
                Settings::default()
            }),
            Err(_) => Settings::default(),
        }
    }
}
