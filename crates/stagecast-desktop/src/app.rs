//! Command implementations.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use stagecast_core::errors::StagecastError;
use stagecast_core::media::DeviceMedia;
use stagecast_core::persistence::{ActiveStreams, JsonFileStore, StreamInfo};
use stagecast_core::settings::{RelayConfig, SettingsStore};
use stagecast_core::testing::SyntheticDevices;
use stagecast_core::{StreamDestination, StreamSessionController};
use stagecast_video::RasterSurface;

use crate::cli::{ConfigArgs, ModeArg, RunArgs};
use crate::listener::LoggingListener;
use crate::preview::PreviewStreaming;

const PREVIEW_INTERVAL: Duration = Duration::from_secs(1);

fn active_streams(data_dir: &Path) -> ActiveStreams {
    ActiveStreams::new(Arc::new(JsonFileStore::new(data_dir)))
}

pub async fn run(args: RunArgs, data_dir: &Path) -> Result<(), StagecastError> {
    let settings = SettingsStore::new(data_dir).get();
    let relay = settings.relay.clone();
    let controller = StreamSessionController::open(
        Arc::new(SyntheticDevices::new()),
        Arc::new(PreviewStreaming::new(data_dir.join("preview"), PREVIEW_INTERVAL)),
        Box::new(RasterSurface::new(args.width, args.height)),
        settings,
    )
    .await?;
    controller.add_listener(Arc::new(LoggingListener))?;
    controller.start_render_loop()?;

    let result = drive(&controller, &args, data_dir, relay).await;
    if let Err(e) = &result {
        tracing::error!("session failed: {e}");
    }
    controller.destroy().await?;
    result
}

async fn drive(
    controller: &StreamSessionController,
    args: &RunArgs,
    data_dir: &Path,
    relay: RelayConfig,
) -> Result<(), StagecastError> {
    match args.mode {
        ModeArg::Camera => controller.goto_camera().await?,
        ModeArg::Screen => controller.goto_screen().await?,
        ModeArg::Idle => controller.goto_idle().await?,
    }
    if args.hide_camera {
        controller.toggle_camera()?;
    }

    let streams = active_streams(data_dir);
    let streaming = match &args.stream {
        Some(server) => {
            let address = relay.address();
            let resumed = streams
                .continue_streaming(&args.account, |info| {
                    let address = address.clone();
                    async move { info.relay_address == address }
                })
                .await?;
            let destination = match resumed {
                Some(info) => StreamDestination::new(server.clone(), info.session_id),
                None => StreamDestination::generate(server.clone()),
            }
            .with_relay(relay);
            let session_id = destination.session_id.clone();
            controller.start_streaming(destination).await?;
            streams.save(&args.account, StreamInfo::new(session_id, address))?;
            true
        }
        None => false,
    };

    tokio::time::sleep(Duration::from_secs(args.seconds)).await;

    if streaming {
        controller.stop_streaming().await?;
        streams.delete(&args.account)?;
    }
    Ok(())
}

pub async fn devices() -> Result<(), StagecastError> {
    let devices = SyntheticDevices::new();
    for (index, device) in devices.enumerate().await?.iter().enumerate() {
        println!("{:<6} {:<16} {}", device.kind, device.id, device.display_name(index));
    }
    Ok(())
}

pub fn streams(data_dir: &Path) -> Result<(), StagecastError> {
    let all = active_streams(data_dir).read_all()?;
    let json = serde_json::to_string_pretty(&all)
        .map_err(stagecast_core::errors::PersistenceError::from)?;
    println!("{json}");
    Ok(())
}

pub fn config(args: ConfigArgs, data_dir: &Path) {
    let store = SettingsStore::new(data_dir);
    store.update(|s| {
        if let Some(v) = args.camera_on_start {
            s.camera_on_start = v;
        }
        if let Some(v) = args.microphone_on_start {
            s.microphone_on_start = v;
        }
        if let Some(v) = args.video_device {
            s.video_device = Some(v);
        }
        if let Some(v) = args.audio_device {
            s.audio_device = Some(v);
        }
        if let Some(v) = args.relay_host {
            s.relay.host = v;
        }
        if let Some(v) = args.relay_port {
            s.relay.port = v;
        }
    });
    tracing::info!(path = %store.path().display(), "settings saved");
}
