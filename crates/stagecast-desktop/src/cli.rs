use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};

/// Stagecast: composite camera and screen into one live stream.
#[derive(Parser, Debug)]
#[command(name = "stagecast", version, about)]
pub struct Args {
    /// Directory holding settings, saved streams and previews.
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Log filter override (e.g. debug, stagecast_core=trace).
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a session against synthetic devices.
    Run(RunArgs),
    /// List capture devices.
    Devices,
    /// Print saved active streams as JSON.
    Streams,
    /// Change persisted settings.
    Config(ConfigArgs),
}

#[derive(ClapArgs, Debug)]
pub struct RunArgs {
    /// Presentation mode to enter after start-up.
    #[arg(long, value_enum, default_value_t = ModeArg::Camera)]
    pub mode: ModeArg,

    #[arg(long, default_value_t = 1280)]
    pub width: u32,

    #[arg(long, default_value_t = 720)]
    pub height: u32,

    /// How long to keep the session running.
    #[arg(long, default_value_t = 3)]
    pub seconds: u64,

    /// RTMP ingest base to stream to; previews are written locally.
    #[arg(long)]
    pub stream: Option<String>,

    /// Account the saved stream record is kept under.
    #[arg(long, default_value = "local")]
    pub account: String,

    /// Hide the camera once the mode is up.
    #[arg(long)]
    pub hide_camera: bool,
}

#[derive(ClapArgs, Debug)]
pub struct ConfigArgs {
    #[arg(long)]
    pub camera_on_start: Option<bool>,

    #[arg(long)]
    pub microphone_on_start: Option<bool>,

    #[arg(long)]
    pub video_device: Option<String>,

    #[arg(long)]
    pub audio_device: Option<String>,

    #[arg(long)]
    pub relay_host: Option<String>,

    #[arg(long)]
    pub relay_port: Option<u16>,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModeArg {
    Camera,
    Screen,
    Idle,
}

pub fn parse() -> Args {
    Args::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_defaults() {
        let args = Args::try_parse_from(["stagecast", "run"]).unwrap();
        let Command::Run(run) = args.command else {
            panic!("expected run");
        };
        assert_eq!(run.mode, ModeArg::Camera);
        assert_eq!((run.width, run.height), (1280, 720));
        assert!(run.stream.is_none());
        assert_eq!(run.account, "local");
    }

    #[test]
    fn global_flags_after_subcommand() {
        let args = Args::try_parse_from([
            "stagecast",
            "run",
            "--mode",
            "screen",
            "--data-dir",
            "/tmp/sc",
            "--stream",
            "rtmp://live.example.org/live",
        ])
        .unwrap();
        assert_eq!(args.data_dir, Some(PathBuf::from("/tmp/sc")));
        let Command::Run(run) = args.command else {
            panic!("expected run");
        };
        assert_eq!(run.mode, ModeArg::Screen);
        assert_eq!(run.stream.as_deref(), Some("rtmp://live.example.org/live"));
    }

    #[test]
    fn config_accepts_booleans() {
        let args =
            Args::try_parse_from(["stagecast", "config", "--camera-on-start", "true"]).unwrap();
        let Command::Config(config) = args.command else {
            panic!("expected config");
        };
        assert_eq!(config.camera_on_start, Some(true));
        assert!(config.relay_port.is_none());
    }
}
