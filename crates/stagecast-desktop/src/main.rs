mod app;
mod cli;
mod listener;
mod preview;

use std::path::PathBuf;
use std::process::ExitCode;

use tracing_subscriber::EnvFilter;

use crate::cli::Command;

const DEFAULT_FILTER: &str = "stagecast_core=info,stagecast_video=info,stagecast_desktop=info";

fn init_logging(level: Option<&str>) {
    let filter = match level {
        Some(directives) => EnvFilter::new(directives),
        None => {
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
        }
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .init();
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("stagecast")
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = cli::parse();
    init_logging(args.log_level.as_deref());

    let data_dir = args.data_dir.unwrap_or_else(default_data_dir);
    tracing::debug!(data_dir = %data_dir.display(), "starting");

    let result = match args.command {
        Command::Run(run) => app::run(run, &data_dir).await,
        Command::Devices => app::devices().await,
        Command::Streams => app::streams(&data_dir),
        Command::Config(config) => {
            app::config(config, &data_dir);
            Ok(())
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("stagecast: {e}");
            ExitCode::FAILURE
        }
    }
}
