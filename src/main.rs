//! input-sync Agent
//!
//! Records mouse, keyboard and gamepad input while OBS records video and
//! writes one time-ordered log per recording, stamped against the moment
//! the recording started.

mod capture;
mod config;
mod data;
mod error;
mod input;
mod logging;
mod recorder;
mod sink;
mod sync;

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use config::Config;
use data::InputLog;
use input::hotkey::{parse_hotkey, spawn_hotkey_watcher};
use input::{create_gamepad_provider, InputHook, RdevHook};
use recorder::ObsClient;
use sync::{create_engine_channels, EngineCommand, SyncController};

/// Frame rate assumed by `--inspect` when none is given
const DEFAULT_INSPECT_FPS: f64 = 30.0;

/// What the command line asked for
enum Command {
    Run { config_path: Option<PathBuf> },
    Inspect { path: PathBuf, fps: f64 },
    Help,
}

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();

    match parse_args(&args)? {
        Command::Help => {
            print_help();
            Ok(())
        }
        Command::Inspect { path, fps } => inspect(&path, fps),
        Command::Run { config_path } => run_agent(config_path),
    }
}

fn parse_args(args: &[String]) -> Result<Command> {
    let mut config_path = None;
    let mut inspect_path = None;
    let mut fps = DEFAULT_INSPECT_FPS;

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-h" | "--help" => return Ok(Command::Help),
            "-c" | "--config" => {
                let value = iter.next().context("--config needs a path")?;
                config_path = Some(PathBuf::from(value));
            }
            "--inspect" => {
                let value = iter.next().context("--inspect needs a log file")?;
                inspect_path = Some(PathBuf::from(value));
            }
            "--fps" => {
                let value = iter.next().context("--fps needs a number")?;
                fps = value
                    .parse()
                    .with_context(|| format!("Invalid --fps value: {}", value))?;
                if fps.is_nan() || fps <= 0.0 {
                    bail!("--fps must be positive");
                }
            }
            other => bail!("Unknown argument: {} (see --help)", other),
        }
    }

    Ok(match inspect_path {
        Some(path) => Command::Inspect { path, fps },
        None => Command::Run { config_path },
    })
}

fn inspect(path: &Path, fps: f64) -> Result<()> {
    let log = InputLog::read(path)?;
    println!("{}", log.report(fps));
    Ok(())
}

fn run_agent(config_path: Option<PathBuf>) -> Result<()> {
    // Held until exit so buffered log lines reach the file
    let _log_guard = logging::init_logging()?;

    info!("input-sync Agent {} starting...", env!("CARGO_PKG_VERSION"));

    let config = match &config_path {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    info!("Configuration loaded from {:?}", config.config_path()?);

    let runtime = tokio::runtime::Runtime::new()?;

    let rdev_hook = Arc::new(RdevHook::new());
    if config.input.capture_keyboard || config.input.capture_mouse {
        if let Err(e) = rdev_hook.start() {
            error!("Failed to start keyboard/mouse hook: {:#}", e);
        }
    }
    let hook: Arc<dyn InputHook> = rdev_hook;
    let gamepads = create_gamepad_provider();

    let (cmd_tx, cmd_rx, status_tx, _status_rx) = create_engine_channels();
    let (recorder_tx, recorder_rx) = mpsc::channel(32);

    // Ctrl+C stops the active session cleanly before exit
    let ctrl_c_tx = cmd_tx.clone();
    let ctrl_c_runtime = runtime.handle().clone();
    ctrlc::set_handler(move || {
        info!("Ctrl+C received, shutting down...");
        let tx = ctrl_c_tx.clone();
        ctrl_c_runtime.spawn(async move {
            let _ = tx.send(EngineCommand::Shutdown).await;
        });
    })?;

    runtime.block_on(async move {
        if let Some(name) = config.input.stop_hotkey.as_deref().filter(|n| !n.is_empty()) {
            match parse_hotkey(name) {
                Some(key) => {
                    spawn_hotkey_watcher(hook.as_ref(), key, cmd_tx.clone());
                }
                None => warn!("Unknown stop hotkey {:?}; manual stop disabled", name),
            }
        }

        let cancel = CancellationToken::new();
        let obs_client = ObsClient::new(config.recorder.clone());
        let obs_handle = tokio::spawn(obs_client.run(recorder_tx, cancel.clone()));

        let mut controller = SyncController::new(config, hook, gamepads, status_tx);
        if let Err(e) = controller.run(recorder_rx, cmd_rx).await {
            error!("Sync controller error: {:#}", e);
        }

        cancel.cancel();
        let _ = obs_handle.await;
    });

    info!("Shutdown complete");
    Ok(())
}

fn print_help() {
    println!("input-sync Agent - input capture synchronized with OBS recordings");
    println!();
    println!("USAGE:");
    println!("    input-sync-agent [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("    -h, --help             Print this help message");
    println!("    -c, --config <FILE>    Use this config file instead of the default");
    println!("        --inspect <FILE>   Validate a session log and print a summary");
    println!("        --fps <N>          Frame rate for --inspect (default 30)");
    println!();
    println!("ENVIRONMENT:");
    println!("    RUST_LOG               Set log level (e.g., debug, info, warn)");
    println!("    INPUT_SYNC_LOG_PATH    Override the agent log directory");
}
