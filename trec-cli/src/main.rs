use std::process::ExitCode;

use clap::Parser;
use mimalloc::MiMalloc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

mod config;
mod error;
mod job;
mod logging;
mod panic_hook;
mod recorder;

use config::{AppConfig, CliArgs};
use error::AppError;
use recorder::{Recorder, RunOutcome};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            // the subscriber may not be installed yet
            eprintln!("Error: {e}");
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), AppError> {
    let args = CliArgs::parse();
    let config = AppConfig::load(&args)?;
    let _log_guards = logging::init_logging(&config)?;
    debug!(?config, "Effective configuration");

    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        debug!("A rustls crypto provider was already installed");
    }

    let client = platforms_parser::default_client()?;
    let log_dir = logging::log_dir(&config);
    let timezone = config.timezone()?;
    let recorder = Recorder::with_http(config, client, CancellationToken::new());
    panic_hook::install(log_dir, timezone, recorder.recording_flag());

    match recorder.run(wait_for_stop_signal()).await {
        RunOutcome::Interrupted => info!("Exiting"),
        RunOutcome::VodComplete => debug!("VOD recording finished"),
    }
    Ok(())
}

async fn ctrl_c() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl-C"),
        Err(e) => {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

/// Resolves on Ctrl-C, or SIGHUP on unix.
#[cfg(unix)]
async fn wait_for_stop_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let hangup = async {
        match signal(SignalKind::hangup()) {
            Ok(mut hangup) => {
                hangup.recv().await;
                info!("Received SIGHUP");
            }
            Err(e) => {
                error!("Failed to listen for SIGHUP: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c() => {}
        _ = hangup => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_stop_signal() {
    ctrl_c().await;
}
