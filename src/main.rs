//! Lepton thermal camera streamer

use std::process::ExitCode;
use std::sync::Arc;

use clap::error::ErrorKind;
use tracing::{info, warn};

use lepton_stream::args::Args;
use lepton_stream::capture::{DevHost, Host, SimHost};
use lepton_stream::display::{PortServer, RecentFrames};
use lepton_stream::telemetry::{self, ProfileGuard};
use lepton_stream::watch::FileWatcher;
use lepton_stream::{interrupt, Error, Lifecycle, Result, Shutdown};

#[tokio::main]
async fn main() -> ExitCode {
    let args = match Args::try_parse_args(std::env::args_os()) {
        Ok(args) => args,
        Err(Error::Usage(e))
            if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) =>
        {
            e.exit()
        }
        Err(e) => return report(e),
    };

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => report(e),
    }
}

/// The only place fatal errors reach the user.
fn report(err: Error) -> ExitCode {
    eprintln!("\nlepton: {err}.");
    ExitCode::from(1)
}

async fn run(args: Args) -> Result<()> {
    let config = args.load_config()?;

    // Flushed when `run` returns, after every thread that logs into it.
    let profile = args
        .cpuprofile
        .as_deref()
        .map(ProfileGuard::create)
        .transpose()?;
    telemetry::init(args.verbose, profile.as_ref())?;
    if let Err(e) = color_eyre::install() {
        warn!("Panic reports unavailable: {e}");
    }

    info!("Lepton Launching...");

    let shutdown = Shutdown::new();
    interrupt::install(shutdown.clone())?;

    let host: Box<dyn Host> = if args.fake {
        info!("Using simulated camera");
        Box::new(SimHost::new(config.sim.clone()))
    } else {
        Box::new(DevHost::new())
    };
    let store = Arc::new(RecentFrames::new(config.viewer.history));
    let server = PortServer::new(store);
    let watcher = FileWatcher::new(args.watch_path()?)?;

    let lifecycle = Lifecycle::new(config, shutdown);
    let summary = tokio::task::spawn_blocking(move || {
        lifecycle.run(host.as_ref(), &server, Box::new(watcher))
    })
    .await
    .map_err(|_| Error::Panicked)??;

    info!(reason = %summary.reason, "Lepton shutting down");
    Ok(())
}
