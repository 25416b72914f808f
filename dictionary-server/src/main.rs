use std::process::ExitCode;

use clap::Parser;
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;
use tracing::{error, info};

use dictionary_server::{cli::ServerArgs, config::ServerConfig, server::Server};

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

fn main() -> ExitCode {
    init_tracing();

    let args = match ServerArgs::try_parse() {
        Ok(args) => args,
        Err(err) if err.use_stderr() => {
            let _ = err.print();
            return ExitCode::FAILURE;
        }
        // --help and --version
        Err(err) => err.exit(),
    };

    // Registered before the listener exists so an early Ctrl-C still saves.
    let mut signals = match Signals::new([SIGINT, SIGTERM]) {
        Ok(signals) => signals,
        Err(err) => {
            error!("failed to install signal handlers: {err}");
            return ExitCode::FAILURE;
        }
    };

    let server = match Server::start(ServerConfig::from(args)) {
        Ok(server) => server,
        Err(err) => {
            error!("failed to start server: {err}");
            return ExitCode::FAILURE;
        }
    };
    info!("press Ctrl-C to quit and save the dictionary");

    if let Some(signal) = signals.forever().next() {
        info!(signal, "received shutdown signal");
    }

    // A failed save has already been logged; the process still exits cleanly.
    server.shutdown();
    ExitCode::SUCCESS
}
