//! Main entry point for the ad-collector CLI

use ad_collector::cli::error::EXIT_OK;
use ad_collector::cli::{Cli, CliError, Commands};
use ad_collector::shutdown::{self, ShutdownCoordinator};
use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber with optional JSON formatting
fn init_tracing() {
    let json_format = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("ad_collector=info"));

    if json_format {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();

    // SIGINT and SIGTERM both stop the run at the last committed page
    let shutdown = ShutdownCoordinator::shared();
    shutdown::set_global_shutdown(shutdown.clone());
    shutdown::spawn_signal_listener(shutdown.clone());

    let result: Result<(), CliError> = match &cli.command {
        Commands::Collect(args) => args
            .execute(cli.output_format, shutdown.clone())
            .await
            .map(|_| ()),
        Commands::Status(args) => args.execute(cli.output_format),
    };

    let code = match result {
        Ok(()) => EXIT_OK,
        Err(e) => {
            let code = e.exit_code();
            let report = anyhow::Error::new(e);
            error!("Command failed: {:#}", report);
            eprintln!("Error: {report:#}");
            code
        }
    };
    std::process::exit(code);
}
