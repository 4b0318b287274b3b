//! Fakescope CLI - Image forgery detection with saliency heatmaps.

use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod commands;
mod config;
mod detect;
mod output;

use commands::{Cli, Commands, ExitCode};
use config::AppConfig;

fn main() -> std::process::ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = AppConfig::load();

    let exit_code = match cli.command {
        Commands::Predict(args) => {
            let args = args.with_config(&config);
            commands::predict::run(&args, &config).map_or_else(report, |summary| summary.exit_code)
        }
        Commands::Serve(ref args) => {
            commands::serve::run(args, &config).map_or_else(report, |()| ExitCode::Success)
        }
        Commands::Models(ref args) => {
            commands::models::run(args, &config).map_or_else(report, |()| ExitCode::Success)
        }
    };

    exit_code.into()
}

/// Logs to stderr. `RUST_LOG` wins over the `-v` count.
fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

#[allow(clippy::needless_pass_by_value)]
fn report(e: anyhow::Error) -> ExitCode {
    eprintln!("error: {e:#}");
    ExitCode::Error
}
