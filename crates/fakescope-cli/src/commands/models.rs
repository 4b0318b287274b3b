//! Models command - manage model checkpoints.

use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use fakescope_adapters::models::{ensure_checkpoint_in, list_cached};
use fakescope_adapters::RemoteCheckpoint;
use indicatif::{ProgressBar, ProgressStyle};

use crate::config::AppConfig;

/// Arguments for the models command
#[derive(Args)]
pub struct ModelsArgs {
    #[command(subcommand)]
    pub command: ModelsCommand,
}

/// Models subcommands
#[derive(Subcommand)]
pub enum ModelsCommand {
    /// Download the configured checkpoint into the cache
    Fetch {
        /// Checkpoint URL (overrides model.url)
        #[arg(long)]
        url: Option<String>,
        /// Expected SHA-256 digest (overrides model.sha256)
        #[arg(long)]
        sha256: Option<String>,
    },
    /// List cached checkpoints
    List,
    /// Print checkpoint cache path
    Path,
}

/// Run the models command.
pub fn run(args: &ModelsArgs, config: &AppConfig) -> Result<()> {
    match args.command {
        ModelsCommand::Fetch {
            ref url,
            ref sha256,
        } => fetch_checkpoint(config, url.as_deref(), sha256.as_deref()),
        ModelsCommand::List => list_checkpoints(config),
        ModelsCommand::Path => print_path(config),
    }
}

fn fetch_checkpoint(config: &AppConfig, url: Option<&str>, sha256: Option<&str>) -> Result<()> {
    let remote = match url {
        Some(url) => RemoteCheckpoint {
            url: url.to_string(),
            sha256: sha256.map(str::to_string),
        },
        None => {
            let mut remote = config
                .remote_checkpoint()
                .context("No checkpoint URL configured. Set model.url or pass --url.")?;
            if let Some(sha256) = sha256 {
                remote.sha256 = Some(sha256.to_string());
            }
            remote
        }
    };

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .map_err(|e| anyhow::anyhow!("Invalid progress template: {e}"))?,
    );
    spinner.set_message(format!("Fetching {}", remote.filename()));
    spinner.enable_steady_tick(Duration::from_millis(100));

    let result = ensure_checkpoint_in(&config.cache_dir(), &remote);
    match result {
        Ok(path) => {
            spinner.finish_with_message(format!("Checkpoint ready: {}", path.display()));
            Ok(())
        }
        Err(e) => {
            spinner.abandon_with_message("Download failed");
            Err(e)
        }
    }
}

fn list_checkpoints(config: &AppConfig) -> Result<()> {
    let dir = config.cache_dir();
    let cached = list_cached(&dir)?;

    println!("Models directory: {}", dir.display());
    println!();

    for (name, size) in &cached {
        println!("  {name} ({})", human_size(*size));
    }

    if !cached.is_empty() {
        println!();
    }
    println!("{} checkpoint(s) cached", cached.len());

    Ok(())
}

#[allow(clippy::unnecessary_wraps)]
fn print_path(config: &AppConfig) -> Result<()> {
    println!("{}", config.cache_dir().display());
    Ok(())
}

/// Formats a byte count with a binary unit.
#[allow(clippy::cast_precision_loss)]
fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_human_size() {
        assert_eq!(human_size(512), "512 B");
        assert_eq!(human_size(2048), "2.0 KiB");
        assert_eq!(human_size(200 * 1024 * 1024), "200.0 MiB");
    }
}
