//! CLI command definitions and handlers.

pub mod engine;
pub mod models;
pub mod predict;
pub mod serve;

use clap::{Parser, Subcommand};

/// Fakescope - Image forgery detection with saliency heatmaps
#[derive(Parser)]
#[command(name = "fakescope")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand)]
pub enum Commands {
    /// Classify images and write saliency heatmaps
    Predict(predict::PredictArgs),
    /// Serve predictions over HTTP
    Serve(serve::ServeArgs),
    /// Manage model checkpoints
    Models(models::ModelsArgs),
}

/// Process exit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    /// Every input was predicted.
    Success,
    /// Configuration, model or I/O failure.
    Error,
    /// At least one input could not be fetched or decoded.
    InputRejected,
}

impl ExitCode {
    /// Numeric status reported to the shell.
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::Success => 0,
            Self::Error => 1,
            Self::InputRejected => 3,
        }
    }
}

impl From<ExitCode> for std::process::ExitCode {
    fn from(code: ExitCode) -> Self {
        Self::from(code.code())
    }
}
