pub mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "harvest")]
#[command(about = "Run declarative fetch manifests", long_about = None)]
pub struct Cli {
    /// Config file to use instead of ~/.config/harvest/config.toml
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Number of parallel workers for concurrent modules
    #[arg(short, long, global = true)]
    pub workers: Option<usize>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Fetch every request a manifest describes
    Run {
        /// Path to the manifest file
        manifest: PathBuf,

        /// Store response bodies under this directory
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Abort on the first processing error
        #[arg(long)]
        strict: bool,

        /// Set a manifest variable (name=value), may be repeated
        #[arg(long = "var", value_parser = parse_var)]
        vars: Vec<(String, String)>,
    },
    /// Show the requests a manifest would send, without sending them
    Plan {
        /// Path to the manifest file
        manifest: PathBuf,

        /// Print the plan as JSON
        #[arg(long)]
        json: bool,

        /// Set a manifest variable (name=value), may be repeated
        #[arg(long = "var", value_parser = parse_var)]
        vars: Vec<(String, String)>,
    },
    /// Write the default config file if it does not exist
    InitConfig,
}

fn parse_var(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((name, value)) if !name.is_empty() => Ok((name.to_string(), value.to_string())),
        _ => Err(format!("expected name=value, got {raw:?}")),
    }
}
