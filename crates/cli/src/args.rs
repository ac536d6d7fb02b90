use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "shelver")]
#[command(about = "Sort a folder of files into a templated library", long_about = None)]
pub struct Cli {
    /// Path to config TOML
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Classify and place every file under the source root
    Run(RunArgs),
    /// Show the recorded state of a run
    Status(StatusArgs),
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Directory to sort
    #[arg(long)]
    pub source: PathBuf,
    /// Library root files are placed under
    #[arg(long)]
    pub output: PathBuf,
    /// Decide everything, move nothing
    #[arg(long, default_value_t = false)]
    pub dry_run: bool,
    /// Continue the latest unfinished run for this source
    #[arg(long, default_value_t = false)]
    pub resume: bool,
    /// Continue a specific run
    #[arg(long)]
    pub run_id: Option<String>,
    /// Move an unreadable state database aside and start over
    #[arg(long, default_value_t = false)]
    pub discard_corrupt_state: bool,
    /// Output JSON summary
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct StatusArgs {
    /// Library root the run wrote to
    #[arg(long)]
    pub output: PathBuf,
    /// Run to show; defaults to the most recent one
    #[arg(long)]
    pub run_id: Option<String>,
    /// Output JSON
    #[arg(long)]
    pub json: bool,
}
