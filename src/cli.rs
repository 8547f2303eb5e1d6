// ABOUTME: Command-line interface definition using clap derive macros.
// ABOUTME: Defines all subcommands and their arguments.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "stolos")]
#[command(about = "Locked, health-verified fleet rollouts")]
#[command(version)]
pub struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Validate a release descriptor and print the derived rollout plan
    Check {
        /// Path to the release descriptor (YAML or JSON)
        #[arg(short, long)]
        release: PathBuf,
    },
}
