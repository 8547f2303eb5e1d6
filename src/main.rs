// ABOUTME: Entry point for the stolos CLI application.
// ABOUTME: Parses arguments and dispatches to appropriate command handlers.

mod cli;

use clap::Parser;
use cli::{Cli, Commands};
use std::path::Path;
use stolos::error::{Error, Result};
use stolos::release::Release;
use tracing_subscriber::EnvFilter;

fn main() {
    let cli = Cli::parse();

    // Initialize tracing subscriber based on verbose flag
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("warn")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    if let Err(e) = run(cli) {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Check { release } => check(&release),
    }
}

/// Decode a descriptor file under the same strict rules the Validate step
/// applies, and print what a deployment of it would touch.
fn check(path: &Path) -> Result<()> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(Error::DescriptorNotFound(path.to_path_buf()));
        }
        Err(e) => return Err(e.into()),
    };

    // YAML is a superset of JSON, so one parser covers both descriptor
    // flavors; the strict decode then matches the deployment path exactly.
    let value: serde_json::Value = serde_yaml::from_str(&raw)?;
    let mut release: Release =
        serde_json::from_value(value).map_err(|e| Error::InvalidDescriptor(e.to_string()))?;

    release.set_defaults();
    release
        .validate()
        .map_err(|e| Error::InvalidDescriptor(e.to_string()))?;

    println!("Release: {}", release.release_ref());
    println!("Artifact: {}", release.artifact);
    println!(
        "Timeout: {}s",
        release.timeout.unwrap_or_default()
    );
    println!("Lock path: {}", release.lock_path());
    println!("User-data path: {}", release.user_data_path());

    for (service, spec) in &release.services {
        println!(
            "  → {} (group {}, desired {})",
            service,
            release.group_id(service),
            spec.desired_capacity
        );
        for lb in &spec.load_balancers {
            println!("      load balancer: {lb}");
        }
        for tg in &spec.target_groups {
            println!("      target group: {tg}");
        }
    }

    println!("Descriptor OK");
    Ok(())
}
