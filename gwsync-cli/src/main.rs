//! gwsync: publish Traefik routing into Consul.
//!
//! # Usage
//!
//! ```text
//! gwsync run          [config flags]
//! gwsync render       [config flags] [--input <rawdata.json>] [--json]
//! gwsync check-config [config flags] [--json]
//! gwsync purge        [config flags] --yes
//! ```
//!
//! Every config flag also reads an environment variable (`MODE`,
//! `CONSUL_ADDR`, `TRAEFIK_URL`, ...); see `gwsync run --help`.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    check_config::CheckConfigArgs, purge::PurgeArgs, render::RenderArgs, run::RunArgs,
};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "gwsync",
    version,
    about = "Sync Traefik routing into Consul KV or catalog tags",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the sync agent until SIGINT or SIGTERM.
    Run(RunArgs),

    /// Build the registry representation once and print it; writes nothing.
    Render(RenderArgs),

    /// Validate the configuration and print the resolved values.
    CheckConfig(CheckConfigArgs),

    /// Delete every key under the KV prefix, for all nodes sharing it.
    Purge(PurgeArgs),
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Run(args) => args.run(),
        Commands::Render(args) => args.run(),
        Commands::CheckConfig(args) => args.run(),
        Commands::Purge(args) => args.run(),
    }
}
