//! `gwsync purge`: remove everything under the KV prefix.
//!
//! The prefix is shared: this wipes the keys of every node publishing under
//! it, not just the local one. Any agent still running rewrites its own keys
//! on its next cycle.

use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;

use gwsync_daemon::ConsulRegistry;
use gwsync_sync::Registry;

use super::{block_on, ConfigArgs};

#[derive(Args, Debug)]
pub struct PurgeArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Confirm the recursive delete of the whole prefix, for every node.
    #[arg(long)]
    pub yes: bool,
}

impl PurgeArgs {
    pub fn run(self) -> Result<()> {
        let yes = self.yes;
        let config = self.config.resolve()?;
        let prefix = format!("{}/", config.kv_prefix);
        if !yes {
            bail!(
                "refusing to delete `{prefix}` (keys of every node) from {} without --yes",
                config.consul_addr
            );
        }

        let registry = ConsulRegistry::from_config(&config)?;
        block_on(registry.kv_delete_tree(&prefix))?
            .with_context(|| format!("failed to delete `{prefix}`"))?;

        println!("{} deleted `{prefix}` from {}", "✓".green(), config.consul_addr);
        Ok(())
    }
}
