//! `gwsync run`: the long-running agent.

use anyhow::{Context, Result};
use clap::Args;

use super::ConfigArgs;

#[derive(Args, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub config: ConfigArgs,
}

impl RunArgs {
    pub fn run(self) -> Result<()> {
        let config = self.config.resolve()?;
        gwsync_daemon::start_blocking(config).context("agent stopped with an error")
    }
}
