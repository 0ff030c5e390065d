//! `gwsync check-config`: validate settings without contacting anything.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use gwsync_core::config::consul_duration;
use gwsync_core::{AgentConfig, Gateway, Mode};

use super::ConfigArgs;

#[derive(Args, Debug)]
pub struct CheckConfigArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Serialize, Tabled)]
struct Setting {
    #[tabled(rename = "setting")]
    name: &'static str,
    #[tabled(rename = "value")]
    value: String,
}

impl CheckConfigArgs {
    pub fn run(self) -> Result<()> {
        let json = self.json;
        let config = self.config.resolve()?;
        let settings = settings(&config);

        if json {
            println!(
                "{}",
                serde_json::to_string_pretty(&settings).context("failed to serialize settings")?
            );
            return Ok(());
        }

        let mut table = Table::new(settings);
        table.with(Style::rounded());
        println!("{table}");
        println!("{} configuration is valid", "✓".green());
        Ok(())
    }
}

fn settings(config: &AgentConfig) -> Vec<Setting> {
    let hc = &config.health_check;
    let mut rows = vec![
        ("mode", config.mode.to_string()),
        ("node", config.node_name.clone()),
        ("consul", config.consul_addr.to_string()),
        ("rawdata", config.rawdata_url().to_string()),
        (
            "traefik host header",
            config.traefik_host.clone().unwrap_or_else(|| "-".into()),
        ),
    ];
    for gateway in Gateway::all() {
        let (host, port) = config.gateway_endpoint(gateway);
        rows.push((
            match gateway {
                Gateway::Http => "http gateway",
                Gateway::Https => "https gateway",
            },
            format!("{} ({host}:{port})", gateway.service_name(&config.node_name)),
        ));
    }
    rows.extend([
        ("resync", format!("{}s", config.resync.as_secs())),
        ("health check interval", consul_duration(hc.interval)),
        ("health check timeout", consul_duration(hc.timeout)),
        ("deregister after", consul_duration(hc.deregister_after)),
        (
            "entrypoints",
            format!("{}, {}", config.entrypoints.web, config.entrypoints.websecure),
        ),
        ("namespace routers", config.namespace_routers.to_string()),
    ]);
    if config.mode == Mode::Kv {
        rows.extend([
            ("kv prefix", config.kv_prefix.clone()),
            ("session ttl", consul_duration(config.session_ttl())),
            (
                "destroy session on shutdown",
                config.destroy_session_on_shutdown.to_string(),
            ),
        ]);
    }
    let debug_log = if config.log.debug {
        config.log.debug_log.display().to_string()
    } else {
        "off".into()
    };
    rows.push(("debug log", debug_log));

    rows.into_iter()
        .map(|(name, value)| Setting { name, value })
        .collect()
}
