//! Subcommands and the configuration flags they share.

pub mod check_config;
pub mod purge;
pub mod render;
pub mod run;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::builder::BoolishValueParser;
use clap::{ArgAction, Args};

use gwsync_core::{AgentConfig, ConfigInput};

/// Agent configuration: one flag per setting, each backed by an
/// environment variable.
#[derive(Args, Debug, Clone)]
pub struct ConfigArgs {
    /// Publishing mode: `kv` or `tags`.
    #[arg(long, env = "MODE", default_value = "kv")]
    pub mode: String,

    /// Consul HTTP address.
    #[arg(long, env = "CONSUL_ADDR", default_value = "http://consul:8500")]
    pub consul_addr: String,

    /// Node name; defaults to the host name.
    #[arg(long, env = "NODE_NAME")]
    pub node_name: Option<String>,

    /// Traefik API base URL (or the full `/api/rawdata` URL).
    #[arg(long, env = "TRAEFIK_URL")]
    pub traefik_url: Option<String>,

    /// Host header sent to the Traefik API.
    #[arg(long, env = "TRAEFIK_HOST")]
    pub traefik_host: Option<String>,

    /// URL of the node's HTTP gateway.
    #[arg(long, env = "SERVICE_HTTP")]
    pub service_http: Option<String>,

    /// URL of the node's HTTPS gateway.
    #[arg(long, env = "SERVICE_HTTPS")]
    pub service_https: Option<String>,

    #[arg(long, env = "KV_PREFIX", default_value = "traefik")]
    pub kv_prefix: String,

    /// Seconds between resync cycles.
    #[arg(long, env = "RESYNC_SECONDS", default_value_t = 30)]
    pub resync_seconds: u64,

    #[arg(long, env = "HC_INTERVAL", default_value = "10s")]
    pub hc_interval: String,

    #[arg(long, env = "HC_TIMEOUT", default_value = "5s")]
    pub hc_timeout: String,

    /// Deregister window; also the session TTL in kv mode.
    #[arg(long, env = "HC_DEREGISTER_AFTER", default_value = "30s")]
    pub hc_deregister_after: String,

    #[arg(long, env = "WEB_ENTRYPOINT", default_value = "web")]
    pub web_entrypoint: String,

    #[arg(long, env = "WEBSECURE_ENTRYPOINT", default_value = "websecure")]
    pub websecure_entrypoint: String,

    /// Prefix router and middleware names with the node name.
    #[arg(
        long,
        env = "NAMESPACE_ROUTERS",
        action = ArgAction::Set,
        num_args = 0..=1,
        default_value_t = false,
        default_missing_value = "true",
        value_parser = BoolishValueParser::new(),
    )]
    pub namespace_routers: bool,

    /// Destroy the session on shutdown instead of waiting for its TTL.
    #[arg(
        long,
        env = "DESTROY_SESSION_ON_SHUTDOWN",
        action = ArgAction::Set,
        num_args = 0..=1,
        default_value_t = true,
        default_missing_value = "true",
        value_parser = BoolishValueParser::new(),
    )]
    pub destroy_session_on_shutdown: bool,

    /// Console log format: `text` or `json`.
    #[arg(long, env = "LOG_FORMAT", default_value = "text")]
    pub log_format: String,

    /// Also write this program's debug records to `--debug-log`.
    #[arg(
        long,
        env = "DEBUG",
        action = ArgAction::Set,
        num_args = 0..=1,
        default_value_t = false,
        default_missing_value = "true",
        value_parser = BoolishValueParser::new(),
    )]
    pub debug: bool,

    #[arg(long, env = "DEBUG_LOG", default_value = "debug.log")]
    pub debug_log: PathBuf,
}

impl From<ConfigArgs> for ConfigInput {
    fn from(args: ConfigArgs) -> Self {
        ConfigInput {
            mode: args.mode,
            consul_addr: args.consul_addr,
            node_name: args.node_name,
            traefik_url: args.traefik_url,
            traefik_host: args.traefik_host,
            service_http: args.service_http,
            service_https: args.service_https,
            kv_prefix: args.kv_prefix,
            resync_seconds: args.resync_seconds,
            hc_interval: args.hc_interval,
            hc_timeout: args.hc_timeout,
            hc_deregister_after: args.hc_deregister_after,
            web_entrypoint: args.web_entrypoint,
            websecure_entrypoint: args.websecure_entrypoint,
            namespace_routers: args.namespace_routers,
            destroy_session_on_shutdown: args.destroy_session_on_shutdown,
            log_format: args.log_format,
            debug: args.debug,
            debug_log: args.debug_log,
        }
    }
}

impl ConfigArgs {
    pub fn resolve(self) -> Result<AgentConfig> {
        AgentConfig::resolve(self.into()).context("invalid configuration")
    }
}

/// Single-threaded runtime for the one-shot commands.
pub(crate) fn block_on<F: std::future::Future>(future: F) -> Result<F::Output> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    Ok(runtime.block_on(future))
}
