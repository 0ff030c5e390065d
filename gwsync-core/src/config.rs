//! Agent configuration: raw settings in, validated [`AgentConfig`] out.
//!
//! [`ConfigInput`] mirrors the flags / environment variables one-to-one and
//! holds plain strings. [`AgentConfig::resolve`] parses, fills derived
//! defaults and validates; nothing downstream ever sees an unvalidated value.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::ConfigError;
use crate::types::{Gateway, HealthCheck};

/// Consul's accepted session TTL range.
pub const MIN_SESSION_TTL: Duration = Duration::from_secs(10);
pub const MAX_SESSION_TTL: Duration = Duration::from_secs(24 * 60 * 60);

const RAWDATA_PATH: &str = "/api/rawdata";

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// How routing is published to the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Session-bound key-value entries.
    #[default]
    Kv,
    /// Catalog tags on two health-checked service registrations.
    Tags,
}

impl FromStr for Mode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "kv" => Ok(Mode::Kv),
            "tags" | "tag" => Ok(Mode::Tags),
            other => Err(ConfigError::invalid(
                "MODE",
                format!("expected `kv` or `tags`, got `{other}`"),
            )),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Kv => write!(f, "kv"),
            Mode::Tags => write!(f, "tags"),
        }
    }
}

/// Console log encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(ConfigError::invalid(
                "LOG_FORMAT",
                format!("expected `text` or `json`, got `{other}`"),
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// Raw input
// ---------------------------------------------------------------------------

/// Unparsed settings, as collected from flags and environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigInput {
    pub mode: String,
    pub consul_addr: String,
    pub node_name: Option<String>,
    pub traefik_url: Option<String>,
    pub traefik_host: Option<String>,
    pub service_http: Option<String>,
    pub service_https: Option<String>,
    pub kv_prefix: String,
    pub resync_seconds: u64,
    pub hc_interval: String,
    pub hc_timeout: String,
    pub hc_deregister_after: String,
    pub web_entrypoint: String,
    pub websecure_entrypoint: String,
    pub namespace_routers: bool,
    pub destroy_session_on_shutdown: bool,
    pub log_format: String,
    pub debug: bool,
    pub debug_log: PathBuf,
}

impl Default for ConfigInput {
    fn default() -> Self {
        Self {
            mode: "kv".into(),
            consul_addr: "http://consul:8500".into(),
            node_name: None,
            traefik_url: None,
            traefik_host: None,
            service_http: None,
            service_https: None,
            kv_prefix: "traefik".into(),
            resync_seconds: 30,
            hc_interval: "10s".into(),
            hc_timeout: "5s".into(),
            hc_deregister_after: "30s".into(),
            web_entrypoint: "web".into(),
            websecure_entrypoint: "websecure".into(),
            namespace_routers: false,
            destroy_session_on_shutdown: true,
            log_format: "text".into(),
            debug: false,
            debug_log: PathBuf::from("debug.log"),
        }
    }
}

// ---------------------------------------------------------------------------
// Resolved config
// ---------------------------------------------------------------------------

/// Health-check timing shared by service registrations and the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthCheckSettings {
    pub interval: Duration,
    pub timeout: Duration,
    /// Also the session TTL in key-value mode.
    pub deregister_after: Duration,
}

/// Names of the two recognized entrypoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntrypointNames {
    pub web: String,
    pub websecure: String,
}

/// Logging options consumed by the daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    pub format: LogFormat,
    pub debug: bool,
    pub debug_log: PathBuf,
}

/// Fully validated agent configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentConfig {
    pub mode: Mode,
    pub consul_addr: Url,
    pub node_name: String,
    pub traefik_url: Url,
    pub traefik_host: Option<String>,
    pub service_http: Url,
    pub service_https: Url,
    pub kv_prefix: String,
    pub resync: Duration,
    pub health_check: HealthCheckSettings,
    pub entrypoints: EntrypointNames,
    pub namespace_routers: bool,
    pub destroy_session_on_shutdown: bool,
    pub log: LogSettings,
}

impl AgentConfig {
    /// Parse, default and validate raw settings.
    pub fn resolve(input: ConfigInput) -> Result<Self, ConfigError> {
        let mode: Mode = input.mode.parse()?;
        let consul_addr = parse_url("CONSUL_ADDR", &input.consul_addr)?;

        let traefik_raw = non_empty(input.traefik_url).ok_or(ConfigError::Missing {
            field: "TRAEFIK_URL",
        })?;
        let traefik_url = parse_url("TRAEFIK_URL", &traefik_raw)?;
        let traefik_host_name = traefik_url
            .host_str()
            .ok_or_else(|| ConfigError::invalid("TRAEFIK_URL", "URL has no host"))?
            .to_owned();

        let node_name = match non_empty(input.node_name) {
            Some(name) => name,
            None => default_node_name().ok_or(ConfigError::Missing { field: "NODE_NAME" })?,
        };

        let service_http = match non_empty(input.service_http) {
            Some(raw) => parse_url("SERVICE_HTTP", &raw)?,
            None => parse_url("SERVICE_HTTP", &format!("http://{traefik_host_name}:80"))?,
        };
        let service_https = match non_empty(input.service_https) {
            Some(raw) => parse_url("SERVICE_HTTPS", &raw)?,
            None => parse_url("SERVICE_HTTPS", &format!("https://{traefik_host_name}:443"))?,
        };

        let config = Self {
            mode,
            consul_addr,
            node_name: node_name.trim().to_owned(),
            traefik_url,
            traefik_host: non_empty(input.traefik_host),
            service_http,
            service_https,
            kv_prefix: input.kv_prefix.trim().to_owned(),
            resync: Duration::from_secs(input.resync_seconds),
            health_check: HealthCheckSettings {
                interval: parse_duration("HC_INTERVAL", &input.hc_interval)?,
                timeout: parse_duration("HC_TIMEOUT", &input.hc_timeout)?,
                deregister_after: parse_duration("HC_DEREGISTER_AFTER", &input.hc_deregister_after)?,
            },
            entrypoints: EntrypointNames {
                web: input.web_entrypoint.trim().to_owned(),
                websecure: input.websecure_entrypoint.trim().to_owned(),
            },
            namespace_routers: input.namespace_routers,
            destroy_session_on_shutdown: input.destroy_session_on_shutdown,
            log: LogSettings {
                format: input.log_format.parse()?,
                debug: input.debug,
                debug_log: input.debug_log,
            },
        };
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.node_name.is_empty()
            || !self
                .node_name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        {
            return Err(ConfigError::invalid(
                "NODE_NAME",
                format!("`{}` must match [A-Za-z0-9._-]+", self.node_name),
            ));
        }

        for (field, url) in [
            ("CONSUL_ADDR", &self.consul_addr),
            ("TRAEFIK_URL", &self.traefik_url),
            ("SERVICE_HTTP", &self.service_http),
            ("SERVICE_HTTPS", &self.service_https),
        ] {
            if !matches!(url.scheme(), "http" | "https") {
                return Err(ConfigError::invalid(
                    field,
                    format!("unsupported scheme `{}`", url.scheme()),
                ));
            }
            if url.host_str().is_none() {
                return Err(ConfigError::invalid(field, "URL has no host"));
            }
        }

        if self.kv_prefix.is_empty() {
            return Err(ConfigError::invalid("KV_PREFIX", "must not be empty"));
        }
        if self.kv_prefix.starts_with('/') || self.kv_prefix.ends_with('/') {
            return Err(ConfigError::invalid(
                "KV_PREFIX",
                "must not start or end with `/`",
            ));
        }

        if self.resync < Duration::from_secs(1) {
            return Err(ConfigError::invalid("RESYNC_SECONDS", "must be at least 1"));
        }

        let hc = &self.health_check;
        if hc.interval.is_zero() {
            return Err(ConfigError::invalid("HC_INTERVAL", "must be positive"));
        }
        if hc.timeout.is_zero() || hc.timeout > hc.interval {
            return Err(ConfigError::invalid(
                "HC_TIMEOUT",
                "must be positive and not exceed HC_INTERVAL",
            ));
        }
        if hc.interval * 2 > hc.deregister_after {
            return Err(ConfigError::invalid(
                "HC_DEREGISTER_AFTER",
                format!(
                    "must be at least twice HC_INTERVAL ({} < 2 x {})",
                    consul_duration(hc.deregister_after),
                    consul_duration(hc.interval)
                ),
            ));
        }
        if self.mode == Mode::Kv
            && !(MIN_SESSION_TTL..=MAX_SESSION_TTL).contains(&hc.deregister_after)
        {
            return Err(ConfigError::invalid(
                "HC_DEREGISTER_AFTER",
                "session TTL must be between 10s and 24h",
            ));
        }

        let web = self.entrypoints.web.to_ascii_lowercase();
        let websecure = self.entrypoints.websecure.to_ascii_lowercase();
        if web.is_empty() || websecure.is_empty() {
            return Err(ConfigError::invalid(
                "WEB_ENTRYPOINT",
                "entrypoint names must not be empty",
            ));
        }
        if web == websecure {
            return Err(ConfigError::invalid(
                "WEBSECURE_ENTRYPOINT",
                "must differ from WEB_ENTRYPOINT",
            ));
        }
        Ok(())
    }

    /// Source endpoint: the configured URL, with `/api/rawdata` appended
    /// unless it already ends with it.
    pub fn rawdata_url(&self) -> Url {
        let mut url = self.traefik_url.clone();
        let path = url.path().trim_end_matches('/').to_owned();
        if !path.ends_with(RAWDATA_PATH) {
            url.set_path(&format!("{path}{RAWDATA_PATH}"));
        }
        url
    }

    /// Session TTL; equal to the deregister-after window.
    pub fn session_ttl(&self) -> Duration {
        self.health_check.deregister_after
    }

    pub fn gateway_url(&self, gateway: Gateway) -> &Url {
        match gateway {
            Gateway::Http => &self.service_http,
            Gateway::Https => &self.service_https,
        }
    }

    /// Address and port a gateway service is registered with.
    pub fn gateway_endpoint(&self, gateway: Gateway) -> (String, u16) {
        let url = self.gateway_url(gateway);
        let host = url.host_str().unwrap_or_default().to_owned();
        let port = url
            .port_or_known_default()
            .unwrap_or_else(|| gateway.default_port());
        (host, port)
    }

    /// TCP health-check descriptor for a gateway service.
    pub fn health_check_for(&self, gateway: Gateway) -> HealthCheck {
        let (host, port) = self.gateway_endpoint(gateway);
        HealthCheck {
            tcp: format!("{host}:{port}"),
            interval: consul_duration(self.health_check.interval),
            timeout: consul_duration(self.health_check.timeout),
            deregister_critical_service_after: consul_duration(
                self.health_check.deregister_after,
            ),
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Render a duration the way Consul expects it: `"30s"`, or `"1500ms"` when
/// not a whole number of seconds.
pub fn consul_duration(d: Duration) -> String {
    if d.subsec_millis() == 0 {
        format!("{}s", d.as_secs())
    } else {
        format!("{}ms", d.as_millis())
    }
}

/// `$HOSTNAME`, then `/etc/hostname`.
pub fn default_node_name() -> Option<String> {
    std::env::var("HOSTNAME")
        .ok()
        .and_then(|h| non_empty(Some(h)))
        .or_else(|| {
            std::fs::read_to_string("/etc/hostname")
                .ok()
                .and_then(|h| non_empty(Some(h)))
        })
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_owned())
        .filter(|v| !v.is_empty())
}

fn parse_url(field: &'static str, value: &str) -> Result<Url, ConfigError> {
    Url::parse(value.trim()).map_err(|source| ConfigError::InvalidUrl {
        field,
        value: value.to_owned(),
        source,
    })
}

fn parse_duration(field: &'static str, value: &str) -> Result<Duration, ConfigError> {
    humantime::parse_duration(value.trim()).map_err(|source| ConfigError::InvalidDuration {
        field,
        value: value.to_owned(),
        source,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consul_duration_formats() {
        assert_eq!(consul_duration(Duration::from_secs(30)), "30s");
        assert_eq!(consul_duration(Duration::from_millis(1500)), "1500ms");
    }

    #[test]
    fn mode_parses_case_insensitively() {
        assert_eq!("KV".parse::<Mode>().unwrap(), Mode::Kv);
        assert_eq!("tags".parse::<Mode>().unwrap(), Mode::Tags);
        assert!("both".parse::<Mode>().is_err());
    }
}
