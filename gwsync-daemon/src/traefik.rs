//! Traefik rawdata client implementing the [`SnapshotSource`] port.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::HOST;
use reqwest::Client;
use url::Url;

use gwsync_core::{AgentConfig, RawSnapshot};
use gwsync_sync::{SnapshotSource, SourceError};

use crate::error::DaemonError;

#[derive(Debug, Clone)]
pub struct TraefikSource {
    client: Client,
    url: Url,
    host: Option<String>,
}

impl TraefikSource {
    /// `url` is the full rawdata endpoint; `host` overrides the Host header.
    pub fn new(url: Url, host: Option<String>, timeout: Duration) -> Result<Self, DaemonError> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|source| DaemonError::HttpClient {
                client: "traefik",
                source,
            })?;
        Ok(Self { client, url, host })
    }

    pub fn from_config(config: &AgentConfig) -> Result<Self, DaemonError> {
        Self::new(
            config.rawdata_url(),
            config.traefik_host.clone(),
            config.health_check.timeout,
        )
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl SnapshotSource for TraefikSource {
    async fn fetch(&self) -> Result<RawSnapshot, SourceError> {
        let mut request = self.client.get(self.url.clone());
        if let Some(host) = &self.host {
            request = request.header(HOST, host);
        }

        let response = request
            .send()
            .await
            .map_err(|e| SourceError::Unreachable(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Status {
                status: status.as_u16(),
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| SourceError::Unreachable(e.to_string()))?;
        let snapshot: RawSnapshot =
            serde_json::from_slice(&body).map_err(|e| SourceError::Decode(e.to_string()))?;
        tracing::debug!(
            routers = snapshot.routers.len(),
            middlewares = snapshot.middlewares.len(),
            services = snapshot.services.len(),
            "fetched rawdata"
        );
        Ok(snapshot)
    }
}
