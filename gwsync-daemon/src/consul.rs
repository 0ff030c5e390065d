//! Consul HTTP API client implementing the [`Registry`] port.
//!
//! Every call is bounded by the client timeout (the health-check timeout).
//! Transport failures map to [`RegistryError::Unreachable`]; a renew 404 or
//! an acquire rejected with `invalid session` maps to
//! [`RegistryError::SessionNotFound`].

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use url::Url;

use gwsync_core::config::consul_duration;
use gwsync_core::{AgentConfig, ServiceRegistration, SessionId};
use gwsync_sync::{Registry, RegistryError};

use crate::error::DaemonError;

#[derive(Debug, Serialize)]
struct SessionRequest<'a> {
    #[serde(rename = "Name")]
    name: &'a str,
    #[serde(rename = "TTL")]
    ttl: String,
    #[serde(rename = "Behavior")]
    behavior: &'a str,
    #[serde(rename = "LockDelay")]
    lock_delay: &'a str,
}

#[derive(Debug, Deserialize)]
struct SessionCreated {
    #[serde(rename = "ID")]
    id: String,
}

#[derive(Debug, Clone)]
pub struct ConsulRegistry {
    client: Client,
    base: Url,
}

impl ConsulRegistry {
    pub fn new(base: Url, timeout: Duration) -> Result<Self, DaemonError> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|source| DaemonError::HttpClient {
                client: "consul",
                source,
            })?;
        Ok(Self { client, base })
    }

    pub fn from_config(config: &AgentConfig) -> Result<Self, DaemonError> {
        Self::new(config.consul_addr.clone(), config.health_check.timeout)
    }

    /// `<base>/v1/<segments...>`, each segment percent-encoded on its own.
    fn endpoint<'a>(&self, segments: impl IntoIterator<Item = &'a str>) -> Result<Url, RegistryError> {
        let mut url = self.base.clone();
        url.set_query(None);
        {
            let mut path = url.path_segments_mut().map_err(|()| {
                RegistryError::Decode(format!("consul address `{}` cannot be a base", self.base))
            })?;
            path.pop_if_empty().push("v1");
            path.extend(segments);
        }
        Ok(url)
    }

    fn kv_url(&self, key: &str) -> Result<Url, RegistryError> {
        self.endpoint(std::iter::once("kv").chain(key.split('/')))
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<Response, RegistryError> {
        request
            .send()
            .await
            .map_err(|e| RegistryError::Unreachable(e.to_string()))
    }

    /// Read the body and turn a non-success status into an error.
    async fn expect_success(response: Response) -> Result<String, RegistryError> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| RegistryError::Unreachable(e.to_string()))?;
        if status.is_success() {
            Ok(body)
        } else {
            Err(RegistryError::Status {
                status: status.as_u16(),
                body: body.trim().to_owned(),
            })
        }
    }
}

#[async_trait]
impl Registry for ConsulRegistry {
    async fn kv_acquire(
        &self,
        key: &str,
        value: &str,
        session: &SessionId,
    ) -> Result<bool, RegistryError> {
        let mut url = self.kv_url(key)?;
        url.query_pairs_mut().append_pair("acquire", &session.0);
        let response = self
            .send(self.client.put(url).body(value.to_owned()))
            .await?;

        match Self::expect_success(response).await {
            Ok(body) => match body.trim() {
                "true" => Ok(true),
                "false" => Ok(false),
                other => Err(RegistryError::Decode(format!(
                    "acquire of `{key}` answered `{other}`"
                ))),
            },
            Err(RegistryError::Status { status: 500, body })
                if body.to_ascii_lowercase().contains("invalid session") =>
            {
                Err(RegistryError::SessionNotFound(session.clone()))
            }
            Err(e) => Err(e),
        }
    }

    async fn kv_delete(&self, key: &str) -> Result<(), RegistryError> {
        let url = self.kv_url(key)?;
        let response = self.send(self.client.delete(url)).await?;
        Self::expect_success(response).await.map(drop)
    }

    async fn kv_delete_tree(&self, prefix: &str) -> Result<(), RegistryError> {
        let mut url = self.kv_url(prefix)?;
        url.query_pairs_mut().append_pair("recurse", "true");
        let response = self.send(self.client.delete(url)).await?;
        Self::expect_success(response).await.map(drop)
    }

    async fn register_service(
        &self,
        registration: &ServiceRegistration,
    ) -> Result<(), RegistryError> {
        let url = self.endpoint(["agent", "service", "register"])?;
        let response = self.send(self.client.put(url).json(registration)).await?;
        Self::expect_success(response).await.map(drop)
    }

    async fn session_create(
        &self,
        name: &str,
        ttl: Duration,
    ) -> Result<SessionId, RegistryError> {
        let url = self.endpoint(["session", "create"])?;
        let request = SessionRequest {
            name,
            ttl: consul_duration(ttl),
            behavior: "delete",
            lock_delay: "0s",
        };
        let response = self.send(self.client.put(url).json(&request)).await?;
        let body = Self::expect_success(response).await?;
        let created: SessionCreated =
            serde_json::from_str(&body).map_err(|e| RegistryError::Decode(e.to_string()))?;
        Ok(SessionId(created.id))
    }

    async fn session_renew(&self, id: &SessionId) -> Result<(), RegistryError> {
        let url = self.endpoint(["session", "renew", id.0.as_str()])?;
        let response = self.send(self.client.put(url)).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(RegistryError::SessionNotFound(id.clone()));
        }
        Self::expect_success(response).await.map(drop)
    }

    async fn session_destroy(&self, id: &SessionId) -> Result<(), RegistryError> {
        let url = self.endpoint(["session", "destroy", id.0.as_str()])?;
        let response = self.send(self.client.put(url)).await?;
        Self::expect_success(response).await.map(drop)
    }

    async fn probe(&self) -> bool {
        let Ok(url) = self.endpoint(["status", "leader"]) else {
            return false;
        };
        let response = match self.client.get(url).send().await {
            Ok(response) => response,
            Err(e) => {
                tracing::debug!(error = %e, "consul probe failed");
                return false;
            }
        };
        if !response.status().is_success() {
            tracing::debug!(status = %response.status(), "consul probe rejected");
            return false;
        }
        match response.text().await {
            Ok(body) => {
                let leader = body.trim();
                !leader.is_empty() && leader != "\"\""
            }
            Err(_) => false,
        }
    }
}
