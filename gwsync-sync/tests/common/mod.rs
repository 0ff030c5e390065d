//! In-memory registry and source used by the engine tests.
#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use gwsync_core::{AgentConfig, ConfigInput, RawSnapshot, ServiceRegistration, SessionId};
use gwsync_sync::{Registry, RegistryError, SnapshotSource, SourceError};

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct RegistryInner {
    kv: BTreeMap<String, (String, SessionId)>,
    sessions: BTreeSet<SessionId>,
    next_session: u32,
    unreachable: bool,
    puts: Vec<(String, String, SessionId)>,
    deletes: Vec<String>,
    registrations: Vec<ServiceRegistration>,
    destroyed: Vec<SessionId>,
    failing_writes: BTreeSet<String>,
    failing_deletes: BTreeSet<String>,
    failing_registrations: bool,
    renewals: usize,
}

/// Consul-like registry: delete-behavior sessions, acquire semantics, a
/// reachability switch and per-key failure injection.
#[derive(Debug, Default)]
pub struct FakeRegistry {
    inner: Mutex<RegistryInner>,
    /// Every acquire waits here first; hold it to stall a pass mid-flight.
    writes: tokio::sync::Mutex<()>,
}

impl FakeRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn with<R>(&self, f: impl FnOnce(&mut RegistryInner) -> R) -> R {
        f(&mut self.inner.lock().expect("fake registry lock"))
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.with(|i| i.unreachable = !reachable);
    }

    pub fn fail_writes_to(&self, key: &str, failing: bool) {
        self.with(|i| {
            if failing {
                i.failing_writes.insert(key.to_owned());
            } else {
                i.failing_writes.remove(key);
            }
        });
    }

    pub fn fail_deletes_of(&self, key: &str, failing: bool) {
        self.with(|i| {
            if failing {
                i.failing_deletes.insert(key.to_owned());
            } else {
                i.failing_deletes.remove(key);
            }
        });
    }

    pub fn fail_registrations(&self, failing: bool) {
        self.with(|i| i.failing_registrations = failing);
    }

    /// Block every key write until the guard is dropped.
    pub async fn hold_writes(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.writes.lock().await
    }

    pub fn renewals(&self) -> usize {
        self.with(|i| i.renewals)
    }

    /// Invalidate every session the way a TTL expiry does: the sessions go
    /// away and so do the keys they hold.
    pub fn expire_sessions(&self) {
        self.with(|i| {
            let dead = std::mem::take(&mut i.sessions);
            i.kv.retain(|_, (_, s)| !dead.contains(s));
        });
    }

    /// Put a key held by a session this agent does not own.
    pub fn hold_foreign(&self, key: &str, value: &str) {
        self.with(|i| {
            let foreign = SessionId::from("foreign");
            i.sessions.insert(foreign.clone());
            i.kv.insert(key.to_owned(), (value.to_owned(), foreign));
        });
    }

    pub fn kv(&self) -> BTreeMap<String, String> {
        self.with(|i| i.kv.iter().map(|(k, (v, _))| (k.clone(), v.clone())).collect())
    }

    pub fn holder(&self, key: &str) -> Option<SessionId> {
        self.with(|i| i.kv.get(key).map(|(_, s)| s.clone()))
    }

    pub fn puts(&self) -> Vec<(String, String, SessionId)> {
        self.with(|i| i.puts.clone())
    }

    pub fn put_keys(&self) -> Vec<String> {
        self.with(|i| i.puts.iter().map(|(k, _, _)| k.clone()).collect())
    }

    pub fn deletes(&self) -> Vec<String> {
        self.with(|i| i.deletes.clone())
    }

    pub fn registrations(&self) -> Vec<ServiceRegistration> {
        self.with(|i| i.registrations.clone())
    }

    pub fn live_sessions(&self) -> Vec<SessionId> {
        self.with(|i| i.sessions.iter().cloned().collect())
    }

    pub fn destroyed(&self) -> Vec<SessionId> {
        self.with(|i| i.destroyed.clone())
    }

    /// Forget the call log, keep the stored state.
    pub fn clear_log(&self) {
        self.with(|i| {
            i.puts.clear();
            i.deletes.clear();
            i.registrations.clear();
        });
    }

    fn check_reachable(i: &RegistryInner) -> Result<(), RegistryError> {
        if i.unreachable {
            Err(RegistryError::Unreachable("connection refused".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Registry for FakeRegistry {
    async fn kv_acquire(
        &self,
        key: &str,
        value: &str,
        session: &SessionId,
    ) -> Result<bool, RegistryError> {
        let _open = self.writes.lock().await;
        self.with(|i| {
            Self::check_reachable(i)?;
            if !i.sessions.contains(session) {
                return Err(RegistryError::SessionNotFound(session.clone()));
            }
            if i.failing_writes.contains(key) {
                return Err(RegistryError::Status {
                    status: 500,
                    body: "injected".into(),
                });
            }
            if let Some((_, holder)) = i.kv.get(key) {
                if holder != session && i.sessions.contains(holder) {
                    return Ok(false);
                }
            }
            i.kv.insert(key.to_owned(), (value.to_owned(), session.clone()));
            i.puts.push((key.to_owned(), value.to_owned(), session.clone()));
            Ok(true)
        })
    }

    async fn kv_delete(&self, key: &str) -> Result<(), RegistryError> {
        self.with(|i| {
            Self::check_reachable(i)?;
            if i.failing_deletes.contains(key) {
                return Err(RegistryError::Status {
                    status: 500,
                    body: "injected".into(),
                });
            }
            i.kv.remove(key);
            i.deletes.push(key.to_owned());
            Ok(())
        })
    }

    async fn kv_delete_tree(&self, prefix: &str) -> Result<(), RegistryError> {
        self.with(|i| {
            Self::check_reachable(i)?;
            i.kv.retain(|k, _| !k.starts_with(prefix));
            i.deletes.push(format!("{prefix}?recurse"));
            Ok(())
        })
    }

    async fn register_service(
        &self,
        registration: &ServiceRegistration,
    ) -> Result<(), RegistryError> {
        self.with(|i| {
            Self::check_reachable(i)?;
            if i.failing_registrations {
                return Err(RegistryError::Status {
                    status: 500,
                    body: "injected".into(),
                });
            }
            i.registrations.push(registration.clone());
            Ok(())
        })
    }

    async fn session_create(&self, _name: &str, _ttl: Duration) -> Result<SessionId, RegistryError> {
        self.with(|i| {
            Self::check_reachable(i)?;
            i.next_session += 1;
            let id = SessionId(format!("session-{}", i.next_session));
            i.sessions.insert(id.clone());
            Ok(id)
        })
    }

    async fn session_renew(&self, id: &SessionId) -> Result<(), RegistryError> {
        self.with(|i| {
            Self::check_reachable(i)?;
            if i.sessions.contains(id) {
                i.renewals += 1;
                Ok(())
            } else {
                Err(RegistryError::SessionNotFound(id.clone()))
            }
        })
    }

    async fn session_destroy(&self, id: &SessionId) -> Result<(), RegistryError> {
        self.with(|i| {
            Self::check_reachable(i)?;
            i.sessions.remove(id);
            i.kv.retain(|_, (_, s)| s != id);
            i.destroyed.push(id.clone());
            Ok(())
        })
    }

    async fn probe(&self) -> bool {
        self.with(|i| !i.unreachable)
    }
}

// ---------------------------------------------------------------------------
// Source
// ---------------------------------------------------------------------------

/// Serves whatever rawdata was last set; counts fetches.
#[derive(Debug)]
pub struct FakeSource {
    current: Mutex<Result<Value, SourceError>>,
    fetches: Mutex<usize>,
}

impl FakeSource {
    pub fn new(rawdata: Value) -> Arc<Self> {
        Arc::new(Self {
            current: Mutex::new(Ok(rawdata)),
            fetches: Mutex::new(0),
        })
    }

    pub fn set(&self, rawdata: Value) {
        *self.current.lock().expect("source lock") = Ok(rawdata);
    }

    pub fn fail(&self) {
        *self.current.lock().expect("source lock") =
            Err(SourceError::Unreachable("connection refused".into()));
    }

    pub fn fetches(&self) -> usize {
        *self.fetches.lock().expect("source lock")
    }
}

#[async_trait]
impl SnapshotSource for FakeSource {
    async fn fetch(&self) -> Result<RawSnapshot, SourceError> {
        *self.fetches.lock().expect("source lock") += 1;
        let current = self.current.lock().expect("source lock").clone();
        let value = current?;
        RawSnapshot::from_json(value).map_err(|e| SourceError::Decode(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

pub fn config(mode: &str) -> AgentConfig {
    AgentConfig::resolve(ConfigInput {
        mode: mode.into(),
        node_name: Some("node1".into()),
        traefik_url: Some("http://traefik:8080".into()),
        ..ConfigInput::default()
    })
    .expect("config")
}

/// Rawdata with one router per name, all on both entrypoints.
pub fn rawdata(routers: &[&str]) -> Value {
    let mut map = serde_json::Map::new();
    for name in routers {
        map.insert(
            format!("{name}@docker"),
            json!({
                "rule": format!("Host(`{name}.example.com`)"),
                "entryPoints": ["web", "websecure"],
                "service": "app",
                "status": "enabled",
            }),
        );
    }
    json!({
        "routers": map,
        "middlewares": {},
        "services": {"app@docker": {"loadBalancer": {"servers": [{"url": "http://10.0.0.2"}]}}},
    })
}

/// Every key the KV builder emits for a router that was split in two.
pub fn split_router_keys(name: &str) -> Vec<String> {
    let mut keys = Vec::new();
    for suffix in ["web", "websecure"] {
        for leaf in ["rule", "entryPoints/0", "tls", "service"] {
            keys.push(format!("traefik/http/routers/{name}_{suffix}/{leaf}"));
        }
    }
    keys.sort();
    keys
}
