//! Domain types shared by every gwsync crate.
//!
//! Three families live here:
//! - raw types, as fetched from the routing source (`RawSnapshot`, `RawRouter`)
//! - the canonical model produced by normalization
//! - target types written to the registry (`Snapshot`, `ServiceRegistration`)
//!
//! plus the registry session types used in key-value mode.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Identifier of a registry session (lease).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Raw snapshot (source side)
// ---------------------------------------------------------------------------

/// One fetched rawdata document.
///
/// Entries are kept as untyped JSON here; each one is parsed individually at
/// the normalization boundary so a single malformed router cannot poison the
/// whole snapshot.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RawSnapshot {
    #[serde(default, deserialize_with = "lenient_map")]
    pub routers: BTreeMap<String, Value>,
    #[serde(default, deserialize_with = "lenient_map")]
    pub middlewares: BTreeMap<String, Value>,
    #[serde(default, deserialize_with = "lenient_map")]
    pub services: BTreeMap<String, Value>,
}

impl RawSnapshot {
    /// Parse a rawdata JSON document. Unknown top-level sections are ignored.
    pub fn from_json(value: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }
}

/// A router as the source reports it, after field-level parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRouter {
    /// Full source name, including any `@provider` suffix.
    pub name: String,
    pub rule: Option<String>,
    pub entry_points: Vec<String>,
    pub tls: Option<bool>,
    pub middlewares: Vec<String>,
    pub service: Option<String>,
    pub priority: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct RawRouterFields {
    #[serde(default, alias = "Rule")]
    rule: Option<String>,
    #[serde(
        default,
        rename = "entryPoints",
        alias = "entrypoints",
        alias = "EntryPoints",
        deserialize_with = "string_or_list"
    )]
    entry_points: Vec<String>,
    #[serde(default, alias = "TLS")]
    tls: Option<Value>,
    #[serde(default, alias = "Middlewares", deserialize_with = "string_or_list")]
    middlewares: Vec<String>,
    #[serde(default, alias = "Service")]
    service: Option<String>,
    #[serde(default, alias = "Priority")]
    priority: Option<i64>,
}

impl RawRouter {
    /// Parse one `routers` entry of a rawdata document.
    pub fn from_entry(name: &str, value: &Value) -> Result<Self, serde_json::Error> {
        let fields: RawRouterFields = serde_json::from_value(value.clone())?;
        let tls = match fields.tls {
            None | Some(Value::Null) => None,
            Some(Value::Bool(enabled)) => Some(enabled),
            // `tls: {}` or `tls: {certResolver: ...}` both mean TLS is on.
            Some(_) => Some(true),
        };
        Ok(Self {
            name: name.to_owned(),
            rule: fields.rule.filter(|rule| !rule.trim().is_empty()),
            entry_points: fields.entry_points,
            tls,
            middlewares: fields.middlewares,
            service: fields.service.filter(|service| !service.trim().is_empty()),
            priority: fields.priority,
        })
    }
}

fn lenient_map<'de, D>(deserializer: D) -> Result<BTreeMap<String, Value>, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Object(map) => Ok(map.into_iter().collect()),
        _ => Ok(BTreeMap::new()),
    }
}

fn string_or_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let items = match Value::deserialize(deserializer)? {
        Value::Null => Vec::new(),
        Value::String(s) => s.split(',').map(str::to_owned).collect(),
        Value::Array(values) => values
            .into_iter()
            .filter_map(|v| match v {
                Value::String(s) => Some(s),
                Value::Null => None,
                other => Some(other.to_string()),
            })
            .collect(),
        other => {
            return Err(serde::de::Error::custom(format!(
                "expected string or list, got {other}"
            )))
        }
    };
    Ok(items
        .into_iter()
        .map(|item| item.trim().to_owned())
        .filter(|item| !item.is_empty())
        .collect())
}

// ---------------------------------------------------------------------------
// Canonical model
// ---------------------------------------------------------------------------

/// Which of the node's two gateway services a router targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gateway {
    Http,
    Https,
}

impl Gateway {
    pub fn all() -> [Gateway; 2] {
        [Gateway::Http, Gateway::Https]
    }

    /// Registry service name: `gw-<node>-http` / `gw-<node>-https`.
    pub fn service_name(self, node: &str) -> String {
        format!("gw-{node}-{self}")
    }

    /// Registry service ID: `gw:<node>:http` / `gw:<node>:https`.
    pub fn service_id(self, node: &str) -> String {
        format!("gw:{node}:{self}")
    }

    pub fn default_port(self) -> u16 {
        match self {
            Gateway::Http => 80,
            Gateway::Https => 443,
        }
    }
}

impl fmt::Display for Gateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Gateway::Http => write!(f, "http"),
            Gateway::Https => write!(f, "https"),
        }
    }
}

/// A router after normalization and entrypoint splitting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CanonicalRouter {
    pub name: String,
    /// Copied verbatim from the source.
    pub rule: String,
    pub entry_point: String,
    pub tls: bool,
    pub gateway: Gateway,
    /// `gw-<node>-http` or `gw-<node>-https`.
    pub service: String,
    pub middlewares: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<i64>,
}

/// Typed middleware option value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum OptionValue {
    Scalar(String),
    List(Vec<OptionValue>),
    Map(BTreeMap<String, OptionValue>),
}

impl OptionValue {
    /// Convert a JSON value. `null` (and lists/maps that only contain nulls
    /// at the leaves) yield `None`.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Null => None,
            Value::Bool(b) => Some(Self::Scalar(b.to_string())),
            Value::Number(n) => Some(Self::Scalar(n.to_string())),
            Value::String(s) => Some(Self::Scalar(s.clone())),
            Value::Array(items) => Some(Self::List(
                items.iter().filter_map(Self::from_json).collect(),
            )),
            Value::Object(map) => Some(Self::Map(
                map.iter()
                    .filter_map(|(k, v)| Self::from_json(v).map(|v| (k.clone(), v)))
                    .collect(),
            )),
        }
    }

    pub fn is_scalar(&self) -> bool {
        matches!(self, Self::Scalar(_))
    }
}

/// A middleware referenced by at least one canonical router.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CanonicalMiddleware {
    pub name: String,
    /// Traefik middleware type key, e.g. `redirectScheme`, `forwardAuth`.
    pub kind: String,
    pub options: BTreeMap<String, OptionValue>,
}

/// Output of the normalizer: routers and the middlewares they reference,
/// both sorted by name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CanonicalModel {
    pub routers: Vec<CanonicalRouter>,
    pub middlewares: Vec<CanonicalMiddleware>,
}

impl CanonicalModel {
    pub fn is_empty(&self) -> bool {
        self.routers.is_empty()
    }

    pub fn routers_for(&self, gateway: Gateway) -> impl Iterator<Item = &CanonicalRouter> {
        self.routers.iter().filter(move |r| r.gateway == gateway)
    }

    pub fn middleware(&self, name: &str) -> Option<&CanonicalMiddleware> {
        self.middlewares.iter().find(|m| m.name == name)
    }
}

// ---------------------------------------------------------------------------
// Target representation (registry side)
// ---------------------------------------------------------------------------

/// Health-check descriptor attached to every service registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheck {
    #[serde(rename = "TCP")]
    pub tcp: String,
    #[serde(rename = "Interval")]
    pub interval: String,
    #[serde(rename = "Timeout")]
    pub timeout: String,
    #[serde(rename = "DeregisterCriticalServiceAfter")]
    pub deregister_critical_service_after: String,
}

/// Registry service registration payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRegistration {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Address")]
    pub address: String,
    #[serde(rename = "Port")]
    pub port: u16,
    #[serde(rename = "Tags")]
    pub tags: Vec<String>,
    #[serde(rename = "Check")]
    pub check: HealthCheck,
}

/// Everything one cycle wants the registry to contain.
///
/// Key-value mode fills `entries` and registers tagless health-check
/// services; tag mode leaves `entries` empty and carries the tags on the
/// registrations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Snapshot {
    pub taken_at: DateTime<Utc>,
    pub entries: BTreeMap<String, String>,
    pub registrations: Vec<ServiceRegistration>,
}

impl Snapshot {
    pub fn key_count(&self) -> usize {
        self.entries.len()
    }

    pub fn tag_count(&self) -> usize {
        self.registrations.iter().map(|r| r.tags.len()).sum()
    }
}

// ---------------------------------------------------------------------------
// Sessions
// ---------------------------------------------------------------------------

/// Lifecycle of a registry session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    #[default]
    Created,
    Active,
    Expired,
    Destroyed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Created => write!(f, "created"),
            SessionState::Active => write!(f, "active"),
            SessionState::Expired => write!(f, "expired"),
            SessionState::Destroyed => write!(f, "destroyed"),
        }
    }
}

/// A registry session owned by this process.
///
/// Transitions: `Created → Active → {Expired | Destroyed}`. Terminal states
/// are sticky; a replacement is always a new `Session`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub id: SessionId,
    pub ttl: Duration,
    pub created_at: DateTime<Utc>,
    pub last_renew: DateTime<Utc>,
    pub state: SessionState,
}

impl Session {
    pub fn new(id: SessionId, ttl: Duration, now: DateTime<Utc>) -> Self {
        Self {
            id,
            ttl,
            created_at: now,
            last_renew: now,
            state: SessionState::Created,
        }
    }

    pub fn activate(&mut self, now: DateTime<Utc>) {
        if self.state == SessionState::Created {
            self.state = SessionState::Active;
            self.last_renew = now;
        }
    }

    pub fn renewed(&mut self, now: DateTime<Utc>) {
        if self.state == SessionState::Active {
            self.last_renew = now;
        }
    }

    pub fn expire(&mut self) {
        if matches!(self.state, SessionState::Created | SessionState::Active) {
            self.state = SessionState::Expired;
        }
    }

    pub fn destroy(&mut self) {
        if self.state != SessionState::Destroyed {
            self.state = SessionState::Destroyed;
        }
    }

    pub fn is_active(&self) -> bool {
        self.state == SessionState::Active
    }

    /// Time since the registry handed out this session.
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now.signed_duration_since(self.created_at)
    }

    /// True once a full TTL has elapsed without a successful renew; the
    /// registry has reaped the session by then.
    pub fn renew_overdue(&self, now: DateTime<Utc>) -> bool {
        let elapsed = now
            .signed_duration_since(self.last_renew)
            .to_std()
            .unwrap_or_default();
        elapsed >= self.ttl
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
