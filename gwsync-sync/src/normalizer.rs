//! Raw snapshot → canonical model.
//!
//! Pure: every problem is reported per entry as a [`Rejection`] and the
//! offending entry is left out. Callers decide how to log them.
//!
//! Steps:
//! 1. parse middlewares and derive their canonical names
//! 2. parse routers, resolve service and middleware references
//! 3. split routers by entrypoint (`_web` / `_websecure`)
//! 4. drop every raw router involved in a canonical name collision
//! 5. drop colliding middlewares among those still in use, with their routers
//! 6. keep only middlewares referenced by surviving routers

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde_json::Value;

use gwsync_core::{
    AgentConfig, CanonicalMiddleware, CanonicalModel, CanonicalRouter, Gateway, OptionValue,
    RawRouter, RawSnapshot,
};

/// Keys of a raw middleware object that describe runtime state, not config.
const MIDDLEWARE_META_KEYS: &[&str] = &["status", "usedBy", "error", "name", "provider", "type"];

const INTERNAL_PROVIDER: &str = "internal";

// ---------------------------------------------------------------------------
// Options and results
// ---------------------------------------------------------------------------

/// Inputs that shape normalization besides the snapshot itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizeOptions {
    pub node: String,
    pub web_entrypoint: String,
    pub websecure_entrypoint: String,
    /// Prefix every canonical name with the sanitized node name.
    pub namespace: bool,
}

impl NormalizeOptions {
    pub fn from_config(config: &AgentConfig) -> Self {
        Self {
            node: config.node_name.clone(),
            web_entrypoint: config.entrypoints.web.clone(),
            websecure_entrypoint: config.entrypoints.websecure.clone(),
            namespace: config.namespace_routers,
        }
    }
}

/// Why an entry was left out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectionKind {
    MalformedRouter(String),
    MissingRule,
    NoRecognizedEntrypoint(Vec<String>),
    UnresolvedService(Option<String>),
    UnresolvedMiddleware(String),
    /// The router references a middleware that was itself rejected.
    RejectedMiddleware(String),
    MalformedMiddleware(String),
    InvalidName,
    /// Canonical name shared with the listed raw entries.
    NameCollision { name: String, with: Vec<String> },
}

/// One rejected raw entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    /// Raw name of the router or middleware.
    pub entry: String,
    pub kind: RejectionKind,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entry = &self.entry;
        match &self.kind {
            RejectionKind::MalformedRouter(reason) => write!(f, "router {entry}: malformed: {reason}"),
            RejectionKind::MissingRule => write!(f, "router {entry}: missing rule"),
            RejectionKind::NoRecognizedEntrypoint(eps) => {
                write!(f, "router {entry}: no recognized entrypoint in {eps:?}")
            }
            RejectionKind::UnresolvedService(Some(svc)) => {
                write!(f, "router {entry}: service {svc} does not resolve")
            }
            RejectionKind::UnresolvedService(None) => write!(f, "router {entry}: no service"),
            RejectionKind::UnresolvedMiddleware(mw) => {
                write!(f, "router {entry}: middleware {mw} does not resolve")
            }
            RejectionKind::RejectedMiddleware(mw) => {
                write!(f, "router {entry}: middleware {mw} was rejected")
            }
            RejectionKind::MalformedMiddleware(reason) => {
                write!(f, "middleware {entry}: malformed: {reason}")
            }
            RejectionKind::InvalidName => write!(f, "{entry}: name sanitizes to nothing"),
            RejectionKind::NameCollision { name, with } => {
                write!(f, "{entry}: canonical name {name} collides with {}", with.join(", "))
            }
        }
    }
}

/// Normalizer output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Normalized {
    pub model: CanonicalModel,
    pub rejections: Vec<Rejection>,
}

// ---------------------------------------------------------------------------
// Names
// ---------------------------------------------------------------------------

/// Split `name@provider`. The provider is `None` when there is no `@`.
pub fn split_provider(name: &str) -> (&str, Option<&str>) {
    match name.rsplit_once('@') {
        Some((base, provider)) => (base, Some(provider).filter(|p| !p.is_empty())),
        None => (name, None),
    }
}

/// Lowercase, map everything outside `[a-z0-9-]` to `-`, collapse runs of
/// `-` and trim them from both ends.
pub fn sanitize_segment(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut last_dash = true;
    for c in raw.chars() {
        let c = c.to_ascii_lowercase();
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            out.push(c);
            last_dash = false;
        } else if !last_dash {
            out.push('-');
            last_dash = true;
        }
    }
    while out.ends_with('-') {
        out.pop();
    }
    out
}

/// Canonical name for a raw router or middleware name. `None` when nothing
/// usable is left.
pub fn canonical_name(raw: &str, opts: &NormalizeOptions) -> Option<String> {
    let base = sanitize_segment(split_provider(raw).0);
    if base.is_empty() {
        return None;
    }
    if opts.namespace {
        let node = sanitize_segment(&opts.node);
        if !node.is_empty() {
            return Some(format!("{node}-{base}"));
        }
    }
    Some(base)
}

fn is_internal(name: &str) -> bool {
    split_provider(name).1 == Some(INTERNAL_PROVIDER)
}

/// Resolve a router's reference to a key of `keys`.
///
/// `x@p` must match exactly. A bare `x` tries `x@<router provider>`, then
/// the exact key `x`, then the only key of the form `x@*`.
fn resolve_reference(
    reference: &str,
    router_provider: Option<&str>,
    keys: &BTreeSet<&str>,
) -> Option<String> {
    let reference = reference.trim();
    if reference.contains('@') {
        return keys.contains(reference).then(|| reference.to_owned());
    }
    if let Some(provider) = router_provider {
        let qualified = format!("{reference}@{provider}");
        if keys.contains(qualified.as_str()) {
            return Some(qualified);
        }
    }
    if keys.contains(reference) {
        return Some(reference.to_owned());
    }
    let prefix = format!("{reference}@");
    let mut matches = keys.iter().filter(|k| k.starts_with(&prefix));
    match (matches.next(), matches.next()) {
        (Some(only), None) => Some((*only).to_owned()),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Middlewares
// ---------------------------------------------------------------------------

fn parse_middleware(
    name: &str,
    value: &Value,
) -> Result<(String, BTreeMap<String, OptionValue>), String> {
    let Value::Object(map) = value else {
        return Err(format!("expected an object for {name}"));
    };
    let candidates: Vec<(&String, &Value)> = map
        .iter()
        .filter(|(k, _)| !MIDDLEWARE_META_KEYS.contains(&k.as_str()))
        .collect();
    let (kind, config) = match candidates.as_slice() {
        [single] => *single,
        [] => return Err("no middleware type key".to_owned()),
        several => {
            let keys: Vec<&str> = several.iter().map(|(k, _)| k.as_str()).collect();
            return Err(format!("several type keys: {}", keys.join(", ")));
        }
    };
    let options = match config {
        Value::Null => BTreeMap::new(),
        Value::Object(fields) => fields
            .iter()
            .filter_map(|(k, v)| OptionValue::from_json(v).map(|v| (k.clone(), v)))
            .collect(),
        other => {
            return Err(format!("options of {kind} must be an object, got {other}"));
        }
    };
    Ok((kind.clone(), options))
}

struct MiddlewareEntry {
    canonical: String,
    parsed: Result<(String, BTreeMap<String, OptionValue>), String>,
}

// ---------------------------------------------------------------------------
// normalize
// ---------------------------------------------------------------------------

/// Convert a raw snapshot into the canonical model.
pub fn normalize(raw: &RawSnapshot, opts: &NormalizeOptions) -> Normalized {
    let mut rejections = Vec::new();

    // 1. Middlewares.
    let mut middlewares: BTreeMap<&str, MiddlewareEntry> = BTreeMap::new();
    for (name, value) in raw.middlewares.iter().filter(|(n, _)| !is_internal(n)) {
        let Some(canonical) = canonical_name(name, opts) else {
            rejections.push(Rejection {
                entry: name.clone(),
                kind: RejectionKind::InvalidName,
            });
            continue;
        };
        let parsed = parse_middleware(name, value);
        if let Err(reason) = &parsed {
            rejections.push(Rejection {
                entry: name.clone(),
                kind: RejectionKind::MalformedMiddleware(reason.clone()),
            });
        }
        middlewares.insert(name.as_str(), MiddlewareEntry { canonical, parsed });
    }
    let middleware_keys: BTreeSet<&str> = middlewares.keys().copied().collect();
    let service_keys: BTreeSet<&str> = raw
        .services
        .keys()
        .map(String::as_str)
        .filter(|n| !is_internal(n))
        .collect();

    // 2 + 3. Routers.
    let web = opts.web_entrypoint.to_ascii_lowercase();
    let websecure = opts.websecure_entrypoint.to_ascii_lowercase();
    let mut candidates: Vec<Candidate<'_>> = Vec::new();

    for (name, value) in raw.routers.iter().filter(|(n, _)| !is_internal(n)) {
        let reject = |kind| Rejection {
            entry: name.clone(),
            kind,
        };
        let router = match RawRouter::from_entry(name, value) {
            Ok(router) => router,
            Err(e) => {
                rejections.push(reject(RejectionKind::MalformedRouter(e.to_string())));
                continue;
            }
        };
        let Some(rule) = router.rule.clone() else {
            rejections.push(reject(RejectionKind::MissingRule));
            continue;
        };

        let lowered: Vec<String> = router
            .entry_points
            .iter()
            .map(|ep| ep.to_ascii_lowercase())
            .collect();
        let has_web = lowered.contains(&web);
        let has_websecure = lowered.contains(&websecure);
        if !has_web && !has_websecure {
            rejections.push(reject(RejectionKind::NoRecognizedEntrypoint(
                router.entry_points.clone(),
            )));
            continue;
        }

        let provider = split_provider(name).1;
        let service_ok = router
            .service
            .as_deref()
            .and_then(|svc| resolve_reference(svc, provider, &service_keys))
            .is_some();
        if !service_ok {
            rejections.push(reject(RejectionKind::UnresolvedService(router.service.clone())));
            continue;
        }

        let mut middleware_names = Vec::with_capacity(router.middlewares.len());
        let mut uses = Vec::with_capacity(router.middlewares.len());
        let mut failed = None;
        for reference in &router.middlewares {
            let Some(key) = resolve_reference(reference, provider, &middleware_keys) else {
                failed = Some(RejectionKind::UnresolvedMiddleware(reference.clone()));
                break;
            };
            match middlewares.get_key_value(key.as_str()) {
                Some((raw_key, entry)) if entry.parsed.is_ok() => {
                    if !middleware_names.contains(&entry.canonical) {
                        middleware_names.push(entry.canonical.clone());
                    }
                    uses.push((*raw_key, reference.clone()));
                }
                _ => {
                    failed = Some(RejectionKind::RejectedMiddleware(reference.clone()));
                    break;
                }
            }
        }
        if let Some(kind) = failed {
            rejections.push(reject(kind));
            continue;
        }

        let Some(base) = canonical_name(name, opts) else {
            rejections.push(reject(RejectionKind::InvalidName));
            continue;
        };

        let variants: Vec<(String, &str, Gateway)> = match (has_web, has_websecure) {
            (true, true) => vec![
                (format!("{base}_web"), opts.web_entrypoint.as_str(), Gateway::Http),
                (
                    format!("{base}_websecure"),
                    opts.websecure_entrypoint.as_str(),
                    Gateway::Https,
                ),
            ],
            (false, true) => vec![(base, opts.websecure_entrypoint.as_str(), Gateway::Https)],
            _ => vec![(base, opts.web_entrypoint.as_str(), Gateway::Http)],
        };
        for (canonical, entry_point, gateway) in variants {
            candidates.push(Candidate {
                raw: name.clone(),
                uses: uses.clone(),
                router: CanonicalRouter {
                    name: canonical,
                    rule: rule.clone(),
                    entry_point: entry_point.to_owned(),
                    tls: gateway == Gateway::Https,
                    gateway,
                    service: gateway.service_name(&opts.node),
                    middlewares: middleware_names.clone(),
                    priority: router.priority,
                },
            });
        }
    }

    // 4. Router collisions fail every raw router involved, all variants.
    let mut failed_routers: BTreeSet<String> = BTreeSet::new();
    for group in collisions(
        candidates
            .iter()
            .map(|c| (c.router.name.as_str(), c.raw.as_str())),
    ) {
        for raw_name in &group.members {
            if failed_routers.insert(raw_name.clone()) {
                rejections.push(group.rejection_for(raw_name));
            }
        }
    }
    candidates.retain(|c| !failed_routers.contains(&c.raw));

    // 5. Middleware collisions, among the middlewares surviving routers use.
    // An unreferenced middleware never publishes, so it cannot clash.
    let in_use: BTreeSet<&str> = candidates
        .iter()
        .flat_map(|c| c.uses.iter().map(|(raw, _)| *raw))
        .collect();
    let mut collided: BTreeSet<String> = BTreeSet::new();
    for group in collisions(
        in_use
            .iter()
            .filter_map(|raw| middlewares.get(raw).map(|e| (e.canonical.as_str(), *raw))),
    ) {
        for raw_name in &group.members {
            rejections.push(group.rejection_for(raw_name));
        }
        collided.extend(group.members);
    }
    let mut routers: Vec<CanonicalRouter> = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        let clash = candidate
            .uses
            .iter()
            .find(|(raw, _)| collided.contains(*raw));
        match clash {
            Some((_, reference)) => {
                if failed_routers.insert(candidate.raw.clone()) {
                    rejections.push(Rejection {
                        entry: candidate.raw,
                        kind: RejectionKind::RejectedMiddleware(reference.clone()),
                    });
                }
            }
            None => routers.push(candidate.router),
        }
    }
    routers.sort_by(|a, b| a.name.cmp(&b.name));

    // 6. Referenced middlewares only.
    let referenced: BTreeSet<&str> = routers
        .iter()
        .flat_map(|r| r.middlewares.iter().map(String::as_str))
        .collect();
    let mut kept: Vec<CanonicalMiddleware> = middlewares
        .iter()
        .filter(|(raw, e)| !collided.contains(**raw) && referenced.contains(e.canonical.as_str()))
        .filter_map(|(_, e)| {
            let (kind, options) = e.parsed.as_ref().ok()?;
            Some(CanonicalMiddleware {
                name: e.canonical.clone(),
                kind: kind.clone(),
                options: options.clone(),
            })
        })
        .collect();
    kept.sort_by(|a, b| a.name.cmp(&b.name));

    Normalized {
        model: CanonicalModel {
            routers,
            middlewares: kept,
        },
        rejections,
    }
}

/// A router variant awaiting the collision passes, with the raw middleware
/// keys it resolved and the reference text that named each.
struct Candidate<'a> {
    raw: String,
    uses: Vec<(&'a str, String)>,
    router: CanonicalRouter,
}

struct CollisionGroup {
    name: String,
    members: Vec<String>,
}

impl CollisionGroup {
    fn rejection_for(&self, raw_name: &str) -> Rejection {
        Rejection {
            entry: raw_name.to_owned(),
            kind: RejectionKind::NameCollision {
                name: self.name.clone(),
                with: self
                    .members
                    .iter()
                    .filter(|m| m.as_str() != raw_name)
                    .cloned()
                    .collect(),
            },
        }
    }
}

/// Canonical names claimed by more than one distinct raw entry.
fn collisions<'a>(pairs: impl Iterator<Item = (&'a str, &'a str)>) -> Vec<CollisionGroup> {
    let mut owners: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    for (canonical, raw) in pairs {
        owners.entry(canonical).or_default().insert(raw);
    }
    owners
        .into_iter()
        .filter(|(_, raws)| raws.len() > 1)
        .map(|(name, raws)| CollisionGroup {
            name: name.to_owned(),
            members: raws.into_iter().map(str::to_owned).collect(),
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
