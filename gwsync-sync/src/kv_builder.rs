//! Canonical model → key-value entries in the Traefik KV provider layout.
//!
//! Output is a `BTreeMap`, so iteration order (and therefore the rendered
//! snapshot) is byte-identical for identical input.

use std::collections::BTreeMap;

use url::Url;

use gwsync_core::{AgentConfig, CanonicalModel, Gateway, OptionValue, ServiceRegistration};

use crate::tag_builder::service_registration;

/// Builds key-value entries and the tagless health-check registrations.
#[derive(Debug, Clone)]
pub struct KvBuilder {
    config: AgentConfig,
}

impl KvBuilder {
    pub fn new(config: &AgentConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    fn prefix(&self) -> &str {
        &self.config.kv_prefix
    }

    pub fn build(&self, model: &CanonicalModel) -> BTreeMap<String, String> {
        let mut entries = BTreeMap::new();
        let p = self.prefix();

        for gateway in Gateway::all() {
            let service = gateway.service_name(&self.config.node_name);
            entries.insert(
                format!("{p}/http/services/{service}/loadBalancer/servers/0/url"),
                server_url(self.config.gateway_url(gateway)),
            );
        }

        for mw in &model.middlewares {
            let base = format!("{p}/http/middlewares/{}/{}", mw.name, mw.kind);
            if mw.options.is_empty() {
                entries.insert(base, "true".to_owned());
            } else {
                flatten_keys(&mw.options, &base, &mut entries);
            }
        }

        for router in &model.routers {
            let rp = format!("{p}/http/routers/{}", router.name);
            entries.insert(format!("{rp}/rule"), router.rule.clone());
            entries.insert(format!("{rp}/entryPoints/0"), router.entry_point.clone());
            entries.insert(format!("{rp}/tls"), router.tls.to_string());
            entries.insert(format!("{rp}/service"), router.service.clone());
            for (i, mw) in router.middlewares.iter().enumerate() {
                entries.insert(format!("{rp}/middlewares/{i}"), mw.clone());
            }
            if let Some(priority) = router.priority {
                entries.insert(format!("{rp}/priority"), priority.to_string());
            }
        }

        entries
    }

    /// Health-check-only registrations; routing lives in the KV tree.
    pub fn registrations(&self) -> Vec<ServiceRegistration> {
        Gateway::all()
            .into_iter()
            .map(|gateway| service_registration(&self.config, gateway, Vec::new()))
            .collect()
    }
}

fn flatten_keys(
    options: &BTreeMap<String, OptionValue>,
    prefix: &str,
    out: &mut BTreeMap<String, String>,
) {
    for (key, value) in options {
        flatten_value(value, &format!("{prefix}/{key}"), out);
    }
}

fn flatten_value(value: &OptionValue, path: &str, out: &mut BTreeMap<String, String>) {
    match value {
        OptionValue::Scalar(s) => {
            out.insert(path.to_owned(), s.clone());
        }
        OptionValue::List(items) => {
            for (i, item) in items.iter().enumerate() {
                flatten_value(item, &format!("{path}/{i}"), out);
            }
        }
        OptionValue::Map(inner) => flatten_keys(inner, path, out),
    }
}

/// `http://host/` → `http://host`; anything with a real path is kept.
fn server_url(url: &Url) -> String {
    let s = url.as_str();
    if url.path() == "/" && url.query().is_none() {
        s.trim_end_matches('/').to_owned()
    } else {
        s.to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gwsync_core::{CanonicalMiddleware, CanonicalRouter, ConfigInput};

    fn config() -> AgentConfig {
        AgentConfig::resolve(ConfigInput {
            node_name: Some("n1".into()),
            traefik_url: Some("http://traefik:8080".into()),
            service_https: Some("https://10.0.0.9:8443".into()),
            ..ConfigInput::default()
        })
        .expect("config")
    }

    fn model() -> CanonicalModel {
        CanonicalModel {
            routers: vec![CanonicalRouter {
                name: "foo_websecure".into(),
                rule: "Host(`foo`)".into(),
                entry_point: "websecure".into(),
                tls: true,
                gateway: Gateway::Https,
                service: "gw-n1-https".into(),
                middlewares: vec!["auth".into(), "gzip".into()],
                priority: Some(5),
            }],
            middlewares: vec![
                CanonicalMiddleware {
                    name: "auth".into(),
                    kind: "basicAuth".into(),
                    options: BTreeMap::from([(
                        "users".into(),
                        OptionValue::List(vec![
                            OptionValue::Scalar("a:1".into()),
                            OptionValue::Scalar("b:2".into()),
                        ]),
                    )]),
                },
                CanonicalMiddleware {
                    name: "gzip".into(),
                    kind: "compress".into(),
                    options: BTreeMap::new(),
                },
            ],
        }
    }

    #[test]
    fn emits_router_middleware_and_service_keys() {
        let entries = KvBuilder::new(&config()).build(&model());
        let get = |k: &str| entries.get(k).map(String::as_str);
        assert_eq!(get("traefik/http/routers/foo_websecure/rule"), Some("Host(`foo`)"));
        assert_eq!(get("traefik/http/routers/foo_websecure/entryPoints/0"), Some("websecure"));
        assert_eq!(get("traefik/http/routers/foo_websecure/tls"), Some("true"));
        assert_eq!(get("traefik/http/routers/foo_websecure/service"), Some("gw-n1-https"));
        assert_eq!(get("traefik/http/routers/foo_websecure/middlewares/0"), Some("auth"));
        assert_eq!(get("traefik/http/routers/foo_websecure/middlewares/1"), Some("gzip"));
        assert_eq!(get("traefik/http/routers/foo_websecure/priority"), Some("5"));
        assert_eq!(get("traefik/http/middlewares/auth/basicAuth/users/1"), Some("b:2"));
        assert_eq!(get("traefik/http/middlewares/gzip/compress"), Some("true"));
        assert_eq!(
            get("traefik/http/services/gw-n1-http/loadBalancer/servers/0/url"),
            Some("http://traefik")
        );
        assert_eq!(
            get("traefik/http/services/gw-n1-https/loadBalancer/servers/0/url"),
            Some("https://10.0.0.9:8443")
        );
        assert_eq!(entries.len(), 12);
    }

    #[test]
    fn output_is_deterministic() {
        let builder = KvBuilder::new(&config());
        let a = serde_json::to_string(&builder.build(&model())).expect("json");
        let b = serde_json::to_string(&builder.build(&model())).expect("json");
        assert_eq!(a, b);
    }

    #[test]
    fn registrations_carry_no_tags() {
        let regs = KvBuilder::new(&config()).registrations();
        assert_eq!(regs.len(), 2);
        assert!(regs.iter().all(|r| r.tags.is_empty()));
        assert_eq!(regs[1].port, 8443);
    }
}
