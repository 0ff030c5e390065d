//! Canonical model → catalog tags on the node's two gateway services.

use std::collections::{BTreeMap, BTreeSet};

use gwsync_core::{AgentConfig, CanonicalModel, Gateway, OptionValue, ServiceRegistration};

const ENABLE_TAG: &str = "traefik.enable=true";

/// Registration for one gateway service with the given tag list.
pub fn service_registration(
    config: &AgentConfig,
    gateway: Gateway,
    tags: Vec<String>,
) -> ServiceRegistration {
    let (address, port) = config.gateway_endpoint(gateway);
    ServiceRegistration {
        id: gateway.service_id(&config.node_name),
        name: gateway.service_name(&config.node_name),
        address,
        port,
        tags,
        check: config.health_check_for(gateway),
    }
}

/// Builds the tag lists for tag mode.
#[derive(Debug, Clone)]
pub struct TagBuilder {
    config: AgentConfig,
}

impl TagBuilder {
    pub fn new(config: &AgentConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    /// Both registrations, HTTP first, each carrying its complete tag list.
    pub fn build(&self, model: &CanonicalModel) -> Vec<ServiceRegistration> {
        Gateway::all()
            .into_iter()
            .map(|gateway| service_registration(&self.config, gateway, tags_for(model, gateway)))
            .collect()
    }
}

/// Tag list for one gateway: enable tag, its routers, then every middleware
/// those routers reference.
pub fn tags_for(model: &CanonicalModel, gateway: Gateway) -> Vec<String> {
    let mut tags = vec![ENABLE_TAG.to_owned()];
    let mut referenced = BTreeSet::new();

    for router in model.routers_for(gateway) {
        let base = format!("traefik.http.routers.{}", router.name);
        tags.push(format!("{base}.rule={}", router.rule));
        tags.push(format!("{base}.entrypoints={}", router.entry_point));
        tags.push(format!("{base}.tls={}", router.tls));
        if !router.middlewares.is_empty() {
            tags.push(format!("{base}.middlewares={}", router.middlewares.join(",")));
        }
        if let Some(priority) = router.priority {
            tags.push(format!("{base}.priority={priority}"));
        }
        referenced.extend(router.middlewares.iter().map(String::as_str));
    }

    for middleware in referenced.iter().filter_map(|name| model.middleware(name)) {
        let base = format!(
            "traefik.http.middlewares.{}.{}",
            middleware.name,
            middleware.kind.to_ascii_lowercase()
        );
        if middleware.options.is_empty() {
            tags.push(format!("{base}=true"));
            continue;
        }
        let mut flat = BTreeMap::new();
        flatten_labels(&middleware.options, &base, &mut flat);
        tags.extend(flat.into_iter().map(|(k, v)| format!("{k}={v}")));
    }
    tags
}

fn flatten_labels(
    options: &BTreeMap<String, OptionValue>,
    prefix: &str,
    out: &mut BTreeMap<String, String>,
) {
    for (key, value) in options {
        let path = format!("{prefix}.{}", key.to_ascii_lowercase());
        match value {
            OptionValue::Scalar(s) => {
                out.insert(path, s.clone());
            }
            OptionValue::Map(inner) => flatten_labels(inner, &path, out),
            OptionValue::List(items) if items.iter().all(OptionValue::is_scalar) => {
                let joined: Vec<&str> = items
                    .iter()
                    .filter_map(|i| match i {
                        OptionValue::Scalar(s) => Some(s.as_str()),
                        _ => None,
                    })
                    .collect();
                out.insert(path, joined.join(","));
            }
            OptionValue::List(items) => {
                let json = serde_json::to_string(items).unwrap_or_default();
                out.insert(path, json);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gwsync_core::{CanonicalMiddleware, CanonicalRouter, ConfigInput};

    fn config() -> AgentConfig {
        AgentConfig::resolve(ConfigInput {
            mode: "tags".into(),
            node_name: Some("n1".into()),
            traefik_url: Some("http://10.0.0.5:8080".into()),
            ..ConfigInput::default()
        })
        .expect("config")
    }

    fn router(name: &str, gateway: Gateway, middlewares: &[&str]) -> CanonicalRouter {
        CanonicalRouter {
            name: name.into(),
            rule: format!("Host(`{name}.example`)"),
            entry_point: if gateway == Gateway::Https { "websecure" } else { "web" }.into(),
            tls: gateway == Gateway::Https,
            gateway,
            service: gateway.service_name("n1"),
            middlewares: middlewares.iter().map(|s| s.to_string()).collect(),
            priority: None,
        }
    }

    fn model() -> CanonicalModel {
        CanonicalModel {
            routers: vec![
                router("foo_web", Gateway::Http, &["redirect"]),
                router("foo_websecure", Gateway::Https, &["auth", "redirect"]),
            ],
            middlewares: vec![
                CanonicalMiddleware {
                    name: "auth".into(),
                    kind: "forwardAuth".into(),
                    options: BTreeMap::from([
                        ("address".into(), OptionValue::Scalar("http://auth".into())),
                        (
                            "authResponseHeaders".into(),
                            OptionValue::List(vec![
                                OptionValue::Scalar("X-User".into()),
                                OptionValue::Scalar("X-Mail".into()),
                            ]),
                        ),
                        (
                            "tls".into(),
                            OptionValue::Map(BTreeMap::from([(
                                "insecureSkipVerify".into(),
                                OptionValue::Scalar("true".into()),
                            )])),
                        ),
                    ]),
                },
                CanonicalMiddleware {
                    name: "redirect".into(),
                    kind: "redirectScheme".into(),
                    options: BTreeMap::new(),
                },
            ],
        }
    }

    #[test]
    fn http_group_only_carries_its_routers_and_middlewares() {
        let tags = tags_for(&model(), Gateway::Http);
        assert_eq!(
            tags,
            vec![
                "traefik.enable=true",
                "traefik.http.routers.foo_web.rule=Host(`foo_web.example`)",
                "traefik.http.routers.foo_web.entrypoints=web",
                "traefik.http.routers.foo_web.tls=false",
                "traefik.http.routers.foo_web.middlewares=redirect",
                "traefik.http.middlewares.redirect.redirectscheme=true",
            ]
        );
    }

    #[test]
    fn middleware_options_are_flattened_lowercase() {
        let tags = tags_for(&model(), Gateway::Https);
        assert!(tags.contains(&"traefik.http.middlewares.auth.forwardauth.address=http://auth".to_string()));
        assert!(tags.contains(
            &"traefik.http.middlewares.auth.forwardauth.authresponseheaders=X-User,X-Mail".to_string()
        ));
        assert!(tags.contains(
            &"traefik.http.middlewares.auth.forwardauth.tls.insecureskipverify=true".to_string()
        ));
        assert!(tags.contains(&"traefik.http.routers.foo_websecure.middlewares=auth,redirect".to_string()));
    }

    #[test]
    fn list_of_maps_is_compact_json() {
        let options = BTreeMap::from([(
            "rules".to_string(),
            OptionValue::List(vec![OptionValue::Map(BTreeMap::from([(
                "a".to_string(),
                OptionValue::Scalar("1".into()),
            )]))]),
        )]);
        let mut out = BTreeMap::new();
        flatten_labels(&options, "p", &mut out);
        assert_eq!(out.get("p.rules").map(String::as_str), Some(r#"[{"a":"1"}]"#));
    }

    #[test]
    fn registrations_use_gateway_endpoints() {
        let regs = TagBuilder::new(&config()).build(&model());
        assert_eq!(regs.len(), 2);
        assert_eq!(regs[0].id, "gw:n1:http");
        assert_eq!(regs[0].name, "gw-n1-http");
        assert_eq!(regs[0].port, 80);
        assert_eq!(regs[1].id, "gw:n1:https");
        assert_eq!(regs[1].port, 443);
        assert_eq!(regs[1].address, "10.0.0.5");
        assert_eq!(regs[1].check.tcp, "10.0.0.5:443");
        assert_eq!(regs[1].tags[0], "traefik.enable=true");
    }

    #[test]
    fn empty_model_still_registers_enable_tag() {
        let regs = TagBuilder::new(&config()).build(&CanonicalModel::default());
        assert!(regs.iter().all(|r| r.tags == vec!["traefik.enable=true".to_string()]));
    }
}
