//! ConsulRegistry against a mocked Consul HTTP API.

use std::time::Duration;

use serde_json::json;
use url::Url;
use wiremock::matchers::{body_json, body_partial_json, body_string, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use gwsync_core::{HealthCheck, ServiceRegistration, SessionId};
use gwsync_daemon::ConsulRegistry;
use gwsync_sync::{Registry, RegistryError};

fn registry(server: &MockServer) -> ConsulRegistry {
    ConsulRegistry::new(Url::parse(&server.uri()).unwrap(), Duration::from_millis(500)).unwrap()
}

fn session() -> SessionId {
    SessionId::from("3f1c-session")
}

#[tokio::test]
async fn acquire_sends_value_bound_to_session() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/v1/kv/traefik/http/routers/foo_web/rule"))
        .and(query_param("acquire", "3f1c-session"))
        .and(body_string("Host(`foo.example.com`)"))
        .respond_with(ResponseTemplate::new(200).set_body_string("true"))
        .expect(1)
        .mount(&server)
        .await;

    let acquired = registry(&server)
        .kv_acquire(
            "traefik/http/routers/foo_web/rule",
            "Host(`foo.example.com`)",
            &session(),
        )
        .await
        .unwrap();
    assert!(acquired);
}

#[tokio::test]
async fn acquire_reports_a_foreign_lock() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/v1/kv/traefik/k"))
        .respond_with(ResponseTemplate::new(200).set_body_string("false\n"))
        .mount(&server)
        .await;

    assert!(!registry(&server).kv_acquire("traefik/k", "v", &session()).await.unwrap());
}

#[tokio::test]
async fn acquire_with_invalid_session_means_session_lost() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/v1/kv/traefik/k"))
        .respond_with(
            ResponseTemplate::new(500).set_body_string("invalid session \"3f1c-session\""),
        )
        .mount(&server)
        .await;

    let err = registry(&server)
        .kv_acquire("traefik/k", "v", &session())
        .await
        .unwrap_err();
    assert_eq!(err, RegistryError::SessionNotFound(session()));
}

#[tokio::test]
async fn other_server_errors_keep_their_status() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/v1/kv/traefik/k"))
        .respond_with(ResponseTemplate::new(503).set_body_string("no leader"))
        .mount(&server)
        .await;

    let err = registry(&server).kv_delete("traefik/k").await.unwrap_err();
    assert_eq!(
        err,
        RegistryError::Status {
            status: 503,
            body: "no leader".into()
        }
    );
    assert!(!err.is_unreachable());
}

#[tokio::test]
async fn tree_delete_recurses() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/v1/kv/traefik"))
        .and(query_param("recurse", "true"))
        .respond_with(ResponseTemplate::new(200).set_body_string("true"))
        .expect(1)
        .mount(&server)
        .await;

    registry(&server).kv_delete_tree("traefik").await.unwrap();
}

#[tokio::test]
async fn session_create_requests_delete_behavior() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/v1/session/create"))
        .and(body_json(json!({
            "Name": "gwsync-node1",
            "TTL": "30s",
            "Behavior": "delete",
            "LockDelay": "0s",
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ID": "adf4238a"})))
        .expect(1)
        .mount(&server)
        .await;

    let id = registry(&server)
        .session_create("gwsync-node1", Duration::from_secs(30))
        .await
        .unwrap();
    assert_eq!(id, SessionId::from("adf4238a"));
}

#[tokio::test]
async fn renew_of_unknown_session_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/v1/session/renew/3f1c-session"))
        .respond_with(ResponseTemplate::new(404).set_body_string("Session id not found"))
        .mount(&server)
        .await;

    let err = registry(&server).session_renew(&session()).await.unwrap_err();
    assert!(err.is_session_not_found());
}

#[tokio::test]
async fn destroy_hits_the_session_endpoint() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/v1/session/destroy/3f1c-session"))
        .respond_with(ResponseTemplate::new(200).set_body_string("true"))
        .expect(1)
        .mount(&server)
        .await;

    registry(&server).session_destroy(&session()).await.unwrap();
}

#[tokio::test]
async fn service_registration_uses_consul_field_names() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/v1/agent/service/register"))
        .and(body_partial_json(json!({
            "ID": "gw:node1:http",
            "Name": "gw-node1-http",
            "Port": 80,
            "Tags": ["traefik.enable=true"],
            "Check": {"TCP": "traefik:80", "DeregisterCriticalServiceAfter": "30s"},
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let registration = ServiceRegistration {
        id: "gw:node1:http".into(),
        name: "gw-node1-http".into(),
        address: "traefik".into(),
        port: 80,
        tags: vec!["traefik.enable=true".into()],
        check: HealthCheck {
            tcp: "traefik:80".into(),
            interval: "10s".into(),
            timeout: "5s".into(),
            deregister_critical_service_after: "30s".into(),
        },
    };
    registry(&server).register_service(&registration).await.unwrap();
}

#[tokio::test]
async fn probe_needs_an_elected_leader() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/status/leader"))
        .respond_with(ResponseTemplate::new(200).set_body_string("\"10.0.0.5:8300\""))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/status/leader"))
        .respond_with(ResponseTemplate::new(200).set_body_string("\"\""))
        .mount(&server)
        .await;

    let registry = registry(&server);
    assert!(registry.probe().await);
    assert!(!registry.probe().await);
}

#[tokio::test]
async fn closed_port_is_unreachable() {
    let registry =
        ConsulRegistry::new(Url::parse("http://127.0.0.1:1").unwrap(), Duration::from_millis(200))
            .unwrap();
    let err = registry.kv_delete("traefik/k").await.unwrap_err();
    assert!(err.is_unreachable());
    assert!(!registry.probe().await);
}

#[tokio::test]
async fn slow_answers_time_out_as_unreachable() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/v1/session/renew/3f1c-session"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
        .mount(&server)
        .await;

    let err = registry(&server).session_renew(&session()).await.unwrap_err();
    assert!(err.is_unreachable());
}
