//! HTTP adapter tests against a fake registry agent.
//!
//! The fake serves the subset of the Consul agent/health API the
//! adapter uses and records every call it receives.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, put};
use axum::{Json, Router};
use serde_json::{Value, json};

use meshlane_core::{CheckStatus, Endpoint, InstanceSpec};
use meshlane_registry::{HttpRegistry, RegistryClient, RegistryError, Traced};

#[derive(Default)]
struct Fake {
    checks: Vec<Value>,
    services: HashMap<String, Value>,
    calls: Vec<String>,
    registered: Vec<Value>,
    tokens: Vec<String>,
}

type Shared = Arc<Mutex<Fake>>;

async fn health_checks(
    State(fake): State<Shared>,
    Path(service): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Json<Value> {
    let mut fake = fake.lock().unwrap();
    fake.calls.push(format!(
        "checks {service} filter={}",
        params.get("filter").cloned().unwrap_or_default()
    ));
    if let Some(token) = headers.get("x-consul-token") {
        fake.tokens.push(token.to_str().unwrap().to_string());
    }
    let matching: Vec<Value> = fake
        .checks
        .iter()
        .filter(|c| c["ServiceName"] == service)
        .cloned()
        .collect();
    Json(Value::Array(matching))
}

async fn agent_service(
    State(fake): State<Shared>,
    Path(id): Path<String>,
) -> Result<Json<Value>, StatusCode> {
    let mut fake = fake.lock().unwrap();
    fake.calls.push(format!("service {id}"));
    fake.services.get(&id).cloned().map(Json).ok_or(StatusCode::NOT_FOUND)
}

async fn check_update(
    fake: Shared,
    action: &str,
    id: String,
    params: HashMap<String, String>,
) -> StatusCode {
    let mut fake = fake.lock().unwrap();
    fake.calls.push(format!(
        "{action} {id} note={}",
        params.get("note").cloned().unwrap_or_default()
    ));
    let known = fake.checks.iter().any(|c| c["CheckID"] == id);
    if known { StatusCode::OK } else { StatusCode::NOT_FOUND }
}

async fn check_fail(
    State(fake): State<Shared>,
    Path(id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> StatusCode {
    check_update(fake, "fail", id, params).await
}

async fn check_pass(
    State(fake): State<Shared>,
    Path(id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> StatusCode {
    check_update(fake, "pass", id, params).await
}

async fn register(State(fake): State<Shared>, Json(body): Json<Value>) -> StatusCode {
    let mut fake = fake.lock().unwrap();
    fake.calls.push("register".to_string());
    fake.registered.push(body);
    StatusCode::OK
}

async fn deregister(State(fake): State<Shared>, Path(id): Path<String>) -> StatusCode {
    let mut fake = fake.lock().unwrap();
    fake.calls.push(format!("deregister {id}"));
    let before = fake.registered.len();
    fake.registered.retain(|r| r["ID"] != id);
    if fake.registered.len() < before { StatusCode::OK } else { StatusCode::NOT_FOUND }
}

async fn spawn_fake(fake: Fake) -> (SocketAddr, Shared) {
    let shared: Shared = Arc::new(Mutex::new(fake));
    let app = Router::new()
        .route("/v1/health/checks/{service}", get(health_checks))
        .route("/v1/agent/service/{id}", get(agent_service))
        .route("/v1/agent/check/fail/{id}", put(check_fail))
        .route("/v1/agent/check/pass/{id}", put(check_pass))
        .route("/v1/agent/service/register", put(register))
        .route("/v1/agent/service/deregister/{id}", put(deregister))
        .with_state(shared.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, shared)
}

fn users_fake() -> Fake {
    let mut fake = Fake::default();
    fake.checks = vec![
        json!({"CheckID": "service:users-1", "ServiceID": "users-1", "ServiceName": "users", "Status": "passing"}),
        json!({"CheckID": "service:users-2", "ServiceID": "users-2", "ServiceName": "users", "Status": "critical"}),
        json!({"CheckID": "service:orders-1", "ServiceID": "orders-1", "ServiceName": "orders", "Status": "passing"}),
    ];
    fake.services.insert(
        "users-1".to_string(),
        json!({"ID": "users-1", "Service": "users", "Address": "10.0.0.1", "Port": 9001, "Meta": {"zone": "a"}}),
    );
    fake.services.insert(
        "users-2".to_string(),
        json!({"ID": "users-2", "Service": "users", "Address": "10.0.0.2", "Port": 9002, "Meta": null}),
    );
    fake
}

fn client(addr: SocketAddr) -> HttpRegistry {
    HttpRegistry::new(addr.to_string(), Duration::from_secs(2))
}

#[tokio::test]
async fn query_filters_to_passing_and_sends_filter() {
    let (addr, fake) = spawn_fake(users_fake()).await;
    let registry = client(addr).with_token("secret");

    let checks = registry.query_passing_checks("users").await.unwrap();
    assert_eq!(checks.len(), 1);
    assert_eq!(checks[0].check_id, "service:users-1");
    assert_eq!(checks[0].service_id, "users-1");
    assert_eq!(checks[0].status, CheckStatus::Passing);

    let fake = fake.lock().unwrap();
    assert_eq!(fake.calls, vec!["checks users filter=Status == \"passing\"".to_string()]);
    assert_eq!(fake.tokens, vec!["secret".to_string()]);
}

#[tokio::test]
async fn builds_endpoint_from_check_and_instance() {
    let (addr, _fake) = spawn_fake(users_fake()).await;
    let registry = client(addr);

    let checks = registry.query_passing_checks("users").await.unwrap();
    let instance = registry.fetch_instance(&checks[0].service_id).await.unwrap();
    let endpoint = Endpoint::from_records("users", &checks[0], &instance);

    assert_eq!(endpoint.id, "users-1");
    assert_eq!(endpoint.address, "10.0.0.1:9001");
    assert_eq!(endpoint.check_id(), Some("service:users-1"));
    assert_eq!(endpoint.metadata.get("zone").map(String::as_str), Some("a"));
}

#[tokio::test]
async fn null_meta_decodes_as_empty() {
    let (addr, _fake) = spawn_fake(users_fake()).await;
    let instance = client(addr).fetch_instance("users-2").await.unwrap();
    assert!(instance.meta.is_empty());
    assert_eq!(instance.port, 9002);
}

#[tokio::test]
async fn empty_service_address_is_a_decode_error() {
    let mut fake = users_fake();
    fake.services.insert(
        "users-3".to_string(),
        json!({"ID": "users-3", "Service": "users", "Address": "", "Port": 9003}),
    );
    let (addr, _fake) = spawn_fake(fake).await;

    let err = client(addr).fetch_instance("users-3").await.unwrap_err();
    assert!(matches!(err, RegistryError::Decode(_)), "{err:?}");
}

#[tokio::test]
async fn ids_with_spaces_reach_the_agent_intact() {
    let mut fake = Fake::default();
    fake.checks = vec![
        json!({"CheckID": "service:billing v2", "ServiceID": "billing v2", "ServiceName": "billing", "Status": "passing"}),
    ];
    fake.services.insert(
        "billing v2".to_string(),
        json!({"ID": "billing v2", "Service": "billing", "Address": "10.0.0.9", "Port": 7000}),
    );
    let (addr, fake) = spawn_fake(fake).await;
    let registry = client(addr);

    let instance = registry.fetch_instance("billing v2").await.unwrap();
    assert_eq!(instance.id, "billing v2");
    registry
        .set_check_failing("service:billing v2", "tripped")
        .await
        .unwrap();

    let fake = fake.lock().unwrap();
    assert_eq!(
        fake.calls,
        vec![
            "service billing v2".to_string(),
            "fail service:billing v2 note=tripped".to_string(),
        ]
    );
}

#[tokio::test]
async fn missing_instance_is_not_found() {
    let (addr, _fake) = spawn_fake(users_fake()).await;
    let err = client(addr).fetch_instance("ghost").await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn check_updates_carry_note() {
    let (addr, fake) = spawn_fake(users_fake()).await;
    let registry = client(addr);

    registry.set_check_failing("service:users-1", "breaker open").await.unwrap();
    registry.set_check_passing("service:users-1", "cool-down elapsed").await.unwrap();

    let calls = fake.lock().unwrap().calls.clone();
    assert_eq!(
        calls,
        vec![
            "fail service:users-1 note=breaker open".to_string(),
            "pass service:users-1 note=cool-down elapsed".to_string(),
        ]
    );
}

#[tokio::test]
async fn unknown_check_update_is_tagged_not_found() {
    let (addr, _fake) = spawn_fake(users_fake()).await;
    let registry = Traced::new(client(addr));

    let err = registry.set_check_passing("service:gone", "").await.unwrap_err();
    assert!(matches!(err, RegistryError::Op { op: "set_check_passing", .. }));
    assert!(err.is_not_found());
}

#[tokio::test]
async fn register_and_deregister_round_trip() {
    let (addr, fake) = spawn_fake(Fake::default()).await;
    let registry = client(addr);
    let spec = InstanceSpec::with_ttl_check(
        "gateway-1",
        "gateway",
        "10.0.0.5",
        8080,
        Duration::from_secs(86_400),
    );

    registry.register_instance(&spec).await.unwrap();
    {
        let fake = fake.lock().unwrap();
        assert_eq!(fake.registered.len(), 1);
        assert_eq!(fake.registered[0]["Check"]["TTL"], "86400s");
        assert_eq!(fake.registered[0]["Check"]["Status"], "passing");
    }

    registry.deregister_instance("gateway-1").await.unwrap();
    let err = registry.deregister_instance("gateway-1").await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn slow_agent_times_out() {
    // Accept connections but never answer.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        loop {
            if let Ok((stream, _)) = listener.accept().await {
                held.push(stream);
            }
        }
    });

    let registry = HttpRegistry::new(addr.to_string(), Duration::from_millis(200));
    let err = registry.query_passing_checks("users").await.unwrap_err();
    assert!(matches!(err, RegistryError::Timeout(_)));
}
