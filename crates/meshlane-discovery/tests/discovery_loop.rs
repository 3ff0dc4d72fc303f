//! End-to-end discovery behavior: refresh, pick, partial failure and
//! concurrent swaps.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use meshlane_core::{CheckRecord, InstanceRecord, InstanceSpec};
use meshlane_discovery::{
    DiscoveryError, Picker, RefreshOutcome, Refresher, RoundRobin, ServiceCache,
};
use meshlane_registry::{InMemoryRegistry, RegistryClient, RegistryError, RegistryResult};

/// Wraps the in-memory registry, counting calls and failing queries
/// for selected services.
#[derive(Clone, Default)]
struct Flaky {
    inner: InMemoryRegistry,
    calls: Arc<AtomicUsize>,
    failing: Arc<Mutex<HashSet<String>>>,
}

impl Flaky {
    fn fail(&self, service: &str) {
        self.failing.lock().unwrap().insert(service.to_string());
    }

    fn heal(&self, service: &str) {
        self.failing.lock().unwrap().remove(service);
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RegistryClient for Flaky {
    async fn query_passing_checks(&self, service: &str) -> RegistryResult<Vec<CheckRecord>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.lock().unwrap().contains(service) {
            return Err(RegistryError::Transport("connection refused".to_string()));
        }
        self.inner.query_passing_checks(service).await
    }

    async fn fetch_instance(&self, service_id: &str) -> RegistryResult<InstanceRecord> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.fetch_instance(service_id).await
    }

    async fn set_check_failing(&self, check_id: &str, note: &str) -> RegistryResult<()> {
        self.inner.set_check_failing(check_id, note).await
    }

    async fn set_check_passing(&self, check_id: &str, note: &str) -> RegistryResult<()> {
        self.inner.set_check_passing(check_id, note).await
    }

    async fn register_instance(&self, spec: &InstanceSpec) -> RegistryResult<()> {
        self.inner.register_instance(spec).await
    }

    async fn deregister_instance(&self, id: &str) -> RegistryResult<()> {
        self.inner.deregister_instance(id).await
    }
}

async fn add(registry: &Flaky, id: &str, service: &str, port: u16) {
    registry
        .register_instance(&InstanceSpec::with_ttl_check(
            id,
            service,
            "10.0.0.1",
            port,
            Duration::from_secs(60),
        ))
        .await
        .unwrap();
}

fn build(registry: &Flaky, services: &[&str]) -> (Refresher, Picker) {
    let cache = Arc::new(ServiceCache::new(services.iter().copied(), Arc::new(RoundRobin)));
    let refresher = Refresher::new(cache, Arc::new(registry.clone()));
    let picker = Picker::new(refresher.clone());
    (refresher, picker)
}

#[tokio::test]
async fn round_robin_is_fair_over_one_pass() {
    let registry = Flaky::default();
    for (i, id) in ["u1", "u2", "u3", "u4"].iter().enumerate() {
        add(&registry, id, "users", 9000 + i as u16).await;
    }
    let (refresher, picker) = build(&registry, &["users"]);
    refresher.refresh_one("users").await.unwrap();

    let first: Vec<String> = (0..4).map(|_| picker.get_next("users").unwrap().id).collect();
    let second: Vec<String> = (0..4).map(|_| picker.get_next("users").unwrap().id).collect();

    assert_eq!(first.iter().collect::<HashSet<_>>().len(), 4);
    assert_eq!(first, second);
}

#[tokio::test]
async fn idempotent_refresh_keeps_cursor_position() {
    let registry = Flaky::default();
    add(&registry, "u1", "users", 9001).await;
    add(&registry, "u2", "users", 9002).await;
    add(&registry, "u3", "users", 9003).await;
    let (refresher, picker) = build(&registry, &["users"]);

    assert_eq!(
        refresher.refresh_one("users").await.unwrap(),
        RefreshOutcome::Updated { count: 3 }
    );
    assert_eq!(picker.get_next("users").unwrap().id, "u1");

    let before = refresher.cache().snapshot("users").unwrap().unwrap();
    assert_eq!(
        refresher.refresh_one("users").await.unwrap(),
        RefreshOutcome::Unchanged
    );
    assert_eq!(
        refresher.refresh_one("users").await.unwrap(),
        RefreshOutcome::Unchanged
    );
    let after = refresher.cache().snapshot("users").unwrap().unwrap();

    assert!(Arc::ptr_eq(&before, &after));
    assert_eq!(picker.get_next("users").unwrap().id, "u2");
}

#[tokio::test]
async fn unknown_service_makes_no_registry_call() {
    let registry = Flaky::default();
    let (refresher, picker) = build(&registry, &["users"]);

    assert!(matches!(
        picker.get_next("no-such-service"),
        Err(DiscoveryError::UndefinedService(_))
    ));
    assert!(matches!(
        refresher.refresh_one("no-such-service").await,
        Err(DiscoveryError::UndefinedService(_))
    ));

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(registry.calls(), 0);
}

#[tokio::test]
async fn empty_service_reports_no_healthy_node() {
    let registry = Flaky::default();
    let (refresher, picker) = build(&registry, &["users"]);

    refresher.refresh_one("users").await.unwrap();
    let err = picker.get_next("users").unwrap_err();
    assert!(matches!(err, DiscoveryError::NoHealthyNode(_)));
    assert!(err.is_unavailable());
}

#[tokio::test]
async fn failed_refresh_keeps_cached_list() {
    let registry = Flaky::default();
    add(&registry, "u1", "users", 9001).await;
    let (refresher, picker) = build(&registry, &["users"]);
    refresher.refresh_one("users").await.unwrap();

    registry.fail("users");
    let err = refresher.refresh_one("users").await.unwrap_err();
    assert!(matches!(err, DiscoveryError::RegistryQuery { .. }));
    assert!(!err.is_unavailable());

    assert_eq!(picker.get_next("users").unwrap().id, "u1");
    assert_eq!(refresher.cache().snapshot("users").unwrap().unwrap().len(), 1);
}

#[tokio::test]
async fn partial_refresh_updates_healthy_services() {
    let registry = Flaky::default();
    add(&registry, "u1", "users", 9001).await;
    add(&registry, "o1", "orders", 9101).await;
    add(&registry, "b1", "billing", 9201).await;
    registry.fail("orders");

    let (refresher, picker) = build(&registry, &["users", "orders", "billing"]);
    let err = refresher.refresh_all().await.unwrap_err();

    assert_eq!(err.failed_services(), vec!["orders"]);
    let msg = err.to_string();
    assert!(msg.contains("orders"));
    assert!(!msg.contains("users"));
    assert!(!msg.contains("billing"));

    assert_eq!(picker.get_next("users").unwrap().id, "u1");
    assert_eq!(picker.get_next("billing").unwrap().id, "b1");
    assert!(refresher.cache().snapshot("orders").unwrap().is_none());

    registry.heal("orders");
    let report = refresher.refresh_all().await.unwrap();
    assert_eq!(report.updated, vec!["orders".to_string()]);
    assert_eq!(report.unchanged, vec!["users".to_string(), "billing".to_string()]);
}

#[test]
fn readers_never_see_a_mismatched_cursor() {
    use std::thread;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();

    let registry = Flaky::default();
    let (refresher, picker) = build(&registry, &["users"]);
    let long: Vec<String> = (0..5).map(|i| format!("long-{i}")).collect();

    runtime.block_on(async {
        for (i, id) in long.iter().enumerate() {
            add(&registry, id, "users", 9000 + i as u16).await;
        }
        refresher.refresh_one("users").await.unwrap();
    });

    let stop = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let mut readers = Vec::new();
    for _ in 0..4 {
        let picker = picker.clone();
        let stop = stop.clone();
        readers.push(thread::spawn(move || {
            let mut seen = HashSet::new();
            while !stop.load(Ordering::Relaxed) {
                match picker.get_next("users") {
                    Ok(ep) => {
                        seen.insert(ep.id);
                    }
                    Err(DiscoveryError::NoHealthyNode(_)) => {}
                    Err(e) => panic!("unexpected pick error: {e}"),
                }
            }
            seen
        }));
    }

    // Flip between a five-node and a one-node list while readers run.
    runtime.block_on(async {
        for round in 0..50 {
            for id in ["long-1", "long-2", "long-3", "long-4"] {
                let check = format!("service:{id}");
                if round % 2 == 0 {
                    registry.set_check_failing(&check, "").await.unwrap();
                } else {
                    registry.set_check_passing(&check, "").await.unwrap();
                }
            }
            let expected = if round % 2 == 0 { 1 } else { 5 };
            refresher.refresh_one("users").await.unwrap();
            let cursor = refresher.cache().cursor("users").unwrap().unwrap();
            let snapshot = refresher.cache().snapshot("users").unwrap().unwrap();
            assert_eq!(cursor.endpoints().len(), expected);
            assert_eq!(cursor.endpoints(), &snapshot[..]);
        }
    });

    stop.store(true, Ordering::Relaxed);
    let known: HashSet<String> = long.into_iter().collect();
    for reader in readers {
        let seen = reader.join().unwrap();
        assert!(seen.is_subset(&known));
    }
}
