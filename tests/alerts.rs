mod common;

use async_trait::async_trait;
use common::*;
use futures::future::join_all;
use nexus::alerts::{
    AlertCacheController, AlertRequest, AlertStore, EntitySummary, Freshness, InsightError,
    InsightGenerator, InsightPayload, MemoryAlertStore,
};
use nexus::config::RegenerationPolicy;
use nexus::metrics::{ActivityLevel, ActivitySnapshot};
use nexus::model::{Alert, AlertCacheEntry, EntityKey, Severity};
use nexus::store::Store;
use nexus::views::RepositorySummary;
use pretty_assertions::assert_eq;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const LEASE: Duration = Duration::from_secs(60);

const ONE_ALERT: &str = r#"[{"id":"fresh","title":"New alert","description":"From the generator","severity":"warning"}]"#;

struct CountingGenerator {
    calls: AtomicUsize,
    delay: Duration,
    response: Result<String, InsightError>,
    last_payload: Mutex<Option<InsightPayload>>,
}

impl CountingGenerator {
    fn replying(response: &str) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            delay: Duration::ZERO,
            response: Ok(response.to_string()),
            last_payload: Mutex::new(None),
        }
    }

    fn failing(error: InsightError) -> Self {
        Self {
            response: Err(error),
            ..Self::replying("")
        }
    }

    fn slow(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn last_payload(&self) -> Option<InsightPayload> {
        self.last_payload.lock().unwrap().clone()
    }
}

#[async_trait]
impl InsightGenerator for CountingGenerator {
    async fn generate(&self, payload: &InsightPayload) -> Result<String, InsightError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_payload.lock().unwrap() = Some(payload.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.response.clone()
    }
}

fn summary() -> EntitySummary {
    EntitySummary::Repository(RepositorySummary {
        id: "api".to_string(),
        name: "API".to_string(),
        description: String::new(),
        snapshot: ActivitySnapshot {
            total_commits: 3,
            contributors: 2,
            recent_commits: 3,
            activity: ActivityLevel::Low,
            knowledge_concentration: 67,
            last_commit: Some(days_ago(1)),
        },
        top_contributors: Vec::new(),
        hotspots: Vec::new(),
        dependencies: Vec::new(),
    })
}

fn request(reference: &str) -> AlertRequest {
    AlertRequest {
        key: EntityKey::repository("api"),
        reference: reference.to_string(),
        entity: summary(),
        now: now(),
    }
}

fn old_alert() -> Alert {
    Alert {
        id: "old".to_string(),
        title: "Previous alert".to_string(),
        description: "Generated for pr-10".to_string(),
        severity: Severity::Info,
        category: None,
        suggested_actions: None,
    }
}

fn seeded_store() -> Arc<MemoryAlertStore> {
    let store = Arc::new(MemoryAlertStore::new());
    store.seed(AlertCacheEntry {
        key: EntityKey::repository("api"),
        reference: "pr-10".to_string(),
        alerts: vec![old_alert()],
        content_hash: "seed".to_string(),
        generated_at: days_ago(2),
    });
    store
}

fn controller(
    store: Arc<MemoryAlertStore>,
    generator: Arc<CountingGenerator>,
    timeout: Duration,
    policy: RegenerationPolicy,
) -> AlertCacheController {
    AlertCacheController::new(store, generator, timeout, policy)
}

#[tokio::test]
async fn matching_reference_is_served_without_generation() {
    let generator = Arc::new(CountingGenerator::replying(ONE_ALERT));
    let alerts = controller(seeded_store(), generator.clone(), Duration::from_secs(5), RegenerationPolicy::Wait);

    let outcome = alerts.alerts(request("pr-10")).await.unwrap();
    assert_eq!(outcome.freshness, Freshness::Fresh);
    assert_eq!(outcome.alerts, vec![old_alert()]);
    assert_eq!(outcome.reference.as_deref(), Some("pr-10"));
    assert_eq!(generator.calls(), 0);
}

#[tokio::test]
async fn reference_change_regenerates_once() {
    let store = seeded_store();
    let generator = Arc::new(CountingGenerator::replying(ONE_ALERT));
    let alerts = controller(store.clone(), generator.clone(), Duration::from_secs(5), RegenerationPolicy::Wait);

    let outcome = alerts.alerts(request("pr-11")).await.unwrap();
    assert_eq!(outcome.freshness, Freshness::Fresh);
    assert_eq!(outcome.reference.as_deref(), Some("pr-11"));
    assert_eq!(outcome.alerts.len(), 1);
    assert_eq!(outcome.alerts[0].id, "fresh");
    assert_eq!(outcome.alerts[0].severity, Severity::Warning);
    assert_eq!(generator.calls(), 1);

    let stored = store.load(&EntityKey::repository("api")).unwrap().unwrap();
    assert_eq!(stored.reference, "pr-11");
    assert_eq!(stored.generated_at, now());
    assert!(!store.is_in_flight(&EntityKey::repository("api")));

    // Served from the cache from now on.
    let again = alerts.alerts(request("pr-11")).await.unwrap();
    assert_eq!(again.alerts, outcome.alerts);
    assert_eq!(generator.calls(), 1);
}

#[tokio::test]
async fn generator_sees_prior_state_and_context() {
    let store = seeded_store();
    let generator = Arc::new(CountingGenerator::replying("[]"));
    let alerts = controller(store.clone(), generator.clone(), Duration::from_secs(5), RegenerationPolicy::Wait);

    let outcome = alerts.alerts(request("pr-11")).await.unwrap();
    assert!(outcome.alerts.is_empty());

    let payload = generator.last_payload().unwrap();
    assert_eq!(payload.reference, "pr-11");
    assert_eq!(payload.prior.reference.as_deref(), Some("pr-10"));
    assert_eq!(payload.prior.alerts, vec![old_alert()]);
    assert_eq!(payload.context.current_date, now().date_naive());
    assert!(payload.context.categories.iter().any(|c| c == "knowledge-concentration"));

    let stored = store.load(&EntityKey::repository("api")).unwrap().unwrap();
    assert_eq!(stored.content_hash, payload.content_hash());
    assert_eq!(stored.content_hash.len(), 64);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_readers_share_one_generation() {
    let store = seeded_store();
    let generator = Arc::new(CountingGenerator::replying(ONE_ALERT).slow(Duration::from_millis(150)));
    let alerts = Arc::new(controller(
        store.clone(),
        generator.clone(),
        Duration::from_secs(5),
        RegenerationPolicy::Wait,
    ));

    let tasks = (0..8).map(|_| {
        let alerts = Arc::clone(&alerts);
        tokio::spawn(async move { alerts.alerts(request("pr-11")).await })
    });
    let outcomes: Vec<_> = join_all(tasks).await;

    assert_eq!(generator.calls(), 1);
    for outcome in outcomes {
        let outcome = outcome.unwrap().unwrap();
        assert_eq!(outcome.freshness, Freshness::Fresh);
        assert_eq!(outcome.reference.as_deref(), Some("pr-11"));
        assert_eq!(outcome.alerts[0].id, "fresh");
    }
}

#[tokio::test]
async fn concurrent_futures_on_one_task_share_one_generation() {
    let generator = Arc::new(CountingGenerator::replying(ONE_ALERT).slow(Duration::from_millis(50)));
    let alerts = controller(
        Arc::new(MemoryAlertStore::new()),
        generator.clone(),
        Duration::from_secs(5),
        RegenerationPolicy::Wait,
    );

    let outcomes = join_all((0..5).map(|_| alerts.alerts(request("pr-1")))).await;
    assert_eq!(generator.calls(), 1);
    assert!(outcomes.iter().all(|o| o.as_ref().unwrap().freshness == Freshness::Fresh));
}

#[tokio::test]
async fn timeout_degrades_to_previous_collection() {
    let store = seeded_store();
    let generator = Arc::new(CountingGenerator::replying(ONE_ALERT).slow(Duration::from_millis(500)));
    let timeout = Duration::from_millis(50);
    let alerts = controller(store.clone(), generator.clone(), timeout, RegenerationPolicy::Wait);

    let outcome = alerts.alerts(request("pr-11")).await.unwrap();
    assert!(outcome.is_degraded());
    assert_eq!(outcome.alerts, vec![old_alert()]);
    assert_eq!(outcome.reference.as_deref(), Some("pr-10"));
    assert_eq!(outcome.error, Some(InsightError::Timeout(timeout)));

    // The previous entry survives and regeneration is allowed again.
    let key = EntityKey::repository("api");
    assert_eq!(store.load(&key).unwrap().unwrap().reference, "pr-10");
    assert!(!store.is_in_flight(&key));
}

#[tokio::test]
async fn malformed_response_degrades_with_empty_alerts_when_nothing_cached() {
    let generator = Arc::new(CountingGenerator::replying("I am not JSON"));
    let alerts = controller(
        Arc::new(MemoryAlertStore::new()),
        generator.clone(),
        Duration::from_secs(5),
        RegenerationPolicy::Wait,
    );

    let outcome = alerts.alerts(request("pr-1")).await.unwrap();
    assert_eq!(outcome.freshness, Freshness::Degraded);
    assert!(outcome.alerts.is_empty());
    assert_eq!(outcome.reference, None);
    assert!(matches!(outcome.error, Some(InsightError::MalformedResponse(_))));
}

#[tokio::test]
async fn generator_failure_is_retried_on_next_read() {
    let store = seeded_store();
    let generator = Arc::new(CountingGenerator::failing(InsightError::Failure("upstream 503".to_string())));
    let alerts = controller(store.clone(), generator.clone(), Duration::from_secs(5), RegenerationPolicy::Wait);

    let first = alerts.alerts(request("pr-11")).await.unwrap();
    assert!(first.is_degraded());
    assert_eq!(first.alerts, vec![old_alert()]);
    assert_eq!(first.error, Some(InsightError::Failure("upstream 503".to_string())));

    let second = alerts.alerts(request("pr-11")).await.unwrap();
    assert!(second.is_degraded());
    assert_eq!(generator.calls(), 2);
}

#[tokio::test]
async fn serve_stale_returns_cached_while_refreshing() {
    let store = seeded_store();
    let generator = Arc::new(CountingGenerator::replying(ONE_ALERT).slow(Duration::from_millis(50)));
    let alerts = controller(store.clone(), generator.clone(), Duration::from_secs(5), RegenerationPolicy::ServeStale);
    assert_eq!(alerts.policy(), RegenerationPolicy::ServeStale);

    let outcome = alerts.alerts(request("pr-11")).await.unwrap();
    assert_eq!(outcome.freshness, Freshness::Refreshing);
    assert_eq!(outcome.alerts, vec![old_alert()]);
    assert_eq!(outcome.reference.as_deref(), Some("pr-10"));

    let key = EntityKey::repository("api");
    let mut regenerated = false;
    for _ in 0..100 {
        if store.load(&key).unwrap().is_some_and(|e| e.reference == "pr-11") {
            regenerated = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(regenerated, "background generation never completed");

    let fresh = alerts.alerts(request("pr-11")).await.unwrap();
    assert_eq!(fresh.freshness, Freshness::Fresh);
    assert_eq!(fresh.alerts[0].id, "fresh");
    assert_eq!(generator.calls(), 1);
}

#[tokio::test]
async fn serve_stale_without_cache_waits() {
    let generator = Arc::new(CountingGenerator::replying(ONE_ALERT));
    let alerts = controller(
        Arc::new(MemoryAlertStore::new()),
        generator.clone(),
        Duration::from_secs(5),
        RegenerationPolicy::ServeStale,
    );

    let outcome = alerts.alerts(request("pr-1")).await.unwrap();
    assert_eq!(outcome.freshness, Freshness::Fresh);
    assert_eq!(outcome.alerts.len(), 1);
}

#[tokio::test]
async fn generation_owned_elsewhere_serves_cached_as_refreshing() {
    let store = seeded_store();
    let key = EntityKey::repository("api");
    assert!(store.try_begin(&key, LEASE).unwrap());

    let generator = Arc::new(CountingGenerator::replying(ONE_ALERT));
    let alerts = controller(store.clone(), generator.clone(), Duration::from_secs(5), RegenerationPolicy::Wait);

    let outcome = alerts.alerts(request("pr-11")).await.unwrap();
    assert_eq!(outcome.freshness, Freshness::Refreshing);
    assert_eq!(outcome.alerts, vec![old_alert()]);
    assert_eq!(generator.calls(), 0);
}

#[test]
fn sqlite_store_compare_and_set() {
    let store = Store::open_in_memory().unwrap();
    let key = EntityKey::person("ana@example.com");

    assert!(store.try_begin(&key, LEASE).unwrap());
    assert!(!store.try_begin(&key, LEASE).unwrap());
    // A placeholder row has no reference and is not a cache entry.
    assert_eq!(store.load(&key).unwrap(), None);

    store.abandon(&key).unwrap();
    assert!(store.try_begin(&key, LEASE).unwrap());

    let entry = AlertCacheEntry {
        key: key.clone(),
        reference: "c1".to_string(),
        alerts: vec![old_alert()],
        content_hash: "abc".to_string(),
        generated_at: now(),
    };
    store.complete(&entry).unwrap();
    assert_eq!(store.load(&key).unwrap(), Some(entry.clone()));

    // Beginning again keeps the entry readable.
    assert!(store.try_begin(&key, LEASE).unwrap());
    assert_eq!(store.load(&key).unwrap(), Some(entry));
    store.abandon(&key).unwrap();

    let other = EntityKey::repository("ana@example.com");
    assert_eq!(store.load(&other).unwrap(), None);
}

fn entry_for(key: &EntityKey, reference: &str) -> AlertCacheEntry {
    AlertCacheEntry {
        key: key.clone(),
        reference: reference.to_string(),
        alerts: vec![old_alert()],
        content_hash: "abc".to_string(),
        generated_at: now(),
    }
}

#[test]
fn in_flight_marker_is_leased_across_store_handles() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nexus.db");
    let key = EntityKey::repository("api");

    let first = Store::open(&path).unwrap();
    let second = Store::open(&path).unwrap();
    assert!(first.try_begin(&key, LEASE).unwrap());
    assert!(!second.try_begin(&key, LEASE).unwrap());

    // Only the handle that took the marker can release it.
    second.abandon(&key).unwrap();
    assert!(!second.try_begin(&key, LEASE).unwrap());

    // Opening the database again leaves a live marker alone.
    drop(second);
    let reopened = Store::open(&path).unwrap();
    assert!(!reopened.try_begin(&key, LEASE).unwrap());

    // Once the lease has run out another handle takes over.
    assert!(reopened.try_begin(&key, Duration::ZERO).unwrap());
    assert!(!first.try_begin(&key, LEASE).unwrap());

    // A late result from the old owner is stored but does not free the new owner's marker.
    first.complete(&entry_for(&key, "pr-11")).unwrap();
    assert_eq!(first.load(&key).unwrap().unwrap().reference, "pr-11");
    assert!(!first.try_begin(&key, LEASE).unwrap());

    reopened.abandon(&key).unwrap();
    assert!(first.try_begin(&key, LEASE).unwrap());
}

#[tokio::test]
async fn second_process_does_not_start_a_duplicate_generation() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nexus.db");
    let key = EntityKey::repository("api");

    let owner = Store::open(&path).unwrap();
    assert!(owner.try_begin(&key, LEASE).unwrap());

    let other: Arc<Store> = Arc::new(Store::open(&path).unwrap());
    let generator = Arc::new(CountingGenerator::replying(ONE_ALERT));
    let alerts = AlertCacheController::new(other, generator.clone(), Duration::from_secs(5), RegenerationPolicy::Wait);

    let outcome = alerts.alerts(request("pr-11")).await.unwrap();
    assert_eq!(outcome.freshness, Freshness::Refreshing);
    assert_eq!(outcome.reference, None);
    assert_eq!(generator.calls(), 0);

    // The owning process finishes; its result is served as fresh.
    owner.complete(&entry_for(&key, "pr-11")).unwrap();
    let outcome = alerts.alerts(request("pr-11")).await.unwrap();
    assert_eq!(outcome.freshness, Freshness::Fresh);
    assert_eq!(outcome.alerts, vec![old_alert()]);
    assert_eq!(generator.calls(), 0);
}

#[tokio::test]
async fn newer_reference_does_not_join_an_older_generation() {
    let store = seeded_store();
    let generator = Arc::new(CountingGenerator::replying(ONE_ALERT).slow(Duration::from_millis(150)));
    let alerts = Arc::new(controller(
        store.clone(),
        generator.clone(),
        Duration::from_secs(5),
        RegenerationPolicy::Wait,
    ));

    let first = {
        let alerts = Arc::clone(&alerts);
        tokio::spawn(async move { alerts.alerts(request("pr-11")).await })
    };
    tokio::time::sleep(Duration::from_millis(30)).await;

    let second = alerts.alerts(request("pr-12")).await.unwrap();
    assert_eq!(second.freshness, Freshness::Fresh);
    assert_eq!(second.reference.as_deref(), Some("pr-12"));
    assert_eq!(generator.calls(), 2);

    let payload = generator.last_payload().unwrap();
    assert_eq!(payload.reference, "pr-12");
    assert_eq!(payload.prior.reference.as_deref(), Some("pr-11"));

    let first = first.await.unwrap().unwrap();
    assert_eq!(first.freshness, Freshness::Fresh);
    assert_eq!(first.reference.as_deref(), Some("pr-11"));
    assert_eq!(store.load(&EntityKey::repository("api")).unwrap().unwrap().reference, "pr-12");
}

#[tokio::test]
async fn drain_lets_background_generation_finish() {
    let store = seeded_store();
    let generator = Arc::new(CountingGenerator::replying(ONE_ALERT).slow(Duration::from_millis(100)));
    let alerts = controller(store.clone(), generator.clone(), Duration::from_secs(5), RegenerationPolicy::ServeStale);

    let outcome = alerts.alerts(request("pr-11")).await.unwrap();
    assert_eq!(outcome.freshness, Freshness::Refreshing);

    // A different reference is never labelled fresh with the running generation's result.
    let newer = alerts.alerts(request("pr-12")).await.unwrap();
    assert_eq!(newer.freshness, Freshness::Refreshing);
    assert_eq!(newer.reference.as_deref(), Some("pr-10"));

    alerts.drain().await;
    let key = EntityKey::repository("api");
    assert_eq!(store.load(&key).unwrap().unwrap().reference, "pr-11");
    assert!(!store.is_in_flight(&key));
    assert_eq!(generator.calls(), 1);

    // Nothing left to wait for.
    alerts.drain().await;
    assert_eq!(generator.calls(), 1);
}

#[tokio::test]
async fn controller_runs_against_sqlite_store() {
    let store: Arc<Store> = Arc::new(Store::open_in_memory().unwrap());
    let generator = Arc::new(CountingGenerator::replying(ONE_ALERT));
    let alerts = AlertCacheController::new(
        store.clone(),
        generator.clone(),
        Duration::from_secs(5),
        RegenerationPolicy::Wait,
    );

    let first = alerts.alerts(request("pr-11")).await.unwrap();
    assert_eq!(first.freshness, Freshness::Fresh);
    let second = alerts.alerts(request("pr-11")).await.unwrap();
    assert_eq!(second.alerts, first.alerts);
    assert_eq!(generator.calls(), 1);

    let stored = store.load(&EntityKey::repository("api")).unwrap().unwrap();
    assert_eq!(stored.generated_at, now());
}
