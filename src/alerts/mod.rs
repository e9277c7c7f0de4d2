//! Cached insight alerts per repository or person.
//!
//! A cache entry is served as-is while its reference matches the entity's
//! current reference. Otherwise one regeneration is started per entity: an
//! in-process map of shared futures lets every local caller asking for the
//! same reference join the same generation, and the store's leased
//! compare-and-set keeps other processes from starting a second one.

mod generator;
mod http;
mod rules;
mod store;

pub use generator::{
    parse_alert_collection, EntitySummary, InsightContext, InsightError, InsightGenerator,
    InsightPayload, PriorState, ALERT_CATEGORIES,
};
pub use http::HttpGenerator;
pub use rules::RuleBasedGenerator;
pub use store::{AlertStore, MemoryAlertStore};

use crate::config::RegenerationPolicy;
use crate::error::{NexusError, Result};
use crate::model::{Alert, AlertCacheEntry, EntityKey};
use chrono::{DateTime, Utc};
use futures::future::{join_all, BoxFuture, FutureExt, Shared};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

static GENERATIONS: AtomicU64 = AtomicU64::new(0);

/// What a finished generation task produced.
#[derive(Debug, Clone)]
enum Generated {
    Entry(AlertCacheEntry),
    /// Another process holds the in-flight marker.
    OwnedElsewhere,
}

type GenerationResult = std::result::Result<Generated, InsightError>;
type Generation = Shared<BoxFuture<'static, GenerationResult>>;

#[derive(Clone)]
struct Running {
    id: u64,
    reference: String,
    generation: Generation,
}

type InFlight = Arc<Mutex<HashMap<EntityKey, Running>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Freshness {
    /// Generated for the current reference.
    Fresh,
    /// Older collection served while a regeneration runs.
    Refreshing,
    /// Regeneration failed; older collection (possibly empty) served instead.
    Degraded,
}

#[derive(Debug, Clone)]
pub struct AlertRequest {
    pub key: EntityKey,
    /// The entity's current reference identifier.
    pub reference: String,
    pub entity: EntitySummary,
    pub now: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct AlertOutcome {
    pub alerts: Vec<Alert>,
    /// Reference the served alerts were generated for.
    pub reference: Option<String>,
    pub freshness: Freshness,
    pub error: Option<InsightError>,
}

impl AlertOutcome {
    fn fresh(entry: AlertCacheEntry) -> Self {
        Self {
            alerts: entry.alerts,
            reference: Some(entry.reference),
            freshness: Freshness::Fresh,
            error: None,
        }
    }

    fn fallback(cached: Option<AlertCacheEntry>, freshness: Freshness, error: Option<InsightError>) -> Self {
        let (alerts, reference) = match cached {
            Some(entry) => (entry.alerts, Some(entry.reference)),
            None => (Vec::new(), None),
        };
        Self {
            alerts,
            reference,
            freshness,
            error,
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.freshness == Freshness::Degraded
    }
}

pub struct AlertCacheController {
    store: Arc<dyn AlertStore>,
    generator: Arc<dyn InsightGenerator>,
    timeout: Duration,
    policy: RegenerationPolicy,
    in_flight: InFlight,
}

impl AlertCacheController {
    pub fn new(
        store: Arc<dyn AlertStore>,
        generator: Arc<dyn InsightGenerator>,
        timeout: Duration,
        policy: RegenerationPolicy,
    ) -> Self {
        Self {
            store,
            generator,
            timeout,
            policy,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn policy(&self) -> RegenerationPolicy {
        self.policy
    }

    /// Alerts for the entity in `request`.
    ///
    /// Generator and store trouble during regeneration never surfaces as
    /// `Err`: the outcome falls back to the last cached collection, is marked
    /// degraded and carries the error. `Err` is reserved for reading the
    /// cache itself failing.
    pub async fn alerts(&self, request: AlertRequest) -> Result<AlertOutcome> {
        loop {
            let cached = self.store.load(&request.key)?;
            if let Some(entry) = cached.as_ref().filter(|e| e.reference == request.reference) {
                debug!(entity = %request.key, reference = %request.reference, "alert cache hit");
                return Ok(AlertOutcome::fresh(entry.clone()));
            }

            let (running, started) = {
                let mut in_flight = lock(&self.in_flight);
                match in_flight.get(&request.key) {
                    Some(running) => (running.clone(), false),
                    None => {
                        info!(
                            entity = %request.key,
                            previous = cached.as_ref().map(|e| e.reference.as_str()).unwrap_or("<none>"),
                            current = %request.reference,
                            "regenerating alerts"
                        );
                        let running = self.spawn_generation(request.clone(), cached.clone());
                        in_flight.insert(request.key.clone(), running.clone());
                        (running, true)
                    }
                }
            };

            if started || running.reference == request.reference {
                if !started {
                    debug!(entity = %request.key, "joining in-flight alert generation");
                }
                return self.settle(&request, cached, running.generation).await;
            }

            // The running generation targets an older reference; its result
            // cannot be served as fresh for this one.
            if self.policy == RegenerationPolicy::ServeStale && cached.is_some() {
                return Ok(AlertOutcome::fallback(cached, Freshness::Refreshing, None));
            }
            debug!(
                entity = %request.key,
                running = %running.reference,
                current = %request.reference,
                "waiting for generation of another reference"
            );
            let _ = running.generation.await;
        }
    }

    /// Wait for every generation started by this controller to finish.
    ///
    /// Background generations run on the async runtime; callers that are
    /// about to shut it down call this first so results still reach the store.
    pub async fn drain(&self) {
        let pending: Vec<Generation> = lock(&self.in_flight)
            .values()
            .map(|running| running.generation.clone())
            .collect();
        if !pending.is_empty() {
            debug!(pending = pending.len(), "waiting for alert generations");
            join_all(pending).await;
        }
    }

    async fn settle(
        &self,
        request: &AlertRequest,
        cached: Option<AlertCacheEntry>,
        generation: Generation,
    ) -> Result<AlertOutcome> {
        if self.policy == RegenerationPolicy::ServeStale && cached.is_some() {
            return Ok(AlertOutcome::fallback(cached, Freshness::Refreshing, None));
        }

        match generation.await {
            Ok(Generated::Entry(entry)) if entry.reference == request.reference => Ok(AlertOutcome::fresh(entry)),
            Ok(Generated::Entry(entry)) => Ok(AlertOutcome::fallback(Some(entry), Freshness::Refreshing, None)),
            Ok(Generated::OwnedElsewhere) => {
                debug!(entity = %request.key, "alert generation owned elsewhere");
                match self.store.load(&request.key)? {
                    Some(entry) if entry.reference == request.reference => Ok(AlertOutcome::fresh(entry)),
                    other => Ok(AlertOutcome::fallback(other, Freshness::Refreshing, None)),
                }
            }
            Err(error) => {
                // Re-read: a concurrent success for another reference may have landed.
                let cached = self.store.load(&request.key)?;
                Ok(AlertOutcome::fallback(cached, Freshness::Degraded, Some(error)))
            }
        }
    }

    /// Spawn the generation task. Called with the in-flight map locked; the
    /// task only touches the map again to remove its own entry.
    fn spawn_generation(&self, request: AlertRequest, cached: Option<AlertCacheEntry>) -> Running {
        let store = Arc::clone(&self.store);
        let generator = Arc::clone(&self.generator);
        let in_flight = Arc::clone(&self.in_flight);
        let timeout = self.timeout;
        let id = GENERATIONS.fetch_add(1, Ordering::Relaxed);

        let payload = InsightPayload {
            reference: request.reference.clone(),
            entity: request.entity,
            context: InsightContext::new(request.now.date_naive()),
            prior: cached
                .map(|entry| PriorState {
                    reference: Some(entry.reference),
                    alerts: entry.alerts,
                })
                .unwrap_or_default(),
        };
        let key = request.key;
        let now = request.now;

        let task = {
            let key = key.clone();
            tokio::spawn(async move {
                let result = generate_and_store(store.as_ref(), generator.as_ref(), &key, payload, now, timeout).await;
                if let Err(error) = &result {
                    warn!(entity = %key, %error, "alert generation failed");
                }
                let mut in_flight = lock(&in_flight);
                if in_flight.get(&key).is_some_and(|running| running.id == id) {
                    in_flight.remove(&key);
                }
                result
            })
        };

        let generation = task
            .map(|joined| {
                joined.unwrap_or_else(|e| Err(InsightError::Failure(format!("generation task aborted: {e}"))))
            })
            .boxed()
            .shared();
        Running {
            id,
            reference: request.reference,
            generation,
        }
    }
}

/// Take the store marker, call the generator and persist the result.
async fn generate_and_store(
    store: &dyn AlertStore,
    generator: &dyn InsightGenerator,
    key: &EntityKey,
    payload: InsightPayload,
    now: DateTime<Utc>,
    timeout: Duration,
) -> GenerationResult {
    if !store.try_begin(key, timeout).map_err(store_error)? {
        return Ok(Generated::OwnedElsewhere);
    }

    // Another process may have finished this reference before we took the marker.
    match store.load(key) {
        Ok(Some(entry)) if entry.reference == payload.reference => {
            store.abandon(key).map_err(store_error)?;
            return Ok(Generated::Entry(entry));
        }
        Ok(_) => {}
        Err(e) => {
            release(store, key);
            return Err(store_error(e));
        }
    }

    let alerts = match run_generation(generator, &payload, timeout).await {
        Ok(alerts) => alerts,
        Err(error) => {
            release(store, key);
            return Err(error);
        }
    };
    let entry = AlertCacheEntry {
        key: key.clone(),
        reference: payload.reference.clone(),
        alerts,
        content_hash: payload.content_hash(),
        generated_at: now,
    };
    if let Err(e) = store.complete(&entry) {
        release(store, key);
        return Err(store_error(e));
    }
    info!(entity = %key, reference = %entry.reference, alerts = entry.alerts.len(), "alerts regenerated");
    Ok(Generated::Entry(entry))
}

fn release(store: &dyn AlertStore, key: &EntityKey) {
    if let Err(e) = store.abandon(key) {
        warn!(entity = %key, error = %e, "failed to clear in-flight marker");
    }
}

fn store_error(error: NexusError) -> InsightError {
    InsightError::Store(error.to_string())
}

async fn run_generation(
    generator: &dyn InsightGenerator,
    payload: &InsightPayload,
    timeout: Duration,
) -> std::result::Result<Vec<Alert>, InsightError> {
    let raw = tokio::time::timeout(timeout, generator.generate(payload))
        .await
        .map_err(|_| InsightError::Timeout(timeout))??;
    parse_alert_collection(&raw)
}

fn lock(in_flight: &InFlight) -> MutexGuard<'_, HashMap<EntityKey, Running>> {
    in_flight.lock().unwrap_or_else(PoisonError::into_inner)
}
