use crate::error::Result;
use crate::model::{AlertCacheEntry, EntityKey};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Keyed alert cache with a leased in-flight marker per entity.
///
/// `try_begin` is the compare-and-set that gates regeneration: it takes the
/// marker when it is clear or its lease has run out and reports whether this
/// caller won. Only the winner may call `complete` or `abandon` for that key.
pub trait AlertStore: Send + Sync {
    /// Last completed entry, whatever reference it was generated for.
    fn load(&self, key: &EntityKey) -> Result<Option<AlertCacheEntry>>;

    /// A marker older than `lease` belongs to a generation that died.
    fn try_begin(&self, key: &EntityKey, lease: Duration) -> Result<bool>;

    /// Persist a finished generation and release the marker.
    fn complete(&self, entry: &AlertCacheEntry) -> Result<()>;

    /// Release the marker and keep the previous entry.
    fn abandon(&self, key: &EntityKey) -> Result<()>;
}

#[derive(Default)]
struct Slot {
    entry: Option<AlertCacheEntry>,
    started: Option<Instant>,
}

/// Process-local store, used by tests and by callers without a database.
#[derive(Default)]
pub struct MemoryAlertStore {
    slots: Mutex<HashMap<EntityKey, Slot>>,
}

impl MemoryAlertStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Put a completed entry in place, as if an earlier generation had finished.
    pub fn seed(&self, entry: AlertCacheEntry) {
        let key = entry.key.clone();
        self.slots().entry(key).or_default().entry = Some(entry);
    }

    pub fn is_in_flight(&self, key: &EntityKey) -> bool {
        self.slots().get(key).is_some_and(|slot| slot.started.is_some())
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<EntityKey, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl AlertStore for MemoryAlertStore {
    fn load(&self, key: &EntityKey) -> Result<Option<AlertCacheEntry>> {
        Ok(self.slots().get(key).and_then(|slot| slot.entry.clone()))
    }

    fn try_begin(&self, key: &EntityKey, lease: Duration) -> Result<bool> {
        let mut slots = self.slots();
        let slot = slots.entry(key.clone()).or_default();
        if slot.started.is_some_and(|started| started.elapsed() < lease) {
            return Ok(false);
        }
        slot.started = Some(Instant::now());
        Ok(true)
    }

    fn complete(&self, entry: &AlertCacheEntry) -> Result<()> {
        let mut slots = self.slots();
        let slot = slots.entry(entry.key.clone()).or_default();
        slot.entry = Some(entry.clone());
        slot.started = None;
        Ok(())
    }

    fn abandon(&self, key: &EntityKey) -> Result<()> {
        if let Some(slot) = self.slots().get_mut(key) {
            slot.started = None;
        }
        Ok(())
    }
}
