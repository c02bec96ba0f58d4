//! Cache Store Module
//!
//! Main cache engine: a key map over an entry arena, the expiration queue and
//! the handle of the sweep worker, all behind one lock.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{debug, info};

use crate::cache::{CacheStats, Entry, EntryId, EntrySlots, ExpirationQueue, Ttl};
use crate::config::CacheConfig;
use crate::error::Result;
use crate::tasks::SweepWorker;

/// Longest single sleep of the sweeper. Larger global TTLs or idle sleeps are
/// capped so the wake instant stays representable.
const MAX_SWEEPER_SLEEP: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Called with the key and value of every entry the sweeper evicts.
pub type ExpirationCallback<K, V> = Arc<dyn Fn(K, V) + Send + Sync>;

/// Consulted before evicting a due entry; `false` keeps it for another TTL.
pub type CheckExpirationCallback<K, V> = Arc<dyn Fn(&K, &V) -> bool + Send + Sync>;

/// Called once for every key newly inserted by a write.
pub type NewItemCallback<K, V> = Arc<dyn Fn(&K, &V) + Send + Sync>;

// == Cache State ==
/// Everything guarded by the cache lock.
pub(crate) struct CacheState<K, V> {
    items: HashMap<K, EntryId>,
    slots: EntrySlots<K, V>,
    queue: ExpirationQueue,
    global_ttl: Option<Duration>,
    skip_ttl_extension: bool,
    max_idle_sleep: Duration,
    overdue_sleep: Duration,
    /// When the sweeper is due to wake next
    next_wake: Instant,
    expiration_callback: Option<ExpirationCallback<K, V>>,
    check_expiration_callback: Option<CheckExpirationCallback<K, V>>,
    new_item_callback: Option<NewItemCallback<K, V>>,
    stats: CacheStats,
    /// `None` once the cache has been closed
    pub(crate) sweeper: Option<SweepWorker>,
}

impl<K, V> CacheState<K, V>
where
    K: Eq + Hash + Clone,
{
    pub(crate) fn new(config: &CacheConfig) -> Self {
        Self {
            items: HashMap::new(),
            slots: EntrySlots::new(),
            queue: ExpirationQueue::new(),
            global_ttl: config.global_ttl,
            skip_ttl_extension: config.skip_ttl_extension_on_read,
            max_idle_sleep: config.max_idle_sleep,
            overdue_sleep: config.overdue_sleep,
            next_wake: Instant::now(),
            expiration_callback: None,
            check_expiration_callback: None,
            new_item_callback: None,
            stats: CacheStats::new(),
            sweeper: None,
        }
    }

    // == Lookup ==
    /// Finds a live entry and refreshes it the way a read does.
    ///
    /// Returns the entry id and whether its deadline now falls before the
    /// sweeper's scheduled wake.
    fn lookup(&mut self, key: &K) -> Option<(EntryId, bool)> {
        let id = *self.items.get(key)?;
        if self.slots[id].is_expired() {
            return None;
        }

        let extend = !self.skip_ttl_extension;
        if self.slots[id].refresh(self.global_ttl, extend) {
            self.queue.update(&mut self.slots, id);
        }

        let wake_early = self.slots[id]
            .expire_at()
            .is_some_and(|deadline| deadline < self.next_wake);
        Some((id, wake_early))
    }

    // == Upsert ==
    /// Inserts or replaces an entry. Returns the id when the key is new.
    fn upsert(&mut self, key: K, value: V, ttl: Ttl) -> Option<EntryId> {
        let ttl = ttl.normalized();

        if let Some((id, _)) = self.lookup(&key) {
            let entry = &mut self.slots[id];
            entry.value = value;
            entry.ttl = ttl;
            entry.refresh(self.global_ttl, true);
            self.queue.update(&mut self.slots, id);
            return None;
        }

        // A due entry the sweeper has not reached yet is replaced outright.
        self.remove_entry(&key);

        let mut entry = Entry::new(key.clone(), value, ttl);
        entry.refresh(self.global_ttl, true);
        let id = self.slots.insert(entry);
        self.items.insert(key, id);
        self.queue.push(&mut self.slots, id);
        Some(id)
    }

    fn remove_entry(&mut self, key: &K) -> Option<Entry<K, V>> {
        let id = self.items.remove(key)?;
        self.queue.remove(&mut self.slots, id);
        self.slots.remove(id)
    }

    fn purge(&mut self) {
        self.items = HashMap::new();
        self.slots = EntrySlots::new();
        self.queue = ExpirationQueue::new();
    }

    // == Schedule Next Wake ==
    /// Computes how long the sweeper may sleep and records the wake instant.
    pub(crate) fn schedule_next_wake(&mut self) -> Duration {
        let now = Instant::now();
        let head_deadline = self
            .queue
            .peek()
            .and_then(|id| self.slots[id].expire_at());

        let sleep = match head_deadline {
            Some(deadline) => {
                let until = deadline.saturating_duration_since(now);
                let until = if until.is_zero() {
                    self.overdue_sleep
                } else {
                    until
                };
                match self.global_ttl {
                    Some(global) => until.min(global),
                    None => until,
                }
            }
            None => self.global_ttl.unwrap_or(self.max_idle_sleep),
        }
        .min(MAX_SWEEPER_SLEEP);

        self.next_wake = now + sleep;
        sleep
    }

    // == Evict Due ==
    /// Removes every due entry the check callback does not veto.
    ///
    /// Vetoed entries are touched and set aside until the pass ends, so a
    /// kept head never blocks the entries behind it and each due entry is
    /// looked at once per pass. Returns the evicted pairs when an expiration
    /// callback is set.
    pub(crate) fn evict_due(&mut self) -> Vec<(K, V)> {
        let check = self.check_expiration_callback.clone();
        let collect = self.expiration_callback.is_some();
        let mut evicted = Vec::new();
        let mut kept = Vec::new();
        let mut expired = 0usize;

        while let Some(id) = self.queue.peek() {
            if !self.slots[id].is_expired() {
                break;
            }
            self.queue.pop(&mut self.slots);

            if let Some(check) = &check {
                let entry = &self.slots[id];
                if !check(entry.key(), &entry.value) {
                    self.slots[id].touch();
                    self.stats.record_veto();
                    kept.push(id);
                    continue;
                }
            }

            if let Some(entry) = self.slots.remove(id) {
                self.items.remove(entry.key());
                self.stats.record_expiration();
                expired += 1;
                if collect {
                    evicted.push(entry.into_parts());
                }
            }
        }

        let vetoed = kept.len();
        for id in kept {
            self.queue.push(&mut self.slots, id);
        }

        if expired > 0 || vetoed > 0 {
            debug!(
                expired = expired,
                vetoed = vetoed,
                remaining = self.items.len(),
                "Sweep pass finished"
            );
        }
        evicted
    }

    pub(crate) fn expiration_callback(&self) -> Option<ExpirationCallback<K, V>> {
        self.expiration_callback.clone()
    }
}

/// State shared between cache handles and the sweep worker.
pub(crate) struct Shared<K, V> {
    pub(crate) state: Mutex<CacheState<K, V>>,
    /// Tells the sweeper to recompute its wake time
    pub(crate) wake: Notify,
}

// == TTL Cache ==
/// Thread-safe key/value cache with per-entry and global TTLs.
///
/// A single background worker sleeps until the earliest deadline and evicts
/// due entries. Writes and deadline-shortening reads wake it early so it can
/// retarget.
///
/// Dropping the cache closes it.
///
/// # Example
/// ```
/// use std::time::Duration;
/// use ttl_cache::{TtlCache, Ttl};
///
/// let cache = TtlCache::new();
/// cache.set_with_ttl("session", 7, Ttl::After(Duration::from_secs(60)));
/// assert_eq!(cache.get(&"session"), Some(7));
/// cache.close();
/// ```
pub struct TtlCache<K, V> {
    shared: Arc<Shared<K, V>>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone + Send + 'static,
    V: Clone + Send + 'static,
{
    // == Constructor ==
    /// Creates a cache with the default configuration.
    ///
    /// # Panics
    /// Panics if the sweep worker thread cannot be spawned.
    pub fn new() -> Self {
        Self::with_config(CacheConfig::default()).expect("Failed to start sweep worker")
    }

    /// Creates a cache and starts its sweep worker.
    pub fn with_config(config: CacheConfig) -> Result<Self> {
        config.validate()?;

        let shared = Arc::new(Shared {
            state: Mutex::new(CacheState::new(&config)),
            wake: Notify::new(),
        });
        let sweeper = SweepWorker::spawn(Arc::clone(&shared))?;
        shared.state.lock().sweeper = Some(sweeper);

        Ok(Self { shared })
    }

    // == Get ==
    /// Returns a copy of the value if the key is present and not expired.
    ///
    /// A hit extends the entry's deadline unless extension on read is
    /// disabled. A due entry the sweeper has not reached yet is a miss.
    ///
    /// # Returns
    /// - `Some(value)` on a hit
    /// - `None` if the key is absent or past its deadline
    pub fn get(&self, key: &K) -> Option<V> {
        let (value, wake_early) = {
            let mut state = self.shared.state.lock();
            match state.lookup(key) {
                Some((id, wake_early)) => {
                    state.stats.record_hit();
                    (Some(state.slots[id].value.clone()), wake_early)
                }
                None => {
                    state.stats.record_miss();
                    (None, false)
                }
            }
        };

        if wake_early {
            self.shared.wake.notify_one();
        }
        value
    }

    /// Returns the entry's TTL. Counts as a read.
    ///
    /// A `Global` entry reports `After(global)` once it has been promoted.
    pub fn get_ttl(&self, key: &K) -> Option<Ttl> {
        let (ttl, wake_early) = {
            let mut state = self.shared.state.lock();
            match state.lookup(key) {
                Some((id, wake_early)) => {
                    state.stats.record_hit();
                    (Some(state.slots[id].ttl), wake_early)
                }
                None => {
                    state.stats.record_miss();
                    (None, false)
                }
            }
        };

        if wake_early {
            self.shared.wake.notify_one();
        }
        ttl
    }

    // == Set ==
    /// Stores a value that follows the global TTL.
    pub fn set(&self, key: K, value: V) {
        self.set_with_ttl(key, value, Ttl::Global);
    }

    /// Stores a value with its own TTL.
    ///
    /// Existing keys keep their slot and have value and TTL replaced. The
    /// new-item callback only fires for keys that were not live.
    ///
    /// # Arguments
    /// * `key` - Key to insert or replace
    /// * `value` - Value to store
    /// * `ttl` - `After(d)` for a fixed TTL, `Global` to follow the cache-wide
    ///   TTL, `Never` to opt out of time-based expiry
    pub fn set_with_ttl(&self, key: K, value: V, ttl: Ttl) {
        let new_item = {
            let mut state = self.shared.state.lock();
            let created = state.upsert(key, value, ttl);
            match (created, state.new_item_callback.clone()) {
                (Some(id), Some(callback)) => {
                    let entry = &state.slots[id];
                    Some((callback, entry.key().clone(), entry.value.clone()))
                }
                _ => None,
            }
        };

        if let Some((callback, key, value)) = new_item {
            callback(&key, &value);
        }
        self.shared.wake.notify_one();
    }

    // == Remove ==
    /// Removes an entry without firing the expiration callback.
    ///
    /// # Returns
    /// - `true` if the key was present
    /// - `false` otherwise
    pub fn remove(&self, key: &K) -> bool {
        self.shared.state.lock().remove_entry(key).is_some()
    }

    /// Number of stored entries, including due ones not yet swept.
    pub fn count(&self) -> usize {
        self.shared.state.lock().items.len()
    }

    // == Global TTL ==
    /// Changes the TTL used by `Ttl::Global` entries. `Duration::ZERO`
    /// disables it.
    pub fn set_global_ttl(&self, ttl: Duration) {
        self.shared.state.lock().global_ttl = (!ttl.is_zero()).then_some(ttl);
        self.shared.wake.notify_one();
    }

    /// Current cache-wide TTL, `None` when disabled.
    pub fn global_ttl(&self) -> Option<Duration> {
        self.shared.state.lock().global_ttl
    }

    /// When true, reads no longer extend deadlines.
    pub fn set_skip_ttl_extension_on_read(&self, skip: bool) {
        self.shared.state.lock().skip_ttl_extension = skip;
    }

    // == Callbacks ==
    /// Sets the callback fired, asynchronously, for every evicted entry.
    pub fn set_expiration_callback<F>(&self, callback: F)
    where
        F: Fn(K, V) + Send + Sync + 'static,
    {
        self.shared.state.lock().expiration_callback = Some(Arc::new(callback));
    }

    /// Sets the callback deciding whether a due entry is evicted (`true`) or
    /// kept for another TTL (`false`).
    ///
    /// It runs on the sweeper while the cache lock is held and must not call
    /// back into the same cache.
    pub fn set_check_expiration_callback<F>(&self, callback: F)
    where
        F: Fn(&K, &V) -> bool + Send + Sync + 'static,
    {
        self.shared.state.lock().check_expiration_callback = Some(Arc::new(callback));
    }

    /// Sets the callback fired when a write inserts a new key.
    pub fn set_new_item_callback<F>(&self, callback: F)
    where
        F: Fn(&K, &V) + Send + Sync + 'static,
    {
        self.shared.state.lock().new_item_callback = Some(Arc::new(callback));
    }

    /// Removes the expiration callback. Entries already dispatched still run.
    pub fn clear_expiration_callback(&self) {
        self.shared.state.lock().expiration_callback = None;
    }

    /// Removes the check callback; due entries are then always evicted.
    pub fn clear_check_expiration_callback(&self) {
        self.shared.state.lock().check_expiration_callback = None;
    }

    /// Removes the new-item callback.
    pub fn clear_new_item_callback(&self) {
        self.shared.state.lock().new_item_callback = None;
    }

    // == Purge ==
    /// Removes every entry.
    pub fn purge(&self) {
        self.shared.state.lock().purge();
    }

    // == Close ==
    /// Stops the sweep worker and purges the cache.
    ///
    /// Blocks until the worker has exited. Later calls only purge; the cache
    /// keeps answering calls afterwards but nothing expires in the background.
    pub fn close(&self) {
        let sweeper = self.shared.state.lock().sweeper.take();
        if let Some(sweeper) = sweeper {
            sweeper.stop();
            info!("Cache closed");
        }
        self.purge();
    }

    /// Whether `close` has stopped the sweep worker.
    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().sweeper.is_none()
    }

    // == Stats ==
    /// Snapshot of the counters, with `total_entries` set to the current
    /// entry count.
    pub fn stats(&self) -> CacheStats {
        let state = self.shared.state.lock();
        let mut stats = state.stats.clone();
        stats.set_total_entries(state.items.len());
        stats
    }
}

impl<K, V> Default for TtlCache<K, V>
where
    K: Eq + Hash + Clone + Send + 'static,
    V: Clone + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> Drop for TtlCache<K, V> {
    fn drop(&mut self) {
        let sweeper = self.shared.state.lock().sweeper.take();
        if let Some(sweeper) = sweeper {
            sweeper.stop();
        }
    }
}
