//! Cache store: keyed request state with reference-counted eviction.
//!
//! Every [`CacheKey`] maps to at most one live slot. A slot holds the
//! [`CacheEntry`], the arguments it was created with (needed to refetch it
//! later), and a `watch` channel that publishes a snapshot after every
//! transition. All writes to a slot go through [`CacheStore::update`] and
//! happen under the map's per-shard lock, so writes to one key never interleave.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::debug;

use crate::config::QueryConfig;
use crate::error::ApiError;
use crate::key::CacheKey;

/// Lifecycle of a cache entry.
///
/// Transitions only along `Idle → Loading → {Success, Error} → Loading → …`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStatus {
    Idle,
    Loading,
    Success,
    Error,
}

/// A cached request state.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub status: QueryStatus,
    /// Last successful response body. Kept across refetches and errors.
    pub data: Option<Value>,
    pub error: Option<ApiError>,
    pub fetched_at: Option<Instant>,
    pub is_stale: bool,
    pub subscribers: usize,
    /// Incremented on every dispatch; a result only commits for the current generation.
    pub generation: u64,
    /// Highest generation that was in flight when the entry was invalidated.
    /// Its result commits but leaves the entry stale.
    pub invalidated_generation: u64,
    /// When the subscriber count last reached zero.
    pub idle_since: Option<Instant>,
}

impl CacheEntry {
    /// Creates an `Idle` entry with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self {
            status: QueryStatus::Idle,
            data: None,
            error: None,
            fetched_at: None,
            is_stale: false,
            subscribers: 0,
            generation: 0,
            invalidated_generation: 0,
            idle_since: Some(Instant::now()),
        }
    }

    /// Checks whether this entry can be served without a network call.
    #[must_use]
    pub fn is_fresh(&self, stale_time: Duration) -> bool {
        self.status == QueryStatus::Success
            && !self.is_stale
            && self
                .fetched_at
                .is_some_and(|fetched| fetched.elapsed() <= stale_time)
    }

    /// Marks this entry as stale without dropping its data.
    pub const fn mark_stale(&mut self) {
        self.is_stale = true;
    }

    /// Checks if this entry should be evicted after `cache_time` without subscribers.
    #[must_use]
    pub fn should_gc(&self, cache_time: Duration) -> bool {
        self.subscribers == 0
            && self.status != QueryStatus::Loading
            && self
                .idle_since
                .is_some_and(|idle| idle.elapsed() >= cache_time)
    }

    fn begin_dispatch(&mut self) -> u64 {
        self.generation += 1;
        self.status = QueryStatus::Loading;
        self.generation
    }

    fn apply(&mut self, transition: Transition) -> Result<(), u64> {
        match transition {
            Transition::Dispatch => {
                self.begin_dispatch();
            }
            Transition::Resolve { generation, data } => {
                if generation != self.generation || self.status != QueryStatus::Loading {
                    return Err(self.generation);
                }
                self.status = QueryStatus::Success;
                self.data = Some(data);
                self.error = None;
                self.fetched_at = Some(Instant::now());
                self.is_stale = generation <= self.invalidated_generation;
                self.touch_idle();
            }
            Transition::Reject { generation, error } => {
                if generation != self.generation || self.status != QueryStatus::Loading {
                    return Err(self.generation);
                }
                self.status = QueryStatus::Error;
                self.error = Some(error);
                self.touch_idle();
            }
            Transition::Invalidate => {
                self.mark_stale();
                if self.status == QueryStatus::Loading {
                    self.invalidated_generation = self.generation;
                }
            }
        }
        Ok(())
    }

    /// Restarts the eviction grace period so a result that lands with nobody
    /// watching is still kept for one full `cache_time`.
    fn touch_idle(&mut self) {
        if self.subscribers == 0 {
            self.idle_since = Some(Instant::now());
        }
    }
}

impl Default for CacheEntry {
    fn default() -> Self {
        Self::new()
    }
}

/// A change applied to one entry.
#[derive(Debug, Clone)]
pub enum Transition {
    /// A new network call started; moves to `Loading` and bumps the generation.
    Dispatch,
    /// The call started at `generation` succeeded.
    Resolve { generation: u64, data: Value },
    /// The call started at `generation` failed.
    Reject { generation: u64, error: ApiError },
    /// Marks the entry stale, keeping its data. A call already in flight
    /// still commits its result, but the entry stays stale.
    Invalidate,
}

/// Outcome of [`CacheStore::update`].
#[derive(Debug, Clone)]
pub enum Commit {
    Applied(CacheEntry),
    /// A result arrived for a generation that a newer dispatch has replaced.
    StaleDispatchDiscarded { current: u64 },
    /// No entry exists for the key.
    Missing,
}

struct Slot {
    entry: CacheEntry,
    args: Value,
    tx: watch::Sender<CacheEntry>,
}

impl Slot {
    fn new(args: Value) -> Self {
        let entry = CacheEntry::new();
        let (tx, _rx) = watch::channel(entry.clone());
        Self { entry, args, tx }
    }

    fn publish(&self) {
        self.tx.send_replace(self.entry.clone());
    }
}

/// Process-wide store of cache entries.
pub struct CacheStore {
    slots: DashMap<CacheKey, Slot>,
    config: QueryConfig,
}

impl std::fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore")
            .field("entries", &self.slots.len())
            .field("config", &self.config)
            .finish()
    }
}

impl CacheStore {
    #[must_use]
    pub fn new(config: QueryConfig) -> Self {
        Self {
            slots: DashMap::new(),
            config,
        }
    }

    #[must_use]
    pub const fn config(&self) -> &QueryConfig {
        &self.config
    }

    /// Returns the entry for `key`, creating an `Idle` one if absent.
    pub fn get_or_create(&self, key: &CacheKey, args: &Value) -> CacheEntry {
        self.slots
            .entry(key.clone())
            .or_insert_with(|| Slot::new(args.clone()))
            .entry
            .clone()
    }

    #[must_use]
    pub fn snapshot(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.slots.get(key).map(|slot| slot.entry.clone())
    }

    /// The arguments the entry for `key` was created with.
    #[must_use]
    pub fn args(&self, key: &CacheKey) -> Option<Value> {
        self.slots.get(key).map(|slot| slot.args.clone())
    }

    /// Adds a subscriber to `key`, creating the entry if needed.
    ///
    /// Dropping the returned handle removes the subscriber again.
    pub fn subscribe(self: &Arc<Self>, key: &CacheKey, args: &Value) -> SubscriptionHandle {
        SubscriptionHandle {
            store: Arc::clone(self),
            key: key.clone(),
            rx: self.attach(key, args),
        }
    }

    fn attach(&self, key: &CacheKey, args: &Value) -> watch::Receiver<CacheEntry> {
        let rx = {
            let mut slot = self
                .slots
                .entry(key.clone())
                .or_insert_with(|| Slot::new(args.clone()));
            slot.entry.subscribers += 1;
            slot.entry.idle_since = None;
            slot.publish();
            slot.tx.subscribe()
        };
        debug!(%key, "subscribed");
        rx
    }

    fn release(&self, key: &CacheKey) {
        if let Some(mut slot) = self.slots.get_mut(key) {
            slot.entry.subscribers = slot.entry.subscribers.saturating_sub(1);
            if slot.entry.subscribers == 0 {
                slot.entry.idle_since = Some(Instant::now());
            }
            slot.publish();
        }
        debug!(%key, "unsubscribed");
    }

    /// Applies one transition to the entry for `key` and notifies its subscribers.
    pub fn update(&self, key: &CacheKey, transition: Transition) -> Commit {
        let Some(mut slot) = self.slots.get_mut(key) else {
            return Commit::Missing;
        };
        match slot.entry.apply(transition) {
            Ok(()) => {
                slot.publish();
                Commit::Applied(slot.entry.clone())
            }
            Err(current) => Commit::StaleDispatchDiscarded { current },
        }
    }

    /// Creates the entry if needed and moves it to `Loading`.
    ///
    /// Returns the generation of the new dispatch.
    pub fn dispatch(&self, key: &CacheKey, args: &Value) -> u64 {
        let mut slot = self
            .slots
            .entry(key.clone())
            .or_insert_with(|| Slot::new(args.clone()));
        let generation = slot.entry.begin_dispatch();
        slot.publish();
        generation
    }

    /// Marks the entry stale. Shorthand for [`Transition::Invalidate`].
    pub fn invalidate(&self, key: &CacheKey) -> Option<CacheEntry> {
        match self.update(key, Transition::Invalidate) {
            Commit::Applied(entry) => Some(entry),
            _ => None,
        }
    }

    /// All live keys belonging to the endpoint `endpoint`.
    #[must_use]
    pub fn keys_for_endpoint(&self, endpoint: &str) -> Vec<CacheKey> {
        self.slots
            .iter()
            .filter(|slot| slot.key().endpoint() == endpoint)
            .map(|slot| slot.key().clone())
            .collect()
    }

    /// Removes entries that have had no subscribers for longer than `cache_time`.
    ///
    /// Entries with a request in flight are kept. Returns how many were removed.
    pub fn evict_unused(&self) -> usize {
        let cache_time = self.config.cache_time;
        let before = self.slots.len();
        self.slots.retain(|key, slot| {
            let evict = slot.entry.should_gc(cache_time);
            if evict {
                debug!(%key, "evicting unused entry");
            }
            !evict
        });
        before.saturating_sub(self.slots.len())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// One subscriber's hold on a cache entry.
///
/// Keeps the entry alive while it exists and observes its transitions.
pub struct SubscriptionHandle {
    store: Arc<CacheStore>,
    key: CacheKey,
    rx: watch::Receiver<CacheEntry>,
}

impl SubscriptionHandle {
    #[must_use]
    pub const fn key(&self) -> &CacheKey {
        &self.key
    }

    /// The most recently published state of the entry.
    #[must_use]
    pub fn current(&self) -> CacheEntry {
        self.rx.borrow().clone()
    }

    /// Waits for the next transition and returns the new state.
    ///
    /// Returns `None` if the entry was removed from the store.
    pub async fn changed(&mut self) -> Option<CacheEntry> {
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }

    /// Moves this subscription to `key`, releasing the current key first.
    pub fn rebind(&mut self, key: &CacheKey, args: &Value) {
        if key == &self.key {
            return;
        }
        self.store.release(&self.key);
        self.rx = self.store.attach(key, args);
        self.key = key.clone();
    }

    pub(crate) fn receiver(&self) -> watch::Receiver<CacheEntry> {
        self.rx.clone()
    }
}

impl std::fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.store.release(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store(cache_time: Duration) -> Arc<CacheStore> {
        Arc::new(CacheStore::new(QueryConfig::new(
            Duration::from_secs(30),
            cache_time,
        )))
    }

    fn key() -> CacheKey {
        CacheKey::new("user-jobs", &Value::Null)
    }

    #[test]
    fn test_new_entry() {
        let entry = CacheEntry::new();
        assert_eq!(entry.status, QueryStatus::Idle);
        assert!(entry.data.is_none());
        assert!(!entry.is_stale);
        assert_eq!(entry.generation, 0);
    }

    #[tokio::test]
    async fn test_get_or_create_is_lazy_and_unique() {
        let store = store(Duration::from_secs(60));
        assert!(store.snapshot(&key()).is_none());

        let entry = store.get_or_create(&key(), &Value::Null);
        assert_eq!(entry.status, QueryStatus::Idle);
        store.get_or_create(&key(), &Value::Null);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_subscribe_counts_references() {
        let store = store(Duration::from_secs(60));
        let first = store.subscribe(&key(), &Value::Null);
        let second = store.subscribe(&key(), &Value::Null);
        assert_eq!(first.current().subscribers, 2);

        drop(first);
        assert_eq!(store.snapshot(&key()).map(|e| e.subscribers), Some(1));
        drop(second);
        let entry = store.snapshot(&key()).expect("entry survives until eviction");
        assert_eq!(entry.subscribers, 0);
        assert!(entry.idle_since.is_some());
    }

    #[tokio::test]
    async fn test_dispatch_resolve_cycle() {
        let store = store(Duration::from_secs(60));
        store.get_or_create(&key(), &Value::Null);

        let Commit::Applied(entry) = store.update(&key(), Transition::Dispatch) else {
            panic!("dispatch should apply");
        };
        assert_eq!(entry.status, QueryStatus::Loading);
        assert_eq!(entry.generation, 1);

        let commit = store.update(
            &key(),
            Transition::Resolve {
                generation: 1,
                data: json!({ "data": [] }),
            },
        );
        let Commit::Applied(entry) = commit else {
            panic!("resolve should apply");
        };
        assert_eq!(entry.status, QueryStatus::Success);
        assert_eq!(entry.data, Some(json!({ "data": [] })));
        assert!(entry.is_fresh(Duration::from_secs(30)));
    }

    #[tokio::test]
    async fn test_older_generation_is_discarded() {
        let store = store(Duration::from_secs(60));
        store.get_or_create(&key(), &Value::Null);
        store.update(&key(), Transition::Dispatch);
        store.update(&key(), Transition::Dispatch);

        let commit = store.update(
            &key(),
            Transition::Resolve {
                generation: 1,
                data: json!("old"),
            },
        );
        assert!(matches!(
            commit,
            Commit::StaleDispatchDiscarded { current: 2 }
        ));
        let entry = store.snapshot(&key()).expect("entry exists");
        assert_eq!(entry.status, QueryStatus::Loading);
        assert!(entry.data.is_none());
    }

    #[tokio::test]
    async fn test_dispatch_creates_missing_entry() {
        let store = store(Duration::from_secs(60));
        assert_eq!(store.dispatch(&key(), &Value::Null), 1);
        assert_eq!(store.dispatch(&key(), &Value::Null), 2);
        let entry = store.snapshot(&key()).expect("entry exists");
        assert_eq!(entry.status, QueryStatus::Loading);
        assert_eq!(store.args(&key()), Some(Value::Null));
    }

    #[tokio::test]
    async fn test_invalidate_keeps_data() {
        let store = store(Duration::from_secs(60));
        store.get_or_create(&key(), &Value::Null);
        store.update(&key(), Transition::Dispatch);
        store.update(
            &key(),
            Transition::Resolve {
                generation: 1,
                data: json!(1),
            },
        );

        let entry = store.invalidate(&key()).expect("entry exists");
        assert!(entry.is_stale);
        assert_eq!(entry.data, Some(json!(1)));
        assert!(!entry.is_fresh(Duration::from_secs(30)));
    }

    #[tokio::test]
    async fn test_invalidate_during_flight_survives_resolve() {
        let store = store(Duration::from_secs(60));
        store.get_or_create(&key(), &Value::Null);
        store.update(&key(), Transition::Dispatch);
        store.invalidate(&key());

        let Commit::Applied(entry) = store.update(
            &key(),
            Transition::Resolve {
                generation: 1,
                data: json!("before"),
            },
        ) else {
            panic!("resolve should apply");
        };
        assert_eq!(entry.status, QueryStatus::Success);
        assert_eq!(entry.data, Some(json!("before")));
        assert!(entry.is_stale);
        assert!(!entry.is_fresh(Duration::from_secs(30)));

        // A dispatch started after the invalidation clears it.
        store.update(&key(), Transition::Dispatch);
        let Commit::Applied(entry) = store.update(
            &key(),
            Transition::Resolve {
                generation: 2,
                data: json!("after"),
            },
        ) else {
            panic!("resolve should apply");
        };
        assert!(!entry.is_stale);
        assert!(entry.is_fresh(Duration::from_secs(30)));
    }

    #[tokio::test]
    async fn test_reject_keeps_last_data() {
        let store = store(Duration::from_secs(60));
        store.get_or_create(&key(), &Value::Null);
        store.update(&key(), Transition::Dispatch);
        store.update(
            &key(),
            Transition::Resolve {
                generation: 1,
                data: json!(1),
            },
        );
        store.update(&key(), Transition::Dispatch);
        store.update(
            &key(),
            Transition::Reject {
                generation: 2,
                error: ApiError::Http { status: 500 },
            },
        );

        let entry = store.snapshot(&key()).expect("entry exists");
        assert_eq!(entry.status, QueryStatus::Error);
        assert_eq!(entry.data, Some(json!(1)));
        assert_eq!(entry.error, Some(ApiError::Http { status: 500 }));
    }

    #[tokio::test]
    async fn test_update_missing_key() {
        let store = store(Duration::from_secs(60));
        assert!(matches!(
            store.update(&key(), Transition::Dispatch),
            Commit::Missing
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_evict_respects_subscribers_and_grace() {
        let store = store(Duration::from_secs(60));
        let handle = store.subscribe(&key(), &Value::Null);

        tokio::time::advance(Duration::from_secs(120)).await;
        assert_eq!(store.evict_unused(), 0);

        drop(handle);
        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(store.evict_unused(), 0);

        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(store.evict_unused(), 1);
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_evict_skips_loading_entries() {
        let store = store(Duration::from_secs(1));
        store.get_or_create(&key(), &Value::Null);
        store.update(&key(), Transition::Dispatch);

        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(store.evict_unused(), 0);
    }

    #[tokio::test]
    async fn test_handle_observes_transitions() {
        let store = store(Duration::from_secs(60));
        let mut handle = store.subscribe(&key(), &Value::Null);

        store.update(&key(), Transition::Dispatch);
        let entry = handle.changed().await.expect("entry should publish");
        assert_eq!(entry.status, QueryStatus::Loading);
    }

    #[tokio::test]
    async fn test_rebind_releases_old_key() {
        let store = store(Duration::from_secs(60));
        let other = CacheKey::new("user-jobs", &json!({ "page": 2 }));
        let mut handle = store.subscribe(&key(), &Value::Null);

        handle.rebind(&other, &json!({ "page": 2 }));
        assert_eq!(handle.key(), &other);
        assert_eq!(store.snapshot(&key()).map(|e| e.subscribers), Some(0));
        assert_eq!(handle.current().subscribers, 1);
        assert_eq!(store.args(&other), Some(json!({ "page": 2 })));

        drop(handle);
        assert_eq!(store.snapshot(&other).map(|e| e.subscribers), Some(0));
    }

    #[tokio::test]
    async fn test_keys_for_endpoint() {
        let store = store(Duration::from_secs(60));
        store.get_or_create(&CacheKey::new("user-jobs", &Value::Null), &Value::Null);
        store.get_or_create(&CacheKey::new("user-jobs", &json!({ "p": 1 })), &json!({ "p": 1 }));
        store.get_or_create(&CacheKey::new("jobs-stat", &Value::Null), &Value::Null);

        let mut keys = store.keys_for_endpoint("user-jobs");
        keys.sort();
        assert_eq!(keys.len(), 2);
        assert!(keys.iter().all(|k| k.endpoint() == "user-jobs"));
    }
}
