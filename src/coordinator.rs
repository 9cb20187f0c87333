//! Request coordination: deduplication, freshness and last-dispatch-wins.
//!
//! # Queries
//!
//! 1. A fresh cached entry is returned without a network call
//! 2. If a request for the same key is already in flight, the caller joins it
//! 3. Otherwise the entry moves to `Loading` and one transport call is spawned
//!
//! The spawned call always runs to completion, even if every waiter goes
//! away, so its result is cached for the next subscriber.
//!
//! A forced refetch (after invalidation) supersedes the in-flight request for
//! its key. When the superseded call completes, the store rejects its result
//! as stale and its waiters are handed the outcome of the newer call instead.
//!
//! # Mutations
//!
//! Mutations are never cached or deduplicated. On success, invalidated
//! queries are marked stale and watched ones are dispatched again before the
//! mutation's own future resolves.

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use serde_json::Value;
use tracing::debug;

use crate::cache::{CacheStore, Commit, QueryStatus, Transition};
use crate::endpoint::{EndpointDescriptor, EndpointKind, EndpointRegistry, Tag};
use crate::error::ApiError;
use crate::invalidation::{InvalidationGraph, InvalidationPlan};
use crate::key::CacheKey;
use crate::transport::{RequestSpec, TransportAdapter};

type SharedResponse = Shared<BoxFuture<'static, Result<Value, ApiError>>>;

/// How a query fetch treats cached and in-flight state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchPolicy {
    /// Serve fresh cache, join an in-flight request, or dispatch.
    CacheFirst,
    /// Always dispatch, superseding any in-flight request for the key.
    Refetch,
}

/// The one outstanding transport call for a key.
struct InFlightRequest {
    generation: u64,
    response: SharedResponse,
}

/// Runs queries and mutations against the cache store and transport.
pub struct RequestCoordinator {
    store: Arc<CacheStore>,
    transport: TransportAdapter,
    registry: Arc<EndpointRegistry>,
    in_flight: DashMap<CacheKey, InFlightRequest>,
}

impl fmt::Debug for RequestCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestCoordinator")
            .field("store", &self.store)
            .field("transport", &self.transport)
            .field("in_flight", &self.in_flight.len())
            .finish_non_exhaustive()
    }
}

impl RequestCoordinator {
    pub fn new(
        store: Arc<CacheStore>,
        transport: TransportAdapter,
        registry: Arc<EndpointRegistry>,
    ) -> Self {
        Self {
            store,
            transport,
            registry,
            in_flight: DashMap::new(),
        }
    }

    #[must_use]
    pub const fn store(&self) -> &Arc<CacheStore> {
        &self.store
    }

    #[must_use]
    pub const fn registry(&self) -> &Arc<EndpointRegistry> {
        &self.registry
    }

    /// Number of keys with a transport call outstanding.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Executes `descriptor` with `args`, resolving to the response body.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns the transport error for failed calls, or [`ApiError::Decode`]
    /// if `args` do not fit the endpoint.
    pub async fn execute(
        self: &Arc<Self>,
        descriptor: &Arc<EndpointDescriptor>,
        args: Value,
    ) -> Result<Value, ApiError> {
        match descriptor.kind() {
            EndpointKind::Query => self.fetch(descriptor, args, FetchPolicy::CacheFirst).await,
            EndpointKind::Mutation { invalidates } => {
                self.mutate(descriptor, args, invalidates).await
            }
        }
    }

    /// Fetches a query under `policy`.
    ///
    /// # Errors
    ///
    /// See [`RequestCoordinator::execute`].
    pub async fn fetch(
        self: &Arc<Self>,
        descriptor: &Arc<EndpointDescriptor>,
        args: Value,
        policy: FetchPolicy,
    ) -> Result<Value, ApiError> {
        let key = CacheKey::new(descriptor.key(), &args);
        let entry = self.store.get_or_create(&key, &args);
        if policy == FetchPolicy::CacheFirst && entry.is_fresh(self.store.config().stale_time) {
            if let Some(data) = entry.data {
                debug!(%key, "cache hit");
                return Ok(data);
            }
        }
        self.start_or_join(&key, descriptor, &args, policy)?.await
    }

    /// Makes sure a watched entry is fresh, starting a background fetch if not.
    ///
    /// Returns `true` if a request was started or joined.
    pub(crate) fn ensure_fresh(
        self: &Arc<Self>,
        key: &CacheKey,
        descriptor: &Arc<EndpointDescriptor>,
        args: &Value,
    ) -> bool {
        let fresh = self
            .store
            .snapshot(key)
            .is_some_and(|entry| entry.is_fresh(self.store.config().stale_time));
        if fresh {
            return false;
        }
        self.dispatch_in_background(key, descriptor, args, FetchPolicy::CacheFirst)
    }

    /// Starts a fetch whose result only lands in the cache.
    pub(crate) fn dispatch_in_background(
        self: &Arc<Self>,
        key: &CacheKey,
        descriptor: &Arc<EndpointDescriptor>,
        args: &Value,
        policy: FetchPolicy,
    ) -> bool {
        match self.start_or_join(key, descriptor, args, policy) {
            Ok(_) => true,
            Err(error) => {
                // The resolver rejected the arguments; surface it on the entry.
                debug!(%key, %error, "request could not be resolved");
                let generation = self.store.dispatch(key, args);
                let commit = self.store.update(key, Transition::Reject { generation, error });
                if !matches!(commit, Commit::Applied(_)) {
                    debug!(%key, generation, ?commit, "resolve failure not recorded");
                }
                false
            }
        }
    }

    /// Joins the in-flight request for `key` or dispatches a new one.
    fn start_or_join(
        self: &Arc<Self>,
        key: &CacheKey,
        descriptor: &Arc<EndpointDescriptor>,
        args: &Value,
        policy: FetchPolicy,
    ) -> Result<SharedResponse, ApiError> {
        let spec = descriptor.resolve(args)?;

        let entry = self.in_flight.entry(key.clone());
        if let Entry::Occupied(ref current) = entry {
            if policy == FetchPolicy::CacheFirst {
                debug!(%key, generation = current.get().generation, "joining in-flight request");
                return Ok(current.get().response.clone());
            }
        }

        let generation = self.store.dispatch(key, args);
        debug!(%key, generation, ?policy, "dispatching");

        let task = tokio::spawn(Arc::clone(self).run(key.clone(), generation, spec));
        let response: SharedResponse = async move {
            task.await
                .unwrap_or_else(|e| Err(ApiError::Network(format!("request task failed: {e}"))))
        }
        .boxed()
        .shared();

        let request = InFlightRequest {
            generation,
            response: response.clone(),
        };
        match entry {
            Entry::Occupied(mut current) => {
                current.insert(request);
            }
            Entry::Vacant(slot) => {
                slot.insert(request);
            }
        }
        Ok(response)
    }

    /// Performs one transport call and commits its result.
    async fn run(self: Arc<Self>, key: CacheKey, generation: u64, spec: RequestSpec) -> Result<Value, ApiError> {
        let result = self.transport.send(&spec, None).await;
        let transition = match &result {
            Ok(data) => Transition::Resolve {
                generation,
                data: data.clone(),
            },
            Err(error) => Transition::Reject {
                generation,
                error: error.clone(),
            },
        };

        match self.store.update(&key, transition) {
            Commit::StaleDispatchDiscarded { current } => {
                debug!(%key, generation, current, "discarding superseded result");
                let newer = self
                    .in_flight
                    .get(&key)
                    .filter(|request| request.generation > generation)
                    .map(|request| request.response.clone());
                match newer {
                    Some(newer) => newer.await,
                    None => self.settled(&key).unwrap_or(result),
                }
            }
            Commit::Applied(_) | Commit::Missing => {
                self.in_flight
                    .remove_if(&key, |_, request| request.generation == generation);
                result
            }
        }
    }

    /// The outcome last committed to the entry for `key`, if it has settled.
    fn settled(&self, key: &CacheKey) -> Option<Result<Value, ApiError>> {
        let entry = self.store.snapshot(key)?;
        match entry.status {
            QueryStatus::Success => entry.data.map(Ok),
            QueryStatus::Error => entry.error.map(Err),
            QueryStatus::Idle | QueryStatus::Loading => None,
        }
    }

    async fn mutate(
        self: &Arc<Self>,
        descriptor: &Arc<EndpointDescriptor>,
        args: Value,
        invalidates: &[Tag],
    ) -> Result<Value, ApiError> {
        let spec = descriptor.resolve(&args)?;
        debug!(endpoint = descriptor.key(), "running mutation");
        let data = self.transport.send(&spec, None).await?;
        self.invalidate_tags(invalidates);
        Ok(data)
    }

    /// Marks every entry tagged by `tags` stale and refetches the watched ones.
    ///
    /// Watched entries are in `Loading` by the time this returns. The returned
    /// plan only lists refetches that were actually dispatched; a watched entry
    /// whose request could not be built is left stale.
    pub fn invalidate_tags(self: &Arc<Self>, tags: &[Tag]) -> InvalidationPlan {
        if tags.is_empty() {
            return InvalidationPlan::default();
        }
        let mut plan = InvalidationGraph::for_tags(&self.store, tags).mark_stale(&self.store);
        let watched = std::mem::take(&mut plan.refetch);
        for key in watched {
            let dispatched = match (self.registry.get(key.endpoint()), self.store.args(&key)) {
                (Some(descriptor), Some(args)) => {
                    let descriptor = Arc::clone(descriptor);
                    self.dispatch_in_background(&key, &descriptor, &args, FetchPolicy::Refetch)
                }
                _ => false,
            };
            if dispatched {
                plan.refetch.push(key);
            } else {
                debug!(%key, "refetch after invalidation not dispatched");
                plan.stale.push(key);
            }
        }
        plan
    }
}
