//! Query hooks: cache subscriptions with automatic fetching.
//!
//! A [`QueryHook`] is the generated `use<Name>Query` binding for one query
//! endpoint. Subscribing to it with arguments yields a [`QuerySubscription`]:
//!
//! 1. The cache entry for the arguments is created if needed and its subscriber count incremented
//! 2. If the entry is missing, stale or failed, a fetch is started in the background
//! 3. Every transition of the entry is observable through [`QuerySubscription::changed`]
//! 4. Dropping the subscription decrements the subscriber count
//!
//! Query errors never escape as `Err`; they show up as [`QueryResult::error`].
//!
//! # Example
//!
//! ```rust,ignore
//! let hook = api.query_hook::<JobsQuery, JobsResponse>("useGetJobsQuery")?;
//! let mut jobs = hook.subscribe(&JobsQuery::page(1))?;
//!
//! while let Some(result) = jobs.changed().await {
//!     if let Some(data) = result.data {
//!         render(&data);
//!     }
//! }
//! ```

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use futures::StreamExt;
use futures::stream::BoxStream;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio_stream::wrappers::WatchStream;

use crate::cache::{CacheEntry, QueryStatus, SubscriptionHandle};
use crate::coordinator::{FetchPolicy, RequestCoordinator};
use crate::endpoint::EndpointDescriptor;
use crate::error::ApiError;
use crate::key::CacheKey;

/// The state of a query as seen by one subscriber.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult<T> {
    pub status: QueryStatus,
    /// Last good data. Still present while refetching or after a failed refetch.
    pub data: Option<T>,
    pub error: Option<ApiError>,
    /// Whether `data` has been invalidated and is waiting for a refetch.
    pub is_stale: bool,
}

impl<T> QueryResult<T> {
    /// Returns the data if any has been fetched, otherwise `None`.
    pub const fn data(&self) -> Option<&T> {
        self.data.as_ref()
    }

    /// Returns `true` if the query is currently loading.
    pub fn is_loading(&self) -> bool {
        self.status == QueryStatus::Loading
    }

    /// Returns `true` if the last fetch succeeded.
    pub fn is_success(&self) -> bool {
        self.status == QueryStatus::Success
    }

    /// Returns `true` if the last fetch failed.
    pub fn is_error(&self) -> bool {
        self.status == QueryStatus::Error
    }

    /// Returns `true` if the query data is stale.
    pub const fn is_stale(&self) -> bool {
        self.is_stale
    }
}

impl<T: DeserializeOwned> QueryResult<T> {
    /// Decodes a cache entry into a typed result.
    ///
    /// A body that does not match `T` is reported as an [`ApiError::Decode`] error.
    #[must_use]
    pub fn from_entry(entry: &CacheEntry) -> Self {
        let mut result = Self {
            status: entry.status,
            data: None,
            error: entry.error.clone(),
            is_stale: entry.is_stale,
        };
        if let Some(raw) = &entry.data {
            match T::deserialize(raw) {
                Ok(data) => result.data = Some(data),
                Err(e) => {
                    result.status = QueryStatus::Error;
                    result.error = Some(ApiError::Decode(e.to_string()));
                }
            }
        }
        result
    }
}

/// The generated `use<Name>Query` binding of one endpoint.
pub struct QueryHook<A, T> {
    coordinator: Arc<RequestCoordinator>,
    descriptor: Arc<EndpointDescriptor>,
    _marker: PhantomData<fn(&A) -> T>,
}

impl<A, T> Clone for QueryHook<A, T> {
    fn clone(&self) -> Self {
        Self {
            coordinator: Arc::clone(&self.coordinator),
            descriptor: Arc::clone(&self.descriptor),
            _marker: PhantomData,
        }
    }
}

impl<A, T> fmt::Debug for QueryHook<A, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryHook")
            .field("endpoint", &self.descriptor.key())
            .finish_non_exhaustive()
    }
}

impl<A, T> QueryHook<A, T>
where
    A: Serialize,
    T: DeserializeOwned,
{
    pub(crate) const fn new(
        coordinator: Arc<RequestCoordinator>,
        descriptor: Arc<EndpointDescriptor>,
    ) -> Self {
        Self {
            coordinator,
            descriptor,
            _marker: PhantomData,
        }
    }

    #[must_use]
    pub fn descriptor(&self) -> &EndpointDescriptor {
        &self.descriptor
    }

    /// The cache key `args` map to.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Decode`] if `args` cannot be serialized.
    pub fn cache_key(&self, args: &A) -> Result<CacheKey, ApiError> {
        CacheKey::from_args(self.descriptor.key(), args)
    }

    /// Subscribes to the entry for `args`, fetching it if it is not fresh.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Decode`] if `args` cannot be serialized.
    pub fn subscribe(&self, args: &A) -> Result<QuerySubscription<A, T>, ApiError> {
        let args = serde_json::to_value(args)?;
        let handle = attach(&self.coordinator, &self.descriptor, &args);
        Ok(QuerySubscription {
            coordinator: Arc::clone(&self.coordinator),
            descriptor: Arc::clone(&self.descriptor),
            args,
            handle,
            _marker: PhantomData,
        })
    }

    /// Fetches once without subscribing, sharing cache and in-flight requests.
    ///
    /// # Errors
    ///
    /// Returns the transport error, or [`ApiError::Decode`] if the body does not match `T`.
    pub async fn fetch(&self, args: &A) -> Result<T, ApiError> {
        let args = serde_json::to_value(args)?;
        let body = self
            .coordinator
            .fetch(&self.descriptor, args, FetchPolicy::CacheFirst)
            .await?;
        Ok(T::deserialize(body)?)
    }
}

fn attach(
    coordinator: &Arc<RequestCoordinator>,
    descriptor: &Arc<EndpointDescriptor>,
    args: &Value,
) -> SubscriptionHandle {
    let key = CacheKey::new(descriptor.key(), args);
    let handle = coordinator.store().subscribe(&key, args);
    coordinator.ensure_fresh(&key, descriptor, args);
    handle
}

/// A live subscription to one query cache entry.
pub struct QuerySubscription<A, T> {
    coordinator: Arc<RequestCoordinator>,
    descriptor: Arc<EndpointDescriptor>,
    args: Value,
    handle: SubscriptionHandle,
    _marker: PhantomData<fn(&A) -> T>,
}

impl<A, T> fmt::Debug for QuerySubscription<A, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QuerySubscription")
            .field("key", self.handle.key())
            .finish_non_exhaustive()
    }
}

impl<A, T> QuerySubscription<A, T>
where
    A: Serialize,
    T: DeserializeOwned,
{
    #[must_use]
    pub const fn key(&self) -> &CacheKey {
        self.handle.key()
    }

    /// The current state of the entry.
    #[must_use]
    pub fn current(&self) -> QueryResult<T> {
        QueryResult::from_entry(&self.handle.current())
    }

    /// Waits for the next transition of the entry.
    ///
    /// Returns `None` if the entry was removed from the store.
    pub async fn changed(&mut self) -> Option<QueryResult<T>> {
        let entry = self.handle.changed().await?;
        Some(QueryResult::from_entry(&entry))
    }

    /// Waits until the entry settles (success or error) and returns it.
    pub async fn settled(&mut self) -> QueryResult<T> {
        let current = self.current();
        if matches!(current.status, QueryStatus::Success | QueryStatus::Error) {
            return current;
        }
        while let Some(result) = self.changed().await {
            if matches!(result.status, QueryStatus::Success | QueryStatus::Error) {
                return result;
            }
        }
        self.current()
    }

    /// Switches to new arguments.
    ///
    /// The old entry is released before the new one is subscribed. Nothing
    /// happens if the arguments map to the same key.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Decode`] if `args` cannot be serialized.
    pub fn set_args(&mut self, args: &A) -> Result<(), ApiError> {
        let args = serde_json::to_value(args)?;
        let key = CacheKey::new(self.descriptor.key(), &args);
        if &key == self.handle.key() {
            return Ok(());
        }
        self.handle.rebind(&key, &args);
        self.args = args;
        self.coordinator.ensure_fresh(&key, &self.descriptor, &self.args);
        Ok(())
    }

    /// Refetches the entry even if it is fresh.
    pub fn refetch(&self) {
        self.coordinator.dispatch_in_background(
            self.handle.key(),
            &self.descriptor,
            &self.args,
            FetchPolicy::Refetch,
        );
    }

    /// Streams the current state followed by one item per transition.
    ///
    /// The subscription stays alive as long as the stream does.
    pub fn into_stream(self) -> BoxStream<'static, QueryResult<T>>
    where
        A: 'static,
        T: Send + 'static,
    {
        let rx = self.handle.receiver();
        WatchStream::new(rx)
            .map(move |entry| {
                // Keeps the subscriber count up until the stream is dropped.
                let _subscription = &self;
                QueryResult::from_entry(&entry)
            })
            .boxed()
    }
}
