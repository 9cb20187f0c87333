//! The assembled runtime: registry, cache, coordinator and transport.
//!
//! # Example
//!
//! ```rust,no_run
//! use usable_query::prelude::*;
//! use serde_json::Value;
//!
//! # async fn run() -> Result<(), ApiError> {
//! let api = SmartApi::builder("job", ApiConfig::from_env()?).build(|b| {
//!     b.query("getUserJobs", QueryDef::new("user-jobs", |_: Value| RequestSpec::get("/jobs/me")));
//! })?;
//!
//! let hook = api.query_hook::<Value, Value>("useGetUserJobsQuery")?;
//! let mut jobs = hook.subscribe(&Value::Null)?;
//! let result = jobs.settled().await;
//! println!("{:?}", result.data);
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::info;

use crate::cache::{CacheEntry, CacheStore};
use crate::config::ApiConfig;
use crate::coordinator::RequestCoordinator;
use crate::credentials::{CredentialJar, CredentialProvider};
use crate::endpoint::{EndpointBuilder, EndpointDescriptor, EndpointRegistry, Tag};
use crate::error::ApiError;
use crate::hooks::{MutationHook, QueryHook};
use crate::invalidation::InvalidationPlan;
use crate::key::CacheKey;
use crate::sweeper::{Handle, Sweeper};
use crate::transport::{HttpClient, ReqwestClient, TransportAdapter};

/// Builder for [`SmartApi`].
pub struct SmartApiBuilder {
    namespace: String,
    config: ApiConfig,
    http_client: Option<Arc<dyn HttpClient>>,
    credentials: Option<Arc<dyn CredentialProvider>>,
}

impl fmt::Debug for SmartApiBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmartApiBuilder")
            .field("namespace", &self.namespace)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl SmartApiBuilder {
    /// Uses `client` instead of a [`ReqwestClient`].
    #[must_use]
    pub fn http_client(mut self, client: impl HttpClient + 'static) -> Self {
        self.http_client = Some(Arc::new(client));
        self
    }

    /// Uses `credentials` instead of a [`CredentialJar`] keyed by
    /// [`ApiConfig::credential_key`].
    #[must_use]
    pub fn credentials(mut self, credentials: impl CredentialProvider + 'static) -> Self {
        self.credentials = Some(Arc::new(credentials));
        self
    }

    /// Registers the endpoints and assembles the runtime.
    ///
    /// # Errors
    ///
    /// Returns a registration error for duplicate keys or names, or
    /// [`ApiError::Config`] if the default HTTP client cannot be created.
    pub fn build(self, endpoints: impl FnOnce(&mut EndpointBuilder)) -> Result<SmartApi, ApiError> {
        let registry = Arc::new(EndpointRegistry::build(self.namespace, endpoints)?);

        let http_client = match self.http_client {
            Some(client) => client,
            None => Arc::new(ReqwestClient::new(self.config.request_timeout)?),
        };
        let (credentials, jar): (Arc<dyn CredentialProvider>, _) = match self.credentials {
            Some(credentials) => (credentials, None),
            None => {
                let jar = CredentialJar::new(self.config.credential_key.clone());
                (Arc::new(jar.clone()), Some(jar))
            }
        };

        let transport = TransportAdapter::new(self.config.base_url.clone(), http_client, credentials);
        let store = Arc::new(CacheStore::new(self.config.query.clone()));
        let coordinator = Arc::new(RequestCoordinator::new(store, transport, Arc::clone(&registry)));

        info!(
            namespace = registry.namespace(),
            endpoints = registry.len(),
            base_url = %self.config.base_url,
            "api ready"
        );

        Ok(SmartApi {
            config: self.config,
            coordinator,
            jar,
        })
    }
}

/// A registered API namespace and the runtime that serves it.
pub struct SmartApi {
    config: ApiConfig,
    coordinator: Arc<RequestCoordinator>,
    jar: Option<CredentialJar>,
}

impl fmt::Debug for SmartApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmartApi")
            .field("namespace", &self.namespace())
            .field("coordinator", &self.coordinator)
            .finish_non_exhaustive()
    }
}

impl SmartApi {
    #[must_use]
    pub fn builder(namespace: impl Into<String>, config: ApiConfig) -> SmartApiBuilder {
        SmartApiBuilder {
            namespace: namespace.into(),
            config,
            http_client: None,
            credentials: None,
        }
    }

    #[must_use]
    pub fn namespace(&self) -> &str {
        self.coordinator.registry().namespace()
    }

    #[must_use]
    pub const fn config(&self) -> &ApiConfig {
        &self.config
    }

    #[must_use]
    pub const fn coordinator(&self) -> &Arc<RequestCoordinator> {
        &self.coordinator
    }

    #[must_use]
    pub fn registry(&self) -> &EndpointRegistry {
        self.coordinator.registry()
    }

    /// The default credential store, unless custom credentials were supplied.
    #[must_use]
    pub const fn credential_jar(&self) -> Option<&CredentialJar> {
        self.jar.as_ref()
    }

    /// Looks up an endpoint by its key (`"get-jobs"`).
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::UnknownEndpoint`] if no endpoint has that key.
    pub fn endpoint(&self, key: &str) -> Result<&Arc<EndpointDescriptor>, ApiError> {
        self.registry()
            .get(key)
            .ok_or_else(|| ApiError::UnknownEndpoint(key.to_string()))
    }

    /// All generated hook names, sorted.
    pub fn hook_names(&self) -> impl Iterator<Item = &str> {
        self.registry().hook_names()
    }

    fn hook(&self, hook_name: &str, query: bool) -> Result<Arc<EndpointDescriptor>, ApiError> {
        let descriptor = self
            .registry()
            .hook(hook_name)
            .ok_or_else(|| ApiError::UnknownHook(hook_name.to_string()))?;
        if descriptor.is_query() != query {
            return Err(ApiError::EndpointKindMismatch {
                hook: hook_name.to_string(),
                expected: if query { "query" } else { "mutation" },
            });
        }
        Ok(Arc::clone(descriptor))
    }

    /// Looks up the query hook `hook_name` (`"useGetJobsQuery"`).
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::UnknownHook`] if no endpoint generated that name, or
    /// [`ApiError::EndpointKindMismatch`] if it belongs to a mutation.
    pub fn query_hook<A, T>(&self, hook_name: &str) -> Result<QueryHook<A, T>, ApiError>
    where
        A: Serialize,
        T: DeserializeOwned,
    {
        let descriptor = self.hook(hook_name, true)?;
        Ok(QueryHook::new(Arc::clone(&self.coordinator), descriptor))
    }

    /// Looks up the mutation hook `hook_name` (`"useUpdateJobStatusMutation"`).
    ///
    /// Each call returns an instance with its own [`MutationState`](crate::hooks::MutationState).
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::UnknownHook`] if no endpoint generated that name, or
    /// [`ApiError::EndpointKindMismatch`] if it belongs to a query.
    pub fn mutation_hook<A, T>(&self, hook_name: &str) -> Result<MutationHook<A, T>, ApiError>
    where
        A: Serialize,
        T: DeserializeOwned + Clone,
    {
        let descriptor = self.hook(hook_name, false)?;
        Ok(MutationHook::new(Arc::clone(&self.coordinator), descriptor))
    }

    /// Invalidates queries by tag, exactly as a successful mutation would.
    pub fn invalidate_tags<T: Into<Tag>>(&self, tags: impl IntoIterator<Item = T>) -> InvalidationPlan {
        let tags: Vec<Tag> = tags.into_iter().map(Into::into).collect();
        self.coordinator.invalidate_tags(&tags)
    }

    /// The current state of the entry for `key`, if it exists.
    #[must_use]
    pub fn snapshot(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.coordinator.store().snapshot(key)
    }

    /// Number of live cache entries.
    #[must_use]
    pub fn cache_len(&self) -> usize {
        self.coordinator.store().len()
    }

    /// Evicts entries unused for longer than the cache time.
    pub fn evict_unused(&self) -> usize {
        self.coordinator.store().evict_unused()
    }

    /// Starts evicting unused entries every [`ApiConfig::gc_interval`].
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    #[must_use]
    pub fn spawn_sweeper(&self) -> Handle {
        Sweeper::new(Arc::clone(self.coordinator.store()), self.config.gc_interval).spawn()
    }
}
