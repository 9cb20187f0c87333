//! Runtime configuration.

use std::time::Duration;

use crate::error::ApiError;

/// Default name under which the ambient bearer token is stored.
pub const DEFAULT_CREDENTIAL_KEY: &str = "bc_token";

/// Configuration for query behavior.
///
/// This controls how long cached data is served without refetching, and how
/// long unused entries survive before being evicted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryConfig {
    /// How long data is considered fresh after a successful fetch.
    ///
    /// While fresh, a new subscriber is served from cache without a network call.
    /// Once stale, subscribing refetches in the background while still showing cached data.
    pub stale_time: Duration,

    /// How long an entry with no subscribers is retained before eviction.
    pub cache_time: Duration,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            stale_time: Duration::from_secs(30),
            cache_time: Duration::from_secs(60),
        }
    }
}

impl QueryConfig {
    /// Creates a new query configuration with the given stale and cache times.
    #[must_use]
    pub const fn new(stale_time: Duration, cache_time: Duration) -> Self {
        Self {
            stale_time,
            cache_time,
        }
    }
}

/// Configuration for a [`SmartApi`](crate::api::SmartApi) instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiConfig {
    /// Prefix prepended to every endpoint URL.
    pub base_url: String,
    /// Name of the ambient credential read by [`CredentialJar`](crate::credentials::CredentialJar).
    pub credential_key: String,
    /// Timeout applied by the HTTP client to each request.
    pub request_timeout: Duration,
    /// How often the background sweeper evicts unused entries.
    pub gc_interval: Duration,
    pub query: QueryConfig,
}

impl ApiConfig {
    /// Creates a configuration for `base_url` with default timings.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            credential_key: DEFAULT_CREDENTIAL_KEY.to_string(),
            request_timeout: Duration::from_secs(30),
            gc_interval: Duration::from_secs(10),
            query: QueryConfig::default(),
        }
    }

    #[must_use]
    pub fn with_query(mut self, query: QueryConfig) -> Self {
        self.query = query;
        self
    }

    #[must_use]
    pub fn with_credential_key(mut self, key: impl Into<String>) -> Self {
        self.credential_key = key.into();
        self
    }

    /// Loads the configuration from environment variables.
    ///
    /// A `.env` file is loaded first if present. `API_URL` is required;
    /// `API_CREDENTIAL_KEY`, `API_TIMEOUT_SECS`, `QUERY_STALE_SECS`,
    /// `QUERY_CACHE_SECS` and `QUERY_GC_INTERVAL_SECS` are optional.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Config`] if `API_URL` is missing or a numeric
    /// variable cannot be parsed.
    pub fn from_env() -> Result<Self, ApiError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ApiError> {
        let base_url = lookup("API_URL")
            .ok_or_else(|| ApiError::Config("Required variable 'API_URL' is not set".into()))?;
        let mut config = Self::new(base_url);

        if let Some(key) = lookup("API_CREDENTIAL_KEY") {
            config.credential_key = key;
        }
        if let Some(secs) = seconds(&lookup, "API_TIMEOUT_SECS")? {
            config.request_timeout = secs;
        }
        if let Some(secs) = seconds(&lookup, "QUERY_STALE_SECS")? {
            config.query.stale_time = secs;
        }
        if let Some(secs) = seconds(&lookup, "QUERY_CACHE_SECS")? {
            config.query.cache_time = secs;
        }
        if let Some(secs) = seconds(&lookup, "QUERY_GC_INTERVAL_SECS")? {
            config.gc_interval = secs;
        }
        Ok(config)
    }
}

fn seconds(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<Duration>, ApiError> {
    lookup(name)
        .map(|raw| {
            raw.trim()
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|_| ApiError::Config(format!("'{name}' must be a whole number of seconds")))
        })
        .transpose()
}
