//! # usable-query - Declarative API Client Runtime
//!
//! usable-query turns a table of declarative endpoint descriptors into cached,
//! deduplicated and auto-invalidating network operations, exposed as typed
//! hooks. Callers never manage request state by hand.
//!
//! ## Architecture
//!
//! A query hook call flows through the runtime like this:
//!
//! 1. **Hook**: subscribes to the cache entry for `(endpoint, args)`
//! 2. **Cache Store**: holds one entry per key and publishes every transition
//! 3. **Request Coordinator**: if the entry is missing or stale, issues one call
//!    (concurrent callers of the same key share it)
//! 4. **Transport Adapter**: sends the request with auth and normalizes errors
//! 5. **Invalidation Graph**: after a mutation succeeds, marks tagged queries
//!    stale and refetches the watched ones
//!
//! ## Core Components
//!
//! - [`SmartApi`](api::SmartApi): registers endpoints and hands out hooks by name
//! - [`EndpointRegistry`](endpoint::EndpointRegistry): the immutable descriptor table
//! - [`CacheStore`](cache::CacheStore): keyed entries with reference-counted eviction
//! - [`RequestCoordinator`](coordinator::RequestCoordinator): deduplication and last-dispatch-wins
//! - [`TransportAdapter`](transport::TransportAdapter): HTTP, credentials and error normalization
//! - [`QueryHook`](hooks::QueryHook) / [`MutationHook`](hooks::MutationHook): typed bindings
//!
//! ## Example
//!
//! ```rust,no_run
//! use usable_query::prelude::*;
//! use usable_query::jobs::{JobApi, JobsQuery};
//!
//! # async fn run() -> Result<(), ApiError> {
//! let jobs = JobApi::new(ApiConfig::from_env()?)?;
//! let _sweeper = jobs.api().spawn_sweeper();
//!
//! let mut listing = jobs.get_jobs()?.subscribe(&JobsQuery::page(1))?;
//! while let Some(result) = listing.changed().await {
//!     if let Some(page) = result.data() {
//!         println!("{} jobs", page.data.len());
//!     }
//!     if let Some(error) = &result.error {
//!         eprintln!("failed: {error}");
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Logging
//!
//! The runtime emits [`tracing`] events and never installs a subscriber.

pub mod api;
pub mod cache;
pub mod config;
pub mod coordinator;
pub mod credentials;
pub mod endpoint;
pub mod error;
pub mod hooks;
pub mod invalidation;
pub mod jobs;
pub mod key;
pub mod mock;
pub mod prelude;
pub mod sweeper;
pub mod transport;

pub use api::{SmartApi, SmartApiBuilder};
pub use error::ApiError;
