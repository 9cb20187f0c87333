//! Typed bindings over the request coordinator.
//!
//! - [`QueryHook`] / [`QuerySubscription`]: subscribe to a cache entry and observe its transitions
//! - [`MutationHook`]: trigger an uncached write and invalidate dependent queries
//!
//! Hooks are obtained by their generated name from [`SmartApi`](crate::SmartApi).

pub mod mutation;
pub mod query;

pub use mutation::{MutationHook, MutationResult, MutationState};
pub use query::{QueryHook, QueryResult, QuerySubscription};
