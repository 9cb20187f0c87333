//! Prelude module for convenient imports.
//!
//! ```
//! use usable_query::prelude::*;
//! ```
//!
//! # What's included
//!
//! - [`SmartApi`] - The assembled runtime
//! - [`ApiConfig`] / [`QueryConfig`] - Configuration
//! - [`QueryDef`] / [`MutationDef`] / [`RequestSpec`] - Endpoint declarations
//! - [`QueryHook`] / [`MutationHook`] - Typed hook bindings and their results
//! - [`ApiError`] - The error type

pub use crate::api::{SmartApi, SmartApiBuilder};
pub use crate::cache::QueryStatus;
pub use crate::config::{ApiConfig, QueryConfig};
pub use crate::credentials::{CredentialJar, CredentialProvider, StaticToken};
pub use crate::endpoint::{EndpointBuilder, MutationDef, QueryDef, Tag};
pub use crate::error::ApiError;
pub use crate::hooks::{
    MutationHook, MutationResult, MutationState, QueryHook, QueryResult, QuerySubscription,
};
pub use crate::key::CacheKey;
pub use crate::transport::RequestSpec;
