//! Endpoint descriptors and the registry that holds them.
//!
//! Endpoints are declared once, through an [`EndpointBuilder`], and are
//! immutable afterwards. Each one is either a query (cached, deduplicated) or
//! a mutation (always sent, may invalidate queries by tag).
//!
//! # Example
//!
//! ```rust
//! use usable_query::endpoint::{EndpointRegistry, MutationDef, QueryDef};
//! use usable_query::transport::RequestSpec;
//! use serde_json::Value;
//!
//! let registry = EndpointRegistry::build("job", |builder| {
//!     builder
//!         .query("getUserJobs", QueryDef::new("user-jobs", |_: Value| RequestSpec::get("/jobs/me")))
//!         .mutation(
//!             "updateJobStatus",
//!             MutationDef::new("user-job-status", |body: Value| {
//!                 RequestSpec::post("/jobs/status").body(body)
//!             })
//!             .invalidates(["user-jobs"]),
//!         );
//! })
//! .unwrap();
//!
//! assert!(registry.hook("useGetUserJobsQuery").is_some());
//! assert!(registry.hook("useUpdateJobStatusMutation").is_some());
//! ```

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::ApiError;
use crate::transport::RequestSpec;

/// An invalidation label. By convention it names the key of the queries it targets.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tag(String);

impl Tag {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Tag {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for Tag {
    fn from(name: String) -> Self {
        Self(name)
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

type Resolver = Arc<dyn Fn(&Value) -> Result<RequestSpec, ApiError> + Send + Sync>;

fn erase<A, F>(resolve: F) -> Resolver
where
    A: DeserializeOwned,
    F: Fn(A) -> RequestSpec + Send + Sync + 'static,
{
    Arc::new(move |args: &Value| {
        let args = A::deserialize(args).map_err(|e| ApiError::Decode(e.to_string()))?;
        let spec = resolve(args);
        spec.check()?;
        Ok(spec)
    })
}

/// Whether an endpoint is a query or a mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndpointKind {
    Query,
    /// A mutation and the tags it invalidates on success.
    Mutation { invalidates: Vec<Tag> },
}

impl EndpointKind {
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Query => "query",
            Self::Mutation { .. } => "mutation",
        }
    }
}

/// A registered endpoint.
#[derive(Clone)]
pub struct EndpointDescriptor {
    name: String,
    key: String,
    kind: EndpointKind,
    resolve: Resolver,
}

impl EndpointDescriptor {
    /// The name the endpoint was registered under (`getJobs`).
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The cache/tag key (`get-jobs`).
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    #[must_use]
    pub const fn kind(&self) -> &EndpointKind {
        &self.kind
    }

    #[must_use]
    pub const fn is_query(&self) -> bool {
        matches!(self.kind, EndpointKind::Query)
    }

    /// Tags invalidated by a successful call. Empty for queries.
    #[must_use]
    pub fn invalidates(&self) -> &[Tag] {
        match &self.kind {
            EndpointKind::Query => &[],
            EndpointKind::Mutation { invalidates } => invalidates,
        }
    }

    /// The generated hook name (`useGetJobsQuery`).
    #[must_use]
    pub fn hook_name(&self) -> String {
        hook_name(&self.name, &self.kind)
    }

    /// Materializes the request for one call.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Decode`] if `args` do not match the resolver's argument
    /// type or the resolved body cannot be serialized.
    pub fn resolve(&self, args: &Value) -> Result<RequestSpec, ApiError> {
        (self.resolve)(args)
    }
}

impl fmt::Debug for EndpointDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointDescriptor")
            .field("name", &self.name)
            .field("key", &self.key)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

/// Declaration of a query endpoint.
pub struct QueryDef {
    key: String,
    resolve: Resolver,
}

impl QueryDef {
    /// Declares a query with cache key `key`.
    ///
    /// `resolve` maps call arguments to a request. It must not perform I/O.
    pub fn new<A, F>(key: impl Into<String>, resolve: F) -> Self
    where
        A: DeserializeOwned,
        F: Fn(A) -> RequestSpec + Send + Sync + 'static,
    {
        Self {
            key: key.into(),
            resolve: erase(resolve),
        }
    }
}

/// Declaration of a mutation endpoint.
pub struct MutationDef {
    key: String,
    resolve: Resolver,
    invalidates: Vec<Tag>,
}

impl MutationDef {
    pub fn new<A, F>(key: impl Into<String>, resolve: F) -> Self
    where
        A: DeserializeOwned,
        F: Fn(A) -> RequestSpec + Send + Sync + 'static,
    {
        Self {
            key: key.into(),
            resolve: erase(resolve),
            invalidates: Vec::new(),
        }
    }

    /// Declares the query tags this mutation invalidates on success.
    #[must_use]
    pub fn invalidates<T: Into<Tag>>(mut self, tags: impl IntoIterator<Item = T>) -> Self {
        self.invalidates.extend(tags.into_iter().map(Into::into));
        self
    }
}

/// Collects endpoint declarations for [`EndpointRegistry::build`].
#[derive(Default)]
pub struct EndpointBuilder {
    endpoints: Vec<EndpointDescriptor>,
}

impl EndpointBuilder {
    pub fn query(&mut self, name: impl Into<String>, def: QueryDef) -> &mut Self {
        self.endpoints.push(EndpointDescriptor {
            name: name.into(),
            key: def.key,
            kind: EndpointKind::Query,
            resolve: def.resolve,
        });
        self
    }

    pub fn mutation(&mut self, name: impl Into<String>, def: MutationDef) -> &mut Self {
        self.endpoints.push(EndpointDescriptor {
            name: name.into(),
            key: def.key,
            kind: EndpointKind::Mutation {
                invalidates: def.invalidates,
            },
            resolve: def.resolve,
        });
        self
    }
}

/// The immutable set of endpoints of one API namespace.
#[derive(Debug)]
pub struct EndpointRegistry {
    namespace: String,
    by_key: HashMap<String, Arc<EndpointDescriptor>>,
    hooks: BTreeMap<String, Arc<EndpointDescriptor>>,
}

impl EndpointRegistry {
    /// Builds a registry from the declarations made in `endpoints`.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::DuplicateEndpointKey`] if two endpoints share a key,
    /// or [`ApiError::DuplicateEndpointName`] if two names map to the same
    /// hook name. No registry is produced in either case.
    pub fn build(
        namespace: impl Into<String>,
        endpoints: impl FnOnce(&mut EndpointBuilder),
    ) -> Result<Self, ApiError> {
        let namespace = namespace.into();
        let mut builder = EndpointBuilder::default();
        endpoints(&mut builder);

        let mut by_key: HashMap<String, Arc<EndpointDescriptor>> = HashMap::new();
        let mut hooks: BTreeMap<String, Arc<EndpointDescriptor>> = BTreeMap::new();
        for descriptor in builder.endpoints {
            let descriptor = Arc::new(descriptor);
            if by_key.contains_key(descriptor.key()) {
                return Err(ApiError::DuplicateEndpointKey {
                    namespace,
                    key: descriptor.key().to_string(),
                });
            }
            let hook = descriptor.hook_name();
            if hooks.contains_key(&hook) {
                return Err(ApiError::DuplicateEndpointName {
                    namespace,
                    name: descriptor.name().to_string(),
                });
            }
            by_key.insert(descriptor.key().to_string(), Arc::clone(&descriptor));
            hooks.insert(hook, descriptor);
        }

        Ok(Self {
            namespace,
            by_key,
            hooks,
        })
    }

    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Looks up an endpoint by its key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Arc<EndpointDescriptor>> {
        self.by_key.get(key)
    }

    /// Looks up an endpoint by its generated hook name.
    #[must_use]
    pub fn hook(&self, hook_name: &str) -> Option<&Arc<EndpointDescriptor>> {
        self.hooks.get(hook_name)
    }

    /// Generated hook names, in sorted order.
    pub fn hook_names(&self) -> impl Iterator<Item = &str> {
        self.hooks.keys().map(String::as_str)
    }

    pub fn endpoints(&self) -> impl Iterator<Item = &Arc<EndpointDescriptor>> {
        self.hooks.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }
}

/// Derives a hook name from an endpoint name.
///
/// `getJobs` and `get-jobs` both become `useGetJobsQuery` for a query.
#[must_use]
pub fn hook_name(name: &str, kind: &EndpointKind) -> String {
    let mut out = String::from("use");
    for segment in name.split(['-', '_', ' ']).filter(|s| !s.is_empty()) {
        let mut chars = segment.chars();
        if let Some(first) = chars.next() {
            out.extend(first.to_uppercase());
            out.push_str(chars.as_str());
        }
    }
    out.push_str(match kind {
        EndpointKind::Query => "Query",
        EndpointKind::Mutation { .. } => "Mutation",
    });
    out
}
