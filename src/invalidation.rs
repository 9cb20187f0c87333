//! Tag-based invalidation.
//!
//! Queries are tagged implicitly by their endpoint key; mutations declare the
//! tags they invalidate. The tag → key mapping is never stored: it is derived
//! from the store's live entries each time a mutation succeeds.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::cache::CacheStore;
use crate::endpoint::Tag;
use crate::key::CacheKey;

/// Keys touched by one invalidation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvalidationPlan {
    /// Entries with subscribers; these must be refetched now.
    pub refetch: Vec<CacheKey>,
    /// Entries left stale until their next subscription or refetch.
    pub stale: Vec<CacheKey>,
}

impl InvalidationPlan {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.refetch.is_empty() && self.stale.is_empty()
    }
}

/// The live tag → cache key edges for a set of tags.
#[derive(Debug, Clone, Default)]
pub struct InvalidationGraph {
    edges: BTreeMap<Tag, BTreeSet<CacheKey>>,
}

impl InvalidationGraph {
    /// Derives the edges for `tags` from the entries currently in `store`.
    ///
    /// A tag matches a key when it equals the key's endpoint exactly.
    #[must_use]
    pub fn for_tags(store: &CacheStore, tags: &[Tag]) -> Self {
        let edges = tags
            .iter()
            .map(|tag| {
                let keys = store.keys_for_endpoint(tag.as_str()).into_iter().collect();
                (tag.clone(), keys)
            })
            .collect();
        Self { edges }
    }

    /// Keys tagged with `tag`.
    pub fn keys_for<'a>(&'a self, tag: &Tag) -> impl Iterator<Item = &'a CacheKey> + 'a {
        self.edges.get(tag).into_iter().flatten()
    }

    /// Marks every matching entry stale and sorts them by whether they are watched.
    pub fn mark_stale(&self, store: &CacheStore) -> InvalidationPlan {
        let keys: BTreeSet<&CacheKey> = self.edges.values().flatten().collect();
        let mut plan = InvalidationPlan::default();
        for key in keys {
            let Some(entry) = store.invalidate(key) else {
                continue;
            };
            if entry.subscribers > 0 {
                plan.refetch.push(key.clone());
            } else {
                plan.stale.push(key.clone());
            }
        }
        debug!(
            tags = ?self.edges.keys().collect::<Vec<_>>(),
            refetch = plan.refetch.len(),
            stale = plan.stale.len(),
            "invalidated"
        );
        plan
    }
}
