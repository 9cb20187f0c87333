//! Credential sources for the transport adapter.
//!
//! The runtime only ever reads credentials. Whatever stores the token (a login
//! flow, a cookie jar, a config file) owns writing it.

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;

use crate::config::DEFAULT_CREDENTIAL_KEY;

/// A synchronous source of an optional bearer token.
pub trait CredentialProvider: Send + Sync {
    /// Returns the ambient token, if any.
    fn token(&self) -> Option<String>;
}

impl<F> CredentialProvider for F
where
    F: Fn() -> Option<String> + Send + Sync,
{
    fn token(&self) -> Option<String> {
        self()
    }
}

/// A provider that never supplies a token.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NoCredentials;

impl CredentialProvider for NoCredentials {
    fn token(&self) -> Option<String> {
        None
    }
}

/// A provider that always supplies the same token.
#[derive(Clone, PartialEq, Eq)]
pub struct StaticToken(String);

impl StaticToken {
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

impl fmt::Debug for StaticToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StaticToken(***)")
    }
}

impl CredentialProvider for StaticToken {
    fn token(&self) -> Option<String> {
        Some(self.0.clone())
    }
}

/// A named value store read by a fixed key, the equivalent of a browser cookie jar.
///
/// Clones share the same storage, so the application can keep one handle to
/// write tokens while the transport holds another to read them.
///
/// # Example
///
/// ```rust
/// use usable_query::credentials::{CredentialJar, CredentialProvider};
///
/// let jar = CredentialJar::new("bc_token");
/// assert_eq!(jar.token(), None);
///
/// jar.set("bc_token", "abc123");
/// assert_eq!(jar.token().as_deref(), Some("abc123"));
/// ```
#[derive(Clone)]
pub struct CredentialJar {
    key: String,
    values: Arc<DashMap<String, String>>,
}

impl CredentialJar {
    /// Creates an empty jar whose provider reads `key`.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            values: Arc::new(DashMap::new()),
        }
    }

    /// The name this jar reads when acting as a provider.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn get(&self, name: &str) -> Option<String> {
        self.values.get(name).map(|value| value.clone())
    }

    pub fn set(&self, name: impl Into<String>, value: impl Into<String>) {
        self.values.insert(name.into(), value.into());
    }

    pub fn remove(&self, name: &str) -> Option<String> {
        self.values.remove(name).map(|(_, value)| value)
    }
}

impl Default for CredentialJar {
    fn default() -> Self {
        Self::new(DEFAULT_CREDENTIAL_KEY)
    }
}

impl fmt::Debug for CredentialJar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialJar")
            .field("key", &self.key)
            .field("entries", &self.values.len())
            .finish()
    }
}

impl CredentialProvider for CredentialJar {
    fn token(&self) -> Option<String> {
        self.get(&self.key).filter(|token| !token.is_empty())
    }
}
