//! Mutation hooks: uncached writes that invalidate queries.
//!
//! A [`MutationHook`] is the generated `use<Name>Mutation` binding. Each call
//! to [`MutationHook::trigger`] performs exactly one transport call; two
//! concurrent triggers with identical arguments are two requests. Unlike
//! query errors, a failed mutation rejects the trigger's future and the caller
//! decides what to do with it.
//!
//! On success, every query tagged by the endpoint's `invalidates` list is
//! marked stale, and watched ones are already refetching when `trigger` returns.
//!
//! # Example
//!
//! ```rust,ignore
//! let update = api.mutation_hook::<Value, Value>("useUpdateJobStatusMutation")?;
//!
//! match update.trigger(&json!({ "id": 7, "status": "applied" })).await {
//!     Ok(_) => println!("saved"),
//!     Err(e) => eprintln!("rejected: {:?}", e.payload()),
//! }
//! ```

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::watch;

use crate::coordinator::RequestCoordinator;
use crate::endpoint::EndpointDescriptor;
use crate::error::ApiError;

/// The state of the last trigger of a mutation hook.
#[derive(Debug, Clone, PartialEq)]
pub enum MutationState<T> {
    /// Mutation is idle (not yet triggered, or reset).
    Idle,
    /// Mutation is in progress.
    Loading,
    /// Mutation succeeded with a result.
    Success(T),
    /// Mutation failed with an error.
    Error(ApiError),
}

/// A snapshot of a mutation hook's state.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationResult<T> {
    pub state: MutationState<T>,
}

impl<T> MutationResult<T> {
    /// Returns the result data if the mutation succeeded, otherwise `None`.
    pub const fn data(&self) -> Option<&T> {
        match &self.state {
            MutationState::Success(data) => Some(data),
            _ => None,
        }
    }

    /// Returns the error if the mutation failed, otherwise `None`.
    pub const fn error(&self) -> Option<&ApiError> {
        match &self.state {
            MutationState::Error(error) => Some(error),
            _ => None,
        }
    }

    /// Returns `true` if the mutation is currently loading.
    pub const fn is_loading(&self) -> bool {
        matches!(self.state, MutationState::Loading)
    }

    /// Returns `true` if the mutation succeeded.
    pub const fn is_success(&self) -> bool {
        matches!(self.state, MutationState::Success(_))
    }

    /// Returns `true` if the mutation failed.
    pub const fn is_error(&self) -> bool {
        matches!(self.state, MutationState::Error(_))
    }
}

/// The generated `use<Name>Mutation` binding of one endpoint.
///
/// Every hook instance tracks its own [`MutationState`].
pub struct MutationHook<A, T> {
    coordinator: Arc<RequestCoordinator>,
    descriptor: Arc<EndpointDescriptor>,
    state: watch::Sender<MutationState<T>>,
    _marker: PhantomData<fn(&A)>,
}

impl<A, T> fmt::Debug for MutationHook<A, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutationHook")
            .field("endpoint", &self.descriptor.key())
            .finish_non_exhaustive()
    }
}

impl<A, T> MutationHook<A, T>
where
    A: Serialize,
    T: DeserializeOwned + Clone,
{
    pub(crate) fn new(
        coordinator: Arc<RequestCoordinator>,
        descriptor: Arc<EndpointDescriptor>,
    ) -> Self {
        let (state, _rx) = watch::channel(MutationState::Idle);
        Self {
            coordinator,
            descriptor,
            state,
            _marker: PhantomData,
        }
    }

    #[must_use]
    pub fn descriptor(&self) -> &EndpointDescriptor {
        &self.descriptor
    }

    /// Performs the mutation.
    ///
    /// # Errors
    ///
    /// Returns the transport error, or [`ApiError::Decode`] if `args` cannot
    /// be serialized or the response does not match `T`.
    pub async fn trigger(&self, args: &A) -> Result<T, ApiError> {
        self.state.send_replace(MutationState::Loading);
        let result = self.run(args).await;
        self.state.send_replace(match &result {
            Ok(data) => MutationState::Success(data.clone()),
            Err(error) => MutationState::Error(error.clone()),
        });
        result
    }

    async fn run(&self, args: &A) -> Result<T, ApiError> {
        let args = serde_json::to_value(args)?;
        let body = self.coordinator.execute(&self.descriptor, args).await?;
        Ok(T::deserialize(body)?)
    }

    /// The state left by the last trigger.
    #[must_use]
    pub fn result(&self) -> MutationResult<T> {
        MutationResult {
            state: self.state.borrow().clone(),
        }
    }

    /// Observes state changes of this hook.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<MutationState<T>> {
        self.state.subscribe()
    }

    /// Returns the hook to [`MutationState::Idle`].
    pub fn reset(&self) {
        self.state.send_replace(MutationState::Idle);
    }
}
