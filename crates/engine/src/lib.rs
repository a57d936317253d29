//! Job orchestration engine.
//!
//! Owns the job store and server registry, and runs the background loops
//! that move jobs through their lifecycle: the [`dispatcher`] claims
//! pending work for idle servers, the [`reconciler`] folds push and poll
//! observations back into job state, and the [`cancellation`] controller
//! handles operator stops. [`orchestrator::Orchestrator`] wires them
//! together.

pub mod cancellation;
pub mod compiler;
pub mod config;
pub mod context;
pub mod dispatcher;
pub mod orchestrator;
pub mod push;
pub mod reconciler;
pub mod registry;
pub mod store;

use std::future::Future;
use std::time::Duration;

use vidflow_core::remote::RemoteError;

/// Bound a remote call by `limit`, mapping expiry to [`RemoteError::Timeout`].
pub async fn bounded<T>(
    limit: Duration,
    call: impl Future<Output = Result<T, RemoteError>>,
) -> Result<T, RemoteError> {
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(RemoteError::Timeout(limit)),
    }
}
