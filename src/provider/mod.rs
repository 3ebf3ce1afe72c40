//! Provider abstraction over the remote resource-management API
//!
//! The executor talks to a `Provider` and never to HTTP directly. Mutating
//! calls take an idempotency token so a retried request cannot create a
//! second copy of a resource. Long-running mutations return an operation
//! handle that is polled to a terminal status.

pub mod http;
#[cfg(test)]
pub mod mock;

use crate::manifest::AttrMap;
use async_trait::async_trait;
use std::fmt;
use std::time::Duration;

pub use http::HttpProvider;

/// A resource as the remote API reports it
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteResource {
    pub id: String,
    pub attributes: AttrMap,
}

/// Handle for a long-running remote mutation
#[derive(Debug, Clone)]
pub struct Operation {
    pub id: String,
}

/// Polled status of a long-running operation
#[derive(Debug, Clone, PartialEq)]
pub enum OperationStatus {
    Pending,
    /// Terminal success; deletes carry no resource
    Succeeded(Option<RemoteResource>),
    Failed(String),
}

/// Provider call failure
///
/// `transient` marks failures worth retrying (timeouts, 5xx, rate limits);
/// everything else is permanent and fails the action immediately.
#[derive(Debug, Clone)]
pub struct ProviderError {
    pub message: String,
    pub transient: bool,
}

impl ProviderError {
    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            transient: false,
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            transient: true,
        }
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for ProviderError {}

pub type ProviderResult<T> = Result<T, ProviderError>;

/// Remote API surface the executor needs
#[async_trait]
pub trait Provider: Send + Sync {
    /// Start creating a resource of `kind` with the given attributes
    async fn create(
        &self,
        kind: &str,
        attributes: &AttrMap,
        idempotency_token: &str,
    ) -> ProviderResult<Operation>;

    /// Read the current remote attributes of a resource
    async fn read(&self, id: &str) -> ProviderResult<Option<RemoteResource>>;

    /// Start updating a resource in-place
    async fn update(
        &self,
        id: &str,
        attributes: &AttrMap,
        idempotency_token: &str,
    ) -> ProviderResult<Operation>;

    /// Start deleting a resource
    async fn delete(&self, id: &str, idempotency_token: &str) -> ProviderResult<Operation>;

    /// Poll a long-running operation once
    async fn poll(&self, operation: &Operation) -> ProviderResult<OperationStatus>;
}

const POLL_BASE: Duration = Duration::from_millis(250);
const POLL_CAP: Duration = Duration::from_secs(5);
const MAX_TRANSIENT_RETRIES: u32 = 8;

/// Poll an operation until it reaches a terminal status
///
/// Exponential backoff between polls; transient poll failures are retried up
/// to a fixed budget, permanent ones abort immediately.
pub async fn wait_terminal(
    provider: &dyn Provider,
    operation: &Operation,
) -> ProviderResult<Option<RemoteResource>> {
    let mut delay = POLL_BASE;
    let mut transient_failures = 0u32;

    loop {
        match provider.poll(operation).await {
            Ok(OperationStatus::Succeeded(resource)) => return Ok(resource),
            Ok(OperationStatus::Failed(message)) => {
                return Err(ProviderError::permanent(message));
            }
            Ok(OperationStatus::Pending) => {}
            Err(e) if e.transient => {
                transient_failures += 1;
                if transient_failures > MAX_TRANSIENT_RETRIES {
                    return Err(ProviderError::permanent(format!(
                        "operation '{}' still failing after {} retries: {}",
                        operation.id, MAX_TRANSIENT_RETRIES, e.message
                    )));
                }
            }
            Err(e) => return Err(e),
        }

        tokio::time::sleep(delay).await;
        delay = (delay * 2).min(POLL_CAP);
    }
}
