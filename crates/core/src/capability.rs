//! Capability contract - the opaque unit of work a task delegates to.
//!
//! The scheduler never looks inside a capability. It hands over a context
//! bundle and gets back either a structured result or a classified error.

use async_trait::async_trait;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;

use crate::task::Context;

/// Error reported by a capability.
///
/// The variant decides how the runner reacts: transient failures consume
/// the task's attempt budget, fatal ones fail the task immediately.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CapabilityError {
    /// Recoverable failure, worth another attempt
    #[error("transient failure: {0}")]
    Transient(String),

    /// Non-retryable failure
    #[error("fatal failure: {0}")]
    Fatal(String),
}

impl CapabilityError {
    /// Create a transient error.
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient(message.into())
    }

    /// Create a fatal error.
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal(message.into())
    }

    /// Whether this error must not be retried.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }

    /// The bare message, without the classification prefix.
    pub fn message(&self) -> &str {
        match self {
            Self::Transient(m) | Self::Fatal(m) => m,
        }
    }
}

/// An executable unit that produces a structured result from a context bundle.
///
/// Implementations must be safe to call concurrently for different tasks and
/// must not share mutable state with the scheduler.
#[async_trait]
pub trait Capability: Send + Sync {
    /// Identifier used by the registry and in diagnostics.
    fn id(&self) -> &str;

    /// Produce a result from the given context.
    async fn execute(&self, context: Context) -> Result<Value, CapabilityError>;
}

/// Capability backed by an async closure.
pub struct FnCapability<F> {
    id: String,
    f: F,
}

impl<F, Fut> FnCapability<F>
where
    F: Fn(Context) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, CapabilityError>> + Send,
{
    /// Wrap a closure.
    pub fn new(id: impl Into<String>, f: F) -> Self {
        Self { id: id.into(), f }
    }
}

#[async_trait]
impl<F, Fut> Capability for FnCapability<F>
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, CapabilityError>> + Send + 'static,
{
    fn id(&self) -> &str {
        &self.id
    }

    async fn execute(&self, context: Context) -> Result<Value, CapabilityError> {
        (self.f)(context).await
    }
}

/// Capability backed by a synchronous closure, run on the blocking worker pool.
///
/// A call that outlives its timeout is abandoned, not interrupted.
pub struct BlockingCapability<F> {
    id: String,
    f: Arc<F>,
}

impl<F> BlockingCapability<F>
where
    F: Fn(Context) -> Result<Value, CapabilityError> + Send + Sync + 'static,
{
    /// Wrap a blocking closure.
    pub fn new(id: impl Into<String>, f: F) -> Self {
        Self {
            id: id.into(),
            f: Arc::new(f),
        }
    }
}

#[async_trait]
impl<F> Capability for BlockingCapability<F>
where
    F: Fn(Context) -> Result<Value, CapabilityError> + Send + Sync + 'static,
{
    fn id(&self) -> &str {
        &self.id
    }

    async fn execute(&self, context: Context) -> Result<Value, CapabilityError> {
        let f = Arc::clone(&self.f);
        tokio::task::spawn_blocking(move || f(context))
            .await
            .map_err(|e| CapabilityError::fatal(format!("blocking call did not finish: {e}")))?
    }
}

/// Shorthand for an async closure capability behind an `Arc`.
pub fn from_fn<F, Fut>(id: impl Into<String>, f: F) -> Arc<dyn Capability>
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, CapabilityError>> + Send + 'static,
{
    Arc::new(FnCapability::new(id, f))
}

/// Shorthand for a blocking closure capability behind an `Arc`.
pub fn blocking<F>(id: impl Into<String>, f: F) -> Arc<dyn Capability>
where
    F: Fn(Context) -> Result<Value, CapabilityError> + Send + Sync + 'static,
{
    Arc::new(BlockingCapability::new(id, f))
}
