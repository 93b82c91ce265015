//! chime-dispatch: Callback resolution and invocation.
//!
//! Jobs carry their callback as a qualified `"module.function"` name so
//! persisted jobs stay portable across process restarts. At run time the
//! name is resolved against a [`CallbackRegistry`] built at startup and
//! injected into the engine and the service facade.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;

use chime_types::{CallbackArgs, CallbackName};

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// The qualified name resolves to nothing. Raised at schedule time;
    /// never retried.
    #[error("unknown callback: {0}")]
    UnknownCallback(String),
    /// The callback did not finish within the engine's dispatch timeout.
    #[error("callback timed out after {0}s")]
    Timeout(u64),
    /// The callback ran and reported failure.
    #[error("callback execution failed: {0}")]
    Execution(String),
}

/// Outcome of a callback invocation: an optional result string on
/// success, a [`DispatchError`] otherwise.
pub type DispatchResult = Result<Option<String>, DispatchError>;

type BoxedCallbackFuture = Pin<Box<dyn Future<Output = DispatchResult> + Send>>;

/// An invocable unit of work.
#[async_trait]
pub trait Callback: Send + Sync {
    async fn call(&self, args: CallbackArgs) -> DispatchResult;
}

/// Adapter turning an async closure into a [`Callback`].
pub struct CallbackFn<F>(F);

impl<F> CallbackFn<F>
where
    F: Fn(CallbackArgs) -> BoxedCallbackFuture + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

#[async_trait]
impl<F> Callback for CallbackFn<F>
where
    F: Fn(CallbackArgs) -> BoxedCallbackFuture + Send + Sync,
{
    async fn call(&self, args: CallbackArgs) -> DispatchResult {
        (self.0)(args).await
    }
}

/// Named callback table. Built mutably at startup, then shared read-only
/// behind an `Arc` — no process-wide singletons.
#[derive(Default)]
pub struct CallbackRegistry {
    callbacks: HashMap<String, Arc<dyn Callback>>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback under a `"module.function"` name. A bare name
    /// lands in the `main` sentinel module.
    pub fn register(&mut self, name: &str, callback: Arc<dyn Callback>) {
        self.callbacks
            .insert(CallbackName::parse(name).qualified(), callback);
    }

    /// Register an async closure under a `"module.function"` name.
    pub fn register_fn<F>(&mut self, name: &str, f: F)
    where
        F: Fn(CallbackArgs) -> BoxedCallbackFuture + Send + Sync + 'static,
    {
        self.register(name, Arc::new(CallbackFn::new(f)));
    }

    /// Look up an invocable by qualified name.
    pub fn resolve(&self, name: &CallbackName) -> Result<Arc<dyn Callback>, DispatchError> {
        self.callbacks
            .get(&name.qualified())
            .cloned()
            .ok_or_else(|| DispatchError::UnknownCallback(name.qualified()))
    }

    /// Resolve and invoke in one step.
    pub async fn invoke(&self, name: &CallbackName, args: CallbackArgs) -> DispatchResult {
        self.resolve(name)?.call(args).await
    }

    /// Registered qualified names, for diagnostics.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.callbacks.keys().cloned().collect();
        names.sort();
        names
    }
}
