//! Computed Implementation
//!
//! A Computed is a derived value that caches its result. It is lazy: a
//! change upstream only marks it invalid, and it recomputes when something
//! next reads it.
//!
//! # How Computeds Work
//!
//! 1. The first read runs the computation. Every state object read through
//!    the `Use` context becomes a dependency.
//!
//! 2. An upstream change marks the computed invalid without running it.
//!
//! 3. The next read checks whether any dependency actually changed since
//!    the last run. If one did, the computation re-runs; otherwise the
//!    cached value is revalidated as is.
//!
//! Each run also receives a fresh scope. Anything created in it lives until
//! the next successful run replaces it, or until the computed is destroyed.

use std::fmt;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::trace;

use super::context::{peek, StateObject, Use, UsedAs};
use super::runtime::{Evaluate, Runtime};
use super::scope::Scope;
use crate::error::{catch_callback, ReactiveError};
use crate::graph::{NodeId, NodeKind};

type ComputeFn<T> = dyn Fn(&Use, &Scope) -> Result<T, ReactiveError> + Send + Sync;

struct ComputedNode<T> {
    compute: Box<ComputeFn<T>>,
    value: Arc<RwLock<Option<T>>>,

    /// Scope handed to the last successful run.
    scope: Mutex<Option<Scope>>,
}

impl<T> Evaluate for ComputedNode<T>
where
    T: Clone + Send + Sync + PartialEq + 'static,
{
    fn evaluate(&self, cx: &Use) -> Result<bool, ReactiveError> {
        let scope = Scope::new(cx.runtime());

        let outcome = catch_callback(|| (self.compute)(cx, &scope)).and_then(|result| result);
        let next = match outcome {
            Ok(next) => next,
            Err(error) => {
                for cleanup_error in scope.release() {
                    cx.runtime().report(&cleanup_error, "discarding a failed computation");
                }
                return Err(error);
            }
        };

        let changed = {
            let mut value = self.value.write();
            let changed = value.as_ref() != Some(&next);
            *value = Some(next);
            changed
        };

        let previous = self.scope.lock().replace(scope);
        if let Some(previous) = previous {
            for cleanup_error in previous.release() {
                cx.runtime().report(&cleanup_error, "replacing a computation's scope");
            }
        }

        trace!(node = ?cx.evaluator(), changed, "computed evaluated");
        Ok(changed)
    }

    fn destroy(&self) -> Vec<ReactiveError> {
        let scope = self.scope.lock().take();
        scope.map(|scope| scope.release()).unwrap_or_default()
    }
}

/// A lazily recomputed derived value.
///
/// # Example
///
/// ```rust
/// use trellis_core::Runtime;
///
/// let scope = Runtime::new().scoped();
/// let first = scope.value("Ada".to_string());
/// let last = scope.value("Lovelace".to_string());
///
/// let full = scope.computed({
///     let (first, last) = (first.clone(), last.clone());
///     move |cx, _| Ok(format!("{} {}", cx.get(&first)?, cx.get(&last)?))
/// });
///
/// assert_eq!(full.get().unwrap(), "Ada Lovelace");
/// ```
pub struct Computed<T> {
    node: NodeId,
    runtime: Runtime,
    value: Arc<RwLock<Option<T>>>,
}

impl<T> Computed<T>
where
    T: Clone + Send + Sync + PartialEq + 'static,
{
    /// Create a new computed in `scope`.
    ///
    /// The computation does not run until the computed is first read.
    pub fn new<F>(scope: &Scope, compute: F) -> Self
    where
        F: Fn(&Use, &Scope) -> Result<T, ReactiveError> + Send + Sync + 'static,
    {
        let value = Arc::new(RwLock::new(None));
        let behaviour = ComputedNode {
            compute: Box::new(compute),
            value: Arc::clone(&value),
            scope: Mutex::new(None),
        };

        let runtime = scope.runtime().clone();
        let node = runtime.insert_node(NodeKind::Computed, Arc::new(behaviour));
        scope.adopt_node(node);

        Self {
            node,
            runtime,
            value,
        }
    }

    /// Get the node backing this computed.
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Get the up to date value without recording a dependency.
    ///
    /// Runs the computation if it is out of date. Fails if the computation
    /// fails, or if it never produced a value before being destroyed.
    pub fn get(&self) -> Result<T, ReactiveError> {
        peek(self)
    }
}

impl<T> Clone for Computed<T> {
    fn clone(&self) -> Self {
        Self {
            node: self.node,
            runtime: self.runtime.clone(),
            value: Arc::clone(&self.value),
        }
    }
}

impl<T> StateObject<T> for Computed<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn node(&self) -> NodeId {
        self.node
    }

    fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Computed
    }

    fn snapshot(&self) -> Option<T> {
        self.value.read().clone()
    }
}

impl<T> From<&Computed<T>> for UsedAs<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn from(computed: &Computed<T>) -> Self {
        UsedAs::State(Arc::new(computed.clone()))
    }
}

impl<T> From<Computed<T>> for UsedAs<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn from(computed: Computed<T>) -> Self {
        UsedAs::State(Arc::new(computed))
    }
}

impl<T: fmt::Debug> fmt::Debug for Computed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Computed")
            .field("node", &self.node)
            .field("value", &*self.value.read())
            .finish()
    }
}
