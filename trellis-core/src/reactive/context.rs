//! Use Context
//!
//! Every evaluation is handed a [`Use`] context. Reading a state object
//! through it records the object as a dependency of the node being
//! evaluated; reading through [`peek`] does not.
//!
//! # Implementation
//!
//! The context is an explicit value rather than ambient state: it carries
//! the runtime, the id of the evaluating node and the set of dependencies
//! recorded so far. Nested evaluations each get their own context, so the
//! "current evaluator" is simply whichever context the code was handed.
//!
//! The runtime also keeps a stack of evaluating nodes for cycle reports.
//! [`EvaluationGuard`] pushes onto that stack and pops when dropped, so the
//! stack stays correct even if a computation panics.
//!
//! Recorded dependencies only become edges once the evaluation succeeds. A
//! failed evaluation discards them and keeps the previous edges.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use indexmap::IndexSet;
use parking_lot::Mutex;

use super::runtime::Runtime;
use crate::error::ReactiveError;
use crate::graph::{NodeId, NodeKind};

/// An object that stores a piece of reactive state.
pub trait StateObject<T>: Send + Sync {
    /// The node backing this object.
    fn node(&self) -> NodeId;

    /// The runtime the node lives in.
    fn runtime(&self) -> &Runtime;

    /// What kind of state object this is.
    fn kind(&self) -> NodeKind;

    /// The cached value, without bringing the node up to date.
    ///
    /// `None` if the object never successfully computed a value.
    fn snapshot(&self) -> Option<T>;
}

/// Either a plain value or a state object holding one.
///
/// Inputs that may be reactive (goals of followers, For inputs, tween
/// settings) accept this, so callers can pass constants without wrapping
/// them in a `Value`.
pub enum UsedAs<T> {
    Constant(T),
    State(Arc<dyn StateObject<T>>),
}

impl<T> UsedAs<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Wrap a state object.
    pub fn state<S>(state: S) -> Self
    where
        S: StateObject<T> + 'static,
    {
        UsedAs::State(Arc::new(state))
    }

    /// Read the value without recording a dependency.
    pub fn peek(&self) -> Result<T, ReactiveError> {
        match self {
            UsedAs::Constant(value) => Ok(value.clone()),
            UsedAs::State(state) => peek(state.as_ref()),
        }
    }

    /// Check whether this is backed by a state object.
    pub fn is_state(&self) -> bool {
        matches!(self, UsedAs::State(_))
    }
}

impl<T: Clone> Clone for UsedAs<T> {
    fn clone(&self) -> Self {
        match self {
            UsedAs::Constant(value) => UsedAs::Constant(value.clone()),
            UsedAs::State(state) => UsedAs::State(Arc::clone(state)),
        }
    }
}

/// Read a state object's value without recording a dependency.
///
/// The object is brought up to date first, so a lazy object is never read
/// stale. A destroyed object returns its last value.
pub fn peek<T, S>(target: &S) -> Result<T, ReactiveError>
where
    S: StateObject<T> + ?Sized,
{
    match target.runtime().update(target.node(), false) {
        Ok(_) | Err(ReactiveError::UseAfterDestroy { .. }) => {}
        Err(error) => return Err(error),
    }
    target
        .snapshot()
        .ok_or_else(|| ReactiveError::UseAfterDestroy {
            node: target.runtime().describe(target.node()),
        })
}

/// Dependencies collected by one evaluation.
struct Frame {
    open: AtomicBool,
    dependencies: Mutex<IndexSet<NodeId>>,
}

impl Frame {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            open: AtomicBool::new(true),
            dependencies: Mutex::new(IndexSet::new()),
        })
    }
}

/// The evaluation context handed to every computation.
///
/// # Example
///
/// ```rust
/// use trellis_core::Runtime;
///
/// let runtime = Runtime::new();
/// let scope = runtime.scoped();
///
/// let count = scope.value(2);
/// let count_clone = count.clone();
/// let doubled = scope.computed(move |cx, _| Ok(cx.get(&count_clone)? * 2));
///
/// assert_eq!(doubled.get().unwrap(), 4);
/// count.set(5);
/// assert_eq!(doubled.get().unwrap(), 10);
/// ```
#[derive(Clone)]
pub struct Use {
    runtime: Runtime,
    evaluator: NodeId,
    frame: Arc<Frame>,
}

impl Use {
    pub(crate) fn new(runtime: Runtime, evaluator: NodeId) -> Self {
        Self {
            runtime,
            evaluator,
            frame: Frame::new(),
        }
    }

    /// The node being evaluated.
    pub fn evaluator(&self) -> NodeId {
        self.evaluator
    }

    /// The runtime the evaluation runs in.
    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    /// Whether the evaluation this context belongs to is still running.
    pub fn is_open(&self) -> bool {
        self.frame.open.load(Ordering::Acquire)
    }

    /// Read a state object and record it as a dependency.
    pub fn get<T, S>(&self, target: &S) -> Result<T, ReactiveError>
    where
        S: StateObject<T> + ?Sized,
    {
        if !self.is_open() {
            return Err(ReactiveError::StaleReadOutsideEvaluation);
        }
        if !target.runtime().ptr_eq(&self.runtime) {
            // Edges never cross graphs; read it like a plain value.
            tracing::debug!(node = ?target.node(), "read across runtimes is not tracked");
            return peek(target);
        }

        let node = target.node();
        if !self.runtime.is_alive(node) {
            return Err(ReactiveError::UseAfterDestroy {
                node: self.runtime.describe(node),
            });
        }

        self.runtime.update(node, false)?;
        self.record(node);

        target
            .snapshot()
            .ok_or_else(|| ReactiveError::UseAfterDestroy {
                node: self.runtime.describe(node),
            })
    }

    /// Read a constant-or-state input, recording a dependency if it is state.
    pub fn resolve<T>(&self, target: &UsedAs<T>) -> Result<T, ReactiveError>
    where
        T: Clone,
    {
        match target {
            UsedAs::Constant(value) => Ok(value.clone()),
            UsedAs::State(state) => self.get(state.as_ref()),
        }
    }

    /// A context for the same evaluator that records into its own set.
    ///
    /// Used to find out what one part of an evaluation depended on.
    pub(crate) fn fork(&self) -> Use {
        Use::new(self.runtime.clone(), self.evaluator)
    }

    pub(crate) fn record(&self, node_id: NodeId) {
        if node_id != self.evaluator {
            self.frame.dependencies.lock().insert(node_id);
        }
    }

    /// Close the context and hand back what it recorded.
    pub(crate) fn close(&self) -> IndexSet<NodeId> {
        self.frame.open.store(false, Ordering::Release);
        std::mem::take(&mut *self.frame.dependencies.lock())
    }
}

impl std::fmt::Debug for Use {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Use")
            .field("evaluator", &self.evaluator)
            .field("open", &self.is_open())
            .field("dependencies", &self.frame.dependencies.lock().len())
            .finish()
    }
}

/// Guard that keeps the runtime's evaluation stack in step.
///
/// Dropping the guard without calling [`complete`](Self::complete) means
/// the evaluation failed or panicked: the node goes back to invalid so the
/// next read retries it.
pub(crate) struct EvaluationGuard<'a> {
    runtime: &'a Runtime,
    node_id: NodeId,
    completed: bool,
}

impl<'a> EvaluationGuard<'a> {
    pub(crate) fn enter(runtime: &'a Runtime, node_id: NodeId) -> Self {
        runtime.push_evaluator(node_id);
        Self {
            runtime,
            node_id,
            completed: false,
        }
    }

    pub(crate) fn complete(mut self) {
        self.completed = true;
    }
}

impl Drop for EvaluationGuard<'_> {
    fn drop(&mut self) {
        self.runtime.pop_evaluator(self.node_id);
        if !self.completed {
            self.runtime.abandon(self.node_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Validity;

    #[test]
    fn guard_tracks_evaluator() {
        let runtime = Runtime::new();
        let scope = runtime.scoped();
        let value = scope.value(1);

        assert!(runtime.current_evaluator().is_none());

        {
            let _guard = EvaluationGuard::enter(&runtime, value.node());
            assert_eq!(runtime.current_evaluator(), Some(value.node()));
        }

        // Guard should be cleaned up after drop
        assert!(runtime.current_evaluator().is_none());
    }

    #[test]
    fn nested_guards() {
        let runtime = Runtime::new();
        let scope = runtime.scoped();
        let outer = scope.value(1);
        let inner = scope.value(2);

        {
            let _outer = EvaluationGuard::enter(&runtime, outer.node());
            {
                let _inner = EvaluationGuard::enter(&runtime, inner.node());
                assert_eq!(runtime.current_evaluator(), Some(inner.node()));
            }

            // After inner guard drops, outer should be current
            assert_eq!(runtime.current_evaluator(), Some(outer.node()));
        }

        assert!(runtime.current_evaluator().is_none());
    }

    #[test]
    fn context_records_reads() {
        let runtime = Runtime::new();
        let scope = runtime.scoped();
        let a = scope.value(1);
        let b = scope.value(2);
        let observer_node = scope.value(0).node();

        let cx = Use::new(runtime.clone(), observer_node);
        assert_eq!(cx.get(&a).unwrap() + cx.get(&b).unwrap(), 3);

        let recorded = cx.close();
        assert_eq!(recorded.len(), 2);
        assert!(recorded.contains(&a.node()));
        assert!(recorded.contains(&b.node()));
    }

    #[test]
    fn closed_context_refuses_reads() {
        let runtime = Runtime::new();
        let scope = runtime.scoped();
        let a = scope.value(1);

        let cx = Use::new(runtime.clone(), a.node());
        cx.close();

        let error = cx.get(&a).unwrap_err();
        assert_eq!(error, ReactiveError::StaleReadOutsideEvaluation);
    }

    #[test]
    fn forked_context_records_separately() {
        let runtime = Runtime::new();
        let scope = runtime.scoped();
        let a = scope.value(1);
        let b = scope.value(2);
        let evaluator = scope.value(0).node();

        let cx = Use::new(runtime.clone(), evaluator);
        cx.get(&a).unwrap();

        let fork = cx.fork();
        fork.get(&b).unwrap();

        assert_eq!(fork.close().len(), 1);
        assert_eq!(cx.close().len(), 1);
    }

    #[test]
    fn constants_resolve_to_themselves() {
        let runtime = Runtime::new();
        let scope = runtime.scoped();
        let evaluator = scope.value(0).node();

        let cx = Use::new(runtime, evaluator);
        assert_eq!(cx.resolve(&UsedAs::Constant(7)).unwrap(), 7);
        assert!(cx.close().is_empty());
    }

    #[test]
    fn peek_does_not_record() {
        let runtime = Runtime::new();
        let scope = runtime.scoped();
        let a = scope.value(3);
        let derived = scope.computed({
            let a = a.clone();
            move |_, _| peek(&a)
        });

        assert_eq!(derived.get().unwrap(), 3);
        let info = runtime.inspect(derived.node()).unwrap();
        assert!(info.dependencies.is_empty());
        assert_eq!(info.validity, Validity::Valid);
    }
}
