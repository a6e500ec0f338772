//! Scopes
//!
//! A scope owns everything created "inside" it and guarantees it is
//! released exactly once.
//!
//! # How Scopes Work
//!
//! 1. Constructors take the scope they create in, and append the new graph
//!    node to it as a task. Users can append their own tasks too: callbacks,
//!    disposable objects, nested scopes, or lists of tasks.
//!
//! 2. Destroying a scope releases its tasks in reverse order of addition,
//!    so later tasks (which may depend on earlier ones) go first.
//!
//! 3. A failing task doesn't stop the teardown. Errors are collected and
//!    reported once every task has been released.
//!
//! 4. Destroying a scope twice, or destroying a node that was already
//!    destroyed through another path, does nothing.
//!
//! Scopes also carry the constructors bound to themselves (`scope.value(..)`,
//! `scope.computed(..)`), so code handed a scope can create children without
//! being handed anything else.

use std::error::Error as StdError;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use super::computed::Computed;
use super::context::{StateObject, Use, UsedAs};
use super::for_each::For;
use super::observer::Observer;
use super::runtime::Runtime;
use super::value::Value;
use crate::animation::{Animatable, Spring, Tween, TweenInfo};
use crate::error::{catch_callback, ReactiveError};
use crate::graph::NodeId;

/// An object with a single cleanup operation.
pub trait Disposable: Send {
    fn dispose(&mut self) -> Result<(), Box<dyn StdError + Send + Sync>>;
}

/// A graph node owned by a scope.
pub struct NodeTask {
    runtime: Runtime,
    node: NodeId,
}

/// Something a scope releases when it is destroyed.
///
/// The variant is fixed when the task is created, so teardown never has to
/// inspect what it is releasing.
pub enum Task {
    /// A nested scope, destroyed recursively.
    Scope(Scope),

    /// A graph node, unlinked from its neighbours and released.
    Node(NodeTask),

    /// A callback invoked with no arguments.
    Callback(Box<dyn FnOnce() + Send>),

    /// An object whose disposal operation is invoked.
    Disposable(Box<dyn Disposable>),

    /// A list of tasks, released in reverse order.
    Many(Vec<Task>),
}

impl Task {
    /// Wrap a callback.
    pub fn callback<F>(callback: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Task::Callback(Box::new(callback))
    }

    /// Wrap a disposable object.
    pub fn disposable<D>(disposable: D) -> Self
    where
        D: Disposable + 'static,
    {
        Task::Disposable(Box::new(disposable))
    }

    fn release(self, errors: &mut Vec<ReactiveError>) {
        match self {
            Task::Scope(scope) => errors.extend(scope.release()),
            Task::Node(task) => match task.runtime.destroy_node(task.node) {
                Ok(node_errors) => errors.extend(node_errors),
                Err(ReactiveError::DoubleDispose { node }) => {
                    debug!(%node, "node already destroyed, skipping");
                }
                Err(error) => errors.push(error),
            },
            Task::Callback(callback) => {
                if let Err(error) = catch_callback(callback) {
                    errors.push(error);
                }
            }
            Task::Disposable(mut disposable) => match catch_callback(|| disposable.dispose()) {
                Ok(Ok(())) => {}
                Ok(Err(error)) => errors.push(ReactiveError::CleanupFailed {
                    message: error.to_string(),
                }),
                Err(error) => errors.push(error),
            },
            Task::Many(tasks) => {
                for task in tasks.into_iter().rev() {
                    task.release(errors);
                }
            }
        }
    }
}

impl From<Scope> for Task {
    fn from(scope: Scope) -> Self {
        Task::Scope(scope)
    }
}

impl From<Vec<Task>> for Task {
    fn from(tasks: Vec<Task>) -> Self {
        Task::Many(tasks)
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Task::Scope(scope) => f.debug_tuple("Scope").field(scope).finish(),
            Task::Node(task) => f.debug_tuple("Node").field(&task.node).finish(),
            Task::Callback(_) => f.write_str("Callback"),
            Task::Disposable(_) => f.write_str("Disposable"),
            Task::Many(tasks) => f.debug_tuple("Many").field(&tasks.len()).finish(),
        }
    }
}

/// Errors collected while tearing down a scope.
#[derive(Debug, Default)]
#[must_use]
pub struct CleanupReport {
    errors: Vec<ReactiveError>,
}

impl CleanupReport {
    /// Check whether every task was released without error.
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }

    /// Get the collected errors, in release order.
    pub fn errors(&self) -> &[ReactiveError] {
        &self.errors
    }

    /// Convert into a `Result`.
    pub fn into_result(self) -> Result<(), Vec<ReactiveError>> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(self.errors)
        }
    }
}

struct ScopeInner {
    runtime: Runtime,
    tasks: Mutex<Vec<Task>>,
    destroyed: AtomicBool,

    /// The scope that owns this one as a task, if any.
    parent: Mutex<Option<Weak<ScopeInner>>>,
}

/// An ownership container for graph nodes and cleanup tasks.
///
/// Cloning the handle is cheap; all clones refer to the same scope.
#[derive(Clone)]
pub struct Scope {
    inner: Arc<ScopeInner>,
}

impl Scope {
    /// Create a new empty scope in the given runtime.
    pub fn new(runtime: &Runtime) -> Self {
        Self {
            inner: Arc::new(ScopeInner {
                runtime: runtime.clone(),
                tasks: Mutex::new(Vec::new()),
                destroyed: AtomicBool::new(false),
                parent: Mutex::new(None),
            }),
        }
    }

    /// Get the runtime this scope creates nodes in.
    pub fn runtime(&self) -> &Runtime {
        &self.inner.runtime
    }

    /// Create a new scope with the same constructors, not owned by this one.
    ///
    /// The caller is responsible for destroying it.
    pub fn derive_scope(&self) -> Scope {
        Scope::new(&self.inner.runtime)
    }

    /// Create a new scope owned by this one.
    ///
    /// It is destroyed along with this scope, or earlier if destroyed
    /// explicitly, in which case it detaches itself from this scope.
    pub fn inner_scope(&self) -> Scope {
        let child = self.derive_scope();
        *child.inner.parent.lock() = Some(Arc::downgrade(&self.inner));
        self.push(Task::Scope(child.clone()));
        child
    }

    /// Add a task to release when this scope is destroyed.
    ///
    /// Adding to a scope that was already destroyed releases the task
    /// immediately. Nested scopes must form a tree: a scope can't own
    /// itself, one of its ancestors, or a scope that already has an owner.
    pub fn add(&self, task: impl Into<Task>) -> Result<(), ReactiveError> {
        let task = task.into();
        if let Task::Scope(child) = &task {
            self.check_adoptable(child)?;
            *child.inner.parent.lock() = Some(Arc::downgrade(&self.inner));
        }
        self.push(task);
        Ok(())
    }

    /// Add a callback to run when this scope is destroyed.
    pub fn defer<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.push(Task::callback(callback));
    }

    pub(crate) fn adopt_node(&self, node: NodeId) {
        self.push(Task::Node(NodeTask {
            runtime: self.inner.runtime.clone(),
            node,
        }));
    }

    fn check_adoptable(&self, child: &Scope) -> Result<(), ReactiveError> {
        if child.ptr_eq(self) {
            return Err(ReactiveError::InvalidScopeTask {
                reason: "a scope can't own itself",
            });
        }
        if child.parent().is_some() {
            return Err(ReactiveError::InvalidScopeTask {
                reason: "the scope is already owned by another scope",
            });
        }

        let mut ancestor = self.parent();
        while let Some(scope) = ancestor {
            if scope.ptr_eq(child) {
                return Err(ReactiveError::InvalidScopeTask {
                    reason: "a scope can't own one of its ancestors",
                });
            }
            ancestor = scope.parent();
        }
        Ok(())
    }

    fn parent(&self) -> Option<Scope> {
        self.inner
            .parent
            .lock()
            .as_ref()
            .and_then(Weak::upgrade)
            .map(|inner| Scope { inner })
    }

    fn push(&self, task: Task) {
        {
            let mut tasks = self.inner.tasks.lock();
            if !self.inner.destroyed.load(Ordering::Acquire) {
                tasks.push(task);
                return;
            }
        }

        warn!(?task, "task added to a destroyed scope, releasing it immediately");
        let mut errors = Vec::new();
        task.release(&mut errors);
        for error in &errors {
            self.inner.runtime.report(error, "releasing a task added after teardown");
        }
    }

    /// Destroy the scope, releasing every task in reverse order.
    ///
    /// Errors raised by individual tasks are reported through the runtime's
    /// error channel and returned. Destroying a scope again does nothing.
    pub fn destroy(&self) -> CleanupReport {
        let errors = self.release();
        for error in &errors {
            self.inner.runtime.report(error, "cleaning up a scope");
        }
        CleanupReport { errors }
    }

    /// Destroy the scope without reporting, handing the errors back.
    pub(crate) fn release(&self) -> Vec<ReactiveError> {
        if self.inner.destroyed.swap(true, Ordering::AcqRel) {
            trace!("scope already destroyed");
            return Vec::new();
        }

        let tasks = std::mem::take(&mut *self.inner.tasks.lock());
        debug!(tasks = tasks.len(), "destroying scope");

        let mut errors = Vec::new();
        for task in tasks.into_iter().rev() {
            task.release(&mut errors);
        }

        // Detach from an owner that is still alive.
        let parent = self.inner.parent.lock().take().and_then(|parent| parent.upgrade());
        if let Some(parent) = parent {
            parent
                .tasks
                .lock()
                .retain(|task| !matches!(task, Task::Scope(scope) if scope.ptr_eq(self)));
        }

        errors
    }

    /// Check whether the scope has been destroyed.
    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.load(Ordering::Acquire)
    }

    /// Get the number of pending tasks.
    pub fn len(&self) -> usize {
        self.inner.tasks.lock().len()
    }

    /// Check whether the scope has no pending tasks.
    pub fn is_empty(&self) -> bool {
        self.inner.tasks.lock().is_empty()
    }

    /// Check whether two handles refer to the same scope.
    pub fn ptr_eq(&self, other: &Scope) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    // ------------------------------------------------------------------------
    // Constructors bound to this scope
    // ------------------------------------------------------------------------

    /// Create a [`Value`] in this scope.
    pub fn value<T>(&self, initial: T) -> Value<T>
    where
        T: Clone + Send + Sync + PartialEq + 'static,
    {
        Value::new(self, initial)
    }

    /// Create a [`Computed`] in this scope.
    pub fn computed<T, F>(&self, compute: F) -> Computed<T>
    where
        T: Clone + Send + Sync + PartialEq + 'static,
        F: Fn(&Use, &Scope) -> Result<T, ReactiveError> + Send + Sync + 'static,
    {
        Computed::new(self, compute)
    }

    /// Create a [`For`] mapping both keys and values.
    pub fn for_pairs<KI, VI, KO, VO, F>(
        &self,
        input: impl Into<UsedAs<IndexMap<KI, VI>>>,
        processor: F,
    ) -> For<KO, VO>
    where
        KI: Clone + Eq + std::hash::Hash + Send + Sync + 'static,
        VI: Clone + PartialEq + Send + Sync + 'static,
        KO: Clone + Eq + std::hash::Hash + fmt::Debug + Send + Sync + 'static,
        VO: Clone + PartialEq + Send + Sync + 'static,
        F: Fn(&Use, &Scope, &KI, &VI) -> Result<(KO, VO), ReactiveError> + Send + Sync + 'static,
    {
        For::pairs(self, input, processor)
    }

    /// Create a [`For`] mapping keys, passing values through.
    pub fn for_keys<KI, V, KO, F>(
        &self,
        input: impl Into<UsedAs<IndexMap<KI, V>>>,
        processor: F,
    ) -> For<KO, V>
    where
        KI: Clone + Eq + std::hash::Hash + Send + Sync + 'static,
        V: Clone + PartialEq + Send + Sync + 'static,
        KO: Clone + Eq + std::hash::Hash + fmt::Debug + Send + Sync + 'static,
        F: Fn(&Use, &Scope, &KI) -> Result<KO, ReactiveError> + Send + Sync + 'static,
    {
        For::keys(self, input, processor)
    }

    /// Create a [`For`] mapping values, keeping keys.
    pub fn for_values<K, VI, VO, F>(
        &self,
        input: impl Into<UsedAs<IndexMap<K, VI>>>,
        processor: F,
    ) -> For<K, VO>
    where
        K: Clone + Eq + std::hash::Hash + fmt::Debug + Send + Sync + 'static,
        VI: Clone + PartialEq + Send + Sync + 'static,
        VO: Clone + PartialEq + Send + Sync + 'static,
        F: Fn(&Use, &Scope, &VI) -> Result<VO, ReactiveError> + Send + Sync + 'static,
    {
        For::values(self, input, processor)
    }

    /// Create an [`Observer`] watching `watching`.
    pub fn observer<T, S>(&self, watching: &S) -> Observer
    where
        T: 'static,
        S: StateObject<T> + Clone + 'static,
    {
        Observer::new(self, watching)
    }

    /// Create a [`Tween`] following `goal`.
    pub fn tween<T>(
        &self,
        goal: impl Into<UsedAs<T>>,
        info: impl Into<UsedAs<TweenInfo>>,
    ) -> Result<Tween<T>, ReactiveError>
    where
        T: Animatable,
    {
        Tween::new(self, goal, info)
    }

    /// Create a [`Spring`] following `goal`.
    pub fn spring<T>(
        &self,
        goal: impl Into<UsedAs<T>>,
        speed: impl Into<UsedAs<f64>>,
        damping: impl Into<UsedAs<f64>>,
    ) -> Result<Spring<T>, ReactiveError>
    where
        T: Animatable,
    {
        Spring::new(self, goal, speed, damping)
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("tasks", &self.len())
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}

/// Release a single task immediately.
///
/// Scopes are destroyed (reporting through their runtime); anything else is
/// released on the spot and its errors are returned.
pub fn do_cleanup(task: impl Into<Task>) -> CleanupReport {
    match task.into() {
        Task::Scope(scope) => scope.destroy(),
        task => {
            let mut errors = Vec::new();
            task.release(&mut errors);
            for error in &errors {
                warn!(%error, "cleanup task failed");
            }
            CleanupReport { errors }
        }
    }
}
