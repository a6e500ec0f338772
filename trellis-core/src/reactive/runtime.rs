//! Reactive Runtime
//!
//! The runtime is the central coordinator that connects values, computeds,
//! observers and followers. It owns the dependency graph and decides when
//! nodes are re-evaluated.
//!
//! # How It Works
//!
//! 1. When a state object is created, it inserts a node into the runtime's
//!    graph and registers the node with the active scope.
//!
//! 2. When a computation reads a state object through its [`Use`] context,
//!    the target is brought up to date and recorded as a dependency. The
//!    recorded set replaces the node's edges once the evaluation succeeds.
//!
//! 3. When a value changes, the runtime:
//!    a. Marks every node downstream of it invalid
//!    b. Brings the eager nodes it reached up to date, oldest first
//!    c. Leaves lazy nodes invalid - they recompute on next read
//!
//! 4. Bringing a node up to date first asks its dependencies whether they
//!    changed since the node last evaluated. Only if one did does the node
//!    itself re-run. A lazy node is therefore never recomputed twice for one
//!    change, and never recomputed at all if nobody reads it.
//!
//! # Thread Safety
//!
//! A runtime is `Send + Sync` and can be handed between threads, but a
//! graph is meant to be driven from one logical thread of control at a
//! time. Locks are only held for bookkeeping and never while user code runs,
//! so user callbacks can freely re-enter the runtime.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use indexmap::{IndexMap, IndexSet};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, trace, warn};

use super::context::Use;
use super::scope::Scope;
use crate::config::RuntimeConfig;
use crate::error::{ErrorReport, ReactiveError};
use crate::graph::{NodeId, NodeKind, NodeStore, Timeliness, Validity};

/// Node-specific behaviour attached to every graph node.
pub(crate) trait Evaluate: Send + Sync {
    /// Recompute the node's internal state.
    ///
    /// Returns whether the node's value meaningfully changed. Reads made
    /// through `cx` become the node's dependency set.
    fn evaluate(&self, cx: &Use) -> Result<bool, ReactiveError>;

    /// Release anything the node owns. Called once, after the node has been
    /// unlinked from the graph.
    fn destroy(&self) -> Vec<ReactiveError> {
        Vec::new()
    }
}

/// Extra behaviour of nodes driven by the host clock.
pub(crate) trait Follow: Send + Sync {
    /// Accumulate elapsed time, consumed by the next evaluation.
    fn advance(&self, seconds: f64);

    /// Whether the follower still has somewhere to go.
    fn is_moving(&self) -> bool;
}

type Behaviour = Arc<dyn Evaluate>;
type ErrorHandler = Arc<dyn Fn(&ErrorReport) + Send + Sync>;

/// Snapshot of a node's graph metadata, for diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeInfo {
    pub id: NodeId,
    pub kind: NodeKind,
    pub timeliness: Timeliness,
    pub validity: Validity,
    pub created_at: u64,
    pub last_change: Option<u64>,
    pub dependencies: Vec<NodeId>,
    pub dependents: Vec<NodeId>,
}

struct RuntimeInner {
    graph: Mutex<NodeStore<Behaviour>>,

    /// Nodes currently evaluating, innermost last.
    evaluating: Mutex<Vec<NodeId>>,

    /// Live followers, forwarded every clock tick.
    followers: Mutex<IndexMap<NodeId, Arc<dyn Follow>>>,

    error_handler: RwLock<Option<ErrorHandler>>,

    config: RuntimeConfig,
}

/// Handle to a reactive graph.
///
/// Cloning the handle is cheap; all clones drive the same graph.
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

impl Runtime {
    /// Create a runtime with the default configuration.
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    /// Create a runtime with the given configuration.
    pub fn with_config(config: RuntimeConfig) -> Self {
        Self {
            inner: Arc::new(RuntimeInner {
                graph: Mutex::new(NodeStore::new()),
                evaluating: Mutex::new(Vec::new()),
                followers: Mutex::new(IndexMap::new()),
                error_handler: RwLock::new(None),
                config,
            }),
        }
    }

    /// Get the runtime's configuration.
    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    /// Create a new root scope in this runtime.
    pub fn scoped(&self) -> Scope {
        Scope::new(self)
    }

    /// Install the host's channel for non-fatal errors.
    ///
    /// Errors that have no caller to return to (a failing observer during a
    /// propagation, a failing cleanup task) are delivered here.
    pub fn on_error<F>(&self, handler: F)
    where
        F: Fn(&ErrorReport) + Send + Sync + 'static,
    {
        *self.inner.error_handler.write() = Some(Arc::new(handler));
    }

    /// Check whether two handles drive the same graph.
    pub fn ptr_eq(&self, other: &Runtime) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    // ------------------------------------------------------------------------
    // Node lifecycle
    // ------------------------------------------------------------------------

    pub(crate) fn insert_node(&self, kind: NodeKind, behaviour: Behaviour) -> NodeId {
        let id = self.inner.graph.lock().insert(kind, behaviour);
        debug!(node = ?id, %kind, "node created");
        id
    }

    pub(crate) fn register_follower(&self, node_id: NodeId, follower: Arc<dyn Follow>) {
        self.inner.followers.lock().insert(node_id, follower);
    }

    /// Unlink a node from the graph and release what it owns.
    ///
    /// Returns `DoubleDispose` if the node was already destroyed, otherwise
    /// the errors raised while releasing the node's own resources.
    pub(crate) fn destroy_node(&self, node_id: NodeId) -> Result<Vec<ReactiveError>, ReactiveError> {
        let node = self.inner.graph.lock().remove(node_id);
        let Some(node) = node else {
            return Err(ReactiveError::DoubleDispose {
                node: format!("{node_id:?}"),
            });
        };

        self.inner.followers.lock().shift_remove(&node_id);
        debug!(node = ?node_id, kind = %node.kind(), "node destroyed");

        // The graph lock is released: the behaviour may tear down scopes,
        // which destroy further nodes.
        Ok(node.into_behaviour().destroy())
    }

    /// Check whether a node is still part of the graph.
    pub fn is_alive(&self, node_id: NodeId) -> bool {
        self.inner.graph.lock().contains(node_id)
    }

    // ------------------------------------------------------------------------
    // Evaluation
    // ------------------------------------------------------------------------

    /// Bring a node up to date.
    ///
    /// A valid node is left alone unless `force` is set. An invalid node
    /// first brings its dependencies up to date and only re-evaluates if one
    /// of them changed since its own last evaluation. Returns whether the
    /// node's value meaningfully changed.
    pub(crate) fn update(&self, node_id: NodeId, force: bool) -> Result<bool, ReactiveError> {
        let (validity, dependencies, last_evaluated) = {
            let graph = self.inner.graph.lock();
            let node = graph
                .get(node_id)
                .ok_or_else(|| ReactiveError::UseAfterDestroy {
                    node: format!("{node_id:?}"),
                })?;
            (node.validity(), node.dependencies().clone(), node.last_evaluated())
        };

        match validity {
            Validity::Busy => return Err(self.cycle_error(node_id)),
            Validity::Valid if !force => return Ok(false),
            _ => {}
        }

        let stale = match last_evaluated {
            _ if force => true,
            None => true,
            Some(since) => self.changed_since(&dependencies, since)?,
        };

        if stale {
            return self.evaluate(node_id);
        }

        if let Some(node) = self.inner.graph.lock().get_mut(node_id) {
            node.validity = Validity::Valid;
        }
        trace!(node = ?node_id, "dependencies unchanged, revalidated");
        Ok(false)
    }

    /// Check whether any of `dependencies` changed after logical time `since`.
    ///
    /// Each dependency is brought up to date first. A dependency that has
    /// been destroyed counts as changed.
    pub(crate) fn changed_since(
        &self,
        dependencies: &IndexSet<NodeId>,
        since: u64,
    ) -> Result<bool, ReactiveError> {
        for &dependency in dependencies {
            if !self.is_alive(dependency) {
                return Ok(true);
            }
            self.update(dependency, false)?;

            let last_change = self
                .inner
                .graph
                .lock()
                .get(dependency)
                .and_then(|node| node.last_change());
            if last_change.is_some_and(|changed_at| changed_at > since) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// The graph's current logical time.
    pub(crate) fn now(&self) -> u64 {
        self.inner.graph.lock().now()
    }

    fn evaluate(&self, node_id: NodeId) -> Result<bool, ReactiveError> {
        let behaviour = {
            let mut graph = self.inner.graph.lock();
            let node = graph
                .get_mut(node_id)
                .ok_or_else(|| ReactiveError::UseAfterDestroy {
                    node: format!("{node_id:?}"),
                })?;
            if node.validity == Validity::Busy {
                drop(graph);
                return Err(self.cycle_error(node_id));
            }
            node.validity = Validity::Busy;
            Arc::clone(node.behaviour())
        };

        let guard = super::context::EvaluationGuard::enter(self, node_id);
        trace!(node = ?node_id, "evaluating");

        let cx = Use::new(self.clone(), node_id);
        let outcome = behaviour.evaluate(&cx);
        let dependencies = cx.close();

        // On error the guard resets the node to invalid and the previous
        // edges stay in place.
        let changed = outcome?;

        let mut graph = self.inner.graph.lock();
        if !graph.contains(node_id) {
            // Destroyed by its own evaluation.
            return Ok(changed);
        }
        graph.replace_dependencies(node_id, &dependencies);

        let now = graph.advance();
        let mut changed = changed;
        if let Some(node) = graph.get_mut(node_id) {
            changed |= node.last_evaluated.is_none();
            node.validity = Validity::Valid;
            node.last_evaluated = Some(now);
            if changed {
                node.last_change = Some(now);
            }
        }
        drop(graph);

        guard.complete();
        Ok(changed)
    }

    /// Record an external change to a node's value and propagate it.
    pub(crate) fn mark_changed(&self, node_id: NodeId) {
        {
            let mut graph = self.inner.graph.lock();
            let now = graph.advance();
            match graph.get_mut(node_id) {
                Some(node) => {
                    node.last_change = Some(now);
                    node.last_evaluated = Some(now);
                }
                None => return,
            }
        }
        self.propagate(node_id);
    }

    /// Re-evaluate a node now and propagate if its value changed.
    ///
    /// Errors are reported rather than returned; this is used from host
    /// entry points (clock ticks, follower setters) with nobody to return to.
    pub(crate) fn refresh(&self, node_id: NodeId) {
        match self.update(node_id, true) {
            Ok(true) => self.propagate(node_id),
            Ok(false) => {}
            Err(ReactiveError::UseAfterDestroy { .. }) => {}
            Err(error) => self.report(&error, "refreshing a follower"),
        }
    }

    /// Invalidate everything downstream of `source` and bring the eager
    /// nodes among them up to date.
    pub(crate) fn propagate(&self, source: NodeId) {
        let eager = self.inner.graph.lock().invalidate_dependents(source);
        trace!(source = ?source, eager = eager.len(), "propagating change");

        for node_id in eager {
            match self.update(node_id, false) {
                Ok(_) => {}
                // Destroyed by an earlier observer in this pass.
                Err(ReactiveError::UseAfterDestroy { .. }) if !self.is_alive(node_id) => {}
                Err(error) => self.report(&error, "propagating a change"),
            }
        }
    }

    // ------------------------------------------------------------------------
    // Host clock
    // ------------------------------------------------------------------------

    /// Forward a clock tick to every live follower.
    ///
    /// Followers that moved re-evaluate and propagate to their dependents
    /// before this returns. Returns whether any follower is still moving,
    /// so the host can stop ticking once everything is at rest.
    pub fn tick(&self, elapsed: Duration) -> bool {
        let seconds = elapsed.as_secs_f64().min(self.inner.config.max_frame_step);
        let followers: Vec<(NodeId, Arc<dyn Follow>)> = self
            .inner
            .followers
            .lock()
            .iter()
            .map(|(id, follower)| (*id, Arc::clone(follower)))
            .collect();

        let mut moving = false;
        for (node_id, follower) in followers {
            if !follower.is_moving() {
                continue;
            }
            follower.advance(seconds);
            self.refresh(node_id);
            moving |= follower.is_moving();
        }
        moving
    }

    /// Whether any live follower still has somewhere to go.
    pub fn is_animating(&self) -> bool {
        self.inner
            .followers
            .lock()
            .values()
            .any(|follower| follower.is_moving())
    }

    // ------------------------------------------------------------------------
    // Evaluation stack
    // ------------------------------------------------------------------------

    pub(crate) fn push_evaluator(&self, node_id: NodeId) {
        self.inner.evaluating.lock().push(node_id);
    }

    pub(crate) fn pop_evaluator(&self, node_id: NodeId) {
        let popped = self.inner.evaluating.lock().pop();

        // Verify we're popping the right evaluation.
        debug_assert_eq!(
            popped,
            Some(node_id),
            "evaluation stack mismatch: expected {node_id:?}, got {popped:?}"
        );
    }

    /// Reset a node whose evaluation did not complete.
    pub(crate) fn abandon(&self, node_id: NodeId) {
        if let Some(node) = self.inner.graph.lock().get_mut(node_id) {
            if node.validity == Validity::Busy {
                node.validity = Validity::Invalid;
            }
        }
        trace!(node = ?node_id, "evaluation abandoned");
    }

    /// Get the node currently evaluating, if any.
    pub fn current_evaluator(&self) -> Option<NodeId> {
        self.inner.evaluating.lock().last().copied()
    }

    fn cycle_error(&self, node_id: NodeId) -> ReactiveError {
        let stack = self.inner.evaluating.lock().clone();
        let start = stack.iter().position(|id| *id == node_id).unwrap_or(0);
        let chain = stack[start..]
            .iter()
            .chain(std::iter::once(&node_id))
            .map(|id| self.describe(*id))
            .collect::<Vec<_>>()
            .join(" -> ");

        ReactiveError::CyclicDependency {
            node: self.describe(node_id),
            chain,
        }
    }

    fn trace(&self) -> String {
        let stack = self.inner.evaluating.lock().clone();
        stack
            .iter()
            .map(|id| self.describe(*id))
            .collect::<Vec<_>>()
            .join(" -> ")
    }

    /// Short human readable name of a node.
    pub fn describe(&self, node_id: NodeId) -> String {
        match self.inner.graph.lock().get(node_id) {
            Some(node) => format!("{}({node_id:?})", node.kind()),
            None => format!("destroyed({node_id:?})"),
        }
    }

    // ------------------------------------------------------------------------
    // Error reporting
    // ------------------------------------------------------------------------

    /// Report a non-fatal error through the host's channel.
    pub fn report(&self, error: &ReactiveError, context: &str) {
        let report = error
            .report()
            .with_context(context)
            .with_trace(self.trace());
        let handler = self.inner.error_handler.read().clone();

        if self.inner.config.report_errors {
            if handler.is_some() {
                warn!(kind = %report.kind, trace = %report.trace, "{report}");
            } else {
                error!(kind = %report.kind, trace = %report.trace, "{report}");
            }
        }

        if let Some(handler) = handler {
            handler(&report);
        }
    }

    // ------------------------------------------------------------------------
    // Diagnostics
    // ------------------------------------------------------------------------

    /// Snapshot a node's graph metadata.
    pub fn inspect(&self, node_id: NodeId) -> Option<NodeInfo> {
        let graph = self.inner.graph.lock();
        let node = graph.get(node_id)?;
        Some(NodeInfo {
            id: node_id,
            kind: node.kind(),
            timeliness: node.timeliness(),
            validity: node.validity(),
            created_at: node.created_at(),
            last_change: node.last_change(),
            dependencies: node.dependencies().iter().copied().collect(),
            dependents: node.dependents().iter().copied().collect(),
        })
    }

    /// Get the number of live nodes.
    pub fn node_count(&self) -> usize {
        self.inner.graph.lock().len()
    }

    /// Check that every edge in the graph is recorded on both ends.
    pub fn edges_consistent(&self) -> bool {
        self.inner.graph.lock().edges_consistent()
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("node_count", &self.node_count())
            .field("followers", &self.inner.followers.lock().len())
            .finish()
    }
}
