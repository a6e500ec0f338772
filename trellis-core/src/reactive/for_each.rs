//! Keyed Transforms
//!
//! A [`For`] maps an input table to an output table entry by entry, and
//! only re-runs its processor for the entries that actually changed.
//!
//! # How Reuse Works
//!
//! Every input entry remembers what it was computed from: its input value,
//! the state objects its processor read, and the logical time it ran at.
//! On re-evaluation:
//!
//! 1. An input key seen last time, with an equal input value and no
//!    dependency changed since it ran, reuses its output as is.
//!
//! 2. Any other input key runs the processor in a fresh scope owned by
//!    the entry.
//!
//! 3. Entries whose key disappeared, or which were recomputed, have their
//!    old scope destroyed, so per-entry state is torn down individually.
//!
//! If two entries produce the same output key, the whole run fails with
//! `DuplicateOutputKey` and the previous entries stay in place.

use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace};

use super::context::{peek, StateObject, Use, UsedAs};
use super::runtime::{Evaluate, Runtime};
use super::scope::Scope;
use crate::error::{catch_callback, ReactiveError};
use crate::graph::{NodeId, NodeKind};

type Processor<KI, VI, KO, VO> =
    dyn Fn(&Use, &Scope, &KI, &VI) -> Result<(KO, VO), ReactiveError> + Send + Sync;

/// One processed input entry.
struct Entry<VI, KO, VO> {
    input: VI,
    key: KO,
    value: VO,
    scope: Scope,
    dependencies: IndexSet<NodeId>,
    computed_at: u64,
}

/// What happens to an input entry in the current run.
enum Slot<VI, KO, VO> {
    Reused(VI),
    Fresh(Entry<VI, KO, VO>),
}

struct ForNode<KI, VI, KO, VO> {
    input: UsedAs<IndexMap<KI, VI>>,
    processor: Box<Processor<KI, VI, KO, VO>>,

    /// Set when output values are input values passed through; reused
    /// entries then pick up the new input value without re-running.
    passthrough: Option<fn(&VI) -> VO>,

    entries: Mutex<IndexMap<KI, Entry<VI, KO, VO>>>,
    output: Arc<RwLock<Option<IndexMap<KO, VO>>>>,
}

impl<KI, VI, KO, VO> ForNode<KI, VI, KO, VO>
where
    KI: Clone + Eq + Hash + Send + Sync + 'static,
    VI: Clone + PartialEq + Send + Sync + 'static,
    KO: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static,
    VO: Clone + PartialEq + Send + Sync + 'static,
{
    fn reusable(
        &self,
        cx: &Use,
        entry: &Entry<VI, KO, VO>,
        input: &VI,
    ) -> Result<bool, ReactiveError> {
        if self.passthrough.is_none() && entry.input != *input {
            return Ok(false);
        }
        Ok(!cx
            .runtime()
            .changed_since(&entry.dependencies, entry.computed_at)?)
    }

    fn process(&self, cx: &Use, key: &KI, input: &VI) -> Result<Entry<VI, KO, VO>, ReactiveError> {
        let scope = Scope::new(cx.runtime());
        let entry_cx = cx.fork();

        let outcome = catch_callback(|| (self.processor)(&entry_cx, &scope, key, input))
            .and_then(|result| result);
        let dependencies = entry_cx.close();

        match outcome {
            Ok((key, value)) => Ok(Entry {
                input: input.clone(),
                key,
                value,
                scope,
                dependencies,
                computed_at: cx.runtime().now(),
            }),
            Err(error) => {
                for cleanup_error in scope.release() {
                    cx.runtime().report(&cleanup_error, "discarding a failed entry");
                }
                Err(error)
            }
        }
    }

    /// Decide the fate of every input entry, and build the output table.
    fn plan(
        &self,
        cx: &Use,
        input: &IndexMap<KI, VI>,
        previous: &IndexMap<KI, Entry<VI, KO, VO>>,
        plan: &mut Vec<(KI, Slot<VI, KO, VO>)>,
    ) -> Result<IndexMap<KO, VO>, ReactiveError> {
        let mut output = IndexMap::with_capacity(input.len());

        for (key, value) in input {
            let reused = match previous.get(key) {
                Some(entry) if self.reusable(cx, entry, value)? => Some(entry),
                _ => None,
            };

            let (key_out, value_out, slot) = match reused {
                Some(entry) => {
                    for dependency in &entry.dependencies {
                        cx.record(*dependency);
                    }
                    let value_out = match self.passthrough {
                        Some(passthrough) => passthrough(value),
                        None => entry.value.clone(),
                    };
                    (entry.key.clone(), value_out, Slot::Reused(value.clone()))
                }
                None => {
                    let entry = self.process(cx, key, value)?;
                    for dependency in &entry.dependencies {
                        cx.record(*dependency);
                    }
                    (entry.key.clone(), entry.value.clone(), Slot::Fresh(entry))
                }
            };

            // Pushed before the duplicate check so a failed run still
            // releases this entry's scope.
            plan.push((key.clone(), slot));
            if output.contains_key(&key_out) {
                return Err(ReactiveError::DuplicateOutputKey {
                    key: format!("{key_out:?}"),
                });
            }
            output.insert(key_out, value_out);
        }

        Ok(output)
    }
}

impl<KI, VI, KO, VO> Evaluate for ForNode<KI, VI, KO, VO>
where
    KI: Clone + Eq + Hash + Send + Sync + 'static,
    VI: Clone + PartialEq + Send + Sync + 'static,
    KO: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static,
    VO: Clone + PartialEq + Send + Sync + 'static,
{
    fn evaluate(&self, cx: &Use) -> Result<bool, ReactiveError> {
        let input = cx.resolve(&self.input)?;

        // User code runs below, so the entries are taken out of the lock.
        let mut previous = std::mem::take(&mut *self.entries.lock());
        let mut plan = Vec::with_capacity(input.len());

        let output = match self.plan(cx, &input, &previous, &mut plan) {
            Ok(output) => output,
            Err(error) => {
                for (_, slot) in plan.into_iter().rev() {
                    if let Slot::Fresh(entry) = slot {
                        for cleanup_error in entry.scope.release() {
                            cx.runtime().report(&cleanup_error, "discarding a failed entry");
                        }
                    }
                }
                *self.entries.lock() = previous;
                return Err(error);
            }
        };

        let mut entries = IndexMap::with_capacity(plan.len());
        let mut fresh = 0;
        for (key, slot) in plan {
            match slot {
                Slot::Reused(input_value) => {
                    if let Some(mut entry) = previous.shift_remove(&key) {
                        if let Some(passthrough) = self.passthrough {
                            entry.value = passthrough(&input_value);
                        }
                        entry.input = input_value;
                        entries.insert(key, entry);
                    }
                }
                Slot::Fresh(entry) => {
                    fresh += 1;
                    entries.insert(key, entry);
                }
            }
        }
        *self.entries.lock() = entries;

        // Whatever is left was removed from the input or recomputed.
        let released = previous.len();
        for (_, entry) in previous.into_iter().rev() {
            for cleanup_error in entry.scope.release() {
                cx.runtime().report(&cleanup_error, "releasing a replaced entry");
            }
        }
        debug!(node = ?cx.evaluator(), fresh, released, "keyed transform rebuilt");

        let changed = {
            let mut current = self.output.write();
            let changed = current.as_ref() != Some(&output);
            *current = Some(output);
            changed
        };
        trace!(node = ?cx.evaluator(), changed, "keyed transform evaluated");
        Ok(changed)
    }

    fn destroy(&self) -> Vec<ReactiveError> {
        let entries = std::mem::take(&mut *self.entries.lock());
        let mut errors = Vec::new();
        for (_, entry) in entries.into_iter().rev() {
            errors.extend(entry.scope.release());
        }
        errors
    }
}

/// A keyed transform of a table.
///
/// Created with [`Scope::for_pairs`], [`Scope::for_keys`] or
/// [`Scope::for_values`]. Lazy, like a computed.
///
/// # Example
///
/// ```rust
/// use indexmap::IndexMap;
/// use trellis_core::Runtime;
///
/// let scope = Runtime::new().scoped();
/// let prices = scope.value(IndexMap::from([("tea", 3), ("cake", 5)]));
///
/// let doubled = scope.for_values(&prices, |_, _, price| Ok(price * 2));
///
/// assert_eq!(doubled.get().unwrap()["cake"], 10);
/// ```
pub struct For<KO, VO> {
    node: NodeId,
    runtime: Runtime,
    output: Arc<RwLock<Option<IndexMap<KO, VO>>>>,
}

impl<KO, VO> For<KO, VO>
where
    KO: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static,
    VO: Clone + PartialEq + Send + Sync + 'static,
{
    fn build<KI, VI>(
        scope: &Scope,
        input: UsedAs<IndexMap<KI, VI>>,
        processor: Box<Processor<KI, VI, KO, VO>>,
        passthrough: Option<fn(&VI) -> VO>,
    ) -> Self
    where
        KI: Clone + Eq + Hash + Send + Sync + 'static,
        VI: Clone + PartialEq + Send + Sync + 'static,
    {
        let output = Arc::new(RwLock::new(None));
        let behaviour = ForNode {
            input,
            processor,
            passthrough,
            entries: Mutex::new(IndexMap::new()),
            output: Arc::clone(&output),
        };

        let runtime = scope.runtime().clone();
        let node = runtime.insert_node(NodeKind::For, Arc::new(behaviour));
        scope.adopt_node(node);

        Self {
            node,
            runtime,
            output,
        }
    }

    /// Map every entry to a new key and value.
    pub fn pairs<KI, VI, F>(
        scope: &Scope,
        input: impl Into<UsedAs<IndexMap<KI, VI>>>,
        processor: F,
    ) -> Self
    where
        KI: Clone + Eq + Hash + Send + Sync + 'static,
        VI: Clone + PartialEq + Send + Sync + 'static,
        F: Fn(&Use, &Scope, &KI, &VI) -> Result<(KO, VO), ReactiveError> + Send + Sync + 'static,
    {
        Self::build(scope, input.into(), Box::new(processor), None)
    }

    /// Map every key, keeping values.
    ///
    /// The processor only sees the key, so an entry whose value changed
    /// keeps its output key and picks up the new value without re-running.
    pub fn keys<KI, F>(
        scope: &Scope,
        input: impl Into<UsedAs<IndexMap<KI, VO>>>,
        processor: F,
    ) -> Self
    where
        KI: Clone + Eq + Hash + Send + Sync + 'static,
        F: Fn(&Use, &Scope, &KI) -> Result<KO, ReactiveError> + Send + Sync + 'static,
    {
        let pass_value: fn(&VO) -> VO = VO::clone;
        let processor = move |cx: &Use, scope: &Scope, key: &KI, value: &VO| -> Result<(KO, VO), ReactiveError> {
            Ok((processor(cx, scope, key)?, value.clone()))
        };
        Self::build(scope, input.into(), Box::new(processor), Some(pass_value))
    }

    /// Map every value, keeping keys.
    pub fn values<VI, F>(
        scope: &Scope,
        input: impl Into<UsedAs<IndexMap<KO, VI>>>,
        processor: F,
    ) -> Self
    where
        VI: Clone + PartialEq + Send + Sync + 'static,
        F: Fn(&Use, &Scope, &VI) -> Result<VO, ReactiveError> + Send + Sync + 'static,
    {
        let processor = move |cx: &Use, scope: &Scope, key: &KO, value: &VI| -> Result<(KO, VO), ReactiveError> {
            Ok((key.clone(), processor(cx, scope, value)?))
        };
        Self::build(scope, input.into(), Box::new(processor), None)
    }

    /// Get the node backing this transform.
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Get the up to date output table without recording a dependency.
    pub fn get(&self) -> Result<IndexMap<KO, VO>, ReactiveError> {
        peek(self)
    }
}

impl<KO, VO> Clone for For<KO, VO> {
    fn clone(&self) -> Self {
        Self {
            node: self.node,
            runtime: self.runtime.clone(),
            output: Arc::clone(&self.output),
        }
    }
}

impl<KO, VO> StateObject<IndexMap<KO, VO>> for For<KO, VO>
where
    KO: Clone + Send + Sync + 'static,
    VO: Clone + Send + Sync + 'static,
{
    fn node(&self) -> NodeId {
        self.node
    }

    fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    fn kind(&self) -> NodeKind {
        NodeKind::For
    }

    fn snapshot(&self) -> Option<IndexMap<KO, VO>> {
        self.output.read().clone()
    }
}

impl<KO, VO> From<&For<KO, VO>> for UsedAs<IndexMap<KO, VO>>
where
    KO: Clone + Send + Sync + 'static,
    VO: Clone + Send + Sync + 'static,
{
    fn from(transform: &For<KO, VO>) -> Self {
        UsedAs::State(Arc::new(transform.clone()))
    }
}

impl<KO: fmt::Debug, VO: fmt::Debug> fmt::Debug for For<KO, VO> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("For")
            .field("node", &self.node)
            .field("output", &*self.output.read())
            .finish()
    }
}
