//! Value Implementation
//!
//! A Value is the fundamental source of change. It holds a piece of state
//! set directly by the host and never depends on anything.
//!
//! # How Values Work
//!
//! 1. Reading a value through a [`Use`](super::Use) context records it as a
//!    dependency of the node being evaluated.
//!
//! 2. Setting a value compares the new contents with the old. An equal
//!    value is ignored; a different one is stored and the change propagates
//!    through the graph before `set` returns.
//!
//! # Equality
//!
//! Plain data compares with `PartialEq`. Shared objects that should only
//! count as equal when they are the same object can be wrapped in
//! [`Shared`], which compares by pointer identity. [`Value::set_forced`]
//! skips the comparison entirely.

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::trace;

use super::context::{StateObject, Use, UsedAs};
use super::runtime::{Evaluate, Runtime};
use super::scope::Scope;
use crate::error::ReactiveError;
use crate::graph::{NodeId, NodeKind};

/// Values have nothing to recompute.
struct ValueNode;

impl Evaluate for ValueNode {
    fn evaluate(&self, _cx: &Use) -> Result<bool, ReactiveError> {
        Ok(false)
    }
}

/// A settable piece of reactive state.
///
/// # Example
///
/// ```rust
/// use trellis_core::Runtime;
///
/// let scope = Runtime::new().scoped();
/// let count = scope.value(0);
///
/// assert!(count.set(5));
/// assert!(!count.set(5));
/// assert_eq!(count.get(), 5);
/// ```
pub struct Value<T> {
    node: NodeId,
    runtime: Runtime,
    value: Arc<RwLock<T>>,
}

impl<T> Value<T>
where
    T: Clone + Send + Sync + PartialEq + 'static,
{
    /// Create a new value in `scope`.
    pub fn new(scope: &Scope, initial: T) -> Self {
        let runtime = scope.runtime().clone();
        let node = runtime.insert_node(NodeKind::Value, Arc::new(ValueNode));
        scope.adopt_node(node);

        Self {
            node,
            runtime,
            value: Arc::new(RwLock::new(initial)),
        }
    }

    /// Get the node backing this value.
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Get the current contents without recording a dependency.
    pub fn get(&self) -> T {
        self.value.read().clone()
    }

    /// Replace the contents.
    ///
    /// Returns `false` and does nothing if the new contents equal the old.
    /// Otherwise every eager dependent is brought up to date before this
    /// returns.
    pub fn set(&self, value: T) -> bool {
        {
            let mut current = self.value.write();
            if *current == value {
                trace!(node = ?self.node, "value unchanged, not propagating");
                return false;
            }
            *current = value;
        }
        self.runtime.mark_changed(self.node);
        true
    }

    /// Replace the contents and propagate, even if they compare equal.
    pub fn set_forced(&self, value: T) {
        *self.value.write() = value;
        self.runtime.mark_changed(self.node);
    }

    /// Modify the contents in place.
    ///
    /// Returns whether the contents changed.
    pub fn update(&self, f: impl FnOnce(&mut T)) -> bool {
        let mut next = self.get();
        f(&mut next);
        self.set(next)
    }
}

impl<T> Clone for Value<T> {
    fn clone(&self) -> Self {
        Self {
            node: self.node,
            runtime: self.runtime.clone(),
            value: Arc::clone(&self.value),
        }
    }
}

impl<T> StateObject<T> for Value<T>
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
        NodeKind::Value
    }

    fn snapshot(&self) -> Option<T> {
        Some(self.value.read().clone())
    }
}

impl<T> From<&Value<T>> for UsedAs<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn from(value: &Value<T>) -> Self {
        UsedAs::State(Arc::new(value.clone()))
    }
}

impl<T> From<Value<T>> for UsedAs<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn from(value: Value<T>) -> Self {
        UsedAs::State(Arc::new(value))
    }
}

impl<T: fmt::Debug> fmt::Debug for Value<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Value")
            .field("node", &self.node)
            .field("value", &*self.value.read())
            .finish()
    }
}

/// A shared object that compares by identity.
///
/// Storing a `Shared<T>` in a state object means a change is only seen when
/// a different object is stored, regardless of the objects' contents.
pub struct Shared<T: ?Sized>(pub Arc<T>);

impl<T> Shared<T> {
    pub fn new(value: T) -> Self {
        Shared(Arc::new(value))
    }
}

impl<T: ?Sized> Clone for Shared<T> {
    fn clone(&self) -> Self {
        Shared(Arc::clone(&self.0))
    }
}

impl<T: ?Sized> PartialEq for Shared<T> {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl<T: ?Sized> Eq for Shared<T> {}

impl<T: ?Sized> Deref for Shared<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for Shared<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Shared").field(&&*self.0).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI32, Ordering};

    #[test]
    fn value_get_set() {
        let scope = Runtime::new().scoped();
        let value = scope.value(42);
        assert_eq!(value.get(), 42);

        assert!(value.set(100));
        assert_eq!(value.get(), 100);
    }

    #[test]
    fn equal_values_are_ignored() {
        let scope = Runtime::new().scoped();
        let value = scope.value(String::from("a"));
        let runs = Arc::new(AtomicI32::new(0));

        let runs_clone = runs.clone();
        let _observer = scope.observer(&value).on_change(move || {
            runs_clone.fetch_add(1, Ordering::SeqCst);
        });

        assert!(!value.set(String::from("a")));
        assert_eq!(runs.load(Ordering::SeqCst), 0);

        assert!(value.set(String::from("b")));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn forced_set_propagates_equal_values() {
        let scope = Runtime::new().scoped();
        let value = scope.value(1);
        let runs = Arc::new(AtomicI32::new(0));

        let runs_clone = runs.clone();
        let _observer = scope.observer(&value).on_change(move || {
            runs_clone.fetch_add(1, Ordering::SeqCst);
        });

        value.set_forced(1);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn update_modifies_in_place() {
        let scope = Runtime::new().scoped();
        let list = scope.value(vec![1, 2]);

        assert!(list.update(|items| items.push(3)));
        assert_eq!(list.get(), vec![1, 2, 3]);
        assert!(!list.update(|_| {}));
    }

    #[test]
    fn shared_compares_by_identity() {
        let first = Shared::new(vec![1]);
        let same_contents = Shared::new(vec![1]);

        assert_eq!(first, first.clone());
        assert_ne!(first, same_contents);
        assert_eq!(first.len(), 1);
    }

    #[test]
    fn clones_share_state() {
        let scope = Runtime::new().scoped();
        let value = scope.value(1);
        let clone = value.clone();

        clone.set(2);
        assert_eq!(value.get(), 2);
        assert_eq!(value.node(), clone.node());
    }
}
