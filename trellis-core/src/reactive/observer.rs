//! Observer Implementation
//!
//! An Observer watches one state object and runs host callbacks when it
//! changes. It is the bridge out of the graph: everything else in the graph
//! is pure, observers are where side effects happen.
//!
//! # How Observers Work
//!
//! 1. Observers are eager. When the watched object's upstream changes, the
//!    observer is brought up to date before the mutation returns.
//!
//! 2. Bringing it up to date brings the watched object up to date. If the
//!    watched object's value actually changed, every change listener runs.
//!
//! 3. Listener failures (panics) are caught and reported, and the
//!    remaining listeners still run.
//!
//! # Differences from Computed
//!
//! - Computeds return a value; observers do not.
//! - Computeds are lazy; observers are eager.

use std::fmt;
use std::sync::Arc;

use tracing::trace;

use super::context::{peek, StateObject, Use};
use super::runtime::{Evaluate, Runtime};
use super::scope::Scope;
use super::subscriber::{Disconnect, Listeners};
use crate::error::{catch_callback, ReactiveError};
use crate::graph::{NodeId, NodeKind};

type WatchFn = dyn Fn(&Use) -> Result<(), ReactiveError> + Send + Sync;

struct ObserverNode {
    watch: Box<WatchFn>,
    listeners: Arc<Listeners>,
}

impl Evaluate for ObserverNode {
    fn evaluate(&self, cx: &Use) -> Result<bool, ReactiveError> {
        (self.watch)(cx)?;

        let listeners = self.listeners.snapshot();
        trace!(node = ?cx.evaluator(), listeners = listeners.len(), "observer firing");
        for listener in listeners {
            if let Err(error) = catch_callback(|| listener()) {
                cx.runtime().report(&error, "running a change listener");
            }
        }
        Ok(false)
    }

    fn destroy(&self) -> Vec<ReactiveError> {
        self.listeners.clear();
        Vec::new()
    }
}

/// Runs host callbacks when a state object changes.
///
/// # Example
///
/// ```rust
/// use std::sync::atomic::{AtomicI32, Ordering};
/// use std::sync::Arc;
/// use trellis_core::Runtime;
///
/// let scope = Runtime::new().scoped();
/// let health = scope.value(100);
/// let hits = Arc::new(AtomicI32::new(0));
///
/// let hits_clone = hits.clone();
/// scope.observer(&health).on_change(move || {
///     hits_clone.fetch_add(1, Ordering::SeqCst);
/// });
///
/// health.set(90);
/// assert_eq!(hits.load(Ordering::SeqCst), 1);
/// ```
#[derive(Clone)]
pub struct Observer {
    node: NodeId,
    runtime: Runtime,
    listeners: Arc<Listeners>,
}

impl Observer {
    /// Create an observer in `scope` watching `watching`.
    pub fn new<T, S>(scope: &Scope, watching: &S) -> Self
    where
        T: 'static,
        S: StateObject<T> + Clone + 'static,
    {
        let listeners = Listeners::new();
        let target = watching.clone();
        let behaviour = ObserverNode {
            watch: Box::new(move |cx: &Use| cx.get::<T, S>(&target).map(drop)),
            listeners: Arc::clone(&listeners),
        };

        let runtime = scope.runtime().clone();
        let node = runtime.insert_node(NodeKind::Observer, Arc::new(behaviour));
        scope.adopt_node(node);

        // Connects the observer to its target. No listeners exist yet.
        if let Err(error) = runtime.update(node, true) {
            runtime.report(&error, "creating an observer");
        }

        Self {
            node,
            runtime,
            listeners,
        }
    }

    /// Get the node backing this observer.
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Run `callback` every time the watched object changes.
    pub fn on_change<F>(&self, callback: F) -> Disconnect
    where
        F: Fn() + Send + Sync + 'static,
    {
        if !self.runtime.is_alive(self.node) {
            return Disconnect::inert();
        }
        self.listeners.add(Arc::new(callback))
    }

    /// Run `callback` once, right now.
    ///
    /// Used for setup that mirrors what a change listener would do, so the
    /// host starts out in sync with the current state. The callback is not
    /// kept, and the returned handle has nothing to disconnect.
    pub fn on_bind<F>(&self, callback: F) -> Disconnect
    where
        F: FnOnce(),
    {
        if let Err(error) = catch_callback(callback) {
            self.runtime.report(&error, "running a bind callback");
        }
        Disconnect::inert()
    }

    /// Get the number of connected listeners.
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }
}

impl fmt::Debug for Observer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observer")
            .field("node", &self.node)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

/// Keep a host property in sync with a state object.
///
/// `apply` runs once with the current value, then again with the new value
/// every time the state object changes. The subscription is owned by
/// `scope`.
pub fn bind<T, S, F>(scope: &Scope, state: &S, apply: F) -> Observer
where
    T: 'static,
    S: StateObject<T> + Clone + 'static,
    F: Fn(T) + Send + Sync + 'static,
{
    let observer = Observer::new(scope, state);
    let apply = Arc::new(apply);

    let sync = {
        let (state, runtime) = (state.clone(), scope.runtime().clone());
        move || match peek(&state) {
            Ok(value) => apply(value),
            Err(error) => runtime.report(&error, "applying a bound value"),
        }
    };

    observer.on_bind(&sync);
    observer.on_change(sync);
    observer
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicI32, Ordering};

    #[test]
    fn observer_fires_on_change() {
        let scope = Runtime::new().scoped();
        let value = scope.value(0);
        let count = Arc::new(AtomicI32::new(0));

        let count_clone = count.clone();
        scope.observer(&value).on_change(move || {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(count.load(Ordering::SeqCst), 0);

        value.set(1);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        value.set(2);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn observer_is_silent_when_computed_settles_on_same_value() {
        let scope = Runtime::new().scoped();
        let value = scope.value(2i32);
        let sign = scope.computed({
            let value = value.clone();
            move |cx, _| Ok(cx.get(&value)?.signum())
        });
        let count = Arc::new(AtomicI32::new(0));

        let count_clone = count.clone();
        scope.observer(&sign).on_change(move || {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });

        value.set(5);
        assert_eq!(count.load(Ordering::SeqCst), 0);
        value.set(-5);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn disconnect_stops_notifications() {
        let scope = Runtime::new().scoped();
        let value = scope.value(0);
        let count = Arc::new(AtomicI32::new(0));

        let count_clone = count.clone();
        let observer = scope.observer(&value);
        let handle = observer.on_change(move || {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });

        value.set(1);
        assert!(handle.disconnect());
        value.set(2);

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(observer.listener_count(), 0);
    }

    #[test]
    fn on_bind_runs_once_immediately() {
        let scope = Runtime::new().scoped();
        let value = scope.value(0);
        let count = Arc::new(AtomicI32::new(0));

        let count_clone = count.clone();
        let observer = scope.observer(&value);
        observer.on_bind(move || {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(count.load(Ordering::SeqCst), 1);

        value.set(1);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(observer.listener_count(), 0);
    }

    #[test]
    fn panicking_listener_does_not_stop_others() {
        let runtime = Runtime::with_config(crate::RuntimeConfig::default().report_errors(false));
        let reports = Arc::new(AtomicI32::new(0));
        let reports_clone = reports.clone();
        runtime.on_error(move |_| {
            reports_clone.fetch_add(1, Ordering::SeqCst);
        });

        let scope = runtime.scoped();
        let value = scope.value(0);
        let count = Arc::new(AtomicI32::new(0));
        let observer = scope.observer(&value);

        observer.on_change(|| panic!("listener exploded"));
        let count_clone = count.clone();
        observer.on_change(move || {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });

        value.set(1);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(reports.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn destroyed_observer_stops_firing() {
        let runtime = Runtime::new();
        let scope = runtime.scoped();
        let value = scope.value(0);
        let inner = scope.inner_scope();
        let count = Arc::new(AtomicI32::new(0));

        let count_clone = count.clone();
        let observer = inner.observer(&value);
        observer.on_change(move || {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });

        assert!(inner.destroy().is_clean());
        value.set(1);

        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert!(runtime.inspect(value.node()).unwrap().dependents.is_empty());
        assert!(!observer.on_change(|| {}).disconnect());
    }

    #[test]
    fn bind_applies_current_and_later_values() {
        let scope = Runtime::new().scoped();
        let title = scope.value("loading".to_string());
        let applied = Arc::new(Mutex::new(Vec::new()));

        let applied_clone = applied.clone();
        bind(&scope, &title, move |text: String| applied_clone.lock().push(text));

        title.set("ready".to_string());
        assert_eq!(*applied.lock(), vec!["loading", "ready"]);
    }
}
