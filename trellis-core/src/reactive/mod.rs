//! Reactive Primitives
//!
//! This module implements the reactive graph: values, computeds, keyed
//! transforms and observers, plus the scopes that own them.
//!
//! # Concepts
//!
//! ## Values
//!
//! A Value is a container for state set by the host. Reading it through a
//! [`Use`] context makes the reader depend on it; setting it to something
//! different propagates the change through the graph.
//!
//! ## Computeds
//!
//! A Computed is a derived value that caches its result. It is lazy: it
//! recomputes on the next read after one of its dependencies changed, and
//! only if one of them actually changed.
//!
//! ## For
//!
//! A keyed transform of a table that only re-runs its processor for the
//! entries that changed.
//!
//! ## Observers
//!
//! An Observer runs host callbacks when a state object changes. It is
//! eager: the callbacks have run by the time the change returns.
//!
//! ## Scopes
//!
//! Every node is created in a [`Scope`], which destroys it (and everything
//! else added to it) in reverse order when the scope is destroyed.
//!
//! # Implementation Notes
//!
//! Dependencies are tracked through an explicit [`Use`] context passed to
//! every computation instead of ambient thread-local state, so which node
//! a read belongs to is always visible in the code.

mod computed;
mod context;
mod for_each;
mod observer;
pub(crate) mod runtime;
mod scope;
mod subscriber;
mod value;

pub use computed::Computed;
pub use context::{peek, StateObject, Use, UsedAs};
pub use for_each::For;
pub use observer::{bind, Observer};
pub use runtime::{NodeInfo, Runtime};
pub use scope::{do_cleanup, CleanupReport, Disposable, NodeTask, Scope, Task};
pub use subscriber::{Disconnect, ListenerId};
pub use value::{Shared, Value};
