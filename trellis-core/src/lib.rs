//! Trellis Core
//!
//! This crate provides the runtime for the Trellis reactive state engine.
//! It implements:
//!
//! - A dependency graph with lazy and eager nodes
//! - Reactive primitives (values, computeds, keyed transforms, observers)
//! - Scoped ownership and deterministic teardown
//! - Clock-driven followers (tweens and springs)
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `graph`: Node arena and dependency edge bookkeeping
//! - `reactive`: Runtime, evaluation context, scopes and state objects
//! - `animation`: Followers and the host clock driver
//! - `error`: Error kinds and structured error reports
//! - `config`: Runtime tunables
//!
//! # Example
//!
//! ```rust
//! use std::sync::atomic::{AtomicI32, Ordering};
//! use std::sync::Arc;
//! use trellis_core::Runtime;
//!
//! let runtime = Runtime::new();
//! let scope = runtime.scoped();
//!
//! // Create a value
//! let count = scope.value(1);
//!
//! // Create a derived value
//! let doubled = scope.computed({
//!     let count = count.clone();
//!     move |cx, _| Ok(cx.get(&count)? * 2)
//! });
//!
//! // Observe it
//! let runs = Arc::new(AtomicI32::new(0));
//! let runs_clone = runs.clone();
//! scope.observer(&doubled).on_change(move || {
//!     runs_clone.fetch_add(1, Ordering::SeqCst);
//! });
//!
//! // Update the value
//! count.set(5);
//! // The observer ran before `set` returned
//! assert_eq!(runs.load(Ordering::SeqCst), 1);
//! assert_eq!(doubled.get().unwrap(), 10);
//!
//! // Tear everything down
//! assert!(scope.destroy().is_clean());
//! ```

pub mod animation;
pub mod config;
pub mod error;
pub mod graph;
pub mod reactive;

pub use animation::{animate, Animatable, Easing, Spring, Tween, TweenInfo};
pub use config::RuntimeConfig;
pub use error::{safe, ErrorKind, ErrorReport, ReactiveError};
pub use graph::{NodeId, NodeKind, Timeliness, Validity};
pub use reactive::{
    bind, do_cleanup, peek, CleanupReport, Computed, Disconnect, Disposable, For, Observer,
    Runtime, Scope, Shared, StateObject, Task, Use, UsedAs, Value,
};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
