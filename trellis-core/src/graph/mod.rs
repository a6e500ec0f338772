//! Dependency Graph
//!
//! This module implements the dependency graph that tracks relationships
//! between reactive values and the computations that read them.
//!
//! # Overview
//!
//! - Nodes represent state (values, computeds, followers) or behaviour
//!   (observers).
//! - Edges represent dependencies: if A reads B, A is in B's dependent set
//!   and B is in A's dependency set. Both halves always exist together.
//!
//! When a source changes, the graph walks downstream, marks every affected
//! node invalid and hands back the eager nodes that must be brought up to
//! date immediately. Lazy nodes wait until they are read.
//!
//! # Design Decisions
//!
//! 1. Nodes live in a generational arena (`slotmap`), and edges are sets of
//!    ids rather than references. Removing a node is an explicit operation
//!    that unlinks both directions; a stale id simply stops resolving.
//!
//! 2. Edge sets are insertion ordered (`indexmap`), so traversal order is
//!    deterministic.
//!
//! 3. The graph is generic over the per-node payload, so it knows nothing
//!    about how a node is evaluated.

mod node;
mod store;

pub use node::{Node, NodeId, NodeKind, Timeliness, Validity};
pub use store::NodeStore;
