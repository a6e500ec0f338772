//! Graph Nodes
//!
//! This module defines the metadata every node in the dependency graph
//! carries, independent of what the node computes.

use std::fmt;

use indexmap::IndexSet;
use slotmap::new_key_type;

new_key_type! {
    /// Unique identifier for a node in the dependency graph.
    ///
    /// Ids are generational: once a node is removed, its id never resolves
    /// again, even if the slot is reused.
    pub struct NodeId;
}

/// The kind of node in the dependency graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    /// A source node holding user-mutable data.
    Value,

    /// A derived node whose value is a function of other nodes.
    Computed,

    /// A derived mapping built entry by entry from an input mapping.
    For,

    /// A follower that interpolates towards its goal over time.
    Tween,

    /// A follower that is pulled towards its goal by a simulated spring.
    Spring,

    /// An eager node with no value that runs callbacks on change.
    Observer,
}

impl NodeKind {
    /// The timeliness every node of this kind is created with.
    pub fn timeliness(self) -> Timeliness {
        match self {
            NodeKind::Value | NodeKind::Computed | NodeKind::For => Timeliness::Lazy,
            NodeKind::Tween | NodeKind::Spring | NodeKind::Observer => Timeliness::Eager,
        }
    }

    /// Whether nodes of this kind expose a value.
    pub fn has_value(self) -> bool {
        !matches!(self, NodeKind::Observer)
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NodeKind::Value => "Value",
            NodeKind::Computed => "Computed",
            NodeKind::For => "For",
            NodeKind::Tween => "Tween",
            NodeKind::Spring => "Spring",
            NodeKind::Observer => "Observer",
        };
        f.write_str(name)
    }
}

/// When a node recomputes after one of its dependencies changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeliness {
    /// Recompute is deferred until the value is next read.
    Lazy,

    /// Recompute happens as part of the propagation that invalidated it.
    Eager,
}

/// Validity of a node's cached state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validity {
    /// The cached state is up to date.
    Valid,

    /// An upstream dependency changed since the last evaluation.
    Invalid,

    /// The node is evaluating right now.
    Busy,
}

/// A node in the dependency graph.
///
/// `B` is whatever the owner of the graph attaches to a node to evaluate
/// it. The graph itself never looks inside.
#[derive(Debug)]
pub struct Node<B> {
    kind: NodeKind,
    timeliness: Timeliness,
    pub(crate) validity: Validity,

    /// Logical time at which the node was inserted.
    created_at: u64,

    /// Logical time of the last evaluation that produced a different value.
    pub(crate) last_change: Option<u64>,

    /// Logical time of the last completed evaluation.
    pub(crate) last_evaluated: Option<u64>,

    /// Nodes that this node reads from.
    dependencies: IndexSet<NodeId>,

    /// Nodes that read from this node.
    dependents: IndexSet<NodeId>,

    behaviour: B,
}

impl<B> Node<B> {
    pub(crate) fn new(kind: NodeKind, created_at: u64, behaviour: B) -> Self {
        Self {
            kind,
            timeliness: kind.timeliness(),
            validity: match kind {
                // Sources hold their value from the start.
                NodeKind::Value => Validity::Valid,
                _ => Validity::Invalid,
            },
            created_at,
            last_change: None,
            last_evaluated: None,
            dependencies: IndexSet::new(),
            dependents: IndexSet::new(),
            behaviour,
        }
    }

    /// Get the node's kind.
    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    /// Get the node's timeliness.
    pub fn timeliness(&self) -> Timeliness {
        self.timeliness
    }

    /// Get the node's validity.
    pub fn validity(&self) -> Validity {
        self.validity
    }

    /// Get the logical creation time.
    pub fn created_at(&self) -> u64 {
        self.created_at
    }

    /// Get the logical time of the last meaningful change, if any.
    pub fn last_change(&self) -> Option<u64> {
        self.last_change
    }

    /// Get the logical time of the last completed evaluation, if any.
    pub fn last_evaluated(&self) -> Option<u64> {
        self.last_evaluated
    }

    /// Check if the node is eager.
    pub fn is_eager(&self) -> bool {
        self.timeliness == Timeliness::Eager
    }

    /// Get all dependencies.
    pub fn dependencies(&self) -> &IndexSet<NodeId> {
        &self.dependencies
    }

    /// Get all dependents.
    pub fn dependents(&self) -> &IndexSet<NodeId> {
        &self.dependents
    }

    pub(crate) fn behaviour(&self) -> &B {
        &self.behaviour
    }

    pub(crate) fn into_behaviour(self) -> B {
        self.behaviour
    }

    // Edge halves. The store is responsible for keeping both halves paired.

    pub(crate) fn add_dependency(&mut self, node_id: NodeId) -> bool {
        self.dependencies.insert(node_id)
    }

    pub(crate) fn remove_dependency(&mut self, node_id: NodeId) -> bool {
        self.dependencies.shift_remove(&node_id)
    }

    pub(crate) fn add_dependent(&mut self, node_id: NodeId) -> bool {
        self.dependents.insert(node_id)
    }

    pub(crate) fn remove_dependent(&mut self, node_id: NodeId) -> bool {
        self.dependents.shift_remove(&node_id)
    }

    pub(crate) fn take_dependencies(&mut self) -> IndexSet<NodeId> {
        std::mem::take(&mut self.dependencies)
    }

    pub(crate) fn take_dependents(&mut self) -> IndexSet<NodeId> {
        std::mem::take(&mut self.dependents)
    }
}
