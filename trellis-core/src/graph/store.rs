//! Node Store
//!
//! The store owns every node in the graph and is the only place edges are
//! created or removed, which is how the two halves of an edge stay paired.
//!
//! # Invalidation
//!
//! When a node changes, everything downstream of it is marked invalid in a
//! single depth-first walk:
//!
//! 1. Start from the changed node's direct dependents.
//! 2. A valid node becomes invalid and the walk continues through it.
//! 3. An invalid node stays invalid and the walk still continues through
//!    it. A node left invalid by a failed evaluation keeps its edges, so an
//!    eager node behind it can only be found this way.
//! 4. Each node is visited at most once per walk.
//! 5. A busy node is left alone; it is mid-evaluation and will publish its
//!    own result.
//! 6. Every eager node reached is collected and returned in creation order,
//!    so the caller can bring them up to date in a stable order.

use indexmap::IndexSet;
use slotmap::SlotMap;

use super::node::{Node, NodeId, NodeKind, Validity};

/// Arena of graph nodes addressed by [`NodeId`].
#[derive(Debug)]
pub struct NodeStore<B> {
    nodes: SlotMap<NodeId, Node<B>>,

    /// Logical clock shared by creation, evaluation and change timestamps.
    clock: u64,
}

impl<B> NodeStore<B> {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self {
            nodes: SlotMap::with_key(),
            clock: 0,
        }
    }

    /// Current logical time.
    pub fn now(&self) -> u64 {
        self.clock
    }

    /// Advance the logical clock and return the new time.
    pub fn advance(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    /// Add a node to the graph.
    pub fn insert(&mut self, kind: NodeKind, behaviour: B) -> NodeId {
        let created_at = self.advance();
        self.nodes.insert(Node::new(kind, created_at, behaviour))
    }

    /// Remove a node from the graph.
    ///
    /// Also removes every edge involving this node. Returns `None` if the
    /// node was already removed.
    pub fn remove(&mut self, node_id: NodeId) -> Option<Node<B>> {
        let mut node = self.nodes.remove(node_id)?;

        // Remove this node from its dependencies' dependent lists
        for dep_id in node.take_dependencies() {
            if let Some(dep) = self.nodes.get_mut(dep_id) {
                dep.remove_dependent(node_id);
            }
        }

        // Remove this node from its dependents' dependency lists
        for dependent_id in node.take_dependents() {
            if let Some(dependent) = self.nodes.get_mut(dependent_id) {
                dependent.remove_dependency(node_id);
            }
        }

        Some(node)
    }

    /// Check whether a node is still in the graph.
    pub fn contains(&self, node_id: NodeId) -> bool {
        self.nodes.contains_key(node_id)
    }

    /// Get a reference to a node.
    pub fn get(&self, node_id: NodeId) -> Option<&Node<B>> {
        self.nodes.get(node_id)
    }

    /// Get a mutable reference to a node.
    pub fn get_mut(&mut self, node_id: NodeId) -> Option<&mut Node<B>> {
        self.nodes.get_mut(node_id)
    }

    /// Add a dependency edge: `dependent` depends on `dependency`.
    ///
    /// Returns `false` without touching either node if one of them is gone.
    pub fn add_edge(&mut self, dependency: NodeId, dependent: NodeId) -> bool {
        if !self.nodes.contains_key(dependency) || !self.nodes.contains_key(dependent) {
            return false;
        }
        if let Some(dep_node) = self.nodes.get_mut(dependency) {
            dep_node.add_dependent(dependent);
        }
        if let Some(dependent_node) = self.nodes.get_mut(dependent) {
            dependent_node.add_dependency(dependency);
        }
        true
    }

    /// Remove a dependency edge.
    pub fn remove_edge(&mut self, dependency: NodeId, dependent: NodeId) {
        if let Some(dep_node) = self.nodes.get_mut(dependency) {
            dep_node.remove_dependent(dependent);
        }
        if let Some(dependent_node) = self.nodes.get_mut(dependent) {
            dependent_node.remove_dependency(dependency);
        }
    }

    /// Replace the full dependency set of `node_id`.
    ///
    /// Edges that are not in `dependencies` are removed, new ones are added,
    /// and ids that no longer resolve are skipped.
    pub fn replace_dependencies(&mut self, node_id: NodeId, dependencies: &IndexSet<NodeId>) {
        let stale: Vec<NodeId> = match self.nodes.get(node_id) {
            Some(node) => node
                .dependencies()
                .iter()
                .filter(|dep_id| !dependencies.contains(*dep_id))
                .copied()
                .collect(),
            None => return,
        };

        for dep_id in stale {
            self.remove_edge(dep_id, node_id);
        }
        for &dep_id in dependencies {
            self.add_edge(dep_id, node_id);
        }
    }

    /// Mark everything downstream of `source_id` invalid.
    ///
    /// Nodes that are already invalid are not marked again, but the walk
    /// still continues through them: a node left invalid by a failed
    /// evaluation keeps its edges, and eager nodes behind it must still be
    /// reached. Each node is visited at most once per walk.
    ///
    /// Returns the eager nodes that were reached, oldest first.
    pub fn invalidate_dependents(&mut self, source_id: NodeId) -> Vec<NodeId> {
        let mut eager: IndexSet<NodeId> = IndexSet::new();
        let mut visited: IndexSet<NodeId> = IndexSet::new();
        let mut stack: Vec<NodeId> = match self.nodes.get(source_id) {
            Some(source) => source.dependents().iter().rev().copied().collect(),
            None => return Vec::new(),
        };

        while let Some(node_id) = stack.pop() {
            if !visited.insert(node_id) {
                continue;
            }
            let Some(node) = self.nodes.get_mut(node_id) else {
                continue;
            };

            match node.validity {
                Validity::Busy => continue,
                Validity::Invalid => {}
                Validity::Valid => node.validity = Validity::Invalid,
            }
            if node.is_eager() {
                eager.insert(node_id);
            }
            stack.extend(node.dependents().iter().rev().copied());
        }

        let mut eager: Vec<NodeId> = eager.into_iter().collect();
        eager.sort_by_key(|id| self.nodes.get(*id).map(|node| node.created_at()));
        eager
    }

    /// Check that every edge is recorded on both of its ends.
    pub fn edges_consistent(&self) -> bool {
        self.nodes.iter().all(|(id, node)| {
            node.dependencies().iter().all(|dep| {
                self.nodes
                    .get(*dep)
                    .is_some_and(|dep_node| dep_node.dependents().contains(&id))
            }) && node.dependents().iter().all(|dependent| {
                self.nodes
                    .get(*dependent)
                    .is_some_and(|dependent_node| dependent_node.dependencies().contains(&id))
            })
        })
    }

    /// Get the total number of nodes in the graph.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Check whether the graph has no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl<B> Default for NodeStore<B> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid(store: &mut NodeStore<()>, id: NodeId) {
        store.get_mut(id).unwrap().validity = Validity::Valid;
    }

    #[test]
    fn add_and_remove_nodes() {
        let mut store = NodeStore::new();

        let id1 = store.insert(NodeKind::Value, ());
        let id2 = store.insert(NodeKind::Computed, ());

        assert_eq!(store.len(), 2);

        assert!(store.remove(id1).is_some());
        assert_eq!(store.len(), 1);
        assert!(store.get(id1).is_none());
        assert!(store.get(id2).is_some());

        // Second removal finds nothing
        assert!(store.remove(id1).is_none());
    }

    #[test]
    fn add_and_remove_edges() {
        let mut store = NodeStore::new();

        let source_id = store.insert(NodeKind::Value, ());
        let derived_id = store.insert(NodeKind::Computed, ());

        assert!(store.add_edge(source_id, derived_id));

        assert!(store.get(source_id).unwrap().dependents().contains(&derived_id));
        assert!(store.get(derived_id).unwrap().dependencies().contains(&source_id));
        assert!(store.edges_consistent());

        store.replace_dependencies(derived_id, &IndexSet::new());

        assert!(!store.get(source_id).unwrap().dependents().contains(&derived_id));
        assert!(!store.get(derived_id).unwrap().dependencies().contains(&source_id));
        assert!(store.edges_consistent());
    }

    #[test]
    fn removing_a_node_unlinks_neighbours() {
        let mut store = NodeStore::new();

        let a = store.insert(NodeKind::Value, ());
        let b = store.insert(NodeKind::Computed, ());
        let c = store.insert(NodeKind::Observer, ());

        store.add_edge(a, b);
        store.add_edge(b, c);

        store.remove(b);

        assert!(store.get(a).unwrap().dependents().is_empty());
        assert!(store.get(c).unwrap().dependencies().is_empty());
        assert!(store.edges_consistent());
    }

    #[test]
    fn edges_to_removed_nodes_are_refused() {
        let mut store = NodeStore::new();

        let a = store.insert(NodeKind::Value, ());
        let b = store.insert(NodeKind::Computed, ());
        store.remove(a);

        assert!(!store.add_edge(a, b));
        assert!(store.get(b).unwrap().dependencies().is_empty());
    }

    #[test]
    fn replace_dependencies_rebuilds_edges() {
        let mut store = NodeStore::new();

        let a = store.insert(NodeKind::Value, ());
        let b = store.insert(NodeKind::Value, ());
        let derived = store.insert(NodeKind::Computed, ());

        store.add_edge(a, derived);

        let next: IndexSet<NodeId> = [b].into_iter().collect();
        store.replace_dependencies(derived, &next);

        assert!(store.get(a).unwrap().dependents().is_empty());
        assert!(store.get(b).unwrap().dependents().contains(&derived));
        assert_eq!(store.get(derived).unwrap().dependencies().len(), 1);
        assert!(store.edges_consistent());
    }

    #[test]
    fn invalidation_propagates_and_collects_eager_nodes() {
        let mut store = NodeStore::new();

        // Create a chain: source -> derived1 -> derived2 -> observer
        let source = store.insert(NodeKind::Value, ());
        let derived1 = store.insert(NodeKind::Computed, ());
        let derived2 = store.insert(NodeKind::Computed, ());
        let observer = store.insert(NodeKind::Observer, ());

        store.add_edge(source, derived1);
        store.add_edge(derived1, derived2);
        store.add_edge(derived2, observer);

        for id in [derived1, derived2, observer] {
            valid(&mut store, id);
        }

        let eager = store.invalidate_dependents(source);

        assert_eq!(eager, vec![observer]);
        assert_eq!(store.get(derived1).unwrap().validity(), Validity::Invalid);
        assert_eq!(store.get(derived2).unwrap().validity(), Validity::Invalid);
        assert_eq!(store.get(source).unwrap().validity(), Validity::Valid);
    }

    #[test]
    fn walk_continues_through_invalid_nodes() {
        let mut store = NodeStore::new();

        let source = store.insert(NodeKind::Value, ());
        let failed = store.insert(NodeKind::Computed, ());
        let observer = store.insert(NodeKind::Observer, ());

        store.add_edge(source, failed);
        store.add_edge(failed, observer);

        // `failed` was left invalid by an evaluation error; the observer
        // behind it is still valid.
        valid(&mut store, observer);

        assert_eq!(store.invalidate_dependents(source), vec![observer]);
        assert_eq!(store.get(failed).unwrap().validity(), Validity::Invalid);
        assert_eq!(store.get(observer).unwrap().validity(), Validity::Invalid);
    }

    #[test]
    fn diamond_nodes_are_collected_once() {
        let mut store = NodeStore::new();

        let source = store.insert(NodeKind::Value, ());
        let left = store.insert(NodeKind::Computed, ());
        let right = store.insert(NodeKind::Computed, ());
        let observer = store.insert(NodeKind::Observer, ());

        store.add_edge(source, left);
        store.add_edge(source, right);
        store.add_edge(left, observer);
        store.add_edge(right, observer);
        for id in [left, right, observer] {
            valid(&mut store, id);
        }

        assert_eq!(store.invalidate_dependents(source), vec![observer]);
    }

    #[test]
    fn eager_nodes_are_returned_oldest_first() {
        let mut store = NodeStore::new();

        let source = store.insert(NodeKind::Value, ());
        let first = store.insert(NodeKind::Observer, ());
        let second = store.insert(NodeKind::Observer, ());

        // Link in reverse creation order
        store.add_edge(source, second);
        store.add_edge(source, first);
        valid(&mut store, first);
        valid(&mut store, second);

        assert_eq!(store.invalidate_dependents(source), vec![first, second]);
    }

    #[test]
    fn clock_is_monotonic() {
        let mut store: NodeStore<()> = NodeStore::new();
        let t0 = store.now();
        let t1 = store.advance();
        let t2 = store.advance();
        assert!(t0 < t1 && t1 < t2);
        assert_eq!(store.now(), t2);
    }
}
