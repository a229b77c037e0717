//! Per-node analysis state.

use indexmap::IndexMap;

use super::instruction_graph::{InstructionGraph, NodeId};

/// Mapping from graph node to its current lattice element.
#[derive(Debug, Clone, PartialEq)]
pub struct StateVector<E> {
    states: IndexMap<NodeId, E>,
}

impl<E> Default for StateVector<E> {
    fn default() -> Self {
        Self {
            states: IndexMap::new(),
        }
    }
}

impl<E> StateVector<E> {
    /// Creates an empty state vector.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            states: IndexMap::with_capacity(capacity),
        }
    }

    /// Creates a vector with one element per graph node.
    pub fn from_fn(graph: &InstructionGraph<'_>, mut f: impl FnMut(NodeId) -> E) -> Self {
        Self {
            states: graph.node_ids().map(|id| (id, f(id))).collect(),
        }
    }

    /// Returns the element of a node.
    pub fn get(&self, node: NodeId) -> Option<&E> {
        self.states.get(&node)
    }

    /// Sets the element of a node, returning the previous one.
    pub fn set(&mut self, node: NodeId, element: E) -> Option<E> {
        self.states.insert(node, element)
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.states.contains_key(&node)
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &E)> {
        self.states.iter().map(|(&id, e)| (id, e))
    }

    /// Overwrites this vector's entries with every entry of `other`.
    pub fn merge(&mut self, other: StateVector<E>) {
        self.states.extend(other.states);
    }
}

impl<E> FromIterator<(NodeId, E)> for StateVector<E> {
    fn from_iter<I: IntoIterator<Item = (NodeId, E)>>(iter: I) -> Self {
        Self {
            states: iter.into_iter().collect(),
        }
    }
}
