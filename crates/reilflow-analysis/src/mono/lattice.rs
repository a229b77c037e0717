//! Lattice abstractions.

use std::fmt::Debug;

use super::instruction_graph::{InstructionGraphEdge, NodeId};

/// A value of an analysis lattice.
pub trait LatticeElement: Clone + PartialEq + Debug {
    /// Strict ordering test.
    ///
    /// Only used to detect transfer functions that move a node's state
    /// down the lattice; convergence is decided by equality.
    fn less_than(&self, other: &Self) -> bool;

    /// Transition applied when a state leaves a native instruction.
    fn on_instruction_exit(&mut self) {}
}

/// The state of one influencing node, as seen by the node it influences.
#[derive(Debug, Clone, Copy)]
pub struct InfluencingState<'s, E> {
    /// The influencing node.
    pub node: NodeId,
    /// The edge connecting the two nodes.
    pub edge: &'s InstructionGraphEdge,
    /// The influencing node's current element.
    pub element: &'s E,
}

/// Join operations of an analysis lattice.
pub trait Lattice {
    type Element: LatticeElement;

    /// Joins plain elements. An empty slice yields the bottom element.
    fn join(&self, elements: &[&Self::Element]) -> Self::Element;

    /// Combines the states flowing into a node.
    ///
    /// The result must not depend on the order of `states`.
    fn combine(&self, states: &[InfluencingState<'_, Self::Element>]) -> Self::Element {
        let elements: Vec<&Self::Element> = states.iter().map(|s| s.element).collect();
        self.join(&elements)
    }
}
