//! Direction-parameterized graph traversal.

use super::error::MonoResult;
use super::instruction_graph::{EdgeId, InstructionGraph, NodeId};

/// Direction of an analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum AnalysisDirection {
    /// Backward: facts flow from successors to predecessors.
    Up,
    /// Forward: facts flow from predecessors to successors.
    #[default]
    Down,
}

/// A neighbouring node together with the edge that connects it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Influence {
    pub node: NodeId,
    pub edge: EdgeId,
}

/// Decides which neighbours of a node influence it and which it influences.
///
/// This is the only place the analysis direction matters; the solver is
/// otherwise direction-agnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphWalker {
    /// Forward walk: successors are influenced, predecessors influence.
    Down,
    /// Backward walk: predecessors are influenced, successors influence.
    Up,
}

impl GraphWalker {
    pub fn for_direction(direction: AnalysisDirection) -> Self {
        match direction {
            AnalysisDirection::Down => Self::Down,
            AnalysisDirection::Up => Self::Up,
        }
    }

    pub fn direction(self) -> AnalysisDirection {
        match self {
            Self::Down => AnalysisDirection::Down,
            Self::Up => AnalysisDirection::Up,
        }
    }

    /// Nodes whose state depends on the state of `node`.
    pub fn influenced(self, graph: &InstructionGraph<'_>, node: NodeId) -> MonoResult<Vec<Influence>> {
        match self {
            Self::Down => successors(graph, node),
            Self::Up => predecessors(graph, node),
        }
    }

    /// Nodes whose states are combined into the input of `node`.
    pub fn influencing(self, graph: &InstructionGraph<'_>, node: NodeId) -> MonoResult<Vec<Influence>> {
        match self {
            Self::Down => predecessors(graph, node),
            Self::Up => successors(graph, node),
        }
    }
}

impl From<AnalysisDirection> for GraphWalker {
    fn from(direction: AnalysisDirection) -> Self {
        Self::for_direction(direction)
    }
}

fn successors(graph: &InstructionGraph<'_>, node: NodeId) -> MonoResult<Vec<Influence>> {
    graph
        .outgoing_edges(node)?
        .iter()
        .map(|&id| {
            graph.edge(id).map(|e| Influence {
                node: e.target,
                edge: id,
            })
        })
        .collect()
}

fn predecessors(graph: &InstructionGraph<'_>, node: NodeId) -> MonoResult<Vec<Influence>> {
    graph
        .incoming_edges(node)?
        .iter()
        .map(|&id| {
            graph.edge(id).map(|e| Influence {
                node: e.source,
                edge: id,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mono::MonoError;
    use reilflow_core::{EdgeType, ReilInstruction};

    fn nodes_of(influences: Vec<Influence>) -> Vec<NodeId> {
        influences.into_iter().map(|i| i.node).collect()
    }

    #[test]
    fn test_walkers_are_mirror_images() {
        let insts: Vec<ReilInstruction> = (1..=3).map(|n| ReilInstruction::nop(n * 0x100)).collect();
        let mut graph = InstructionGraph::new();
        let ids: Vec<NodeId> = insts.iter().map(|i| graph.add_node(i)).collect();
        graph.add_edge(ids[0], ids[1], EdgeType::JumpUnconditional).unwrap();
        graph.add_edge(ids[1], ids[2], EdgeType::JumpUnconditional).unwrap();

        let down = GraphWalker::Down;
        let up = GraphWalker::Up;
        assert_eq!(nodes_of(down.influenced(&graph, ids[1]).unwrap()), vec![ids[2]]);
        assert_eq!(nodes_of(down.influencing(&graph, ids[1]).unwrap()), vec![ids[0]]);
        assert_eq!(nodes_of(up.influenced(&graph, ids[1]).unwrap()), vec![ids[0]]);
        assert_eq!(nodes_of(up.influencing(&graph, ids[1]).unwrap()), vec![ids[2]]);
        assert!(down.influencing(&graph, ids[0]).unwrap().is_empty());
    }

    #[test]
    fn test_influence_carries_edge() {
        let a = ReilInstruction::nop(0x100);
        let b = ReilInstruction::nop(0x200);
        let mut graph = InstructionGraph::new();
        let na = graph.add_node(&a);
        let nb = graph.add_node(&b);
        let edge = graph.add_edge(na, nb, EdgeType::JumpConditionalTrue).unwrap();
        let influences = GraphWalker::Up.influencing(&graph, na).unwrap();
        assert_eq!(influences, vec![Influence { node: nb, edge }]);
    }

    #[test]
    fn test_unknown_node_rejected() {
        let graph = InstructionGraph::new();
        assert_eq!(
            GraphWalker::Down.influenced(&graph, NodeId(0)),
            Err(MonoError::UnknownNode(NodeId(0)))
        );
    }

    #[test]
    fn test_direction_mapping() {
        assert_eq!(GraphWalker::from(AnalysisDirection::Up), GraphWalker::Up);
        assert_eq!(GraphWalker::Down.direction(), AnalysisDirection::Down);
        assert_eq!(AnalysisDirection::default(), AnalysisDirection::Down);
    }
}
