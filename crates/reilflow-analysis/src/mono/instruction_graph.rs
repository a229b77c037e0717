//! Instruction-level graph.
//!
//! Splits every block of a [`ReilGraph`] into one node per instruction.
//! Nodes and edges live in arenas and are addressed by [`NodeId`] and
//! [`EdgeId`]; adjacency is an index lookup, so an edge is stored exactly
//! once no matter how many endpoints refer to it.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use reilflow_core::{EdgeType, ReilGraph, ReilInstruction, REIL_ADDRESS_SCALE};

use super::error::{MonoError, MonoResult};

/// Index of a node in an [`InstructionGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NodeId(pub u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Index of an edge in an [`InstructionGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EdgeId(pub u32);

impl EdgeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A node wrapping exactly one instruction.
#[derive(Debug, Clone, Copy)]
pub struct InstructionGraphNode<'a> {
    id: NodeId,
    instruction: &'a ReilInstruction,
}

impl<'a> InstructionGraphNode<'a> {
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn instruction(&self) -> &'a ReilInstruction {
        self.instruction
    }
}

/// A typed edge between two instruction nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstructionGraphEdge {
    pub id: EdgeId,
    pub source: NodeId,
    pub target: NodeId,
    pub kind: EdgeType,
    /// Set when the edge leaves one native instruction for another, or
    /// re-enters the start of a native instruction.
    pub instruction_exit: bool,
}

impl InstructionGraphEdge {
    pub fn is_instruction_exit(&self) -> bool {
        self.instruction_exit
    }
}

/// Graph of single-instruction nodes.
///
/// Borrows its instructions from the block graph it was built from.
#[derive(Debug, Clone, Default)]
pub struct InstructionGraph<'a> {
    nodes: Vec<InstructionGraphNode<'a>>,
    edges: Vec<InstructionGraphEdge>,
    outgoing: Vec<Vec<EdgeId>>,
    incoming: Vec<Vec<EdgeId>>,
    by_address: BTreeMap<u64, NodeId>,
}

impl<'a> InstructionGraph<'a> {
    /// Creates an empty graph.
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            edges: Vec::new(),
            outgoing: Vec::new(),
            incoming: Vec::new(),
            by_address: BTreeMap::new(),
        }
    }

    /// Builds the instruction graph of a block graph.
    ///
    /// Instructions of a block are chained with unconditional edges; each
    /// block edge is re-attached from the source block's last node to the
    /// target block's first node, keeping its type.
    pub fn from_reil_graph(graph: &'a ReilGraph) -> Self {
        let mut result = Self::new();
        let mut bounds = HashMap::new();

        for block in graph.blocks() {
            let mut previous: Option<NodeId> = None;
            let mut first = None;
            for instruction in &block.instructions {
                let node = result.add_node(instruction);
                if let Some(prev) = previous {
                    result.link(prev, node, EdgeType::JumpUnconditional);
                }
                first.get_or_insert(node);
                previous = Some(node);
            }
            if let (Some(first), Some(last)) = (first, previous) {
                bounds.insert(block.id, (first, last));
            }
        }

        for edge in graph.edges() {
            if let (Some(&(_, last)), Some(&(first, _))) =
                (bounds.get(&edge.source), bounds.get(&edge.target))
            {
                result.link(last, first, edge.kind);
            }
        }

        result
    }

    /// Adds a node for an instruction.
    pub fn add_node(&mut self, instruction: &'a ReilInstruction) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(InstructionGraphNode { id, instruction });
        self.outgoing.push(Vec::new());
        self.incoming.push(Vec::new());
        self.by_address.insert(instruction.address, id);
        id
    }

    /// Adds an edge between two existing nodes.
    pub fn add_edge(&mut self, source: NodeId, target: NodeId, kind: EdgeType) -> MonoResult<EdgeId> {
        self.node(source)?;
        self.node(target)?;
        Ok(self.link(source, target, kind))
    }

    fn link(&mut self, source: NodeId, target: NodeId, kind: EdgeType) -> EdgeId {
        let source_inst = self.nodes[source.index()].instruction;
        let target_inst = self.nodes[target.index()].instruction;
        let instruction_exit = target_inst.sub_index() == 0
            || source_inst.native_address() != target_inst.native_address();

        let id = EdgeId(self.edges.len() as u32);
        self.edges.push(InstructionGraphEdge {
            id,
            source,
            target,
            kind,
            instruction_exit,
        });
        self.outgoing[source.index()].push(id);
        self.incoming[target.index()].push(id);
        id
    }

    /// Returns a node by id.
    pub fn node(&self, id: NodeId) -> MonoResult<&InstructionGraphNode<'a>> {
        self.nodes.get(id.index()).ok_or(MonoError::UnknownNode(id))
    }

    /// Returns an edge by id.
    pub fn edge(&self, id: EdgeId) -> MonoResult<&InstructionGraphEdge> {
        self.edges.get(id.index()).ok_or(MonoError::UnknownEdge(id))
    }

    /// Returns the instruction wrapped by a node.
    pub fn instruction(&self, id: NodeId) -> MonoResult<&'a ReilInstruction> {
        self.node(id).map(|n| n.instruction)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &InstructionGraphNode<'a>> {
        self.nodes.iter()
    }

    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.iter().map(|n| n.id)
    }

    pub fn edges(&self) -> &[InstructionGraphEdge] {
        &self.edges
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn num_edges(&self) -> usize {
        self.edges.len()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        id.index() < self.nodes.len()
    }

    /// Edges leaving a node.
    pub fn outgoing_edges(&self, id: NodeId) -> MonoResult<&[EdgeId]> {
        self.outgoing
            .get(id.index())
            .map(Vec::as_slice)
            .ok_or(MonoError::UnknownNode(id))
    }

    /// Edges entering a node.
    pub fn incoming_edges(&self, id: NodeId) -> MonoResult<&[EdgeId]> {
        self.incoming
            .get(id.index())
            .map(Vec::as_slice)
            .ok_or(MonoError::UnknownNode(id))
    }

    /// Node holding the instruction at a REIL address.
    pub fn node_at(&self, address: u64) -> Option<NodeId> {
        self.by_address.get(&address).copied()
    }

    /// Nodes translated from one native instruction, ordered by REIL address.
    pub fn nodes_for_native(&self, native: u64) -> Vec<NodeId> {
        let Some(start) = native.checked_mul(REIL_ADDRESS_SCALE) else {
            return Vec::new();
        };
        self.by_address
            .range(start..start.saturating_add(REIL_ADDRESS_SCALE))
            .map(|(_, &id)| id)
            .collect()
    }

    /// Every native address with at least one node.
    pub fn native_addresses(&self) -> BTreeSet<u64> {
        self.nodes
            .iter()
            .map(|n| n.instruction.native_address())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reilflow_core::parse_listing;

    fn sample() -> ReilGraph {
        parse_listing(
            "
            100: add [DWORD eax, DWORD 1, DWORD t0]
            101: str [DWORD t0, EMPTY , DWORD eax]
            200: nop [EMPTY , EMPTY , EMPTY ]

            300: jcc [DWORD eax, EMPTY , DWORD 1024]

            400: nop [EMPTY , EMPTY , EMPTY ]
            100 [JUMP_UNCONDITIONAL]-> 300
            100 [JUMP_CONDITIONAL_TRUE]-> 400
            300 [JUMP_UNCONDITIONAL_LOOP]-> 100
            ",
        )
        .unwrap()
    }

    // --- Construction Tests ---

    #[test]
    fn test_one_node_per_instruction() {
        let reil = sample();
        let graph = InstructionGraph::from_reil_graph(&reil);
        assert_eq!(graph.num_nodes(), 5);
        // 2 intra-block edges + 3 block edges
        assert_eq!(graph.num_edges(), 5);
    }

    #[test]
    fn test_block_edges_reattached() {
        let reil = sample();
        let graph = InstructionGraph::from_reil_graph(&reil);
        let last = graph.node_at(0x200).unwrap();
        let jcc = graph.node_at(0x300).unwrap();
        let first = graph.node_at(0x100).unwrap();

        let targets: Vec<NodeId> = graph
            .outgoing_edges(last)
            .unwrap()
            .iter()
            .map(|&e| graph.edge(e).unwrap().target)
            .collect();
        assert_eq!(targets, vec![jcc, graph.node_at(0x400).unwrap()]);

        let back = graph.outgoing_edges(jcc).unwrap()[0];
        let back = graph.edge(back).unwrap();
        assert_eq!(back.target, first);
        assert_eq!(back.kind, EdgeType::JumpUnconditionalLoop);
    }

    #[test]
    fn test_edges_are_symmetric() {
        let reil = sample();
        let graph = InstructionGraph::from_reil_graph(&reil);
        for edge in graph.edges() {
            assert!(graph.outgoing_edges(edge.source).unwrap().contains(&edge.id));
            assert!(graph.incoming_edges(edge.target).unwrap().contains(&edge.id));
        }
    }

    #[test]
    fn test_instruction_exit_flags() {
        let reil = sample();
        let graph = InstructionGraph::from_reil_graph(&reil);
        let flag = |from: u64, to: u64| {
            let source = graph.node_at(from).unwrap();
            graph
                .outgoing_edges(source)
                .unwrap()
                .iter()
                .map(|&e| graph.edge(e).unwrap())
                .find(|e| e.target == graph.node_at(to).unwrap())
                .map(|e| e.is_instruction_exit())
                .unwrap()
        };
        assert!(!flag(0x100, 0x101));
        assert!(flag(0x101, 0x200));
        assert!(flag(0x200, 0x300));
        assert!(flag(0x300, 0x100));
    }

    // --- Query Tests ---

    #[test]
    fn test_unknown_ids_are_errors() {
        let reil = sample();
        let graph = InstructionGraph::from_reil_graph(&reil);
        assert_eq!(graph.node(NodeId(99)).unwrap_err(), MonoError::UnknownNode(NodeId(99)));
        assert_eq!(graph.edge(EdgeId(99)).unwrap_err(), MonoError::UnknownEdge(EdgeId(99)));
        assert!(graph.outgoing_edges(NodeId(99)).is_err());
    }

    #[test]
    fn test_native_grouping() {
        let reil = sample();
        let graph = InstructionGraph::from_reil_graph(&reil);
        assert_eq!(graph.native_addresses().into_iter().collect::<Vec<_>>(), vec![1, 2, 3, 4]);
        assert_eq!(
            graph.nodes_for_native(1),
            vec![graph.node_at(0x100).unwrap(), graph.node_at(0x101).unwrap()]
        );
        assert!(graph.nodes_for_native(9).is_empty());
        assert!(graph.nodes_for_native(u64::MAX).is_empty());
    }

    #[test]
    fn test_manual_edges() {
        let a = ReilInstruction::nop(0x100);
        let b = ReilInstruction::nop(0x200);
        let mut graph = InstructionGraph::new();
        let na = graph.add_node(&a);
        let nb = graph.add_node(&b);
        let edge = graph.add_edge(na, nb, EdgeType::JumpConditionalFalse).unwrap();
        assert_eq!(graph.edge(edge).unwrap().kind, EdgeType::JumpConditionalFalse);
        assert!(graph.add_edge(na, NodeId(7), EdgeType::JumpUnconditional).is_err());
    }
}
