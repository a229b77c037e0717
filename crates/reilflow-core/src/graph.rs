//! Block-level REIL graph.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use indexmap::IndexMap;

use crate::error::{Error, Result};
use crate::{BlockId, ReilBlock, ReilInstruction};

/// Kind of control transfer an edge represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum EdgeType {
    /// Unconditional jump or fall-through.
    JumpUnconditional,
    /// Taken branch of a conditional jump.
    JumpConditionalTrue,
    /// Not-taken branch of a conditional jump.
    JumpConditionalFalse,
    /// Entry into an inlined callee.
    EnterInlinedFunction,
    /// Return from an inlined callee.
    LeaveInlinedFunction,
    /// Unconditional back edge of a loop.
    JumpUnconditionalLoop,
    /// Transfer into another module.
    InterModule,
}

impl EdgeType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::JumpUnconditional => "JUMP_UNCONDITIONAL",
            Self::JumpConditionalTrue => "JUMP_CONDITIONAL_TRUE",
            Self::JumpConditionalFalse => "JUMP_CONDITIONAL_FALSE",
            Self::EnterInlinedFunction => "ENTER_INLINED_FUNCTION",
            Self::LeaveInlinedFunction => "LEAVE_INLINED_FUNCTION",
            Self::JumpUnconditionalLoop => "JUMP_UNCONDITIONAL_LOOP",
            Self::InterModule => "INTER_MODULE",
        }
    }
}

impl fmt::Display for EdgeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EdgeType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "JUMP_UNCONDITIONAL" => Ok(Self::JumpUnconditional),
            "JUMP_CONDITIONAL_TRUE" => Ok(Self::JumpConditionalTrue),
            "JUMP_CONDITIONAL_FALSE" => Ok(Self::JumpConditionalFalse),
            "ENTER_INLINED_FUNCTION" => Ok(Self::EnterInlinedFunction),
            "LEAVE_INLINED_FUNCTION" => Ok(Self::LeaveInlinedFunction),
            "JUMP_UNCONDITIONAL_LOOP" => Ok(Self::JumpUnconditionalLoop),
            "INTER_MODULE" => Ok(Self::InterModule),
            _ => Err(s.to_string()),
        }
    }
}

/// A typed block-to-block edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ReilEdge {
    pub source: BlockId,
    pub target: BlockId,
    pub kind: EdgeType,
}

/// A block-level control flow graph of REIL code.
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ReilGraph {
    /// All blocks, in insertion order.
    blocks: IndexMap<BlockId, ReilBlock>,
    /// Every edge, stored once.
    edges: Vec<ReilEdge>,
    /// Outgoing edge indices per block.
    outgoing: IndexMap<BlockId, Vec<usize>>,
    /// Incoming edge indices per block.
    incoming: IndexMap<BlockId, Vec<usize>>,
    /// Block and position of every instruction, keyed by REIL address.
    addresses: IndexMap<u64, (BlockId, usize)>,
}

impl ReilGraph {
    /// Creates an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a block.
    ///
    /// Fails if the block is empty, its id is taken, or one of its
    /// instruction addresses already appears in the graph.
    pub fn add_block(&mut self, block: ReilBlock) -> Result<()> {
        if block.is_empty() {
            return Err(Error::EmptyBlock(block.id));
        }
        if self.blocks.contains_key(&block.id) {
            return Err(Error::DuplicateBlockId(block.id));
        }
        let mut seen = HashSet::new();
        for inst in &block.instructions {
            if !seen.insert(inst.address) || self.addresses.contains_key(&inst.address) {
                return Err(Error::DuplicateAddress(inst.address));
            }
        }

        let id = block.id;
        for (index, inst) in block.instructions.iter().enumerate() {
            self.addresses.insert(inst.address, (id, index));
        }
        self.blocks.insert(id, block);
        self.outgoing.entry(id).or_default();
        self.incoming.entry(id).or_default();
        Ok(())
    }

    /// Adds an edge between two existing blocks.
    pub fn add_edge(&mut self, source: BlockId, target: BlockId, kind: EdgeType) -> Result<()> {
        for id in [source, target] {
            if !self.blocks.contains_key(&id) {
                return Err(Error::InvalidBlockId(id));
            }
        }
        let index = self.edges.len();
        self.edges.push(ReilEdge { source, target, kind });
        self.outgoing.entry(source).or_default().push(index);
        self.incoming.entry(target).or_default().push(index);
        Ok(())
    }

    /// Returns a block by ID.
    pub fn block(&self, id: BlockId) -> Option<&ReilBlock> {
        self.blocks.get(&id)
    }

    /// Returns an iterator over all blocks.
    pub fn blocks(&self) -> impl Iterator<Item = &ReilBlock> {
        self.blocks.values()
    }

    /// Returns an iterator over all block IDs.
    pub fn block_ids(&self) -> impl Iterator<Item = BlockId> + '_ {
        self.blocks.keys().copied()
    }

    /// Returns the number of blocks.
    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    /// Returns all edges.
    pub fn edges(&self) -> &[ReilEdge] {
        &self.edges
    }

    /// Returns the number of instructions across all blocks.
    pub fn num_instructions(&self) -> usize {
        self.blocks.values().map(ReilBlock::len).sum()
    }

    /// Returns the edges leaving a block.
    pub fn outgoing_edges(&self, id: BlockId) -> impl Iterator<Item = &ReilEdge> {
        self.edge_list(&self.outgoing, id)
    }

    /// Returns the edges entering a block.
    pub fn incoming_edges(&self, id: BlockId) -> impl Iterator<Item = &ReilEdge> {
        self.edge_list(&self.incoming, id)
    }

    /// Returns the successors of a block.
    pub fn successors(&self, id: BlockId) -> Vec<BlockId> {
        self.outgoing_edges(id).map(|e| e.target).collect()
    }

    /// Returns the predecessors of a block.
    pub fn predecessors(&self, id: BlockId) -> Vec<BlockId> {
        self.incoming_edges(id).map(|e| e.source).collect()
    }

    fn edge_list<'a>(
        &'a self,
        index: &'a IndexMap<BlockId, Vec<usize>>,
        id: BlockId,
    ) -> impl Iterator<Item = &'a ReilEdge> {
        index
            .get(&id)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
            .iter()
            .map(move |&i| &self.edges[i])
    }

    /// Returns the block whose first instruction has this REIL address.
    pub fn block_starting_at(&self, address: u64) -> Option<&ReilBlock> {
        match self.addresses.get(&address)? {
            (id, 0) => self.blocks.get(id),
            _ => None,
        }
    }

    /// Returns the block containing the instruction at a REIL address.
    pub fn block_containing(&self, address: u64) -> Option<&ReilBlock> {
        let (id, _) = self.addresses.get(&address)?;
        self.blocks.get(id)
    }

    /// Returns the block and position of the instruction at a REIL address.
    pub fn position_of(&self, address: u64) -> Option<(BlockId, usize)> {
        self.addresses.get(&address).copied()
    }

    /// Returns the instruction at a REIL address.
    pub fn instruction_at(&self, address: u64) -> Option<&ReilInstruction> {
        let (id, index) = self.addresses.get(&address)?;
        self.blocks.get(id)?.instructions.get(*index)
    }

    /// Returns every REIL instruction translated from a native address.
    pub fn instructions_for_native(&self, native: u64) -> Vec<&ReilInstruction> {
        let mut found: Vec<&ReilInstruction> = self
            .blocks
            .values()
            .flat_map(|b| b.instructions.iter())
            .filter(|i| i.native_address() == native)
            .collect();
        found.sort_by_key(|i| i.address);
        found
    }
}

/// A named REIL graph.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ReilFunction {
    pub name: String,
    pub graph: ReilGraph,
}

impl ReilFunction {
    pub fn new(name: impl Into<String>, graph: ReilGraph) -> Self {
        Self {
            name: name.into(),
            graph,
        }
    }
}
