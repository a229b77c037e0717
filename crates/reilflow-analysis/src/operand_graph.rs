//! Operand dependency graph.
//!
//! Links every register operand an instruction reads to the operands that
//! may have defined it. A use is linked to the closest preceding definition
//! in its own block; failing that, predecessor blocks are searched with a
//! worklist, collecting the last definition on every path. A block is
//! searched at most once per query, so cyclic graphs terminate.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};

use indexmap::IndexSet;
use reilflow_core::{BlockId, ReilGraph, ReilInstruction};

use crate::mono::{MonoError, MonoResult};

/// One operand of one instruction.
///
/// Identity is the pair (instruction address, operand index).
#[derive(Debug, Clone, Copy)]
pub struct OperandGraphNode<'a> {
    instruction: &'a ReilInstruction,
    index: usize,
}

impl<'a> OperandGraphNode<'a> {
    pub fn new(instruction: &'a ReilInstruction, index: usize) -> Self {
        Self { instruction, index }
    }

    pub fn instruction(&self) -> &'a ReilInstruction {
        self.instruction
    }

    /// Operand position, 0 to 2.
    pub fn index(&self) -> usize {
        self.index
    }

    /// REIL address of the instruction.
    pub fn address(&self) -> u64 {
        self.instruction.address
    }

    /// The operand's textual value.
    pub fn value(&self) -> &'a str {
        &self.instruction.operands[self.index].value
    }

    fn key(&self) -> (u64, usize) {
        (self.instruction.address, self.index)
    }
}

impl PartialEq for OperandGraphNode<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for OperandGraphNode<'_> {}

impl Hash for OperandGraphNode<'_> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

impl PartialOrd for OperandGraphNode<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OperandGraphNode<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

/// A definition-to-use link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperandGraphEdge<'a> {
    pub definition: OperandGraphNode<'a>,
    pub usage: OperandGraphNode<'a>,
}

/// Def-use graph over instruction operands.
#[derive(Debug)]
pub struct OperandGraph<'a> {
    graph: &'a ReilGraph,
    nodes: IndexSet<OperandGraphNode<'a>>,
    edges: Vec<OperandGraphEdge<'a>>,
    definitions: HashMap<OperandGraphNode<'a>, Vec<OperandGraphNode<'a>>>,
    uses: HashMap<OperandGraphNode<'a>, Vec<OperandGraphNode<'a>>>,
}

impl<'a> OperandGraph<'a> {
    /// Builds the operand graph of a block graph.
    pub fn build(graph: &'a ReilGraph) -> Self {
        let mut result = Self {
            graph,
            nodes: IndexSet::new(),
            edges: Vec::new(),
            definitions: HashMap::new(),
            uses: HashMap::new(),
        };

        for block in graph.blocks() {
            for (position, instruction) in block.instructions.iter().enumerate() {
                for (index, register) in instruction.used_registers() {
                    let usage = OperandGraphNode::new(instruction, index);
                    result.nodes.insert(usage);
                    for definition in find_definitions(graph, block.id, position, register) {
                        result.link(definition, usage);
                    }
                }
                if instruction.defined_register().is_some() {
                    result.nodes.insert(OperandGraphNode::new(instruction, 2));
                }
            }
        }

        result
    }

    fn link(&mut self, definition: OperandGraphNode<'a>, usage: OperandGraphNode<'a>) {
        self.nodes.insert(definition);
        self.edges.push(OperandGraphEdge { definition, usage });
        self.definitions.entry(usage).or_default().push(definition);
        self.uses.entry(definition).or_default().push(usage);
    }

    /// Every operand node, in discovery order.
    pub fn nodes(&self) -> impl Iterator<Item = &OperandGraphNode<'a>> {
        self.nodes.iter()
    }

    pub fn edges(&self) -> &[OperandGraphEdge<'a>] {
        &self.edges
    }

    /// Looks up the node of an operand.
    pub fn node(&self, address: u64, index: usize) -> Option<OperandGraphNode<'a>> {
        let instruction = self.graph.instruction_at(address)?;
        let key = OperandGraphNode::new(instruction, index);
        self.nodes.get(&key).copied()
    }

    /// Definitions that may reach a use.
    pub fn definitions_of(&self, usage: &OperandGraphNode<'a>) -> &[OperandGraphNode<'a>] {
        self.definitions
            .get(usage)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Uses a definition may reach.
    pub fn uses_of(&self, definition: &OperandGraphNode<'a>) -> &[OperandGraphNode<'a>] {
        self.uses
            .get(definition)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Definitions of `register` that reach the instruction at `address`,
    /// before that instruction executes.
    pub fn reaching_definitions(&self, address: u64, register: &str) -> MonoResult<Vec<OperandGraphNode<'a>>> {
        let (block, position) = self
            .graph
            .position_of(address)
            .ok_or(MonoError::UnknownAddress(address))?;
        Ok(find_definitions(self.graph, block, position, register))
    }
}

/// The last definition of `register` in a run of instructions.
fn last_definition<'a>(instructions: &'a [ReilInstruction], register: &str) -> Option<OperandGraphNode<'a>> {
    instructions
        .iter()
        .rev()
        .find(|i| i.defined_register() == Some(register))
        .map(|i| OperandGraphNode::new(i, 2))
}

/// Definitions of `register` reaching position `position` of block `start`.
fn find_definitions<'a>(
    graph: &'a ReilGraph,
    start: BlockId,
    position: usize,
    register: &str,
) -> Vec<OperandGraphNode<'a>> {
    let Some(block) = graph.block(start) else {
        return Vec::new();
    };
    let prefix = &block.instructions[..position.min(block.instructions.len())];
    if let Some(definition) = last_definition(prefix, register) {
        return vec![definition];
    }

    let mut found = Vec::new();
    let mut visited = HashSet::new();
    let mut worklist = graph.predecessors(start);
    while let Some(id) = worklist.pop() {
        if !visited.insert(id) {
            continue;
        }
        let Some(predecessor) = graph.block(id) else {
            continue;
        };
        match last_definition(&predecessor.instructions, register) {
            Some(definition) => found.push(definition),
            None => worklist.extend(graph.predecessors(id)),
        }
    }

    found.sort();
    found
}
