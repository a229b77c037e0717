//! REIL basic block representation.

use crate::ReilInstruction;

/// Unique identifier for a block within a REIL graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BlockId(pub u32);

impl BlockId {
    /// Creates a new block ID.
    pub fn new(id: u32) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for BlockId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "bb{}", self.0)
    }
}

/// A straight-line sequence of REIL instructions.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ReilBlock {
    /// Unique identifier for this block.
    pub id: BlockId,
    /// Instructions in execution order.
    pub instructions: Vec<ReilInstruction>,
}

impl ReilBlock {
    /// Creates a new block.
    pub fn new(id: BlockId, instructions: Vec<ReilInstruction>) -> Self {
        Self { id, instructions }
    }

    /// REIL address of the first instruction.
    pub fn start_address(&self) -> Option<u64> {
        self.instructions.first().map(|i| i.address)
    }

    /// REIL address of the last instruction.
    pub fn last_address(&self) -> Option<u64> {
        self.instructions.last().map(|i| i.address)
    }

    pub fn first_instruction(&self) -> Option<&ReilInstruction> {
        self.instructions.first()
    }

    pub fn last_instruction(&self) -> Option<&ReilInstruction> {
        self.instructions.last()
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Returns the instruction at a REIL address.
    pub fn instruction_at(&self, address: u64) -> Option<&ReilInstruction> {
        self.instructions.iter().find(|i| i.address == address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_addresses() {
        let block = ReilBlock::new(
            BlockId::new(3),
            vec![ReilInstruction::nop(0x500), ReilInstruction::nop(0x501)],
        );
        assert_eq!(block.start_address(), Some(0x500));
        assert_eq!(block.last_address(), Some(0x501));
        assert_eq!(block.len(), 2);
        assert!(block.instruction_at(0x501).is_some());
        assert!(block.instruction_at(0x502).is_none());
        assert_eq!(block.id.to_string(), "bb3");
    }
}
