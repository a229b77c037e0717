//! Error types for reilflow-core.

use thiserror::Error;

/// Core error type.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Invalid block reference.
    #[error("invalid block id: {0}")]
    InvalidBlockId(crate::BlockId),

    /// A block with this id is already part of the graph.
    #[error("duplicate block id: {0}")]
    DuplicateBlockId(crate::BlockId),

    /// Two instructions share one REIL address.
    #[error("duplicate instruction address {0:#x}")]
    DuplicateAddress(u64),

    /// Blocks must contain at least one instruction.
    #[error("block {0} has no instructions")]
    EmptyBlock(crate::BlockId),
}

/// Result alias for graph operations.
pub type Result<T> = std::result::Result<T, Error>;
