//! Error types for the monotone framework.

use thiserror::Error;

use super::{EdgeId, NodeId};

/// Errors raised while building or running a monotone analysis.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MonoError {
    /// A node id that is not part of the instruction graph.
    #[error("unknown instruction graph node {0}")]
    UnknownNode(NodeId),

    /// An edge id that is not part of the instruction graph.
    #[error("unknown instruction graph edge {0:?}")]
    UnknownEdge(EdgeId),

    /// The initial state vector does not cover the graph.
    #[error("state vector holds {states} entries but the graph has {nodes} nodes")]
    StateVectorSizeMismatch { states: usize, nodes: usize },

    /// A graph node has no initial lattice element.
    #[error("no initial state for node {0}")]
    MissingState(NodeId),

    /// A REIL address that no instruction of the graph occupies.
    #[error("no instruction at REIL address {0:#x}")]
    UnknownAddress(u64),

    /// A transfer function made a node's state strictly smaller.
    #[error("non-monotone transformation at node {node} (instruction {address:#x})")]
    NonMonotoneTransformation { node: NodeId, address: u64 },
}

/// Result type for monotone framework operations.
pub type MonoResult<T> = Result<T, MonoError>;
